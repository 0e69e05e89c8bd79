// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2025 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

use tracing_subscriber::EnvFilter;

/// Default filter when neither `--log-level` nor `RUST_LOG` is set.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Builds the log filter from an explicit directive, falling back to `RUST_LOG`.
///
/// # Errors
///
/// Returns an error if the directive cannot be parsed.
pub fn build_filter(level: Option<&str>) -> anyhow::Result<EnvFilter> {
    let filter = match level {
        Some(directive) => EnvFilter::try_new(directive)?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))?,
    };
    Ok(filter)
}

/// Installs the global `tracing` subscriber writing compact lines to stdout.
///
/// # Errors
///
/// Returns an error if the filter is invalid or a global subscriber is already set.
pub fn init_tracing(level: Option<&str>) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(level)?)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("debug")]
    #[case("cverifier_network=trace,warn")]
    fn test_build_filter_from_directive(#[case] directive: &str) {
        let filter = build_filter(Some(directive)).unwrap();
        assert_eq!(filter.to_string(), directive);
    }

    #[rstest]
    fn test_invalid_directive_is_rejected() {
        assert!(build_filter(Some("cverifier_network=loud")).is_err());
    }
}
