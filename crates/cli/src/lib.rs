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

#![warn(rustc::all)]
#![deny(unsafe_code)]
#![deny(nonstandard_style)]
#![deny(missing_debug_implementations)]

pub mod config;
pub mod logging;
pub mod opt;
pub mod watch;

use std::process::ExitCode;

use crate::{
    opt::{Commands, CverifierCli},
    watch::run_watch,
};

/// Runs the parsed command and returns the process exit code.
///
/// # Errors
///
/// Returns an error if the command could not be started.
pub async fn run(opt: CverifierCli) -> anyhow::Result<ExitCode> {
    match opt.command {
        Commands::Watch(watch_opt) => {
            let outcome = run_watch(watch_opt).await?;
            Ok(ExitCode::from(outcome.exit_code()))
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_parse_watch_command() {
        let cli = CverifierCli::parse_from([
            "cverifier",
            "--log-level",
            "debug",
            "watch",
            "--task-id",
            "abc",
            "--host",
            "wss://verifier.example.com",
            "--max-reconnect-attempts",
            "3",
            "--base-reconnect-delay-ms",
            "500",
        ]);

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        let Commands::Watch(opt) = cli.command;
        assert_eq!(opt.task_id, "abc");
        assert_eq!(opt.host.as_deref(), Some("wss://verifier.example.com"));
        assert_eq!(opt.max_reconnect_attempts, Some(3));
        assert_eq!(opt.base_reconnect_delay_ms, Some(500));
        assert!(!opt.secure);
    }

    #[rstest]
    fn test_watch_requires_task_id() {
        assert!(CverifierCli::try_parse_from(["cverifier", "watch"]).is_err());
    }
}
