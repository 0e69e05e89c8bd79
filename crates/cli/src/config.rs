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

use std::path::Path;

use anyhow::Context;
use cverifier_network::websocket::ChannelConfig;

use crate::opt::WatchOpt;

/// Reads a [`ChannelConfig`] from a TOML file.
///
/// Keys may use either snake case or the camel-case names of the web client
/// (`wsHost`, `maxReconnectAttempts`, `reconnectDelay`). Missing keys keep their defaults.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid channel configuration.
pub fn load_config_file(path: &Path) -> anyhow::Result<ChannelConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Resolves the channel configuration for a watch: the `--config` file (or defaults),
/// overridden by any flag given on the command line.
///
/// # Errors
///
/// Returns an error if the config file cannot be loaded.
pub fn resolve_channel_config(opt: &WatchOpt) -> anyhow::Result<ChannelConfig> {
    let mut config = match &opt.config {
        Some(path) => load_config_file(path)?,
        None => ChannelConfig::default(),
    };

    if let Some(host) = &opt.host {
        config.host.clone_from(host);
    }
    if opt.secure {
        config.secure = true;
    }
    if let Some(attempts) = opt.max_reconnect_attempts {
        config.max_reconnect_attempts = attempts;
    }
    if let Some(delay_ms) = opt.base_reconnect_delay_ms {
        config.base_reconnect_delay_ms = delay_ms;
    }
    if opt.heartbeat_secs.is_some() {
        config.heartbeat_secs = opt.heartbeat_secs;
    }

    Ok(config)
}
