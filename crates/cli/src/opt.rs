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

use std::path::PathBuf;

use clap::Parser;

/// Main CLI structure for parsing command-line arguments and options.
///
/// This is the entry point for the CVerifier command-line interface, providing access
/// to the live progress stream of analysis tasks.
#[derive(Debug, Parser)]
#[clap(version, about, author)]
pub struct CverifierCli {
    #[clap(subcommand)]
    pub command: Commands,
    /// Log filter directive (e.g. `debug` or `cverifier_network=trace`). Defaults to `RUST_LOG`, then `info`.
    #[arg(long, global = true, env = "CVERIFIER_LOG")]
    pub log_level: Option<String>,
}

/// Available top-level commands for the CVerifier CLI.
#[derive(Parser, Debug)]
pub enum Commands {
    Watch(WatchOpt),
}

/// Options for streaming the progress of one analysis task.
///
/// Values given here override those read from `--config`.
#[derive(Parser, Debug, Clone, Default)]
#[command(about = "Stream the live progress of an analysis task", long_about = None)]
pub struct WatchOpt {
    /// Identifier of the task to watch.
    #[arg(long)]
    pub task_id: String,
    /// Host (and optional port) of the progress service, optionally prefixed with a scheme.
    #[arg(long, env = "CVERIFIER_WS_HOST")]
    pub host: Option<String>,
    /// Connect with `wss://` when the host carries no scheme.
    #[arg(long)]
    pub secure: bool,
    /// Maximum consecutive automatic reconnection attempts.
    #[arg(long, env = "CVERIFIER_MAX_RECONNECT_ATTEMPTS")]
    pub max_reconnect_attempts: Option<u32>,
    /// Base reconnection delay in milliseconds; attempt n waits n times this.
    #[arg(long, env = "CVERIFIER_BASE_RECONNECT_DELAY_MS")]
    pub base_reconnect_delay_ms: Option<u64>,
    /// Interval in seconds between keep-alive pings.
    #[arg(long)]
    pub heartbeat_secs: Option<u64>,
    /// Path to a TOML channel configuration file.
    #[arg(long, env = "CVERIFIER_CONFIG")]
    pub config: Option<PathBuf>,
}
