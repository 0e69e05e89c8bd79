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

//! Error types produced by the task progress channel.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Result alias for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Error type for task progress channel failures.
///
/// None of these are fatal to the hosting process. Errors raised while the controller
/// is running are reported through the error lifecycle handlers and the log, never
/// returned to the caller of `open()`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel URL could not be built from the configured host and task id.
    #[error("Invalid channel URL: {0}")]
    InvalidUrl(String),

    /// The transport could not be constructed.
    #[error("Failed to create transport: {0}")]
    Connect(String),

    /// The live transport reported an error.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An inbound frame could not be decoded as a message envelope.
    #[error("Failed to decode message: {0}")]
    Decode(String),

    /// An outbound payload could not be serialized.
    #[error("JSON error: {0}")]
    Json(String),

    /// Automatic reconnection gave up; only an explicit `connect()` recovers.
    #[error("Max reconnect attempts reached ({attempts})")]
    ReconnectExhausted {
        /// The configured attempt ceiling that was exceeded.
        attempts: u32,
    },

    /// The client was used outside of a tokio runtime.
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl ChannelError {
    /// Returns true if this error ends automatic reconnection.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::ReconnectExhausted { .. })
    }
}

impl From<tungstenite::Error> for ChannelError {
    fn from(error: tungstenite::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(error.to_string())
    }
}

impl From<url::ParseError> for ChannelError {
    fn from(error: url::ParseError) -> Self {
        Self::InvalidUrl(error.to_string())
    }
}
