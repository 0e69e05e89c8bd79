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

//! Type definitions shared by the channel components.

use std::{fmt::Display, sync::Arc};

use super::messages::TaskMessage;
use crate::error::ChannelError;

/// Close code for a normal, intentional closure. Suppresses reconnection.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when a connection drops without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Close code reported when a close frame carried no status code.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Function type for handling decoded task messages.
pub type MessageHandler = Arc<dyn Fn(&TaskMessage) + Send + Sync>;

/// Function type for handling payload-free lifecycle events (opened, closed).
pub type LifecycleHandler = Arc<dyn Fn() + Send + Sync>;

/// Function type for handling transport errors and reconnection exhaustion.
pub type ErrorHandler = Arc<dyn Fn(&ChannelError) + Send + Sync>;

/// Identity of one physical transport handle.
///
/// Assigned monotonically by the state machine each time a transport is created, and
/// attached to every event the transport emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

/// Identity of one scheduled reconnection timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// A frame payload moving across the transport boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportPayload {
    Text(String),
    Binary(Vec<u8>),
}

impl TransportPayload {
    /// Returns the payload as UTF-8 text, if it is valid UTF-8.
    pub fn as_text(&self) -> Result<&str, std::str::Utf8Error> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Binary(data) => std::str::from_utf8(data),
        }
    }

    /// Returns the payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Returns true if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An event emitted by a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The handshake completed.
    Opened,
    /// A data frame arrived.
    Message(TransportPayload),
    /// The connection ended with the given close code and reason.
    Closed { code: u16, reason: String },
    /// The transport failed. No further events follow from the same handle.
    Error(String),
}

/// A unit of work for the channel controller.
///
/// Facade commands, transport events and timer expiries all travel through one channel
/// so the state machine only ever handles one of them at a time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Explicit `connect()` from the facade.
    Open,
    /// Explicit `disconnect()` from the facade.
    Close,
    /// Outbound text payload from the facade.
    Send(String),
    /// Close the channel, drop all subscribers and stop the controller.
    Shutdown,
    /// An event from the transport identified by `handle`.
    Transport {
        handle: HandleId,
        event: TransportEvent,
    },
    /// The reconnection timer identified by `timer` elapsed.
    ReconnectDue(TimerId),
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_binary_payload_as_text() {
        let payload = TransportPayload::Binary(b"{\"type\":\"log\"}".to_vec());
        assert_eq!(payload.as_text().unwrap(), "{\"type\":\"log\"}");
        assert_eq!(payload.len(), 14);
    }

    #[rstest]
    fn test_invalid_utf8_binary_payload() {
        let payload = TransportPayload::Binary(vec![0xff, 0xfe]);
        assert!(payload.as_text().is_err());
    }

    #[rstest]
    fn test_handle_display() {
        assert_eq!(HandleId(7).to_string(), "handle-7");
        assert_eq!(TimerId(2).to_string(), "timer-2");
    }
}
