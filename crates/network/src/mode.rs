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

use std::sync::atomic::{AtomicU8, Ordering};

use strum::{AsRefStr, Display, EnumString};

/// WebSocket `readyState` value for a connection being established.
pub const READY_STATE_CONNECTING: u8 = 0;
/// WebSocket `readyState` value for an open connection.
pub const READY_STATE_OPEN: u8 = 1;
/// WebSocket `readyState` value for a connection in its closing handshake.
pub const READY_STATE_CLOSING: u8 = 2;
/// WebSocket `readyState` value for a closed (or never opened) connection.
pub const READY_STATE_CLOSED: u8 = 3;

/// Connection state of a task progress channel.
///
/// The state is owned by the channel state machine and mirrored into an `AtomicU8`
/// so the client facade can read it without going through the controller task.
#[derive(Clone, Copy, Debug, Default, Display, Hash, PartialEq, Eq, AsRefStr, EnumString)]
#[repr(u8)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    /// The channel has never been asked to connect.
    Idle = 0,
    /// A transport has been created and the handshake is in flight.
    Connecting = 1,
    /// The transport is open and messages are flowing.
    Open = 2,
    /// A clean shutdown was requested and the transport has not yet confirmed it.
    Closing = 3,
    /// The connection ended with a normal closure (code 1000) or a local `close()`.
    ClosedClean = 4,
    /// The connection ended abnormally, or reconnection attempts were exhausted.
    ClosedAbnormal = 5,
    /// A reconnection timer is pending.
    ReconnectScheduled = 6,
}

impl ConnectionState {
    /// Convert a u8 to [`ConnectionState`], useful when loading from an `AtomicU8`.
    ///
    /// Unknown values map to [`ConnectionState::ClosedAbnormal`].
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::Open,
            3 => Self::Closing,
            4 => Self::ClosedClean,
            6 => Self::ReconnectScheduled,
            _ => Self::ClosedAbnormal,
        }
    }

    #[inline]
    pub fn from_atomic(value: &AtomicU8) -> Self {
        Self::from_u8(value.load(Ordering::SeqCst))
    }

    /// Convert a [`ConnectionState`] to a u8, useful when storing to an `AtomicU8`.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Stores this state into the given atomic.
    #[inline]
    pub fn store(self, target: &AtomicU8) {
        target.store(self.as_u8(), Ordering::SeqCst);
    }

    /// Returns true if the channel is open.
    #[inline]
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns true if a connection attempt is in flight or established.
    ///
    /// `open()` is a no-op in these states.
    #[inline]
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }

    /// Returns true if the channel is closed, cleanly or not.
    #[inline]
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::ClosedClean | Self::ClosedAbnormal)
    }

    /// Returns true if a reconnection timer is pending.
    #[inline]
    #[must_use]
    pub const fn is_reconnect_scheduled(&self) -> bool {
        matches!(self, Self::ReconnectScheduled)
    }

    /// Returns the WebSocket `readyState` number for this state.
    ///
    /// Idle, closed and reconnect-scheduled channels have no live socket and report
    /// [`READY_STATE_CLOSED`].
    #[must_use]
    pub const fn ready_state(&self) -> u8 {
        match self {
            Self::Connecting => READY_STATE_CONNECTING,
            Self::Open => READY_STATE_OPEN,
            Self::Closing => READY_STATE_CLOSING,
            Self::Idle | Self::ClosedClean | Self::ClosedAbnormal | Self::ReconnectScheduled => {
                READY_STATE_CLOSED
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ConnectionState::Idle)]
    #[case(ConnectionState::Connecting)]
    #[case(ConnectionState::Open)]
    #[case(ConnectionState::Closing)]
    #[case(ConnectionState::ClosedClean)]
    #[case(ConnectionState::ClosedAbnormal)]
    #[case(ConnectionState::ReconnectScheduled)]
    fn test_atomic_round_trip(#[case] state: ConnectionState) {
        let atomic = AtomicU8::new(0);
        state.store(&atomic);
        assert_eq!(ConnectionState::from_atomic(&atomic), state);
    }

    #[rstest]
    #[case(ConnectionState::Idle, READY_STATE_CLOSED)]
    #[case(ConnectionState::Connecting, READY_STATE_CONNECTING)]
    #[case(ConnectionState::Open, READY_STATE_OPEN)]
    #[case(ConnectionState::Closing, READY_STATE_CLOSING)]
    #[case(ConnectionState::ReconnectScheduled, READY_STATE_CLOSED)]
    fn test_ready_state(#[case] state: ConnectionState, #[case] expected: u8) {
        assert_eq!(state.ready_state(), expected);
    }

    #[rstest]
    fn test_display_and_parse() {
        assert_eq!(
            ConnectionState::ReconnectScheduled.to_string(),
            "RECONNECT_SCHEDULED"
        );
        assert_eq!(
            ConnectionState::from_str("CLOSED_CLEAN").unwrap(),
            ConnectionState::ClosedClean
        );
    }

    #[rstest]
    fn test_unknown_value_is_abnormal() {
        assert_eq!(ConnectionState::from_u8(42), ConnectionState::ClosedAbnormal);
    }
}
