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

//! Real-time task progress channel client for the CVerifier analysis service.
//!
//! The `cverifier-network` crate maintains a single persistent WebSocket connection to the
//! progress stream of one analysis task, survives disconnections with a bounded linear
//! reconnection policy, and delivers typed messages to subscribers in arrival order:
//!
//! - Tagged message model for progress, log, vulnerability, complete and error frames.
//! - Subscriber registry keyed by message type with a wildcard topic and lifecycle hooks.
//! - Connection state machine that ignores events from detached transports.
//! - Linear backoff with an attempt ceiling and a single cancellable retry timer.
//! - tokio-tungstenite transport with rustls TLS and an optional heartbeat.
//!
//! With the `test-utils` feature, the `testing` module provides an in-memory transport
//! for driving the client without a network.

#![warn(rustc::all)]
#![deny(unsafe_code)]
#![deny(nonstandard_style)]
#![deny(missing_debug_implementations)]
#![deny(clippy::missing_errors_doc)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod backoff;
pub mod error;
pub mod mode;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod tls;
pub mod websocket;
