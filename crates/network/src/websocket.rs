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

//! Resilient client for the task progress WebSocket channel.
//!
//! A [`TaskChannelClient`] keeps one persistent connection to
//! `{ws|wss}://{host}/ws/tasks/{task_id}/progress`, decodes every frame into a
//! [`TaskMessage`] and fans it out to the handlers registered for its `type` tag and for
//! the wildcard `*`. Abnormal closures are retried with a linear backoff up to a
//! configured number of attempts; a normal closure (code 1000) or an explicit
//! `disconnect()` is final.
//!
//! Internally the client is split into:
//!
//! - [`ChannelStateMachine`]: owns the transport and drives the connection lifecycle.
//! - [`ReconnectScheduler`]: owns the attempt counter and the single retry timer.
//! - [`SubscriberRegistry`]: topic and lifecycle handler lists.
//! - [`TransportConnector`]: creates transports; [`TungsteniteConnector`] in production.
//!
//! All of them are driven by one controller task draining one event channel.

pub mod client;
pub mod config;
pub mod machine;
pub mod messages;
pub mod reconnect;
pub mod subscription;
pub mod transport;
pub mod types;

pub use client::TaskChannelClient;
pub use config::ChannelConfig;
pub use machine::ChannelStateMachine;
pub use messages::{
    CompleteData, Envelope, ErrorData, LogData, LogLevel, MessageKind, ProgressData, TaskMessage,
    TaskStatus, UnknownMessage, VulnerabilityData,
};
pub use reconnect::{ReconnectDecision, ReconnectScheduler};
pub use subscription::{SubscriberRegistry, Subscription, SubscriptionId, Topic, WILDCARD};
pub use transport::{Transport, TransportConnector, TransportSink, TungsteniteConnector};
pub use types::{
    CLOSE_ABNORMAL, CLOSE_NORMAL, ChannelEvent, ErrorHandler, HandleId, LifecycleHandler,
    MessageHandler, TimerId, TransportEvent, TransportPayload,
};
