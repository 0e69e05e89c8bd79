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

//! Public facade of the task progress channel.

use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
};

use serde::Serialize;
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    task::JoinHandle,
};
use url::Url;

use super::{
    config::ChannelConfig,
    machine::ChannelStateMachine,
    messages::TaskMessage,
    subscription::{SubscriberRegistry, Subscription, Topic},
    transport::{TransportConnector, TungsteniteConnector},
    types::ChannelEvent,
};
use crate::{
    error::{ChannelError, ChannelResult},
    mode::ConnectionState,
};

/// Client for the real-time progress stream of one analysis task.
///
/// Construction does not connect. All operations are non-blocking: they enqueue a
/// command for the controller task that owns the connection, so state changes become
/// visible through [`Self::state`] once the controller has processed them.
///
/// Subscriptions survive reconnects. Dropping the client closes the connection, cancels
/// any pending reconnection and discards every registered handler.
///
/// # Example
///
/// ```no_run
/// use cverifier_network::websocket::{ChannelConfig, MessageKind, TaskChannelClient, TaskMessage};
///
/// # async fn run() -> cverifier_network::error::ChannelResult<()> {
/// let client = TaskChannelClient::new("abc", &ChannelConfig::new("localhost:8080"))?;
/// client.subscribe(MessageKind::Progress, |message: &TaskMessage| {
///     if let TaskMessage::Progress(env) = message {
///         println!("{}%", env.data.progress);
///     }
/// });
/// client.connect();
/// # Ok(())
/// # }
/// ```
pub struct TaskChannelClient {
    task_id: String,
    url: Url,
    registry: Arc<SubscriberRegistry>,
    state: Arc<AtomicU8>,
    epoch: Arc<AtomicU64>,
    events_tx: UnboundedSender<ChannelEvent>,
    controller_task: Option<JoinHandle<()>>,
}

impl Debug for TaskChannelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(TaskChannelClient))
            .field("task_id", &self.task_id)
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl TaskChannelClient {
    /// Creates a client for `task_id` backed by a tokio-tungstenite WebSocket.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel URL cannot be built from `config` and `task_id`,
    /// or if called outside of a tokio runtime.
    pub fn new(task_id: &str, config: &ChannelConfig) -> ChannelResult<Self> {
        let connector = Arc::new(TungsteniteConnector::new(config.heartbeat()));
        Self::with_connector(task_id, config, connector)
    }

    /// Creates a client for `task_id` using `connector` to create transports.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel URL cannot be built from `config` and `task_id`,
    /// or if called outside of a tokio runtime.
    pub fn with_connector(
        task_id: &str,
        config: &ChannelConfig,
        connector: Arc<dyn TransportConnector>,
    ) -> ChannelResult<Self> {
        let url = config.channel_url(task_id)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ChannelError::Runtime(e.to_string()))?;

        let registry = Arc::new(SubscriberRegistry::new());
        let state = Arc::new(AtomicU8::new(ConnectionState::Idle.as_u8()));
        let epoch = Arc::new(AtomicU64::new(0));
        let (events_tx, events_rx) = unbounded_channel();

        let machine = ChannelStateMachine::new(
            url.clone(),
            connector,
            registry.clone(),
            config.backoff(),
            state.clone(),
            epoch.clone(),
            events_tx.clone(),
        );
        let controller_task = runtime.spawn(run_controller(machine, events_rx));

        Ok(Self {
            task_id: task_id.to_string(),
            url,
            registry,
            state,
            epoch,
            events_tx,
            controller_task: Some(controller_task),
        })
    }

    fn command(&self, event: ChannelEvent) {
        if let Err(e) = self.events_tx.send(event) {
            tracing::error!("Channel controller has stopped, dropping {:?}", e.0);
        }
    }

    /// Opens the connection, starting a fresh reconnection budget.
    ///
    /// A no-op while already connecting or open.
    pub fn connect(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.command(ChannelEvent::Open);
    }

    /// Closes the connection with code 1000. No automatic reconnection happens until
    /// [`Self::connect`] is called again.
    pub fn disconnect(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.command(ChannelEvent::Close);
    }

    /// Serializes `payload` to JSON and sends it if the channel is open.
    ///
    /// When the channel is not open the payload is dropped and a warning is logged.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload` cannot be serialized.
    pub fn send<T: Serialize>(&self, payload: &T) -> ChannelResult<()> {
        let text = serde_json::to_string(payload)?;
        self.send_text(text);
        Ok(())
    }

    /// Sends an already serialized payload if the channel is open.
    pub fn send_text(&self, text: impl Into<String>) {
        let state = self.state();
        if !state.is_open() {
            tracing::warn!("Cannot send message, channel is {state}");
            return;
        }
        self.command(ChannelEvent::Send(text.into()));
    }

    /// Registers `handler` for messages of `topic` (a `type` tag, a [`MessageKind`] or
    /// the wildcard `*`).
    ///
    /// [`MessageKind`]: super::messages::MessageKind
    pub fn subscribe<F>(&self, topic: impl Into<Topic>, handler: F) -> Subscription
    where
        F: Fn(&TaskMessage) + Send + Sync + 'static,
    {
        self.registry.subscribe(topic, Arc::new(handler))
    }

    /// Registers `handler` to run each time the channel opens.
    pub fn on_open<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.registry.on_opened(Arc::new(handler))
    }

    /// Registers `handler` to run each time the channel closes, cleanly or not.
    pub fn on_close<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.registry.on_closed(Arc::new(handler))
    }

    /// Registers `handler` for transport errors and reconnection exhaustion.
    pub fn on_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChannelError) + Send + Sync + 'static,
    {
        self.registry.on_error(Arc::new(handler))
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_atomic(&self.state)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Returns the WebSocket `readyState` number of the current connection.
    #[must_use]
    pub fn ready_state(&self) -> u8 {
        self.state().ready_state()
    }

    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Closes the channel, discards all handlers and waits for the controller to stop.
    pub async fn dispose(mut self) {
        self.command(ChannelEvent::Shutdown);

        if let Some(task) = self.controller_task.take()
            && let Err(e) = task.await
        {
            tracing::error!("Error awaiting controller task: {e}");
        }
    }
}

impl Drop for TaskChannelClient {
    fn drop(&mut self) {
        if self.controller_task.is_some() {
            // Controller may already be gone if the runtime is shutting down
            let _ = self.events_tx.send(ChannelEvent::Shutdown);
        }
        self.registry.clear();
    }
}

async fn run_controller(
    mut machine: ChannelStateMachine,
    mut events_rx: UnboundedReceiver<ChannelEvent>,
) {
    tracing::debug!("Started task 'controller'");

    while let Some(event) = events_rx.recv().await {
        if !machine.handle(event) {
            break;
        }
    }

    tracing::debug!("Completed task 'controller'");
}
