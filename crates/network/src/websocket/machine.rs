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

//! Connection state machine for the task progress channel.
//!
//! The machine is owned by the controller task and handles one [`ChannelEvent`] at a
//! time, so it needs no internal locking. It owns at most one transport, identified by
//! the [`HandleId`] it assigned when creating it; events carrying any other id come from
//! a detached transport and are ignored.
//!
//! # Transitions
//!
//! | From                        | Event                     | To                 |
//! |-----------------------------|---------------------------|--------------------|
//! | any but Connecting and Open | `open()`                  | Connecting         |
//! | Connecting                  | transport opened          | Open               |
//! | Connecting, Open            | `close()`                 | Closing            |
//! | Closing                     | transport closed or error | ClosedClean        |
//! | Connecting, Open            | closed with 1000          | ClosedClean        |
//! | Connecting, Open            | other close code or error | ClosedAbnormal     |
//! | ClosedAbnormal              | retry scheduled           | ReconnectScheduled |
//! | ReconnectScheduled          | timer elapsed             | Connecting         |

use std::sync::{
    Arc,
    atomic::{AtomicU8, AtomicU64, Ordering},
};

use tokio::sync::mpsc::UnboundedSender;
use url::Url;

use super::{
    messages::TaskMessage,
    reconnect::{ReconnectDecision, ReconnectScheduler},
    subscription::SubscriberRegistry,
    transport::{Transport, TransportConnector, TransportSink},
    types::{CLOSE_NORMAL, ChannelEvent, HandleId, TimerId, TransportEvent, TransportPayload},
};
use crate::{backoff::LinearBackoff, error::ChannelError, mode::ConnectionState};

/// Reason sent with the close frame of a client-initiated disconnect.
pub const CLIENT_CLOSE_REASON: &str = "Client disconnect";

#[derive(Debug)]
struct ActiveTransport {
    handle: HandleId,
    inner: Box<dyn Transport>,
}

/// Drives one task progress channel through its connection lifecycle.
#[derive(Debug)]
pub struct ChannelStateMachine {
    url: Url,
    connector: Arc<dyn TransportConnector>,
    registry: Arc<SubscriberRegistry>,
    state: Arc<AtomicU8>,
    epoch: Arc<AtomicU64>,
    events_tx: UnboundedSender<ChannelEvent>,
    transport: Option<ActiveTransport>,
    next_handle: u64,
    reconnect: ReconnectScheduler,
}

impl ChannelStateMachine {
    /// Creates a new machine in the state held by `state`.
    ///
    /// `events_tx` must feed the same channel the controller drains; transports and
    /// reconnection timers report back through it. `epoch` is bumped by the client on
    /// every explicit `connect()`/`disconnect()` so a timer expiry queued before such a
    /// command is not acted on.
    #[must_use]
    pub fn new(
        url: Url,
        connector: Arc<dyn TransportConnector>,
        registry: Arc<SubscriberRegistry>,
        backoff: LinearBackoff,
        state: Arc<AtomicU8>,
        epoch: Arc<AtomicU64>,
        events_tx: UnboundedSender<ChannelEvent>,
    ) -> Self {
        Self {
            url,
            connector,
            registry,
            state,
            epoch,
            events_tx,
            transport: None,
            next_handle: 1,
            reconnect: ReconnectScheduler::new(backoff),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_atomic(&self.state)
    }

    fn set_state(&self, state: ConnectionState) {
        state.store(&self.state);
    }

    /// Returns the reconnection attempts counted since the last successful open.
    #[must_use]
    pub const fn reconnect_attempt(&self) -> u32 {
        self.reconnect.attempt()
    }

    /// Returns true if a reconnection timer is pending.
    #[must_use]
    pub const fn is_reconnect_pending(&self) -> bool {
        self.reconnect.is_pending()
    }

    /// Returns the id of the transport currently owned, if any.
    #[must_use]
    pub fn current_handle(&self) -> Option<HandleId> {
        self.transport.as_ref().map(|t| t.handle)
    }

    /// Handles one event. Returns false once the machine has shut down.
    pub fn handle(&mut self, event: ChannelEvent) -> bool {
        match event {
            ChannelEvent::Open => self.open(),
            ChannelEvent::Close => self.close(),
            ChannelEvent::Send(text) => self.send(text),
            ChannelEvent::Transport { handle, event } => self.on_transport_event(handle, event),
            ChannelEvent::ReconnectDue(timer) => self.on_reconnect_due(timer),
            ChannelEvent::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    /// Starts a fresh session: cancels any pending retry, resets the attempt counter
    /// and connects. A no-op while already connecting or open.
    pub fn open(&mut self) {
        let state = self.state();
        if state.is_active() {
            tracing::warn!("Channel already {state}, ignoring open");
            return;
        }

        self.reconnect.cancel();
        self.reconnect.reset();
        self.start_connection();
    }

    /// Closes the channel with code 1000 and disables automatic reconnection.
    pub fn close(&mut self) {
        if self.reconnect.cancel() {
            tracing::debug!("Reconnection cancelled by close");
        }

        match self.state() {
            ConnectionState::Connecting | ConnectionState::Open => {
                if let Some(active) = self.transport.as_mut() {
                    tracing::info!("Closing channel {}", self.url);
                    active.inner.close(CLOSE_NORMAL, CLIENT_CLOSE_REASON);
                    self.set_state(ConnectionState::Closing);
                } else {
                    self.set_state(ConnectionState::ClosedClean);
                }
            }
            ConnectionState::Closing => {
                tracing::debug!("Channel already closing");
            }
            ConnectionState::Idle
            | ConnectionState::ClosedClean
            | ConnectionState::ClosedAbnormal
            | ConnectionState::ReconnectScheduled => {
                self.release_transport();
                self.set_state(ConnectionState::ClosedClean);
            }
        }
    }

    /// Sends a text payload if the channel is open, otherwise drops it with a warning.
    pub fn send(&mut self, text: String) {
        let state = self.state();
        let Some(active) = self.transport.as_mut().filter(|_| state.is_open()) else {
            tracing::warn!("Cannot send message, channel is {state}");
            return;
        };

        tracing::trace!("Sending message: {text}");
        if let Err(e) = active.inner.send(TransportPayload::Text(text)) {
            tracing::error!("Failed to send message: {e}");
        }
    }

    /// Closes the channel and drops every registered handler.
    pub fn shutdown(&mut self) {
        tracing::debug!("Shutting down channel {}", self.url);
        self.close();
        self.registry.clear();
        // Dropping the transport releases the socket once the close frame is flushed
        self.transport = None;
        self.set_state(ConnectionState::ClosedClean);
    }

    /// Applies an event reported by the transport `handle`.
    pub fn on_transport_event(&mut self, handle: HandleId, event: TransportEvent) {
        if self.current_handle() != Some(handle) {
            tracing::trace!("Ignoring {event:?} from detached {handle}");
            return;
        }

        match event {
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::Message(payload) => self.on_payload(&payload),
            TransportEvent::Closed { code, reason } => self.on_closed(code, &reason),
            TransportEvent::Error(message) => self.on_error(message),
        }
    }

    /// Reconnects if `timer` is the pending retry and no explicit command intervened.
    pub fn on_reconnect_due(&mut self, timer: TimerId) {
        let Some(scheduled_epoch) = self.reconnect.take_due(timer) else {
            tracing::debug!("Ignoring stale {timer}");
            return;
        };

        if scheduled_epoch != self.epoch.load(Ordering::SeqCst) {
            tracing::debug!("Ignoring {timer} superseded by a client command");
            return;
        }

        if !self.state().is_reconnect_scheduled() {
            tracing::debug!("Ignoring {timer} in state {}", self.state());
            return;
        }

        tracing::info!(
            "Reconnecting to {} (attempt {}/{})",
            self.url,
            self.reconnect.attempt(),
            self.reconnect.max_attempts()
        );
        self.start_connection();
    }

    fn start_connection(&mut self) {
        self.release_transport();

        let handle = HandleId(self.next_handle);
        self.next_handle += 1;

        self.set_state(ConnectionState::Connecting);
        tracing::info!("Connecting to {} ({handle})", self.url);

        let sink = TransportSink::new(handle, self.events_tx.clone());
        match self.connector.connect(&self.url, sink) {
            Ok(inner) => self.transport = Some(ActiveTransport { handle, inner }),
            Err(e) => {
                tracing::error!("Failed to create transport: {e}");
                self.fail(&e);
            }
        }
    }

    /// Detaches the current transport; its later events are ignored.
    fn release_transport(&mut self) {
        if let Some(mut active) = self.transport.take() {
            tracing::debug!("Releasing {}", active.handle);
            active.inner.close(CLOSE_NORMAL, CLIENT_CLOSE_REASON);
        }
    }

    fn on_opened(&mut self) {
        if self.state() != ConnectionState::Connecting {
            tracing::debug!("Ignoring open in state {}", self.state());
            return;
        }

        self.reconnect.reset();
        self.set_state(ConnectionState::Open);
        tracing::info!("Connected to {}", self.url);
        self.registry.notify_opened();
    }

    fn on_payload(&self, payload: &TransportPayload) {
        let text = match payload.as_text() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Dropping non UTF-8 message ({} bytes): {e}", payload.len());
                return;
            }
        };

        match TaskMessage::decode(text) {
            Ok(message) => {
                let invoked = self.registry.dispatch(&message);
                tracing::trace!("Dispatched '{}' to {invoked} handler(s)", message.type_tag());
            }
            Err(e) => tracing::error!("{e}: {text}"),
        }
    }

    fn on_closed(&mut self, code: u16, reason: &str) {
        self.transport = None;

        if code == CLOSE_NORMAL || self.state() == ConnectionState::Closing {
            self.set_state(ConnectionState::ClosedClean);
            tracing::info!("Channel closed ({code}) {reason}");
            self.registry.notify_closed();
            return;
        }

        tracing::warn!("Channel closed abnormally ({code}) {reason}");
        self.set_state(ConnectionState::ClosedAbnormal);
        self.registry.notify_closed();
        self.schedule_reconnect();
    }

    fn on_error(&mut self, message: String) {
        self.transport = None;

        if self.state() == ConnectionState::Closing {
            tracing::debug!("Transport error while closing: {message}");
            self.set_state(ConnectionState::ClosedClean);
            self.registry.notify_closed();
            return;
        }

        tracing::error!("Transport error: {message}");
        self.fail(&ChannelError::Transport(message));
    }

    /// Abnormal termination: report the error, fire closed, then decide on a retry.
    fn fail(&mut self, error: &ChannelError) {
        self.transport = None;
        self.set_state(ConnectionState::ClosedAbnormal);
        self.registry.notify_error(error);
        self.registry.notify_closed();
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let epoch = self.epoch.load(Ordering::SeqCst);
        match self.reconnect.schedule(&self.events_tx, epoch) {
            ReconnectDecision::Scheduled { attempt, delay, .. } => {
                self.set_state(ConnectionState::ReconnectScheduled);
                tracing::warn!(
                    "Reconnecting in {}ms (attempt {attempt}/{})",
                    delay.as_millis(),
                    self.reconnect.max_attempts()
                );
            }
            ReconnectDecision::Exhausted { attempts } => {
                let error = ChannelError::ReconnectExhausted { attempts };
                tracing::error!("{error}");
                self.registry.notify_error(&error);
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use rstest::rstest;
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    use super::*;
    use crate::testing::FakeConnector;

    struct Harness {
        machine: ChannelStateMachine,
        connector: Arc<FakeConnector>,
        registry: Arc<SubscriberRegistry>,
        epoch: Arc<AtomicU64>,
        rx: UnboundedReceiver<ChannelEvent>,
    }

    impl Harness {
        fn new(max_attempts: u32) -> Self {
            let (tx, rx) = unbounded_channel();
            let connector = Arc::new(FakeConnector::new());
            let registry = Arc::new(SubscriberRegistry::new());
            let epoch = Arc::new(AtomicU64::new(0));
            let machine = ChannelStateMachine::new(
                Url::parse("ws://localhost:8080/ws/tasks/abc/progress").unwrap(),
                connector.clone(),
                registry.clone(),
                LinearBackoff::new(Duration::from_millis(100), max_attempts),
                Arc::new(AtomicU8::new(0)),
                epoch.clone(),
                tx,
            );
            Self {
                machine,
                connector,
                registry,
                epoch,
                rx,
            }
        }

        /// Feeds every queued event to the machine.
        fn pump(&mut self) {
            while let Ok(event) = self.rx.try_recv() {
                self.machine.handle(event);
            }
        }

        fn emit(&mut self, event: TransportEvent) {
            assert!(self.connector.emit(event));
            self.pump();
        }
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_open_then_opened() {
        let mut h = Harness::new(5);
        let opened = Arc::new(AtomicU64::new(0));
        let opened_clone = opened.clone();
        h.registry.on_opened(Arc::new(move || {
            opened_clone.fetch_add(1, Ordering::SeqCst);
        }));

        h.machine.open();
        assert_eq!(h.machine.state(), ConnectionState::Connecting);
        assert_eq!(h.connector.connect_count(), 1);

        h.emit(TransportEvent::Opened);
        assert_eq!(h.machine.state(), ConnectionState::Open);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_open_is_noop_when_active() {
        let mut h = Harness::new(5);
        h.machine.open();
        h.machine.open();
        assert_eq!(h.connector.connect_count(), 1);

        h.emit(TransportEvent::Opened);
        h.machine.open();
        assert_eq!(h.connector.connect_count(), 1);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_events_from_detached_handle_are_ignored() {
        let mut h = Harness::new(5);
        h.machine.open();
        let first = h.machine.current_handle().unwrap();
        h.machine.close();
        h.machine.open();
        assert_ne!(h.machine.current_handle(), Some(first));

        assert!(h.connector.emit_to(first, TransportEvent::Opened));
        h.pump();
        assert_eq!(h.machine.state(), ConnectionState::Connecting);

        assert!(
            h.connector
                .emit_to(first, TransportEvent::Closed { code: 1006, reason: String::new() })
        );
        h.pump();
        assert_eq!(h.machine.state(), ConnectionState::Connecting);
        assert!(!h.machine.is_reconnect_pending());
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_abnormal_close_schedules_retry() {
        let mut h = Harness::new(5);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let state = h.machine.state.clone();
        h.registry.on_closed(Arc::new(move || {
            seen_clone
                .lock()
                .unwrap()
                .push(ConnectionState::from_atomic(&state));
        }));

        h.machine.open();
        h.emit(TransportEvent::Opened);
        h.emit(TransportEvent::Closed {
            code: 1006,
            reason: String::new(),
        });

        assert_eq!(*seen.lock().unwrap(), vec![ConnectionState::ClosedAbnormal]);
        assert_eq!(h.machine.state(), ConnectionState::ReconnectScheduled);
        assert_eq!(h.machine.reconnect_attempt(), 1);
        assert_eq!(
            h.machine.reconnect.pending(),
            Some((1, Duration::from_millis(100)))
        );
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_normal_close_does_not_reconnect() {
        let mut h = Harness::new(5);
        h.machine.open();
        h.emit(TransportEvent::Opened);
        h.emit(TransportEvent::Closed {
            code: CLOSE_NORMAL,
            reason: "done".to_string(),
        });

        assert_eq!(h.machine.state(), ConnectionState::ClosedClean);
        assert!(!h.machine.is_reconnect_pending());
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_close_from_open_waits_for_confirmation() {
        let mut h = Harness::new(5);
        h.machine.open();
        h.emit(TransportEvent::Opened);

        h.machine.close();
        assert_eq!(h.machine.state(), ConnectionState::Closing);
        assert_eq!(
            h.connector.closes(),
            vec![(HandleId(1), CLOSE_NORMAL, CLIENT_CLOSE_REASON.to_string())]
        );

        // Server echoes an unexpected code, still a clean close
        h.emit(TransportEvent::Closed {
            code: 1001,
            reason: String::new(),
        });
        assert_eq!(h.machine.state(), ConnectionState::ClosedClean);
        assert!(!h.machine.is_reconnect_pending());
    }

    #[rstest]
    #[case(TransportEvent::Closed { code: CLOSE_NORMAL, reason: CLIENT_CLOSE_REASON.to_string() })]
    #[case(TransportEvent::Error("connection refused".to_string()))]
    #[tokio::test(start_paused = true)]
    async fn test_close_while_connecting_waits_for_transport(#[case] outcome: TransportEvent) {
        let mut h = Harness::new(5);
        let closed = Arc::new(AtomicU64::new(0));
        let closed_clone = closed.clone();
        h.registry.on_closed(Arc::new(move || {
            closed_clone.fetch_add(1, Ordering::SeqCst);
        }));

        h.machine.open();
        h.machine.close();
        assert_eq!(h.machine.state(), ConnectionState::Closing);
        assert_eq!(h.machine.current_handle(), Some(HandleId(1)));
        assert_eq!(
            h.connector.closes(),
            vec![(HandleId(1), CLOSE_NORMAL, CLIENT_CLOSE_REASON.to_string())]
        );

        h.emit(outcome);

        assert_eq!(h.machine.state(), ConnectionState::ClosedClean);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(!h.machine.is_reconnect_pending());
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_retry() {
        let mut h = Harness::new(5);
        h.machine.open();
        h.emit(TransportEvent::Error("reset".to_string()));
        assert!(h.machine.is_reconnect_pending());

        h.machine.close();
        assert!(!h.machine.is_reconnect_pending());
        assert_eq!(h.machine.state(), ConnectionState::ClosedClean);

        tokio::time::advance(Duration::from_secs(60)).await;
        crate::testing::settle().await;
        h.pump();
        assert_eq!(h.connector.connect_count(), 1);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_retry_superseded_by_client_command_is_ignored() {
        let mut h = Harness::new(5);
        h.machine.open();
        h.emit(TransportEvent::Error("reset".to_string()));

        tokio::time::advance(Duration::from_millis(100)).await;
        crate::testing::settle().await;

        // Client issued a command after the timer elapsed but before it was handled
        h.epoch.fetch_add(1, Ordering::SeqCst);
        h.pump();

        assert_eq!(h.connector.connect_count(), 1);
        assert_eq!(h.machine.state(), ConnectionState::ReconnectScheduled);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_construction_failure_takes_abnormal_path() {
        let mut h = Harness::new(5);
        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors_clone = errors.clone();
        h.registry.on_error(Arc::new(move |e: &ChannelError| {
            errors_clone.lock().unwrap().push(e.clone());
        }));

        h.connector.fail_next(1);
        h.machine.open();

        assert_eq!(h.machine.state(), ConnectionState::ReconnectScheduled);
        assert!(matches!(
            errors.lock().unwrap().as_slice(),
            [ChannelError::Connect(_)]
        ));

        tokio::time::advance(Duration::from_millis(100)).await;
        crate::testing::settle().await;
        h.pump();

        assert_eq!(h.machine.state(), ConnectionState::Connecting);
        assert_eq!(h.connector.connect_count(), 2);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reported_once() {
        let mut h = Harness::new(2);
        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors_clone = errors.clone();
        h.registry.on_error(Arc::new(move |e: &ChannelError| {
            errors_clone.lock().unwrap().push(e.clone());
        }));

        h.machine.open();
        for attempt in 1..=2u64 {
            h.emit(TransportEvent::Closed {
                code: 1006,
                reason: String::new(),
            });
            tokio::time::advance(Duration::from_millis(100 * attempt)).await;
            crate::testing::settle().await;
            h.pump();
            assert_eq!(h.machine.state(), ConnectionState::Connecting);
        }

        h.emit(TransportEvent::Closed {
            code: 1006,
            reason: String::new(),
        });

        assert_eq!(h.machine.state(), ConnectionState::ClosedAbnormal);
        assert!(!h.machine.is_reconnect_pending());
        assert_eq!(
            *errors.lock().unwrap(),
            vec![ChannelError::ReconnectExhausted { attempts: 2 }]
        );

        tokio::time::advance(Duration::from_secs(60)).await;
        crate::testing::settle().await;
        h.pump();
        assert_eq!(h.connector.connect_count(), 3);

        // Manual open starts a fresh session
        h.machine.open();
        assert_eq!(h.machine.reconnect_attempt(), 0);
        assert_eq!(h.connector.connect_count(), 4);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_send_gated_on_open() {
        let mut h = Harness::new(5);
        h.machine.send("early".to_string());
        h.machine.open();
        h.machine.send("connecting".to_string());
        assert!(h.connector.sent().is_empty());

        h.emit(TransportEvent::Opened);
        h.machine.send(r#"{"type":"ping"}"#.to_string());
        assert_eq!(
            h.connector.sent(),
            vec![(
                HandleId(1),
                TransportPayload::Text(r#"{"type":"ping"}"#.to_string())
            )]
        );
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_decode_failure_keeps_state() {
        let mut h = Harness::new(5);
        let count = Arc::new(AtomicU64::new(0));
        let count_clone = count.clone();
        h.registry.subscribe(
            "*",
            Arc::new(move |_: &TaskMessage| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        h.machine.open();
        h.emit(TransportEvent::Opened);
        h.emit(TransportEvent::Message(TransportPayload::Text(
            "not json".to_string(),
        )));
        h.emit(TransportEvent::Message(TransportPayload::Binary(
            br#"{"type":"custom","taskId":"abc","timestamp":"t"}"#.to_vec(),
        )));

        assert_eq!(h.machine.state(), ConnectionState::Open);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_shutdown_clears_registry() {
        let mut h = Harness::new(5);
        h.registry.on_closed(Arc::new(|| {}));
        h.machine.open();
        h.emit(TransportEvent::Opened);

        assert!(!h.machine.handle(ChannelEvent::Shutdown));

        assert!(h.registry.is_empty());
        assert_eq!(h.machine.state(), ConnectionState::ClosedClean);
        assert_eq!(h.machine.current_handle(), None);
    }
}
