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

//! In-memory transport for exercising the channel without a network.
//!
//! [`FakeConnector`] records every transport it creates together with the event sink it
//! was given, so a test can play the server side by emitting transport events and can
//! inspect what the channel sent or closed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use url::Url;

use crate::{
    error::{ChannelError, ChannelResult},
    websocket::{
        transport::{Transport, TransportConnector, TransportSink},
        types::{HandleId, TransportEvent, TransportPayload},
    },
};

/// Yields to the scheduler enough times for spawned tasks to drain their queues.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Default)]
struct FakeState {
    urls: Vec<Url>,
    sinks: Vec<TransportSink>,
    sent: Vec<(HandleId, TransportPayload)>,
    closes: Vec<(HandleId, u16, String)>,
    fail_next: u32,
}

/// Connector handing out [`FakeTransport`]s.
#[derive(Clone, Debug, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `count` connection attempts fail synchronously.
    pub fn fail_next(&self, count: u32) {
        self.lock().fail_next = count;
    }

    /// Returns the number of connection attempts, failed ones included.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.lock().urls.len()
    }

    /// Returns the URLs of all connection attempts.
    #[must_use]
    pub fn urls(&self) -> Vec<Url> {
        self.lock().urls.clone()
    }

    /// Returns the handle of the most recently created transport.
    #[must_use]
    pub fn last_handle(&self) -> Option<HandleId> {
        self.lock().sinks.last().map(TransportSink::handle)
    }

    /// Returns every payload sent through any transport, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<(HandleId, TransportPayload)> {
        self.lock().sent.clone()
    }

    /// Returns every close request as `(handle, code, reason)`, oldest first.
    #[must_use]
    pub fn closes(&self) -> Vec<(HandleId, u16, String)> {
        self.lock().closes.clone()
    }

    /// Emits `event` from the most recently created transport.
    ///
    /// Returns false if no transport exists or the channel controller has stopped.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let sink = self.lock().sinks.last().cloned();
        sink.is_some_and(|sink| sink.emit(event))
    }

    /// Emits `event` from the transport `handle`, even if it has been detached.
    pub fn emit_to(&self, handle: HandleId, event: TransportEvent) -> bool {
        let sink = self
            .lock()
            .sinks
            .iter()
            .find(|sink| sink.handle() == handle)
            .cloned();
        sink.is_some_and(|sink| sink.emit(event))
    }

    /// Completes the handshake of the latest transport.
    pub fn open(&self) -> bool {
        self.emit(TransportEvent::Opened)
    }

    /// Delivers a text frame on the latest transport.
    pub fn message(&self, text: impl Into<String>) -> bool {
        self.emit(TransportEvent::Message(TransportPayload::Text(text.into())))
    }

    /// Ends the latest transport with the given close code.
    pub fn close_with(&self, code: u16) -> bool {
        self.emit(TransportEvent::Closed {
            code,
            reason: String::new(),
        })
    }

    /// Fails the latest transport.
    pub fn error(&self, message: impl Into<String>) -> bool {
        self.emit(TransportEvent::Error(message.into()))
    }
}

impl TransportConnector for FakeConnector {
    fn connect(&self, url: &Url, sink: TransportSink) -> ChannelResult<Box<dyn Transport>> {
        let mut state = self.lock();
        state.urls.push(url.clone());

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(ChannelError::Connect("simulated connect failure".to_string()));
        }

        let handle = sink.handle();
        state.sinks.push(sink);

        Ok(Box::new(FakeTransport {
            handle,
            state: self.state.clone(),
        }))
    }
}

/// Transport recording its traffic into the owning [`FakeConnector`].
#[derive(Debug)]
pub struct FakeTransport {
    handle: HandleId,
    state: Arc<Mutex<FakeState>>,
}

impl Transport for FakeTransport {
    fn send(&mut self, payload: TransportPayload) -> ChannelResult<()> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .push((self.handle, payload));
        Ok(())
    }

    fn close(&mut self, code: u16, reason: &str) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closes
            .push((self.handle, code, reason.to_string()));
    }
}
