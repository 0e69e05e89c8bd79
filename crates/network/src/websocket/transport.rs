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

//! Transport boundary between the channel state machine and a physical socket.
//!
//! The state machine never touches a socket directly. It asks a [`TransportConnector`]
//! for a [`Transport`] and receives that transport's events through a [`TransportSink`]
//! tagged with the handle id it assigned. The production connector drives a
//! tokio-tungstenite WebSocket; tests inject an in-memory fake.

use std::{fmt::Debug, time::Duration};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    time::{Instant, Interval},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use url::Url;

use super::types::{
    CLOSE_ABNORMAL, CLOSE_NO_STATUS, ChannelEvent, HandleId, TransportEvent, TransportPayload,
};
use crate::{
    error::{ChannelError, ChannelResult},
    tls::install_cryptographic_provider,
};

/// A live (or connecting) transport handle.
///
/// Both operations are non-blocking. Dropping the transport releases the socket.
pub trait Transport: Send + Debug {
    /// Queues a frame for sending.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport can no longer accept frames.
    fn send(&mut self, payload: TransportPayload) -> ChannelResult<()>;

    /// Requests a close handshake with the given code and reason.
    fn close(&mut self, code: u16, reason: &str);
}

/// Creates transports for a channel URL.
pub trait TransportConnector: Send + Sync + Debug {
    /// Starts connecting to `url`, reporting every event of the new transport to `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be constructed at all. Failures after
    /// construction are reported through `sink` instead.
    fn connect(&self, url: &Url, sink: TransportSink) -> ChannelResult<Box<dyn Transport>>;
}

/// Event sink handed to a transport, tagging its events with the owning handle id.
#[derive(Clone, Debug)]
pub struct TransportSink {
    handle: HandleId,
    tx: UnboundedSender<ChannelEvent>,
}

impl TransportSink {
    #[must_use]
    pub const fn new(handle: HandleId, tx: UnboundedSender<ChannelEvent>) -> Self {
        Self { handle, tx }
    }

    #[must_use]
    pub const fn handle(&self) -> HandleId {
        self.handle
    }

    /// Forwards `event` to the channel controller.
    ///
    /// Returns false if the controller has stopped.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(ChannelEvent::Transport {
                handle: self.handle,
                event,
            })
            .is_ok()
    }
}

#[derive(Debug)]
enum WriterCommand {
    Send(Message),
    Close { code: u16, reason: String },
}

/// Connector producing tokio-tungstenite WebSocket transports.
#[derive(Clone, Debug, Default)]
pub struct TungsteniteConnector {
    heartbeat: Option<Duration>,
}

impl TungsteniteConnector {
    /// Creates a new connector, optionally pinging the server every `heartbeat`.
    #[must_use]
    pub const fn new(heartbeat: Option<Duration>) -> Self {
        Self { heartbeat }
    }
}

impl TransportConnector for TungsteniteConnector {
    fn connect(&self, url: &Url, sink: TransportSink) -> ChannelResult<Box<dyn Transport>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ChannelError::Runtime(e.to_string()))?;

        match url.scheme() {
            "ws" => {}
            "wss" => install_cryptographic_provider(),
            other => {
                return Err(ChannelError::InvalidUrl(format!(
                    "unsupported scheme '{other}'"
                )));
            }
        }

        let (writer_tx, writer_rx) = unbounded_channel();
        runtime.spawn(run_connection(
            url.clone(),
            sink,
            writer_rx,
            self.heartbeat,
        ));

        Ok(Box::new(TungsteniteTransport { writer_tx }))
    }
}

/// Handle to a connection task spawned by [`TungsteniteConnector`].
#[derive(Debug)]
struct TungsteniteTransport {
    writer_tx: UnboundedSender<WriterCommand>,
}

impl Transport for TungsteniteTransport {
    fn send(&mut self, payload: TransportPayload) -> ChannelResult<()> {
        let message = match payload {
            TransportPayload::Text(text) => Message::Text(text.into()),
            TransportPayload::Binary(data) => Message::Binary(data.into()),
        };

        self.writer_tx
            .send(WriterCommand::Send(message))
            .map_err(|_| ChannelError::Transport("connection task has stopped".to_string()))
    }

    fn close(&mut self, code: u16, reason: &str) {
        let command = WriterCommand::Close {
            code,
            reason: reason.to_string(),
        };
        if self.writer_tx.send(command).is_err() {
            tracing::debug!("Close requested after connection task stopped");
        }
    }
}

async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Drives one WebSocket connection until it closes, fails, or its handle is dropped.
async fn run_connection(
    url: Url,
    sink: TransportSink,
    mut commands: UnboundedReceiver<WriterCommand>,
    heartbeat: Option<Duration>,
) {
    let handle = sink.handle();
    tracing::debug!("Started task 'connection' ({handle})");

    let connect = connect_async(url.as_str());
    tokio::pin!(connect);

    let stream = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok((stream, _response)) => break stream,
                Err(e) => {
                    tracing::debug!("Connection to {url} failed: {e}");
                    sink.emit(TransportEvent::Error(e.to_string()));
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(WriterCommand::Send(_)) => {
                    tracing::warn!("Dropping frame sent before the connection opened");
                }
                Some(WriterCommand::Close { code, reason }) => {
                    tracing::debug!("Abandoned connection attempt ({handle})");
                    sink.emit(TransportEvent::Closed { code, reason });
                    return;
                }
                None => {
                    tracing::debug!("Abandoned connection attempt ({handle}): released");
                    return;
                }
            },
        }
    };

    tracing::debug!("Connected to {url} ({handle})");
    if !sink.emit(TransportEvent::Opened) {
        return;
    }

    let (mut writer, mut reader) = stream.split();
    let mut heartbeat = heartbeat
        .filter(|period| !period.is_zero())
        .map(|period| tokio::time::interval_at(Instant::now() + period, period));

    let (code, reason) = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(WriterCommand::Send(message)) => {
                    if let Err(e) = writer.send(message).await {
                        tracing::error!("Failed to send message: {e}");
                        sink.emit(TransportEvent::Error(e.to_string()));
                        return;
                    }
                }
                Some(WriterCommand::Close { code, reason }) => {
                    tracing::debug!("Sending close frame ({code})");
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    if let Err(e) = writer.send(Message::Close(Some(frame))).await {
                        tracing::debug!("Failed to send close frame: {e}");
                        sink.emit(TransportEvent::Error(e.to_string()));
                        return;
                    }
                    // Keep reading until the server confirms the close
                }
                None => {
                    // Handle dropped by its owner
                    _ = writer.close().await;
                    tracing::debug!("Completed task 'connection' ({handle}): released");
                    return;
                }
            },
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    tracing::trace!("Received message: {text}");
                    sink.emit(TransportEvent::Message(TransportPayload::Text(
                        text.as_str().to_owned(),
                    )));
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::trace!("Received message <binary> {} bytes", data.len());
                    sink.emit(TransportEvent::Message(TransportPayload::Binary(data.to_vec())));
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame.map_or_else(
                        || (CLOSE_NO_STATUS, String::new()),
                        |frame| (u16::from(frame.code), frame.reason.as_str().to_owned()),
                    );
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => {
                    tracing::debug!("Received error: {e}");
                    sink.emit(TransportEvent::Error(e.to_string()));
                    return;
                }
                // Stream ended without a close frame
                None => break (CLOSE_ABNORMAL, String::new()),
            },
            () = next_heartbeat(&mut heartbeat) => {
                tracing::trace!("Sending heartbeat ping");
                if let Err(e) = writer.send(Message::Ping(Bytes::new())).await {
                    tracing::error!("Failed to send heartbeat: {e}");
                    sink.emit(TransportEvent::Error(e.to_string()));
                    return;
                }
            }
        }
    };

    _ = writer.close().await;
    tracing::debug!("Completed task 'connection' ({handle}): closed with {code}");
    sink.emit(TransportEvent::Closed { code, reason });
}
