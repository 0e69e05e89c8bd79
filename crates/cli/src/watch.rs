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

use std::future::Future;

use cverifier_network::websocket::{
    LogLevel, MessageKind, TaskChannelClient, TaskMessage, TaskStatus, WILDCARD,
};
use tokio::sync::mpsc::unbounded_channel;

use crate::{config::resolve_channel_config, opt::WatchOpt};

/// How a watch ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The task reported a `complete` message.
    Completed(TaskStatus),
    /// Automatic reconnection gave up.
    Exhausted,
    /// The watch was interrupted (Ctrl-C).
    Interrupted,
}

impl WatchOutcome {
    /// Returns the process exit status for this outcome.
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::Completed(_) => 0,
            Self::Exhausted => 2,
            Self::Interrupted => 130,
        }
    }
}

/// Runs the `watch` command until the task completes, reconnection is exhausted, or
/// Ctrl-C is pressed.
///
/// # Errors
///
/// Returns an error if the configuration cannot be resolved or the client cannot be
/// created.
pub async fn run_watch(opt: WatchOpt) -> anyhow::Result<WatchOutcome> {
    let config = resolve_channel_config(&opt)?;
    let client = TaskChannelClient::new(&opt.task_id, &config)?;
    tracing::info!("Watching task {} at {}", opt.task_id, client.url());

    Ok(watch(client, shutdown_signal()).await)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

/// Connects `client` and logs every message until an outcome is reached or
/// `interrupt` resolves. The client is disposed before returning.
pub async fn watch(client: TaskChannelClient, interrupt: impl Future<Output = ()>) -> WatchOutcome {
    let (outcome_tx, mut outcome_rx) = unbounded_channel();

    let _log = client.subscribe(WILDCARD, log_message);

    let tx = outcome_tx.clone();
    let _complete = client.subscribe(MessageKind::Complete, move |message: &TaskMessage| {
        if let TaskMessage::Complete(env) = message {
            _ = tx.send(WatchOutcome::Completed(env.data.status));
        }
    });

    let _open = client.on_open(|| tracing::info!("Channel open"));
    let _close = client.on_close(|| tracing::info!("Channel closed"));
    let _error = client.on_error(move |e| {
        tracing::warn!("{e}");
        if e.is_terminal() {
            _ = outcome_tx.send(WatchOutcome::Exhausted);
        }
    });

    client.connect();

    let outcome = tokio::select! {
        Some(outcome) = outcome_rx.recv() => outcome,
        () = interrupt => WatchOutcome::Interrupted,
    };

    tracing::info!("Watch finished: {outcome:?}");
    client.dispose().await;
    outcome
}

fn log_message(message: &TaskMessage) {
    match message {
        TaskMessage::Progress(env) => {
            let data = &env.data;
            tracing::info!(
                "[{:>5.1}%] {} ({}/{} files)",
                data.progress,
                data.message,
                data.files_analyzed,
                data.total_files
            );
        }
        TaskMessage::Log(env) => {
            let data = &env.data;
            match data.level {
                LogLevel::Debug => tracing::debug!("[{}] {}", data.source, data.message),
                LogLevel::Info => tracing::info!("[{}] {}", data.source, data.message),
                LogLevel::Warn => tracing::warn!("[{}] {}", data.source, data.message),
                LogLevel::Error => tracing::error!("[{}] {}", data.source, data.message),
            }
        }
        TaskMessage::Vulnerability(env) => {
            tracing::warn!("Vulnerability found: {}", env.data.vulnerability);
        }
        TaskMessage::Complete(env) => {
            let data = &env.data;
            tracing::info!(
                "Task {}: {} vulnerabilities found in {:.1}s",
                data.status,
                data.vulnerabilities_found,
                data.duration_seconds
            );
        }
        TaskMessage::Error(env) => {
            tracing::error!("Task error {}: {}", env.data.error, env.data.message);
        }
        TaskMessage::Unknown(unknown) => {
            tracing::debug!("Unhandled message type '{}': {}", unknown.kind, unknown.raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cverifier_network::{
        testing::{FakeConnector, settle},
        websocket::ChannelConfig,
    };
    use rstest::rstest;

    use super::*;

    const COMPLETE: &str = r#"{"type":"complete","taskId":"abc","timestamp":"2024-01-01T00:00:00Z","data":{"status":"failed","vulnerabilitiesFound":3,"durationSeconds":12.5}}"#;

    fn client(connector: &Arc<FakeConnector>, max_attempts: u32) -> TaskChannelClient {
        let config = ChannelConfig::new("localhost:8080").with_max_reconnect_attempts(max_attempts);
        TaskChannelClient::with_connector("abc", &config, connector.clone()).unwrap()
    }

    #[rstest]
    #[tokio::test]
    async fn test_watch_completes_on_complete_message() {
        let connector = Arc::new(FakeConnector::new());
        let watch = tokio::spawn(watch(client(&connector, 5), std::future::pending()));
        settle().await;

        assert!(connector.open());
        assert!(connector.message(COMPLETE));

        let outcome = watch.await.unwrap();
        assert_eq!(outcome, WatchOutcome::Completed(TaskStatus::Failed));
        assert_eq!(outcome.exit_code(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_watch_reports_exhaustion() {
        let connector = Arc::new(FakeConnector::new());
        let watch = tokio::spawn(watch(client(&connector, 0), std::future::pending()));
        settle().await;

        assert!(connector.close_with(1006));

        let outcome = watch.await.unwrap();
        assert_eq!(outcome, WatchOutcome::Exhausted);
        assert_eq!(outcome.exit_code(), 2);
    }

    #[rstest]
    #[tokio::test]
    async fn test_watch_interrupted_disposes_client() {
        let connector = Arc::new(FakeConnector::new());

        let outcome = watch(client(&connector, 5), std::future::ready(())).await;
        settle().await;

        assert_eq!(outcome, WatchOutcome::Interrupted);
        assert!(!connector.open());
    }
}
