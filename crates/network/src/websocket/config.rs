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

//! Configuration for task progress channel connections.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    backoff::LinearBackoff,
    error::{ChannelError, ChannelResult},
};

/// Default host used when none is configured.
pub const DEFAULT_HOST: &str = "localhost:8080";

/// Default ceiling on consecutive automatic reconnection attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default base reconnection delay (milliseconds).
pub const DEFAULT_BASE_RECONNECT_DELAY_MS: u64 = 3_000;

/// Configuration for a task progress channel.
///
/// Accepts both `snake_case` and the `camelCase` keys used by the web front-end, so
/// the same file can be shared between the two:
///
/// ```toml
/// host = "verifier.example.com"
/// secure = true
/// maxReconnectAttempts = 8
/// baseReconnectDelayMs = 1000
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Host (and optional port) of the progress service.
    ///
    /// May carry an `http://`, `https://`, `ws://` or `wss://` prefix, in which case the
    /// channel scheme is derived from it and `secure` is ignored.
    #[serde(alias = "wsHost")]
    pub host: String,
    /// Use `wss://` instead of `ws://` for prefix-less hosts.
    pub secure: bool,
    /// Ceiling on consecutive automatic reconnection attempts.
    #[serde(alias = "maxReconnectAttempts")]
    pub max_reconnect_attempts: u32,
    /// Base reconnection delay (milliseconds). Attempt `n` waits `n` times this.
    #[serde(alias = "baseReconnectDelayMs", alias = "reconnectDelay")]
    pub base_reconnect_delay_ms: u64,
    /// Optional interval (seconds) between keep-alive pings.
    #[serde(alias = "heartbeatSecs")]
    pub heartbeat_secs: Option<u64>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            secure: false,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_reconnect_delay_ms: DEFAULT_BASE_RECONNECT_DELAY_MS,
            heartbeat_secs: None,
        }
    }
}

impl ChannelConfig {
    /// Creates a new config for the given host with default reconnection settings.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub const fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    #[must_use]
    pub const fn with_base_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.base_reconnect_delay_ms = delay_ms;
        self
    }

    #[must_use]
    pub const fn with_heartbeat_secs(mut self, secs: Option<u64>) -> Self {
        self.heartbeat_secs = secs;
        self
    }

    /// Returns the channel scheme and the bare host.
    ///
    /// `https://` and `wss://` prefixes select `wss`, `http://` and `ws://` select `ws`,
    /// and a bare host falls back to the `secure` flag.
    #[must_use]
    pub fn scheme_and_host(&self) -> (&'static str, &str) {
        let host = self.host.trim();
        let prefixes = [
            ("https://", "wss"),
            ("wss://", "wss"),
            ("http://", "ws"),
            ("ws://", "ws"),
        ];

        for (prefix, scheme) in prefixes {
            if let Some(rest) = host.strip_prefix(prefix) {
                return (scheme, rest.trim_end_matches('/'));
            }
        }

        let scheme = if self.secure { "wss" } else { "ws" };
        (scheme, host.trim_end_matches('/'))
    }

    /// Returns the channel scheme (`ws` or `wss`).
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        self.scheme_and_host().0
    }

    /// Builds the channel URL `{scheme}://{host}/ws/tasks/{task_id}/progress`.
    ///
    /// The task id is percent-encoded as a single path segment.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidUrl`] if the host does not form a valid URL or
    /// the task id is empty.
    pub fn channel_url(&self, task_id: &str) -> ChannelResult<Url> {
        if task_id.is_empty() {
            return Err(ChannelError::InvalidUrl("empty task id".to_string()));
        }

        let (scheme, host) = self.scheme_and_host();
        if host.is_empty() {
            return Err(ChannelError::InvalidUrl("empty host".to_string()));
        }

        let mut url = Url::parse(&format!("{scheme}://{host}"))?;
        let url_str = url.to_string();
        url.path_segments_mut()
            .map_err(|()| ChannelError::InvalidUrl(format!("cannot be a base: {url_str}")))?
            .clear()
            .extend(["ws", "tasks", task_id, "progress"]);

        Ok(url)
    }

    /// Returns the base reconnection delay.
    #[must_use]
    pub const fn base_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.base_reconnect_delay_ms)
    }

    /// Returns the heartbeat interval, if configured and non-zero.
    #[must_use]
    pub fn heartbeat(&self) -> Option<Duration> {
        self.heartbeat_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Returns a fresh reconnection backoff policy for this config.
    #[must_use]
    pub const fn backoff(&self) -> LinearBackoff {
        LinearBackoff::new(self.base_reconnect_delay(), self.max_reconnect_attempts)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.base_reconnect_delay(), Duration::from_secs(3));
        assert_eq!(config.heartbeat(), None);
    }

    #[rstest]
    #[case("localhost:8080", false, "ws://localhost:8080/ws/tasks/abc/progress")]
    #[case("localhost:8080", true, "wss://localhost:8080/ws/tasks/abc/progress")]
    #[case("https://verifier.io", false, "wss://verifier.io/ws/tasks/abc/progress")]
    #[case("http://verifier.io/", true, "ws://verifier.io/ws/tasks/abc/progress")]
    #[case("wss://verifier.io:9443", false, "wss://verifier.io:9443/ws/tasks/abc/progress")]
    #[case("ws://127.0.0.1:1", true, "ws://127.0.0.1:1/ws/tasks/abc/progress")]
    fn test_channel_url(#[case] host: &str, #[case] secure: bool, #[case] expected: &str) {
        let config = ChannelConfig::new(host).with_secure(secure);
        assert_eq!(config.channel_url("abc").unwrap().as_str(), expected);
    }

    #[rstest]
    fn test_task_id_is_percent_encoded() {
        let config = ChannelConfig::new("localhost:8080");
        let url = config.channel_url("a b/c").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8080/ws/tasks/a%20b%2Fc/progress"
        );
    }

    #[rstest]
    #[case("", "abc")]
    #[case("localhost:8080", "")]
    #[case("https://", "abc")]
    fn test_invalid_channel_url(#[case] host: &str, #[case] task_id: &str) {
        let config = ChannelConfig::new(host);
        assert!(matches!(
            config.channel_url(task_id),
            Err(ChannelError::InvalidUrl(_))
        ));
    }

    #[rstest]
    fn test_deserialize_camel_case_aliases() {
        let json = r#"{"host":"h:1","maxReconnectAttempts":2,"baseReconnectDelayMs":10}"#;
        let config: ChannelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.host, "h:1");
        assert_eq!(config.max_reconnect_attempts, 2);
        assert_eq!(config.base_reconnect_delay_ms, 10);
        assert!(!config.secure);
    }

    #[rstest]
    fn test_zero_heartbeat_is_disabled() {
        let config = ChannelConfig::default().with_heartbeat_secs(Some(0));
        assert_eq!(config.heartbeat(), None);
    }

    #[rstest]
    fn test_backoff_uses_config() {
        let config = ChannelConfig::default()
            .with_base_reconnect_delay_ms(100)
            .with_max_reconnect_attempts(2);
        let backoff = config.backoff();
        assert_eq!(backoff.delay_base(), Duration::from_millis(100));
        assert_eq!(backoff.max_attempts(), 2);
    }
}
