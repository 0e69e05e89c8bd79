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

//! Wire messages streamed by the task progress service.
//!
//! Every frame is a JSON object discriminated by its `type` field:
//!
//! ```json
//! {"type":"progress","taskId":"abc","timestamp":"2024-01-01T00:00:00Z",
//!  "data":{"progress":50,"message":"m","filesAnalyzed":5,"totalFiles":10}}
//! ```
//!
//! Known types decode into typed payloads. A frame whose `type` is not recognized still
//! decodes (as [`TaskMessage::Unknown`]) so it can reach wildcard subscribers.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::{ChannelError, ChannelResult};

/// The `type` tags understood by the channel.
#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    Hash,
    PartialEq,
    Eq,
    AsRefStr,
    EnumIter,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Progress,
    Log,
    Vulnerability,
    Complete,
    Error,
}

/// Common envelope around every typed payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    /// The task this stream belongs to. Informational only.
    pub task_id: String,
    /// ISO-8601 timestamp set by the service.
    pub timestamp: String,
    pub data: T,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressData {
    /// Completion percentage in the range 0–100.
    pub progress: f64,
    pub message: String,
    pub files_analyzed: u64,
    pub total_files: u64,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogData {
    pub level: LogLevel,
    pub message: String,
    pub source: String,
}

/// A finding reported while the task is still running. The finding itself is passed
/// through as raw JSON; its schema belongs to the analysis service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityData {
    pub vulnerability: Value,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteData {
    pub status: TaskStatus,
    pub vulnerabilities_found: u64,
    pub duration_seconds: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub error: String,
    pub message: String,
}

/// A frame with an unrecognized `type` tag, kept as raw JSON.
#[derive(Clone, Debug, PartialEq)]
pub struct UnknownMessage {
    /// The unrecognized `type` value.
    pub kind: String,
    /// The complete frame.
    pub raw: Value,
}

/// One decoded frame of the task progress protocol.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskMessage {
    Progress(Envelope<ProgressData>),
    Log(Envelope<LogData>),
    Vulnerability(Envelope<VulnerabilityData>),
    Complete(Envelope<CompleteData>),
    Error(Envelope<ErrorData>),
    Unknown(UnknownMessage),
}

impl TaskMessage {
    /// Decodes a UTF-8 JSON frame.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Decode`] if the frame is not a JSON object with a string
    /// `type` field, or if a known `type` carries a payload of the wrong shape.
    pub fn decode(text: &str) -> ChannelResult<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ChannelError::Decode(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ChannelError::Decode("missing string field `type`".to_string()))?;

        let Ok(known) = kind.parse::<MessageKind>() else {
            return Ok(Self::Unknown(UnknownMessage {
                kind: kind.to_string(),
                raw: value,
            }));
        };

        let message = match known {
            MessageKind::Progress => Self::Progress(decode_envelope(value, known)?),
            MessageKind::Log => Self::Log(decode_envelope(value, known)?),
            MessageKind::Vulnerability => Self::Vulnerability(decode_envelope(value, known)?),
            MessageKind::Complete => Self::Complete(decode_envelope(value, known)?),
            MessageKind::Error => Self::Error(decode_envelope(value, known)?),
        };
        Ok(message)
    }

    /// Returns the known kind of this message, or `None` for unknown frames.
    #[must_use]
    pub const fn kind(&self) -> Option<MessageKind> {
        match self {
            Self::Progress(_) => Some(MessageKind::Progress),
            Self::Log(_) => Some(MessageKind::Log),
            Self::Vulnerability(_) => Some(MessageKind::Vulnerability),
            Self::Complete(_) => Some(MessageKind::Complete),
            Self::Error(_) => Some(MessageKind::Error),
            Self::Unknown(_) => None,
        }
    }

    /// Returns the raw `type` tag of this message.
    #[must_use]
    pub fn type_tag(&self) -> &str {
        match self {
            Self::Unknown(unknown) => &unknown.kind,
            _ => self.kind().map_or("", <&'static str>::from),
        }
    }

    /// Returns the task id carried by the frame, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::Progress(env) => Some(&env.task_id),
            Self::Log(env) => Some(&env.task_id),
            Self::Vulnerability(env) => Some(&env.task_id),
            Self::Complete(env) => Some(&env.task_id),
            Self::Error(env) => Some(&env.task_id),
            Self::Unknown(unknown) => unknown.raw.get("taskId").and_then(Value::as_str),
        }
    }

    /// Returns the timestamp carried by the frame, if any.
    #[must_use]
    pub fn timestamp(&self) -> Option<&str> {
        match self {
            Self::Progress(env) => Some(&env.timestamp),
            Self::Log(env) => Some(&env.timestamp),
            Self::Vulnerability(env) => Some(&env.timestamp),
            Self::Complete(env) => Some(&env.timestamp),
            Self::Error(env) => Some(&env.timestamp),
            Self::Unknown(unknown) => unknown.raw.get("timestamp").and_then(Value::as_str),
        }
    }
}

fn decode_envelope<T: DeserializeOwned>(
    value: Value,
    kind: MessageKind,
) -> ChannelResult<Envelope<T>> {
    serde_json::from_value(value)
        .map_err(|e| ChannelError::Decode(format!("invalid `{kind}` message: {e}")))
}
