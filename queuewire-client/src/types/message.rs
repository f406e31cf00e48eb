use queuewire_core::{ClientError, ClientResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::status::{lenient_code, ProgressUnit};
use super::EventId;

/// Control message that ends the logical push session.
pub const CLOSE_STREAM: &str = "close_stream";

/// A `log` record as sent by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default)]
    pub log: String,
    #[serde(default = "default_level")]
    pub level: String,
    /// The whole message, untouched
    #[serde(skip)]
    pub raw: Value,
}

fn default_level() -> String {
    "info".to_string()
}

/// The `output` object of `process_generating` / `process_completed`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProcessOutput {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub average_duration: Option<f64>,
}

impl ProcessOutput {
    /// Error text, if the server reported one.
    pub fn error_message(&self) -> Option<String> {
        match &self.error {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

/// Messages pushed by the server on the queue data stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum ServerMessage {
    SendData,
    SendHash,
    Heartbeat,
    Log(LogRecord),
    QueueFull {
        #[serde(default, deserialize_with = "lenient_code")]
        code: Option<i64>,
        #[serde(default)]
        success: Option<bool>,
    },
    UnexpectedError {
        #[serde(default)]
        message: Option<String>,
        #[serde(default, deserialize_with = "lenient_code")]
        code: Option<i64>,
        #[serde(default)]
        success: Option<bool>,
    },
    Estimation {
        #[serde(default)]
        queue_size: Option<u64>,
        #[serde(default)]
        rank: Option<u64>,
        #[serde(default)]
        rank_eta: Option<f64>,
        #[serde(default, deserialize_with = "lenient_code")]
        code: Option<i64>,
        #[serde(default)]
        success: Option<bool>,
    },
    Progress {
        #[serde(default)]
        progress_data: Option<Vec<ProgressUnit>>,
        #[serde(default, deserialize_with = "lenient_code")]
        code: Option<i64>,
        #[serde(default)]
        success: Option<bool>,
    },
    ProcessStarts {
        #[serde(default)]
        rank: Option<u64>,
        #[serde(default)]
        eta: Option<f64>,
        #[serde(default, deserialize_with = "lenient_code")]
        code: Option<i64>,
        #[serde(default)]
        success: Option<bool>,
    },
    ProcessGenerating {
        #[serde(default)]
        success: bool,
        #[serde(default)]
        output: ProcessOutput,
        #[serde(default)]
        progress_data: Option<Vec<ProgressUnit>>,
        #[serde(default)]
        average_duration: Option<f64>,
        #[serde(default, deserialize_with = "lenient_code")]
        code: Option<i64>,
    },
    ProcessCompleted {
        #[serde(default)]
        success: bool,
        #[serde(default)]
        output: ProcessOutput,
        #[serde(default)]
        progress_data: Option<Vec<ProgressUnit>>,
        #[serde(default, deserialize_with = "lenient_code")]
        code: Option<i64>,
    },
    ServerStopped,
    CloseStream,
    /// Any kind this client does not know yet
    #[serde(skip)]
    Unknown { kind: String },
}

const KNOWN_KINDS: &[&str] = &[
    "send_data",
    "send_hash",
    "heartbeat",
    "log",
    "queue_full",
    "unexpected_error",
    "estimation",
    "progress",
    "process_starts",
    "process_generating",
    "process_completed",
    "server_stopped",
    CLOSE_STREAM,
];

impl ServerMessage {
    /// Classify a raw JSON message.
    ///
    /// Unrecognised `msg` values become [`ServerMessage::Unknown`]; a missing
    /// `msg` or a known kind with malformed fields is a protocol error.
    pub fn parse(raw: &Value) -> ClientResult<Self> {
        let kind = message_kind(raw)
            .ok_or_else(|| ClientError::protocol(format!("message without `msg`: {}", raw)))?;

        if !KNOWN_KINDS.contains(&kind) {
            return Ok(ServerMessage::Unknown {
                kind: kind.to_string(),
            });
        }

        let mut message: ServerMessage = serde_json::from_value(raw.clone())
            .map_err(|e| ClientError::protocol(format!("malformed `{}` message: {}", kind, e)))?;
        if let ServerMessage::Log(record) = &mut message {
            record.raw = raw.clone();
        }
        Ok(message)
    }

    pub fn kind(&self) -> &str {
        match self {
            ServerMessage::SendData => "send_data",
            ServerMessage::SendHash => "send_hash",
            ServerMessage::Heartbeat => "heartbeat",
            ServerMessage::Log(_) => "log",
            ServerMessage::QueueFull { .. } => "queue_full",
            ServerMessage::UnexpectedError { .. } => "unexpected_error",
            ServerMessage::Estimation { .. } => "estimation",
            ServerMessage::Progress { .. } => "progress",
            ServerMessage::ProcessStarts { .. } => "process_starts",
            ServerMessage::ProcessGenerating { .. } => "process_generating",
            ServerMessage::ProcessCompleted { .. } => "process_completed",
            ServerMessage::ServerStopped => "server_stopped",
            ServerMessage::CloseStream => CLOSE_STREAM,
            ServerMessage::Unknown { kind } => kind,
        }
    }
}

/// The `msg` field of a raw message.
pub fn message_kind(raw: &Value) -> Option<&str> {
    raw.get("msg").and_then(Value::as_str)
}

/// The `event_id` field of a raw message.
pub fn event_id_of(raw: &Value) -> Option<EventId> {
    raw.get("event_id")
        .and_then(Value::as_str)
        .map(EventId::from)
}
