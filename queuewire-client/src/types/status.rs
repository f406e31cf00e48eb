use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Where a job is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Generating,
    Complete,
    Error,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Generating => "generating",
            Stage::Complete => "complete",
            Stage::Error => "error",
        }
    }
}

/// One progress tracker reported by the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressUnit {
    #[serde(default)]
    pub index: Option<u64>,
    #[serde(default)]
    pub length: Option<u64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub desc: Option<String>,
}

/// Immutable status snapshot attached to a client event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub queue: bool,
    pub stage: Stage,
    pub code: Option<i64>,
    pub size: Option<u64>,
    pub position: Option<u64>,
    pub eta: Option<f64>,
    pub progress_data: Option<Vec<ProgressUnit>>,
    pub message: Option<String>,
    pub success: Option<bool>,
    pub time: DateTime<Utc>,
}

impl JobStatus {
    /// A queue-mediated snapshot at `stage`, stamped now.
    pub fn new(stage: Stage) -> Self {
        Self {
            queue: true,
            stage,
            code: None,
            size: None,
            position: None,
            eta: None,
            progress_data: None,
            message: None,
            success: None,
            time: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_outcome(mut self, code: Option<i64>, success: Option<bool>) -> Self {
        self.code = code;
        self.success = success;
        self
    }

    /// Mark a snapshot of a call answered without the queue.
    pub fn outside_queue(mut self) -> Self {
        self.queue = false;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

/// Accept `500`, `"500"` or anything else as `None`.
pub(crate) fn lenient_code<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}
