use queuewire_core::Payload;

use super::message::LogRecord;
use super::status::JobStatus;

/// Kind tag of a [`ClientEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Data,
    Hash,
    Heartbeat,
    Log,
    Update,
    Generating,
    Complete,
    UnexpectedError,
    None,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Data => "data",
            EventKind::Hash => "hash",
            EventKind::Heartbeat => "heartbeat",
            EventKind::Log => "log",
            EventKind::Update => "update",
            EventKind::Generating => "generating",
            EventKind::Complete => "complete",
            EventKind::UnexpectedError => "unexpected_error",
            EventKind::None => "none",
        }
    }
}

/// What a job stream yields to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Server asked for the request data
    Data,
    /// Server asked for the session hash
    Hash,
    Heartbeat,
    Log(LogRecord),
    Update(JobStatus),
    /// Intermediate output; `output` is `None` when the step failed
    Generating {
        status: JobStatus,
        output: Option<Payload>,
    },
    Complete {
        status: JobStatus,
        output: Payload,
    },
    UnexpectedError(JobStatus),
    /// Message of a kind this client does not understand
    None(JobStatus),
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Data => EventKind::Data,
            Self::Hash => EventKind::Hash,
            Self::Heartbeat => EventKind::Heartbeat,
            Self::Log(_) => EventKind::Log,
            Self::Update(_) => EventKind::Update,
            Self::Generating { .. } => EventKind::Generating,
            Self::Complete { .. } => EventKind::Complete,
            Self::UnexpectedError(_) => EventKind::UnexpectedError,
            Self::None(_) => EventKind::None,
        }
    }

    /// Status snapshot, for kinds that carry one
    pub fn status(&self) -> Option<&JobStatus> {
        match self {
            Self::Update(status)
            | Self::UnexpectedError(status)
            | Self::None(status)
            | Self::Generating { status, .. }
            | Self::Complete { status, .. } => Some(status),
            Self::Data | Self::Hash | Self::Heartbeat | Self::Log(_) => None,
        }
    }

    /// Result payload, for kinds that carry one
    pub fn output(&self) -> Option<&Payload> {
        match self {
            Self::Generating { output, .. } => output.as_ref(),
            Self::Complete { output, .. } => Some(output),
            _ => None,
        }
    }

    /// True when nothing further will follow for this job.
    ///
    /// `None` events carry an error stage but never end the job.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::None(_) => false,
            other => other.status().is_some_and(JobStatus::is_terminal),
        }
    }
}
