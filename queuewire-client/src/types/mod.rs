pub mod event;
pub mod ids;
pub mod message;
pub mod status;

pub use event::{ClientEvent, EventKind};
pub use ids::{EventId, SessionHash};
pub use message::{event_id_of, message_kind, LogRecord, ProcessOutput, ServerMessage, CLOSE_STREAM};
pub use status::{JobStatus, ProgressUnit, Stage};
