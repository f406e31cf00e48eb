//! # Stream protocol handler
//!
//! One [`ProtocolHandler`] per job turns raw queue messages into
//! [`ClientEvent`]s and keeps the job's stage:
//!
//! ```text
//! pending ──process_generating──▶ generating ──process_starts──▶ pending
//!    │                                 │
//!    └──────── process_completed ──────┴──▶ complete | error
//! ```
//!
//! `heartbeat`, `log`, `estimation` and `progress` never move the stage.
//! Once a terminal snapshot has been emitted every further message is logged
//! and dropped.
//!
//! On diff-capable protocol versions the first `process_generating` output is
//! kept as an accumulator; each later one carries an edit list per output,
//! applied with [`apply_diff`].

use std::fmt;

use queuewire_core::{apply_diff, parse_diff, ClientError, ClientResult, Payload};
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{ClientEvent, EventId, JobStatus, ProcessOutput, ServerMessage, Stage};

pub const QUEUE_FULL_MSG: &str = "This application is too busy. Keep trying!";
pub const BROKEN_CONNECTION_MSG: &str = "Connection errored out.";
pub const SERVER_STOPPED_MSG: &str = "Server stopped unexpectedly.";

/// Wire protocol announced by the app config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolVersion {
    Ws,
    Sse,
    SseV1,
    SseV2,
    SseV2_1,
    SseV3,
    Other(String),
}

impl ProtocolVersion {
    pub fn parse(s: &str) -> Self {
        match s {
            "ws" => ProtocolVersion::Ws,
            "sse" => ProtocolVersion::Sse,
            "sse_v1" => ProtocolVersion::SseV1,
            "sse_v2" => ProtocolVersion::SseV2,
            "sse_v2.1" => ProtocolVersion::SseV2_1,
            "sse_v3" => ProtocolVersion::SseV3,
            other => ProtocolVersion::Other(other.to_string()),
        }
    }

    /// Generator outputs after the first arrive as edit lists.
    pub fn supports_diff(&self) -> bool {
        matches!(
            self,
            ProtocolVersion::SseV2 | ProtocolVersion::SseV2_1 | ProtocolVersion::SseV3
        )
    }

    /// Served over the `/queue/join` + `/queue/data` pair. Legacy `sse` needs a
    /// `send_data`/`send_hash` handshake this client does not answer.
    pub fn is_sse(&self) -> bool {
        matches!(
            self,
            ProtocolVersion::SseV1 | ProtocolVersion::SseV2 | ProtocolVersion::SseV2_1 | ProtocolVersion::SseV3
        )
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtocolVersion::Ws => "ws",
            ProtocolVersion::Sse => "sse",
            ProtocolVersion::SseV1 => "sse_v1",
            ProtocolVersion::SseV2 => "sse_v2",
            ProtocolVersion::SseV2_1 => "sse_v2.1",
            ProtocolVersion::SseV3 => "sse_v3",
            ProtocolVersion::Other(other) => other,
        };
        f.write_str(s)
    }
}

/// Per-job state machine over inbound queue messages.
#[derive(Debug)]
pub struct ProtocolHandler {
    event_id: Option<EventId>,
    stage: Stage,
    terminal: bool,
    diff_mode: bool,
    accumulator: Option<Vec<Payload>>,
}

impl ProtocolHandler {
    pub fn new(protocol: &ProtocolVersion) -> Self {
        Self {
            event_id: None,
            stage: Stage::Pending,
            terminal: false,
            diff_mode: protocol.supports_diff(),
            accumulator: None,
        }
    }

    pub fn with_event_id(mut self, event_id: EventId) -> Self {
        self.event_id = Some(event_id);
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Handle one raw message. Malformed messages end the job with an
    /// `unexpected_error` event.
    pub fn handle(&mut self, raw: &Value) -> Option<ClientEvent> {
        match self.try_handle(raw) {
            Ok(event) => event,
            Err(err) => {
                warn!(event_id = ?self.event_id, error = %err, "protocol error");
                self.fail(err.to_string())
            }
        }
    }

    /// Handle one raw message, surfacing protocol errors.
    pub fn try_handle(&mut self, raw: &Value) -> ClientResult<Option<ClientEvent>> {
        if self.terminal {
            let kind = raw.get("msg").and_then(Value::as_str).unwrap_or("?");
            warn!(event_id = ?self.event_id, msg = kind, "message after terminal state dropped");
            return Ok(None);
        }
        let message = ServerMessage::parse(raw)?;
        self.apply(message)
    }

    /// The connection under this job went away.
    pub fn connection_lost(&mut self, reason: &str) -> Option<ClientEvent> {
        warn!(event_id = ?self.event_id, reason, "stream lost before terminal state");
        self.fail(BROKEN_CONNECTION_MSG.to_string())
    }

    fn fail(&mut self, message: String) -> Option<ClientEvent> {
        if self.terminal {
            return None;
        }
        Some(self.finish(ClientEvent::UnexpectedError(
            JobStatus::new(Stage::Error).with_message(message),
        )))
    }

    fn finish(&mut self, event: ClientEvent) -> ClientEvent {
        if let Some(status) = event.status() {
            self.stage = status.stage;
        }
        self.terminal = true;
        self.accumulator = None;
        event
    }

    fn apply(&mut self, message: ServerMessage) -> ClientResult<Option<ClientEvent>> {
        let event = match message {
            ServerMessage::SendData => ClientEvent::Data,
            ServerMessage::SendHash => ClientEvent::Hash,
            ServerMessage::Heartbeat => ClientEvent::Heartbeat,
            ServerMessage::Log(record) => ClientEvent::Log(record),

            ServerMessage::QueueFull { code, success } => self.finish(ClientEvent::Update(
                JobStatus::new(Stage::Error)
                    .with_message(QUEUE_FULL_MSG)
                    .with_outcome(code, success),
            )),

            ServerMessage::UnexpectedError {
                message,
                code,
                success,
            } => {
                let mut status = JobStatus::new(Stage::Error).with_outcome(code, success);
                status.message = message;
                self.finish(ClientEvent::UnexpectedError(status))
            }

            ServerMessage::ServerStopped => self.finish(ClientEvent::UnexpectedError(
                JobStatus::new(Stage::Error).with_message(SERVER_STOPPED_MSG),
            )),

            ServerMessage::Estimation {
                queue_size,
                rank,
                rank_eta,
                code,
                success,
            } => {
                let mut status = JobStatus::new(self.stage).with_outcome(code, success);
                status.size = queue_size;
                status.position = rank;
                status.eta = rank_eta;
                ClientEvent::Update(status)
            }

            ServerMessage::Progress {
                progress_data,
                code,
                success,
            } => {
                let mut status = JobStatus::new(self.stage).with_outcome(code, success);
                status.progress_data = progress_data;
                ClientEvent::Update(status)
            }

            ServerMessage::ProcessStarts {
                rank,
                eta,
                code,
                success,
            } => {
                self.stage = Stage::Pending;
                let mut status = JobStatus::new(Stage::Pending).with_outcome(code, success);
                status.size = rank;
                status.position = Some(0);
                status.eta = eta;
                ClientEvent::Update(status)
            }

            ServerMessage::ProcessGenerating {
                success,
                output,
                progress_data,
                average_duration,
                code,
            } => {
                if success && output.error.as_ref().map_or(true, Value::is_null) {
                    let payload = self.accumulate(&output)?;
                    self.stage = Stage::Generating;
                    let mut status = JobStatus::new(Stage::Generating).with_outcome(code, Some(true));
                    status.eta = average_duration;
                    status.progress_data = progress_data;
                    ClientEvent::Generating {
                        status,
                        output: Some(payload),
                    }
                } else {
                    let mut status = JobStatus::new(Stage::Error).with_outcome(code, Some(false));
                    status.message = output.error_message();
                    self.finish(ClientEvent::Generating {
                        status,
                        output: None,
                    })
                }
            }

            ServerMessage::ProcessCompleted {
                success,
                output,
                progress_data,
                code,
            } => {
                if success && output.error.as_ref().map_or(true, Value::is_null) {
                    let payload = decode_output(&output);
                    let mut status = JobStatus::new(Stage::Complete).with_outcome(code, Some(true));
                    status.eta = output.average_duration;
                    status.progress_data = progress_data;
                    self.finish(ClientEvent::Complete {
                        status,
                        output: payload,
                    })
                } else {
                    let mut status = JobStatus::new(Stage::Error).with_outcome(code, Some(false));
                    status.message = output.error_message();
                    self.finish(ClientEvent::Update(status))
                }
            }

            ServerMessage::CloseStream => {
                debug!(event_id = ?self.event_id, "close_stream reached a job handler");
                return Ok(None);
            }

            ServerMessage::Unknown { kind } => {
                debug!(event_id = ?self.event_id, kind = %kind, "unrecognised message kind");
                ClientEvent::None(JobStatus::new(Stage::Error))
            }
        };

        Ok(Some(event))
    }

    /// Full output for this generator step, applying edits when diffing.
    fn accumulate(&mut self, output: &ProcessOutput) -> ClientResult<Payload> {
        if !self.diff_mode {
            return Ok(decode_output(output));
        }

        let data = output.data.clone().unwrap_or(Value::Array(Vec::new()));
        let steps = match data {
            Value::Array(steps) => steps,
            other => {
                return Err(ClientError::protocol(format!(
                    "generator output is not a list: {}",
                    other
                )))
            }
        };

        let next = match self.accumulator.take() {
            None => steps.into_iter().map(Payload::from).collect::<Vec<_>>(),
            Some(previous) => {
                let mut previous = previous.into_iter();
                let mut next = Vec::with_capacity(steps.len());
                for edits in &steps {
                    let base = previous.next().unwrap_or_default();
                    next.push(apply_diff(base, &parse_diff(edits)?)?);
                }
                next
            }
        };

        self.accumulator = Some(next.clone());
        Ok(Payload::Array(next))
    }
}

fn decode_output(output: &ProcessOutput) -> Payload {
    output.data.clone().map(Payload::from).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;
    use serde_json::json;

    fn handler() -> ProtocolHandler {
        ProtocolHandler::new(&ProtocolVersion::SseV1).with_event_id("e1".into())
    }

    #[test]
    fn only_queue_data_protocols_are_served() {
        for served in ["sse_v1", "sse_v2", "sse_v2.1", "sse_v3"] {
            assert!(ProtocolVersion::parse(served).is_sse(), "{}", served);
        }
        for refused in ["sse", "ws", "grpc"] {
            assert!(!ProtocolVersion::parse(refused).is_sse(), "{}", refused);
        }
    }

    #[test]
    fn queue_full_is_a_terminal_update() {
        let mut h = handler();
        let event = h
            .handle(&json!({"msg": "queue_full", "code": 500, "success": false}))
            .unwrap();
        assert_eq!(event.kind(), EventKind::Update);
        let status = event.status().unwrap();
        assert_eq!(status.stage, Stage::Error);
        assert!(status.queue);
        assert_eq!(status.message.as_deref(), Some(QUEUE_FULL_MSG));
        assert_eq!(status.code, Some(500));
        assert_eq!(status.success, Some(false));
        assert!(h.is_terminal());
    }

    #[test]
    #[tracing_test::traced_test]
    fn nothing_follows_completion() {
        let mut h = handler();
        let done = h
            .handle(&json!({"msg": "process_completed", "success": true, "output": {"data": ["ok"]}}))
            .unwrap();
        assert_eq!(done.kind(), EventKind::Complete);
        assert_eq!(done.output(), Some(&Payload::from(json!(["ok"]))));
        assert!(done.is_terminal());

        assert!(h
            .handle(&json!({"msg": "process_completed", "success": true, "output": {"data": []}}))
            .is_none());
        assert!(h.handle(&json!({"msg": "heartbeat"})).is_none());
        assert!(h.connection_lost("eof").is_none());
        assert!(logs_contain("message after terminal state dropped"));
    }

    #[test]
    fn estimation_and_progress_keep_stage() {
        let mut h = handler();
        let event = h
            .handle(&json!({"msg": "estimation", "rank": 3, "queue_size": 7, "rank_eta": 4.0, "success": true}))
            .unwrap();
        let status = event.status().unwrap();
        assert_eq!((status.stage, status.size, status.position, status.eta), (Stage::Pending, Some(7), Some(3), Some(4.0)));

        h.handle(&json!({"msg": "process_generating", "success": true, "output": {"data": ["a"]}}))
            .unwrap();
        assert_eq!(h.stage(), Stage::Generating);

        let event = h
            .handle(&json!({"msg": "progress", "progress_data": [{"index": 1, "length": 10, "unit": "steps"}]}))
            .unwrap();
        let status = event.status().unwrap();
        assert_eq!(status.stage, Stage::Generating);
        assert_eq!(status.progress_data.as_ref().unwrap()[0].length, Some(10));
    }

    #[test]
    fn process_starts_resets_to_pending() {
        let mut h = handler();
        h.handle(&json!({"msg": "process_generating", "success": true, "output": {"data": [1]}}));
        let event = h
            .handle(&json!({"msg": "process_starts", "rank": 4, "eta": 2.5}))
            .unwrap();
        let status = event.status().unwrap();
        assert_eq!(status.stage, Stage::Pending);
        assert_eq!(status.size, Some(4));
        assert_eq!(status.position, Some(0));
        assert_eq!(status.eta, Some(2.5));
        assert_eq!(h.stage(), Stage::Pending);
    }

    #[test]
    fn failures_differ_by_kind() {
        let mut h = handler();
        let event = h
            .handle(&json!({"msg": "process_generating", "success": false, "output": {"error": "boom"}}))
            .unwrap();
        assert_eq!(event.kind(), EventKind::Generating);
        assert_eq!(event.output(), None);
        assert_eq!(event.status().unwrap().message.as_deref(), Some("boom"));
        assert!(h.is_terminal());

        let mut h = handler();
        let event = h
            .handle(&json!({"msg": "process_completed", "success": true, "output": {"error": "late"}}))
            .unwrap();
        assert_eq!(event.kind(), EventKind::Update);
        assert_eq!(event.status().unwrap().stage, Stage::Error);
        assert!(event.is_terminal());
    }

    #[test]
    fn side_channel_kinds_do_not_move_state() {
        let mut h = handler();
        assert_eq!(h.handle(&json!({"msg": "heartbeat"})), Some(ClientEvent::Heartbeat));
        assert_eq!(h.handle(&json!({"msg": "send_hash"})), Some(ClientEvent::Hash));
        assert_eq!(h.handle(&json!({"msg": "send_data"})), Some(ClientEvent::Data));
        let log = h.handle(&json!({"msg": "log", "log": "hi", "level": "info"})).unwrap();
        assert_eq!(log.kind(), EventKind::Log);

        let unknown = h.handle(&json!({"msg": "from_the_future"})).unwrap();
        assert_eq!(unknown.kind(), EventKind::None);
        assert_eq!(unknown.status().unwrap().stage, Stage::Error);
        assert!(!unknown.is_terminal());
        assert!(!h.is_terminal());
        assert_eq!(h.stage(), Stage::Pending);
    }

    #[test]
    fn unexpected_error_and_broken_stream() {
        let mut h = handler();
        let event = h
            .handle(&json!({"msg": "unexpected_error", "message": "worker died", "success": false}))
            .unwrap();
        assert_eq!(event.kind(), EventKind::UnexpectedError);
        assert_eq!(event.status().unwrap().message.as_deref(), Some("worker died"));
        assert!(event.status().unwrap().queue);

        let mut h = handler();
        let event = h.connection_lost("reset by peer").unwrap();
        assert_eq!(event.status().unwrap().message.as_deref(), Some(BROKEN_CONNECTION_MSG));
        assert!(h.is_terminal());
    }

    #[test]
    fn malformed_message_ends_the_job() {
        let mut h = handler();
        let event = h.handle(&json!({"msg": "estimation", "rank": "first"})).unwrap();
        assert_eq!(event.kind(), EventKind::UnexpectedError);
        assert!(h.is_terminal());
    }

    #[test]
    fn diff_protocol_accumulates_outputs() {
        let mut h = ProtocolHandler::new(&ProtocolVersion::SseV3);
        let first = h
            .handle(&json!({"msg": "process_generating", "success": true,
                "output": {"data": ["Hel", [1]]}}))
            .unwrap();
        assert_eq!(first.output().unwrap().to_json().unwrap(), json!(["Hel", [1]]));

        let second = h
            .handle(&json!({"msg": "process_generating", "success": true,
                "output": {"data": [[["append", [], "lo"]], [["add", [1], 2]]]}}))
            .unwrap();
        assert_eq!(second.output().unwrap().to_json().unwrap(), json!(["Hello", [1, 2]]));

        let done = h
            .handle(&json!({"msg": "process_completed", "success": true,
                "output": {"data": ["Hello", [1, 2]], "average_duration": 0.4}}))
            .unwrap();
        assert_eq!(done.output().unwrap().to_json().unwrap(), json!(["Hello", [1, 2]]));
        assert_eq!(done.status().unwrap().eta, Some(0.4));
    }

    #[test]
    fn non_diff_protocol_takes_outputs_verbatim() {
        let mut h = ProtocolHandler::new(&ProtocolVersion::SseV1);
        h.handle(&json!({"msg": "process_generating", "success": true, "output": {"data": ["a"]}}));
        let second = h
            .handle(&json!({"msg": "process_generating", "success": true, "output": {"data": ["ab"]}}))
            .unwrap();
        assert_eq!(second.output().unwrap().to_json().unwrap(), json!(["ab"]));
    }
}
