//! # Stream connection manager
//!
//! One [`StreamManager`] owns the push connection of one client session. Jobs
//! register a [`StreamConsumer`] under their event id; a single reader task
//! forwards each frame to the consumer of its `event_id`.
//!
//! - Messages for ids without a consumer, or arriving while the session is
//!   closed, are buffered per id and delivered in order on `register`/`open`.
//! - Messages without an `event_id` go to every consumer.
//! - `close_stream` closes the session; consumers stay registered.
//! - A transport error or an unannounced end of stream closes the session and
//!   sends every consumer a failure item. There is no retry.
//! - Unregistering the last consumer tears the connection down and forgets
//!   the ids retired so far.
//!
//! Buffers for ids nobody has claimed are capped at [`MAX_UNCLAIMED_IDS`]; past
//! that the oldest unclaimed buffer is dropped. Late messages for unregistered
//! ids are dropped, remembering at most [`MAX_RETIRED_IDS`] of them.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::StreamExt;
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use queuewire_core::ClientResult;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::transport::{FrameStream, Headers, Transport};
use crate::types::{event_id_of, message_kind, EventId, CLOSE_STREAM};

/// Ids with buffered messages and no consumer.
pub const MAX_UNCLAIMED_IDS: usize = 128;

/// Unregistered ids whose late messages are dropped instead of buffered.
pub const MAX_RETIRED_IDS: usize = 1024;

/// What a consumer receives
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Message(Value),
    /// The connection failed
    TransportError(String),
    /// The connection ended without `close_stream`
    TransportClosed(String),
}

/// Receives stream items for one event id.
pub trait StreamConsumer: Send + Sync {
    /// Deliver one item; `false` means the consumer is gone.
    fn deliver(&self, item: StreamItem) -> bool;
}

impl StreamConsumer for mpsc::UnboundedSender<StreamItem> {
    fn deliver(&self, item: StreamItem) -> bool {
        self.send(item).is_ok()
    }
}

#[derive(Default)]
struct StreamSession {
    open: bool,
    generation: u64,
    pending: IndexMap<EventId, VecDeque<Value>>,
    consumers: HashMap<EventId, Arc<dyn StreamConsumer>>,
    retired: IndexSet<EventId>,
    reader: Option<JoinHandle<()>>,
}

impl StreamSession {
    /// Deliver to `id`'s consumer, dropping it if it has gone away.
    fn deliver_to(&mut self, id: &EventId, item: StreamItem) {
        if let Some(consumer) = self.consumers.get(id) {
            if !consumer.deliver(item) {
                debug!(event_id = %id, "consumer gone");
                self.consumers.remove(id);
            }
        }
    }

    fn buffer(&mut self, id: EventId, message: Value) {
        if !self.pending.contains_key(&id) && !self.consumers.contains_key(&id) {
            self.evict_unclaimed();
        }
        self.pending.entry(id).or_default().push_back(message);
    }

    /// Make room for one more unclaimed buffer.
    fn evict_unclaimed(&mut self) {
        let unclaimed = self
            .pending
            .keys()
            .filter(|id| !self.consumers.contains_key(*id))
            .count();
        if unclaimed < MAX_UNCLAIMED_IDS {
            return;
        }
        let oldest = self
            .pending
            .keys()
            .find(|id| !self.consumers.contains_key(*id))
            .cloned();
        if let Some(oldest) = oldest {
            let dropped = self.pending.shift_remove(&oldest).map_or(0, |queue| queue.len());
            debug!(event_id = %oldest, dropped, "unclaimed buffer evicted");
        }
    }

    fn retire(&mut self, id: EventId) {
        self.retired.insert(id);
        if self.retired.len() > MAX_RETIRED_IDS {
            self.retired.shift_remove_index(0);
        }
    }

    fn flush(&mut self, id: &EventId) {
        if let Some(queue) = self.pending.shift_remove(id) {
            for message in queue {
                self.deliver_to(id, StreamItem::Message(message));
            }
        }
    }

    fn flush_all(&mut self) {
        let ready: Vec<EventId> = self
            .pending
            .keys()
            .filter(|id| self.consumers.contains_key(*id))
            .cloned()
            .collect();
        for id in ready {
            self.flush(&id);
        }
    }

    fn fail_all(&mut self, item: StreamItem) {
        let ids: Vec<EventId> = self.consumers.keys().cloned().collect();
        for id in ids {
            self.deliver_to(&id, item.clone());
        }
    }

    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    url: String,
    headers: Headers,
    session: Mutex<StreamSession>,
    open_lock: tokio::sync::Mutex<()>,
}

/// Owner of the shared push connection.
#[derive(Clone)]
pub struct StreamManager {
    inner: Arc<Inner>,
}

impl StreamManager {
    /// A closed manager for the stream at `url`.
    pub fn new(transport: Arc<dyn Transport>, url: impl Into<String>, headers: Headers) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                url: url.into(),
                headers,
                session: Mutex::new(StreamSession::default()),
                open_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn is_open(&self) -> bool {
        self.inner.session.lock().open
    }

    pub fn consumer_count(&self) -> usize {
        self.inner.session.lock().consumers.len()
    }

    /// Messages buffered for `id`.
    pub fn pending_count(&self, id: &EventId) -> usize {
        self.inner
            .session
            .lock()
            .pending
            .get(id)
            .map_or(0, VecDeque::len)
    }

    /// Open the push connection unless it already is.
    #[instrument(skip(self), fields(url = %self.inner.url))]
    pub async fn open(&self) -> ClientResult<()> {
        let _guard = self.inner.open_lock.lock().await;
        if self.is_open() {
            return Ok(());
        }

        let frames = self
            .inner
            .transport
            .open_stream(&self.inner.url, &self.inner.headers)
            .await?;

        let mut session = self.inner.session.lock();
        session.stop_reader();
        session.open = true;
        session.generation += 1;
        let generation = session.generation;
        session.flush_all();
        session.reader = Some(tokio::spawn(read_frames(
            Arc::clone(&self.inner),
            frames,
            generation,
        )));
        info!(generation, "stream opened");
        Ok(())
    }

    /// Attach `consumer` to `id`; anything buffered for `id` is delivered first.
    pub fn register(&self, id: EventId, consumer: Arc<dyn StreamConsumer>) {
        let mut session = self.inner.session.lock();
        session.retired.shift_remove(&id);
        session.consumers.insert(id.clone(), consumer);
        if session.open {
            session.flush(&id);
        }
        debug!(event_id = %id, "consumer registered");
    }

    /// Stop forwarding for `id`. The connection closes with the last consumer.
    pub fn unregister(&self, id: &EventId) {
        let mut session = self.inner.session.lock();
        let removed = session.consumers.remove(id).is_some();
        session.pending.shift_remove(id);
        session.retire(id.clone());
        if removed {
            debug!(event_id = %id, "consumer unregistered");
        }
        if session.consumers.is_empty() {
            session.retired.clear();
            if session.open {
                session.open = false;
                session.stop_reader();
                info!("last consumer left, stream closed");
            }
        }
    }

    /// Route one raw message.
    pub fn dispatch(&self, message: Value) {
        self.inner.dispatch(message);
    }

    /// Close the connection; consumers stay registered.
    pub fn close(&self) {
        let mut session = self.inner.session.lock();
        session.open = false;
        session.stop_reader();
    }
}

impl Inner {
    fn dispatch(&self, message: Value) {
        let mut session = self.session.lock();

        if message_kind(&message) == Some(CLOSE_STREAM) && event_id_of(&message).is_none() {
            session.open = false;
            info!("close_stream received");
            return;
        }

        match event_id_of(&message) {
            Some(id) => {
                if session.retired.contains(&id) {
                    debug!(event_id = %id, "message for retired id dropped");
                } else if session.open && session.consumers.contains_key(&id) {
                    session.deliver_to(&id, StreamItem::Message(message));
                } else {
                    session.buffer(id, message);
                }
            }
            None => {
                if !session.open {
                    debug!("broadcast while closed dropped");
                    return;
                }
                let ids: Vec<EventId> = session.consumers.keys().cloned().collect();
                for id in ids {
                    session.deliver_to(&id, StreamItem::Message(message.clone()));
                }
            }
        }
    }

    /// The reader for `generation` stopped; `item` goes to every consumer.
    fn lost(&self, generation: u64, item: StreamItem) {
        let mut session = self.session.lock();
        if session.generation != generation || !session.open {
            return;
        }
        session.open = false;
        session.reader = None;
        session.fail_all(item);
    }

    fn is_current(&self, generation: u64) -> bool {
        let session = self.session.lock();
        session.open && session.generation == generation
    }
}

async fn read_frames(inner: Arc<Inner>, mut frames: FrameStream, generation: u64) {
    while let Some(frame) = frames.next().await {
        let text = match frame {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "stream error");
                inner.lost(generation, StreamItem::TransportError(err.to_string()));
                return;
            }
        };
        if text.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(message) => inner.dispatch(message),
            Err(err) => warn!(error = %err, frame = %text, "non-JSON frame skipped"),
        }
        if !inner.is_current(generation) {
            debug!(generation, "reader stopping");
            return;
        }
    }
    warn!("stream ended without close_stream");
    inner.lost(
        generation,
        StreamItem::TransportClosed("stream ended before close_stream".to_string()),
    );
}
