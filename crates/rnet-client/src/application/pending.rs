//! Bookkeeping for requests that are queued, in flight, or awaiting a reply.
//!
//! Every frame the session sends is registered here before it is queued, so
//! that each caller's completion is resolved exactly once: by a reply, by
//! being written (for messages that expect none), by timing out, or by
//! cancellation.
//!
//! # Correlation
//!
//! RNET frames carry no request ids.  A reply is matched on who sent it and
//! what it is:
//!
//! | request          | expected reply                            | key                           |
//! |------------------|-------------------------------------------|-------------------------------|
//! | `Event`          | non-Data `Handshake` from the target      | `(target, Handshake, -)`      |
//! | `RequestData`    | last SetData packet of the requested path | `(target, Data, path)`        |
//! | anything else, or any broadcast | nothing                    | none                          |
//!
//! Several requests may share a key; replies resolve them oldest first.
//! A `Handshake(Data)` only paces SetData transfers and never completes an
//! `Event`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use rnet_core::{DeviceAddress, Envelope, HandshakeKind, Message, Path, Priority};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::application::error::SessionError;

/// An encoded frame on its way to the writer.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub request_id: u64,
    pub envelope: Arc<Envelope>,
    pub bytes: Arc<[u8]>,
}

/// The kind of inbound message that completes a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    Handshake,
    Data,
}

/// Identifies which inbound message answers a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub peer: DeviceAddress,
    pub reply: ReplyKind,
    pub path: Option<Path>,
}

impl CorrelationKey {
    /// The key a request to `target` waits on, or `None` if it expects no reply.
    pub fn for_request(target: DeviceAddress, message: &Message) -> Option<Self> {
        if target.is_broadcast() {
            return None;
        }
        match message {
            Message::Event(_) => Some(Self::handshake_from(target)),
            Message::RequestData(m) => Some(Self::data_from(target, m.target_path.clone())),
            _ => None,
        }
    }

    /// The key an inbound handshake of `kind` from `peer` completes, if any.
    pub fn for_handshake(peer: DeviceAddress, kind: HandshakeKind) -> Option<Self> {
        match kind {
            HandshakeKind::Data => None,
            _ => Some(Self::handshake_from(peer)),
        }
    }

    pub fn handshake_from(peer: DeviceAddress) -> Self {
        Self {
            peer,
            reply: ReplyKind::Handshake,
            path: None,
        }
    }

    pub fn data_from(peer: DeviceAddress, path: Path) -> Self {
        Self {
            peer,
            reply: ReplyKind::Data,
            path: Some(path),
        }
    }
}

/// Successful outcome of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The peer acknowledged with a handshake.
    Ack(HandshakeKind),
    /// The peer answered with a complete value.
    Data(Arc<[u8]>),
    /// The frame was written; no reply was expected.
    Sent,
}

pub type Completion = oneshot::Sender<Result<Reply, SessionError>>;

/// One outstanding request.
#[derive(Debug)]
pub struct PendingRequest {
    frame: OutboundFrame,
    priority: Priority,
    key: Option<CorrelationKey>,
    /// Set when the frame is written; `None` while queued.
    deadline: Option<Instant>,
    retries_remaining: u32,
    attempts: u32,
    completion: Completion,
}

impl PendingRequest {
    pub fn new(
        frame: OutboundFrame,
        priority: Priority,
        key: Option<CorrelationKey>,
        retries: u32,
        completion: Completion,
    ) -> Self {
        Self {
            frame,
            priority,
            key,
            deadline: None,
            retries_remaining: retries,
            attempts: 0,
            completion,
        }
    }

    fn id(&self) -> u64 {
        self.frame.request_id
    }

    fn complete(self, outcome: Result<Reply, SessionError>) {
        // The caller may have dropped its handle; nobody to tell.
        let _ = self.completion.send(outcome);
    }
}

/// What [`PendingTable::expire`] did with an overdue request.
#[derive(Debug)]
pub enum Expiry {
    /// Re-queue this frame; the request keeps its correlation key.
    Resend {
        frame: OutboundFrame,
        priority: Priority,
        attempt: u32,
    },
    /// Retries exhausted; the caller has been told.
    TimedOut { request_id: u64, attempts: u32 },
}

/// All outstanding requests of one session.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<u64, PendingRequest>,
    waiting: HashMap<CorrelationKey, VecDeque<u64>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, request: PendingRequest) {
        let id = request.id();
        if let Some(key) = &request.key {
            self.waiting.entry(key.clone()).or_default().push_back(id);
        }
        self.entries.insert(id, request);
    }

    pub fn contains(&self, request_id: u64) -> bool {
        self.entries.contains_key(&request_id)
    }

    /// Records that the frame for `request_id` hit the wire at `now`.
    ///
    /// Requests without a correlation key complete with [`Reply::Sent`];
    /// the others start their reply deadline.  Returns `true` if the request
    /// is still waiting for a reply.
    pub fn mark_written(&mut self, request_id: u64, now: Instant, timeout: Duration) -> bool {
        let Some(entry) = self.entries.get_mut(&request_id) else {
            return false;
        };
        entry.attempts += 1;
        if entry.key.is_some() {
            entry.deadline = Some(now + timeout);
            return true;
        }
        if let Some(entry) = self.entries.remove(&request_id) {
            entry.complete(Ok(Reply::Sent));
        }
        false
    }

    /// Completes the oldest request waiting on `key`.
    ///
    /// Returns its id, or `None` if nothing was waiting (an unmatched reply).
    pub fn resolve(&mut self, key: &CorrelationKey, reply: Reply) -> Option<u64> {
        let queue = self.waiting.get_mut(key)?;
        let id = queue.pop_front();
        if queue.is_empty() {
            self.waiting.remove(key);
        }
        let entry = self.entries.remove(&id?)?;
        let id = entry.id();
        entry.complete(Ok(reply));
        Some(id)
    }

    /// Removes one request and fails it with `error`.  Returns whether it existed.
    pub fn cancel(&mut self, request_id: u64, error: SessionError) -> bool {
        let Some(entry) = self.entries.remove(&request_id) else {
            return false;
        };
        if let Some(key) = &entry.key {
            self.unlink(key, request_id);
        }
        entry.complete(Err(error));
        true
    }

    /// Handles every request whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<Expiry> {
        let overdue: Vec<u64> = self
            .entries
            .values()
            .filter(|e| e.deadline.is_some_and(|d| d <= now))
            .map(PendingRequest::id)
            .collect();

        let mut out = Vec::with_capacity(overdue.len());
        for id in overdue {
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            if entry.retries_remaining > 0 {
                entry.retries_remaining -= 1;
                entry.deadline = None;
                out.push(Expiry::Resend {
                    frame: entry.frame.clone(),
                    priority: entry.priority,
                    attempt: entry.attempts + 1,
                });
                continue;
            }

            let attempts = entry.attempts;
            if let Some(key) = entry.key.clone() {
                self.unlink(&key, id);
            }
            if let Some(entry) = self.entries.remove(&id) {
                entry.complete(Err(SessionError::Timeout { attempts }));
            }
            out.push(Expiry::TimedOut {
                request_id: id,
                attempts,
            });
        }
        out
    }

    /// Fails every request with `error`.  Returns how many there were.
    pub fn fail_all(&mut self, error: SessionError) -> usize {
        self.waiting.clear();
        let n = self.entries.len();
        for (_, entry) in self.entries.drain() {
            entry.complete(Err(error.clone()));
        }
        n
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn unlink(&mut self, key: &CorrelationKey, request_id: u64) {
        if let Some(queue) = self.waiting.get_mut(key) {
            queue.retain(|&id| id != request_id);
            if queue.is_empty() {
                self.waiting.remove(key);
            }
        }
    }
}
