#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Event bus for pipeline lifecycle notifications.
//!
//! The bus carries a typed event enum with sequential identifiers and keeps a
//! bounded replay ring so late subscribers can catch up on recent history.
//! Live delivery uses a smaller `tokio::broadcast` channel. A receiver that
//! lags behind it refills from the ring, so it only loses events once they
//! have aged out of the ring as well. Publishers never block.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};
use uuid::Uuid;

/// Identifier assigned to each published event.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Live channel slots per replay ring slot.
const LIVE_CHANNEL_DIVISOR: usize = 4;

/// Typed domain events emitted while requests move through the pipeline.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A submission was admitted and persisted as queued.
    RequestQueued {
        /// Request identifier.
        request_id: Uuid,
        /// Origin URL of the submission.
        url: String,
    },
    /// A request crossed a stage boundary.
    StatusChanged {
        /// Request identifier.
        request_id: Uuid,
        /// Phase the request entered.
        phase: RequestPhase,
        /// Progress checkpoint recorded with the transition.
        progress: u8,
    },
    /// A request reached the ready state.
    Completed {
        /// Request identifier.
        request_id: Uuid,
        /// Package identifier (infohash) that is now being seeded.
        package_id: String,
    },
    /// A request ended in the error state.
    Failed {
        /// Request identifier.
        request_id: Uuid,
        /// Error message recorded on the request.
        message: String,
    },
    /// A request was cancelled by a caller.
    Cancelled {
        /// Request identifier.
        request_id: Uuid,
    },
}

impl Event {
    /// Machine-friendly discriminator for consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RequestQueued { .. } => "request_queued",
            Self::StatusChanged { .. } => "status_changed",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// Request the event refers to.
    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        match self {
            Self::RequestQueued { request_id, .. }
            | Self::StatusChanged { request_id, .. }
            | Self::Completed { request_id, .. }
            | Self::Failed { request_id, .. }
            | Self::Cancelled { request_id } => *request_id,
        }
    }
}

/// Pipeline phases as seen by event consumers.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestPhase {
    /// Waiting in the queue.
    Queued,
    /// Retrieving remote content.
    Fetching,
    /// Building the distributable package.
    Packaging,
    /// Registering the package with the seeder.
    Seeding,
    /// Package is available.
    Ready,
    /// Processing failed.
    Error,
    /// Processing was cancelled.
    Cancelled,
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Sequential identifier.
    pub id: EventId,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a bus whose replay ring holds `capacity` events.
    ///
    /// The live channel holds a quarter of that. A zero capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel((capacity / LIVE_CHANNEL_DIVISOR).max(1));
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event, assigning it a sequential identifier.
    ///
    /// Ids are assigned and sent under the ring lock, so every subscriber sees
    /// them in increasing order.
    pub fn publish(&self, event: Event) -> EventId {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };
        if buffer.len() == self.replay_capacity {
            buffer.pop_front();
        }
        buffer.push_back(envelope.clone());
        let _ = self.sender.send(envelope);
        drop(buffer);
        id
    }

    /// Subscribe to the bus, replaying any buffered events newer than `since_id`.
    ///
    /// With `None` the stream starts after the most recent event.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let newest = self.next_id.load(Ordering::Relaxed) - 1;
        let last_seen = since_id.unwrap_or(newest).min(newest);
        let backlog = buffer
            .iter()
            .filter(|item| item.id > last_seen)
            .cloned()
            .collect();
        let receiver = self.sender.subscribe();
        drop(buffer);

        EventStream {
            backlog,
            receiver,
            history: Arc::clone(&self.buffer),
            last_seen,
        }
    }

    /// Returns the last assigned identifier, if any events are buffered.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.back().map(|event| event.id)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events from the replay backlog first, then from
/// the live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
    history: Arc<Mutex<VecDeque<EventEnvelope>>>,
    last_seen: EventId,
}

impl EventStream {
    /// Receive the next event, returning `None` once the bus is dropped.
    ///
    /// Events arrive in id order without duplicates.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        loop {
            let candidate = if let Some(event) = self.backlog.pop_front() {
                event
            } else {
                match self.receiver.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        self.catch_up();
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            };
            if candidate.id > self.last_seen {
                self.last_seen = candidate.id;
                return Some(candidate);
            }
        }
    }

    fn catch_up(&mut self) {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let last_seen = self.last_seen;
        self.backlog
            .extend(history.iter().filter(|item| item.id > last_seen).cloned());
    }
}
