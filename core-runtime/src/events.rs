//! # Event Bus System
//!
//! Broadcasts sync state changes to any number of secondary observers using
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The sync coordinator reports to exactly one delegate. Everything else that
//! wants to know about availability flips, update cycles or document state
//! (status bars, diagnostics, registered observers) subscribes here instead.
//!
//! ```text
//! ┌─────────────────┐   emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ Update pipeline ├─────────>│           ├────────────>│ Observer   │
//! └─────────────────┘          │ EventBus  │             └────────────┘
//! ┌─────────────────┐   emit   │ (broadcast│  subscribe  ┌────────────┐
//! │ File operations ├─────────>│  channel) ├────────────>│ Diagnostics│
//! └─────────────────┘          └───────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{AvailabilityEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut events = bus.subscribe();
//!
//! bus.emit(CoreEvent::Availability(AvailabilityEvent::Changed {
//!     available: true,
//!     container: Some("iCloud.com.example.notes".to_string()),
//! }))
//! .ok();
//!
//! assert!(matches!(events.recv().await, Ok(CoreEvent::Availability(_))));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events. Non-fatal.
//! - **`RecvError::Closed`**: the bus was dropped. Treat as shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Availability(AvailabilityEvent),
    Update(UpdateEvent),
    Document(DocumentEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Availability(e) => e.description(),
            CoreEvent::Update(e) => e.description(),
            CoreEvent::Document(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Availability(AvailabilityEvent::Changed {
                available: false, ..
            }) => EventSeverity::Warning,
            CoreEvent::Update(UpdateEvent::ConflictDetected { .. }) => EventSeverity::Warning,
            CoreEvent::Update(UpdateEvent::DownloadFailed { .. }) => EventSeverity::Error,
            CoreEvent::Update(UpdateEvent::Published { .. }) => EventSeverity::Info,
            CoreEvent::Document(DocumentEvent::StateChanged { state, .. })
                if state == "saving_error" =>
            {
                EventSeverity::Error
            }
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Availability Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AvailabilityEvent {
    /// Cloud storage became reachable or unreachable.
    Changed {
        available: bool,
        /// Container identifier, `None` for the default container.
        container: Option<String>,
    },
    /// Setup finished and the first enumeration was started.
    Initialized {
        container: Option<String>,
    },
}

impl AvailabilityEvent {
    fn description(&self) -> &str {
        match self {
            AvailabilityEvent::Changed {
                available: true, ..
            } => "Cloud storage available",
            AvailabilityEvent::Changed { .. } => "Cloud storage unavailable",
            AvailabilityEvent::Initialized { .. } => "Cloud storage initialized",
        }
    }
}

// ============================================================================
// Update Pipeline Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum UpdateEvent {
    /// The host started gathering the initial result set.
    Began,
    /// An update cycle replaced the published file list.
    Published {
        /// Monotonic cycle number, starting at 1.
        cycle: u64,
        /// Number of current files in the published list.
        files: usize,
        /// Number of items still downloading or waiting for download.
        pending: usize,
    },
    /// The host finished gathering the initial result set.
    Ended,
    /// A download start request for a not-yet-downloaded item failed.
    DownloadFailed { name: String, message: String },
    /// A local and a cloud copy disagree and need external resolution.
    ConflictDetected { name: String },
}

impl UpdateEvent {
    fn description(&self) -> &str {
        match self {
            UpdateEvent::Began => "File update began",
            UpdateEvent::Published { .. } => "File list published",
            UpdateEvent::Ended => "File update ended",
            UpdateEvent::DownloadFailed { .. } => "Download request failed",
            UpdateEvent::ConflictDetected { .. } => "File conflict detected",
        }
    }
}

// ============================================================================
// Document Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DocumentEvent {
    /// A document's lifecycle state changed.
    StateChanged { name: String, state: String },
    Saved { name: String },
    Deleted { name: String },
    Renamed { from: String, to: String },
    Duplicated { from: String, to: String },
    /// A local file was moved into, or merged with, the cloud.
    Uploaded { name: String },
    /// A cloud file was moved back to local storage.
    Evicted { name: String },
}

impl DocumentEvent {
    fn description(&self) -> &str {
        match self {
            DocumentEvent::StateChanged { .. } => "Document state changed",
            DocumentEvent::Saved { .. } => "Document saved",
            DocumentEvent::Deleted { .. } => "Document deleted",
            DocumentEvent::Renamed { .. } => "Document renamed",
            DocumentEvent::Duplicated { .. } => "Document duplicated",
            DocumentEvent::Uploaded { .. } => "Document uploaded",
            DocumentEvent::Evicted { .. } => "Document evicted",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for core events.
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// Subscribers lagging by more than `capacity` events receive
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let documents_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Document(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if the bus was dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
