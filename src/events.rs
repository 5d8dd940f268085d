use std::{collections::VecDeque, fmt::Display};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

/// Something that happened to the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionEvent {
    /// About to open a transport.
    Opening {
        /// The requested port.
        port: String,
        /// The requested baud rate.
        baud: u32,
    },

    /// The transport is open and being read.
    Opened {
        /// The open port.
        port: String,
    },

    /// Opening the transport failed, the session stays closed.
    OpenFailed {
        /// The requested port.
        port: String,
        /// Why.
        reason: String,
    },

    /// About to stop reading and release the transport.
    Closing {
        /// The port being closed.
        port: String,
    },

    /// The transport has been released.
    Closed {
        /// The port which was closed.
        port: String,
    },

    /// Reading failed, the session is being closed because of it.
    TransportLost {
        /// The port which failed.
        port: String,
        /// Why.
        reason: String,
    },
}

impl Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::Opening { port, baud } => write!(f, "opening {port} at {baud} baud"),
            SessionEvent::Opened { port } => write!(f, "opened {port}"),
            SessionEvent::OpenFailed { port, reason } => {
                write!(f, "could not open {port}: {reason}")
            }
            SessionEvent::Closing { port } => write!(f, "closing {port}"),
            SessionEvent::Closed { port } => write!(f, "closed {port}"),
            SessionEvent::TransportLost { port, reason } => write!(f, "lost {port}: {reason}"),
        }
    }
}

/// A session event and when it happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimestampedEvent {
    /// The event.
    pub inner: SessionEvent,

    /// Where the event is in the order of all events, starting at one.
    /// Two events may share a timestamp, but never a sequence number.
    pub seq: u64,

    /// When the event happened.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl TimestampedEvent {
    /// Stamp an event with its sequence number and the current time.
    pub fn new(event: SessionEvent, seq: u64) -> Self {
        Self {
            inner: event,
            seq,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl Display for TimestampedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

/// An event logger and broadcaster.
#[derive(Debug)]
pub struct Events {
    log: VecDeque<TimestampedEvent>,
    log_size: usize,

    // The sequence number of the latest event.
    seq: u64,

    tx: broadcast::Sender<TimestampedEvent>,
}

impl Events {
    /// Create a new events handler.
    /// It will keep a log of at most `log_size` events.
    /// It may be subscribed to to receive any events it sees.
    pub fn new(log_size: usize) -> Self {
        let (tx, _) = broadcast::channel(100);
        Self {
            tx,
            log: VecDeque::new(),
            log_size,
            seq: 0,
        }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<TimestampedEvent> {
        self.tx.subscribe()
    }

    /// Send an event. This will append it to the log and broadcast it to any subscribers.
    pub fn send_event(&mut self, event: SessionEvent) {
        self.seq += 1;
        let event = TimestampedEvent::new(event, self.seq);
        info!(%event, "Session event");
        self.log.push_front(event.clone());

        // Truncate removes from the back, which means older events are split off first.
        self.log.truncate(self.log_size);

        // Nobody listening is fine.
        let _ = self.tx.send(event);
    }

    /// The most recent events, newest first.
    pub fn recent(&self) -> Vec<TimestampedEvent> {
        self.log.iter().cloned().collect()
    }
}
