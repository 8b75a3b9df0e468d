//! The line-oriented event protocol.
//!
//! Each physical line is either an event designator (`event: <type>`), a
//! data line (`data:<payload>`), or noise to ignore. Every data line is
//! dispatched immediately as one complete frame of the current event type;
//! consecutive data lines are deliberately not joined into a single payload.

use std::fmt;

const EVENT_MARKER: &str = "event:";
const DATA_MARKER: &str = "data:";

/// Recognized frame types. Designator lines naming anything else leave the
/// decoder without a current type, so their data lines dispatch nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Command,
    Output,
    Done,
    Error,
}

impl EventKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "command" => Some(EventKind::Command),
            "output" => Some(EventKind::Output),
            "done" => Some(EventKind::Done),
            "error" => Some(EventKind::Error),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Command => write!(f, "command"),
            EventKind::Output => write!(f, "output"),
            EventKind::Done => write!(f, "done"),
            EventKind::Error => write!(f, "error"),
        }
    }
}

/// One decoded (event-type, payload) frame.
///
/// The payload is the exact substring after the data marker and its
/// optional single separator space. It is never trimmed beyond that:
/// output payloads are columnar text where leading spaces matter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub kind: EventKind,
    pub payload: String,
}

/// Decoder state: just the current event type, persisting across lines and
/// chunk boundaries until the next designator overwrites it.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    current: Option<EventKind>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one complete line; returns a frame if the line was a data line
    /// with a recognized current event type.
    pub fn feed_line(&mut self, line: &str) -> Option<StreamEvent> {
        if let Some(name) = line.strip_prefix(EVENT_MARKER) {
            self.current = EventKind::from_name(name.trim());
            return None;
        }
        if let Some(rest) = line.strip_prefix(DATA_MARKER) {
            // One separator space belongs to the marker; everything after
            // it is payload, verbatim.
            let payload = rest.strip_prefix(' ').unwrap_or(rest);
            return self.current.map(|kind| StreamEvent {
                kind,
                payload: payload.to_string(),
            });
        }
        None
    }
}
