use serde::Serialize;
use std::collections::VecDeque;
use time::OffsetDateTime;

/// Maximum number of events retained in the ring buffer.
pub const MAX_EVENTS: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct NodeEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Mode,
    Pump,
    Probe,
    Movement,
    Sensor,
    Peer,
    Error,
    System,
}

/// Recent node activity, oldest dropped first.
#[derive(Debug, Default)]
pub struct EventLog {
    events: VecDeque<NodeEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn push(&mut self, kind: EventKind, detail: impl Into<String>) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(NodeEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail: detail.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<NodeEvent> {
        self.events.iter().rev().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_drops_oldest() {
        let mut log = EventLog::new();
        for i in 0..MAX_EVENTS + 5 {
            log.push(EventKind::System, format!("event {i}"));
        }
        assert_eq!(log.len(), MAX_EVENTS);

        let recent = log.recent();
        assert_eq!(recent[0].detail, format!("event {}", MAX_EVENTS + 4));
        assert_eq!(recent[MAX_EVENTS - 1].detail, "event 5");
    }

    #[test]
    fn kind_serialises_lowercase() {
        let mut log = EventLog::new();
        log.push(EventKind::Peer, "notify sent");
        let json = serde_json::to_value(log.recent()).unwrap();
        assert_eq!(json[0]["kind"], "peer");
        assert!(json[0]["ts"].is_string());
    }
}
