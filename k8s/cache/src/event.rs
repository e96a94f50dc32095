/// Describes what prompted a synchronization request.
///
/// The resynchronizer ignores the payload: the single request slot models
/// the intent, not the cause. Events exist so request metrics can be
/// partitioned by origin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    kind: Option<String>,
    op: EventOp,
}

/// The watch operation that produced an event.
///
/// The watcher contract delivers applies (creations and updates alike),
/// deletions, and full resets after a watch restart.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventOp {
    Apply,
    Delete,
    Reset,
    /// The periodic resync timer elapsed; no resource involved.
    Time,
}

// === impl Event ===

impl Event {
    pub fn applied(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            op: EventOp::Apply,
        }
    }

    pub fn deleted(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            op: EventOp::Delete,
        }
    }

    pub fn reset(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            op: EventOp::Reset,
        }
    }

    pub fn time() -> Self {
        Self {
            kind: None,
            op: EventOp::Time,
        }
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub fn op(&self) -> EventOp {
        self.op
    }

    pub fn is_time_triggered(&self) -> bool {
        self.op == EventOp::Time
    }
}

// === impl EventOp ===

impl EventOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Delete => "delete",
            Self::Reset => "reset",
            Self::Time => "time",
        }
    }
}

impl std::fmt::Display for EventOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
