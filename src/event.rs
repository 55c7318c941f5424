/// The closed set of framework-level events that flow through the same
/// dispatch fabric as ordinary tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    PowerOn,
    PowerOff,
    PowerStatusChanged,
    Derived(String),
}

/// Payload of an `Event`-kind task.
///
/// `subject` names the module the event is *about* (used by
/// `PowerStatusChanged` to say which module transitioned); it is distinct
/// from the task's own `target`, which says where the event is delivered.
#[derive(Debug, Clone)]
pub struct EventPayload {
    pub kind: EventKind,
    pub subject: Option<String>,
}

impl EventPayload {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            subject: None,
        }
    }

    pub fn with_subject(kind: EventKind, subject: impl Into<String>) -> Self {
        Self {
            kind,
            subject: Some(subject.into()),
        }
    }
}
