use super::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceEventType {
    /// The observable content of the sender changed.
    TargetChanged,
    /// The evaluation status of the sender changed.
    StatusChanged,
    /// The sender is being deleted.
    TargetDeleted,
    ReferenceAdded,
    ReferenceRemoved,
    ReferenceChanged,
    TitleChanged,
    /// The sender started or finished background work.
    PendingStateChanged,
    TargetEnabledOrDisabled,
}

impl ReferenceEventType {
    /// Whether an object passes this event on to its own dependents when its hook does not
    /// decide otherwise.
    ///
    /// | event                            | default |
    /// |----------------------------------|---------|
    /// | `TargetChanged`                  | forward |
    /// | `PendingStateChanged`            | forward |
    /// | `StatusChanged`                  | absorb  |
    /// | `TargetDeleted`                  | absorb  |
    /// | `ReferenceAdded/Removed/Changed` | absorb  |
    /// | `TitleChanged`                   | absorb  |
    /// | `TargetEnabledOrDisabled`        | absorb  |
    pub fn forwarded_by_default(&self) -> bool {
        matches!(
            self,
            ReferenceEventType::TargetChanged | ReferenceEventType::PendingStateChanged
        )
    }

    /// Whether the event bumps the revision counter of every object it passes.
    pub fn changes_content(&self) -> bool {
        matches!(self, ReferenceEventType::TargetChanged)
    }
}

/// Extra information attached to an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    None,
    /// The child reference that was added, removed or swapped.
    Reference {
        old: Option<ObjectId>,
        new: Option<ObjectId>,
    },
    /// Identifier of a display object whose binding changed.
    Display(uuid::Uuid),
    Message(String),
}

/// One notification travelling from an object to its dependents.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEvent {
    kind: ReferenceEventType,
    sender: ObjectId,
    payload: EventPayload,
}

impl ReferenceEvent {
    pub fn new(kind: ReferenceEventType, sender: ObjectId) -> Self {
        Self {
            kind,
            sender,
            payload: EventPayload::None,
        }
    }

    pub fn with_payload(mut self, payload: EventPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn kind(&self) -> ReferenceEventType {
        self.kind
    }

    /// The object that raised the event. It may no longer exist when the event is handled.
    pub fn sender(&self) -> ObjectId {
        self.sender
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }
}

/// Result of a reference-event hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResponse {
    Forward,
    Absorb,
}

impl EventResponse {
    pub fn default_for(event: &ReferenceEvent) -> Self {
        if event.kind().forwarded_by_default() {
            EventResponse::Forward
        } else {
            EventResponse::Absorb
        }
    }
}
