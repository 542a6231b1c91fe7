use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatusType {
    #[default]
    Success,
    Warning,
    Error,
    /// Results are still being computed in the background.
    Pending,
}

/// Outcome of the last evaluation of an object or modifier.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PipelineStatus {
    kind: StatusType,
    text: String,
}

impl PipelineStatus {
    pub fn new(kind: StatusType, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn success() -> Self {
        Self::default()
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(StatusType::Warning, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(StatusType::Error, text)
    }

    pub fn pending(text: impl Into<String>) -> Self {
        Self::new(StatusType::Pending, text)
    }

    pub fn kind(&self) -> StatusType {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_pending(&self) -> bool {
        self.kind == StatusType::Pending
    }

    pub fn is_error(&self) -> bool {
        self.kind == StatusType::Error
    }

    /// Keeps whichever of the two statuses is more severe; ties keep `self`.
    pub fn merge(self, other: PipelineStatus) -> PipelineStatus {
        if other.kind > self.kind { other } else { self }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.text.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{:?}: {}", self.kind, self.text)
        }
    }
}
