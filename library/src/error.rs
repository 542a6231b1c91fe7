use thiserror::Error;

use crate::reference::{NodeId, ObjectId};

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Binary encoding error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Unknown data object: {0}")]
    UnknownObject(ObjectId),
    #[error("Unknown scene node: {0}")]
    UnknownNode(NodeId),
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("Reference from {owner} to {target} would create a cycle")]
    CyclicReference { owner: ObjectId, target: ObjectId },
    #[error("Display object is no longer alive")]
    DeadDisplayObject,
    #[error("Malformed stream: {0}")]
    MalformedStream(String),
    #[error("Unsupported class: {0}")]
    UnsupportedClass(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Task error: {0}")]
    Task(String),
    #[error("Rendering error: {0}")]
    Render(String),
}

impl LibraryError {
    pub fn malformed(message: impl Into<String>) -> Self {
        LibraryError::MalformedStream(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        LibraryError::InvalidOperation(message.into())
    }

    pub fn unsupported(class: impl Into<String>) -> Self {
        LibraryError::UnsupportedClass(class.into())
    }

    pub fn task(message: impl Into<String>) -> Self {
        LibraryError::Task(message.into())
    }

    pub fn render(message: impl Into<String>) -> Self {
        LibraryError::Render(message.into())
    }
}

impl From<toml::de::Error> for LibraryError {
    fn from(err: toml::de::Error) -> Self {
        LibraryError::Config(err.to_string())
    }
}
