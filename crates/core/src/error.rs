//! Error types for the core library

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Task expired")]
    Expired,

    #[error("Missing required evidence: {}", .0.join(", "))]
    MissingEvidence(Vec<String>),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
