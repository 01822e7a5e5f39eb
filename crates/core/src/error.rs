//! Error taxonomy for batch setup and control calls.
//!
//! Render-time failures never appear here; they are recorded on the
//! failing job's status and the batch continues.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Workflow misuse: {0}")]
    Workflow(String),
}
