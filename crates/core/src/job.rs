//! Job value type: one unit of colorization work.
//!
//! A [`Job`] is immutable after creation. Ownership transfers to the
//! processing loop when the job is dequeued.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ResourceRef;

// ---------------------------------------------------------------------------
// Priority constants
// ---------------------------------------------------------------------------

/// Priority value for urgent jobs. Dequeued before all others.
pub const PRIORITY_URGENT: i32 = 10;

/// Priority value for normal jobs. Default.
pub const PRIORITY_NORMAL: i32 = 0;

/// Priority value for background jobs. Dequeued last.
pub const PRIORITY_BACKGROUND: i32 = -10;

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One unit of work: colorize `input` and write the result to `output`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, assigned at registration time.
    pub id: Uuid,
    /// Reference to the input resource (line art).
    pub input: ResourceRef,
    /// Reference to the desired output resource.
    pub output: ResourceRef,
    /// Higher priority jobs are dequeued sooner. Defaults to [`PRIORITY_NORMAL`].
    pub priority: i32,
    /// Per-job parameter overrides applied on top of the batch defaults.
    pub overrides: Option<HashMap<String, serde_json::Value>>,
}

impl Job {
    /// Create a job with a fresh id and normal priority.
    pub fn new(input: impl Into<ResourceRef>, output: impl Into<ResourceRef>) -> Self {
        Self {
            id: Uuid::new_v4(),
            input: input.into(),
            output: output.into(),
            priority: PRIORITY_NORMAL,
            overrides: None,
        }
    }

    /// Set the priority (builder style).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Attach per-job parameter overrides (builder style).
    pub fn with_overrides(mut self, overrides: HashMap<String, serde_json::Value>) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// A job is well-formed when both resource references are non-empty.
    pub fn is_well_formed(&self) -> bool {
        !self.input.is_empty() && !self.output.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_defaults_to_normal_priority() {
        let job = Job::new("in.png", "out.png");
        assert_eq!(job.priority, PRIORITY_NORMAL);
        assert!(job.overrides.is_none());
    }

    #[test]
    fn with_priority_overrides_default() {
        let job = Job::new("in.png", "out.png").with_priority(PRIORITY_URGENT);
        assert_eq!(job.priority, PRIORITY_URGENT);
    }

    #[test]
    fn job_ids_are_unique() {
        let a = Job::new("in.png", "out.png");
        let b = Job::new("in.png", "out.png");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn empty_input_is_malformed() {
        assert!(!Job::new("", "out.png").is_well_formed());
        assert!(!Job::new("in.png", "").is_well_formed());
        assert!(Job::new("in.png", "out.png").is_well_formed());
    }
}
