//! Per-job state machine and aggregate batch summary.
//!
//! Each registered job owns one [`JobStatus`] from registration until the
//! tracker is cleared. States move `Pending -> Processing -> terminal`
//! only; the terminal states never transition further.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::types::{ResourceRef, Timestamp};

// ---------------------------------------------------------------------------
// Job state
// ---------------------------------------------------------------------------

/// Processing state of a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Registered, not yet picked up by the loop.
    Pending,
    /// Currently in the renderer.
    Processing,
    /// Rendered successfully.
    Completed,
    /// The renderer reported an error.
    Failed,
    /// Cancelled before it was processed.
    Cancelled,
}

impl JobState {
    /// Completed, Failed and Cancelled are final: no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Human-readable label for display.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }
}

// ---------------------------------------------------------------------------
// Per-job status
// ---------------------------------------------------------------------------

/// Status record for one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: Uuid,
    pub state: JobState,
    /// Stamped on the transition into `Processing`.
    pub started_at: Option<Timestamp>,
    /// Stamped once, on the first transition into a terminal state.
    pub ended_at: Option<Timestamp>,
    pub error_message: Option<String>,
    pub output: Option<ResourceRef>,
}

impl JobStatus {
    fn pending(id: Uuid) -> Self {
        Self {
            id,
            state: JobState::Pending,
            started_at: None,
            ended_at: None,
            error_message: None,
            output: None,
        }
    }

    /// Wall-clock processing time: end minus start when finished, elapsed
    /// since start when still in flight.
    pub fn processing_time(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        Some(self.ended_at.unwrap_or_else(Utc::now) - started)
    }
}

// ---------------------------------------------------------------------------
// Batch summary
// ---------------------------------------------------------------------------

/// Aggregate counts and timing for the whole batch. Derived on demand,
/// never stored.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub batch_start: Option<Timestamp>,
    pub batch_end: Option<Timestamp>,
}

impl BatchSummary {
    /// True when every job has reached a terminal state.
    pub fn is_complete(&self) -> bool {
        self.completed + self.failed + self.cancelled == self.total
    }

    /// Completed jobs as a percentage of the batch.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.completed as f64 / self.total as f64) * 100.0
    }

    /// Elapsed batch time: end minus start when finished, elapsed since
    /// start while still running.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let start = self.batch_start?;
        Some(self.batch_end.unwrap_or_else(Utc::now) - start)
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Tracks the status of every job in a batch.
#[derive(Debug, Default)]
pub struct StatusTracker {
    statuses: HashMap<Uuid, JobStatus>,
    batch_start: Option<Timestamp>,
    batch_end: Option<Timestamp>,
}

impl StatusTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job in `Pending`. The first registration stamps the
    /// batch start time.
    pub fn add_job(&mut self, id: Uuid) -> Result<(), CoreError> {
        if self.statuses.contains_key(&id) {
            return Err(CoreError::Conflict(format!("job {id} is already tracked")));
        }
        self.statuses.insert(id, JobStatus::pending(id));
        if self.batch_start.is_none() {
            self.batch_start = Some(Utc::now());
        }
        Ok(())
    }

    /// Apply a state transition.
    ///
    /// `Pending -> Processing` stamps `started_at`; the first transition
    /// into a terminal state stamps `ended_at`. A job already in a terminal
    /// state is never modified again: repeated terminal updates are ignored
    /// (logged at warn level when the requested state differs). When the
    /// update makes every job terminal, the batch end time is stamped
    /// exactly once.
    pub fn update_state(
        &mut self,
        id: Uuid,
        new_state: JobState,
        error_message: Option<String>,
        output: Option<ResourceRef>,
    ) -> Result<(), CoreError> {
        let status = self
            .statuses
            .get_mut(&id)
            .ok_or(CoreError::NotFound { entity: "job", id })?;

        if status.state.is_terminal() {
            if new_state != status.state {
                tracing::warn!(
                    job_id = %id,
                    current = status.state.label(),
                    requested = new_state.label(),
                    "ignoring state update for a job already in a terminal state",
                );
            }
            return Ok(());
        }

        let now = Utc::now();

        if status.state == JobState::Pending && new_state == JobState::Processing {
            status.started_at = Some(now);
        }
        if new_state.is_terminal() && status.ended_at.is_none() {
            status.ended_at = Some(now);
        }

        status.state = new_state;
        if let Some(message) = error_message {
            status.error_message = Some(message);
        }
        if let Some(output) = output {
            status.output = Some(output);
        }

        if self.batch_end.is_none() && self.summary().is_complete() {
            self.batch_end = Some(now);
        }

        Ok(())
    }

    /// Status of one job.
    pub fn status(&self, id: Uuid) -> Result<&JobStatus, CoreError> {
        self.statuses
            .get(&id)
            .ok_or(CoreError::NotFound { entity: "job", id })
    }

    /// All tracked statuses, in no particular order.
    pub fn all(&self) -> Vec<&JobStatus> {
        self.statuses.values().collect()
    }

    /// Aggregate counts and timing for the batch.
    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            total: self.statuses.len(),
            batch_start: self.batch_start,
            batch_end: self.batch_end,
            ..BatchSummary::default()
        };
        for status in self.statuses.values() {
            match status.state {
                JobState::Pending => summary.pending += 1,
                JobState::Processing => summary.processing += 1,
                JobState::Completed => summary.completed += 1,
                JobState::Failed => summary.failed += 1,
                JobState::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    /// Ids of all jobs currently in `state`.
    pub fn ids_in_state(&self, state: JobState) -> Vec<Uuid> {
        self.statuses
            .values()
            .filter(|status| status.state == state)
            .map(|status| status.id)
            .collect()
    }

    /// Whether `id` is tracked.
    pub fn contains(&self, id: Uuid) -> bool {
        self.statuses.contains_key(&id)
    }

    /// Number of tracked jobs.
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    /// True when no jobs are tracked.
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Drop all tracked statuses and batch timing.
    pub fn clear(&mut self) {
        self.statuses.clear();
        self.batch_start = None;
        self.batch_end = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn tracked(n: usize) -> (StatusTracker, Vec<Uuid>) {
        let mut tracker = StatusTracker::new();
        let ids: Vec<Uuid> = (0..n).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            tracker.add_job(*id).unwrap();
        }
        (tracker, ids)
    }

    // -- registration ---------------------------------------------------------

    #[test]
    fn add_job_starts_pending() {
        let (tracker, ids) = tracked(1);
        assert_eq!(tracker.status(ids[0]).unwrap().state, JobState::Pending);
    }

    #[test]
    fn duplicate_id_is_a_conflict() {
        let (mut tracker, ids) = tracked(1);
        assert_matches!(tracker.add_job(ids[0]), Err(CoreError::Conflict(_)));
    }

    #[test]
    fn first_registration_stamps_batch_start() {
        let mut tracker = StatusTracker::new();
        assert!(tracker.summary().batch_start.is_none());
        tracker.add_job(Uuid::new_v4()).unwrap();
        assert!(tracker.summary().batch_start.is_some());
    }

    // -- transitions ----------------------------------------------------------

    #[test]
    fn unknown_id_is_not_found() {
        let mut tracker = StatusTracker::new();
        assert_matches!(
            tracker.update_state(Uuid::new_v4(), JobState::Processing, None, None),
            Err(CoreError::NotFound { .. })
        );
    }

    #[test]
    fn pending_to_processing_stamps_start() {
        let (mut tracker, ids) = tracked(1);
        tracker
            .update_state(ids[0], JobState::Processing, None, None)
            .unwrap();
        let status = tracker.status(ids[0]).unwrap();
        assert_eq!(status.state, JobState::Processing);
        assert!(status.started_at.is_some());
        assert!(status.ended_at.is_none());
    }

    #[test]
    fn terminal_transition_stamps_end_once() {
        let (mut tracker, ids) = tracked(1);
        tracker
            .update_state(ids[0], JobState::Processing, None, None)
            .unwrap();
        tracker
            .update_state(ids[0], JobState::Completed, None, Some("out.png".into()))
            .unwrap();
        let ended = tracker.status(ids[0]).unwrap().ended_at;
        assert!(ended.is_some());

        // A repeated terminal update must not move the timestamp or state.
        tracker
            .update_state(ids[0], JobState::Failed, Some("late".into()), None)
            .unwrap();
        let status = tracker.status(ids[0]).unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.ended_at, ended);
        assert!(status.error_message.is_none());
        assert_eq!(status.output.as_deref(), Some("out.png"));
    }

    #[test]
    fn failed_records_error_message() {
        let (mut tracker, ids) = tracked(1);
        tracker
            .update_state(ids[0], JobState::Failed, Some("boom".into()), None)
            .unwrap();
        let status = tracker.status(ids[0]).unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.error_message.as_deref(), Some("boom"));
    }

    // -- summary --------------------------------------------------------------

    #[test]
    fn summary_counts_always_sum_to_total() {
        let (mut tracker, ids) = tracked(5);
        tracker
            .update_state(ids[0], JobState::Processing, None, None)
            .unwrap();
        tracker
            .update_state(ids[1], JobState::Completed, None, None)
            .unwrap();
        tracker
            .update_state(ids[2], JobState::Failed, Some("err".into()), None)
            .unwrap();
        tracker
            .update_state(ids[3], JobState::Cancelled, None, None)
            .unwrap();

        let s = tracker.summary();
        assert_eq!(s.total, 5);
        assert_eq!(
            s.pending + s.processing + s.completed + s.failed + s.cancelled,
            s.total
        );
    }

    #[test]
    fn batch_end_stamped_when_all_terminal() {
        let (mut tracker, ids) = tracked(2);
        tracker
            .update_state(ids[0], JobState::Completed, None, None)
            .unwrap();
        assert!(tracker.summary().batch_end.is_none());

        tracker
            .update_state(ids[1], JobState::Cancelled, None, None)
            .unwrap();
        let summary = tracker.summary();
        assert!(summary.is_complete());
        let end = summary.batch_end;
        assert!(end.is_some());

        // Further no-op updates must not move the batch end time.
        tracker
            .update_state(ids[1], JobState::Cancelled, None, None)
            .unwrap();
        assert_eq!(tracker.summary().batch_end, end);
    }

    #[test]
    fn success_rate_is_completed_fraction() {
        let (mut tracker, ids) = tracked(4);
        for id in &ids[..3] {
            tracker
                .update_state(*id, JobState::Completed, None, None)
                .unwrap();
        }
        tracker
            .update_state(ids[3], JobState::Failed, None, None)
            .unwrap();
        assert!((tracker.summary().success_rate() - 75.0).abs() < f64::EPSILON);
    }

    // -- queries --------------------------------------------------------------

    #[test]
    fn ids_in_state_filters() {
        let (mut tracker, ids) = tracked(3);
        tracker
            .update_state(ids[1], JobState::Completed, None, None)
            .unwrap();
        let pending = tracker.ids_in_state(JobState::Pending);
        assert_eq!(pending.len(), 2);
        assert!(!pending.contains(&ids[1]));
    }

    #[test]
    fn clear_resets_everything() {
        let (mut tracker, _) = tracked(3);
        tracker.clear();
        assert!(tracker.is_empty());
        assert!(tracker.summary().batch_start.is_none());
        assert_eq!(tracker.summary().total, 0);
    }
}
