//! Batch orchestrator: the processing loop and its control protocol.
//!
//! One orchestrator is one batch session. All mutable state (queue,
//! tracker, control flags, preview gate) lives behind a single mutex so
//! control calls arriving from other tasks always observe a consistent
//! view. The lock is never held across a renderer call: the loop locks to
//! check flags and dequeue, renders unlocked, then locks again to record
//! the outcome.
//!
//! The preview gate is the only suspension point. It is an early return,
//! not a blocking wait; callers poll [`Orchestrator::is_awaiting_preview_approval`]
//! or arrange their own notification.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::error::CoreError;
use crate::governor::ResourceGovernor;
use crate::job::Job;
use crate::queue::JobQueue;
use crate::renderer::{RenderError, RenderErrorKind, RenderParams, Renderer};
use crate::status::{BatchSummary, JobState, JobStatus, StatusTracker};
use crate::types::ResourceRef;

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Point-in-time view of the batch, safe to hand to any caller.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub summary: BatchSummary,
    pub is_processing: bool,
    pub is_paused: bool,
    pub is_cancelled: bool,
    pub queue_size: usize,
    pub awaiting_preview_approval: bool,
}

/// Captured outcome of the single previewed job.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewResult {
    pub job_id: Uuid,
    pub input: ResourceRef,
    /// Produced output reference, when the preview succeeded.
    pub output: Option<ResourceRef>,
    /// Render error message, when it failed.
    pub error: Option<String>,
    pub status: Option<JobStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PreviewPhase {
    NotStarted,
    AwaitingApproval,
    Approved,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct Inner {
    queue: JobQueue,
    tracker: StatusTracker,
    processing: bool,
    paused: bool,
    cancelled: bool,
    preview_phase: PreviewPhase,
    preview_result: Option<PreviewResult>,
}

/// Coordinates one batch: owns the queue, the status tracker and the
/// preview gate, drives the renderer, and exposes the control surface.
pub struct Orchestrator {
    config: BatchConfig,
    renderer: Arc<dyn Renderer>,
    governor: ResourceGovernor,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("governor", &self.governor)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create a session for one batch. Fails fast on invalid configuration.
    pub fn new(
        config: BatchConfig,
        renderer: Arc<dyn Renderer>,
        governor: ResourceGovernor,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        tracing::info!(
            preview_mode = config.preview_mode,
            style = %config.style,
            "orchestrator ready",
        );
        Ok(Self {
            config,
            renderer,
            governor,
            inner: Mutex::new(Inner {
                queue: JobQueue::new(),
                tracker: StatusTracker::new(),
                processing: false,
                paused: false,
                cancelled: false,
                preview_phase: PreviewPhase::NotStarted,
                preview_result: None,
            }),
        })
    }

    // -- registration -------------------------------------------------------

    /// Register jobs for processing. Returns the number accepted.
    ///
    /// Malformed jobs (empty resource references) and duplicate ids are
    /// skipped with a warning. An empty list, or a list with no valid
    /// jobs, is a validation error and registers nothing.
    pub async fn add_jobs(&self, jobs: Vec<Job>) -> Result<usize, CoreError> {
        if jobs.is_empty() {
            return Err(CoreError::Validation(
                "cannot add jobs: the job list is empty".to_string(),
            ));
        }

        let mut inner = self.inner.lock().await;
        let mut added = 0usize;
        let mut skipped = 0usize;
        for job in jobs {
            if !job.is_well_formed() {
                tracing::warn!(job_id = %job.id, "skipping job with empty input or output reference");
                skipped += 1;
                continue;
            }
            if let Err(e) = inner.tracker.add_job(job.id) {
                tracing::warn!(job_id = %job.id, error = %e, "skipping job");
                skipped += 1;
                continue;
            }
            inner.queue.enqueue(job);
            added += 1;
        }

        if added == 0 {
            return Err(CoreError::Validation(format!(
                "no valid jobs added ({skipped} rejected)"
            )));
        }
        tracing::info!(added, skipped, "jobs registered");
        Ok(added)
    }

    // -- control surface ----------------------------------------------------

    /// Start processing the queued jobs.
    ///
    /// In preview mode the first call processes exactly one job and
    /// returns with the batch suspended at the preview gate. Otherwise the
    /// call drains the queue and returns when the batch finishes, pauses,
    /// or is cancelled.
    pub async fn start(&self) -> Result<(), CoreError> {
        let run_preview = {
            let mut inner = self.inner.lock().await;
            if inner.queue.is_empty() {
                return Err(CoreError::Validation(
                    "cannot start processing: the queue is empty".to_string(),
                ));
            }
            if inner.processing {
                tracing::warn!("processing is already in progress");
                return Ok(());
            }
            if self.config.preview_mode && inner.preview_phase == PreviewPhase::AwaitingApproval {
                tracing::info!("preview is awaiting approval; approve or reject it first");
                return Ok(());
            }

            inner.processing = true;
            inner.cancelled = false;
            inner.paused = false;
            self.config.preview_mode && inner.preview_phase == PreviewPhase::NotStarted
        };

        if run_preview {
            tracing::info!("preview mode enabled, processing first job only");
            self.run_preview().await;
        } else {
            self.run_loop().await;
        }
        Ok(())
    }

    /// Request a pause. The in-flight job finishes; remaining jobs stay
    /// pending. Warns and does nothing when not processing or already
    /// paused.
    pub async fn pause(&self) {
        let mut inner = self.inner.lock().await;
        if !inner.processing {
            tracing::warn!("cannot pause: processing is not active");
            return;
        }
        if inner.paused {
            tracing::warn!("processing is already paused");
            return;
        }
        tracing::info!("pausing batch processing");
        inner.paused = true;
    }

    /// Resume a paused batch and drain the remaining queue. Warns and does
    /// nothing when not paused.
    pub async fn resume(&self) {
        {
            let mut inner = self.inner.lock().await;
            if !inner.paused {
                tracing::warn!("cannot resume: processing is not paused");
                return;
            }
            tracing::info!("resuming batch processing");
            inner.paused = false;
            if inner.processing {
                // The loop has not yet observed the pause; clearing the
                // flag is enough, it keeps running.
                return;
            }
            inner.processing = true;
        }
        self.run_loop().await;
    }

    /// Request cancellation. Cooperative: the in-flight job finishes, then
    /// every remaining job is marked cancelled. Warns and does nothing
    /// when not processing.
    pub async fn cancel(&self) {
        let mut inner = self.inner.lock().await;
        if !inner.processing {
            tracing::warn!("cannot cancel: processing is not active");
            return;
        }
        if inner.cancelled {
            tracing::warn!("processing is already cancelled");
            return;
        }
        tracing::info!("cancelling batch processing");
        inner.cancelled = true;
    }

    /// Snapshot of the batch state.
    pub async fn status(&self) -> BatchStatus {
        let inner = self.inner.lock().await;
        BatchStatus {
            summary: inner.tracker.summary(),
            is_processing: inner.processing,
            is_paused: inner.paused,
            is_cancelled: inner.cancelled,
            queue_size: inner.queue.len(),
            awaiting_preview_approval: inner.preview_phase == PreviewPhase::AwaitingApproval,
        }
    }

    /// Status of one job.
    pub async fn job_status(&self, id: Uuid) -> Result<JobStatus, CoreError> {
        let inner = self.inner.lock().await;
        inner.tracker.status(id).cloned()
    }

    // -- preview protocol ---------------------------------------------------

    /// Whether this session runs with the preview gate enabled.
    pub fn is_preview_mode(&self) -> bool {
        self.config.preview_mode
    }

    /// Whether the batch is suspended at the preview gate.
    pub async fn is_awaiting_preview_approval(&self) -> bool {
        self.inner.lock().await.preview_phase == PreviewPhase::AwaitingApproval
    }

    /// The captured preview outcome, if one exists.
    pub async fn preview_result(&self) -> Option<PreviewResult> {
        self.inner.lock().await.preview_result.clone()
    }

    /// Approve the preview and drain the remaining queue. The previewed
    /// job is not re-processed.
    ///
    /// Fails with a workflow error when preview mode is off or nothing has
    /// been previewed; approving twice is a warning no-op.
    pub async fn approve_preview(&self) -> Result<(), CoreError> {
        {
            let mut inner = self.inner.lock().await;
            if !self.config.preview_mode {
                return Err(CoreError::Workflow(
                    "cannot approve preview: preview mode is not enabled".to_string(),
                ));
            }
            match inner.preview_phase {
                PreviewPhase::NotStarted => {
                    return Err(CoreError::Workflow(
                        "cannot approve preview: no preview has been processed".to_string(),
                    ));
                }
                PreviewPhase::Approved => {
                    tracing::warn!("preview has already been approved");
                    return Ok(());
                }
                PreviewPhase::AwaitingApproval => {}
            }
            tracing::info!(remaining = inner.queue.len(), "preview approved, continuing");
            inner.preview_phase = PreviewPhase::Approved;
            inner.processing = true;
        }
        self.run_loop().await;
        Ok(())
    }

    /// Reject the preview: discard the captured result, reset the gate,
    /// and leave the remaining queue untouched so the caller can adjust
    /// parameters and start again.
    pub async fn reject_preview(&self) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        if !self.config.preview_mode {
            return Err(CoreError::Workflow(
                "cannot reject preview: preview mode is not enabled".to_string(),
            ));
        }
        if inner.preview_phase == PreviewPhase::NotStarted {
            return Err(CoreError::Workflow(
                "cannot reject preview: no preview has been processed".to_string(),
            ));
        }
        tracing::info!(
            remaining = inner.queue.len(),
            "preview rejected, remaining jobs stay queued",
        );
        inner.preview_phase = PreviewPhase::NotStarted;
        inner.preview_result = None;
        inner.processing = false;
        Ok(())
    }

    // -- processing loop ----------------------------------------------------

    /// Process exactly one job and suspend at the preview gate.
    async fn run_preview(&self) {
        let job = {
            let mut inner = self.inner.lock().await;
            match inner.queue.dequeue() {
                Some(job) => job,
                None => {
                    // start() verified the queue was non-empty.
                    tracing::error!("preview dequeue found an empty queue");
                    inner.processing = false;
                    return;
                }
            }
        };

        tracing::info!(job_id = %job.id, input = %job.input, "processing preview job");
        let outcome = self.execute_job(&job).await;

        {
            let mut inner = self.inner.lock().await;
            let status = inner.tracker.status(job.id).ok().cloned();
            let (output, error) = match outcome {
                Ok(output) => (Some(output), None),
                Err(e) => (None, Some(e.to_string())),
            };
            inner.preview_result = Some(PreviewResult {
                job_id: job.id,
                input: job.input.clone(),
                output,
                error,
                status,
            });
            inner.preview_phase = PreviewPhase::AwaitingApproval;
            tracing::info!(
                remaining = inner.queue.len(),
                "preview complete, awaiting approval",
            );
        }
        self.governor.maintain_if_needed();
    }

    /// Drain the queue until it is empty, paused, or cancelled.
    ///
    /// Every exit clears `processing` in the same critical section as the
    /// exit decision, so a concurrent `resume()` that still sees
    /// `processing == true` can rely on the loop taking at least one more
    /// iteration.
    async fn run_loop(&self) {
        loop {
            let job = {
                let mut inner = self.inner.lock().await;
                if inner.cancelled {
                    // Bulk-cancel under the lock so no job can be both
                    // dequeued for processing and marked cancelled.
                    let mut drained = 0usize;
                    while let Some(item) = inner.queue.dequeue() {
                        if let Err(e) =
                            inner
                                .tracker
                                .update_state(item.id, JobState::Cancelled, None, None)
                        {
                            tracing::error!(job_id = %item.id, error = %e, "failed to mark job cancelled");
                        }
                        drained += 1;
                    }
                    tracing::info!(cancelled = drained, "processing cancelled");
                    inner.processing = false;
                    break;
                }
                if inner.paused {
                    tracing::info!(remaining = inner.queue.len(), "processing paused");
                    inner.processing = false;
                    break;
                }
                match inner.queue.dequeue() {
                    Some(job) => job,
                    None => {
                        inner.processing = false;
                        break;
                    }
                }
            };

            let _ = self.execute_job(&job).await;
            self.governor.maintain_if_needed();
        }

        let summary = self.inner.lock().await.tracker.summary();
        self.governor.release_cache();
        tracing::info!(
            total = summary.total,
            completed = summary.completed,
            failed = summary.failed,
            cancelled = summary.cancelled,
            pending = summary.pending,
            "batch loop finished",
        );
        if let Some(elapsed) = summary.elapsed() {
            if summary.is_complete() {
                tracing::info!(
                    elapsed_secs = elapsed.num_milliseconds() as f64 / 1000.0,
                    success_rate = summary.success_rate(),
                    "batch complete",
                );
            }
        }
    }

    /// Run one job through the renderer and record the outcome.
    ///
    /// Nothing that happens in here may abort the batch: render failures
    /// are recorded on the job's status, and a panicking renderer is
    /// contained by running it on its own task.
    async fn execute_job(&self, job: &Job) -> Result<ResourceRef, RenderError> {
        {
            let mut inner = self.inner.lock().await;
            if let Err(e) = inner
                .tracker
                .update_state(job.id, JobState::Processing, None, None)
            {
                tracing::error!(job_id = %job.id, error = %e, "failed to mark job as processing");
            }
        }

        let params = self.params_for(job);
        let renderer = Arc::clone(&self.renderer);
        let input = job.input.clone();
        let destination = job.output.clone();
        let handle =
            tokio::spawn(async move { renderer.render(&input, &destination, &params).await });
        let outcome = match handle.await {
            Ok(result) => result,
            Err(e) => Err(RenderError::failed(format!("renderer task aborted: {e}"))),
        };

        let exhausted = {
            let mut inner = self.inner.lock().await;
            match &outcome {
                Ok(output) => {
                    if let Err(e) = inner.tracker.update_state(
                        job.id,
                        JobState::Completed,
                        None,
                        Some(output.clone()),
                    ) {
                        tracing::error!(job_id = %job.id, error = %e, "failed to mark job completed");
                    }
                    tracing::info!(job_id = %job.id, output = %output, "job completed");
                    false
                }
                Err(err) => {
                    tracing::error!(
                        job_id = %job.id,
                        input = %job.input,
                        kind = ?err.kind,
                        error = %err,
                        "job failed, continuing with remaining jobs",
                    );
                    if let Err(e) = inner.tracker.update_state(
                        job.id,
                        JobState::Failed,
                        Some(err.to_string()),
                        None,
                    ) {
                        tracing::error!(job_id = %job.id, error = %e, "failed to mark job failed");
                    }
                    err.kind == RenderErrorKind::ResourceExhausted
                }
            }
        };

        if exhausted {
            // Reclaim immediately rather than waiting for the between-jobs
            // maintenance pass.
            self.governor.release_cache();
            self.governor.maintain_if_needed();
        }
        outcome
    }

    /// Effective render parameters for one job.
    fn params_for(&self, job: &Job) -> RenderParams {
        let params = self.config.render_params();
        match &job.overrides {
            Some(overrides) => params.with_overrides(overrides),
            None => params,
        }
    }
}
