//! Resource-pressure governor: utilization sampling and cleanup between
//! jobs.
//!
//! The governor's threshold check runs unconditionally after every job,
//! success or failure, so a single oversized job cannot leave the device
//! degraded for the remainder of the batch.

use crate::error::CoreError;

/// Default utilization fraction above which cleanup runs.
pub const DEFAULT_PRESSURE_THRESHOLD: f64 = 0.8;

/// Reclaimable-memory measurement failed; the governor treats this as
/// zero utilization and logs instead of propagating.
#[derive(Debug, thiserror::Error)]
#[error("utilization measurement failed: {0}")]
pub struct MeasurementError(pub String);

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Device-specific measurement and cleanup hooks.
pub trait ResourceBackend: Send + Sync {
    /// Short device name for logging ("cpu", "cuda", ...).
    fn name(&self) -> &'static str;

    /// Fraction of device memory currently in use, in `0.0..=1.0`.
    fn utilization_fraction(&self) -> Result<f64, MeasurementError>;

    /// Release cached allocations back to the device.
    fn release_cache(&self);

    /// Force reclamation of unreachable allocations.
    fn force_reclaim(&self);
}

/// CPU-only backend: no device cache, utilization always reads as zero.
#[derive(Debug, Default)]
pub struct CpuBackend;

impl ResourceBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn utilization_fraction(&self) -> Result<f64, MeasurementError> {
        Ok(0.0)
    }

    fn release_cache(&self) {
        tracing::trace!("no cache to release for cpu backend");
    }

    fn force_reclaim(&self) {}
}

// ---------------------------------------------------------------------------
// Governor
// ---------------------------------------------------------------------------

/// Samples utilization and cleans up when the configured threshold is
/// crossed.
pub struct ResourceGovernor {
    backend: Box<dyn ResourceBackend>,
    threshold: f64,
}

impl std::fmt::Debug for ResourceGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGovernor")
            .field("backend", &self.backend.name())
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl ResourceGovernor {
    /// Create a governor. `threshold` must be in `(0, 1]`.
    pub fn new(backend: Box<dyn ResourceBackend>, threshold: f64) -> Result<Self, CoreError> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(CoreError::Configuration(format!(
                "pressure threshold must be in (0, 1], got {threshold}"
            )));
        }
        tracing::info!(backend = backend.name(), threshold, "resource governor ready");
        Ok(Self { backend, threshold })
    }

    /// Governor with the default threshold.
    pub fn with_default_threshold(backend: Box<dyn ResourceBackend>) -> Self {
        Self {
            backend,
            threshold: DEFAULT_PRESSURE_THRESHOLD,
        }
    }

    /// Current utilization as a fraction in `0.0..=1.0`.
    ///
    /// Never fails: measurement errors are logged and read as zero.
    pub fn utilization_fraction(&self) -> f64 {
        match self.backend.utilization_fraction() {
            Ok(fraction) => fraction.clamp(0.0, 1.0),
            Err(e) => {
                tracing::warn!(backend = self.backend.name(), error = %e, "utilization measurement failed");
                0.0
            }
        }
    }

    /// Release cached allocations unconditionally.
    pub fn release_cache(&self) {
        self.backend.release_cache();
    }

    /// Clean up when utilization has crossed the threshold, otherwise a
    /// no-op. Re-measures after cleanup for diagnostics.
    pub fn maintain_if_needed(&self) {
        let usage = self.utilization_fraction();
        if usage < self.threshold {
            tracing::debug!(
                backend = self.backend.name(),
                usage,
                threshold = self.threshold,
                "utilization below threshold, no cleanup",
            );
            return;
        }

        tracing::info!(
            backend = self.backend.name(),
            usage,
            threshold = self.threshold,
            "utilization over threshold, cleaning up",
        );
        self.backend.release_cache();
        self.backend.force_reclaim();

        let after = self.utilization_fraction();
        tracing::info!(
            backend = self.backend.name(),
            before = usage,
            after,
            "cleanup finished",
        );
    }
}

// ---------------------------------------------------------------------------
// Cost estimation
// ---------------------------------------------------------------------------

/// Estimate device memory required to colorize an image, in bytes.
///
/// Closed-form, advisory only: input RGB float32 tensor, a /64 latent with
/// four channels, twice the latent for activations, four reference images
/// at input resolution, times a 1.5x overhead factor for intermediates.
/// Callers must not use this to block admission.
pub fn estimate_cost(width: u32, height: u32) -> u64 {
    let pixels = u64::from(width) * u64::from(height);

    let input = pixels * 3 * 4;
    let latent = (pixels / 64) * 4 * 4;
    let activations = latent * 2;
    let references = input * 4;

    ((input + latent + activations + references) as f64 * 1.5) as u64
}
