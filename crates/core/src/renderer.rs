//! Renderer seam: the external colorization engine.
//!
//! The engine is opaque, possibly slow, and may exhaust device memory.
//! Failures carry a structured [`RenderErrorKind`] so callers branch on
//! the kind, never on message text.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::ResourceRef;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure classification reported by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderErrorKind {
    /// The engine ran out of device or host memory.
    ResourceExhausted,
    /// Any other engine failure.
    Failed,
}

/// Per-job render failure. Recorded on the job's status; never fatal to
/// the batch.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct RenderError {
    pub kind: RenderErrorKind,
    pub message: String,
}

impl RenderError {
    /// Generic render failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: RenderErrorKind::Failed,
            message: message.into(),
        }
    }

    /// Out-of-memory style failure.
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self {
            kind: RenderErrorKind::ResourceExhausted,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Effective parameters for one render call: the batch defaults with any
/// per-job overrides applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderParams {
    pub style: String,
    pub seed: u64,
    pub num_inference_steps: u32,
    pub top_k: u32,
    /// Style reference images shared by the batch.
    pub reference_images: Vec<ResourceRef>,
}

impl RenderParams {
    /// Apply per-job overrides on top of these parameters.
    ///
    /// Recognized keys: `style`, `seed`, `num_inference_steps`, `top_k`.
    /// Unknown keys and type-mismatched values are dropped with a warning.
    pub fn with_overrides(&self, overrides: &HashMap<String, serde_json::Value>) -> Self {
        let mut params = self.clone();
        for (key, value) in overrides {
            match key.as_str() {
                "style" => match value.as_str() {
                    Some(style) => params.style = style.to_string(),
                    None => warn_dropped(key, value),
                },
                "seed" => match value.as_u64() {
                    Some(seed) => params.seed = seed,
                    None => warn_dropped(key, value),
                },
                "num_inference_steps" => match value.as_u64() {
                    Some(steps) if steps >= 1 => params.num_inference_steps = steps as u32,
                    _ => warn_dropped(key, value),
                },
                "top_k" => match value.as_u64() {
                    Some(top_k) if top_k >= 1 => params.top_k = top_k as u32,
                    _ => warn_dropped(key, value),
                },
                _ => {
                    tracing::warn!(key, "ignoring unknown override key");
                }
            }
        }
        params
    }
}

fn warn_dropped(key: &str, value: &serde_json::Value) {
    tracing::warn!(key, %value, "ignoring override with invalid value");
}

// ---------------------------------------------------------------------------
// Renderer trait
// ---------------------------------------------------------------------------

/// External colorization engine.
///
/// `render` turns `input` into a colorized image at `destination` and
/// returns the reference to the produced output. No timeout is imposed on
/// the call; a hung engine hangs the batch worker.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        input: &ResourceRef,
        destination: &ResourceRef,
        params: &RenderParams,
    ) -> Result<ResourceRef, RenderError>;
}
