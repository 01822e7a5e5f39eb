//! Batch colorization core: priority queue, status tracking, resource
//! governance, and the orchestrator that drives a batch through an
//! external rendering engine.

pub mod config;
pub mod error;
pub mod governor;
pub mod job;
pub mod orchestrator;
pub mod queue;
pub mod renderer;
pub mod status;
pub mod types;

pub use config::{BatchConfig, ConfigHandler};
pub use error::CoreError;
pub use governor::{CpuBackend, ResourceBackend, ResourceGovernor};
pub use job::Job;
pub use orchestrator::{BatchStatus, Orchestrator, PreviewResult};
pub use queue::JobQueue;
pub use renderer::{RenderError, RenderErrorKind, RenderParams, Renderer};
pub use status::{BatchSummary, JobState, JobStatus, StatusTracker};
pub use types::{ResourceRef, Timestamp};
