/// Opaque reference to an input or output resource (usually a file path).
pub type ResourceRef = String;

/// UTC timestamp used for all job and batch timing.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
