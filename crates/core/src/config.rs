//! Batch configuration and the JSON config-file loader.
//!
//! A config file is a JSON object with an optional `default` section and
//! an optional `images` section keyed by image file name. Unknown keys and
//! out-of-range values are dropped with a warning rather than failing the
//! load; structural problems (unreadable file, non-object document) are
//! configuration errors.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::renderer::RenderParams;

// ---------------------------------------------------------------------------
// Styles
// ---------------------------------------------------------------------------

/// Colorize line work only.
pub const STYLE_LINE: &str = "line";

/// Colorize line work plus shadow shading. Default.
pub const STYLE_LINE_SHADOW: &str = "line + shadow";

/// All recognized style modes.
pub const VALID_STYLES: &[&str] = &[STYLE_LINE, STYLE_LINE_SHADOW];

/// Override keys recognized in `default` and per-image config sections.
const KNOWN_OVERRIDE_KEYS: &[&str] = &["style", "seed", "num_inference_steps", "top_k"];

// ---------------------------------------------------------------------------
// Batch config
// ---------------------------------------------------------------------------

/// Batch-level settings. Validated before a batch starts; invalid settings
/// are fatal to the call that supplied them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Directory containing input images.
    pub input_dir: String,
    /// Directory where outputs are written.
    pub output_dir: String,
    /// Style reference images shared by the whole batch.
    pub reference_images: Vec<String>,
    /// Style mode, one of [`VALID_STYLES`].
    pub style: String,
    /// Seed for reproducible results.
    pub seed: u64,
    /// Diffusion step count, at least 1.
    pub num_inference_steps: u32,
    /// Number of top reference images to use, at least 1.
    pub top_k: u32,
    /// Scan the input directory recursively.
    pub recursive: bool,
    /// Overwrite existing outputs instead of renaming.
    pub overwrite: bool,
    /// Process one job, then wait for operator approval.
    pub preview_mode: bool,
    /// Upper bound on concurrent jobs. Informational today: the processing
    /// loop runs jobs strictly one at a time.
    pub max_concurrent: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            input_dir: String::new(),
            output_dir: String::new(),
            reference_images: Vec::new(),
            style: STYLE_LINE_SHADOW.to_string(),
            seed: 0,
            num_inference_steps: 10,
            top_k: 3,
            recursive: false,
            overwrite: false,
            preview_mode: false,
            max_concurrent: 1,
        }
    }
}

impl BatchConfig {
    /// Validate batch-level settings.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.input_dir.is_empty() {
            return Err(CoreError::Configuration(
                "input_dir must not be empty".to_string(),
            ));
        }
        if self.output_dir.is_empty() {
            return Err(CoreError::Configuration(
                "output_dir must not be empty".to_string(),
            ));
        }
        if !VALID_STYLES.contains(&self.style.as_str()) {
            return Err(CoreError::Configuration(format!(
                "unknown style '{}'; valid styles: {}",
                self.style,
                VALID_STYLES.join(", ")
            )));
        }
        if self.num_inference_steps < 1 {
            return Err(CoreError::Configuration(format!(
                "num_inference_steps must be at least 1, got {}",
                self.num_inference_steps
            )));
        }
        if self.top_k < 1 {
            return Err(CoreError::Configuration(format!(
                "top_k must be at least 1, got {}",
                self.top_k
            )));
        }
        if self.max_concurrent < 1 {
            return Err(CoreError::Configuration(format!(
                "max_concurrent must be at least 1, got {}",
                self.max_concurrent
            )));
        }
        Ok(())
    }

    /// Batch-default render parameters.
    pub fn render_params(&self) -> RenderParams {
        RenderParams {
            style: self.style.clone(),
            seed: self.seed,
            num_inference_steps: self.num_inference_steps,
            top_k: self.top_k,
            reference_images: self.reference_images.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config-file overrides
// ---------------------------------------------------------------------------

/// Parsed config file: batch-wide default overrides plus per-image
/// override sections.
#[derive(Debug, Default)]
pub struct ConfigHandler {
    defaults: HashMap<String, serde_json::Value>,
    per_image: HashMap<String, HashMap<String, serde_json::Value>>,
}

impl ConfigHandler {
    /// Load and sanitize a JSON config file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            CoreError::Configuration(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::parse(&raw, path)
    }

    fn parse(raw: &str, path: &Path) -> Result<Self, CoreError> {
        let doc: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
            CoreError::Configuration(format!("config file {} is not valid JSON: {e}", path.display()))
        })?;
        let doc = doc.as_object().ok_or_else(|| {
            CoreError::Configuration(format!(
                "config file {} must contain a JSON object",
                path.display()
            ))
        })?;

        let defaults = match doc.get("default") {
            Some(serde_json::Value::Object(section)) => sanitize_section(section, "default"),
            Some(other) => {
                tracing::warn!(
                    found = other_type(other),
                    "'default' section must be an object; ignoring it",
                );
                HashMap::new()
            }
            None => HashMap::new(),
        };

        let mut per_image = HashMap::new();
        match doc.get("images") {
            Some(serde_json::Value::Object(images)) => {
                for (image_name, section) in images {
                    match section.as_object() {
                        Some(section) => {
                            per_image.insert(
                                image_name.clone(),
                                sanitize_section(section, image_name),
                            );
                        }
                        None => {
                            tracing::warn!(
                                image = %image_name,
                                "per-image config must be an object; ignoring it",
                            );
                        }
                    }
                }
            }
            Some(other) => {
                tracing::warn!(
                    found = other_type(other),
                    "'images' section must be an object; ignoring it",
                );
            }
            None => {}
        }

        tracing::debug!(
            defaults = defaults.len(),
            images = per_image.len(),
            "config file loaded",
        );
        Ok(Self {
            defaults,
            per_image,
        })
    }

    /// Effective overrides for one image: the `default` section with the
    /// image's own section applied on top.
    pub fn overrides_for(&self, image_name: &str) -> HashMap<String, serde_json::Value> {
        let mut merged = self.defaults.clone();
        if let Some(overrides) = self.per_image.get(image_name) {
            for (key, value) in overrides {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Whether the file carried a section for this image.
    pub fn has_image_section(&self, image_name: &str) -> bool {
        self.per_image.contains_key(image_name)
    }
}

/// Keep only recognized keys with plausible values; everything else is
/// dropped with a warning.
fn sanitize_section(
    section: &serde_json::Map<String, serde_json::Value>,
    context: &str,
) -> HashMap<String, serde_json::Value> {
    let mut sanitized = HashMap::new();
    for (key, value) in section {
        if !KNOWN_OVERRIDE_KEYS.contains(&key.as_str()) {
            tracing::warn!(context, key = %key, "dropping unknown config key");
            continue;
        }
        let ok = match key.as_str() {
            "style" => value
                .as_str()
                .is_some_and(|s| VALID_STYLES.contains(&s)),
            "seed" => value.as_u64().is_some(),
            "num_inference_steps" | "top_k" => value.as_u64().is_some_and(|n| n >= 1),
            _ => false,
        };
        if ok {
            sanitized.insert(key.clone(), value.clone());
        } else {
            tracing::warn!(context, key = %key, value = %value, "dropping config key with invalid value");
        }
    }
    sanitized
}

fn other_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
