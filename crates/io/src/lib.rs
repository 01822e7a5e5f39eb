//! File discovery and output-path management for batch runs.
//!
//! Scanning is permissive: unreadable or corrupt files are skipped with a
//! log line, never fatal. Path construction is strict: a missing input or
//! an uncreatable output directory is an error the caller must handle
//! before any job is queued.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Extensions accepted as batch inputs, lowercase without the dot.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp"];

/// Default suffix appended to output filenames.
pub const DEFAULT_OUTPUT_SUFFIX: &str = "_colorized";

/// Numbered collision variants give up beyond this.
const MAX_COLLISION_VARIANTS: u32 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum IoError {
    #[error("directory does not exist: {0}")]
    MissingDirectory(PathBuf),
    #[error("path is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("input file does not exist: {0}")]
    MissingInput(PathBuf),
    #[error("input path is not a file: {0}")]
    NotAFile(PathBuf),
    #[error("failed to create output directory {path}: {source}")]
    CreateOutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("too many filename collisions for: {0}")]
    TooManyCollisions(PathBuf),
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Scan a directory for usable image files, sorted by path.
///
/// Non-recursive by default; `recursive` descends into subdirectories.
/// Files failing [`validate_image_file`] are skipped with a warning.
pub fn scan_directory(directory: &Path, recursive: bool) -> Result<Vec<PathBuf>, IoError> {
    if !directory.exists() {
        return Err(IoError::MissingDirectory(directory.to_path_buf()));
    }
    if !directory.is_dir() {
        return Err(IoError::NotADirectory(directory.to_path_buf()));
    }
    tracing::info!(directory = %directory.display(), recursive, "scanning for images");

    let mut walker = WalkDir::new(directory);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut images = Vec::new();
    let mut skipped = 0usize;
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !has_image_extension(path) {
            tracing::debug!(path = %path.display(), "skipping non-image file");
            continue;
        }
        if validate_image_file(path) {
            images.push(path.to_path_buf());
        } else {
            skipped += 1;
            tracing::warn!(path = %path.display(), "skipping invalid image file");
        }
    }

    images.sort();
    tracing::info!(found = images.len(), skipped, "scan complete");
    Ok(images)
}

/// Whether a file is usable as a batch input: a supported extension, a
/// non-empty regular file, and a header the image decoder recognizes.
/// Does not decode pixel data.
pub fn validate_image_file(path: &Path) -> bool {
    if !has_image_extension(path) {
        tracing::debug!(path = %path.display(), "unsupported extension");
        return false;
    }
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => {}
        Ok(_) => {
            tracing::debug!(path = %path.display(), "not a regular non-empty file");
            return false;
        }
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "file is not accessible");
            return false;
        }
    }
    match image::image_dimensions(path) {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "unreadable image header");
            false
        }
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
}

// ---------------------------------------------------------------------------
// Output paths
// ---------------------------------------------------------------------------

/// Build the output path for one input: the input's filename with
/// `suffix` appended to the stem, placed in `output_dir` (created if
/// missing). The extension is preserved.
pub fn create_output_path(
    input: &Path,
    output_dir: &Path,
    suffix: &str,
) -> Result<PathBuf, IoError> {
    if !input.exists() {
        return Err(IoError::MissingInput(input.to_path_buf()));
    }
    if !input.is_file() {
        return Err(IoError::NotAFile(input.to_path_buf()));
    }

    std::fs::create_dir_all(output_dir).map_err(|source| IoError::CreateOutputDir {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let filename = match input.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}{suffix}.{ext}"),
        None => format!("{stem}{suffix}"),
    };
    let output = output_dir.join(filename);
    tracing::debug!(input = %input.display(), output = %output.display(), "output path created");
    Ok(output)
}

/// Resolve a collision on `path`. With `overwrite` the path is returned
/// as-is; otherwise numbered variants (`name_1.png`, `name_2.png`, ...)
/// are tried until a free one is found.
pub fn handle_filename_collision(path: &Path, overwrite: bool) -> Result<PathBuf, IoError> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }
    if overwrite {
        tracing::info!(path = %path.display(), "overwriting existing file");
        return Ok(path.to_path_buf());
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let extension = path.extension().and_then(|e| e.to_str());

    for counter in 1..=MAX_COLLISION_VARIANTS {
        let filename = match extension {
            Some(ext) => format!("{stem}_{counter}.{ext}"),
            None => format!("{stem}_{counter}"),
        };
        let candidate = parent.join(filename);
        if !candidate.exists() {
            tracing::info!(
                requested = %path.display(),
                resolved = %candidate.display(),
                "filename collision resolved",
            );
            return Ok(candidate);
        }
    }
    Err(IoError::TooManyCollisions(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use image::{Rgb, RgbImage};

    fn save_png(path: &Path) {
        RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]))
            .save(path)
            .unwrap();
    }

    // -- validation -----------------------------------------------------------

    #[test]
    fn valid_images_pass_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        save_png(&path);
        assert!(validate_image_file(&path));
    }

    #[test]
    fn wrong_extension_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();
        assert!(!validate_image_file(&path));
    }

    #[test]
    fn empty_and_corrupt_files_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.png");
        std::fs::write(&empty, b"").unwrap();
        assert!(!validate_image_file(&empty));

        let corrupt = dir.path().join("corrupt.png");
        std::fs::write(&corrupt, b"not a png").unwrap();
        assert!(!validate_image_file(&corrupt));
    }

    #[test]
    fn missing_files_fail_validation() {
        assert!(!validate_image_file(Path::new("/nonexistent/page.png")));
    }

    // -- scanning -------------------------------------------------------------

    #[test]
    fn scan_finds_images_and_skips_everything_else() {
        let dir = tempfile::tempdir().unwrap();
        save_png(&dir.path().join("b.png"));
        save_png(&dir.path().join("a.png"));
        std::fs::write(dir.path().join("readme.txt"), b"text").unwrap();
        std::fs::write(dir.path().join("broken.png"), b"junk").unwrap();

        let images = scan_directory(dir.path(), false).unwrap();
        let names: Vec<_> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }

    #[test]
    fn scan_is_shallow_unless_recursive() {
        let dir = tempfile::tempdir().unwrap();
        save_png(&dir.path().join("top.png"));
        let nested = dir.path().join("chapter1");
        std::fs::create_dir(&nested).unwrap();
        save_png(&nested.join("deep.png"));

        assert_eq!(scan_directory(dir.path(), false).unwrap().len(), 1);
        assert_eq!(scan_directory(dir.path(), true).unwrap().len(), 2);
    }

    #[test]
    fn scan_rejects_missing_or_non_directories() {
        assert_matches!(
            scan_directory(Path::new("/nonexistent"), false),
            Err(IoError::MissingDirectory(_))
        );

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("page.png");
        save_png(&file);
        assert_matches!(
            scan_directory(&file, false),
            Err(IoError::NotADirectory(_))
        );
    }

    #[test]
    fn extension_matching_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.PNG");
        save_png(&path);
        assert_eq!(scan_directory(dir.path(), false).unwrap().len(), 1);
    }

    // -- output paths ---------------------------------------------------------

    #[test]
    fn output_path_appends_suffix_and_keeps_extension() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("page1.png");
        save_png(&input);
        let out_dir = dir.path().join("out");

        let output = create_output_path(&input, &out_dir, DEFAULT_OUTPUT_SUFFIX).unwrap();
        assert_eq!(output, out_dir.join("page1_colorized.png"));
        assert!(out_dir.is_dir());
    }

    #[test]
    fn output_path_requires_an_existing_input_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            create_output_path(&dir.path().join("ghost.png"), dir.path(), "_x"),
            Err(IoError::MissingInput(_))
        );
        assert_matches!(
            create_output_path(dir.path(), dir.path(), "_x"),
            Err(IoError::NotAFile(_))
        );
    }

    // -- collisions -----------------------------------------------------------

    #[test]
    fn no_collision_returns_the_path_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.png");
        assert_eq!(handle_filename_collision(&path, false).unwrap(), path);
    }

    #[test]
    fn overwrite_keeps_the_original_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        save_png(&path);
        assert_eq!(handle_filename_collision(&path, true).unwrap(), path);
    }

    #[test]
    fn collisions_get_numbered_variants() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        save_png(&path);
        save_png(&dir.path().join("page_1.png"));

        let resolved = handle_filename_collision(&path, false).unwrap();
        assert_eq!(resolved, dir.path().join("page_2.png"));
    }
}
