use std::fs;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::shared::constants::{DETECTION_MODEL_NAME, DETECTION_MODEL_URL};

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("failed to create models directory: {0}")]
    ModelsDir(#[source] std::io::Error),
    #[error("request for {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("transfer from {url} interrupted: {source}")]
    Transfer {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to stage model at {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no download URL known for model {0}")]
    UnknownModel(String),
}

/// Progress callback: `(bytes_downloaded, total_bytes)`.
/// `total_bytes` is 0 if the server didn't provide Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Streaming copy buffer; also the progress-report granularity.
const TRANSFER_CHUNK: usize = 64 * 1024;

/// Short aliases accepted in configuration, normalized to canonical
/// model file names.
const MODEL_ALIASES: [(&str, &str); 5] = [
    ("medium", "yolo11m"),
    ("m", "yolo11m"),
    ("large", "yolo11l"),
    ("l", "yolo11l"),
    ("x", "yolo11x"),
];

/// Convert a configured model identifier to a canonical `.onnx` file name.
pub fn normalize_name(model: &str) -> String {
    let lower = model.to_lowercase();
    let base = MODEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| model.to_string());

    if base.ends_with(".onnx") {
        base
    } else {
        format!("{base}.onnx")
    }
}

/// Resolve a model file by configured identifier, checking known locations
/// before downloading.
///
/// Resolution order:
/// 1. The identifier as a literal path
/// 2. The project `models/` directory
/// 3. User cache directory (platform-specific)
/// 4. Download into the project `models/` directory
pub fn resolve(
    model: &str,
    models_dir: &Path,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    if Path::new(model).is_file() {
        return Ok(PathBuf::from(model));
    }

    let name = normalize_name(model);

    let local = models_dir.join(&name);
    if local.exists() {
        return Ok(local);
    }

    if let Some(cached) = user_cache_dir().map(|d| d.join(&name)) {
        if cached.exists() {
            return Ok(cached);
        }
    }

    if name != DETECTION_MODEL_NAME {
        return Err(ModelResolveError::UnknownModel(name));
    }

    fs::create_dir_all(models_dir).map_err(ModelResolveError::ModelsDir)?;
    fetch(DETECTION_MODEL_URL, &local, progress)?;
    Ok(local)
}

/// Platform cache directory used as a secondary weights location,
/// e.g. `~/.cache/railwatch/models/` on Linux.
pub fn user_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("railwatch").join("models"))
}

/// Stream the weights into a staging file next to the destination, then
/// move it into place. An interrupted transfer removes the staging file,
/// so a half-written download never masquerades as a usable model.
fn fetch(url: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<(), ModelResolveError> {
    log::info!("Downloading {url} to {}", dest.display());

    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| ModelResolveError::Request {
            url: url.to_string(),
            source: e,
        })?;
    let expected = response.content_length().unwrap_or(0);

    let staging = dest.with_extension("download");
    let stage_err = |e: std::io::Error| ModelResolveError::Stage {
        path: staging.clone(),
        source: e,
    };

    let copied = (|| {
        let file = fs::File::create(&staging).map_err(&stage_err)?;
        let mut sink = BufWriter::new(file);
        let mut chunk = [0u8; TRANSFER_CHUNK];
        let mut received: u64 = 0;

        loop {
            let n = response
                .read(&mut chunk)
                .map_err(|e| ModelResolveError::Transfer {
                    url: url.to_string(),
                    source: e,
                })?;
            if n == 0 {
                break;
            }
            sink.write_all(&chunk[..n]).map_err(&stage_err)?;
            received += n as u64;
            if let Some(ref report) = progress {
                report(received, expected);
            }
        }

        let file = sink.into_inner().map_err(|e| stage_err(e.into_error()))?;
        file.sync_all().map_err(&stage_err)
    })();

    if let Err(e) = copied {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }

    fs::rename(&staging, dest).map_err(stage_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("m", "yolo11m.onnx")]
    #[case("medium", "yolo11m.onnx")]
    #[case("L", "yolo11l.onnx")]
    #[case("yolo11m", "yolo11m.onnx")]
    #[case("yolo11m.onnx", "yolo11m.onnx")]
    #[case("custom_model", "custom_model.onnx")]
    fn test_normalize_name(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_name(input), expected);
    }

    #[test]
    fn test_resolve_literal_path_wins() {
        let tmp = TempDir::new().unwrap();
        let model_path = tmp.path().join("weights.onnx");
        fs::write(&model_path, b"fake model data").unwrap();

        let resolved = resolve(model_path.to_str().unwrap(), tmp.path(), None).unwrap();
        assert_eq!(resolved, model_path);
    }

    #[test]
    fn test_resolve_finds_file_in_models_dir() {
        let tmp = TempDir::new().unwrap();
        let model_path = tmp.path().join("yolo11m.onnx");
        fs::write(&model_path, b"fake model data").unwrap();

        let resolved = resolve("m", tmp.path(), None).unwrap();
        assert_eq!(resolved, model_path);
    }

    #[test]
    fn test_resolve_unknown_model_without_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let err = resolve("no_such_model", tmp.path(), None).unwrap_err();
        assert!(matches!(err, ModelResolveError::UnknownModel(_)));
    }

    #[test]
    fn test_fetch_invalid_url_returns_error() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("model.onnx");
        let result = fetch("http://invalid.nonexistent.example.com/model", &dest, None);
        assert!(matches!(result, Err(ModelResolveError::Request { .. })));
    }

    #[test]
    fn test_fetch_leaves_no_staging_file_on_failure() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("model.onnx");
        let _ = fetch("http://invalid.nonexistent.example.com/model", &dest, None);
        assert!(!dest.exists());
        assert!(!dest.with_extension("download").exists());
    }
}
