use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for the edge batch runner.
///
/// Each variant carries the context of its domain (mirror, repository, inference task, ...)
/// so callers can report failures without parsing strings. Per-mirror and per-task variants
/// are normally folded into outcome values; only the terminal ones reach the process exit.
#[derive(Error, Debug)]
pub enum EdgeSuiteError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Argument error: {message}")]
    Argument { message: String },

    #[error("Input selection error: {message}")]
    InputSelection { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Mirror failure: {url}: {reason}")]
    Mirror { url: String, reason: String },

    #[error("Checksum mismatch for {path:?}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Artifacts unavailable: {}", names.join(", "))]
    ArtifactUnavailable { names: Vec<String> },

    #[error("Repository error: {operation} failed for {url}")]
    Repository {
        url: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Inference error: {model} failed on {image:?}: {reason}")]
    Inference {
        model: String,
        image: PathBuf,
        reason: String,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type Result<T> = std::result::Result<T, EdgeSuiteError>;

impl EdgeSuiteError {
    /// Process exit status for errors that end the run.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Argument { .. } => 40,
            Self::InputSelection { .. } => 20,
            Self::ArtifactUnavailable { .. } => 30,
            _ => 1,
        }
    }

    pub(crate) fn file_system(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::FileSystem {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    pub(crate) fn mirror(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Mirror {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Call sites that know the path and operation should build `EdgeSuiteError::FileSystem`
/// directly; this is the fallback for the rest.
impl From<std::io::Error> for EdgeSuiteError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

/// Convert image crate errors to image processing errors.
impl From<image::ImageError> for EdgeSuiteError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

/// Model table files that fail to parse are configuration errors.
impl From<toml::de::Error> for EdgeSuiteError {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let cases = vec![
            (
                EdgeSuiteError::Argument {
                    message: "--bad".to_string(),
                },
                40,
            ),
            (
                EdgeSuiteError::InputSelection {
                    message: "no folder".to_string(),
                },
                20,
            ),
            (
                EdgeSuiteError::ArtifactUnavailable {
                    names: vec!["edter".to_string()],
                },
                30,
            ),
            (EdgeSuiteError::mirror("https://example.com/a", "HTTP 503"), 1),
        ];

        for (error, expected) in cases {
            assert_eq!(error.exit_code(), expected, "{error}");
        }
    }

    #[test]
    fn test_artifact_unavailable_lists_every_name() {
        let error = EdgeSuiteError::ArtifactUnavailable {
            names: vec!["pidinet".to_string(), "edter".to_string()],
        };
        assert_eq!(error.to_string(), "Artifacts unavailable: pidinet, edter");
    }
}
