use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::errors::{EdgeSuiteError, Result};
use crate::registry::{ModelKind, ModelSpec};
use crate::traits::EdgeModelRunner;

/// Name of the raw output file inside a task's scratch directory.
pub const RAW_OUTPUT_NAME: &str = "edge.png";

/// Stem given to images staged into the scratch directory.
const STAGED_STEM: &str = "input";

const STDERR_TAIL_LINES: usize = 20;

/// One external demo-script invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Script path relative to the repository checkout.
    pub script: PathBuf,
    pub args: Vec<OsString>,
    /// Image to copy into scratch before running, as `(source, staged)`.
    pub stage: Option<(PathBuf, PathBuf)>,
    /// File the script leaves behind.
    pub raw_output: PathBuf,
}

impl ModelKind {
    /// Argument protocol of this model's demo script.
    ///
    /// `weights`, `image` and `scratch` must be absolute, the script runs with the
    /// repository checkout as its working directory.
    pub fn invocation(self, weights: &Path, image: &Path, scratch: &Path) -> Invocation {
        match self {
            Self::Pidinet => {
                // demo.py writes `<stem>_edge.png` beside its input
                let extension = image
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "png".to_string());
                let staged = scratch.join(format!("{}.{}", STAGED_STEM, extension));
                Invocation {
                    script: PathBuf::from("demo.py"),
                    args: vec![
                        "--config".into(),
                        "configs/pidinet/table5_pidinet.yaml".into(),
                        "--model".into(),
                        weights.into(),
                        "--input".into(),
                        staged.clone().into(),
                        "--save".into(),
                    ],
                    stage: Some((image.to_path_buf(), staged)),
                    raw_output: scratch.join(format!("{}_edge.png", STAGED_STEM)),
                }
            }
            Self::DiffusionEdge => {
                let raw_output = scratch.join(RAW_OUTPUT_NAME);
                Invocation {
                    script: PathBuf::from("demo.py"),
                    args: vec![
                        "--checkpoint".into(),
                        weights.into(),
                        "--input".into(),
                        image.into(),
                        "--save".into(),
                        raw_output.clone().into(),
                        "--fp16".into(),
                    ],
                    stage: None,
                    raw_output,
                }
            }
            Self::Edter => {
                let raw_output = scratch.join(RAW_OUTPUT_NAME);
                Invocation {
                    script: PathBuf::from("demo/test_single.py"),
                    args: vec![
                        "--config".into(),
                        "configs/edter_bsds.py".into(),
                        "--checkpoint".into(),
                        weights.into(),
                        "--img".into(),
                        image.into(),
                        "--out".into(),
                        raw_output.clone().into(),
                    ],
                    stage: None,
                    raw_output,
                }
            }
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// A model whose inference runs as a Python subprocess inside its cloned repository.
pub struct ExternalModel {
    spec: ModelSpec,
    repo_dir: PathBuf,
    python: PathBuf,
    timeout: Duration,
}

impl ExternalModel {
    pub fn new(
        spec: ModelSpec,
        repo_dir: impl Into<PathBuf>,
        python: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            spec,
            repo_dir: repo_dir.into(),
            python: python.into(),
            timeout,
        }
    }

    fn failure(&self, image: &Path, reason: impl Into<String>) -> EdgeSuiteError {
        EdgeSuiteError::Inference {
            model: self.spec.name.clone(),
            image: image.to_path_buf(),
            reason: reason.into(),
        }
    }

    fn absolute(&self, path: &Path) -> Result<PathBuf> {
        std::path::absolute(path)
            .map_err(|e| EdgeSuiteError::file_system(path, "absolute path resolution", e))
    }
}

#[async_trait]
impl EdgeModelRunner for ExternalModel {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn infer(&self, image: &Path, scratch: &Path) -> Result<PathBuf> {
        let weights = self.absolute(&self.spec.destination_path)?;
        let image_abs = self.absolute(image)?;
        let scratch = self.absolute(scratch)?;
        let invocation = self.spec.kind.invocation(&weights, &image_abs, &scratch);

        if let Some((source, staged)) = &invocation.stage {
            tokio::fs::copy(source, staged)
                .await
                .map_err(|e| EdgeSuiteError::file_system(staged, "input staging", e))?;
        }

        debug!(
            "{}: {} {} {:?}",
            self.spec.name,
            self.python.display(),
            invocation.script.display(),
            invocation.args
        );

        let output = Command::new(&self.python)
            .arg(&invocation.script)
            .args(&invocation.args)
            .current_dir(&self.repo_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| self.failure(image, format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| self.failure(image, format!("failed to start: {}", e)))?;

        if !output.status.success() {
            return Err(self.failure(
                image,
                format!("exited with {}\n{}", output.status, stderr_tail(&output.stderr)),
            ));
        }

        if !invocation.raw_output.is_file() {
            return Err(self.failure(
                image,
                format!("no output at {}", invocation.raw_output.display()),
            ));
        }

        Ok(invocation.raw_output)
    }

    fn release_resources(&self) {
        // the CUDA context dies with the subprocess
        trace!("{}: nothing to release", self.spec.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(invocation: &Invocation) -> Vec<String> {
        invocation
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_pidinet_stages_input_in_scratch() {
        let invocation = ModelKind::Pidinet.invocation(
            Path::new("/m/weights/table5_pidinet.pth"),
            Path::new("/in/cat.JPG"),
            Path::new("/tmp/task"),
        );

        assert_eq!(invocation.script, Path::new("demo.py"));
        assert_eq!(
            args(&invocation),
            vec![
                "--config",
                "configs/pidinet/table5_pidinet.yaml",
                "--model",
                "/m/weights/table5_pidinet.pth",
                "--input",
                "/tmp/task/input.JPG",
                "--save",
            ]
        );
        assert_eq!(
            invocation.stage,
            Some((PathBuf::from("/in/cat.JPG"), PathBuf::from("/tmp/task/input.JPG")))
        );
        assert_eq!(invocation.raw_output, Path::new("/tmp/task/input_edge.png"));
    }

    #[test]
    fn test_diffusion_edge_protocol() {
        let invocation = ModelKind::DiffusionEdge.invocation(
            Path::new("/m/weights/diffedge_swin.pth"),
            Path::new("/in/cat.png"),
            Path::new("/tmp/task"),
        );

        assert_eq!(
            args(&invocation),
            vec![
                "--checkpoint",
                "/m/weights/diffedge_swin.pth",
                "--input",
                "/in/cat.png",
                "--save",
                "/tmp/task/edge.png",
                "--fp16",
            ]
        );
        assert_eq!(invocation.stage, None);
    }

    #[test]
    fn test_edter_protocol() {
        let invocation = ModelKind::Edter.invocation(
            Path::new("/m/weights/edter_bsds.pth"),
            Path::new("/in/cat.png"),
            Path::new("/tmp/task"),
        );

        assert_eq!(invocation.script, Path::new("demo/test_single.py"));
        assert_eq!(
            args(&invocation),
            vec![
                "--config",
                "configs/edter_bsds.py",
                "--checkpoint",
                "/m/weights/edter_bsds.pth",
                "--img",
                "/in/cat.png",
                "--out",
                "/tmp/task/edge.png",
            ]
        );
        assert_eq!(invocation.raw_output, Path::new("/tmp/task/edge.png"));
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr: String = (0..30).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(stderr.as_bytes());
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
    }
}
