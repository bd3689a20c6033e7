use std::fs;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::errors::{EdgeSuiteError, Result};
use crate::imageops::binarize;
use crate::traits::EdgeModelRunner;

/// Extensions (lowercase) picked up from the input directory.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp"];

const SCRATCH_PREFIX: &str = ".scratch-";

pub fn is_supported_image_format(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Recursively list image files under `input_dir`, skipping the `excluded` directories.
pub fn collect_image_files(input_dir: &Path, excluded: &[PathBuf]) -> Vec<PathBuf> {
    WalkDir::new(input_dir)
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && excluded.iter().any(|x| x == e.path())))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_supported_image_format(e.path()))
        .map(|e| e.into_path())
        .collect()
}

/// One (image, model) unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTask {
    pub image: PathBuf,
    pub model: String,
    pub output: PathBuf,
}

impl ImageTask {
    /// `{output_root}/{model}/{image_stem}_{model}.png`
    pub fn new(image: &Path, model: &str, output_root: &Path) -> Self {
        let stem = image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            image: image.to_path_buf(),
            model: model.to_string(),
            output: output_root
                .join(model)
                .join(format!("{}_{}.png", stem, model)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Produced,
    Skipped,
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task: ImageTask,
    pub outcome: TaskOutcome,
}

/// Every task's outcome from one dispatcher run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub reports: Vec<TaskReport>,
}

impl RunSummary {
    fn count(&self, pred: impl Fn(&TaskOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn produced(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Produced))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Failed { .. }))
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskReport> {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, TaskOutcome::Failed { .. }))
    }
}

/// Runs every model over every image in a directory, one task at a time.
pub struct BatchDispatcher {
    runners: Vec<Box<dyn EdgeModelRunner>>,
    output_root: PathBuf,
    show_progress: bool,
}

impl BatchDispatcher {
    pub fn new(runners: Vec<Box<dyn EdgeModelRunner>>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            runners,
            output_root: output_root.into(),
            show_progress: true,
        }
    }

    pub const fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn model_output_dirs(&self) -> Vec<PathBuf> {
        self.runners
            .iter()
            .map(|r| self.output_root.join(r.name()))
            .collect()
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }

    pub async fn process_directory(&self, input_dir: &Path) -> Result<RunSummary> {
        if !input_dir.is_dir() {
            return Err(EdgeSuiteError::file_system(
                input_dir,
                "input directory check",
                std::io::Error::new(std::io::ErrorKind::NotFound, "input directory does not exist"),
            ));
        }

        let output_dirs = self.model_output_dirs();
        for dir in &output_dirs {
            fs::create_dir_all(dir)
                .map_err(|e| EdgeSuiteError::file_system(dir, "output directory creation", e))?;
        }

        let images = collect_image_files(input_dir, &output_dirs);
        let mut summary = RunSummary::default();

        if images.is_empty() {
            info!("no image files found under {}", input_dir.display());
            return Ok(summary);
        }

        info!(
            "processing {} images with {} models",
            images.len(),
            self.runners.len()
        );

        let pb = self.progress_bar((images.len() * self.runners.len()) as u64);
        for image in &images {
            for runner in &self.runners {
                let task = ImageTask::new(image, runner.name(), &self.output_root);
                pb.set_message(task.model.clone());
                let outcome = self.run_task(runner.as_ref(), &task).await;
                if let TaskOutcome::Failed { reason } = &outcome {
                    pb.suspend(|| {
                        warn!(
                            "{} failed on {}: {}",
                            task.model,
                            task.image.display(),
                            reason
                        )
                    });
                }
                summary.reports.push(TaskReport { task, outcome });
                pb.inc(1);
            }
        }
        pb.finish_and_clear();

        info!(
            "done: {} produced, {} skipped, {} failed",
            summary.produced(),
            summary.skipped(),
            summary.failed()
        );
        Ok(summary)
    }

    /// Produce one task's output. Failures never escape as errors.
    pub async fn run_task(&self, runner: &dyn EdgeModelRunner, task: &ImageTask) -> TaskOutcome {
        if task.output.exists() {
            return TaskOutcome::Skipped;
        }

        let outcome = match self.produce(runner, task).await {
            Ok(()) => TaskOutcome::Produced,
            Err(e) => TaskOutcome::Failed {
                reason: e.to_string(),
            },
        };
        runner.release_resources();
        outcome
    }

    async fn produce(&self, runner: &dyn EdgeModelRunner, task: &ImageTask) -> Result<()> {
        let output_dir = task
            .output
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.output_root.clone());
        fs::create_dir_all(&output_dir)
            .map_err(|e| EdgeSuiteError::file_system(&output_dir, "output directory creation", e))?;

        // same filesystem as the output so the final rename is atomic
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&output_dir)
            .map_err(|e| EdgeSuiteError::file_system(&output_dir, "scratch directory creation", e))?;

        let raw = runner.infer(&task.image, scratch.path()).await?;

        let gray = image::open(&raw)
            .map_err(|e| EdgeSuiteError::ImageProcessing {
                path: raw.display().to_string(),
                operation: "raw output read".to_string(),
                source: Box::new(e),
            })?
            .into_luma8();
        let edges = binarize(&gray);

        let staged = scratch.path().join("result.png");
        edges
            .save_with_format(&staged, ImageFormat::Png)
            .map_err(|e| EdgeSuiteError::ImageProcessing {
                path: staged.display().to_string(),
                operation: "edge map write".to_string(),
                source: Box::new(e),
            })?;
        fs::rename(&staged, &task.output)
            .map_err(|e| EdgeSuiteError::file_system(&task.output, "edge map rename", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_supported_formats() {
        let test_cases = vec![
            ("test.jpg", true),
            ("test.JPEG", true),
            ("test.png", true),
            ("test.bmp", true),
            ("test.tif", true),
            ("test.TIFF", true),
            ("test.webp", true),
            ("test.gif", false),
            ("test.txt", false),
            ("test", false),
        ];

        for (filename, expected) in test_cases {
            assert_eq!(
                is_supported_image_format(Path::new(filename)),
                expected,
                "{filename}"
            );
        }
    }

    #[test]
    fn test_task_output_path() {
        let task = ImageTask::new(Path::new("/in/sub/cat.jpg"), "edter", Path::new("/out"));
        assert_eq!(task.output, Path::new("/out/edter/cat_edter.png"));
        assert_eq!(task.image, Path::new("/in/sub/cat.jpg"));
    }

    #[test]
    fn test_collect_skips_excluded_dirs() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let input = temp_dir.path();
        fs::create_dir_all(input.join("nested"))?;
        fs::create_dir_all(input.join("pidinet"))?;
        fs::write(input.join("a.png"), b"")?;
        fs::write(input.join("nested/b.JPG"), b"")?;
        fs::write(input.join("notes.txt"), b"")?;
        fs::write(input.join("pidinet/a_pidinet.png"), b"")?;

        let mut found = collect_image_files(input, &[input.join("pidinet")]);
        found.sort();

        assert_eq!(found, vec![input.join("a.png"), input.join("nested/b.JPG")]);
        Ok(())
    }

    #[test]
    fn test_summary_counts() {
        let task = ImageTask::new(Path::new("a.png"), "edter", Path::new("out"));
        let summary = RunSummary {
            reports: vec![
                TaskReport {
                    task: task.clone(),
                    outcome: TaskOutcome::Produced,
                },
                TaskReport {
                    task: task.clone(),
                    outcome: TaskOutcome::Skipped,
                },
                TaskReport {
                    task,
                    outcome: TaskOutcome::Failed {
                        reason: "exit 1".to_string(),
                    },
                },
            ],
        };

        assert_eq!(summary.produced(), 1);
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.failures().count(), 1);
    }
}
