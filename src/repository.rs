use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::info;

use crate::errors::{EdgeSuiteError, Result};

const STAGING_PREFIX: &str = ".clone-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryOutcome {
    AlreadyPresent,
    Cloned,
}

/// Directory name a repository URL is checked out under: its last path segment
/// without a trailing `.git`.
pub fn repository_stem(url: &str) -> Option<&str> {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next()?;
    let stem = last.strip_suffix(".git").unwrap_or(last);
    (!stem.is_empty()).then_some(stem)
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

/// Keeps shallow clones of the model repositories under the models directory.
///
/// Existing checkouts are never touched by a normal run; [`sync`](Self::sync) is the only
/// update path.
pub struct RepositoryMaterializer {
    models_dir: PathBuf,
    git: PathBuf,
    timeout: Duration,
}

impl RepositoryMaterializer {
    pub fn new(models_dir: impl Into<PathBuf>, git: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            git: git.into(),
            timeout: Duration::from_secs(600),
        }
    }

    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn local_path(&self, url: &str) -> Result<PathBuf> {
        repository_stem(url)
            .map(|stem| self.models_dir.join(stem))
            .ok_or_else(|| EdgeSuiteError::Configuration {
                message: format!("cannot derive a checkout directory from `{}`", url),
            })
    }

    /// Clone `url` (depth 1) unless a non-empty checkout already exists.
    ///
    /// The clone lands in a staging directory beside the checkout and is renamed into
    /// place only once git succeeds, so an interrupted clone never looks like a checkout.
    pub async fn ensure(&self, url: &str) -> Result<RepositoryOutcome> {
        let path = self.local_path(url)?;
        if path.is_dir() && !is_empty_dir(&path) {
            return Ok(RepositoryOutcome::AlreadyPresent);
        }

        tokio::fs::create_dir_all(&self.models_dir)
            .await
            .map_err(|e| EdgeSuiteError::file_system(&self.models_dir, "models directory creation", e))?;

        // removed on drop, whatever happens to the clone
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.models_dir)
            .map_err(|e| EdgeSuiteError::file_system(&self.models_dir, "clone staging", e))?;

        info!("cloning {} into {}", url, path.display());
        self.run_git(
            url,
            "clone",
            [
                OsStr::new("clone"),
                OsStr::new("--depth"),
                OsStr::new("1"),
                OsStr::new(url),
                staging.path().as_os_str(),
            ],
        )
        .await?;

        if path.is_dir() {
            tokio::fs::remove_dir(&path)
                .await
                .map_err(|e| EdgeSuiteError::file_system(&path, "empty checkout removal", e))?;
        }
        tokio::fs::rename(staging.path(), &path)
            .await
            .map_err(|e| EdgeSuiteError::file_system(&path, "checkout rename", e))?;
        Ok(RepositoryOutcome::Cloned)
    }

    /// Fast-forward an existing checkout. Missing checkouts are cloned instead.
    pub async fn sync(&self, url: &str) -> Result<()> {
        let path = self.local_path(url)?;
        if !path.is_dir() || is_empty_dir(&path) {
            self.ensure(url).await?;
            return Ok(());
        }

        info!("updating {}", path.display());
        self.run_git(
            url,
            "pull",
            [
                OsStr::new("-C"),
                path.as_os_str(),
                OsStr::new("pull"),
                OsStr::new("--ff-only"),
            ],
        )
        .await
    }

    async fn run_git<'a>(
        &self,
        url: &str,
        operation: &str,
        args: impl IntoIterator<Item = &'a OsStr>,
    ) -> Result<()> {
        let repository_error = |source: Box<dyn std::error::Error + Send + Sync>| {
            EdgeSuiteError::Repository {
                url: url.to_string(),
                operation: operation.to_string(),
                source,
            }
        };

        let output = Command::new(&self.git)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| repository_error(format!("timed out after {:?}", self.timeout).into()))?
            .map_err(|e| repository_error(Box::new(e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(repository_error(
                format!("git exited with {}: {}", output.status, stderr.trim()).into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_repository_stem() {
        let cases = vec![
            ("https://github.com/hellozhuo/pidinet", Some("pidinet")),
            ("https://github.com/GuHuangAI/DiffusionEdge.git", Some("DiffusionEdge")),
            ("https://github.com/MengyangPu/EDTER/", Some("EDTER")),
            ("git@github.com:MengyangPu/EDTER.git", Some("EDTER")),
            ("", None),
        ];

        for (url, expected) in cases {
            assert_eq!(repository_stem(url), expected, "{url}");
        }
    }

    #[tokio::test]
    async fn test_existing_checkout_is_left_alone() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let checkout = temp_dir.path().join("pidinet");
        fs::create_dir_all(&checkout)?;
        fs::write(checkout.join("demo.py"), b"print('edge')")?;

        // a git binary that cannot exist proves no subprocess was started
        let materializer =
            RepositoryMaterializer::new(temp_dir.path(), temp_dir.path().join("no-such-git"));
        let outcome = materializer
            .ensure("https://github.com/hellozhuo/pidinet")
            .await?;

        assert_eq!(outcome, RepositoryOutcome::AlreadyPresent);
        assert_eq!(fs::read(checkout.join("demo.py"))?, b"print('edge')");
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_empty_checkout_directory_is_replaced() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir_all(temp_dir.path().join("EDTER"))?;

        // `true` ignores its arguments and succeeds without cloning anything
        let materializer = RepositoryMaterializer::new(temp_dir.path(), "true");
        let outcome = materializer
            .ensure("https://github.com/MengyangPu/EDTER")
            .await?;

        assert_eq!(outcome, RepositoryOutcome::Cloned);
        assert!(temp_dir.path().join("EDTER").is_dir());
        assert_eq!(fs::read_dir(temp_dir.path())?.count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_clone_failure_is_repository_error() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let materializer =
            RepositoryMaterializer::new(temp_dir.path(), temp_dir.path().join("no-such-git"));

        let result = materializer
            .ensure("https://github.com/MengyangPu/EDTER")
            .await;
        assert!(matches!(result, Err(EdgeSuiteError::Repository { .. })));
        // neither a checkout nor a staging directory is left behind
        assert!(fs::read_dir(temp_dir.path())?.next().is_none());
        Ok(())
    }
}
