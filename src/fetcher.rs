use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::errors::{EdgeSuiteError, Result};
use crate::registry::{ModelSpec, ModelTable};
use crate::traits::MirrorTransport;

const HASH_BLOCK_SIZE: usize = 64 * 1024;

/// Result of materializing one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    AlreadyPresent,
    FetchedAndVerified { mirror: String },
    AllMirrorsExhausted { failures: Vec<MirrorFailure> },
}

/// Why one mirror was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorFailure {
    pub url: String,
    pub reason: String,
}

/// Streaming SHA-256 of a file as lowercase hex.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::with_capacity(HASH_BLOCK_SIZE, File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

async fn sha256_file_blocking(path: &Path) -> Result<String> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || sha256_file(&owned))
        .await
        .map_err(|e| EdgeSuiteError::file_system(path, "checksum", io::Error::other(e)))?
        .map_err(|e| EdgeSuiteError::file_system(path, "checksum", e))
}

/// Where an in-flight download is written before it is verified.
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("removed stale file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EdgeSuiteError::file_system(path, "stale file removal", e)),
    }
}

/// Downloads weight artifacts, walking each spec's mirrors until one verifies.
pub struct WeightFetcher<T: MirrorTransport> {
    transport: T,
    mirror_delay: Duration,
}

impl<T: MirrorTransport> WeightFetcher<T> {
    pub const fn new(transport: T) -> Self {
        Self {
            transport,
            mirror_delay: Duration::from_secs(2),
        }
    }

    pub const fn with_mirror_delay(mut self, delay: Duration) -> Self {
        self.mirror_delay = delay;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn matches_checksum(&self, spec: &ModelSpec, path: &Path) -> Result<bool> {
        match &spec.expected_checksum {
            None => Ok(true),
            Some(expected) => {
                let actual = sha256_file_blocking(path).await?;
                if actual.eq_ignore_ascii_case(expected.trim()) {
                    Ok(true)
                } else {
                    warn!(
                        "{}",
                        EdgeSuiteError::ChecksumMismatch {
                            path: path.to_path_buf(),
                            expected: expected.clone(),
                            actual,
                        }
                    );
                    Ok(false)
                }
            }
        }
    }

    /// Make `spec.destination_path` hold a verified artifact.
    ///
    /// Mirror failures are folded into the outcome. An `Err` means the local
    /// filesystem itself could not be prepared.
    pub async fn fetch_one(&self, spec: &ModelSpec) -> Result<FetchOutcome> {
        let destination = &spec.destination_path;
        let partial = partial_path(destination);

        if destination.is_file() {
            if self.matches_checksum(spec, destination).await? {
                debug!("{} already present at {}", spec.name, destination.display());
                return Ok(FetchOutcome::AlreadyPresent);
            }
            warn!(
                "{}: existing {} is corrupt, fetching again",
                spec.name,
                destination.display()
            );
        }

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EdgeSuiteError::file_system(parent, "weights directory creation", e))?;
        }

        let mut failures = Vec::with_capacity(spec.mirrors.len());

        for (index, url) in spec.mirrors.iter().enumerate() {
            if index > 0 && !self.mirror_delay.is_zero() {
                tokio::time::sleep(self.mirror_delay).await;
            }

            remove_if_present(destination).await?;
            remove_if_present(&partial).await?;

            info!("{}: downloading {}", spec.name, url);
            let reason = match self.transport.download(url, &partial).await {
                Err(e) => e.to_string(),
                Ok(bytes) => {
                    if self.matches_checksum(spec, &partial).await? {
                        tokio::fs::rename(&partial, destination).await.map_err(|e| {
                            EdgeSuiteError::file_system(destination, "artifact rename", e)
                        })?;
                        info!(
                            "{}: fetched {} bytes into {}",
                            spec.name,
                            bytes,
                            destination.display()
                        );
                        return Ok(FetchOutcome::FetchedAndVerified { mirror: url.clone() });
                    }
                    "checksum mismatch".to_string()
                }
            };

            warn!("{}: mirror {} failed: {}", spec.name, url, reason);
            remove_if_present(&partial).await?;
            failures.push(MirrorFailure {
                url: url.clone(),
                reason,
            });
        }

        remove_if_present(destination).await?;
        remove_if_present(&partial).await?;
        Ok(FetchOutcome::AllMirrorsExhausted { failures })
    }

    /// Fetch every spec in the table, returning the names that could not be satisfied.
    ///
    /// A failure for one model never stops the others.
    pub async fn fetch_all(&self, table: &ModelTable) -> Vec<String> {
        let mut failed = Vec::new();

        for spec in table.specs() {
            match self.fetch_one(spec).await {
                Ok(FetchOutcome::AllMirrorsExhausted { failures }) => {
                    warn!(
                        "{}: all {} mirrors exhausted",
                        spec.name,
                        failures.len()
                    );
                    failed.push(spec.name.clone());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("{}: {}", spec.name, e);
                    failed.push(spec.name.clone());
                }
            }
        }

        failed
    }

    /// Like [`fetch_all`](Self::fetch_all), but a non-empty failure set is an error.
    pub async fn ensure_all(&self, table: &ModelTable) -> Result<()> {
        let failed = self.fetch_all(table).await;
        if failed.is_empty() {
            Ok(())
        } else {
            Err(EdgeSuiteError::ArtifactUnavailable { names: failed })
        }
    }
}
