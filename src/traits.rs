use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::Result;

/// Moves one mirror URL's content onto the local filesystem.
///
/// Any error is a per-mirror failure; the fetcher moves on to the next candidate.
#[async_trait]
pub trait MirrorTransport: Send + Sync {
    /// Write the body behind `url` to `destination`, returning the byte count.
    async fn download(&self, url: &str, destination: &Path) -> Result<u64>;
}

/// One edge-detection model as seen by the dispatcher.
#[async_trait]
pub trait EdgeModelRunner: Send + Sync {
    fn name(&self) -> &str;

    /// Run inference on `image`, returning the raw output image path.
    ///
    /// `scratch` is a directory unique to this task and removed after it. Implementations
    /// must keep every intermediate file inside it.
    async fn infer(&self, image: &Path, scratch: &Path) -> Result<PathBuf>;

    /// Release in-process accelerator caches left by `infer`.
    fn release_resources(&self) {}
}

/// Lets a runner be shared with code that inspects it after a run.
#[async_trait]
impl<R: EdgeModelRunner> EdgeModelRunner for Arc<R> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn infer(&self, image: &Path, scratch: &Path) -> Result<PathBuf> {
        (**self).infer(image, scratch).await
    }

    fn release_resources(&self) {
        (**self).release_resources()
    }
}

/// Where the input image folder comes from.
pub trait InputDirResolver {
    fn resolve(&self) -> Result<PathBuf>;
}
