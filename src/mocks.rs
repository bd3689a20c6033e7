use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use image::{GrayImage, Luma};
use parking_lot::Mutex;

use crate::errors::{EdgeSuiteError, Result};
use crate::traits::{EdgeModelRunner, MirrorTransport};

/// Serves fixed bodies per URL; any other URL fails like an unreachable host.
#[derive(Debug, Default)]
pub struct MockTransport {
    bodies: HashMap<String, Vec<u8>>,
    calls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, url: &str, body: Vec<u8>) -> Self {
        self.bodies.insert(url.to_string(), body);
        self
    }

    /// URLs requested so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl MirrorTransport for MockTransport {
    async fn download(&self, url: &str, destination: &Path) -> Result<u64> {
        self.calls.lock().push(url.to_string());

        match self.bodies.get(url) {
            Some(body) => {
                tokio::fs::write(destination, body).await?;
                Ok(body.len() as u64)
            }
            None => {
                // leave a truncated file behind, like a dropped connection would
                tokio::fs::write(destination, b"partial").await?;
                Err(EdgeSuiteError::mirror(url, "connection reset"))
            }
        }
    }
}

/// Writes a constant grayscale image as its raw output.
#[derive(Debug)]
pub struct MockEdgeModel {
    name: String,
    intensity: u8,
    fail: bool,
    invocations: AtomicUsize,
}

impl MockEdgeModel {
    pub fn new(name: &str, intensity: u8) -> Self {
        Self {
            name: name.to_string(),
            intensity,
            fail: false,
            invocations: AtomicUsize::new(0),
        }
    }

    /// A model whose every invocation exits non-zero.
    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name, 0)
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EdgeModelRunner for MockEdgeModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn infer(&self, image: &Path, scratch: &Path) -> Result<PathBuf> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EdgeSuiteError::Inference {
                model: self.name.clone(),
                image: image.to_path_buf(),
                reason: "exited with exit status: 1".to_string(),
            });
        }

        let raw = scratch.join("edge.png");
        GrayImage::from_pixel(4, 4, Luma([self.intensity])).save(&raw)?;
        Ok(raw)
    }
}
