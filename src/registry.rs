use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{EdgeSuiteError, Result};

pub const WEIGHTS_SUBDIR: &str = "weights";

/// Invocation protocol of an external model's demo script.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Pidinet,
    #[serde(alias = "diffedge")]
    DiffusionEdge,
    Edter,
}

/// Static configuration for one external model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub kind: ModelKind,
    /// Candidate download URLs, highest priority first. Never empty.
    pub mirrors: Vec<String>,
    pub destination_path: PathBuf,
    /// Hex SHA-256 of the artifact. `None` trusts the first download.
    pub expected_checksum: Option<String>,
    pub repository_url: Option<String>,
}

impl ModelSpec {
    pub fn new(
        name: impl Into<String>,
        kind: ModelKind,
        mirrors: Vec<String>,
        destination_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let name = name.into();
        if mirrors.is_empty() {
            return Err(EdgeSuiteError::Configuration {
                message: format!("model `{}` has no mirrors", name),
            });
        }
        Ok(Self {
            name,
            kind,
            mirrors,
            destination_path: destination_path.into(),
            expected_checksum: None,
            repository_url: None,
        })
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.expected_checksum = Some(checksum.into());
        self
    }

    pub fn with_repository(mut self, url: impl Into<String>) -> Self {
        self.repository_url = Some(url.into());
        self
    }
}

/// Model table file entry, `[[model]]` in TOML.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelEntry {
    name: String,
    kind: ModelKind,
    file: PathBuf,
    mirrors: Vec<String>,
    sha256: Option<String>,
    repository: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelTableFile {
    #[serde(rename = "model", default)]
    models: Vec<ModelEntry>,
}

/// Immutable set of model specs rooted at a models directory.
#[derive(Debug, Clone)]
pub struct ModelTable {
    models_dir: PathBuf,
    specs: Vec<ModelSpec>,
}

impl ModelTable {
    pub fn new(models_dir: impl Into<PathBuf>, specs: Vec<ModelSpec>) -> Result<Self> {
        let mut names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(EdgeSuiteError::Configuration {
                message: format!("duplicate model name `{}`", dup[0]),
            });
        }
        Ok(Self {
            models_dir: models_dir.into(),
            specs,
        })
    }

    /// PiDiNet, DiffusionEdge and EDTER with their published weights.
    pub fn builtin(models_dir: impl Into<PathBuf>) -> Result<Self> {
        let models_dir = models_dir.into();
        let weights = models_dir.join(WEIGHTS_SUBDIR);

        let specs = vec![
            ModelSpec::new(
                "pidinet",
                ModelKind::Pidinet,
                vec![
                    "https://huggingface.co/lllyasviel/Annotators/resolve/main/table5_pidinet.pth"
                        .to_string(),
                    "https://hf-mirror.com/lllyasviel/Annotators/resolve/main/table5_pidinet.pth"
                        .to_string(),
                ],
                weights.join("table5_pidinet.pth"),
            )?
            .with_repository("https://github.com/hellozhuo/pidinet"),
            ModelSpec::new(
                "diffedge",
                ModelKind::DiffusionEdge,
                vec![
                    "https://huggingface.co/BRIAAI/DiffEdge/resolve/main/diffedge_swin.pth"
                        .to_string(),
                    "https://hf-mirror.com/BRIAAI/DiffEdge/resolve/main/diffedge_swin.pth"
                        .to_string(),
                ],
                weights.join("diffedge_swin.pth"),
            )?
            .with_repository("https://github.com/GuHuangAI/DiffusionEdge"),
            ModelSpec::new(
                "edter",
                ModelKind::Edter,
                vec![
                    "https://download.openmmlab.com/mmsegmentation/v0.5/edter/edter_bsds.pth"
                        .to_string(),
                ],
                weights.join("edter_bsds.pth"),
            )?
            .with_repository("https://github.com/MengyangPu/EDTER"),
        ];

        Self::new(models_dir, specs)
    }

    /// Parse a `[[model]]` table. `file` entries are relative to `<models_dir>/weights`.
    pub fn from_toml_str(models_dir: impl Into<PathBuf>, source: &str) -> Result<Self> {
        let models_dir = models_dir.into();
        let weights = models_dir.join(WEIGHTS_SUBDIR);
        let parsed: ModelTableFile = toml::from_str(source)?;

        let specs = parsed
            .models
            .into_iter()
            .map(|entry| {
                let mut spec = ModelSpec::new(
                    entry.name,
                    entry.kind,
                    entry.mirrors,
                    weights.join(entry.file),
                )?;
                spec.expected_checksum = entry.sha256;
                spec.repository_url = entry.repository;
                Ok(spec)
            })
            .collect::<Result<Vec<_>>>()?;

        if specs.is_empty() {
            return Err(EdgeSuiteError::Configuration {
                message: "model table is empty".to_string(),
            });
        }

        Self::new(models_dir, specs)
    }

    pub fn from_toml_file(models_dir: impl Into<PathBuf>, path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)
            .map_err(|e| EdgeSuiteError::file_system(path, "model table read", e))?;
        Self::from_toml_str(models_dir, &source)
    }

    /// Keep only the named models, in the order given. Repeated names count once.
    pub fn select(self, names: &[String]) -> Result<Self> {
        if names.is_empty() {
            return Ok(self);
        }

        let mut selected: Vec<ModelSpec> = Vec::with_capacity(names.len());
        for name in names {
            if selected.iter().any(|s| &s.name == name) {
                continue;
            }
            let spec = self
                .get(name)
                .ok_or_else(|| EdgeSuiteError::Argument {
                    message: format!(
                        "unknown model `{}` (available: {})",
                        name,
                        self.names().join(", ")
                    ),
                })?
                .clone();
            selected.push(spec);
        }

        Self::new(self.models_dir, selected)
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn specs(&self) -> &[ModelSpec] {
        &self.specs
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.name.as_str()).collect()
    }
}
