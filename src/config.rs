use clap::error::ErrorKind;
use clap::Parser;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{EdgeSuiteError, Result};
use crate::registry::ModelTable;

#[derive(Parser, Clone, Debug)]
#[command(version, about = "Batch edge detection with external models", long_about = None)]
pub struct Config {
    /// Folder with images; prompts when omitted
    #[arg(short, long, visible_alias = "dir")]
    pub input: Option<PathBuf>,

    /// Root for the per-model result folders [default: the input folder]
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Where repositories are cloned and weights stored
    #[arg(long, default_value = "models")]
    pub models_dir: PathBuf,

    /// TOML model table replacing the built-in one
    #[arg(long)]
    pub models_config: Option<PathBuf>,

    /// Run only these models
    #[arg(short, long, value_delimiter = ',')]
    pub models: Vec<String>,

    #[arg(long, default_value = "python3")]
    pub python: PathBuf,

    #[arg(long, default_value = "git")]
    pub git: PathBuf,

    /// Limit for one model invocation or git command
    #[arg(long, default_value_t = 1800)]
    pub task_timeout_secs: u64,

    #[arg(long, default_value_t = 30)]
    pub connect_timeout_secs: u64,

    /// Longest silence tolerated while a download is streaming
    #[arg(long, default_value_t = 120)]
    pub read_timeout_secs: u64,

    /// Pause between mirror attempts
    #[arg(long, default_value_t = 2000)]
    pub mirror_delay_ms: u64,

    /// Fast-forward the model repositories before running
    #[arg(long)]
    pub update_repos: bool,

    /// Clone repositories and download weights, then exit
    #[arg(long)]
    pub fetch_only: bool,

    /// Streamlit front end (not available in this build)
    #[arg(long)]
    pub streamlit: bool,
}

/// What the command line asked for.
#[derive(Debug)]
pub enum CliRequest {
    Run(Config),
    /// `--help` or `--version` text to print before exiting successfully.
    Info(String),
}

impl Config {
    /// Parse arguments. Every parse failure is an argument error (exit 40).
    pub fn from_args<I, T>(args: I) -> Result<CliRequest>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        match Self::try_parse_from(args) {
            Ok(config) => Ok(CliRequest::Run(config)),
            Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                Ok(CliRequest::Info(e.to_string()))
            }
            Err(e) => Err(EdgeSuiteError::Argument {
                message: e.to_string(),
            }),
        }
    }

    pub fn output_root<'a>(&'a self, input_dir: &'a Path) -> &'a Path {
        self.output_dir.as_deref().unwrap_or(input_dir)
    }

    /// The model table this run works with.
    pub fn model_table(&self) -> Result<ModelTable> {
        let table = match &self.models_config {
            Some(path) => ModelTable::from_toml_file(&self.models_dir, path)?,
            None => ModelTable::builtin(&self.models_dir)?,
        };
        table.select(&self.models)
    }

    pub const fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub const fn mirror_delay(&self) -> Duration {
        Duration::from_millis(self.mirror_delay_ms)
    }
}
