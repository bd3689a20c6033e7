pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod fetcher;
pub mod imageops;
pub mod input;
pub mod model;
pub mod registry;
pub mod repository;
pub mod setup;
pub mod traits;
pub mod transport;

pub mod mocks;

pub use config::{CliRequest, Config};
pub use dispatcher::{BatchDispatcher, ImageTask, RunSummary, TaskOutcome, TaskReport};
pub use errors::{EdgeSuiteError, Result};
pub use fetcher::{FetchOutcome, MirrorFailure, WeightFetcher};
pub use imageops::binarize;
pub use model::ExternalModel;
pub use registry::{ModelKind, ModelSpec, ModelTable};
pub use repository::{RepositoryMaterializer, RepositoryOutcome};
pub use traits::*;
pub use transport::HttpTransport;
