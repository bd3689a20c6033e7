use std::time::Duration;

use tracing::{info, warn};

use crate::errors::{EdgeSuiteError, Result};
use crate::fetcher::WeightFetcher;
use crate::model::ExternalModel;
use crate::registry::ModelTable;
use crate::repository::RepositoryMaterializer;
use crate::traits::{EdgeModelRunner, MirrorTransport};

/// Clone every repository and fetch every artifact the table names.
///
/// Runs to the end even when something fails, then reports all unavailable models at once.
pub async fn prepare_models<T: MirrorTransport>(
    table: &ModelTable,
    materializer: &RepositoryMaterializer,
    fetcher: &WeightFetcher<T>,
    update_repos: bool,
) -> Result<()> {
    let mut failed = Vec::new();

    for spec in table.specs() {
        let Some(url) = &spec.repository_url else {
            continue;
        };
        let result = if update_repos {
            materializer.sync(url).await
        } else {
            materializer.ensure(url).await.map(|_| ())
        };
        if let Err(e) = result {
            warn!("{}: {}", spec.name, e);
            failed.push(format!("{} (repository)", spec.name));
        }
    }

    failed.extend(fetcher.fetch_all(table).await);

    if failed.is_empty() {
        info!("all {} models ready", table.specs().len());
        Ok(())
    } else {
        Err(EdgeSuiteError::ArtifactUnavailable { names: failed })
    }
}

/// One subprocess runner per model in the table.
pub fn external_runners(
    table: &ModelTable,
    materializer: &RepositoryMaterializer,
    python: &std::path::Path,
    timeout: Duration,
) -> Result<Vec<Box<dyn EdgeModelRunner>>> {
    table
        .specs()
        .iter()
        .map(|spec| -> Result<Box<dyn EdgeModelRunner>> {
            let repo_dir = match &spec.repository_url {
                Some(url) => materializer.local_path(url)?,
                None => table.models_dir().join(&spec.name),
            };
            Ok(Box::new(ExternalModel::new(
                spec.clone(),
                repo_dir,
                python,
                timeout,
            )))
        })
        .collect()
}
