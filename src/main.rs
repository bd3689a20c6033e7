use std::process::ExitCode;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use edge_batch_rs::{
    input::resolver_for,
    setup::{external_runners, prepare_models},
    BatchDispatcher, CliRequest, Config, EdgeSuiteError, HttpTransport, RepositoryMaterializer,
    WeightFetcher,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run(std::env::args_os()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err
                .downcast_ref::<EdgeSuiteError>()
                .map_or(1, EdgeSuiteError::exit_code);
            error!("{:#}", err);
            ExitCode::from(code)
        }
    }
}

async fn run(args: impl IntoIterator<Item = std::ffi::OsString>) -> Result<()> {
    let config = match Config::from_args(args)? {
        CliRequest::Run(config) => config,
        CliRequest::Info(text) => {
            print!("{}", text);
            return Ok(());
        }
    };

    if config.streamlit {
        warn!("--streamlit is not available in this build, continuing on the command line");
    }

    let table = config.model_table()?;

    let input_dir = if config.fetch_only {
        None
    } else {
        let dir = resolver_for(config.input.clone()).resolve()?;
        if !dir.is_dir() {
            return Err(EdgeSuiteError::InputSelection {
                message: format!("{} is not a directory", dir.display()),
            }
            .into());
        }
        Some(dir)
    };

    let materializer = RepositoryMaterializer::new(table.models_dir(), &config.git)
        .with_timeout(config.task_timeout());
    let transport = HttpTransport::new(config.connect_timeout(), config.read_timeout())?;
    let fetcher = WeightFetcher::new(transport).with_mirror_delay(config.mirror_delay());

    prepare_models(&table, &materializer, &fetcher, config.update_repos).await?;

    let Some(input_dir) = input_dir else {
        info!("models ready in {}", table.models_dir().display());
        return Ok(());
    };

    let runners = external_runners(&table, &materializer, &config.python, config.task_timeout())?;
    let dispatcher = BatchDispatcher::new(runners, config.output_root(&input_dir));
    let summary = dispatcher.process_directory(&input_dir).await?;

    for report in summary.failures() {
        warn!(
            "not produced: {} ({})",
            report.task.output.display(),
            report.task.model
        );
    }
    Ok(())
}
