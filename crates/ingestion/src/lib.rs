use citybike::{ApiError, CityBike};
use database::{AnySink, SinkError};
use params::{JobConfig, JobParameters, ParamsError};
use pipeline::{PipelineError, RunReport};
use thiserror::Error;

pub mod params;
pub mod pipeline;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid parameters: {0}")]
    Params(#[from] ParamsError),

    #[error("could not create API client: {0}")]
    Client(#[from] ApiError),

    #[error("could not open sink: {0}")]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Resolves the parameters, then runs the pipeline against the real API.
pub async fn execute(params: JobParameters) -> Result<RunReport, JobError> {
    let JobConfig {
        job,
        target,
        base_url,
        policy,
    } = params.resolve()?;

    log::info!(
        "ingesting CityBike data in country = {} and city = {}...",
        job.filter.country.as_deref().unwrap_or("all"),
        job.filter.city.as_deref().unwrap_or("all"),
    );

    let api = CityBike::connect(base_url, policy)?;
    let mut sink = AnySink::open(target).await?;
    let report = pipeline::run(&api, &mut sink, &job).await?;

    log::info!("ingestion done: {report:?}");
    Ok(report)
}
