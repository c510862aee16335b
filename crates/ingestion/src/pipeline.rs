//! One ingestion run: fetch networks, filter them, fetch the stations of every
//! remaining network, then persist both collections.

use core::fmt;

use chrono_tz::Tz;
use citybike::{client::Transport, ApiError, CityBike};
use database::{RowCount, Sink, SinkError};
use model::{network::Network, station::Station};
use thiserror::Error;
use utility::slug::city_slug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    FetchNetworks,
    FilterNetworks,
    FetchStations,
    MergeStations,
    Persist,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "start",
            Stage::FetchNetworks => "fetch networks",
            Stage::FilterNetworks => "filter networks",
            Stage::FetchStations => "fetch stations",
            Stage::MergeStations => "merge stations",
            Stage::Persist => "persist",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage}: {source}")]
    Api {
        stage: Stage,
        #[source]
        source: ApiError,
    },

    /// The API answered with an empty network list.
    #[error("fetch networks: no networks returned")]
    NoNetworks,

    #[error("{stage}: {source}")]
    Sink {
        stage: Stage,
        #[source]
        source: SinkError,
    },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Api { stage, .. } | Self::Sink { stage, .. } => *stage,
            Self::NoNetworks => Stage::FetchNetworks,
        }
    }
}

/// Keeps networks of one country and/or one city. Cities are compared by
/// their slug, so `"New York, NY"` matches `"NewYork-NY"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkFilter {
    pub country: Option<String>,
    pub city: Option<String>,
}

impl NetworkFilter {
    pub fn new(country: Option<String>, city: Option<String>) -> Self {
        Self { country, city }
    }

    pub fn matches(&self, network: &Network) -> bool {
        let country = self
            .country
            .as_ref()
            .map_or(true, |country| network.country == *country);
        let city = self
            .city
            .as_ref()
            .map_or(true, |city| city_slug(&network.city) == city_slug(city));
        country && city
    }

    pub fn apply(&self, networks: Vec<Network>) -> Vec<Network> {
        if self.country.is_none() && self.city.is_none() {
            return networks;
        }
        networks
            .into_iter()
            .filter(|network| self.matches(network))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub filter: NetworkFilter,
    /// Zone of timestamps the API reports without an offset.
    pub zone: Tz,
    pub networks_table: String,
    pub stations_table: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub networks_fetched: usize,
    pub networks_kept: usize,
    pub stations_fetched: usize,
    pub networks_written: RowCount,
    pub stations_written: RowCount,
}

struct Progress {
    stage: Stage,
}

impl Progress {
    fn enter(&mut self, stage: Stage) {
        log::info!("{} -> {}", self.stage, stage);
        self.stage = stage;
    }

    fn api(&self, source: ApiError) -> PipelineError {
        log::debug!("{} -> failed", self.stage);
        PipelineError::Api {
            stage: self.stage,
            source,
        }
    }

    fn sink(&self, source: SinkError) -> PipelineError {
        log::debug!("{} -> failed", self.stage);
        PipelineError::Sink {
            stage: self.stage,
            source,
        }
    }
}

pub async fn run<T, S>(
    api: &CityBike<T>,
    sink: &mut S,
    job: &Job,
) -> Result<RunReport, PipelineError>
where
    T: Transport,
    S: Sink,
{
    let mut progress = Progress {
        stage: Stage::Start,
    };
    let mut report = RunReport::default();

    progress.enter(Stage::FetchNetworks);
    let networks = api.get_networks().await.map_err(|why| progress.api(why))?;
    if networks.is_empty() {
        return Err(PipelineError::NoNetworks);
    }
    report.networks_fetched = networks.len();

    progress.enter(Stage::FilterNetworks);
    let networks = job.filter.apply(networks);
    report.networks_kept = networks.len();
    log::info!(
        "kept {} of {} networks",
        report.networks_kept,
        report.networks_fetched
    );

    progress.enter(Stage::FetchStations);
    let mut fetched = Vec::with_capacity(networks.len());
    for network in &networks {
        let stations = api
            .get_stations(&network.id, job.zone)
            .await
            .map_err(|why| progress.api(why))?;
        log::info!("network {}: {} stations", network.id, stations.len());
        fetched.push(stations);
    }

    progress.enter(Stage::MergeStations);
    let stations: Vec<Station> = fetched.into_iter().flatten().collect();
    report.stations_fetched = stations.len();

    progress.enter(Stage::Persist);
    report.networks_written = sink
        .persist(&networks, &job.networks_table)
        .await
        .map_err(|why| progress.sink(why))?;
    report.stations_written = sink
        .persist(&stations, &job.stations_table)
        .await
        .map_err(|why| progress.sink(why))?;
    log::info!(
        "wrote {} networks to {} and {} stations to {}",
        report.networks_written,
        job.networks_table,
        report.stations_written,
        job.stations_table
    );

    progress.enter(Stage::Done);
    Ok(report)
}
