use std::{path::PathBuf, time::Duration};

use chrono_tz::Tz;
use citybike::{client::RetryPolicy, CITYBIKE_API_URL};
use clap::{Parser, ValueEnum};
use database::{validate_name, DatabaseConnectionInfo, Target};
use thiserror::Error;

use crate::pipeline::{Job, NetworkFilter};

/// Country value meaning "do not filter by country".
pub const ALL_COUNTRIES: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    /// Pipe-delimited files in the staging directory
    Csv,
    /// `citybike.db` in the staging directory
    Sqlite,
    /// PostgreSQL, see the `--db-*` options
    Postgres,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "citybike-ingest", about = "Ingests CityBikes networks and stations")]
pub struct JobParameters {
    /// Country code to keep, `all` keeps every country
    #[arg(long, env = "CITYBIKE_COUNTRY", default_value = ALL_COUNTRIES)]
    pub country: String,
    /// City to keep, e.g. "New York, NY"
    #[arg(long, env = "CITYBIKE_CITY")]
    pub city: Option<String>,
    /// IANA zone of timestamps reported without an offset
    #[arg(long, env = "CITYBIKE_TIMEZONE")]
    pub timezone: String,
    #[arg(long, env = "CITYBIKE_STAGING_PATH", value_name = "path", default_value = "staging")]
    pub staging_path: PathBuf,
    #[arg(long, value_enum, default_value_t = SinkKind::Csv)]
    pub sink: SinkKind,
    #[arg(long, default_value = "networks")]
    pub networks_table: String,
    #[arg(long, default_value = "stations")]
    pub stations_table: String,
    #[arg(long, value_name = "url", default_value = CITYBIKE_API_URL)]
    pub base_url: String,
    /// Pause after every successful request
    #[arg(long, value_name = "ms")]
    pub throttle_ms: Option<u64>,
    /// Database settings; without any of them the `DATABASE_*` environment
    /// variables are used
    #[arg(long)]
    pub db_name: Option<String>,
    #[arg(long)]
    pub db_user: Option<String>,
    #[arg(long)]
    pub db_password: Option<String>,
    #[arg(long)]
    pub db_host: Option<String>,
    #[arg(long)]
    pub db_port: Option<u16>,
}

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),

    #[error("invalid table name '{0}'")]
    InvalidTableName(String),

    #[error("networks and stations can not share table '{0}'")]
    SameTable(String),

    #[error("postgres sink needs --db-* options or DATABASE_* environment variables")]
    MissingDatabase,

    #[error("missing database option(s): {}", .0.join(", "))]
    IncompleteDatabase(Vec<&'static str>),
}

/// Everything a run needs, checked.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub job: Job,
    pub target: Target,
    pub base_url: String,
    pub policy: RetryPolicy,
}

impl JobParameters {
    pub fn resolve(self) -> Result<JobConfig, ParamsError> {
        let zone: Tz = self
            .timezone
            .parse()
            .map_err(|_| ParamsError::UnknownTimezone(self.timezone.clone()))?;

        for table in [&self.networks_table, &self.stations_table] {
            validate_name(table).map_err(|_| ParamsError::InvalidTableName(table.clone()))?;
        }
        if self.networks_table == self.stations_table {
            return Err(ParamsError::SameTable(self.networks_table));
        }

        let target = match self.sink {
            SinkKind::Csv => Target::Csv {
                dir: self.staging_path.clone(),
            },
            SinkKind::Sqlite => Target::Sqlite {
                dir: self.staging_path.clone(),
            },
            SinkKind::Postgres => Target::Postgres(self.connection_info()?),
        };

        let mut policy = RetryPolicy::default();
        if let Some(throttle_ms) = self.throttle_ms {
            policy = policy.with_throttle(Duration::from_millis(throttle_ms));
        }

        let country = Some(self.country)
            .filter(|country| !country.is_empty() && !country.eq_ignore_ascii_case(ALL_COUNTRIES));
        let city = self.city.filter(|city| !city.trim().is_empty());

        Ok(JobConfig {
            job: Job {
                filter: NetworkFilter::new(country, city),
                zone,
                networks_table: self.networks_table,
                stations_table: self.stations_table,
            },
            target,
            base_url: self.base_url,
            policy,
        })
    }

    fn connection_info(&self) -> Result<DatabaseConnectionInfo, ParamsError> {
        let given = [
            self.db_name.is_some(),
            self.db_user.is_some(),
            self.db_password.is_some(),
            self.db_host.is_some(),
            self.db_port.is_some(),
        ];
        if !given.contains(&true) {
            return DatabaseConnectionInfo::from_env().ok_or(ParamsError::MissingDatabase);
        }

        match (
            &self.db_name,
            &self.db_user,
            &self.db_password,
            &self.db_host,
            self.db_port,
        ) {
            (Some(database), Some(username), Some(password), Some(hostname), Some(port)) => {
                Ok(DatabaseConnectionInfo {
                    username: username.clone(),
                    password: password.clone(),
                    hostname: hostname.clone(),
                    port,
                    database: database.clone(),
                })
            }
            _ => {
                let names = ["--db-name", "--db-user", "--db-password", "--db-host", "--db-port"];
                let missing = names
                    .into_iter()
                    .zip(given)
                    .filter(|(_, given)| !given)
                    .map(|(name, _)| name)
                    .collect();
                Err(ParamsError::IncompleteDatabase(missing))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn parse(args: &[&str]) -> JobParameters {
        JobParameters::try_parse_from(
            ["citybike-ingest", "--timezone", "America/New_York"]
                .iter()
                .chain(args),
        )
        .unwrap()
    }

    #[test]
    fn defaults() {
        let config = parse(&[]).resolve().unwrap();

        assert_eq!(config.job.filter, NetworkFilter::default());
        assert_eq!(config.job.zone, chrono_tz::America::New_York);
        assert_eq!(config.job.networks_table, "networks");
        assert_eq!(config.job.stations_table, "stations");
        assert_eq!(config.base_url, "http://api.citybik.es/v2");
        assert_eq!(config.policy, RetryPolicy::default());
        assert!(matches!(config.target, Target::Csv { dir } if dir == PathBuf::from("staging")));
    }

    #[test]
    fn filter_and_throttle() {
        let config = parse(&[
            "--country",
            "US",
            "--city",
            "New York, NY",
            "--throttle-ms",
            "250",
            "--sink",
            "sqlite",
            "--staging-path",
            "/tmp/citybike",
        ])
        .resolve()
        .unwrap();

        assert_eq!(
            config.job.filter,
            NetworkFilter::new(Some("US".to_owned()), Some("New York, NY".to_owned()))
        );
        assert_eq!(config.policy.throttle, Some(Duration::from_millis(250)));
        assert!(matches!(config.target, Target::Sqlite { dir } if dir == PathBuf::from("/tmp/citybike")));
    }

    #[rstest]
    #[case("all")]
    #[case("ALL")]
    fn all_countries_means_no_filter(#[case] country: &str) {
        let config = parse(&["--country", country]).resolve().unwrap();
        assert_eq!(config.job.filter.country, None);
    }

    #[test]
    fn timezone_is_required() {
        assert!(JobParameters::try_parse_from(["citybike-ingest"]).is_err());
    }

    #[test]
    fn unknown_timezone() {
        let params = JobParameters::try_parse_from([
            "citybike-ingest",
            "--timezone",
            "Mars/Olympus_Mons",
        ])
        .unwrap();

        assert!(matches!(params.resolve(), Err(ParamsError::UnknownTimezone(zone)) if zone == "Mars/Olympus_Mons"));
    }

    #[rstest]
    #[case(&["--networks-table", "bike networks"])]
    #[case(&["--stations-table", "stations;"])]
    fn table_names_are_checked(#[case] args: &[&str]) {
        assert!(matches!(
            parse(args).resolve(),
            Err(ParamsError::InvalidTableName(_))
        ));
    }

    #[test]
    fn tables_must_differ() {
        let result = parse(&["--stations-table", "networks"]).resolve();
        assert!(matches!(result, Err(ParamsError::SameTable(_))));
    }

    #[test]
    fn postgres_from_options() {
        let config = parse(&[
            "--sink",
            "postgres",
            "--db-name",
            "city_bike",
            "--db-user",
            "root",
            "--db-password",
            "root",
            "--db-host",
            "pgdatabase",
            "--db-port",
            "5432",
        ])
        .resolve()
        .unwrap();

        let Target::Postgres(info) = config.target else {
            panic!("expected postgres target");
        };
        assert_eq!(info.to_string(), "postgres://root@pgdatabase:5432/city_bike");
    }

    #[test]
    fn partial_database_options_are_reported() {
        let result = parse(&["--sink", "postgres", "--db-name", "city_bike", "--db-port", "5432"])
            .resolve();

        match result {
            Err(ParamsError::IncompleteDatabase(missing)) => {
                assert_eq!(missing, vec!["--db-user", "--db-password", "--db-host"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
