use std::{env, fmt, path::PathBuf};

use async_trait::async_trait;
use model::Record;
use thiserror::Error;

pub use flat_file::CsvSink;
pub use postgres::PgSink;
pub use sqlite::SqliteSink;

pub mod flat_file;
pub mod postgres;
pub mod sqlite;
mod sql;

/// File name of the embedded database inside the staging directory.
pub const DB_FILE_NAME: &str = "citybike.db";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("invalid table name '{0}'")]
    InvalidName(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path}: header {found:?} does not match columns {expected:?}")]
    HeaderMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("{path}: {source}")]
    Sqlite {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{target}: {source}")]
    Postgres {
        target: String,
        #[source]
        source: sqlx::Error,
    },
}

pub type RowCount = u64;

/// Destination for collections of records. Every `persist` call creates the
/// named table (or file) when it is missing and skips records whose key is
/// already stored.
///
/// The file and SQLite sinks do their I/O on the calling task. A run persists
/// its collections one after another and nothing else shares the runtime.
#[async_trait]
pub trait Sink: Send {
    /// Returns the number of rows actually written.
    async fn persist<R: Record + Sync>(
        &mut self,
        records: &[R],
        name: &str,
    ) -> Result<RowCount, SinkError>;
}

/// Table and file names end up in SQL and paths, so only plain identifiers
/// are accepted.
pub fn validate_name(name: &str) -> Result<(), SinkError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 63;
    if valid {
        Ok(())
    } else {
        Err(SinkError::InvalidName(name.to_owned()))
    }
}

#[derive(Clone)]
pub struct DatabaseConnectionInfo {
    pub username: String,
    pub password: String,
    pub hostname: String,
    pub port: u16,
    pub database: String,
}

impl DatabaseConnectionInfo {
    pub fn from_env() -> Option<Self> {
        let username = env::var("DATABASE_USER").ok()?;
        let password = env::var("DATABASE_PASSWORD").ok()?;
        let hostname = env::var("DATABASE_HOST").ok()?;
        let port: u16 = env::var("DATABASE_PORT").ok()?.parse().ok()?;
        let database = env::var("DATABASE_NAME").ok()?;
        Some(Self {
            username,
            password,
            hostname,
            port,
            database,
        })
    }

    pub(crate) fn postgres_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.hostname, self.port, self.database
        )
    }
}

// keeps the password out of logs
impl fmt::Display for DatabaseConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "postgres://{}@{}:{}/{}",
            self.username, self.hostname, self.port, self.database
        )
    }
}

impl fmt::Debug for DatabaseConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConnectionInfo")
            .field("username", &self.username)
            .field("password", &"***")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("database", &self.database)
            .finish()
    }
}

/// Where a run persists its records.
#[derive(Debug, Clone)]
pub enum Target {
    /// One pipe-delimited file per table inside `dir`.
    Csv { dir: PathBuf },
    /// An embedded database file named [`DB_FILE_NAME`] inside `dir`.
    Sqlite { dir: PathBuf },
    Postgres(DatabaseConnectionInfo),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Csv { dir } => write!(f, "csv files in {}", dir.display()),
            Target::Sqlite { dir } => write!(f, "sqlite {}", dir.join(DB_FILE_NAME).display()),
            Target::Postgres(info) => write!(f, "{info}"),
        }
    }
}

pub enum AnySink {
    Csv(CsvSink),
    Sqlite(SqliteSink),
    Postgres(PgSink),
}

impl AnySink {
    pub async fn open(target: Target) -> Result<Self, SinkError> {
        log::info!("opening sink: {target}");
        Ok(match target {
            Target::Csv { dir } => Self::Csv(CsvSink::new(dir)),
            Target::Sqlite { dir } => Self::Sqlite(SqliteSink::open(dir.join(DB_FILE_NAME))?),
            Target::Postgres(info) => Self::Postgres(PgSink::connect(&info).await?),
        })
    }
}

#[async_trait]
impl Sink for AnySink {
    async fn persist<R: Record + Sync>(
        &mut self,
        records: &[R],
        name: &str,
    ) -> Result<RowCount, SinkError> {
        match self {
            AnySink::Csv(sink) => sink.persist(records, name).await,
            AnySink::Sqlite(sink) => sink.persist(records, name).await,
            AnySink::Postgres(sink) => sink.persist(records, name).await,
        }
    }
}
