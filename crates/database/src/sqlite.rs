//! Embedded database file through `rusqlite`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use model::{Cell, Record};
use rusqlite::{params_from_iter, types::Value, Connection};

use crate::{
    sql::{self, Dialect, Tables},
    validate_name, RowCount, Sink, SinkError,
};

pub struct SqliteSink {
    path: PathBuf,
    connection: Connection,
    tables: Tables,
}

impl SqliteSink {
    /// Opens the database file, creating it and its parent directories when
    /// missing.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SinkError::Io {
                path: parent.to_owned(),
                source,
            })?;
        }

        let connection = Connection::open(&path).map_err(sqlite_error(&path))?;
        Ok(Self {
            path,
            connection,
            tables: Tables::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    fn write<R: Record>(&mut self, records: &[R], name: &str) -> Result<RowCount, SinkError> {
        validate_name(name)?;
        let path = &self.path;

        let transaction = self.connection.transaction().map_err(sqlite_error(path))?;
        transaction
            .execute(&sql::create_table::<R>(Dialect::Sqlite, name, &self.tables), [])
            .map_err(sqlite_error(path))?;

        let mut written = 0;
        {
            let mut statement = transaction
                .prepare(&sql::insert_ignoring_conflicts::<R>(Dialect::Sqlite, name, 1))
                .map_err(sqlite_error(path))?;
            for record in records {
                let values = record.cells().into_iter().map(to_value);
                written += statement
                    .execute(params_from_iter(values))
                    .map_err(sqlite_error(path))?;
            }
        }
        transaction.commit().map_err(sqlite_error(path))?;

        self.tables.register::<R>(name);
        log::debug!("inserted {written} of {} rows into {name}", records.len());
        Ok(written as RowCount)
    }
}

#[async_trait]
impl Sink for SqliteSink {
    async fn persist<R: Record + Sync>(
        &mut self,
        records: &[R],
        name: &str,
    ) -> Result<RowCount, SinkError> {
        // blocking, see `Sink`
        self.write(records, name)
    }
}

fn to_value(cell: Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Bool(value) => Value::Integer(i64::from(value)),
        Cell::Int(value) => Value::Integer(value),
        Cell::Float(value) => Value::Real(value),
        Cell::Text(value) => Value::Text(value),
        Cell::Timestamp(value) => Value::Text(value.to_rfc3339()),
    }
}

fn sqlite_error(path: &Path) -> impl FnOnce(rusqlite::Error) -> SinkError + '_ {
    move |source| SinkError::Sqlite {
        path: path.to_owned(),
        source,
    }
}
