//! PostgreSQL through `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{Cell, ColumnKind, Record};
use sqlx::{
    encode::IsNull,
    postgres::{PgArgumentBuffer, PgArguments, PgTypeInfo},
    Arguments as _, Encode, PgPool, Postgres, Type,
};

use crate::{
    sql::{self, Dialect, Tables},
    validate_name, DatabaseConnectionInfo, RowCount, Sink, SinkError,
};

const MAX_CHUNK_SIZE: usize = 100;

pub struct PgSink {
    pool: PgPool,
    target: String,
    tables: Tables,
}

impl PgSink {
    pub async fn connect(info: &DatabaseConnectionInfo) -> Result<Self, SinkError> {
        let target = info.to_string();
        let pool = PgPool::connect(&info.postgres_url())
            .await
            .map_err(|source| SinkError::Postgres {
                target: target.clone(),
                source,
            })?;

        Ok(Self {
            pool,
            target,
            tables: Tables::default(),
        })
    }

    fn error(&self, table: &str) -> impl FnOnce(sqlx::Error) -> SinkError + '_ {
        let target = format!("{} table {table}", self.target);
        move |source| SinkError::Postgres { target, source }
    }
}

#[async_trait]
impl Sink for PgSink {
    async fn persist<R: Record + Sync>(
        &mut self,
        records: &[R],
        name: &str,
    ) -> Result<RowCount, SinkError> {
        validate_name(name)?;

        let mut tx = self.pool.begin().await.map_err(self.error(name))?;

        sqlx::query(&sql::create_table::<R>(Dialect::Postgres, name, &self.tables))
            .execute(&mut *tx)
            .await
            .map_err(self.error(name))?;

        let mut written = 0;
        for chunk in records.chunks(MAX_CHUNK_SIZE) {
            let query = sql::insert_ignoring_conflicts::<R>(Dialect::Postgres, name, chunk.len());
            let mut args = PgArguments::default();
            for record in chunk {
                bind_row::<R>(&mut args, record.cells());
            }

            written += sqlx::query_with(&query, args)
                .execute(&mut *tx)
                .await
                .map_err(self.error(name))?
                .rows_affected();
        }

        tx.commit().await.map_err(self.error(name))?;

        self.tables.register::<R>(name);
        log::debug!("inserted {written} of {} rows into {name}", records.len());
        Ok(written)
    }
}

fn bind_row<R: Record>(args: &mut PgArguments, cells: Vec<Cell>) {
    for (column, cell) in R::COLUMNS.iter().zip(cells) {
        match cell {
            Cell::Null => args.add(TypedNull(column.kind)),
            Cell::Bool(value) => args.add(value),
            Cell::Int(value) => args.add(value),
            Cell::Float(value) => args.add(value),
            Cell::Text(value) => args.add(value),
            Cell::Timestamp(value) => args.add(value),
        }
    }
}

/// A NULL that still carries the type of its column.
#[derive(Debug, Clone, Copy)]
struct TypedNull(ColumnKind);

impl TypedNull {
    fn column_type(&self) -> PgTypeInfo {
        match self.0 {
            ColumnKind::Text => <String as Type<Postgres>>::type_info(),
            ColumnKind::Float => <f64 as Type<Postgres>>::type_info(),
            ColumnKind::Integer => <i64 as Type<Postgres>>::type_info(),
            ColumnKind::Boolean => <bool as Type<Postgres>>::type_info(),
            ColumnKind::Timestamp => <DateTime<Utc> as Type<Postgres>>::type_info(),
        }
    }
}

impl Type<Postgres> for TypedNull {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }
}

impl Encode<'_, Postgres> for TypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> IsNull {
        IsNull::Yes
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(self.column_type())
    }
}
