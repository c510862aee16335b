//! Statement builders shared by the SQL sinks.

use std::{collections::HashMap, fmt::Write as _};

use itertools::Itertools;
use model::{Column, ColumnKind, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    fn column_type(self, kind: ColumnKind) -> &'static str {
        match (self, kind) {
            (_, ColumnKind::Text) => "TEXT",
            (Dialect::Sqlite, ColumnKind::Float) => "REAL",
            (Dialect::Sqlite, ColumnKind::Integer | ColumnKind::Boolean) => "INTEGER",
            (Dialect::Sqlite, ColumnKind::Timestamp) => "TEXT",
            (Dialect::Postgres, ColumnKind::Float) => "DOUBLE PRECISION",
            (Dialect::Postgres, ColumnKind::Integer) => "BIGINT",
            (Dialect::Postgres, ColumnKind::Boolean) => "BOOLEAN",
            (Dialect::Postgres, ColumnKind::Timestamp) => "TIMESTAMPTZ",
        }
    }

    fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Postgres => format!("${index}"),
        }
    }
}

pub(crate) fn quote(identifier: &str) -> String {
    format!("\"{identifier}\"")
}

/// Tables written in this session, by the entity they hold. Used to declare
/// foreign keys for columns referencing another entity.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    by_entity: HashMap<&'static str, (String, &'static [&'static str])>,
}

impl Tables {
    pub(crate) fn register<R: Record>(&mut self, table: &str) {
        self.by_entity
            .insert(R::ENTITY, (table.to_owned(), R::KEY));
    }

    /// Table and key column of `entity`, if it is known and has a single
    /// column key.
    fn referenced(&self, entity: &str) -> Option<(&str, &'static str)> {
        match self.by_entity.get(entity) {
            Some((table, [key])) => Some((table.as_str(), *key)),
            _ => None,
        }
    }
}

pub(crate) fn create_table<R: Record>(dialect: Dialect, table: &str, tables: &Tables) -> String {
    let mut definitions: Vec<String> = R::COLUMNS
        .iter()
        .map(|column| column_definition(dialect, column))
        .collect();

    definitions.push(format!(
        "PRIMARY KEY ({})",
        R::KEY.iter().map(|key| quote(key)).join(", ")
    ));

    for column in R::COLUMNS {
        let Some((referenced, key)) = column
            .references
            .and_then(|entity| tables.referenced(entity))
        else {
            continue;
        };
        definitions.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            quote(column.name),
            quote(referenced),
            quote(key)
        ));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(table),
        definitions.join(", ")
    )
}

fn column_definition(dialect: Dialect, column: &Column) -> String {
    let mut definition = format!("{} {}", quote(column.name), dialect.column_type(column.kind));
    if !column.nullable {
        definition.push_str(" NOT NULL");
    }
    definition
}

/// Insert of `rows` rows that leaves existing keys untouched.
pub(crate) fn insert_ignoring_conflicts<R: Record>(
    dialect: Dialect,
    table: &str,
    rows: usize,
) -> String {
    let columns = R::COLUMNS.iter().map(|column| quote(column.name)).join(", ");
    let mut query = match dialect {
        Dialect::Sqlite => format!("INSERT OR IGNORE INTO {} ({columns}) VALUES ", quote(table)),
        Dialect::Postgres => format!("INSERT INTO {} ({columns}) VALUES ", quote(table)),
    };

    let mut placeholder_index = 1;
    for i in 0..rows {
        if i > 0 {
            query.push_str(", ");
        }
        query.push('(');
        for j in 0..R::COLUMNS.len() {
            if j > 0 {
                query.push_str(", ");
            }
            query.push_str(&dialect.placeholder(placeholder_index));
            placeholder_index += 1;
        }
        query.push(')');
    }

    if dialect == Dialect::Postgres {
        let _ = write!(
            &mut query,
            " ON CONFLICT ({}) DO NOTHING",
            R::KEY.iter().map(|key| quote(key)).join(", ")
        );
    }
    query
}

#[cfg(test)]
mod tests {
    use model::{network::Network, station::Station};

    use super::*;

    #[test]
    fn station_table_for_postgres() {
        let statement = create_table::<Station>(Dialect::Postgres, "stations", &Tables::default());

        assert!(statement.starts_with("CREATE TABLE IF NOT EXISTS \"stations\" (\"id\" TEXT NOT NULL, "));
        assert!(statement.contains("\"timestamp\" TIMESTAMPTZ NOT NULL"));
        assert!(statement.contains("\"address\" TEXT, "));
        assert!(statement.contains("\"is_renting\" BOOLEAN NOT NULL"));
        assert!(statement.ends_with("PRIMARY KEY (\"id\", \"timestamp\"))"));
        assert!(!statement.contains("FOREIGN KEY"));
    }

    #[test]
    fn known_network_table_becomes_a_foreign_key() {
        let mut tables = Tables::default();
        tables.register::<Network>("bike_networks");

        let statement = create_table::<Station>(Dialect::Sqlite, "stations", &tables);

        assert!(statement.contains("\"is_renting\" INTEGER NOT NULL"));
        assert!(statement.ends_with(
            "FOREIGN KEY (\"network_id\") REFERENCES \"bike_networks\" (\"id\"))"
        ));
    }

    #[test]
    fn postgres_insert_numbers_placeholders_across_rows() {
        let statement = insert_ignoring_conflicts::<Network>(Dialect::Postgres, "networks", 2);

        assert!(statement.starts_with(
            "INSERT INTO \"networks\" (\"id\", \"name\", \"latitude\", \"longitude\", \"city\", \"country\", \"company\") VALUES ($1, "
        ));
        assert!(statement.ends_with(
            "($8, $9, $10, $11, $12, $13, $14) ON CONFLICT (\"id\") DO NOTHING"
        ));
    }

    #[test]
    fn sqlite_insert_ignores_duplicates() {
        let statement = insert_ignoring_conflicts::<Network>(Dialect::Sqlite, "networks", 1);

        assert!(statement.starts_with("INSERT OR IGNORE INTO \"networks\""));
        assert!(statement.ends_with("VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"));
    }
}
