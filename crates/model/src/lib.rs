use chrono::{DateTime, Utc};
use itertools::Itertools;

pub mod network;
pub mod station;

/// Separator used wherever a sequence has to live in a single column.
pub const LIST_SEPARATOR: &str = "&&";

pub fn join_list<S: AsRef<str>>(values: &[S]) -> String {
    values.iter().map(|value| value.as_ref()).join(LIST_SEPARATOR)
}

/// Inverse of [`join_list`]. An empty string is an empty sequence.
pub fn split_list(value: &str) -> Vec<String> {
    if value.is_empty() {
        return Vec::new();
    }
    value.split(LIST_SEPARATOR).map(str::to_owned).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Float,
    Integer,
    Boolean,
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
    /// Entity whose key this column refers to.
    pub references: Option<&'static str>,
}

impl Column {
    pub const fn required(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
            references: None,
        }
    }

    pub const fn optional(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
            references: None,
        }
    }

    pub const fn referencing(mut self, entity: &'static str) -> Self {
        self.references = Some(entity);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Cell {
    /// Text form used by flat files. `Null` renders as an empty field.
    pub fn render(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Bool(value) => value.to_string(),
            Cell::Int(value) => value.to_string(),
            Cell::Float(value) => value.to_string(),
            Cell::Text(value) => value.clone(),
            Cell::Timestamp(value) => value.to_rfc3339(),
        }
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<u32> for Cell {
    fn from(value: u32) -> Self {
        Cell::Int(i64::from(value))
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_owned())
    }
}

impl From<DateTime<Utc>> for Cell {
    fn from(value: DateTime<Utc>) -> Self {
        Cell::Timestamp(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map_or(Cell::Null, Into::into)
    }
}

/// Tabular view of an entity, the only thing persistence sinks get to see.
pub trait Record {
    /// Name other records use to reference this one.
    const ENTITY: &'static str;
    /// Columns in storage order.
    const COLUMNS: &'static [Column];
    /// Columns forming the unique key.
    const KEY: &'static [&'static str];

    /// One cell per entry of `COLUMNS`, in the same order.
    fn cells(&self) -> Vec<Cell>;

    fn key_positions() -> Vec<usize> {
        Self::KEY
            .iter()
            .filter_map(|key| Self::COLUMNS.iter().position(|column| column.name == *key))
            .collect()
    }
}
