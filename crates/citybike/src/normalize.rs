//! Flattening of nested API records into single-level rows.
//!
//! Nested objects are expanded into `{field}_{key}` columns and lists of
//! scalars are joined into one `&&`-separated string. Lists of objects or
//! lists are not supported.

use std::collections::VecDeque;

use indexmap::IndexMap;
use model::join_list;
use serde_json::{Map, Value};
use thiserror::Error;

/// A record without nested values. Column order follows the source record,
/// expanded columns taking the place of the object they came from.
pub type FlatRecord = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("field '{field}' is a list of nested values")]
    UnsupportedList { field: String },

    #[error("column '{column}' would be produced twice")]
    ColumnCollision { column: String },

    #[error("item {index} is not an object")]
    NotAnObject { index: usize },
}

impl NormalizeError {
    /// Column the error is about, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::UnsupportedList { field } => Some(field),
            Self::ColumnCollision { column } => Some(column),
            Self::NotAnObject { .. } => None,
        }
    }
}

pub fn normalize(record: &Map<String, Value>) -> Result<FlatRecord, NormalizeError> {
    let mut flat: FlatRecord = record
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    // every column still to be inspected; expansions push their new columns
    let mut pending: VecDeque<String> = flat.keys().cloned().collect();

    while let Some(column) = pending.pop_front() {
        match flat.get(&column) {
            Some(Value::Array(items)) => {
                let joined = join_scalars(&column, items)?;
                flat.insert(column, Value::String(joined));
            }
            Some(Value::Object(_)) => {
                let Some((position, _, Value::Object(nested))) = flat.shift_remove_full(&column)
                else {
                    continue;
                };
                for (offset, (key, value)) in nested.into_iter().enumerate() {
                    let expanded = format!("{column}_{key}");
                    if flat.contains_key(&expanded) {
                        return Err(NormalizeError::ColumnCollision { column: expanded });
                    }
                    flat.shift_insert(position + offset, expanded.clone(), value);
                    pending.push_back(expanded);
                }
            }
            _ => {}
        }
    }

    Ok(flat)
}

/// Normalizes every item of a list of records.
pub fn normalize_all(records: &[Value]) -> Result<Vec<FlatRecord>, NormalizeError> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| match record {
            Value::Object(object) => normalize(object),
            _ => Err(NormalizeError::NotAnObject { index }),
        })
        .collect()
}

fn join_scalars(field: &str, items: &[Value]) -> Result<String, NormalizeError> {
    let parts = items
        .iter()
        .map(|item| match item {
            Value::String(text) => Ok(text.clone()),
            Value::Null => Ok(String::new()),
            Value::Bool(_) | Value::Number(_) => Ok(item.to_string()),
            Value::Array(_) | Value::Object(_) => Err(NormalizeError::UnsupportedList {
                field: field.to_owned(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(join_list(&parts))
}
