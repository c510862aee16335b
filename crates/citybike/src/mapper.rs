//! Mapping of raw API payloads into [`Network`]s and [`Station`]s.
//!
//! Every record is flattened with [`normalize`] first and then read by its
//! flat column names. Problems are collected over all records, so a single
//! [`MapError::Validation`] lists everything that is wrong with a response.

use core::fmt;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use itertools::Itertools;
use model::{network::Network, split_list, station::Station};
use serde_json::Value;
use thiserror::Error;
use utility::{id::Id, time::parse_in_zone};

use crate::normalize::{normalize, FlatRecord, NormalizeError};

pub const NETWORKS_KEY: &str = "networks";
pub const NETWORK_KEY: &str = "network";
pub const STATIONS_KEY: &str = "stations";

const NETWORK_STATIONS_PATH: &str = "network.stations";

#[derive(Debug, Clone, PartialEq)]
pub enum Problem {
    Missing,
    WrongType { expected: &'static str, found: String },
    Invalid(String),
    NotAnObject,
    Unflattenable(NormalizeError),
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::WrongType { expected, found } => write!(f, "expected {expected}, found {found}"),
            Self::Invalid(why) => write!(f, "{why}"),
            Self::NotAnObject => write!(f, "record is not an object"),
            Self::Unflattenable(why) => write!(f, "{why}"),
        }
    }
}

/// One field level problem of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    /// Position of the record in the response.
    pub record: usize,
    pub id: Option<String>,
    pub field: Option<String>,
    pub problem: Problem,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record {}", self.record)?;
        if let Some(id) = &self.id {
            write!(f, " (id '{id}')")?;
        }
        if let Some(field) = &self.field {
            write!(f, ", field '{field}'")?;
        }
        write!(f, ": {}", self.problem)
    }
}

#[derive(Debug, Error)]
pub enum MapError {
    /// The response lacks the key holding the records, or it is not a list.
    #[error("response has no '{0}' list")]
    MissingField(&'static str),

    #[error("{} invalid field(s): {}", .0.len(), .0.iter().join("; "))]
    Validation(Vec<Violation>),
}

impl MapError {
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::MissingField(_) => &[],
            Self::Validation(violations) => violations,
        }
    }
}

pub fn map_networks(raw: &Value) -> Result<Vec<Network>, MapError> {
    let records = raw
        .get(NETWORKS_KEY)
        .and_then(Value::as_array)
        .ok_or(MapError::MissingField(NETWORKS_KEY))?;

    let mut violations = Vec::new();
    let mut networks = Vec::with_capacity(records.len());
    let mut seen = HashSet::new();
    for (index, record) in records.iter().enumerate() {
        let Some(flat) = flatten(index, record, &mut violations) else {
            continue;
        };
        let mut fields = Fields::new(&flat, index, &mut violations);
        let Some(network) = network(&mut fields) else {
            continue;
        };
        // network ids are unique across the whole response
        if !seen.insert(network.id.raw()) {
            violations.push(Violation {
                record: index,
                id: Some(network.id.raw()),
                field: Some("id".to_owned()),
                problem: Problem::Invalid("duplicate id".to_owned()),
            });
            continue;
        }
        networks.push(network);
    }

    finish(networks, violations)
}

/// Maps the stations of one network, stamping each with `network_id`.
/// Timestamps without an offset are read in `zone`.
pub fn map_stations(
    raw: &Value,
    network_id: &Id<Network>,
    zone: Tz,
) -> Result<Vec<Station>, MapError> {
    let records = raw
        .get(NETWORK_KEY)
        .and_then(|network| network.get(STATIONS_KEY))
        .and_then(Value::as_array)
        .ok_or(MapError::MissingField(NETWORK_STATIONS_PATH))?;

    let mut violations = Vec::new();
    let mut stations = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        let Some(flat) = flatten(index, record, &mut violations) else {
            continue;
        };
        let mut fields = Fields::new(&flat, index, &mut violations);
        if let Some(station) = station(&mut fields, network_id, zone) {
            stations.push(station);
        }
    }

    finish(stations, violations)
}

fn network(fields: &mut Fields<'_>) -> Option<Network> {
    let id = fields.required("id", text);
    let name = fields.required("name", text);
    let latitude = fields.required("location_latitude", float);
    let longitude = fields.required("location_longitude", float);
    let city = fields.required("location_city", text);
    let country = fields.required("location_country", text);
    let company = fields.list("company");

    Some(Network {
        id: Id::new(id?),
        name: name?,
        latitude: latitude?,
        longitude: longitude?,
        city: city?,
        country: country?,
        company,
    })
}

fn station(fields: &mut Fields<'_>, network_id: &Id<Network>, zone: Tz) -> Option<Station> {
    let id = fields.required("id", text);
    let name = fields.required("name", text);
    let latitude = fields.required("latitude", float);
    let longitude = fields.required("longitude", float);
    let timestamp = fields.required("timestamp", |value| timestamp(value, zone));
    let free_bikes = fields.optional("free_bikes", count);
    let empty_slots = fields.optional("empty_slots", count);
    let is_renting = fields.required("extra_renting", boolean);
    let is_returning = fields.required("extra_returning", boolean);
    let last_updated_s = fields.required("extra_last_updated", integer);
    let address = fields.optional("extra_address", text);
    let post_code = fields.optional("extra_post_code", text);
    let payment = fields.list("extra_payment");
    let has_payment_terminal = fields.required("extra_payment-terminal", boolean);
    let altitude = fields.optional("extra_altitude", float);
    let slots = fields.required("extra_slots", count);
    let has_ebikes = fields.optional("extra_has_ebikes", boolean);
    let num_ebikes = fields.optional("extra_ebikes", count);

    Some(Station {
        id: Id::new(id?),
        network_id: network_id.clone(),
        timestamp: timestamp?,
        name: name?,
        latitude: latitude?,
        longitude: longitude?,
        free_bikes,
        empty_slots,
        is_renting: is_renting?,
        is_returning: is_returning?,
        last_updated_s: last_updated_s?,
        address,
        post_code,
        payment,
        has_payment_terminal: has_payment_terminal?,
        altitude,
        slots: slots?,
        has_ebikes,
        num_ebikes,
    })
}

fn finish<T>(items: Vec<T>, violations: Vec<Violation>) -> Result<Vec<T>, MapError> {
    if violations.is_empty() {
        Ok(items)
    } else {
        Err(MapError::Validation(violations))
    }
}

fn flatten(index: usize, record: &Value, violations: &mut Vec<Violation>) -> Option<FlatRecord> {
    let Value::Object(object) = record else {
        violations.push(Violation {
            record: index,
            id: None,
            field: None,
            problem: Problem::NotAnObject,
        });
        return None;
    };

    normalize(object)
        .map_err(|why| {
            violations.push(Violation {
                record: index,
                id: object.get("id").and_then(|id| text(id).ok()),
                field: why.field().map(str::to_owned),
                problem: Problem::Unflattenable(why),
            })
        })
        .ok()
}

/// Typed access to the columns of one flat record. Every failed access is
/// recorded as a violation.
struct Fields<'a> {
    flat: &'a FlatRecord,
    record: usize,
    id: Option<String>,
    violations: &'a mut Vec<Violation>,
}

impl<'a> Fields<'a> {
    fn new(flat: &'a FlatRecord, record: usize, violations: &'a mut Vec<Violation>) -> Self {
        let id = flat.get("id").and_then(|id| text(id).ok());
        Self {
            flat,
            record,
            id,
            violations,
        }
    }

    /// `null` counts as absent.
    fn value(&self, field: &str) -> Option<&'a Value> {
        self.flat.get(field).filter(|value| !value.is_null())
    }

    fn violation(&mut self, field: &str, problem: Problem) {
        self.violations.push(Violation {
            record: self.record,
            id: self.id.clone(),
            field: Some(field.to_owned()),
            problem,
        });
    }

    fn required<T, F>(&mut self, field: &str, coerce: F) -> Option<T>
    where
        F: Fn(&Value) -> Result<T, Problem>,
    {
        let Some(value) = self.value(field) else {
            self.violation(field, Problem::Missing);
            return None;
        };
        self.optional_value(field, value, coerce)
    }

    fn optional<T, F>(&mut self, field: &str, coerce: F) -> Option<T>
    where
        F: Fn(&Value) -> Result<T, Problem>,
    {
        let value = self.value(field)?;
        self.optional_value(field, value, coerce)
    }

    fn optional_value<T, F>(&mut self, field: &str, value: &Value, coerce: F) -> Option<T>
    where
        F: Fn(&Value) -> Result<T, Problem>,
    {
        match coerce(value) {
            Ok(coerced) => Some(coerced),
            Err(problem) => {
                self.violation(field, problem);
                None
            }
        }
    }

    /// A joined list column. Absent means empty.
    fn list(&mut self, field: &str) -> Vec<String> {
        match self.value(field) {
            None => Vec::new(),
            Some(Value::String(joined)) => split_list(joined),
            Some(other) => {
                let problem = wrong_type("list", other);
                self.violation(field, problem);
                Vec::new()
            }
        }
    }
}

fn wrong_type(expected: &'static str, found: &Value) -> Problem {
    Problem::WrongType {
        expected,
        found: found.to_string(),
    }
}

fn text(value: &Value) -> Result<String, Problem> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(wrong_type("string", other)),
    }
}

fn float(value: &Value) -> Result<f64, Problem> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| wrong_type("number", value))
}

fn integer(value: &Value) -> Result<i64, Problem> {
    let parsed = match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|float| float.fract() == 0.0 && float.abs() < i64::MAX as f64)
                .map(|float| float as i64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| wrong_type("integer", value))
}

fn count(value: &Value) -> Result<u32, Problem> {
    let parsed = integer(value)?;
    u32::try_from(parsed).map_err(|_| wrong_type("non-negative integer", value))
}

fn boolean(value: &Value) -> Result<bool, Problem> {
    let parsed = match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    };
    parsed.ok_or_else(|| wrong_type("boolean", value))
}

fn timestamp(value: &Value, zone: Tz) -> Result<DateTime<Utc>, Problem> {
    match value {
        Value::String(text) => {
            parse_in_zone(text, zone).map_err(|why| Problem::Invalid(why.to_string()))
        }
        other => Err(wrong_type("timestamp", other)),
    }
}
