use chrono::{DateTime, Utc};
use utility::id::{HasId, Id};

use crate::{join_list, network::Network, Cell, Column, ColumnKind, Record};

/// A docking station of a [`Network`], as observed at `timestamp`.
///
/// Optional fields stay `None` when the API did not report them, so "unknown"
/// is never confused with `false` or `0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub id: Id<Station>,
    pub network_id: Id<Network>,
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub free_bikes: Option<u32>,
    pub empty_slots: Option<u32>,
    pub is_renting: bool,
    pub is_returning: bool,
    pub last_updated_s: i64,
    pub address: Option<String>,
    pub post_code: Option<String>,
    pub payment: Vec<String>,
    pub has_payment_terminal: bool,
    pub altitude: Option<f64>,
    pub slots: u32,
    pub has_ebikes: Option<bool>,
    pub num_ebikes: Option<u32>,
}

impl HasId for Station {
    type IdType = String;
}

impl Record for Station {
    const ENTITY: &'static str = "station";

    const COLUMNS: &'static [Column] = &[
        Column::required("id", ColumnKind::Text),
        Column::required("network_id", ColumnKind::Text).referencing(Network::ENTITY),
        Column::required("timestamp", ColumnKind::Timestamp),
        Column::required("name", ColumnKind::Text),
        Column::required("latitude", ColumnKind::Float),
        Column::required("longitude", ColumnKind::Float),
        Column::optional("free_bikes", ColumnKind::Integer),
        Column::optional("empty_slots", ColumnKind::Integer),
        Column::required("is_renting", ColumnKind::Boolean),
        Column::required("is_returning", ColumnKind::Boolean),
        Column::required("last_updated_s", ColumnKind::Integer),
        Column::optional("address", ColumnKind::Text),
        Column::optional("post_code", ColumnKind::Text),
        Column::required("payment", ColumnKind::Text),
        Column::required("has_payment_terminal", ColumnKind::Boolean),
        Column::optional("altitude", ColumnKind::Float),
        Column::required("slots", ColumnKind::Integer),
        Column::optional("has_ebikes", ColumnKind::Boolean),
        Column::optional("num_ebikes", ColumnKind::Integer),
    ];

    const KEY: &'static [&'static str] = &["id", "timestamp"];

    fn cells(&self) -> Vec<Cell> {
        vec![
            self.id.raw().into(),
            self.network_id.raw().into(),
            self.timestamp.into(),
            self.name.as_str().into(),
            self.latitude.into(),
            self.longitude.into(),
            self.free_bikes.into(),
            self.empty_slots.into(),
            self.is_renting.into(),
            self.is_returning.into(),
            self.last_updated_s.into(),
            self.address.clone().into(),
            self.post_code.clone().into(),
            join_list(&self.payment).into(),
            self.has_payment_terminal.into(),
            self.altitude.into(),
            self.slots.into(),
            self.has_ebikes.into(),
            self.num_ebikes.into(),
        ]
    }
}
