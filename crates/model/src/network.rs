use utility::id::{HasId, Id};

use crate::{join_list, Cell, Column, ColumnKind, Record};

/// A bike sharing system operating in one city or region.
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    pub id: Id<Network>,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub city: String,
    pub country: String,
    pub company: Vec<String>,
}

impl HasId for Network {
    type IdType = String;
}

impl Record for Network {
    const ENTITY: &'static str = "network";

    const COLUMNS: &'static [Column] = &[
        Column::required("id", ColumnKind::Text),
        Column::required("name", ColumnKind::Text),
        Column::required("latitude", ColumnKind::Float),
        Column::required("longitude", ColumnKind::Float),
        Column::required("city", ColumnKind::Text),
        Column::required("country", ColumnKind::Text),
        Column::required("company", ColumnKind::Text),
    ];

    const KEY: &'static [&'static str] = &["id"];

    fn cells(&self) -> Vec<Cell> {
        vec![
            self.id.raw().into(),
            self.name.as_str().into(),
            self.latitude.into(),
            self.longitude.into(),
            self.city.as_str().into(),
            self.country.as_str().into(),
            join_list(&self.company).into(),
        ]
    }
}
