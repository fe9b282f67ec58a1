//! Display-ready rows for renderers.

use chrono::{DateTime, Local, Utc};
use ffb_shared::{Car, CarState};

use crate::store::TableSnapshot;

const PLACEHOLDER: &str = "-";

/// One car formatted for a table cell layout (id / state / assigned / TTL / updated).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarRow {
    pub id: String,
    pub state: &'static str,
    pub assigned: String,
    pub ttl: String,
    pub updated: String,
}

impl From<&Car> for CarRow {
    fn from(car: &Car) -> Self {
        let assigned = match car.assigned_to.as_deref() {
            Some(user) if !car.state.is_free() && !user.is_empty() => user.to_string(),
            _ => PLACEHOLDER.to_string(),
        };
        let ttl = match car.state {
            CarState::Reserved => car.ttl_seconds.unwrap_or(0).to_string(),
            _ => PLACEHOLDER.to_string(),
        };
        Self {
            id: car.id.clone(),
            state: car.state.as_str(),
            assigned,
            ttl,
            updated: car
                .updated_at
                .map(format_local)
                .unwrap_or_else(|| PLACEHOLDER.to_string()),
        }
    }
}

pub fn rows(table: &TableSnapshot) -> Vec<CarRow> {
    table.rows.iter().map(CarRow::from).collect()
}

fn format_local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}
