//! Records served by the REST read endpoints.
//!
//! The endpoints return loosely-typed JSON; everything here tolerates missing
//! or mistyped fields instead of rejecting whole responses.

use crate::entity::{Attributes, EntityId};
use crate::error::DashboardResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;

/// Read-only REST endpoints consumed by the dashboard.
pub trait ReadApi: Send + Sync {
    /// Raw facility records.
    fn facilities(&self) -> impl Future<Output = DashboardResult<Vec<Value>>> + Send;

    /// Raw production-history records.
    fn production_history(&self) -> impl Future<Output = DashboardResult<Vec<Value>>> + Send;

    /// The signed-in user's profile record.
    fn user_profile(&self) -> impl Future<Output = DashboardResult<Value>> + Send;
}

/// Convert backend facility records into the shape the dashboard stores.
///
/// `address`, `latitude`/`longitude`, `active`, `capacity` and `description`
/// are mapped onto `location`, `coordinates`, `status`, `production` and
/// `notes`. Every backend field is kept as well and wins over a derived one of
/// the same name. Records that are not JSON objects are dropped.
pub fn facilities_from_backend(records: &[Value]) -> Vec<Attributes> {
    records
        .iter()
        .filter_map(Value::as_object)
        .map(facility_from_backend)
        .collect()
}

pub fn facility_from_backend(backend: &Attributes) -> Attributes {
    let text = |field: &str| {
        backend
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let number = |field: &str| {
        backend
            .get(field)
            .and_then(Value::as_f64)
            .filter(|n| n.is_finite() && *n != 0.0)
    };

    let mut record = Attributes::new();
    record.insert("name".to_string(), Value::from(text("name")));
    record.insert("location".to_string(), Value::from(text("address")));

    if let (Some(lat), Some(lng)) = (number("latitude"), number("longitude")) {
        record.insert("coordinates".to_string(), Value::from(vec![lat, lng]));
    }

    let active = backend.get("active").and_then(Value::as_bool).unwrap_or(false);
    let status = if active { "operational" } else { "maintenance" };
    record.insert("status".to_string(), Value::from(status));

    let production = match backend.get("capacity").and_then(Value::as_f64) {
        Some(capacity) if capacity > 0.0 => format!("{} kg/mois", capacity),
        _ => "N/A".to_string(),
    };
    record.insert("production".to_string(), Value::from(production));
    record.insert("notes".to_string(), Value::from(text("description")));

    for (field, value) in backend {
        // A zero id means "not assigned yet" on the backend.
        if field == "id" && (value.is_null() || value.as_u64() == Some(0)) {
            continue;
        }
        record.insert(field.clone(), value.clone());
    }

    record
}

/// One point of a facility's production history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductionPoint {
    pub period: String,
    pub facility: Option<EntityId>,
    pub tonnes: f64,
    pub recycling_rate: Option<f64>,
}

/// Parse production-history records, skipping those without a period.
pub fn production_history(records: &[Value]) -> Vec<ProductionPoint> {
    records
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|record| {
            let period = ["period", "month", "date", "year"]
                .iter()
                .find_map(|field| match record.get(*field)? {
                    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })?;

            let facility = ["facility", "refinery", "plant_id"]
                .iter()
                .find_map(|field| record.get(*field).and_then(EntityId::from_value));

            let tonnes = ["tonnes", "production", "value"]
                .iter()
                .find_map(|field| record.get(*field).and_then(Value::as_f64))
                .filter(|n| n.is_finite())
                .unwrap_or(0.0);

            let recycling_rate = record
                .get("recycling_rate")
                .and_then(Value::as_f64)
                .filter(|n| n.is_finite());

            Some(ProductionPoint {
                period,
                facility,
                tonnes,
                recycling_rate,
            })
        })
        .collect()
}

/// Profile of the signed-in user, with every field optional on the wire.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
}

impl UserProfile {
    /// Tolerant parse; a record of the wrong shape gives an empty profile.
    pub fn from_value(value: &Value) -> Self {
        match serde_json::from_value(value.clone()) {
            Ok(profile) => profile,
            Err(e) => {
                log::warn!("unexpected user profile shape: {}", e);
                UserProfile::default()
            }
        }
    }

    pub fn display_name(&self) -> &str {
        if self.first_name.is_empty() {
            &self.username
        } else {
            &self.first_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backend_facility_conversion() {
        let records = vec![
            json!({
                "id": 4,
                "name": "Cirba",
                "address": "Lancaster, OH",
                "latitude": 39.7,
                "longitude": -82.5,
                "active": true,
                "capacity": 1200,
                "description": "Black mass"
            }),
            json!("not a record"),
            json!({ "name": "Bare" }),
        ];

        let converted = facilities_from_backend(&records);
        assert_eq!(converted.len(), 2);

        let cirba = &converted[0];
        assert_eq!(cirba["location"], json!("Lancaster, OH"));
        assert_eq!(cirba["coordinates"], json!([39.7, -82.5]));
        assert_eq!(cirba["status"], json!("operational"));
        assert_eq!(cirba["production"], json!("1200 kg/mois"));
        assert_eq!(cirba["notes"], json!("Black mass"));
        assert_eq!(cirba["id"], json!(4));

        let bare = &converted[1];
        assert_eq!(bare["status"], json!("maintenance"));
        assert_eq!(bare["production"], json!("N/A"));
        assert!(bare.get("coordinates").is_none());
    }

    #[test]
    fn backend_status_overrides_derived_one() {
        let converted = facilities_from_backend(&[json!({ "active": true, "status": "planned" })]);
        assert_eq!(converted[0]["status"], json!("planned"));
    }

    #[test]
    fn production_history_tolerates_gaps() {
        let points = production_history(&[
            json!({ "month": "2025-01", "refinery": 1, "production": 120.5, "recycling_rate": 92.0 }),
            json!({ "year": 2024, "value": "lots" }),
            json!({ "tonnes": 3 }),
        ]);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].period, "2025-01");
        assert_eq!(points[0].facility, Some(EntityId::from(1)));
        assert_eq!(points[0].tonnes, 120.5);
        assert_eq!(points[0].recycling_rate, Some(92.0));
        assert_eq!(points[1].period, "2024");
        assert_eq!(points[1].tonnes, 0.0);
    }

    #[test]
    fn profile_parse_is_lenient() {
        let profile = UserProfile::from_value(&json!({ "username": "admin", "is_staff": true }));
        assert_eq!(profile.display_name(), "admin");
        assert!(profile.is_staff);

        let profile = UserProfile::from_value(&json!([1, 2, 3]));
        assert_eq!(profile, UserProfile::default());
    }
}
