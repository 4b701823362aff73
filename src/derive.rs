//! Presentation attributes computed from raw facility records.
//!
//! Every function here is total: incomplete or inconsistent records still
//! produce a defined status, color and label.

use crate::entity::{Attributes, Entity, EntityId, is_truthy};
use crate::error::{DashboardError, DashboardResult};
use crate::i18n::LocalizationResolver;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Boolean status flags, in the order they are consulted.
pub const STATUS_FLAGS: [&str; 3] = ["operational", "maintenance", "offline"];

lazy_static! {
    static ref FIRST_NUMBER: Regex = Regex::new(r"\d[\d\s,]*(?:\.\d+)?").unwrap();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacilityStatus {
    Operational,
    Maintenance,
    Offline,
    Planning,
}

impl FacilityStatus {
    pub const ALL: [FacilityStatus; 4] = [
        FacilityStatus::Operational,
        FacilityStatus::Maintenance,
        FacilityStatus::Offline,
        FacilityStatus::Planning,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FacilityStatus::Operational => "operational",
            FacilityStatus::Maintenance => "maintenance",
            FacilityStatus::Offline => "offline",
            FacilityStatus::Planning => "planning",
        }
    }

    /// Parse an explicit status value.
    ///
    /// Accepts the canonical names plus the labels found in stored and
    /// backend records (`"Opérationnel"`, `"En pause"`, `"construction"`...),
    /// ignoring case and surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        let status = match normalized.as_str() {
            "operational" | "opérationnel" | "operationnel" | "active" => {
                FacilityStatus::Operational
            }
            "maintenance" | "en maintenance" | "en pause" | "en suspens" | "suspended"
            | "paused" => FacilityStatus::Maintenance,
            "offline" | "hors ligne" | "closed" | "fermé" => FacilityStatus::Offline,
            "planning" | "en planification" | "planifié" | "planned" | "approuvé"
            | "approved" | "en construction" | "construction" => FacilityStatus::Planning,
            _ => return None,
        };
        Some(status)
    }

    pub fn color(self) -> StatusColor {
        match self {
            FacilityStatus::Operational => StatusColor::Success,
            FacilityStatus::Maintenance => StatusColor::Warning,
            FacilityStatus::Offline => StatusColor::Error,
            FacilityStatus::Planning => StatusColor::Default,
        }
    }
}

impl fmt::Display for FacilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusColor {
    Success,
    Warning,
    Error,
    Default,
}

impl StatusColor {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusColor::Success => "success",
            StatusColor::Warning => "warning",
            StatusColor::Error => "error",
            StatusColor::Default => "default",
        }
    }
}

/// Display status of a facility.
///
/// First match wins: a valid explicit `status` field, then the
/// `operational`, `maintenance` and `offline` flags in that order, then
/// `planning`.
pub fn derive_status(entity: &Entity) -> FacilityStatus {
    if let Some(status) = entity.text("status").and_then(FacilityStatus::parse) {
        return status;
    }

    if entity.flag("operational") {
        FacilityStatus::Operational
    } else if entity.flag("maintenance") {
        FacilityStatus::Maintenance
    } else if entity.flag("offline") {
        FacilityStatus::Offline
    } else {
        FacilityStatus::Planning
    }
}

/// Color for a status name; anything unrecognized is `default`.
pub fn status_color(status: &str) -> StatusColor {
    FacilityStatus::parse(status)
        .map(FacilityStatus::color)
        .unwrap_or(StatusColor::Default)
}

/// Translated label of a status.
///
/// # Arguments
///
/// * `resolver` - Translation tables.
/// * `language` - Display language; unknown languages fall back to the default one.
/// * `status` - Status to label.
///
/// # Returns
///
/// Label text, never empty.
pub fn status_label<'a>(
    resolver: &'a LocalizationResolver,
    language: &str,
    status: FacilityStatus,
) -> &'a str {
    resolver.resolve(language, status.as_str())
}

/// Latitude and longitude, from the `latitude`/`longitude` fields or from a
/// two-element `coordinates` array. Both must be finite JSON numbers.
pub fn coordinates(entity: &Entity) -> Option<(f64, f64)> {
    if let (Some(lat), Some(lng)) = (entity.number("latitude"), entity.number("longitude")) {
        return Some((lat, lng));
    }

    if entity.get("latitude").is_some() || entity.get("longitude").is_some() {
        return None;
    }

    let pair = entity.get("coordinates")?.as_array()?;
    match pair.as_slice() {
        [lat, lng] => {
            let lat = lat.as_f64().filter(|n| n.is_finite())?;
            let lng = lng.as_f64().filter(|n| n.is_finite())?;
            Some((lat, lng))
        }
        _ => None,
    }
}

/// Whether the facility can be placed on the map.
pub fn valid_coordinates(entity: &Entity) -> bool {
    coordinates(entity).is_some()
}

/// Reject records whose status flags contradict each other.
///
/// Applied when facilities are written; reads still go through
/// [`derive_status`] so records already stored keep deriving.
pub fn check_flags(attributes: &Attributes) -> DashboardResult<()> {
    let raised: Vec<&str> = STATUS_FLAGS
        .iter()
        .copied()
        .filter(|flag| attributes.get(*flag).is_some_and(is_truthy))
        .collect();

    if raised.len() > 1 {
        return Err(DashboardError::Validation(format!(
            "conflicting status flags: {}",
            raised.join(", ")
        )));
    }

    Ok(())
}

/// First number in a free-text production figure, 0 when there is none.
///
/// `"10 000+ tonnes"` reads as 10000, `"N/A"` as 0.
pub fn production_tonnage(production: &str) -> f64 {
    FIRST_NUMBER
        .find(production)
        .map(|m| {
            m.as_str()
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.')
                .collect::<String>()
        })
        .and_then(|digits| digits.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// A facility as the list and map views consume it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FacilityView {
    pub id: EntityId,
    pub name: String,
    pub location: Option<String>,
    pub status: FacilityStatus,
    pub color: StatusColor,
    pub label: String,
    pub coordinates: Option<(f64, f64)>,
    pub production: f64,
}

pub fn present(entity: &Entity, resolver: &LocalizationResolver, language: &str) -> FacilityView {
    let status = derive_status(entity);
    FacilityView {
        id: entity.id.clone(),
        name: entity.text("name").unwrap_or_default().to_string(),
        location: entity.text("location").map(str::to_string),
        status,
        color: status.color(),
        label: status_label(resolver, language, status).to_string(),
        coordinates: coordinates(entity),
        production: entity.text("production").map(production_tonnage).unwrap_or(0.0),
    }
}
