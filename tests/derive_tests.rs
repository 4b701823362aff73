use recydash::derive::{
    FacilityStatus, StatusColor, derive_status, present, status_color, valid_coordinates,
};
use recydash::entity::{Entity, EntityId};
use recydash::i18n::LocalizationResolver;
use recydash::persistence::{MemoryStore, PersistenceBridge};
use recydash::store::FacilityStore;
use serde_json::{Map, Value, json};

fn entity(value: Value) -> Entity {
    match value {
        Value::Object(map) => Entity::new(EntityId::from(1), map),
        _ => panic!("expected an object"),
    }
}

#[test]
fn status_derivation_is_total() {
    let flag_values = [
        None,
        Some(json!(true)),
        Some(json!(false)),
        Some(json!(1)),
        Some(json!("")),
        Some(json!(null)),
    ];
    let status_values = [
        None,
        Some(json!("operational")),
        Some(json!("Hors ligne")),
        Some(json!("bogus")),
        Some(json!(42)),
        Some(json!("")),
    ];

    for status in &status_values {
        for operational in &flag_values {
            for maintenance in &flag_values {
                for offline in &flag_values {
                    let mut map = Map::new();
                    let fields = [
                        ("status", status),
                        ("operational", operational),
                        ("maintenance", maintenance),
                        ("offline", offline),
                    ];
                    for (field, value) in fields {
                        if let Some(value) = value {
                            map.insert(field.to_string(), value.clone());
                        }
                    }
                    let derived = derive_status(&Entity::new(EntityId::from(1), map));
                    assert!(FacilityStatus::ALL.contains(&derived));
                }
            }
        }
    }
}

#[test]
fn flags_are_consulted_in_priority_order() {
    let both = entity(json!({ "operational": true, "maintenance": true }));
    assert_eq!(derive_status(&both), FacilityStatus::Operational);

    let later = entity(json!({ "maintenance": true, "offline": true }));
    assert_eq!(derive_status(&later), FacilityStatus::Maintenance);

    let offline = entity(json!({ "operational": false, "offline": 1 }));
    assert_eq!(derive_status(&offline), FacilityStatus::Offline);

    assert_eq!(derive_status(&entity(json!({}))), FacilityStatus::Planning);
}

#[test]
fn explicit_status_wins_over_flags() {
    let e = entity(json!({ "status": "offline", "operational": true }));
    assert_eq!(derive_status(&e), FacilityStatus::Offline);

    let localized = entity(json!({ "status": "En pause", "operational": true }));
    assert_eq!(derive_status(&localized), FacilityStatus::Maintenance);

    let unknown = entity(json!({ "status": "exploding", "maintenance": true }));
    assert_eq!(derive_status(&unknown), FacilityStatus::Maintenance);
}

#[test]
fn status_colors() {
    assert_eq!(status_color("operational"), StatusColor::Success);
    assert_eq!(status_color("maintenance"), StatusColor::Warning);
    assert_eq!(status_color("offline"), StatusColor::Error);
    assert_eq!(status_color("planning"), StatusColor::Default);
    assert_eq!(status_color("whatever"), StatusColor::Default);
    assert_eq!(status_color(""), StatusColor::Default);
}

#[test]
fn text_coordinates_are_not_coordinates() {
    assert!(!valid_coordinates(&entity(json!({ "latitude": "N/A", "longitude": 2.3 }))));
    assert!(!valid_coordinates(&entity(json!({ "latitude": "48.8", "longitude": "2.3" }))));
    assert!(!valid_coordinates(&entity(json!({ "latitude": 48.8 }))));
    assert!(valid_coordinates(&entity(json!({ "latitude": 48.8, "longitude": 2.3 }))));
    assert!(valid_coordinates(&entity(json!({ "coordinates": [48.8, 2.3] }))));
}

#[test]
fn facilities_without_coordinates_stay_in_the_list_but_not_on_the_map() {
    let mut store = FacilityStore::open(PersistenceBridge::new(MemoryStore::new()));
    let added = store
        .add(
            json!({ "name": "Unmapped", "latitude": "N/A", "longitude": 4.1 })
                .as_object()
                .cloned()
                .unwrap(),
        )
        .unwrap();

    assert!(store.list().iter().any(|e| e.id == added.id));
    assert!(store.map_entries().iter().all(|e| e.id != added.id));
    assert_eq!(store.map_entries().len(), store.len() - 1);
}

#[test]
fn views_carry_translated_labels() {
    let resolver = LocalizationResolver::bundled();
    let e = entity(json!({
        "name": "Li-Cycle",
        "status": "Opérationnel",
        "production": "10 000+ tonnes",
        "coordinates": [44.2, -76.5]
    }));

    let fr = present(&e, &resolver, "fr");
    assert_eq!(fr.label, "Opérationnel");
    assert_eq!(fr.color, StatusColor::Success);
    assert_eq!(fr.production, 10000.0);
    assert_eq!(fr.coordinates, Some((44.2, -76.5)));

    let en = present(&e, &resolver, "en");
    assert_eq!(en.label, "Operational");

    let unknown = present(&e, &resolver, "xx");
    assert_eq!(unknown.label, "Opérationnel");
}
