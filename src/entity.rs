use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Loosely-typed record fields. No field is guaranteed to be present.
pub type Attributes = Map<String, Value>;

/// Field holding a document's owning facility id.
pub const GROUP_KEY_FIELD: &str = "foundryId";

/// Stable identifier of an entity within its collection.
///
/// Facilities come with numeric ids and documents with timestamp strings, so
/// the id is kept in its canonical text form and written back as a JSON
/// number whenever that text is a plain unsigned integer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(String);

impl EntityId {
    /// Wrap an id already in canonical text form.
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of the id, if it is a plain unsigned integer.
    pub fn as_number(&self) -> Option<u64> {
        self.0
            .parse::<u64>()
            .ok()
            .filter(|n| n.to_string() == self.0)
    }

    /// JSON form of the id: a number when the id is numeric, a string otherwise.
    pub fn to_value(&self) -> Value {
        match self.as_number() {
            Some(n) => Value::from(n),
            None => Value::from(self.0.as_str()),
        }
    }

    /// Read an id out of a raw JSON value. Nulls, empty strings and
    /// fractional numbers are not ids.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .map(|n| n.to_string())
                .or_else(|| n.as_i64().map(|n| n.to_string()))
                .map(EntityId),
            Value::String(s) if !s.trim().is_empty() => Some(EntityId(s.trim().to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for EntityId {
    fn from(n: u64) -> Self {
        EntityId(n.to_string())
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_number() {
            Some(n) => serializer.serialize_u64(n),
            None => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        EntityId::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid entity id: {}", value)))
    }
}

/// A facility/refinery or a document/report record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl Entity {
    /// Build an entity from a raw record, keeping every field except `id`.
    pub fn new(id: EntityId, mut attributes: Attributes) -> Self {
        attributes.remove("id");
        Entity { id, attributes }
    }

    /// Field value, with `null` treated as absent.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field).filter(|v| !v.is_null())
    }

    /// Non-empty string field.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Finite JSON number field. Numeric-looking strings do not count.
    pub fn number(&self, field: &str) -> Option<f64> {
        self.get(field)
            .and_then(Value::as_f64)
            .filter(|n| n.is_finite())
    }

    /// Truthiness of a loosely-typed flag field.
    pub fn flag(&self, field: &str) -> bool {
        self.get(field).is_some_and(is_truthy)
    }

    /// Owning facility of a document, `None` for general documents.
    pub fn group_key(&self) -> Option<String> {
        self.get(GROUP_KEY_FIELD)
            .and_then(EntityId::from_value)
            .map(|id| id.0)
    }

    /// Set a field, replacing any previous value.
    ///
    /// # Arguments
    ///
    /// * `field` - Field name. Setting `id` here does not change [`Entity::id`].
    /// * `value` - Anything convertible into a JSON value.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.attributes.insert(field.to_string(), value.into());
    }
}

/// Truthiness the way the records were produced: `false`, `0`, `""` and
/// `null` are false, everything else is true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// How a collection assigns ids to records that arrive without one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdStrategy {
    /// One past the largest numeric id in use.
    Sequential,
    /// Current time in milliseconds, bumped past any id already taken.
    Timestamp,
}

impl IdStrategy {
    /// Pick an id that is not in `taken`.
    ///
    /// When counting up from the strategy's starting point would pass
    /// `u64::MAX`, the smallest free id is used instead.
    pub fn next_id(self, taken: &HashSet<EntityId>) -> EntityId {
        let start = match self {
            IdStrategy::Sequential => taken
                .iter()
                .filter_map(EntityId::as_number)
                .max()
                .map_or(Some(1), |max| max.checked_add(1)),
            IdStrategy::Timestamp => Some(now_millis()),
        };

        let free = |n: &u64| !taken.contains(&EntityId::from(*n));
        let candidate = start
            .and_then(|start| (start..=u64::MAX).find(free))
            .or_else(|| (1..=u64::MAX).find(free))
            .unwrap_or_default();

        EntityId::from(candidate)
    }
}

/// Turn raw records into entities with unique ids.
///
/// Records keep their own id when it is valid and not yet taken; the rest get
/// a fresh one from `strategy`. `taken` is updated with every id handed out.
///
/// # Returns
///
/// The entities, in input order, and how many of them got a fresh id.
pub fn assign_ids(
    records: Vec<Attributes>,
    strategy: IdStrategy,
    taken: &mut HashSet<EntityId>,
) -> (Vec<Entity>, usize) {
    let mut entities = Vec::with_capacity(records.len());
    let mut fresh_ids = 0;

    for record in records {
        let own = record.get("id").and_then(EntityId::from_value);
        let id = match own {
            Some(id) if !taken.contains(&id) => id,
            Some(id) => {
                let fresh = strategy.next_id(taken);
                log::warn!("duplicate id {} reassigned to {}", id, fresh);
                fresh_ids += 1;
                fresh
            }
            None => {
                fresh_ids += 1;
                strategy.next_id(taken)
            }
        };
        taken.insert(id.clone());
        entities.push(Entity::new(id, record));
    }

    (entities, fresh_ids)
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
