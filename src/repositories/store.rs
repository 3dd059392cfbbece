use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

/// A single field change applied as part of one atomic document update.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldUpdate {
    Set(String, Value),
    /// Adds to a numeric field; a missing field counts as zero.
    Increment(String, i64),
    /// Appends to an array field unless the value is already present.
    ArrayUnion(String, Value),
    ArrayRemove(String, Value),
}

/// A condition checked atomically with the update it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub enum Guard {
    AtLeast(String, i64),
    OneOf(String, Vec<Value>),
    NotContains(String, Value),
}

impl Guard {
    pub fn holds(&self, document: &Value) -> bool {
        match self {
            Guard::AtLeast(field, minimum) => {
                document.get(field).and_then(Value::as_i64).unwrap_or(0) >= *minimum
            }
            Guard::OneOf(field, allowed) => {
                let current = document.get(field).unwrap_or(&Value::Null);
                allowed.iter().any(|value| value == current)
            }
            Guard::NotContains(field, value) => !document
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(value)),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Update {
    pub fields: Vec<FieldUpdate>,
    pub guards: Vec<Guard>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.push(FieldUpdate::Set(field.to_string(), value.into()));
        self
    }

    pub fn increment(mut self, field: &str, by: i64) -> Self {
        self.fields
            .push(FieldUpdate::Increment(field.to_string(), by));
        self
    }

    pub fn array_union(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields
            .push(FieldUpdate::ArrayUnion(field.to_string(), value.into()));
        self
    }

    pub fn array_remove(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields
            .push(FieldUpdate::ArrayRemove(field.to_string(), value.into()));
        self
    }

    pub fn guard(mut self, guard: Guard) -> Self {
        self.guards.push(guard);
        self
    }

    /// Merges another update into this one so both land in a single write.
    pub fn merge(mut self, other: Update) -> Self {
        self.fields.extend(other.fields);
        self.guards.extend(other.guards);
        self
    }

    /// Applies the field changes to a document in place. Fails on numeric
    /// overflow, leaving the document partly updated; callers apply to a copy.
    pub fn apply(&self, document: &mut Value) -> Result<(), anyhow::Error> {
        if !document.is_object() {
            *document = Value::Object(Map::new());
        }
        let Some(object) = document.as_object_mut() else {
            return Ok(());
        };

        for field in &self.fields {
            match field {
                FieldUpdate::Set(name, value) => {
                    object.insert(name.clone(), value.clone());
                }
                FieldUpdate::Increment(name, by) => {
                    let current = object.get(name).and_then(Value::as_i64).unwrap_or(0);
                    let Some(next) = current.checked_add(*by) else {
                        anyhow::bail!("Increment of {} by {} overflows", name, by);
                    };
                    object.insert(name.clone(), Value::from(next));
                }
                FieldUpdate::ArrayUnion(name, value) => {
                    let entry = object
                        .entry(name.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if !entry.is_array() {
                        *entry = Value::Array(Vec::new());
                    }
                    if let Value::Array(items) = entry {
                        if !items.contains(value) {
                            items.push(value.clone());
                        }
                    }
                }
                FieldUpdate::ArrayRemove(name, value) => {
                    if let Some(Value::Array(items)) = object.get_mut(name) {
                        items.retain(|item| item != value);
                    }
                }
            }
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, document: &Value) -> bool {
        self.filters
            .iter()
            .all(|(field, value)| document.get(field) == Some(value))
    }
}

/// Durable collection storage shared by every repository.
///
/// Documents are JSON objects that carry their own `id` field. All field
/// changes and guards of one [`Update`] are applied atomically.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, anyhow::Error>;

    async fn set(&self, collection: &str, id: &str, document: Value) -> Result<(), anyhow::Error>;

    /// Inserts only when no document with this id exists. Returns whether it did.
    async fn create(
        &self,
        collection: &str,
        id: &str,
        document: Value,
    ) -> Result<bool, anyhow::Error>;

    /// Returns the updated document, or `None` when a guard rejected the update.
    /// Updating a missing document is an error.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        update: Update,
    ) -> Result<Option<Value>, anyhow::Error>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), anyhow::Error>;

    async fn query(&self, collection: &str, query: Query) -> Result<Vec<Value>, anyhow::Error>;

    /// Appends a document under a freshly generated id.
    async fn add(&self, collection: &str, mut document: Value) -> Result<String, anyhow::Error> {
        let id = Uuid::new_v4().hyphenated().to_string();
        if let Some(object) = document.as_object_mut() {
            object.insert("id".to_string(), Value::String(id.clone()));
        }

        if !self.create(collection, &id, document).await? {
            anyhow::bail!("Generated id collided in {}: {}", collection, id);
        }

        Ok(id)
    }
}
