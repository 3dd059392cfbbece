use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use super::store::{Direction, DocumentStore, Query, Update};

#[derive(Clone, Debug)]
struct StoredDocument {
    seq: u64,
    data: Value,
}

/// Process-local store. Each document update runs under its shard lock, so
/// guards and field changes are atomic with respect to concurrent writers.
#[derive(Clone, Default)]
pub struct MemoryStore {
    documents: Arc<DashMap<(String, String), StoredDocument>>,
    sequence: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, AtomicOrdering::Relaxed)
    }

    fn key(collection: &str, id: &str) -> (String, String) {
        (collection.to_string(), id.to_string())
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .unwrap_or_default()
                .partial_cmp(&y.as_f64().unwrap_or_default())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, anyhow::Error> {
        Ok(self
            .documents
            .get(&Self::key(collection, id))
            .map(|entry| entry.data.clone()))
    }

    async fn set(&self, collection: &str, id: &str, document: Value) -> Result<(), anyhow::Error> {
        let seq = self.next_seq();
        match self.documents.entry(Self::key(collection, id)) {
            Entry::Occupied(mut entry) => entry.get_mut().data = document,
            Entry::Vacant(entry) => {
                entry.insert(StoredDocument {
                    seq,
                    data: document,
                });
            }
        }

        Ok(())
    }

    async fn create(
        &self,
        collection: &str,
        id: &str,
        document: Value,
    ) -> Result<bool, anyhow::Error> {
        let seq = self.next_seq();
        match self.documents.entry(Self::key(collection, id)) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(StoredDocument {
                    seq,
                    data: document,
                });
                Ok(true)
            }
        }
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        update: Update,
    ) -> Result<Option<Value>, anyhow::Error> {
        let Some(mut entry) = self.documents.get_mut(&Self::key(collection, id)) else {
            bail!("Document not found: {}/{}", collection, id);
        };

        if !update.guards.iter().all(|guard| guard.holds(&entry.data)) {
            return Ok(None);
        }

        let mut updated = entry.data.clone();
        update.apply(&mut updated)?;
        entry.data = updated.clone();

        Ok(Some(updated))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), anyhow::Error> {
        self.documents.remove(&Self::key(collection, id));
        Ok(())
    }

    async fn query(&self, collection: &str, query: Query) -> Result<Vec<Value>, anyhow::Error> {
        let mut matches: Vec<StoredDocument> = self
            .documents
            .iter()
            .filter(|entry| entry.key().0 == collection && query.matches(&entry.data))
            .map(|entry| entry.value().clone())
            .collect();

        match &query.order_by {
            Some((field, direction)) => matches.sort_by(|a, b| {
                let ordering = compare_values(
                    a.data.get(field).unwrap_or(&Value::Null),
                    b.data.get(field).unwrap_or(&Value::Null),
                )
                .then(a.seq.cmp(&b.seq));

                match direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            }),
            None => matches.sort_by_key(|document| document.seq),
        }

        if let Some(limit) = query.limit {
            matches.truncate(limit);
        }

        Ok(matches.into_iter().map(|document| document.data).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::store::Guard;
    use serde_json::json;

    #[tokio::test]
    async fn create_refuses_existing_ids() {
        let store = MemoryStore::new();

        assert!(store.create("c", "a", json!({"n": 1})).await.unwrap());
        assert!(!store.create("c", "a", json!({"n": 2})).await.unwrap());
        assert_eq!(store.get("c", "a").await.unwrap(), Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn add_generates_id_inside_document() {
        let store = MemoryStore::new();

        let id = store.add("c", json!({"n": 1})).await.unwrap();
        let document = store.get("c", &id).await.unwrap().unwrap();

        assert_eq!(document["id"], json!(id));
        assert_eq!(document["n"], 1);
    }

    #[tokio::test]
    async fn rejected_guard_leaves_document_untouched() {
        let store = MemoryStore::new();
        store.set("users", "u1", json!({"balance": 10})).await.unwrap();

        let update = Update::new()
            .increment("balance", -20)
            .guard(Guard::AtLeast("balance".to_string(), 20));

        assert_eq!(store.update("users", "u1", update).await.unwrap(), None);
        assert_eq!(
            store.get("users", "u1").await.unwrap(),
            Some(json!({"balance": 10}))
        );
    }

    #[tokio::test]
    async fn overflowing_update_fails_without_mutation() {
        let store = MemoryStore::new();
        store
            .set("users", "u1", json!({"balance": i64::MAX, "surveysCompleted": 1}))
            .await
            .unwrap();

        let update = Update::new()
            .increment("surveysCompleted", 1)
            .increment("balance", 1);

        assert!(store.update("users", "u1", update).await.is_err());
        assert_eq!(
            store.get("users", "u1").await.unwrap(),
            Some(json!({"balance": i64::MAX, "surveysCompleted": 1}))
        );
    }

    #[tokio::test]
    async fn update_of_missing_document_fails() {
        let store = MemoryStore::new();

        let result = store
            .update("users", "ghost", Update::new().increment("balance", 1))
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let store = MemoryStore::new();
        store.set("users", "u1", json!({"balance": 0})).await.unwrap();

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .update("users", "u1", Update::new().increment("balance", 2))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let document = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(document["balance"], 100);
    }

    #[tokio::test]
    async fn query_filters_orders_and_limits() {
        let store = MemoryStore::new();
        for (id, user, amount) in [("t1", "u1", 5), ("t2", "u2", 7), ("t3", "u1", 9), ("t4", "u1", 1)] {
            store
                .set("tx", id, json!({"id": id, "userId": user, "amount": amount}))
                .await
                .unwrap();
        }

        let results = store
            .query(
                "tx",
                Query::new()
                    .filter("userId", "u1")
                    .order_by("amount", Direction::Descending)
                    .limit(2),
            )
            .await
            .unwrap();

        let ids: Vec<_> = results.iter().map(|d| d["id"].clone()).collect();
        assert_eq!(ids, vec![json!("t3"), json!("t1")]);
    }

    #[tokio::test]
    async fn query_breaks_ties_by_insertion_order() {
        let store = MemoryStore::new();
        for id in ["a", "b", "c"] {
            store
                .set("tx", id, json!({"id": id, "createdAt": 1000}))
                .await
                .unwrap();
        }

        let results = store
            .query("tx", Query::new().order_by("createdAt", Direction::Descending))
            .await
            .unwrap();

        let ids: Vec<_> = results.iter().map(|d| d["id"].clone()).collect();
        assert_eq!(ids, vec![json!("c"), json!("b"), json!("a")]);
    }
}
