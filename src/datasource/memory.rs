//! In-Memory Repository
//!
//! Concurrent model store backed by DashMap.

use crate::domain::model::{Model, ModelId};
use crate::domain::ports::{LoadOptions, Query, Repository};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::debug;

/// Repository keeping models in memory
pub struct MemoryRepository {
    name: String,
    models: DashMap<ModelId, Model>,
}

impl MemoryRepository {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            models: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// All entries ordered by creation time, then id
    pub fn snapshot(&self) -> Vec<(ModelId, Model)> {
        let mut entries: Vec<(ModelId, Model)> = self
            .models
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|(a_id, a), (b_id, b)| {
            a.create_time()
                .cmp(&b.create_time())
                .then_with(|| a_id.cmp(b_id))
        });
        entries
    }

    pub(crate) fn insert(&self, id: ModelId, model: Model) {
        self.models.insert(id, model);
    }

    pub(crate) fn clear(&self) {
        self.models.clear();
    }
}

/// Flat AND equality of `query` against the serialized model
pub fn matches(model: &Model, query: &Query) -> bool {
    let Ok(Value::Object(document)) = serde_json::to_value(model) else {
        return false;
    };
    query
        .iter()
        .all(|(key, expected)| document.get(key) == Some(expected))
}

#[async_trait]
impl Repository for MemoryRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, id: &ModelId) -> Result<Option<Model>> {
        Ok(self.models.get(id).map(|entry| entry.value().clone()))
    }

    async fn save(&self, id: &ModelId, model: Model) -> Result<Model> {
        self.models.insert(id.clone(), model.clone());
        debug!(repository = %self.name, id = %id, "model saved");
        Ok(model)
    }

    async fn update(&self, id: &ModelId, changes: Map<String, Value>) -> Result<Model> {
        let current = self
            .find(id)
            .await?
            .ok_or_else(|| Error::NotFound { id: id.to_string() })?;
        self.save(id, current.update(changes)).await
    }

    async fn delete(&self, id: &ModelId) -> Result<()> {
        self.models.remove(id);
        debug!(repository = %self.name, id = %id, "model deleted");
        Ok(())
    }

    async fn list(&self, query: Option<&Query>) -> Result<Vec<Model>> {
        let models = self.snapshot().into_iter().map(|(_, model)| model);
        Ok(match query {
            Some(query) if !query.is_empty() => models.filter(|m| matches(m, query)).collect(),
            _ => models.collect(),
        })
    }

    async fn load(&self, _options: LoadOptions) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn model(fields: Value) -> Model {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Model::new("ORDER".into(), fields, None)
    }

    fn query(value: Value) -> Query {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let repo = MemoryRepository::new("ORDER");
        let m = model(json!({"qty": 1}));
        let id = m.id().clone();

        repo.save(&id, m.clone()).await.unwrap();
        assert_eq!(repo.find(&id).await.unwrap(), Some(m));
        assert_eq!(repo.len(), 1);

        repo.delete(&id).await.unwrap();
        assert!(repo.find(&id).await.unwrap().is_none());
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_update_merges_changes() {
        let repo = MemoryRepository::new("ORDER");
        let m = model(json!({"qty": 1, "sku": "A"}));
        let id = m.id().clone();
        repo.save(&id, m).await.unwrap();

        let updated = repo.update(&id, query(json!({"qty": 4}))).await.unwrap();
        assert_eq!(updated.get("qty"), Some(&json!(4)));
        assert_eq!(updated.get("sku"), Some(&json!("A")));

        let err = repo
            .update(&ModelId::from("missing"), Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_filters_by_equality() {
        let repo = MemoryRepository::new("ORDER");
        for (status, qty) in [("open", 1), ("open", 2), ("closed", 1)] {
            let m = model(json!({"status": status, "qty": qty}));
            repo.save(&m.id().clone(), m).await.unwrap();
        }

        assert_eq!(repo.list(None).await.unwrap().len(), 3);
        let open = repo.list(Some(&query(json!({"status": "open"})))).await.unwrap();
        assert_eq!(open.len(), 2);
        let exact = repo
            .list(Some(&query(json!({"status": "open", "qty": 2}))))
            .await
            .unwrap();
        assert_eq!(exact.len(), 1);
        let by_name = repo.list(Some(&query(json!({"modelName": "ORDER"})))).await.unwrap();
        assert_eq!(by_name.len(), 3);
    }
}
