//! Persistence adapters
//!
//! Port adapters backed by a repository, plus a bus handler that persists
//! models carried by workflow events.

use crate::bus::{EventHandler, EventPayload};
use crate::domain::event::EventName;
use crate::domain::model::Model;
use crate::domain::ports::{PortAdapter, PortAdapterRef, PortRequest, RepositoryRef};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

/// Saves the model
pub struct SaveAdapter {
    repository: RepositoryRef,
}

#[async_trait]
impl PortAdapter for SaveAdapter {
    async fn invoke(&self, request: PortRequest) -> Result<Model> {
        let id = request.model.id().clone();
        let saved = self.repository.save(&id, request.model.clone()).await?;
        Ok(saved.rebind_from(&request.model))
    }
}

/// Re-reads the model from the repository
pub struct FindAdapter {
    repository: RepositoryRef,
}

#[async_trait]
impl PortAdapter for FindAdapter {
    async fn invoke(&self, request: PortRequest) -> Result<Model> {
        let id = request.model.id();
        let found = self
            .repository
            .find(id)
            .await?
            .ok_or_else(|| Error::NotFound { id: id.to_string() })?;
        Ok(found.rebind_from(&request.model))
    }
}

/// Applies the changes passed as the first argument
pub struct UpdateAdapter {
    repository: RepositoryRef,
}

#[async_trait]
impl PortAdapter for UpdateAdapter {
    async fn invoke(&self, request: PortRequest) -> Result<Model> {
        let changes = match request.arg(0) {
            Some(Value::Object(changes)) => changes.clone(),
            Some(other) => {
                return Err(Error::InvalidArgument(format!(
                    "update expects an object of changes, got {}",
                    other
                )))
            }
            None => return Err(Error::InvalidArgument("update requires changes".into())),
        };
        let updated = self
            .repository
            .update(request.model.id(), changes)
            .await?;
        Ok(updated.rebind_from(&request.model))
    }
}

pub fn save_adapter(repository: RepositoryRef) -> PortAdapterRef {
    Arc::new(SaveAdapter { repository })
}

pub fn find_adapter(repository: RepositoryRef) -> PortAdapterRef {
    Arc::new(FindAdapter { repository })
}

pub fn update_adapter(repository: RepositoryRef) -> PortAdapterRef {
    Arc::new(UpdateAdapter { repository })
}

/// Flush and release the repository
pub async fn close(repository: &RepositoryRef) -> Result<()> {
    repository.close().await.map_err(|e| {
        error!(repository = %repository.name(), error = %e, "failed to close repository");
        e
    })
}

/// Persists the model of every event it receives
///
/// Subscribed to produced events, it stores each model right after a port
/// recorded its completion so the port flow survives a restart.
pub struct CheckpointHandler {
    repository: RepositoryRef,
}

impl CheckpointHandler {
    pub fn new(repository: RepositoryRef) -> Arc<Self> {
        Arc::new(Self { repository })
    }
}

#[async_trait]
impl EventHandler for CheckpointHandler {
    async fn handle(&self, event_name: &EventName, payload: EventPayload) -> Result<()> {
        let Some(model) = payload.model() else {
            return Ok(());
        };
        debug!(event = %event_name, id = %model.id(), flow = ?model.port_flow(), "checkpoint");
        self.repository.save(model.id(), model.clone()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MemoryRepository;
    use serde_json::{json, Map};

    fn setup() -> (RepositoryRef, Model) {
        let repo: RepositoryRef = Arc::new(MemoryRepository::new("ORDER"));
        let mut fields = Map::new();
        fields.insert("qty".into(), json!(1));
        (repo, Model::new("ORDER".into(), fields, None))
    }

    #[tokio::test]
    async fn test_save_find_update() {
        let (repo, model) = setup();

        save_adapter(repo.clone())
            .invoke(PortRequest::new(model.clone()))
            .await
            .unwrap();
        let found = find_adapter(repo.clone())
            .invoke(PortRequest::new(model.clone()))
            .await
            .unwrap();
        assert_eq!(found, model);

        let updated = update_adapter(repo.clone())
            .invoke(PortRequest {
                model: model.clone(),
                args: vec![json!({"qty": 5})],
            })
            .await
            .unwrap();
        assert_eq!(updated.get("qty"), Some(&json!(5)));
        assert_eq!(repo.find(model.id()).await.unwrap().unwrap().get("qty"), Some(&json!(5)));

        let err = update_adapter(repo)
            .invoke(PortRequest::new(model))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_find_missing() {
        let (repo, model) = setup();
        let err = find_adapter(repo)
            .invoke(PortRequest::new(model))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_checkpoint_saves_payload_model() {
        let (repo, model) = setup();
        let handler = CheckpointHandler::new(repo.clone());
        handler
            .handle(&"reserved".into(), EventPayload::Model(model.clone()))
            .await
            .unwrap();
        assert_eq!(repo.find(model.id()).await.unwrap(), Some(model));
        close(&repo).await.unwrap();
    }
}
