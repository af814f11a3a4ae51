//! Edit-Model use-case
//!
//! ```text
//! LOOKUP → APPLY → PERSIST → NOTIFY → (INVOKE) → DONE
//!                     │         │
//!                     └─ ROLLBACK (re-save original, return error)
//! ```

use crate::access::WRITE;
use crate::bus::{EventBus, EventHandler, EventHandlerRef, EventPayload, SubscriptionId};
use crate::domain::event::{DomainEvent, EventArgs, EventName, EventType};
use crate::domain::model::{Model, ModelId};
use crate::domain::ports::RepositoryRef;
use crate::error::{Error, Result};
use crate::registry::ModelRegistry;
use crate::usecases::{execute_command, invoke_port};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Edits persisted models of one type
pub struct EditModel {
    model_name: String,
    registry: Arc<ModelRegistry>,
    repository: RepositoryRef,
    bus: Arc<EventBus>,
    event_name: EventName,
}

impl EditModel {
    pub fn new(
        model_name: &str,
        registry: Arc<ModelRegistry>,
        repository: RepositoryRef,
        bus: Arc<EventBus>,
    ) -> Result<Arc<Self>> {
        let spec = registry
            .get_model_spec(model_name)
            .ok_or_else(|| Error::UnregisteredModel {
                model_name: model_name.to_string(),
            })?;
        let event_name = registry.get_event_name(EventType::Update, spec.model_name())?;
        Ok(Arc::new(Self {
            model_name: spec.model_name().to_string(),
            registry,
            repository,
            bus,
            event_name,
        }))
    }

    pub fn event_name(&self) -> &EventName {
        &self.event_name
    }

    /// Subscribe extra handlers to this model's UPDATE event
    pub fn register_handlers(
        &self,
        handlers: impl IntoIterator<Item = EventHandlerRef>,
    ) -> Vec<SubscriptionId> {
        handlers
            .into_iter()
            .map(|handler| self.bus.on(self.event_name.clone(), handler, false))
            .collect()
    }

    /// Accept edit requests published on `EDITMODEL<NAME>`
    pub fn listen(self: &Arc<Self>) -> Result<SubscriptionId> {
        let topic = EventName::edit_request(&self.model_name)?;
        info!(model = %self.model_name, event = %topic, "listening for edit requests");
        let listener = Arc::new(EditListener {
            edit: Arc::downgrade(self),
        });
        Ok(self.bus.on(topic, listener, false))
    }

    /// Apply `changes` to the model stored under `id`
    ///
    /// Persistence and notification are all-or-nothing: on failure the
    /// original model is written back and the error returned. A `command`
    /// then runs against the updated model with `write` permission.
    pub async fn edit(
        &self,
        id: &ModelId,
        changes: Map<String, Value>,
        command: Option<&str>,
    ) -> Result<Model> {
        let original = self
            .repository
            .find(id)
            .await?
            .ok_or_else(|| Error::NotFound { id: id.to_string() })?;

        let updated = self.registry.update_model(&original, changes.clone());
        let event = self.registry.create_event(
            EventType::Update,
            &self.model_name,
            EventArgs::new(Some(updated.clone()), json!({ "changes": changes })),
        )?;

        if let Err(e) = self.persist_and_notify(id, &updated, event).await {
            error!(model = %self.model_name, %id, error = %e, "edit failed, rolling back");
            if let Err(rollback) = self.repository.save(id, original).await {
                error!(model = %self.model_name, %id, error = %rollback, "rollback failed");
            }
            return Err(e);
        }
        debug!(model = %self.model_name, %id, "model edited");

        let Some(command) = command else {
            return Ok(updated);
        };
        let spec = updated.binding()?.spec.clone();
        if spec.command(command).is_none() && spec.port(command).is_some() {
            invoke_port(&updated, command, WRITE).await
        } else {
            execute_command(&updated, command, WRITE).await
        }
    }

    async fn persist_and_notify(
        &self,
        id: &ModelId,
        updated: &Model,
        event: DomainEvent,
    ) -> Result<()> {
        self.repository.save(id, updated.clone()).await?;
        let event_name = event.event_name.clone();
        self.bus.notify(&event_name, EventPayload::Event(event)).await
    }
}

struct EditListener {
    edit: Weak<EditModel>,
}

#[async_trait]
impl EventHandler for EditListener {
    async fn handle(&self, event_name: &EventName, payload: EventPayload) -> Result<()> {
        let EventPayload::Edit(request) = payload else {
            warn!(event = %event_name, "ignoring non-edit payload");
            return Ok(());
        };
        let Some(edit) = self.edit.upgrade() else {
            return Ok(());
        };
        edit.edit(&request.id, request.changes, request.command.as_deref())
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::handler_fn;
    use crate::datasource::MemoryRepository;
    use crate::domain::event::{passthrough_factory, EditRequest};
    use crate::domain::ports::{adapter_fn, command_fn, LoadOptions, PortRequest, Query, Repository};
    use crate::domain::spec::{CommandSpec, ModelSpecification, PortConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use assert_matches::assert_matches;

    fn registry() -> Arc<ModelRegistry> {
        let spec = ModelSpecification::builder("order")
            .port("notify", PortConfig::new())
            .adapter(
                "notify",
                adapter_fn(|req: PortRequest| async move {
                    let mut changes = Map::new();
                    changes.insert("notified".into(), json!(true));
                    Ok(req.model.update(changes))
                }),
            )
            .command(
                "approve",
                CommandSpec::handler(command_fn(|_m| async move {
                    let mut changes = Map::new();
                    changes.insert("approved".into(), json!(true));
                    Ok(Some(changes))
                }))
                .with_acl(["write"]),
            )
            .build()
            .unwrap();
        let registry = ModelRegistry::new().unwrap();
        registry.register_model(spec).unwrap();
        registry
            .register_event_factory(EventType::Update, "order", passthrough_factory())
            .unwrap();
        registry
    }

    async fn setup(repo: RepositoryRef) -> (Arc<EventBus>, Arc<EditModel>, Model) {
        let registry = registry();
        let bus = EventBus::new();
        let model = registry
            .create_model(&bus, &repo, "order", json!({"v": 1}))
            .unwrap();
        repo.save(model.id(), model.clone()).await.unwrap();
        let edit = EditModel::new("order", registry, repo, bus.clone()).unwrap();
        (bus, edit, model)
    }

    fn changes(v: i64) -> Map<String, Value> {
        let mut changes = Map::new();
        changes.insert("v".into(), json!(v));
        changes
    }

    #[tokio::test]
    async fn test_edit_persists_and_notifies() {
        let repo: RepositoryRef = Arc::new(MemoryRepository::new("ORDER"));
        let (bus, edit, model) = setup(repo.clone()).await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        edit.register_handlers([handler_fn(move |_name, payload| {
            let tx = tx.clone();
            async move {
                if let EventPayload::Event(event) = payload {
                    let _ = tx.send(event.payload);
                }
                Ok(())
            }
        })]);
        assert_eq!(bus.listener_count(edit.event_name()), 1);

        let updated = edit.edit(model.id(), changes(2), None).await.unwrap();
        assert_eq!(updated.get("v"), Some(&json!(2)));
        assert_eq!(
            repo.find(model.id()).await.unwrap().unwrap().get("v"),
            Some(&json!(2))
        );
        let payload = rx.recv().await.unwrap();
        assert_eq!(payload["data"]["changes"]["v"], json!(2));
    }

    #[tokio::test]
    async fn test_edit_missing_id() {
        let repo: RepositoryRef = Arc::new(MemoryRepository::new("ORDER"));
        let (_bus, edit, _model) = setup(repo).await;
        let err = edit.edit(&ModelId::new("nope"), changes(2), None).await.unwrap_err();
        assert_matches!(err, Error::NotFound { .. });
    }

    #[tokio::test]
    async fn test_failed_notify_rolls_back() {
        let repo: RepositoryRef = Arc::new(MemoryRepository::new("ORDER"));
        let (_bus, edit, model) = setup(repo.clone()).await;
        edit.register_handlers([handler_fn(|_name, _payload| async move {
            Err(Error::Adapter("listener down".into()))
        })]);

        let err = edit.edit(model.id(), changes(2), None).await.unwrap_err();
        assert_matches!(err, Error::Listener { .. });
        assert_eq!(
            repo.find(model.id()).await.unwrap().unwrap().get("v"),
            Some(&json!(1))
        );
    }

    /// Accepts one save, then fails the next
    struct FlakyRepository {
        inner: MemoryRepository,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl Repository for FlakyRepository {
        fn name(&self) -> &str {
            self.inner.name()
        }
        async fn find(&self, id: &ModelId) -> Result<Option<Model>> {
            self.inner.find(id).await
        }
        async fn save(&self, id: &ModelId, model: Model) -> Result<Model> {
            let n = self.saves.fetch_add(1, Ordering::SeqCst);
            if n == 1 {
                return Err(Error::Persistence("disk full".into()));
            }
            self.inner.save(id, model).await
        }
        async fn update(&self, id: &ModelId, changes: Map<String, Value>) -> Result<Model> {
            self.inner.update(id, changes).await
        }
        async fn delete(&self, id: &ModelId) -> Result<()> {
            self.inner.delete(id).await
        }
        async fn list(&self, query: Option<&Query>) -> Result<Vec<Model>> {
            self.inner.list(query).await
        }
        async fn load(&self, options: LoadOptions) -> Result<()> {
            self.inner.load(options).await
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_save_rolls_back() {
        let repo: RepositoryRef = Arc::new(FlakyRepository {
            inner: MemoryRepository::new("ORDER"),
            saves: Default::default(),
        });
        let (_bus, edit, model) = setup(repo.clone()).await;

        let err = edit.edit(model.id(), changes(2), None).await.unwrap_err();
        assert_matches!(err, Error::Persistence(_));
        assert_eq!(
            repo.find(model.id()).await.unwrap().unwrap().get("v"),
            Some(&json!(1))
        );
    }

    #[tokio::test]
    async fn test_edit_then_command_or_port() {
        let repo: RepositoryRef = Arc::new(MemoryRepository::new("ORDER"));
        let (_bus, edit, model) = setup(repo).await;

        let approved = edit
            .edit(model.id(), changes(2), Some("approve"))
            .await
            .unwrap();
        assert_eq!(approved.get("approved"), Some(&json!(true)));
        assert_eq!(approved.get("v"), Some(&json!(2)));

        let notified = edit
            .edit(model.id(), changes(3), Some("notify"))
            .await
            .unwrap();
        assert_eq!(notified.get("notified"), Some(&json!(true)));

        let unknown = edit
            .edit(model.id(), changes(4), Some("unknown"))
            .await
            .unwrap();
        assert_eq!(unknown.get("v"), Some(&json!(4)));
    }

    #[tokio::test]
    async fn test_edit_request_event() {
        let repo: RepositoryRef = Arc::new(MemoryRepository::new("ORDER"));
        let (bus, edit, model) = setup(repo.clone()).await;
        edit.listen().unwrap();

        bus.notify(
            &EventName::edit_request("order").unwrap(),
            EventPayload::Edit(EditRequest {
                id: model.id().clone(),
                changes: changes(7),
                command: None,
            }),
        )
        .await
        .unwrap();

        assert_eq!(
            repo.find(model.id()).await.unwrap().unwrap().get("v"),
            Some(&json!(7))
        );
    }
}
