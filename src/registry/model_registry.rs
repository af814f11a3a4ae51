//! Model/Event Registry
//!
//! Holds model specifications and event factories, and creates bound model
//! instances. Registration is first-wins and closes once the registry is
//! sealed; lookups and model creation stay available afterwards.

use crate::bus::EventBus;
use crate::domain::event::{
    normalize_model_name, DomainEvent, EventArgs, EventFactory, EventName, EventType,
    IntoEventType,
};
use crate::domain::model::{Model, ModelBinding, ModelId};
use crate::domain::ports::RepositoryRef;
use crate::domain::spec::ModelSpecification;
use crate::engine::{PortEngine, PortTable};
use crate::error::{Error, Result};
use crate::metrics::EngineMetrics;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

// =============================================================================
// Model Key
// =============================================================================

/// Anything that names a model type
pub trait ModelKey {
    fn model_key(&self) -> &str;
}

impl ModelKey for str {
    fn model_key(&self) -> &str {
        self
    }
}

impl ModelKey for String {
    fn model_key(&self) -> &str {
        self
    }
}

impl ModelKey for Model {
    fn model_key(&self) -> &str {
        self.name()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Registry of model specifications and event factories
pub struct ModelRegistry {
    models: RwLock<HashMap<String, Arc<ModelSpecification>>>,
    events: RwLock<HashMap<(EventType, String), EventFactory>>,
    bindings: Mutex<HashMap<(String, Uuid), Arc<PortTable>>>,
    sealed: AtomicBool,
    metrics: Arc<EngineMetrics>,
}

impl ModelRegistry {
    /// Create an empty registry with its own metrics
    pub fn new() -> Result<Arc<Self>> {
        Ok(Self::with_metrics(Arc::new(EngineMetrics::new()?)))
    }

    pub fn with_metrics(metrics: Arc<EngineMetrics>) -> Arc<Self> {
        Arc::new(Self {
            models: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
            bindings: Mutex::new(HashMap::new()),
            sealed: AtomicBool::new(false),
            metrics,
        })
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Close the registry to further registrations
    pub fn seal(&self) {
        if !self.sealed.swap(true, Ordering::SeqCst) {
            info!(models = self.models.read().len(), "registry sealed");
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self, what: impl Into<String>) -> Result<()> {
        if self.is_sealed() {
            return Err(Error::RegistrySealed(what.into()));
        }
        Ok(())
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a model specification; an existing name is left untouched
    pub fn register_model(&self, spec: ModelSpecification) -> Result<()> {
        self.ensure_open(format!("model {}", spec.model_name()))?;
        let mut models = self.models.write();
        if models.contains_key(spec.model_name()) {
            debug!(model = %spec.model_name(), "model already registered");
            return Ok(());
        }
        info!(model = %spec.model_name(), ports = spec.ports().len(), "model registered");
        models.insert(spec.model_name().to_string(), Arc::new(spec));
        Ok(())
    }

    /// Register an event factory; an existing (type, model) pair is left untouched
    pub fn register_event<T, F>(&self, event_type: T, model_name: &str, factory: F) -> Result<()>
    where
        T: IntoEventType,
        F: Fn(&EventArgs) -> Result<Value> + Send + Sync + 'static,
    {
        self.register_event_factory(event_type, model_name, Arc::new(factory))
    }

    pub fn register_event_factory<T: IntoEventType>(
        &self,
        event_type: T,
        model_name: &str,
        factory: EventFactory,
    ) -> Result<()> {
        let event_type = event_type.into_event_type()?;
        let model_name = normalize_model_name(model_name)?;
        self.ensure_open(format!("event {}{}", event_type, model_name))?;

        let mut events = self.events.write();
        let key = (event_type, model_name);
        if events.contains_key(&key) {
            debug!(event_type = %key.0, model = %key.1, "event already registered");
            return Ok(());
        }
        debug!(event_type = %key.0, model = %key.1, "event registered");
        events.insert(key, factory);
        Ok(())
    }

    // =========================================================================
    // Model Construction
    // =========================================================================

    /// Create a new bound model instance
    pub fn create_model(
        &self,
        bus: &Arc<EventBus>,
        repository: &RepositoryRef,
        model_name: &str,
        args: Value,
    ) -> Result<Model> {
        let spec = self.require_spec(model_name)?;
        let fields = spec.fields_from(args)?;
        let binding = self.binding(&spec, bus, repository);
        let model = Model::new(spec.model_name().to_string(), fields, Some(binding));
        debug!(model = %model.name(), id = %model.id(), "model created");
        Ok(model)
    }

    /// Rehydrate a persisted model document into a bound model
    pub fn load_model(
        &self,
        bus: &Arc<EventBus>,
        repository: &RepositoryRef,
        raw: Value,
        model_name: &str,
    ) -> Result<Model> {
        let spec = self.require_spec(model_name)?;
        let model = Model::from_value(raw)?.with_model_name(spec.model_name().to_string());
        Ok(model.bind(self.binding(&spec, bus, repository)))
    }

    /// Create a lifecycle event through its registered factory
    pub fn create_event<T: IntoEventType>(
        &self,
        event_type: T,
        model_name: &str,
        args: EventArgs,
    ) -> Result<DomainEvent> {
        let event_type = event_type.into_event_type()?;
        let model_name = normalize_model_name(model_name)?;
        let factory = self
            .events
            .read()
            .get(&(event_type, model_name.clone()))
            .cloned()
            .ok_or_else(|| Error::UnregisteredEvent {
                event_type: event_type.to_string(),
                model_name: model_name.clone(),
            })?;
        let payload = factory(&args)?;
        DomainEvent::new(event_type, &model_name, payload, args.model)
    }

    /// Merge changes into a new model value
    pub fn update_model(&self, model: &Model, changes: Map<String, Value>) -> Model {
        model.update(changes)
    }

    /// Mark a model deleted
    pub fn delete_model(&self, model: &Model) -> Model {
        model.delete()
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub fn get_port_flow(&self, model: &Model) -> Vec<String> {
        model.port_flow().to_vec()
    }

    pub fn get_model_id(&self, model: &Model) -> ModelId {
        model.id().clone()
    }

    pub fn get_model_name(&self, model: &Model) -> String {
        model.name().to_string()
    }

    pub fn get_event_name<T: IntoEventType>(
        &self,
        event_type: T,
        model_name: &str,
    ) -> Result<EventName> {
        EventName::for_model(event_type.into_event_type()?, model_name)
    }

    /// Specification by model name or by model instance
    pub fn get_model_spec<K: ModelKey + ?Sized>(&self, key: &K) -> Option<Arc<ModelSpecification>> {
        let name = normalize_model_name(key.model_key()).ok()?;
        self.models.read().get(&name).cloned()
    }

    /// Specifications flagged as remote
    pub fn get_remote_models(&self) -> Vec<Arc<ModelSpecification>> {
        let mut remote: Vec<_> = self
            .models
            .read()
            .values()
            .filter(|spec| spec.is_remote())
            .cloned()
            .collect();
        remote.sort_by(|a, b| a.model_name().cmp(b.model_name()));
        remote
    }

    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn require_spec(&self, model_name: &str) -> Result<Arc<ModelSpecification>> {
        self.get_model_spec(model_name)
            .ok_or_else(|| Error::UnregisteredModel {
                model_name: model_name.trim().to_uppercase(),
            })
    }

    // =========================================================================
    // Binding
    // =========================================================================

    /// Port table for `spec` on `bus`, bound on first use
    fn ports(&self, spec: &Arc<ModelSpecification>, bus: &Arc<EventBus>) -> Arc<PortTable> {
        let mut bindings = self.bindings.lock();
        let key = (spec.model_name().to_string(), bus.id());
        if let Some(table) = bindings.get(&key) {
            return Arc::clone(table);
        }
        let table = Arc::new(PortEngine::bind(spec, bus, &self.metrics));
        if !spec.graph().is_empty() {
            debug!(model = %spec.model_name(), graph = %spec.graph(), "workflow graph");
        }
        bindings.insert(key, Arc::clone(&table));
        table
    }

    /// Drop every port table bound to `bus` and remove its listeners
    ///
    /// Port tables are cached per bus for the life of the registry; call this
    /// before discarding a bus. Models still bound to it keep their table
    /// but are no longer triggered by its events. Returns the number of
    /// tables released.
    pub fn unbind(&self, bus: &EventBus) -> usize {
        let released: Vec<Arc<PortTable>> = {
            let mut bindings = self.bindings.lock();
            let keys: Vec<_> = bindings
                .keys()
                .filter(|(_, bus_id)| *bus_id == bus.id())
                .cloned()
                .collect();
            keys.iter().filter_map(|key| bindings.remove(key)).collect()
        };
        for table in &released {
            for id in table.subscriptions() {
                bus.off(*id);
            }
        }
        debug!(bus = %bus.id(), tables = released.len(), "bus unbound");
        released.len()
    }

    fn binding(
        &self,
        spec: &Arc<ModelSpecification>,
        bus: &Arc<EventBus>,
        repository: &RepositoryRef,
    ) -> Arc<ModelBinding> {
        Arc::new(ModelBinding {
            spec: Arc::clone(spec),
            bus: Arc::clone(bus),
            repository: Arc::downgrade(repository),
            ports: self.ports(spec, bus),
        })
    }
}
