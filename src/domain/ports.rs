//! Domain Ports - Core trait definitions for the orchestration engine
//!
//! These traits define the boundaries between the domain models and the
//! application layer. Adapters implement them to provide I/O, remote calls
//! and persistence.

use crate::domain::model::{Model, ModelId};
use crate::error::Result;
use crate::serializer::Serializer;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

// =============================================================================
// Port Adapter
// =============================================================================

/// Input handed to a port adapter
#[derive(Debug, Clone)]
pub struct PortRequest {
    /// Model the port was invoked on
    pub model: Model,
    /// Invocation arguments (the port's configured callback when event-triggered)
    pub args: Vec<Value>,
}

impl PortRequest {
    /// Create a request without arguments
    pub fn new(model: Model) -> Self {
        Self {
            model,
            args: Vec::new(),
        }
    }

    /// Get the argument at `index`
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }
}

/// Port for application adapters backing a model port
///
/// An adapter receives the model and returns the updated model. Returning an
/// error hands control to the engine's retry and error handling.
#[async_trait]
pub trait PortAdapter: Send + Sync {
    /// Execute the port's I/O
    async fn invoke(&self, request: PortRequest) -> Result<Model>;
}

/// Adapter backed by an async closure
pub struct FnAdapter<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> PortAdapter for FnAdapter<F>
where
    F: Fn(PortRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Model>> + Send + 'static,
{
    async fn invoke(&self, request: PortRequest) -> Result<Model> {
        (self.f)(request).await
    }
}

/// Wrap an async closure as a port adapter
pub fn adapter_fn<F, Fut>(f: F) -> PortAdapterRef
where
    F: Fn(PortRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Model>> + Send + 'static,
{
    Arc::new(FnAdapter { f })
}

// =============================================================================
// Command Handler
// =============================================================================

/// Port for model commands
///
/// Returns the field changes to merge into a new model value, if any.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, model: &Model) -> Result<Option<Map<String, Value>>>;
}

/// Command handler backed by an async closure
pub struct FnCommand<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> CommandHandler for FnCommand<F>
where
    F: Fn(Model) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Map<String, Value>>>> + Send + 'static,
{
    async fn execute(&self, model: &Model) -> Result<Option<Map<String, Value>>> {
        (self.f)(model.clone()).await
    }
}

/// Wrap an async closure as a command handler
pub fn command_fn<F, Fut>(f: F) -> CommandHandlerRef
where
    F: Fn(Model) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Map<String, Value>>>> + Send + 'static,
{
    Arc::new(FnCommand { f })
}

// =============================================================================
// Repository Port
// =============================================================================

/// Flat field-equality filter; every key must match
pub type Query = Map<String, Value>;

/// Rehydrates a persisted model document into a live model
pub type Hydrate = Arc<dyn Fn(Value) -> Result<Model> + Send + Sync>;

/// Options passed to [`Repository::load`]
#[derive(Clone)]
pub struct LoadOptions {
    /// Turns persisted documents back into bound models
    pub hydrate: Hydrate,
    /// Serializer hooks applied to persisted documents
    pub serializer: Option<Arc<Serializer>>,
    /// Directory override for file-backed repositories
    pub directory: Option<PathBuf>,
}

impl std::fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadOptions")
            .field("serializer", &self.serializer.is_some())
            .field("directory", &self.directory)
            .finish()
    }
}

/// Port for model persistence
#[async_trait]
pub trait Repository: Send + Sync {
    /// Collection name
    fn name(&self) -> &str;

    /// Find a model by id
    async fn find(&self, id: &ModelId) -> Result<Option<Model>>;

    /// Store a model under `id`, returning the stored value
    async fn save(&self, id: &ModelId, model: Model) -> Result<Model>;

    /// Merge changes into the stored model
    async fn update(&self, id: &ModelId, changes: Map<String, Value>) -> Result<Model>;

    /// Delete a model
    async fn delete(&self, id: &ModelId) -> Result<()>;

    /// List models, optionally filtered
    async fn list(&self, query: Option<&Query>) -> Result<Vec<Model>>;

    /// Load persisted models
    async fn load(&self, options: LoadOptions) -> Result<()>;

    /// Flush and release the backing store
    async fn close(&self) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type PortAdapterRef = Arc<dyn PortAdapter>;
pub type CommandHandlerRef = Arc<dyn CommandHandler>;
pub type RepositoryRef = Arc<dyn Repository>;
