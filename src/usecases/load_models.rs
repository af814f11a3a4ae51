//! Load-Models use-case
//!
//! Loads persisted models back into the repository at startup and, after a
//! grace period, resumes workflows that were interrupted mid-chain by
//! re-publishing the event produced by their last completed port.

use crate::bus::{EventBus, EventPayload, Signal};
use crate::domain::event::EventName;
use crate::domain::model::Model;
use crate::domain::ports::{Hydrate, LoadOptions, RepositoryRef};
use crate::error::{Error, Result};
use crate::registry::ModelRegistry;
use crate::serializer::{KeyMatch, Serializer};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Delay between loading models and resuming their workflows
pub const DEFAULT_RESUME_DELAY: Duration = Duration::from_secs(30);

/// Loads one model type from its repository
pub struct LoadModels {
    model_name: String,
    registry: Arc<ModelRegistry>,
    bus: Arc<EventBus>,
    repository: RepositoryRef,
    directory: Option<PathBuf>,
    resume_delay: Duration,
}

impl LoadModels {
    pub fn new(
        model_name: &str,
        registry: Arc<ModelRegistry>,
        bus: Arc<EventBus>,
        repository: RepositoryRef,
    ) -> Self {
        Self {
            model_name: model_name.to_string(),
            registry,
            bus,
            repository,
            directory: None,
            resume_delay: DEFAULT_RESUME_DELAY,
        }
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn with_resume_delay(mut self, delay: Duration) -> Self {
        self.resume_delay = delay;
        self
    }

    /// Load persisted models and schedule workflow resumption
    ///
    /// The returned handle completes once resumption has run.
    pub async fn load(&self) -> Result<JoinHandle<ResumeReport>> {
        let spec = self
            .registry
            .get_model_spec(self.model_name.as_str())
            .ok_or_else(|| Error::UnregisteredModel {
                model_name: self.model_name.clone(),
            })?;

        let mut serializer = Serializer::new();
        serializer.add_rules(spec.serializers().iter().cloned());
        serializer.add_rules(Serializer::map_rules(KeyMatch::Any));

        self.repository
            .load(LoadOptions {
                hydrate: self.hydrate(spec.model_name()),
                serializer: Some(Arc::new(serializer)),
                directory: self.directory.clone(),
            })
            .await?;

        let repository = self.repository.clone();
        let delay = self.resume_delay;
        let model_name = spec.model_name().to_string();
        Ok(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!(model = %model_name, "resuming workflows");
            match repository.list(None).await {
                Ok(models) => resume_workflow(models).await,
                Err(e) => {
                    error!(model = %model_name, error = %e, "failed to list models for resumption");
                    ResumeReport::default()
                }
            }
        }))
    }

    fn hydrate(&self, default_name: &str) -> Hydrate {
        let registry = self.registry.clone();
        let bus = self.bus.clone();
        let repository = self.repository.clone();
        let default_name = default_name.to_string();
        Arc::new(move |raw: Value| {
            let model_name = raw
                .get("modelName")
                .and_then(Value::as_str)
                .unwrap_or(&default_name)
                .to_string();
            registry.load_model(&bus, &repository, raw, &model_name)
        })
    }
}

/// Outcome of a resumption pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeReport {
    /// Models whose chain was re-triggered
    pub resumed: usize,
    /// Models whose workflow had already finished
    pub completed: usize,
    /// Models not eligible for resumption
    pub skipped: usize,
}

/// Re-drive interrupted workflows
///
/// Models that never started, have finished, or are compensating are left
/// alone.
pub async fn resume_workflow(models: Vec<Model>) -> ResumeReport {
    let mut report = ResumeReport::default();

    for model in models {
        let (Some(spec), Some(bus)) = (model.spec().cloned(), model.bus().cloned()) else {
            warn!(model = %model.name(), id = %model.id(), "cannot resume unbound model");
            report.skipped += 1;
            continue;
        };
        if model.is_compensating() {
            warn!(model = %model.name(), id = %model.id(), "not resuming a compensating workflow");
            report.skipped += 1;
            continue;
        }
        let Some(last) = model.port_flow().last().cloned() else {
            report.skipped += 1;
            continue;
        };
        if spec.graph().is_complete(model.port_flow()) {
            report.completed += 1;
            continue;
        }
        let Some(produces) = spec.port(&last).and_then(|p| p.produces_event.clone()) else {
            debug!(model = %model.name(), id = %model.id(), port = %last, "last port produces nothing");
            report.skipped += 1;
            continue;
        };

        info!(model = %model.name(), id = %model.id(), port = %last, event = %produces, "resuming workflow");
        model.emit(Signal::workflow_resumed(&model, &last));
        report.resumed += 1;
        if let Err(e) = resume_one(&bus, EventName::new(produces), model).await {
            error!(error = %e, "workflow resumption failed");
        }
    }

    info!(
        resumed = report.resumed,
        completed = report.completed,
        skipped = report.skipped,
        "workflow resumption finished"
    );
    report
}

async fn resume_one(bus: &Arc<EventBus>, event_name: EventName, model: Model) -> Result<()> {
    bus.notify(&event_name, EventPayload::Model(model)).await
}
