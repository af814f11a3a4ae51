//! Saga Ports CLI
//!
//! Drives manifest-declared workflows with simulated adapters:
//!
//! - `graph`: print each model's workflow graph
//! - `run`: create a model and drive it through its workflow
//! - `resume`: reload persisted models and resume interrupted workflows

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use saga_ports::adapters::CheckpointHandler;
use saga_ports::domain::ports::PortAdapterRef;
use saga_ports::{
    adapter_fn, EngineMetrics, EventBus, EventName, EventPayload, FileRepository, LoadModels,
    Manifest, Model, ModelRegistry, PortRequest, RepositoryRef,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Saga Ports - event-chained port orchestration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Workflow manifest (YAML)
    #[arg(long, env = "SAGA_MANIFEST", default_value = "demos/order-workflow.yaml")]
    manifest: PathBuf,

    /// Override the manifest's data directory
    #[arg(long, env = "SAGA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print workflow graphs
    Graph {
        /// Only this model
        model: Option<String>,
    },
    /// Create a model and drive it through its workflow
    Run {
        model: String,
        /// Initial fields as a JSON object
        #[arg(long, default_value = "{}")]
        fields: String,
        /// Make this port's adapter fail
        #[arg(long)]
        fail_port: Option<String>,
        /// Simulated adapter latency in milliseconds
        #[arg(long, default_value = "100")]
        latency_ms: u64,
        /// Give up waiting after this many seconds
        #[arg(long, default_value = "30")]
        wait_secs: u64,
        /// Undo completed ports if the workflow does not finish
        #[arg(long)]
        compensate: bool,
    },
    /// Reload persisted models and resume interrupted workflows
    Resume {
        model: String,
        /// Override the manifest's resume delay
        #[arg(long)]
        delay_secs: Option<u64>,
        #[arg(long, default_value = "100")]
        latency_ms: u64,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting {} {}", saga_ports::NAME, saga_ports::VERSION);
    let manifest = Manifest::load(&args.manifest)
        .await
        .with_context(|| format!("loading manifest {}", args.manifest.display()))?;
    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| manifest.engine.data_dir.clone());

    match args.command {
        Cmd::Graph { model } => print_graphs(&manifest, model.as_deref()),
        Cmd::Run {
            model,
            fields,
            fail_port,
            latency_ms,
            wait_secs,
            compensate,
        } => {
            let fields: Value = serde_json::from_str(&fields).context("--fields must be JSON")?;
            let engine = Engine::start(
                &manifest,
                &model,
                data_dir,
                Simulation::new(latency_ms, fail_port),
            )?;
            engine
                .run(fields, Duration::from_secs(wait_secs), compensate)
                .await
        }
        Cmd::Resume {
            model,
            delay_secs,
            latency_ms,
        } => {
            let delay = delay_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| manifest.engine.resume_delay());
            let engine = Engine::start(&manifest, &model, data_dir, Simulation::new(latency_ms, None))?;
            engine.resume(delay).await
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Graph
// =============================================================================

fn print_graphs(manifest: &Manifest, only: Option<&str>) -> anyhow::Result<()> {
    let names: Vec<&String> = match only {
        Some(name) => vec![manifest
            .models
            .keys()
            .find(|key| key.eq_ignore_ascii_case(name))
            .ok_or_else(|| anyhow!("model {} is not in the manifest", name))?],
        None => manifest.models.keys().collect(),
    };

    let simulation = Simulation::new(0, None);
    for name in names {
        let spec = simulation.attach(manifest, name)?.build()?;
        println!("{}:", spec.model_name());
        println!("{}", spec.graph());
        let disabled: Vec<&str> = spec
            .ports()
            .iter()
            .filter(|(_, config)| config.disabled)
            .map(|(port, _)| port.as_str())
            .collect();
        if !disabled.is_empty() {
            println!("  disabled: {}", disabled.join(", "));
        }
    }
    Ok(())
}

// =============================================================================
// Simulated Adapters
// =============================================================================

/// Adapters that stamp the model after a delay
#[derive(Clone)]
struct Simulation {
    latency: Duration,
    fail_port: Option<String>,
}

impl Simulation {
    fn new(latency_ms: u64, fail_port: Option<String>) -> Self {
        Self {
            latency: Duration::from_millis(latency_ms),
            fail_port,
        }
    }

    fn adapter(&self, port: &str) -> PortAdapterRef {
        let latency = self.latency;
        let fails = self.fail_port.as_deref() == Some(port);
        let port = port.to_string();
        adapter_fn(move |request: PortRequest| {
            let port = port.clone();
            async move {
                tokio::time::sleep(latency).await;
                if fails {
                    return Err(saga_ports::Error::Adapter(format!("{} is unavailable", port)));
                }
                let mut changes = Map::new();
                changes.insert(port, json!(chrono::Utc::now().to_rfc3339()));
                Ok(request.model.update(changes))
            }
        })
    }

    fn compensator(&self, port: &str) -> PortAdapterRef {
        let port = port.to_string();
        adapter_fn(move |request: PortRequest| {
            let port = port.clone();
            async move {
                info!(port = %port, id = %request.model.id(), "undoing");
                let mut changes = Map::new();
                changes.insert(port, Value::Null);
                Ok(request.model.update(changes))
            }
        })
    }

    fn attach(
        &self,
        manifest: &Manifest,
        model: &str,
    ) -> saga_ports::Result<saga_ports::domain::ModelSpecBuilder> {
        let ports: Vec<String> = manifest
            .model(model)
            .map(|m| m.ports.keys().cloned().collect())
            .unwrap_or_default();
        let mut builder = manifest.spec_builder_with(model, |port, config| {
            config.compensate_with(self.compensator(port))
        })?;
        for port in ports {
            builder = builder.adapter(port.clone(), self.adapter(&port));
        }
        Ok(builder)
    }
}

// =============================================================================
// Engine
// =============================================================================

struct Engine {
    model_name: String,
    registry: Arc<ModelRegistry>,
    bus: Arc<EventBus>,
    repository: RepositoryRef,
    metrics: Arc<EngineMetrics>,
    data_dir: PathBuf,
}

impl Engine {
    fn start(
        manifest: &Manifest,
        model_name: &str,
        data_dir: PathBuf,
        simulation: Simulation,
    ) -> anyhow::Result<Self> {
        let metrics = Arc::new(EngineMetrics::new()?);
        let registry = ModelRegistry::with_metrics(metrics.clone());
        let spec = simulation.attach(manifest, model_name)?.build()?;
        let model_name = spec.model_name().to_string();
        let produced: Vec<String> = spec
            .ports()
            .values()
            .filter_map(|config| config.produces_event.clone())
            .collect();
        registry.register_model(spec)?;
        registry.seal();

        let bus = EventBus::with_metrics(manifest.engine.signal_capacity, metrics.clone());
        let repository: RepositoryRef = Arc::new(FileRepository::new(&model_name, &data_dir));

        let checkpoint = CheckpointHandler::new(repository.clone());
        for event in produced {
            bus.on(EventName::new(event), checkpoint.clone(), false);
        }
        spawn_signal_logger(&bus);

        Ok(Self {
            model_name,
            registry,
            bus,
            repository,
            metrics,
            data_dir,
        })
    }

    async fn run(self, fields: Value, wait: Duration, compensate: bool) -> anyhow::Result<()> {
        let model = self
            .registry
            .create_model(&self.bus, &self.repository, &self.model_name, fields)?;
        self.repository.save(model.id(), model.clone()).await?;
        info!(model = %model.name(), id = %model.id(), "model created");

        let graph = model
            .spec()
            .map(|spec| spec.graph().clone())
            .ok_or_else(|| anyhow!("model is unbound"))?;
        let entry = graph
            .entry_ports()
            .first()
            .and_then(|port| graph.step(port))
            .map(|step| step.consumes.clone())
            .ok_or_else(|| anyhow!("{} has no workflow entry port", self.model_name))?;

        info!(event = %entry, "starting workflow");
        if let Err(e) = self
            .bus
            .notify(&EventName::new(entry), EventPayload::Model(model.clone()))
            .await
        {
            warn!(error = %e, "entry port did not complete");
        }

        let latest = self.wait_for(&model, &graph, wait).await?;
        if graph.is_complete(latest.port_flow()) {
            info!(flow = ?latest.port_flow(), "workflow complete");
        } else {
            warn!(flow = ?latest.port_flow(), "workflow did not complete");
            if compensate {
                let report = latest.compensate().await?;
                info!(
                    compensated = ?report.compensated,
                    unwound = ?report.unwound,
                    complete = report.is_complete(),
                    "compensation finished"
                );
                self.repository
                    .save(report.model.id(), report.model.clone())
                    .await?;
            }
        }

        self.finish().await
    }

    async fn wait_for(
        &self,
        model: &Model,
        graph: &saga_ports::WorkflowGraph,
        wait: Duration,
    ) -> anyhow::Result<Model> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let latest = self
                .repository
                .find(model.id())
                .await?
                .unwrap_or_else(|| model.clone());
            if graph.is_complete(latest.port_flow()) || tokio::time::Instant::now() >= deadline {
                return Ok(latest);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    async fn resume(self, delay: Duration) -> anyhow::Result<()> {
        let handle = LoadModels::new(
            &self.model_name,
            self.registry.clone(),
            self.bus.clone(),
            self.repository.clone(),
        )
        .with_directory(self.data_dir.clone())
        .with_resume_delay(delay)
        .load()
        .await?;

        info!(delay_secs = delay.as_secs(), "waiting to resume workflows");
        let report = handle.await.context("resumption task failed")?;
        println!(
            "resumed: {}, completed: {}, skipped: {}",
            report.resumed, report.completed, report.skipped
        );

        // Let resumed chains settle before flushing
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.finish().await
    }

    async fn finish(self) -> anyhow::Result<()> {
        for model in self.repository.list(None).await? {
            println!("{}", serde_json::to_string_pretty(&model)?);
        }
        saga_ports::adapters::close(&self.repository).await?;
        print!("{}", self.metrics.gather_text()?);
        Ok(())
    }
}

fn spawn_signal_logger(bus: &Arc<EventBus>) {
    let mut signals = bus.subscribe_signals();
    tokio::spawn(async move {
        loop {
            match signals.recv().await {
                Ok(signal) if signal.is_error() => error!(kind = signal.kind(), "{}", signal),
                Ok(signal) => info!(kind = signal.kind(), "{}", signal),
                Err(RecvError::Lagged(missed)) => warn!(missed, "signal logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
