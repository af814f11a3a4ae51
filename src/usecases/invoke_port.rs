//! Invoke-Port use-case
//!
//! Direct port invocation by a caller holding the `write` permission. The
//! port runs with its configured callback as argument, if any.

use crate::access::{check_acl, WRITE};
use crate::bus::Signal;
use crate::domain::model::Model;
use crate::engine::PortOutcome;
use crate::error::{Error, Result};
use tracing::{debug, warn};

pub async fn invoke_port(model: &Model, port_name: &str, permission: &str) -> Result<Model> {
    let spec = model.binding()?.spec.clone();

    let Some(port) = spec.port(port_name).filter(|_| check_acl(&[WRITE], permission)) else {
        warn!(model = %model.name(), id = %model.id(), port = port_name, permission, "port invocation not authorized");
        model.emit(Signal::unauthorized_port(model, port_name));
        return Ok(model.clone());
    };

    let args = port.callback.clone().into_iter().collect();
    match model.invoke(port_name, args).await? {
        PortOutcome::Completed(updated) => Ok(updated),
        PortOutcome::Exhausted { error } => Err(Error::PortExhausted {
            port_name: port_name.to_string(),
            reason: error,
        }),
        outcome => {
            debug!(port = port_name, outcome = outcome.label(), "port did not complete");
            Ok(model.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::datasource::MemoryRepository;
    use crate::domain::ports::{adapter_fn, PortRequest, RepositoryRef};
    use crate::domain::spec::{ModelSpecification, PortConfig};
    use crate::registry::ModelRegistry;
    use assert_matches::assert_matches;
    use serde_json::{json, Map};
    use std::sync::Arc;

    fn setup() -> (Arc<EventBus>, Model) {
        let spec = ModelSpecification::builder("order")
            .port(
                "label",
                PortConfig::new().with_callback(json!({"format": "pdf"})),
            )
            .port("broken", PortConfig::new().timeout_secs(5).retry_timeout_secs(1))
            .adapter(
                "label",
                adapter_fn(|req: PortRequest| async move {
                    let mut changes = Map::new();
                    changes.insert("label".into(), req.arg(0).cloned().unwrap_or_default());
                    Ok(req.model.update(changes))
                }),
            )
            .adapter(
                "broken",
                adapter_fn(|_req: PortRequest| async move { Err(Error::Adapter("down".into())) }),
            )
            .build()
            .unwrap();
        let registry = ModelRegistry::new().unwrap();
        registry.register_model(spec).unwrap();
        let bus = EventBus::new();
        let repo: RepositoryRef = Arc::new(MemoryRepository::new("ORDER"));
        let model = registry.create_model(&bus, &repo, "order", json!({})).unwrap();
        (bus, model)
    }

    #[tokio::test]
    async fn test_invoke_with_callback() {
        let (_bus, model) = setup();
        let updated = invoke_port(&model, "label", "write").await.unwrap();
        assert_eq!(updated.get("label"), Some(&json!({"format": "pdf"})));
    }

    #[tokio::test]
    async fn test_unauthorized_port() {
        let (bus, model) = setup();
        let mut signals = bus.subscribe_signals();

        let same = invoke_port(&model, "label", "read").await.unwrap();
        assert_eq!(same, model);
        assert_matches!(signals.recv().await.unwrap(), Signal::UnauthorizedPort { .. });

        let missing = invoke_port(&model, "nope", "write").await.unwrap();
        assert_eq!(missing, model);
    }

    #[tokio::test]
    async fn test_exhausted_port_propagates() {
        let (_bus, model) = setup();
        let err = invoke_port(&model, "broken", "write").await.unwrap_err();
        assert_matches!(err, Error::PortExhausted { port_name, .. } if port_name == "broken");
    }
}
