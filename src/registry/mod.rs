//! Model/Event Registry
//!
//! Created once at start-up, populated with specifications and event
//! factories, then sealed and shared by `Arc`.

pub mod model_registry;

pub use model_registry::{ModelKey, ModelRegistry};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{handler_fn, EventBus, EventPayload, Signal};
    use crate::datasource::MemoryRepository;
    use crate::domain::event::{passthrough_factory, EventArgs, EventName, EventType};
    use crate::domain::model::WorkflowState;
    use crate::domain::ports::{adapter_fn, PortRequest, RepositoryRef};
    use crate::domain::spec::{ModelSpecification, PortConfig};
    use crate::error::Error;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use serde_json::{json, Map, Value};
    use std::sync::Arc;
    use std::time::Duration;

    fn repository() -> RepositoryRef {
        Arc::new(MemoryRepository::new("ORDER"))
    }

    fn tagging_adapter(tag: &'static str) -> crate::domain::ports::PortAdapterRef {
        adapter_fn(move |req: PortRequest| async move {
            let mut changes = Map::new();
            changes.insert(tag.to_string(), json!(true));
            Ok(req.model.update(changes))
        })
    }

    fn order_spec() -> ModelSpecification {
        ModelSpecification::builder("order")
            .port("a", PortConfig::new().consumes("CREATEORDER").produces("aDone"))
            .port("b", PortConfig::new().consumes("aDone").produces("bDone"))
            .adapter("a", tagging_adapter("a"))
            .adapter("b", tagging_adapter("b"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_unregistered_model() {
        let registry = ModelRegistry::new().unwrap();
        let err = registry
            .create_model(&EventBus::new(), &repository(), "ghost", json!({}))
            .unwrap_err();
        assert_matches!(err, Error::UnregisteredModel { model_name } if model_name == "GHOST");
    }

    #[test]
    fn test_registration_is_first_wins_and_sealable() {
        let registry = ModelRegistry::new().unwrap();
        registry.register_model(order_spec()).unwrap();
        registry
            .register_model(ModelSpecification::builder("ORDER").build().unwrap())
            .unwrap();
        assert_eq!(registry.get_model_spec("order").unwrap().ports().len(), 2);

        registry.seal();
        let err = registry
            .register_model(ModelSpecification::builder("invoice").build().unwrap())
            .unwrap_err();
        assert_matches!(err, Error::RegistrySealed(_));

        let model = registry
            .create_model(&EventBus::new(), &repository(), "Order", json!({"qty": 1}))
            .unwrap();
        assert_eq!(model.name(), "ORDER");
    }

    #[test]
    fn test_events() {
        let registry = ModelRegistry::new().unwrap();
        assert_matches!(
            registry.register_event("upsert", "order", |_: &EventArgs| Ok(Value::Null)),
            Err(Error::InvalidArgument(_))
        );

        registry
            .register_event("update", "order", |args: &EventArgs| Ok(args.data.clone()))
            .unwrap();
        registry
            .register_event(EventType::Update, "ORDER", |_: &EventArgs| Ok(json!("second")))
            .unwrap();

        let event = registry
            .create_event("UPDATE", "order", EventArgs::new(None, json!({"changes": {}})))
            .unwrap();
        assert_eq!(event.event_name.as_str(), "UPDATEORDER");
        assert_eq!(event.payload, json!({"changes": {}}));

        assert_matches!(
            registry.create_event(EventType::Delete, "order", EventArgs::default()),
            Err(Error::UnregisteredEvent { .. })
        );
        assert_eq!(
            registry.get_event_name("create", "order").unwrap(),
            EventName::from("CREATEORDER")
        );
    }

    #[test]
    fn test_ports_bound_once_per_bus() {
        let registry = ModelRegistry::new().unwrap();
        registry.register_model(order_spec()).unwrap();
        let bus = EventBus::new();
        let repo = repository();

        registry.create_model(&bus, &repo, "order", json!({})).unwrap();
        registry.create_model(&bus, &repo, "order", json!({})).unwrap();
        assert_eq!(bus.listener_count(&"CREATEORDER".into()), 1);

        let other = EventBus::new();
        registry.create_model(&other, &repo, "order", json!({})).unwrap();
        assert_eq!(other.listener_count(&"aDone".into()), 1);
    }

    #[test]
    fn test_unbind_releases_listeners() {
        let registry = ModelRegistry::new().unwrap();
        registry.register_model(order_spec()).unwrap();
        let bus = EventBus::new();
        let other = EventBus::new();
        let repo = repository();
        registry.create_model(&bus, &repo, "order", json!({})).unwrap();
        registry.create_model(&other, &repo, "order", json!({})).unwrap();

        assert_eq!(registry.unbind(&bus), 1);
        assert_eq!(bus.listener_count(&"CREATEORDER".into()), 0);
        assert_eq!(bus.listener_count(&"aDone".into()), 0);
        assert_eq!(other.listener_count(&"CREATEORDER".into()), 1);
        assert_eq!(registry.unbind(&bus), 0);

        registry.create_model(&bus, &repo, "order", json!({})).unwrap();
        assert_eq!(bus.listener_count(&"CREATEORDER".into()), 1);
    }

    #[test]
    fn test_load_model_binds() {
        let registry = ModelRegistry::new().unwrap();
        registry.register_model(order_spec()).unwrap();
        let model = registry
            .load_model(
                &EventBus::new(),
                &repository(),
                json!({"id": "1", "modelName": "order", "v": 1, "portFlow": ["a"]}),
                "order",
            )
            .unwrap();

        assert_eq!(model.id().as_str(), "1");
        assert_eq!(model.name(), "ORDER");
        assert_eq!(model.get("v"), Some(&json!(1)));
        assert_eq!(registry.get_port_flow(&model), vec!["a".to_string()]);
        assert!(model.is_bound());
        assert!(registry.get_model_spec(&model).is_some());
    }

    #[tokio::test]
    async fn test_ports_chain_through_events() {
        let registry = ModelRegistry::new().unwrap();
        registry.register_model(order_spec()).unwrap();
        registry
            .register_event_factory(EventType::Create, "order", passthrough_factory())
            .unwrap();
        let bus = EventBus::new();
        let done = Arc::new(Mutex::new(None));
        let sink = done.clone();
        bus.on(
            "bDone",
            handler_fn(move |_, payload: EventPayload| {
                let sink = sink.clone();
                async move {
                    *sink.lock() = payload.model().cloned();
                    Ok(())
                }
            }),
            false,
        );

        let model = registry.create_model(&bus, &repository(), "order", json!({})).unwrap();
        let event = registry
            .create_event(EventType::Create, "order", EventArgs::for_model(model))
            .unwrap();
        bus.notify(&event.event_name.clone(), EventPayload::Event(event))
            .await
            .unwrap();

        for _ in 0..50 {
            if done.lock().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let finished = done.lock().clone().expect("chain did not finish");
        assert_eq!(finished.port_flow(), ["a".to_string(), "b".to_string()]);
        assert_eq!(finished.get("a"), Some(&json!(true)));
        assert_eq!(finished.get("b"), Some(&json!(true)));
        assert!(registry.get_model_spec("order").unwrap().graph().is_complete(finished.port_flow()));
    }

    #[tokio::test]
    async fn test_compensation_runs_in_reverse() {
        let undone = Arc::new(Mutex::new(Vec::new()));
        let compensator = |tag: &'static str, log: Arc<Mutex<Vec<&'static str>>>| {
            adapter_fn(move |req: PortRequest| {
                let log = log.clone();
                async move {
                    log.lock().push(tag);
                    Ok(req.model)
                }
            })
        };

        let spec = ModelSpecification::builder("order")
            .port(
                "a",
                PortConfig::new()
                    .consumes("start")
                    .compensate_with(compensator("a", undone.clone())),
            )
            .port("b", PortConfig::new().consumes("next"))
            .port(
                "c",
                PortConfig::new()
                    .consumes("last")
                    .compensate_with(compensator("c", undone.clone())),
            )
            .adapter("a", tagging_adapter("a"))
            .adapter("b", tagging_adapter("b"))
            .adapter("c", tagging_adapter("c"))
            .build()
            .unwrap();
        let registry = ModelRegistry::new().unwrap();
        registry.register_model(spec).unwrap();
        let bus = EventBus::new();
        let mut signals = bus.subscribe_signals();

        let model = registry
            .load_model(
                &bus,
                &repository(),
                json!({"id": "7", "modelName": "ORDER", "portFlow": ["a", "b", "c"]}),
                "order",
            )
            .unwrap();
        let report = model.compensate().await.unwrap();

        assert!(report.is_complete());
        assert_eq!(*undone.lock(), vec!["c", "a"]);
        assert_eq!(report.compensated, vec!["c".to_string(), "a".to_string()]);
        assert_eq!(report.unwound, vec!["b".to_string()]);
        assert!(report.model.port_flow().is_empty());
        assert_eq!(report.model.workflow_state(), WorkflowState::Normal);
        assert_matches!(signals.recv().await.unwrap(), Signal::CompensationCompleted { .. });
    }

    #[tokio::test]
    async fn test_failed_compensation_stays_compensating() {
        let spec = ModelSpecification::builder("order")
            .port("a", PortConfig::new().consumes("start"))
            .port(
                "b",
                PortConfig::new().consumes("next").compensate_with(adapter_fn(
                    |_req: PortRequest| async move { Err(Error::Adapter("refund rejected".into())) },
                )),
            )
            .adapter("a", tagging_adapter("a"))
            .adapter("b", tagging_adapter("b"))
            .build()
            .unwrap();
        let registry = ModelRegistry::new().unwrap();
        registry.register_model(spec).unwrap();

        let model = registry
            .load_model(
                &EventBus::new(),
                &repository(),
                json!({"id": "8", "modelName": "ORDER", "portFlow": ["a", "b"]}),
                "order",
            )
            .unwrap();
        let report = model.compensate().await.unwrap();

        assert!(!report.is_complete());
        assert_eq!(report.failed.unwrap().port_name, "b");
        assert!(report.model.is_compensating());
        assert_eq!(report.model.port_flow(), ["a".to_string(), "b".to_string()]);
    }
}
