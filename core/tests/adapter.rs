mod common;

use std::sync::{Arc, Mutex, PoisonError};

use common::{TestBackend, row, source};
use serde_json::{Map, Value, json};
use trestle_core::{
    Adapter, AdapterConfig, AdapterRegistry, Backend, CallOptions, Handler, MiddlewareFactory,
    Mode, Payload, Processor, ProcessorFactory, Record, Result, TrestleError,
};

/// Shared log recording the order in which pipeline stages run.
#[derive(Clone, Default)]
struct StageLog(Arc<Mutex<Vec<String>>>);

impl StageLog {
    fn push(&self, entry: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

struct LoggingBackend {
    log: StageLog,
}

impl Backend for LoggingBackend {
    fn kind(&self) -> &'static str {
        "probe"
    }

    fn read(&self, _options: &CallOptions) -> Result<Vec<Record>> {
        self.log.push("read");
        Ok(vec![Record::new(row(json!({"id": 1})))])
    }
}

struct ProbeProcessor {
    name: &'static str,
    log: StageLog,
}

impl Processor for ProbeProcessor {
    fn process(&self, _options: &mut CallOptions) -> Result<()> {
        self.log.push(self.name);
        Ok(())
    }
}

struct ProbeProcessorFactory {
    name: &'static str,
    log: StageLog,
}

impl ProcessorFactory for ProbeProcessorFactory {
    fn name(&self) -> &str {
        self.name
    }

    fn build(&self, _options: &Map<String, Value>) -> Arc<dyn Processor> {
        Arc::new(ProbeProcessor {
            name: self.name,
            log: self.log.clone(),
        })
    }
}

struct ProbeMiddleware {
    name: &'static str,
    log: StageLog,
    inner: Arc<dyn Handler>,
}

impl Handler for ProbeMiddleware {
    fn call(&self, options: CallOptions) -> Result<Payload> {
        self.log.push(self.name);
        let result = self.inner.call(options);
        self.log.push(format!("{}:out", self.name));
        result
    }
}

struct ProbeMiddlewareFactory {
    name: &'static str,
    log: StageLog,
}

impl MiddlewareFactory for ProbeMiddlewareFactory {
    fn name(&self) -> &str {
        self.name
    }

    fn build(&self, inner: Arc<dyn Handler>, _options: &Map<String, Value>) -> Arc<dyn Handler> {
        Arc::new(ProbeMiddleware {
            name: self.name,
            log: self.log.clone(),
            inner,
        })
    }
}

/// A probe adapter assembled the way applications do it: a base config
/// fragment extended with a second one.
fn probe_adapter(log: &StageLog) -> Adapter {
    let base = AdapterConfig::new()
        .with_processor(
            Arc::new(ProbeProcessorFactory {
                name: "processor_a",
                log: log.clone(),
            }),
            Map::new(),
        )
        .with_middleware(
            Arc::new(ProbeMiddlewareFactory {
                name: "middleware_a",
                log: log.clone(),
            }),
            Map::new(),
        );
    let extension = AdapterConfig::new()
        .with_processor(
            Arc::new(ProbeProcessorFactory {
                name: "processor_b",
                log: log.clone(),
            }),
            Map::new(),
        )
        .with_middleware(
            Arc::new(ProbeMiddlewareFactory {
                name: "middleware_b",
                log: log.clone(),
            }),
            Map::new(),
        );

    Adapter::new(Arc::new(LoggingBackend { log: log.clone() }), base).extend_adapter(extension)
}

#[test]
fn mode_is_injected_before_dispatch() {
    let backend = TestBackend::new();
    let source = source(backend.clone());
    let relation = source.relation();

    let adapter = source.adapter();
    for mode in [Mode::Read, Mode::Write, Mode::Delete] {
        // The options bag starts out claiming Read; call() overrides it.
        adapter
            .call(mode, CallOptions::for_relation(Mode::Read, relation.clone()))
            .unwrap();
        assert_eq!(backend.last_call().unwrap().0, mode);
    }
}

#[test]
fn stages_run_in_registration_order_around_the_core_operation() {
    let log = StageLog::default();
    let adapter = probe_adapter(&log);
    let backend = TestBackend::new();
    let relation = source(backend).relation();

    let expected = vec![
        "processor_a".to_string(),
        "processor_b".to_string(),
        "middleware_a".to_string(),
        "middleware_b".to_string(),
        "read".to_string(),
        "middleware_b:out".to_string(),
        "middleware_a:out".to_string(),
    ];

    adapter
        .call(Mode::Read, CallOptions::read(relation.clone()))
        .unwrap();
    assert_eq!(log.entries(), expected);

    // A second identical call walks the same stack in the same order.
    adapter
        .call(Mode::Read, CallOptions::read(relation))
        .unwrap();
    let doubled: Vec<String> = expected.iter().chain(expected.iter()).cloned().collect();
    assert_eq!(log.entries(), doubled);
}

#[test]
fn noop_modifier_short_circuits_every_stage() {
    let log = StageLog::default();
    let adapter = probe_adapter(&log);
    let relation = source(TestBackend::new()).relation().noop();

    let result = adapter
        .call(Mode::Read, CallOptions::read(relation))
        .unwrap();
    assert!(result.is_none());
    assert!(log.entries().is_empty());
}

#[test]
fn options_level_noop_is_intercepted_by_the_execute_stage() {
    let log = StageLog::default();
    let adapter = probe_adapter(&log);
    let relation = source(TestBackend::new()).relation();

    let options = CallOptions::read(relation).with("noop", true);
    let result = adapter.call(Mode::Read, options).unwrap();

    // Outer stages still ran, but the core operation did not.
    assert!(result.is_none());
    assert!(!log.entries().contains(&"read".to_string()));
    assert_eq!(log.entries().first().map(String::as_str), Some("processor_a"));
}

#[test]
fn extend_adapter_overrides_scalars_and_never_mutates_the_receiver() {
    let backend = TestBackend::new();
    let adapter = Adapter::new(backend, AdapterConfig::new().with_option("foo", "bar"));
    assert_eq!(adapter.config().get("foo"), Some(&json!("bar")));

    let extended = adapter.extend_adapter(AdapterConfig::new().with_option("foo", "baz"));
    assert_eq!(extended.config().get("foo"), Some(&json!("baz")));
    assert_eq!(adapter.config().get("foo"), Some(&json!("bar")));
}

#[test]
fn repeated_extension_appends_to_the_component_lists() {
    let log = StageLog::default();
    let factory = |name: &'static str| {
        Arc::new(ProbeMiddlewareFactory {
            name,
            log: log.clone(),
        })
    };

    let adapter = Adapter::new(TestBackend::new(), AdapterConfig::new());
    let adapter =
        adapter.extend_adapter(AdapterConfig::new().with_middleware(factory("foo"), Map::new()));
    let adapter = adapter.extend_adapter(
        AdapterConfig::new().with_middleware(factory("bar"), row(json!({"baz": "poo"}))),
    );
    let adapter =
        adapter.extend_adapter(AdapterConfig::new().with_middleware(factory("baz"), Map::new()));

    assert_eq!(
        adapter.config().to_map()["middlewares"],
        json!([["foo", {}], ["bar", {"baz": "poo"}], ["baz", {}]])
    );
}

#[test]
fn registry_creates_adapters_by_name() {
    let registry = AdapterRegistry::new();
    registry.register("test", |_config| {
        let backend: Arc<dyn Backend> = TestBackend::new();
        Ok(backend)
    });

    let adapter = registry
        .create("test", AdapterConfig::new().with_option("host", "example"))
        .unwrap();
    assert_eq!(adapter.kind(), "test");
    assert_eq!(adapter.config().get("host"), Some(&json!("example")));

    assert!(matches!(
        registry.create("missing", AdapterConfig::new()),
        Err(TrestleError::UnknownAdapter(_))
    ));

    registry.reset();
    assert!(matches!(
        registry.create("test", AdapterConfig::new()),
        Err(TrestleError::UnknownAdapter(_))
    ));
}

#[test]
fn unimplemented_modes_report_unsupported() {
    struct NullBackend;

    impl Backend for NullBackend {
        fn kind(&self) -> &'static str {
            "null"
        }
    }

    let adapter = Adapter::new(Arc::new(NullBackend), AdapterConfig::new());
    let relation = source(TestBackend::new()).relation();

    assert!(matches!(
        adapter.call(Mode::Read, CallOptions::read(relation)),
        Err(TrestleError::Unsupported { .. })
    ));
}

#[test]
fn backend_errors_propagate_unmodified_through_the_stack() {
    struct FailingBackend;

    impl Backend for FailingBackend {
        fn kind(&self) -> &'static str {
            "failing"
        }

        fn read(&self, _options: &CallOptions) -> Result<Vec<Record>> {
            Err(TrestleError::Backend("connection refused".into()))
        }
    }

    let log = StageLog::default();
    let config = AdapterConfig::new().with_middleware(
        Arc::new(ProbeMiddlewareFactory {
            name: "probe",
            log: log.clone(),
        }),
        Map::new(),
    );
    let adapter = Adapter::new(Arc::new(FailingBackend), config);
    let relation = source(TestBackend::new()).relation();

    let error = adapter
        .call(Mode::Read, CallOptions::read(relation))
        .unwrap_err();
    assert!(matches!(error, TrestleError::Backend(message) if message == "connection refused"));
}
