//! The pluggable execution pipeline.
//!
//! An [`Adapter`] wraps a concrete [`Backend`] (SQL, RPC, in-memory) with an
//! ordered stack of processors and middlewares built from its
//! [`AdapterConfig`]. A `call(mode, options)` walks processors in
//! registration order, hands control to the middlewares (first registered
//! is outermost, so a middleware can intercept before the core operation
//! runs), and bottoms out in the backend's `read`/`write`/`delete`.
//!
//! Backend errors propagate unmodified; no retry happens at this layer.

mod config;

pub use config::AdapterConfig;

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use hashbrown::HashMap;
use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::error::{Result, TrestleError};
use crate::record::Record;
use crate::relation::{Relation, truthy};
use crate::trestle_trace_call;

/// The three operations a backend can be asked to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    Read,
    Write,
    Delete,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a pipeline call. `None` is the neutral no-op result.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Records(Vec<Record>),
    Count(u64),
    None,
}

impl Payload {
    /// The records of a read result; other payloads yield an empty set.
    pub fn into_records(self) -> Vec<Record> {
        match self {
            Self::Records(records) => records,
            _ => Vec::new(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// The options bag threaded through the pipeline. Processors may rewrite it
/// before the core operation sees it.
#[derive(Clone, Debug)]
pub struct CallOptions {
    pub mode: Mode,
    pub relation: Option<Relation>,
    pub extra: Map<String, Value>,
}

impl CallOptions {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            relation: None,
            extra: Map::new(),
        }
    }

    pub fn read(relation: Relation) -> Self {
        Self {
            mode: Mode::Read,
            relation: Some(relation),
            extra: Map::new(),
        }
    }

    pub fn for_relation(mode: Mode, relation: Relation) -> Self {
        Self {
            mode,
            relation: Some(relation),
            extra: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Whether the options bag itself carries a truthy `noop` flag. Checked
    /// by the innermost execute stage, so a stage invoked outside
    /// [`Adapter::call`] still honors it.
    pub fn noop(&self) -> bool {
        truthy(self.extra.get("noop"))
    }
}

/// A concrete data-access operation supplied by a wrapped adapter.
/// Unimplemented modes report themselves as unsupported.
pub trait Backend: Send + Sync {
    /// The registered adapter type name, e.g. `"memory"`.
    fn kind(&self) -> &'static str;

    fn read(&self, options: &CallOptions) -> Result<Vec<Record>> {
        let _ = options;
        Err(self.unsupported(Mode::Read))
    }

    fn write(&self, options: &CallOptions) -> Result<Payload> {
        let _ = options;
        Err(self.unsupported(Mode::Write))
    }

    fn delete(&self, options: &CallOptions) -> Result<Payload> {
        let _ = options;
        Err(self.unsupported(Mode::Delete))
    }

    fn unsupported(&self, mode: Mode) -> TrestleError {
        TrestleError::Unsupported {
            mode: mode.to_string(),
            kind: self.kind().into(),
        }
    }
}

/// One link of the built pipeline: middleware instances and the core
/// execute stage all speak this contract.
pub trait Handler: Send + Sync {
    fn call(&self, options: CallOptions) -> Result<Payload>;
}

/// A pipeline stage that rewrites call options before the core operation.
pub trait Processor: Send + Sync {
    fn process(&self, options: &mut CallOptions) -> Result<()>;
}

/// Builds a processor instance from its registration options.
pub trait ProcessorFactory: Send + Sync {
    fn name(&self) -> &str;
    fn build(&self, options: &Map<String, Value>) -> Arc<dyn Processor>;
}

/// Builds a middleware instance wrapping the next inner handler. Instances
/// persist for the lifetime of their adapter, so middleware state (like a
/// cache store) survives across calls.
pub trait MiddlewareFactory: Send + Sync {
    fn name(&self) -> &str;
    fn build(&self, inner: Arc<dyn Handler>, options: &Map<String, Value>) -> Arc<dyn Handler>;
}

/// Innermost stage: dispatches on mode to the backend. An options-level
/// `noop` flag short-circuits to the neutral result here, the second of the
/// two interception points.
struct Execute {
    backend: Arc<dyn Backend>,
}

impl Handler for Execute {
    fn call(&self, options: CallOptions) -> Result<Payload> {
        if options.noop() {
            return Ok(Payload::None);
        }
        match options.mode {
            Mode::Read => self.backend.read(&options).map(Payload::Records),
            Mode::Write => self.backend.write(&options),
            Mode::Delete => self.backend.delete(&options),
        }
    }
}

/// Outermost stage: runs every processor in registration order over the
/// options, then hands the transformed bag to the middleware chain.
struct ProcessorChain {
    processors: SmallVec<[Arc<dyn Processor>; 2]>,
    inner: Arc<dyn Handler>,
}

impl Handler for ProcessorChain {
    fn call(&self, mut options: CallOptions) -> Result<Payload> {
        for processor in &self.processors {
            processor.process(&mut options)?;
        }
        self.inner.call(options)
    }
}

/// A backend plus its configured pipeline.
///
/// Adapters are never mutated: [`Adapter::extend_adapter`] returns a new
/// instance with an extended config and its own freshly built stack, so
/// stateful middlewares (like the cache) are isolated per instance.
pub struct Adapter {
    backend: Arc<dyn Backend>,
    config: AdapterConfig,
    stack: OnceLock<Arc<dyn Handler>>,
}

impl Adapter {
    pub fn new(backend: Arc<dyn Backend>, config: AdapterConfig) -> Self {
        Self {
            backend,
            config,
            stack: OnceLock::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.backend.kind()
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// The stack is built once per adapter instance and reused across
    /// calls. Middlewares fold around the execute stage in reverse
    /// registration order, leaving the first registered outermost.
    fn stack(&self) -> Arc<dyn Handler> {
        self.stack
            .get_or_init(|| {
                let mut handler: Arc<dyn Handler> = Arc::new(Execute {
                    backend: self.backend.clone(),
                });
                for (factory, options) in self.config.middlewares().iter().rev() {
                    handler = factory.build(handler, options);
                }
                let processors = self
                    .config
                    .processors()
                    .iter()
                    .map(|(factory, options)| factory.build(options))
                    .collect();
                Arc::new(ProcessorChain {
                    processors,
                    inner: handler,
                })
            })
            .clone()
    }

    /// Executes `mode` through the pipeline. The mode is injected into the
    /// options before dispatch. A truthy `noop` modifier on the relation
    /// makes the whole call a no-op: no processor, middleware, or backend
    /// runs, and nothing is cached.
    pub fn call(&self, mode: Mode, mut options: CallOptions) -> Result<Payload> {
        options.mode = mode;
        if let Some(relation) = &options.relation {
            if relation.modifier_flag("noop")? {
                return Ok(Payload::None);
            }
        }
        trestle_trace_call!(
            mode,
            options
                .relation
                .as_ref()
                .map(|r| r.source_name())
                .unwrap_or("-")
        );
        self.stack().call(options)
    }

    /// Returns a new adapter whose config is this one extended with
    /// `fragment` (scalar overrides, list appends).
    pub fn extend_adapter(&self, fragment: AdapterConfig) -> Adapter {
        Adapter::new(self.backend.clone(), self.config.extend(&fragment))
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("kind", &self.kind())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

type BackendFactory = Arc<dyn Fn(&AdapterConfig) -> Result<Arc<dyn Backend>> + Send + Sync>;

/// Process-wide registry mapping adapter type names to backend factories.
/// Constructed at startup, passed by reference, and resettable for tests.
#[derive(Default)]
pub struct AdapterRegistry {
    factories: Mutex<HashMap<String, BackendFactory>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend factory under a type name. A later registration
    /// under the same name replaces the earlier one.
    pub fn register(
        &self,
        name: impl Into<String>,
        factory: impl Fn(&AdapterConfig) -> Result<Arc<dyn Backend>> + Send + Sync + 'static,
    ) {
        self.factories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(factory));
    }

    /// Instantiates an adapter of the registered type with the given config.
    pub fn create(&self, kind: &str, config: AdapterConfig) -> Result<Adapter> {
        let factory = self
            .factories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
            .ok_or_else(|| TrestleError::UnknownAdapter(kind.into()))?;
        let backend = factory(&config)?;
        Ok(Adapter::new(backend, config))
    }

    pub fn names(&self) -> Vec<String> {
        self.factories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn reset(&self) {
        self.factories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
