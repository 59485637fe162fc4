//! Composable adapter configuration.
//!
//! An [`AdapterConfig`] accretes scalar options plus two ordered component
//! lists. Extension is repeatable: scalars are overwritten by the most
//! recent extension while the middleware and processor lists only ever
//! append, so configuration fragments compose independently of execution.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use smallvec::SmallVec;

use super::{MiddlewareFactory, ProcessorFactory};

type MiddlewareEntry = (Arc<dyn MiddlewareFactory>, Map<String, Value>);
type ProcessorEntry = (Arc<dyn ProcessorFactory>, Map<String, Value>);

#[derive(Clone, Default)]
pub struct AdapterConfig {
    options: Map<String, Value>,
    middlewares: SmallVec<[MiddlewareEntry; 2]>,
    processors: SmallVec<[ProcessorEntry; 2]>,
}

impl AdapterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a scalar option. Unknown keys are preserved verbatim so
    /// forward-compatible configuration is never lost.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.options.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    /// Builder form of [`set`](Self::set).
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Appends a middleware registration with its per-entry options.
    pub fn add_middleware(
        &mut self,
        factory: Arc<dyn MiddlewareFactory>,
        options: Map<String, Value>,
    ) {
        self.middlewares.push((factory, options));
    }

    pub fn with_middleware(
        mut self,
        factory: Arc<dyn MiddlewareFactory>,
        options: Map<String, Value>,
    ) -> Self {
        self.add_middleware(factory, options);
        self
    }

    /// Appends a processor registration with its per-entry options.
    pub fn add_processor(
        &mut self,
        factory: Arc<dyn ProcessorFactory>,
        options: Map<String, Value>,
    ) {
        self.processors.push((factory, options));
    }

    pub fn with_processor(
        mut self,
        factory: Arc<dyn ProcessorFactory>,
        options: Map<String, Value>,
    ) -> Self {
        self.add_processor(factory, options);
        self
    }

    pub fn middlewares(&self) -> &[MiddlewareEntry] {
        &self.middlewares
    }

    pub fn processors(&self) -> &[ProcessorEntry] {
        &self.processors
    }

    /// Produces a new config extended with `other`: scalar options from
    /// `other` overwrite, component lists append and never remove.
    pub fn extend(&self, other: &AdapterConfig) -> AdapterConfig {
        let mut merged = self.clone();
        for (key, value) in &other.options {
            merged.options.insert(key.clone(), value.clone());
        }
        merged.middlewares.extend(other.middlewares.iter().cloned());
        merged.processors.extend(other.processors.iter().cloned());
        merged
    }

    /// Introspection map: scalars plus the names of registered components
    /// with their per-entry options.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = self.options.clone();
        if !self.middlewares.is_empty() {
            map.insert("middlewares".into(), component_list(&self.middlewares));
        }
        if !self.processors.is_empty() {
            map.insert("processors".into(), component_list(&self.processors));
        }
        map
    }
}

fn component_list<T: Named + ?Sized>(entries: &[(Arc<T>, Map<String, Value>)]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|(factory, options)| {
                Value::Array(vec![
                    Value::String(factory.component_name().into()),
                    Value::Object(options.clone()),
                ])
            })
            .collect(),
    )
}

/// Internal helper so middleware and processor entries render the same way.
trait Named {
    fn component_name(&self) -> &str;
}

impl Named for dyn MiddlewareFactory {
    fn component_name(&self) -> &str {
        self.name()
    }
}

impl Named for dyn ProcessorFactory {
    fn component_name(&self) -> &str {
        self.name()
    }
}

impl fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterConfig")
            .field("options", &self.options)
            .field(
                "middlewares",
                &self
                    .middlewares
                    .iter()
                    .map(|(factory, _)| factory.name())
                    .collect::<Vec<_>>(),
            )
            .field(
                "processors",
                &self
                    .processors
                    .iter()
                    .map(|(factory, _)| factory.name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
