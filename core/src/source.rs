//! The model-layer seam.
//!
//! A [`Source`] is everything a relation needs to know about the model it
//! queries: identity, attribute registry, primary key, named scopes,
//! delegated methods, the configured [`Adapter`], and the [`Fetcher`] that
//! executes fetches. Registries have explicit construct/reset lifecycles
//! and are owned by the source rather than reached as ambient globals.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use hashbrown::HashMap;
use serde_json::Value;

use crate::adapter::{Adapter, CallOptions, Mode};
use crate::error::{Result, TrestleError};
use crate::middleware::cache::{CachePolicy, Store};
use crate::record::Record;
use crate::relation::{Dispatched, Relation};

/// A named scope: receives the source's base relation and the call
/// arguments, returns the relation fragment to merge.
pub type ScopeFn = Arc<dyn Fn(Relation, &[Value]) -> Relation + Send + Sync>;

/// A source-delegated method, executed under the calling relation's scope.
pub type DelegateFn = Arc<dyn Fn(&Arc<Source>, &[Value]) -> Result<Dispatched> + Send + Sync>;

/// Named relation-producing functions registered per source.
#[derive(Default)]
pub struct ScopeRegistry {
    inner: Mutex<HashMap<String, ScopeFn>>,
}

impl ScopeRegistry {
    pub fn register(
        &self,
        name: impl Into<String>,
        scope: impl Fn(Relation, &[Value]) -> Relation + Send + Sync + 'static,
    ) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(scope));
    }

    pub fn get(&self, name: &str) -> Option<ScopeFn> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn reset(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Methods the model class itself answers, reachable through relation
/// dispatch.
#[derive(Default)]
pub struct DelegateRegistry {
    inner: Mutex<HashMap<String, DelegateFn>>,
}

impl DelegateRegistry {
    pub fn register(
        &self,
        name: impl Into<String>,
        delegate: impl Fn(&Arc<Source>, &[Value]) -> Result<Dispatched> + Send + Sync + 'static,
    ) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(delegate));
    }

    pub fn get(&self, name: &str) -> Option<DelegateFn> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn reset(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// The raw execution entry point a relation invokes to materialize itself.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, relation: &Relation) -> Result<Vec<Record>>;
}

/// Uncached fetcher: a straight read through the adapter pipeline.
pub struct RawFetcher {
    adapter: Arc<Adapter>,
}

impl RawFetcher {
    pub fn new(adapter: Arc<Adapter>) -> Self {
        Self { adapter }
    }
}

impl Fetcher for RawFetcher {
    fn fetch(&self, relation: &Relation) -> Result<Vec<Record>> {
        let options = CallOptions::read(relation.clone());
        Ok(self.adapter.call(Mode::Read, options)?.into_records())
    }
}

/// Caching decorator over any inner fetcher, selected at source
/// construction. Same contract, same cache rules as the pipeline
/// middleware, own independent store.
pub struct CachingFetcher {
    inner: Box<dyn Fetcher>,
    store: Mutex<Store>,
    policy: CachePolicy,
}

impl CachingFetcher {
    pub fn new(inner: Box<dyn Fetcher>, policy: CachePolicy) -> Self {
        let store = Mutex::new(policy.store());
        Self {
            inner,
            store,
            policy,
        }
    }

    pub fn reset_store(&self) {
        *self.store.lock().unwrap_or_else(PoisonError::into_inner) = self.policy.store();
    }
}

impl Fetcher for CachingFetcher {
    fn fetch(&self, relation: &Relation) -> Result<Vec<Record>> {
        self.policy
            .fetch_through(&self.store, relation, || self.inner.fetch(relation))
    }
}

/// One queryable model type and its collaborators.
pub struct Source {
    name: String,
    attributes: Vec<String>,
    primary_key: String,
    scopes: ScopeRegistry,
    delegates: DelegateRegistry,
    adapter: Arc<Adapter>,
    fetcher: Box<dyn Fetcher>,
    scope_stack: Mutex<Vec<Relation>>,
}

impl Source {
    pub fn build(name: impl Into<String>) -> SourceBuilder {
        SourceBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|attr| attr == name)
    }

    pub fn adapter(&self) -> &Arc<Adapter> {
        &self.adapter
    }

    /// Registers a named scope after construction.
    pub fn define_scope(
        &self,
        name: impl Into<String>,
        scope: impl Fn(Relation, &[Value]) -> Relation + Send + Sync + 'static,
    ) {
        self.scopes.register(name, scope);
    }

    pub fn scope(&self, name: &str) -> Option<ScopeFn> {
        self.scopes.get(name)
    }

    /// Registers a model-answered method reachable through relation
    /// dispatch.
    pub fn define_delegate(
        &self,
        name: impl Into<String>,
        delegate: impl Fn(&Arc<Source>, &[Value]) -> Result<Dispatched> + Send + Sync + 'static,
    ) {
        self.delegates.register(name, delegate);
    }

    pub fn delegate(&self, name: &str) -> Option<DelegateFn> {
        self.delegates.get(name)
    }

    /// Clears the scope and delegate registries and the scoping stack.
    pub fn reset(&self) {
        self.scopes.reset();
        self.delegates.reset();
        self.scope_stack
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// A fresh, unscoped relation against this source.
    pub fn relation(self: &Arc<Self>) -> Relation {
        Relation::new(self.clone())
    }

    /// The ambient relation: the base relation merged with every entry of
    /// the scoping stack, oldest first.
    pub fn scoped(self: &Arc<Self>) -> Relation {
        let stack = self
            .scope_stack
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        stack
            .iter()
            .fold(self.relation(), |relation, scope| relation.merge(scope))
    }

    /// Executes `f` with the scoping stack suspended, restoring it on every
    /// exit path.
    pub fn unscoped<T>(self: &Arc<Self>, f: impl FnOnce() -> T) -> T {
        let saved = std::mem::take(
            &mut *self
                .scope_stack
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let _guard = RestoreGuard {
            source: self.clone(),
            saved: Some(saved),
        };
        f()
    }

    /// Pushes a relation onto the scoping stack; the returned guard pops it
    /// when dropped, so the pop happens on panic as well as return.
    pub fn push_scope(self: &Arc<Self>, relation: Relation) -> ScopeStackGuard {
        self.scope_stack
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(relation);
        ScopeStackGuard {
            source: self.clone(),
        }
    }

    /// Raw execution: hands the relation to the configured fetcher.
    pub fn fetch_records(&self, relation: &Relation) -> Result<Vec<Record>> {
        self.fetcher.fetch(relation)
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .field("primary_key", &self.primary_key)
            .field("adapter", &self.adapter.kind())
            .finish_non_exhaustive()
    }
}

pub struct ScopeStackGuard {
    source: Arc<Source>,
}

impl Drop for ScopeStackGuard {
    fn drop(&mut self) {
        self.source
            .scope_stack
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
    }
}

struct RestoreGuard {
    source: Arc<Source>,
    saved: Option<Vec<Relation>>,
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            *self
                .source
                .scope_stack
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = saved;
        }
    }
}

/// Consuming builder for [`Source`].
pub struct SourceBuilder {
    name: String,
    attributes: Vec<String>,
    primary_key: String,
    adapter: Option<Arc<Adapter>>,
    cache: Option<CachePolicy>,
}

impl SourceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            primary_key: "id".into(),
            adapter: None,
            cache: None,
        }
    }

    /// Declares the queryable attributes; dynamic finders validate against
    /// this set.
    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = key.into();
        self
    }

    pub fn adapter(mut self, adapter: Adapter) -> Self {
        self.adapter = Some(Arc::new(adapter));
        self
    }

    pub fn adapter_ref(mut self, adapter: Arc<Adapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Enables fetch-level caching by decorating the raw fetcher.
    pub fn cached(mut self, policy: CachePolicy) -> Self {
        self.cache = Some(policy);
        self
    }

    pub fn finish(self) -> Result<Arc<Source>> {
        let adapter = self
            .adapter
            .ok_or_else(|| TrestleError::Config(format!("source `{}` has no adapter", self.name)))?;
        let raw = RawFetcher::new(adapter.clone());
        let fetcher: Box<dyn Fetcher> = match &self.cache {
            Some(policy) => Box::new(CachingFetcher::new(Box::new(raw), policy.clone())),
            None => Box::new(raw),
        };
        Ok(Arc::new(Source {
            name: self.name,
            attributes: self.attributes,
            primary_key: self.primary_key,
            scopes: ScopeRegistry::default(),
            delegates: DelegateRegistry::default(),
            adapter,
            fetcher,
            scope_stack: Mutex::new(Vec::new()),
        }))
    }
}
