//! Core of the trestle data-access layer.
//!
//! Two coupled subsystems live here. The [`relation`] module is the lazy,
//! chainable query builder: every mutator returns a new [`Relation`], and
//! nothing executes until [`Relation::to_a`] pulls results through the
//! source's fetcher. The [`adapter`] module is the pluggable execution
//! pipeline: an [`Adapter`] walks processors and middlewares around a
//! concrete [`Backend`] operation, and the [`middleware::cache`] stage
//! short-circuits reads it has fingerprinted before.

pub mod adapter;
pub mod error;
pub mod middleware;
pub mod record;
pub mod relation;
pub mod source;
mod tracing;

pub use adapter::{
    Adapter, AdapterConfig, AdapterRegistry, Backend, CallOptions, Handler, MiddlewareFactory,
    Mode, Payload, Processor, ProcessorFactory,
};
pub use error::{Result, TrestleError};
pub use middleware::cache::{CacheMiddleware, CacheMiddlewareFactory, CachePolicy, Store};
pub use record::Record;
pub use relation::{
    Dispatched, FieldValue, FindTarget, Found, IncludesTree, ModifierArg, QuerySpec, Relation,
};
pub use source::{
    CachingFetcher, Fetcher, RawFetcher, ScopeRegistry, Source, SourceBuilder,
};

/// Common imports for applications building on trestle.
pub mod prelude {
    pub use crate::adapter::{
        Adapter, AdapterConfig, AdapterRegistry, Backend, CallOptions, Mode, Payload,
    };
    pub use crate::error::{Result, TrestleError};
    pub use crate::middleware::cache::{CacheMiddlewareFactory, CachePolicy};
    pub use crate::record::Record;
    pub use crate::relation::{FindTarget, Found, Relation};
    pub use crate::source::{Source, SourceBuilder};
}
