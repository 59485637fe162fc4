//! # Trestle
//!
//! A pluggable data-access layer for Rust: application models are backed by
//! remote or local data sources (SQL, RPC, in-memory) through a uniform
//! query and execution interface.
//!
//! Queries are built lazily with a chainable, immutable-per-step
//! [`Relation`]; execution flows through an [`Adapter`] pipeline of
//! processors and middlewares, including a TTL result cache keyed by a
//! canonical fingerprint of the query, before reaching the concrete
//! backend operation.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::{json, Map, Value};
//! use trestle::prelude::*;
//! use trestle::memory::MemoryBackend;
//!
//! # fn row(v: Value) -> Map<String, Value> { v.as_object().unwrap().clone() }
//! # fn main() -> trestle::Result<()> {
//! let backend = Arc::new(MemoryBackend::new());
//! backend.insert("posts", [
//!     row(json!({"id": 1, "title": "hello"})),
//!     row(json!({"id": 2, "title": "world"})),
//! ]);
//!
//! let adapter = Adapter::new(backend, AdapterConfig::new());
//! let posts = Source::build("posts")
//!     .attributes(["id", "title"])
//!     .adapter(adapter)
//!     .finish()?;
//!
//! let hello = posts.relation().r#where(json!({"title": "hello"}));
//! assert_eq!(hello.to_a()?.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Backends
//!
//! | Backend | Crate             | Feature Flag | Notes                         |
//! |---------|-------------------|--------------|-------------------------------|
//! | Memory  | `trestle-memory`  | `memory`     | process-local, journals calls |
//!
//! SQL and RPC backends implement the same [`Backend`] trait in their own
//! crates; their wire code is outside this workspace.

pub use trestle_core::{
    Adapter, AdapterConfig, AdapterRegistry, Backend, CacheMiddleware, CacheMiddlewareFactory,
    CachePolicy, CachingFetcher, CallOptions, Dispatched, Fetcher, FieldValue, FindTarget, Found,
    Handler, IncludesTree, MiddlewareFactory, Mode, ModifierArg, Payload, Processor,
    ProcessorFactory, QuerySpec, RawFetcher, Record, Relation, Result, ScopeRegistry, Source,
    SourceBuilder, Store, TrestleError,
};

pub use trestle_core::{adapter, error, middleware, record, relation, source};

#[cfg(feature = "memory")]
pub use trestle_memory as memory;

/// Common imports for applications building on trestle.
pub mod prelude {
    pub use trestle_core::prelude::*;

    #[cfg(feature = "memory")]
    pub use trestle_memory::MemoryBackend;
}
