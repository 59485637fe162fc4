//! Pipeline middlewares shipped with the core.

pub mod cache;
