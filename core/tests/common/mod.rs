//! Shared fixtures: a canned-data backend that journals every call, and
//! helpers for building sources against it.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};
use trestle_core::{
    Adapter, AdapterConfig, Backend, CallOptions, Mode, Payload, Record, Result, Source,
};

/// Returns canned rows on read and journals every call it serves.
#[derive(Default)]
pub struct TestBackend {
    data: Mutex<Vec<Map<String, Value>>>,
    calls: Mutex<Vec<(Mode, Map<String, Value>)>>,
}

impl TestBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_data(rows: impl IntoIterator<Item = Map<String, Value>>) -> Arc<Self> {
        let backend = Self::new();
        backend.set_data(rows);
        backend
    }

    pub fn set_data(&self, rows: impl IntoIterator<Item = Map<String, Value>>) {
        *self.data.lock().unwrap_or_else(PoisonError::into_inner) = rows.into_iter().collect();
    }

    pub fn calls(&self) -> Vec<(Mode, Map<String, Value>)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn last_call(&self) -> Option<(Mode, Map<String, Value>)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub fn reset(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn journal(&self, mode: Mode, options: &CallOptions) {
        let detail = options
            .relation
            .as_ref()
            .map(|relation| relation.to_hash())
            .unwrap_or_default();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((mode, detail));
    }
}

impl Backend for TestBackend {
    fn kind(&self) -> &'static str {
        "test"
    }

    fn read(&self, options: &CallOptions) -> Result<Vec<Record>> {
        self.journal(Mode::Read, options);
        Ok(self
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .map(Record::new)
            .collect())
    }

    fn write(&self, options: &CallOptions) -> Result<Payload> {
        self.journal(Mode::Write, options);
        Ok(Payload::Count(1))
    }

    fn delete(&self, options: &CallOptions) -> Result<Payload> {
        self.journal(Mode::Delete, options);
        Ok(Payload::Count(1))
    }
}

pub fn row(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected a JSON object"),
    }
}

pub fn source_with(backend: Arc<TestBackend>, config: AdapterConfig) -> Arc<Source> {
    Source::build("sites")
        .attributes(["id", "name", "age"])
        .adapter(Adapter::new(backend, config))
        .finish()
        .expect("source builds")
}

pub fn source(backend: Arc<TestBackend>) -> Arc<Source> {
    source_with(backend, AdapterConfig::new())
}
