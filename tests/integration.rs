//! End-to-end tests driving the public facade: relations against the
//! in-memory backend, with and without the caching pipeline.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use trestle::memory::MemoryBackend;
use trestle::prelude::*;

fn row(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected a JSON object"),
    }
}

fn seeded_backend() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.insert(
        "people",
        [
            row(json!({"id": 1, "name": "Ada", "age": 30})),
            row(json!({"id": 2, "name": "Brendan", "age": 40})),
            row(json!({"id": 3, "name": "Cleo", "age": 50})),
        ],
    );
    backend
}

fn people(backend: Arc<MemoryBackend>, config: AdapterConfig) -> Arc<Source> {
    Source::build("people")
        .attributes(["id", "name", "age"])
        .adapter(Adapter::new(backend, config))
        .finish()
        .expect("source builds")
}

#[test]
fn chained_query_filters_orders_and_projects() {
    let source = people(seeded_backend(), AdapterConfig::new());

    let records = source
        .relation()
        .r#where(json!({"age": [30, 40, 50]}))
        .order("age desc")
        .limit(2u64)
        .select("name")
        .to_a()
        .unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].attributes, row(json!({"name": "Cleo"})));
    assert_eq!(records[1].attributes, row(json!({"name": "Brendan"})));
}

#[test]
fn find_resolves_ids_and_surfaces_missing_ones() {
    let source = people(seeded_backend(), AdapterConfig::new());
    let relation = source.relation();

    match relation.find(2i64).unwrap() {
        Found::One(Some(record)) => assert_eq!(record.get("name"), Some(&json!("Brendan"))),
        other => panic!("expected one record, got {other:?}"),
    }

    match relation.find(vec![1i64, 3]).unwrap() {
        Found::Many(records) => assert_eq!(records.len(), 2),
        other => panic!("expected two records, got {other:?}"),
    }

    assert!(matches!(
        relation.find(99i64),
        Err(TrestleError::RecordNotFound(_))
    ));
}

#[test]
fn dynamic_finders_execute_against_the_backend() {
    let source = people(seeded_backend(), AdapterConfig::new());

    match source
        .relation()
        .call("find_by_name", &[json!("Ada")])
        .unwrap()
    {
        trestle::Dispatched::Record(Some(record)) => {
            assert_eq!(record.get("id"), Some(&json!(1)));
        }
        other => panic!("expected a record, got {other:?}"),
    }
}

#[test]
fn writes_upsert_by_primary_key_and_deletes_count_rows() {
    let backend = seeded_backend();
    let source = people(backend.clone(), AdapterConfig::new());
    let adapter = source.adapter();
    let relation = source.relation();

    let options = CallOptions::for_relation(Mode::Write, relation.clone())
        .with("object", json!({"id": 9, "name": "Zed", "age": 21}));
    adapter.call(Mode::Write, options).unwrap();
    assert_eq!(backend.rows("people").len(), 4);

    let options = CallOptions::for_relation(Mode::Write, relation.clone())
        .with("object", json!({"id": 9, "name": "Zedd", "age": 22}));
    adapter.call(Mode::Write, options).unwrap();
    let rows = backend.rows("people");
    assert_eq!(rows.len(), 4, "same id updates in place");
    assert!(rows.iter().any(|r| r.get("name") == Some(&json!("Zedd"))));

    let target = relation.r#where(json!({"id": 9}));
    let deleted = adapter
        .call(Mode::Delete, CallOptions::for_relation(Mode::Delete, target))
        .unwrap();
    assert_eq!(deleted, Payload::Count(1));
    assert_eq!(backend.rows("people").len(), 3);
}

#[test]
fn cached_pipeline_deduplicates_reads_end_to_end() {
    let backend = seeded_backend();
    let config =
        AdapterConfig::new().with_middleware(Arc::new(CacheMiddlewareFactory), Map::new());
    let source = people(backend.clone(), config);

    source.relation().to_a().unwrap();
    source.relation().to_a().unwrap();
    assert_eq!(backend.call_count(), 1);

    source.relation().fresh().to_a().unwrap();
    assert_eq!(backend.call_count(), 2);

    // A no-op call returns the neutral result without reaching the backend.
    let noop = source.relation().noop();
    assert_eq!(noop.to_a().unwrap(), vec![]);
    assert_eq!(backend.call_count(), 2);
}

#[test]
fn raw_sql_relations_are_refused_by_the_memory_backend() {
    let source = people(seeded_backend(), AdapterConfig::new());

    assert!(matches!(
        source.relation().sql("select * from people").to_a(),
        Err(TrestleError::Unsupported { .. })
    ));
}

#[test]
fn adapters_are_creatable_through_a_registry() {
    let backend = seeded_backend();
    let registry = AdapterRegistry::new();
    {
        let backend = backend.clone();
        registry.register("memory", move |_config| {
            let backend: Arc<dyn Backend> = backend.clone();
            Ok(backend)
        });
    }

    let adapter = registry.create("memory", AdapterConfig::new()).unwrap();
    assert_eq!(adapter.kind(), "memory");

    let source = Source::build("people")
        .attributes(["id", "name", "age"])
        .adapter(adapter)
        .finish()
        .unwrap();
    assert_eq!(source.relation().to_a().unwrap().len(), 3);
}
