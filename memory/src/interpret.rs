//! Interpretation of a canonical query hash against in-memory rows.

use std::cmp::Ordering;

use serde_json::{Map, Value};
use trestle_core::Record;

/// Applies where/order/offset/limit/select from the canonical hash.
pub(crate) fn run(hash: &Map<String, Value>, rows: Vec<Map<String, Value>>) -> Vec<Record> {
    let mut rows: Vec<Map<String, Value>> = rows
        .into_iter()
        .filter(|row| matches(hash, row))
        .collect();

    if let Some(Value::Array(orderings)) = hash.get("order") {
        // Stable sort by each key from last to first yields a multi-key sort.
        for ordering in orderings.iter().rev() {
            let Some((attr, descending)) = parse_ordering(ordering) else {
                continue;
            };
            rows.sort_by(|a, b| {
                let ord = cmp_values(a.get(attr), b.get(attr));
                if descending { ord.reverse() } else { ord }
            });
        }
    }

    let offset = hash.get("offset").and_then(as_count).unwrap_or(0);
    let limit = hash.get("limit").and_then(as_count).unwrap_or(usize::MAX);
    let selected: Vec<Map<String, Value>> =
        rows.into_iter().skip(offset).take(limit).collect();

    let projection: Option<Vec<&str>> = match hash.get("select") {
        Some(Value::Array(names)) => Some(names.iter().filter_map(Value::as_str).collect()),
        _ => None,
    };

    selected
        .into_iter()
        .map(|row| match &projection {
            Some(names) => Record::new(
                row.into_iter()
                    .filter(|(name, _)| names.contains(&name.as_str()))
                    .collect(),
            ),
            None => Record::new(row),
        })
        .collect()
}

/// A row passes when every where entry passes. Map entries are equality
/// conditions over their pairs; anything else is an opaque predicate the
/// backend cannot evaluate, and matches nothing.
pub(crate) fn matches(hash: &Map<String, Value>, row: &Map<String, Value>) -> bool {
    let Some(Value::Array(conditions)) = hash.get("where") else {
        return true;
    };
    conditions.iter().all(|condition| match condition {
        Value::Object(pairs) => pairs.iter().all(|(attr, expected)| {
            let actual = row.get(attr).unwrap_or(&Value::Null);
            match expected {
                Value::Array(choices) => choices.contains(actual),
                other => actual == other,
            }
        }),
        _ => false,
    })
}

fn parse_ordering(value: &Value) -> Option<(&str, bool)> {
    let text = value.as_str()?.trim();
    match text.rsplit_once(char::is_whitespace) {
        Some((attr, direction)) if direction.eq_ignore_ascii_case("desc") => {
            Some((attr.trim(), true))
        }
        Some((attr, direction)) if direction.eq_ignore_ascii_case("asc") => {
            Some((attr.trim(), false))
        }
        _ => Some((text, false)),
    }
}

fn as_count(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn cmp_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = |v: Option<&Value>| match v {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(_) => 4,
    };
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
