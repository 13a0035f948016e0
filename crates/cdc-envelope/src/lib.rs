#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! Serializes a source document plus a fixed metadata envelope into the
//! JSON payload placed on the wire (spec §4.7): a "relaxed" BSON-to-JSON
//! mapping, with `_operation`, `_source`, and `_timestamp` appended last
//! so metadata always wins on key collision.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bson::{Bson, Document};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Where an envelope's document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Emitted during the bulk snapshot phase.
    InitialLoad,
    /// Emitted while tailing the change stream.
    ChangeStream,
}

impl Source {
    fn as_str(self) -> &'static str {
        match self {
            Source::InitialLoad => "initial_load",
            Source::ChangeStream => "change_stream",
        }
    }
}

/// Builds the egress envelope for `doc`: the relaxed JSON form of the
/// document with `_operation`, `_source`, and `_timestamp` added (or
/// overwritten, if the source document already used those names).
pub fn build_envelope(doc: &Document, operation: &str, source: Source) -> Value {
    let mut object = match to_relaxed_json(doc) {
        Value::Object(map) => map,
        other => {
            // A BSON document always maps to a JSON object; this branch only
            // exists to keep the function total.
            let mut map = Map::new();
            let _ = map.insert("_value".to_string(), other);
            map
        }
    };

    let _ = object.insert("_operation".to_string(), Value::String(operation.to_string()));
    let _ = object.insert("_source".to_string(), Value::String(source.as_str().to_string()));
    let _ = object.insert(
        "_timestamp".to_string(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );

    Value::Object(object)
}

/// Derives the egress partition key for `doc`: the stringified `vuid`
/// field when present, else the stringified `_id`, else the literal
/// string `"null"` when neither is resolvable (spec §4.4, §6).
pub fn derive_key(doc: &Document) -> String {
    doc.get("vuid")
        .or_else(|| doc.get("_id"))
        .map(stringify_key)
        .unwrap_or_else(|| "null".to_string())
}

fn stringify_key(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::Int32(i) => i.to_string(),
        Bson::Int64(i) => i.to_string(),
        Bson::Double(d) => d.to_string(),
        Bson::Boolean(b) => b.to_string(),
        other => bson_to_relaxed_json(other).to_string(),
    }
}

/// Converts a BSON document into its relaxed extended-JSON representation:
/// binary identifiers, timestamps, and decimal types render as
/// human-readable strings/numbers rather than the canonical `$oid`/`$date`
/// wrapper objects.
pub fn to_relaxed_json(doc: &Document) -> Value {
    let mut map = Map::with_capacity(doc.len());
    for (key, value) in doc.iter() {
        let _ = map.insert(key.clone(), bson_to_relaxed_json(value));
    }
    Value::Object(map)
}

fn bson_to_relaxed_json(value: &Bson) -> Value {
    match value {
        Bson::Double(d) => serde_json::Number::from_f64(*d).map(Value::Number).unwrap_or(Value::Null),
        Bson::String(s) => Value::String(s.clone()),
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_relaxed_json).collect()),
        Bson::Document(inner) => to_relaxed_json(inner),
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Null => Value::Null,
        Bson::RegularExpression(regex) => Value::String(regex.pattern.clone()),
        Bson::JavaScriptCode(code) => Value::String(code.clone()),
        Bson::JavaScriptCodeWithScope(code) => Value::String(code.code.clone()),
        Bson::Int32(i) => Value::from(*i),
        Bson::Int64(i) => Value::from(*i),
        Bson::Timestamp(ts) => Value::from(ts.time),
        Bson::Binary(bin) => Value::String(BASE64.encode(&bin.bytes)),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => Value::String(dt.try_to_rfc3339_string().unwrap_or_else(|_| dt.to_string())),
        Bson::Symbol(s) => Value::String(s.clone()),
        Bson::Decimal128(d) => Value::String(d.to_string()),
        Bson::Undefined => Value::Null,
        Bson::MaxKey => Value::String("MaxKey".to_string()),
        Bson::MinKey => Value::String("MinKey".to_string()),
        Bson::DbPointer(_) => Value::Null,
    }
}
