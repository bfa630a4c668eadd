//! Reserved-field payload envelope.
//!
//! Replicated documents are JSON objects. The structured data Platewise
//! cares about lives under a single reserved field, either embedded as an
//! object or stored as a JSON-encoded string:
//!
//! ```json
//! {"payload": "{\"personalDocId\":\"doc:meallogs-1\",\"groups\":[]}"}
//! {"payload": {"primaryDocId": "doc:dishes-1", "secondaryDocId": "doc:plans-1"}}
//! ```

use serde_json::{Map, Value};

use crate::doc_ref::DocRef;
use crate::resolution::ResolveError;

/// Name of the reserved field holding the payload.
pub const PAYLOAD_FIELD: &str = "payload";

/// Wrap a payload value into a document snapshot (string-encoded form).
pub fn encode_payload(payload: &Value) -> Vec<u8> {
    let mut doc = Map::new();
    doc.insert(PAYLOAD_FIELD.to_string(), Value::String(payload.to_string()));
    Value::Object(doc).to_string().into_bytes()
}

/// Extract the payload object from a snapshot.
pub(crate) fn read_payload(
    doc: &DocRef,
    bytes: &[u8],
) -> Result<Map<String, Value>, ResolveError> {
    let outer: Value = serde_json::from_slice(bytes)
        .map_err(|e| ResolveError::parse(doc, format!("not a JSON document: {}", e)))?;

    let field = outer
        .get(PAYLOAD_FIELD)
        .ok_or_else(|| ResolveError::parse(doc, format!("no `{}` field", PAYLOAD_FIELD)))?;

    let inner = match field {
        Value::String(encoded) => serde_json::from_str::<Value>(encoded)
            .map_err(|e| ResolveError::parse(doc, format!("payload is not JSON: {}", e)))?,
        other => other.clone(),
    };

    match inner {
        Value::Object(map) => Ok(map),
        _ => Err(ResolveError::parse(doc, "payload is not an object")),
    }
}

/// Read a required document reference from a payload object.
pub(crate) fn required_ref(
    doc: &DocRef,
    map: &Map<String, Value>,
    field: &str,
) -> Result<DocRef, ResolveError> {
    match map.get(field) {
        None | Some(Value::Null) => Err(ResolveError::incomplete(doc, field)),
        Some(Value::String(s)) => DocRef::new(s.as_str())
            .map_err(|e| ResolveError::parse(doc, format!("`{}`: {}", field, e))),
        Some(_) => Err(ResolveError::parse(
            doc,
            format!("`{}` must be a string", field),
        )),
    }
}
