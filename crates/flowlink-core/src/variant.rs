// ── Variant codec ──
//
// Bridges client-native `serde_json::Value` state into the tagged wire
// `Variant` and back. Object keys are converted between the client and
// server naming conventions unless suppressed — attribute values are not
// schema-namespaced and keep their keys verbatim.

use serde_json::{Map, Value};

use flowlink_api::wire::{Variant, VariantList, VariantMap};

use crate::path::{to_client_name, to_server_name};

/// Encode a native value into a wire `Variant`.
///
/// An empty array still produces a *present* (empty) list branch, so the
/// wire form unambiguously says "sequence field, no elements". Mapping
/// keys are converted client→server unless `convert_keys` is false.
pub fn encode(value: &Value, convert_keys: bool) -> Variant {
    match value {
        Value::Null => Variant::empty(),
        Value::Bool(b) => Variant::from(*b),
        Value::Number(n) => encode_number(n),
        Value::String(s) => Variant::from(s.as_str()),
        Value::Array(items) => {
            // Present-but-empty list branch even for zero elements.
            let items = items.iter().map(|v| encode(v, convert_keys)).collect();
            Variant {
                list_value: Some(VariantList { items }),
                ..Variant::default()
            }
        }
        Value::Object(map) => {
            let entries = map
                .iter()
                .map(|(k, v)| {
                    let key = if convert_keys { to_server_name(k) } else { k.clone() };
                    (key, encode(v, convert_keys))
                })
                .collect();
            Variant {
                map_value: Some(VariantMap { entries }),
                ..Variant::default()
            }
        }
    }
}

fn encode_number(n: &serde_json::Number) -> Variant {
    // Integers and floats are distinct wire branches; no coercion.
    if let Some(i) = n.as_i64() {
        return Variant::from(i);
    }
    if let Some(u) = n.as_u64() {
        // u64 beyond i64 range has no integer branch; fall through to double.
        if let Ok(i) = i64::try_from(u) {
            return Variant::from(i);
        }
    }
    Variant::from(n.as_f64().unwrap_or(f64::NAN))
}

/// Decode a wire `Variant` back into a native value.
///
/// A `Variant` with no populated branch decodes to `Value::Null` — absence
/// is a valid terminal case in recursive descent, not an error. Mapping
/// keys are converted server→client unless `convert_keys` is false.
pub fn decode(variant: &Variant, convert_keys: bool) -> Value {
    if let Some(b) = variant.bool_value {
        return Value::Bool(b);
    }
    if let Some(i) = variant.int_value {
        return Value::from(i);
    }
    if let Some(d) = variant.double_value {
        return Value::from(d);
    }
    if let Some(ref s) = variant.string_value {
        return Value::String(s.clone());
    }
    if let Some(ref list) = variant.list_value {
        return Value::Array(list.items.iter().map(|v| decode(v, convert_keys)).collect());
    }
    if let Some(ref map) = variant.map_value {
        let entries: Map<String, Value> = map
            .entries
            .iter()
            .map(|(k, v)| {
                let key = if convert_keys { to_client_name(k) } else { k.clone() };
                (key, decode(v, convert_keys))
            })
            .collect();
        return Value::Object(entries);
    }
    Value::Null
}

// ── Tests ────────────────────────────────────────────────────────────
