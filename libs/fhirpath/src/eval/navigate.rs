//! Field navigation over JSON-backed elements.
//!
//! Navigation is descriptor-driven when the element's FHIR type is known:
//! declared field types convert JSON primitives into typed System values
//! (dates become Dates, not strings), and polymorphic choice fields unwrap
//! their single active `fieldType`-suffixed property. Unknown types fall back
//! to raw JSON probing, which also serves the permissive legacy spellings
//! (`valueString`, snake_case).

use std::sync::Arc;

use helix_reflect::{choice_suffix, FieldDescriptor, Registry};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::temporal;
use crate::types::system_type_for_primitive_code;
use crate::value::{Collection, Value};

/// Datatype codes carried as System Quantity for operator purposes but kept
/// navigable as elements.
const QUANTITY_TYPES: &[&str] = &["Quantity", "SimpleQuantity", "Age", "Duration", "Count", "Distance", "MoneyQuantity"];

pub(crate) fn is_quantity_type(code: &str) -> bool {
    QUANTITY_TYPES.contains(&code)
}

/// Navigate `field` on a single element value.
pub(crate) fn navigate(
    value: &Value,
    field: &str,
    registry: &'static Registry,
    permissive: bool,
) -> Result<Collection> {
    let Some(json) = value.as_json() else {
        // Navigating a System primitive yields nothing; the FHIR primitive
        // already unwrapped on the way here.
        return Ok(Collection::empty());
    };
    let JsonValue::Object(obj) = json.as_ref() else {
        return Ok(Collection::empty());
    };

    let ty = value
        .element_type()
        .or_else(|| value.resource_type())
        .map(str::to_owned);

    if let Some(type_name) = &ty {
        if let Some(descriptor) = registry.field(type_name, field) {
            return Ok(typed_field(obj, field, descriptor));
        }
        if registry.descriptor(type_name).is_some() && !permissive {
            return Err(Error::InvalidField(format!("{type_name}.{field}")));
        }
    }

    Ok(raw_field(obj, field, registry, permissive))
}

/// Navigation guided by a field descriptor.
fn typed_field(
    obj: &serde_json::Map<String, JsonValue>,
    field: &str,
    descriptor: &'static FieldDescriptor,
) -> Collection {
    if descriptor.is_choice() {
        for alt in descriptor.choice {
            let key = format!("{field}{}", choice_suffix(alt));
            if let Some(node) = obj.get(&key) {
                return convert(node, Some(alt));
            }
            let companion = format!("_{key}");
            if let Some(node) = obj.get(&companion) {
                return convert(node, None);
            }
        }
        return Collection::empty();
    }

    match obj.get(field) {
        Some(node) => {
            let mut out = convert(node, Some(descriptor.ty));
            // A primitive array may carry nulls whose data lives in the
            // `_field` companion; merge positionally.
            if let (JsonValue::Array(values), Some(JsonValue::Array(companions))) =
                (node, obj.get(&format!("_{field}")))
            {
                if out.len() < values.len() {
                    out = merge_primitive_arrays(values, companions, descriptor.ty);
                }
            }
            out
        }
        None => match obj.get(&format!("_{field}")) {
            // Value absent, extensions present: yield the companion element.
            Some(node) => convert(node, None),
            None => Collection::empty(),
        },
    }
}

fn merge_primitive_arrays(
    values: &[JsonValue],
    companions: &[JsonValue],
    type_code: &str,
) -> Collection {
    let mut out = Collection::empty();
    for (idx, node) in values.iter().enumerate() {
        if node.is_null() {
            if let Some(companion) = companions.get(idx) {
                out.extend(&convert(companion, None));
            }
        } else {
            out.extend(&convert(node, Some(type_code)));
        }
    }
    out
}

/// Raw probing for untyped elements and permissive-mode fallbacks.
fn raw_field(
    obj: &serde_json::Map<String, JsonValue>,
    field: &str,
    registry: &'static Registry,
    permissive: bool,
) -> Collection {
    // Exact key; a typed choice spelling (`valueString`) converts by its
    // suffix type.
    if let Some(node) = obj.get(field) {
        let type_code = split_choice_key(field, registry);
        return convert(node, type_code.as_deref());
    }

    // Choice probe by base name: `value` finds `valueQuantity`.
    for (key, node) in obj {
        if key.len() > field.len() && key.starts_with(field) {
            if let Some(rest) = key.get(field.len()..) {
                if rest.starts_with(|c: char| c.is_ascii_uppercase()) {
                    if let Some(code) = suffix_type_code(rest, registry) {
                        return convert(node, Some(&code));
                    }
                }
            }
        }
    }

    if let Some(node) = obj.get(&format!("_{field}")) {
        return convert(node, None);
    }

    // Legacy snake_case spelling, permissive mode only.
    if permissive && field.contains('_') {
        let camel = snake_to_camel(field);
        if camel != field {
            if let Some(node) = obj.get(&camel) {
                return convert(node, None);
            }
        }
    }

    Collection::empty()
}

/// If `key` is `base` + capitalized type suffix, the suffix's type code.
fn split_choice_key(key: &str, registry: &'static Registry) -> Option<String> {
    for (idx, c) in key.char_indices().skip(1) {
        if c.is_ascii_uppercase() {
            if let Some(code) = suffix_type_code(&key[idx..], registry) {
                return Some(code);
            }
        }
    }
    None
}

/// Map a capitalized choice suffix (`Boolean`, `Quantity`, `DateTime`) to
/// the type code it stands for.
fn suffix_type_code(suffix: &str, registry: &'static Registry) -> Option<String> {
    // Complex datatype suffixes keep their spelling.
    if registry.descriptor(suffix).is_some() || registry.is_resource_type(suffix) {
        return Some(suffix.to_string());
    }
    // Primitive suffixes lowercase their first character.
    let mut chars = suffix.chars();
    let first = chars.next()?;
    let code: String = first.to_lowercase().chain(chars).collect();
    if system_type_for_primitive_code(&code).is_some() {
        Some(code)
    } else {
        None
    }
}

fn snake_to_camel(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut upper_next = false;
    for c in s.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Convert a JSON node into values, guided by a declared type code when one
/// is known. Arrays flatten element-wise.
pub(crate) fn convert(node: &JsonValue, type_code: Option<&str>) -> Collection {
    match node {
        JsonValue::Array(items) => {
            let mut out = Collection::empty();
            for item in items {
                out.extend(&convert(item, type_code));
            }
            out
        }
        JsonValue::Null => Collection::empty(),
        _ => match convert_single(node, type_code) {
            Some(v) => Collection::singleton(v),
            None => Collection::empty(),
        },
    }
}

fn convert_single(node: &JsonValue, type_code: Option<&str>) -> Option<Value> {
    let Some(code) = type_code else {
        return Value::from_json(node);
    };

    if let Some(system) = system_type_for_primitive_code(code) {
        return convert_primitive(node, system);
    }

    match node {
        JsonValue::Object(_) => {
            // `Resource`-typed slots (Bundle.entry.resource, contained)
            // carry their concrete type in the payload.
            let ty: Arc<str> = match node.get("resourceType").and_then(|v| v.as_str()) {
                Some(rt) if matches!(code, "Resource" | "DomainResource") => Arc::from(rt),
                _ => Arc::from(code),
            };
            Some(Value::element(Arc::new(node.clone()), Some(ty)))
        }
        // Declared complex but JSON disagrees: take the JSON at face value.
        _ => Value::from_json(node),
    }
}

fn convert_primitive(node: &JsonValue, system: &str) -> Option<Value> {
    match system {
        "Boolean" => node.as_bool().map(Value::boolean).or_else(|| Value::from_json(node)),
        "Integer" => match node.as_i64().and_then(|i| i32::try_from(i).ok()) {
            Some(i) => Some(Value::integer(i)),
            None => Value::from_json(node),
        },
        "Decimal" => match node {
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Value::decimal(rust_decimal::Decimal::from(i)))
                } else {
                    n.as_f64()
                        .and_then(rust_decimal::Decimal::from_f64_retain)
                        .map(Value::decimal)
                }
            }
            JsonValue::String(s) => s.parse().ok().map(Value::decimal),
            _ => Value::from_json(node),
        },
        "Date" => match node.as_str() {
            Some(s) => match temporal::parse_date(s) {
                Some((d, p)) => Some(Value::date(d, p)),
                None => Some(Value::string(s)),
            },
            None => Value::from_json(node),
        },
        "DateTime" => match node.as_str() {
            Some(s) => match temporal::parse_datetime(s) {
                Some((dt, p, tz)) => Some(Value::datetime(dt, p, tz)),
                None => Some(Value::string(s)),
            },
            None => Value::from_json(node),
        },
        "Time" => match node.as_str() {
            Some(s) => match temporal::parse_time(s) {
                Some((t, p)) => Some(Value::time(t, p)),
                None => Some(Value::string(s)),
            },
            None => Value::from_json(node),
        },
        // All the stringy primitive codes.
        _ => node.as_str().map(Value::string).or_else(|| Value::from_json(node)),
    }
}

/// Coerce an element with Quantity shape into a System Quantity for
/// operator purposes. Returns `None` when the value is not quantity-like.
pub(crate) fn element_as_quantity(value: &Value) -> Option<Value> {
    let json = value.as_json()?;
    let is_quantity = value
        .element_type()
        .map(is_quantity_type)
        .unwrap_or_else(|| {
            json.get("value").is_some()
                && (json.get("code").is_some() || json.get("unit").is_some())
        });
    if !is_quantity {
        return None;
    }
    let amount = match json.get("value")? {
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                rust_decimal::Decimal::from(i)
            } else {
                rust_decimal::Decimal::from_f64_retain(n.as_f64()?)?
            }
        }
        JsonValue::String(s) => s.parse().ok()?,
        _ => return None,
    };
    let unit = json
        .get("code")
        .and_then(|v| v.as_str())
        .or_else(|| json.get("unit").and_then(|v| v.as_str()))
        .unwrap_or("");
    Some(Value::quantity(amount, unit))
}
