//! Reference stringification for `resolve()`.
//!
//! The evaluator stringifies each input element before calling the resolver:
//! plain strings (covering the FHIR string/uri/url/canonical primitives,
//! which all unwrap to System String) pass through, Reference elements use
//! their literal `reference` URI. Anything else cannot name a target and is
//! silently dropped.

use crate::value::{Value, ValueData};

/// The reference string an input value contributes, if any.
pub fn stringify_resolve_input(value: &Value) -> Option<String> {
    match value.data() {
        ValueData::String(s) => {
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        }
        ValueData::Element { json, .. } => {
            let uri = json.get("reference").and_then(|v| v.as_str())?;
            if uri.is_empty() {
                None
            } else {
                Some(uri.to_string())
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings_pass_through() {
        assert_eq!(
            stringify_resolve_input(&Value::string("Patient/123")),
            Some("Patient/123".to_string())
        );
        assert_eq!(stringify_resolve_input(&Value::string("")), None);
    }

    #[test]
    fn reference_elements_use_literal_uri() {
        let r = Value::from_json(&json!({"reference": "Patient/123", "display": "Ann"})).unwrap();
        assert_eq!(
            stringify_resolve_input(&r),
            Some("Patient/123".to_string())
        );
    }

    #[test]
    fn reference_without_uri_is_dropped() {
        // Only a `type` is set: nothing to resolve, no error.
        let r = Value::from_json(&json!({"type": "Location"})).unwrap();
        assert_eq!(stringify_resolve_input(&r), None);
    }

    #[test]
    fn non_reference_values_are_dropped() {
        assert_eq!(stringify_resolve_input(&Value::integer(5)), None);
        assert_eq!(stringify_resolve_input(&Value::boolean(true)), None);
    }
}
