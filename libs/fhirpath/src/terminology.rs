//! Terminology service interface for `memberOf()`.
//!
//! The engine only needs value-set membership: it sends a
//! `ValueSetValidateCode` request and reads the `result` output parameter of
//! the returned `Parameters` resource. Transport is the implementation's
//! concern (HTTP-backed clients live outside this crate; tests use stubs).

use crate::error::Result;
use crate::value::Value;

/// Request options for `ValueSet/$validate-code`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueSetValidateCodeOptions {
    /// The value set id (or URL, passed verbatim).
    pub id: String,
    /// The code system id, OID, or URI.
    pub system: String,
    /// The code to check.
    pub code: String,
    /// Optional effective date (`YYYY-MM-DD`).
    pub date: Option<String>,
    /// Optional value set revision to validate against.
    pub value_set_version: Option<String>,
}

/// A terminology service capable of value-set membership checks.
pub trait TerminologyService: Send + Sync {
    /// Returns a `Parameters` resource; the engine extracts the Boolean
    /// `result` parameter.
    fn value_set_validate_code(&self, options: &ValueSetValidateCodeOptions) -> Result<Value>;
}

/// Extract the Boolean `result` parameter from a `Parameters` resource.
pub fn extract_result(parameters: &Value) -> Option<bool> {
    let json = parameters.as_json()?;
    let params = json.get("parameter")?.as_array()?;
    for param in params {
        if param.get("name").and_then(|n| n.as_str()) == Some("result") {
            return param.get("valueBoolean").and_then(|b| b.as_bool());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_parameter_extraction() {
        let params = Value::from_json(&json!({
            "resourceType": "Parameters",
            "parameter": [
                {"name": "message", "valueString": "ok"},
                {"name": "result", "valueBoolean": true}
            ]
        }))
        .unwrap();
        assert_eq!(extract_result(&params), Some(true));

        let no_result = Value::from_json(&json!({
            "resourceType": "Parameters",
            "parameter": [{"name": "message", "valueString": "ok"}]
        }))
        .unwrap();
        assert_eq!(extract_result(&no_result), None);
    }
}
