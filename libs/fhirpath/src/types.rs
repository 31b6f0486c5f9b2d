//! Type specifiers and the `is`/`as`/`ofType` checks.
//!
//! Type names live in two namespaces: `System` (the FHIRPath primitives) and
//! `FHIR` (resources, datatypes, and primitive codes). Unqualified names
//! resolve against FHIR first; a name present in both namespaces resolves to
//! FHIR. Names are case-sensitive.

use helix_reflect::Registry;

use crate::ast::TypeSpecifierName;
use crate::error::{Error, Result};
use crate::value::Value;

/// Namespace of a resolved type specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeNamespace {
    System,
    Fhir,
}

/// A type specifier resolved against the two namespaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedType {
    pub namespace: TypeNamespace,
    pub name: String,
}

const SYSTEM_TYPES: &[&str] = &[
    "Boolean", "Integer", "Decimal", "String", "Date", "DateTime", "Time", "Quantity",
];

/// The System type a FHIR primitive code unwraps to, if any.
pub fn system_type_for_primitive_code(code: &str) -> Option<&'static str> {
    match code {
        "boolean" => Some("Boolean"),
        "integer" | "positiveInt" | "unsignedInt" => Some("Integer"),
        "decimal" => Some("Decimal"),
        "string" | "uri" | "url" | "canonical" | "code" | "id" | "oid" | "uuid" | "markdown"
        | "base64Binary" | "xhtml" => Some("String"),
        "date" => Some("Date"),
        "dateTime" | "instant" => Some("DateTime"),
        "time" => Some("Time"),
        _ => None,
    }
}

/// Resolve a parsed specifier to a namespace + name, or fail with
/// `WrongType` when the name exists in neither namespace.
pub fn resolve_specifier(
    spec: &TypeSpecifierName,
    registry: &Registry,
) -> Result<ResolvedType> {
    match spec.qualifier.as_deref() {
        Some("System") => {
            if SYSTEM_TYPES.contains(&spec.name.as_str()) {
                Ok(ResolvedType {
                    namespace: TypeNamespace::System,
                    name: spec.name.clone(),
                })
            } else {
                Err(Error::WrongType(format!(
                    "unknown System type '{}'",
                    spec.name
                )))
            }
        }
        Some("FHIR") => {
            if registry.is_fhir_type(&spec.name) {
                Ok(ResolvedType {
                    namespace: TypeNamespace::Fhir,
                    name: spec.name.clone(),
                })
            } else {
                Err(Error::WrongType(format!(
                    "unknown FHIR type '{}'",
                    spec.name
                )))
            }
        }
        Some(other) => Err(Error::WrongType(format!(
            "unknown type namespace '{other}'"
        ))),
        None => {
            // FHIR wins namespace conflicts (e.g. `Quantity`).
            if registry.is_fhir_type(&spec.name) {
                Ok(ResolvedType {
                    namespace: TypeNamespace::Fhir,
                    name: spec.name.clone(),
                })
            } else if SYSTEM_TYPES.contains(&spec.name.as_str()) {
                Ok(ResolvedType {
                    namespace: TypeNamespace::System,
                    name: spec.name.clone(),
                })
            } else {
                Err(Error::WrongType(format!(
                    "unknown type '{}'",
                    spec.name
                )))
            }
        }
    }
}

/// Does `value` satisfy the resolved type?
pub fn value_is_type(value: &Value, ty: &ResolvedType, registry: &Registry) -> bool {
    match ty.namespace {
        TypeNamespace::System => value.system_type_name() == Some(ty.name.as_str()),
        TypeNamespace::Fhir => {
            // FHIR primitive codes check against the System type the value
            // unwrapped to (`Patient.deceased is boolean`).
            if let Some(system) = system_type_for_primitive_code(&ty.name) {
                return value.system_type_name() == Some(system);
            }
            // The FHIR Quantity datatype is carried as a System Quantity.
            if ty.name == "Quantity" && value.system_type_name() == Some("Quantity") {
                return true;
            }
            match value.element_type().or_else(|| value.resource_type()) {
                Some(actual) => registry.is_subtype_of(actual, &ty.name),
                None => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> &'static Registry {
        Registry::global()
    }

    #[test]
    fn unqualified_conflict_prefers_fhir() {
        let spec = TypeSpecifierName::unqualified("Quantity");
        let resolved = resolve_specifier(&spec, registry()).unwrap();
        assert_eq!(resolved.namespace, TypeNamespace::Fhir);
    }

    #[test]
    fn qualified_resolution() {
        let spec = TypeSpecifierName::qualified("System", "Boolean");
        let resolved = resolve_specifier(&spec, registry()).unwrap();
        assert_eq!(resolved.namespace, TypeNamespace::System);

        let spec = TypeSpecifierName::qualified("FHIR", "Patient");
        let resolved = resolve_specifier(&spec, registry()).unwrap();
        assert_eq!(resolved.namespace, TypeNamespace::Fhir);
    }

    #[test]
    fn unknown_type_errors() {
        let spec = TypeSpecifierName::unqualified("Frobnicator");
        assert!(resolve_specifier(&spec, registry()).is_err());
        // Type names are case-sensitive.
        let spec = TypeSpecifierName::unqualified("patient");
        assert!(resolve_specifier(&spec, registry()).is_err());
    }

    #[test]
    fn primitive_code_matches_unwrapped_value() {
        let spec = TypeSpecifierName::unqualified("boolean");
        let resolved = resolve_specifier(&spec, registry()).unwrap();
        assert!(value_is_type(&Value::boolean(true), &resolved, registry()));
        assert!(!value_is_type(&Value::integer(1), &resolved, registry()));
    }

    #[test]
    fn element_matches_base_chain() {
        let patient = Value::resource(Arc::new(json!({"resourceType": "Patient"})));
        for name in ["Patient", "DomainResource", "Resource"] {
            let spec = TypeSpecifierName::unqualified(name);
            let resolved = resolve_specifier(&spec, registry()).unwrap();
            assert!(value_is_type(&patient, &resolved, registry()), "{name}");
        }
        let spec = TypeSpecifierName::unqualified("Observation");
        let resolved = resolve_specifier(&spec, registry()).unwrap();
        assert!(!value_is_type(&patient, &resolved, registry()));
    }
}
