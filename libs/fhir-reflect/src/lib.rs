//! R4 descriptor registry for FHIRPath evaluation.
//!
//! The engine consumes a closed descriptor set bound at build time: for each
//! named type the set of (field name, field type, cardinality) tuples, the
//! polymorphic-choice alternatives, and the base-type chain up to
//! `Element` / `Resource`. Nothing is loaded at runtime.

mod descriptor;
mod registry;

pub use descriptor::{Cardinality, FieldDescriptor, TypeDescriptor};
pub use registry::{Registry, RESOURCE_TYPES};

/// Upper-case the first character of a type code, producing the suffix used
/// by JSON choice-field property names (`value` + `Boolean` = `valueBoolean`).
pub fn choice_suffix(type_code: &str) -> String {
    let mut chars = type_code.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The R4 primitive type codes.
pub const PRIMITIVE_CODES: &[&str] = &[
    "base64Binary", "boolean", "canonical", "code", "date", "dateTime", "decimal", "id",
    "instant", "integer", "markdown", "oid", "positiveInt", "string", "time", "unsignedInt",
    "uri", "url", "uuid", "xhtml",
];

/// True if the type code names a FHIR primitive.
pub fn is_primitive_code(type_code: &str) -> bool {
    PRIMITIVE_CODES.contains(&type_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choice_suffix_capitalizes() {
        assert_eq!(choice_suffix("boolean"), "Boolean");
        assert_eq!(choice_suffix("dateTime"), "DateTime");
        assert_eq!(choice_suffix("Quantity"), "Quantity");
    }

    #[test]
    fn primitive_code_membership() {
        assert!(is_primitive_code("boolean"));
        assert!(is_primitive_code("dateTime"));
        assert!(!is_primitive_code("Quantity"));
        assert!(!is_primitive_code("CodeableConcept"));
        // Not everything lowercase is a primitive.
        assert!(!is_primitive_code("patient"));
    }
}
