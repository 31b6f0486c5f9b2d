//! Descriptor shapes: one `TypeDescriptor` per named FHIR type, one
//! `FieldDescriptor` per element.

/// How many values a field may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// At most one value (`0..1` or `1..1`).
    Singular,
    /// A list (`0..*` or `1..*`).
    Multiple,
}

/// A single field of a FHIR type.
///
/// For ordinary fields `ty` names the field's type (a primitive code such as
/// `"string"` or a complex name such as `"HumanName"`) and `choice` is empty.
/// For polymorphic choice fields `choice` lists the alternative type codes and
/// `ty` is unused; the JSON property name is the base name followed by the
/// capitalized alternative code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub ty: &'static str,
    pub cardinality: Cardinality,
    pub choice: &'static [&'static str],
}

impl FieldDescriptor {
    pub const fn is_choice(&self) -> bool {
        !self.choice.is_empty()
    }
}

/// A named FHIR type: its fields and its base type.
///
/// Backbone elements are registered under dotted names (`"Bundle.Entry"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub name: &'static str,
    pub base: Option<&'static str>,
    pub fields: &'static [FieldDescriptor],
}

impl TypeDescriptor {
    /// Look up a field declared directly on this type (base chain excluded).
    pub fn own_field(&self, name: &str) -> Option<&'static FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

pub(crate) const fn field(
    name: &'static str,
    ty: &'static str,
    cardinality: Cardinality,
) -> FieldDescriptor {
    FieldDescriptor {
        name,
        ty,
        cardinality,
        choice: &[],
    }
}

pub(crate) const fn choice(
    name: &'static str,
    alternatives: &'static [&'static str],
    cardinality: Cardinality,
) -> FieldDescriptor {
    FieldDescriptor {
        name,
        ty: "",
        cardinality,
        choice: alternatives,
    }
}
