//! Tree navigation: `children()` and `descendants()`.

use helix_reflect::Registry;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::eval::navigate::convert;
use crate::value::{Collection, Value};

const MAX_DESCENDANT_DEPTH: usize = 128;

/// Immediate children of each element, in field order, flattened.
pub fn children(input: &Collection, registry: &'static Registry) -> Result<Collection> {
    let mut out = Collection::empty();
    for item in input.iter() {
        collect_children(item, registry, &mut out);
    }
    Ok(out)
}

fn collect_children(value: &Value, registry: &'static Registry, out: &mut Collection) {
    let Some(json) = value.as_json() else {
        return;
    };
    let JsonValue::Object(obj) = json.as_ref() else {
        return;
    };
    let ty = value.element_type().or_else(|| value.resource_type());

    for (key, node) in obj {
        if key == "resourceType" {
            continue;
        }
        // `_field` companions are part of the field they accompany; only
        // surface a companion when it stands alone.
        if let Some(base) = key.strip_prefix('_') {
            if obj.contains_key(base) {
                continue;
            }
        }
        let type_code = ty
            .and_then(|t| registry.field(t, key))
            .filter(|f| !f.is_choice())
            .map(|f| f.ty);
        out.extend(&convert(node, type_code));
    }
}

/// Transitive closure of `children()`, excluding the roots themselves.
/// Pathologically deep trees stop with an error at the depth bound.
pub fn descendants(input: &Collection, registry: &'static Registry) -> Result<Collection> {
    let mut out = Collection::empty();
    let mut frontier = input.clone();
    let mut depth = 0;
    while !frontier.is_empty() {
        depth += 1;
        if depth > MAX_DESCENDANT_DEPTH {
            return Err(Error::UnsupportedOperation(format!(
                "descendants() exceeded the depth bound of {MAX_DESCENDANT_DEPTH}"
            )));
        }
        let next = children(&frontier, registry)?;
        out.extend(&next);
        frontier = next;
    }
    Ok(out)
}
