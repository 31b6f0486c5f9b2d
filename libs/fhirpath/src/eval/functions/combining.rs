//! Collection combining functions: `combine()`, `union()`, `intersect()`,
//! `exclude()`.

use crate::error::Result;
use crate::eval::operations::{contains_value, union as union_op};
use crate::value::Collection;

/// Concatenation without dedup, argument order preserved.
pub fn combine(input: &Collection, other: &Collection) -> Result<Collection> {
    let mut out = input.clone();
    out.extend(other);
    Ok(out)
}

/// Concatenation with first-occurrence dedup (same as the `|` operator).
pub fn union(input: &Collection, other: &Collection) -> Result<Collection> {
    Ok(union_op(input, other))
}

/// Items of the input also present in the other collection, deduplicated,
/// input order.
pub fn intersect(input: &Collection, other: &Collection) -> Result<Collection> {
    let mut out = Collection::empty();
    for item in input.iter() {
        if contains_value(other, item) && !contains_value(&out, item) {
            out.push(item.clone());
        }
    }
    Ok(out)
}

/// Items of the input not present in the other collection. No dedup.
pub fn exclude(input: &Collection, other: &Collection) -> Result<Collection> {
    Ok(input
        .iter()
        .filter(|item| !contains_value(other, item))
        .cloned()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Value, ValueData};

    fn ints(values: &[i32]) -> Collection {
        values.iter().map(|i| Value::integer(*i)).collect()
    }

    #[test]
    fn combine_keeps_duplicates_and_order() {
        let out = combine(&ints(&[1, 2]), &ints(&[2, 3])).unwrap();
        assert_eq!(out.len(), 4);
        assert!(matches!(out.get(1).unwrap().data(), ValueData::Integer(2)));
        assert!(matches!(out.get(2).unwrap().data(), ValueData::Integer(2)));
    }

    #[test]
    fn union_dedups() {
        let out = union(&ints(&[1, 2]), &ints(&[2, 3])).unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn intersect_and_exclude() {
        let a = ints(&[1, 2, 2, 3]);
        let b = ints(&[2, 3, 4]);
        let i = intersect(&a, &b).unwrap();
        assert_eq!(i.len(), 2);
        let e = exclude(&a, &b).unwrap();
        assert_eq!(e.len(), 1);
        assert!(matches!(e.get(0).unwrap().data(), ValueData::Integer(1)));
    }
}
