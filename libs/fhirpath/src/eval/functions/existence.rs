//! Existence and collection-query functions: `empty()`, `exists()`,
//! `allTrue()`, `count()`, `distinct()`, `subsetOf()`, and friends.
//! The criteria-taking forms (`exists(criteria)`, `all(criteria)`) are
//! lambda functions and live with the evaluator.

use crate::error::{Error, Result};
use crate::eval::operations::{contains_value, membership_equal};
use crate::value::{Collection, Value, ValueData};

pub fn empty(input: &Collection) -> Result<Collection> {
    Ok(Collection::singleton(Value::boolean(input.is_empty())))
}

pub fn exists_plain(input: &Collection) -> Result<Collection> {
    Ok(Collection::singleton(Value::boolean(!input.is_empty())))
}

fn all_bool(input: &Collection, what: &str, expect: bool, all: bool) -> Result<Collection> {
    // allTrue/allFalse are vacuously true on empty; anyTrue/anyFalse false.
    let mut result = all;
    for item in input.iter() {
        let b = match item.data() {
            ValueData::Boolean(b) => *b,
            _ => {
                return Err(Error::WrongType(format!(
                    "{what}() requires a collection of Booleans"
                )))
            }
        };
        if all {
            if b != expect {
                result = false;
                break;
            }
        } else if b == expect {
            result = true;
            break;
        }
    }
    Ok(Collection::singleton(Value::boolean(result)))
}

pub fn all_true(input: &Collection) -> Result<Collection> {
    all_bool(input, "allTrue", true, true)
}

pub fn any_true(input: &Collection) -> Result<Collection> {
    all_bool(input, "anyTrue", true, false)
}

pub fn all_false(input: &Collection) -> Result<Collection> {
    all_bool(input, "allFalse", false, true)
}

pub fn any_false(input: &Collection) -> Result<Collection> {
    all_bool(input, "anyFalse", false, false)
}

pub fn count(input: &Collection) -> Result<Collection> {
    let n = i32::try_from(input.len())
        .map_err(|_| Error::UnsupportedOperation("count() exceeds Integer range".into()))?;
    Ok(Collection::singleton(Value::integer(n)))
}

/// First-occurrence-order dedup.
pub fn distinct(input: &Collection) -> Result<Collection> {
    let mut out = Collection::with_capacity(input.len());
    for item in input.iter() {
        if !contains_value(&out, item) {
            out.push(item.clone());
        }
    }
    Ok(out)
}

pub fn is_distinct(input: &Collection) -> Result<Collection> {
    let deduped = distinct(input)?;
    Ok(Collection::singleton(Value::boolean(
        deduped.len() == input.len(),
    )))
}

/// Bag containment: every item of `input` matches a distinct item of
/// `other`.
fn bag_contains(other: &Collection, input: &Collection) -> bool {
    let mut used = vec![false; other.len()];
    for item in input.iter() {
        let mut found = false;
        for (idx, candidate) in other.iter().enumerate() {
            if !used[idx] && membership_equal(item, candidate) {
                used[idx] = true;
                found = true;
                break;
            }
        }
        if !found {
            return false;
        }
    }
    true
}

pub fn subset_of(input: &Collection, other: &Collection) -> Result<Collection> {
    Ok(Collection::singleton(Value::boolean(bag_contains(
        other, input,
    ))))
}

pub fn superset_of(input: &Collection, other: &Collection) -> Result<Collection> {
    Ok(Collection::singleton(Value::boolean(bag_contains(
        input, other,
    ))))
}
