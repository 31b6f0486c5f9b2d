//! Subsetting functions: `single()`, `first()`, `last()`, `tail()`,
//! `skip(n)`, `take(n)`.

use crate::error::{Error, Result};
use crate::value::Collection;

pub fn single(input: &Collection) -> Result<Collection> {
    match input.len() {
        0 => Ok(Collection::empty()),
        1 => Ok(input.clone()),
        n => Err(Error::WrongArity(format!(
            "single() requires at most one item, got {n}"
        ))),
    }
}

pub fn first(input: &Collection) -> Result<Collection> {
    Ok(input
        .first()
        .cloned()
        .map(Collection::singleton)
        .unwrap_or_else(Collection::empty))
}

pub fn last(input: &Collection) -> Result<Collection> {
    Ok(input
        .last()
        .cloned()
        .map(Collection::singleton)
        .unwrap_or_else(Collection::empty))
}

pub fn tail(input: &Collection) -> Result<Collection> {
    Ok(input.iter().skip(1).cloned().collect())
}

pub fn skip(input: &Collection, n: &Collection) -> Result<Collection> {
    let Some(n) = n.singleton_integer("skip() argument")? else {
        return Ok(Collection::empty());
    };
    if n <= 0 {
        return Ok(input.clone());
    }
    Ok(input.iter().skip(n as usize).cloned().collect())
}

pub fn take(input: &Collection, n: &Collection) -> Result<Collection> {
    let Some(n) = n.singleton_integer("take() argument")? else {
        return Ok(Collection::empty());
    };
    if n <= 0 {
        return Ok(Collection::empty());
    }
    Ok(input.iter().take(n as usize).cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Value, ValueData};

    fn ints(values: &[i32]) -> Collection {
        values.iter().map(|i| Value::integer(*i)).collect()
    }

    #[test]
    fn single_enforces_arity() {
        assert!(single(&Collection::empty()).unwrap().is_empty());
        assert_eq!(single(&ints(&[1])).unwrap().len(), 1);
        assert!(single(&ints(&[1, 2])).is_err());
    }

    #[test]
    fn first_last_tail() {
        let c = ints(&[1, 2, 3]);
        assert!(matches!(first(&c).unwrap().first().unwrap().data(), ValueData::Integer(1)));
        assert!(matches!(last(&c).unwrap().first().unwrap().data(), ValueData::Integer(3)));
        let t = tail(&c).unwrap();
        assert_eq!(t.len(), 2);
        assert!(matches!(t.get(0).unwrap().data(), ValueData::Integer(2)));
        assert!(first(&Collection::empty()).unwrap().is_empty());
    }

    #[test]
    fn skip_and_take() {
        let c = ints(&[1, 2, 3, 4]);
        assert_eq!(skip(&c, &ints(&[2])).unwrap().len(), 2);
        assert_eq!(take(&c, &ints(&[3])).unwrap().len(), 3);
        assert_eq!(skip(&c, &ints(&[-1])).unwrap().len(), 4);
        assert!(take(&c, &ints(&[0])).unwrap().is_empty());
        assert_eq!(skip(&c, &ints(&[10])).unwrap().len(), 0);
        assert_eq!(take(&c, &ints(&[10])).unwrap().len(), 4);
        // Empty argument propagates.
        assert!(take(&c, &Collection::empty()).unwrap().is_empty());
    }
}
