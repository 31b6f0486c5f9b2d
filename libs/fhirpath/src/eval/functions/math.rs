//! Math functions: per-value (`abs()`, `round()`, `sqrt()`, ...) and
//! aggregate (`sum()`, `avg()`, `min()`, `max()`).
//!
//! Transcendental functions route through f64, as the decimal type has no
//! native exp/ln; out-of-range results are errors rather than silent
//! saturation.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::eval::operations::{as_decimal, compare_values, normalize_unit};
use crate::value::{Collection, Value, ValueData};

fn singleton<'a>(input: &'a Collection, what: &str) -> Result<Option<&'a Value>> {
    input.singleton_value(what)
}

fn numeric_f64(v: &Value, what: &str) -> Result<f64> {
    match v.data() {
        ValueData::Integer(i) => Ok(f64::from(*i)),
        ValueData::Decimal(d) => d
            .to_f64()
            .ok_or_else(|| Error::UnsupportedOperation(format!("{what}: value out of range"))),
        _ => Err(Error::WrongType(format!("{what} requires a numeric input"))),
    }
}

fn decimal_result(value: f64, what: &str) -> Result<Collection> {
    if !value.is_finite() {
        return Err(Error::UnsupportedOperation(format!(
            "{what}: result is not representable"
        )));
    }
    let d = Decimal::from_f64(value)
        .ok_or_else(|| Error::UnsupportedOperation(format!("{what}: result is not representable")))?;
    Ok(Collection::singleton(Value::decimal(d)))
}

pub fn abs(input: &Collection) -> Result<Collection> {
    let Some(v) = singleton(input, "abs()")? else {
        return Ok(Collection::empty());
    };
    let out = match v.data() {
        ValueData::Integer(i) => Value::integer(
            i.checked_abs()
                .ok_or_else(|| Error::UnsupportedOperation("integer overflow in abs()".into()))?,
        ),
        ValueData::Decimal(d) => Value::decimal(d.abs()),
        ValueData::Quantity { value, unit } => Value::quantity(value.abs(), unit.clone()),
        _ => return Err(Error::WrongType("abs() requires a numeric input".into())),
    };
    Ok(Collection::singleton(out))
}

fn to_bounded_integer(d: Decimal, what: &str) -> Result<Value> {
    d.to_i32()
        .map(Value::integer)
        .ok_or_else(|| Error::UnsupportedOperation(format!("integer overflow in {what}")))
}

pub fn ceiling(input: &Collection) -> Result<Collection> {
    let Some(v) = singleton(input, "ceiling()")? else {
        return Ok(Collection::empty());
    };
    match v.data() {
        ValueData::Integer(i) => Ok(Collection::singleton(Value::integer(*i))),
        ValueData::Decimal(d) => Ok(Collection::singleton(to_bounded_integer(
            d.ceil(),
            "ceiling()",
        )?)),
        _ => Err(Error::WrongType("ceiling() requires a numeric input".into())),
    }
}

pub fn floor(input: &Collection) -> Result<Collection> {
    let Some(v) = singleton(input, "floor()")? else {
        return Ok(Collection::empty());
    };
    match v.data() {
        ValueData::Integer(i) => Ok(Collection::singleton(Value::integer(*i))),
        ValueData::Decimal(d) => Ok(Collection::singleton(to_bounded_integer(
            d.floor(),
            "floor()",
        )?)),
        _ => Err(Error::WrongType("floor() requires a numeric input".into())),
    }
}

pub fn truncate(input: &Collection) -> Result<Collection> {
    let Some(v) = singleton(input, "truncate()")? else {
        return Ok(Collection::empty());
    };
    match v.data() {
        ValueData::Integer(i) => Ok(Collection::singleton(Value::integer(*i))),
        ValueData::Decimal(d) => Ok(Collection::singleton(to_bounded_integer(
            d.trunc(),
            "truncate()",
        )?)),
        _ => Err(Error::WrongType("truncate() requires a numeric input".into())),
    }
}

pub fn round(input: &Collection, digits: Option<&Collection>) -> Result<Collection> {
    let Some(v) = singleton(input, "round()")? else {
        return Ok(Collection::empty());
    };
    let digits = match digits {
        Some(arg) => arg.singleton_integer("round() digits")?.unwrap_or(0),
        None => 0,
    };
    if digits < 0 {
        return Err(Error::WrongType("round() digits must be non-negative".into()));
    }
    let d = as_decimal(v)
        .ok_or_else(|| Error::WrongType("round() requires a numeric input".into()))?;
    Ok(Collection::singleton(Value::decimal(
        d.round_dp(digits as u32),
    )))
}

pub fn exp(input: &Collection) -> Result<Collection> {
    let Some(v) = singleton(input, "exp()")? else {
        return Ok(Collection::empty());
    };
    decimal_result(numeric_f64(v, "exp()")?.exp(), "exp()")
}

pub fn ln(input: &Collection) -> Result<Collection> {
    let Some(v) = singleton(input, "ln()")? else {
        return Ok(Collection::empty());
    };
    let x = numeric_f64(v, "ln()")?;
    if x <= 0.0 {
        return Ok(Collection::empty());
    }
    decimal_result(x.ln(), "ln()")
}

pub fn log(input: &Collection, base: &Collection) -> Result<Collection> {
    let Some(v) = singleton(input, "log()")? else {
        return Ok(Collection::empty());
    };
    let Some(b) = singleton(base, "log() base")? else {
        return Ok(Collection::empty());
    };
    let x = numeric_f64(v, "log()")?;
    let base = numeric_f64(b, "log() base")?;
    if x <= 0.0 || base <= 0.0 || base == 1.0 {
        return Ok(Collection::empty());
    }
    decimal_result(x.ln() / base.ln(), "log()")
}

pub fn power(input: &Collection, exponent: &Collection) -> Result<Collection> {
    let Some(v) = singleton(input, "power()")? else {
        return Ok(Collection::empty());
    };
    let Some(e) = singleton(exponent, "power() exponent")? else {
        return Ok(Collection::empty());
    };
    let base = numeric_f64(v, "power()")?;
    let exponent_f = numeric_f64(e, "power() exponent")?;
    let result = base.powf(exponent_f);
    // Fractional powers of negatives have no real result: empty.
    if result.is_nan() {
        return Ok(Collection::empty());
    }
    // Integer op Integer stays Integer when exact.
    if let (ValueData::Integer(_), ValueData::Integer(exp)) = (v.data(), e.data()) {
        if *exp >= 0 && result.fract() == 0.0 && result.abs() <= f64::from(i32::MAX) {
            return Ok(Collection::singleton(Value::integer(result as i32)));
        }
    }
    decimal_result(result, "power()")
}

pub fn sqrt(input: &Collection) -> Result<Collection> {
    let Some(v) = singleton(input, "sqrt()")? else {
        return Ok(Collection::empty());
    };
    let x = numeric_f64(v, "sqrt()")?;
    if x < 0.0 {
        return Ok(Collection::empty());
    }
    decimal_result(x.sqrt(), "sqrt()")
}

/// Numeric aggregate scaffolding shared by `sum()` and `avg()`.
fn numeric_sum(input: &Collection, what: &str) -> Result<Option<(Decimal, bool, Option<String>)>> {
    if input.is_empty() {
        return Ok(None);
    }
    let mut total = Decimal::ZERO;
    let mut all_integers = true;
    let mut unit: Option<String> = None;
    for (idx, item) in input.iter().enumerate() {
        match item.data() {
            ValueData::Integer(i) => total += Decimal::from(*i),
            ValueData::Decimal(d) => {
                total += *d;
                all_integers = false;
            }
            ValueData::Quantity { value, unit: u } => {
                all_integers = false;
                match &unit {
                    None if idx == 0 => unit = Some(u.to_string()),
                    Some(existing) if normalize_unit(existing) == normalize_unit(u) => {}
                    _ => {
                        // Unit mismatch propagates as empty, like quantity
                        // arithmetic.
                        return Ok(None);
                    }
                }
                total += *value;
            }
            _ => return Err(Error::WrongType(format!("{what} requires numeric items"))),
        }
    }
    Ok(Some((total, all_integers, unit)))
}

pub fn sum(input: &Collection) -> Result<Collection> {
    let Some((total, all_integers, unit)) = numeric_sum(input, "sum()")? else {
        return Ok(Collection::empty());
    };
    let out = match unit {
        Some(unit) => Value::quantity(total, unit),
        None if all_integers => to_bounded_integer(total, "sum()")?,
        None => Value::decimal(total),
    };
    Ok(Collection::singleton(out))
}

pub fn avg(input: &Collection) -> Result<Collection> {
    let Some((total, _, unit)) = numeric_sum(input, "avg()")? else {
        return Ok(Collection::empty());
    };
    let count = Decimal::from(input.len());
    let mean = total
        .checked_div(count)
        .ok_or_else(|| Error::Internal("avg() division".into()))?;
    let out = match unit {
        Some(unit) => Value::quantity(mean, unit),
        None => Value::decimal(mean),
    };
    Ok(Collection::singleton(out))
}

fn extremum(input: &Collection, what: &str, want_greater: bool) -> Result<Collection> {
    let mut best: Option<&Value> = None;
    for item in input.iter() {
        best = match best {
            None => Some(item),
            Some(current) => match compare_values(item, current)? {
                Some(std::cmp::Ordering::Greater) if want_greater => Some(item),
                Some(std::cmp::Ordering::Less) if !want_greater => Some(item),
                Some(_) => Some(current),
                None => {
                    return Err(Error::WrongType(format!(
                        "{what} requires comparable items"
                    )))
                }
            },
        };
    }
    Ok(best
        .cloned()
        .map(Collection::singleton)
        .unwrap_or_else(Collection::empty))
}

pub fn min(input: &Collection) -> Result<Collection> {
    extremum(input, "min()", false)
}

pub fn max(input: &Collection) -> Result<Collection> {
    extremum(input, "max()", true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn one(v: Value) -> Collection {
        Collection::singleton(v)
    }

    fn dec(s: &str) -> Value {
        Value::decimal(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn rounding_family() {
        assert_eq!(
            ceiling(&one(dec("1.1"))).unwrap().singleton_integer("t").unwrap(),
            Some(2)
        );
        assert_eq!(
            floor(&one(dec("-1.1"))).unwrap().singleton_integer("t").unwrap(),
            Some(-2)
        );
        assert_eq!(
            truncate(&one(dec("-1.9"))).unwrap().singleton_integer("t").unwrap(),
            Some(-1)
        );
        let rounded = round(&one(dec("3.14159")), Some(&one(Value::integer(2)))).unwrap();
        assert!(matches!(
            rounded.first().unwrap().data(),
            ValueData::Decimal(d) if *d == Decimal::from_str("3.14").unwrap()
        ));
    }

    #[test]
    fn transcendental_functions() {
        let out = sqrt(&one(Value::integer(9))).unwrap();
        assert!(matches!(
            out.first().unwrap().data(),
            ValueData::Decimal(d) if *d == Decimal::from(3)
        ));
        assert!(sqrt(&one(Value::integer(-1))).unwrap().is_empty());
        assert!(ln(&one(Value::integer(0))).unwrap().is_empty());
        let out = power(&one(Value::integer(2)), &one(Value::integer(10))).unwrap();
        assert_eq!(out.singleton_integer("t").unwrap(), Some(1024));
        assert!(power(&one(Value::integer(-1)), &one(dec("0.5"))).unwrap().is_empty());
    }

    #[test]
    fn aggregates() {
        let ints: Collection = [1, 2, 3].iter().map(|i| Value::integer(*i)).collect();
        assert_eq!(sum(&ints).unwrap().singleton_integer("t").unwrap(), Some(6));
        let mean = avg(&ints).unwrap();
        assert!(matches!(
            mean.first().unwrap().data(),
            ValueData::Decimal(d) if *d == Decimal::from(2)
        ));
        assert_eq!(min(&ints).unwrap().singleton_integer("t").unwrap(), Some(1));
        assert_eq!(max(&ints).unwrap().singleton_integer("t").unwrap(), Some(3));
        assert!(sum(&Collection::empty()).unwrap().is_empty());
    }

    #[test]
    fn quantity_aggregates_respect_units() {
        let mgs: Collection = [1, 2]
            .iter()
            .map(|i| Value::quantity(Decimal::from(*i), "mg"))
            .collect();
        let out = sum(&mgs).unwrap();
        assert!(matches!(
            out.first().unwrap().data(),
            ValueData::Quantity { value, unit } if *value == Decimal::from(3) && unit.as_ref() == "mg"
        ));
        let mut mixed = mgs.clone();
        mixed.push(Value::quantity(Decimal::ONE, "mL"));
        assert!(sum(&mixed).unwrap().is_empty());
    }

    #[test]
    fn min_rejects_incomparable_items() {
        let mut mixed = Collection::empty();
        mixed.push(Value::integer(1));
        mixed.push(Value::quantity(Decimal::ONE, "mg"));
        assert!(min(&mixed).is_err());
    }

    #[test]
    fn abs_overflow_errors() {
        assert!(abs(&one(Value::integer(i32::MIN))).is_err());
        assert_eq!(
            abs(&one(Value::integer(-5))).unwrap().singleton_integer("t").unwrap(),
            Some(5)
        );
    }
}
