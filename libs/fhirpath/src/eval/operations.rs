//! Operator semantics: three-valued equality and equivalence, partial
//! ordering with precision rules, arithmetic with promotion, boolean truth
//! tables, membership, and union.
//!
//! Operators work on collections. Empty operands propagate as empty results
//! everywhere except `&` concatenation; singleton operands stand in for
//! scalars, and a multi-element collection where a scalar is required is an
//! arity error.

use std::cmp::Ordering;

use chrono::{Datelike, Duration, Months, Timelike};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::ast::BinaryOperator;
use crate::error::{Error, Result};
use crate::temporal;
use crate::value::{
    Collection, DatePrecision, DateTimePrecision, TimePrecision, Value, ValueData,
};

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

/// Normalize a quantity unit for comparison and calendar arithmetic:
/// calendar keywords singularize, and the equivalent UCUM codes map onto the
/// same names.
pub(crate) fn normalize_unit(unit: &str) -> &str {
    match unit {
        "years" | "year" | "a" => "year",
        "months" | "month" | "mo" => "month",
        "weeks" | "week" | "wk" => "week",
        "days" | "day" | "d" => "day",
        "hours" | "hour" | "h" => "hour",
        "minutes" | "minute" | "min" => "minute",
        "seconds" | "second" | "s" => "second",
        "milliseconds" | "millisecond" | "ms" => "millisecond",
        other => other,
    }
}

fn is_unitless(unit: &str) -> bool {
    unit.is_empty() || unit == "1"
}

// ---------------------------------------------------------------------------
// Equality (`=` / `!=`) — three-valued
// ---------------------------------------------------------------------------

/// Collection equality: empty operand on either side propagates as empty;
/// otherwise element-wise with same length and order. An indeterminate pair
/// makes the whole comparison indeterminate.
pub(crate) fn equality(left: &Collection, right: &Collection) -> Result<Option<bool>> {
    if left.is_empty() || right.is_empty() {
        return Ok(None);
    }
    if left.len() != right.len() {
        return Ok(Some(false));
    }
    let mut indeterminate = false;
    for (l, r) in left.iter().zip(right.iter()) {
        match values_equal(l, r) {
            Some(false) => return Ok(Some(false)),
            Some(true) => {}
            None => indeterminate = true,
        }
    }
    Ok(if indeterminate { None } else { Some(true) })
}

/// Scalar equality. `None` signals an indeterminate comparison (temporal
/// precision mismatch with an equal shared prefix, or unit mismatch).
pub(crate) fn values_equal(l: &Value, r: &Value) -> Option<bool> {
    use ValueData::*;
    match (l.data(), r.data()) {
        (Boolean(a), Boolean(b)) => Some(a == b),
        (String(a), String(b)) => Some(a == b),
        (Integer(a), Integer(b)) => Some(a == b),
        (Decimal(a), Decimal(b)) => Some(a == b),
        (Integer(a), Decimal(b)) => Some(&rust_decimal::Decimal::from(*a) == b),
        (Decimal(a), Integer(b)) => Some(a == &rust_decimal::Decimal::from(*b)),

        // Unitless quantities coerce against plain numbers.
        (Integer(a), Quantity { value, unit }) | (Quantity { value, unit }, Integer(a))
            if is_unitless(unit) =>
        {
            Some(&rust_decimal::Decimal::from(*a) == value)
        }
        (Decimal(a), Quantity { value, unit }) | (Quantity { value, unit }, Decimal(a))
            if is_unitless(unit) =>
        {
            Some(a == value)
        }

        (
            Quantity {
                value: av,
                unit: au,
            },
            Quantity {
                value: bv,
                unit: bu,
            },
        ) => {
            if normalize_unit(au) == normalize_unit(bu) {
                Some(av == bv)
            } else {
                None
            }
        }

        (Date { .. }, Date { .. })
        | (DateTime { .. }, DateTime { .. })
        | (Time { .. }, Time { .. })
        | (Date { .. }, DateTime { .. })
        | (DateTime { .. }, Date { .. }) => match compare_temporal(l, r) {
            Some(TemporalOrdering::Determinate(ord)) => Some(ord == Ordering::Equal),
            Some(TemporalOrdering::Indeterminate) => None,
            None => Some(false),
        },

        // Lenient string/temporal coercion: FHIR primitives that escaped
        // descriptor typing still compare correctly.
        (String(s), Date { .. })
        | (String(s), DateTime { .. })
        | (String(s), Time { .. }) => match temporal::parse_temporal_string(s) {
            Some(parsed) => values_equal(&parsed, r),
            None => Some(false),
        },
        (Date { .. }, String(s))
        | (DateTime { .. }, String(s))
        | (Time { .. }, String(s)) => match temporal::parse_temporal_string(s) {
            Some(parsed) => values_equal(l, &parsed),
            None => Some(false),
        },

        (Element { json: a, .. }, Element { json: b, .. }) => Some(a == b),

        // A Quantity-shaped element compares like the System Quantity it
        // carries.
        (Element { .. }, Integer(_) | Decimal(_) | Quantity { .. }) => {
            match super::navigate::element_as_quantity(l) {
                Some(coerced) => values_equal(&coerced, r),
                None => Some(false),
            }
        }
        (Integer(_) | Decimal(_) | Quantity { .. }, Element { .. }) => {
            match super::navigate::element_as_quantity(r) {
                Some(coerced) => values_equal(l, &coerced),
                None => Some(false),
            }
        }

        _ => Some(false),
    }
}

// ---------------------------------------------------------------------------
// Equivalence (`~` / `!~`) — total
// ---------------------------------------------------------------------------

/// Collection equivalence: total (never empty), order-independent.
pub(crate) fn collections_equivalent(a: &Collection, b: &Collection) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    for item in a.iter() {
        let mut found = false;
        for (idx, candidate) in b.iter().enumerate() {
            if !used[idx] && values_equivalent(item, candidate) {
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

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Scalar equivalence: case/whitespace-insensitive for strings, rounded to
/// the least precise scale for decimals, same-precision for temporals.
pub(crate) fn values_equivalent(l: &Value, r: &Value) -> bool {
    use ValueData::*;
    match (l.data(), r.data()) {
        (String(a), String(b)) => {
            normalize_whitespace(a).to_lowercase() == normalize_whitespace(b).to_lowercase()
        }
        (Decimal(a), Decimal(b)) => {
            let scale = a.scale().min(b.scale());
            a.round_dp(scale) == b.round_dp(scale)
        }
        (Integer(_), Decimal(_)) | (Decimal(_), Integer(_)) => {
            values_equal(l, r).unwrap_or(false)
        }
        (
            Quantity {
                value: av,
                unit: au,
            },
            Quantity {
                value: bv,
                unit: bu,
            },
        ) => {
            let scale = av.scale().min(bv.scale());
            normalize_unit(au) == normalize_unit(bu)
                && av.round_dp(scale) == bv.round_dp(scale)
        }
        (Element { json: a, .. }, Element { json: b, .. }) => a == b,
        _ => values_equal(l, r).unwrap_or(false),
    }
}

/// Membership equality (`in`, `contains`, `subsetOf`, `union` dedup):
/// `=` semantics with an equivalence fallback when `=` is indeterminate.
pub(crate) fn membership_equal(a: &Value, b: &Value) -> bool {
    values_equal(a, b).unwrap_or_else(|| values_equivalent(a, b))
}

pub(crate) fn contains_value(collection: &Collection, value: &Value) -> bool {
    collection.iter().any(|item| membership_equal(item, value))
}

// ---------------------------------------------------------------------------
// Ordering (`<` `<=` `>` `>=`)
// ---------------------------------------------------------------------------

enum TemporalOrdering {
    Determinate(Ordering),
    /// Equal up to the shorter precision, but precisions differ.
    Indeterminate,
}

/// Compare two temporal values component-wise down to their shared
/// precision. Returns `None` when the values are not both temporal.
fn compare_temporal(l: &Value, r: &Value) -> Option<TemporalOrdering> {
    use ValueData::*;

    fn date_components(
        value: &chrono::NaiveDate,
        precision: DatePrecision,
    ) -> (Vec<i64>, usize) {
        (
            vec![value.year() as i64, value.month() as i64, value.day() as i64],
            match precision {
                DatePrecision::Year => 1,
                DatePrecision::Month => 2,
                DatePrecision::Day => 3,
            },
        )
    }

    fn datetime_components(
        value: &chrono::DateTime<chrono::Utc>,
        precision: DateTimePrecision,
    ) -> (Vec<i64>, usize) {
        (
            vec![
                value.year() as i64,
                value.month() as i64,
                value.day() as i64,
                value.hour() as i64,
                value.minute() as i64,
                value.second() as i64,
                (value.nanosecond() / 1_000_000) as i64,
            ],
            match precision {
                DateTimePrecision::Year => 1,
                DateTimePrecision::Month => 2,
                DateTimePrecision::Day => 3,
                DateTimePrecision::Hour => 4,
                DateTimePrecision::Minute => 5,
                DateTimePrecision::Second => 6,
                DateTimePrecision::Millisecond => 7,
            },
        )
    }

    fn time_components(value: &chrono::NaiveTime, precision: TimePrecision) -> (Vec<i64>, usize) {
        (
            vec![
                value.hour() as i64,
                value.minute() as i64,
                value.second() as i64,
                (value.nanosecond() / 1_000_000) as i64,
            ],
            match precision {
                TimePrecision::Hour => 1,
                TimePrecision::Minute => 2,
                TimePrecision::Second => 3,
                TimePrecision::Millisecond => 4,
            },
        )
    }

    let (lc, lp) = match l.data() {
        Date { value, precision } => date_components(value, *precision),
        DateTime { value, precision, .. } => datetime_components(value, *precision),
        Time { value, precision } => time_components(value, *precision),
        _ => return None,
    };
    let (rc, rp) = match r.data() {
        Date { value, precision } => date_components(value, *precision),
        DateTime { value, precision, .. } => datetime_components(value, *precision),
        Time { value, precision } => time_components(value, *precision),
        _ => return None,
    };

    // Date-vs-Time never compares; Date-vs-DateTime promotes the date.
    match (l.data(), r.data()) {
        (Date { .. } | DateTime { .. }, Time { .. })
        | (Time { .. }, Date { .. } | DateTime { .. }) => return None,
        _ => {}
    }

    let shared = lp.min(rp);
    for i in 0..shared {
        match lc[i].cmp(&rc[i]) {
            Ordering::Equal => continue,
            other => return Some(TemporalOrdering::Determinate(other)),
        }
    }
    if lp == rp {
        Some(TemporalOrdering::Determinate(Ordering::Equal))
    } else {
        Some(TemporalOrdering::Indeterminate)
    }
}

/// Scalar ordering. `None` means the comparison is indeterminate (precision
/// or unit mismatch); incompatible types are a `WrongType` error.
pub(crate) fn compare_values(l: &Value, r: &Value) -> Result<Option<Ordering>> {
    use ValueData::*;
    match (l.data(), r.data()) {
        (String(a), String(b)) => Ok(Some(a.cmp(b))),
        (Integer(a), Integer(b)) => Ok(Some(a.cmp(b))),
        (Decimal(a), Decimal(b)) => Ok(Some(a.cmp(b))),
        (Integer(a), Decimal(b)) => Ok(Some(rust_decimal::Decimal::from(*a).cmp(b))),
        (Decimal(a), Integer(b)) => Ok(Some(a.cmp(&rust_decimal::Decimal::from(*b)))),

        (Integer(a), Quantity { value, unit }) if is_unitless(unit) => {
            Ok(Some(rust_decimal::Decimal::from(*a).cmp(value)))
        }
        (Quantity { value, unit }, Integer(b)) if is_unitless(unit) => {
            Ok(Some(value.cmp(&rust_decimal::Decimal::from(*b))))
        }
        (Decimal(a), Quantity { value, unit }) if is_unitless(unit) => Ok(Some(a.cmp(value))),
        (Quantity { value, unit }, Decimal(b)) if is_unitless(unit) => Ok(Some(value.cmp(b))),

        (
            Quantity {
                value: av,
                unit: au,
            },
            Quantity {
                value: bv,
                unit: bu,
            },
        ) => {
            if normalize_unit(au) == normalize_unit(bu) {
                Ok(Some(av.cmp(bv)))
            } else {
                // Non-comparable units are indeterminate, not an error.
                Ok(None)
            }
        }

        (Date { .. } | DateTime { .. } | Time { .. }, Date { .. } | DateTime { .. } | Time { .. }) => {
            match compare_temporal(l, r) {
                Some(TemporalOrdering::Determinate(ord)) => Ok(Some(ord)),
                Some(TemporalOrdering::Indeterminate) => Ok(None),
                None => Err(Error::WrongType(
                    "cannot order values of mixed temporal kinds".into(),
                )),
            }
        }

        (String(s), Date { .. } | DateTime { .. } | Time { .. }) => {
            match temporal::parse_temporal_string(s) {
                Some(parsed) => compare_values(&parsed, r),
                None => Err(Error::WrongType("cannot order string against temporal".into())),
            }
        }
        (Date { .. } | DateTime { .. } | Time { .. }, String(s)) => {
            match temporal::parse_temporal_string(s) {
                Some(parsed) => compare_values(l, &parsed),
                None => Err(Error::WrongType("cannot order temporal against string".into())),
            }
        }

        _ => Err(Error::WrongType(format!(
            "ordering is not defined between {} and {}",
            type_label(l),
            type_label(r)
        ))),
    }
}

fn type_label(v: &Value) -> &'static str {
    v.system_type_name().unwrap_or("Element")
}

/// Coerce an operand for ordering/arithmetic: Quantity-shaped elements act
/// as their System Quantity.
fn coerce_operand(v: &Value) -> Value {
    super::navigate::element_as_quantity(v).unwrap_or_else(|| v.clone())
}

/// Collection-level ordering operator.
pub(crate) fn ordering(
    op: BinaryOperator,
    left: &Collection,
    right: &Collection,
) -> Result<Collection> {
    let Some(l) = left.singleton_value("comparison operand")? else {
        return Ok(Collection::empty());
    };
    let Some(r) = right.singleton_value("comparison operand")? else {
        return Ok(Collection::empty());
    };
    let (l, r) = (coerce_operand(l), coerce_operand(r));
    let (l, r) = (&l, &r);
    let Some(ord) = compare_values(l, r)? else {
        return Ok(Collection::empty());
    };
    let result = match op {
        BinaryOperator::Lt => ord == Ordering::Less,
        BinaryOperator::Le => ord != Ordering::Greater,
        BinaryOperator::Gt => ord == Ordering::Greater,
        BinaryOperator::Ge => ord != Ordering::Less,
        _ => return Err(Error::Internal(format!("not an ordering operator: {op:?}"))),
    };
    Ok(Collection::singleton(Value::boolean(result)))
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

fn overflow(op: &str) -> Error {
    Error::UnsupportedOperation(format!("integer overflow in {op}"))
}

/// Add a calendar quantity to a temporal value. `None` when the unit does
/// not apply to the value kind.
pub(crate) fn add_temporal_quantity(
    value: &Value,
    amount: Decimal,
    unit: &str,
    negate: bool,
) -> Result<Option<Value>> {
    let amount = if negate { -amount } else { amount };
    // Calendar arithmetic uses whole units; fractions truncate toward zero.
    let whole = amount.trunc().to_i64().ok_or_else(|| overflow("date arithmetic"))?;
    let unit = normalize_unit(unit);

    match value.data() {
        ValueData::Date { value: date, precision } => {
            let new_date = match unit {
                "year" => add_months_clamped(*date, whole.checked_mul(12)),
                "month" => add_months_clamped(*date, Some(whole)),
                "week" => date.checked_add_signed(Duration::weeks(whole)),
                "day" => date.checked_add_signed(Duration::days(whole)),
                _ => return Ok(None),
            };
            Ok(new_date.map(|d| Value::date(d, *precision)))
        }
        ValueData::DateTime {
            value: dt,
            precision,
            timezone_offset,
        } => {
            let new_dt = match unit {
                "year" => add_months_datetime(*dt, whole.checked_mul(12)),
                "month" => add_months_datetime(*dt, Some(whole)),
                "week" => dt.checked_add_signed(Duration::weeks(whole)),
                "day" => dt.checked_add_signed(Duration::days(whole)),
                "hour" => dt.checked_add_signed(Duration::hours(whole)),
                "minute" => dt.checked_add_signed(Duration::minutes(whole)),
                "second" => dt.checked_add_signed(Duration::seconds(whole)),
                "millisecond" => dt.checked_add_signed(Duration::milliseconds(whole)),
                _ => return Ok(None),
            };
            Ok(new_dt.map(|d| Value::datetime(d, *precision, *timezone_offset)))
        }
        ValueData::Time { value: time, precision } => {
            let delta = match unit {
                "hour" => Duration::hours(whole),
                "minute" => Duration::minutes(whole),
                "second" => Duration::seconds(whole),
                "millisecond" => Duration::milliseconds(whole),
                _ => return Ok(None),
            };
            // Times wrap around midnight.
            let (new_time, _) = time.overflowing_add_signed(delta);
            Ok(Some(Value::time(new_time, *precision)))
        }
        _ => Ok(None),
    }
}

fn add_months_clamped(date: chrono::NaiveDate, months: Option<i64>) -> Option<chrono::NaiveDate> {
    let months = months?;
    let months32 = u32::try_from(months.unsigned_abs()).ok()?;
    if months >= 0 {
        date.checked_add_months(Months::new(months32))
    } else {
        date.checked_sub_months(Months::new(months32))
    }
}

fn add_months_datetime(
    dt: chrono::DateTime<chrono::Utc>,
    months: Option<i64>,
) -> Option<chrono::DateTime<chrono::Utc>> {
    let months = months?;
    let months32 = u32::try_from(months.unsigned_abs()).ok()?;
    if months >= 0 {
        dt.checked_add_months(Months::new(months32))
    } else {
        dt.checked_sub_months(Months::new(months32))
    }
}

fn scalar_add(l: &Value, r: &Value) -> Result<Option<Value>> {
    use ValueData::*;
    let out = match (l.data(), r.data()) {
        (Integer(a), Integer(b)) => Some(Value::integer(a.checked_add(*b).ok_or_else(|| overflow("+"))?)),
        (Integer(a), Decimal(b)) => Some(Value::decimal(rust_decimal::Decimal::from(*a) + b)),
        (Decimal(a), Integer(b)) => Some(Value::decimal(a + rust_decimal::Decimal::from(*b))),
        (Decimal(a), Decimal(b)) => Some(Value::decimal(a + b)),
        (String(a), String(b)) => Some(Value::string(format!("{a}{b}"))),
        (
            Quantity { value: av, unit: au },
            Quantity { value: bv, unit: bu },
        ) => {
            if normalize_unit(au) == normalize_unit(bu) {
                Some(Value::quantity(av + bv, au.clone()))
            } else if is_unitless(au) {
                Some(Value::quantity(av + bv, bu.clone()))
            } else if is_unitless(bu) {
                Some(Value::quantity(av + bv, au.clone()))
            } else {
                None
            }
        }
        // Unitless scalars combine with quantities and preserve the unit.
        (Integer(a), Quantity { value, unit }) => {
            Some(Value::quantity(rust_decimal::Decimal::from(*a) + value, unit.clone()))
        }
        (Quantity { value, unit }, Integer(b)) => {
            Some(Value::quantity(value + rust_decimal::Decimal::from(*b), unit.clone()))
        }
        (Decimal(a), Quantity { value, unit }) => {
            Some(Value::quantity(a + value, unit.clone()))
        }
        (Quantity { value, unit }, Decimal(b)) => {
            Some(Value::quantity(value + b, unit.clone()))
        }
        (Date { .. } | DateTime { .. } | Time { .. }, Quantity { value, unit }) => {
            return add_temporal_quantity(l, *value, unit, false)
        }
        (String(s), Quantity { value, unit }) => match temporal::parse_temporal_string(s) {
            Some(parsed) => return add_temporal_quantity(&parsed, *value, unit, false),
            None => None,
        },
        _ => {
            return Err(Error::WrongType(format!(
                "'+' is not defined between {} and {}",
                type_label(l),
                type_label(r)
            )))
        }
    };
    Ok(out)
}

fn scalar_sub(l: &Value, r: &Value) -> Result<Option<Value>> {
    use ValueData::*;
    let out = match (l.data(), r.data()) {
        (Integer(a), Integer(b)) => Some(Value::integer(a.checked_sub(*b).ok_or_else(|| overflow("-"))?)),
        (Integer(a), Decimal(b)) => Some(Value::decimal(rust_decimal::Decimal::from(*a) - b)),
        (Decimal(a), Integer(b)) => Some(Value::decimal(a - rust_decimal::Decimal::from(*b))),
        (Decimal(a), Decimal(b)) => Some(Value::decimal(a - b)),
        (
            Quantity { value: av, unit: au },
            Quantity { value: bv, unit: bu },
        ) => {
            if normalize_unit(au) == normalize_unit(bu) {
                Some(Value::quantity(av - bv, au.clone()))
            } else if is_unitless(au) {
                Some(Value::quantity(av - bv, bu.clone()))
            } else if is_unitless(bu) {
                Some(Value::quantity(av - bv, au.clone()))
            } else {
                None
            }
        }
        (Integer(a), Quantity { value, unit }) => {
            Some(Value::quantity(rust_decimal::Decimal::from(*a) - value, unit.clone()))
        }
        (Quantity { value, unit }, Integer(b)) => {
            Some(Value::quantity(value - rust_decimal::Decimal::from(*b), unit.clone()))
        }
        (Decimal(a), Quantity { value, unit }) => {
            Some(Value::quantity(a - value, unit.clone()))
        }
        (Quantity { value, unit }, Decimal(b)) => {
            Some(Value::quantity(value - b, unit.clone()))
        }
        (Date { .. } | DateTime { .. } | Time { .. }, Quantity { value, unit }) => {
            return add_temporal_quantity(l, *value, unit, true)
        }
        (String(s), Quantity { value, unit }) => match temporal::parse_temporal_string(s) {
            Some(parsed) => return add_temporal_quantity(&parsed, *value, unit, true),
            None => None,
        },
        _ => {
            return Err(Error::WrongType(format!(
                "'-' is not defined between {} and {}",
                type_label(l),
                type_label(r)
            )))
        }
    };
    Ok(out)
}

fn scalar_mul(l: &Value, r: &Value) -> Result<Option<Value>> {
    use ValueData::*;
    let out = match (l.data(), r.data()) {
        (Integer(a), Integer(b)) => Some(Value::integer(a.checked_mul(*b).ok_or_else(|| overflow("*"))?)),
        (Integer(a), Decimal(b)) => Some(Value::decimal(rust_decimal::Decimal::from(*a) * b)),
        (Decimal(a), Integer(b)) => Some(Value::decimal(a * rust_decimal::Decimal::from(*b))),
        (Decimal(a), Decimal(b)) => Some(Value::decimal(a * b)),
        (Quantity { value, unit }, Integer(b)) => {
            Some(Value::quantity(value * rust_decimal::Decimal::from(*b), unit.clone()))
        }
        (Integer(a), Quantity { value, unit }) => {
            Some(Value::quantity(rust_decimal::Decimal::from(*a) * value, unit.clone()))
        }
        (Quantity { value, unit }, Decimal(b)) => {
            Some(Value::quantity(value * b, unit.clone()))
        }
        (Decimal(a), Quantity { value, unit }) => {
            Some(Value::quantity(a * value, unit.clone()))
        }
        _ => {
            return Err(Error::WrongType(format!(
                "'*' is not defined between {} and {}",
                type_label(l),
                type_label(r)
            )))
        }
    };
    Ok(out)
}

fn scalar_div(l: &Value, r: &Value) -> Result<Option<Value>> {
    use ValueData::*;
    fn checked(a: rust_decimal::Decimal, b: rust_decimal::Decimal) -> Option<rust_decimal::Decimal> {
        if b.is_zero() {
            None
        } else {
            a.checked_div(b)
        }
    }
    let out = match (l.data(), r.data()) {
        // `/` always yields Decimal, even for integer operands.
        (Integer(a), Integer(b)) => checked(rust_decimal::Decimal::from(*a), rust_decimal::Decimal::from(*b)).map(Value::decimal),
        (Integer(a), Decimal(b)) => checked(rust_decimal::Decimal::from(*a), *b).map(Value::decimal),
        (Decimal(a), Integer(b)) => checked(*a, rust_decimal::Decimal::from(*b)).map(Value::decimal),
        (Decimal(a), Decimal(b)) => checked(*a, *b).map(Value::decimal),
        (Quantity { value, unit }, Integer(b)) => {
            checked(*value, rust_decimal::Decimal::from(*b)).map(|v| Value::quantity(v, unit.clone()))
        }
        (Quantity { value, unit }, Decimal(b)) => {
            checked(*value, *b).map(|v| Value::quantity(v, unit.clone()))
        }
        (
            Quantity { value: av, unit: au },
            Quantity { value: bv, unit: bu },
        ) => {
            if normalize_unit(au) == normalize_unit(bu) {
                checked(*av, *bv).map(Value::decimal)
            } else {
                None
            }
        }
        _ => {
            return Err(Error::WrongType(format!(
                "'/' is not defined between {} and {}",
                type_label(l),
                type_label(r)
            )))
        }
    };
    Ok(out)
}

fn scalar_truncdiv(l: &Value, r: &Value) -> Result<Option<Value>> {
    use ValueData::*;
    let out = match (l.data(), r.data()) {
        (Integer(a), Integer(b)) => {
            if *b == 0 {
                None
            } else {
                Some(Value::integer(a.checked_div(*b).ok_or_else(|| overflow("div"))?))
            }
        }
        (Integer(_), Decimal(_)) | (Decimal(_), Integer(_)) | (Decimal(_), Decimal(_)) => {
            let a = as_decimal(l).ok_or_else(|| Error::Internal("numeric coercion".into()))?;
            let b = as_decimal(r).ok_or_else(|| Error::Internal("numeric coercion".into()))?;
            if b.is_zero() {
                None
            } else {
                let q = a.checked_div(b).map(|d| d.trunc());
                match q.and_then(|d| d.to_i32()) {
                    Some(i) => Some(Value::integer(i)),
                    None => return Err(overflow("div")),
                }
            }
        }
        _ => {
            return Err(Error::WrongType(format!(
                "'div' is not defined between {} and {}",
                type_label(l),
                type_label(r)
            )))
        }
    };
    Ok(out)
}

fn scalar_mod(l: &Value, r: &Value) -> Result<Option<Value>> {
    use ValueData::*;
    let out = match (l.data(), r.data()) {
        // `%` in Rust already follows the dividend's sign.
        (Integer(a), Integer(b)) => {
            if *b == 0 {
                None
            } else {
                Some(Value::integer(a.checked_rem(*b).ok_or_else(|| overflow("mod"))?))
            }
        }
        (Integer(_), Decimal(_)) | (Decimal(_), Integer(_)) | (Decimal(_), Decimal(_)) => {
            let a = as_decimal(l).ok_or_else(|| Error::Internal("numeric coercion".into()))?;
            let b = as_decimal(r).ok_or_else(|| Error::Internal("numeric coercion".into()))?;
            if b.is_zero() {
                None
            } else {
                a.checked_rem(b).map(Value::decimal)
            }
        }
        _ => {
            return Err(Error::WrongType(format!(
                "'mod' is not defined between {} and {}",
                type_label(l),
                type_label(r)
            )))
        }
    };
    Ok(out)
}

pub(crate) fn as_decimal(v: &Value) -> Option<Decimal> {
    match v.data() {
        ValueData::Integer(i) => Some(rust_decimal::Decimal::from(*i)),
        ValueData::Decimal(d) => Some(*d),
        _ => None,
    }
}

/// Collection-level arithmetic dispatch for `+ - * / div mod`.
pub(crate) fn arithmetic(
    op: BinaryOperator,
    left: &Collection,
    right: &Collection,
) -> Result<Collection> {
    let Some(l) = left.singleton_value("arithmetic operand")? else {
        return Ok(Collection::empty());
    };
    let Some(r) = right.singleton_value("arithmetic operand")? else {
        return Ok(Collection::empty());
    };
    let (l, r) = (coerce_operand(l), coerce_operand(r));
    let (l, r) = (&l, &r);
    let out = match op {
        BinaryOperator::Add => scalar_add(l, r)?,
        BinaryOperator::Sub => scalar_sub(l, r)?,
        BinaryOperator::Mul => scalar_mul(l, r)?,
        BinaryOperator::Div => scalar_div(l, r)?,
        BinaryOperator::TruncDiv => scalar_truncdiv(l, r)?,
        BinaryOperator::Mod => scalar_mod(l, r)?,
        _ => return Err(Error::Internal(format!("not an arithmetic operator: {op:?}"))),
    };
    Ok(out.map(Collection::singleton).unwrap_or_else(Collection::empty))
}

/// `&`: string concatenation where an empty operand coerces to the empty
/// string. The only operator where empty does not propagate.
pub(crate) fn concat(left: &Collection, right: &Collection) -> Result<Collection> {
    fn side(c: &Collection) -> Result<String> {
        match c.singleton_value("'&' operand")? {
            None => Ok(String::new()),
            Some(v) => match v.data() {
                ValueData::String(s) => Ok(s.to_string()),
                _ => Err(Error::WrongType("'&' expects String operands".into())),
            },
        }
    }
    let combined = format!("{}{}", side(left)?, side(right)?);
    Ok(Collection::singleton(Value::string(combined)))
}

/// Unary `+` / `-`.
pub(crate) fn unary(
    op: crate::ast::UnaryOperator,
    operand: &Collection,
) -> Result<Collection> {
    use crate::ast::UnaryOperator;
    let Some(v) = operand.singleton_value("unary operand")? else {
        return Ok(Collection::empty());
    };
    let negate = matches!(op, UnaryOperator::Minus);
    let out = match v.data() {
        ValueData::Integer(i) => {
            if negate {
                Value::integer(i.checked_neg().ok_or_else(|| overflow("unary -"))?)
            } else {
                v.clone()
            }
        }
        ValueData::Decimal(d) => {
            if negate {
                Value::decimal(-d)
            } else {
                v.clone()
            }
        }
        ValueData::Quantity { value, unit } => {
            if negate {
                Value::quantity(-value, unit.clone())
            } else {
                v.clone()
            }
        }
        _ => {
            return Err(Error::WrongType(
                "unary +/- requires a numeric operand".into(),
            ))
        }
    };
    Ok(Collection::singleton(out))
}

// ---------------------------------------------------------------------------
// Boolean operators — three-valued with short-circuit at the call site
// ---------------------------------------------------------------------------

/// Boolean operand of a three-valued operator or criteria expression: empty
/// is unknown, a Boolean singleton is itself, anything else is a type error.
pub(crate) fn boolean_operand(c: &Collection, what: &str) -> Result<Option<bool>> {
    match c.singleton_value(what)? {
        None => Ok(None),
        Some(v) => match v.data() {
            ValueData::Boolean(b) => Ok(Some(*b)),
            _ => Err(Error::WrongType(format!(
                "{what} must evaluate to a Boolean"
            ))),
        },
    }
}

fn tribool(value: Option<bool>) -> Collection {
    match value {
        Some(b) => Collection::singleton(Value::boolean(b)),
        None => Collection::empty(),
    }
}

pub(crate) fn and(l: Option<bool>, r: Option<bool>) -> Collection {
    tribool(match (l, r) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    })
}

pub(crate) fn or(l: Option<bool>, r: Option<bool>) -> Collection {
    tribool(match (l, r) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    })
}

pub(crate) fn xor(l: Option<bool>, r: Option<bool>) -> Collection {
    tribool(match (l, r) {
        (Some(a), Some(b)) => Some(a != b),
        _ => None,
    })
}

pub(crate) fn implies(l: Option<bool>, r: Option<bool>) -> Collection {
    tribool(match (l, r) {
        (Some(false), _) => Some(true),
        (_, Some(true)) => Some(true),
        (Some(true), Some(false)) => Some(false),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Membership and union
// ---------------------------------------------------------------------------

/// `left in right`.
pub(crate) fn membership_in(left: &Collection, right: &Collection) -> Result<Collection> {
    let Some(item) = left.singleton_value("'in' left operand")? else {
        return Ok(Collection::empty());
    };
    Ok(Collection::singleton(Value::boolean(contains_value(
        right, item,
    ))))
}

/// `left contains right`.
pub(crate) fn membership_contains(left: &Collection, right: &Collection) -> Result<Collection> {
    let Some(item) = right.singleton_value("'contains' right operand")? else {
        return Ok(Collection::empty());
    };
    Ok(Collection::singleton(Value::boolean(contains_value(
        left, item,
    ))))
}

/// `left | right`: concatenation with first-occurrence dedup.
pub(crate) fn union(left: &Collection, right: &Collection) -> Collection {
    let mut out = Collection::with_capacity(left.len() + right.len());
    for item in left.iter().chain(right.iter()) {
        if !contains_value(&out, item) {
            out.push(item.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn one(v: Value) -> Collection {
        Collection::singleton(v)
    }

    fn date(s: &str) -> Value {
        let (d, p) = temporal::parse_date(s).unwrap();
        Value::date(d, p)
    }

    fn datetime(s: &str) -> Value {
        let (dt, p, tz) = temporal::parse_datetime(s).unwrap();
        Value::datetime(dt, p, tz)
    }

    #[test]
    fn equality_propagates_empty() {
        let empty = Collection::empty();
        let x = one(Value::integer(1));
        assert_eq!(equality(&empty, &x).unwrap(), None);
        assert_eq!(equality(&x, &empty).unwrap(), None);
        assert_eq!(equality(&x, &x).unwrap(), Some(true));
    }

    #[test]
    fn integer_decimal_coercion() {
        let one_int = one(Value::integer(1));
        let one_dec = one(Value::decimal(Decimal::from_str("1.0").unwrap()));
        assert_eq!(equality(&one_int, &one_dec).unwrap(), Some(true));
    }

    #[test]
    fn unitless_quantity_coercion() {
        let q = one(Value::quantity(rust_decimal::Decimal::from(5), "1"));
        let i = one(Value::integer(5));
        assert_eq!(equality(&i, &q).unwrap(), Some(true));
    }

    #[test]
    fn date_datetime_promotion() {
        // Scenario from the conformance suite: day precision on both sides.
        let l = one(date("2012-12-31"));
        let r = one(datetime("2012-12-31T"));
        assert_eq!(equality(&l, &r).unwrap(), Some(true));
    }

    #[test]
    fn date_precision_mismatch_is_empty() {
        let l = one(date("2000-01"));
        let r = one(date("2000-01-03"));
        assert_eq!(equality(&l, &r).unwrap(), None);
        // Differing within shared precision: definite false.
        let r2 = one(date("2000-02-03"));
        assert_eq!(equality(&l, &r2).unwrap(), Some(false));
    }

    #[test]
    fn datetime_timezone_normalization() {
        let l = one(datetime("2015-01-01T10:00:00+01:00"));
        let r = one(datetime("2015-01-01T09:00:00Z"));
        assert_eq!(equality(&l, &r).unwrap(), Some(true));
    }

    #[test]
    fn quantity_unit_mismatch_is_empty() {
        let mg = one(Value::quantity(rust_decimal::Decimal::from(5), "mg"));
        let ml = one(Value::quantity(rust_decimal::Decimal::from(5), "mL"));
        assert_eq!(equality(&mg, &ml).unwrap(), None);
        assert!(ordering(BinaryOperator::Lt, &mg, &ml).unwrap().is_empty());
    }

    #[test]
    fn calendar_units_normalize() {
        let a = one(Value::quantity(rust_decimal::Decimal::from(1), "year"));
        let b = one(Value::quantity(rust_decimal::Decimal::from(1), "years"));
        assert_eq!(equality(&a, &b).unwrap(), Some(true));
    }

    #[test]
    fn string_equivalence_is_insensitive() {
        assert!(values_equivalent(
            &Value::string("Hello   World"),
            &Value::string("hello world")
        ));
        assert!(!values_equivalent(
            &Value::string("hello"),
            &Value::string("world")
        ));
    }

    #[test]
    fn collection_equivalence_ignores_order() {
        let mut a = Collection::empty();
        a.push(Value::integer(1));
        a.push(Value::integer(2));
        let mut b = Collection::empty();
        b.push(Value::integer(2));
        b.push(Value::integer(1));
        assert!(collections_equivalent(&a, &b));
    }

    #[test]
    fn division_by_zero_is_empty() {
        let five = one(Value::integer(5));
        let zero = one(Value::integer(0));
        assert!(arithmetic(BinaryOperator::Div, &five, &zero).unwrap().is_empty());
        assert!(arithmetic(BinaryOperator::TruncDiv, &five, &zero).unwrap().is_empty());
        assert!(arithmetic(BinaryOperator::Mod, &five, &zero).unwrap().is_empty());
    }

    #[test]
    fn integer_overflow_is_an_error() {
        let max = one(Value::integer(i32::MAX));
        let one_ = one(Value::integer(1));
        assert!(arithmetic(BinaryOperator::Add, &max, &one_).is_err());
    }

    #[test]
    fn integer_division_yields_decimal() {
        let a = one(Value::integer(1));
        let b = one(Value::integer(2));
        let out = arithmetic(BinaryOperator::Div, &a, &b).unwrap();
        assert!(matches!(
            out.first().unwrap().data(),
            ValueData::Decimal(d) if *d == Decimal::from_str("0.5").unwrap()
        ));
    }

    #[test]
    fn mod_follows_dividend_sign() {
        let a = one(Value::integer(-7));
        let b = one(Value::integer(3));
        let out = arithmetic(BinaryOperator::Mod, &a, &b).unwrap();
        assert!(matches!(out.first().unwrap().data(), ValueData::Integer(-1)));
    }

    #[test]
    fn date_plus_calendar_quantity() {
        let birth = one(date("1990-05-27"));
        let years = one(Value::quantity(rust_decimal::Decimal::from(23), "years"));
        let out = arithmetic(BinaryOperator::Add, &birth, &years).unwrap();
        match out.first().unwrap().data() {
            ValueData::Date { value, .. } => {
                assert_eq!(*value, NaiveDate::from_ymd_opt(2013, 5, 27).unwrap());
            }
            other => panic!("expected Date, got {other:?}"),
        }
    }

    #[test]
    fn month_arithmetic_clamps_day() {
        let d = one(date("2015-01-31"));
        let months = one(Value::quantity(rust_decimal::Decimal::from(1), "month"));
        let out = arithmetic(BinaryOperator::Add, &d, &months).unwrap();
        match out.first().unwrap().data() {
            ValueData::Date { value, .. } => {
                assert_eq!(*value, NaiveDate::from_ymd_opt(2015, 2, 28).unwrap());
            }
            other => panic!("expected Date, got {other:?}"),
        }
    }

    #[test]
    fn concat_coerces_empty() {
        let hello = one(Value::string("hello"));
        let empty = Collection::empty();
        let out = concat(&hello, &empty).unwrap();
        assert_eq!(
            out.singleton_string("test").unwrap().unwrap().as_ref(),
            "hello"
        );
    }

    #[test]
    fn three_valued_tables() {
        // and
        assert!(and(Some(false), None).singleton_boolean("t").unwrap() == Some(false));
        assert!(and(None, Some(true)).is_empty());
        // or
        assert!(or(None, Some(true)).singleton_boolean("t").unwrap() == Some(true));
        assert!(or(Some(false), None).is_empty());
        // xor
        assert!(xor(None, Some(true)).is_empty());
        assert!(xor(Some(true), Some(false)).singleton_boolean("t").unwrap() == Some(true));
        // implies
        assert!(implies(Some(false), None).singleton_boolean("t").unwrap() == Some(true));
        assert!(implies(None, Some(true)).singleton_boolean("t").unwrap() == Some(true));
        assert!(implies(Some(true), None).is_empty());
    }

    #[test]
    fn union_dedups_in_order() {
        let mut a = Collection::empty();
        a.push(Value::integer(1));
        a.push(Value::integer(2));
        let mut b = Collection::empty();
        b.push(Value::integer(2));
        b.push(Value::integer(3));
        let u = union(&a, &b);
        assert_eq!(u.len(), 3);
        assert!(matches!(u.get(0).unwrap().data(), ValueData::Integer(1)));
        assert!(matches!(u.get(2).unwrap().data(), ValueData::Integer(3)));
    }

    #[test]
    fn ordering_with_precision_mismatch_is_empty() {
        let l = one(date("2000-01"));
        let r = one(date("2000-01-03"));
        assert!(ordering(BinaryOperator::Lt, &l, &r).unwrap().is_empty());
        // Determinate when the shared prefix differs.
        let r2 = one(date("2001-06-03"));
        let out = ordering(BinaryOperator::Lt, &l, &r2).unwrap();
        assert_eq!(out.singleton_boolean("t").unwrap(), Some(true));
    }

    #[test]
    fn ordering_rejects_incompatible_types() {
        let b = one(Value::boolean(true));
        assert!(ordering(BinaryOperator::Lt, &b, &b).is_err());
    }
}
