//! Conversion functions: `toString()`, `toInteger()`, `toDecimal()`,
//! `toBoolean()`, `toDate()`, `toDateTime()`, `toTime()`, `toQuantity()`
//! and the `convertsTo*` companions. Conversion failures produce empty, not
//! errors; multi-element inputs are arity errors.

use std::str::FromStr;

use chrono::Timelike;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::eval::operations::normalize_unit;
use crate::temporal;
use crate::value::{
    Collection, DatePrecision, DateTimePrecision, TimePrecision, Value, ValueData,
};

/// Format a timezone suffix for a fixed offset (seconds east of UTC).
fn format_timezone_suffix(offset_secs: i32) -> String {
    if offset_secs == 0 {
        return "Z".to_string();
    }
    let sign = if offset_secs < 0 { '-' } else { '+' };
    let abs = offset_secs.abs();
    format!("{}{:02}:{:02}", sign, abs / 3600, (abs % 3600) / 60)
}

/// Canonical string rendering of a value. Elements don't stringify.
pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value.data() {
        ValueData::Boolean(b) => Some(b.to_string()),
        ValueData::Integer(i) => Some(i.to_string()),
        ValueData::Decimal(d) => Some(d.to_string()),
        ValueData::String(s) => Some(s.to_string()),
        ValueData::Date { value, precision } => Some(match precision {
            DatePrecision::Year => value.format("%Y").to_string(),
            DatePrecision::Month => value.format("%Y-%m").to_string(),
            DatePrecision::Day => value.format("%Y-%m-%d").to_string(),
        }),
        ValueData::DateTime {
            value,
            precision,
            timezone_offset,
        } => {
            let (core, with_tz) = match precision {
                DateTimePrecision::Year => (value.format("%Y").to_string(), false),
                DateTimePrecision::Month => (value.format("%Y-%m").to_string(), false),
                DateTimePrecision::Day => (value.format("%Y-%m-%d").to_string(), false),
                DateTimePrecision::Hour => (value.format("%Y-%m-%dT%H").to_string(), true),
                DateTimePrecision::Minute => (value.format("%Y-%m-%dT%H:%M").to_string(), true),
                DateTimePrecision::Second => {
                    (value.format("%Y-%m-%dT%H:%M:%S").to_string(), true)
                }
                DateTimePrecision::Millisecond => (
                    format!(
                        "{}.{:03}",
                        value.format("%Y-%m-%dT%H:%M:%S"),
                        value.nanosecond() / 1_000_000
                    ),
                    true,
                ),
            };
            match (with_tz, timezone_offset) {
                (true, Some(offset)) => Some(format!("{core}{}", format_timezone_suffix(*offset))),
                _ => Some(core),
            }
        }
        ValueData::Time { value, precision } => Some(match precision {
            TimePrecision::Hour => value.format("%H").to_string(),
            TimePrecision::Minute => value.format("%H:%M").to_string(),
            TimePrecision::Second => value.format("%H:%M:%S").to_string(),
            TimePrecision::Millisecond => format!(
                "{}.{:03}",
                value.format("%H:%M:%S"),
                value.nanosecond() / 1_000_000
            ),
        }),
        ValueData::Quantity { value, unit } => Some(format!("{value} '{unit}'")),
        ValueData::Element { .. } => None,
    }
}

fn singleton<'a>(input: &'a Collection, what: &str) -> Result<Option<&'a Value>> {
    input.singleton_value(what)
}

fn converted(out: Option<Value>) -> Result<Collection> {
    Ok(out.map(Collection::singleton).unwrap_or_else(Collection::empty))
}

pub fn to_string_fn(input: &Collection) -> Result<Collection> {
    let Some(v) = singleton(input, "toString()")? else {
        return Ok(Collection::empty());
    };
    converted(value_to_string(v).map(Value::string))
}

pub fn to_integer(input: &Collection) -> Result<Collection> {
    let Some(v) = singleton(input, "toInteger()")? else {
        return Ok(Collection::empty());
    };
    let out = match v.data() {
        ValueData::Integer(i) => Some(Value::integer(*i)),
        ValueData::Boolean(b) => Some(Value::integer(if *b { 1 } else { 0 })),
        ValueData::String(s) => i32::from_str(s.trim()).ok().map(Value::integer),
        _ => None,
    };
    converted(out)
}

pub fn to_decimal(input: &Collection) -> Result<Collection> {
    let Some(v) = singleton(input, "toDecimal()")? else {
        return Ok(Collection::empty());
    };
    let out = match v.data() {
        ValueData::Decimal(d) => Some(Value::decimal(*d)),
        ValueData::Integer(i) => Some(Value::decimal(Decimal::from(*i))),
        ValueData::Boolean(b) => Some(Value::decimal(Decimal::from(u8::from(*b)))),
        ValueData::String(s) => Decimal::from_str(s.trim()).ok().map(Value::decimal),
        _ => None,
    };
    converted(out)
}

pub fn to_boolean(input: &Collection) -> Result<Collection> {
    let Some(v) = singleton(input, "toBoolean()")? else {
        return Ok(Collection::empty());
    };
    let out = match v.data() {
        ValueData::Boolean(b) => Some(Value::boolean(*b)),
        ValueData::Integer(1) => Some(Value::boolean(true)),
        ValueData::Integer(0) => Some(Value::boolean(false)),
        ValueData::Decimal(d) if *d == Decimal::ONE => Some(Value::boolean(true)),
        ValueData::Decimal(d) if d.is_zero() => Some(Value::boolean(false)),
        ValueData::String(s) => match s.to_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" | "1.0" => Some(Value::boolean(true)),
            "false" | "f" | "no" | "n" | "0" | "0.0" => Some(Value::boolean(false)),
            _ => None,
        },
        _ => None,
    };
    converted(out)
}

pub fn to_date(input: &Collection) -> Result<Collection> {
    let Some(v) = singleton(input, "toDate()")? else {
        return Ok(Collection::empty());
    };
    let out = match v.data() {
        ValueData::Date { value, precision } => Some(Value::date(*value, *precision)),
        ValueData::DateTime { value, precision, .. } => {
            let date_precision = match precision {
                DateTimePrecision::Year => DatePrecision::Year,
                DateTimePrecision::Month => DatePrecision::Month,
                _ => DatePrecision::Day,
            };
            Some(Value::date(value.date_naive(), date_precision))
        }
        ValueData::String(s) => {
            temporal::parse_date(s).map(|(d, p)| Value::date(d, p)).or_else(|| {
                // A full dateTime string converts through its date part.
                temporal::parse_datetime(s).map(|(dt, p, _)| {
                    let date_precision = match p {
                        DateTimePrecision::Year => DatePrecision::Year,
                        DateTimePrecision::Month => DatePrecision::Month,
                        _ => DatePrecision::Day,
                    };
                    Value::date(dt.date_naive(), date_precision)
                })
            })
        }
        _ => None,
    };
    converted(out)
}

pub fn to_datetime(input: &Collection) -> Result<Collection> {
    let Some(v) = singleton(input, "toDateTime()")? else {
        return Ok(Collection::empty());
    };
    let out = match v.data() {
        ValueData::DateTime {
            value,
            precision,
            timezone_offset,
        } => Some(Value::datetime(*value, *precision, *timezone_offset)),
        ValueData::Date { value, precision } => value.and_hms_opt(0, 0, 0).map(|naive| {
            let utc =
                chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(naive, chrono::Utc);
            Value::datetime(utc, precision.as_datetime_precision(), None)
        }),
        ValueData::String(s) => temporal::parse_datetime(s)
            .map(|(dt, p, tz)| Value::datetime(dt, p, tz)),
        _ => None,
    };
    converted(out)
}

pub fn to_time(input: &Collection) -> Result<Collection> {
    let Some(v) = singleton(input, "toTime()")? else {
        return Ok(Collection::empty());
    };
    let out = match v.data() {
        ValueData::Time { value, precision } => Some(Value::time(*value, *precision)),
        ValueData::String(s) => temporal::parse_time(s).map(|(t, p)| Value::time(t, p)),
        _ => None,
    };
    converted(out)
}

/// `toQuantity([unit])`: a requested unit filters (and may relabel) the
/// result; incompatible units convert to empty.
pub fn to_quantity(input: &Collection, unit_arg: Option<&Collection>) -> Result<Collection> {
    let Some(v) = singleton(input, "toQuantity()")? else {
        return Ok(Collection::empty());
    };

    let requested: Option<String> = match unit_arg {
        Some(arg) => match arg.singleton_string("toQuantity() unit argument")? {
            Some(u) => Some(u.to_string()),
            None => None,
        },
        None => None,
    };

    let out = match v.data() {
        ValueData::Quantity { value, unit } => Some((*value, unit.to_string())),
        ValueData::Integer(i) => Some((Decimal::from(*i), "1".to_string())),
        ValueData::Decimal(d) => Some((*d, "1".to_string())),
        ValueData::Boolean(b) => Some((Decimal::from(u8::from(*b)), "1".to_string())),
        ValueData::String(s) => parse_quantity_string(s),
        _ => None,
    };

    let out = match (out, requested) {
        (Some((value, unit)), Some(requested)) => {
            if normalize_unit(&unit) == normalize_unit(&requested) || unit == "1" {
                Some(Value::quantity(value, requested))
            } else {
                None
            }
        }
        (Some((value, unit)), None) => Some(Value::quantity(value, unit)),
        (None, _) => None,
    };
    converted(out)
}

/// `"5.4 'mg'"`, `"5 days"`, or a bare number.
fn parse_quantity_string(s: &str) -> Option<(Decimal, String)> {
    let s = s.trim();
    let (number, rest) = match s.find(char::is_whitespace) {
        Some(idx) => (&s[..idx], s[idx..].trim_start()),
        None => (s, ""),
    };
    let value = Decimal::from_str(number).ok()?;
    if rest.is_empty() {
        return Some((value, "1".to_string()));
    }
    let unit = if rest.starts_with('\'') && rest.ends_with('\'') && rest.len() >= 2 {
        &rest[1..rest.len() - 1]
    } else {
        // Calendar keywords appear unquoted.
        match rest {
            "year" | "years" | "month" | "months" | "week" | "weeks" | "day" | "days"
            | "hour" | "hours" | "minute" | "minutes" | "second" | "seconds"
            | "millisecond" | "milliseconds" => rest,
            _ => return None,
        }
    };
    Some((value, unit.to_string()))
}

/// Shared `convertsTo*` scaffolding: the predicate is "the conversion yields
/// a value"; empty input stays empty.
fn converts(
    input: &Collection,
    convert: impl Fn(&Collection) -> Result<Collection>,
) -> Result<Collection> {
    if input.is_empty() {
        return Ok(Collection::empty());
    }
    let out = convert(input)?;
    Ok(Collection::singleton(Value::boolean(!out.is_empty())))
}

pub fn converts_to_boolean(input: &Collection) -> Result<Collection> {
    converts(input, to_boolean)
}

pub fn converts_to_integer(input: &Collection) -> Result<Collection> {
    converts(input, to_integer)
}

pub fn converts_to_decimal(input: &Collection) -> Result<Collection> {
    converts(input, to_decimal)
}

pub fn converts_to_string(input: &Collection) -> Result<Collection> {
    converts(input, to_string_fn)
}

pub fn converts_to_date(input: &Collection) -> Result<Collection> {
    converts(input, to_date)
}

pub fn converts_to_datetime(input: &Collection) -> Result<Collection> {
    converts(input, to_datetime)
}

pub fn converts_to_time(input: &Collection) -> Result<Collection> {
    converts(input, to_time)
}

pub fn converts_to_quantity(
    input: &Collection,
    unit_arg: Option<&Collection>,
) -> Result<Collection> {
    converts(input, |c| to_quantity(c, unit_arg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(v: Value) -> Collection {
        Collection::singleton(v)
    }

    #[test]
    fn string_round_trips_for_integers() {
        let out = to_string_fn(&one(Value::integer(42))).unwrap();
        assert_eq!(out.singleton_string("t").unwrap().unwrap().as_ref(), "42");
        let back = to_integer(&one(Value::string("42"))).unwrap();
        assert_eq!(back.singleton_integer("t").unwrap(), Some(42));
    }

    #[test]
    fn date_formatting_respects_precision() {
        let (d, p) = temporal::parse_date("2014-06").unwrap();
        let out = to_string_fn(&one(Value::date(d, p))).unwrap();
        assert_eq!(out.singleton_string("t").unwrap().unwrap().as_ref(), "2014-06");
    }

    #[test]
    fn datetime_formatting_includes_offset() {
        let (dt, p, tz) = temporal::parse_datetime("2015-02-04T14:30:00+01:00").unwrap();
        let out = to_string_fn(&one(Value::datetime(dt, p, tz))).unwrap();
        assert_eq!(
            out.singleton_string("t").unwrap().unwrap().as_ref(),
            "2015-02-04T14:30:00+01:00"
        );
    }

    #[test]
    fn boolean_string_forms() {
        for s in ["true", "t", "yes", "y", "1", "1.0"] {
            let out = to_boolean(&one(Value::string(s))).unwrap();
            assert_eq!(out.singleton_boolean("t").unwrap(), Some(true), "{s}");
        }
        assert!(to_boolean(&one(Value::string("maybe"))).unwrap().is_empty());
    }

    #[test]
    fn decimal_does_not_convert_to_integer() {
        let out = to_integer(&one(Value::decimal(Decimal::from_str("1.5").unwrap()))).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn quantity_parsing() {
        let out = to_quantity(&one(Value::string("4.5 'mg'")), None).unwrap();
        assert!(matches!(
            out.first().unwrap().data(),
            ValueData::Quantity { .. }
        ));
        let out = to_quantity(&one(Value::string("5 days")), None).unwrap();
        assert_eq!(out.len(), 1);
        assert!(to_quantity(&one(Value::string("5 bananas")), None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn to_quantity_unit_coercion() {
        let q = one(Value::quantity(Decimal::from(5), "mg"));
        // Same unit: relabeled.
        let out = to_quantity(&q, Some(&one(Value::string("mg")))).unwrap();
        assert_eq!(out.len(), 1);
        // Different unit: empty.
        let out = to_quantity(&q, Some(&one(Value::string("mL")))).unwrap();
        assert!(out.is_empty());
        // Unitless coerces to any requested unit.
        let n = one(Value::integer(5));
        let out = to_quantity(&n, Some(&one(Value::string("mg")))).unwrap();
        assert!(matches!(
            out.first().unwrap().data(),
            ValueData::Quantity { unit, .. } if unit.as_ref() == "mg"
        ));
    }

    #[test]
    fn converts_predicates() {
        assert_eq!(
            converts_to_integer(&one(Value::string("12")))
                .unwrap()
                .singleton_boolean("t")
                .unwrap(),
            Some(true)
        );
        assert_eq!(
            converts_to_integer(&one(Value::string("twelve")))
                .unwrap()
                .singleton_boolean("t")
                .unwrap(),
            Some(false)
        );
        assert!(converts_to_integer(&Collection::empty()).unwrap().is_empty());
    }

    #[test]
    fn multi_element_input_is_arity_error() {
        let mut c = Collection::empty();
        c.push(Value::integer(1));
        c.push(Value::integer(2));
        assert!(to_string_fn(&c).is_err());
    }
}
