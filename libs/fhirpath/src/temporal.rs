//! Parsing of FHIR date, dateTime, and time strings into typed values with
//! precision flags. Used by the parser for `@` literals, by the conversion
//! functions (`toDate()` and friends), and by the lenient string coercion in
//! comparison operators.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::value::{DatePrecision, DateTimePrecision, TimePrecision, Value};

/// Parse `YYYY[-MM[-DD]]`.
pub(crate) fn parse_date(input: &str) -> Option<(NaiveDate, DatePrecision)> {
    let s = input.trim();
    match s.len() {
        4 => {
            let date = NaiveDate::parse_from_str(&format!("{s}-01-01"), "%Y-%m-%d").ok()?;
            Some((date, DatePrecision::Year))
        }
        7 => {
            let date = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d").ok()?;
            Some((date, DatePrecision::Month))
        }
        10 => {
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
            Some((date, DatePrecision::Day))
        }
        _ => None,
    }
}

/// Parse `HH[:MM[:SS[.fff]]]`.
pub(crate) fn parse_time(input: &str) -> Option<(NaiveTime, TimePrecision)> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    let precision = if s.contains('.') {
        TimePrecision::Millisecond
    } else if s.matches(':').count() >= 2 {
        TimePrecision::Second
    } else if s.contains(':') {
        TimePrecision::Minute
    } else {
        TimePrecision::Hour
    };

    let value = NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .or_else(|_| NaiveTime::parse_from_str(s, "%H"))
        .ok()?;

    Some((value, precision))
}

/// Parse a dateTime string: `YYYY[-MM[-DD[T HH[:MM[:SS[.fff]]][tz]]]]`.
///
/// Date-only input is accepted (FHIR dateTime fields may carry date-only
/// precision). The returned instant is UTC-normalized; the offset records
/// what the source carried.
pub(crate) fn parse_datetime(
    input: &str,
) -> Option<(DateTime<Utc>, DateTimePrecision, Option<i32>)> {
    let raw = input.trim();
    if raw.is_empty() {
        return None;
    }

    let Some((date_part, rest)) = raw.split_once('T') else {
        let (date, date_prec) = parse_date(raw)?;
        let naive = NaiveDateTime::new(date, NaiveTime::from_hms_opt(0, 0, 0)?);
        let utc = DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc);
        return Some((utc, date_prec.as_datetime_precision(), None));
    };

    let (date, date_prec) = parse_date(date_part)?;

    // A trailing `T` with no time keeps the date's precision (`@2015T`).
    if rest.is_empty() {
        let naive = NaiveDateTime::new(date, NaiveTime::from_hms_opt(0, 0, 0)?);
        let utc = DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc);
        return Some((utc, date_prec.as_datetime_precision(), None));
    }

    let (time_part, tz_offset) = split_timezone(rest)?;
    let (time, precision) = parse_datetime_time(time_part)?;

    let local = NaiveDateTime::new(date, time);
    let utc = match tz_offset {
        Some(offset_secs) => {
            let offset = FixedOffset::east_opt(offset_secs)?;
            offset.from_local_datetime(&local).single()?.with_timezone(&Utc)
        }
        None => DateTime::<Utc>::from_naive_utc_and_offset(local, Utc),
    };

    Some((utc, precision, tz_offset))
}

/// Split a time+timezone tail into the time text and the offset in seconds.
fn split_timezone(rest: &str) -> Option<(&str, Option<i32>)> {
    if let Some(stripped) = rest.strip_suffix('Z') {
        return Some((stripped, Some(0)));
    }

    if let Some(pos) = rest.rfind(['+', '-']) {
        let (time, tz) = rest.split_at(pos);
        let sign = if tz.starts_with('-') { -1 } else { 1 };
        let digits = &tz[1..];
        let (hh, mm) = if let Some((h, m)) = digits.split_once(':') {
            (h, m)
        } else if digits.len() == 4 {
            (&digits[0..2], &digits[2..4])
        } else {
            return None;
        };
        let hours: i32 = hh.parse().ok()?;
        let minutes: i32 = mm.parse().ok()?;
        return Some((time, Some(sign * (hours * 3600 + minutes * 60))));
    }

    Some((rest, None))
}

fn parse_datetime_time(time_part: &str) -> Option<(NaiveTime, DateTimePrecision)> {
    let (main, frac) = match time_part.split_once('.') {
        Some((a, b)) => (a, Some(b)),
        None => (time_part, None),
    };

    let parts: Vec<&str> = main.split(':').collect();
    let (hour_str, minute_str, second_str, precision) = match parts.as_slice() {
        [hh] => (*hh, "0", "0", DateTimePrecision::Hour),
        [hh, mm] => (*hh, *mm, "0", DateTimePrecision::Minute),
        [hh, mm, ss] => (
            *hh,
            *mm,
            *ss,
            if frac.is_some() {
                DateTimePrecision::Millisecond
            } else {
                DateTimePrecision::Second
            },
        ),
        _ => return None,
    };

    let hour: u32 = hour_str.trim().parse().ok()?;
    let minute: u32 = minute_str.trim().parse().ok()?;
    let second: u32 = second_str.trim().parse().ok()?;

    let nanos: u32 = match frac {
        Some(frac) => {
            let digits: String = frac.chars().take(3).collect();
            let padded = format!("{digits:0<3}");
            let ms: u32 = padded.parse().ok()?;
            ms * 1_000_000
        }
        None => 0,
    };

    let time = NaiveTime::from_hms_nano_opt(hour, minute, second, nanos)?;
    Some((time, precision))
}

/// Lenient conversion of a string to the temporal value kind suggested by its
/// shape: dateTime when a `T` is present, time when it leads with a clock
/// pattern, date otherwise.
pub(crate) fn parse_temporal_string(s: &str) -> Option<Value> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s.contains('T') {
        let (dt, prec, tz) = parse_datetime(s)?;
        return Some(Value::datetime(dt, prec, tz));
    }
    if s.contains(':') {
        let (t, prec) = parse_time(s)?;
        return Some(Value::time(t, prec));
    }
    let looks_like_date =
        (s.len() == 4 && s.chars().all(|c| c.is_ascii_digit())) || s.contains('-');
    if looks_like_date {
        let (d, prec) = parse_date(s)?;
        return Some(Value::date(d, prec));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_precisions() {
        let (d, p) = parse_date("2014").unwrap();
        assert_eq!(p, DatePrecision::Year);
        assert_eq!(d, NaiveDate::from_ymd_opt(2014, 1, 1).unwrap());

        let (_, p) = parse_date("2014-06").unwrap();
        assert_eq!(p, DatePrecision::Month);

        let (d, p) = parse_date("2014-06-15").unwrap();
        assert_eq!(p, DatePrecision::Day);
        assert_eq!(d, NaiveDate::from_ymd_opt(2014, 6, 15).unwrap());

        assert!(parse_date("2014-6").is_none());
        assert!(parse_date("not-a-date").is_none());
    }

    #[test]
    fn time_precisions() {
        assert_eq!(parse_time("14").unwrap().1, TimePrecision::Hour);
        assert_eq!(parse_time("14:30").unwrap().1, TimePrecision::Minute);
        assert_eq!(parse_time("14:30:15").unwrap().1, TimePrecision::Second);
        assert_eq!(
            parse_time("14:30:15.250").unwrap().1,
            TimePrecision::Millisecond
        );
    }

    #[test]
    fn datetime_timezone_normalizes_to_utc() {
        let (dt, prec, tz) = parse_datetime("2015-02-04T14:00:00+01:00").unwrap();
        assert_eq!(prec, DateTimePrecision::Second);
        assert_eq!(tz, Some(3600));
        assert_eq!(dt.to_rfc3339(), "2015-02-04T13:00:00+00:00");
    }

    #[test]
    fn datetime_date_only_keeps_date_precision() {
        let (_, prec, tz) = parse_datetime("2012-12-31T").unwrap();
        assert_eq!(prec, DateTimePrecision::Day);
        assert_eq!(tz, None);

        let (_, prec, _) = parse_datetime("2012-12-31").unwrap();
        assert_eq!(prec, DateTimePrecision::Day);
    }

    #[test]
    fn temporal_string_coercion_picks_kind() {
        assert!(matches!(
            parse_temporal_string("1990-05-27").unwrap().data(),
            crate::value::ValueData::Date { .. }
        ));
        assert!(matches!(
            parse_temporal_string("2015-02-04T14:30:00Z").unwrap().data(),
            crate::value::ValueData::DateTime { .. }
        ));
        assert!(matches!(
            parse_temporal_string("14:30:00").unwrap().data(),
            crate::value::ValueData::Time { .. }
        ));
        assert!(parse_temporal_string("hello").is_none());
    }
}
