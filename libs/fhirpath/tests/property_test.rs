//! Property tests for the collection invariants and conversion round-trips.

use helix_fhirpath::{Collection, CompileOptions, Engine, EvalOptions, Value, ValueData};
use quickcheck::{QuickCheck, TestResult};

fn eval(source: &str, input: Collection) -> Collection {
    let engine = Engine::new();
    let expr = engine
        .compile(source, CompileOptions::new())
        .expect("compile failure");
    expr.evaluate(input, EvalOptions::new()).expect("eval failure")
}

fn ints(values: &[i32]) -> Collection {
    values.iter().map(|i| Value::integer(*i)).collect()
}

#[test]
fn where_true_is_identity() {
    fn prop(values: Vec<i32>) -> bool {
        let input = ints(&values);
        let out = eval("where(true)", input.clone());
        out.len() == input.len()
            && out
                .iter()
                .zip(input.iter())
                .all(|(a, b)| a == b)
    }
    QuickCheck::new().tests(50).quickcheck(prop as fn(Vec<i32>) -> bool);
}

#[test]
fn where_false_is_empty() {
    fn prop(values: Vec<i32>) -> bool {
        eval("where(false)", ints(&values)).is_empty()
    }
    QuickCheck::new().tests(50).quickcheck(prop as fn(Vec<i32>) -> bool);
}

#[test]
fn first_agrees_with_take_one() {
    fn prop(values: Vec<i32>) -> bool {
        let first = eval("first()", ints(&values));
        let take = eval("take(1)", ints(&values));
        first.len() == take.len()
            && first.iter().zip(take.iter()).all(|(a, b)| a == b)
    }
    QuickCheck::new().tests(50).quickcheck(prop as fn(Vec<i32>) -> bool);
}

#[test]
fn combine_adds_counts() {
    fn prop(values: Vec<i32>) -> bool {
        let input = ints(&values);
        let out = eval("combine(%context)", input.clone());
        out.len() == input.len() * 2
    }
    QuickCheck::new().tests(50).quickcheck(prop as fn(Vec<i32>) -> bool);
}

#[test]
fn distinct_shrinks_and_is_distinct() {
    fn prop(values: Vec<i32>) -> bool {
        let input = ints(&values);
        let deduped = eval("distinct()", input.clone());
        if deduped.len() > input.len() {
            return false;
        }
        let check = eval("distinct().isDistinct()", input);
        check.singleton_boolean("prop").unwrap() == Some(true)
    }
    QuickCheck::new().tests(50).quickcheck(prop as fn(Vec<i32>) -> bool);
}

#[test]
fn integer_string_round_trip() {
    fn prop(i: i32) -> bool {
        let source = format!("'{i}'.toInteger().toString()");
        let out = eval(&source, Collection::empty());
        match out.first().map(|v| v.data().clone()) {
            Some(ValueData::String(s)) => s.as_ref() == i.to_string(),
            _ => false,
        }
    }
    QuickCheck::new().tests(100).quickcheck(prop as fn(i32) -> bool);
}

#[test]
fn date_string_round_trip() {
    fn prop(year: u16, month: u8, day: u8) -> TestResult {
        let year = 1900 + (year % 200) as i32;
        let month = 1 + (month % 12) as u32;
        let day = 1 + (day % 28) as u32;
        let literal = format!("@{year:04}-{month:02}-{day:02}");
        let source = format!("{literal}.toString().toDate() = {literal}");
        let out = eval(&source, Collection::empty());
        match out.singleton_boolean("prop") {
            Ok(Some(true)) => TestResult::passed(),
            _ => TestResult::failed(),
        }
    }
    QuickCheck::new()
        .tests(100)
        .quickcheck(prop as fn(u16, u8, u8) -> TestResult);
}

#[test]
fn union_never_exceeds_combined_count() {
    fn prop(a: Vec<i32>, b: Vec<i32>) -> bool {
        let mut input = ints(&a);
        for v in &b {
            input.push(Value::integer(*v));
        }
        let union = eval("%context | %context", input.clone());
        union.len() <= input.len()
    }
    QuickCheck::new()
        .tests(50)
        .quickcheck(prop as fn(Vec<i32>, Vec<i32>) -> bool);
}
