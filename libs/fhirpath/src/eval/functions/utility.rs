//! Utility functions: `not()`, the temporal context (`now()`, `today()`,
//! `timeOfDay()`), `trace()`, `hasValue()`, `extension()`, `resolve()`, and
//! `memberOf()`.

use chrono::Timelike;
use serde_json::Value as JsonValue;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::eval::navigate::convert;
use crate::eval::operations::boolean_operand;
use crate::reference::stringify_resolve_input;
use crate::terminology::{extract_result, ValueSetValidateCodeOptions};
use crate::value::{
    Collection, DateTimePrecision, DatePrecision, TimePrecision, Value, ValueData,
};

pub fn not(input: &Collection) -> Result<Collection> {
    match boolean_operand(input, "not()")? {
        Some(b) => Ok(Collection::singleton(Value::boolean(!b))),
        None => Ok(Collection::empty()),
    }
}

/// `now()`: the context snapshot, millisecond precision, UTC.
pub fn now(ctx: &Context) -> Result<Collection> {
    Ok(Collection::singleton(Value::datetime(
        ctx.now,
        DateTimePrecision::Millisecond,
        Some(0),
    )))
}

pub fn today(ctx: &Context) -> Result<Collection> {
    Ok(Collection::singleton(Value::date(
        ctx.now.date_naive(),
        DatePrecision::Day,
    )))
}

pub fn time_of_day(ctx: &Context) -> Result<Collection> {
    let time = ctx
        .now
        .time()
        .with_nanosecond(ctx.now.time().nanosecond() / 1_000_000 * 1_000_000)
        .unwrap_or_else(|| ctx.now.time());
    Ok(Collection::singleton(Value::time(
        time,
        TimePrecision::Millisecond,
    )))
}

/// `trace(name[, projection])`: identity on the input; the traced values
/// (the projection result when given, the input otherwise) go to the sink.
pub fn trace(
    ctx: &Context,
    input: &Collection,
    name: &Collection,
    projected: Option<Collection>,
) -> Result<Collection> {
    let name = name
        .singleton_string("trace() name")?
        .ok_or_else(|| Error::WrongType("trace() requires a name".into()))?;
    let traced = projected.unwrap_or_else(|| input.clone());
    ctx.trace_sink.emit(&name, &traced);
    Ok(input.clone())
}

/// `hasValue()`: true iff the input is a single FHIR primitive carrying a
/// value. Elements (including `_field` companions that carry only
/// extensions) are not values.
pub fn has_value(input: &Collection) -> Result<Collection> {
    let result = input.len() == 1
        && input
            .first()
            .map(|v| !matches!(v.data(), ValueData::Element { .. }))
            .unwrap_or(false);
    Ok(Collection::singleton(Value::boolean(result)))
}

/// `extension(url)`: sugar for `extension.where(url = <url>)`.
pub fn extension(input: &Collection, url: &Collection) -> Result<Collection> {
    let Some(url) = url.singleton_string("extension() url")? else {
        return Ok(Collection::empty());
    };
    let mut out = Collection::empty();
    for item in input.iter() {
        let Some(json) = item.as_json() else {
            continue;
        };
        let Some(JsonValue::Array(extensions)) = json.get("extension") else {
            continue;
        };
        for ext in extensions {
            if ext.get("url").and_then(|u| u.as_str()) == Some(url.as_ref()) {
                out.extend(&convert(ext, Some("Extension")));
            }
        }
    }
    Ok(out)
}

/// `resolve()`: locate the target of each reference in the input.
///
/// `#id` fragments resolve against the `contained` entries of the evaluation
/// root. Everything else is stringified (non-reference kinds silently drop)
/// and handed to the configured resolver in one batch; remaining references
/// without a resolver are an error.
pub fn resolve(ctx: &Context, input: &Collection) -> Result<Collection> {
    if input.is_empty() {
        return Ok(Collection::empty());
    }

    let mut fragments: Vec<String> = Vec::new();
    let mut external: Vec<String> = Vec::new();
    for item in input.iter() {
        if let Some(reference) = stringify_resolve_input(item) {
            if let Some(id) = reference.strip_prefix('#') {
                fragments.push(id.to_string());
            } else {
                external.push(reference);
            }
        }
    }

    let mut out = Collection::empty();
    for id in &fragments {
        if let Some(resource) = find_contained(ctx, id) {
            out.push(resource);
        }
    }

    if external.is_empty() {
        return Ok(out);
    }
    let Some(resolver) = &ctx.resolver else {
        return Err(Error::UnconfiguredResolver);
    };
    ctx.cancellation.check()?;
    for resource in resolver.resolve(&external)? {
        out.push(resource);
    }
    Ok(out)
}

fn find_contained(ctx: &Context, id: &str) -> Option<Value> {
    for root in ctx.input.iter() {
        let Some(contained) = root
            .as_json()
            .and_then(|json| json.get("contained"))
            .and_then(|c| c.as_array())
        else {
            continue;
        };
        for resource in contained {
            if resource.get("id").and_then(|v| v.as_str()) == Some(id) {
                let converted = convert(resource, Some("Resource"));
                return converted.first().cloned();
            }
        }
    }
    None
}

/// `memberOf(valueSet)`: value-set membership of a singleton Coding or
/// CodeableConcept via the terminology service.
pub fn member_of(ctx: &Context, input: &Collection, value_set: &Collection) -> Result<Collection> {
    if input.is_empty() {
        return Ok(Collection::empty());
    }
    let value_set = value_set
        .singleton_string("memberOf() argument")?
        .ok_or_else(|| Error::WrongType("memberOf() requires a value set id".into()))?;

    let Some(item) = input.singleton_value("memberOf()")? else {
        return Ok(Collection::empty());
    };
    let Some(json) = item.as_json() else {
        return Err(Error::WrongType(
            "memberOf() must be called on a Coding or CodeableConcept".into(),
        ));
    };

    // A CodeableConcept is true when any of its codings is a member.
    let codings: Vec<&JsonValue> = match json.get("coding").and_then(|c| c.as_array()) {
        Some(codings) => codings.iter().collect(),
        None => vec![json.as_ref()],
    };

    let mut result = false;
    for coding in codings {
        let system = coding.get("system").and_then(|s| s.as_str()).unwrap_or("");
        let code = coding.get("code").and_then(|c| c.as_str()).unwrap_or("");
        // Codes without a system are not checked.
        if system.is_empty() {
            continue;
        }
        if validate_coding(ctx, system, code, &value_set)? {
            result = true;
            break;
        }
    }
    Ok(Collection::singleton(Value::boolean(result)))
}

fn validate_coding(ctx: &Context, system: &str, code: &str, value_set: &str) -> Result<bool> {
    let Some(service) = &ctx.terminology else {
        return Err(Error::UnconfiguredTerminologyService);
    };
    ctx.cancellation.check()?;
    let response = service.value_set_validate_code(&ValueSetValidateCodeOptions {
        id: value_set.to_string(),
        system: system.to_string(),
        code: code.to_string(),
        date: None,
        value_set_version: None,
    })?;
    Ok(extract_result(&response).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CollectingSink;
    use serde_json::json;
    use std::sync::Arc;

    fn ctx() -> Context {
        Context::new(Collection::empty())
    }

    #[test]
    fn not_is_three_valued() {
        let t = Collection::singleton(Value::boolean(true));
        assert_eq!(not(&t).unwrap().singleton_boolean("t").unwrap(), Some(false));
        assert!(not(&Collection::empty()).unwrap().is_empty());
    }

    #[test]
    fn temporal_context_is_deterministic() {
        let ctx = ctx();
        let a = now(&ctx).unwrap();
        let b = now(&ctx).unwrap();
        assert_eq!(crate::eval::operations::equality(&a, &b).unwrap(), Some(true));
        assert_eq!(today(&ctx).unwrap().len(), 1);
        assert_eq!(time_of_day(&ctx).unwrap().len(), 1);
    }

    #[test]
    fn trace_is_identity_and_emits() {
        let sink = Arc::new(CollectingSink::new());
        let mut ctx = ctx();
        ctx.trace_sink = sink.clone();
        let input: Collection = [1, 2].iter().map(|i| Value::integer(*i)).collect();
        let name = Collection::singleton(Value::string("here"));
        let out = trace(&ctx, &input, &name, None).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(sink.events(), vec![("here".to_string(), 2)]);
    }

    #[test]
    fn has_value_distinguishes_primitives() {
        let prim = Collection::singleton(Value::string("x"));
        assert_eq!(has_value(&prim).unwrap().singleton_boolean("t").unwrap(), Some(true));
        let elem = Collection::singleton(Value::from_json(&json!({"extension": []})).unwrap());
        assert_eq!(has_value(&elem).unwrap().singleton_boolean("t").unwrap(), Some(false));
        assert_eq!(
            has_value(&Collection::empty()).unwrap().singleton_boolean("t").unwrap(),
            Some(false)
        );
    }

    #[test]
    fn extension_filters_by_url() {
        let v = Value::from_json(&json!({
            "extension": [
                {"url": "http://a", "valueString": "one"},
                {"url": "http://b", "valueString": "two"}
            ]
        }))
        .unwrap();
        let url = Collection::singleton(Value::string("http://a"));
        let out = extension(&Collection::singleton(v), &url).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.first().unwrap().element_type(), Some("Extension"));
    }

    #[test]
    fn resolve_without_resolver_errors() {
        let ctx = ctx();
        let input = Collection::singleton(Value::string("Patient/123"));
        assert_eq!(resolve(&ctx, &input), Err(Error::UnconfiguredResolver));
        // Nothing resolvable: no error.
        let input = Collection::singleton(Value::integer(5));
        assert!(resolve(&ctx, &input).unwrap().is_empty());
    }

    #[test]
    fn resolve_contained_fragments() {
        let root = Value::resource(Arc::new(json!({
            "resourceType": "Observation",
            "contained": [{"resourceType": "Patient", "id": "p1"}]
        })));
        let ctx = Context::new(Collection::singleton(root));
        let input = Collection::singleton(Value::string("#p1"));
        let out = resolve(&ctx, &input).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.first().unwrap().element_type(), Some("Patient"));
    }

    #[test]
    fn member_of_without_service_errors() {
        let ctx = ctx();
        let coding =
            Value::from_json(&json!({"system": "http://loinc.org", "code": "1234-5"})).unwrap();
        let vs = Collection::singleton(Value::string("vs1"));
        assert_eq!(
            member_of(&ctx, &Collection::singleton(coding), &vs),
            Err(Error::UnconfiguredTerminologyService)
        );
    }
}
