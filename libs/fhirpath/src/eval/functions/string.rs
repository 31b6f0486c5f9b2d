//! String functions. All operate on a singleton String input (wrong input
//! type is an error, empty input propagates) and are codepoint-aware.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use regex::Regex;

use crate::error::{Error, Result};
use crate::value::{Collection, Value, ValueData};

fn input_string(input: &Collection, what: &str) -> Result<Option<String>> {
    match input.singleton_value(what)? {
        None => Ok(None),
        Some(v) => match v.data() {
            ValueData::String(s) => Ok(Some(s.to_string())),
            _ => Err(Error::WrongType(format!("{what} requires a String input"))),
        },
    }
}

fn arg_string(arg: &Collection, what: &str) -> Result<Option<String>> {
    Ok(arg.singleton_string(what)?.map(|s| s.to_string()))
}

fn str_result(s: String) -> Collection {
    Collection::singleton(Value::string(s))
}

fn bool_result(b: bool) -> Collection {
    Collection::singleton(Value::boolean(b))
}

pub fn starts_with(input: &Collection, prefix: &Collection) -> Result<Collection> {
    let (Some(s), Some(p)) = (
        input_string(input, "startsWith()")?,
        arg_string(prefix, "startsWith() argument")?,
    ) else {
        return Ok(Collection::empty());
    };
    Ok(bool_result(s.starts_with(&p)))
}

pub fn ends_with(input: &Collection, suffix: &Collection) -> Result<Collection> {
    let (Some(s), Some(p)) = (
        input_string(input, "endsWith()")?,
        arg_string(suffix, "endsWith() argument")?,
    ) else {
        return Ok(Collection::empty());
    };
    Ok(bool_result(s.ends_with(&p)))
}

pub fn contains(input: &Collection, substring: &Collection) -> Result<Collection> {
    let (Some(s), Some(p)) = (
        input_string(input, "contains()")?,
        arg_string(substring, "contains() argument")?,
    ) else {
        return Ok(Collection::empty());
    };
    Ok(bool_result(s.contains(&p)))
}

pub fn index_of(input: &Collection, substring: &Collection) -> Result<Collection> {
    let (Some(s), Some(p)) = (
        input_string(input, "indexOf()")?,
        arg_string(substring, "indexOf() argument")?,
    ) else {
        return Ok(Collection::empty());
    };
    let index = match s.find(&p) {
        // Byte offset to codepoint offset.
        Some(byte_idx) => s[..byte_idx].chars().count() as i32,
        None => -1,
    };
    Ok(Collection::singleton(Value::integer(index)))
}

pub fn substring(
    input: &Collection,
    start: &Collection,
    length: Option<&Collection>,
) -> Result<Collection> {
    let Some(s) = input_string(input, "substring()")? else {
        return Ok(Collection::empty());
    };
    let Some(start) = start.singleton_integer("substring() start")? else {
        return Ok(Collection::empty());
    };
    let count = s.chars().count() as i32;
    if start < 0 || start >= count {
        return Ok(Collection::empty());
    }

    let length = match length {
        Some(arg) => arg.singleton_integer("substring() length")?,
        None => None,
    };
    let taken: String = match length {
        Some(len) if len <= 0 => return Ok(Collection::empty()),
        Some(len) => s.chars().skip(start as usize).take(len as usize).collect(),
        None => s.chars().skip(start as usize).collect(),
    };
    Ok(str_result(taken))
}

pub fn upper(input: &Collection) -> Result<Collection> {
    match input_string(input, "upper()")? {
        Some(s) => Ok(str_result(s.to_uppercase())),
        None => Ok(Collection::empty()),
    }
}

pub fn lower(input: &Collection) -> Result<Collection> {
    match input_string(input, "lower()")? {
        Some(s) => Ok(str_result(s.to_lowercase())),
        None => Ok(Collection::empty()),
    }
}

pub fn replace(
    input: &Collection,
    pattern: &Collection,
    substitution: &Collection,
) -> Result<Collection> {
    let (Some(s), Some(p), Some(sub)) = (
        input_string(input, "replace()")?,
        arg_string(pattern, "replace() pattern")?,
        arg_string(substitution, "replace() substitution")?,
    ) else {
        return Ok(Collection::empty());
    };
    Ok(str_result(s.replace(&p, &sub)))
}

fn compile_regex(pattern: &str, what: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| Error::UnsupportedOperation(format!("{what}: invalid regex: {e}")))
}

pub fn matches(input: &Collection, pattern: &Collection) -> Result<Collection> {
    let (Some(s), Some(p)) = (
        input_string(input, "matches()")?,
        arg_string(pattern, "matches() pattern")?,
    ) else {
        return Ok(Collection::empty());
    };
    let re = compile_regex(&p, "matches()")?;
    Ok(bool_result(re.is_match(&s)))
}

pub fn replace_matches(
    input: &Collection,
    pattern: &Collection,
    substitution: &Collection,
) -> Result<Collection> {
    let (Some(s), Some(p), Some(sub)) = (
        input_string(input, "replaceMatches()")?,
        arg_string(pattern, "replaceMatches() pattern")?,
        arg_string(substitution, "replaceMatches() substitution")?,
    ) else {
        return Ok(Collection::empty());
    };
    let re = compile_regex(&p, "replaceMatches()")?;
    Ok(str_result(re.replace_all(&s, sub.as_str()).into_owned()))
}

pub fn length(input: &Collection) -> Result<Collection> {
    match input_string(input, "length()")? {
        Some(s) => Ok(Collection::singleton(Value::integer(
            s.chars().count() as i32
        ))),
        None => Ok(Collection::empty()),
    }
}

pub fn to_chars(input: &Collection) -> Result<Collection> {
    match input_string(input, "toChars()")? {
        Some(s) => Ok(s.chars().map(|c| Value::string(c.to_string())).collect()),
        None => Ok(Collection::empty()),
    }
}

pub fn trim(input: &Collection) -> Result<Collection> {
    match input_string(input, "trim()")? {
        Some(s) => Ok(str_result(s.trim().to_string())),
        None => Ok(Collection::empty()),
    }
}

pub fn split(input: &Collection, separator: &Collection) -> Result<Collection> {
    let (Some(s), Some(sep)) = (
        input_string(input, "split()")?,
        arg_string(separator, "split() separator")?,
    ) else {
        return Ok(Collection::empty());
    };
    if sep.is_empty() {
        return Ok(s.chars().map(|c| Value::string(c.to_string())).collect());
    }
    Ok(s.split(sep.as_str())
        .map(|part| Value::string(part.to_string()))
        .collect())
}

pub fn join(input: &Collection, separator: Option<&Collection>) -> Result<Collection> {
    if input.is_empty() {
        return Ok(Collection::empty());
    }
    let sep = match separator {
        Some(arg) => arg_string(arg, "join() separator")?.unwrap_or_default(),
        None => String::new(),
    };
    let mut parts = Vec::with_capacity(input.len());
    for item in input.iter() {
        match item.data() {
            ValueData::String(s) => parts.push(s.to_string()),
            _ => {
                return Err(Error::WrongType(
                    "join() requires a collection of Strings".into(),
                ))
            }
        }
    }
    Ok(str_result(parts.join(&sep)))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

pub fn encode(input: &Collection, target: &Collection) -> Result<Collection> {
    let (Some(s), Some(target)) = (
        input_string(input, "encode()")?,
        arg_string(target, "encode() target")?,
    ) else {
        return Ok(Collection::empty());
    };
    let encoded = match target.as_str() {
        "base64" => STANDARD.encode(s.as_bytes()),
        "base64url" | "urlbase64" => URL_SAFE.encode(s.as_bytes()),
        "hex" => hex_encode(s.as_bytes()),
        other => {
            return Err(Error::UnsupportedOperation(format!(
                "encode(): unknown encoding '{other}'"
            )))
        }
    };
    Ok(str_result(encoded))
}

pub fn decode(input: &Collection, target: &Collection) -> Result<Collection> {
    let (Some(s), Some(target)) = (
        input_string(input, "decode()")?,
        arg_string(target, "decode() target")?,
    ) else {
        return Ok(Collection::empty());
    };
    let bytes = match target.as_str() {
        "base64" => STANDARD.decode(s.as_bytes()).ok(),
        "base64url" | "urlbase64" => URL_SAFE.decode(s.as_bytes()).ok(),
        "hex" => hex_decode(&s),
        other => {
            return Err(Error::UnsupportedOperation(format!(
                "decode(): unknown encoding '{other}'"
            )))
        }
    };
    // Undecodable input converts to empty, like the other conversions.
    let out = bytes.and_then(|b| String::from_utf8(b).ok());
    Ok(out.map(str_result).unwrap_or_else(Collection::empty))
}

pub fn escape(input: &Collection, target: &Collection) -> Result<Collection> {
    let (Some(s), Some(target)) = (
        input_string(input, "escape()")?,
        arg_string(target, "escape() target")?,
    ) else {
        return Ok(Collection::empty());
    };
    let out = match target.as_str() {
        "html" => html_escape::encode_safe(&s).into_owned(),
        "json" => {
            let quoted = serde_json::to_string(&s)
                .map_err(|e| Error::Internal(format!("json escape: {e}")))?;
            quoted[1..quoted.len() - 1].to_string()
        }
        other => {
            return Err(Error::UnsupportedOperation(format!(
                "escape(): unknown target '{other}'"
            )))
        }
    };
    Ok(str_result(out))
}

pub fn unescape(input: &Collection, target: &Collection) -> Result<Collection> {
    let (Some(s), Some(target)) = (
        input_string(input, "unescape()")?,
        arg_string(target, "unescape() target")?,
    ) else {
        return Ok(Collection::empty());
    };
    let out = match target.as_str() {
        "html" => Some(html_escape::decode_html_entities(&s).into_owned()),
        "json" => serde_json::from_str::<String>(&format!("\"{s}\"")).ok(),
        other => {
            return Err(Error::UnsupportedOperation(format!(
                "unescape(): unknown target '{other}'"
            )))
        }
    };
    Ok(out.map(str_result).unwrap_or_else(Collection::empty))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(s: &str) -> Collection {
        Collection::singleton(Value::string(s))
    }

    fn get(c: Collection) -> String {
        c.singleton_string("t").unwrap().unwrap().to_string()
    }

    #[test]
    fn affix_checks() {
        assert_eq!(
            starts_with(&one("hello"), &one("he")).unwrap().singleton_boolean("t").unwrap(),
            Some(true)
        );
        assert_eq!(
            ends_with(&one("hello"), &one("lo")).unwrap().singleton_boolean("t").unwrap(),
            Some(true)
        );
        assert_eq!(
            contains(&one("hello"), &one("ell")).unwrap().singleton_boolean("t").unwrap(),
            Some(true)
        );
        assert!(starts_with(&Collection::empty(), &one("x")).unwrap().is_empty());
    }

    #[test]
    fn index_of_is_codepoint_aware() {
        let out = index_of(&one("héllo"), &one("llo")).unwrap();
        assert_eq!(out.singleton_integer("t").unwrap(), Some(2));
        let out = index_of(&one("abc"), &one("z")).unwrap();
        assert_eq!(out.singleton_integer("t").unwrap(), Some(-1));
    }

    #[test]
    fn substring_bounds() {
        let start = |i: i32| Collection::singleton(Value::integer(i));
        assert_eq!(get(substring(&one("hello"), &start(1), None).unwrap()), "ello");
        let len = Collection::singleton(Value::integer(2));
        assert_eq!(
            get(substring(&one("hello"), &start(1), Some(&len)).unwrap()),
            "el"
        );
        assert!(substring(&one("hello"), &start(9), None).unwrap().is_empty());
        assert!(substring(&one("hello"), &start(-1), None).unwrap().is_empty());
    }

    #[test]
    fn replace_with_empty_pattern_interleaves() {
        assert_eq!(get(replace(&one("abc"), &one(""), &one("-")).unwrap()), "-a-b-c-");
        assert_eq!(get(replace(&one("abcbd"), &one("b"), &one("x")).unwrap()), "axcxd");
    }

    #[test]
    fn regex_matching() {
        assert_eq!(
            matches(&one("hello123"), &one(r"\d+")).unwrap().singleton_boolean("t").unwrap(),
            Some(true)
        );
        assert!(matches(&one("x"), &one("(")).is_err());
        assert_eq!(
            get(replace_matches(&one("a1b22c"), &one(r"\d+"), &one("#")).unwrap()),
            "a#b#c"
        );
    }

    #[test]
    fn length_and_chars() {
        assert_eq!(length(&one("héllo")).unwrap().singleton_integer("t").unwrap(), Some(5));
        assert_eq!(to_chars(&one("ab")).unwrap().len(), 2);
    }

    #[test]
    fn split_and_join() {
        let parts = split(&one("a,b,c"), &one(",")).unwrap();
        assert_eq!(parts.len(), 3);
        let sep = one(",");
        assert_eq!(get(join(&parts, Some(&sep)).unwrap()), "a,b,c");
        assert_eq!(get(join(&parts, None).unwrap()), "abc");
    }

    #[test]
    fn encodings_round_trip() {
        for target in ["base64", "base64url", "hex"] {
            let t = one(target);
            let encoded = encode(&one("hello world"), &t).unwrap();
            let decoded = decode(&encoded, &t).unwrap();
            assert_eq!(get(decoded), "hello world", "{target}");
        }
        assert_eq!(get(encode(&one("hi"), &one("hex")).unwrap()), "6869");
        assert!(decode(&one("zz!"), &one("base64")).unwrap().is_empty());
        assert!(encode(&one("x"), &one("rot13")).is_err());
    }

    #[test]
    fn escaping() {
        assert_eq!(get(escape(&one("<b>"), &one("html")).unwrap()), "&lt;b&gt;");
        assert_eq!(get(unescape(&one("&lt;b&gt;"), &one("html")).unwrap()), "<b>");
        assert_eq!(get(escape(&one("a\"b"), &one("json")).unwrap()), "a\\\"b");
        assert_eq!(get(unescape(&one("a\\\"b"), &one("json")).unwrap()), "a\"b");
    }
}
