//! Built-in function metadata and the custom-function registry.
//!
//! Built-in names and arity windows live in a compile-time perfect hash map.
//! Custom functions are registered per-`Engine` at compile time; their
//! handlers receive the raw argument ASTs so lambda-style functions can
//! control evaluation order and bind iteration variables.

use std::collections::HashMap;
use std::sync::Arc;

use phf::phf_map;

use crate::ast::AstNode;
use crate::error::{Error, Result};
use crate::eval::FunctionContext;
use crate::value::Collection;

/// Metadata for one built-in function.
#[derive(Debug, Clone, Copy)]
pub struct FunctionMetadata {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` = unbounded.
    pub max_args: Option<usize>,
    /// Only callable when experimental functions are enabled at compile time.
    pub experimental: bool,
}

const fn meta(name: &'static str, min_args: usize, max_args: usize) -> FunctionMetadata {
    FunctionMetadata {
        name,
        min_args,
        max_args: Some(max_args),
        experimental: false,
    }
}

const fn experimental(name: &'static str, min_args: usize, max_args: usize) -> FunctionMetadata {
    FunctionMetadata {
        name,
        min_args,
        max_args: Some(max_args),
        experimental: true,
    }
}

/// Static built-in function table.
static BUILTINS: phf::Map<&'static str, FunctionMetadata> = phf_map! {
    // Existence
    "empty" => meta("empty", 0, 0),
    "exists" => meta("exists", 0, 1),
    "all" => meta("all", 1, 1),
    "allTrue" => meta("allTrue", 0, 0),
    "anyTrue" => meta("anyTrue", 0, 0),
    "allFalse" => meta("allFalse", 0, 0),
    "anyFalse" => meta("anyFalse", 0, 0),
    "count" => meta("count", 0, 0),
    "distinct" => meta("distinct", 0, 0),
    "isDistinct" => meta("isDistinct", 0, 0),
    "subsetOf" => meta("subsetOf", 1, 1),
    "supersetOf" => meta("supersetOf", 1, 1),

    // Filtering and projection
    "where" => meta("where", 1, 1),
    "select" => meta("select", 1, 1),
    "repeat" => meta("repeat", 1, 1),
    "ofType" => meta("ofType", 1, 1),

    // Subsetting
    "single" => meta("single", 0, 0),
    "first" => meta("first", 0, 0),
    "last" => meta("last", 0, 0),
    "tail" => meta("tail", 0, 0),
    "skip" => meta("skip", 1, 1),
    "take" => meta("take", 1, 1),

    // Combining
    "combine" => meta("combine", 1, 1),
    "union" => meta("union", 1, 1),
    "intersect" => meta("intersect", 1, 1),
    "exclude" => meta("exclude", 1, 1),

    // Conversion
    "iif" => meta("iif", 2, 3),
    "toBoolean" => meta("toBoolean", 0, 0),
    "convertsToBoolean" => meta("convertsToBoolean", 0, 0),
    "toInteger" => meta("toInteger", 0, 0),
    "convertsToInteger" => meta("convertsToInteger", 0, 0),
    "toDecimal" => meta("toDecimal", 0, 0),
    "convertsToDecimal" => meta("convertsToDecimal", 0, 0),
    "toString" => meta("toString", 0, 0),
    "convertsToString" => meta("convertsToString", 0, 0),
    "toDate" => meta("toDate", 0, 0),
    "convertsToDate" => meta("convertsToDate", 0, 0),
    "toDateTime" => meta("toDateTime", 0, 0),
    "convertsToDateTime" => meta("convertsToDateTime", 0, 0),
    "toTime" => meta("toTime", 0, 0),
    "convertsToTime" => meta("convertsToTime", 0, 0),
    "toQuantity" => meta("toQuantity", 0, 1),
    "convertsToQuantity" => meta("convertsToQuantity", 0, 1),

    // String
    "startsWith" => meta("startsWith", 1, 1),
    "endsWith" => meta("endsWith", 1, 1),
    "contains" => meta("contains", 1, 1),
    "indexOf" => meta("indexOf", 1, 1),
    "substring" => meta("substring", 1, 2),
    "upper" => meta("upper", 0, 0),
    "lower" => meta("lower", 0, 0),
    "replace" => meta("replace", 2, 2),
    "matches" => meta("matches", 1, 1),
    "replaceMatches" => meta("replaceMatches", 2, 2),
    "length" => meta("length", 0, 0),
    "toChars" => meta("toChars", 0, 0),
    "trim" => meta("trim", 0, 0),
    "split" => experimental("split", 1, 1),
    "join" => experimental("join", 0, 1),
    "encode" => meta("encode", 1, 1),
    "decode" => meta("decode", 1, 1),
    "escape" => meta("escape", 1, 1),
    "unescape" => meta("unescape", 1, 1),

    // Math
    "abs" => meta("abs", 0, 0),
    "ceiling" => meta("ceiling", 0, 0),
    "floor" => meta("floor", 0, 0),
    "truncate" => meta("truncate", 0, 0),
    "round" => meta("round", 0, 1),
    "exp" => meta("exp", 0, 0),
    "ln" => meta("ln", 0, 0),
    "log" => meta("log", 1, 1),
    "power" => meta("power", 1, 1),
    "sqrt" => meta("sqrt", 0, 0),
    "sum" => meta("sum", 0, 0),
    "avg" => meta("avg", 0, 0),
    "min" => meta("min", 0, 0),
    "max" => meta("max", 0, 0),

    // Temporal context
    "now" => meta("now", 0, 0),
    "today" => meta("today", 0, 0),
    "timeOfDay" => meta("timeOfDay", 0, 0),

    // Tree navigation
    "children" => meta("children", 0, 0),
    "descendants" => meta("descendants", 0, 0),

    // Boolean helper
    "not" => meta("not", 0, 0),

    // Type operators in function form
    "is" => meta("is", 1, 1),
    "as" => meta("as", 1, 1),
    "in" => meta("in", 1, 1),

    // R4 extras
    "hasValue" => meta("hasValue", 0, 0),
    "extension" => meta("extension", 1, 1),
    "trace" => meta("trace", 1, 2),
    "resolve" => meta("resolve", 0, 0),
    "memberOf" => meta("memberOf", 1, 1),

    // Aggregates
    "aggregate" => meta("aggregate", 1, 2),
};

/// Look up a built-in by name.
pub fn builtin(name: &str) -> Option<&'static FunctionMetadata> {
    BUILTINS.get(name)
}

/// Validate an argument count against a built-in's arity window.
pub fn validate_arity(metadata: &FunctionMetadata, arg_count: usize) -> Result<()> {
    if arg_count < metadata.min_args {
        return Err(Error::WrongArity(format!(
            "{}() requires at least {} argument(s), got {}",
            metadata.name, metadata.min_args, arg_count
        )));
    }
    if let Some(max) = metadata.max_args {
        if arg_count > max {
            return Err(Error::WrongArity(format!(
                "{}() takes at most {} argument(s), got {}",
                metadata.name, max, arg_count
            )));
        }
    }
    Ok(())
}

/// Handler for a user-registered function. Receives the evaluation scope,
/// the input collection, and the unevaluated argument expressions.
pub type FunctionHandler = Arc<
    dyn Fn(&mut FunctionContext<'_>, &Collection, &[AstNode]) -> Result<Collection>
        + Send
        + Sync,
>;

/// Custom functions registered through compile options. Names are unique and
/// may not shadow built-ins.
#[derive(Default, Clone)]
pub struct CustomFunctions {
    handlers: HashMap<String, FunctionHandler>,
}

impl CustomFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, handler: FunctionHandler) -> Result<()> {
        if BUILTINS.contains_key(name) {
            return Err(Error::UnsupportedOperation(format!(
                "cannot register function '{name}': name collides with a built-in"
            )));
        }
        if self.handlers.contains_key(name) {
            return Err(Error::UnsupportedOperation(format!(
                "function '{name}' is already registered"
            )));
        }
        self.handlers.insert(name.to_string(), handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FunctionHandler> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_the_library() {
        for name in [
            "empty", "exists", "all", "allTrue", "anyTrue", "allFalse", "anyFalse", "count",
            "distinct", "isDistinct", "subsetOf", "supersetOf", "where", "select", "repeat",
            "ofType", "single", "first", "last", "tail", "skip", "take", "combine", "union",
            "intersect", "exclude", "iif", "toBoolean", "toInteger", "toDecimal", "toString",
            "toDate", "toDateTime", "toTime", "toQuantity", "convertsToBoolean",
            "convertsToInteger", "convertsToDecimal", "convertsToString", "convertsToDate",
            "convertsToDateTime", "convertsToTime", "convertsToQuantity", "startsWith",
            "endsWith", "contains", "indexOf", "substring", "upper", "lower", "replace",
            "matches", "replaceMatches", "length", "toChars", "trim", "split", "join",
            "encode", "decode", "escape", "unescape", "abs", "ceiling", "floor", "truncate",
            "round", "exp", "ln", "log", "power", "sqrt", "sum", "avg", "min", "max", "now",
            "today", "timeOfDay", "children", "descendants", "not", "hasValue", "extension",
            "trace", "resolve", "memberOf", "aggregate",
        ] {
            assert!(builtin(name).is_some(), "'{name}' is not registered");
        }
    }

    #[test]
    fn arity_windows() {
        let substring = builtin("substring").unwrap();
        assert!(validate_arity(substring, 0).is_err());
        assert!(validate_arity(substring, 1).is_ok());
        assert!(validate_arity(substring, 2).is_ok());
        assert!(validate_arity(substring, 3).is_err());
    }

    #[test]
    fn experimental_flags() {
        assert!(builtin("split").unwrap().experimental);
        assert!(builtin("join").unwrap().experimental);
        assert!(!builtin("substring").unwrap().experimental);
    }

    #[test]
    fn custom_registration_rejects_collisions() {
        let mut custom = CustomFunctions::new();
        let handler: FunctionHandler = Arc::new(|_, input, _| Ok(input.clone()));
        assert!(custom.register("myFunc", handler.clone()).is_ok());
        assert!(custom.register("myFunc", handler.clone()).is_err());
        assert!(custom.register("where", handler).is_err());
    }
}
