//! The engine: compilation (with caching and compile-time validation) and
//! the evaluation API.
//!
//! Compiled expressions are immutable and reusable across evaluations and
//! threads; contexts are created per evaluation from `EvalOptions` and
//! discarded.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use helix_reflect::Registry;
use lru::LruCache;

use crate::ast::{AstNode, TypeOperator};
use crate::context::{CancellationToken, Context, TraceSink};
use crate::error::{Error, Result};
use crate::eval::Evaluator;
use crate::functions::{builtin, validate_arity, CustomFunctions, FunctionHandler};
use crate::parser;
use crate::resolver::ReferenceResolver;
use crate::terminology::TerminologyService;
use crate::value::Collection;

const COMPILE_CACHE_SIZE: usize = 1000;

/// Options for `Engine::compile`.
#[derive(Clone, Default)]
pub struct CompileOptions {
    strict: bool,
    experimental: bool,
    resolves_type: Option<String>,
    functions: CustomFunctions,
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Permissive mode (the default) defers field-existence checking to
    /// runtime and accepts legacy field spellings; `permissive(false)`
    /// enables strict compile-time validation.
    pub fn permissive(mut self, permissive: bool) -> Self {
        self.strict = !permissive;
        self
    }

    /// Enable the experimental functions (`split()`, `join()`).
    pub fn with_experimental_functions(mut self, enabled: bool) -> Self {
        self.experimental = enabled;
        self
    }

    /// Name the static input type for strict validation when the expression
    /// does not begin with a resource-type gate.
    pub fn resolves_type(mut self, hint: impl Into<String>) -> Self {
        self.resolves_type = Some(hint.into());
        self
    }

    /// Register a custom function. Fails at once on a name collision with a
    /// built-in or a previously registered function.
    pub fn add_function(mut self, name: &str, handler: FunctionHandler) -> Result<Self> {
        self.functions.register(name, handler)?;
        Ok(self)
    }

    fn cache_key(&self, source: &str) -> Option<String> {
        // Expressions carrying custom functions are not cacheable: handlers
        // have no identity to key on.
        if !self.functions.is_empty() {
            return None;
        }
        let mode = if self.strict { "strict" } else { "lenient" };
        let base = self.resolves_type.as_deref().unwrap_or("");
        let exp = if self.experimental { "exp" } else { "" };
        Some(format!("{mode}:{exp}:{base}::{source}"))
    }
}

/// Options for `CompiledExpression::evaluate`.
#[derive(Clone, Default)]
pub struct EvalOptions {
    env: Vec<(String, Collection)>,
    override_time: Option<DateTime<Utc>>,
    resolver: Option<Arc<dyn ReferenceResolver>>,
    terminology: Option<Arc<dyn TerminologyService>>,
    cancellation: Option<CancellationToken>,
    trace_sink: Option<Arc<dyn TraceSink>>,
}

impl EvalOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a `%name` environment variable. Reserved names (`context`,
    /// `ucum`) are rejected when evaluation starts.
    pub fn env_variable(mut self, name: impl Into<String>, value: Collection) -> Self {
        self.env.push((name.into(), value));
        self
    }

    /// Fix the evaluation wall-clock; `now()`, `today()` and `timeOfDay()`
    /// derive from it.
    pub fn override_time(mut self, instant: DateTime<Utc>) -> Self {
        self.override_time = Some(instant);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ReferenceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_terminology(mut self, service: Arc<dyn TerminologyService>) -> Self {
        self.terminology = Some(service);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = Some(sink);
        self
    }
}

/// An immutable compiled expression, reusable across evaluations and
/// shareable across threads.
pub struct CompiledExpression {
    ast: AstNode,
    strict: bool,
    experimental: bool,
    functions: CustomFunctions,
    registry: &'static Registry,
}

impl std::fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledExpression")
            .field("ast", &self.ast)
            .field("strict", &self.strict)
            .field("experimental", &self.experimental)
            .finish()
    }
}

impl CompiledExpression {
    /// Evaluate against an input collection. No partial results: any error
    /// aborts the evaluation.
    pub fn evaluate(&self, input: Collection, options: EvalOptions) -> Result<Collection> {
        let mut ctx = Context::new(input.clone());
        if let Some(now) = options.override_time {
            ctx.now = now;
        }
        for (name, value) in &options.env {
            ctx.set_variable(name, value.clone())?;
        }
        ctx.resolver = options.resolver;
        ctx.terminology = options.terminology;
        if let Some(token) = options.cancellation {
            ctx.cancellation = token;
        }
        if let Some(sink) = options.trace_sink {
            ctx.trace_sink = sink;
        }

        let evaluator = Evaluator::new(
            self.registry,
            &self.functions,
            !self.strict,
            self.experimental,
        );
        evaluator.evaluate(&self.ast, &ctx, &input)
    }

    /// The parsed expression tree (structural; compile-twice yields equal
    /// trees).
    pub fn ast(&self) -> &AstNode {
        &self.ast
    }
}

/// Compiles FHIRPath expressions against the built-in R4 descriptor
/// registry. Holds an LRU cache of compiled expressions.
pub struct Engine {
    registry: &'static Registry,
    cache: Mutex<LruCache<String, Arc<CompiledExpression>>>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            registry: Registry::global(),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(COMPILE_CACHE_SIZE).expect("non-zero cache size"),
            )),
        }
    }

    /// Compile a source expression. Lex, parse, and validation errors are
    /// returned here, never from `evaluate`.
    pub fn compile(
        &self,
        source: &str,
        options: CompileOptions,
    ) -> Result<Arc<CompiledExpression>> {
        let cache_key = options.cache_key(source);
        if let Some(key) = &cache_key {
            if let Ok(mut cache) = self.cache.lock() {
                if let Some(compiled) = cache.get(key) {
                    return Ok(compiled.clone());
                }
            }
        }

        let ast = parser::parse(source)?;

        let validator = Validator {
            registry: self.registry,
            strict: options.strict,
            functions: &options.functions,
        };
        validator.check(&ast, options.resolves_type.clone())?;

        let compiled = Arc::new(CompiledExpression {
            ast,
            strict: options.strict,
            experimental: options.experimental,
            functions: options.functions,
            registry: self.registry,
        });

        if let Some(key) = cache_key {
            if let Ok(mut cache) = self.cache.lock() {
                cache.put(key, compiled.clone());
            }
        }
        Ok(compiled)
    }

    /// Convenience: compile with defaults and evaluate one JSON resource.
    pub fn evaluate_json(
        &self,
        source: &str,
        resource: &serde_json::Value,
        options: EvalOptions,
    ) -> Result<Collection> {
        let compiled = self.compile(source, CompileOptions::new())?;
        let input = Collection::from_json(resource);
        compiled.evaluate(input, options)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile-time validation: function existence and arity always; field
/// existence against statically known types in strict mode.
struct Validator<'a> {
    registry: &'static Registry,
    strict: bool,
    functions: &'a CustomFunctions,
}

impl Validator<'_> {
    /// Walk the tree, threading the statically known element type through
    /// navigation. Returns the static type of the node's result when known.
    fn check(&self, node: &AstNode, input_type: Option<String>) -> Result<Option<String>> {
        match node {
            AstNode::Member { name } => self.check_member(name, input_type),
            AstNode::Invocation { target, invocation } => {
                let target_type = self.check(target, input_type)?;
                self.check(invocation, target_type)
            }
            AstNode::Indexer { target, index } => {
                let target_type = self.check(target, input_type.clone())?;
                self.check(index, input_type)?;
                Ok(target_type)
            }
            AstNode::Function { name, args } => self.check_function(name, args, input_type),
            AstNode::ParenGroup(inner) => self.check(inner, input_type),
            AstNode::UnaryOp { operand, .. } => {
                self.check(operand, input_type)?;
                Ok(None)
            }
            AstNode::BinaryOp { left, right, .. } => {
                self.check(left, input_type.clone())?;
                self.check(right, input_type)?;
                Ok(None)
            }
            AstNode::TypeOp { op, expr, .. } => {
                self.check(expr, input_type)?;
                Ok(match op {
                    // The cast target would be the type, but choice unwraps
                    // make it a union; stay unknown.
                    TypeOperator::As | TypeOperator::Is => None,
                })
            }
            _ => Ok(None),
        }
    }

    fn check_member(&self, name: &str, input_type: Option<String>) -> Result<Option<String>> {
        if name.starts_with(|c: char| c.is_ascii_uppercase())
            && self.registry.is_resource_type(name)
        {
            return Ok(Some(name.to_string()));
        }
        let Some(parent) = input_type else {
            return Ok(None);
        };
        if let Some(field) = self.registry.field(&parent, name) {
            if field.is_choice() {
                return Ok(None);
            }
            return Ok(Some(field.ty.to_string()));
        }
        if self.strict && self.registry.descriptor(&parent).is_some() {
            return Err(Error::InvalidField(format!("{parent}.{name}")));
        }
        Ok(None)
    }

    fn check_function(
        &self,
        name: &str,
        args: &[AstNode],
        input_type: Option<String>,
    ) -> Result<Option<String>> {
        if let Some(metadata) = builtin(name) {
            validate_arity(metadata, args.len())?;
        } else if !self.functions.contains(name) {
            return Err(Error::UnsupportedOperation(format!(
                "unknown function '{name}'"
            )));
        }

        match name {
            // Type-filtering and lambda functions keep or scope the input
            // type; their arguments see the element type.
            "where" | "exists" | "all" | "select" | "repeat" => {
                for arg in args {
                    self.check(arg, input_type.clone())?;
                }
                Ok(match name {
                    "where" => input_type,
                    _ => None,
                })
            }
            "ofType" | "is" | "as" => Ok(None),
            "first" | "last" | "tail" | "single" | "distinct" | "skip" | "take"
            | "intersect" | "exclude" | "trace" => {
                for arg in args {
                    self.check(arg, None)?;
                }
                Ok(input_type)
            }
            _ => {
                for arg in args {
                    self.check(arg, None)?;
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_caches_identical_sources() {
        let engine = Engine::new();
        let a = engine.compile("Patient.name.given", CompileOptions::new()).unwrap();
        let b = engine.compile("Patient.name.given", CompileOptions::new()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        // Different options compile separately.
        let c = engine
            .compile("Patient.name.given", CompileOptions::new().permissive(false))
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn compile_twice_yields_equal_asts() {
        let engine = Engine::new();
        let source = "Patient.name.where(use = 'official').select(given.first() + ' ' + family)";
        let a = engine.compile(source, CompileOptions::new()).unwrap();
        let b = engine.compile(source, CompileOptions::new()).unwrap();
        assert_eq!(a.ast(), b.ast());
    }

    #[test]
    fn strict_mode_rejects_unknown_fields() {
        let engine = Engine::new();
        let err = engine
            .compile("Patient.nmae", CompileOptions::new().permissive(false))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidField(_)));

        // Through navigation chains too.
        let err = engine
            .compile("Patient.name.gven", CompileOptions::new().permissive(false))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidField(_)));

        // Permissive mode defers to runtime.
        assert!(engine.compile("Patient.nmae", CompileOptions::new()).is_ok());
    }

    #[test]
    fn resolves_type_hint_grounds_relative_paths() {
        let engine = Engine::new();
        let options = CompileOptions::new()
            .permissive(false)
            .resolves_type("Patient");
        assert!(engine.compile("name.given", options.clone()).is_ok());
        assert!(matches!(
            engine.compile("name.gven", options).unwrap_err(),
            Error::InvalidField(_)
        ));
    }

    #[test]
    fn unknown_functions_fail_at_compile_time() {
        let engine = Engine::new();
        let err = engine
            .compile("name.frobnicate()", CompileOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation(_)));
    }

    #[test]
    fn arity_is_checked_at_compile_time() {
        let engine = Engine::new();
        assert!(matches!(
            engine.compile("name.substring()", CompileOptions::new()).unwrap_err(),
            Error::WrongArity(_)
        ));
        assert!(matches!(
            engine.compile("name.count(1)", CompileOptions::new()).unwrap_err(),
            Error::WrongArity(_)
        ));
    }

    #[test]
    fn custom_function_collisions_fail_compilation() {
        let handler: FunctionHandler = Arc::new(|_, input, _| Ok(input.clone()));
        assert!(CompileOptions::new().add_function("where", handler).is_err());
    }
}
