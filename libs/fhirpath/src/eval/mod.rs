//! The tree-walking evaluator.
//!
//! Evaluation is a pure function `(AST, context, input) → collection`,
//! recursing on node variants. Lambda-style functions (`where`, `select`,
//! `repeat`, `all`, `exists(criteria)`, `aggregate`, `iif`, `trace`
//! projections) are implemented here because they control argument
//! evaluation order and bind `$this` / `$index` / `$total`; everything else
//! evaluates its arguments eagerly and dispatches into `functions::*`.

pub(crate) mod functions;
pub(crate) mod navigate;
pub(crate) mod operations;

use helix_reflect::Registry;

use crate::ast::{AstNode, BinaryOperator, TypeOperator, TypeSpecifierName};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::functions::{builtin, validate_arity, CustomFunctions};
use crate::types::{resolve_specifier, value_is_type};
use crate::value::{Collection, Value};

const MAX_REPEAT_ITERATIONS: usize = 512;

/// Evaluates compiled ASTs. One instance per compiled expression; carries
/// the compile-time configuration, no per-evaluation state.
pub struct Evaluator<'a> {
    registry: &'static Registry,
    custom: &'a CustomFunctions,
    permissive: bool,
    experimental: bool,
}

/// Evaluation scope handed to custom-function handlers, so they can evaluate
/// their argument ASTs and bind iteration variables.
pub struct FunctionContext<'a> {
    evaluator: &'a Evaluator<'a>,
    context: &'a Context,
}

impl FunctionContext<'_> {
    pub fn context(&self) -> &Context {
        self.context
    }

    /// Evaluate an argument expression against an input collection.
    pub fn evaluate(&mut self, node: &AstNode, input: &Collection) -> Result<Collection> {
        self.evaluator.evaluate(node, self.context, input)
    }

    /// Evaluate with `$this` and `$index` bound, for lambda-like custom
    /// functions.
    pub fn evaluate_scoped(
        &mut self,
        node: &AstNode,
        this: Value,
        index: i32,
    ) -> Result<Collection> {
        let scope = self.context.iteration_scope(this.clone(), index);
        self.evaluator
            .evaluate(node, &scope, &Collection::singleton(this))
    }
}

impl<'a> Evaluator<'a> {
    pub fn new(
        registry: &'static Registry,
        custom: &'a CustomFunctions,
        permissive: bool,
        experimental: bool,
    ) -> Self {
        Self {
            registry,
            custom,
            permissive,
            experimental,
        }
    }

    pub fn evaluate(
        &self,
        node: &AstNode,
        ctx: &Context,
        input: &Collection,
    ) -> Result<Collection> {
        match node {
            AstNode::This => Ok(match &ctx.this {
                Some(v) => Collection::singleton(v.clone()),
                None => input.clone(),
            }),
            AstNode::Index => Ok(match ctx.index {
                Some(i) => Collection::singleton(Value::integer(i)),
                None => Collection::empty(),
            }),
            AstNode::Total => Ok(ctx.total.clone().unwrap_or_else(Collection::empty)),
            AstNode::EnvVariable(name) => match ctx.variable(name) {
                Some(value) => Ok(value.clone()),
                None => Err(Error::UnsupportedOperation(format!(
                    "undefined environment variable '%{name}'"
                ))),
            },

            AstNode::NullLiteral => Ok(Collection::empty()),
            AstNode::BooleanLiteral(b) => Ok(Collection::singleton(Value::boolean(*b))),
            AstNode::StringLiteral(s) => Ok(Collection::singleton(Value::string(s.as_str()))),
            AstNode::IntegerLiteral(i) => Ok(Collection::singleton(Value::integer(*i))),
            AstNode::DecimalLiteral(d) => Ok(Collection::singleton(Value::decimal(*d))),
            AstNode::DateLiteral(date, precision) => {
                Ok(Collection::singleton(Value::date(*date, *precision)))
            }
            AstNode::DateTimeLiteral(dt, precision, tz) => {
                Ok(Collection::singleton(Value::datetime(*dt, *precision, *tz)))
            }
            AstNode::TimeLiteral(time, precision) => {
                Ok(Collection::singleton(Value::time(*time, *precision)))
            }
            AstNode::QuantityLiteral { value, unit } => Ok(Collection::singleton(
                Value::quantity(*value, unit.as_str()),
            )),

            AstNode::Member { name } => self.eval_member(name, input),
            AstNode::Function { name, args } => self.invoke_function(name, args, ctx, input),
            AstNode::Invocation { target, invocation } => {
                let receiver = self.evaluate(target, ctx, input)?;
                self.evaluate(invocation, ctx, &receiver)
            }
            AstNode::Indexer { target, index } => {
                let receiver = self.evaluate(target, ctx, input)?;
                let index = self.evaluate(index, ctx, input)?;
                let Some(value) = index.singleton_value("indexer")? else {
                    return Ok(Collection::empty());
                };
                let idx = match value.data() {
                    crate::value::ValueData::Integer(i) => *i,
                    _ => return Err(Error::WrongType("indexer requires an Integer".into())),
                };
                if idx < 0 {
                    return Ok(Collection::empty());
                }
                Ok(receiver
                    .get(idx as usize)
                    .cloned()
                    .map(Collection::singleton)
                    .unwrap_or_else(Collection::empty))
            }

            AstNode::UnaryOp { op, operand } => {
                let operand = self.evaluate(operand, ctx, input)?;
                operations::unary(*op, &operand)
            }
            AstNode::BinaryOp { op, left, right } => {
                self.eval_binary(*op, left, right, ctx, input)
            }
            AstNode::TypeOp { op, expr, specifier } => {
                let value = self.evaluate(expr, ctx, input)?;
                self.eval_type_op(*op, &value, specifier)
            }
            AstNode::ParenGroup(inner) => self.evaluate(inner, ctx, input),
        }
    }

    /// Bare identifier: a resource-type gate when the name is a resource
    /// type, field navigation otherwise.
    fn eval_member(&self, name: &str, input: &Collection) -> Result<Collection> {
        if name.starts_with(|c: char| c.is_ascii_uppercase())
            && self.registry.is_resource_type(name)
        {
            return Ok(input
                .iter()
                .filter(|item| item.resource_type() == Some(name))
                .cloned()
                .collect());
        }
        let mut out = Collection::empty();
        for item in input.iter() {
            out.extend(&navigate::navigate(
                item,
                name,
                self.registry,
                self.permissive,
            )?);
        }
        Ok(out)
    }

    fn eval_binary(
        &self,
        op: BinaryOperator,
        left: &AstNode,
        right: &AstNode,
        ctx: &Context,
        input: &Collection,
    ) -> Result<Collection> {
        use BinaryOperator::*;

        // Boolean operators short-circuit without evaluating the right
        // operand when the left already decides.
        match op {
            And | Or | Xor | Implies => {
                let l = operations::boolean_operand(
                    &self.evaluate(left, ctx, input)?,
                    "boolean operand",
                )?;
                match (op, l) {
                    (And, Some(false)) => {
                        return Ok(Collection::singleton(Value::boolean(false)))
                    }
                    (Or, Some(true)) => return Ok(Collection::singleton(Value::boolean(true))),
                    (Implies, Some(false)) => {
                        return Ok(Collection::singleton(Value::boolean(true)))
                    }
                    _ => {}
                }
                let r = operations::boolean_operand(
                    &self.evaluate(right, ctx, input)?,
                    "boolean operand",
                )?;
                return Ok(match op {
                    And => operations::and(l, r),
                    Or => operations::or(l, r),
                    Xor => operations::xor(l, r),
                    Implies => operations::implies(l, r),
                    _ => unreachable!(),
                });
            }
            _ => {}
        }

        let l = self.evaluate(left, ctx, input)?;
        let r = self.evaluate(right, ctx, input)?;
        match op {
            Eq => Ok(tribool(operations::equality(&l, &r)?)),
            Ne => Ok(tribool(operations::equality(&l, &r)?.map(|b| !b))),
            Equiv => Ok(Collection::singleton(Value::boolean(
                operations::collections_equivalent(&l, &r),
            ))),
            NotEquiv => Ok(Collection::singleton(Value::boolean(
                !operations::collections_equivalent(&l, &r),
            ))),
            Lt | Le | Gt | Ge => operations::ordering(op, &l, &r),
            Add | Sub | Mul | Div | TruncDiv | Mod => operations::arithmetic(op, &l, &r),
            Concat => operations::concat(&l, &r),
            Union => Ok(operations::union(&l, &r)),
            In => operations::membership_in(&l, &r),
            ContainsOp => operations::membership_contains(&l, &r),
            And | Or | Xor | Implies => unreachable!(),
        }
    }

    fn eval_type_op(
        &self,
        op: TypeOperator,
        value: &Collection,
        specifier: &TypeSpecifierName,
    ) -> Result<Collection> {
        let resolved = resolve_specifier(specifier, self.registry)?;
        match op {
            TypeOperator::Is => {
                let Some(v) = value.singleton_value("'is' operand")? else {
                    return Ok(Collection::empty());
                };
                Ok(Collection::singleton(Value::boolean(value_is_type(
                    v,
                    &resolved,
                    self.registry,
                ))))
            }
            TypeOperator::As => Ok(value
                .iter()
                .filter(|v| value_is_type(v, &resolved, self.registry))
                .cloned()
                .collect()),
        }
    }

    // -----------------------------------------------------------------
    // Function dispatch
    // -----------------------------------------------------------------

    fn invoke_function(
        &self,
        name: &str,
        args: &[AstNode],
        ctx: &Context,
        input: &Collection,
    ) -> Result<Collection> {
        if let Some(metadata) = builtin(name) {
            validate_arity(metadata, args.len())?;
            if metadata.experimental && !self.experimental {
                return Err(Error::UnsupportedOperation(format!(
                    "{name}() requires experimental functions to be enabled"
                )));
            }
            return self.invoke_builtin(name, args, ctx, input);
        }

        if let Some(handler) = self.custom.get(name) {
            // Custom handlers may block; give cancellation a chance first.
            ctx.cancellation.check()?;
            let mut scope = FunctionContext {
                evaluator: self,
                context: ctx,
            };
            return handler(&mut scope, input, args);
        }

        Err(Error::UnsupportedOperation(format!(
            "unknown function '{name}'"
        )))
    }

    fn invoke_builtin(
        &self,
        name: &str,
        args: &[AstNode],
        ctx: &Context,
        input: &Collection,
    ) -> Result<Collection> {
        use functions::*;

        // Lambda functions first: they control their own argument
        // evaluation.
        match name {
            "where" => return self.eval_where(&args[0], ctx, input),
            "select" => return self.eval_select(&args[0], ctx, input),
            "repeat" => return self.eval_repeat(&args[0], ctx, input),
            "all" => return self.eval_all(&args[0], ctx, input),
            "exists" => {
                if let Some(criteria) = args.first() {
                    let filtered = self.eval_where(criteria, ctx, input)?;
                    return existence::exists_plain(&filtered);
                }
                return existence::exists_plain(input);
            }
            "aggregate" => return self.eval_aggregate(args, ctx, input),
            "iif" => return self.eval_iif(args, ctx, input),
            "ofType" => {
                let specifier = type_specifier_arg(&args[0])?;
                let resolved = resolve_specifier(&specifier, self.registry)?;
                return Ok(input
                    .iter()
                    .filter(|v| value_is_type(v, &resolved, self.registry))
                    .cloned()
                    .collect());
            }
            "is" => {
                let specifier = type_specifier_arg(&args[0])?;
                return self.eval_type_op(TypeOperator::Is, input, &specifier);
            }
            "as" => {
                let specifier = type_specifier_arg(&args[0])?;
                return self.eval_type_op(TypeOperator::As, input, &specifier);
            }
            "trace" => {
                let name_arg = self.evaluate(&args[0], ctx, input)?;
                let projected = match args.get(1) {
                    Some(projection) => Some(self.evaluate(projection, ctx, input)?),
                    None => None,
                };
                return utility::trace(ctx, input, &name_arg, projected);
            }
            _ => {}
        }

        // Everything else evaluates arguments eagerly, in order.
        let mut evaluated = Vec::with_capacity(args.len());
        for arg in args {
            evaluated.push(self.evaluate(arg, ctx, input)?);
        }

        match name {
            // Existence
            "empty" => existence::empty(input),
            "allTrue" => existence::all_true(input),
            "anyTrue" => existence::any_true(input),
            "allFalse" => existence::all_false(input),
            "anyFalse" => existence::any_false(input),
            "count" => existence::count(input),
            "distinct" => existence::distinct(input),
            "isDistinct" => existence::is_distinct(input),
            "subsetOf" => existence::subset_of(input, &evaluated[0]),
            "supersetOf" => existence::superset_of(input, &evaluated[0]),

            // Subsetting
            "single" => subsetting::single(input),
            "first" => subsetting::first(input),
            "last" => subsetting::last(input),
            "tail" => subsetting::tail(input),
            "skip" => subsetting::skip(input, &evaluated[0]),
            "take" => subsetting::take(input, &evaluated[0]),

            // Combining
            "combine" => combining::combine(input, &evaluated[0]),
            "union" => combining::union(input, &evaluated[0]),
            "intersect" => combining::intersect(input, &evaluated[0]),
            "exclude" => combining::exclude(input, &evaluated[0]),

            // Membership in function form
            "in" => operations::membership_in(input, &evaluated[0]),

            // Conversion
            "toBoolean" => conversion::to_boolean(input),
            "convertsToBoolean" => conversion::converts_to_boolean(input),
            "toInteger" => conversion::to_integer(input),
            "convertsToInteger" => conversion::converts_to_integer(input),
            "toDecimal" => conversion::to_decimal(input),
            "convertsToDecimal" => conversion::converts_to_decimal(input),
            "toString" => conversion::to_string_fn(input),
            "convertsToString" => conversion::converts_to_string(input),
            "toDate" => conversion::to_date(input),
            "convertsToDate" => conversion::converts_to_date(input),
            "toDateTime" => conversion::to_datetime(input),
            "convertsToDateTime" => conversion::converts_to_datetime(input),
            "toTime" => conversion::to_time(input),
            "convertsToTime" => conversion::converts_to_time(input),
            "toQuantity" => conversion::to_quantity(input, evaluated.first()),
            "convertsToQuantity" => conversion::converts_to_quantity(input, evaluated.first()),

            // String
            "startsWith" => string::starts_with(input, &evaluated[0]),
            "endsWith" => string::ends_with(input, &evaluated[0]),
            "contains" => string::contains(input, &evaluated[0]),
            "indexOf" => string::index_of(input, &evaluated[0]),
            "substring" => string::substring(input, &evaluated[0], evaluated.get(1)),
            "upper" => string::upper(input),
            "lower" => string::lower(input),
            "replace" => string::replace(input, &evaluated[0], &evaluated[1]),
            "matches" => string::matches(input, &evaluated[0]),
            "replaceMatches" => string::replace_matches(input, &evaluated[0], &evaluated[1]),
            "length" => string::length(input),
            "toChars" => string::to_chars(input),
            "trim" => string::trim(input),
            "split" => string::split(input, &evaluated[0]),
            "join" => string::join(input, evaluated.first()),
            "encode" => string::encode(input, &evaluated[0]),
            "decode" => string::decode(input, &evaluated[0]),
            "escape" => string::escape(input, &evaluated[0]),
            "unescape" => string::unescape(input, &evaluated[0]),

            // Math
            "abs" => math::abs(input),
            "ceiling" => math::ceiling(input),
            "floor" => math::floor(input),
            "truncate" => math::truncate(input),
            "round" => math::round(input, evaluated.first()),
            "exp" => math::exp(input),
            "ln" => math::ln(input),
            "log" => math::log(input, &evaluated[0]),
            "power" => math::power(input, &evaluated[0]),
            "sqrt" => math::sqrt(input),
            "sum" => math::sum(input),
            "avg" => math::avg(input),
            "min" => math::min(input),
            "max" => math::max(input),

            // Temporal context
            "now" => utility::now(ctx),
            "today" => utility::today(ctx),
            "timeOfDay" => utility::time_of_day(ctx),

            // Tree navigation
            "children" => navigation::children(input, self.registry),
            "descendants" => navigation::descendants(input, self.registry),

            // Boolean helper
            "not" => utility::not(input),

            // R4 extras
            "hasValue" => utility::has_value(input),
            "extension" => utility::extension(input, &evaluated[0]),
            "resolve" => utility::resolve(ctx, input),
            "memberOf" => utility::member_of(ctx, input, &evaluated[0]),

            other => Err(Error::Internal(format!(
                "built-in '{other}' has no implementation"
            ))),
        }
    }

    // -----------------------------------------------------------------
    // Lambda functions
    // -----------------------------------------------------------------

    fn eval_where(
        &self,
        criteria: &AstNode,
        ctx: &Context,
        input: &Collection,
    ) -> Result<Collection> {
        let mut out = Collection::empty();
        for (idx, item) in input.iter().enumerate() {
            let scope = ctx.iteration_scope(item.clone(), idx as i32);
            let result =
                self.evaluate(criteria, &scope, &Collection::singleton(item.clone()))?;
            if operations::boolean_operand(&result, "where() criteria")? == Some(true) {
                out.push(item.clone());
            }
        }
        Ok(out)
    }

    fn eval_select(
        &self,
        projection: &AstNode,
        ctx: &Context,
        input: &Collection,
    ) -> Result<Collection> {
        let mut out = Collection::empty();
        let mut first_invalid: Option<Error> = None;
        let mut failures = 0usize;
        for (idx, item) in input.iter().enumerate() {
            let scope = ctx.iteration_scope(item.clone(), idx as i32);
            match self.evaluate(projection, &scope, &Collection::singleton(item.clone())) {
                Ok(projected) => out.extend(&projected),
                // An InvalidField only surfaces when every item failed.
                Err(e @ Error::InvalidField(_)) => {
                    failures += 1;
                    first_invalid.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(e) = first_invalid {
            if failures == input.len() {
                return Err(e);
            }
        }
        Ok(out)
    }

    fn eval_repeat(
        &self,
        projection: &AstNode,
        ctx: &Context,
        input: &Collection,
    ) -> Result<Collection> {
        let mut out = Collection::empty();
        let mut work = input.clone();
        let mut rounds = 0usize;
        while !work.is_empty() {
            rounds += 1;
            if rounds > MAX_REPEAT_ITERATIONS {
                return Err(Error::UnsupportedOperation(format!(
                    "repeat() exceeded the iteration bound of {MAX_REPEAT_ITERATIONS}"
                )));
            }
            ctx.cancellation.check()?;

            let produced = self.eval_select(projection, ctx, &work)?;

            // Fixpoint: a round whose projection equals its own input stops
            // the iteration, and that round's output is discarded.
            if operations::equality(&produced, &work)? == Some(true) {
                break;
            }
            out.extend(&produced);
            work = produced;
        }
        Ok(out)
    }

    fn eval_all(
        &self,
        criteria: &AstNode,
        ctx: &Context,
        input: &Collection,
    ) -> Result<Collection> {
        for (idx, item) in input.iter().enumerate() {
            let scope = ctx.iteration_scope(item.clone(), idx as i32);
            let result =
                self.evaluate(criteria, &scope, &Collection::singleton(item.clone()))?;
            if operations::boolean_operand(&result, "all() criteria")? != Some(true) {
                return Ok(Collection::singleton(Value::boolean(false)));
            }
        }
        Ok(Collection::singleton(Value::boolean(true)))
    }

    fn eval_aggregate(
        &self,
        args: &[AstNode],
        ctx: &Context,
        input: &Collection,
    ) -> Result<Collection> {
        let mut total = match args.get(1) {
            Some(init) => self.evaluate(init, ctx, input)?,
            None => Collection::empty(),
        };
        for (idx, item) in input.iter().enumerate() {
            let scope = ctx.aggregate_scope(item.clone(), idx as i32, total);
            total = self.evaluate(&args[0], &scope, &Collection::singleton(item.clone()))?;
        }
        Ok(total)
    }

    fn eval_iif(
        &self,
        args: &[AstNode],
        ctx: &Context,
        input: &Collection,
    ) -> Result<Collection> {
        let condition = self.evaluate(&args[0], ctx, input)?;
        match operations::boolean_operand(&condition, "iif() condition")? {
            Some(true) => self.evaluate(&args[1], ctx, input),
            _ => match args.get(2) {
                Some(otherwise) => self.evaluate(otherwise, ctx, input),
                None => Ok(Collection::empty()),
            },
        }
    }
}

fn tribool(value: Option<bool>) -> Collection {
    match value {
        Some(b) => Collection::singleton(Value::boolean(b)),
        None => Collection::empty(),
    }
}

/// Extract a type specifier from an argument AST (`ofType(Quantity)`,
/// `is(System.Boolean)`).
fn type_specifier_arg(node: &AstNode) -> Result<TypeSpecifierName> {
    match node {
        AstNode::Member { name } => Ok(TypeSpecifierName::unqualified(name.clone())),
        AstNode::Invocation { target, invocation } => match (target.as_ref(), invocation.as_ref())
        {
            (AstNode::Member { name: qualifier }, AstNode::Member { name })
                if qualifier == "System" || qualifier == "FHIR" =>
            {
                Ok(TypeSpecifierName::qualified(qualifier.clone(), name.clone()))
            }
            _ => Err(Error::WrongType("expected a type specifier".into())),
        },
        _ => Err(Error::WrongType("expected a type specifier".into())),
    }
}
