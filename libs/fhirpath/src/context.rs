//! Evaluation context: the deterministic time snapshot, environment
//! variables, iteration scope, and the pluggable capabilities (resolver,
//! terminology service, trace sink, cancellation).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::resolver::ReferenceResolver;
use crate::terminology::TerminologyService;
use crate::value::{Collection, Value};

/// Variable names seeded by the engine that user variables may not override.
pub const RESERVED_VARIABLES: &[&str] = &["context", "ucum"];

const UCUM_URI: &str = "http://unitsofmeasure.org";

/// Cancellation handle observed at external-call boundaries and inside
/// unbounded iteration. Cloning shares the flag.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Sink for `trace()` output. The default sink emits `tracing` events.
pub trait TraceSink: Send + Sync {
    fn emit(&self, name: &str, collection: &Collection);
}

/// Default sink: one `tracing::debug!` event per trace call.
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn emit(&self, name: &str, collection: &Collection) {
        tracing::debug!(trace = name, items = collection.len(), "fhirpath trace");
    }
}

/// A sink that records trace calls; useful in tests and debugging tools.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<(String, usize)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, usize)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl TraceSink for CollectingSink {
    fn emit(&self, name: &str, collection: &Collection) {
        if let Ok(mut events) = self.events.lock() {
            events.push((name.to_string(), collection.len()));
        }
    }
}

/// Per-evaluation context. Created for each `evaluate` call and discarded.
#[derive(Clone)]
pub struct Context {
    /// Wall-clock instant captured at evaluation start; `now()`, `today()`
    /// and `timeOfDay()` all derive from it.
    pub now: DateTime<Utc>,
    /// Environment variables (`%name`). Reserved names are seeded first.
    variables: Arc<HashMap<Arc<str>, Collection>>,
    /// `$this` in a lambda scope.
    pub this: Option<Value>,
    /// `$index` in a lambda scope.
    pub index: Option<i32>,
    /// `$total` in an aggregate scope.
    pub total: Option<Collection>,
    pub resolver: Option<Arc<dyn ReferenceResolver>>,
    pub terminology: Option<Arc<dyn TerminologyService>>,
    pub trace_sink: Arc<dyn TraceSink>,
    pub cancellation: CancellationToken,
    /// The original input collection (also reachable as `%context`).
    pub input: Collection,
    /// Reserved parent-pointer slots for patch-style operations. The
    /// read-only evaluator never fills them.
    pub last_result: Option<Collection>,
    pub before_last_result: Option<Collection>,
}

impl Context {
    pub fn new(input: Collection) -> Self {
        let mut variables: HashMap<Arc<str>, Collection> = HashMap::new();
        variables.insert(Arc::from("context"), input.clone());
        variables.insert(
            Arc::from("ucum"),
            Collection::singleton(Value::string(UCUM_URI)),
        );

        Self {
            now: Utc::now(),
            variables: Arc::new(variables),
            this: None,
            index: None,
            total: None,
            resolver: None,
            terminology: None,
            trace_sink: Arc::new(TracingSink),
            cancellation: CancellationToken::new(),
            input,
            last_result: None,
            before_last_result: None,
        }
    }

    /// Bind a user environment variable. Reserved names are rejected.
    pub fn set_variable(&mut self, name: &str, value: Collection) -> Result<()> {
        if RESERVED_VARIABLES.contains(&name) {
            return Err(Error::UnsupportedOperation(format!(
                "cannot override reserved environment variable '%{name}'"
            )));
        }
        Arc::make_mut(&mut self.variables).insert(Arc::from(name), value);
        Ok(())
    }

    pub fn variable(&self, name: &str) -> Option<&Collection> {
        self.variables.get(name)
    }

    /// A child scope with `$this` and `$index` bound.
    pub fn iteration_scope(&self, this: Value, index: i32) -> Self {
        let mut child = self.clone();
        child.this = Some(this);
        child.index = Some(index);
        child
    }

    /// A child scope with `$this`, `$index`, and `$total` bound.
    pub fn aggregate_scope(&self, this: Value, index: i32, total: Collection) -> Self {
        let mut child = self.iteration_scope(this, index);
        child.total = Some(total);
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_variables_are_seeded() {
        let ctx = Context::new(Collection::singleton(Value::integer(1)));
        assert_eq!(ctx.variable("context").unwrap().len(), 1);
        let ucum = ctx.variable("ucum").unwrap();
        assert_eq!(
            ucum.singleton_string("test").unwrap().unwrap().as_ref(),
            UCUM_URI
        );
    }

    #[test]
    fn reserved_variables_cannot_be_overridden() {
        let mut ctx = Context::new(Collection::empty());
        assert!(ctx.set_variable("context", Collection::empty()).is_err());
        assert!(ctx.set_variable("ucum", Collection::empty()).is_err());
        assert!(ctx.set_variable("mine", Collection::empty()).is_ok());
    }

    #[test]
    fn cancellation_flag_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert_eq!(token.check(), Err(Error::Cancelled));
    }

    #[test]
    fn iteration_scope_binds_lambda_variables() {
        let ctx = Context::new(Collection::empty());
        let scope = ctx.iteration_scope(Value::integer(7), 2);
        assert_eq!(scope.index, Some(2));
        assert!(scope.this.is_some());
        assert!(ctx.this.is_none());
    }
}
