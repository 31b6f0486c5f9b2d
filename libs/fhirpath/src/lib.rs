//! FHIRPath N1 compiler and evaluator (with the R4 extensions) over JSON
//! FHIR resources.
//!
//! ```text
//! source text -> lexer -> parser -> AST -> (validation) -> CompiledExpression
//! (CompiledExpression, input collection, EvalOptions) -> Collection | Error
//! ```
//!
//! Compiled expressions are immutable and thread-safe; evaluation is
//! synchronous and single-threaded per call, with cancellation observed at
//! resolver, terminology, and custom-function boundaries.
//!
//! # Example
//!
//! ```
//! use helix_fhirpath::{CompileOptions, Engine, EvalOptions};
//! use serde_json::json;
//!
//! let engine = Engine::new();
//! let expr = engine
//!     .compile("Patient.name.where(use = 'official').family", CompileOptions::new())
//!     .unwrap();
//! let patient = json!({
//!     "resourceType": "Patient",
//!     "name": [{"use": "official", "family": "Chu"}]
//! });
//! let input = helix_fhirpath::Collection::from_json(&patient);
//! let out = expr.evaluate(input, EvalOptions::new()).unwrap();
//! assert_eq!(out.len(), 1);
//! ```

pub mod ast;
pub mod context;
pub mod engine;
pub mod error;
mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod reference;
pub mod resolver;
mod temporal;
pub mod terminology;
pub mod token;
pub mod types;
pub mod value;

pub use context::{CancellationToken, CollectingSink, Context, TraceSink, TracingSink};
pub use engine::{CompileOptions, CompiledExpression, Engine, EvalOptions};
pub use error::{Error, Result};
pub use eval::FunctionContext;
pub use functions::FunctionHandler;
pub use resolver::{BundleResolver, ReferenceResolver};
pub use terminology::{TerminologyService, ValueSetValidateCodeOptions};
pub use value::{Collection, Value, ValueData};
