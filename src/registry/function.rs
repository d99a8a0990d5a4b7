// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Function registry and the function trait

use super::signature::FunctionSignature;
use crate::evaluator::ExecutionContext;
use crate::model::Value;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type for function operations
pub type FunctionResult<T> = Result<T, FunctionError>;

/// Function evaluation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FunctionError {
    /// Invalid number of arguments
    #[error("Function '{name}' expects {min}-{} arguments, got {actual}", max.map_or("∞".to_string(), |n| n.to_string()))]
    InvalidArity {
        /// Function name
        name: String,
        /// Minimum arguments
        min: usize,
        /// Maximum arguments (None for unlimited)
        max: Option<usize>,
        /// Actual arguments provided
        actual: usize,
    },

    /// Invalid argument type
    #[error("Function '{name}' argument {index} expects {expected}, got {actual}")]
    InvalidArgumentType {
        /// Function name
        name: String,
        /// Argument index
        index: usize,
        /// Expected type
        expected: String,
        /// Actual type
        actual: String,
    },

    /// Runtime evaluation error
    #[error("Function '{name}' evaluation error: {message}")]
    EvaluationError {
        /// Function name
        name: String,
        /// Error message
        message: String,
    },
}

/// Helper callable from expressions
///
/// Helpers are pure with respect to the model: they receive evaluated
/// arguments and a read-only view of the execution context.
pub trait FormFunction: Send + Sync {
    /// Get the function name
    fn name(&self) -> &str;

    /// Get the function signature
    fn signature(&self) -> &FunctionSignature;

    /// Evaluate the function with given arguments
    fn evaluate(&self, args: &[Value], context: &ExecutionContext<'_>) -> FunctionResult<Value>;

    /// Get function documentation
    fn documentation(&self) -> &str {
        ""
    }

    /// Validate the argument count against the signature
    fn validate_args(&self, args: &[Value]) -> FunctionResult<()> {
        let sig = self.signature();
        if sig.accepts(args.len()) {
            Ok(())
        } else {
            Err(FunctionError::InvalidArity {
                name: self.name().to_string(),
                min: sig.min_arity,
                max: sig.max_arity,
                actual: args.len(),
            })
        }
    }
}

type FunctionBody =
    dyn Fn(&[Value], &ExecutionContext<'_>) -> FunctionResult<Value> + Send + Sync + 'static;

/// Closure-backed [`FormFunction`]
pub struct ClosureFunction {
    signature: FunctionSignature,
    documentation: String,
    body: Box<FunctionBody>,
}

impl ClosureFunction {
    /// Wrap a closure under `signature`
    pub fn new<F>(signature: FunctionSignature, body: F) -> Self
    where
        F: Fn(&[Value], &ExecutionContext<'_>) -> FunctionResult<Value> + Send + Sync + 'static,
    {
        Self {
            signature,
            documentation: String::new(),
            body: Box::new(body),
        }
    }

    /// Attach documentation shown by the CLI
    pub fn with_documentation(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = documentation.into();
        self
    }
}

impl FormFunction for ClosureFunction {
    fn name(&self) -> &str {
        &self.signature.name
    }

    fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    fn evaluate(&self, args: &[Value], context: &ExecutionContext<'_>) -> FunctionResult<Value> {
        (self.body)(args, context)
    }

    fn documentation(&self) -> &str {
        &self.documentation
    }
}

/// Registry of helpers and named constants (`Math.PI`)
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: FxHashMap<String, Arc<dyn FormFunction>>,
    constants: FxHashMap<String, Value>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("function_count", &self.functions.len())
            .field("constant_count", &self.constants.len())
            .finish()
    }
}

impl FunctionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every built-in helper
    pub fn standard() -> Self {
        let mut registry = Self::new();
        super::builtins::register_builtin_functions(&mut registry);
        registry
    }

    /// Register a trait-based function, replacing any previous one of that name
    pub fn register<F: FormFunction + 'static>(&mut self, function: F) {
        self.functions
            .insert(function.name().to_string(), Arc::new(function));
    }

    /// Register a closure
    pub fn register_fn<F>(&mut self, signature: FunctionSignature, body: F)
    where
        F: Fn(&[Value], &ExecutionContext<'_>) -> FunctionResult<Value> + Send + Sync + 'static,
    {
        self.register(ClosureFunction::new(signature, body));
    }

    /// Register a named constant
    pub fn register_constant(&mut self, name: impl Into<String>, value: Value) {
        self.constants.insert(name.into(), value);
    }

    /// Look up a function
    pub fn get(&self, name: &str) -> Option<&Arc<dyn FormFunction>> {
        self.functions.get(name)
    }

    /// Look up a constant
    pub fn constant(&self, name: &str) -> Option<&Value> {
        self.constants.get(name)
    }

    /// Whether a function is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered function names, sorted
    pub fn function_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// True when no function is registered
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Validate and invoke `name`; `None` when it is not registered
    pub fn call(
        &self,
        name: &str,
        args: &[Value],
        context: &ExecutionContext<'_>,
    ) -> Option<FunctionResult<Value>> {
        let function = self.get(name)?;
        Some(
            function
                .validate_args(args)
                .and_then(|()| function.evaluate(args, context)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_call() {
        let mut registry = FunctionRegistry::new();
        registry.register_fn(FunctionSignature::new("double", &["n"], 0), |args, _| {
            Ok(Value::Number(args[0].to_number() * 2.0))
        });

        let model = json!({});
        let ctx = ExecutionContext::new(&model);
        assert_eq!(
            registry.call("double", &[Value::Number(4.0)], &ctx),
            Some(Ok(Value::Number(8.0)))
        );
        assert!(matches!(
            registry.call("double", &[], &ctx),
            Some(Err(FunctionError::InvalidArity { actual: 0, .. }))
        ));
        assert!(registry.call("missing", &[], &ctx).is_none());
        assert_eq!(registry.function_names(), vec!["double"]);
    }

    #[test]
    fn test_standard_registry_has_math() {
        let registry = FunctionRegistry::standard();
        assert!(registry.contains("Math.max"));
        assert!(registry.constant("Math.PI").is_some());
    }
}
