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

//! Form expression evaluator
//!
//! [`ExpressionEngine`] normalizes relative references against the context
//! scope, compiles through a per-engine [`ExpressionCache`] and runs the
//! resulting AST with a sandboxed interpreter. Nothing is ever executed as
//! host code.

#![warn(missing_docs)]

mod cache;
mod context;
mod error;
mod interpreter;
mod methods;
pub mod operations;

pub use cache::{CacheEntry, CacheStats, CompiledExpression, ExpressionCache};
pub use context::ExecutionContext;
pub use error::{EvaluationError, EvaluationResult};

use crate::config::EngineConfig;
use crate::model::{FieldPath, Value};
use crate::parser::normalize;
use crate::registry::FunctionRegistry;
use interpreter::Interpreter;
use std::sync::Arc;

/// Expression compiler and evaluator bound to one function registry
#[derive(Debug)]
pub struct ExpressionEngine {
    registry: Arc<FunctionRegistry>,
    cache: ExpressionCache,
    log_failures: bool,
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new(Arc::new(FunctionRegistry::standard()), &EngineConfig::default())
    }
}

impl ExpressionEngine {
    /// Create an engine over `registry`, sized by `config`
    pub fn new(registry: Arc<FunctionRegistry>, config: &EngineConfig) -> Self {
        Self {
            registry,
            cache: ExpressionCache::new(config.expression_cache_size),
            log_failures: config.log_expression_failures,
        }
    }

    /// The helper registry
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// The compiled-expression cache
    pub fn cache(&self) -> &ExpressionCache {
        &self.cache
    }

    /// Normalize `source` against `scope` and compile it (cached)
    pub fn compile(
        &self,
        source: &str,
        scope: &FieldPath,
    ) -> EvaluationResult<Arc<CompiledExpression>> {
        let normalized = normalize(source, scope)?;
        Ok(self.cache.get_or_compile(&normalized)?)
    }

    /// Evaluate `source` in `context`, reporting every failure
    pub fn try_evaluate(
        &self,
        source: &str,
        context: &ExecutionContext<'_>,
    ) -> EvaluationResult<Value> {
        let compiled = self.compile(source, context.scope())?;
        self.run(&compiled, context)
    }

    /// Evaluate an already compiled expression
    pub fn run(
        &self,
        compiled: &CompiledExpression,
        context: &ExecutionContext<'_>,
    ) -> EvaluationResult<Value> {
        Interpreter::new(&self.registry, context).evaluate(compiled.ast())
    }

    /// Evaluate `source`, degrading any failure to `undefined`
    pub fn evaluate(&self, source: &str, context: &ExecutionContext<'_>) -> Value {
        match self.try_evaluate(source, context) {
            Ok(value) => value,
            Err(err) => {
                self.report_failure(source, &err);
                Value::Undefined
            }
        }
    }

    /// Context paths `source` reads once normalized against `scope`
    pub fn references(&self, source: &str, scope: &FieldPath) -> EvaluationResult<Vec<FieldPath>> {
        Ok(self.compile(source, scope)?.references().to_vec())
    }

    /// Log a swallowed evaluation failure
    pub fn report_failure(&self, source: &str, err: &EvaluationError) {
        if self.log_failures {
            log::warn!("expression '{source}' failed: {err}");
        } else {
            log::debug!("expression '{source}' failed: {err}");
        }
    }
}

/// Evaluate `source` once with the standard registry and no cache
pub fn evaluate(source: &str, context: &ExecutionContext<'_>) -> Value {
    ExpressionEngine::new(
        Arc::new(FunctionRegistry::standard()),
        &EngineConfig::disabled_cache(),
    )
    .evaluate(source, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_relative_references_resolve_against_scope() {
        let model = json!({"person": {"age": 20, "name": "Bo"}});
        let engine = ExpressionEngine::default();
        let ctx = ExecutionContext::new(&model).with_scope(FieldPath::parse("person").unwrap());
        assert_eq!(
            engine.try_evaluate("./age >= 18 && /person.name", &ctx).unwrap(),
            Value::from("Bo")
        );
    }

    #[test]
    fn test_global_and_indexes() {
        let model = json!({"rows": [{"v": 1}, {"v": 2}, {"v": 3}]});
        let global = json!({"limit": 2});
        let engine = ExpressionEngine::default();
        let ctx = ExecutionContext::new(&model)
            .with_global(Some(&global))
            .with_scope(FieldPath::parse("rows[2]").unwrap());
        assert_eq!(
            engine.try_evaluate("this.indexes[0] >= G/limit", &ctx).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            engine.try_evaluate("./v + ../length", &ctx).unwrap(),
            Value::Number(6.0)
        );
    }

    #[test]
    fn test_lenient_evaluate_degrades_to_undefined() {
        let model = json!({});
        let engine = ExpressionEngine::default();
        let ctx = ExecutionContext::new(&model);
        assert_eq!(engine.evaluate("this.a.b", &ctx), Value::Undefined);
        assert_eq!(engine.evaluate("1 +", &ctx), Value::Undefined);
        assert_eq!(engine.evaluate("../x", &ctx), Value::Undefined);
        assert!(matches!(
            engine.try_evaluate("../x", &ctx),
            Err(EvaluationError::Path(_))
        ));
    }

    #[test]
    fn test_same_normalized_source_shares_cache_entry() {
        let model = json!({"a": {"x": 1}, "b": {"x": 2}});
        let engine = ExpressionEngine::default();
        let at = |scope: &str| ExecutionContext::new(&model).with_scope(FieldPath::parse(scope).unwrap());
        assert_eq!(engine.evaluate("/a.x", &at("a")), Value::Number(1.0));
        assert_eq!(engine.evaluate("/a.x", &at("b")), Value::Number(1.0));
        assert_eq!(engine.evaluate("./x", &at("b")), Value::Number(2.0));
        let stats = engine.cache().stats();
        assert_eq!((stats.hits, stats.misses), (1, 2));
    }

    #[test]
    fn test_references_are_absolute() {
        let engine = ExpressionEngine::default();
        let refs = engine
            .references("./age > 1 && G/flag", &FieldPath::parse("p").unwrap())
            .unwrap();
        let refs: Vec<String> = refs.iter().map(ToString::to_string).collect();
        assert_eq!(refs, vec!["p.age", "global.flag"]);
    }
}
