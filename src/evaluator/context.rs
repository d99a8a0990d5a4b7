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

//! Execution context for expression evaluation

use crate::model::{FieldPath, Value};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

/// Scope an expression evaluates against
///
/// `this.<key>` resolves the first key against the local bindings, then the
/// reserved `global` and `indexes` names, and finally the model root.
#[derive(Debug, Clone)]
pub struct ExecutionContext<'a> {
    model: &'a JsonValue,
    global: Option<&'a JsonValue>,
    indexes: Vec<usize>,
    locals: IndexMap<String, Value>,
    scope: FieldPath,
}

impl<'a> ExecutionContext<'a> {
    /// Create a context over the model root
    pub fn new(model: &'a JsonValue) -> Self {
        Self {
            model,
            global: None,
            indexes: Vec::new(),
            locals: IndexMap::new(),
            scope: FieldPath::root(),
        }
    }

    /// Attach the host global object (`G/`, `this.global`)
    pub fn with_global(mut self, global: Option<&'a JsonValue>) -> Self {
        self.global = global;
        self
    }

    /// Set the path relative references resolve against; array positions on
    /// the path become `this.indexes`
    pub fn with_scope(mut self, scope: FieldPath) -> Self {
        self.indexes = scope.indexes();
        self.scope = scope;
        self
    }

    /// Override the array positions exposed as `this.indexes`
    pub fn with_indexes(mut self, indexes: Vec<usize>) -> Self {
        self.indexes = indexes;
        self
    }

    /// Bind a local name (`let` declarations, candidate `item`/`index`)
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.locals.insert(name.into(), value);
    }

    /// Builder form of [`ExecutionContext::bind`]
    pub fn with_local(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bind(name, value);
        self
    }

    /// Model root
    pub fn model(&self) -> &'a JsonValue {
        self.model
    }

    /// Host global object
    pub fn global(&self) -> Option<&'a JsonValue> {
        self.global
    }

    /// Array positions of the current field, outermost first
    pub fn indexes(&self) -> &[usize] {
        &self.indexes
    }

    /// Local binding by name
    pub fn local(&self, name: &str) -> Option<&Value> {
        self.locals.get(name)
    }

    /// All local bindings in declaration order
    pub fn locals(&self) -> &IndexMap<String, Value> {
        &self.locals
    }

    /// Path relative references resolve against
    pub fn scope(&self) -> &FieldPath {
        &self.scope
    }

    /// Materialize `this` as a single value
    pub fn snapshot(&self) -> Value {
        let mut root = match Value::from(self.model) {
            Value::Object(map) => map,
            _ => IndexMap::new(),
        };
        if let Some(global) = self.global {
            root.insert("global".to_string(), Value::from(global));
        }
        root.insert("indexes".to_string(), indexes_value(&self.indexes));
        for (name, value) in &self.locals {
            root.insert(name.clone(), value.clone());
        }
        Value::Object(root)
    }
}

pub(crate) fn indexes_value(indexes: &[usize]) -> Value {
    Value::Array(indexes.iter().map(|&i| Value::Number(i as f64)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scope_sets_indexes() {
        let model = json!({});
        let ctx = ExecutionContext::new(&model)
            .with_scope(FieldPath::parse("rows[3].cells[1].value").unwrap());
        assert_eq!(ctx.indexes(), &[3, 1]);
        assert_eq!(ctx.scope().to_string(), "rows.3.cells.1.value");
    }

    #[test]
    fn test_snapshot_layers_locals_over_model() {
        let model = json!({"a": 1, "b": 2});
        let global = json!({"lang": "en"});
        let ctx = ExecutionContext::new(&model)
            .with_global(Some(&global))
            .with_local("b", Value::from("local"));
        let Value::Object(root) = ctx.snapshot() else {
            panic!("snapshot must be an object");
        };
        assert_eq!(root.get("a"), Some(&Value::Number(1.0)));
        assert_eq!(root.get("b"), Some(&Value::from("local")));
        assert!(matches!(root.get("global"), Some(Value::Object(_))));
        assert_eq!(root.get("indexes"), Some(&Value::Array(vec![])));
    }
}
