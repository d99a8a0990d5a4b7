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

//! Tree-walking interpreter over [`ExpressionNode`]
//!
//! Model data is read by reference and only converted into [`Value`] when an
//! operator, helper or method needs an owned value.

use super::context::{ExecutionContext, indexes_value};
use super::error::{EvaluationError, EvaluationResult};
use super::methods;
use super::operations::{apply_binary, apply_unary};
use crate::ast::{BinaryOperator, CallData, ExpressionNode, LambdaData, LiteralValue};
use crate::model::Value;
use crate::model::value::format_number;
use crate::registry::FunctionRegistry;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

/// Maximum nesting of lambda invocations
const MAX_LAMBDA_DEPTH: usize = 64;

/// Intermediate result of a member chain
#[derive(Debug)]
enum Slot<'v> {
    /// `this` itself
    Root,
    /// Borrowed model data
    Json(&'v JsonValue),
    /// Borrowed binding
    Bound(&'v Value),
    /// Computed value
    Owned(Value),
    /// An optional link met a nullish value; the rest of the chain is skipped
    Skipped,
}

impl Slot<'_> {
    fn into_value(self, context: &ExecutionContext<'_>) -> Value {
        match self {
            Slot::Root => context.snapshot(),
            Slot::Json(json) => Value::from(json),
            Slot::Bound(value) => value.clone(),
            Slot::Owned(value) => value,
            Slot::Skipped => Value::Undefined,
        }
    }

    fn is_nullish(&self) -> bool {
        match self {
            Slot::Root => false,
            Slot::Json(json) => json.is_null(),
            Slot::Bound(value) => value.is_nullish(),
            Slot::Owned(value) => value.is_nullish(),
            Slot::Skipped => true,
        }
    }

    fn nullish_name(&self) -> &'static str {
        match self {
            Slot::Json(JsonValue::Null) | Slot::Bound(Value::Null) | Slot::Owned(Value::Null) => {
                "null"
            }
            _ => "undefined",
        }
    }
}

/// Interpreter for one evaluation; lambdas run in child interpreters that
/// see their parameters first
pub(crate) struct Interpreter<'s> {
    registry: &'s FunctionRegistry,
    context: &'s ExecutionContext<'s>,
    params: IndexMap<String, Value>,
    parent: Option<&'s Interpreter<'s>>,
    depth: usize,
}

impl<'s> Interpreter<'s> {
    pub(crate) fn new(registry: &'s FunctionRegistry, context: &'s ExecutionContext<'s>) -> Self {
        Self {
            registry,
            context,
            params: IndexMap::new(),
            parent: None,
            depth: 0,
        }
    }

    /// Evaluate a node to an owned value
    pub(crate) fn evaluate(&self, node: &ExpressionNode) -> EvaluationResult<Value> {
        Ok(self.eval_slot(node)?.into_value(self.context))
    }

    pub(crate) fn context(&self) -> &ExecutionContext<'s> {
        self.context
    }

    /// Invoke an arrow-function argument with positional arguments
    pub(crate) fn call_lambda(
        &self,
        callback: &ExpressionNode,
        args: &[Value],
    ) -> EvaluationResult<Value> {
        let ExpressionNode::Lambda(lambda) = callback else {
            return Err(EvaluationError::type_error(format!(
                "{callback} is not a function"
            )));
        };
        self.invoke(lambda, args)
    }

    fn invoke(&self, lambda: &LambdaData, args: &[Value]) -> EvaluationResult<Value> {
        if self.depth >= MAX_LAMBDA_DEPTH {
            return Err(EvaluationError::RecursionLimit {
                limit: MAX_LAMBDA_DEPTH,
            });
        }
        let params = lambda
            .params
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), args.get(i).cloned().unwrap_or_default()))
            .collect();
        let child = Interpreter {
            registry: self.registry,
            context: self.context,
            params,
            parent: Some(self),
            depth: self.depth + 1,
        };
        child.evaluate(&lambda.body)
    }

    fn lookup_param(&self, name: &str) -> Option<&Value> {
        match self.params.get(name) {
            Some(value) => Some(value),
            None => self.parent.and_then(|parent| parent.lookup_param(name)),
        }
    }

    fn eval_slot(&self, node: &ExpressionNode) -> EvaluationResult<Slot<'_>> {
        match node {
            ExpressionNode::This => Ok(Slot::Root),
            ExpressionNode::Identifier(name) => match self.lookup_param(name) {
                Some(value) => Ok(Slot::Bound(value)),
                None => match self.registry.constant(name) {
                    Some(value) => Ok(Slot::Owned(value.clone())),
                    None => Err(EvaluationError::UnknownIdentifier { name: name.clone() }),
                },
            },
            ExpressionNode::Member {
                object,
                property,
                optional,
            } => {
                if let Some(name) = self.qualified_name(node) {
                    if let Some(value) = self.registry.constant(&name) {
                        return Ok(Slot::Owned(value.clone()));
                    }
                }
                let base = self.eval_slot(object)?;
                self.member(base, property, *optional)
            }
            ExpressionNode::Index {
                object,
                index,
                optional,
            } => {
                let base = self.eval_slot(object)?;
                if matches!(base, Slot::Skipped) {
                    return Ok(Slot::Skipped);
                }
                let key = property_key(&self.evaluate(index)?);
                self.member(base, &key, *optional)
            }
            ExpressionNode::Call(call) => self.call(call),
            other => self.eval_value(other).map(Slot::Owned),
        }
    }

    fn eval_value(&self, node: &ExpressionNode) -> EvaluationResult<Value> {
        match node {
            ExpressionNode::Literal(literal) => Ok(match literal {
                LiteralValue::Number(n) => Value::Number(*n),
                LiteralValue::String(s) => Value::String(s.clone()),
                LiteralValue::Boolean(b) => Value::Boolean(*b),
                LiteralValue::Null => Value::Null,
                LiteralValue::Undefined => Value::Undefined,
            }),
            ExpressionNode::UnaryOp { op, operand } => {
                Ok(apply_unary(*op, &self.evaluate(operand)?))
            }
            ExpressionNode::BinaryOp(data) => {
                let left = self.evaluate(&data.left)?;
                let decided = match data.op {
                    BinaryOperator::And => !left.is_truthy(),
                    BinaryOperator::Or => left.is_truthy(),
                    BinaryOperator::Coalesce => !left.is_nullish(),
                    _ => false,
                };
                if decided {
                    return Ok(left);
                }
                let right = self.evaluate(&data.right)?;
                Ok(apply_binary(data.op, &left, &right))
            }
            ExpressionNode::Conditional(data) => {
                if self.evaluate(&data.condition)?.is_truthy() {
                    self.evaluate(&data.then_expr)
                } else {
                    self.evaluate(&data.else_expr)
                }
            }
            ExpressionNode::Array(items) => items
                .iter()
                .map(|item| self.evaluate(item))
                .collect::<EvaluationResult<Vec<_>>>()
                .map(Value::Array),
            ExpressionNode::Object(members) => {
                let mut map = IndexMap::with_capacity(members.len());
                for (key, value) in members {
                    map.insert(key.clone(), self.evaluate(value)?);
                }
                Ok(Value::Object(map))
            }
            ExpressionNode::Lambda(_) => Err(EvaluationError::type_error(
                "arrow functions are only allowed as method arguments",
            )),
            other => self.evaluate(other),
        }
    }

    /// `Math.max`, `Object.keys`: dotted name whose root is not a bound parameter
    fn qualified_name(&self, node: &ExpressionNode) -> Option<String> {
        match node {
            ExpressionNode::Identifier(name) if self.lookup_param(name).is_none() => {
                Some(name.clone())
            }
            ExpressionNode::Member {
                object, property, ..
            } => {
                let mut name = self.qualified_name(object)?;
                name.push('.');
                name.push_str(property);
                Some(name)
            }
            _ => None,
        }
    }

    fn member<'v>(&'v self, base: Slot<'v>, key: &str, optional: bool) -> EvaluationResult<Slot<'v>> {
        if matches!(base, Slot::Skipped) {
            return Ok(Slot::Skipped);
        }
        if base.is_nullish() {
            if optional {
                return Ok(Slot::Skipped);
            }
            return Err(EvaluationError::type_error(format!(
                "Cannot read properties of {} (reading '{key}')",
                base.nullish_name()
            )));
        }
        Ok(match base {
            Slot::Root => self.root_member(key),
            Slot::Json(json) => json_member(json, key),
            Slot::Bound(value) => match value_member(value, key) {
                Member::Child(child) => Slot::Bound(child),
                Member::Computed(value) => Slot::Owned(value),
            },
            Slot::Owned(value) => Slot::Owned(match value_member(&value, key) {
                Member::Child(child) => child.clone(),
                Member::Computed(value) => value,
            }),
            Slot::Skipped => Slot::Skipped,
        })
    }

    fn root_member(&self, key: &str) -> Slot<'s> {
        if let Some(value) = self.context.local(key) {
            return Slot::Bound(value);
        }
        match key {
            "global" => match self.context.global() {
                Some(global) => Slot::Json(global),
                None => Slot::Owned(Value::Undefined),
            },
            "indexes" => Slot::Owned(indexes_value(self.context.indexes())),
            _ => json_member(self.context.model(), key),
        }
    }

    fn call(&self, call: &CallData) -> EvaluationResult<Slot<'_>> {
        match &call.callee {
            ExpressionNode::Identifier(name) => {
                if self.lookup_param(name).is_some() {
                    return Err(EvaluationError::type_error(format!(
                        "{name} is not a function"
                    )));
                }
                self.call_helper(name, &call.arguments).map(Slot::Owned)
            }
            ExpressionNode::Member {
                object,
                property,
                optional,
            } => {
                if let Some(name) = self.qualified_name(&call.callee) {
                    if self.registry.contains(&name) {
                        return self.call_helper(&name, &call.arguments).map(Slot::Owned);
                    }
                }
                let receiver = self.eval_slot(object)?;
                if matches!(receiver, Slot::Skipped) {
                    return Ok(Slot::Skipped);
                }
                if matches!(receiver, Slot::Root) && self.registry.contains(property) {
                    // `this.helper()` unless the model shadows the name
                    if self.root_member(property).is_nullish() {
                        return self.call_helper(property, &call.arguments).map(Slot::Owned);
                    }
                }
                if receiver.is_nullish() {
                    if *optional {
                        return Ok(Slot::Skipped);
                    }
                    return Err(EvaluationError::type_error(format!(
                        "Cannot read properties of {} (reading '{property}')",
                        receiver.nullish_name()
                    )));
                }
                let receiver = receiver.into_value(self.context);
                match methods::call_method(self, &receiver, property, &call.arguments) {
                    Err(EvaluationError::UnknownFunction { .. }) if call.optional => {
                        Ok(Slot::Skipped)
                    }
                    result => result.map(Slot::Owned),
                }
            }
            other => {
                let callee = self.eval_slot(other)?;
                if call.optional && callee.is_nullish() {
                    return Ok(Slot::Skipped);
                }
                Err(EvaluationError::type_error(format!("{other} is not a function")))
            }
        }
    }

    fn call_helper(&self, name: &str, arguments: &[ExpressionNode]) -> EvaluationResult<Value> {
        let args = arguments
            .iter()
            .map(|arg| self.evaluate(arg))
            .collect::<EvaluationResult<Vec<_>>>()?;
        match self.registry.call(name, &args, self.context) {
            Some(result) => Ok(result?),
            None => Err(EvaluationError::UnknownFunction {
                name: name.to_string(),
            }),
        }
    }
}

enum Member<'v> {
    Child(&'v Value),
    Computed(Value),
}

/// Key used for computed member access (`a[0]`, `a['b']`)
fn property_key(value: &Value) -> String {
    match value {
        Value::Number(n) => format_number(*n),
        other => other.to_js_string(),
    }
}

fn utf16_len(s: &str) -> f64 {
    s.encode_utf16().count() as f64
}

fn json_member<'v>(json: &'v JsonValue, key: &str) -> Slot<'v> {
    match json {
        JsonValue::Object(map) => map.get(key).map_or(Slot::Owned(Value::Undefined), Slot::Json),
        JsonValue::Array(items) => {
            if key == "length" {
                Slot::Owned(Value::Number(items.len() as f64))
            } else {
                key.parse::<usize>()
                    .ok()
                    .and_then(|index| items.get(index))
                    .map_or(Slot::Owned(Value::Undefined), Slot::Json)
            }
        }
        JsonValue::String(s) => Slot::Owned(string_member(s, key)),
        _ => Slot::Owned(Value::Undefined),
    }
}

fn value_member<'v>(value: &'v Value, key: &str) -> Member<'v> {
    match value {
        Value::Object(map) => map
            .get(key)
            .map_or(Member::Computed(Value::Undefined), Member::Child),
        Value::Array(items) => {
            if key == "length" {
                Member::Computed(Value::Number(items.len() as f64))
            } else {
                key.parse::<usize>()
                    .ok()
                    .and_then(|index| items.get(index))
                    .map_or(Member::Computed(Value::Undefined), Member::Child)
            }
        }
        Value::String(s) => Member::Computed(string_member(s, key)),
        _ => Member::Computed(Value::Undefined),
    }
}

fn string_member(s: &str, key: &str) -> Value {
    if key == "length" {
        return Value::Number(utf16_len(s));
    }
    key.parse::<usize>()
        .ok()
        .and_then(|index| s.chars().nth(index))
        .map_or(Value::Undefined, |c| Value::String(c.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn eval_with(source: &str, ctx: &ExecutionContext<'_>) -> EvaluationResult<Value> {
        let registry = FunctionRegistry::standard();
        let ast = parse(source).unwrap();
        Interpreter::new(&registry, ctx).evaluate(&ast)
    }

    fn eval(source: &str) -> Value {
        let model = json!({
            "name": "Ada",
            "age": 36,
            "tags": ["a", "b", "c"],
            "address": {"city": "London", "zip": null},
            "items": [{"id": 1, "price": 5}, {"id": 2, "price": 7}]
        });
        let global = json!({"mode": "edit"});
        let ctx = ExecutionContext::new(&model).with_global(Some(&global));
        eval_with(source, &ctx).unwrap()
    }

    #[rstest]
    #[case("this.name", Value::from("Ada"))]
    #[case("this.age > 30 && this.name", Value::from("Ada"))]
    #[case("this.missing || 'fallback'", Value::from("fallback"))]
    #[case("this.address.zip ?? 'none'", Value::from("none"))]
    #[case("this.tags.length", Value::Number(3.0))]
    #[case("this.tags[1]", Value::from("b"))]
    #[case("this['address']['city']", Value::from("London"))]
    #[case("this.items[1].price * 2", Value::Number(14.0))]
    #[case("this.global.mode === 'edit'", Value::Boolean(true))]
    #[case("this.missing?.deep.deeper", Value::Undefined)]
    #[case("this.age >= 18 ? 'adult' : 'minor'", Value::from("adult"))]
    #[case("Math.max(this.items[0].price, 6)", Value::Number(6.0))]
    #[case("Math.PI > 3", Value::Boolean(true))]
    #[case("this.name.length + 1", Value::Number(4.0))]
    #[case("typeof this.missing", Value::from("undefined"))]
    #[case("this.indexes.length", Value::Number(0.0))]
    fn test_evaluate(#[case] source: &str, #[case] expected: Value) {
        assert_eq!(eval(source), expected);
    }

    #[test]
    fn test_lambdas_see_outer_params() {
        assert_eq!(
            eval("this.items.map(i => this.tags.some(t => t === 'b') ? i.id : 0)"),
            Value::Array(vec![Value::Number(1.0), Value::Number(2.0)])
        );
    }

    #[test]
    fn test_member_of_undefined_is_type_error() {
        let model = json!({});
        let ctx = ExecutionContext::new(&model);
        assert!(matches!(
            eval_with("this.a.b", &ctx),
            Err(EvaluationError::TypeError { .. })
        ));
        assert_eq!(eval_with("this.a?.b", &ctx).unwrap(), Value::Undefined);
    }

    #[test]
    fn test_locals_shadow_model() {
        let model = json!({"x": 1});
        let ctx = ExecutionContext::new(&model).with_local("x", Value::Number(5.0));
        assert_eq!(eval_with("this.x + 1", &ctx).unwrap(), Value::Number(6.0));
    }

    #[test]
    fn test_this_helper_falls_back_to_registry() {
        let model = json!({"n": "12"});
        let ctx = ExecutionContext::new(&model);
        assert_eq!(
            eval_with("this.parseInt(this.n) + 1", &ctx).unwrap(),
            Value::Number(13.0)
        );
    }

    #[test]
    fn test_unknown_identifiers_and_functions() {
        let model = json!({});
        let ctx = ExecutionContext::new(&model);
        assert!(matches!(
            eval_with("nope + 1", &ctx),
            Err(EvaluationError::UnknownIdentifier { .. })
        ));
        assert!(matches!(
            eval_with("nope(1)", &ctx),
            Err(EvaluationError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn test_short_circuit_skips_errors() {
        let model = json!({});
        let ctx = ExecutionContext::new(&model);
        assert_eq!(
            eval_with("false && this.a.b", &ctx).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(eval_with("1 ?? this.a.b", &ctx).unwrap(), Value::Number(1.0));
    }
}
