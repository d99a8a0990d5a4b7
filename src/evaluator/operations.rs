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

//! Operator semantics for runtime values
//!
//! Short-circuit operators (`&&`, `||`, `??`) are handled by the interpreter
//! since they must not evaluate their right operand eagerly.

use crate::ast::{BinaryOperator, UnaryOperator};
use crate::model::Value;
use std::cmp::Ordering;

/// Apply a non short-circuit binary operator
pub fn apply_binary(op: BinaryOperator, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOperator::Add => add(left, right),
        BinaryOperator::Subtract => Value::Number(left.to_number() - right.to_number()),
        BinaryOperator::Multiply => Value::Number(left.to_number() * right.to_number()),
        BinaryOperator::Divide => Value::Number(left.to_number() / right.to_number()),
        BinaryOperator::Modulo => Value::Number(left.to_number() % right.to_number()),
        BinaryOperator::Equal => Value::Boolean(left.loose_equals(right)),
        BinaryOperator::NotEqual => Value::Boolean(!left.loose_equals(right)),
        BinaryOperator::StrictEqual => Value::Boolean(left.strict_equals(right)),
        BinaryOperator::StrictNotEqual => Value::Boolean(!left.strict_equals(right)),
        BinaryOperator::LessThan => relational(left, right, |o| o == Ordering::Less),
        BinaryOperator::LessThanOrEqual => relational(left, right, |o| o != Ordering::Greater),
        BinaryOperator::GreaterThan => relational(left, right, |o| o == Ordering::Greater),
        BinaryOperator::GreaterThanOrEqual => relational(left, right, |o| o != Ordering::Less),
        // only reached when the caller did not short-circuit
        BinaryOperator::And => {
            if left.is_truthy() {
                right.clone()
            } else {
                left.clone()
            }
        }
        BinaryOperator::Or => {
            if left.is_truthy() {
                left.clone()
            } else {
                right.clone()
            }
        }
        BinaryOperator::Coalesce => {
            if left.is_nullish() {
                right.clone()
            } else {
                left.clone()
            }
        }
    }
}

/// Apply a unary operator
pub fn apply_unary(op: UnaryOperator, operand: &Value) -> Value {
    match op {
        UnaryOperator::Not => Value::Boolean(!operand.is_truthy()),
        UnaryOperator::Minus => Value::Number(-operand.to_number()),
        UnaryOperator::Plus => Value::Number(operand.to_number()),
        UnaryOperator::TypeOf => Value::string(operand.type_of()),
    }
}

/// `+`: concatenation when either side is a string after primitive conversion
fn add(left: &Value, right: &Value) -> Value {
    let is_textual = |v: &Value| matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_));
    if is_textual(left) || is_textual(right) {
        let mut out = left.to_js_string();
        out.push_str(&right.to_js_string());
        Value::String(out)
    } else {
        Value::Number(left.to_number() + right.to_number())
    }
}

/// String operands compare lexicographically, anything else numerically;
/// `NaN` makes every comparison false
fn relational(left: &Value, right: &Value, accept: impl Fn(Ordering) -> bool) -> Value {
    let ordering = match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    };
    Value::Boolean(ordering.is_some_and(accept))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn n(value: f64) -> Value {
        Value::Number(value)
    }

    #[rstest]
    #[case(BinaryOperator::Add, n(1.0), n(2.0), n(3.0))]
    #[case(BinaryOperator::Add, Value::from("a"), n(1.0), Value::from("a1"))]
    #[case(BinaryOperator::Add, n(1.0), Value::Null, n(1.0))]
    #[case(BinaryOperator::Add, Value::Array(vec![n(1.0), n(2.0)]), Value::from("x"), Value::from("1,2x"))]
    #[case(BinaryOperator::Subtract, Value::from("5"), n(2.0), n(3.0))]
    #[case(BinaryOperator::Modulo, n(-7.0), n(3.0), n(-1.0))]
    #[case(BinaryOperator::Equal, Value::from("1"), n(1.0), Value::Boolean(true))]
    #[case(BinaryOperator::Equal, Value::Null, Value::Undefined, Value::Boolean(true))]
    #[case(BinaryOperator::StrictEqual, Value::from("1"), n(1.0), Value::Boolean(false))]
    #[case(BinaryOperator::StrictNotEqual, Value::Null, Value::Undefined, Value::Boolean(true))]
    #[case(BinaryOperator::LessThan, Value::from("10"), Value::from("9"), Value::Boolean(true))]
    #[case(BinaryOperator::LessThan, Value::from("10"), n(9.0), Value::Boolean(false))]
    #[case(BinaryOperator::GreaterThanOrEqual, Value::Undefined, n(0.0), Value::Boolean(false))]
    #[case(BinaryOperator::LessThanOrEqual, Value::Null, n(0.0), Value::Boolean(true))]
    fn test_binary(
        #[case] op: BinaryOperator,
        #[case] left: Value,
        #[case] right: Value,
        #[case] expected: Value,
    ) {
        assert_eq!(apply_binary(op, &left, &right), expected);
    }

    #[test]
    fn test_unary() {
        assert_eq!(apply_unary(UnaryOperator::Not, &Value::from("")), Value::Boolean(true));
        assert_eq!(apply_unary(UnaryOperator::Plus, &Value::from("4")), n(4.0));
        assert_eq!(apply_unary(UnaryOperator::Minus, &Value::Boolean(true)), n(-1.0));
        assert_eq!(
            apply_unary(UnaryOperator::TypeOf, &Value::Null),
            Value::from("object")
        );
    }
}
