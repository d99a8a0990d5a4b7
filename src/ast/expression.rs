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

//! Expression AST node definitions

use super::operator::{BinaryOperator, UnaryOperator};
use crate::model::value::format_number;
use std::fmt;

/// AST representation of form expressions
///
/// Large variants are boxed to keep the enum small.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionNode {
    /// Literal value (string, number, boolean, null, undefined)
    Literal(LiteralValue),

    /// The execution context (`this`)
    This,

    /// Bare identifier: lambda parameter, helper or helper namespace
    Identifier(String),

    /// Static member access (`object.property`, `object?.property`)
    Member {
        /// Base expression
        object: Box<ExpressionNode>,
        /// Property name
        property: String,
        /// Written with `?.`
        optional: bool,
    },

    /// Computed member access (`object[index]`)
    Index {
        /// Base expression
        object: Box<ExpressionNode>,
        /// Index expression
        index: Box<ExpressionNode>,
        /// Written with `?.[`
        optional: bool,
    },

    /// Call of a helper or built-in method (boxed for size optimization)
    Call(Box<CallData>),

    /// Unary operation
    UnaryOp {
        /// The operator
        op: UnaryOperator,
        /// The operand
        operand: Box<ExpressionNode>,
    },

    /// Binary operation (boxed for size optimization)
    BinaryOp(Box<BinaryOpData>),

    /// Ternary conditional (boxed for size optimization)
    Conditional(Box<ConditionalData>),

    /// Array literal
    Array(Vec<ExpressionNode>),

    /// Object literal with ordered members
    Object(Vec<(String, ExpressionNode)>),

    /// Arrow function passed to array methods (boxed for size optimization)
    Lambda(Box<LambdaData>),
}

/// Literal values
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    /// Numeric literal
    Number(f64),
    /// String literal with escapes already processed
    String(String),
    /// `true` / `false`
    Boolean(bool),
    /// `null`
    Null,
    /// `undefined`
    Undefined,
}

/// Call data
#[derive(Debug, Clone, PartialEq)]
pub struct CallData {
    /// Expression being called
    pub callee: ExpressionNode,
    /// Arguments in order
    pub arguments: Vec<ExpressionNode>,
    /// Written with `?.(`
    pub optional: bool,
}

/// Binary operation data
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryOpData {
    /// The operator
    pub op: BinaryOperator,
    /// Left operand
    pub left: ExpressionNode,
    /// Right operand
    pub right: ExpressionNode,
}

/// Ternary conditional data
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalData {
    /// Condition
    pub condition: ExpressionNode,
    /// Value when the condition is truthy
    pub then_expr: ExpressionNode,
    /// Value otherwise
    pub else_expr: ExpressionNode,
}

/// Arrow function data
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaData {
    /// Parameter names
    pub params: Vec<String>,
    /// Function body
    pub body: ExpressionNode,
}

impl ExpressionNode {
    /// Create a literal node
    pub fn literal(value: LiteralValue) -> Self {
        Self::Literal(value)
    }

    /// Create an identifier node
    pub fn identifier(name: impl Into<String>) -> Self {
        Self::Identifier(name.into())
    }

    /// Create a static member access node
    pub fn member(object: ExpressionNode, property: impl Into<String>, optional: bool) -> Self {
        Self::Member {
            object: Box::new(object),
            property: property.into(),
            optional,
        }
    }

    /// Create a computed member access node
    pub fn index(object: ExpressionNode, index: ExpressionNode, optional: bool) -> Self {
        Self::Index {
            object: Box::new(object),
            index: Box::new(index),
            optional,
        }
    }

    /// Create a call node
    pub fn call(callee: ExpressionNode, arguments: Vec<ExpressionNode>, optional: bool) -> Self {
        Self::Call(Box::new(CallData {
            callee,
            arguments,
            optional,
        }))
    }

    /// Create a unary operation node
    pub fn unary_op(op: UnaryOperator, operand: ExpressionNode) -> Self {
        Self::UnaryOp {
            op,
            operand: Box::new(operand),
        }
    }

    /// Create a binary operation node
    pub fn binary_op(op: BinaryOperator, left: ExpressionNode, right: ExpressionNode) -> Self {
        Self::BinaryOp(Box::new(BinaryOpData { op, left, right }))
    }

    /// Create a ternary conditional node
    pub fn conditional(
        condition: ExpressionNode,
        then_expr: ExpressionNode,
        else_expr: ExpressionNode,
    ) -> Self {
        Self::Conditional(Box::new(ConditionalData {
            condition,
            then_expr,
            else_expr,
        }))
    }

    /// Create an arrow function node
    pub fn lambda(params: Vec<String>, body: ExpressionNode) -> Self {
        Self::Lambda(Box::new(LambdaData { params, body }))
    }

    /// Static member chain rooted at `this`, e.g. `this.a[0].b` gives `["a", "0", "b"]`
    pub fn this_chain(&self) -> Option<Vec<String>> {
        match self {
            Self::This => Some(Vec::new()),
            Self::Member {
                object, property, ..
            } => {
                let mut chain = object.this_chain()?;
                chain.push(property.clone());
                Some(chain)
            }
            Self::Index { object, index, .. } => {
                let key = match index.as_ref() {
                    Self::Literal(LiteralValue::String(s)) => s.clone(),
                    Self::Literal(LiteralValue::Number(n)) => format_number(*n),
                    _ => return None,
                };
                let mut chain = object.this_chain()?;
                chain.push(key);
                Some(chain)
            }
            _ => None,
        }
    }
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Number(n) => f.write_str(&format_number(*n)),
            LiteralValue::String(s) => {
                write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
            }
            LiteralValue::Boolean(b) => write!(f, "{b}"),
            LiteralValue::Null => f.write_str("null"),
            LiteralValue::Undefined => f.write_str("undefined"),
        }
    }
}

impl fmt::Display for ExpressionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(literal) => write!(f, "{literal}"),
            Self::This => f.write_str("this"),
            Self::Identifier(name) => f.write_str(name),
            Self::Member {
                object,
                property,
                optional,
            } => {
                let dot = if *optional { "?." } else { "." };
                write!(f, "{object}{dot}{property}")
            }
            Self::Index {
                object,
                index,
                optional,
            } => {
                let open = if *optional { "?.[" } else { "[" };
                write!(f, "{object}{open}{index}]")
            }
            Self::Call(call) => {
                write!(f, "{}", call.callee)?;
                f.write_str(if call.optional { "?.(" } else { "(" })?;
                write_list(f, &call.arguments)?;
                f.write_str(")")
            }
            Self::UnaryOp { op, operand } => write!(f, "{op}{operand}"),
            Self::BinaryOp(data) => write!(f, "({} {} {})", data.left, data.op, data.right),
            Self::Conditional(data) => write!(
                f,
                "({} ? {} : {})",
                data.condition, data.then_expr, data.else_expr
            ),
            Self::Array(items) => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
            Self::Object(members) => {
                f.write_str("{")?;
                for (i, (key, value)) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            Self::Lambda(lambda) => write!(f, "({}) => {}", lambda.params.join(", "), lambda.body),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[ExpressionNode]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}
