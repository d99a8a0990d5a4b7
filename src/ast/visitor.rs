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

//! Visitor pattern for AST traversal

use super::expression::{ExpressionNode, LiteralValue};
use crate::model::path::{FieldPath, PathSegment};

/// Trait for visiting AST nodes
///
/// Every method defaults to walking the children, so implementors override
/// only the nodes they care about.
pub trait Visitor: Sized {
    /// Visit an expression node
    fn visit_expression(&mut self, expr: &ExpressionNode) {
        walk_expression(self, expr)
    }

    /// Visit a literal
    fn visit_literal(&mut self, _literal: &LiteralValue) {}

    /// Visit a bare identifier
    fn visit_identifier(&mut self, _name: &str) {}

    /// Visit a member access (static or computed)
    fn visit_member(&mut self, expr: &ExpressionNode) {
        walk_expression(self, expr)
    }

    /// Visit a call
    fn visit_call(&mut self, callee: &ExpressionNode, arguments: &[ExpressionNode]) {
        self.visit_expression(callee);
        for argument in arguments {
            self.visit_expression(argument);
        }
    }
}

/// Walk the children of an expression
pub fn walk_expression<V: Visitor>(visitor: &mut V, expr: &ExpressionNode) {
    match expr {
        ExpressionNode::Literal(literal) => visitor.visit_literal(literal),
        ExpressionNode::This => {}
        ExpressionNode::Identifier(name) => visitor.visit_identifier(name),
        ExpressionNode::Member { object, .. } => visitor.visit_expression(object),
        ExpressionNode::Index { object, index, .. } => {
            visitor.visit_expression(object);
            visitor.visit_expression(index);
        }
        ExpressionNode::Call(call) => visitor.visit_call(&call.callee, &call.arguments),
        ExpressionNode::UnaryOp { operand, .. } => visitor.visit_expression(operand),
        ExpressionNode::BinaryOp(data) => {
            visitor.visit_expression(&data.left);
            visitor.visit_expression(&data.right);
        }
        ExpressionNode::Conditional(data) => {
            visitor.visit_expression(&data.condition);
            visitor.visit_expression(&data.then_expr);
            visitor.visit_expression(&data.else_expr);
        }
        ExpressionNode::Array(items) => {
            for item in items {
                visitor.visit_expression(item);
            }
        }
        ExpressionNode::Object(members) => {
            for (_, value) in members {
                visitor.visit_expression(value);
            }
        }
        ExpressionNode::Lambda(lambda) => visitor.visit_expression(&lambda.body),
    }
}

/// Collects the context paths (`this.a.b`) an expression reads
#[derive(Debug, Default)]
pub struct ReferenceCollector {
    references: Vec<FieldPath>,
}

impl ReferenceCollector {
    /// Collect the references of a single expression
    pub fn collect(expr: &ExpressionNode) -> Vec<FieldPath> {
        let mut collector = Self::default();
        collector.visit_expression(expr);
        collector.references
    }

    fn record(&mut self, chain: Vec<String>) {
        if chain.is_empty() {
            return;
        }
        let path = FieldPath::from_segments(chain.into_iter().map(|key| {
            match key.parse::<usize>() {
                Ok(index) => PathSegment::Index(index),
                Err(_) => PathSegment::Key(key),
            }
        }));
        if !self.references.contains(&path) {
            self.references.push(path);
        }
    }
}

impl Visitor for ReferenceCollector {
    fn visit_expression(&mut self, expr: &ExpressionNode) {
        match expr {
            ExpressionNode::Member { .. } | ExpressionNode::Index { .. } => {
                self.visit_member(expr)
            }
            _ => walk_expression(self, expr),
        }
    }

    fn visit_member(&mut self, expr: &ExpressionNode) {
        match expr.this_chain() {
            Some(chain) => self.record(chain),
            None => walk_expression(self, expr),
        }
    }

    fn visit_call(&mut self, callee: &ExpressionNode, arguments: &[ExpressionNode]) {
        // the receiver of a method call is the dependency, not the method name
        match callee {
            ExpressionNode::Member { object, .. } => self.visit_expression(object),
            other => self.visit_expression(other),
        }
        for argument in arguments {
            self.visit_expression(argument);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn refs(source: &str) -> Vec<String> {
        ReferenceCollector::collect(&parse(source).unwrap())
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn collects_member_chains() {
        assert_eq!(
            refs("this.car.year > 1960 && this.owner['name'] != ''"),
            vec!["car.year", "owner.name"]
        );
    }

    #[test]
    fn method_receivers_are_references() {
        assert_eq!(
            refs("this.tags.includes(this.tag) || this.helper(this.x)"),
            vec!["tags", "tag", "x"]
        );
    }

    #[test]
    fn dynamic_index_keeps_prefix() {
        assert_eq!(refs("this.items[this.pos].price"), vec!["items", "pos"]);
    }
}
