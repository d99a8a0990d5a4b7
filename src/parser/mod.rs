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

//! Form expression parser
//!
//! Converts JavaScript-like rule expressions into an Abstract Syntax Tree
//! (AST). Relative path forms (`./x`, `../x`, `G/x`, `/x`) are rewritten by
//! [`normalize`] before tokenizing.

#![warn(missing_docs)]

pub mod error;
pub mod normalize;
pub mod pratt;
pub mod span;
pub mod tokenizer;

pub use error::{ParseError, ParseResult};
pub use normalize::normalize;
pub use pratt::parse_expression_pratt;
pub use span::Spanned;

/// Parse an expression string into an AST using the Pratt parser
pub fn parse(input: &str) -> ParseResult<crate::ast::ExpressionNode> {
    parse_expression_pratt(input)
}
