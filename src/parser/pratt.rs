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

//! Pratt parser for form expressions
//!
//! Binary operators are driven by a single precedence table; prefix
//! operators, primaries and postfix chains (member access, indexing, calls)
//! are parsed by dedicated methods.

use super::error::{ParseError, ParseResult};
use super::span::Spanned;
use super::tokenizer::{Token, Tokenizer};
use crate::ast::{BinaryOperator, ExpressionNode, LiteralValue, UnaryOperator};

/// Maximum nesting of parentheses, brackets and prefix operators
pub const MAX_NESTING_DEPTH: usize = 128;

/// Operator precedence levels (higher = tighter binding)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    /// Ternary conditional (right associative)
    Conditional = 1,
    /// Nullish coalescing (??)
    Coalesce = 2,
    /// Logical OR (||)
    Or = 3,
    /// Logical AND (&&)
    And = 4,
    /// Equality operators (==, !=, ===, !==)
    Equality = 5,
    /// Relational operators (<, >, <=, >=)
    Relational = 6,
    /// Additive operators (+, -)
    Additive = 7,
    /// Multiplicative operators (*, /, %)
    Multiplicative = 8,
}

impl Precedence {
    /// Get the next higher precedence level for left-associative operators
    #[inline(always)]
    pub const fn next_level(self) -> Self {
        match self {
            Precedence::Conditional => Precedence::Coalesce,
            Precedence::Coalesce => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Relational,
            Precedence::Relational => Precedence::Additive,
            Precedence::Additive => Precedence::Multiplicative,
            Precedence::Multiplicative => Precedence::Multiplicative,
        }
    }
}

#[inline(always)]
fn get_precedence(token: &Token<'_>) -> Option<Precedence> {
    match token {
        Token::Equal | Token::NotEqual | Token::StrictEqual | Token::StrictNotEqual => {
            Some(Precedence::Equality)
        }
        Token::And => Some(Precedence::And),
        Token::Or => Some(Precedence::Or),
        Token::Plus | Token::Minus => Some(Precedence::Additive),
        Token::LessThan
        | Token::LessThanOrEqual
        | Token::GreaterThan
        | Token::GreaterThanOrEqual => Some(Precedence::Relational),
        Token::Multiply | Token::Divide | Token::Modulo => Some(Precedence::Multiplicative),
        Token::Coalesce => Some(Precedence::Coalesce),
        Token::Question => Some(Precedence::Conditional),
        _ => None,
    }
}

#[inline(always)]
fn token_to_binary_op(token: &Token<'_>) -> Option<BinaryOperator> {
    match token {
        Token::StrictEqual => Some(BinaryOperator::StrictEqual),
        Token::StrictNotEqual => Some(BinaryOperator::StrictNotEqual),
        Token::Equal => Some(BinaryOperator::Equal),
        Token::NotEqual => Some(BinaryOperator::NotEqual),
        Token::And => Some(BinaryOperator::And),
        Token::Or => Some(BinaryOperator::Or),
        Token::Plus => Some(BinaryOperator::Add),
        Token::Minus => Some(BinaryOperator::Subtract),
        Token::LessThan => Some(BinaryOperator::LessThan),
        Token::LessThanOrEqual => Some(BinaryOperator::LessThanOrEqual),
        Token::GreaterThan => Some(BinaryOperator::GreaterThan),
        Token::GreaterThanOrEqual => Some(BinaryOperator::GreaterThanOrEqual),
        Token::Multiply => Some(BinaryOperator::Multiply),
        Token::Divide => Some(BinaryOperator::Divide),
        Token::Modulo => Some(BinaryOperator::Modulo),
        Token::Coalesce => Some(BinaryOperator::Coalesce),
        _ => None,
    }
}

/// Pratt parser over a [`Tokenizer`]
pub struct PrattParser<'input> {
    tokenizer: Tokenizer<'input>,
    current: Option<Spanned<Token<'input>>>,
    depth: usize,
}

impl<'input> PrattParser<'input> {
    /// Create new parser and prime the first token
    pub fn new(input: &'input str) -> ParseResult<Self> {
        let mut tokenizer = Tokenizer::new(input);
        let current = tokenizer.next_token()?;
        Ok(Self {
            tokenizer,
            current,
            depth: 0,
        })
    }

    /// Parse a complete expression; trailing tokens are an error
    pub fn parse(mut self) -> ParseResult<ExpressionNode> {
        if self.current.is_none() {
            return Err(ParseError::EmptyExpression);
        }
        let expr = self.parse_expression_with_precedence(Precedence::Conditional)?;
        match self.current.take() {
            None => Ok(expr),
            Some(token) => Err(ParseError::UnexpectedToken {
                token: token.value.to_string(),
                position: token.start,
            }),
        }
    }

    #[inline(always)]
    fn advance(&mut self) -> ParseResult<()> {
        self.current = self.tokenizer.next_token()?;
        Ok(())
    }

    #[inline(always)]
    fn current(&self) -> Option<&Token<'input>> {
        self.current.as_ref().map(|spanned| &spanned.value)
    }

    #[inline]
    fn position(&self) -> usize {
        self.current
            .as_ref()
            .map(|spanned| spanned.start)
            .unwrap_or_else(|| self.tokenizer.position())
    }

    fn expect(&mut self, expected: Token<'input>) -> ParseResult<()> {
        if self.current() == Some(&expected) {
            return self.advance();
        }
        match self.current() {
            Some(token) => Err(ParseError::ExpectedToken {
                expected: format!("'{expected}', found '{token}'"),
                position: self.position(),
            }),
            None => Err(ParseError::UnexpectedEndOfInput {
                position: self.position(),
            }),
        }
    }

    fn enter(&mut self) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::NestingTooDeep {
                limit: MAX_NESTING_DEPTH,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Precedence-climbing loop
    fn parse_expression_with_precedence(
        &mut self,
        min_precedence: Precedence,
    ) -> ParseResult<ExpressionNode> {
        self.enter()?;
        let mut left = self.parse_unary()?;

        while let Some(token) = self.current() {
            let Some(precedence) = get_precedence(token) else {
                break;
            };
            if precedence < min_precedence {
                break;
            }

            if precedence == Precedence::Conditional {
                self.advance()?;
                let then_expr = self.parse_expression_with_precedence(Precedence::Conditional)?;
                self.expect(Token::Colon)?;
                let else_expr = self.parse_expression_with_precedence(Precedence::Conditional)?;
                left = ExpressionNode::conditional(left, then_expr, else_expr);
                continue;
            }

            let Some(op) = token_to_binary_op(token) else {
                break;
            };
            self.advance()?;
            let right = self.parse_expression_with_precedence(precedence.next_level())?;
            left = ExpressionNode::binary_op(op, left, right);
        }

        self.leave();
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<ExpressionNode> {
        let op = match self.current() {
            Some(Token::Not) => UnaryOperator::Not,
            Some(Token::Minus) => UnaryOperator::Minus,
            Some(Token::Plus) => UnaryOperator::Plus,
            Some(Token::TypeOf) => UnaryOperator::TypeOf,
            _ => {
                let primary = self.parse_primary()?;
                return self.parse_postfix(primary);
            }
        };
        self.advance()?;
        self.enter()?;
        let operand = self.parse_unary()?;
        self.leave();
        Ok(ExpressionNode::unary_op(op, operand))
    }

    fn parse_primary(&mut self) -> ParseResult<ExpressionNode> {
        let position = self.position();
        let Some(token) = self.current.clone() else {
            return Err(ParseError::UnexpectedEndOfInput { position });
        };

        match token.value {
            Token::Number(n) => {
                self.advance()?;
                Ok(ExpressionNode::literal(LiteralValue::Number(n)))
            }
            Token::String(raw) => {
                self.advance()?;
                let value = process_string_escapes(raw, token.start + 1)?;
                Ok(ExpressionNode::literal(LiteralValue::String(value)))
            }
            Token::True => {
                self.advance()?;
                Ok(ExpressionNode::literal(LiteralValue::Boolean(true)))
            }
            Token::False => {
                self.advance()?;
                Ok(ExpressionNode::literal(LiteralValue::Boolean(false)))
            }
            Token::Null => {
                self.advance()?;
                Ok(ExpressionNode::literal(LiteralValue::Null))
            }
            Token::Undefined => {
                self.advance()?;
                Ok(ExpressionNode::literal(LiteralValue::Undefined))
            }
            Token::This => {
                self.advance()?;
                Ok(ExpressionNode::This)
            }
            Token::Identifier(name) => {
                self.advance()?;
                if let Some(Token::Arrow) = self.current() {
                    self.advance()?;
                    let body = self.parse_expression_with_precedence(Precedence::Conditional)?;
                    return Ok(ExpressionNode::lambda(vec![name.to_string()], body));
                }
                Ok(ExpressionNode::identifier(name))
            }
            Token::LeftParen => {
                if let Some(params) = self.try_lambda_params()? {
                    let body = self.parse_expression_with_precedence(Precedence::Conditional)?;
                    return Ok(ExpressionNode::lambda(params, body));
                }
                self.advance()?;
                let expr = self.parse_expression_with_precedence(Precedence::Conditional)?;
                self.expect(Token::RightParen)?;
                Ok(expr)
            }
            Token::LeftBracket => {
                self.advance()?;
                let items = self.parse_list(Token::RightBracket)?;
                Ok(ExpressionNode::Array(items))
            }
            Token::LeftBrace => {
                self.advance()?;
                self.parse_object_literal()
            }
            other => Err(ParseError::UnexpectedToken {
                token: other.to_string(),
                position,
            }),
        }
    }

    /// Speculatively read `(a, b) =>`; restores the parser when it is not a lambda
    fn try_lambda_params(&mut self) -> ParseResult<Option<Vec<String>>> {
        let saved_tokenizer = self.tokenizer.clone();
        let saved_current = self.current.clone();

        let restore = |parser: &mut Self| {
            parser.tokenizer = saved_tokenizer.clone();
            parser.current = saved_current.clone();
        };

        // a tokenizer error while probing is reported by the regular parse
        let probe = |parser: &mut Self| -> ParseResult<Option<Vec<String>>> {
            parser.advance()?;
            let mut params = Vec::new();
            if let Some(Token::RightParen) = parser.current() {
                parser.advance()?;
            } else {
                loop {
                    match parser.current() {
                        Some(Token::Identifier(name)) => {
                            params.push(name.to_string());
                            parser.advance()?;
                        }
                        _ => return Ok(None),
                    }
                    match parser.current() {
                        Some(Token::Comma) => parser.advance()?,
                        Some(Token::RightParen) => {
                            parser.advance()?;
                            break;
                        }
                        _ => return Ok(None),
                    }
                }
            }
            if let Some(Token::Arrow) = parser.current() {
                parser.advance()?;
                Ok(Some(params))
            } else {
                Ok(None)
            }
        };

        match probe(self) {
            Ok(Some(params)) => Ok(Some(params)),
            Ok(None) | Err(_) => {
                restore(self);
                Ok(None)
            }
        }
    }

    /// Comma-separated expressions up to `close` (consumed); trailing comma allowed
    fn parse_list(&mut self, close: Token<'input>) -> ParseResult<Vec<ExpressionNode>> {
        let mut items = Vec::new();
        loop {
            if self.current() == Some(&close) {
                self.advance()?;
                return Ok(items);
            }
            items.push(self.parse_expression_with_precedence(Precedence::Conditional)?);
            match self.current() {
                Some(Token::Comma) => self.advance()?,
                Some(token) if *token == close => {}
                Some(token) => {
                    return Err(ParseError::ExpectedToken {
                        expected: format!("',' or '{close}', found '{token}'"),
                        position: self.position(),
                    });
                }
                None => {
                    return Err(ParseError::UnexpectedEndOfInput {
                        position: self.position(),
                    });
                }
            }
        }
    }

    fn parse_object_literal(&mut self) -> ParseResult<ExpressionNode> {
        let mut members = Vec::new();
        loop {
            let position = self.position();
            let key = match self.current() {
                Some(Token::RightBrace) => {
                    self.advance()?;
                    return Ok(ExpressionNode::Object(members));
                }
                Some(Token::String(raw)) => process_string_escapes(raw, position + 1)?,
                Some(Token::Number(n)) => crate::model::value::format_number(*n),
                Some(token) => match token.as_property_name() {
                    Some(name) => name.to_string(),
                    None => {
                        return Err(ParseError::ExpectedToken {
                            expected: format!("property name, found '{token}'"),
                            position,
                        });
                    }
                },
                None => return Err(ParseError::UnexpectedEndOfInput { position }),
            };
            self.advance()?;
            self.expect(Token::Colon)?;
            let value = self.parse_expression_with_precedence(Precedence::Conditional)?;
            members.push((key, value));
            match self.current() {
                Some(Token::Comma) => self.advance()?,
                Some(Token::RightBrace) => {}
                Some(token) => {
                    return Err(ParseError::ExpectedToken {
                        expected: format!("',' or '}}', found '{token}'"),
                        position: self.position(),
                    });
                }
                None => {
                    return Err(ParseError::UnexpectedEndOfInput {
                        position: self.position(),
                    });
                }
            }
        }
    }

    /// Member access, indexing and calls
    fn parse_postfix(&mut self, mut expr: ExpressionNode) -> ParseResult<ExpressionNode> {
        loop {
            match self.current() {
                Some(Token::Dot) => {
                    self.advance()?;
                    let name = self.expect_property_name()?;
                    expr = ExpressionNode::member(expr, name, false);
                }
                Some(Token::QuestionDot) => {
                    self.advance()?;
                    match self.current() {
                        Some(Token::LeftBracket) => {
                            self.advance()?;
                            let index = self.parse_bracket_index()?;
                            expr = ExpressionNode::index(expr, index, true);
                        }
                        Some(Token::LeftParen) => {
                            self.advance()?;
                            let arguments = self.parse_list(Token::RightParen)?;
                            expr = ExpressionNode::call(expr, arguments, true);
                        }
                        _ => {
                            let name = self.expect_property_name()?;
                            expr = ExpressionNode::member(expr, name, true);
                        }
                    }
                }
                Some(Token::LeftBracket) => {
                    self.advance()?;
                    let index = self.parse_bracket_index()?;
                    expr = ExpressionNode::index(expr, index, false);
                }
                Some(Token::LeftParen) => {
                    self.advance()?;
                    let arguments = self.parse_list(Token::RightParen)?;
                    expr = ExpressionNode::call(expr, arguments, false);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_bracket_index(&mut self) -> ParseResult<ExpressionNode> {
        let index = self.parse_expression_with_precedence(Precedence::Conditional)?;
        self.expect(Token::RightBracket)?;
        Ok(index)
    }

    fn expect_property_name(&mut self) -> ParseResult<String> {
        let position = self.position();
        match self.current() {
            Some(token) => match token.as_property_name() {
                Some(name) => {
                    let name = name.to_string();
                    self.advance()?;
                    Ok(name)
                }
                None => Err(ParseError::ExpectedToken {
                    expected: format!("property name, found '{token}'"),
                    position,
                }),
            },
            None => Err(ParseError::UnexpectedEndOfInput { position }),
        }
    }
}

/// Resolve backslash escapes in a string literal body
fn process_string_escapes(raw: &str, offset: usize) -> ParseResult<String> {
    if !raw.contains('\\') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.char_indices();
    while let Some((i, c)) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some((_, escaped)) = chars.next() else {
            return Err(ParseError::InvalidEscape {
                sequence: "\\".to_string(),
                position: offset + i,
            });
        };
        match escaped {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{0008}'),
            'f' => out.push('\u{000C}'),
            'v' => out.push('\u{000B}'),
            '0' => out.push('\0'),
            'u' => {
                let hex: String = chars.by_ref().take(4).map(|(_, h)| h).collect();
                let decoded = u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == 4)
                    .and_then(char::from_u32);
                match decoded {
                    Some(ch) => out.push(ch),
                    None => {
                        return Err(ParseError::InvalidEscape {
                            sequence: format!("\\u{hex}"),
                            position: offset + i,
                        });
                    }
                }
            }
            // \\ \' \" \/ and any other character stand for themselves
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Parse an expression string into an AST
pub fn parse_expression_pratt(input: &str) -> ParseResult<ExpressionNode> {
    PrattParser::new(input)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn render(input: &str) -> String {
        parse_expression_pratt(input).unwrap().to_string()
    }

    #[rstest]
    #[case("1 + 2 * 3", "(1 + (2 * 3))")]
    #[case("a || b && c", "(a || (b && c))")]
    #[case("a - b - c", "((a - b) - c)")]
    #[case("a == b < c", "(a == (b < c))")]
    #[case("!a && -b", "(!a && -b)")]
    #[case("a ? b : c ? d : e", "(a ? b : (c ? d : e))")]
    #[case("a ?? b || c", "(a ?? (b || c))")]
    #[case("typeof this.x === 'string'", "(typeof this.x === 'string')")]
    fn test_precedence(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(render(input), expected);
    }

    #[test]
    fn test_member_chains() {
        assert_eq!(render("this.a[0]['b'].c"), "this.a[0]['b'].c");
        assert_eq!(render("this.a?.b?.[1]"), "this.a?.b?.[1]");
        assert_eq!(render("this.tags.includes('x')"), "this.tags.includes('x')");
        assert_eq!(render("Math.max(1, 2,)"), "Math.max(1, 2)");
    }

    #[test]
    fn test_literals() {
        assert_eq!(render("[1, 'a', null, undefined]"), "[1, 'a', null, undefined]");
        assert_eq!(render("{a: 1, 'b c': true}"), "{a: 1, b c: true}");
        assert_eq!(
            parse_expression_pratt("'a\\nb\\u0041'").unwrap(),
            ExpressionNode::literal(LiteralValue::String("a\nbA".to_string()))
        );
    }

    #[test]
    fn test_lambdas() {
        assert_eq!(render("this.xs.some(x => x > 1)"), "this.xs.some((x) => (x > 1))");
        assert_eq!(render("this.xs.map((x, i) => x + i)"), "this.xs.map((x, i) => (x + i))");
        assert_eq!(render("(a)"), "a");
        assert_eq!(render("(a + b) * c"), "((a + b) * c)");
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse_expression_pratt(""), Err(ParseError::EmptyExpression));
        assert!(matches!(
            parse_expression_pratt("1 +"),
            Err(ParseError::UnexpectedEndOfInput { .. })
        ));
        assert!(matches!(
            parse_expression_pratt("a b"),
            Err(ParseError::UnexpectedToken { position: 2, .. })
        ));
        assert!(matches!(
            parse_expression_pratt("(a"),
            Err(ParseError::UnexpectedEndOfInput { .. })
        ));
        let deep = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        assert!(matches!(
            parse_expression_pratt(&deep),
            Err(ParseError::NestingTooDeep { .. })
        ));
    }
}
