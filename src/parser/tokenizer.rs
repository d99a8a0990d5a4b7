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

//! Tokenizer for form expressions
//!
//! Produces zero-copy tokens over the input: identifiers and string bodies
//! are slices of the source, numbers are parsed eagerly.

use super::error::{ParseError, ParseResult};
use super::span::Spanned;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use std::fmt;
use unicode_xid::UnicodeXID;

/// Expression token
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'input> {
    // Literals
    /// Numeric literal (e.g., 42, 3.5, .5, 1e3)
    Number(f64),
    /// String literal body without quotes, escapes unprocessed
    String(&'input str),

    /// Identifier token
    Identifier(&'input str),

    // Keywords
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
    /// `undefined`
    Undefined,
    /// `this`
    This,
    /// `typeof`
    TypeOf,

    // Operators
    /// Addition operator (+)
    Plus,
    /// Subtraction operator (-)
    Minus,
    /// Multiplication operator (*)
    Multiply,
    /// Division operator (/)
    Divide,
    /// Remainder operator (%)
    Modulo,
    /// Loose equality (==)
    Equal,
    /// Loose inequality (!=)
    NotEqual,
    /// Strict equality (===)
    StrictEqual,
    /// Strict inequality (!==)
    StrictNotEqual,
    /// Less than operator (<)
    LessThan,
    /// Less than or equal operator (<=)
    LessThanOrEqual,
    /// Greater than operator (>)
    GreaterThan,
    /// Greater than or equal operator (>=)
    GreaterThanOrEqual,
    /// Logical AND (&&)
    And,
    /// Logical OR (||)
    Or,
    /// Nullish coalescing (??)
    Coalesce,
    /// Logical NOT (!)
    Not,
    /// Ternary question mark (?)
    Question,
    /// Optional chaining (?.)
    QuestionDot,
    /// Arrow (=>)
    Arrow,

    // Punctuation
    /// Left parenthesis (
    LeftParen,
    /// Right parenthesis )
    RightParen,
    /// Left square bracket [
    LeftBracket,
    /// Right square bracket ]
    RightBracket,
    /// Left curly brace {
    LeftBrace,
    /// Right curly brace }
    RightBrace,
    /// Dot operator (.)
    Dot,
    /// Comma separator (,)
    Comma,
    /// Colon (:)
    Colon,
}

impl<'input> Token<'input> {
    /// Get identifier string
    #[inline]
    pub fn as_identifier(&self) -> Option<&'input str> {
        match self {
            Token::Identifier(s) => Some(s),
            _ => None,
        }
    }

    /// Name usable after `.`: identifiers and keywords alike (`a.this`, `x.null`)
    pub fn as_property_name(&self) -> Option<&'input str> {
        match self {
            Token::Identifier(s) => Some(s),
            Token::True => Some("true"),
            Token::False => Some("false"),
            Token::Null => Some("null"),
            Token::Undefined => Some("undefined"),
            Token::This => Some("this"),
            Token::TypeOf => Some("typeof"),
            _ => None,
        }
    }

    /// Get keyword from string
    #[inline]
    pub fn from_keyword(s: &str) -> Option<Token<'static>> {
        KEYWORD_TABLE.get(s).cloned()
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::Number(n) => return write!(f, "{n}"),
            Token::String(s) => return write!(f, "'{s}'"),
            Token::Identifier(s) => return f.write_str(s),
            Token::True => "true",
            Token::False => "false",
            Token::Null => "null",
            Token::Undefined => "undefined",
            Token::This => "this",
            Token::TypeOf => "typeof",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Multiply => "*",
            Token::Divide => "/",
            Token::Modulo => "%",
            Token::Equal => "==",
            Token::NotEqual => "!=",
            Token::StrictEqual => "===",
            Token::StrictNotEqual => "!==",
            Token::LessThan => "<",
            Token::LessThanOrEqual => "<=",
            Token::GreaterThan => ">",
            Token::GreaterThanOrEqual => ">=",
            Token::And => "&&",
            Token::Or => "||",
            Token::Coalesce => "??",
            Token::Not => "!",
            Token::Question => "?",
            Token::QuestionDot => "?.",
            Token::Arrow => "=>",
            Token::LeftParen => "(",
            Token::RightParen => ")",
            Token::LeftBracket => "[",
            Token::RightBracket => "]",
            Token::LeftBrace => "{",
            Token::RightBrace => "}",
            Token::Dot => ".",
            Token::Comma => ",",
            Token::Colon => ":",
        };
        f.write_str(text)
    }
}

/// Shared keyword lookup table
static KEYWORD_TABLE: Lazy<FxHashMap<&'static str, Token<'static>>> = Lazy::new(|| {
    let mut map = FxHashMap::default();
    map.insert("true", Token::True);
    map.insert("false", Token::False);
    map.insert("null", Token::Null);
    map.insert("undefined", Token::Undefined);
    map.insert("this", Token::This);
    map.insert("typeof", Token::TypeOf);
    map
});

/// Byte-oriented tokenizer with char fallback for non-ASCII identifiers
#[derive(Clone)]
pub struct Tokenizer<'input> {
    input: &'input str,
    bytes: &'input [u8],
    pos: usize,
}

impl<'input> Tokenizer<'input> {
    /// Create a new tokenizer
    #[inline]
    pub fn new(input: &'input str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    /// Current byte offset
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Tokenize the whole input (mostly for tests and diagnostics)
    pub fn tokenize_all(&mut self) -> ParseResult<Vec<Spanned<Token<'input>>>> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    #[inline(always)]
    fn peek_byte(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.input[self.pos..].chars().next() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    /// Next token, or `None` at end of input
    pub fn next_token(&mut self) -> ParseResult<Option<Spanned<Token<'input>>>> {
        self.skip_whitespace();
        let start = self.pos;
        let Some(byte) = self.peek_byte(0) else {
            return Ok(None);
        };

        let token = match byte {
            b'0'..=b'9' => self.scan_number()?,
            b'.' if matches!(self.peek_byte(1), Some(b'0'..=b'9')) => self.scan_number()?,
            b'\'' | b'"' => self.scan_string(byte)?,
            b'+' => self.single(Token::Plus),
            b'-' => self.single(Token::Minus),
            b'*' => self.single(Token::Multiply),
            b'/' => self.single(Token::Divide),
            b'%' => self.single(Token::Modulo),
            b'(' => self.single(Token::LeftParen),
            b')' => self.single(Token::RightParen),
            b'[' => self.single(Token::LeftBracket),
            b']' => self.single(Token::RightBracket),
            b'{' => self.single(Token::LeftBrace),
            b'}' => self.single(Token::RightBrace),
            b'.' => self.single(Token::Dot),
            b',' => self.single(Token::Comma),
            b':' => self.single(Token::Colon),
            b'=' => match (self.peek_byte(1), self.peek_byte(2)) {
                (Some(b'='), Some(b'=')) => self.multi(Token::StrictEqual, 3),
                (Some(b'='), _) => self.multi(Token::Equal, 2),
                (Some(b'>'), _) => self.multi(Token::Arrow, 2),
                // assignment is not part of the language
                _ => {
                    return Err(ParseError::InvalidCharacter {
                        character: '=',
                        position: start,
                    });
                }
            },
            b'!' => match (self.peek_byte(1), self.peek_byte(2)) {
                (Some(b'='), Some(b'=')) => self.multi(Token::StrictNotEqual, 3),
                (Some(b'='), _) => self.multi(Token::NotEqual, 2),
                _ => self.single(Token::Not),
            },
            b'<' => match self.peek_byte(1) {
                Some(b'=') => self.multi(Token::LessThanOrEqual, 2),
                _ => self.single(Token::LessThan),
            },
            b'>' => match self.peek_byte(1) {
                Some(b'=') => self.multi(Token::GreaterThanOrEqual, 2),
                _ => self.single(Token::GreaterThan),
            },
            b'&' if self.peek_byte(1) == Some(b'&') => self.multi(Token::And, 2),
            b'|' if self.peek_byte(1) == Some(b'|') => self.multi(Token::Or, 2),
            b'?' => match (self.peek_byte(1), self.peek_byte(2)) {
                (Some(b'?'), _) => self.multi(Token::Coalesce, 2),
                // `a?.5:1` is a ternary, not optional chaining
                (Some(b'.'), Some(b'0'..=b'9')) => self.single(Token::Question),
                (Some(b'.'), _) => self.multi(Token::QuestionDot, 2),
                _ => self.single(Token::Question),
            },
            _ => self.scan_identifier()?,
        };

        Ok(Some(Spanned::new(token, start, self.pos)))
    }

    #[inline(always)]
    fn single(&mut self, token: Token<'input>) -> Token<'input> {
        self.pos += 1;
        token
    }

    #[inline(always)]
    fn multi(&mut self, token: Token<'input>, len: usize) -> Token<'input> {
        self.pos += len;
        token
    }

    fn scan_number(&mut self) -> ParseResult<Token<'input>> {
        let start = self.pos;
        while matches!(self.peek_byte(0), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if self.peek_byte(0) == Some(b'.') && matches!(self.peek_byte(1), Some(b'0'..=b'9')) {
            self.pos += 1;
            while matches!(self.peek_byte(0), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }
        if matches!(self.peek_byte(0), Some(b'e' | b'E')) {
            let sign = usize::from(matches!(self.peek_byte(1), Some(b'+' | b'-')));
            if matches!(self.peek_byte(1 + sign), Some(b'0'..=b'9')) {
                self.pos += 1 + sign;
                while matches!(self.peek_byte(0), Some(b'0'..=b'9')) {
                    self.pos += 1;
                }
            }
        }

        let text = &self.input[start..self.pos];
        if let Some(c) = self.input[self.pos..].chars().next() {
            if is_identifier_start(c) {
                return Err(ParseError::InvalidLiteral {
                    literal_type: "number".to_string(),
                    value: format!("{text}{c}"),
                    position: start,
                });
            }
        }
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ParseError::InvalidLiteral {
                literal_type: "number".to_string(),
                value: text.to_string(),
                position: start,
            })
    }

    fn scan_string(&mut self, quote: u8) -> ParseResult<Token<'input>> {
        let start = self.pos;
        self.pos += 1;
        while let Some(byte) = self.peek_byte(0) {
            match byte {
                b'\\' => self.pos += 2,
                b if b == quote => {
                    let body = &self.input[start + 1..self.pos];
                    self.pos += 1;
                    return Ok(Token::String(body));
                }
                _ => self.pos += 1,
            }
        }
        Err(ParseError::UnclosedString { position: start })
    }

    fn scan_identifier(&mut self) -> ParseResult<Token<'input>> {
        let start = self.pos;
        let mut chars = self.input[start..].chars();
        match chars.next() {
            Some(c) if is_identifier_start(c) => self.pos += c.len_utf8(),
            Some(c) => {
                return Err(ParseError::InvalidCharacter {
                    character: c,
                    position: start,
                });
            }
            None => {
                return Err(ParseError::UnexpectedEndOfInput { position: start });
            }
        }
        for c in chars {
            if is_identifier_continue(c) {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        let text = &self.input[start..self.pos];
        Ok(Token::from_keyword(text).unwrap_or(Token::Identifier(text)))
    }
}

#[inline]
fn is_identifier_start(c: char) -> bool {
    c == '_' || c == '$' || UnicodeXID::is_xid_start(c)
}

#[inline]
fn is_identifier_continue(c: char) -> bool {
    c == '$' || UnicodeXID::is_xid_continue(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token<'_>> {
        Tokenizer::new(input)
            .tokenize_all()
            .unwrap()
            .into_iter()
            .map(|spanned| spanned.value)
            .collect()
    }

    #[test]
    fn test_tokenizer_basic() {
        let mut tokenizer = Tokenizer::new("this.car");

        let token1 = tokenizer.next_token().unwrap().unwrap();
        assert_eq!(token1.value, Token::This);

        let token2 = tokenizer.next_token().unwrap().unwrap();
        assert_eq!(token2.value, Token::Dot);

        let token3 = tokenizer.next_token().unwrap().unwrap();
        assert_eq!(token3.value.as_identifier(), Some("car"));
        assert_eq!((token3.start, token3.end), (5, 8));

        assert!(tokenizer.next_token().unwrap().is_none());
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            tokens("a === b !== c == d != e ?? f?.g => h"),
            vec![
                Token::Identifier("a"),
                Token::StrictEqual,
                Token::Identifier("b"),
                Token::StrictNotEqual,
                Token::Identifier("c"),
                Token::Equal,
                Token::Identifier("d"),
                Token::NotEqual,
                Token::Identifier("e"),
                Token::Coalesce,
                Token::Identifier("f"),
                Token::QuestionDot,
                Token::Identifier("g"),
                Token::Arrow,
                Token::Identifier("h"),
            ]
        );
    }

    #[test]
    fn test_numbers_and_strings() {
        assert_eq!(
            tokens("1.5 .5 1e3 'it\\'s' \"x\""),
            vec![
                Token::Number(1.5),
                Token::Number(0.5),
                Token::Number(1000.0),
                Token::String("it\\'s"),
                Token::String("x"),
            ]
        );
    }

    #[test]
    fn test_ternary_with_decimal_is_not_optional_chain() {
        assert_eq!(
            tokens("a?.5:1"),
            vec![
                Token::Identifier("a"),
                Token::Question,
                Token::Number(0.5),
                Token::Colon,
                Token::Number(1.0),
            ]
        );
    }

    #[test]
    fn test_unicode_identifier() {
        assert_eq!(tokens("this.größe"), vec![Token::This, Token::Dot, Token::Identifier("größe")]);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            Tokenizer::new("'open").tokenize_all(),
            Err(ParseError::UnclosedString { position: 0 })
        ));
        assert!(matches!(
            Tokenizer::new("a = 1").tokenize_all(),
            Err(ParseError::InvalidCharacter { character: '=', .. })
        ));
        assert!(matches!(
            Tokenizer::new("12abc").tokenize_all(),
            Err(ParseError::InvalidLiteral { .. })
        ));
    }
}
