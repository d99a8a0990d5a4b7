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

//! Relative path normalization
//!
//! Field rules address the model with short relative forms. Before parsing,
//! every form outside a string literal is rewritten into an absolute chain
//! rooted at `this`:
//!
//! | written    | rewritten                      |
//! |------------|--------------------------------|
//! | `./x`      | `this.<scope>.x`               |
//! | `../x`     | `this.<parent of scope>.x`     |
//! | `G/x`      | `this.global.x`                |
//! | `/x`       | `this.x`                       |

use crate::model::{FieldPath, PathResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

static RELATIVE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"G/|(?:\.\./)+|\./|/").expect("relative path pattern compiles")
});

/// Rewrite relative path tokens of `source` against `scope`
///
/// String literals are copied untouched. Ascending above the model root is
/// reported as [`crate::model::PathError::RootAscentOverflow`].
pub fn normalize(source: &str, scope: &FieldPath) -> PathResult<String> {
    if !source.contains('/') {
        return Ok(source.to_string());
    }

    let mut out = String::with_capacity(source.len() + 16);
    let mut code_start = 0;
    let mut chars = source.char_indices();
    while let Some((i, c)) = chars.next() {
        if c != '\'' && c != '"' {
            continue;
        }
        rewrite_code(source, code_start..i, scope, &mut out)?;
        let mut end = source.len();
        let mut escaped = false;
        for (j, inner) in chars.by_ref() {
            if escaped {
                escaped = false;
            } else if inner == '\\' {
                escaped = true;
            } else if inner == c {
                end = j + inner.len_utf8();
                break;
            }
        }
        // an unclosed literal is left for the tokenizer to report
        out.push_str(&source[i..end]);
        code_start = end;
    }
    rewrite_code(source, code_start..source.len(), scope, &mut out)?;
    Ok(out)
}

/// Rewrite the code between two string literals; `before` still sees the
/// preceding literal so `'a' / 2` stays a division
fn rewrite_code(source: &str, range: Range<usize>, scope: &FieldPath, out: &mut String) -> PathResult<()> {
    let offset = range.start;
    let code = &source[range];
    let mut last = 0;
    for found in RELATIVE_TOKEN.find_iter(code) {
        let before = &source[..offset + found.start()];
        let after = &code[found.end()..];
        let token = found.as_str();

        let base = match token {
            "G/" if !ends_operand(before) => {
                Some(FieldPath::root().join_key("global"))
            }
            "/" if !ends_operand(before.trim_end()) => Some(FieldPath::root()),
            "./" if !ends_operand(before) => Some(scope.clone()),
            "G/" | "/" | "./" => None,
            _ if !ends_operand(before) => {
                Some(scope.ascend(token.len() / 3)?)
            }
            _ => None,
        };

        let Some(base) = base else {
            continue;
        };
        out.push_str(&code[last..found.start()]);
        out.push_str(&base.to_expression());
        if after.chars().next().is_some_and(starts_identifier) {
            out.push('.');
        }
        last = found.end();
    }
    out.push_str(&code[last..]);
    Ok(())
}

/// Keywords that leave the parser expecting an operand
const OPERATOR_KEYWORDS: &[&str] = &["typeof", "void", "in", "instanceof"];

/// Whether `before` ends an operand, making `/` division and `./` not a path
fn ends_operand(before: &str) -> bool {
    let Some(prev) = before.chars().next_back() else {
        return false;
    };
    if !is_word_char(prev) {
        return matches!(prev, ')' | ']' | '.' | '\'' | '"');
    }
    let head = before.trim_end_matches(is_word_char);
    // `a.typeof` is a member name, not the operator
    head.ends_with('.') || !OPERATOR_KEYWORDS.contains(&&before[head.len()..])
}

#[inline]
fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[inline]
fn starts_identifier(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}
