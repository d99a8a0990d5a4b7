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

//! Built-in methods on strings, arrays and numbers

use super::error::{EvaluationError, EvaluationResult};
use super::interpreter::Interpreter;
use crate::ast::ExpressionNode;
use crate::model::Value;
use crate::model::value::format_number;
use crate::registry::builtins::to_fixed;

/// Call `receiver.name(args...)`
pub(crate) fn call_method(
    interp: &Interpreter<'_>,
    receiver: &Value,
    name: &str,
    args: &[ExpressionNode],
) -> EvaluationResult<Value> {
    match receiver {
        Value::Array(items) => array_method(interp, items, name, args),
        Value::String(s) => string_method(interp, s, name, args),
        Value::Number(n) => number_method(interp, *n, name, args),
        Value::Boolean(_) if name == "toString" => Ok(Value::String(receiver.to_js_string())),
        _ => Err(unknown(receiver, name)),
    }
}

fn unknown(receiver: &Value, name: &str) -> EvaluationError {
    EvaluationError::UnknownFunction {
        name: format!("{}.{name}", receiver.type_of()),
    }
}

fn eval_args(interp: &Interpreter<'_>, args: &[ExpressionNode]) -> EvaluationResult<Vec<Value>> {
    args.iter().map(|arg| interp.evaluate(arg)).collect()
}

fn nth(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&Value::Undefined)
}

/// Resolve `slice` bounds: negative values count from the end
fn slice_bounds(len: usize, start: &Value, end: &Value) -> (usize, usize) {
    let clamp = |value: &Value, default: usize| -> usize {
        if value.is_undefined() {
            return default;
        }
        let n = value.to_number();
        let n = if n.is_nan() { 0.0 } else { n.trunc() };
        if n < 0.0 {
            (len as f64 + n).max(0.0) as usize
        } else {
            (n as usize).min(len)
        }
    };
    let from = clamp(start, 0);
    let to = clamp(end, len);
    (from, to.max(from))
}

/// SameValueZero, used by `includes`
fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => a.strict_equals(b),
    }
}

fn array_method(
    interp: &Interpreter<'_>,
    items: &[Value],
    name: &str,
    args: &[ExpressionNode],
) -> EvaluationResult<Value> {
    // callback methods evaluate their lambda per item
    let callback = || {
        args.first()
            .ok_or_else(|| EvaluationError::type_error(format!("{name} requires a callback")))
    };
    let apply = |f: &ExpressionNode, i: usize, item: &Value| {
        interp.call_lambda(f, &[item.clone(), Value::Number(i as f64)])
    };

    match name {
        "some" => {
            let f = callback()?;
            for (i, item) in items.iter().enumerate() {
                if apply(f, i, item)?.is_truthy() {
                    return Ok(Value::Boolean(true));
                }
            }
            Ok(Value::Boolean(false))
        }
        "every" => {
            let f = callback()?;
            for (i, item) in items.iter().enumerate() {
                if !apply(f, i, item)?.is_truthy() {
                    return Ok(Value::Boolean(false));
                }
            }
            Ok(Value::Boolean(true))
        }
        "filter" => {
            let f = callback()?;
            let mut kept = Vec::new();
            for (i, item) in items.iter().enumerate() {
                if apply(f, i, item)?.is_truthy() {
                    kept.push(item.clone());
                }
            }
            Ok(Value::Array(kept))
        }
        "map" => {
            let f = callback()?;
            items
                .iter()
                .enumerate()
                .map(|(i, item)| apply(f, i, item))
                .collect::<EvaluationResult<Vec<_>>>()
                .map(Value::Array)
        }
        "find" => {
            let f = callback()?;
            for (i, item) in items.iter().enumerate() {
                if apply(f, i, item)?.is_truthy() {
                    return Ok(item.clone());
                }
            }
            Ok(Value::Undefined)
        }
        _ => {
            let args = eval_args(interp, args)?;
            match name {
                "includes" => Ok(Value::Boolean(
                    items.iter().any(|item| same_value_zero(item, nth(&args, 0))),
                )),
                "indexOf" => Ok(Value::Number(
                    items
                        .iter()
                        .position(|item| item.strict_equals(nth(&args, 0)))
                        .map_or(-1.0, |i| i as f64),
                )),
                "join" => {
                    let separator = match nth(&args, 0) {
                        Value::Undefined => ",".to_string(),
                        other => other.to_js_string(),
                    };
                    Ok(Value::String(
                        items
                            .iter()
                            .map(|item| {
                                if item.is_nullish() {
                                    String::new()
                                } else {
                                    item.to_js_string()
                                }
                            })
                            .collect::<Vec<_>>()
                            .join(&separator),
                    ))
                }
                "slice" => {
                    let (from, to) = slice_bounds(items.len(), nth(&args, 0), nth(&args, 1));
                    Ok(Value::Array(items[from..to].to_vec()))
                }
                "concat" => {
                    let mut out = items.to_vec();
                    for arg in args {
                        match arg {
                            Value::Array(more) => out.extend(more),
                            other => out.push(other),
                        }
                    }
                    Ok(Value::Array(out))
                }
                "toString" => Ok(Value::String(Value::Array(items.to_vec()).to_js_string())),
                _ => Err(unknown(&Value::Array(Vec::new()), name)),
            }
        }
    }
}

fn string_method(
    interp: &Interpreter<'_>,
    s: &str,
    name: &str,
    args: &[ExpressionNode],
) -> EvaluationResult<Value> {
    let args = eval_args(interp, args)?;
    let text_arg = |index: usize| nth(&args, index).to_js_string();
    Ok(match name {
        "includes" => Value::Boolean(s.contains(&text_arg(0))),
        "startsWith" => Value::Boolean(s.starts_with(&text_arg(0))),
        "endsWith" => Value::Boolean(s.ends_with(&text_arg(0))),
        "indexOf" => {
            let needle = text_arg(0);
            Value::Number(
                s.find(&needle)
                    .map_or(-1.0, |byte| s[..byte].chars().count() as f64),
            )
        }
        "toLowerCase" => Value::String(s.to_lowercase()),
        "toUpperCase" => Value::String(s.to_uppercase()),
        "trim" => Value::String(s.trim().to_string()),
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let (from, to) = slice_bounds(chars.len(), nth(&args, 0), nth(&args, 1));
            Value::String(chars[from..to].iter().collect())
        }
        "concat" => {
            let mut out = s.to_string();
            for arg in &args {
                out.push_str(&arg.to_js_string());
            }
            Value::String(out)
        }
        "split" => match nth(&args, 0) {
            Value::Undefined => Value::Array(vec![Value::string(s)]),
            separator => {
                let separator = separator.to_js_string();
                if separator.is_empty() {
                    Value::Array(s.chars().map(|c| Value::String(c.to_string())).collect())
                } else {
                    Value::Array(s.split(separator.as_str()).map(Value::string).collect())
                }
            }
        },
        "toString" => Value::string(s),
        _ => return Err(unknown(&Value::string(""), name)),
    })
}

fn number_method(
    interp: &Interpreter<'_>,
    n: f64,
    name: &str,
    args: &[ExpressionNode],
) -> EvaluationResult<Value> {
    let args = eval_args(interp, args)?;
    match name {
        "toFixed" => {
            let digits = match nth(&args, 0) {
                Value::Undefined => 0.0,
                other => other.to_number(),
            };
            if !(0.0..=100.0).contains(&digits) {
                return Err(EvaluationError::type_error(format!(
                    "toFixed() digits argument must be between 0 and 100, got {}",
                    format_number(digits)
                )));
            }
            Ok(Value::String(to_fixed(n, digits as usize)))
        }
        "toString" => Ok(Value::String(format_number(n))),
        _ => Err(unknown(&Value::Number(n), name)),
    }
}
