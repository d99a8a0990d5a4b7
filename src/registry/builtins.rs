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

//! Built-in helpers available to every form expression

use super::function::{FunctionError, FunctionRegistry, FunctionResult};
use super::signature::FunctionSignature;
use crate::model::Value;
use crate::model::value::format_number;
use once_cell::sync::Lazy;
use regex::Regex;

static FLOAT_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:Infinity|\d+\.?\d*(?:[eE][+-]?\d+)?|\.\d+(?:[eE][+-]?\d+)?)")
        .expect("float prefix pattern compiles")
});

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&Value::Undefined)
}

fn math_unary(registry: &mut FunctionRegistry, name: &str, op: fn(f64) -> f64) {
    registry.register_fn(FunctionSignature::new(name, &["x"], 0), move |args, _| {
        Ok(Value::Number(op(arg(args, 0).to_number())))
    });
}

/// Register all built-in helpers and constants
pub fn register_builtin_functions(registry: &mut FunctionRegistry) {
    register_math(registry);
    register_conversion(registry);
    register_collection(registry);
}

fn register_math(registry: &mut FunctionRegistry) {
    registry.register_constant("Math.PI", Value::Number(std::f64::consts::PI));
    registry.register_constant("Math.E", Value::Number(std::f64::consts::E));
    registry.register_constant("Number.MAX_SAFE_INTEGER", Value::Number(9_007_199_254_740_991.0));

    registry.register_fn(FunctionSignature::variadic("Math.max", 0), |args, _| {
        Ok(Value::Number(args.iter().map(Value::to_number).fold(
            f64::NEG_INFINITY,
            |acc, n| if acc.is_nan() || n.is_nan() { f64::NAN } else { acc.max(n) },
        )))
    });
    registry.register_fn(FunctionSignature::variadic("Math.min", 0), |args, _| {
        Ok(Value::Number(args.iter().map(Value::to_number).fold(
            f64::INFINITY,
            |acc, n| if acc.is_nan() || n.is_nan() { f64::NAN } else { acc.min(n) },
        )))
    });

    math_unary(registry, "Math.abs", f64::abs);
    math_unary(registry, "Math.floor", f64::floor);
    math_unary(registry, "Math.ceil", f64::ceil);
    math_unary(registry, "Math.trunc", f64::trunc);
    math_unary(registry, "Math.sqrt", f64::sqrt);
    // half-way values round towards +Infinity
    math_unary(registry, "Math.round", |x| (x + 0.5).floor());
    math_unary(registry, "Math.sign", |x| {
        if x.is_nan() || x == 0.0 { x } else { x.signum() }
    });

    registry.register_fn(
        FunctionSignature::new("Math.pow", &["base", "exponent"], 0),
        |args, _| {
            Ok(Value::Number(
                arg(args, 0).to_number().powf(arg(args, 1).to_number()),
            ))
        },
    );
}

fn register_conversion(registry: &mut FunctionRegistry) {
    registry.register_fn(FunctionSignature::new("Number", &["value"], 1), |args, _| {
        Ok(Value::Number(args.first().map_or(0.0, Value::to_number)))
    });
    registry.register_fn(FunctionSignature::new("String", &["value"], 1), |args, _| {
        Ok(Value::String(
            args.first().map(Value::to_js_string).unwrap_or_default(),
        ))
    });
    registry.register_fn(FunctionSignature::new("Boolean", &["value"], 1), |args, _| {
        Ok(Value::Boolean(arg(args, 0).is_truthy()))
    });
    registry.register_fn(FunctionSignature::new("isNaN", &["value"], 0), |args, _| {
        Ok(Value::Boolean(arg(args, 0).to_number().is_nan()))
    });
    registry.register_fn(
        FunctionSignature::new("Number.isInteger", &["value"], 0),
        |args, _| {
            Ok(Value::Boolean(matches!(
                arg(args, 0),
                Value::Number(n) if n.is_finite() && n.fract() == 0.0
            )))
        },
    );
    registry.register_fn(
        FunctionSignature::new("parseInt", &["string", "radix"], 1),
        |args, _| {
            let text = arg(args, 0).to_js_string();
            let radix = match arg(args, 1) {
                Value::Undefined => 0,
                other => other.to_number() as i64,
            };
            parse_int(&text, radix)
                .map(Value::Number)
                .map_err(|message| FunctionError::EvaluationError {
                    name: "parseInt".to_string(),
                    message,
                })
        },
    );
    registry.register_fn(FunctionSignature::new("parseFloat", &["string"], 0), |args, _| {
        Ok(Value::Number(parse_float(&arg(args, 0).to_js_string())))
    });
    registry.register_fn(
        FunctionSignature::new("JSON.stringify", &["value"], 0),
        |args, _| match arg(args, 0).to_json() {
            Some(json) => serde_json::to_string(&json).map(Value::String).map_err(|e| {
                FunctionError::EvaluationError {
                    name: "JSON.stringify".to_string(),
                    message: e.to_string(),
                }
            }),
            None => Ok(Value::Undefined),
        },
    );
}

fn register_collection(registry: &mut FunctionRegistry) {
    registry.register_fn(FunctionSignature::new("Array.isArray", &["value"], 0), |args, _| {
        Ok(Value::Boolean(matches!(arg(args, 0), Value::Array(_))))
    });
    registry.register_fn(FunctionSignature::new("Object.keys", &["object"], 0), |args, _| {
        Ok(Value::Array(match arg(args, 0) {
            Value::Object(map) => map.keys().map(|k| Value::string(k.as_str())).collect(),
            Value::Array(items) => (0..items.len())
                .map(|i| Value::String(i.to_string()))
                .collect(),
            _ => Vec::new(),
        }))
    });
    registry.register_fn(FunctionSignature::new("Object.values", &["object"], 0), |args, _| {
        Ok(Value::Array(match arg(args, 0) {
            Value::Object(map) => map.values().cloned().collect(),
            Value::Array(items) => items.clone(),
            _ => Vec::new(),
        }))
    });
    registry.register_fn(FunctionSignature::new("isEmpty", &["value"], 0), |args, _| {
        Ok(Value::Boolean(arg(args, 0).is_blank()))
    });
}

/// `parseInt` semantics: longest valid digit prefix, `NaN` when there is none
fn parse_int(text: &str, radix: i64) -> Result<f64, String> {
    let mut rest = text.trim_start();
    let negative = rest.starts_with('-');
    if negative || rest.starts_with('+') {
        rest = &rest[1..];
    }

    let mut radix = radix;
    if radix != 0 && !(2..=36).contains(&radix) {
        return Err(format!("radix {radix} must be between 2 and 36"));
    }
    if (radix == 0 || radix == 16)
        && (rest.starts_with("0x") || rest.starts_with("0X"))
    {
        rest = &rest[2..];
        radix = 16;
    }
    if radix == 0 {
        radix = 10;
    }

    let mut value = 0.0_f64;
    let mut seen = false;
    for c in rest.chars() {
        let Some(digit) = c.to_digit(radix as u32) else {
            break;
        };
        value = value * radix as f64 + f64::from(digit);
        seen = true;
    }
    if !seen {
        return Ok(f64::NAN);
    }
    Ok(if negative { -value } else { value })
}

fn parse_float(text: &str) -> f64 {
    let trimmed = text.trim_start();
    FLOAT_PREFIX
        .find(trimmed)
        .and_then(|m| {
            let literal = m.as_str();
            match literal.trim_start_matches(['+', '-']) {
                "Infinity" if literal.starts_with('-') => Some(f64::NEG_INFINITY),
                "Infinity" => Some(f64::INFINITY),
                _ => literal.parse::<f64>().ok(),
            }
        })
        .unwrap_or(f64::NAN)
}

/// Render a number the way `toFixed` does
pub(crate) fn to_fixed(n: f64, digits: usize) -> String {
    if !n.is_finite() {
        return format_number(n);
    }
    format!("{n:.digits$}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::ExecutionContext;
    use rstest::rstest;
    use serde_json::json;

    fn call(name: &str, args: &[Value]) -> Value {
        let registry = FunctionRegistry::standard();
        let model = json!({});
        let ctx = ExecutionContext::new(&model);
        registry.call(name, args, &ctx).unwrap().unwrap()
    }

    #[rstest]
    #[case("42px", 0, 42.0)]
    #[case("  -17", 0, -17.0)]
    #[case("0x1F", 0, 31.0)]
    #[case("ff", 16, 255.0)]
    #[case("101", 2, 5.0)]
    #[case("3.9", 10, 3.0)]
    fn test_parse_int(#[case] input: &str, #[case] radix: i64, #[case] expected: f64) {
        assert_eq!(parse_int(input, radix).unwrap(), expected);
    }

    #[test]
    fn test_parse_int_without_digits_is_nan() {
        assert!(parse_int("abc", 0).unwrap().is_nan());
        assert!(parse_int("1", 99).is_err());
    }

    #[rstest]
    #[case("3.25abc", 3.25)]
    #[case(" .5", 0.5)]
    #[case("-Infinity", f64::NEG_INFINITY)]
    #[case("1e3x", 1000.0)]
    fn test_parse_float(#[case] input: &str, #[case] expected: f64) {
        assert_eq!(parse_float(input), expected);
    }

    #[test]
    fn test_math_helpers() {
        assert_eq!(
            call("Math.max", &[Value::Number(1.0), Value::from("7"), Value::Number(3.0)]),
            Value::Number(7.0)
        );
        assert_eq!(call("Math.max", &[]), Value::Number(f64::NEG_INFINITY));
        assert_eq!(call("Math.round", &[Value::Number(-2.5)]), Value::Number(-2.0));
        assert_eq!(call("Math.round", &[Value::Number(2.5)]), Value::Number(3.0));
        assert_eq!(
            call("Math.pow", &[Value::Number(2.0), Value::Number(10.0)]),
            Value::Number(1024.0)
        );
    }

    #[test]
    fn test_conversion_helpers() {
        assert_eq!(call("Number", &[Value::from("12")]), Value::Number(12.0));
        assert_eq!(call("Number", &[]), Value::Number(0.0));
        assert_eq!(call("String", &[Value::Number(1.5)]), Value::from("1.5"));
        assert_eq!(call("Boolean", &[Value::from("")]), Value::Boolean(false));
        assert_eq!(call("isNaN", &[Value::from("x")]), Value::Boolean(true));
        assert_eq!(
            call("JSON.stringify", &[Value::Array(vec![Value::Number(1.0), Value::Null])]),
            Value::from("[1,null]")
        );
    }

    #[test]
    fn test_collection_helpers() {
        let object = Value::from(json!({"b": 1, "a": 2}));
        assert_eq!(
            call("Object.keys", &[object.clone()]),
            Value::Array(vec![Value::from("b"), Value::from("a")])
        );
        assert_eq!(
            call("Object.values", &[object]),
            Value::Array(vec![Value::Number(1.0), Value::Number(2.0)])
        );
        assert_eq!(call("isEmpty", &[Value::Array(vec![])]), Value::Boolean(true));
        assert_eq!(call("Array.isArray", &[Value::Null]), Value::Boolean(false));
    }

    #[test]
    fn test_to_fixed() {
        assert_eq!(to_fixed(1.005, 1), "1.0");
        assert_eq!(to_fixed(2.0, 2), "2.00");
        assert_eq!(to_fixed(f64::NAN, 2), "NaN");
    }
}
