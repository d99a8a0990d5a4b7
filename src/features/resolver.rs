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

//! Feature resolution
//!
//! A resolver pass binds the `let` declarations in order, checks the
//! function-level gate and resolves every declared feature. Evaluation
//! failures never escape: the affected feature is simply left out of the map.

use super::description::FieldDescription;
use super::rule::{
    ElseBranch, FeatureBody, FeatureRule, FeatureSet, RuleValue, canonical_feature_name,
};
use crate::evaluator::{ExecutionContext, ExpressionEngine};
use crate::model::Value;
use indexmap::IndexMap;

/// Resolved features of one field, in declaration order
pub type FeatureMap = IndexMap<String, Value>;

/// Resolve every feature of `description`
///
/// The context scope is reset to the field's scope, so `./x` names a sibling
/// of the field.
pub fn get_control_features(
    engine: &ExpressionEngine,
    description: &FieldDescription,
    context: &ExecutionContext<'_>,
) -> FeatureMap {
    resolve_feature_set(engine, &description.rules, &field_context(description, context))
}

/// Resolve one feature of `description`; `None` when it does not resolve
pub fn get_value_for_key(
    engine: &ExpressionEngine,
    key: &str,
    description: &FieldDescription,
    context: &ExecutionContext<'_>,
) -> Option<Value> {
    let key = canonical_feature_name(key);
    let rules = &description.rules;
    let ctx = bind_lets(engine, rules, &field_context(description, context));

    match &rules.body {
        FeatureBody::PerFeature { gate, features } => {
            let rule = features.get(&key)?;
            if !gate_open(engine, gate.as_deref(), &ctx) {
                return None;
            }
            resolve_rule(engine, rule, &ctx)
        }
        FeatureBody::Batch(rule) => batch_features(resolve_rule(engine, rule, &ctx)).shift_remove(&key),
    }
}

/// Resolve a feature set against a context already scoped to the field
pub fn resolve_feature_set(
    engine: &ExpressionEngine,
    rules: &FeatureSet,
    context: &ExecutionContext<'_>,
) -> FeatureMap {
    let ctx = bind_lets(engine, rules, context);

    match &rules.body {
        FeatureBody::PerFeature { gate, features } => {
            if !gate_open(engine, gate.as_deref(), &ctx) {
                log::debug!("function-level gate closed at '{}'", ctx.scope());
                return FeatureMap::new();
            }
            features
                .iter()
                .filter_map(|(name, rule)| {
                    resolve_rule(engine, rule, &ctx).map(|value| (name.clone(), value))
                })
                .collect()
        }
        FeatureBody::Batch(rule) => batch_features(resolve_rule(engine, rule, &ctx)),
    }
}

/// Resolve a single rule; `None` means unresolved
pub fn resolve_rule(
    engine: &ExpressionEngine,
    rule: &FeatureRule,
    context: &ExecutionContext<'_>,
) -> Option<Value> {
    match rule {
        FeatureRule::Literal(RuleValue::Literal(json)) => Some(Value::from(json)),
        FeatureRule::Literal(RuleValue::Computed(source)) => {
            let value = checked_evaluate(engine, source, context)?;
            (!value.is_undefined()).then_some(value)
        }
        FeatureRule::Conditional {
            condition,
            then,
            otherwise,
        } => {
            if checked_evaluate(engine, condition, context)?.is_truthy() {
                return resolve_rule(engine, then, context);
            }
            match otherwise.as_ref()? {
                ElseBranch::Single(rule) => resolve_rule(engine, rule, context),
                ElseBranch::Chain(rules) => rules
                    .iter()
                    .find_map(|rule| resolve_rule(engine, rule, context)),
            }
        }
        FeatureRule::Switch {
            discriminant,
            cases,
        } => {
            let subject = checked_evaluate(engine, discriminant, context)?;
            let matched = cases.iter().find(|entry| match &entry.case {
                Some(case) => Value::from(case).strict_equals(&subject),
                None => true,
            })?;
            resolve_rule(engine, &matched.outcome, context)
        }
    }
}

fn field_context<'a>(
    description: &FieldDescription,
    context: &ExecutionContext<'a>,
) -> ExecutionContext<'a> {
    context.clone().with_scope(description.scope())
}

fn bind_lets<'a>(
    engine: &ExpressionEngine,
    rules: &FeatureSet,
    context: &ExecutionContext<'a>,
) -> ExecutionContext<'a> {
    let mut ctx = context.clone();
    for binding in &rules.lets {
        let value = engine.evaluate(&binding.expression, &ctx);
        ctx.bind(binding.name.clone(), value);
    }
    ctx
}

fn gate_open(engine: &ExpressionEngine, gate: Option<&str>, context: &ExecutionContext<'_>) -> bool {
    match gate {
        None => true,
        Some(condition) => {
            checked_evaluate(engine, condition, context).is_some_and(|value| value.is_truthy())
        }
    }
}

fn checked_evaluate(
    engine: &ExpressionEngine,
    source: &str,
    context: &ExecutionContext<'_>,
) -> Option<Value> {
    match engine.try_evaluate(source, context) {
        Ok(value) => Some(value),
        Err(err) => {
            engine.report_failure(source, &err);
            None
        }
    }
}

fn batch_features(resolved: Option<Value>) -> FeatureMap {
    match resolved {
        Some(Value::Object(map)) => map
            .into_iter()
            .filter(|(_, value)| !value.is_undefined())
            .map(|(key, value)| (canonical_feature_name(&key), value))
            .collect(),
        Some(other) => {
            log::debug!("batch rule resolved to {}, expected an object", other.type_of());
            FeatureMap::new()
        }
        None => FeatureMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldPath;
    use pretty_assertions::assert_eq;
    use serde_json::{Value as JsonValue, json};

    fn field(path: &str, rules: JsonValue) -> FieldDescription {
        FieldDescription::new(FieldPath::parse(path).unwrap())
            .with_rules(FeatureSet::from_json(&rules).unwrap())
    }

    fn resolve(description: &FieldDescription, model: &JsonValue) -> FeatureMap {
        let engine = ExpressionEngine::default();
        get_control_features(&engine, description, &ExecutionContext::new(model))
    }

    #[test]
    fn test_else_chain_first_matching_entry_wins() {
        let description = field(
            "form.price",
            json!({
                "xDefault": {
                    "if": "this.test < 10",
                    "value": 30,
                    "else": [
                        {"if": "this.test < 20", "value": 20},
                        {"if": "this.test < 30", "value": 10}
                    ]
                }
            }),
        );
        let features = resolve(&description, &json!({"test": 23}));
        assert_eq!(features.get("default"), Some(&Value::Number(10.0)));

        let features = resolve(&description, &json!({"test": 5}));
        assert_eq!(features.get("default"), Some(&Value::Number(30.0)));

        let features = resolve(&description, &json!({"test": 99}));
        assert!(features.is_empty());
    }

    #[test]
    fn test_switch_falls_through_to_default() {
        let description = field(
            "car.vintage",
            json!({
                "hide": {
                    "switch": "./age",
                    "cases": [
                        {"case": 31, "value": true},
                        {"case": 30, "value": true},
                        {"value": false}
                    ]
                }
            }),
        );
        let features = resolve(&description, &json!({"car": {"age": 23}}));
        assert_eq!(features.get("hide"), Some(&Value::Boolean(false)));

        let features = resolve(&description, &json!({"car": {"age": 30}}));
        assert_eq!(features.get("hide"), Some(&Value::Boolean(true)));
    }

    #[test]
    fn test_switch_without_default_is_unresolved() {
        let description = field(
            "a.b",
            json!({"title": {"switch": "'x'", "cases": [{"case": "y", "value": "Y"}]}}),
        );
        assert!(resolve(&description, &json!({})).is_empty());
    }

    #[test]
    fn test_function_level_gate_closes_all_features() {
        let rules = json!({
            "if": "./enabled",
            "hide": {"if": "true", "value": true},
            "required": {"value": true}
        });
        let description = field("s.field", rules);

        assert!(resolve(&description, &json!({"s": {"enabled": false}})).is_empty());
        let open = resolve(&description, &json!({"s": {"enabled": true}}));
        assert_eq!(open.keys().collect::<Vec<_>>(), vec!["hide", "required"]);
    }

    #[test]
    fn test_let_bindings_evaluate_in_order() {
        let description = field(
            "order.total",
            json!({
                "let price": "./price * 2",
                "let doubled": "this.price * 2",
                "default": {"eval": "this.doubled + 1"}
            }),
        );
        let features = resolve(&description, &json!({"order": {"price": 5}}));
        assert_eq!(features.get("default"), Some(&Value::Number(21.0)));
    }

    #[test]
    fn test_failing_expressions_leave_feature_unresolved() {
        let description = field(
            "a.b",
            json!({
                "hide": {"if": "this.missing.deep", "value": true},
                "title": {"eval": "this.nothing"},
                "required": {"if": "(((", "value": true},
                "readOnly": {"if": "../../../x", "value": true}
            }),
        );
        assert!(resolve(&description, &json!({})).is_empty());
    }

    #[test]
    fn test_batch_level_result_becomes_feature_map() {
        let description = field(
            "p.extra",
            json!({
                "switch": "./type",
                "cases": [
                    {"case": "car", "value": {"xHide": false, "xRequired": true}},
                    {"value": {"hide": true}}
                ]
            }),
        );
        let features = resolve(&description, &json!({"p": {"type": "car"}}));
        assert_eq!(
            features,
            FeatureMap::from_iter([
                ("hide".to_string(), Value::Boolean(false)),
                ("required".to_string(), Value::Boolean(true)),
            ])
        );

        let engine = ExpressionEngine::default();
        let model = json!({"p": {"type": "boat"}});
        let ctx = ExecutionContext::new(&model);
        assert_eq!(
            get_value_for_key(&engine, "x-hide", &description, &ctx),
            Some(Value::Boolean(true))
        );
        assert_eq!(get_value_for_key(&engine, "required", &description, &ctx), None);
    }

    #[test]
    fn test_get_value_for_key_respects_gate() {
        let description = field("f.x", json!({"if": "./on", "hide": true}));
        let engine = ExpressionEngine::default();
        let model = json!({"f": {"on": true}});
        let ctx = ExecutionContext::new(&model);
        assert_eq!(
            get_value_for_key(&engine, "xHide", &description, &ctx),
            Some(Value::Boolean(true))
        );
        let model = json!({"f": {"on": 0}});
        let ctx = ExecutionContext::new(&model);
        assert_eq!(get_value_for_key(&engine, "hide", &description, &ctx), None);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let description = field("a.b", json!({"title": {"eval": "'#' + ./n"}}));
        let model = json!({"a": {"n": 4}});
        assert_eq!(resolve(&description, &model), resolve(&description, &model));
    }
}
