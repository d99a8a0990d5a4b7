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

//! Feature rule shapes
//!
//! Rules arrive as loosely shaped JSON. They are classified once, at
//! deserialization, into [`FeatureRule`] and [`FeatureSet`]; an explicit
//! `kind` (rules) or `level` (sets) discriminator wins over key probing.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// Result type for rule classification
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Rule shapes that cannot be classified
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// Keys of two shapes occur together without a discriminator
    #[error("Ambiguous rule shape: both '{first}' and '{second}' present; add an explicit \"kind\"")]
    Ambiguous {
        /// First conflicting key
        first: String,
        /// Second conflicting key
        second: String,
    },

    /// Unknown `kind` or `level` discriminator
    #[error("Unknown {field} '{value}'")]
    UnknownDiscriminator {
        /// Discriminator field name
        field: String,
        /// Offending value
        value: String,
    },

    /// A required key is missing or has the wrong type
    #[error("Malformed {shape} rule: {message}")]
    Malformed {
        /// Shape being parsed
        shape: &'static str,
        /// What went wrong
        message: String,
    },

    /// Batch (control level) rule mixed with per-feature keys
    #[error("Batch rule cannot be combined with feature keys: {keys:?}")]
    MixedShapes {
        /// The feature keys found next to the batch rule
        keys: Vec<String>,
    },
}

/// Leaf value of a rule
#[derive(Debug, Clone, PartialEq)]
pub enum RuleValue {
    /// Fixed JSON value (`{value: V}` or a bare value)
    Literal(JsonValue),
    /// Expression evaluated on each pass (`{eval: "..."}`)
    Computed(String),
}

/// `else` of a conditional
#[derive(Debug, Clone, PartialEq)]
pub enum ElseBranch {
    /// Single fallback rule
    Single(Box<FeatureRule>),
    /// Ordered list; the first entry that resolves wins
    Chain(Vec<FeatureRule>),
}

/// One entry of a `switch`
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    /// Value compared with strict equality; `None` marks the default
    pub case: Option<JsonValue>,
    /// Rule resolved when the case matches
    pub outcome: FeatureRule,
}

/// Declarative rule for one feature
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "JsonValue")]
pub enum FeatureRule {
    /// Fixed or computed value
    Literal(RuleValue),
    /// `{if, value | then, else}`
    Conditional {
        /// Condition expression
        condition: String,
        /// Rule used when the condition is truthy
        then: Box<FeatureRule>,
        /// Rule(s) used otherwise; `None` leaves the feature unresolved
        otherwise: Option<ElseBranch>,
    },
    /// `{switch, cases}`
    Switch {
        /// Expression evaluated once per pass
        discriminant: String,
        /// Cases in declaration order
        cases: Vec<SwitchCase>,
    },
}

impl FeatureRule {
    /// Fixed value rule
    pub fn literal(value: JsonValue) -> Self {
        Self::Literal(RuleValue::Literal(value))
    }

    /// Expression sources the rule may evaluate, in declaration order
    pub fn expressions(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_expressions(&mut out);
        out
    }

    fn collect_expressions<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Literal(RuleValue::Literal(_)) => {}
            Self::Literal(RuleValue::Computed(source)) => out.push(source),
            Self::Conditional {
                condition,
                then,
                otherwise,
            } => {
                out.push(condition);
                then.collect_expressions(out);
                match otherwise {
                    Some(ElseBranch::Single(rule)) => rule.collect_expressions(out),
                    Some(ElseBranch::Chain(rules)) => {
                        rules.iter().for_each(|rule| rule.collect_expressions(out));
                    }
                    None => {}
                }
            }
            Self::Switch {
                discriminant,
                cases,
            } => {
                out.push(discriminant);
                cases
                    .iter()
                    .for_each(|entry| entry.outcome.collect_expressions(out));
            }
        }
    }

    /// Classify a JSON rule
    pub fn from_json(json: &JsonValue) -> SchemaResult<Self> {
        let JsonValue::Object(map) = json else {
            return Ok(Self::literal(json.clone()));
        };

        if let Some(kind) = map.get("kind") {
            return match kind.as_str() {
                Some("literal") => Self::parse_literal(map),
                Some("conditional") => Self::parse_conditional(map),
                Some("switch") => Self::parse_switch(map),
                _ => Err(SchemaError::UnknownDiscriminator {
                    field: "kind".to_string(),
                    value: kind.to_string(),
                }),
            };
        }

        match (map.contains_key("if"), map.contains_key("switch")) {
            (true, true) => Err(SchemaError::Ambiguous {
                first: "if".to_string(),
                second: "switch".to_string(),
            }),
            (true, false) => Self::parse_conditional(map),
            (false, true) => Self::parse_switch(map),
            (false, false) if has_outcome(map) => Self::parse_literal(map),
            // plain object value, e.g. an object default
            (false, false) => Ok(Self::literal(json.clone())),
        }
    }

    fn parse_literal(map: &Map<String, JsonValue>) -> SchemaResult<Self> {
        outcome(map, "literal")?.ok_or_else(|| SchemaError::Malformed {
            shape: "literal",
            message: "expected 'value', 'eval' or 'then'".to_string(),
        })
    }

    fn parse_conditional(map: &Map<String, JsonValue>) -> SchemaResult<Self> {
        let condition = expression_text(map.get("if"), "conditional", "if")?;
        let otherwise = match map.get("else") {
            None => None,
            Some(JsonValue::Array(entries)) => Some(ElseBranch::Chain(
                entries.iter().map(Self::from_json).collect::<SchemaResult<_>>()?,
            )),
            Some(entry) => Some(ElseBranch::Single(Box::new(Self::from_json(entry)?))),
        };
        let then = match outcome(map, "conditional")? {
            Some(rule) => rule,
            // a bare `{if}` is a boolean flag
            None if otherwise.is_none() => {
                return Ok(Self::Conditional {
                    condition,
                    then: Box::new(Self::literal(JsonValue::Bool(true))),
                    otherwise: Some(ElseBranch::Single(Box::new(Self::literal(
                        JsonValue::Bool(false),
                    )))),
                });
            }
            None => Self::literal(JsonValue::Bool(true)),
        };
        Ok(Self::Conditional {
            condition,
            then: Box::new(then),
            otherwise,
        })
    }

    fn parse_switch(map: &Map<String, JsonValue>) -> SchemaResult<Self> {
        let discriminant = expression_text(map.get("switch"), "switch", "switch")?;
        let cases = match map.get("cases") {
            None => Vec::new(),
            Some(JsonValue::Array(entries)) => entries
                .iter()
                .map(|entry| {
                    let JsonValue::Object(case_map) = entry else {
                        return Err(SchemaError::Malformed {
                            shape: "switch",
                            message: format!("case entry must be an object, got {entry}"),
                        });
                    };
                    let outcome = outcome(case_map, "switch")?.ok_or_else(|| {
                        SchemaError::Malformed {
                            shape: "switch",
                            message: "case entry needs 'value', 'eval' or 'then'".to_string(),
                        }
                    })?;
                    Ok(SwitchCase {
                        case: case_map.get("case").cloned(),
                        outcome,
                    })
                })
                .collect::<SchemaResult<_>>()?,
            Some(other) => {
                return Err(SchemaError::Malformed {
                    shape: "switch",
                    message: format!("'cases' must be an array, got {other}"),
                });
            }
        };
        Ok(Self::Switch {
            discriminant,
            cases,
        })
    }
}

impl TryFrom<JsonValue> for FeatureRule {
    type Error = SchemaError;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        Self::from_json(&value)
    }
}

fn has_outcome(map: &Map<String, JsonValue>) -> bool {
    map.contains_key("value") || map.contains_key("eval") || map.contains_key("then")
}

/// `then` (nested rule) or `value` / `eval` leaf
fn outcome(map: &Map<String, JsonValue>, shape: &'static str) -> SchemaResult<Option<FeatureRule>> {
    if let Some(then) = map.get("then") {
        return FeatureRule::from_json(then).map(Some);
    }
    if let Some(eval) = map.get("eval") {
        let source = expression_text(Some(eval), shape, "eval")?;
        return Ok(Some(FeatureRule::Literal(RuleValue::Computed(source))));
    }
    Ok(map.get("value").cloned().map(FeatureRule::literal))
}

/// Expression keys accept strings; booleans and numbers are their own source
fn expression_text(
    value: Option<&JsonValue>,
    shape: &'static str,
    key: &str,
) -> SchemaResult<String> {
    match value {
        Some(JsonValue::String(s)) => Ok(s.clone()),
        Some(v @ (JsonValue::Bool(_) | JsonValue::Number(_))) => Ok(v.to_string()),
        Some(other) => Err(SchemaError::Malformed {
            shape,
            message: format!("'{key}' must be an expression string, got {other}"),
        }),
        None => Err(SchemaError::Malformed {
            shape,
            message: format!("missing '{key}'"),
        }),
    }
}

/// `let <name>` declaration
#[derive(Debug, Clone, PartialEq)]
pub struct LetBinding {
    /// Name bound as `this.<name>`
    pub name: String,
    /// Expression producing the value
    pub expression: String,
}

/// Feature rules of one field
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureBody {
    /// Function level: one rule per feature, optionally behind a shared gate
    PerFeature {
        /// Root condition applied to all features at once
        gate: Option<String>,
        /// Feature name to rule, in declaration order
        features: IndexMap<String, FeatureRule>,
    },
    /// Control or switch level: one rule resolving to an object of features
    Batch(FeatureRule),
}

/// `rawData` of a field description
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "JsonValue")]
pub struct FeatureSet {
    /// `let` bindings in declaration order
    pub lets: Vec<LetBinding>,
    /// Feature rules
    pub body: FeatureBody,
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self {
            lets: Vec::new(),
            body: FeatureBody::PerFeature {
                gate: None,
                features: IndexMap::new(),
            },
        }
    }
}

/// Keys that belong to the root rule rather than to a feature
const ROOT_RULE_KEYS: &[&str] = &["if", "switch", "cases", "value", "eval", "then", "else", "kind"];

impl FeatureSet {
    /// Classify a JSON `rawData` object
    pub fn from_json(json: &JsonValue) -> SchemaResult<Self> {
        let map = match json {
            JsonValue::Null => return Ok(Self::default()),
            JsonValue::Object(map) => map,
            other => {
                return Err(SchemaError::Malformed {
                    shape: "feature set",
                    message: format!("expected an object, got {other}"),
                });
            }
        };

        let mut lets = Vec::new();
        let mut root = Map::new();
        let mut features = IndexMap::new();
        let mut level = None;

        for (key, value) in map {
            if let Some(name) = key.strip_prefix("let ") {
                lets.push(LetBinding {
                    name: name.trim().to_string(),
                    expression: match value {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    },
                });
            } else if key == "level" {
                level = value.as_str();
            } else if ROOT_RULE_KEYS.contains(&key.as_str()) {
                root.insert(key.clone(), value.clone());
            } else {
                features.insert(canonical_feature_name(key), FeatureRule::from_json(value)?);
            }
        }

        let batch = match level {
            Some("function") => false,
            Some("control" | "switch") => true,
            Some(other) => {
                return Err(SchemaError::UnknownDiscriminator {
                    field: "level".to_string(),
                    value: other.to_string(),
                });
            }
            None => {
                root.contains_key("switch")
                    || root.contains_key("else")
                    || (root.contains_key("if") && has_outcome(&root))
            }
        };

        let body = if batch {
            if !features.is_empty() {
                return Err(SchemaError::MixedShapes {
                    keys: features.keys().cloned().collect(),
                });
            }
            FeatureBody::Batch(FeatureRule::from_json(&JsonValue::Object(root))?)
        } else {
            if let Some(key) = root.keys().find(|key| key.as_str() != "if") {
                return Err(SchemaError::Malformed {
                    shape: "function level",
                    message: format!("unexpected root key '{key}' next to a gate"),
                });
            }
            let gate = root
                .get("if")
                .map(|value| expression_text(Some(value), "function level", "if"))
                .transpose()?;
            FeatureBody::PerFeature { gate, features }
        };

        Ok(Self { lets, body })
    }

    /// Every expression source of the set: `let` bindings, gate, then rules
    pub fn expressions(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.lets.iter().map(|binding| binding.expression.as_str()).collect();
        match &self.body {
            FeatureBody::PerFeature { gate, features } => {
                out.extend(gate.as_deref());
                for rule in features.values() {
                    rule.collect_expressions(&mut out);
                }
            }
            FeatureBody::Batch(rule) => rule.collect_expressions(&mut out),
        }
        out
    }

    /// Whether a function-level set has a rule for `feature`
    ///
    /// Batch sets only know their features once resolved.
    pub fn declares(&self, feature: &str) -> bool {
        match &self.body {
            FeatureBody::PerFeature { features, .. } => features.contains_key(feature),
            FeatureBody::Batch(_) => false,
        }
    }

    /// Whether the set declares nothing
    pub fn is_empty(&self) -> bool {
        self.lets.is_empty()
            && matches!(&self.body, FeatureBody::PerFeature { gate: None, features } if features.is_empty())
    }
}

impl TryFrom<JsonValue> for FeatureSet {
    type Error = SchemaError;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        Self::from_json(&value)
    }
}

/// Map `x-hide`, `xHide` and `readOnly` style keys onto canonical feature names
pub fn canonical_feature_name(key: &str) -> String {
    let stripped = if let Some(rest) = key.strip_prefix("x-") {
        rest
    } else if key.len() > 1
        && key.starts_with('x')
        && key[1..].starts_with(|c: char| c.is_ascii_uppercase())
    {
        &key[1..]
    } else {
        key
    };
    let lowered = stripped.replace('-', "");
    if lowered.eq_ignore_ascii_case("readonly") {
        return "readonly".to_string();
    }
    let mut chars = stripped.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
