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

//! Field descriptions: the declarative input of the feature resolver

use super::rule::FeatureSet;
use crate::model::{FieldPath, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Where a field keeps its value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// The value lives at the field's own path
    #[default]
    Owned,
    /// Container tag: the value is an object merged into the parent slot
    Projected,
}

/// How a selectable field narrows its static candidates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CandidateFilter {
    /// Keep candidates whose `property` equals (or is contained in) the value of `source`
    Path {
        /// Candidate property compared
        property: String,
        /// Expression producing the accepted value(s)
        source: String,
    },
    /// Keep candidates for which the expression is truthy; `this.item` and
    /// `this.index` are bound per candidate
    Expression(String),
}

impl CandidateFilter {
    /// Expression the filter evaluates
    pub fn source(&self) -> &str {
        match self {
            Self::Path { source, .. } => source,
            Self::Expression(expression) => expression,
        }
    }
}

/// Flags the controller writes on every pass; renderers read these
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LiveFlags {
    /// Field is hidden
    pub hide: bool,
    /// Field must hold a value
    pub required: bool,
    /// Field is not editable
    pub readonly: bool,
    /// Lower numeric bound
    pub minimum: Option<f64>,
    /// Upper numeric bound
    pub maximum: Option<f64>,
    /// Display title
    pub title: Option<String>,
}

/// Last resolved value per feature, used to detect changes between passes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCache {
    values: IndexMap<String, Value>,
}

impl FeatureCache {
    /// Last resolved value of `feature`
    pub fn get(&self, feature: &str) -> Option<&Value> {
        self.values.get(feature)
    }

    /// Store a new value; returns whether it differs from the cached one
    pub fn update(&mut self, feature: &str, value: Option<Value>) -> bool {
        match value {
            Some(value) => {
                if self.values.get(feature) == Some(&value) {
                    return false;
                }
                self.values.insert(feature.to_string(), value);
                true
            }
            None => self.values.shift_remove(feature).is_some(),
        }
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Cached values keyed the way schema tooling names them (`xHideValue`)
    pub fn to_legacy_map(&self) -> IndexMap<String, Value> {
        self.values
            .iter()
            .map(|(feature, value)| (legacy_cache_key(feature), value.clone()))
            .collect()
    }
}

fn legacy_cache_key(feature: &str) -> String {
    let mut chars = feature.chars();
    match chars.next() {
        Some(first) => format!("x{}{}Value", first.to_uppercase(), chars.as_str()),
        None => "xValue".to_string(),
    }
}

/// Declarative metadata of one form field
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldDescription {
    /// Absolute position of the value, leaf included
    pub path: FieldPath,
    /// Leaf property name
    pub name: String,
    /// Feature rules
    #[serde(alias = "rawData")]
    pub rules: FeatureSet,
    /// Static candidates of enum and relator fields
    pub values: Vec<JsonValue>,
    /// The value is a relator `{id, title, ...}`
    pub is_join: bool,
    /// Owned or projected storage
    pub kind: FieldKind,
    /// Widget type (`text`, `checkbox`, ...)
    pub form_type: Option<String>,

    /// Statically hidden
    pub hidden: bool,
    /// Statically required
    pub required: bool,
    /// Statically read-only
    pub read_only: bool,
    /// Never rendered, still submitted
    pub write_only: bool,
    /// Kept only while it holds data
    pub deprecated: bool,
    /// Keep the value even while hidden
    pub persist: bool,
    /// Static lower bound
    pub minimum: Option<f64>,
    /// Static upper bound
    pub maximum: Option<f64>,
    /// Static title
    pub title: Option<String>,
    /// Static default value
    pub default: Option<JsonValue>,
    /// `Some(false)` accepts free text in selectable fields
    pub require_match: Option<bool>,
    /// Selectable field accepts values beyond its candidates
    pub options_plus: bool,
    /// Static candidate filter
    pub filter: Option<CandidateFilter>,

    /// Flags written by the controller
    #[serde(skip)]
    pub live: LiveFlags,
    /// Last resolved feature values
    #[serde(skip)]
    pub cache: FeatureCache,
}

impl FieldDescription {
    /// Description for `path` with no rules
    pub fn new(path: FieldPath) -> Self {
        let mut description = Self {
            path,
            ..Self::default()
        };
        description.fill_name();
        description.reset_live_flags();
        description
    }

    /// Attach feature rules
    pub fn with_rules(mut self, rules: FeatureSet) -> Self {
        self.rules = rules;
        self
    }

    /// Derive `name` from the path when it was not given
    pub fn fill_name(&mut self) {
        if self.name.is_empty() {
            self.name = self.path.leaf_name().unwrap_or_default();
        }
    }

    /// Reset live flags to the static ones
    pub fn reset_live_flags(&mut self) {
        self.live = LiveFlags {
            hide: self.hidden,
            required: self.required,
            readonly: self.read_only,
            minimum: self.minimum,
            maximum: self.maximum,
            title: self.title.clone(),
        };
    }

    /// Parent path of the value slot (`None` for a root field)
    pub fn parent_path(&self) -> Option<FieldPath> {
        self.path.parent()
    }

    /// Scope relative references of this field resolve against
    pub fn scope(&self) -> FieldPath {
        self.parent_path().unwrap_or_default()
    }

    /// Whether the field stores its value in the parent object
    pub fn is_projected(&self) -> bool {
        self.kind == FieldKind::Projected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_deserialize_description() {
        let mut description: FieldDescription = serde_json::from_value(json!({
            "path": "person.address.city",
            "rawData": {"xHide": {"if": "./country != 'UK'"}},
            "required": true,
            "formType": "text",
            "kind": "projected",
            "filter": {"property": "country", "source": "../country"}
        }))
        .unwrap();
        description.fill_name();
        description.reset_live_flags();

        assert_eq!(description.name, "city");
        assert_eq!(description.scope().to_string(), "person.address");
        assert!(description.live.required);
        assert!(description.is_projected());
        assert_eq!(description.form_type.as_deref(), Some("text"));
        assert!(matches!(description.filter, Some(CandidateFilter::Path { .. })));
        assert!(!description.rules.is_empty());
    }

    #[test]
    fn test_expression_filter_deserializes() {
        let filter: CandidateFilter = serde_json::from_value(json!("this.item.active")).unwrap();
        assert_eq!(filter, CandidateFilter::Expression("this.item.active".to_string()));
    }

    #[test]
    fn test_feature_cache_change_detection() {
        let mut cache = FeatureCache::default();
        assert!(cache.update("hide", Some(Value::Boolean(true))));
        assert!(!cache.update("hide", Some(Value::Boolean(true))));
        assert!(cache.update("hide", Some(Value::Boolean(false))));
        assert!(cache.update("defaultValue", Some(Value::from("x"))));
        assert_eq!(
            cache.to_legacy_map().keys().collect::<Vec<_>>(),
            vec!["xHideValue", "xDefaultValueValue"]
        );
        assert!(cache.update("hide", None));
        assert!(!cache.update("hide", None));
    }
}
