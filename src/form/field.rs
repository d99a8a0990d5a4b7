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

//! Field controller
//!
//! One controller per mounted field. It re-runs the feature resolver when
//! the form wakes it, writes changed features into the live description and
//! keeps the field's model slot consistent with its visibility.

use super::{FormState, VisibilityChange};
use crate::evaluator::ExpressionEngine;
use crate::features::{
    CandidateFilter, FeatureMap, FieldDescription, get_control_features, get_value_for_key,
};
use crate::model::tree::{self, is_empty_value};
use crate::model::{FieldPath, PathSegment, Value, WriteOutcome};
use serde_json::Value as JsonValue;

/// Features mirrored into [`crate::features::LiveFlags`]
const LIVE_FEATURES: &[&str] = &["hide", "required", "readonly", "minimum", "maximum", "title"];

/// Registration state of a field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FieldState {
    /// Not mounted, or unmounted
    #[default]
    Unregistered,
    /// Mounted and shown
    Visible,
    /// Mounted and hidden
    Hidden,
}

impl FieldState {
    /// Mounted, whatever the visibility
    pub fn is_registered(self) -> bool {
        !matches!(self, FieldState::Unregistered)
    }
}

/// Locals bound while a filter expression runs per candidate
const FILTER_LOCALS: &[&str] = &["item", "index"];

/// Decide whether a field's value belongs in the model
///
/// Persisted fields always do. Deprecated fields stay only while they hold
/// data. Write-only fields are submitted without being rendered, so hiding
/// them keeps the value. Otherwise hidden fields are not constructed.
pub fn should_be_constructed(description: &FieldDescription, prev_value: Option<&JsonValue>) -> bool {
    if description.persist {
        return true;
    }
    if description.deprecated {
        return !is_empty_value(prev_value);
    }
    description.write_only || !description.live.hide
}

/// Candidate filter carried by a resolved `filter` feature
pub(crate) fn resolved_filter(features: &FeatureMap) -> Option<CandidateFilter> {
    features
        .get("filter")
        .and_then(Value::to_json)
        .and_then(|json| serde_json::from_value(json).ok())
}

/// Per-field state machine
#[derive(Debug, Clone)]
pub struct FieldController {
    description: FieldDescription,
    state: FieldState,
    constructed: Option<bool>,
    rule_dependencies: Vec<FieldPath>,
    dependencies: Vec<FieldPath>,
    features: FeatureMap,
}

impl FieldController {
    /// Wrap a description; nothing is evaluated until [`FieldController::init_field`]
    pub fn new(mut description: FieldDescription) -> Self {
        description.fill_name();
        description.reset_live_flags();
        Self {
            description,
            state: FieldState::Unregistered,
            constructed: None,
            rule_dependencies: Vec::new(),
            dependencies: Vec::new(),
            features: FeatureMap::new(),
        }
    }

    /// Stable id derived from the path; `None` for un-indexed array items
    pub fn field_id(&self) -> Option<String> {
        if self.description.path.has_wildcard() {
            None
        } else {
            Some(self.description.path.to_string())
        }
    }

    /// The live description
    pub fn description(&self) -> &FieldDescription {
        &self.description
    }

    /// Mutable access for hosts adjusting static metadata
    pub fn description_mut(&mut self) -> &mut FieldDescription {
        &mut self.description
    }

    /// Registration state
    pub fn state(&self) -> FieldState {
        self.state
    }

    /// Whether the value currently belongs in the model
    pub fn is_constructed(&self) -> bool {
        self.constructed.unwrap_or(false)
    }

    /// Context paths the field's expressions read, including the ones of a
    /// filter resolved by the last pass
    pub fn dependencies(&self) -> &[FieldPath] {
        &self.dependencies
    }

    /// Features resolved by the last pass
    pub fn features(&self) -> &FeatureMap {
        &self.features
    }

    /// Model path the field reads and writes
    ///
    /// Projected fields go through to the parent object.
    pub fn model_path(&self) -> FieldPath {
        if self.description.is_projected() {
            self.description.parent_path().unwrap_or_default()
        } else {
            self.description.path.clone()
        }
    }

    /// Register the field and compute its initial features
    ///
    /// Returns the field id, or `None` when the path cannot produce one.
    pub fn init_field(&mut self, form: &mut FormState) -> Option<String> {
        let id = self.field_id()?;
        self.rule_dependencies = self.collect_dependencies(form.engine());
        self.dependencies = self.rule_dependencies.clone();
        if !self.state.is_registered() {
            self.state = self.visibility_state();
        }
        self.process_features(form);
        Some(id)
    }

    /// Unregister the field from the form
    pub fn unmount(&mut self, form: &mut FormState) {
        if let Some(id) = self.field_id() {
            form.unregister(&id);
        }
        self.state = FieldState::Unregistered;
        self.constructed = None;
    }

    /// Current value of the field
    pub fn get_model<'f>(&self, form: &'f FormState) -> Option<&'f JsonValue> {
        tree::get(form.model(), &self.model_path())
    }

    /// Write the field value; returns whether a change was recorded
    ///
    /// Two empty arrays or two empty objects never count as a change, even
    /// with `force_update`. A missing parent makes the write a no-op.
    pub fn set_model(&mut self, form: &mut FormState, value: JsonValue, force_update: bool) -> bool {
        let path = self.model_path();
        let previous = tree::get(form.model(), &path);
        if both_empty_containers(previous, &value) {
            return false;
        }
        if !force_update && previous == Some(&value) {
            return false;
        }
        match tree::set(form.model_mut(), &path, value) {
            WriteOutcome::Written => {
                form.record_change(path);
                true
            }
            WriteOutcome::Unchanged if force_update => {
                form.record_change(path);
                true
            }
            WriteOutcome::Unchanged => false,
            WriteOutcome::MissingParent => {
                log::debug!("no parent object for '{path}', write skipped");
                false
            }
        }
    }

    /// Re-run the resolver and apply what changed
    ///
    /// Returns whether the live flags or the model changed.
    pub fn process_features(&mut self, form: &mut FormState) -> bool {
        let features = get_control_features(form.engine(), &self.description, &form.context());
        let mut changed = false;

        let was_hidden = self.description.live.hide;
        for name in LIVE_FEATURES {
            let value = features.get(*name).cloned();
            if self.description.cache.update(name, value.clone()) {
                self.apply_live(name, value.as_ref());
                changed = true;
            }
        }
        for (name, value) in &features {
            if !LIVE_FEATURES.contains(&name.as_str()) && !matches!(name.as_str(), "default" | "set") {
                self.description.cache.update(name, Some(value.clone()));
            }
        }
        if was_hidden != self.description.live.hide {
            self.state = self.visibility_state();
            form.record_visibility(VisibilityChange {
                path: self.description.path.clone(),
                hidden: self.description.live.hide,
            });
        }

        let default = features
            .get("default")
            .cloned()
            .or_else(|| self.description.default.as_ref().map(Value::from));
        let previous_default = self.description.cache.get("default").cloned();
        let default_changed = self.description.cache.update("default", default.clone());

        changed |= self.should_be_constructed(form, true);
        if self.is_constructed() {
            if default_changed {
                changed |= self.apply_default(form, default, previous_default);
            }
            if let Some(json) = features.get("set").and_then(Value::to_json) {
                changed |= self.set_model(form, json, false);
            }
        }
        self.track_filter_dependencies(form.engine(), &features);
        self.features = features;
        changed
    }

    /// Re-evaluate whether the value belongs in the model
    ///
    /// With `update_model`, a constructed → not constructed transition
    /// deep-removes the value; the reverse re-registers the field and writes
    /// its default when it was hidden and holds nothing. Returns whether the
    /// model changed.
    pub fn should_be_constructed(&mut self, form: &mut FormState, update_model: bool) -> bool {
        let now = should_be_constructed(&self.description, self.get_model(form));
        let before = self.constructed.replace(now);
        if !update_model || before == Some(now) {
            return false;
        }
        let Some(id) = self.field_id() else {
            return false;
        };

        if now {
            form.register(&id);
            if before == Some(false) && self.should_init(form) {
                let default = get_value_for_key(form.engine(), "default", &self.description, &form.context())
                    .or_else(|| self.description.default.as_ref().map(Value::from));
                if let Some(json) = default.as_ref().and_then(Value::to_json) {
                    return self.set_model(form, json, false);
                }
            }
            false
        } else {
            form.unregister(&id);
            self.remove_model(form)
        }
    }

    fn should_init(&self, form: &FormState) -> bool {
        let description = &self.description;
        is_empty_value(self.get_model(form))
            && !description.path.is_array_item()
            && !description
                .form_type
                .as_ref()
                .is_some_and(|form_type| form.config().no_init_form_types.contains(form_type))
    }

    /// Write a new default when the slot is empty or still holds the previous one
    fn apply_default(&mut self, form: &mut FormState, default: Option<Value>, previous: Option<Value>) -> bool {
        let Some(json) = default.as_ref().and_then(Value::to_json) else {
            return false;
        };
        let previous = previous.as_ref().and_then(Value::to_json);
        let current = self.get_model(form);
        let replaceable = is_empty_value(current) || (previous.is_some() && current == previous.as_ref());
        if replaceable && current != Some(&json) {
            self.set_model(form, json, false)
        } else {
            false
        }
    }

    /// Deep-remove the field value; returns whether anything was removed
    pub(crate) fn remove_model(&mut self, form: &mut FormState) -> bool {
        // the parent object is shared with siblings
        if self.description.is_projected() {
            return false;
        }
        let path = self.description.path.clone();
        if tree::remove(form.model_mut(), &path).is_some() {
            form.record_change(path);
            true
        } else {
            false
        }
    }

    fn apply_live(&mut self, feature: &str, value: Option<&Value>) {
        let description = &mut self.description;
        let flag = |fallback: bool| value.map_or(fallback, Value::is_truthy);
        let number = |fallback: Option<f64>| match value {
            Some(v) if !v.is_nullish() => Some(v.to_number()).filter(|n| !n.is_nan()),
            Some(_) => None,
            None => fallback,
        };
        match feature {
            "hide" => description.live.hide = flag(description.hidden),
            "required" => description.live.required = flag(description.required),
            "readonly" => description.live.readonly = flag(description.read_only),
            "minimum" => description.live.minimum = number(description.minimum),
            "maximum" => description.live.maximum = number(description.maximum),
            "title" => {
                description.live.title = match value {
                    Some(v) if !v.is_nullish() => Some(v.to_js_string()),
                    Some(_) => None,
                    None => description.title.clone(),
                }
            }
            _ => {}
        }
    }

    fn visibility_state(&self) -> FieldState {
        if self.description.live.hide {
            FieldState::Hidden
        } else {
            FieldState::Visible
        }
    }

    fn collect_dependencies(&self, engine: &ExpressionEngine) -> Vec<FieldPath> {
        let mut dependencies = Vec::new();
        for source in self.description.rules.expressions() {
            self.add_references(engine, source, &[], &mut dependencies);
        }
        if let Some(filter) = &self.description.filter {
            self.add_filter_references(engine, filter, &mut dependencies);
        }
        dependencies
    }

    /// Follow the expression of a filter the rules resolved
    fn track_filter_dependencies(&mut self, engine: &ExpressionEngine, features: &FeatureMap) {
        let mut dependencies = self.rule_dependencies.clone();
        if let Some(filter) = resolved_filter(features) {
            self.add_filter_references(engine, &filter, &mut dependencies);
        }
        if dependencies != self.dependencies {
            log::debug!(
                "'{}' now depends on {} paths",
                self.description.path,
                dependencies.len()
            );
            self.dependencies = dependencies;
        }
    }

    fn add_filter_references(
        &self,
        engine: &ExpressionEngine,
        filter: &CandidateFilter,
        dependencies: &mut Vec<FieldPath>,
    ) {
        let locals: &[&str] = match filter {
            CandidateFilter::Expression(_) => FILTER_LOCALS,
            CandidateFilter::Path { .. } => &[],
        };
        self.add_references(engine, filter.source(), locals, dependencies);
    }

    fn add_references(
        &self,
        engine: &ExpressionEngine,
        source: &str,
        locals: &[&str],
        dependencies: &mut Vec<FieldPath>,
    ) {
        let references = match engine.references(source, &self.description.scope()) {
            Ok(references) => references,
            Err(err) => {
                engine.report_failure(source, &err);
                return;
            }
        };
        for reference in references {
            let local = matches!(
                reference.segments().first(),
                Some(PathSegment::Key(key)) if locals.contains(&key.as_str())
            );
            if !local && !dependencies.contains(&reference) {
                dependencies.push(reference);
            }
        }
    }
}

fn both_empty_containers(previous: Option<&JsonValue>, next: &JsonValue) -> bool {
    match (previous, next) {
        (Some(JsonValue::Array(a)), JsonValue::Array(b)) => a.is_empty() && b.is_empty(),
        (Some(JsonValue::Object(a)), JsonValue::Object(b)) => a.is_empty() && b.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::features::{FeatureSet, FieldKind};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn controller(path: &str, rules: JsonValue) -> FieldController {
        FieldController::new(
            FieldDescription::new(FieldPath::parse(path).unwrap())
                .with_rules(FeatureSet::from_json(&rules).unwrap()),
        )
    }

    fn state(model: JsonValue) -> FormState {
        FormState::new(model, EngineConfig::default())
    }

    #[test]
    fn test_init_registers_and_applies_default() {
        let mut form = state(json!({"car": {"year": 1965}}));
        let mut field = controller("car.era", json!({"default": {"eval": "./year < 1970 ? 'classic' : 'modern'"}}));

        assert_eq!(field.init_field(&mut form), Some("car.era".to_string()));
        assert_eq!(field.state(), FieldState::Visible);
        assert!(form.is_registered("car.era"));
        assert_eq!(form.model(), &json!({"car": {"year": 1965, "era": "classic"}}));
        assert_eq!(
            field.dependencies().iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec!["car.year"]
        );
    }

    #[test]
    fn test_wildcard_paths_have_no_id() {
        let mut form = state(json!({}));
        let mut field = controller("rows[].name", json!({}));
        assert_eq!(field.init_field(&mut form), None);
        assert_eq!(field.state(), FieldState::Unregistered);
    }

    #[test]
    fn test_second_pass_is_idempotent() {
        let mut form = state(json!({"a": {"n": 2}}));
        let mut field = controller(
            "a.label",
            json!({"title": {"eval": "'n=' + ./n"}, "set": {"eval": "./n * 10"}}),
        );
        field.init_field(&mut form);
        assert_eq!(field.description().live.title.as_deref(), Some("n=2"));
        assert_eq!(form.model()["a"]["label"], json!(20));

        form.take_changes();
        assert!(!field.process_features(&mut form));
        assert!(form.take_changes().is_empty());
    }

    #[test]
    fn test_default_follows_its_expression_until_edited() {
        let mut form = state(json!({"p": {"qty": 2}}));
        let mut field = controller("p.total", json!({"default": {"eval": "./qty * 5"}}));
        field.init_field(&mut form);
        assert_eq!(form.model()["p"]["total"], json!(10));

        tree::set(form.model_mut(), &FieldPath::parse("p.qty").unwrap(), json!(3));
        field.process_features(&mut form);
        assert_eq!(form.model()["p"]["total"], json!(15));

        tree::set(form.model_mut(), &FieldPath::parse("p.total").unwrap(), json!(99));
        tree::set(form.model_mut(), &FieldPath::parse("p.qty").unwrap(), json!(4));
        field.process_features(&mut form);
        assert_eq!(form.model()["p"]["total"], json!(99));
    }

    #[test]
    fn test_hiding_removes_value_and_showing_restores_default() {
        let mut form = state(json!({"s": {"kind": "car", "doors": 5}}));
        let mut field = controller(
            "s.doors",
            json!({"hide": {"if": "./kind !== 'car'"}, "default": 4}),
        );
        field.init_field(&mut form);
        assert_eq!(form.model()["s"]["doors"], json!(5));

        tree::set(form.model_mut(), &FieldPath::parse("s.kind").unwrap(), json!("boat"));
        assert!(field.process_features(&mut form));
        assert_eq!(field.state(), FieldState::Hidden);
        assert!(!form.is_registered("s.doors"));
        assert_eq!(form.model(), &json!({"s": {"kind": "boat"}}));

        tree::set(form.model_mut(), &FieldPath::parse("s.kind").unwrap(), json!("car"));
        field.process_features(&mut form);
        assert_eq!(field.state(), FieldState::Visible);
        assert!(form.is_registered("s.doors"));
        assert_eq!(form.model()["s"]["doors"], json!(4));

        let changes = form.take_visibility();
        assert_eq!(
            changes.iter().map(|c| c.hidden).collect::<Vec<_>>(),
            vec![true, false]
        );
    }

    #[test]
    fn test_persist_and_deprecated_fields() {
        let mut form = state(json!({"a": {"old": "kept", "keep": 1}}));

        let mut persisted = controller("a.keep", json!({"hide": true}));
        persisted.description_mut().persist = true;
        persisted.init_field(&mut form);
        assert!(persisted.is_constructed());
        assert_eq!(form.model()["a"]["keep"], json!(1));

        let mut deprecated = controller("a.old", json!({}));
        deprecated.description_mut().deprecated = true;
        deprecated.init_field(&mut form);
        assert!(deprecated.is_constructed());

        let mut empty = controller("a.gone", json!({}));
        empty.description_mut().deprecated = true;
        empty.init_field(&mut form);
        assert!(!empty.is_constructed());
    }

    #[test]
    fn test_write_only_field_keeps_value_while_hidden() {
        let mut form = state(json!({"acct": {"show": true, "pin": "1234"}}));
        let mut field = controller("acct.pin", json!({"hide": {"if": "!./show"}}));
        field.description_mut().write_only = true;
        field.init_field(&mut form);
        assert!(field.is_constructed());

        tree::set(form.model_mut(), &FieldPath::parse("acct.show").unwrap(), json!(false));
        field.process_features(&mut form);
        assert!(field.description().live.hide);
        assert_eq!(field.state(), FieldState::Hidden);
        assert!(field.is_constructed());
        assert_eq!(form.model()["acct"]["pin"], json!("1234"));
    }

    #[test]
    fn test_resolved_filter_joins_dependencies() {
        let mut form = state(json!({"addr": {"country": "UK", "region": "north"}}));
        let mut field = controller(
            "addr.city",
            json!({"filter": {"value": "this.item.country === ./country && this.index < 10"}}),
        );
        field.init_field(&mut form);
        assert_eq!(field.dependencies(), &[FieldPath::parse("addr.country").unwrap()]);

        let mut plain = controller("addr.zip", json!({"hide": {"if": "./region === 'south'"}}));
        plain.init_field(&mut form);
        assert_eq!(plain.dependencies(), &[FieldPath::parse("addr.region").unwrap()]);
    }

    #[test]
    fn test_checkbox_is_not_initialised_on_show() {
        let mut form = state(json!({"f": {"show": false}}));
        let mut field = controller("f.agree", json!({"hide": {"if": "!./show"}, "default": true}));
        field.description_mut().form_type = Some("checkbox".to_string());
        field.init_field(&mut form);
        assert!(form.model()["f"].get("agree").is_none());

        tree::set(form.model_mut(), &FieldPath::parse("f.show").unwrap(), json!(true));
        field.process_features(&mut form);
        assert_eq!(field.state(), FieldState::Visible);
        assert!(form.model()["f"].get("agree").is_none());
    }

    #[test]
    fn test_projected_field_reads_and_writes_parent() {
        let mut form = state(json!({"owner": {"address": []}}));
        let mut description = FieldDescription::new(FieldPath::parse("owner.address.street").unwrap());
        description.kind = FieldKind::Projected;
        let mut field = FieldController::new(description);

        assert_eq!(field.get_model(&form), Some(&json!([])));
        assert!(!field.set_model(&mut form, json!([]), true));
        assert!(form.take_changes().is_empty());

        assert!(field.set_model(&mut form, json!({"street": "Main"}), false));
        assert_eq!(form.model(), &json!({"owner": {"address": {"street": "Main"}}}));
    }

    #[test]
    fn test_writes_without_parent_are_noops() {
        let mut form = state(json!({}));
        let mut field = controller("missing.parent.leaf", json!({"set": "x"}));
        assert!(!field.set_model(&mut form, json!(1), true));
        field.init_field(&mut form);
        assert_eq!(form.model(), &json!({}));
    }

    #[test]
    fn test_live_bounds_fall_back_to_static() {
        let mut form = state(json!({"car": {"electric": true}}));
        let mut field = controller(
            "car.range",
            json!({"minimum": {"if": "./electric", "value": 100}}),
        );
        field.description_mut().minimum = Some(0.0);
        field.description_mut().reset_live_flags();
        field.init_field(&mut form);
        assert_eq!(field.description().live.minimum, Some(100.0));

        tree::set(form.model_mut(), &FieldPath::parse("car.electric").unwrap(), json!(false));
        field.process_features(&mut form);
        assert_eq!(field.description().live.minimum, Some(0.0));
    }
}
