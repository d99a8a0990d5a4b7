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

//! Forms: model ownership, field controllers and settle passes
//!
//! A [`Form`] owns the model tree, one [`ExpressionEngine`] (and with it the
//! form's compiled-expression cache), the change bus and the mounted
//! controls. Changes are recorded while controllers run; [`Form::settle`]
//! wakes the dependent fields until nothing changes any more and reports the
//! whole burst once.

#![warn(missing_docs)]

mod bus;
mod field;
mod selectable;
mod validation;

pub use bus::ChangeBus;
pub use field::{FieldController, FieldState, should_be_constructed};
pub use selectable::SelectableField;
pub use validation::ValidationIssue;

use crate::config::EngineConfig;
use crate::evaluator::{ExecutionContext, ExpressionEngine};
use crate::features::FieldDescription;
use crate::model::tree::{self, is_empty_value};
use crate::model::{FieldPath, PathError, WriteOutcome};
use crate::registry::FunctionRegistry;
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;

/// Result type for form operations
pub type FormResult<T> = Result<T, FormError>;

/// Errors raised by form operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormError {
    /// No mounted field has this id
    #[error("Unknown field '{id}'")]
    UnknownField {
        /// Requested id
        id: String,
    },

    /// The path contains an un-indexed array item
    #[error("Field at '{path}' has no stable id; bind it per array item")]
    FieldIdUnavailable {
        /// Field path
        path: FieldPath,
    },

    /// A field with this id is already mounted
    #[error("Field '{id}' is already mounted")]
    DuplicateField {
        /// Field id
        id: String,
    },

    /// Invalid path
    #[error(transparent)]
    Path(#[from] PathError),
}

/// Visibility flip of one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisibilityChange {
    /// Field path
    pub path: FieldPath,
    /// New state
    pub hidden: bool,
}

/// Coalesced outcome of one settle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SettleReport {
    /// Model paths written, in first-write order
    pub changed: Vec<FieldPath>,
    /// Visibility flips in order
    pub visibility: Vec<VisibilityChange>,
    /// Passes run
    pub passes: usize,
    /// Stopped at `max_settle_passes` with changes still pending
    pub limit_reached: bool,
}

impl SettleReport {
    /// Nothing happened
    pub fn is_quiet(&self) -> bool {
        self.changed.is_empty() && self.visibility.is_empty()
    }
}

/// Model and services shared by every controller of a form
#[derive(Debug)]
pub struct FormState {
    model: JsonValue,
    global: Option<JsonValue>,
    engine: ExpressionEngine,
    config: EngineConfig,
    registered: IndexSet<String>,
    changes: Vec<FieldPath>,
    visibility: Vec<VisibilityChange>,
}

impl FormState {
    /// State over `model` with the standard registry
    pub fn new(model: JsonValue, config: EngineConfig) -> Self {
        let engine = ExpressionEngine::new(Arc::new(FunctionRegistry::standard()), &config);
        Self {
            model,
            global: None,
            engine,
            config,
            registered: IndexSet::new(),
            changes: Vec::new(),
            visibility: Vec::new(),
        }
    }

    /// The model tree
    pub fn model(&self) -> &JsonValue {
        &self.model
    }

    /// The model tree, for writes that record their own changes
    pub fn model_mut(&mut self) -> &mut JsonValue {
        &mut self.model
    }

    /// Host global object
    pub fn global(&self) -> Option<&JsonValue> {
        self.global.as_ref()
    }

    /// Expression engine of this form
    pub fn engine(&self) -> &ExpressionEngine {
        &self.engine
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Root evaluation context over the current model
    pub fn context(&self) -> ExecutionContext<'_> {
        ExecutionContext::new(&self.model).with_global(self.global.as_ref())
    }

    /// Record a model change at `path`
    pub fn record_change(&mut self, path: FieldPath) {
        log::debug!("model changed at '{path}'");
        self.changes.push(path);
    }

    /// Record a visibility flip
    pub fn record_visibility(&mut self, change: VisibilityChange) {
        self.visibility.push(change);
    }

    /// Drain pending model changes
    pub fn take_changes(&mut self) -> Vec<FieldPath> {
        std::mem::take(&mut self.changes)
    }

    /// Drain pending visibility flips
    pub fn take_visibility(&mut self) -> Vec<VisibilityChange> {
        std::mem::take(&mut self.visibility)
    }

    /// Mark field `id` as contributing a value
    pub fn register(&mut self, id: &str) {
        if self.registered.insert(id.to_string()) {
            log::debug!("field '{id}' registered");
        }
    }

    /// Withdraw field `id`
    pub fn unregister(&mut self, id: &str) {
        if self.registered.shift_remove(id) {
            log::debug!("field '{id}' unregistered");
        }
    }

    /// Whether field `id` is registered
    pub fn is_registered(&self, id: &str) -> bool {
        self.registered.contains(id)
    }

    /// Registered field ids in registration order
    pub fn registered(&self) -> impl Iterator<Item = &str> {
        self.registered.iter().map(String::as_str)
    }
}

/// A mounted control
///
/// Plain fields and selectable fields share the form through this seam.
pub trait Control: std::fmt::Debug + Send {
    /// Underlying field controller
    fn controller(&self) -> &FieldController;

    /// Underlying field controller, mutably
    fn controller_mut(&mut self) -> &mut FieldController;

    /// Initialise on mount; returns the field id
    fn init(&mut self, form: &mut FormState) -> Option<String> {
        self.controller_mut().init_field(form)
    }

    /// Re-run after a dependency changed; returns whether anything changed
    fn process(&mut self, form: &mut FormState) -> bool {
        self.controller_mut().process_features(form)
    }

    /// Downcast to a selectable field
    fn as_selectable(&self) -> Option<&SelectableField> {
        None
    }

    /// Downcast to a selectable field, mutably
    fn as_selectable_mut(&mut self) -> Option<&mut SelectableField> {
        None
    }
}

impl Control for FieldController {
    fn controller(&self) -> &FieldController {
        self
    }

    fn controller_mut(&mut self) -> &mut FieldController {
        self
    }
}

/// A form instance
#[derive(Debug)]
pub struct Form {
    state: FormState,
    fields: IndexMap<String, Box<dyn Control>>,
    bus: ChangeBus,
}

impl Form {
    /// Create a form over `model`
    pub fn new(model: JsonValue, config: EngineConfig) -> Self {
        Self {
            state: FormState::new(model, config),
            fields: IndexMap::new(),
            bus: ChangeBus::new(),
        }
    }

    /// Attach the host global object (`G/`)
    pub fn with_global(mut self, global: JsonValue) -> Self {
        self.state.global = Some(global);
        self
    }

    /// Use a custom helper registry
    pub fn with_registry(mut self, registry: Arc<FunctionRegistry>) -> Self {
        self.state.engine = ExpressionEngine::new(registry, &self.state.config);
        self
    }

    /// Shared state handed to controllers
    pub fn state(&self) -> &FormState {
        &self.state
    }

    /// The model tree
    pub fn model(&self) -> &JsonValue {
        self.state.model()
    }

    /// Value at `path`
    pub fn value(&self, path: &FieldPath) -> Option<&JsonValue> {
        tree::get(self.state.model(), path)
    }

    /// Mounted control `id`
    pub fn field(&self, id: &str) -> Option<&dyn Control> {
        self.fields.get(id).map(|control| control.as_ref())
    }

    /// Ids of mounted fields in mount order
    pub fn field_ids(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Change bus
    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    /// Mount a field, choosing the selectable controller for enum and
    /// relator fields
    pub fn mount(&mut self, description: FieldDescription) -> FormResult<String> {
        let selectable = !description.values.is_empty()
            || description.is_join
            || description.filter.is_some()
            || description.rules.declares("filter")
            || description
                .form_type
                .as_ref()
                .is_some_and(|form_type| self.state.config.select_form_types.contains(form_type));
        let control: Box<dyn Control> = if selectable {
            Box::new(SelectableField::new(description))
        } else {
            Box::new(FieldController::new(description))
        };
        self.mount_control(control)
    }

    /// Mount an already constructed control
    pub fn mount_control(&mut self, mut control: Box<dyn Control>) -> FormResult<String> {
        let controller = control.controller();
        let Some(id) = controller.field_id() else {
            return Err(FormError::FieldIdUnavailable {
                path: controller.description().path.clone(),
            });
        };
        if self.fields.contains_key(&id) {
            return Err(FormError::DuplicateField { id });
        }

        control.init(&mut self.state);
        self.bus
            .subscribe(id.clone(), control.controller().dependencies().to_vec());
        log::debug!(
            "mounted '{id}' with {} dependencies",
            control.controller().dependencies().len()
        );
        self.fields.insert(id.clone(), control);
        Ok(id)
    }

    /// Unmount field `id`
    pub fn unmount(&mut self, id: &str) -> FormResult<()> {
        let mut control = self
            .fields
            .shift_remove(id)
            .ok_or_else(|| FormError::UnknownField { id: id.to_string() })?;
        control.controller_mut().unmount(&mut self.state);
        self.bus.unsubscribe(id);
        Ok(())
    }

    /// Write `value` at `path`, creating missing parents
    pub fn set_value(&mut self, path: &FieldPath, value: JsonValue) -> WriteOutcome {
        let outcome = tree::set_creating(self.state.model_mut(), path, value);
        if outcome.is_written() {
            self.state.record_change(path.clone());
        }
        outcome
    }

    /// Parse `path` and write `value` there
    pub fn set_value_at(&mut self, path: &str, value: JsonValue) -> FormResult<WriteOutcome> {
        Ok(self.set_value(&FieldPath::parse(path)?, value))
    }

    /// Replace the host global object; dependents of `global` are woken
    pub fn set_global(&mut self, global: JsonValue) {
        self.state.global = Some(global);
        self.state.record_change(FieldPath::root().join_key("global"));
    }

    /// Announce changes made outside the form
    pub fn notify_changed(&mut self, paths: impl IntoIterator<Item = FieldPath>) {
        for path in paths {
            self.state.record_change(path);
        }
    }

    /// Run `f` against control `id` and the form state
    pub fn with_field_mut<R>(
        &mut self,
        id: &str,
        f: impl FnOnce(&mut dyn Control, &mut FormState) -> R,
    ) -> FormResult<R> {
        let control = self
            .fields
            .get_mut(id)
            .ok_or_else(|| FormError::UnknownField { id: id.to_string() })?;
        Ok(f(control.as_mut(), &mut self.state))
    }

    /// Write a field's value through its controller
    pub fn set_model(&mut self, id: &str, value: JsonValue, force_update: bool) -> FormResult<bool> {
        self.with_field_mut(id, |control, state| {
            control.controller_mut().set_model(state, value, force_update)
        })
    }

    /// Search the candidates of selectable field `id`
    pub fn query_search(&self, id: &str, query: &str) -> FormResult<Vec<JsonValue>> {
        let selectable = self
            .fields
            .get(id)
            .and_then(|control| control.as_selectable())
            .ok_or_else(|| FormError::UnknownField { id: id.to_string() })?;
        Ok(selectable.query_search(&self.state, query, None))
    }

    /// Replace the candidate list of field `id`
    ///
    /// A plain field becomes selectable once it receives options.
    pub fn update_values(&mut self, id: &str, values: Vec<JsonValue>) -> FormResult<bool> {
        let control = self
            .fields
            .get_mut(id)
            .ok_or_else(|| FormError::UnknownField { id: id.to_string() })?;
        if control.as_selectable().is_none() {
            log::debug!("'{id}' received options, switching to a selectable control");
            *control = Box::new(SelectableField::from_controller(control.controller().clone()));
        }
        let changed = control
            .as_selectable_mut()
            .map(|selectable| selectable.update_model_on_values_changed(&mut self.state, values))
            .unwrap_or(false);
        Ok(changed)
    }

    /// Wake dependent fields until nothing changes or the pass limit is hit
    pub fn settle(&mut self) -> SettleReport {
        let mut report = SettleReport::default();
        let max_passes = self.state.config.max_settle_passes;

        loop {
            let changes = self.state.take_changes();
            for path in &changes {
                if !report.changed.contains(path) {
                    report.changed.push(path.clone());
                }
            }
            if changes.is_empty() {
                break;
            }
            if report.passes == max_passes {
                report.limit_reached = true;
                log::warn!(
                    "form did not settle after {max_passes} passes; {} changes dropped",
                    changes.len()
                );
                break;
            }

            report.passes += 1;
            let affected = self.bus.affected(&changes);
            log::debug!(
                "settle pass {}: {} changes wake {} fields",
                report.passes,
                changes.len(),
                affected.len()
            );
            for id in affected {
                if let Some(control) = self.fields.get_mut(&id) {
                    control.process(&mut self.state);
                    let dependencies = control.controller().dependencies();
                    if self.bus.dependencies(&id) != Some(dependencies) {
                        self.bus.subscribe(id.clone(), dependencies.to_vec());
                    }
                }
            }
        }

        report.visibility = self.state.take_visibility();
        report
    }

    /// Check registered, visible fields against their live flags
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for (id, control) in &self.fields {
            let controller = control.controller();
            let live = &controller.description().live;
            if live.hide || !self.state.is_registered(id) {
                continue;
            }
            let path = controller.description().path.clone();
            let value = controller.get_model(&self.state);

            if live.required && is_empty_value(value) {
                issues.push(ValidationIssue::Required { path });
                continue;
            }
            let Some(number) = value.and_then(JsonValue::as_f64) else {
                continue;
            };
            if let Some(minimum) = live.minimum.filter(|minimum| number < *minimum) {
                issues.push(ValidationIssue::BelowMinimum {
                    path: path.clone(),
                    value: number,
                    minimum,
                });
            }
            if let Some(maximum) = live.maximum.filter(|maximum| number > *maximum) {
                issues.push(ValidationIssue::AboveMaximum {
                    path,
                    value: number,
                    maximum,
                });
            }
        }
        issues
    }

    /// Drop every field and clear the expression cache
    pub fn teardown(&mut self) {
        for control in self.fields.values_mut() {
            control.controller_mut().unmount(&mut self.state);
        }
        self.fields.clear();
        self.bus.clear();
        self.state.changes.clear();
        self.state.visibility.clear();
        self.state.engine.cache().clear();
    }

    /// Consume the form, returning the model
    pub fn into_model(self) -> JsonValue {
        self.state.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureSet;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn description(path: &str, rules: JsonValue) -> FieldDescription {
        FieldDescription::new(FieldPath::parse(path).unwrap())
            .with_rules(FeatureSet::from_json(&rules).unwrap())
    }

    #[test]
    fn test_settle_propagates_through_dependents() {
        let mut form = Form::new(json!({"car": {"year": 1960}}), EngineConfig::default());
        form.mount(description("car.era", json!({"set": {"eval": "./year < 1970 ? 'classic' : 'modern'"}})))
            .unwrap();
        form.mount(description("car.badge", json!({"set": {"eval": "'[' + ./era + ']'"}})))
            .unwrap();
        form.settle();
        assert_eq!(form.model()["car"]["badge"], json!("[classic]"));

        form.set_value_at("car.year", json!(1990)).unwrap();
        let report = form.settle();
        assert_eq!(form.model()["car"]["era"], json!("modern"));
        assert_eq!(form.model()["car"]["badge"], json!("[modern]"));
        assert_eq!(
            report.changed.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec!["car.year", "car.era", "car.badge"]
        );
        assert_eq!(report.passes, 3);
        assert!(!report.limit_reached);

        assert!(form.settle().is_quiet());
    }

    #[test]
    fn test_settle_stops_at_pass_limit() {
        let config = EngineConfig {
            max_settle_passes: 3,
            ..EngineConfig::default()
        };
        let mut form = Form::new(json!({"n": 0}), config);
        form.mount(description("n", json!({"set": {"eval": "/n + 1"}})))
            .unwrap();
        let report = form.settle();
        assert!(report.limit_reached);
        assert_eq!(report.passes, 3);
    }

    #[test]
    fn test_mount_errors() {
        let mut form = Form::new(json!({}), EngineConfig::default());
        form.mount(description("a", json!({}))).unwrap();
        assert_eq!(
            form.mount(description("a", json!({}))),
            Err(FormError::DuplicateField { id: "a".to_string() })
        );
        assert!(matches!(
            form.mount(description("rows[].name", json!({}))),
            Err(FormError::FieldIdUnavailable { .. })
        ));
        assert_eq!(
            form.unmount("nope"),
            Err(FormError::UnknownField { id: "nope".to_string() })
        );
        form.unmount("a").unwrap();
        assert!(form.bus().is_empty());
        assert!(!form.state().is_registered("a"));
    }

    #[test]
    fn test_global_changes_wake_dependents() {
        let mut form =
            Form::new(json!({"p": {}}), EngineConfig::default()).with_global(json!({"admin": false}));
        form.mount(description("p.secret", json!({"hide": {"if": "!G/admin"}})))
            .unwrap();
        assert!(form.field("p.secret").unwrap().controller().description().live.hide);

        form.set_global(json!({"admin": true}));
        let report = form.settle();
        assert!(!form.field("p.secret").unwrap().controller().description().live.hide);
        assert_eq!(
            report.visibility,
            vec![
                VisibilityChange {
                    path: FieldPath::parse("p.secret").unwrap(),
                    hidden: true
                },
                VisibilityChange {
                    path: FieldPath::parse("p.secret").unwrap(),
                    hidden: false
                }
            ]
        );
    }

    #[test]
    fn test_validate_required_and_bounds() {
        let mut form = Form::new(json!({"o": {"qty": 0, "note": ""}}), EngineConfig::default());
        let mut qty = description("o.qty", json!({"minimum": 1, "maximum": {"eval": "10"}}));
        qty.required = true;
        form.mount(qty).unwrap();
        let mut note = description("o.note", json!({"required": {"if": "./qty < 1"}}));
        note.hidden = false;
        form.mount(note).unwrap();
        let mut hidden = description("o.secret", json!({"hide": true}));
        hidden.required = true;
        form.mount(hidden).unwrap();

        let issues = form.validate();
        assert_eq!(
            issues,
            vec![
                ValidationIssue::BelowMinimum {
                    path: FieldPath::parse("o.qty").unwrap(),
                    value: 0.0,
                    minimum: 1.0
                },
                ValidationIssue::Required {
                    path: FieldPath::parse("o.note").unwrap()
                },
            ]
        );

        form.set_value_at("o.qty", json!(12)).unwrap();
        form.settle();
        assert_eq!(
            form.validate()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            vec!["o.qty: 12 is above the maximum 10"]
        );
    }

    #[test]
    fn test_teardown_clears_everything() {
        let mut form = Form::new(json!({"a": 1}), EngineConfig::default());
        form.mount(description("b", json!({"set": {"eval": "/a"}})))
            .unwrap();
        assert!(form.state().engine().cache().stats().entries > 0);
        form.teardown();
        assert_eq!(form.field_ids().count(), 0);
        assert_eq!(form.state().registered().count(), 0);
        assert_eq!(form.state().engine().cache().stats().entries, 0);
        assert_eq!(form.into_model(), json!({"a": 1, "b": 1}));
    }
}
