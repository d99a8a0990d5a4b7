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

//! Selectable fields: enum and relator controls with a candidate list

use super::field::{FieldController, resolved_filter};
use super::{Control, FormState};
use crate::features::{CandidateFilter, FieldDescription};
use crate::model::Value;
use serde_json::Value as JsonValue;

/// Field controller that also maintains its filtered candidates
#[derive(Debug, Clone)]
pub struct SelectableField {
    field: FieldController,
    possible_values: Vec<JsonValue>,
}

impl SelectableField {
    /// Wrap a description; candidates are computed on init
    pub fn new(description: FieldDescription) -> Self {
        Self {
            field: FieldController::new(description),
            possible_values: Vec::new(),
        }
    }

    /// Take over a mounted plain controller, e.g. once options arrive for it
    pub fn from_controller(field: FieldController) -> Self {
        Self {
            field,
            possible_values: Vec::new(),
        }
    }

    /// Candidates left after filtering
    pub fn possible_values(&self) -> &[JsonValue] {
        &self.possible_values
    }

    /// Recompute the candidates; when they change, reconcile the selection
    ///
    /// Returns whether the candidate list changed.
    pub fn refresh_possible_values(&mut self, form: &mut FormState) -> bool {
        let candidates = self.filtered_candidates(form);
        if candidates == self.possible_values {
            return false;
        }
        log::debug!(
            "'{}' now has {} candidates",
            self.field.description().path,
            candidates.len()
        );
        self.possible_values = candidates;
        self.reconcile(form);
        true
    }

    /// Candidates matching `query` that are not selected yet
    ///
    /// Matching is a case-insensitive substring test on the relator title or
    /// the plain value. When free text is allowed and nothing matches, the
    /// raw query is offered as the only candidate.
    pub fn query_search(
        &self,
        form: &FormState,
        query: &str,
        candidates: Option<&[JsonValue]>,
    ) -> Vec<JsonValue> {
        let candidates = candidates.unwrap_or(self.possible_values.as_slice());
        let selected = selection(self.field.get_model(form));
        let needle = query.trim().to_lowercase();

        let mut results: Vec<JsonValue> = candidates
            .iter()
            .filter(|candidate| !selected.iter().any(|chosen| same_choice(chosen, candidate)))
            .filter(|candidate| needle.is_empty() || label(candidate).to_lowercase().contains(&needle))
            .cloned()
            .collect();

        if results.is_empty() && !needle.is_empty() && self.allows_free_text() {
            results.push(JsonValue::String(query.to_string()));
        }
        results
    }

    /// Drop selected relators missing from the candidates and refresh the
    /// titles of the ones kept
    ///
    /// Returns whether the model changed.
    pub fn correct_existing_relators_value(&mut self, form: &mut FormState) -> bool {
        let Some(current) = self.field.get_model(form).cloned() else {
            return false;
        };
        match current {
            JsonValue::Null => false,
            JsonValue::Array(items) => {
                let corrected: Vec<JsonValue> =
                    items.iter().filter_map(|item| self.refreshed(item)).collect();
                if corrected == items {
                    false
                } else {
                    self.field.set_model(form, JsonValue::Array(corrected), false)
                }
            }
            item => match self.refreshed(&item) {
                Some(fresh) if fresh != item => self.field.set_model(form, fresh, false),
                Some(_) => false,
                None => self.field.remove_model(form),
            },
        }
    }

    /// Replace the static candidates and prune selections no longer legal
    ///
    /// Returns whether the model changed.
    pub fn update_model_on_values_changed(&mut self, form: &mut FormState, values: Vec<JsonValue>) -> bool {
        self.field.description_mut().values = values;
        self.possible_values = self.filtered_candidates(form);
        self.reconcile(form)
    }

    fn reconcile(&mut self, form: &mut FormState) -> bool {
        if self.field.description().is_join {
            self.correct_existing_relators_value(form)
        } else {
            self.prune_enum_selection(form)
        }
    }

    fn prune_enum_selection(&mut self, form: &mut FormState) -> bool {
        if self.allows_free_text() {
            return false;
        }
        let Some(current) = self.field.get_model(form).cloned() else {
            return false;
        };
        match current {
            JsonValue::Null => false,
            JsonValue::Array(items) => {
                let kept: Vec<JsonValue> = items
                    .iter()
                    .filter(|item| self.possible_values.contains(item))
                    .cloned()
                    .collect();
                if kept == items {
                    false
                } else {
                    self.field.set_model(form, JsonValue::Array(kept), false)
                }
            }
            item if self.possible_values.contains(&item) => false,
            _ => self.field.remove_model(form),
        }
    }

    /// Candidate carrying the current data of `item`, or `None` when gone
    fn refreshed(&self, item: &JsonValue) -> Option<JsonValue> {
        let candidate = self
            .possible_values
            .iter()
            .find(|candidate| same_choice(item, candidate))?;
        let mut fresh = item.clone();
        if let (Some(fresh_map), Some(title)) = (fresh.as_object_mut(), candidate.get("title")) {
            fresh_map.insert("title".to_string(), title.clone());
        }
        Some(fresh)
    }

    fn allows_free_text(&self) -> bool {
        let description = self.field.description();
        description.require_match == Some(false) || description.options_plus
    }

    /// Filter from the resolved `filter` feature, else the static one
    fn active_filter(&self) -> Option<CandidateFilter> {
        resolved_filter(self.field.features()).or_else(|| self.field.description().filter.clone())
    }

    fn filtered_candidates(&self, form: &FormState) -> Vec<JsonValue> {
        let description = self.field.description();
        let Some(filter) = self.active_filter() else {
            return description.values.clone();
        };
        let engine = form.engine();
        let ctx = form.context().with_scope(description.scope());

        match &filter {
            CandidateFilter::Path { property, source } => {
                let accepted = engine.evaluate(source, &ctx);
                if accepted.is_nullish() {
                    return description.values.clone();
                }
                description
                    .values
                    .iter()
                    .filter(|candidate| {
                        let value = candidate.get(property.as_str()).map_or(Value::Undefined, Value::from);
                        match &accepted {
                            Value::Array(options) => options.iter().any(|option| option.strict_equals(&value)),
                            single => single.strict_equals(&value),
                        }
                    })
                    .cloned()
                    .collect()
            }
            CandidateFilter::Expression(expression) => description
                .values
                .iter()
                .enumerate()
                .filter(|(index, candidate)| {
                    let item_ctx = ctx
                        .clone()
                        .with_local("item", Value::from(*candidate))
                        .with_local("index", Value::Number(*index as f64));
                    engine.evaluate(expression, &item_ctx).is_truthy()
                })
                .map(|(_, candidate)| candidate.clone())
                .collect(),
        }
    }
}

impl Control for SelectableField {
    fn controller(&self) -> &FieldController {
        &self.field
    }

    fn controller_mut(&mut self) -> &mut FieldController {
        &mut self.field
    }

    fn init(&mut self, form: &mut FormState) -> Option<String> {
        let id = self.field.init_field(form)?;
        self.refresh_possible_values(form);
        Some(id)
    }

    fn process(&mut self, form: &mut FormState) -> bool {
        let changed = self.field.process_features(form);
        self.refresh_possible_values(form) || changed
    }

    fn as_selectable(&self) -> Option<&SelectableField> {
        Some(self)
    }

    fn as_selectable_mut(&mut self) -> Option<&mut SelectableField> {
        Some(self)
    }
}

fn selection(value: Option<&JsonValue>) -> Vec<&JsonValue> {
    match value {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(JsonValue::Array(items)) => items.iter().collect(),
        Some(single) => vec![single],
    }
}

/// Relators match by `id`, everything else by value
fn same_choice(a: &JsonValue, b: &JsonValue) -> bool {
    match (a.get("id"), b.get("id")) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn label(candidate: &JsonValue) -> String {
    match candidate {
        JsonValue::String(s) => s.clone(),
        JsonValue::Object(map) => map
            .get("title")
            .or_else(|| map.get("id"))
            .map(|value| Value::from(value).to_js_string())
            .unwrap_or_default(),
        other => Value::from(other).to_js_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::model::FieldPath;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn relator_field(path: &str, values: JsonValue) -> SelectableField {
        let mut description = FieldDescription::new(FieldPath::parse(path).unwrap());
        description.is_join = true;
        description.values = serde_json::from_value(values).unwrap();
        SelectableField::new(description)
    }

    fn state(model: JsonValue) -> FormState {
        FormState::new(model, EngineConfig::default())
    }

    #[test]
    fn test_relator_title_is_refreshed() {
        let mut form = state(json!({"car": {"make": {"id": "X", "title": "Old"}}}));
        let mut field = relator_field("car.make", json!([{"id": "X", "title": "New"}]));
        field.init(&mut form);
        assert_eq!(form.model()["car"]["make"], json!({"id": "X", "title": "New"}));
    }

    #[test]
    fn test_missing_relator_is_removed() {
        let mut form = state(json!({"car": {"make": {"id": "X", "title": "Old"}}}));
        let mut field = relator_field("car.make", json!([{"id": "Y", "title": "Other"}]));
        field.init(&mut form);
        assert_eq!(form.model(), &json!({"car": {}}));
    }

    #[test]
    fn test_relator_arrays_are_filtered() {
        let mut form = state(json!({"tags": [{"id": 1, "title": "a"}, {"id": 2, "title": "b"}]}));
        let mut field = relator_field("tags", json!([{"id": 2, "title": "B"}, {"id": 3, "title": "C"}]));
        field.init(&mut form);
        assert_eq!(form.model()["tags"], json!([{"id": 2, "title": "B"}]));
    }

    #[test]
    fn test_query_search_excludes_selected_and_matches_title() {
        let mut form = state(json!({"tags": [{"id": 1, "title": "Red"}]}));
        let mut field = relator_field(
            "tags",
            json!([
                {"id": 1, "title": "Red"},
                {"id": 2, "title": "Dark red"},
                {"id": 3, "title": "Blue"}
            ]),
        );
        field.init(&mut form);

        assert_eq!(field.query_search(&form, "RED", None), vec![json!({"id": 2, "title": "Dark red"})]);
        assert_eq!(field.query_search(&form, "", None).len(), 2);
        assert!(field.query_search(&form, "green", None).is_empty());

        field.controller_mut().description_mut().require_match = Some(false);
        assert_eq!(field.query_search(&form, "green", None), vec![json!("green")]);
    }

    #[test]
    fn test_path_filter_narrows_candidates() {
        let mut form = state(json!({"addr": {"country": "UK"}}));
        let mut description = FieldDescription::new(FieldPath::parse("addr.city").unwrap());
        description.values = vec![
            json!({"id": "lon", "title": "London", "country": "UK"}),
            json!({"id": "par", "title": "Paris", "country": "FR"}),
        ];
        description.is_join = true;
        description.filter = Some(CandidateFilter::Path {
            property: "country".to_string(),
            source: "./country".to_string(),
        });
        let mut field = SelectableField::new(description);
        field.init(&mut form);
        assert_eq!(field.possible_values().len(), 1);
        assert_eq!(field.possible_values()[0]["id"], json!("lon"));
        assert_eq!(
            field.controller().dependencies()[0].to_string(),
            "addr.country"
        );
    }

    #[test]
    fn test_expression_filter_sees_item_and_index() {
        let mut form = state(json!({"limit": 2}));
        let mut description = FieldDescription::new(FieldPath::parse("size").unwrap());
        description.values = vec![json!("S"), json!("M"), json!("L")];
        description.filter = Some(CandidateFilter::Expression(
            "this.index < /limit && this.item !== 'S'".to_string(),
        ));
        let mut field = SelectableField::new(description);
        field.init(&mut form);
        assert_eq!(field.possible_values(), &[json!("M")]);
    }

    #[test]
    fn test_enum_selection_pruned_on_values_change() {
        let mut form = state(json!({"colors": ["red", "blue"], "size": "XL"}));
        let mut colors = SelectableField::new({
            let mut d = FieldDescription::new(FieldPath::parse("colors").unwrap());
            d.values = vec![json!("red"), json!("blue")];
            d
        });
        colors.init(&mut form);
        assert!(colors.update_model_on_values_changed(&mut form, vec![json!("blue"), json!("green")]));
        assert_eq!(form.model()["colors"], json!(["blue"]));

        let mut size = SelectableField::new({
            let mut d = FieldDescription::new(FieldPath::parse("size").unwrap());
            d.values = vec![json!("XL")];
            d.options_plus = true;
            d
        });
        size.init(&mut form);
        assert!(!size.update_model_on_values_changed(&mut form, vec![json!("S")]));
        assert_eq!(form.model()["size"], json!("XL"));
    }
}
