//! Integration tests for selectable (enum and relator) fields

use formpath::features::{CandidateFilter, FeatureSet, FieldDescription};
use formpath::{Control, EngineConfig, FieldPath, Form};
use pretty_assertions::assert_eq;
use serde_json::{Value as JsonValue, json};

fn makes() -> Vec<JsonValue> {
    vec![
        json!({"id": "jag", "title": "Jaguar", "country": "UK"}),
        json!({"id": "ast", "title": "Aston Martin", "country": "UK"}),
        json!({"id": "alf", "title": "Alfa Romeo", "country": "IT"}),
    ]
}

fn make_field() -> FieldDescription {
    let mut description = FieldDescription::new(FieldPath::parse("car.make").unwrap());
    description.is_join = true;
    description.values = makes();
    description.filter = Some(CandidateFilter::Path {
        property: "country".to_string(),
        source: "./country".to_string(),
    });
    description
}

fn candidates(form: &Form, id: &str) -> Vec<String> {
    form.field(id)
        .unwrap()
        .as_selectable()
        .unwrap()
        .possible_values()
        .iter()
        .map(|value| value["id"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[test]
fn test_filter_follows_dependency_and_drops_stale_relator() {
    let mut form = Form::new(
        json!({"car": {"country": "UK", "make": {"id": "jag", "title": "Jag"}}}),
        EngineConfig::default(),
    );
    let id = form.mount(make_field()).unwrap();
    assert_eq!(candidates(&form, &id), vec!["jag", "ast"]);
    assert_eq!(form.model()["car"]["make"], json!({"id": "jag", "title": "Jaguar"}));

    form.set_value_at("car.country", json!("IT")).unwrap();
    let report = form.settle();
    assert_eq!(candidates(&form, &id), vec!["alf"]);
    assert!(form.model()["car"].get("make").is_none());
    assert!(report.changed.contains(&FieldPath::parse("car.make").unwrap()));
}

#[test]
fn test_filter_accepts_list_of_values() {
    let mut form = Form::new(
        json!({"car": {"country": ["IT", "UK"]}}),
        EngineConfig::default(),
    );
    let id = form.mount(make_field()).unwrap();
    assert_eq!(candidates(&form, &id), vec!["jag", "ast", "alf"]);
}

#[test]
fn test_query_search_through_form() {
    let mut form = Form::new(
        json!({"car": {"country": "UK", "make": {"id": "ast", "title": "Aston Martin"}}}),
        EngineConfig::default(),
    );
    let id = form.mount(make_field()).unwrap();
    assert_eq!(
        form.query_search(&id, "ja").unwrap(),
        vec![json!({"id": "jag", "title": "Jaguar", "country": "UK"})]
    );
    assert!(form.query_search(&id, "martin").unwrap().is_empty());
    assert!(form.query_search("car.country", "x").is_err());
}

#[test]
fn test_filter_rule_feature_overrides_static_filter() {
    let mut description = FieldDescription::new(FieldPath::parse("order.size").unwrap())
        .with_rules(
            FeatureSet::from_json(&json!({
                "xFilter": {
                    "if": "./kids",
                    "value": "this.item.startsWith('K')",
                    "else": {"value": "!this.item.startsWith('K')"}
                }
            }))
            .unwrap(),
        );
    description.values = vec![json!("K1"), json!("K2"), json!("M"), json!("L")];
    description.require_match = Some(true);

    let mut form = Form::new(
        json!({"order": {"kids": true, "size": ["K2", "M"]}}),
        EngineConfig::default(),
    );
    let id = form.mount(description).unwrap();
    let sizes = |form: &Form| {
        form.field(&id)
            .unwrap()
            .as_selectable()
            .unwrap()
            .possible_values()
            .to_vec()
    };
    assert_eq!(sizes(&form), vec![json!("K1"), json!("K2")]);
    assert_eq!(form.model()["order"]["size"], json!(["K2"]));

    form.set_value_at("order.kids", json!(false)).unwrap();
    form.settle();
    assert_eq!(sizes(&form), vec![json!("M"), json!("L")]);
    assert_eq!(form.model()["order"]["size"], json!([]));
}

#[test]
fn test_values_replaced_from_outside() {
    let mut form = Form::new(json!({"car": {"color": "teal"}}), EngineConfig::default());
    let mut description = FieldDescription::new(FieldPath::parse("car.color").unwrap());
    description.values = vec![json!("teal"), json!("red")];
    let id = form.mount(description).unwrap();

    assert!(!form.update_values(&id, vec![json!("teal")]).unwrap());
    assert!(form.update_values(&id, vec![json!("red")]).unwrap());
    assert_eq!(form.model(), &json!({"car": {}}));
}

#[test]
fn test_filter_rule_expression_wakes_field() {
    let mut description = FieldDescription::new(FieldPath::parse("addr.city").unwrap())
        .with_rules(
            FeatureSet::from_json(&json!({
                "xFilter": {"value": "this.item.country === ./country"}
            }))
            .unwrap(),
        );
    description.is_join = true;
    description.values = vec![
        json!({"id": "lon", "title": "London", "country": "UK"}),
        json!({"id": "par", "title": "Paris", "country": "FR"}),
    ];

    let mut form = Form::new(
        json!({"addr": {"country": "UK", "city": {"id": "lon", "title": "London"}}}),
        EngineConfig::default(),
    );
    let id = form.mount(description).unwrap();
    assert_eq!(candidates(&form, &id), vec!["lon"]);
    assert_eq!(
        form.bus().dependencies(&id),
        Some(&[FieldPath::parse("addr.country").unwrap()][..])
    );

    form.set_value_at("addr.country", json!("FR")).unwrap();
    form.settle();
    assert_eq!(candidates(&form, &id), vec!["par"]);
    assert!(form.model()["addr"].get("city").is_none());
}

#[test]
fn test_options_arriving_later_make_field_selectable() {
    let mut form = Form::new(json!({"car": {"color": "teal"}}), EngineConfig::default());
    let id = form
        .mount(FieldDescription::new(FieldPath::parse("car.color").unwrap()))
        .unwrap();
    assert!(form.field(&id).unwrap().as_selectable().is_none());

    assert!(form.update_values(&id, vec![json!("red"), json!("blue")]).unwrap());
    let field = form.field(&id).unwrap().as_selectable().unwrap();
    assert_eq!(field.possible_values(), &[json!("red"), json!("blue")]);
    assert_eq!(form.model(), &json!({"car": {}}));
    assert!(form.update_values("car.size", vec![]).is_err());
}

#[test]
fn test_select_widget_mounts_selectable() {
    let mut form = Form::new(json!({"car": {}}), EngineConfig::default());
    let mut description = FieldDescription::new(FieldPath::parse("car.fuel").unwrap());
    description.form_type = Some("select".to_string());
    let id = form.mount(description).unwrap();
    assert!(form.field(&id).unwrap().as_selectable().is_some());
    assert!(form.query_search(&id, "diesel").unwrap().is_empty());

    let filtered = FieldDescription::new(FieldPath::parse("car.trim").unwrap()).with_rules(
        FeatureSet::from_json(&json!({"filter": {"value": "this.item !== ./fuel"}})).unwrap(),
    );
    let trim = form.mount(filtered).unwrap();
    assert!(form.field(&trim).unwrap().as_selectable().is_some());
}
