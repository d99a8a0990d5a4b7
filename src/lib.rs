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

//! Expression and visibility engine for schema-driven forms
//!
//! Field descriptions carry declarative rules (`hide`, `required`,
//! `default`, `title`, ...) written as small JavaScript-like expressions with
//! relative path references (`./x`, `../x`, `G/x`, `/x`). This crate parses
//! those expressions into an AST, evaluates them in a sandboxed interpreter,
//! resolves each field's features and keeps a form model consistent with
//! them.
//!
//! ```
//! use formpath::{Control, EngineConfig, FeatureSet, FieldDescription, FieldPath, Form};
//! use serde_json::json;
//!
//! let mut form = Form::new(json!({"car": {"year": 1962}}), EngineConfig::default());
//! let rules = FeatureSet::from_json(&json!({"hide": {"if": "./year > 1970"}})).unwrap();
//! let id = form
//!     .mount(FieldDescription::new(FieldPath::parse("car.chrome").unwrap()).with_rules(rules))
//!     .unwrap();
//! assert!(!form.field(&id).unwrap().controller().description().live.hide);
//! ```

pub mod ast;
pub mod config;
pub mod evaluator;
pub mod features;
pub mod form;
pub mod model;
pub mod parser;
pub mod registry;

// Re-export main types
pub use config::{ConfigError, EngineConfig};
pub use evaluator::{
    EvaluationError, EvaluationResult, ExecutionContext, ExpressionCache, ExpressionEngine, evaluate,
};
pub use features::{
    FeatureMap, FeatureRule, FeatureSet, FieldDescription, FieldKind, SchemaError,
    get_control_features, get_value_for_key,
};
pub use form::{
    Control, FieldController, Form, FormError, FormResult, SelectableField, SettleReport,
    ValidationIssue,
};
pub use model::{FieldPath, PathError, Value};
pub use parser::{ParseError, normalize, parse};
pub use registry::FunctionRegistry;
