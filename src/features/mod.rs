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

//! Control features: field descriptions, rule shapes and the resolver

pub mod description;
pub mod resolver;
pub mod rule;

pub use description::{CandidateFilter, FeatureCache, FieldDescription, FieldKind, LiveFlags};
pub use resolver::{
    FeatureMap, get_control_features, get_value_for_key, resolve_feature_set, resolve_rule,
};
pub use rule::{
    ElseBranch, FeatureBody, FeatureRule, FeatureSet, LetBinding, RuleValue, SchemaError,
    SchemaResult, SwitchCase, canonical_feature_name,
};
