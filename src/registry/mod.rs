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

//! Function registry for form expressions
//!
//! Helpers are looked up by their written name (`parseInt`, `Math.max`,
//! `Object.keys`). Hosts extend the standard set with their own functions
//! before handing the registry to a form.

#![warn(missing_docs)]

pub mod builtins;
pub mod function;
pub mod signature;

pub use function::{ClosureFunction, FormFunction, FunctionError, FunctionRegistry, FunctionResult};
pub use signature::FunctionSignature;

/// Create a standard registry with all built-in functions
pub fn create_standard_registry() -> FunctionRegistry {
    FunctionRegistry::standard()
}
