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

//! Function signatures for arity checking

use serde::{Deserialize, Serialize};
use std::fmt;

/// Callable shape of a registered function
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionSignature {
    /// Function name as written in expressions (`parseInt`, `Math.max`)
    pub name: String,
    /// Parameter names, for documentation
    pub parameters: Vec<String>,
    /// Minimum number of arguments
    pub min_arity: usize,
    /// Maximum number of arguments (None for variadic)
    pub max_arity: Option<usize>,
}

impl FunctionSignature {
    /// Fixed-arity signature where the trailing `optional` parameters may be omitted
    pub fn new(name: impl Into<String>, parameters: &[&str], optional: usize) -> Self {
        Self {
            name: name.into(),
            parameters: parameters.iter().map(|p| p.to_string()).collect(),
            min_arity: parameters.len().saturating_sub(optional),
            max_arity: Some(parameters.len()),
        }
    }

    /// Signature accepting `min_arity` or more arguments
    pub fn variadic(name: impl Into<String>, min_arity: usize) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            min_arity,
            max_arity: None,
        }
    }

    /// Whether `count` arguments satisfy the signature
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min_arity && self.max_arity.is_none_or(|max| count <= max)
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.max_arity.is_none() && self.parameters.is_empty() {
            return write!(f, "{}(...)", self.name);
        }
        write!(f, "{}(", self.name)?;
        for (i, param) in self.parameters.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if i >= self.min_arity {
                write!(f, "{param}?")?;
            } else {
                f.write_str(param)?;
            }
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_arity() {
        let sig = FunctionSignature::new("parseInt", &["string", "radix"], 1);
        assert!(sig.accepts(1));
        assert!(sig.accepts(2));
        assert!(!sig.accepts(0));
        assert!(!sig.accepts(3));
        assert_eq!(sig.to_string(), "parseInt(string, radix?)");

        let max = FunctionSignature::variadic("Math.max", 0);
        assert!(max.accepts(0) && max.accepts(10));
        assert_eq!(max.to_string(), "Math.max(...)");
    }
}
