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

//! Form validation against the live field flags

use crate::model::FieldPath;
use serde::Serialize;
use std::fmt;

/// A problem found by [`crate::form::Form::validate`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "issue", rename_all = "camelCase")]
pub enum ValidationIssue {
    /// A visible required field holds no value
    Required {
        /// Field path
        path: FieldPath,
    },
    /// Numeric value below the live minimum
    BelowMinimum {
        /// Field path
        path: FieldPath,
        /// Current value
        value: f64,
        /// Lower bound
        minimum: f64,
    },
    /// Numeric value above the live maximum
    AboveMaximum {
        /// Field path
        path: FieldPath,
        /// Current value
        value: f64,
        /// Upper bound
        maximum: f64,
    },
}

impl ValidationIssue {
    /// Path of the offending field
    pub fn path(&self) -> &FieldPath {
        match self {
            Self::Required { path }
            | Self::BelowMinimum { path, .. }
            | Self::AboveMaximum { path, .. } => path,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required { path } => write!(f, "{path}: value is required"),
            Self::BelowMinimum {
                path,
                value,
                minimum,
            } => write!(f, "{path}: {value} is below the minimum {minimum}"),
            Self::AboveMaximum {
                path,
                value,
                maximum,
            } => write!(f, "{path}: {value} is above the maximum {maximum}"),
        }
    }
}
