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

// Error types for expression evaluation

use crate::model::PathError;
use crate::parser::ParseError;
use crate::registry::FunctionError;
use thiserror::Error;

/// Result type for evaluation operations
pub type EvaluationResult<T> = Result<T, EvaluationError>;

/// Errors that can occur while compiling or evaluating an expression
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    /// The expression text does not parse
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// A relative path could not be resolved
    #[error("Path error: {0}")]
    Path(#[from] PathError),

    /// Function evaluation error
    #[error("Function error: {0}")]
    Function(#[from] FunctionError),

    /// Operation applied to a value that does not support it
    #[error("Type error: {message}")]
    TypeError {
        /// Error message
        message: String,
    },

    /// Bare identifier that is neither a lambda parameter nor a constant
    #[error("Identifier '{name}' is not defined")]
    UnknownIdentifier {
        /// Identifier name
        name: String,
    },

    /// Call of an unregistered helper or unsupported method
    #[error("Function '{name}' is not defined")]
    UnknownFunction {
        /// Function or method name
        name: String,
    },

    /// Lambda nesting exceeded the interpreter limit
    #[error("Evaluation nested deeper than {limit} levels")]
    RecursionLimit {
        /// Configured limit
        limit: usize,
    },
}

impl EvaluationError {
    /// Shorthand for [`EvaluationError::TypeError`]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::TypeError {
            message: message.into(),
        }
    }
}
