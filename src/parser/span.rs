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

//! Byte ranges attached to tokens

/// Token and the byte range it covers in the expression source
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    /// Token
    pub value: T,
    /// First byte
    pub start: usize,
    /// One past the last byte
    pub end: usize,
}

impl<T> Spanned<T> {
    /// Attach `start..end` to `value`
    pub fn new(value: T, start: usize, end: usize) -> Self {
        Self { value, start, end }
    }
}
