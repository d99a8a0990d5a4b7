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

//! Absolute field paths into the model tree

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing or moving along a path
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// A relative reference tried to climb above the model root
    #[error("Path '{path}' cannot ascend {levels} level(s): only {depth} available")]
    RootAscentOverflow {
        /// Path the ascent started from
        path: String,
        /// Requested number of levels
        levels: usize,
        /// Depth of the starting path
        depth: usize,
    },

    /// Malformed textual path
    #[error("Invalid path '{path}': {message}")]
    InvalidSyntax {
        /// The offending input
        path: String,
        /// What went wrong
        message: String,
    },
}

/// Result type for path operations
pub type PathResult<T> = Result<T, PathError>;

/// One step of a [`FieldPath`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Object member
    Key(String),
    /// Concrete array position
    Index(usize),
    /// Any array item (fields instantiated per item)
    Wildcard,
}

impl PathSegment {
    /// Whether two segments address the same slot; a wildcard matches any index
    pub fn matches(&self, other: &PathSegment) -> bool {
        match (self, other) {
            (PathSegment::Wildcard, PathSegment::Index(_) | PathSegment::Wildcard)
            | (PathSegment::Index(_), PathSegment::Wildcard) => true,
            (a, b) => a == b,
        }
    }
}

/// Absolute position in the model tree
///
/// Accepts `a.b.0.c`, `a.b[0].c`, `a.items[].name` and `a.items.*.name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    segments: SmallVec<[PathSegment; 6]>,
}

impl FieldPath {
    /// The model root
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a textual path
    pub fn parse(input: &str) -> PathResult<Self> {
        let mut segments = SmallVec::new();
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Self { segments });
        }

        let invalid = |message: &str| PathError::InvalidSyntax {
            path: input.to_string(),
            message: message.to_string(),
        };

        for part in trimmed.split('.') {
            if part.is_empty() {
                return Err(invalid("empty segment"));
            }
            let (head, mut rest) = match part.find('[') {
                Some(pos) => part.split_at(pos),
                None => (part, ""),
            };
            if !head.is_empty() {
                segments.push(Self::segment_from_text(head));
            }
            while !rest.is_empty() {
                let close = rest.find(']').ok_or_else(|| invalid("unclosed '['"))?;
                let inner = rest[1..close].trim();
                if inner.is_empty() {
                    segments.push(PathSegment::Wildcard);
                } else if let Ok(index) = inner.parse::<usize>() {
                    segments.push(PathSegment::Index(index));
                } else {
                    let key = inner.trim_matches(|c| c == '\'' || c == '"');
                    segments.push(PathSegment::Key(key.to_string()));
                }
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(invalid("unexpected text after ']'"));
                }
            }
        }

        Ok(Self { segments })
    }

    fn segment_from_text(text: &str) -> PathSegment {
        if text == "*" {
            PathSegment::Wildcard
        } else if let Ok(index) = text.parse::<usize>() {
            PathSegment::Index(index)
        } else {
            PathSegment::Key(text.to_string())
        }
    }

    /// Build a path from segments
    pub fn from_segments(segments: impl IntoIterator<Item = PathSegment>) -> Self {
        Self {
            segments: segments.into_iter().collect(),
        }
    }

    /// Path segments
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True for the root path
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment
    pub fn leaf(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// Leaf as a property name (index leaves are rendered as numbers)
    pub fn leaf_name(&self) -> Option<String> {
        match self.leaf()? {
            PathSegment::Key(key) => Some(key.clone()),
            PathSegment::Index(index) => Some(index.to_string()),
            PathSegment::Wildcard => None,
        }
    }

    /// Path without its last segment (`None` at the root)
    pub fn parent(&self) -> Option<FieldPath> {
        if self.segments.is_empty() {
            None
        } else {
            Some(Self {
                segments: self.segments[..self.segments.len() - 1].into(),
            })
        }
    }

    /// Climb `levels` segments towards the root
    pub fn ascend(&self, levels: usize) -> PathResult<FieldPath> {
        if levels > self.segments.len() {
            return Err(PathError::RootAscentOverflow {
                path: self.to_string(),
                levels,
                depth: self.segments.len(),
            });
        }
        Ok(Self {
            segments: self.segments[..self.segments.len() - levels].into(),
        })
    }

    /// Append an object key
    pub fn join_key(&self, key: impl Into<String>) -> FieldPath {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Key(key.into()));
        Self { segments }
    }

    /// Append an array index
    pub fn join_index(&self, index: usize) -> FieldPath {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Index(index));
        Self { segments }
    }

    /// Append all segments of `other`
    pub fn join(&self, other: &FieldPath) -> FieldPath {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// Contains an un-indexed array wildcard
    pub fn has_wildcard(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, PathSegment::Wildcard))
    }

    /// The field addresses an array item directly
    pub fn is_array_item(&self) -> bool {
        matches!(
            self.leaf(),
            Some(PathSegment::Index(_) | PathSegment::Wildcard)
        )
    }

    /// Concrete array positions along the path, outermost first
    pub fn indexes(&self) -> Vec<usize> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                PathSegment::Index(index) => Some(*index),
                _ => None,
            })
            .collect()
    }

    /// `self` is `prefix` or lies below it
    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        prefix.segments.len() <= self.segments.len()
            && prefix
                .segments
                .iter()
                .zip(self.segments.iter())
                .all(|(a, b)| a.matches(b))
    }

    /// One path is a prefix of the other, so a change at one may affect the other
    pub fn overlaps(&self, other: &FieldPath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// Render as an expression rooted at `this`
    pub fn to_expression(&self) -> String {
        let mut out = String::from("this");
        for segment in &self.segments {
            match segment {
                PathSegment::Key(key) if is_identifier(key) => {
                    out.push('.');
                    out.push_str(key);
                }
                PathSegment::Key(key) => {
                    out.push_str("['");
                    out.push_str(&key.replace('\\', "\\\\").replace('\'', "\\'"));
                    out.push_str("']");
                }
                PathSegment::Index(index) => {
                    out.push('[');
                    out.push_str(&index.to_string());
                    out.push(']');
                }
                PathSegment::Wildcard => out.push_str("[]"),
            }
        }
        out
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first == '_' || first == '$' || first.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c == '$' || c.is_alphanumeric())
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match segment {
                PathSegment::Key(key) => f.write_str(key)?,
                PathSegment::Index(index) => write!(f, "{index}")?,
                PathSegment::Wildcard => f.write_str("[]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldPath::parse(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        FieldPath::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a.b.0.c", 4)]
    #[case("a.b[0].c", 4)]
    #[case("items[].name", 3)]
    #[case("items.*.name", 3)]
    #[case("", 0)]
    fn parses_accepted_forms(#[case] input: &str, #[case] len: usize) {
        assert_eq!(FieldPath::parse(input).unwrap().len(), len);
    }

    #[test]
    fn bracket_and_dot_forms_agree() {
        assert_eq!(
            FieldPath::parse("a.b[0].c").unwrap(),
            FieldPath::parse("a.b.0.c").unwrap()
        );
    }

    #[test]
    fn rejects_empty_segment() {
        assert!(matches!(
            FieldPath::parse("a..b"),
            Err(PathError::InvalidSyntax { .. })
        ));
    }

    #[test]
    fn ascend_guards_the_root() {
        let path = FieldPath::parse("a.b").unwrap();
        assert_eq!(path.ascend(2).unwrap(), FieldPath::root());
        assert!(matches!(
            path.ascend(3),
            Err(PathError::RootAscentOverflow { levels: 3, depth: 2, .. })
        ));
    }

    #[test]
    fn expression_rendering() {
        let path = FieldPath::parse("cars[2].owner-name").unwrap();
        assert_eq!(path.to_expression(), "this.cars[2]['owner-name']");
        assert_eq!(FieldPath::root().to_expression(), "this");
    }

    #[test]
    fn wildcard_overlaps_indexes() {
        let template = FieldPath::parse("items[].price").unwrap();
        let concrete = FieldPath::parse("items.3").unwrap();
        assert!(template.overlaps(&concrete));
        assert!(template.has_wildcard());
        assert!(!FieldPath::parse("other").unwrap().overlaps(&concrete));
    }
}
