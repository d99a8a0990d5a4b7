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

//! Reading and writing the model tree by [`FieldPath`]
//!
//! Writes never invent structure unless asked to: a write whose parent slot
//! is missing reports [`WriteOutcome::MissingParent`] and leaves the tree as is.

use super::path::{FieldPath, PathSegment};
use serde_json::{Map, Value as JsonValue};

/// Result of a write attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The slot now holds the new value
    Written,
    /// The slot already held an equal value
    Unchanged,
    /// The parent container does not exist or cannot hold the segment
    MissingParent,
}

impl WriteOutcome {
    /// The tree changed
    pub fn is_written(self) -> bool {
        matches!(self, WriteOutcome::Written)
    }
}

/// Look up the value at `path`
pub fn get<'a>(root: &'a JsonValue, path: &FieldPath) -> Option<&'a JsonValue> {
    path.segments()
        .iter()
        .try_fold(root, |current, segment| step(current, segment))
}

/// Look up the value at `path` for mutation
pub fn get_mut<'a>(root: &'a mut JsonValue, path: &FieldPath) -> Option<&'a mut JsonValue> {
    let mut current = root;
    for segment in path.segments() {
        current = match (current, segment) {
            (JsonValue::Object(map), PathSegment::Key(key)) => map.get_mut(key)?,
            (JsonValue::Array(items), PathSegment::Index(index)) => items.get_mut(*index)?,
            (JsonValue::Array(items), PathSegment::Key(key)) => {
                items.get_mut(key.parse::<usize>().ok()?)?
            }
            _ => return None,
        };
    }
    Some(current)
}

fn step<'a>(current: &'a JsonValue, segment: &PathSegment) -> Option<&'a JsonValue> {
    match (current, segment) {
        (JsonValue::Object(map), PathSegment::Key(key)) => map.get(key),
        (JsonValue::Object(map), PathSegment::Index(index)) => map.get(&index.to_string()),
        (JsonValue::Array(items), PathSegment::Index(index)) => items.get(*index),
        (JsonValue::Array(items), PathSegment::Key(key)) => items.get(key.parse::<usize>().ok()?),
        _ => None,
    }
}

/// Write `value` at `path`, leaving the tree untouched if the parent is missing
pub fn set(root: &mut JsonValue, path: &FieldPath, value: JsonValue) -> WriteOutcome {
    let Some(parent_path) = path.parent() else {
        if *root == value {
            return WriteOutcome::Unchanged;
        }
        *root = value;
        return WriteOutcome::Written;
    };
    let Some(parent) = get_mut(root, &parent_path) else {
        return WriteOutcome::MissingParent;
    };
    match path.leaf() {
        Some(leaf) => write_child(parent, leaf, value),
        None => WriteOutcome::MissingParent,
    }
}

/// Write `value` at `path`, creating intermediate objects and arrays as needed
pub fn set_creating(root: &mut JsonValue, path: &FieldPath, value: JsonValue) -> WriteOutcome {
    if path.has_wildcard() {
        return WriteOutcome::MissingParent;
    }
    let segments = path.segments();
    let mut current = root;
    for (i, segment) in segments.iter().enumerate() {
        let is_last = i + 1 == segments.len();
        if is_last {
            return write_child(current, segment, value);
        }
        if current.is_null() {
            *current = empty_container_for(segment);
        }
        let next_is_index = matches!(segments[i + 1], PathSegment::Index(_));
        current = match (current, segment) {
            (JsonValue::Object(map), PathSegment::Key(key)) => map
                .entry(key.clone())
                .or_insert_with(|| container_for_next(next_is_index)),
            (JsonValue::Array(items), PathSegment::Index(index)) => {
                if *index > items.len() {
                    return WriteOutcome::MissingParent;
                }
                if *index == items.len() {
                    items.push(container_for_next(next_is_index));
                }
                &mut items[*index]
            }
            _ => return WriteOutcome::MissingParent,
        };
    }
    // empty path
    if *current == value {
        WriteOutcome::Unchanged
    } else {
        *current = value;
        WriteOutcome::Written
    }
}

fn empty_container_for(segment: &PathSegment) -> JsonValue {
    match segment {
        PathSegment::Index(_) => JsonValue::Array(Vec::new()),
        _ => JsonValue::Object(Map::new()),
    }
}

fn container_for_next(next_is_index: bool) -> JsonValue {
    if next_is_index {
        JsonValue::Array(Vec::new())
    } else {
        JsonValue::Object(Map::new())
    }
}

fn write_child(parent: &mut JsonValue, leaf: &PathSegment, value: JsonValue) -> WriteOutcome {
    match (parent, leaf) {
        (JsonValue::Object(map), PathSegment::Key(key)) => {
            if map.get(key) == Some(&value) {
                return WriteOutcome::Unchanged;
            }
            map.insert(key.clone(), value);
            WriteOutcome::Written
        }
        (JsonValue::Array(items), PathSegment::Index(index)) => {
            if *index < items.len() {
                if items[*index] == value {
                    return WriteOutcome::Unchanged;
                }
                items[*index] = value;
                WriteOutcome::Written
            } else if *index == items.len() {
                items.push(value);
                WriteOutcome::Written
            } else {
                WriteOutcome::MissingParent
            }
        }
        _ => WriteOutcome::MissingParent,
    }
}

/// Remove the value at `path`
///
/// Object members are deleted; array slots are set to `null` so sibling
/// positions (and the fields bound to them) stay stable.
pub fn remove(root: &mut JsonValue, path: &FieldPath) -> Option<JsonValue> {
    let parent = get_mut(root, &path.parent()?)?;
    match (parent, path.leaf()?) {
        (JsonValue::Object(map), PathSegment::Key(key)) => map.remove(key),
        (JsonValue::Array(items), PathSegment::Index(index)) => {
            let slot = items.get_mut(*index)?;
            if slot.is_null() {
                None
            } else {
                Some(std::mem::replace(slot, JsonValue::Null))
            }
        }
        _ => None,
    }
}

/// `null`, empty string, empty array or empty object
pub fn is_empty_value(value: Option<&JsonValue>) -> bool {
    match value {
        None | Some(JsonValue::Null) => true,
        Some(JsonValue::String(s)) => s.is_empty(),
        Some(JsonValue::Array(items)) => items.is_empty(),
        Some(JsonValue::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}
