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

//! Change notification bus
//!
//! Fields subscribe with the context paths their expressions read. A change
//! at a path wakes every field whose dependency overlaps it.

use crate::model::FieldPath;
use indexmap::IndexMap;

/// Explicit observer registry keyed by referenced context paths
#[derive(Debug, Clone, Default)]
pub struct ChangeBus {
    subscriptions: IndexMap<String, Vec<FieldPath>>,
}

impl ChangeBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the dependencies of field `id`
    pub fn subscribe(&mut self, id: impl Into<String>, dependencies: Vec<FieldPath>) {
        self.subscriptions.insert(id.into(), dependencies);
    }

    /// Drop every subscription of field `id`
    pub fn unsubscribe(&mut self, id: &str) -> bool {
        self.subscriptions.shift_remove(id).is_some()
    }

    /// Dependencies registered for `id`
    pub fn dependencies(&self, id: &str) -> Option<&[FieldPath]> {
        self.subscriptions.get(id).map(Vec::as_slice)
    }

    /// Fields affected by changes at `changed`, in subscription order
    pub fn affected(&self, changed: &[FieldPath]) -> Vec<String> {
        self.subscriptions
            .iter()
            .filter(|(_, dependencies)| {
                dependencies
                    .iter()
                    .any(|dependency| changed.iter().any(|path| dependency.overlaps(path)))
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of subscribed fields
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// No field is subscribed
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Remove all subscriptions
    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn paths(list: &[&str]) -> Vec<FieldPath> {
        list.iter().map(|p| FieldPath::parse(p).unwrap()).collect()
    }

    #[test]
    fn test_overlapping_changes_wake_subscribers() {
        let mut bus = ChangeBus::new();
        bus.subscribe("car.price", paths(&["car.year", "global.currency"]));
        bus.subscribe("car.title", paths(&["car.make"]));
        bus.subscribe("owner.name", paths(&["owner"]));

        assert_eq!(bus.affected(&paths(&["car.year"])), vec!["car.price"]);
        assert_eq!(bus.affected(&paths(&["car"])), vec!["car.price", "car.title"]);
        assert_eq!(bus.affected(&paths(&["owner.name.first"])), vec!["owner.name"]);
        assert!(bus.affected(&paths(&["dealer"])).is_empty());
    }

    #[test]
    fn test_unsubscribe() {
        let mut bus = ChangeBus::new();
        bus.subscribe("a", paths(&["x"]));
        assert!(bus.unsubscribe("a"));
        assert!(!bus.unsubscribe("a"));
        assert!(bus.is_empty());
        assert!(bus.affected(&paths(&["x"])).is_empty());
    }
}
