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

//! Compiled-expression cache
//!
//! Keys are normalized source strings, so one entry serves every field whose
//! relative references resolve to the same absolute expression. Parse
//! failures are cached too.

use crate::ast::{ExpressionNode, ReferenceCollector};
use crate::model::FieldPath;
use crate::parser::ParseError;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Parsed expression with the model paths it reads
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpression {
    source: String,
    ast: ExpressionNode,
    references: Vec<FieldPath>,
}

impl CompiledExpression {
    /// Parse a normalized source string
    pub fn compile(source: &str) -> Result<Self, ParseError> {
        let ast = crate::parser::parse(source)?;
        let references = ReferenceCollector::collect(&ast);
        Ok(Self {
            source: source.to_string(),
            ast,
            references,
        })
    }

    /// Normalized source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Syntax tree
    pub fn ast(&self) -> &ExpressionNode {
        &self.ast
    }

    /// Context paths the expression reads
    pub fn references(&self) -> &[FieldPath] {
        &self.references
    }
}

/// Outcome of compiling one source string
pub type CacheEntry = Result<Arc<CompiledExpression>, ParseError>;

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that had to compile
    pub misses: u64,
    /// Entries currently held
    pub entries: usize,
    /// Maximum entries
    pub capacity: usize,
}

impl CacheStats {
    /// Fraction of lookups answered from the cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// LRU of compiled expressions; a capacity of zero disables caching
pub struct ExpressionCache {
    entries: Option<Mutex<LruCache<String, CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for ExpressionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionCache")
            .field("stats", &self.stats())
            .finish()
    }
}

impl ExpressionCache {
    /// Create a cache holding up to `capacity` expressions
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the compiled form of `source`, compiling on a miss
    pub fn get_or_compile(&self, source: &str) -> CacheEntry {
        let Some(entries) = &self.entries else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return CompiledExpression::compile(source).map(Arc::new);
        };

        if let Some(entry) = entries.lock().get(source) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return entry.clone();
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let entry = CompiledExpression::compile(source).map(Arc::new);
        if let Err(err) = &entry {
            log::debug!("caching parse failure for '{source}': {err}");
        }
        entries.lock().put(source.to_string(), entry.clone());
        entry
    }

    /// Drop every entry and reset statistics
    pub fn clear(&self) {
        if let Some(entries) = &self.entries {
            entries.lock().clear();
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStats {
        let (entries, capacity) = self.entries.as_ref().map_or((0, 0), |entries| {
            let guard = entries.lock();
            (guard.len(), guard.cap().get())
        });
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
            capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hits_and_misses() {
        let cache = ExpressionCache::new(2);
        assert!(cache.get_or_compile("this.a + 1").is_ok());
        assert!(cache.get_or_compile("this.a + 1").is_ok());
        assert!(cache.get_or_compile("this.b").is_ok());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 2, 2));
        assert_eq!(stats.capacity, 2);
        assert!((stats.hit_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_failures_are_cached() {
        let cache = ExpressionCache::new(4);
        assert!(cache.get_or_compile("this.a +").is_err());
        assert!(cache.get_or_compile("this.a +").is_err());
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_eviction_and_clear() {
        let cache = ExpressionCache::new(1);
        let first = cache.get_or_compile("1").unwrap();
        cache.get_or_compile("2").unwrap();
        let again = cache.get_or_compile("1").unwrap();
        assert!(!Arc::ptr_eq(&first, &again));
        assert_eq!(cache.stats().misses, 3);

        cache.clear();
        assert_eq!(cache.stats(), CacheStats { capacity: 1, ..CacheStats::default() });
    }

    #[test]
    fn test_disabled_cache_compiles_every_time() {
        let cache = ExpressionCache::new(0);
        let compiled = cache.get_or_compile("this.x.y").unwrap();
        cache.get_or_compile("this.x.y").unwrap();
        assert_eq!(cache.stats().misses, 2);
        assert_eq!(compiled.references()[0].to_string(), "x.y");
    }
}
