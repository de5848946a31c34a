// ── Schema/state cache ──
//
// Per-session cache of fetched specs and state, keyed strictly by
// (rules namespace, wire path). Shared between the synchronous fetch path
// and the asynchronous event-dispatch path, so it lives behind DashMap's
// sharded locks. A pure round-trip optimization: disabling it changes
// call counts, never results.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use flowlink_api::wire::SpecsResponse;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    rules: String,
    path: String,
}

impl CacheKey {
    fn new(rules: &str, path: &str) -> Self {
        Self {
            rules: rules.to_owned(),
            path: path.to_owned(),
        }
    }
}

/// Session-scoped cache of schema specs and node state.
#[derive(Default)]
pub struct SchemaCache {
    specs: DashMap<CacheKey, Arc<SpecsResponse>>,
    state: DashMap<CacheKey, Value>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn specs(&self, rules: &str, path: &str) -> Option<Arc<SpecsResponse>> {
        self.specs.get(&CacheKey::new(rules, path)).map(|e| Arc::clone(&e))
    }

    pub fn store_specs(&self, rules: &str, path: &str, specs: Arc<SpecsResponse>) {
        self.specs.insert(CacheKey::new(rules, path), specs);
    }

    pub fn state(&self, rules: &str, path: &str) -> Option<Value> {
        self.state.get(&CacheKey::new(rules, path)).map(|e| e.clone())
    }

    pub fn store_state(&self, rules: &str, path: &str, state: Value) {
        self.state.insert(CacheKey::new(rules, path), state);
    }

    /// Drop cached specs and state for `path` and every descendant.
    ///
    /// Idempotent — events race with in-flight mutations, and invalidating
    /// an already-fresh entry is harmless. Descendant matching is
    /// segment-wise so `/A/inlet` never sweeps out `/A/inlet2`.
    pub fn invalidate(&self, rules: &str, path: &str) {
        let keep = |key: &CacheKey| !(key.rules == rules && is_same_or_descendant(path, &key.path));
        self.specs.retain(|key, _| keep(key));
        self.state.retain(|key, _| keep(key));
    }

    /// Drop everything for one rules namespace.
    pub fn invalidate_rules(&self, rules: &str) {
        self.specs.retain(|key, _| key.rules != rules);
        self.state.retain(|key, _| key.rules != rules);
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.specs.clear();
        self.state.clear();
    }

    #[cfg(test)]
    fn specs_len(&self) -> usize {
        self.specs.len()
    }
}

/// Segment-wise ancestor test on wire paths.
///
/// `candidate` is the same node as `ancestor` or below it. A collection
/// segment (`Inlet`) also covers its instances (`Inlet:cold`); distinct
/// instance names never match each other.
fn is_same_or_descendant(ancestor: &str, candidate: &str) -> bool {
    let anc: Vec<&str> = ancestor.split('/').filter(|s| !s.is_empty()).collect();
    let cand: Vec<&str> = candidate.split('/').filter(|s| !s.is_empty()).collect();

    if anc.len() > cand.len() {
        return false;
    }

    anc.iter().zip(&cand).all(|(a, c)| segment_covers(a, c))
}

/// `a` covers `c` when they are equal, or `a` is a bare collection name
/// and `c` is an instance of it.
fn segment_covers(a: &str, c: &str) -> bool {
    if a == c {
        return true;
    }
    if !a.contains(':') {
        if let Some((component, _)) = c.split_once(':') {
            return component == a;
        }
    }
    false
}

// ── Tests ────────────────────────────────────────────────────────────
