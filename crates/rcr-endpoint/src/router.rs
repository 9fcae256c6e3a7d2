// SPDX-License-Identifier: MIT OR Apache-2.0

//! Router registration: `(fromPattern, method, targetChain)` entries keyed
//! by router id, looked up per inbound request.
//!
//! Removal soft-disables a router rather than freeing its id slot, so a
//! route can be taken out of service without invalidating ids a caller may
//! still be holding.

use axum::http::Method;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// One registered route: an inbound pattern plus the chain it feeds.
pub struct Router {
    id: String,
    method: Method,
    /// A path pattern using `:name` for a captured segment, e.g.
    /// `/devices/:id/state`.
    pattern: String,
    chain_id: String,
    disabled: AtomicBool,
}

impl Router {
    /// The router's id, stable across `RemoveRouter`.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The chain this router feeds.
    #[must_use]
    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Whether this router has been soft-disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }
}

/// Match `path` against `pattern`, extracting `:name` captures. Returns
/// `None` if the segment counts differ or a literal segment doesn't match.
#[must_use]
pub fn match_path(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern_segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if pattern_segments.len() != path_segments.len() {
        return None;
    }
    let mut params = HashMap::new();
    for (p, s) in pattern_segments.iter().zip(path_segments.iter()) {
        if let Some(name) = p.strip_prefix(':') {
            params.insert(name.to_string(), (*s).to_string());
        } else if p != s {
            return None;
        }
    }
    Some(params)
}

/// The live table of routers an endpoint dispatches through.
#[derive(Default)]
pub struct RouterTable {
    routers: RwLock<HashMap<String, Arc<Router>>>,
    next_id: AtomicU64,
}

impl RouterTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a router. An empty `id` is assigned a generated one.
    /// Safe to call concurrently with in-flight requests: the match used by
    /// an in-flight request is snapshotted before this call returns.
    pub fn add_router(&self, id: &str, method: Method, pattern: &str, chain_id: &str) -> String {
        let id = if id.is_empty() {
            format!("router-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
        } else {
            id.to_string()
        };
        let router = Arc::new(Router {
            id: id.clone(),
            method,
            pattern: pattern.to_string(),
            chain_id: chain_id.to_string(),
            disabled: AtomicBool::new(false),
        });
        self.routers.write().expect("router table lock poisoned").insert(id.clone(), router);
        id
    }

    /// Soft-disable the router. Its id and pattern stay visible via
    /// [`RouterTable::get`]; it is simply excluded from
    /// [`RouterTable::find`] from this point on.
    pub fn remove_router(&self, id: &str) -> Result<(), rcr_core::RuleError> {
        let guard = self.routers.read().expect("router table lock poisoned");
        let router = guard.get(id).ok_or_else(|| rcr_core::RuleError::NotFound(id.to_string()))?;
        router.disabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Look up a router by id, disabled or not.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Router>> {
        self.routers.read().expect("router table lock poisoned").get(id).cloned()
    }

    /// Find the first enabled router whose method and pattern match.
    #[must_use]
    pub fn find(&self, method: &Method, path: &str) -> Option<(Arc<Router>, HashMap<String, String>)> {
        let guard = self.routers.read().expect("router table lock poisoned");
        for router in guard.values() {
            if router.is_disabled() || &router.method != method {
                continue;
            }
            if let Some(params) = match_path(&router.pattern, path) {
                return Some((router.clone(), params));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_path_captures_named_segments() {
        let params = match_path("/devices/:id/state", "/devices/42/state").unwrap();
        assert_eq!(params.get("id"), Some(&"42".to_string()));
    }

    #[test]
    fn match_path_rejects_literal_mismatch() {
        assert!(match_path("/devices/:id", "/sensors/42").is_none());
    }

    #[test]
    fn match_path_rejects_segment_count_mismatch() {
        assert!(match_path("/devices/:id", "/devices/42/state").is_none());
    }

    #[test]
    fn add_then_find_round_trips() {
        let table = RouterTable::new();
        let id = table.add_router("", Method::GET, "/devices/:id", "chain-1");
        let (router, params) = table.find(&Method::GET, "/devices/7").unwrap();
        assert_eq!(router.id(), id);
        assert_eq!(router.chain_id(), "chain-1");
        assert_eq!(params.get("id"), Some(&"7".to_string()));
    }

    #[test]
    fn remove_router_soft_disables_but_keeps_id() {
        let table = RouterTable::new();
        let id = table.add_router("r1", Method::POST, "/ingest", "chain-1");
        table.remove_router(&id).unwrap();
        assert!(table.find(&Method::POST, "/ingest").is_none());
        assert!(table.get(&id).unwrap().is_disabled());
    }

    #[test]
    fn remove_unknown_router_is_not_found() {
        let table = RouterTable::new();
        assert!(table.remove_router("missing").is_err());
    }

    #[test]
    fn disabled_routers_are_excluded_but_others_still_match() {
        let table = RouterTable::new();
        let a = table.add_router("", Method::GET, "/a", "chain-a");
        let _b = table.add_router("", Method::GET, "/b", "chain-b");
        table.remove_router(&a).unwrap();
        assert!(table.find(&Method::GET, "/a").is_none());
        assert!(table.find(&Method::GET, "/b").is_some());
    }
}
