//! Local route snapshot and request-time resolution.
//!
//! The gateway matches against an in-process snapshot, never the provider.
//! Freshness comes from three directions:
//!
//! 1. bulk load at startup ([`RouteTable::load_from`])
//! 2. targeted upserts/removals driven by change notifications
//! 3. a periodic full reload ([`spawn_reload_task`]) as the staleness
//!    backstop for missed notifications
//!
//! Lookup order: exact literal map under the request verb, then under `ALL`,
//! then templated routes in specificity order (first differing segment
//! decides; provider order breaks exact ties).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::RngExt;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::definition::RouteDefinition;
use super::template::{PathTemplate, normalize_path, specificity_cmp};
use crate::provider::{RouteProvider, Scope};
use crate::Result;

#[derive(Clone)]
struct CompiledRoute {
    template: PathTemplate,
    route: Arc<RouteDefinition>,
}

#[derive(Default, Clone)]
struct Snapshot {
    /// (uppercase verb or `ALL`, normalized path) -> route
    exact: HashMap<(String, String), Arc<RouteDefinition>>,
    /// Sorted most-specific-first
    templated: Vec<CompiledRoute>,
}

impl Snapshot {
    fn insert(&mut self, route: Arc<RouteDefinition>) {
        let template = match PathTemplate::parse(&route.path) {
            Ok(t) => t,
            Err(e) => {
                warn!(route_id = %route.id, error = %e, "Skipping route with invalid template");
                return;
            }
        };
        if template.is_exact() {
            self.exact.insert(
                (route.method.clone(), normalize_path(&route.path)),
                route,
            );
        } else {
            self.templated.push(CompiledRoute { template, route });
        }
    }

    fn remove(&mut self, route_id: &str) {
        self.exact.retain(|_, r| r.id != route_id);
        self.templated.retain(|c| c.route.id != route_id);
    }

    fn sort(&mut self) {
        // Stable: equal specificity keeps provider order.
        self.templated
            .sort_by(|a, b| specificity_cmp(b.template.specificity(), a.template.specificity()));
    }

    fn len(&self) -> usize {
        self.exact.len() + self.templated.len()
    }
}

/// A resolved route plus the captures its template bound.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The matched definition
    pub route: Arc<RouteDefinition>,
    /// `{name}` captures in template order; empty for exact matches
    pub path_params: Vec<(String, String)>,
}

/// Concurrent route snapshot.
///
/// Reads clone an `Arc` under a short lock; writes rebuild a copy and swap
/// it in, so resolution never blocks behind a reload.
#[derive(Default)]
pub struct RouteTable {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl RouteTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `method` + `path` to a published route.
    #[must_use]
    pub fn resolve(&self, method: &str, path: &str) -> Option<RouteMatch> {
        let snap = self.snapshot.read().clone();
        let norm = normalize_path(path);
        let verb = method.to_ascii_uppercase();

        for key in [(verb.clone(), norm.clone()), ("ALL".to_string(), norm.clone())] {
            if let Some(route) = snap.exact.get(&key) {
                // Status is re-checked even though inserts filter; a stale
                // snapshot must never dispatch an unpublished route.
                if route.is_published() {
                    return Some(RouteMatch {
                        route: Arc::clone(route),
                        path_params: Vec::new(),
                    });
                }
            }
        }

        for compiled in &snap.templated {
            if !compiled.route.is_published() || !compiled.route.accepts_method(&verb) {
                continue;
            }
            if let Some(path_params) = compiled.template.match_path(&norm) {
                return Some(RouteMatch {
                    route: Arc::clone(&compiled.route),
                    path_params,
                });
            }
        }

        None
    }

    /// Replace the whole snapshot with `routes` (bulk load / periodic reload).
    ///
    /// Non-published definitions and unparseable templates are skipped.
    pub fn replace_all(&self, routes: Vec<RouteDefinition>) {
        let mut next = Snapshot::default();
        for route in routes {
            if route.is_published() {
                next.insert(Arc::new(route));
            }
        }
        next.sort();
        *self.snapshot.write() = Arc::new(next);
    }

    /// Insert or replace one route by id.
    ///
    /// A non-published definition acts as a removal: unpublishing must take
    /// a route out of service immediately.
    pub fn upsert(&self, route: RouteDefinition) {
        if !route.is_published() {
            debug!(route_id = %route.id, status = ?route.status, "Upsert of unpublished route, removing");
            self.remove(&route.id);
            return;
        }
        // Clone and swap under one guard so a concurrent reload cannot be
        // overwritten by a copy taken before it.
        let mut guard = self.snapshot.write();
        let mut next = (**guard).clone();
        next.remove(&route.id);
        next.insert(Arc::new(route));
        next.sort();
        *guard = Arc::new(next);
    }

    /// Remove a route by id. Unknown ids are a no-op.
    pub fn remove(&self, route_id: &str) {
        let mut guard = self.snapshot.write();
        let mut next = (**guard).clone();
        next.remove(route_id);
        *guard = Arc::new(next);
    }

    /// Number of matchable routes in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    /// Return `true` when no routes are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch all published routes from `provider` and swap them in.
    ///
    /// # Errors
    ///
    /// Propagates provider failures; the current snapshot stays in place.
    pub async fn load_from(&self, provider: &dyn RouteProvider) -> Result<usize> {
        let routes = provider.published_routes(&Scope::AllTenants).await?;
        let count = routes.len();
        self.replace_all(routes);
        Ok(count)
    }
}

/// Spawn the periodic full-reload task.
///
/// Runs every `interval` with a small jitter so a fleet of gateways does not
/// hit the provider in lockstep. A failed reload logs and keeps the current
/// snapshot; the next tick retries.
pub fn spawn_reload_task(
    table: Arc<RouteTable>,
    provider: Arc<dyn RouteProvider>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = tokio::time::sleep(jittered(interval)) => {
                    match table.load_from(provider.as_ref()).await {
                        Ok(count) => debug!(routes = count, "Route snapshot reloaded"),
                        Err(e) => {
                            warn!(error = %e, "Periodic route reload failed, keeping current snapshot");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Route reload task stopping");
                    break;
                }
            }
        }
    })
}

/// `interval` spread by up to plus or minus 10%.
fn jittered(interval: Duration) -> Duration {
    let base = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    let spread = base / 10;
    if spread == 0 {
        return interval;
    }
    let offset = rand::rng().random_range(0..=2 * spread);
    Duration::from_millis(base - spread + offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::definition::{AuthKind, Backend, RouteStatus};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn route(id: &str, method: &str, path: &str) -> RouteDefinition {
        RouteDefinition {
            id: id.into(),
            tenant_id: "t1".into(),
            method: method.into(),
            path: path.into(),
            auth: AuthKind::None,
            backend: Backend::Mock {
                body: json!({}),
                delay_ms: 0,
            },
            timeout_ms: 3000,
            rate_limit_enabled: false,
            rate_limit_qps: None,
            status: RouteStatus::Published,
        }
    }

    #[test]
    fn exact_match_wins_over_any_template() {
        let table = RouteTable::new();
        table.replace_all(vec![
            route("deep", "GET", "/open/user/**"),
            route("param", "GET", "/open/user/{id}"),
            route("literal", "GET", "/open/user/list"),
        ]);

        let hit = table.resolve("GET", "/open/user/list").unwrap();
        assert_eq!(hit.route.id, "literal");
        assert!(hit.path_params.is_empty());
    }

    #[test]
    fn templates_rank_literal_then_param_then_glob_then_deep() {
        let table = RouteTable::new();
        table.replace_all(vec![
            route("deep", "GET", "/open/user/**"),
            route("glob", "GET", "/open/user/*"),
            route("param", "GET", "/open/user/{id}"),
        ]);

        let hit = table.resolve("GET", "/open/user/123").unwrap();
        assert_eq!(hit.route.id, "param");
        assert_eq!(
            hit.path_params,
            vec![("id".to_string(), "123".to_string())]
        );

        // Two segments: only the deep wildcard can absorb the extra one.
        let deep = table.resolve("GET", "/open/user/123/extra").unwrap();
        assert_eq!(deep.route.id, "deep");
    }

    #[test]
    fn provider_order_breaks_equal_specificity() {
        let table = RouteTable::new();
        table.replace_all(vec![
            route("first", "GET", "/a/{x}"),
            route("second", "GET", "/a/{y}"),
        ]);

        assert_eq!(table.resolve("GET", "/a/1").unwrap().route.id, "first");
    }

    #[test]
    fn all_verb_is_probed_after_the_request_verb() {
        let table = RouteTable::new();
        table.replace_all(vec![
            route("any", "ALL", "/open/ping"),
            route("get", "GET", "/open/ping"),
        ]);

        assert_eq!(table.resolve("GET", "/open/ping").unwrap().route.id, "get");
        assert_eq!(table.resolve("POST", "/open/ping").unwrap().route.id, "any");
    }

    #[test]
    fn method_mismatch_is_not_found() {
        let table = RouteTable::new();
        table.replace_all(vec![route("get-only", "GET", "/open/user/{id}")]);
        assert!(table.resolve("DELETE", "/open/user/1").is_none());
    }

    #[test]
    fn unpublished_routes_never_resolve() {
        let table = RouteTable::new();
        let mut draft = route("draft", "GET", "/open/draft");
        draft.status = RouteStatus::Draft;
        let mut offline = route("offline", "GET", "/open/offline/{id}");
        offline.status = RouteStatus::Offline;
        table.replace_all(vec![draft, offline, route("live", "GET", "/open/live")]);

        assert_eq!(table.len(), 1);
        assert!(table.resolve("GET", "/open/draft").is_none());
        assert!(table.resolve("GET", "/open/offline/1").is_none());
        assert!(table.resolve("GET", "/open/live").is_some());
    }

    #[test]
    fn upsert_replaces_and_unpublish_removes() {
        let table = RouteTable::new();
        table.replace_all(vec![route("r1", "GET", "/v1/a")]);

        table.upsert(route("r1", "GET", "/v1/b"));
        assert!(table.resolve("GET", "/v1/a").is_none());
        assert!(table.resolve("GET", "/v1/b").is_some());

        let mut gone = route("r1", "GET", "/v1/b");
        gone.status = RouteStatus::Deprecated;
        table.upsert(gone);
        assert!(table.resolve("GET", "/v1/b").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn remove_by_id_covers_both_tables() {
        let table = RouteTable::new();
        table.replace_all(vec![
            route("exact", "GET", "/v1/exact"),
            route("tpl", "GET", "/v1/{x}"),
        ]);

        table.remove("exact");
        table.remove("tpl");
        assert!(table.is_empty());
    }

    #[test]
    fn invalid_template_is_skipped_not_fatal() {
        let table = RouteTable::new();
        table.replace_all(vec![
            route("bad", "GET", "/open/{}"),
            route("good", "GET", "/open/ok"),
        ]);

        assert_eq!(table.len(), 1);
        assert!(table.resolve("GET", "/open/ok").is_some());
    }

    #[tokio::test]
    async fn load_from_pulls_published_routes() {
        use crate::provider::MemoryRouteProvider;

        let provider = MemoryRouteProvider::new();
        provider.upsert(route("r1", "GET", "/v1/a"));
        let mut draft = route("r2", "GET", "/v1/b");
        draft.status = RouteStatus::Draft;
        provider.upsert(draft);

        let table = RouteTable::new();
        let count = table.load_from(&provider).await.unwrap();

        assert_eq!(count, 1);
        assert!(table.resolve("GET", "/v1/a").is_some());
        assert!(table.resolve("GET", "/v1/b").is_none());
    }

    #[tokio::test]
    async fn reload_task_refreshes_snapshot() {
        use crate::provider::MemoryRouteProvider;

        let provider = Arc::new(MemoryRouteProvider::new());
        let table = Arc::new(RouteTable::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = spawn_reload_task(
            Arc::clone(&table),
            provider.clone(),
            Duration::from_millis(20),
            shutdown_rx,
        );

        provider.upsert(route("late", "GET", "/v1/late"));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(table.resolve("GET", "/v1/late").is_some());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
