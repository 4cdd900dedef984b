//! Route table resolution tests
//!
//! Exercises the snapshot through its public API:
//! - exact matches beating templates
//! - per-segment specificity ordering among templates
//! - `{var}`, `*`, and `**` matching semantics
//! - method discrimination and `ALL`
//! - published-only visibility across load, upsert, and remove

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use edge_gateway::provider::MemoryRouteProvider;
use edge_gateway::route::{AuthKind, Backend, RouteDefinition, RouteStatus, RouteTable};

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

fn table_with(routes: Vec<RouteDefinition>) -> RouteTable {
    let table = RouteTable::new();
    table.replace_all(routes);
    table
}

fn resolved_id(table: &RouteTable, method: &str, path: &str) -> Option<String> {
    table.resolve(method, path).map(|m| m.route.id.clone())
}

/// Test that an exact path always beats a template covering it
#[test]
fn exact_match_beats_any_template() {
    let table = table_with(vec![
        route("r-list", "GET", "/open/user/list"),
        route("r-by-id", "GET", "/open/user/{id}"),
        route("r-deep", "GET", "/open/**"),
    ]);

    assert_eq!(
        resolved_id(&table, "GET", "/open/user/list"),
        Some("r-list".into())
    );
    assert_eq!(
        resolved_id(&table, "GET", "/open/user/42"),
        Some("r-by-id".into())
    );
    assert_eq!(
        resolved_id(&table, "GET", "/open/other/thing"),
        Some("r-deep".into())
    );
}

/// Test the specificity ladder: literal > capture > glob > deep wildcard
#[test]
fn more_literal_templates_win() {
    let table = table_with(vec![
        route("r-deep", "GET", "/a/**"),
        route("r-glob", "GET", "/a/*/c"),
        route("r-param", "GET", "/a/{x}/c"),
        route("r-literal", "GET", "/a/b/c"),
    ]);

    assert_eq!(resolved_id(&table, "GET", "/a/b/c"), Some("r-literal".into()));
    assert_eq!(resolved_id(&table, "GET", "/a/q/c"), Some("r-param".into()));

    let table = table_with(vec![
        route("r-deep", "GET", "/a/**"),
        route("r-glob", "GET", "/a/*/c"),
    ]);
    assert_eq!(resolved_id(&table, "GET", "/a/q/c"), Some("r-glob".into()));
    assert_eq!(resolved_id(&table, "GET", "/a/q/d"), Some("r-deep".into()));
}

/// Test that the earliest differing segment decides between templates
#[test]
fn longer_literal_prefix_wins() {
    let table = table_with(vec![
        route("r-section", "GET", "/open/{section}/42"),
        route("r-user", "GET", "/open/user/{id}"),
    ]);

    // Segment two is literal in r-user and a capture in r-section
    assert_eq!(
        resolved_id(&table, "GET", "/open/user/42"),
        Some("r-user".into())
    );
    assert_eq!(
        resolved_id(&table, "GET", "/open/shop/42"),
        Some("r-section".into())
    );
}

/// Test that a template without `**` beats one that reaches the same
/// path through a zero-width `**`
#[test]
fn exact_arity_beats_zero_width_deep_wildcard() {
    let table = table_with(vec![
        route("r-deep", "GET", "/a/{x}/**"),
        route("r-plain", "GET", "/a/{x}"),
    ]);

    assert_eq!(resolved_id(&table, "GET", "/a/7"), Some("r-plain".into()));
    assert_eq!(resolved_id(&table, "GET", "/a/7/more"), Some("r-deep".into()));
}

/// Test `**` spanning zero, one, and many segments
#[test]
fn deep_wildcard_spans_zero_or_more_segments() {
    let table = table_with(vec![route("r-files", "GET", "/files/**")]);

    assert_eq!(resolved_id(&table, "GET", "/files"), Some("r-files".into()));
    assert_eq!(resolved_id(&table, "GET", "/files/a"), Some("r-files".into()));
    assert_eq!(
        resolved_id(&table, "GET", "/files/a/b/c"),
        Some("r-files".into())
    );
    assert_eq!(resolved_id(&table, "GET", "/other"), None);
}

/// Test that `*` stays within one segment
#[test]
fn single_star_matches_exactly_one_segment() {
    let table = table_with(vec![route("r-one", "GET", "/a/*/c")]);

    assert_eq!(resolved_id(&table, "GET", "/a/x/c"), Some("r-one".into()));
    assert_eq!(resolved_id(&table, "GET", "/a/c"), None);
    assert_eq!(resolved_id(&table, "GET", "/a/x/y/c"), None);
}

/// Test verb discrimination and the `ALL` pseudo-method
#[test]
fn methods_discriminate_and_all_matches_everything() {
    let table = table_with(vec![
        route("r-read", "GET", "/open/thing"),
        route("r-any", "ALL", "/open/anything"),
    ]);

    assert_eq!(resolved_id(&table, "GET", "/open/thing"), Some("r-read".into()));
    assert_eq!(resolved_id(&table, "POST", "/open/thing"), None);
    assert_eq!(resolved_id(&table, "GET", "/open/anything"), Some("r-any".into()));
    assert_eq!(resolved_id(&table, "DELETE", "/open/anything"), Some("r-any".into()));
}

/// Test that request paths normalize before lookup
#[test]
fn trailing_and_doubled_slashes_normalize() {
    let table = table_with(vec![route("r-ping", "GET", "/open/ping")]);

    assert_eq!(resolved_id(&table, "GET", "/open/ping/"), Some("r-ping".into()));
    assert_eq!(resolved_id(&table, "GET", "/open//ping"), Some("r-ping".into()));
    assert_eq!(resolved_id(&table, "get", "/open/ping"), Some("r-ping".into()));
}

/// Test that captures come back named and in template order
#[test]
fn path_params_bind_named_captures() {
    let table = table_with(vec![route("r-item", "GET", "/shops/{shop}/items/{item}")]);

    let matched = table.resolve("GET", "/shops/s1/items/i9").unwrap();
    assert_eq!(
        matched.path_params,
        vec![
            ("shop".to_string(), "s1".to_string()),
            ("item".to_string(), "i9".to_string())
        ]
    );
}

/// Test that bulk loads keep only published definitions
#[test]
fn replace_all_filters_unpublished() {
    let mut draft = route("r-draft", "GET", "/open/a");
    draft.status = RouteStatus::Draft;
    let mut offline = route("r-offline", "GET", "/open/b");
    offline.status = RouteStatus::Offline;
    let mut deprecated = route("r-dep", "GET", "/open/c");
    deprecated.status = RouteStatus::Deprecated;

    let table = table_with(vec![
        draft,
        offline,
        deprecated,
        route("r-live", "GET", "/open/d"),
    ]);

    assert_eq!(table.len(), 1);
    assert_eq!(resolved_id(&table, "GET", "/open/a"), None);
    assert_eq!(resolved_id(&table, "GET", "/open/d"), Some("r-live".into()));
}

/// Test that upserting an unpublished definition removes the route
#[test]
fn upsert_of_unpublished_definition_removes() {
    let table = table_with(vec![route("r-live", "GET", "/open/d")]);
    assert_eq!(table.len(), 1);

    let mut taken_down = route("r-live", "GET", "/open/d");
    taken_down.status = RouteStatus::Offline;
    table.upsert(taken_down);

    assert!(table.is_empty());
    assert_eq!(resolved_id(&table, "GET", "/open/d"), None);

    // Removing an unknown id is a no-op
    table.remove("r-ghost");
    assert!(table.is_empty());
}

/// Test that a provider load snapshots only published routes
#[tokio::test]
async fn load_from_provider_snapshots_published_routes() {
    let provider = Arc::new(MemoryRouteProvider::new());
    provider.upsert(route("r-live", "GET", "/open/live"));
    let mut draft = route("r-draft", "GET", "/open/draft");
    draft.status = RouteStatus::Draft;
    provider.upsert(draft);

    let table = RouteTable::new();
    let count = table.load_from(provider.as_ref()).await.unwrap();

    assert_eq!(count, 1);
    assert_eq!(resolved_id(&table, "GET", "/open/live"), Some("r-live".into()));
    assert_eq!(resolved_id(&table, "GET", "/open/draft"), None);
}
