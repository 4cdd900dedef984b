//! Change notifications.
//!
//! The control plane announces route edits and app status flips; the
//! gateway applies them to its local caches without waiting for the next
//! periodic reload. Delivery is at-most-once: a dropped event only delays
//! convergence until the reload task repairs the snapshot.
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use tokio::sync::broadcast;
//! use edge_gateway::notify::{ChangeBus, ChangeEvent, spawn_apply_task};
//! use edge_gateway::provider::{
//!     CredentialCache, CredentialProvider, MemoryCredentialProvider,
//!     MemoryRouteProvider, RouteProvider,
//! };
//! use edge_gateway::route::RouteTable;
//!
//! # tokio_test::block_on(async {
//! let bus = ChangeBus::new(64);
//! let table = Arc::new(RouteTable::new());
//! let routes: Arc<dyn RouteProvider> = Arc::new(MemoryRouteProvider::new());
//! let apps: Arc<dyn CredentialProvider> = Arc::new(MemoryCredentialProvider::new());
//! let credentials = Arc::new(CredentialCache::new(apps, Duration::from_secs(60)));
//! let (shutdown_tx, _) = broadcast::channel(1);
//!
//! let _task = spawn_apply_task(&bus, table, routes, credentials, shutdown_tx.subscribe());
//! bus.publish(ChangeEvent::AppStatusChanged { app_key: "AK1".into() });
//! # });
//! ```

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::provider::{CredentialCache, RouteProvider};
use crate::route::{RouteDefinition, RouteTable};

/// A change some other component should react to.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// A route was created, edited, unpublished or deleted.
    ///
    /// When `definition` is present it is applied directly; when it is
    /// absent the subscriber refetches the route by id.
    RouteChanged {
        route_id: String,
        definition: Option<RouteDefinition>,
    },
    /// An app credential changed state; its cache entry must go.
    AppStatusChanged { app_key: String },
}

impl ChangeEvent {
    /// Short label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RouteChanged { .. } => "route_changed",
            Self::AppStatusChanged { .. } => "app_status_changed",
        }
    }
}

/// Broadcast fan-out for [`ChangeEvent`]s.
///
/// Thin wrapper over `tokio::sync::broadcast` so publishers do not deal
/// with receiver bookkeeping. Publishing with no subscribers is fine.
#[derive(Debug, Clone)]
pub struct ChangeBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeBus {
    /// Create a bus buffering up to `capacity` undelivered events per
    /// subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `event`, returning how many subscribers will see it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        debug!(kind = event.kind(), "Publishing change event");
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Spawn the subscriber that applies change events to the route table
/// and credential cache.
///
/// Runs until the shutdown signal fires or the bus closes. A lagged
/// receiver logs and keeps going; the periodic reload covers the gap.
pub fn spawn_apply_task(
    bus: &ChangeBus,
    table: Arc<RouteTable>,
    routes: Arc<dyn RouteProvider>,
    credentials: Arc<CredentialCache>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => apply(&table, routes.as_ref(), &credentials, event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Change bus lagged, periodic reload will repair");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Change bus closed, stopping invalidation task");
                        return;
                    }
                },
                _ = shutdown.recv() => {
                    info!("Invalidation task stopping");
                    return;
                }
            }
        }
    })
}

async fn apply(
    table: &RouteTable,
    routes: &dyn RouteProvider,
    credentials: &CredentialCache,
    event: ChangeEvent,
) {
    match event {
        ChangeEvent::RouteChanged {
            route_id,
            definition: Some(definition),
        } => {
            debug!(route_id, "Applying route change");
            table.upsert(definition);
        }
        ChangeEvent::RouteChanged {
            route_id,
            definition: None,
        } => match routes.route_by_id(&route_id).await {
            Ok(Some(definition)) => {
                debug!(route_id, "Refetched changed route");
                table.upsert(definition);
            }
            Ok(None) => {
                debug!(route_id, "Changed route no longer exists, removing");
                table.remove(&route_id);
            }
            Err(e) => {
                warn!(route_id, error = %e, "Route refetch failed, waiting for reload");
            }
        },
        ChangeEvent::AppStatusChanged { app_key } => {
            debug!(app_key, "Evicting credential cache entry");
            credentials.invalidate(&app_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{
        AppCredential, AppStatus, CredentialProvider, MemoryCredentialProvider,
        MemoryRouteProvider,
    };
    use crate::route::{AuthKind, Backend, RouteStatus};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn route(id: &str, path: &str, status: RouteStatus) -> RouteDefinition {
        RouteDefinition {
            id: id.into(),
            tenant_id: "t1".into(),
            method: "GET".into(),
            path: path.into(),
            auth: AuthKind::None,
            backend: Backend::Mock {
                body: json!(null),
                delay_ms: 0,
            },
            timeout_ms: 3000,
            rate_limit_enabled: false,
            rate_limit_qps: None,
            status,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    struct Fixture {
        bus: ChangeBus,
        table: Arc<RouteTable>,
        routes: Arc<MemoryRouteProvider>,
        credentials: Arc<CredentialCache>,
        apps: Arc<MemoryCredentialProvider>,
        _shutdown: broadcast::Sender<()>,
    }

    fn fixture() -> Fixture {
        let bus = ChangeBus::new(16);
        let table = Arc::new(RouteTable::new());
        let routes = Arc::new(MemoryRouteProvider::new());
        let apps = Arc::new(MemoryCredentialProvider::new());
        let credentials = Arc::new(CredentialCache::new(
            apps.clone() as Arc<dyn CredentialProvider>,
            Duration::from_secs(60),
        ));
        let (shutdown, _) = broadcast::channel(1);

        spawn_apply_task(
            &bus,
            table.clone(),
            routes.clone(),
            credentials.clone(),
            shutdown.subscribe(),
        );

        Fixture {
            bus,
            table,
            routes,
            credentials,
            apps,
            _shutdown: shutdown,
        }
    }

    #[tokio::test]
    async fn inline_definition_is_applied_directly() {
        let f = fixture();

        f.bus.publish(ChangeEvent::RouteChanged {
            route_id: "r1".into(),
            definition: Some(route("r1", "/ping", RouteStatus::Published)),
        });
        settle().await;

        assert!(f.table.resolve("GET", "/ping").is_some());
    }

    #[tokio::test]
    async fn unpublished_inline_definition_removes_the_route() {
        let f = fixture();
        f.table.upsert(route("r1", "/ping", RouteStatus::Published));

        f.bus.publish(ChangeEvent::RouteChanged {
            route_id: "r1".into(),
            definition: Some(route("r1", "/ping", RouteStatus::Offline)),
        });
        settle().await;

        assert!(f.table.resolve("GET", "/ping").is_none());
    }

    #[tokio::test]
    async fn bare_event_refetches_by_id() {
        let f = fixture();
        f.routes
            .upsert(route("r1", "/refetched", RouteStatus::Published));

        f.bus.publish(ChangeEvent::RouteChanged {
            route_id: "r1".into(),
            definition: None,
        });
        settle().await;

        assert!(f.table.resolve("GET", "/refetched").is_some());
    }

    #[tokio::test]
    async fn bare_event_for_a_deleted_route_removes_it() {
        let f = fixture();
        f.table.upsert(route("r1", "/ping", RouteStatus::Published));

        f.bus.publish(ChangeEvent::RouteChanged {
            route_id: "r1".into(),
            definition: None,
        });
        settle().await;

        assert!(f.table.resolve("GET", "/ping").is_none());
    }

    #[tokio::test]
    async fn app_status_event_evicts_the_cached_credential() {
        let f = fixture();
        f.apps.upsert(AppCredential {
            app_key: "AK1".into(),
            app_secret: "s".into(),
            tenant_id: "t1".into(),
            status: AppStatus::Active,
            expires_at: None,
        });

        // Prime the cache, then flip the upstream state.
        let cached = f.credentials.get("AK1").await.unwrap().unwrap();
        assert_eq!(cached.status, AppStatus::Active);
        f.apps.upsert(AppCredential {
            status: AppStatus::Disabled,
            ..cached
        });

        f.bus.publish(ChangeEvent::AppStatusChanged {
            app_key: "AK1".into(),
        });
        settle().await;

        let refreshed = f.credentials.get("AK1").await.unwrap().unwrap();
        assert_eq!(refreshed.status, AppStatus::Disabled);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_harmless() {
        let bus = ChangeBus::new(4);
        assert_eq!(
            bus.publish(ChangeEvent::AppStatusChanged {
                app_key: "AK1".into()
            }),
            0
        );
    }
}
