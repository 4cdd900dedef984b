//! Edge Gateway Library
//!
//! Request admission pipeline for a multi-tenant API gateway.
//!
//! # Features
//!
//! - **Route Resolution**: exact and templated paths (`{var}`, `*`, `**`)
//!   against an atomically swapped in-memory snapshot
//! - **Rate Limiting**: fixed window, sliding window, and token bucket over
//!   a shared counter store (in-process or Redis)
//! - **Authentication**: bearer JWT and HMAC-SHA256 request signatures with
//!   single-use nonces and subscription checks
//! - **Parameter Extraction**: path, query, and JSON body merged into one
//!   map, later sources overwriting earlier ones
//! - **Dispatch**: http, rpc, and mock backends behind a uniform
//!   `{code, message, data}` response envelope
//! - **Cache Invalidation**: change events applied to the route table and
//!   credential cache without a restart
//!
//! Every stage is a [`pipeline::Stage`]; the default order is route,
//! rate limit, auth, params, dispatch.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod limit;
pub mod notify;
pub mod params;
pub mod pipeline;
pub mod provider;
pub mod route;
pub mod store;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
