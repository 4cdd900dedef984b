//! The admission pipeline.
//!
//! Every inbound request walks a fixed, priority-ordered list of stages:
//! routing, rate limiting, authentication, parameter extraction, dispatch.
//! A stage either enriches the [`RequestContext`] or fails the request
//! with a taxonomy error; nothing downstream runs after a failure.
//!
//! Rate limiting deliberately runs before authentication so floods are
//! shed before they cost credential lookups.

mod context;

pub use context::RequestContext;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use crate::auth::Authenticator;
use crate::dispatch::{Dispatcher, ResponseEnvelope};
use crate::limit::{RateKey, RateLimiter};
use crate::params::{ExtractionInput, extract_params};
use crate::route::{Backend, RouteTable};
use crate::{Error, Result};

/// Fixed stage priorities; lower runs earlier.
pub mod priority {
    pub const ROUTE: u32 = 100;
    pub const RATE_LIMIT: u32 = 200;
    pub const AUTH: u32 = 300;
    pub const PARAMS: u32 = 400;
    pub const DISPATCH: u32 = 500;
}

/// One step of the admission pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name for logs.
    fn name(&self) -> &'static str;

    /// Where the stage sorts in the pipeline; unique per stage.
    fn priority(&self) -> u32;

    /// Run the stage against the in-flight request.
    ///
    /// # Errors
    ///
    /// A stage error aborts the pipeline and maps to a response through
    /// the error taxonomy.
    async fn apply(&self, ctx: &mut RequestContext) -> Result<()>;
}

/// Resolves the request to a published route.
pub struct RoutingStage {
    table: Arc<RouteTable>,
}

#[async_trait]
impl Stage for RoutingStage {
    fn name(&self) -> &'static str {
        "route"
    }

    fn priority(&self) -> u32 {
        priority::ROUTE
    }

    async fn apply(&self, ctx: &mut RequestContext) -> Result<()> {
        match self.table.resolve(ctx.method(), ctx.path()) {
            Some(matched) => {
                debug!(route_id = %matched.route.id, "Route resolved");
                ctx.route = Some(matched);
                Ok(())
            }
            None => Err(Error::RouteNotFound {
                method: ctx.method().to_string(),
                path: ctx.path().to_string(),
            }),
        }
    }
}

/// Applies the route's rate-limit budget.
pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn priority(&self) -> u32 {
        priority::RATE_LIMIT
    }

    async fn apply(&self, ctx: &mut RequestContext) -> Result<()> {
        let route = ctx.expect_route()?.route.clone();
        let key = RateKey::build(
            self.limiter.key_strategy(),
            &ctx.client_ip().to_string(),
            ctx.path(),
            ctx.presented_credential(),
        );
        self.limiter.enforce(&route, &key).await
    }
}

/// Establishes the caller's identity under the route's auth scheme.
pub struct AuthStage {
    authenticator: Arc<Authenticator>,
}

#[async_trait]
impl Stage for AuthStage {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn priority(&self) -> u32 {
        priority::AUTH
    }

    async fn apply(&self, ctx: &mut RequestContext) -> Result<()> {
        let route = ctx.expect_route()?.route.clone();
        let request = ctx.auth_request();
        let identity = self.authenticator.authenticate(&route, &request).await?;
        ctx.identity = identity;
        Ok(())
    }
}

/// Flattens path, query and body parameters.
///
/// Mock backends answer from canned data, so extraction is skipped for
/// them.
pub struct ParamsStage;

#[async_trait]
impl Stage for ParamsStage {
    fn name(&self) -> &'static str {
        "params"
    }

    fn priority(&self) -> u32 {
        priority::PARAMS
    }

    async fn apply(&self, ctx: &mut RequestContext) -> Result<()> {
        let matched = ctx.expect_route()?;
        if matches!(matched.route.backend, Backend::Mock { .. }) {
            return Ok(());
        }
        let path_params = matched.path_params.clone();

        let input = ExtractionInput {
            method: ctx.method(),
            path_params: &path_params,
            query: ctx.query(),
            body: ctx.body(),
        };
        ctx.params = extract_params(&input);
        Ok(())
    }
}

/// Hands the admitted request to its backend.
pub struct DispatchStage {
    dispatcher: Arc<Dispatcher>,
}

#[async_trait]
impl Stage for DispatchStage {
    fn name(&self) -> &'static str {
        "dispatch"
    }

    fn priority(&self) -> u32 {
        priority::DISPATCH
    }

    async fn apply(&self, ctx: &mut RequestContext) -> Result<()> {
        let route = ctx.expect_route()?.route.clone();
        let method = ctx.method().to_string();
        let params = std::mem::take(&mut ctx.params);
        let identity = ctx.identity.clone();

        let envelope = self
            .dispatcher
            .dispatch(&route, &method, params, &identity)
            .await?;
        ctx.response = Some(envelope);
        Ok(())
    }
}

/// The assembled admission pipeline.
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// Assemble a pipeline from `stages`, sorted by priority once.
    #[must_use]
    pub fn new(mut stages: Vec<Arc<dyn Stage>>) -> Self {
        stages.sort_by_key(|s| s.priority());
        Self { stages }
    }

    /// The standard five-stage pipeline.
    #[must_use]
    pub fn standard(
        table: Arc<RouteTable>,
        limiter: Arc<RateLimiter>,
        authenticator: Arc<Authenticator>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self::new(vec![
            Arc::new(RoutingStage { table }),
            Arc::new(RateLimitStage { limiter }),
            Arc::new(AuthStage { authenticator }),
            Arc::new(ParamsStage),
            Arc::new(DispatchStage { dispatcher }),
        ])
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage and return the response envelope.
    ///
    /// # Errors
    ///
    /// The first stage failure aborts the run and becomes the response.
    pub async fn run(&self, ctx: &mut RequestContext) -> Result<ResponseEnvelope> {
        for stage in &self.stages {
            let started = Instant::now();
            let outcome = stage.apply(ctx).await;
            debug!(
                stage = stage.name(),
                elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
                ok = outcome.is_ok(),
                "Stage finished"
            );
            outcome?;
        }
        ctx.response
            .take()
            .ok_or_else(|| Error::Internal("pipeline finished without a response".into()))
    }
}
