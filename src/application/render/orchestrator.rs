//! Per-request control flow around the expensive fetch + render step.
//!
//! ```text
//! lookup ─hit──────────────────────────────────────────▶ replay
//!    │miss
//!    ▼
//! claim ─pending─▶ wait ─▶ lookup
//!    │             └─deadline─▶ 202
//!    │owner
//!    ▼
//! lookup again ─hit─▶ release claim, replay
//!    │miss
//!    ▼
//! rate check ─rejected─▶ 429
//!    │allowed
//!    ▼
//! render (detached task) ─deadline─▶ 202, render continues
//!    │done
//!    ▼
//! respond, then cache write, then release claim
//! ```
//!
//! A forced refresh skips the lookup but still claims the key, so two
//! renders of one key never overlap in this process.

use std::{future::Future, sync::Arc, time::Duration};

use metrics::{counter, histogram};
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, info, warn};

use super::pending::{Claim, PendingRenders, PendingSignal, RenderGuard};
use super::ttl::TtlPolicy;
use super::types::{RenderError, RenderOutcome, RenderRequest, RenderedContent};
use crate::application::rate_limit::{RateDecision, RateLimiter};
use crate::cache::{CacheError, CacheKey, CachedEntry, KeyValueCache};

pub const METRIC_CACHE_HIT_TOTAL: &str = "rendergate_cache_hit_total";
pub const METRIC_CACHE_MISS_TOTAL: &str = "rendergate_cache_miss_total";
pub const METRIC_CACHE_WRITE_FAILED_TOTAL: &str = "rendergate_cache_write_failed_total";
pub const METRIC_RENDER_TOTAL: &str = "rendergate_render_total";
pub const METRIC_RENDER_FAILED_TOTAL: &str = "rendergate_render_failed_total";
pub const METRIC_RENDER_DETACHED_TOTAL: &str = "rendergate_render_detached_total";
pub const METRIC_COALESCED_WAIT_TOTAL: &str = "rendergate_coalesced_wait_total";
pub const METRIC_RATE_LIMITED_TOTAL: &str = "rendergate_rate_limited_total";
pub const METRIC_RENDER_MS: &str = "rendergate_render_ms";

type RenderResult = Result<(RenderedContent, Duration), RenderError>;

enum Lookup {
    Hit(CachedEntry),
    Claimed(RenderGuard),
    DeadlinePassed,
}

pub struct RenderOrchestrator {
    cache: Arc<KeyValueCache>,
    rate_limiter: RateLimiter,
    pending: PendingRenders,
    ttl: Arc<TtlPolicy>,
    render_timeout: Option<Duration>,
}

impl RenderOrchestrator {
    /// `render_timeout` of `None` waits for every render to finish.
    pub fn new(
        cache: Arc<KeyValueCache>,
        rate_limiter: RateLimiter,
        ttl: TtlPolicy,
        render_timeout: Option<Duration>,
    ) -> Self {
        Self {
            cache,
            rate_limiter,
            pending: PendingRenders::new(),
            ttl: Arc::new(ttl),
            render_timeout,
        }
    }

    pub fn cache(&self) -> &Arc<KeyValueCache> {
        &self.cache
    }

    pub fn pending(&self) -> &PendingRenders {
        &self.pending
    }

    /// Serve `request`, calling `render` only when no cached or in-flight
    /// result can be used. The returned content has already been handed to
    /// the cache writer.
    pub async fn serve<F, Fut>(
        &self,
        request: RenderRequest,
        render: F,
    ) -> Result<RenderOutcome, RenderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RenderedContent, RenderError>> + Send + 'static,
    {
        let key = request.cache_key();
        let deadline = self.render_timeout.map(|timeout| request.received_at + timeout);

        let lookup = if request.force_refresh {
            debug!(key = %key, path = %request.path, "forced refresh; skipping cache lookup");
            self.claim_for_refresh(&key, deadline).await
        } else {
            self.lookup_or_claim(&key, deadline).await
        };
        let guard = match lookup {
            Lookup::Hit(entry) => {
                debug!(key = %key, path = %request.path, outcome = "hit", "serving cached render");
                return Ok(RenderOutcome::Cached(entry));
            }
            Lookup::Claimed(guard) => guard,
            Lookup::DeadlinePassed => {
                info!(path = %request.path, "in-flight render outlasted the deadline; responding early");
                return Ok(self.still_working());
            }
        };

        if let RateDecision::Rejected { retry_after_secs } =
            self.rate_limiter.check(&request.fingerprint).await
        {
            counter!(METRIC_RATE_LIMITED_TOTAL).increment(1);
            info!(
                client_ip = %request.client_ip,
                path = %request.path,
                limit = self.rate_limiter.limit(),
                "rate limit exceeded"
            );
            return Err(RenderError::RateLimited {
                ip: request.client_ip,
                limit: self.rate_limiter.limit(),
                minutes: self.rate_limiter.interval().as_secs() / 60,
                retry_after_secs,
            });
        }

        let result = self.spawn_render(guard, request.path.clone(), render());
        self.await_render(&request, result).await
    }

    async fn lookup_or_claim(&self, key: &CacheKey, deadline: Option<Instant>) -> Lookup {
        loop {
            if let Some(entry) = self.cache.get_entry(key).await {
                counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
                return Lookup::Hit(entry);
            }
            match self.pending.claim(key) {
                Claim::Owner(guard) => {
                    // The previous owner may have written and released
                    // between our read and the claim.
                    if let Some(entry) = self.cache.get_entry(key).await {
                        drop(guard);
                        counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
                        return Lookup::Hit(entry);
                    }
                    counter!(METRIC_CACHE_MISS_TOTAL).increment(1);
                    return Lookup::Claimed(guard);
                }
                Claim::Waiter(signal) => {
                    counter!(METRIC_COALESCED_WAIT_TOTAL).increment(1);
                    debug!(key = %key, "render already in flight; waiting");
                    if !wait_for(signal, deadline).await {
                        return Lookup::DeadlinePassed;
                    }
                }
            }
        }
    }

    async fn claim_for_refresh(&self, key: &CacheKey, deadline: Option<Instant>) -> Lookup {
        loop {
            match self.pending.claim(key) {
                Claim::Owner(guard) => return Lookup::Claimed(guard),
                Claim::Waiter(signal) => {
                    counter!(METRIC_COALESCED_WAIT_TOTAL).increment(1);
                    if !wait_for(signal, deadline).await {
                        return Lookup::DeadlinePassed;
                    }
                }
            }
        }
    }

    fn still_working(&self) -> RenderOutcome {
        RenderOutcome::StillWorking {
            retry_after: self.render_timeout.unwrap_or_default(),
        }
    }

    /// Run the render on its own task. The task owns the claim, so neither a
    /// missed deadline nor a dropped connection cancels it, and waiters are
    /// only released once the cache write has been attempted.
    fn spawn_render<Fut>(
        &self,
        guard: RenderGuard,
        path: String,
        render: Fut,
    ) -> oneshot::Receiver<RenderResult>
    where
        Fut: Future<Output = Result<RenderedContent, RenderError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let cache = Arc::clone(&self.cache);
        let ttl_policy = Arc::clone(&self.ttl);

        tokio::spawn(async move {
            let started = Instant::now();
            let result = render.await;
            let latency = started.elapsed();
            histogram!(METRIC_RENDER_MS).record(latency.as_secs_f64() * 1000.0);

            match result {
                Ok(content) => {
                    counter!(METRIC_RENDER_TOTAL).increment(1);
                    let ttl = ttl_policy.expiry(&path, latency);
                    let entry = content.to_entry();
                    if tx.send(Ok((content, ttl))).is_err() {
                        debug!(path = %path, "caller detached before render finished");
                    }
                    write_entry(&cache, guard.key(), &entry, ttl).await;
                }
                Err(err) => {
                    counter!(METRIC_RENDER_FAILED_TOTAL, "kind" => err.kind()).increment(1);
                    warn!(
                        path = %path,
                        error = %err,
                        elapsed_ms = latency.as_millis() as u64,
                        "render failed"
                    );
                    let _ = tx.send(Err(err));
                }
            }
            drop(guard);
        });

        rx
    }

    async fn await_render(
        &self,
        request: &RenderRequest,
        result: oneshot::Receiver<RenderResult>,
    ) -> Result<RenderOutcome, RenderError> {
        let received = match self.render_timeout {
            Some(timeout) => {
                match tokio::time::timeout_at(request.received_at + timeout, result).await {
                    Ok(received) => received,
                    Err(_) => {
                        counter!(METRIC_RENDER_DETACHED_TOTAL).increment(1);
                        info!(
                            path = %request.path,
                            timeout_secs = timeout.as_secs(),
                            "render exceeded deadline; responding early"
                        );
                        return Ok(self.still_working());
                    }
                }
            }
            None => result.await,
        };

        match received {
            Ok(Ok((content, ttl))) => Ok(RenderOutcome::Fresh { content, ttl }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(RenderError::Worker(
                "render task ended without a result".to_string(),
            )),
        }
    }
}

/// `false` when `deadline` passed before the render holding the key ended.
async fn wait_for(signal: PendingSignal, deadline: Option<Instant>) -> bool {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, signal.wait())
            .await
            .is_ok(),
        None => {
            signal.wait().await;
            true
        }
    }
}

async fn write_entry(cache: &KeyValueCache, key: &CacheKey, entry: &CachedEntry, ttl: Duration) {
    if ttl.is_zero() {
        return;
    }
    match cache.put_entry(key, entry, ttl).await {
        Ok(()) => debug!(key = %key, ttl_secs = ttl.as_secs(), "cached render"),
        Err(err @ CacheError::CapacityExceeded { .. }) => {
            counter!(METRIC_CACHE_WRITE_FAILED_TOTAL, "kind" => err.kind()).increment(1);
            warn!(key = %key, error = %err, "render too large to cache");
        }
        Err(err) => {
            counter!(METRIC_CACHE_WRITE_FAILED_TOTAL, "kind" => err.kind()).increment(1);
            warn!(key = %key, cache = cache.kind(), error = %err, "cache write failed");
        }
    }
}
