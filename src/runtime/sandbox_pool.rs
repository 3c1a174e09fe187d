// src/runtime/sandbox_pool.rs
//! Warm sandbox instance pool
//!
//! Renting a sandbox reuses a warm instance keyed by (user, code hash) when
//! one is cached, avoiding repeated engine startup and script compilation.
//! A forced-cold rent bypasses the cache, and the caller invalidates the
//! instance after use instead of returning it — the watchdog's escalation
//! path relies on this to guarantee a clean-slate run.
//!
//! Single-owner discipline: `rent` removes the instance from the cache, so
//! a sandbox is never shared between two concurrent executions.

use crate::runtime::engine::ScriptEngine;
use crate::runtime::sandbox::Sandbox;
use crate::utils::config::RuntimeConfig;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Builds a fresh engine instance for a cold sandbox
pub type EngineFactory = Arc<dyn Fn() -> Box<dyn ScriptEngine> + Send + Sync>;

/// Pool counters
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Rents served from the warm cache
    pub warm_hits: u64,

    /// Rents that built a fresh instance
    pub cold_starts: u64,

    /// Instances evicted via invalidate
    pub invalidations: u64,

    /// Instances currently cached
    pub cached: usize,
}

/// Pool of reusable sandbox instances
pub struct SandboxPool {
    factory: EngineFactory,
    defaults: RuntimeConfig,
    warm: DashMap<(String, String), Sandbox>,

    warm_hits: AtomicU64,
    cold_starts: AtomicU64,
    invalidations: AtomicU64,
}

impl SandboxPool {
    pub fn new(factory: EngineFactory, defaults: RuntimeConfig) -> Self {
        Self {
            factory,
            defaults,
            warm: DashMap::new(),
            warm_hits: AtomicU64::new(0),
            cold_starts: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Rent an instance for one execution
    ///
    /// `force_cold` bypasses the warm cache entirely; the caller must
    /// `invalidate` (not `give_back`) such an instance after use.
    pub fn rent(&self, user_id: &str, code_hash: &str, force_cold: bool) -> Sandbox {
        if !force_cold {
            let key = (user_id.to_string(), code_hash.to_string());
            if let Some((_, sandbox)) = self.warm.remove(&key) {
                trace!(user = user_id, "Rented warm sandbox");
                self.warm_hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("sandbox_warm_hits_total").increment(1);
                return sandbox;
            }
        }

        debug!(user = user_id, force_cold, "Building cold sandbox");
        self.cold_starts.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sandbox_cold_starts_total").increment(1);
        Sandbox::new(
            user_id,
            code_hash,
            (self.factory)(),
            self.defaults.clone(),
        )
    }

    /// Return an instance to the warm cache for later reuse
    ///
    /// A stale instance already cached under the same key is replaced; the
    /// replaced one is simply dropped.
    pub fn give_back(&self, sandbox: Sandbox) {
        let key = (
            sandbox.user_id().to_string(),
            sandbox.code_hash().to_string(),
        );
        trace!(user = %key.0, "Returned sandbox to warm cache");
        self.warm.insert(key, sandbox);
    }

    /// Drop an instance without caching it
    pub fn invalidate(&self, sandbox: Sandbox) {
        debug!(user = sandbox.user_id(), "Invalidated sandbox");
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sandbox_invalidations_total").increment(1);
        drop(sandbox);
    }

    /// Evict any cached instance for a user (code redeploy, ban)
    pub fn evict_user(&self, user_id: &str) {
        self.warm.retain(|(user, _), _| user != user_id);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            warm_hits: self.warm_hits.load(Ordering::Relaxed),
            cold_starts: self.cold_starts.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            cached: self.warm.len(),
        }
    }
}
