//! Decision cache (spec §4.7): fingerprinting, per-outcome TTL policy, and
//! the `CacheLookup`/`ResultCaching` pipeline agents.

pub mod entry;
pub mod fingerprint;
pub mod memory;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use crate::constants::{
    DEFAULT_FAIL_TTL_SECS, DEFAULT_PASS_TTL_SECS, DEFAULT_STRICT_MODE, OUTCOME_ERROR, OUTCOME_FAIL,
};
use crate::pipeline::{Agent, AgentResult, PipelineContext};
use crate::state::State;

pub use entry::{CachedResponse, DecisionCacheEntry};
pub use fingerprint::{fingerprint, FingerprintInput};
pub use traits::{Cache, CacheStats};

/// Gateway-wide cache identity/selection settings, applied once in
/// `CacheLookup` before any rule has executed (spec §4.7: "Fingerprint /
/// CacheKey... set by CacheLookup"). `ResultCaching` reuses the same value
/// rather than recomputing it.
#[derive(Debug, Clone)]
pub struct FingerprintConfig {
    pub endpoint_id: String,
    pub selected_headers: Vec<String>,
    pub selected_query: Vec<String>,
    pub strict_mode: bool,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        FingerprintConfig {
            endpoint_id: String::new(),
            selected_headers: Vec::new(),
            selected_query: Vec::new(),
            strict_mode: DEFAULT_STRICT_MODE,
        }
    }
}

/// Per-outcome TTL policy (spec §4.7). `error` is never cached regardless of
/// configuration; a zero or negative TTL for `pass`/`fail` disables caching
/// for that outcome.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    pub fingerprint: FingerprintConfig,
    pub pass_ttl: Duration,
    pub fail_ttl: Duration,
    pub follow_cache_control: bool,
    pub default_ttl: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        TtlPolicy {
            fingerprint: FingerprintConfig::default(),
            pass_ttl: Duration::from_secs(DEFAULT_PASS_TTL_SECS),
            fail_ttl: Duration::from_secs(DEFAULT_FAIL_TTL_SECS),
            follow_cache_control: false,
            default_ttl: Duration::from_secs(DEFAULT_PASS_TTL_SECS),
        }
    }
}

impl TtlPolicy {
    pub fn ttl_for(&self, outcome: &str, cache_control_max_age: Option<u64>) -> Option<Duration> {
        if outcome == OUTCOME_ERROR {
            return None;
        }
        if self.follow_cache_control {
            if let Some(max_age) = cache_control_max_age {
                return if max_age == 0 { None } else { Some(Duration::from_secs(max_age)) };
            }
        }
        let configured = if outcome == OUTCOME_FAIL { self.fail_ttl } else { self.pass_ttl };
        let ttl = if configured.is_zero() { self.default_ttl } else { configured };
        if ttl.is_zero() {
            None
        } else {
            Some(ttl)
        }
    }
}

pub struct CacheLookup {
    cache: Arc<dyn Cache>,
    policy: TtlPolicy,
}

impl CacheLookup {
    pub fn new(cache: Arc<dyn Cache>, policy: TtlPolicy) -> Self {
        CacheLookup { cache, policy }
    }
}

#[async_trait]
impl Agent for CacheLookup {
    fn name(&self) -> &'static str {
        "cache_lookup"
    }

    async fn execute(&self, _ctx: &PipelineContext, state: &mut State) -> AgentResult {
        let input = FingerprintInput {
            endpoint_id: &self.policy.fingerprint.endpoint_id,
            method: &state.request.method,
            path: &state.request.path,
            forward: &state.forward,
            selected_headers: &self.policy.fingerprint.selected_headers,
            selected_query: &self.policy.fingerprint.selected_query,
            strict_mode: self.policy.fingerprint.strict_mode,
            exported_variables: &state.rule.variables.exported,
        };
        let key = fingerprint(&input);
        state.cache.fingerprint = Some(key.clone());

        match self.cache.lookup(&key).await {
            Ok(Some(entry)) if !entry.is_expired(Utc::now()) => {
                state.cache.hit = true;
                state.cache.decision = entry.decision.clone();
                state.response.status = entry.response.status;
                state.response.message = entry.response.message.clone();
                state.response.headers = entry.response.headers.clone();
                state.rule.variables.exported = entry.variables.clone();
                state.rule.set_outcome(entry.decision.clone(), "cache hit");
                state.rule.from_cache = true;
                AgentResult::new(self.name(), "hit", "decision cache hit")
            }
            Ok(_) => AgentResult::new(self.name(), "miss", "no cached decision"),
            Err(e) => {
                warn!(error = %e, "cache lookup failed, treating as miss");
                AgentResult::new(self.name(), "miss", format!("cache error: {e}"))
            }
        }
    }
}

pub struct ResultCaching {
    cache: Arc<dyn Cache>,
    policy: TtlPolicy,
}

impl ResultCaching {
    pub fn new(cache: Arc<dyn Cache>, policy: TtlPolicy) -> Self {
        ResultCaching { cache, policy }
    }
}

#[async_trait]
impl Agent for ResultCaching {
    fn name(&self) -> &'static str {
        "result_caching"
    }

    async fn execute(&self, _ctx: &PipelineContext, state: &mut State) -> AgentResult {
        if state.cache.hit {
            return AgentResult::new(self.name(), "hit", "cache already satisfied this request");
        }
        if state.rule.outcome.is_empty() {
            return AgentResult::new(self.name(), "skipped", "no outcome to cache");
        }
        if state.rule.outcome == OUTCOME_ERROR {
            return AgentResult::new(self.name(), "bypassed", "error outcomes are never cached");
        }

        let Some(ttl) = self.policy.ttl_for(&state.rule.outcome, None) else {
            return AgentResult::new(self.name(), "bypassed", "ttl disabled for this outcome");
        };
        let Some(key) = state.cache.fingerprint.clone() else {
            return AgentResult::new(self.name(), "error", "missing fingerprint");
        };

        let now = Utc::now();
        let entry = DecisionCacheEntry {
            decision: state.rule.outcome.clone(),
            response: CachedResponse {
                status: state.response.status,
                message: state.response.message.clone(),
                headers: state.response.headers.clone(),
            },
            variables: state.rule.variables.exported.clone(),
            stored_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_default(),
        };

        match self.cache.store(key, entry).await {
            Ok(()) => {
                state.cache.stored = true;
                AgentResult::new(self.name(), "stored", "decision cached")
            }
            Err(e) => {
                warn!(error = %e, "cache store failed");
                state.cache.stored = false;
                AgentResult::new(self.name(), "error", format!("cache store failed: {e}"))
            }
        }
    }
}
