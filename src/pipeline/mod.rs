//! The per-request agent pipeline (spec §2/§5/§6).
//!
//! Every stage implements the uniform [`Agent`] contract and runs in a
//! fixed order against one request's [`State`]. Short-circuiting (cache
//! hits skipping rule execution, rule execution halting at the first
//! terminal outcome) is expressed by each agent consulting prior state, not
//! by the runner skipping stages — the runner always calls every agent
//! once, in order.

pub mod response;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::admission::directive::AuthDirective;
use crate::admission::Admission;
use crate::backend::BackendClient;
use crate::cache::{Cache, CacheLookup, ResultCaching, TtlPolicy};
use crate::metrics::Metrics;
use crate::rules::{Definition, RuleChainPlanner, RuleExecutor};
use crate::state::State;
use response::ResponseBuilder;

/// Per-request ambient context: correlation id and an optional deadline,
/// honored by suspension points (backend calls) per spec §5.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub request_id: Uuid,
    pub deadline: Option<Duration>,
}

impl Default for PipelineContext {
    fn default() -> Self {
        PipelineContext {
            request_id: Uuid::new_v4(),
            deadline: None,
        }
    }
}

/// Uniform per-agent outcome (spec §6).
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub name: String,
    pub status: String,
    pub details: String,
    pub meta: HashMap<String, String>,
}

impl AgentResult {
    pub fn new(name: &str, status: &str, details: impl Into<String>) -> Self {
        AgentResult {
            name: name.to_string(),
            status: status.to_string(),
            details: details.into(),
            meta: HashMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &'static str;
    async fn execute(&self, ctx: &PipelineContext, state: &mut State) -> AgentResult;
}

/// Runs the fixed six-stage chain described in spec §2 against one
/// request's state, returning every agent's result in order.
pub struct PipelineRunner {
    admission: Admission,
    cache_lookup: CacheLookup,
    planner: RuleChainPlanner,
    executor: RuleExecutor,
    result_caching: ResultCaching,
    response_builder: ResponseBuilder,
    metrics: Arc<Metrics>,
}

impl PipelineRunner {
    pub fn new(
        directives: Vec<AuthDirective>,
        rules: Vec<Arc<Definition>>,
        cache: Arc<dyn Cache>,
        ttl_policy: TtlPolicy,
        backend_client: BackendClient,
        metrics: Arc<Metrics>,
    ) -> Self {
        PipelineRunner {
            admission: Admission::new(directives),
            cache_lookup: CacheLookup::new(cache.clone(), ttl_policy.clone()),
            planner: RuleChainPlanner::new(rules),
            executor: RuleExecutor::new(backend_client, metrics.clone()),
            result_caching: ResultCaching::new(cache, ttl_policy),
            response_builder: ResponseBuilder,
            metrics,
        }
    }

    pub async fn run(&self, ctx: &PipelineContext, state: &mut State) -> Vec<AgentResult> {
        let mut results = Vec::with_capacity(6);
        results.push(self.admission.execute(ctx, state).await);
        results.push(self.cache_lookup.execute(ctx, state).await);
        results.push(self.planner.execute(ctx, state).await);
        results.push(self.executor.execute(ctx, state).await);
        results.push(self.result_caching.execute(ctx, state).await);
        results.push(self.response_builder.execute(ctx, state).await);

        for result in &results {
            self.metrics.observe_agent_result(result);
        }
        if !state.rule.outcome.is_empty() {
            self.metrics.observe_decision(&state.rule.outcome);
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_context_default_generates_request_id() {
        let a = PipelineContext::default();
        let b = PipelineContext::default();
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn agent_result_with_meta_inserts_key() {
        let result = AgentResult::new("admission", "allowed", "ok").with_meta("k", "v");
        assert_eq!(result.meta.get("k"), Some(&"v".to_string()));
    }
}
