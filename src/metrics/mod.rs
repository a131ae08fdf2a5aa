//! Prometheus metrics for the agent pipeline.
//!
//! Out of scope for the core decision algorithm (an external collaborator
//! per the specification), but every agent result carries a name/status pair
//! tailor-made for a labeled counter, so the corpus convention of exposing a
//! `prometheus::Registry` is kept here rather than dropped.

use prometheus::{CounterVec, HistogramVec, Opts, Registry};

use crate::pipeline::AgentResult;

/// Counts and timings for the agent pipeline, registered against a single
/// `prometheus::Registry` for export via `/metrics`.
pub struct Metrics {
    registry: Registry,
    agent_runs: CounterVec,
    decisions: CounterVec,
    cache_lookups: CounterVec,
    backend_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let agent_runs = CounterVec::new(
            Opts::new("passctrl_agent_runs_total", "Agent executions by name and status"),
            &["agent", "status"],
        )
        .expect("valid metric opts");
        let decisions = CounterVec::new(
            Opts::new("passctrl_decisions_total", "Rule chain decisions by outcome"),
            &["outcome"],
        )
        .expect("valid metric opts");
        let cache_lookups = CounterVec::new(
            Opts::new("passctrl_cache_lookups_total", "Decision cache lookups by result"),
            &["result"],
        )
        .expect("valid metric opts");
        let backend_duration = HistogramVec::new(
            prometheus::HistogramOpts::new("passctrl_backend_duration_seconds", "Backend call latency"),
            &["rule"],
        )
        .expect("valid metric opts");

        registry.register(Box::new(agent_runs.clone())).expect("register agent_runs");
        registry.register(Box::new(decisions.clone())).expect("register decisions");
        registry.register(Box::new(cache_lookups.clone())).expect("register cache_lookups");
        registry.register(Box::new(backend_duration.clone())).expect("register backend_duration");

        Metrics {
            registry,
            agent_runs,
            decisions,
            cache_lookups,
            backend_duration,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn observe_agent_result(&self, result: &AgentResult) {
        self.agent_runs
            .with_label_values(&[result.name.as_str(), result.status.as_str()])
            .inc();
        match result.name.as_str() {
            "rule_executor" if result.status == "completed" || result.status == "halted" => {}
            "cache_lookup" => {
                self.cache_lookups.with_label_values(&[result.status.as_str()]).inc();
            }
            _ => {}
        }
    }

    pub fn observe_decision(&self, outcome: &str) {
        self.decisions.with_label_values(&[outcome]).inc();
    }

    pub fn observe_backend_duration(&self, rule: &str, seconds: f64) {
        self.backend_duration.with_label_values(&[rule]).observe(seconds);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_agent_result_increments_counter() {
        let metrics = Metrics::new();
        metrics.observe_agent_result(&AgentResult::new("admission", "allowed", "ok"));
        let families = metrics.registry().gather();
        let agent_family = families
            .iter()
            .find(|f| f.get_name() == "passctrl_agent_runs_total")
            .unwrap();
        assert_eq!(agent_family.get_metric()[0].get_counter().get_value(), 1.0);
    }

    #[test]
    fn observe_decision_tracks_outcome() {
        let metrics = Metrics::new();
        metrics.observe_decision("pass");
        metrics.observe_decision("pass");
        metrics.observe_decision("fail");
        let families = metrics.registry().gather();
        let decision_family = families
            .iter()
            .find(|f| f.get_name() == "passctrl_decisions_total")
            .unwrap();
        let total: f64 = decision_family
            .get_metric()
            .iter()
            .map(|m| m.get_counter().get_value())
            .sum();
        assert_eq!(total, 3.0);
    }
}
