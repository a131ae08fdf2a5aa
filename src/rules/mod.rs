//! Rule compilation and execution (spec §3/§4.3/§4.6).

pub mod compile;
pub mod compiled;
pub mod spec;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::backend::{BackendClient, BackendResponse};
use crate::constants::{DEFAULT_OUTCOME_PASS, OUTCOME_ERROR, OUTCOME_FAIL};
use crate::error::EvaluationError;
use crate::expr::{eval_hybrid, from_json, Activation, Environment, Value};
use crate::metrics::Metrics;
use crate::pipeline::{Agent, AgentResult, PipelineContext};
use crate::state::{HistoryEntry, State};

pub use compiled::Definition;

/// Opaque handle published by [`RuleChainPlanner`] and consumed by
/// [`RuleExecutor`] (spec §9 "State.Plan").
#[derive(Clone)]
pub struct Plan {
    pub rules: Vec<Arc<Definition>>,
}

pub struct RuleChainPlanner {
    rules: Vec<Arc<Definition>>,
}

impl RuleChainPlanner {
    pub fn new(rules: Vec<Arc<Definition>>) -> Self {
        RuleChainPlanner { rules }
    }
}

#[async_trait]
impl Agent for RuleChainPlanner {
    fn name(&self) -> &'static str {
        "rule_chain_planner"
    }

    async fn execute(&self, _ctx: &PipelineContext, state: &mut State) -> AgentResult {
        if state.cache.hit {
            return AgentResult::new(self.name(), "cached", "decision already satisfied from cache");
        }
        if state.rule.is_terminal() {
            return AgentResult::new(self.name(), "short_circuited", "admission already set an outcome");
        }
        state.plan.set(Plan {
            rules: self.rules.clone(),
        });
        AgentResult::new(self.name(), "ready", format!("{} rules planned", self.rules.len()))
    }
}

pub struct RuleExecutor {
    backend_client: BackendClient,
    metrics: Arc<Metrics>,
}

impl RuleExecutor {
    pub fn new(backend_client: BackendClient, metrics: Arc<Metrics>) -> Self {
        RuleExecutor {
            backend_client,
            metrics,
        }
    }

    /// Converts a successful backend call into the `backend` activation
    /// value (spec §4.5: "last page's headers/body populate
    /// `backend.headers`/`backend.body`", "`backend.pages`").
    fn backend_activation_value(response: &BackendResponse) -> Value {
        let headers: BTreeMap<String, Value> = response
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let mut map = BTreeMap::new();
        map.insert("status".to_string(), Value::Int(response.status as i64));
        map.insert("headers".to_string(), Value::Map(headers));
        map.insert("body".to_string(), from_json(&response.body));
        map.insert(
            "pages".to_string(),
            Value::List(response.pages.iter().map(from_json).collect()),
        );
        Value::Map(map)
    }

    /// Converts request-scoped state into the `auth`/`request` activation
    /// values (spec §4.1 RuleEnv).
    fn auth_activation_value(state: &State) -> Value {
        let mut map = BTreeMap::new();
        map.insert("authenticated".to_string(), Value::Bool(state.admission.authenticated));
        map.insert(
            "forwardedFor".to_string(),
            state.admission.forwarded_for.clone().map(Value::String).unwrap_or(Value::Null),
        );
        Value::Map(map)
    }

    fn request_activation_value(state: &State) -> Value {
        let mut map = BTreeMap::new();
        map.insert("method".to_string(), Value::String(state.request.method.clone()));
        map.insert("path".to_string(), Value::String(state.request.path.clone()));
        let headers: BTreeMap<String, Value> = state
            .request
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        map.insert("headers".to_string(), Value::Map(headers));
        let query: BTreeMap<String, Value> = state
            .request
            .query
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        map.insert("query".to_string(), Value::Map(query));
        Value::Map(map)
    }

    fn build_condition_activation(state: &State, local: &BTreeMap<String, Value>, backend: Value) -> Activation {
        let to_map = |m: &std::collections::HashMap<String, String>| -> std::collections::BTreeMap<String, String> {
            m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        Activation::new()
            .with("raw", Value::from(&to_map(&state.raw.headers)))
            .with("admission", Value::Bool(state.admission.authenticated))
            .with("forward", Value::from(&to_map(&state.forward.headers)))
            .with("backend", backend)
            .with("auth", Self::auth_activation_value(state))
            .with("request", Self::request_activation_value(state))
            .with("vars", Value::Map(local.clone()))
            .with("now", Value::String(state.now.to_rfc3339()))
    }

    async fn evaluate_local_variables(
        &self,
        rule: &Definition,
        state: &State,
        backend: &Value,
    ) -> Result<BTreeMap<String, Value>, EvaluationError> {
        let mut local = BTreeMap::new();
        for (name, source) in &rule.local_variables {
            let activation = Self::build_condition_activation(state, &local, backend.clone())
                .with("variables", Value::Map(local.clone()));
            let value = eval_hybrid(source, Environment::Rule, &activation, None)?;
            local.insert(name.clone(), value);
        }
        Ok(local)
    }
}

#[async_trait]
impl Agent for RuleExecutor {
    fn name(&self) -> &'static str {
        "rule_executor"
    }

    async fn execute(&self, _ctx: &PipelineContext, state: &mut State) -> AgentResult {
        if state.rule.is_terminal() {
            return AgentResult::new(self.name(), "halted", "outcome already set upstream");
        }
        let Some(plan) = state.plan.get::<Plan>().cloned() else {
            return AgentResult::new(self.name(), "halted", "no plan to execute");
        };

        for rule in &plan.rules {
            state.rule.executed = true;

            let mut backend_value = Value::Map(BTreeMap::new());
            if let Some(backend) = &rule.backend {
                let activation = Self::build_condition_activation(state, &BTreeMap::new(), backend_value.clone());
                let started = Instant::now();
                let result = self
                    .backend_client
                    .invoke(
                        backend,
                        &state.raw.headers,
                        &state.raw.query,
                        &state.forward.headers,
                        &state.admission.forwarded_credentials,
                        &activation,
                    )
                    .await;
                self.metrics.observe_backend_duration(&rule.name, started.elapsed().as_secs_f64());
                match result {
                    Ok(response) => backend_value = Self::backend_activation_value(&response),
                    Err(e) => {
                        let reason = e.to_string();
                        state.rule.set_outcome(OUTCOME_ERROR, reason.clone());
                        state.rule.history.push(HistoryEntry {
                            rule_name: rule.name.clone(),
                            outcome: OUTCOME_ERROR.to_string(),
                            reason,
                        });
                        warn!(rule = %rule.name, "backend call failed");
                        return AgentResult::new(self.name(), "error", format!("rule '{}' backend failed", rule.name));
                    }
                }
            }

            let local_variables = match self.evaluate_local_variables(rule, state, &backend_value).await {
                Ok(vars) => vars,
                Err(e) => {
                    let reason = e.to_string();
                    state.rule.set_outcome(OUTCOME_ERROR, reason.clone());
                    state.rule.history.push(HistoryEntry {
                        rule_name: rule.name.clone(),
                        outcome: OUTCOME_ERROR.to_string(),
                        reason,
                    });
                    return AgentResult::new(self.name(), "error", format!("rule '{}' variable evaluation failed", rule.name));
                }
            };

            let activation = Self::build_condition_activation(state, &local_variables, backend_value.clone())
                .with("variables", Value::Map(local_variables.clone()));

            let outcome = Self::first_matching_outcome(rule, &activation);
            let Some((class, exports)) = outcome else {
                continue;
            };

            state.rule.set_outcome(class, format!("rule '{}' matched {class}", rule.name));

            for (name, source) in exports {
                match eval_hybrid(source, Environment::Rule, &activation, None) {
                    Ok(value) => {
                        state.rule.variables.exported.insert(name.clone(), value);
                    }
                    Err(e) => warn!(rule = %rule.name, variable = %name, error = %e, "exported variable render failed"),
                }
            }

            let message_program = match class {
                "pass" => &rule.messages.pass,
                "fail" => &rule.messages.fail,
                _ => &rule.messages.error,
            };
            if let Ok(value) = message_program.eval(&activation) {
                state.response.message = value.to_display_string();
            }

            state.rule.history.push(HistoryEntry {
                rule_name: rule.name.clone(),
                outcome: class.to_string(),
                reason: state.rule.reason.clone(),
            });

            info!(rule = %rule.name, outcome = class, "rule chain halted");
            return AgentResult::new(self.name(), "halted", format!("rule '{}' produced outcome {class}", rule.name));
        }

        state.rule.set_outcome(DEFAULT_OUTCOME_PASS, "no rule produced an outcome");
        AgentResult::new(self.name(), "completed", "all rules completed without an outcome")
    }
}

impl RuleExecutor {
    fn first_matching_outcome<'a>(
        rule: &'a Definition,
        activation: &Activation,
    ) -> Option<(&'static str, &'a [(String, String)])> {
        if rule.conditions.error.iter().any(|p| p.eval_bool(activation).unwrap_or(false)) {
            return Some((OUTCOME_ERROR, &rule.exported_variables.error));
        }
        if rule.conditions.fail.iter().any(|p| p.eval_bool(activation).unwrap_or(false)) {
            return Some((OUTCOME_FAIL, &rule.exported_variables.fail));
        }
        if rule.conditions.pass.iter().any(|p| p.eval_bool(activation).unwrap_or(false)) {
            return Some((DEFAULT_OUTCOME_PASS, &rule.exported_variables.pass));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{cel, Compiled};
    use crate::rules::compiled::{ConditionSet, MessageSet, Outcomes, RuleCacheConfig};
    use crate::state::RequestSnapshot;
    use std::collections::HashMap;

    fn bare_rule(name: &str) -> Definition {
        Definition {
            name: name.to_string(),
            description: String::new(),
            backend: None,
            local_variables: vec![],
            conditions: ConditionSet::default(),
            exported_variables: Outcomes::default(),
            messages: MessageSet {
                pass: Compiled::Empty,
                fail: Compiled::Empty,
                error: Compiled::Empty,
            },
            cache: RuleCacheConfig::default(),
        }
    }

    fn sample_state() -> State {
        State::new(RequestSnapshot {
            method: "GET".into(),
            path: "/".into(),
            headers: HashMap::new(),
            query: HashMap::new(),
            remote_addr: "127.0.0.1".into(),
            body: Vec::new(),
        })
    }

    #[tokio::test]
    async fn planner_sets_plan_when_nothing_short_circuits() {
        let planner = RuleChainPlanner::new(vec![Arc::new(bare_rule("r1"))]);
        let mut state = sample_state();
        let result = planner.execute(&PipelineContext::default(), &mut state).await;
        assert_eq!(result.status, "ready");
        assert!(state.plan.is_set());
    }

    #[tokio::test]
    async fn planner_skips_planning_on_cache_hit() {
        let planner = RuleChainPlanner::new(vec![Arc::new(bare_rule("r1"))]);
        let mut state = sample_state();
        state.cache.hit = true;
        let result = planner.execute(&PipelineContext::default(), &mut state).await;
        assert_eq!(result.status, "cached");
        assert!(!state.plan.is_set());
    }

    #[tokio::test]
    async fn executor_defaults_to_pass_when_no_rule_matches() {
        let executor = RuleExecutor::new(BackendClient::default(), Arc::new(Metrics::new()));
        let mut state = sample_state();
        state.plan.set(Plan {
            rules: vec![Arc::new(bare_rule("r1"))],
        });
        let result = executor.execute(&PipelineContext::default(), &mut state).await;
        assert_eq!(result.status, "completed");
        assert_eq!(state.rule.outcome, DEFAULT_OUTCOME_PASS);
    }

    #[tokio::test]
    async fn executor_halts_on_first_matching_condition() {
        let mut rule = bare_rule("deny-rule");
        rule.conditions.fail = vec![cel::Program::compile("true", crate::expr::Environment::Condition).unwrap()];
        let executor = RuleExecutor::new(BackendClient::default(), Arc::new(Metrics::new()));
        let mut state = sample_state();
        state.plan.set(Plan {
            rules: vec![Arc::new(rule)],
        });
        let result = executor.execute(&PipelineContext::default(), &mut state).await;
        assert_eq!(result.status, "halted");
        assert_eq!(state.rule.outcome, OUTCOME_FAIL);
    }

    #[tokio::test]
    async fn executor_is_a_no_op_when_outcome_already_terminal() {
        let executor = RuleExecutor::new(BackendClient::default(), Arc::new(Metrics::new()));
        let mut state = sample_state();
        state.rule.set_outcome(OUTCOME_FAIL, "admission rejected request");
        let result = executor.execute(&PipelineContext::default(), &mut state).await;
        assert_eq!(result.status, "halted");
        assert_eq!(state.rule.outcome, OUTCOME_FAIL);
    }

    #[tokio::test]
    async fn executor_exposes_backend_body_to_rule_condition() {
        use crate::backend::{BackendDefinition, LiteralOrTemplate};

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/check")
            .with_status(200)
            .with_body(r#"{"allowed":true}"#)
            .create_async()
            .await;

        let mut rule = bare_rule("backend-rule");
        rule.backend = Some(BackendDefinition {
            url: LiteralOrTemplate::Literal(format!("{}/check", server.url())),
            method: "GET".to_string(),
            headers: HashMap::new(),
            query: HashMap::new(),
            body: None,
            accepted_status: vec![],
            pagination: None,
            forward_proxy_headers: false,
            timeout: crate::backend::default_timeout(),
        });
        rule.conditions.fail =
            vec![cel::Program::compile("backend.body.allowed", crate::expr::Environment::Condition).unwrap()];

        let executor = RuleExecutor::new(BackendClient::default(), Arc::new(Metrics::new()));
        let mut state = sample_state();
        state.plan.set(Plan {
            rules: vec![Arc::new(rule)],
        });
        let result = executor.execute(&PipelineContext::default(), &mut state).await;
        assert_eq!(result.status, "halted");
        assert_eq!(state.rule.outcome, OUTCOME_FAIL);
    }
}
