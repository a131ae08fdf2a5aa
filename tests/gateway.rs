//! End-to-end pipeline scenarios built from real [`GatewayConfig`] YAML,
//! run through [`PipelineRunner`] the way a caller would.

use std::collections::HashMap;
use std::sync::Arc;

use passctrl::backend::BackendClient;
use passctrl::cache::memory::MemoryCache;
use passctrl::cache::Cache;
use passctrl::config::GatewayConfig;
use passctrl::metrics::Metrics;
use passctrl::pipeline::{PipelineContext, PipelineRunner};
use passctrl::state::{RequestSnapshot, State};

fn request(headers: &[(&str, &str)]) -> State {
    let headers: HashMap<String, String> =
        headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    State::new(RequestSnapshot {
        method: "GET".to_string(),
        path: "/orders".to_string(),
        headers,
        query: HashMap::new(),
        remote_addr: "127.0.0.1".to_string(),
        body: Vec::new(),
    })
}

fn build_runner(yaml: &str, cache: Arc<dyn Cache>) -> PipelineRunner {
    let config = GatewayConfig::from_yaml_with_env(yaml).expect("valid yaml");
    let compiled = config.compile().expect("valid configuration");
    PipelineRunner::new(
        compiled.directives,
        compiled.rules,
        cache,
        compiled.ttl_policy,
        BackendClient::default(),
        Arc::new(Metrics::new()),
    )
}

const DENY_VIA_HEADER_YAML: &str = r#"
endpoint_id: "orders-api"
admission:
  - matchers:
      - type: header
        name: x-api-key
        value: ["secret"]
rules:
  - name: "allow-all"
    conditions:
      pass: ["true"]
"#;

#[tokio::test]
async fn missing_credential_is_denied_with_403() {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::default());
    let runner = build_runner(DENY_VIA_HEADER_YAML, cache);
    let mut state = request(&[]);
    let results = runner.run(&PipelineContext::default(), &mut state).await;

    assert_eq!(results[0].status, "rejected");
    assert_eq!(state.rule.outcome, "fail");
    assert_eq!(state.response.status, 403);
}

#[tokio::test]
async fn matching_credential_is_allowed_with_200() {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::default());
    let runner = build_runner(DENY_VIA_HEADER_YAML, cache);
    let mut state = request(&[("x-api-key", "secret")]);
    let results = runner.run(&PipelineContext::default(), &mut state).await;

    assert_eq!(results[0].status, "allowed");
    assert_eq!(state.rule.outcome, "pass");
    assert_eq!(state.response.status, 200);
}

const EXPORT_VARIABLE_YAML: &str = r#"
endpoint_id: "orders-api"
rules:
  - name: "tag-region"
    variables:
      - name: "region"
        value: "'us-east'"
    conditions:
      pass: ["true"]
    export:
      pass:
        - name: "region"
          value: "variables.region"
"#;

#[tokio::test]
async fn exported_variable_surfaces_as_prefixed_response_header() {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::default());
    let runner = build_runner(EXPORT_VARIABLE_YAML, cache);
    let mut state = request(&[]);
    runner.run(&PipelineContext::default(), &mut state).await;

    assert_eq!(state.response.status, 200);
    assert_eq!(state.response.headers.get("x-passctrl-region"), Some(&"us-east".to_string()));
}

const CACHEABLE_YAML: &str = r#"
endpoint_id: "orders-api"
cache:
  pass_ttl_secs: 60
rules:
  - name: "allow-all"
    conditions:
      pass: ["true"]
"#;

#[tokio::test]
async fn second_request_is_served_from_cache() {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::default());
    let runner = build_runner(CACHEABLE_YAML, cache.clone());

    let mut first = request(&[]);
    let first_results = runner.run(&PipelineContext::default(), &mut first).await;
    assert_eq!(first_results[1].status, "miss");
    assert_eq!(first_results[4].status, "stored");
    assert_eq!(cache.size().await, 1);

    let mut second = request(&[]);
    let second_results = runner.run(&PipelineContext::default(), &mut second).await;
    assert_eq!(second_results[1].status, "hit");
    assert_eq!(second_results[2].status, "cached");
    assert_eq!(second_results[4].status, "hit");
    assert_eq!(second.response.status, 200);
    assert_eq!(cache.size().await, 1);
}

const ERROR_BACKEND_YAML: &str = r#"
endpoint_id: "orders-api"
rules:
  - name: "call-unreachable-backend"
    backend:
      url: "http://127.0.0.1:1/unreachable"
    conditions:
      pass: ["true"]
"#;

#[tokio::test]
async fn error_outcome_is_never_cached() {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::default());
    let runner = build_runner(ERROR_BACKEND_YAML, cache.clone());
    let mut state = request(&[]);
    let results = runner.run(&PipelineContext::default(), &mut state).await;

    assert_eq!(state.rule.outcome, "error");
    assert_eq!(state.response.status, 502);
    assert_eq!(results[4].status, "bypassed");
    assert_eq!(cache.size().await, 0);
}

const NO_ADMISSION_YAML: &str = r#"
endpoint_id: "orders-api"
rules: []
"#;

#[tokio::test]
async fn no_rules_defaults_to_pass() {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::default());
    let runner = build_runner(NO_ADMISSION_YAML, cache);
    let mut state = request(&[]);
    runner.run(&PipelineContext::default(), &mut state).await;

    assert_eq!(state.rule.outcome, "pass");
    assert_eq!(state.response.status, 200);
}
