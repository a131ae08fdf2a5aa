//! Per-request state (spec §3). One [`State`] is created per inbound
//! request, mutated in place by each agent in the pipeline, and discarded
//! after the response is emitted. Nothing here is shared across requests;
//! the only cross-request shared object in the whole crate is the decision
//! cache (see [`crate::cache`]).

use std::any::Any;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::admission::directive::RenderedForward;
use crate::admission::MatchedCredential;

/// Raw or filtered headers/query, always lowercase-keyed, first-value-per-key
/// as received from the transport.
#[derive(Debug, Clone, Default)]
pub struct RawView {
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
}

/// The subset of [`RawView`] a rule's backend is permitted to forward,
/// produced by admission filtering.
pub type ForwardView = RawView;

/// Immutable snapshot of the inbound request, set once before the pipeline
/// runs and never mutated afterward.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub remote_addr: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct AdmissionState {
    pub authenticated: bool,
    pub forwarded_for: Option<String>,
    pub forwarded: Option<String>,
    /// Credentials matched per directive index, in directive declaration
    /// order.
    pub matched: Vec<MatchedCredential>,
    /// Credentials synthesized by the matched directive's forwards, applied
    /// to the rule's backend call (spec §4.4).
    pub forwarded_credentials: Vec<RenderedForward>,
}

#[derive(Debug, Clone, Default)]
pub struct CacheState {
    pub hit: bool,
    pub decision: String,
    pub stored: bool,
    pub fingerprint: Option<String>,
}

/// One entry in a rule's evaluation history (spec §3 `Rule.History`).
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub rule_name: String,
    pub outcome: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct RuleVariables {
    /// Exported variables, visible to subsequent rules and the final
    /// response template. Merged last-writer-wins across rules.
    pub exported: HashMap<String, crate::expr::Value>,
    /// Per-rule scratch variables, discarded once the rule finishes.
    pub local: HashMap<String, crate::expr::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct RuleState {
    pub evaluated_at: Option<DateTime<Utc>>,
    pub should_execute: bool,
    pub executed: bool,
    pub from_cache: bool,
    /// Empty until set by the rule executor; one of `""`, `pass`, `fail`,
    /// `error` once set, and never reverted (spec §3 invariant).
    pub outcome: String,
    pub reason: String,
    pub variables: RuleVariables,
    pub history: Vec<HistoryEntry>,
}

impl RuleState {
    pub fn is_terminal(&self) -> bool {
        !self.outcome.is_empty()
    }

    /// Sets the outcome once. Panics if called twice — this would indicate
    /// a pipeline bug, not a request-input condition, since only the rule
    /// executor ever calls it and only once per halted chain.
    pub fn set_outcome(&mut self, outcome: impl Into<String>, reason: impl Into<String>) {
        assert!(self.outcome.is_empty(), "rule outcome set more than once");
        self.outcome = outcome.into();
        self.reason = reason.into();
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResponseState {
    pub status: u16,
    pub message: String,
    /// Always a fresh map owned by `State`; never the same allocation as a
    /// cache entry's headers (spec §3 invariant).
    pub headers: HashMap<String, String>,
}

/// Opaque handle from the planner agent to the executor agent (spec §9,
/// "State.Plan"). Modeled as a type-erased slot with a typed accessor since
/// the pipeline here is generic over agent ordering rather than specialized.
#[derive(Default)]
pub struct Plan {
    inner: Option<Box<dyn Any + Send + Sync>>,
}

impl Plan {
    pub fn set<T: Any + Send + Sync>(&mut self, value: T) {
        self.inner = Some(Box::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.inner.as_ref().and_then(|b| b.downcast_ref::<T>())
    }

    pub fn is_set(&self) -> bool {
        self.inner.is_some()
    }
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan").field("is_set", &self.is_set()).finish()
    }
}

/// The full per-request mutable record threaded through the agent pipeline.
#[derive(Debug)]
pub struct State {
    pub request: RequestSnapshot,
    pub raw: RawView,
    pub forward: ForwardView,
    pub admission: AdmissionState,
    pub cache: CacheState,
    pub rule: RuleState,
    pub response: ResponseState,
    pub plan: Plan,
    /// Timestamp fixed at rule-chain entry, stable across all rules for one
    /// request (spec §6 "Timekeeping").
    pub now: DateTime<Utc>,
}

impl State {
    pub fn new(request: RequestSnapshot) -> Self {
        let raw = RawView {
            headers: request.headers.clone(),
            query: request.query.clone(),
        };
        State {
            request,
            raw,
            forward: ForwardView::default(),
            admission: AdmissionState::default(),
            cache: CacheState::default(),
            rule: RuleState::default(),
            response: ResponseState::default(),
            plan: Plan::default(),
            now: Utc::now(),
        }
    }
}
