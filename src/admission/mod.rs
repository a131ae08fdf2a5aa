//! Admission and authentication matching (spec §4.4) plus the `Admission`
//! pipeline agent (spec §2 stage 1).
//!
//! Auth directives are configured once per gateway endpoint rather than per
//! rule: `State.Admission` is chain-scoped (spec §3), so this implementation
//! compiles one directive list shared by the whole rule chain (see
//! DESIGN.md for the rationale).

pub mod directive;

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::constants::ADMISSION_REJECTED_REASON;
use crate::expr::{Activation, Value};
use crate::pipeline::{Agent, AgentResult, PipelineContext};
use crate::state::{AdmissionState, State};

use directive::AuthDirective;

#[derive(Debug, Clone, Default)]
pub struct MatchedCredential {
    pub directive_index: usize,
    pub kind: String,
}

pub struct Admission {
    directives: Vec<AuthDirective>,
}

impl Admission {
    pub fn new(directives: Vec<AuthDirective>) -> Self {
        Admission { directives }
    }

    /// Filters raw headers/query down to what a backend may forward:
    /// everything except the `authorization` header, which carries the
    /// caller's own credential and is never blindly relayed.
    fn build_forward_view(raw_headers: &HashMap<String, String>, raw_query: &HashMap<String, String>) -> (HashMap<String, String>, HashMap<String, String>) {
        let headers = raw_headers
            .iter()
            .filter(|(k, _)| k.as_str() != "authorization")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        (headers, raw_query.clone())
    }

    fn forwarded_for(headers: &HashMap<String, String>) -> Option<String> {
        headers.get("x-forwarded-for").cloned()
    }

    fn forwarded(headers: &HashMap<String, String>) -> Option<String> {
        headers.get("forwarded").cloned()
    }
}

#[async_trait]
impl Agent for Admission {
    fn name(&self) -> &'static str {
        "admission"
    }

    async fn execute(&self, _ctx: &PipelineContext, state: &mut State) -> AgentResult {
        let (forward_headers, forward_query) =
            Self::build_forward_view(&state.raw.headers, &state.raw.query);
        state.forward.headers = forward_headers;
        state.forward.query = forward_query;

        let mut admission = AdmissionState {
            forwarded_for: Self::forwarded_for(&state.raw.headers),
            forwarded: Self::forwarded(&state.raw.headers),
            ..Default::default()
        };

        if self.directives.is_empty() {
            admission.authenticated = true;
            state.admission = admission;
            return AgentResult::new(self.name(), "allowed", "no auth directives configured");
        }

        let mut matched_index = None;
        for (idx, directive) in self.directives.iter().enumerate() {
            if directive.matches(&state.raw, &state.raw.headers) {
                matched_index = Some(idx);
                break;
            }
        }

        let Some(idx) = matched_index else {
            state.admission = admission;
            state
                .rule
                .set_outcome(crate::constants::OUTCOME_FAIL, ADMISSION_REJECTED_REASON);
            warn!(reason = ADMISSION_REJECTED_REASON, "admission rejected request");
            return AgentResult::new(self.name(), "rejected", ADMISSION_REJECTED_REASON);
        };

        admission.authenticated = true;
        admission.matched.push(MatchedCredential {
            directive_index: idx,
            kind: "matched".to_string(),
        });

        let forward_headers: std::collections::BTreeMap<String, String> = state
            .forward
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let activation = Activation::new().with("forward", Value::from(&forward_headers));
        for forward in &self.directives[idx].forwards {
            match forward.render(&activation) {
                Ok(rendered) => admission.forwarded_credentials.push(rendered),
                Err(e) => warn!(error = %e, "forward credential render failed, skipping"),
            }
        }

        state.admission = admission;
        info!(directive = idx, "admission matched directive");
        AgentResult::new(self.name(), "allowed", format!("matched directive {idx}"))
    }
}
