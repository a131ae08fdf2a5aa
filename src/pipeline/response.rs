//! Final response assembly (spec §2 stage 6).
//!
//! The rule contract forbids rules from setting `status`/`body`/`bodyFile`
//! directly (spec §4.3 step 7), so the HTTP status a caller sees is derived
//! here from the decision outcome rather than configured per rule. Exported
//! variables are surfaced to the caller as `x-passctrl-<name>` response
//! headers; this naming and the outcome-to-status mapping are design
//! decisions recorded in DESIGN.md, not literal spec text.

use async_trait::async_trait;

use crate::constants::{DEFAULT_OUTCOME_PASS, OUTCOME_ERROR, OUTCOME_FAIL};
use crate::pipeline::{Agent, AgentResult, PipelineContext};
use crate::state::State;

const STATUS_PASS: u16 = 200;
const STATUS_FAIL: u16 = 403;
const STATUS_ERROR: u16 = 502;
const HEADER_PREFIX: &str = "x-passctrl-";

pub struct ResponseBuilder;

impl ResponseBuilder {
    fn status_for(outcome: &str) -> u16 {
        match outcome {
            DEFAULT_OUTCOME_PASS => STATUS_PASS,
            OUTCOME_FAIL => STATUS_FAIL,
            OUTCOME_ERROR => STATUS_ERROR,
            _ => STATUS_ERROR,
        }
    }
}

#[async_trait]
impl Agent for ResponseBuilder {
    fn name(&self) -> &'static str {
        "response_builder"
    }

    async fn execute(&self, _ctx: &PipelineContext, state: &mut State) -> AgentResult {
        if state.cache.hit {
            return AgentResult::new(self.name(), "from_cache", "response already populated from cache entry");
        }

        let outcome = if state.rule.outcome.is_empty() {
            DEFAULT_OUTCOME_PASS
        } else {
            state.rule.outcome.as_str()
        };
        state.response.status = Self::status_for(outcome);

        for (name, value) in &state.rule.variables.exported {
            let header_name = format!("{HEADER_PREFIX}{name}");
            state.response.headers.insert(header_name, value.to_display_string());
        }

        AgentResult::new(self.name(), "built", format!("status {} for outcome '{outcome}'", state.response.status))
    }
}
