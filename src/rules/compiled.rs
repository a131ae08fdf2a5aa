//! Runtime (compiled) rule representation (spec §3 "Compiled Rule").

use crate::backend::BackendDefinition;
use crate::cache::TtlPolicy as GlobalTtlPolicy;
use crate::expr::{cel, Compiled};

/// Per-outcome-class value, used both for condition program lists and for
/// compiled outcome message templates.
#[derive(Default, Debug)]
pub struct Outcomes<T> {
    pub pass: T,
    pub fail: T,
    pub error: T,
}

pub type ConditionSet = Outcomes<Vec<cel::Program>>;
pub type MessageSet = Outcomes<Compiled>;

/// Rule-scoped cache override: `None` for pass/fail means the gateway
/// default applies (spec §4.7 "DefaultTTL applies when no rule-level TTL is
/// configured").
#[derive(Debug, Clone, Default)]
pub struct RuleCacheConfig {
    pub pass_ttl_secs: Option<u64>,
    pub fail_ttl_secs: Option<u64>,
    pub follow_cache_control: bool,
}

impl RuleCacheConfig {
    pub fn apply(&self, global: &GlobalTtlPolicy) -> GlobalTtlPolicy {
        let mut policy = global.clone();
        if let Some(secs) = self.pass_ttl_secs {
            policy.pass_ttl = std::time::Duration::from_secs(secs);
        }
        if let Some(secs) = self.fail_ttl_secs {
            policy.fail_ttl = std::time::Duration::from_secs(secs);
        }
        policy.follow_cache_control = self.follow_cache_control;
        policy
    }
}

/// A compiled, immutable rule shared read-only across requests (spec §3,
/// §5 "compiled rules... shared read-only").
#[derive(Debug)]
pub struct Definition {
    pub name: String,
    pub description: String,
    pub backend: Option<BackendDefinition>,
    /// Rule-local variable source strings in lexical (sorted) evaluation
    /// order (spec §9 open question resolution).
    pub local_variables: Vec<(String, String)>,
    pub conditions: ConditionSet,
    pub exported_variables: Outcomes<Vec<(String, String)>>,
    pub messages: MessageSet,
    pub cache: RuleCacheConfig,
}
