//! Centralized error types for the gateway.
//!
//! Errors are scoped per spec §7: a per-rule error aborts that rule only and
//! becomes the rule's `error` outcome. Nothing in this crate panics on
//! malformed input; compilation failures are the only errors that abort a
//! whole run (they happen at configuration load, before any request flows).

use thiserror::Error;

/// Failures raised while compiling configuration into runtime rules,
/// programs, templates, or a sandbox. These are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("rule '{rule}': failed to compile {field} expression '{source_text}': {cause}")]
    ExpressionCompile {
        rule: String,
        field: String,
        source_text: String,
        cause: String,
    },

    #[error("rule '{rule}': failed to compile {field} template: {cause}")]
    TemplateCompile {
        rule: String,
        field: String,
        cause: String,
    },

    #[error("rule '{rule}': response field '{field}' is not permitted; status/body/bodyFile were removed from the contract")]
    ForbiddenResponseField { rule: String, field: String },

    #[error("rule '{rule}': variable '{name}' participates in a dependency cycle")]
    VariableCycle { rule: String, name: String },

    #[error("sandbox root '{path}' does not exist or is not a directory")]
    InvalidSandboxRoot { path: String },

    #[error("duplicate rule name '{0}'")]
    DuplicateRuleName(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors surfaced while invoking a rule's backend endpoint.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend request to '{url}' failed: {cause}")]
    Request { url: String, cause: String },

    #[error("backend '{url}' returned unaccepted status {status}")]
    UnacceptedStatus { url: String, status: u16 },

    #[error("backend request to '{url}' timed out or was cancelled")]
    Cancelled { url: String },
}

/// Errors surfaced while evaluating an expression or template against live
/// request state.
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("expression '{source_text}' failed to evaluate: {cause}")]
    Expression { source_text: String, cause: String },

    #[error("expression '{source_text}' did not yield a boolean")]
    NotBoolean { source_text: String },

    #[error("template render failed: {cause}")]
    TemplateRender { cause: String },

    #[error("path '{path}' escapes sandbox root '{root}'")]
    SandboxEscape { path: String, root: String },
}

impl From<EvaluationError> for String {
    fn from(e: EvaluationError) -> Self {
        e.to_string()
    }
}

/// Cache-layer errors. Per spec §7 these are always logged and never change
/// a decision: lookup failures degrade to a miss, store failures leave the
/// state uncached.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache entry serialization failed: {0}")]
    Serialization(String),
}

/// Top-level aggregate used at crate boundaries (pipeline runner, CLI).
#[derive(Error, Debug)]
pub enum PassCtrlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("admission rejected request: {0}")]
    Admission(String),
}
