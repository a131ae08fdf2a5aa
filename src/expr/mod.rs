//! Expression and template engine (spec §4.1).
//!
//! Rule conditions, exported variables, and backend/forward field values are
//! all driven by one of two dialects: a CEL-like expression language
//! ([`cel`]) and a text template language ([`template`]). A *hybrid*
//! evaluator dispatches between the two based on whether the configured
//! source string contains `{{` — see [`compile_hybrid`] and [`eval_hybrid`].

pub mod cel;
pub mod template;

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ConfigError, EvaluationError};
use crate::sandbox::Sandbox;

/// The dynamically typed value produced by evaluating an expression or
/// rendering a template. Aggregate literals (`List`/`Map`) are required by
/// spec §4.1 to be homogeneous; that constraint is enforced at expression
/// compile time, not by this type itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The null sentinel returned by `lookup` on a missing key. Compares
    /// unequal to every non-null value, including itself under `==` is still
    /// true (it is a value, not a NaN); `lookup` callers use it to detect
    /// absence via e.g. `lookup(m, "k") == "expected"`.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Render the value the way a template interpolation would: scalars as
    /// their natural text form, aggregates as empty (templates interpolate
    /// scalar leaves, not whole maps/lists).
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::List(_) | Value::Map(_) => String::new(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<BTreeMap<String, String>> for Value {
    fn from(m: BTreeMap<String, String>) -> Self {
        Value::Map(m.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
    }
}

impl From<&BTreeMap<String, String>> for Value {
    fn from(m: &BTreeMap<String, String>) -> Self {
        Value::Map(
            m.iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }
}

/// Converts a `serde_json::Value` (a backend response body, typically) into
/// this crate's [`Value`], the inverse of [`to_json`].
pub fn from_json(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(from_json).collect()),
        serde_json::Value::Object(map) => {
            Value::Map(map.iter().map(|(k, v)| (k.clone(), from_json(v))).collect())
        }
    }
}

/// Converts a [`Value`] to `serde_json::Value` for feeding the template
/// engine's rendering context, which is JSON-shaped.
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Map(m) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in m {
                obj.insert(k.clone(), to_json(v));
            }
            serde_json::Value::Object(obj)
        }
    }
}

/// Which set of built-in variables an expression/template was compiled
/// against (spec §4.1). Purely documentary at runtime: the activation
/// supplied to `eval`/`render` simply carries whatever variables the caller
/// populates, but callers should only populate the set matching this tag so
/// compiled programs stay meaningful for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// `raw`, `admission`, `forward`, `backend`, `vars`, `now` — rule
    /// condition expressions.
    Condition,
    /// `request` — endpoint-scoped variable compilation.
    Request,
    /// `backend`, `auth`, `vars`, `request`, `variables` — rule-local
    /// variables, which may reference earlier rule-local variables.
    Rule,
}

/// A named bag of variables supplied to expression/template evaluation.
/// Insertion order is irrelevant; lookups are by name.
#[derive(Debug, Clone, Default)]
pub struct Activation {
    vars: BTreeMap<String, Value>,
}

impl Activation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.vars.insert(name.to_string(), value);
        self
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }
}

/// A compiled hybrid program: either a CEL-like expression or a template,
/// chosen at compile time by the presence of `{{` in the source (spec
/// §4.1's "Hybrid evaluator"). `Empty` is returned for blank input.
#[derive(Debug)]
pub enum Compiled {
    Expression(cel::Program),
    Template(template::Template),
    Empty,
}

impl Compiled {
    pub fn eval(&self, activation: &Activation) -> Result<Value, EvaluationError> {
        match self {
            Compiled::Empty => Ok(Value::String(String::new())),
            Compiled::Expression(program) => program.eval(activation),
            Compiled::Template(tpl) => tpl
                .render(activation)
                .map(Value::String)
                .map_err(|cause| EvaluationError::TemplateRender { cause }),
        }
    }
}

/// Compile a configured source string once, choosing the expression or
/// template dialect. Used for backend header/query/body values and outcome
/// message templates, which are compiled at rule-compile time (spec §4.3).
pub fn compile_hybrid(
    source: &str,
    env: Environment,
    sandbox: Option<&Sandbox>,
) -> Result<Compiled, ConfigError> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Ok(Compiled::Empty);
    }
    if trimmed.contains("{{") {
        let tpl = template::Template::compile_inline(trimmed, sandbox)
            .map_err(|e| ConfigError::TemplateCompile {
                rule: String::new(),
                field: String::new(),
                cause: e,
            })?;
        Ok(Compiled::Template(tpl))
    } else {
        let program = cel::Program::compile(trimmed, env).map_err(|e| ConfigError::ExpressionCompile {
            rule: String::new(),
            field: String::new(),
            source_text: trimmed.to_string(),
            cause: e,
        })?;
        Ok(Compiled::Expression(program))
    }
}

/// Hybrid-evaluate a source string against an activation without
/// precompiling it. Used for rule-local and exported variables (spec
/// §4.3 step 6: "stored as source strings... hybrid, dispatched
/// per-invocation").
pub fn eval_hybrid(
    source: &str,
    env: Environment,
    activation: &Activation,
    sandbox: Option<&Sandbox>,
) -> Result<Value, EvaluationError> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Ok(Value::String(String::new()));
    }
    if trimmed.contains("{{") {
        let tpl = template::Template::compile_inline(trimmed, sandbox)
            .map_err(|cause| EvaluationError::TemplateRender { cause })?;
        tpl.render(activation)
            .map(Value::String)
            .map_err(|cause| EvaluationError::TemplateRender { cause })
    } else {
        let program = cel::Program::compile(trimmed, env).map_err(|cause| {
            EvaluationError::Expression {
                source_text: trimmed.to_string(),
                cause,
            }
        })?;
        program.eval(activation)
    }
}
