//! CEL-like boolean/arithmetic/string expression dialect (spec §4.1).
//!
//! Wraps the `cel` crate (`cel-interpreter`). Only this module speaks the
//! external crate's `cel::Value`/`cel::Context` types; everything else in the
//! codebase uses the crate-local [`super::Value`]/[`super::Activation`].

use std::collections::HashMap;
use std::sync::Arc;

use cel::objects::{Key, Map as CelMap};
use cel::{Context, Value as CelValue};

use crate::error::EvaluationError;

use super::{to_json, Activation, Environment, Value};

/// A compiled expression. `env` is kept only for error messages; the
/// underlying program does not enforce which variables are referenced.
#[derive(Debug)]
pub struct Program {
    source: String,
    env: Environment,
    inner: cel::Program,
}

impl Program {
    pub fn compile(source: &str, env: Environment) -> Result<Self, String> {
        let inner = cel::Program::compile(source).map_err(|e| e.to_string())?;
        Ok(Program {
            source: source.to_string(),
            env,
            inner,
        })
    }

    pub fn eval(&self, activation: &Activation) -> Result<Value, EvaluationError> {
        let ctx = build_context(activation);
        let result = self
            .inner
            .execute(&ctx)
            .map_err(|cause| EvaluationError::Expression {
                source_text: self.source.clone(),
                cause: cause.to_string(),
            })?;
        from_cel_value(result, &self.source)
    }

    /// Evaluate and require a boolean result, per spec §4.3 ("rule conditions
    /// must evaluate to a boolean; any other result or any evaluation error
    /// is a compile-or-runtime error").
    pub fn eval_bool(&self, activation: &Activation) -> Result<bool, EvaluationError> {
        match self.eval(activation)? {
            Value::Bool(b) => Ok(b),
            _ => Err(EvaluationError::NotBoolean {
                source_text: self.source.clone(),
            }),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn environment(&self) -> Environment {
        self.env
    }
}

fn build_context(activation: &Activation) -> Context<'static> {
    let mut ctx = Context::default();
    register_builtins(&mut ctx);
    for (name, value) in activation.iter() {
        let json = to_json(value);
        match cel::to_value(json) {
            Ok(cel_value) => ctx.add_variable_from_value(name.as_str(), cel_value),
            Err(_) => ctx.add_variable_from_value(name.as_str(), CelValue::Null),
        }
    }
    ctx
}

/// Registers the `lookup(m, key)` builtin required by spec §4.1: reads an
/// arbitrary key out of a map value, returning the null sentinel (rather
/// than erroring) when the key is absent.
fn register_builtins(ctx: &mut Context<'static>) {
    let _ = ctx.add_function("lookup", lookup_builtin);
}

fn lookup_builtin(m: CelValue, key: CelValue) -> Result<CelValue, cel::ExecutionError> {
    let map = match m {
        CelValue::Map(map) => map,
        _ => return Ok(CelValue::Null),
    };
    let lookup_key = match key_from_value(&key) {
        Some(k) => k,
        None => return Ok(CelValue::Null),
    };
    Ok(map.map.get(&lookup_key).cloned().unwrap_or(CelValue::Null))
}

fn key_from_value(value: &CelValue) -> Option<Key> {
    match value {
        CelValue::String(s) => Some(Key::String(s.clone())),
        CelValue::Int(i) => Some(Key::Int(*i)),
        CelValue::UInt(u) => Some(Key::Uint(*u)),
        CelValue::Bool(b) => Some(Key::Bool(*b)),
        _ => None,
    }
}

fn from_cel_value(value: CelValue, source_text: &str) -> Result<Value, EvaluationError> {
    match value {
        CelValue::Null => Ok(Value::Null),
        CelValue::Bool(b) => Ok(Value::Bool(b)),
        CelValue::Int(i) => Ok(Value::Int(i)),
        CelValue::UInt(u) => Ok(Value::Int(i64::try_from(u).unwrap_or(i64::MAX))),
        CelValue::Float(f) => Ok(Value::Float(f)),
        CelValue::String(s) => Ok(Value::String(s.to_string())),
        CelValue::List(items) => {
            let converted = items
                .iter()
                .cloned()
                .map(|v| from_cel_value(v, source_text))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::List(converted))
        }
        CelValue::Map(map) => map_from_cel(&map, source_text).map(Value::Map),
        other => Err(EvaluationError::Expression {
            source_text: source_text.to_string(),
            cause: format!("unsupported expression result type: {:?}", other),
        }),
    }
}

fn map_from_cel(
    map: &CelMap,
    source_text: &str,
) -> Result<std::collections::BTreeMap<String, Value>, EvaluationError> {
    let mut out = std::collections::BTreeMap::new();
    for (key, value) in map.map.iter() {
        let key_str = match key {
            Key::String(s) => s.to_string(),
            Key::Int(i) => i.to_string(),
            Key::Uint(u) => u.to_string(),
            Key::Bool(b) => b.to_string(),
        };
        out.insert(key_str, from_cel_value(value.clone(), source_text)?);
    }
    Ok(out)
}

/// Used by callers that need to build a `cel::Context` map value directly
/// (e.g. constructing the `raw`/`admission`/`backend` structured variables
/// from a `HashMap<String, String>` without a JSON round trip).
pub fn map_value_from_strings(entries: &HashMap<String, String>) -> CelValue {
    let mut map = std::collections::HashMap::new();
    for (k, v) in entries {
        map.insert(Key::String(Arc::new(k.clone())), CelValue::String(Arc::new(v.clone())));
    }
    CelValue::Map(CelMap { map: Arc::new(map) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_and_evaluates_boolean_expression() {
        let program = Program::compile("1 + 1 == 2", Environment::Condition).unwrap();
        let activation = Activation::new();
        assert!(program.eval_bool(&activation).unwrap());
    }

    #[test]
    fn reads_variables_from_activation() {
        let program = Program::compile("vars.x == 5", Environment::Condition).unwrap();
        let activation = Activation::new().with(
            "vars",
            Value::Map(std::collections::BTreeMap::from([("x".to_string(), Value::Int(5))])),
        );
        assert!(program.eval_bool(&activation).unwrap());
    }

    #[test]
    fn non_boolean_result_is_rejected_by_eval_bool() {
        let program = Program::compile("1 + 1", Environment::Condition).unwrap();
        let activation = Activation::new();
        assert!(program.eval_bool(&activation).is_err());
    }

    #[test]
    fn lookup_returns_null_for_missing_key() {
        let program = Program::compile("lookup(vars, \"missing\") == null", Environment::Rule).unwrap();
        let activation = Activation::new().with(
            "vars",
            Value::Map(std::collections::BTreeMap::from([(
                "present".to_string(),
                Value::Int(1),
            )])),
        );
        assert!(program.eval_bool(&activation).unwrap());
    }

    #[test]
    fn lookup_returns_value_for_present_key() {
        let program = Program::compile("lookup(vars, \"present\") == 1", Environment::Rule).unwrap();
        let activation = Activation::new().with(
            "vars",
            Value::Map(std::collections::BTreeMap::from([(
                "present".to_string(),
                Value::Int(1),
            )])),
        );
        assert!(program.eval_bool(&activation).unwrap());
    }
}
