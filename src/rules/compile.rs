//! Rule compilation pipeline (spec §4.3).

use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::backend::{BackendDefinition, FieldValue, LiteralOrTemplate, PaginationConfig, PaginationKind};
use crate::constants::DEFAULT_BACKEND_TIMEOUT_SECS;
use crate::error::ConfigError;
use crate::expr::{cel, compile_hybrid, Environment};
use crate::sandbox::Sandbox;

use super::compiled::{ConditionSet, Definition, MessageSet, Outcomes, RuleCacheConfig};
use super::spec::{BackendSpec, ConditionsSpec, DefinitionSpec};

fn variable_reference_pattern() -> Regex {
    Regex::new(r"variables\.([A-Za-z_][A-Za-z0-9_]*)").expect("static pattern")
}

/// Compiles every rule in `specs`, filtering out entries with empty names
/// (spec §4.3 step 1) and rejecting duplicate names among the rest.
pub fn compile_all(
    specs: &[DefinitionSpec],
    sandbox: Option<&Sandbox>,
) -> Result<Vec<Definition>, ConfigError> {
    let mut seen = HashSet::new();
    let mut compiled = Vec::new();
    for spec in specs {
        let name = spec.name.trim();
        if name.is_empty() {
            continue;
        }
        if !seen.insert(name.to_string()) {
            return Err(ConfigError::DuplicateRuleName(name.to_string()));
        }
        compiled.push(compile_one(spec, sandbox)?);
    }
    Ok(compiled)
}

fn compile_one(spec: &DefinitionSpec, sandbox: Option<&Sandbox>) -> Result<Definition, ConfigError> {
    let name = spec.name.trim().to_string();

    reject_forbidden_response_fields(&name, spec)?;

    let conditions = compile_conditions(&name, &spec.conditions)?;
    let backend = spec
        .backend
        .as_ref()
        .map(|b| compile_backend(&name, b, sandbox))
        .transpose()?;

    let messages = MessageSet {
        pass: compile_message(&name, "pass", &spec.response.pass, sandbox)?,
        fail: compile_message(&name, "fail", &spec.response.fail, sandbox)?,
        error: compile_message(&name, "error", &spec.response.error, sandbox)?,
    };

    let local_variables = compile_local_variables(&name, spec)?;

    let exported_variables = Outcomes {
        pass: trim_variable_sources(&spec.export.pass),
        fail: trim_variable_sources(&spec.export.fail),
        error: trim_variable_sources(&spec.export.error),
    };

    Ok(Definition {
        name,
        description: spec.description.trim().to_string(),
        backend,
        local_variables,
        conditions,
        exported_variables,
        messages,
        cache: RuleCacheConfig {
            pass_ttl_secs: spec.cache.pass_ttl_secs,
            fail_ttl_secs: spec.cache.fail_ttl_secs,
            follow_cache_control: spec.cache.follow_cache_control,
        },
    })
}

fn reject_forbidden_response_fields(rule: &str, spec: &DefinitionSpec) -> Result<(), ConfigError> {
    if spec.response.status.is_some() {
        return Err(ConfigError::ForbiddenResponseField {
            rule: rule.to_string(),
            field: "status".to_string(),
        });
    }
    if spec.response.body.is_some() {
        return Err(ConfigError::ForbiddenResponseField {
            rule: rule.to_string(),
            field: "body".to_string(),
        });
    }
    if spec.response.body_file.is_some() {
        return Err(ConfigError::ForbiddenResponseField {
            rule: rule.to_string(),
            field: "bodyFile".to_string(),
        });
    }
    Ok(())
}

fn compile_conditions(rule: &str, spec: &ConditionsSpec) -> Result<ConditionSet, ConfigError> {
    Ok(ConditionSet {
        error: compile_condition_list(rule, "error", &spec.error)?,
        fail: compile_condition_list(rule, "fail", &spec.fail)?,
        pass: compile_condition_list(rule, "pass", &spec.pass)?,
    })
}

fn compile_condition_list(
    rule: &str,
    class: &str,
    sources: &[String],
) -> Result<Vec<cel::Program>, ConfigError> {
    let mut programs = Vec::new();
    for source in sources {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            continue;
        }
        let program = cel::Program::compile(trimmed, Environment::Condition).map_err(|cause| {
            ConfigError::ExpressionCompile {
                rule: rule.to_string(),
                field: format!("conditions.{class}"),
                source_text: trimmed.to_string(),
                cause,
            }
        })?;
        programs.push(program);
    }
    Ok(programs)
}

fn compile_message(
    rule: &str,
    outcome: &str,
    source: &str,
    sandbox: Option<&Sandbox>,
) -> Result<crate::expr::Compiled, ConfigError> {
    compile_hybrid(source, Environment::Rule, sandbox).map_err(|e| match e {
        ConfigError::TemplateCompile { cause, .. } => ConfigError::TemplateCompile {
            rule: rule.to_string(),
            field: format!("response.{outcome}"),
            cause,
        },
        ConfigError::ExpressionCompile { source_text, cause, .. } => ConfigError::ExpressionCompile {
            rule: rule.to_string(),
            field: format!("response.{outcome}"),
            source_text,
            cause,
        },
        other => other,
    })
}

fn trim_variable_sources(specs: &[super::spec::VariableSpec]) -> Vec<(String, String)> {
    specs
        .iter()
        .filter(|v| !v.name.trim().is_empty())
        .map(|v| (v.name.trim().to_string(), v.value.trim().to_string()))
        .collect()
}

/// Evaluates rule-local variables in lexical (sorted) order and rejects a
/// forward/self reference to `variables.<name>` as a compile-time error
/// (spec §9 open question, resolved in SPEC_FULL.md).
fn compile_local_variables(
    rule: &str,
    spec: &DefinitionSpec,
) -> Result<Vec<(String, String)>, ConfigError> {
    let mut entries = trim_variable_sources(&spec.variables);
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let names: HashMap<&str, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (name.as_str(), i))
        .collect();
    let pattern = variable_reference_pattern();

    for (i, (name, source)) in entries.iter().enumerate() {
        for captures in pattern.captures_iter(source) {
            let referenced = &captures[1];
            if let Some(&pos) = names.get(referenced) {
                if pos >= i {
                    return Err(ConfigError::VariableCycle {
                        rule: rule.to_string(),
                        name: name.clone(),
                    });
                }
            }
        }
    }

    Ok(entries)
}

fn compile_backend(
    rule: &str,
    spec: &BackendSpec,
    sandbox: Option<&Sandbox>,
) -> Result<BackendDefinition, ConfigError> {
    let url = LiteralOrTemplate::compile(spec.url.trim(), sandbox).map_err(|cause| {
        ConfigError::TemplateCompile {
            rule: rule.to_string(),
            field: "backend.url".to_string(),
            cause,
        }
    })?;

    let mut headers = HashMap::new();
    for (name, value) in &spec.headers {
        let field = FieldValue::compile(value.as_deref(), sandbox).map_err(|cause| {
            ConfigError::TemplateCompile {
                rule: rule.to_string(),
                field: format!("backend.headers.{name}"),
                cause,
            }
        })?;
        headers.insert(name.to_ascii_lowercase(), field);
    }

    let mut query = HashMap::new();
    for (name, value) in &spec.query {
        let field = FieldValue::compile(value.as_deref(), sandbox).map_err(|cause| {
            ConfigError::TemplateCompile {
                rule: rule.to_string(),
                field: format!("backend.query.{name}"),
                cause,
            }
        })?;
        query.insert(name.clone(), field);
    }

    let body = match (&spec.body, &spec.body_file) {
        (Some(b), _) => Some(LiteralOrTemplate::compile(b, sandbox).map_err(|cause| {
            ConfigError::TemplateCompile {
                rule: rule.to_string(),
                field: "backend.body".to_string(),
                cause,
            }
        })?),
        (None, Some(path)) => Some(LiteralOrTemplate::compile_file(path, sandbox).map_err(|cause| {
            ConfigError::TemplateCompile {
                rule: rule.to_string(),
                field: "backend.bodyFile".to_string(),
                cause,
            }
        })?),
        (None, None) => None,
    };

    let pagination = spec.pagination.as_ref().map(|p| PaginationConfig {
        kind: match p.kind.as_str() {
            "link" => PaginationKind::Link,
            other => {
                tracing::warn!(kind = other, "unknown pagination type, defaulting to link");
                PaginationKind::Link
            }
        },
        max_pages: p.max_pages,
    });

    Ok(BackendDefinition {
        url,
        method: if spec.method.trim().is_empty() {
            "GET".to_string()
        } else {
            spec.method.trim().to_uppercase()
        },
        headers,
        query,
        body,
        accepted_status: spec.accepted_status.clone(),
        pagination,
        forward_proxy_headers: spec.forward_proxy_headers,
        timeout: std::time::Duration::from_secs(
            spec.timeout_secs.unwrap_or(DEFAULT_BACKEND_TIMEOUT_SECS),
        ),
    })
}
