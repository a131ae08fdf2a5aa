//! Gateway configuration: YAML loading (with `${VAR}` environment
//! substitution), validation, and compilation into runtime rules, a
//! sandbox, and a cache TTL policy.
//!
//! Configuration loading/validation sits outside the core decision pipeline
//! per the specification, but the pipeline cannot be assembled without it,
//! so this module follows the teacher's `from_yaml_with_env` convention.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::admission::directive::{AuthDirective, AuthDirectiveSpec};
use crate::cache::{FingerprintConfig, TtlPolicy};
use crate::constants::{
    DEFAULT_FAIL_TTL_SECS, DEFAULT_MAX_CACHE_ENTRIES, DEFAULT_PASS_TTL_SECS, DEFAULT_STRICT_MODE,
};
use crate::error::ConfigError;
use crate::rules::spec::DefinitionSpec;
use crate::rules::{self, Definition};
use crate::sandbox::Sandbox;

fn default_strict_mode() -> bool {
    DEFAULT_STRICT_MODE
}

fn default_pass_ttl() -> u64 {
    DEFAULT_PASS_TTL_SECS
}

fn default_fail_ttl() -> u64 {
    DEFAULT_FAIL_TTL_SECS
}

fn default_max_entries() -> u64 {
    DEFAULT_MAX_CACHE_ENTRIES
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxSpec {
    pub root: String,
    #[serde(default)]
    pub enable_env: bool,
    #[serde(default)]
    pub allow_env: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSpec {
    #[serde(default = "default_pass_ttl")]
    pub pass_ttl_secs: u64,
    #[serde(default = "default_fail_ttl")]
    pub fail_ttl_secs: u64,
    #[serde(default)]
    pub follow_cache_control: bool,
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
    #[serde(default)]
    pub selected_headers: Vec<String>,
    #[serde(default)]
    pub selected_query: Vec<String>,
    #[serde(default = "default_strict_mode")]
    pub strict_mode: bool,
}

impl Default for CacheSpec {
    fn default() -> Self {
        CacheSpec {
            pass_ttl_secs: default_pass_ttl(),
            fail_ttl_secs: default_fail_ttl(),
            follow_cache_control: false,
            max_entries: default_max_entries(),
            selected_headers: Vec::new(),
            selected_query: Vec::new(),
            strict_mode: default_strict_mode(),
        }
    }
}

/// The declarative shape loaded from YAML. `endpoint_id` identifies this
/// gateway endpoint for fingerprinting (spec §4.7); auth directives are
/// configured once here, shared by the whole rule chain (see DESIGN.md).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub endpoint_id: String,
    #[serde(default)]
    pub sandbox: Option<SandboxSpec>,
    #[serde(default)]
    pub admission: Vec<AuthDirectiveSpec>,
    #[serde(default)]
    pub rules: Vec<DefinitionSpec>,
    #[serde(default)]
    pub cache: CacheSpec,
}

impl GatewayConfig {
    /// Loads configuration from a YAML source string, substituting
    /// `${VAR_NAME}` references against the process environment before
    /// parsing.
    pub fn from_yaml_with_env(yaml: &str) -> Result<Self, String> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").map_err(|e| e.to_string())?;

        for caps in re.captures_iter(yaml) {
            let var_name = &caps[1];
            std::env::var(var_name)
                .map_err(|_| format!("environment variable '{var_name}' is referenced but not set"))?;
        }

        let substituted = re.replace_all(yaml, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap()
        });

        serde_yaml::from_str(&substituted).map_err(|e| e.to_string())
    }

    /// Structural validation beyond what rule/directive compilation already
    /// checks: an empty endpoint id breaks fingerprinting, and duplicate
    /// rule names must be caught before compilation reports a less specific
    /// error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint_id.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint_id must not be empty".to_string()));
        }
        let mut seen = HashSet::new();
        for rule in &self.rules {
            let name = rule.name.trim();
            if name.is_empty() {
                continue;
            }
            if !seen.insert(name) {
                return Err(ConfigError::DuplicateRuleName(name.to_string()));
            }
        }
        Ok(())
    }

    pub fn compile(&self) -> Result<CompiledGateway, ConfigError> {
        self.validate()?;

        let sandbox = self
            .sandbox
            .as_ref()
            .map(|s| Sandbox::new(&s.root, s.enable_env, s.allow_env.clone()))
            .transpose()?;

        let directives = self
            .admission
            .iter()
            .map(|d| d.compile(sandbox.as_ref()))
            .collect::<Result<Vec<AuthDirective>, _>>()?;

        let rules = rules::compile::compile_all(&self.rules, sandbox.as_ref())?
            .into_iter()
            .map(Arc::new)
            .collect::<Vec<Arc<Definition>>>();

        let ttl_policy = TtlPolicy {
            fingerprint: FingerprintConfig {
                endpoint_id: self.endpoint_id.clone(),
                selected_headers: self.cache.selected_headers.clone(),
                selected_query: self.cache.selected_query.clone(),
                strict_mode: self.cache.strict_mode,
            },
            pass_ttl: std::time::Duration::from_secs(self.cache.pass_ttl_secs),
            fail_ttl: std::time::Duration::from_secs(self.cache.fail_ttl_secs),
            follow_cache_control: self.cache.follow_cache_control,
            default_ttl: std::time::Duration::from_secs(default_pass_ttl()),
        };

        Ok(CompiledGateway {
            sandbox,
            directives,
            rules,
            ttl_policy,
            max_cache_entries: self.cache.max_entries,
        })
    }
}

/// The runtime artifacts produced by compiling a [`GatewayConfig`], ready to
/// be handed to a [`crate::pipeline::PipelineRunner`].
pub struct CompiledGateway {
    pub sandbox: Option<Sandbox>,
    pub directives: Vec<AuthDirective>,
    pub rules: Vec<Arc<Definition>>,
    pub ttl_policy: TtlPolicy,
    pub max_cache_entries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
endpoint_id: "orders-api"
rules:
  - name: "allow-all"
    conditions:
      pass: ["true"]
"#
    }

    #[test]
    fn loads_minimal_config() {
        let config = GatewayConfig::from_yaml_with_env(minimal_yaml()).unwrap();
        assert_eq!(config.endpoint_id, "orders-api");
        assert_eq!(config.rules.len(), 1);
    }

    #[test]
    fn validate_rejects_empty_endpoint_id() {
        let config = GatewayConfig {
            endpoint_id: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_rule_names() {
        let mut config = GatewayConfig {
            endpoint_id: "ep".to_string(),
            ..Default::default()
        };
        config.rules.push(DefinitionSpec {
            name: "dup".to_string(),
            ..Default::default()
        });
        config.rules.push(DefinitionSpec {
            name: "dup".to_string(),
            ..Default::default()
        });
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateRuleName(_))));
    }

    #[test]
    fn compile_produces_runtime_rules() {
        let config = GatewayConfig::from_yaml_with_env(minimal_yaml()).unwrap();
        let compiled = config.compile().unwrap();
        assert_eq!(compiled.rules.len(), 1);
        assert!(compiled.sandbox.is_none());
    }

    #[test]
    fn env_substitution_resolves_variable() {
        std::env::set_var("PASSCTRL_TEST_ENDPOINT", "substituted-id");
        let yaml = r#"
endpoint_id: "${PASSCTRL_TEST_ENDPOINT}"
rules: []
"#;
        let config = GatewayConfig::from_yaml_with_env(yaml).unwrap();
        assert_eq!(config.endpoint_id, "substituted-id");
        std::env::remove_var("PASSCTRL_TEST_ENDPOINT");
    }

    #[test]
    fn env_substitution_fails_when_var_missing() {
        std::env::remove_var("PASSCTRL_MISSING_VAR");
        let yaml = r#"
endpoint_id: "${PASSCTRL_MISSING_VAR}"
rules: []
"#;
        let result = GatewayConfig::from_yaml_with_env(yaml);
        assert!(result.is_err());
    }
}
