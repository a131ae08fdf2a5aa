//! Declarative rule configuration (spec §4.3 "`DefinitionSpec`").

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_method() -> String {
    "GET".to_string()
}

fn default_pagination_kind() -> String {
    "link".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VariableSpec {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConditionsSpec {
    #[serde(default)]
    pub pass: Vec<String>,
    #[serde(default)]
    pub fail: Vec<String>,
    #[serde(default)]
    pub error: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExportSpec {
    #[serde(default)]
    pub pass: Vec<VariableSpec>,
    #[serde(default)]
    pub fail: Vec<VariableSpec>,
    #[serde(default)]
    pub error: Vec<VariableSpec>,
}

/// `status`/`body`/`bodyFile` are captured only so compilation can reject
/// them by name (spec §4.3 step 7: "removed from the contract").
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResponseSpec {
    #[serde(default)]
    pub pass: String,
    #[serde(default)]
    pub fail: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub status: Option<serde_json::Value>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default, rename = "bodyFile")]
    pub body_file: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CacheSpec {
    #[serde(default)]
    pub pass_ttl_secs: Option<u64>,
    #[serde(default)]
    pub fail_ttl_secs: Option<u64>,
    #[serde(default)]
    pub follow_cache_control: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PaginationSpec {
    #[serde(default = "default_pagination_kind", rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub max_pages: u32,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BackendSpec {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, Option<String>>,
    #[serde(default)]
    pub query: HashMap<String, Option<String>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default, rename = "bodyFile")]
    pub body_file: Option<String>,
    #[serde(default)]
    pub accepted_status: Vec<u16>,
    #[serde(default)]
    pub pagination: Option<PaginationSpec>,
    #[serde(default)]
    pub forward_proxy_headers: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DefinitionSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub backend: Option<BackendSpec>,
    #[serde(default)]
    pub variables: Vec<VariableSpec>,
    #[serde(default)]
    pub conditions: ConditionsSpec,
    #[serde(default)]
    pub export: ExportSpec,
    #[serde(default)]
    pub response: ResponseSpec,
    #[serde(default)]
    pub cache: CacheSpec,
}
