//! Backend invocation (spec §4.5): the HTTP call a rule may make before
//! evaluating its conditions, including null-copy header/query semantics
//! and RFC-5988 `Link` pagination.

pub mod pagination;

use std::collections::HashMap;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{Client, Method};
use serde_json::Value as JsonValue;

use crate::admission::directive::{ForwardKind, RenderedForward};
use crate::constants::{DEFAULT_ACCEPTED_STATUS, DEFAULT_BACKEND_TIMEOUT_SECS, DEFAULT_MAX_PAGES};
use crate::error::{BackendError, ConfigError};
use crate::expr::template::Template;
use crate::expr::Activation;
use crate::sandbox::Sandbox;

/// A header/query value is either a literal string or, if it contains
/// `{{`, a template — never a CEL expression (spec §4.5: "compiling it as
/// a template if it contains `{{`", distinct from the hybrid evaluator used
/// for rule conditions and variables).
#[derive(Debug)]
pub enum LiteralOrTemplate {
    Literal(String),
    Template(Template),
}

impl LiteralOrTemplate {
    pub fn compile(source: &str, sandbox: Option<&Sandbox>) -> Result<Self, String> {
        if source.contains("{{") {
            Template::compile_inline(source, sandbox).map(LiteralOrTemplate::Template)
        } else {
            Ok(LiteralOrTemplate::Literal(source.to_string()))
        }
    }

    /// Compiles a sandboxed file's contents as a template (spec §4.5: "body
    /// (literal or file path)"; spec §4.2: file-backed compilation requires
    /// a sandbox).
    pub fn compile_file(path: &str, sandbox: Option<&Sandbox>) -> Result<Self, String> {
        let sandbox = sandbox.ok_or_else(|| "file-backed body requires a sandbox".to_string())?;
        Template::compile_file(sandbox, path).map(LiteralOrTemplate::Template)
    }

    pub fn render(&self, activation: &Activation) -> Result<String, String> {
        match self {
            LiteralOrTemplate::Literal(s) => Ok(s.clone()),
            LiteralOrTemplate::Template(t) => t.render(activation),
        }
    }
}

/// Null-copy tagged variant (spec §4.5/§9): an explicitly-absent value
/// copies the corresponding raw request field; an explicit value
/// uses/templates it.
#[derive(Debug)]
pub enum FieldValue {
    Absent,
    Explicit(LiteralOrTemplate),
}

impl FieldValue {
    pub fn compile(source: Option<&str>, sandbox: Option<&Sandbox>) -> Result<Self, String> {
        match source {
            None => Ok(FieldValue::Absent),
            Some(s) => LiteralOrTemplate::compile(s, sandbox).map(FieldValue::Explicit),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationKind {
    Link,
}

#[derive(Debug)]
pub struct PaginationConfig {
    pub kind: PaginationKind,
    pub max_pages: u32,
}

impl PaginationConfig {
    pub fn clamped_max_pages(&self) -> u32 {
        self.max_pages.max(1)
    }
}

#[derive(Debug)]
pub struct BackendDefinition {
    pub url: LiteralOrTemplate,
    pub method: String,
    pub headers: HashMap<String, FieldValue>,
    pub query: HashMap<String, FieldValue>,
    pub body: Option<LiteralOrTemplate>,
    pub accepted_status: Vec<u16>,
    pub pagination: Option<PaginationConfig>,
    pub forward_proxy_headers: bool,
    pub timeout: Duration,
}

impl BackendDefinition {
    pub fn is_accepted(&self, status: u16) -> bool {
        if self.accepted_status.is_empty() {
            status == DEFAULT_ACCEPTED_STATUS
        } else {
            self.accepted_status.contains(&status)
        }
    }
}

#[derive(Debug)]
pub struct BackendResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: JsonValue,
    pub pages: Vec<JsonValue>,
}

pub struct BackendClient {
    client: Client,
}

impl Default for BackendClient {
    fn default() -> Self {
        BackendClient {
            client: Client::new(),
        }
    }
}

impl BackendClient {
    pub fn new(client: Client) -> Self {
        BackendClient { client }
    }

    fn resolve_field_map(
        &self,
        fields: &HashMap<String, FieldValue>,
        raw: &HashMap<String, String>,
        activation: &Activation,
    ) -> Result<HashMap<String, String>, BackendError> {
        let mut out = HashMap::new();
        for (name, field) in fields {
            let key = name.to_ascii_lowercase();
            match field {
                FieldValue::Absent => {
                    if let Some(v) = raw.get(&key) {
                        out.insert(key, v.clone());
                    }
                }
                FieldValue::Explicit(lot) => {
                    let rendered = lot
                        .render(activation)
                        .map_err(|cause| BackendError::Request {
                            url: String::new(),
                            cause,
                        })?;
                    out.insert(key, rendered.trim().to_string());
                }
            }
        }
        Ok(out)
    }

    /// Applies forwards synthesized by a matched admission directive (spec
    /// §4.4: "forwards synthesize credentials for the backend"). A
    /// configured header/query value always takes precedence over a
    /// synthesized one, the same precedence `ForwardProxyHeaders` uses.
    fn apply_forwarded_credentials(
        headers: &mut HashMap<String, String>,
        query: &mut HashMap<String, String>,
        credentials: &[RenderedForward],
    ) {
        for credential in credentials {
            match credential.kind {
                ForwardKind::Basic => {
                    let encoded = STANDARD.encode(format!("{}:{}", credential.user, credential.password));
                    headers
                        .entry("authorization".to_string())
                        .or_insert_with(|| format!("Basic {encoded}"));
                }
                ForwardKind::Bearer => {
                    headers
                        .entry("authorization".to_string())
                        .or_insert_with(|| format!("Bearer {}", credential.token));
                }
                ForwardKind::Header if !credential.name.is_empty() => {
                    headers
                        .entry(credential.name.to_ascii_lowercase())
                        .or_insert_with(|| credential.value.clone());
                }
                ForwardKind::Query if !credential.name.is_empty() => {
                    query.entry(credential.name.clone()).or_insert_with(|| credential.value.clone());
                }
                ForwardKind::Header | ForwardKind::Query | ForwardKind::None => {}
            }
        }
    }

    /// Invokes the backend, following pagination up to `maxPages` pages.
    /// `raw_headers`/`raw_query`/`admission_forward_headers` are the sources
    /// consulted for null-copy fields; `forwarded_credentials` are the
    /// credentials a matched admission directive synthesized for this
    /// request (spec §4.4).
    pub async fn invoke(
        &self,
        def: &BackendDefinition,
        raw_headers: &HashMap<String, String>,
        raw_query: &HashMap<String, String>,
        admission_forward_headers: &HashMap<String, String>,
        forwarded_credentials: &[RenderedForward],
        activation: &Activation,
    ) -> Result<BackendResponse, BackendError> {
        let mut url = def
            .url
            .render(activation)
            .map_err(|cause| BackendError::Request {
                url: String::new(),
                cause,
            })?;

        let mut headers = self.resolve_field_map(&def.headers, raw_headers, activation)?;
        let mut query = self.resolve_field_map(&def.query, raw_query, activation)?;
        Self::apply_forwarded_credentials(&mut headers, &mut query, forwarded_credentials);
        if def.forward_proxy_headers {
            for (k, v) in admission_forward_headers {
                if k == "forwarded" || k.starts_with("x-forwarded-") {
                    headers.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
        }
        let body = match &def.body {
            Some(lot) => Some(lot.render(activation).map_err(|cause| BackendError::Request {
                url: url.clone(),
                cause,
            })?),
            None => None,
        };

        let max_pages = def
            .pagination
            .as_ref()
            .map(|p| p.clamped_max_pages())
            .unwrap_or(DEFAULT_MAX_PAGES);

        let mut pages = Vec::new();
        let mut last_status = 0u16;
        let mut last_headers = HashMap::new();

        for _ in 0..max_pages {
            let method = Method::from_bytes(def.method.as_bytes())
                .unwrap_or(Method::GET);
            let mut request = self
                .client
                .request(method, &url)
                .timeout(def.timeout);
            for (k, v) in &headers {
                request = request.header(k.as_str(), v.as_str());
            }
            if !query.is_empty() {
                request = request.query(&query);
            }
            if let Some(b) = &body {
                request = request.body(b.clone());
            }

            let response = request.send().await.map_err(|e| BackendError::Request {
                url: url.clone(),
                cause: e.to_string(),
            })?;

            let status = response.status().as_u16();
            if !def.is_accepted(status) {
                return Err(BackendError::UnacceptedStatus {
                    url: url.clone(),
                    status,
                });
            }

            let resp_headers: HashMap<String, String> = response
                .headers()
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
                .collect();

            let link_header = resp_headers.get("link").cloned();
            let text = response.text().await.unwrap_or_default();
            let page_json: JsonValue = serde_json::from_str(&text).unwrap_or(JsonValue::String(text));

            pages.push(page_json);
            last_status = status;
            last_headers = resp_headers;

            match &def.pagination {
                Some(cfg) if cfg.kind == PaginationKind::Link => {
                    let next = link_header.as_deref().and_then(pagination::parse_link_next);
                    match next {
                        Some(next_ref) => match pagination::resolve_next_url(&url, &next_ref) {
                            Ok(resolved) => url = resolved,
                            Err(_) => break,
                        },
                        None => break,
                    }
                }
                _ => break,
            }
        }

        let body_value = pages.last().cloned().unwrap_or(JsonValue::Null);
        Ok(BackendResponse {
            status: last_status,
            headers: last_headers,
            body: body_value,
            pages,
        })
    }
}

/// Compiles a backend declaration's template-bearing fields. Errors are
/// surfaced as `ConfigError` at rule-compile time (spec §4.3 step 4).
pub fn compile_field(source: Option<&str>, sandbox: Option<&Sandbox>) -> Result<FieldValue, ConfigError> {
    FieldValue::compile(source, sandbox).map_err(|cause| ConfigError::TemplateCompile {
        rule: String::new(),
        field: "backend field".to_string(),
        cause,
    })
}

pub fn default_timeout() -> Duration {
    Duration::from_secs(DEFAULT_BACKEND_TIMEOUT_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_accepted_defaults_to_200() {
        let def = BackendDefinition {
            url: LiteralOrTemplate::Literal("http://x".into()),
            method: "GET".into(),
            headers: HashMap::new(),
            query: HashMap::new(),
            body: None,
            accepted_status: vec![],
            pagination: None,
            forward_proxy_headers: false,
            timeout: default_timeout(),
        };
        assert!(def.is_accepted(200));
        assert!(!def.is_accepted(404));
    }

    #[test]
    fn pagination_clamps_zero_to_one() {
        let cfg = PaginationConfig {
            kind: PaginationKind::Link,
            max_pages: 0,
        };
        assert_eq!(cfg.clamped_max_pages(), 1);
    }

    #[tokio::test]
    async fn resolve_field_map_copies_raw_on_absent() {
        let client = BackendClient::default();
        let mut fields = HashMap::new();
        fields.insert("x-auth".to_string(), FieldValue::Absent);
        fields.insert(
            "x-custom".to_string(),
            FieldValue::Explicit(LiteralOrTemplate::Literal(" override ".to_string())),
        );
        let raw = HashMap::from([
            ("x-auth".to_string(), "token".to_string()),
            ("x-remove".to_string(), "drop".to_string()),
        ]);
        let activation = Activation::new();
        let resolved = client.resolve_field_map(&fields, &raw, &activation).unwrap();
        assert_eq!(resolved.get("x-auth"), Some(&"token".to_string()));
        assert_eq!(resolved.get("x-custom"), Some(&"override".to_string()));
        assert!(!resolved.contains_key("x-remove"));
    }

    fn bare_definition(url: &str) -> BackendDefinition {
        BackendDefinition {
            url: LiteralOrTemplate::Literal(url.to_string()),
            method: "GET".to_string(),
            headers: HashMap::new(),
            query: HashMap::new(),
            body: None,
            accepted_status: vec![],
            pagination: None,
            forward_proxy_headers: false,
            timeout: default_timeout(),
        }
    }

    #[tokio::test]
    async fn invoke_returns_decoded_json_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/resource")
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let def = bare_definition(&format!("{}/resource", server.url()));
        let client = BackendClient::default();
        let response = client
            .invoke(&def, &HashMap::new(), &HashMap::new(), &HashMap::new(), &[], &Activation::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn invoke_applies_forwarded_bearer_credential_as_authorization_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/resource")
            .match_header("authorization", "Bearer service-token")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let def = bare_definition(&format!("{}/resource", server.url()));
        let client = BackendClient::default();
        let forwarded = vec![RenderedForward {
            kind: ForwardKind::Bearer,
            token: "service-token".to_string(),
            ..Default::default()
        }];
        client
            .invoke(&def, &HashMap::new(), &HashMap::new(), &HashMap::new(), &forwarded, &Activation::new())
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn invoke_rejects_unaccepted_status() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/resource").with_status(500).create_async().await;

        let def = bare_definition(&format!("{}/resource", server.url()));
        let client = BackendClient::default();
        let err = client
            .invoke(&def, &HashMap::new(), &HashMap::new(), &HashMap::new(), &[], &Activation::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::UnacceptedStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn invoke_follows_link_header_pagination_across_pages() {
        let mut server = mockito::Server::new_async().await;
        let page1 = server
            .mock("GET", "/resource")
            .with_status(200)
            .with_header("link", "</resource?page=2>; rel=\"next\"")
            .with_body(r#"{"page":1}"#)
            .create_async()
            .await;
        let page2 = server
            .mock("GET", "/resource?page=2")
            .with_status(200)
            .with_body(r#"{"page":2}"#)
            .create_async()
            .await;

        let mut def = bare_definition(&format!("{}/resource", server.url()));
        def.pagination = Some(PaginationConfig {
            kind: PaginationKind::Link,
            max_pages: 5,
        });
        let client = BackendClient::default();
        let response = client
            .invoke(&def, &HashMap::new(), &HashMap::new(), &HashMap::new(), &[], &Activation::new())
            .await
            .unwrap();

        page1.assert_async().await;
        page2.assert_async().await;
        assert_eq!(response.pages.len(), 2);
        assert_eq!(response.body, serde_json::json!({"page": 2}));
    }

    #[tokio::test]
    async fn invoke_stops_pagination_at_max_pages() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/resource")
            .with_status(200)
            .with_header("link", "</resource>; rel=\"next\"")
            .with_body(r#"{"again":true}"#)
            .expect(2)
            .create_async()
            .await;

        let mut def = bare_definition(&format!("{}/resource", server.url()));
        def.pagination = Some(PaginationConfig {
            kind: PaginationKind::Link,
            max_pages: 2,
        });
        let client = BackendClient::default();
        let response = client
            .invoke(&def, &HashMap::new(), &HashMap::new(), &HashMap::new(), &[], &Activation::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.pages.len(), 2);
    }
}
