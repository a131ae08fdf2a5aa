//! Text template dialect (spec §4.1/§4.2): `{{ .path }}` interpolation plus
//! a small set of pure helper functions, with `env`/`expandenv` sandboxed by
//! an explicit allow-list.

use std::sync::atomic::{AtomicU64, Ordering};

use tera::{Tera, Value as TeraValue};

use super::{to_json, Activation, Value};
use crate::sandbox::Sandbox;

static TEMPLATE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A compiled template. Each instance owns a private `Tera` registry keyed
/// by a unique synthetic name, since `Tera` is a multi-template store rather
/// than a single-template compiler.
#[derive(Debug)]
pub struct Template {
    name: String,
    tera: Tera,
}

impl Template {
    /// Compiles `source` for in-memory use (backend header/query values,
    /// outcome messages, forwarded credentials). `sandbox` gates the
    /// `env`/`expandenv` helpers; without one, both collapse to empty.
    pub fn compile_inline(source: &str, sandbox: Option<&Sandbox>) -> Result<Self, String> {
        let id = TEMPLATE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = format!("inline-{id}");
        let mut tera = Tera::default();
        tera.add_raw_template(&name, source)
            .map_err(|e| e.to_string())?;
        register_helpers(&mut tera, sandbox);
        Ok(Template { name, tera })
    }

    /// Compiles `source` read from a sandboxed file path (spec §4.2:
    /// "File-backed template compilation requires a sandbox; without one,
    /// attempts fail").
    pub fn compile_file(sandbox: &Sandbox, path: &str) -> Result<Self, String> {
        let resolved = sandbox.resolve(path).map_err(|e| e.to_string())?;
        let source = std::fs::read_to_string(&resolved)
            .map_err(|e| format!("failed to read '{path}': {e}"))?;
        Self::compile_inline(&source, Some(sandbox))
    }

    pub fn render(&self, activation: &Activation) -> Result<String, String> {
        let mut context = tera::Context::new();
        for (name, value) in activation.iter() {
            context.insert(name, &to_json(value));
        }
        self.tera
            .render(&self.name, &context)
            .map_err(|e| e.to_string())
    }
}

/// Registers the pure helper functions named in spec §4.2 plus the
/// sandboxed `env`/`expandenv` pair. `allow_env` being empty (the default)
/// means `env`/`expandenv` always resolve to an empty string, matching the
/// spec's "nothing is exposed unless explicitly allow-listed" default.
fn register_helpers(tera: &mut Tera, sandbox: Option<&Sandbox>) {
    let allow_env = sandbox
        .map(|s| s.allow_env().to_vec())
        .unwrap_or_default();
    let enabled = sandbox.map(|s| s.enable_env()).unwrap_or(false);

    tera.register_function("env", move |args: &std::collections::HashMap<String, TeraValue>| {
        let name = args
            .get("name")
            .and_then(TeraValue::as_str)
            .unwrap_or_default();
        if enabled && allow_env.iter().any(|a| a == name) {
            Ok(TeraValue::String(std::env::var(name).unwrap_or_default()))
        } else {
            Ok(TeraValue::String(String::new()))
        }
    });

    let allow_env_expand = sandbox
        .map(|s| s.allow_env().to_vec())
        .unwrap_or_default();
    let enabled_expand = sandbox.map(|s| s.enable_env()).unwrap_or(false);

    tera.register_function(
        "expandenv",
        move |args: &std::collections::HashMap<String, TeraValue>| {
            let input = args
                .get("value")
                .and_then(TeraValue::as_str)
                .unwrap_or_default();
            if !enabled_expand {
                return Ok(TeraValue::String(input.to_string()));
            }
            let expanded = expand_allowed_vars(input, &allow_env_expand);
            Ok(TeraValue::String(expanded))
        },
    );
}

/// Expands `${NAME}` references in `input` for every `NAME` present in
/// `allow`; references to any other variable are left untouched.
fn expand_allowed_vars(input: &str, allow: &[String]) -> String {
    let mut out = input.to_string();
    for name in allow {
        let pattern = format!("${{{name}}}");
        if out.contains(&pattern) {
            let value = std::env::var(name).unwrap_or_default();
            out = out.replace(&pattern, &value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_plain_interpolation() {
        let template = Template::compile_inline("hello {{ name }}", None).unwrap();
        let activation = Activation::new().with("name", Value::String("world".into()));
        assert_eq!(template.render(&activation).unwrap(), "hello world");
    }

    #[test]
    fn env_collapses_to_empty_without_sandbox() {
        let template = Template::compile_inline("{{ env(name=\"PATH\") }}", None).unwrap();
        let activation = Activation::new();
        assert_eq!(template.render(&activation).unwrap(), "");
    }

    #[test]
    fn env_resolves_when_allow_listed() {
        std::env::set_var("PASSCTRL_TEST_VAR", "configured");
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path(), true, vec!["PASSCTRL_TEST_VAR".to_string()]).unwrap();
        let template =
            Template::compile_inline("{{ env(name=\"PASSCTRL_TEST_VAR\") }}", Some(&sandbox)).unwrap();
        let activation = Activation::new();
        assert_eq!(template.render(&activation).unwrap(), "configured");
    }

    #[test]
    fn compile_file_reads_and_renders_sandboxed_template() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("body.tpl"), "hello {{ name }}").unwrap();
        let sandbox = Sandbox::new(dir.path(), false, vec![]).unwrap();
        let template = Template::compile_file(&sandbox, "body.tpl").unwrap();
        let activation = Activation::new().with("name", Value::String("world".into()));
        assert_eq!(template.render(&activation).unwrap(), "hello world");
    }

    #[test]
    fn compile_file_rejects_path_escaping_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path(), false, vec![]).unwrap();
        let err = Template::compile_file(&sandbox, "../../etc/passwd").unwrap_err();
        assert!(err.contains("escapes"));
    }

    #[test]
    fn env_ignores_non_allow_listed_names() {
        std::env::set_var("PASSCTRL_TEST_OTHER", "secret");
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path(), true, vec!["SOMETHING_ELSE".to_string()]).unwrap();
        let template =
            Template::compile_inline("{{ env(name=\"PASSCTRL_TEST_OTHER\") }}", Some(&sandbox)).unwrap();
        let activation = Activation::new();
        assert_eq!(template.render(&activation).unwrap(), "");
    }
}
