//! Filesystem sandbox (spec §4.2): a canonicalized root directory and a
//! `resolve` operation that refuses any path escaping it.

use std::path::{Path, PathBuf};

use crate::constants::SANDBOX_SEPARATOR;
use crate::error::{ConfigError, EvaluationError};

#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    enable_env: bool,
    allow_env: Vec<String>,
}

impl Sandbox {
    pub fn new(
        root: impl AsRef<Path>,
        enable_env: bool,
        allow_env: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let root = root.as_ref();
        let canonical = root
            .canonicalize()
            .map_err(|_| ConfigError::InvalidSandboxRoot {
                path: root.display().to_string(),
            })?;
        if !canonical.is_dir() {
            return Err(ConfigError::InvalidSandboxRoot {
                path: root.display().to_string(),
            });
        }
        Ok(Sandbox {
            root: canonical,
            enable_env,
            allow_env,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn enable_env(&self) -> bool {
        self.enable_env
    }

    pub fn allow_env(&self) -> &[String] {
        &self.allow_env
    }

    /// Resolves `path` relative to the sandbox root, following symlinks, and
    /// fails with an error containing "escapes" if the result falls outside
    /// the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, EvaluationError> {
        let candidate = self.root.join(path);
        let resolved = canonicalize_best_effort(&candidate);
        if !is_contained(&self.root, &resolved) {
            return Err(EvaluationError::SandboxEscape {
                path: path.to_string(),
                root: self.root.display().to_string(),
            });
        }
        Ok(resolved)
    }
}

/// `canonicalize` fails if the final path component does not exist yet
/// (e.g. a file about to be written); fall back to canonicalizing the
/// deepest existing ancestor and re-appending the remaining components so
/// containment can still be checked.
fn canonicalize_best_effort(path: &Path) -> PathBuf {
    if let Ok(canon) = path.canonicalize() {
        return canon;
    }
    let mut existing = path.to_path_buf();
    let mut remainder = Vec::new();
    while !existing.exists() {
        match existing.clone().file_name() {
            Some(name) => {
                remainder.push(name.to_os_string());
                existing.pop();
            }
            None => break,
        }
    }
    let mut result = existing.canonicalize().unwrap_or(existing);
    for component in remainder.into_iter().rev() {
        result.push(component);
    }
    result
}

fn is_contained(root: &Path, candidate: &Path) -> bool {
    let root_str = normalize_for_compare(root);
    let candidate_str = normalize_for_compare(candidate);
    let prefix = format!("{root_str}{SANDBOX_SEPARATOR}");
    candidate_str == root_str || candidate_str.starts_with(&prefix)
}

#[cfg(target_os = "windows")]
fn normalize_for_compare(path: &Path) -> String {
    path.display().to_string().to_lowercase()
}

#[cfg(not(target_os = "windows"))]
fn normalize_for_compare(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_path_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file.txt"), "x").unwrap();
        let sandbox = Sandbox::new(dir.path(), false, vec![]).unwrap();
        let resolved = sandbox.resolve("file.txt").unwrap();
        assert!(resolved.starts_with(sandbox.root()));
    }

    #[test]
    fn rejects_parent_traversal_escape() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path(), false, vec![]).unwrap();
        let err = sandbox.resolve("../../etc/passwd").unwrap_err();
        assert!(err.to_string().contains("escapes"));
    }

    #[test]
    fn rejects_nonexistent_root() {
        let err = Sandbox::new("/nonexistent/passctrl/root", false, vec![]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSandboxRoot { .. }));
    }

    #[test]
    fn allows_nested_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        let sandbox = Sandbox::new(dir.path(), false, vec![]).unwrap();
        assert!(sandbox.resolve("nested").is_ok());
    }
}
