//! Module identity and the module-host contract
//!
//! A watched widget is backed by a module graph that lives inside some
//! external runtime (an embedded interpreter, a scriptable UI host, ...).
//! This crate never executes module code itself; it reasons about modules
//! through stable dotted identifiers and reaches the runtime through the
//! [`ModuleHost`] trait.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// Stable dotted path identifying one module (e.g. `app.widgets.main`).
///
/// The package hierarchy is syntactic: `app.widgets.main` has parent
/// `app.widgets`, which has parent `app`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    /// Create a module id from a dotted path.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The dotted path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parent module, if any (`a.b.c` -> `a.b`; `a` -> None).
    pub fn parent(&self) -> Option<ModuleId> {
        self.0.rfind('.').map(|idx| ModuleId(self.0[..idx].to_string()))
    }

    /// All ancestors, shallowest first (`a.b.c` -> `[a, a.b]`).
    pub fn ancestors(&self) -> Vec<ModuleId> {
        let mut chain = Vec::new();
        let mut end = 0;
        while let Some(idx) = self.0[end..].find('.') {
            end += idx;
            chain.push(ModuleId(self.0[..end].to_string()));
            end += 1;
        }
        chain
    }

    /// Whether `self` is a strict package ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &ModuleId) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'.'
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// One tracked module (root or submodule), refreshed on every scan.
///
/// Every module path maps to at most one record; submodule records are
/// derived transitively from the root widget's module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    /// Module path.
    pub id: ModuleId,
    /// Last-known fingerprint.
    pub fingerprint: Option<Fingerprint>,
    /// Parent module path; the top-level package has none.
    pub parent: Option<ModuleId>,
    /// Whether this is the watched widget's own module.
    pub is_root: bool,
}

/// Error raised when re-executing a module fails (syntax error, failed
/// import, ...). Aborts the current apply; the previous widget is retained.
#[derive(Debug, Clone, thiserror::Error)]
#[error("re-import of `{module}` failed: {reason}")]
pub struct ImportError {
    /// Module whose re-import failed.
    pub module: ModuleId,
    /// Host-provided diagnostic.
    pub reason: String,
}

impl ImportError {
    /// Create a new import error.
    pub fn new(module: ModuleId, reason: impl Into<String>) -> Self {
        Self {
            module,
            reason: reason.into(),
        }
    }
}

/// Contract with the external module runtime.
///
/// One host instance is owned exclusively by one isolated runtime; nothing
/// here is shared across watched widgets.
#[async_trait]
pub trait ModuleHost: Send + Sync {
    /// Source file backing a module.
    ///
    /// Returning `None` marks the module as outside the project's own
    /// package tree (third-party, built-in); such modules are never
    /// scanned or reloaded.
    fn source_path(&self, module: &ModuleId) -> Option<PathBuf>;

    /// Direct imports of a module, as currently known to the runtime.
    fn imports(&self, module: &ModuleId) -> Vec<ModuleId>;

    /// Re-execute a module, rebinding its exports in place.
    async fn reimport(&mut self, module: &ModuleId) -> Result<(), ImportError>;
}
