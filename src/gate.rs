//! Pre-reload quality gate
//!
//! Optional lint-style check consulted after a change is detected and
//! before any module is re-imported. A rejection discards the entire
//! pending plan for the cycle; because no fingerprint is committed, the
//! same change is re-gated on the next poll.

use std::io::Write;
use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;

/// Gate decision for one source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    /// Source accepted; the reload may proceed.
    Pass,
    /// Source rejected, with ordered diagnostics. Vetoes the whole plan.
    Reject(Vec<String>),
}

impl GateVerdict {
    /// Whether the verdict accepts the source.
    pub fn is_pass(&self) -> bool {
        matches!(self, GateVerdict::Pass)
    }
}

/// Gate infrastructure error types
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("failed to run gate command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stage source for gating: {0}")]
    Staging(#[from] std::io::Error),
}

/// Pre-reload static check that can veto a pending reload.
#[async_trait]
pub trait QualityGate: Send + Sync {
    /// Check one module's current source text.
    async fn check(&self, source: &str) -> Result<GateVerdict, GateError>;
}

/// Quality gate backed by an external lint command.
///
/// The source is staged to a temporary file whose path is appended to the
/// configured arguments; a non-zero exit status rejects the reload and the
/// command's output becomes the diagnostics.
pub struct CommandGate {
    program: String,
    args: Vec<String>,
    suffix: String,
}

impl CommandGate {
    /// Gate running `program <args>... <staged-file>`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            suffix: String::new(),
        }
    }

    /// Append a fixed argument placed before the staged file path.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// File suffix for the staged source (some linters dispatch on it).
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }
}

#[async_trait]
impl QualityGate for CommandGate {
    async fn check(&self, source: &str) -> Result<GateVerdict, GateError> {
        let mut staged = tempfile::Builder::new()
            .prefix("gate-")
            .suffix(&self.suffix)
            .tempfile()?;
        staged.write_all(source.as_bytes())?;
        staged.flush()?;

        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(staged.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| GateError::Spawn {
                command: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            debug!("Gate command `{}` passed", self.program);
            return Ok(GateVerdict::Pass);
        }

        let mut diagnostics: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect();
        if diagnostics.is_empty() {
            diagnostics = String::from_utf8_lossy(&output.stderr)
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect();
        }

        debug!(
            "Gate command `{}` rejected with {} diagnostic(s)",
            self.program,
            diagnostics.len()
        );
        Ok(GateVerdict::Reject(diagnostics))
    }
}
