//! Process isolation supervision
//!
//! Runs each watched widget in its own OS process, so a broken reload (or
//! an unrecoverable toolkit fault) is contained to that widget's runtime.
//! A child receives nothing beyond its serialized [`WatchedWidget`]
//! construction parameters, passed through the environment at spawn time;
//! there is no shared mutable state between runtimes.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::WatchedWidget;
use crate::fingerprint::{Canonicalizer, SourceFingerprinter};
use crate::gate::QualityGate;
use crate::module::ModuleHost;
use crate::resolver::DependencyResolver;
use crate::scheduler::ReloadScheduler;
use crate::swap::{ContainerId, WidgetRegistry, WidgetSwapController, WidgetToolkit};

/// Environment variable carrying the child runtime's construction
/// parameters.
pub const CHILD_PAYLOAD_ENV: &str = "WIDGET_RELOADER_CHILD";

/// Supervisor error types
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("current executable unavailable: {0}")]
    Executable(#[source] std::io::Error),

    #[error("failed to spawn isolated runtime for `{widget}`: {source}")]
    Spawn {
        widget: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid child payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("runtime setup failed: {0}")]
    Setup(String),

    #[error("runtime for `{widget}` failed: {reason}")]
    Runtime { widget: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Collaborators one isolated runtime needs, built fresh inside that
/// runtime's process by the caller-supplied factory.
pub struct RuntimeParts {
    /// The external module runtime.
    pub host: Box<dyn ModuleHost>,
    /// The GUI toolkit contract.
    pub toolkit: Box<dyn WidgetToolkit>,
    /// Container slot that holds the live widget.
    pub container: ContainerId,
    /// Optional source canonicalizer for minified hashing.
    pub canonicalizer: Option<Arc<dyn Canonicalizer>>,
    /// Optional pre-reload quality gate.
    pub gate: Option<Arc<dyn QualityGate>>,
}

/// Builds the collaborators for one widget's runtime. Runs in the child
/// process (and in the parent, in debug mode), never across a process
/// boundary.
pub type RuntimeFactory =
    dyn Fn(&WatchedWidget) -> Result<RuntimeParts, SupervisorError> + Send + Sync;

/// Handle to one spawned isolated runtime.
pub struct RuntimeHandle {
    name: String,
    child: tokio::process::Child,
}

impl RuntimeHandle {
    /// Widget name this runtime serves.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id, while the child is alive.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the runtime to exit.
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus, SupervisorError> {
        Ok(self.child.wait().await?)
    }
}

/// Spawns and terminates isolated per-widget runtimes.
pub struct Supervisor {
    executable: PathBuf,
}

impl Supervisor {
    /// Supervisor re-executing the current binary for each child.
    pub fn new() -> Result<Self, SupervisorError> {
        let executable = std::env::current_exe().map_err(SupervisorError::Executable)?;
        Ok(Self { executable })
    }

    /// Supervisor spawning an explicit executable (tests).
    pub fn with_executable(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Spawn an isolated runtime for one watched widget.
    ///
    /// The child gets the serialized widget configuration in
    /// [`CHILD_PAYLOAD_ENV`] and inherits stdio so its logs reach the
    /// development console.
    pub fn spawn(&self, widget: &WatchedWidget) -> Result<RuntimeHandle, SupervisorError> {
        let payload = serde_json::to_string(widget)?;
        info!("Spawning isolated runtime for {}", widget.name());

        // The widget name rides along as an argument purely so the child
        // is identifiable in `ps`; the child reads its configuration from
        // the environment payload.
        let child = tokio::process::Command::new(&self.executable)
            .arg(widget.name())
            .env(CHILD_PAYLOAD_ENV, payload)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                widget: widget.name().to_string(),
                source,
            })?;

        debug!(
            "Runtime for {} running as pid {:?}",
            widget.name(),
            child.id()
        );
        Ok(RuntimeHandle {
            name: widget.name().to_string(),
            child,
        })
    }

    /// Terminate a runtime immediately and unconditionally. No graceful
    /// drain: a reload interrupted mid-apply may leave that runtime's
    /// widget torn, which is acceptable since the runtime is discarded.
    pub async fn terminate(&self, handle: &mut RuntimeHandle) -> Result<(), SupervisorError> {
        info!("Terminating runtime for {}", handle.name);
        handle.child.kill().await?;
        Ok(())
    }
}

/// Options for [`start_reloaders`].
#[derive(Debug, Clone, Default)]
pub struct SupervisorOptions {
    /// Run only the first widget, in the current process, with no
    /// isolation. Useful when attaching a debugger.
    pub debug_mode: bool,
    /// Log filter directive (falls back to `RUST_LOG`, then `info`).
    pub log_filter: Option<String>,
}

impl SupervisorOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable single-process debug mode.
    pub fn with_debug_mode(mut self, enabled: bool) -> Self {
        self.debug_mode = enabled;
        self
    }

    /// Set the tracing filter directive.
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }
}

/// Decode a child payload string into its widget configuration.
pub fn parse_child_payload(payload: &str) -> Result<WatchedWidget, SupervisorError> {
    Ok(serde_json::from_str(payload)?)
}

/// The payload this process was spawned with, if it is a child runtime.
pub fn child_payload() -> Option<Result<WatchedWidget, SupervisorError>> {
    std::env::var(CHILD_PAYLOAD_ENV)
        .ok()
        .map(|payload| parse_child_payload(&payload))
}

/// Entry point: run the registered widgets until termination.
///
/// In a child process (detected through [`CHILD_PAYLOAD_ENV`]) this builds
/// that widget's runtime via `factory` and runs its reload loop. In the
/// parent it spawns one isolated runtime per widget and waits for all of
/// them; a failed child is reported without affecting its siblings.
pub async fn start_reloaders(
    widgets: Vec<WatchedWidget>,
    factory: &RuntimeFactory,
    options: SupervisorOptions,
) -> Result<(), SupervisorError> {
    init_tracing(options.log_filter.as_deref());

    if let Some(payload) = child_payload() {
        let widget = payload?;
        return run_runtime(widget, factory).await;
    }

    if widgets.is_empty() {
        warn!("No widgets registered, nothing to reload");
        return Ok(());
    }

    if options.debug_mode {
        if let Some(widget) = widgets.into_iter().next() {
            debug!("Debug mode: running {} in the current process", widget.name());
            return run_runtime(widget, factory).await;
        }
        return Ok(());
    }

    let supervisor = Supervisor::new()?;
    let mut handles = Vec::with_capacity(widgets.len());
    for widget in &widgets {
        handles.push(supervisor.spawn(widget)?);
    }

    for handle in &mut handles {
        let status = handle.wait().await?;
        if status.success() {
            info!("Runtime for {} exited cleanly", handle.name());
        } else {
            error!("Runtime for {} exited with {}", handle.name(), status);
        }
    }

    Ok(())
}

/// Build and run one widget's reload loop in the current process.
async fn run_runtime(
    widget: WatchedWidget,
    factory: &RuntimeFactory,
) -> Result<(), SupervisorError> {
    let span = tracing::info_span!("runtime", widget = %widget.name());

    async {
        let parts = factory(&widget)?;

        let mut fingerprinter = SourceFingerprinter::new();
        if let Some(canonicalizer) = parts.canonicalizer {
            fingerprinter = fingerprinter.with_canonicalizer(canonicalizer);
        }
        let resolver = DependencyResolver::new(fingerprinter);
        let registry = Arc::new(WidgetRegistry::new());
        let swap = WidgetSwapController::new(widget.class.clone(), parts.container, registry);

        let mut scheduler =
            ReloadScheduler::new(widget.clone(), resolver, parts.host, parts.toolkit, swap);
        if let Some(gate) = parts.gate {
            scheduler = scheduler.with_gate(gate);
        }

        // The shutdown channel stays open for the life of the runtime;
        // terminating the process is the cancellation path.
        let (_shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let name = widget.name().to_string();
        scheduler
            .run(shutdown_rx)
            .await
            .map_err(|e| SupervisorError::Runtime {
                widget: name,
                reason: e.to_string(),
            })
    }
    .instrument(span)
    .await
}

fn init_tracing(filter: Option<&str>) {
    use tracing_subscriber::EnvFilter;

    let filter = match filter {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    // Parent and children each install their own subscriber; a second
    // call in the same process is a no-op.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
