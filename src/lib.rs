//! Live hot-reloading of GUI widget code during development
//!
//! Watches a widget's backing module graph for source changes and, when a
//! meaningful change lands, re-imports the affected modules and swaps the
//! running widget instance for a freshly constructed one, without
//! restarting the host application. Provides:
//! - Poll-based change detection over canonicalized source fingerprints
//! - Module + submodule dependency resolution with ordered re-imports
//! - An optional lint-style quality gate that can veto a pending reload
//! - Atomic widget replacement in the host container
//! - One isolated OS process per watched widget, so a broken reload
//!   cannot crash the rest of the development session
//!
//! The GUI toolkit, the source canonicalizer, and the external linter are
//! collaborators reached through narrow traits ([`WidgetToolkit`],
//! [`Canonicalizer`], [`QualityGate`]); this crate owns only the reload
//! orchestration.

pub mod config;
pub mod fingerprint;
pub mod gate;
pub mod module;
pub mod resolver;
pub mod scheduler;
pub mod supervisor;
pub mod swap;

pub use config::{WatchedWidget, WidgetClass};
pub use fingerprint::{
    CanonicalizeError, Canonicalizer, Fingerprint, FingerprintError, SourceFingerprinter,
};
pub use gate::{CommandGate, GateError, GateVerdict, QualityGate};
pub use module::{ImportError, ModuleHost, ModuleId, ModuleRecord};
pub use resolver::{DependencyResolver, ModuleGraph, ReloadPlan, ScanOutcome};
pub use scheduler::{CycleOutcome, ReloadEvent, ReloadScheduler, SchedulerPhase};
pub use supervisor::{
    start_reloaders, RuntimeFactory, RuntimeHandle, RuntimeParts, Supervisor, SupervisorError,
    SupervisorOptions,
};
pub use swap::{
    ApplyOutcome, ClassBinding, ConstructError, ContainerId, LiveWidgetHandle, SwapError,
    WidgetInstanceId, WidgetRegistry, WidgetSwapController, WidgetToolkit,
};
