//! Test doubles for the reload engine: a scripted module host backed by
//! real files in a tempdir, a recording toolkit, a comment-stripping
//! canonicalizer, and a programmable gate.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use widget_reloader::{
    Canonicalizer, CanonicalizeError, ConstructError, ContainerId, DependencyResolver, GateError,
    GateVerdict, ImportError, ModuleHost, ModuleId, QualityGate, ReloadScheduler,
    SourceFingerprinter, SwapError, WatchedWidget, WidgetInstanceId, WidgetRegistry,
    WidgetSwapController, WidgetToolkit,
};

#[derive(Default)]
pub struct HostState {
    pub sources: HashMap<ModuleId, PathBuf>,
    pub imports: HashMap<ModuleId, Vec<ModuleId>>,
    pub reimports: Vec<ModuleId>,
    pub fail_on: HashSet<ModuleId>,
}

/// Module host over real files in a tempdir, with a scripted import graph
/// and a re-import log.
#[derive(Clone)]
pub struct ScriptedHost {
    dir: Arc<tempfile::TempDir>,
    pub state: Arc<Mutex<HostState>>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self {
            dir: Arc::new(tempfile::tempdir().unwrap()),
            state: Arc::new(Mutex::new(HostState::default())),
        }
    }

    pub fn add_module(&self, id: &str, source: &str) {
        let id = ModuleId::new(id);
        let path = self.dir.path().join(format!("{}.src", id.as_str()));
        std::fs::write(&path, source).unwrap();
        self.state.lock().unwrap().sources.insert(id, path);
    }

    pub fn add_import(&self, importer: &str, importee: &str) {
        self.state
            .lock()
            .unwrap()
            .imports
            .entry(ModuleId::new(importer))
            .or_default()
            .push(ModuleId::new(importee));
    }

    pub fn edit(&self, id: &str, source: &str) {
        let path = self.state.lock().unwrap().sources[&ModuleId::new(id)].clone();
        std::fs::write(&path, source).unwrap();
    }

    pub fn fail_reimport_of(&self, id: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_on
            .insert(ModuleId::new(id));
    }

    pub fn clear_reimport_failures(&self) {
        self.state.lock().unwrap().fail_on.clear();
    }

    pub fn reimports(&self) -> Vec<ModuleId> {
        self.state.lock().unwrap().reimports.clone()
    }

    pub fn clear_reimport_log(&self) {
        self.state.lock().unwrap().reimports.clear();
    }
}

#[async_trait]
impl ModuleHost for ScriptedHost {
    fn source_path(&self, module: &ModuleId) -> Option<PathBuf> {
        self.state.lock().unwrap().sources.get(module).cloned()
    }

    fn imports(&self, module: &ModuleId) -> Vec<ModuleId> {
        self.state
            .lock()
            .unwrap()
            .imports
            .get(module)
            .cloned()
            .unwrap_or_default()
    }

    async fn reimport(&mut self, module: &ModuleId) -> Result<(), ImportError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_on.contains(module) {
            return Err(ImportError::new(module.clone(), "synthetic syntax error"));
        }
        state.reimports.push(module.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct ToolkitState {
    pub slots: HashMap<ContainerId, Vec<WidgetInstanceId>>,
    pub constructed: Vec<WidgetInstanceId>,
    pub fail_construct: bool,
}

/// Toolkit double that records constructions and keeps each container
/// slot's contents observable.
#[derive(Clone)]
pub struct RecordingToolkit {
    pub state: Arc<Mutex<ToolkitState>>,
}

impl RecordingToolkit {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ToolkitState::default())),
        }
    }

    pub fn slot(&self, container: &ContainerId) -> Vec<WidgetInstanceId> {
        self.state
            .lock()
            .unwrap()
            .slots
            .get(container)
            .cloned()
            .unwrap_or_default()
    }

    pub fn constructed(&self) -> Vec<WidgetInstanceId> {
        self.state.lock().unwrap().constructed.clone()
    }

    pub fn set_fail_construct(&self, fail: bool) {
        self.state.lock().unwrap().fail_construct = fail;
    }
}

#[async_trait]
impl WidgetToolkit for RecordingToolkit {
    async fn construct(
        &mut self,
        class: &widget_reloader::WidgetClass,
    ) -> Result<WidgetInstanceId, ConstructError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_construct {
            return Err(ConstructError::new(class, "constructor raised"));
        }
        let instance = WidgetInstanceId::generate();
        state.constructed.push(instance);
        Ok(instance)
    }

    async fn replace_child(
        &mut self,
        container: &ContainerId,
        old: Option<WidgetInstanceId>,
        new: WidgetInstanceId,
    ) -> Result<(), SwapError> {
        let mut state = self.state.lock().unwrap();
        let slot = state.slots.entry(container.clone()).or_default();
        if let Some(old) = old {
            if !slot.contains(&old) {
                return Err(SwapError::Replace(format!(
                    "instance {old} not attached to {container}"
                )));
            }
            slot.retain(|attached| *attached != old);
        }
        slot.push(new);
        Ok(())
    }
}

/// Test canonicalizer: drops `#` comments and all blank/indent noise.
pub struct StripComments;

impl Canonicalizer for StripComments {
    fn canonicalize(&self, source: &str) -> Result<String, CanonicalizeError> {
        let canonical: Vec<&str> = source
            .lines()
            .map(|line| line.split('#').next().unwrap_or("").trim())
            .filter(|line| !line.is_empty())
            .collect();
        Ok(canonical.join("\n"))
    }
}

/// Gate that rejects any source containing a marker string.
pub struct RejectIfContains {
    pub needle: String,
}

#[async_trait]
impl QualityGate for RejectIfContains {
    async fn check(&self, source: &str) -> Result<GateVerdict, GateError> {
        if source.contains(&self.needle) {
            Ok(GateVerdict::Reject(vec![format!(
                "forbidden marker `{}`",
                self.needle
            )]))
        } else {
            Ok(GateVerdict::Pass)
        }
    }
}

pub const CONTAINER: &str = "slot-0";

/// Assemble a scheduler over the scripted doubles.
pub fn scheduler_for(
    cfg: WatchedWidget,
    host: &ScriptedHost,
    toolkit: &RecordingToolkit,
    canonicalizer: Option<Arc<dyn Canonicalizer>>,
    gate: Option<Arc<dyn QualityGate>>,
) -> ReloadScheduler {
    let mut fingerprinter = SourceFingerprinter::new();
    if let Some(canonicalizer) = canonicalizer {
        fingerprinter = fingerprinter.with_canonicalizer(canonicalizer);
    }
    let resolver = DependencyResolver::new(fingerprinter);
    let registry = Arc::new(WidgetRegistry::new());
    let swap = WidgetSwapController::new(
        cfg.class.clone(),
        ContainerId::new(CONTAINER),
        registry,
    );

    let mut scheduler = ReloadScheduler::new(
        cfg,
        resolver,
        Box::new(host.clone()),
        Box::new(toolkit.clone()),
        swap,
    );
    if let Some(gate) = gate {
        scheduler = scheduler.with_gate(gate);
    }
    scheduler
}
