//! Watched-widget registration
//!
//! One [`WatchedWidget`] describes one reload unit: the widget class to
//! keep alive, the module backing it, the polling interval, and the
//! per-widget reload policy flags. The configuration is fully serializable
//! because it is the only data handed to an isolated child runtime at
//! spawn time.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::module::ModuleId;

/// Reference to a widget class: the module that defines it plus the class
/// name within that module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WidgetClass {
    /// Module defining the class.
    pub module: ModuleId,
    /// Class name within the module.
    pub name: String,
}

impl WidgetClass {
    /// Create a class reference.
    pub fn new(module: impl Into<ModuleId>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for WidgetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

/// One reload unit: a widget class, its polling interval and policy flags.
///
/// Owned exclusively by one isolated runtime for its entire life.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedWidget {
    /// Widget class to construct and keep swapped in.
    pub class: WidgetClass,
    /// Poll period in milliseconds.
    pub interval_ms: u64,
    /// Scan submodules for drift; drift triggers a root-only reload.
    pub check_sub_modules: bool,
    /// Additionally re-import changed submodules themselves.
    pub reload_sub_modules: bool,
    /// Canonicalize source before fingerprinting.
    pub use_minified_hash: bool,
    /// Run the lint-style quality gate before accepting a reload.
    pub use_quality_gate: bool,
    /// Module ids never scanned as submodules.
    pub excluded_sub_modules: Vec<ModuleId>,
}

impl WatchedWidget {
    /// Create a watched widget with all policy flags off.
    pub fn new(class: WidgetClass, interval_ms: u64) -> Self {
        Self {
            class,
            interval_ms,
            check_sub_modules: false,
            reload_sub_modules: false,
            use_minified_hash: false,
            use_quality_gate: false,
            excluded_sub_modules: Vec::new(),
        }
    }

    /// Enable submodule drift scanning.
    pub fn with_check_sub_modules(mut self, enabled: bool) -> Self {
        self.check_sub_modules = enabled;
        self
    }

    /// Enable re-importing changed submodules.
    pub fn with_reload_sub_modules(mut self, enabled: bool) -> Self {
        self.reload_sub_modules = enabled;
        self
    }

    /// Hash canonicalized source instead of raw bytes.
    pub fn with_minified_hash(mut self, enabled: bool) -> Self {
        self.use_minified_hash = enabled;
        self
    }

    /// Enable the pre-reload quality gate.
    pub fn with_quality_gate(mut self, enabled: bool) -> Self {
        self.use_quality_gate = enabled;
        self
    }

    /// Exclude a module id from submodule scanning.
    pub fn with_excluded_sub_module(mut self, module: impl Into<ModuleId>) -> Self {
        self.excluded_sub_modules.push(module.into());
        self
    }

    /// Display name of this reload unit (the widget class name).
    pub fn name(&self) -> &str {
        &self.class.name
    }

    /// Poll period as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Whether submodules are enumerated at all during a scan.
    pub fn scans_sub_modules(&self) -> bool {
        self.check_sub_modules || self.reload_sub_modules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_flags() {
        let widget = WatchedWidget::new(WidgetClass::new("app.main", "MainWidget"), 1000)
            .with_check_sub_modules(true)
            .with_minified_hash(true)
            .with_excluded_sub_module("app.generated");

        assert!(widget.check_sub_modules);
        assert!(!widget.reload_sub_modules);
        assert!(widget.scans_sub_modules());
        assert!(widget.use_minified_hash);
        assert_eq!(widget.excluded_sub_modules, vec![ModuleId::new("app.generated")]);
        assert_eq!(widget.name(), "MainWidget");
        assert_eq!(widget.interval(), Duration::from_millis(1000));
    }

    #[test]
    fn test_spawn_payload_round_trip() {
        let widget = WatchedWidget::new(WidgetClass::new("app.main", "MainWidget"), 250)
            .with_reload_sub_modules(true)
            .with_quality_gate(true);

        let payload = serde_json::to_string(&widget).unwrap();
        let back: WatchedWidget = serde_json::from_str(&payload).unwrap();

        assert_eq!(back.class, widget.class);
        assert_eq!(back.interval_ms, 250);
        assert!(back.reload_sub_modules);
        assert!(back.use_quality_gate);
    }
}
