//! Widget swap execution
//!
//! Applies an accepted [`ReloadPlan`]: re-imports the module graph in
//! resolver order, constructs a fresh widget instance from the (possibly
//! newly bound) class, and atomically swaps it into the host container.
//! The previous instance is discarded; no state migrates across the swap.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::WidgetClass;
use crate::module::{ImportError, ModuleHost};
use crate::resolver::ReloadPlan;

/// Identity of one constructed widget instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WidgetInstanceId(Uuid);

impl WidgetInstanceId {
    /// Fresh instance id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for WidgetInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of the container slot holding the live widget.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Create a container id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error raised when the toolkit fails to construct a widget instance.
#[derive(Debug, Clone, thiserror::Error)]
#[error("constructing `{class}` failed: {reason}")]
pub struct ConstructError {
    /// Class whose no-argument construction raised.
    pub class: String,
    /// Toolkit-provided diagnostic.
    pub reason: String,
}

impl ConstructError {
    /// Create a construction error.
    pub fn new(class: &WidgetClass, reason: impl Into<String>) -> Self {
        Self {
            class: class.to_string(),
            reason: reason.into(),
        }
    }
}

/// Swap error types
#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    /// A module re-import failed mid-plan; the apply is aborted and the
    /// previous widget retained.
    #[error(transparent)]
    Import(#[from] ImportError),

    /// Construction of the new instance failed; handled like an import
    /// failure.
    #[error(transparent)]
    Construction(#[from] ConstructError),

    /// The container refused the child replacement.
    #[error("container swap failed: {0}")]
    Replace(String),
}

/// Narrow contract with the GUI toolkit.
///
/// Construction takes no arguments; replacement detaches the old instance
/// and inserts the new one in the same slot.
#[async_trait::async_trait]
pub trait WidgetToolkit: Send + Sync {
    /// Construct a new instance of the class's current binding.
    async fn construct(&mut self, class: &WidgetClass) -> Result<WidgetInstanceId, ConstructError>;

    /// Replace `old` with `new` in the container slot. `old` is `None`
    /// only for the initial mount.
    async fn replace_child(
        &mut self,
        container: &ContainerId,
        old: Option<WidgetInstanceId>,
        new: WidgetInstanceId,
    ) -> Result<(), SwapError>;
}

/// Current class binding of a watched module, resolved through one level
/// of indirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassBinding {
    /// Bumped on every rebind.
    pub generation: u64,
    /// Opaque token distinguishing bindings across reloads.
    pub token: Uuid,
}

/// Registry of live class bindings, keyed by module identity.
///
/// Re-importing a module rebinds its classes here; constructing a widget
/// resolves through the registry, so every holder observes the new binding
/// without touching the old one.
#[derive(Default)]
pub struct WidgetRegistry {
    bindings: RwLock<HashMap<WidgetClass, ClassBinding>>,
}

impl WidgetRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or refresh the binding for a class, returning the new cell
    /// contents.
    pub fn rebind(&self, class: &WidgetClass) -> ClassBinding {
        let mut bindings = self.bindings.write();
        let next = match bindings.get(class) {
            Some(current) => ClassBinding {
                generation: current.generation + 1,
                token: Uuid::now_v7(),
            },
            None => ClassBinding {
                generation: 0,
                token: Uuid::now_v7(),
            },
        };
        debug!("Rebinding {} at generation {}", class, next.generation);
        bindings.insert(class.clone(), next);
        next
    }

    /// Current binding of a class, if registered.
    pub fn resolve(&self, class: &WidgetClass) -> Option<ClassBinding> {
        self.bindings.read().get(class).copied()
    }
}

/// Back-reference to the displayed widget instance and its container
/// slot. Used only to locate and replace the instance, never to extend
/// its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveWidgetHandle {
    /// Parent container slot.
    pub container: ContainerId,
    /// Currently attached instance; `None` before the initial mount.
    pub current: Option<WidgetInstanceId>,
}

/// Result of one apply attempt.
#[derive(Debug)]
pub struct ApplyOutcome {
    /// Modules successfully re-imported this cycle, in order. Their
    /// fingerprints are committed even when a later module aborts the
    /// apply.
    pub reimported: Vec<crate::module::ModuleId>,
    /// The new live instance on success.
    pub result: Result<WidgetInstanceId, SwapError>,
}

/// Executes accepted reload plans against the module host and toolkit.
pub struct WidgetSwapController {
    class: WidgetClass,
    registry: Arc<WidgetRegistry>,
    handle: LiveWidgetHandle,
}

impl WidgetSwapController {
    /// Controller for one widget class living in `container`.
    pub fn new(class: WidgetClass, container: ContainerId, registry: Arc<WidgetRegistry>) -> Self {
        registry.rebind(&class);
        Self {
            class,
            registry,
            handle: LiveWidgetHandle {
                container,
                current: None,
            },
        }
    }

    /// The live handle (container slot + current instance).
    pub fn handle(&self) -> &LiveWidgetHandle {
        &self.handle
    }

    /// Class binding registry.
    pub fn registry(&self) -> &Arc<WidgetRegistry> {
        &self.registry
    }

    /// Construct and attach the initial instance.
    pub async fn mount(
        &mut self,
        toolkit: &mut dyn WidgetToolkit,
    ) -> Result<WidgetInstanceId, SwapError> {
        let instance = toolkit.construct(&self.class).await?;
        toolkit
            .replace_child(&self.handle.container, None, instance)
            .await?;
        self.handle.current = Some(instance);
        info!("Mounted initial instance {} of {}", instance, self.class);
        Ok(instance)
    }

    /// Apply an accepted plan.
    ///
    /// Re-imports every module in plan order; the first failure aborts the
    /// apply while still reporting the modules that did re-import. On full
    /// success the new instance replaces the old one in the same slot and
    /// the handle is updated. This is the only point where old widget
    /// state is discarded.
    pub async fn apply(
        &mut self,
        plan: &ReloadPlan,
        host: &mut dyn ModuleHost,
        toolkit: &mut dyn WidgetToolkit,
    ) -> ApplyOutcome {
        let mut reimported = Vec::with_capacity(plan.reload_order.len());

        for module in &plan.reload_order {
            match host.reimport(module).await {
                Ok(()) => {
                    debug!("Re-imported module {}", module);
                    if *module == self.class.module {
                        self.registry.rebind(&self.class);
                    }
                    reimported.push(module.clone());
                }
                Err(err) => {
                    error!("Aborting apply: {}", err);
                    return ApplyOutcome {
                        reimported,
                        result: Err(err.into()),
                    };
                }
            }
        }

        if !plan.reconstruct_root {
            if let Some(current) = self.handle.current {
                // Nothing rebinds the root; keep the live instance.
                return ApplyOutcome {
                    reimported,
                    result: Ok(current),
                };
            }
        }

        let new_instance = match toolkit.construct(&self.class).await {
            Ok(instance) => instance,
            Err(err) => {
                error!("Construction of {} failed: {}", self.class, err.reason);
                return ApplyOutcome {
                    reimported,
                    result: Err(err.into()),
                };
            }
        };

        let old = self.handle.current;
        if let Err(err) = toolkit
            .replace_child(&self.handle.container, old, new_instance)
            .await
        {
            error!("Swap of {} failed: {}", self.class, err);
            return ApplyOutcome {
                reimported,
                result: Err(err),
            };
        }

        self.handle.current = Some(new_instance);
        info!(
            "Swapped {} instance {:?} -> {}",
            self.class, old, new_instance
        );
        ApplyOutcome {
            reimported,
            result: Ok(new_instance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleId;
    use std::path::PathBuf;

    struct NullHost;

    #[async_trait::async_trait]
    impl ModuleHost for NullHost {
        fn source_path(&self, _module: &ModuleId) -> Option<PathBuf> {
            None
        }

        fn imports(&self, _module: &ModuleId) -> Vec<ModuleId> {
            Vec::new()
        }

        async fn reimport(&mut self, _module: &ModuleId) -> Result<(), ImportError> {
            Ok(())
        }
    }

    struct CountingToolkit {
        constructed: usize,
    }

    #[async_trait::async_trait]
    impl WidgetToolkit for CountingToolkit {
        async fn construct(
            &mut self,
            _class: &WidgetClass,
        ) -> Result<WidgetInstanceId, ConstructError> {
            self.constructed += 1;
            Ok(WidgetInstanceId::generate())
        }

        async fn replace_child(
            &mut self,
            _container: &ContainerId,
            _old: Option<WidgetInstanceId>,
            _new: WidgetInstanceId,
        ) -> Result<(), SwapError> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_rebind_bumps_generation() {
        let registry = WidgetRegistry::new();
        let class = WidgetClass::new("app.main", "MainWidget");

        assert!(registry.resolve(&class).is_none());

        let first = registry.rebind(&class);
        assert_eq!(first.generation, 0);

        let second = registry.rebind(&class);
        assert_eq!(second.generation, 1);
        assert_ne!(first.token, second.token);
        assert_eq!(registry.resolve(&class), Some(second));
    }

    #[test]
    fn test_instance_ids_are_distinct() {
        assert_ne!(WidgetInstanceId::generate(), WidgetInstanceId::generate());
    }

    #[test]
    fn test_controller_registers_class() {
        let registry = Arc::new(WidgetRegistry::new());
        let class = WidgetClass::new("app.main", "MainWidget");
        let controller = WidgetSwapController::new(
            class.clone(),
            ContainerId::new("slot-0"),
            registry.clone(),
        );

        assert!(registry.resolve(&class).is_some());
        assert_eq!(controller.handle().current, None);
        assert_eq!(controller.handle().container.as_str(), "slot-0");
    }

    #[tokio::test]
    async fn test_apply_without_reconstruct_keeps_live_instance() {
        let mut host = NullHost;
        let mut toolkit = CountingToolkit { constructed: 0 };
        let class = WidgetClass::new("app.main", "MainWidget");
        let mut controller = WidgetSwapController::new(
            class,
            ContainerId::new("slot-0"),
            Arc::new(WidgetRegistry::new()),
        );

        let mounted = controller.mount(&mut toolkit).await.unwrap();

        // A plan that re-imports helpers without touching the root keeps
        // the live instance in place.
        let plan = ReloadPlan {
            reload_order: vec![ModuleId::new("app.helper")],
            reconstruct_root: false,
        };
        let outcome = controller.apply(&plan, &mut host, &mut toolkit).await;

        assert_eq!(outcome.reimported, vec![ModuleId::new("app.helper")]);
        assert_eq!(outcome.result.unwrap(), mounted);
        assert_eq!(controller.handle().current, Some(mounted));
        assert_eq!(toolkit.constructed, 1);
    }
}
