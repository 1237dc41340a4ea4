//! Timer-driven reload scheduling
//!
//! One [`ReloadScheduler`] runs per watched widget, inside that widget's
//! isolated runtime. Every poll interval it scans the module graph,
//! optionally consults the quality gate, and hands an accepted plan to the
//! swap controller. A cycle runs to completion without yielding to the
//! next tick; the next tick is scheduled only after the previous cycle
//! finishes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::WatchedWidget;
use crate::fingerprint::Fingerprint;
use crate::gate::{GateVerdict, QualityGate};
use crate::module::{ModuleHost, ModuleId};
use crate::resolver::{DependencyResolver, ScanOutcome};
use crate::swap::{SwapError, WidgetInstanceId, WidgetSwapController, WidgetToolkit};

/// Scheduler state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerPhase {
    /// Waiting for the next timer tick.
    #[default]
    Idle,
    /// Fingerprinting the module graph.
    Scanning,
    /// Consulting the quality gate.
    Gating,
    /// Re-importing modules and swapping the widget.
    Applying,
}

/// Reload lifecycle events, broadcast per cycle.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ReloadEvent {
    /// A scan found drifted modules.
    ScanCompleted {
        widget: String,
        changed: Vec<ModuleId>,
    },
    /// The gate vetoed the pending plan.
    GateRejected {
        widget: String,
        diagnostics: Vec<String>,
    },
    /// An accepted plan is being applied.
    ReloadStarted {
        widget: String,
        modules: Vec<ModuleId>,
    },
    /// The apply finished and the widget was swapped.
    ReloadCompleted {
        widget: String,
        modules: Vec<ModuleId>,
        duration: Duration,
    },
    /// The apply aborted; the previous widget is retained.
    ReloadFailed { widget: String, error: String },
    /// A new instance replaced the old one in the container slot.
    WidgetSwapped {
        widget: String,
        old: Option<WidgetInstanceId>,
        new: WidgetInstanceId,
    },
}

/// What one poll cycle did.
#[derive(Debug)]
pub enum CycleOutcome {
    /// No drift, or the only change is still mid-write.
    NoChange,
    /// The gate vetoed; nothing was committed.
    GateRejected(Vec<String>),
    /// Modules re-imported and (if required) the widget reconstructed.
    Reloaded {
        modules: Vec<ModuleId>,
        instance: WidgetInstanceId,
    },
    /// The apply aborted; partially re-imported fingerprints committed.
    Failed(String),
}

enum GateDecision {
    Pass,
    Reject(Vec<String>),
    SourceMissing,
}

/// Per-widget reload loop: scan, gate, apply.
pub struct ReloadScheduler {
    cfg: WatchedWidget,
    resolver: DependencyResolver,
    gate: Option<Arc<dyn QualityGate>>,
    host: Box<dyn ModuleHost>,
    toolkit: Box<dyn WidgetToolkit>,
    swap: WidgetSwapController,
    fingerprints: HashMap<ModuleId, Fingerprint>,
    phase: SchedulerPhase,
    event_tx: broadcast::Sender<ReloadEvent>,
}

impl ReloadScheduler {
    /// Create a scheduler for one watched widget.
    pub fn new(
        cfg: WatchedWidget,
        resolver: DependencyResolver,
        host: Box<dyn ModuleHost>,
        toolkit: Box<dyn WidgetToolkit>,
        swap: WidgetSwapController,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            cfg,
            resolver,
            gate: None,
            host,
            toolkit,
            swap,
            fingerprints: HashMap::new(),
            phase: SchedulerPhase::Idle,
            event_tx,
        }
    }

    /// Attach a quality gate, consulted when the widget enables it.
    pub fn with_gate(mut self, gate: Arc<dyn QualityGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Subscribe to reload events.
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.event_tx.subscribe()
    }

    /// Current state machine phase.
    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    /// The live fingerprint table.
    pub fn fingerprints(&self) -> &HashMap<ModuleId, Fingerprint> {
        &self.fingerprints
    }

    /// Handle to the live widget (container slot + instance).
    pub fn swap_controller(&self) -> &WidgetSwapController {
        &self.swap
    }

    /// Prime the fingerprint table and mount the initial widget instance.
    pub async fn prime(&mut self) -> Result<WidgetInstanceId, SwapError> {
        let outcome = self
            .resolver
            .scan(&self.cfg, self.host.as_ref(), &self.fingerprints);
        self.fingerprints.extend(outcome.fresh);
        debug!(
            "Primed {} fingerprint(s) for {}",
            self.fingerprints.len(),
            self.cfg.name()
        );
        self.swap.mount(self.toolkit.as_mut()).await
    }

    /// Run one scan -> gate -> apply cycle to completion.
    pub async fn tick(&mut self) -> CycleOutcome {
        self.phase = SchedulerPhase::Scanning;
        let outcome = self
            .resolver
            .scan(&self.cfg, self.host.as_ref(), &self.fingerprints);

        if outcome.is_unchanged() {
            // Newly discovered modules still prime the table.
            for (id, fp) in outcome.fresh {
                self.fingerprints.entry(id).or_insert(fp);
            }
            self.phase = SchedulerPhase::Idle;
            return CycleOutcome::NoChange;
        }

        let _ = self.event_tx.send(ReloadEvent::ScanCompleted {
            widget: self.cfg.name().to_string(),
            changed: outcome.changed.iter().cloned().collect(),
        });

        if self.cfg.use_quality_gate {
            if self.gate.is_none() {
                warn!(
                    "Quality gate enabled for {} but none attached, proceeding ungated",
                    self.cfg.name()
                );
            }
            if let Some(gate) = self.gate.clone() {
                self.phase = SchedulerPhase::Gating;
                match self.gate_plan(gate.as_ref(), &outcome).await {
                    GateDecision::Pass => {}
                    GateDecision::Reject(diagnostics) => {
                        info!(
                            "Gate rejected pending reload of {} ({} diagnostic(s))",
                            self.cfg.name(),
                            diagnostics.len()
                        );
                        let _ = self.event_tx.send(ReloadEvent::GateRejected {
                            widget: self.cfg.name().to_string(),
                            diagnostics: diagnostics.clone(),
                        });
                        self.phase = SchedulerPhase::Idle;
                        return CycleOutcome::GateRejected(diagnostics);
                    }
                    GateDecision::SourceMissing => {
                        self.phase = SchedulerPhase::Idle;
                        return CycleOutcome::NoChange;
                    }
                }
            }
        }

        self.phase = SchedulerPhase::Applying;
        let _ = self.event_tx.send(ReloadEvent::ReloadStarted {
            widget: self.cfg.name().to_string(),
            modules: outcome.plan.reload_order.clone(),
        });

        let old = self.swap.handle().current;
        let start = Instant::now();
        let apply = self
            .swap
            .apply(&outcome.plan, self.host.as_mut(), self.toolkit.as_mut())
            .await;

        let cycle = match apply.result {
            Ok(instance) => {
                self.fingerprints.extend(outcome.fresh);
                let duration = start.elapsed();
                info!(
                    "Reloaded {} ({} module(s)) in {:?}",
                    self.cfg.name(),
                    outcome.plan.reload_order.len(),
                    duration
                );
                let _ = self.event_tx.send(ReloadEvent::ReloadCompleted {
                    widget: self.cfg.name().to_string(),
                    modules: outcome.plan.reload_order.clone(),
                    duration,
                });
                let _ = self.event_tx.send(ReloadEvent::WidgetSwapped {
                    widget: self.cfg.name().to_string(),
                    old,
                    new: instance,
                });
                CycleOutcome::Reloaded {
                    modules: outcome.plan.reload_order,
                    instance,
                }
            }
            Err(err) => {
                // A module that did re-import really did change; commit its
                // fingerprint so a later broken module cannot mask it.
                for module in &apply.reimported {
                    if let Some(fp) = outcome.fresh.get(module) {
                        self.fingerprints.insert(module.clone(), fp.clone());
                    }
                }
                warn!(
                    "Reload of {} failed, previous widget retained: {}",
                    self.cfg.name(),
                    err
                );
                let _ = self.event_tx.send(ReloadEvent::ReloadFailed {
                    widget: self.cfg.name().to_string(),
                    error: err.to_string(),
                });
                CycleOutcome::Failed(err.to_string())
            }
        };

        self.phase = SchedulerPhase::Idle;
        cycle
    }

    /// Gate every module in the pending plan; any rejection vetoes the
    /// whole plan. A gate that cannot run is logged and treated as a pass
    /// so an unavailable linter never wedges the development loop.
    async fn gate_plan(&self, gate: &dyn QualityGate, outcome: &ScanOutcome) -> GateDecision {
        for module in &outcome.plan.reload_order {
            let Some(path) = self.host.source_path(module) else {
                continue;
            };
            let source = match std::fs::read_to_string(&path) {
                Ok(source) => source,
                Err(err) => {
                    debug!(
                        "Source for {} unreadable while gating ({}), skipping cycle",
                        module, err
                    );
                    return GateDecision::SourceMissing;
                }
            };
            match gate.check(&source).await {
                Ok(GateVerdict::Pass) => {}
                Ok(GateVerdict::Reject(diagnostics)) => {
                    return GateDecision::Reject(diagnostics);
                }
                Err(err) => {
                    warn!("Quality gate unavailable ({}), allowing reload", err);
                }
            }
        }
        GateDecision::Pass
    }

    /// Run the reload loop until the shutdown channel fires.
    ///
    /// The interval uses delayed missed-tick behavior, so a slow cycle
    /// pushes the next tick out instead of bursting.
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) -> Result<(), SwapError> {
        self.prime().await?;

        let mut interval = tokio::time::interval(self.cfg.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let _ = self.tick().await;
                }
                _ = shutdown.recv() => {
                    info!("Reload loop for {} shutting down", self.cfg.name());
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_phase_is_idle() {
        assert_eq!(SchedulerPhase::default(), SchedulerPhase::Idle);
    }
}
