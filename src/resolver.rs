//! Module dependency resolution
//!
//! Rebuilds the watched widget's module graph on every scan, fingerprints
//! each enumerated module, and turns the observed drift into a
//! [`ReloadPlan`]: which modules must be physically re-imported, in what
//! order, and whether the root widget has to be reconstructed.
//!
//! The import graph is only known by asking the module host, so it is
//! re-discovered every cycle and stored as an explicit arena-backed DAG
//! rather than as live references into loaded code.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, error, warn};

use crate::config::WatchedWidget;
use crate::fingerprint::{Fingerprint, FingerprintError, SourceFingerprinter};
use crate::module::{ModuleHost, ModuleId, ModuleRecord};

/// Import graph over the modules enumerated by one scan.
///
/// Nodes live in an arena indexed by position; adjacency lists hold
/// importer -> importee edges.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    nodes: Vec<ModuleId>,
    index: HashMap<ModuleId, usize>,
    edges: Vec<Vec<usize>>,
}

impl ModuleGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node if absent, returning its arena index.
    pub fn ensure_node(&mut self, id: &ModuleId) -> usize {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(id.clone());
        self.index.insert(id.clone(), idx);
        self.edges.push(Vec::new());
        idx
    }

    /// Record that `importer` imports `importee`.
    pub fn add_import(&mut self, importer: &ModuleId, importee: &ModuleId) {
        let from = self.ensure_node(importer);
        let to = self.ensure_node(importee);
        if !self.edges[from].contains(&to) {
            self.edges[from].push(to);
        }
    }

    /// Whether the graph contains a module.
    pub fn contains(&self, id: &ModuleId) -> bool {
        self.index.contains_key(id)
    }

    /// Number of modules in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no modules.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All module ids in the graph.
    pub fn ids(&self) -> impl Iterator<Item = &ModuleId> {
        self.nodes.iter()
    }

    /// Whether `to` is reachable from `from` along import edges.
    pub fn reaches(&self, from: &ModuleId, to: &ModuleId) -> bool {
        let (Some(&start), Some(&goal)) = (self.index.get(from), self.index.get(to)) else {
            return false;
        };
        if start == goal {
            return false;
        }
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if node == goal {
                return true;
            }
            if seen[node] {
                continue;
            }
            seen[node] = true;
            stack.extend(self.edges[node].iter().copied());
        }
        false
    }
}

/// Output of one scan cycle: the modules to re-import, in re-import
/// order, plus whether the root widget must be reconstructed.
///
/// Ordering invariant: package parents come before the children within
/// them, importees before their importers, and the root widget module is
/// strictly last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadPlan {
    /// Modules to physically re-import, in order.
    pub reload_order: Vec<ModuleId>,
    /// Whether the widget instance must be torn down and rebuilt.
    pub reconstruct_root: bool,
}

impl ReloadPlan {
    /// Plan that does nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the plan requires no work.
    pub fn is_empty(&self) -> bool {
        self.reload_order.is_empty() && !self.reconstruct_root
    }
}

/// Everything one scan cycle learned.
#[derive(Debug)]
pub struct ScanOutcome {
    /// Modules whose fingerprint differs from the previous table.
    pub changed: BTreeSet<ModuleId>,
    /// Fresh fingerprints for every module read this cycle.
    pub fresh: HashMap<ModuleId, Fingerprint>,
    /// Per-module records, refreshed from this scan.
    pub records: HashMap<ModuleId, ModuleRecord>,
    /// The resulting reload plan.
    pub plan: ReloadPlan,
}

impl ScanOutcome {
    /// Whether the scan found no drift at all.
    pub fn is_unchanged(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Resolves, per scan, which modules changed and which must be reloaded.
pub struct DependencyResolver {
    fingerprinter: SourceFingerprinter,
}

impl DependencyResolver {
    /// Create a resolver using the given fingerprinter.
    pub fn new(fingerprinter: SourceFingerprinter) -> Self {
        Self { fingerprinter }
    }

    /// Run one scan over the widget's module graph.
    ///
    /// Enumerates the root module, its package ancestors, and (when either
    /// submodule flag is set) the transitive project-local import closure.
    /// Modules whose source is unreadable this cycle keep their previous
    /// fingerprint and are treated as unchanged.
    pub fn scan(
        &self,
        cfg: &WatchedWidget,
        host: &dyn ModuleHost,
        previous: &HashMap<ModuleId, Fingerprint>,
    ) -> ScanOutcome {
        let root = &cfg.class.module;
        let (targets, graph) = self.enumerate(cfg, host);

        let mut changed = BTreeSet::new();
        let mut fresh = HashMap::new();

        for id in &targets {
            let Some(path) = host.source_path(id) else {
                continue;
            };
            match self.fingerprinter.fingerprint(&path, cfg.use_minified_hash) {
                Ok(fp) => {
                    match previous.get(id) {
                        Some(prev) if *prev != fp => {
                            debug!("Module {} drifted", id);
                            changed.insert(id.clone());
                        }
                        Some(_) => {}
                        // First sighting primes the table without
                        // triggering a reload.
                        None => debug!("Priming fingerprint for module {}", id),
                    }
                    fresh.insert(id.clone(), fp);
                }
                Err(FingerprintError::SourceUnreadable { path, source }) => {
                    debug!(
                        "Source for {} unreadable ({}: {}), treating as unchanged",
                        id,
                        path.display(),
                        source
                    );
                    if let Some(prev) = previous.get(id) {
                        fresh.insert(id.clone(), prev.clone());
                    }
                }
                Err(FingerprintError::Canonicalization { path, reason }) => {
                    error!(
                        "Canonicalization of {} failed ({}): {}",
                        id,
                        path.display(),
                        reason
                    );
                    if let Some(prev) = previous.get(id) {
                        fresh.insert(id.clone(), prev.clone());
                    }
                }
            }
        }

        let plan = self.plan(cfg, root, &changed, &graph);

        let mut records = HashMap::new();
        for id in &targets {
            records.insert(
                id.clone(),
                ModuleRecord {
                    id: id.clone(),
                    fingerprint: fresh.get(id).or_else(|| previous.get(id)).cloned(),
                    parent: id.parent(),
                    is_root: id == root,
                },
            );
        }

        ScanOutcome {
            changed,
            fresh,
            records,
            plan,
        }
    }

    /// Enumerate scan targets and rebuild the import graph.
    fn enumerate(&self, cfg: &WatchedWidget, host: &dyn ModuleHost) -> (Vec<ModuleId>, ModuleGraph) {
        let root = &cfg.class.module;
        let mut graph = ModuleGraph::new();
        let mut targets = Vec::new();
        let mut seen = HashSet::new();

        // Parents of the root are always scan targets: reloading a child
        // requires the parent that imported it to be re-executed.
        for ancestor in root.ancestors() {
            if host.source_path(&ancestor).is_none() {
                debug!("Skipping ancestor {} without project source", ancestor);
                continue;
            }
            graph.ensure_node(&ancestor);
            seen.insert(ancestor.clone());
            targets.push(ancestor);
        }

        graph.ensure_node(root);
        seen.insert(root.clone());
        targets.push(root.clone());

        if cfg.scans_sub_modules() {
            let mut queue = vec![root.clone()];
            while let Some(current) = queue.pop() {
                for imported in host.imports(&current) {
                    if host.source_path(&imported).is_none() {
                        continue;
                    }
                    if cfg.excluded_sub_modules.contains(&imported) {
                        debug!("Submodule {} excluded from scanning", imported);
                        continue;
                    }
                    graph.add_import(&current, &imported);
                    if seen.insert(imported.clone()) {
                        targets.push(imported.clone());
                        queue.push(imported);
                    }
                }
            }
        }

        (targets, graph)
    }

    /// Turn the changed set into an ordered reload plan.
    fn plan(
        &self,
        cfg: &WatchedWidget,
        root: &ModuleId,
        changed: &BTreeSet<ModuleId>,
        graph: &ModuleGraph,
    ) -> ReloadPlan {
        if changed.is_empty() {
            return ReloadPlan::empty();
        }

        let changed_ancestors: Vec<ModuleId> = root
            .ancestors()
            .into_iter()
            .filter(|a| changed.contains(a))
            .collect();
        // Descendants of the root count as submodules too: re-importing a
        // parent does not re-execute an already-loaded child, so nesting
        // under the root package must not drop a changed module.
        let changed_subs: BTreeSet<ModuleId> = changed
            .iter()
            .filter(|id| *id != root && !id.is_ancestor_of(root))
            .filter(|id| !changed_ancestors.contains(id))
            .cloned()
            .collect();

        // Any observed drift implies the root must be rebuilt: either the
        // root (or an ancestor) changed, or submodule drift was scanned
        // precisely so that it triggers a root reload.
        let mut reload_order = changed_ancestors.clone();
        if cfg.reload_sub_modules {
            reload_order.extend(Self::order_sub_modules(&changed_subs, graph));
        } else if !changed_subs.is_empty() {
            debug!(
                "Submodule drift in {:?} triggers a root-only reload",
                changed_subs
            );
        }
        reload_order.push(root.clone());

        ReloadPlan {
            reload_order,
            reconstruct_root: true,
        }
    }

    /// Order changed submodules importee-first, so every module is
    /// re-imported before the modules that import it. Ties break on the
    /// module path for determinism.
    fn order_sub_modules(changed: &BTreeSet<ModuleId>, graph: &ModuleGraph) -> Vec<ModuleId> {
        let mut remaining: Vec<ModuleId> = changed.iter().cloned().collect();
        let mut ordered = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            // Pick the smallest module none of whose (transitive) imports
            // is still unplaced.
            let pick = remaining
                .iter()
                .position(|candidate| {
                    !remaining
                        .iter()
                        .any(|other| other != candidate && graph.reaches(candidate, other))
                })
                .unwrap_or_else(|| {
                    // Import cycle among the changed set; fall back to path
                    // order rather than stalling the reload.
                    warn!("Import cycle among changed submodules {:?}", remaining);
                    0
                });
            ordered.push(remaining.remove(pick));
        }

        ordered
    }
}
