use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;

use crate::catalog::CatalogEntry;
use crate::registry::{ModId, Registry, VersionId};

/// One step of a reconciliation plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Install { version: VersionId },
    Update { from: VersionId, to: VersionId },
    Remove,
    NoOp,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PlannedAction {
    pub mod_id: ModId,
    pub action: Action,
    /// Dependency depth: every dependency sits in an earlier wave than
    /// its dependents, so waves can execute as concurrent batches.
    pub wave: usize,
}

/// Why a mod was excluded from the executable part of the plan.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockReason {
    /// The mod itself could not be resolved against the catalog.
    Catalog { error: String },
    /// A dependency is missing from the catalog or itself blocked.
    DependencyBlocked { dependency: ModId },
    /// The mod participates in a dependency cycle.
    DependencyCycle,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::Catalog { error } => write!(f, "catalog lookup failed: {error}"),
            BlockReason::DependencyBlocked { dependency } => {
                write!(f, "dependency {dependency} is blocked")
            }
            BlockReason::DependencyCycle => write!(f, "dependency cycle"),
        }
    }
}

/// Immutable output of the planning phase: ordered executable actions
/// plus the blocked set with reasons.
#[derive(Debug, Serialize)]
pub struct ReconcilePlan {
    pub actions: Vec<PlannedAction>,
    pub blocked: BTreeMap<ModId, BlockReason>,
}

impl ReconcilePlan {
    pub fn action_of(&self, mod_id: ModId) -> Option<Action> {
        self.actions
            .iter()
            .find(|a| a.mod_id == mod_id)
            .map(|a| a.action)
    }

    /// Actions grouped by wave, preserving the ascending-id order inside
    /// each wave.
    pub fn waves(&self) -> Vec<Vec<PlannedAction>> {
        let mut waves: Vec<Vec<PlannedAction>> = Vec::new();
        for action in &self.actions {
            while waves.len() <= action.wave {
                waves.push(Vec::new());
            }
            waves[action.wave].push(*action);
        }
        waves.retain(|wave| !wave.is_empty());
        waves
    }

    pub fn is_all_noop(&self) -> bool {
        self.blocked.is_empty() && self.actions.iter().all(|a| a.action == Action::NoOp)
    }
}

/// Compute the minimal set of actions bringing the registry in line with
/// the tracked set and the resolved catalog entries.
///
/// `catalog` holds every entry the pass could resolve; `lookup_errors`
/// holds the ids it could not, with the error text. Mods with unresolved
/// or cyclic dependencies are blocked individually; planning always
/// continues for the rest.
pub fn build_plan(
    tracked: &BTreeSet<ModId>,
    registry: &Registry,
    catalog: &BTreeMap<ModId, CatalogEntry>,
    lookup_errors: &BTreeMap<ModId, String>,
) -> ReconcilePlan {
    let mut blocked: BTreeMap<ModId, BlockReason> = BTreeMap::new();

    // Desired set: tracked mods plus transitive dependencies.
    let mut desired: BTreeSet<ModId> = BTreeSet::new();
    let mut queue: VecDeque<ModId> = tracked.iter().copied().collect();
    while let Some(mod_id) = queue.pop_front() {
        if desired.contains(&mod_id) || blocked.contains_key(&mod_id) {
            continue;
        }
        match catalog.get(&mod_id) {
            Some(entry) => {
                desired.insert(mod_id);
                for dep in &entry.dependencies {
                    queue.push_back(*dep);
                }
            }
            None => {
                let error = lookup_errors
                    .get(&mod_id)
                    .cloned()
                    .unwrap_or_else(|| "not resolved".to_string());
                blocked.insert(mod_id, BlockReason::Catalog { error });
            }
        }
    }

    // Propagate blocking upward: a mod whose dependency is missing or
    // blocked cannot be acted on either. Every dependency id went
    // through the queue above, so "missing" and "blocked" coincide here.
    loop {
        let mut newly_blocked: Vec<(ModId, BlockReason)> = Vec::new();
        for mod_id in &desired {
            let entry = &catalog[mod_id];
            for dep in &entry.dependencies {
                if blocked.contains_key(dep) {
                    newly_blocked.push((
                        *mod_id,
                        BlockReason::DependencyBlocked { dependency: *dep },
                    ));
                    break;
                }
            }
        }
        if newly_blocked.is_empty() {
            break;
        }
        for (mod_id, reason) in newly_blocked {
            desired.remove(&mod_id);
            blocked.insert(mod_id, reason);
        }
    }

    // Wave assignment via Kahn's algorithm; whatever never becomes ready
    // is in a cycle (or behind one).
    let mut waves: BTreeMap<ModId, usize> = BTreeMap::new();
    let mut remaining: BTreeSet<ModId> = desired.clone();
    loop {
        let ready: Vec<ModId> = remaining
            .iter()
            .copied()
            .filter(|id| {
                catalog[id]
                    .dependencies
                    .iter()
                    .filter(|dep| desired.contains(dep))
                    .all(|dep| waves.contains_key(dep))
            })
            .collect();
        if ready.is_empty() {
            break;
        }
        for mod_id in ready {
            let wave = catalog[&mod_id]
                .dependencies
                .iter()
                .filter_map(|dep| waves.get(dep))
                .max()
                .map(|w| w + 1)
                .unwrap_or(0);
            waves.insert(mod_id, wave);
            remaining.remove(&mod_id);
        }
    }
    for mod_id in &remaining {
        let reason = if reaches_itself(*mod_id, &remaining, catalog) {
            BlockReason::DependencyCycle
        } else {
            let dependency = catalog[mod_id]
                .dependencies
                .iter()
                .copied()
                .find(|dep| remaining.contains(dep))
                .unwrap_or(*mod_id);
            BlockReason::DependencyBlocked { dependency }
        };
        blocked.insert(*mod_id, reason);
    }
    for mod_id in &remaining {
        desired.remove(mod_id);
    }

    // Install / update / no-op for the executable desired set.
    let mut actions: Vec<PlannedAction> = Vec::new();
    for (mod_id, wave) in &waves {
        let entry = &catalog[mod_id];
        let action = match registry.get(*mod_id) {
            None => Action::Install {
                version: entry.latest_version,
            },
            // A half-removed record cannot be trusted; reinstall fresh.
            Some(record) if record.pending_removal => Action::Install {
                version: entry.latest_version,
            },
            Some(record) if record.installed_version != entry.latest_version => Action::Update {
                from: record.installed_version,
                to: entry.latest_version,
            },
            Some(_) => Action::NoOp,
        };
        actions.push(PlannedAction {
            mod_id: *mod_id,
            action,
            wave: *wave,
        });
    }

    // Installed mods no longer desired (and not blocked) are removed in
    // a final wave.
    let remove_wave = waves.values().max().map(|w| w + 1).unwrap_or(0);
    for mod_id in registry.mod_ids() {
        if !desired.contains(&mod_id) && !blocked.contains_key(&mod_id) {
            actions.push(PlannedAction {
                mod_id,
                action: Action::Remove,
                wave: remove_wave,
            });
        }
    }

    actions.sort_by_key(|a| (a.wave, a.mod_id));
    ReconcilePlan { actions, blocked }
}

fn reaches_itself(
    start: ModId,
    within: &BTreeSet<ModId>,
    catalog: &BTreeMap<ModId, CatalogEntry>,
) -> bool {
    let mut stack: Vec<ModId> = catalog[&start]
        .dependencies
        .iter()
        .copied()
        .filter(|dep| within.contains(dep))
        .collect();
    let mut seen: BTreeSet<ModId> = BTreeSet::new();
    while let Some(node) = stack.pop() {
        if node == start {
            return true;
        }
        if !seen.insert(node) {
            continue;
        }
        if let Some(entry) = catalog.get(&node) {
            stack.extend(
                entry
                    .dependencies
                    .iter()
                    .copied()
                    .filter(|dep| within.contains(dep)),
            );
        }
    }
    false
}
