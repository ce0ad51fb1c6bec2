// ─── Reconciliation engine ───
// One pass = resolve catalog → build plan → execute in dependency waves.
// Fetch/extract run concurrently per wave; the registry is only touched
// inside a brief serialized section.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::plan::{build_plan, Action, PlannedAction};
use super::report::{ModStatus, ReconcileReport, ReportEntry};
use crate::catalog::{Catalog, CatalogEntry};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::extract::Extractor;
use crate::fetch::Fetcher;
use crate::profile::{move_file, remove_file_if_exists, Profile, ProfileHandle};
use crate::registry::{ModId, ModRecord, Registry};

/// Shared cancellation flag. Checked between per-mod actions: whatever
/// already committed stays committed, whatever has not started reports
/// `skipped`.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives install/update/remove operations through Fetcher + Extractor,
/// updating the registry transactionally.
pub struct Reconciler {
    catalog: Arc<dyn Catalog>,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    config: SyncConfig,
}

impl Reconciler {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn Extractor>,
        config: SyncConfig,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            extractor,
            config,
        }
    }

    /// Run one reconciliation pass against a profile. Per-mod failures
    /// land in the report; only a store failure or a fully unreachable
    /// catalog aborts the pass.
    pub async fn reconcile(
        &self,
        profile: &Profile,
        handle: &ProfileHandle,
        cancel: &CancelFlag,
    ) -> SyncResult<ReconcileReport> {
        let _pass = handle.try_begin_pass(&profile.name)?;
        let started_at = Utc::now();
        info!(
            "Reconciling profile '{}' ({} tracked mod(s))",
            profile.name,
            profile.tracked.len()
        );

        let (entries, lookup_errors) = self.resolve_catalog(&profile.tracked).await;
        if !profile.tracked.is_empty()
            && entries.is_empty()
            && !lookup_errors.is_empty()
            && lookup_errors.values().all(|(_, network)| *network)
        {
            return Err(SyncError::CatalogUnreachable(format!(
                "all {} catalog lookup(s) failed",
                lookup_errors.len()
            )));
        }
        let lookup_errors: BTreeMap<ModId, String> = lookup_errors
            .into_iter()
            .map(|(id, (message, _))| (id, message))
            .collect();

        let snapshot = handle.registry.lock().await.clone();
        let plan = build_plan(&profile.tracked, &snapshot, &entries, &lookup_errors);
        debug!(
            "Plan for '{}': {} action(s), {} blocked",
            profile.name,
            plan.actions.len(),
            plan.blocked.len()
        );

        let mut results: BTreeMap<ModId, (ModStatus, Option<String>)> = BTreeMap::new();
        for (mod_id, reason) in &plan.blocked {
            results.insert(*mod_id, (ModStatus::Blocked, Some(reason.to_string())));
        }

        // Ids that did not complete this pass; dependents must not run.
        let mut unavailable: BTreeSet<ModId> = plan.blocked.keys().copied().collect();
        let mut fatal: Option<SyncError> = None;
        let mut cancelled = false;

        for wave in plan.waves() {
            if cancel.is_cancelled() {
                cancelled = true;
            }

            let mut runnable: Vec<PlannedAction> = Vec::new();
            for planned in wave {
                match planned.action {
                    Action::NoOp => {
                        results.insert(planned.mod_id, (ModStatus::NoOp, None));
                    }
                    _ if cancelled => {
                        results.insert(planned.mod_id, (ModStatus::Skipped, None));
                        unavailable.insert(planned.mod_id);
                    }
                    Action::Install { .. } | Action::Update { .. } => {
                        let failed_dep = entries
                            .get(&planned.mod_id)
                            .and_then(|e| {
                                e.dependencies
                                    .iter()
                                    .copied()
                                    .find(|dep| unavailable.contains(dep))
                            });
                        match failed_dep {
                            Some(dependency) => {
                                let err = SyncError::DependencyFailed {
                                    mod_id: planned.mod_id,
                                    dependency,
                                };
                                results.insert(
                                    planned.mod_id,
                                    (ModStatus::Failed, Some(err.to_string())),
                                );
                                unavailable.insert(planned.mod_id);
                            }
                            None => runnable.push(planned),
                        }
                    }
                    Action::Remove => runnable.push(planned),
                }
            }

            let outcomes: Vec<(ModId, SyncResult<ModStatus>)> = stream::iter(runnable)
                .map(|planned| {
                    let entries = &entries;
                    let snapshot = &snapshot;
                    async move {
                        if cancel.is_cancelled() {
                            return (planned.mod_id, Err(SyncError::Cancelled));
                        }
                        let result = self
                            .execute(profile, handle, planned, entries, snapshot)
                            .await;
                        (planned.mod_id, result)
                    }
                })
                .buffer_unordered(self.config.concurrency_limit.max(1))
                .collect()
                .await;

            for (mod_id, outcome) in outcomes {
                match outcome {
                    Ok(status) => {
                        results.insert(mod_id, (status, None));
                    }
                    Err(SyncError::Cancelled) => {
                        cancelled = true;
                        results.insert(mod_id, (ModStatus::Skipped, None));
                        unavailable.insert(mod_id);
                    }
                    Err(err) if err.is_fatal() => {
                        unavailable.insert(mod_id);
                        fatal = Some(err);
                    }
                    Err(err) => {
                        warn!("Action for mod {} failed: {}", mod_id, err);
                        results.insert(mod_id, (ModStatus::Failed, Some(err.to_string())));
                        unavailable.insert(mod_id);
                    }
                }
            }

            if let Some(err) = fatal.take() {
                return Err(err);
            }
        }

        let report = ReconcileReport {
            profile: profile.name.clone(),
            started_at,
            finished_at: Utc::now(),
            cancelled,
            entries: results
                .into_iter()
                .map(|(mod_id, (status, detail))| ReportEntry {
                    mod_id,
                    status,
                    detail,
                })
                .collect(),
        };
        info!(
            "Pass for '{}' finished: {}",
            profile.name,
            report.summary()
        );
        Ok(report)
    }

    /// Resolve the tracked set plus transitive dependencies against the
    /// catalog. Lookup failures are collected per id with a network
    /// marker instead of aborting the sweep.
    async fn resolve_catalog(
        &self,
        tracked: &BTreeSet<ModId>,
    ) -> (
        BTreeMap<ModId, CatalogEntry>,
        BTreeMap<ModId, (String, bool)>,
    ) {
        let mut entries: BTreeMap<ModId, CatalogEntry> = BTreeMap::new();
        let mut errors: BTreeMap<ModId, (String, bool)> = BTreeMap::new();
        let mut seen: BTreeSet<ModId> = tracked.iter().copied().collect();
        let mut frontier: VecDeque<ModId> = tracked.iter().copied().collect();

        while !frontier.is_empty() {
            let batch: Vec<ModId> = frontier.drain(..).collect();
            let looked_up: Vec<(ModId, SyncResult<CatalogEntry>)> = stream::iter(batch)
                .map(|mod_id| async move { (mod_id, self.catalog.latest(mod_id).await) })
                .buffer_unordered(self.config.concurrency_limit.max(1))
                .collect()
                .await;

            for (mod_id, result) in looked_up {
                match result {
                    Ok(entry) => {
                        for dep in &entry.dependencies {
                            if seen.insert(*dep) {
                                frontier.push_back(*dep);
                            }
                        }
                        entries.insert(mod_id, entry);
                    }
                    Err(err) => {
                        errors.insert(mod_id, (err.to_string(), err.is_network()));
                    }
                }
            }
        }

        (entries, errors)
    }

    async fn execute(
        &self,
        profile: &Profile,
        handle: &ProfileHandle,
        planned: PlannedAction,
        entries: &BTreeMap<ModId, CatalogEntry>,
        snapshot: &Registry,
    ) -> SyncResult<ModStatus> {
        match planned.action {
            Action::Install { .. } => {
                let entry = &entries[&planned.mod_id];
                self.apply_install(profile, handle, entry, None).await?;
                Ok(ModStatus::Installed)
            }
            Action::Update { .. } => {
                let entry = &entries[&planned.mod_id];
                let prior = snapshot.get(planned.mod_id).cloned();
                self.apply_install(profile, handle, entry, prior).await?;
                Ok(ModStatus::Updated)
            }
            Action::Remove => {
                let record = snapshot
                    .get(planned.mod_id)
                    .cloned()
                    .ok_or(SyncError::RecordNotFound(planned.mod_id))?;
                self.apply_remove(profile, handle, &record).await?;
                Ok(ModStatus::Removed)
            }
            Action::NoOp => Ok(ModStatus::NoOp),
        }
    }

    /// Fetch → extract to staging → move into place → upsert registry →
    /// clean stale files from the prior manifest. Any failure before the
    /// move leaves both disk and registry untouched.
    async fn apply_install(
        &self,
        profile: &Profile,
        handle: &ProfileHandle,
        entry: &CatalogEntry,
        prior: Option<ModRecord>,
    ) -> SyncResult<()> {
        let timeout = self.config.action_timeout();
        let archive = self
            .fetcher
            .fetch(entry.mod_id, entry.latest_version, timeout)
            .await?;

        if let Some(expected) = &entry.md5 {
            if !expected.eq_ignore_ascii_case(&archive.md5) {
                return Err(SyncError::ChecksumMismatch {
                    name: archive.file_name.clone(),
                    expected: expected.clone(),
                    actual: archive.md5.clone(),
                });
            }
        }

        let staging = profile
            .staging_dir()
            .join(format!("{}-{}", entry.mod_id, Uuid::new_v4()));
        let manifest = match tokio::time::timeout(
            timeout,
            self.extractor.extract(archive.bytes, &staging),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout {
                seconds: timeout.as_secs(),
            }),
        };
        let manifest = match manifest {
            Ok(manifest) => manifest,
            Err(err) => {
                let _ = std::fs::remove_dir_all(&staging);
                return Err(err);
            }
        };

        // Disabled mods receive their update under .disabledmods/ so the
        // enabled flag keeps meaning what it says.
        let enabled = prior.as_ref().map(|r| r.enabled).unwrap_or(true);
        let target_root = profile.content_root(enabled);

        let mut moved: Vec<&String> = Vec::new();
        for path in &manifest {
            match move_file(&staging.join(path), &target_root.join(path)) {
                Ok(()) => moved.push(path),
                Err(err) => {
                    for done in moved {
                        let _ = remove_file_if_exists(&target_root.join(done));
                    }
                    let _ = std::fs::remove_dir_all(&staging);
                    return Err(err);
                }
            }
        }
        let _ = std::fs::remove_dir_all(&staging);

        let mut record = ModRecord::new(
            entry.mod_id,
            entry.name.clone(),
            entry.latest_version,
            manifest.clone(),
            Some(archive.md5),
        );
        if let Some(prior) = &prior {
            record.enabled = prior.enabled;
            record.installed_at = prior.installed_at;
        }

        {
            let mut registry = handle.registry.lock().await;
            registry.upsert(record)?;
        }

        // Files from the previous version that the new archive no longer
        // ships are garbage now.
        if let Some(prior) = &prior {
            let keep: BTreeSet<&String> = manifest.iter().collect();
            for path in &prior.file_manifest {
                if keep.contains(path) {
                    continue;
                }
                for root in [profile.root_dir.clone(), profile.disabled_dir()] {
                    if let Err(err) = remove_file_if_exists(&root.join(path)) {
                        warn!("Could not clean stale file {:?}: {}", root.join(path), err);
                    }
                }
            }
        }

        Ok(())
    }

    /// Delete manifest files first, then the registry entry. Partial
    /// deletion keeps the entry with `pending_removal` so a retry resumes
    /// from the manifest instead of re-fetching.
    async fn apply_remove(
        &self,
        profile: &Profile,
        handle: &ProfileHandle,
        record: &ModRecord,
    ) -> SyncResult<()> {
        let mut failure: Option<SyncError> = None;
        for path in &record.file_manifest {
            for root in [profile.root_dir.clone(), profile.disabled_dir()] {
                if let Err(err) = remove_file_if_exists(&root.join(path)) {
                    warn!("Could not delete {:?}: {}", root.join(path), err);
                    failure.get_or_insert(err);
                }
            }
        }

        let mut registry = handle.registry.lock().await;
        match failure {
            Some(err) => {
                registry.mark_removal_pending(record.mod_id)?;
                Err(err)
            }
            None => {
                registry.remove(record.mod_id)?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use md5::{Digest, Md5};

    use crate::fetch::ModArchive;

    struct MockCatalog {
        entries: BTreeMap<ModId, CatalogEntry>,
        unreachable: bool,
        delay_ms: u64,
    }

    #[async_trait]
    impl Catalog for MockCatalog {
        async fn latest(&self, mod_id: ModId) -> SyncResult<CatalogEntry> {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.unreachable {
                return Err(SyncError::Timeout { seconds: 1 });
            }
            self.entries
                .get(&mod_id)
                .cloned()
                .ok_or(SyncError::ModNotFound(mod_id))
        }
    }

    /// Payloads are JSON-encoded `(path, content)` lists the mock
    /// extractor understands; `corrupt` mods yield garbage bytes.
    struct MockFetcher {
        payloads: BTreeMap<ModId, Vec<(String, String)>>,
        corrupt: BTreeSet<ModId>,
        order: StdMutex<Vec<ModId>>,
    }

    #[async_trait]
    impl Fetcher for MockFetcher {
        async fn fetch(
            &self,
            mod_id: ModId,
            _version_id: u64,
            _timeout: Duration,
        ) -> SyncResult<ModArchive> {
            self.order.lock().unwrap().push(mod_id);
            let bytes = if self.corrupt.contains(&mod_id) {
                b"corrupt".to_vec()
            } else {
                serde_json::to_vec(&self.payloads[&mod_id]).unwrap()
            };
            let mut hasher = Md5::new();
            hasher.update(&bytes);
            Ok(ModArchive {
                bytes,
                file_name: format!("mod-{mod_id}.zip"),
                md5: hex::encode(hasher.finalize()),
            })
        }
    }

    struct MockExtractor;

    #[async_trait]
    impl Extractor for MockExtractor {
        async fn extract(&self, bytes: Vec<u8>, staging: &std::path::Path) -> SyncResult<Vec<String>> {
            let files: Vec<(String, String)> = serde_json::from_slice(&bytes)
                .map_err(|_| SyncError::Zip(zip::result::ZipError::InvalidArchive("bad payload")))?;
            std::fs::create_dir_all(staging).unwrap();
            let mut manifest = Vec::new();
            for (path, content) in files {
                let target = staging.join(&path);
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).unwrap();
                }
                std::fs::write(&target, content).unwrap();
                manifest.push(path);
            }
            Ok(manifest)
        }
    }

    fn entry(mod_id: ModId, latest: u64, deps: &[ModId]) -> CatalogEntry {
        CatalogEntry {
            mod_id,
            name: format!("mod-{mod_id}"),
            latest_version: latest,
            dependencies: deps.iter().copied().collect(),
            download_url: format!("https://cdn.example/{mod_id}"),
            file_name: format!("mod-{mod_id}.zip"),
            file_size: None,
            md5: None,
        }
    }

    fn files(paths: &[(&str, &str)]) -> Vec<(String, String)> {
        paths
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect()
    }

    fn test_profile(tag: &str, tracked: &[ModId]) -> (Profile, ProfileHandle, PathBuf) {
        let dir = std::env::temp_dir().join(format!("engine-test-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let mut profile = Profile::new("Default", dir.join("mods"));
        std::fs::create_dir_all(profile.staging_dir()).unwrap();
        profile.tracked = tracked.iter().copied().collect();
        let handle = ProfileHandle::open(&profile).unwrap();
        (profile, handle, dir)
    }

    fn reconciler(
        entries: Vec<CatalogEntry>,
        payloads: BTreeMap<ModId, Vec<(String, String)>>,
        corrupt: &[ModId],
    ) -> (Reconciler, Arc<MockFetcher>) {
        let catalog = MockCatalog {
            entries: entries.into_iter().map(|e| (e.mod_id, e)).collect(),
            unreachable: false,
            delay_ms: 0,
        };
        let fetcher = Arc::new(MockFetcher {
            payloads,
            corrupt: corrupt.iter().copied().collect(),
            order: StdMutex::new(Vec::new()),
        });
        let engine = Reconciler::new(
            Arc::new(catalog),
            fetcher.clone(),
            Arc::new(MockExtractor),
            SyncConfig::default(),
        );
        (engine, fetcher)
    }

    #[tokio::test]
    async fn install_end_to_end() {
        let (profile, handle, dir) = test_profile("install", &[42]);
        let payloads = [(42, files(&[("mods/flash.pak", "light")]))]
            .into_iter()
            .collect();
        let (engine, _) = reconciler(vec![entry(42, 7, &[])], payloads, &[]);

        let report = engine
            .reconcile(&profile, &handle, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.status_of(42), Some(ModStatus::Installed));
        assert!(report.is_clean());

        let registry = handle.registry.lock().await;
        let record = registry.get(42).unwrap();
        assert_eq!(record.installed_version, 7);
        assert!(record.enabled);
        assert_eq!(record.file_manifest, vec!["mods/flash.pak".to_string()]);
        // Manifest matches the file actually on disk, and it survives a
        // fresh load from storage.
        assert_eq!(
            std::fs::read_to_string(profile.root_dir.join("mods/flash.pak")).unwrap(),
            "light"
        );
        let reloaded = Registry::load_or_create(&profile.registry_path()).unwrap();
        assert_eq!(reloaded.get(42).unwrap().installed_version, 7);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn second_pass_is_all_noop() {
        let (profile, handle, dir) = test_profile("noop", &[1, 2]);
        let payloads: BTreeMap<_, _> = [
            (1, files(&[("one.pak", "1")])),
            (2, files(&[("two.pak", "2")])),
        ]
        .into_iter()
        .collect();
        let (engine, _) = reconciler(
            vec![entry(1, 1, &[]), entry(2, 1, &[])],
            payloads,
            &[],
        );

        let first = engine
            .reconcile(&profile, &handle, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(first.count(ModStatus::Installed), 2);

        let second = engine
            .reconcile(&profile, &handle, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(second.count(ModStatus::NoOp), 2);
        assert_eq!(second.entries.len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn partial_failure_is_isolated() {
        let (profile, handle, dir) = test_profile("partial", &[1, 2]);
        let payloads: BTreeMap<_, _> = [
            (1, files(&[("one.pak", "1")])),
            (2, files(&[("two.pak", "2")])),
        ]
        .into_iter()
        .collect();
        let (engine, _) = reconciler(
            vec![entry(1, 1, &[]), entry(2, 1, &[])],
            payloads,
            &[1],
        );

        let report = engine
            .reconcile(&profile, &handle, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.status_of(1), Some(ModStatus::Failed));
        assert_eq!(report.status_of(2), Some(ModStatus::Installed));
        assert!(report
            .entries
            .iter()
            .find(|e| e.mod_id == 1)
            .unwrap()
            .detail
            .is_some());

        let registry = handle.registry.lock().await;
        assert!(!registry.contains(1));
        assert!(registry.contains(2));
        assert!(profile.root_dir.join("two.pak").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn dependencies_execute_before_dependents() {
        let (profile, handle, dir) = test_profile("deporder", &[30]);
        let payloads: BTreeMap<_, _> = [
            (10, files(&[("ten.pak", "10")])),
            (20, files(&[("twenty.pak", "20")])),
            (30, files(&[("thirty.pak", "30")])),
        ]
        .into_iter()
        .collect();
        let (engine, fetcher) = reconciler(
            vec![
                entry(10, 1, &[]),
                entry(20, 1, &[10]),
                entry(30, 1, &[20]),
            ],
            payloads,
            &[],
        );

        let report = engine
            .reconcile(&profile, &handle, &CancelFlag::new())
            .await
            .unwrap();
        assert!(report.is_clean());
        assert_eq!(*fetcher.order.lock().unwrap(), vec![10, 20, 30]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn dependent_of_failed_dependency_is_failed() {
        let (profile, handle, dir) = test_profile("depfail", &[20]);
        let payloads: BTreeMap<_, _> = [
            (10, files(&[("ten.pak", "10")])),
            (20, files(&[("twenty.pak", "20")])),
        ]
        .into_iter()
        .collect();
        let (engine, _) = reconciler(
            vec![entry(10, 1, &[]), entry(20, 1, &[10])],
            payloads,
            &[10],
        );

        let report = engine
            .reconcile(&profile, &handle, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.status_of(10), Some(ModStatus::Failed));
        assert_eq!(report.status_of(20), Some(ModStatus::Failed));

        let registry = handle.registry.lock().await;
        assert!(registry.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn overlapping_passes_get_exactly_one_busy() {
        let (profile, handle, dir) = test_profile("busy", &[1]);
        let catalog = MockCatalog {
            entries: [(1, entry(1, 1, &[]))].into_iter().collect(),
            unreachable: false,
            delay_ms: 50,
        };
        let fetcher = Arc::new(MockFetcher {
            payloads: [(1, files(&[("one.pak", "1")]))].into_iter().collect(),
            corrupt: BTreeSet::new(),
            order: StdMutex::new(Vec::new()),
        });
        let engine = Reconciler::new(
            Arc::new(catalog),
            fetcher,
            Arc::new(MockExtractor),
            SyncConfig::default(),
        );

        let cancel = CancelFlag::new();
        let (a, b) = tokio::join!(
            engine.reconcile(&profile, &handle, &cancel),
            engine.reconcile(&profile, &handle, &cancel),
        );
        let busy_count = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(SyncError::Busy(_))))
            .count();
        let ok_count = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(busy_count, 1);
        assert_eq!(ok_count, 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn untracked_mods_are_removed() {
        let (profile, handle, dir) = test_profile("remove", &[]);
        std::fs::write(profile.root_dir.join("nine.pak"), "9").unwrap();
        handle
            .registry
            .lock()
            .await
            .upsert(ModRecord::new(
                9,
                "Nine".into(),
                1,
                vec!["nine.pak".into()],
                None,
            ))
            .unwrap();

        let (engine, _) = reconciler(vec![], BTreeMap::new(), &[]);
        let report = engine
            .reconcile(&profile, &handle, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.status_of(9), Some(ModStatus::Removed));
        assert!(!profile.root_dir.join("nine.pak").exists());
        assert!(handle.registry.lock().await.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn failed_removal_marks_pending_and_retries() {
        let (profile, handle, dir) = test_profile("pending", &[]);
        // A non-empty directory where a file is expected makes the
        // deletion fail without any platform tricks.
        std::fs::create_dir_all(profile.root_dir.join("stuck/inner")).unwrap();
        std::fs::write(profile.root_dir.join("stuck/inner/x"), "x").unwrap();
        handle
            .registry
            .lock()
            .await
            .upsert(ModRecord::new(
                9,
                "Nine".into(),
                1,
                vec!["stuck".into()],
                None,
            ))
            .unwrap();

        let (engine, _) = reconciler(vec![], BTreeMap::new(), &[]);
        let report = engine
            .reconcile(&profile, &handle, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.status_of(9), Some(ModStatus::Failed));
        assert!(handle.registry.lock().await.get(9).unwrap().pending_removal);

        // Once the obstruction is gone the retry finishes the removal.
        std::fs::remove_dir_all(profile.root_dir.join("stuck")).unwrap();
        let report = engine
            .reconcile(&profile, &handle, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.status_of(9), Some(ModStatus::Removed));
        assert!(handle.registry.lock().await.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn unreachable_catalog_is_fatal_for_nonempty_tracked_set() {
        let (profile, handle, dir) = test_profile("unreachable", &[1]);
        let catalog = MockCatalog {
            entries: BTreeMap::new(),
            unreachable: true,
            delay_ms: 0,
        };
        let engine = Reconciler::new(
            Arc::new(catalog),
            Arc::new(MockFetcher {
                payloads: BTreeMap::new(),
                corrupt: BTreeSet::new(),
                order: StdMutex::new(Vec::new()),
            }),
            Arc::new(MockExtractor),
            SyncConfig::default(),
        );

        let err = engine
            .reconcile(&profile, &handle, &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::CatalogUnreachable(_)));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn cancelled_pass_skips_unstarted_actions() {
        let (profile, handle, dir) = test_profile("cancel", &[1]);
        let payloads = [(1, files(&[("one.pak", "1")]))].into_iter().collect();
        let (engine, _) = reconciler(vec![entry(1, 1, &[])], payloads, &[]);

        let cancel = CancelFlag::new();
        cancel.cancel();
        let report = engine.reconcile(&profile, &handle, &cancel).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.status_of(1), Some(ModStatus::Skipped));
        assert!(handle.registry.lock().await.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn update_replaces_files_and_cleans_stale_ones() {
        let (profile, handle, dir) = test_profile("update", &[7]);
        std::fs::write(profile.root_dir.join("old.pak"), "v1").unwrap();
        {
            let mut registry = handle.registry.lock().await;
            registry
                .upsert(ModRecord::new(
                    7,
                    "Seven".into(),
                    1,
                    vec!["old.pak".into()],
                    None,
                ))
                .unwrap();
        }

        let payloads = [(7, files(&[("new.pak", "v2")]))].into_iter().collect();
        let (engine, _) = reconciler(vec![entry(7, 2, &[])], payloads, &[]);

        let report = engine
            .reconcile(&profile, &handle, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.status_of(7), Some(ModStatus::Updated));
        assert!(!profile.root_dir.join("old.pak").exists());
        assert_eq!(
            std::fs::read_to_string(profile.root_dir.join("new.pak")).unwrap(),
            "v2"
        );

        let registry = handle.registry.lock().await;
        let record = registry.get(7).unwrap();
        assert_eq!(record.installed_version, 2);
        assert_eq!(record.file_manifest, vec!["new.pak".to_string()]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn update_of_disabled_mod_stays_disabled() {
        let (profile, handle, dir) = test_profile("disabled", &[3]);
        std::fs::create_dir_all(profile.disabled_dir()).unwrap();
        std::fs::write(profile.disabled_dir().join("a.pak"), "v1").unwrap();
        {
            let mut registry = handle.registry.lock().await;
            let mut record =
                ModRecord::new(3, "Three".into(), 1, vec!["a.pak".into()], None);
            record.enabled = false;
            registry.upsert(record).unwrap();
        }

        let payloads = [(3, files(&[("a.pak", "v2")]))].into_iter().collect();
        let (engine, _) = reconciler(vec![entry(3, 2, &[])], payloads, &[]);

        let report = engine
            .reconcile(&profile, &handle, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.status_of(3), Some(ModStatus::Updated));
        assert_eq!(
            std::fs::read_to_string(profile.disabled_dir().join("a.pak")).unwrap(),
            "v2"
        );
        assert!(!profile.root_dir.join("a.pak").exists());

        let registry = handle.registry.lock().await;
        assert!(!registry.get(3).unwrap().enabled);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
