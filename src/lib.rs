// ─── modsync ───
// Mod synchronization engine for mod.io-backed mod directories.
//
// Architecture:
//   registry/  — per-profile record of installed mods + durable store
//   profile/   — profile model + CRUD manager, enable/disable moves
//   catalog/   — Catalog trait + mod.io API client + page-URL parsing
//   fetch      — Fetcher trait + mod.io modfile downloader
//   extract    — Extractor trait + zip implementation
//   reconcile/ — plan computation + concurrent execution engine
//   state      — wired session (settings, profiles, reconciler)

pub mod catalog;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod http;
pub mod logging;
pub mod profile;
pub mod reconcile;
pub mod registry;
pub mod state;

pub use catalog::{Catalog, CatalogEntry, ModRef, ModioCatalog};
pub use config::{Settings, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use extract::{Extractor, ZipExtractor};
pub use fetch::{Fetcher, HttpFetcher, ModArchive};
pub use profile::{Profile, ProfileHandle, ProfileManager};
pub use reconcile::{
    Action, CancelFlag, ModStatus, ReconcilePlan, ReconcileReport, Reconciler, ReportEntry,
};
pub use registry::{ModId, ModRecord, Registry, VersionId};
pub use state::AppState;
