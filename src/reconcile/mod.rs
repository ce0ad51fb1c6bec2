pub mod engine;
pub mod plan;
pub mod report;

pub use engine::{CancelFlag, Reconciler};
pub use plan::{Action, BlockReason, PlannedAction, ReconcilePlan};
pub use report::{ModStatus, ReconcileReport, ReportEntry};
