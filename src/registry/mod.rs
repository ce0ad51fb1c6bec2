pub mod model;
pub mod store;

pub use model::{ModId, ModRecord, VersionId};
pub use store::Registry;
