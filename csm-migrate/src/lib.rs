//! csm-migrate library interface
//!
//! Migrates a nested content tree exported from a source site into a headless
//! content store: uploads referenced assets, creates entries bottom-up, moves
//! the root through the editorial workflow, deep-publishes it, and rolls back
//! whatever the run created when it cannot finish.

pub mod error;
pub mod models;
pub mod report;
pub mod run;
pub mod services;
pub mod types;
pub mod utils;

pub use crate::error::{AssetError, MigrateError, MigrateResult, StoreError};
pub use crate::report::{MaterializationReport, RunOutcome};
pub use crate::run::MigrationRun;
pub use crate::types::{AssetStore, ContentStore, EntryHandle, NodePath};
