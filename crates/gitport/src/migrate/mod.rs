//! Migration orchestrator.
//!
//! # Module Structure
//!
//! - [`types`] - Options, outcomes and the [`MigrationReport`]
//! - [`progress`] - Progress events: [`MigrateProgress`], [`ProgressCallback`], [`emit()`]
//! - [`tree`] - Group-tree walker: ensures target groups ahead of their projects
//! - [`job`] - Per-project export→download→import state machine
//! - [`engine`] - Bounded-concurrency scheduler: [`migrate_group_tree()`]
//!
//! # Example
//!
//! ```ignore
//! use gitport::migrate::{migrate_group_tree, MigrateOptions};
//!
//! let options = MigrateOptions { overwrite: true, ..MigrateOptions::default() };
//! let report = migrate_group_tree(&source, &target, "teamA", &options, None, None).await?;
//! assert!(!report.has_failures());
//! ```

pub mod engine;
pub mod job;
mod progress;
pub mod tree;
mod types;

pub use engine::{MigrateError, migrate_group_tree};
pub use progress::{MigrateProgress, ProgressCallback, emit};
pub use types::{
    DEFAULT_CONCURRENCY, DEFAULT_PHASE_TIMEOUT, DEFAULT_POLL_INTERVAL, DELETE_SETTLE_DELAY,
    GroupOutcome, GroupStatus, JobPhase, LARGE_ARCHIVE_WARN_BYTES, MigrateOptions,
    MigrationReport, ProjectOutcome, ProjectStatus,
};
