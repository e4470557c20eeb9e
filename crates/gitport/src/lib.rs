//! Gitport - mirror a GitLab group tree onto another instance.
//!
//! This library drives a 1:1 migration of a group hierarchy and all of its
//! projects from a source GitLab instance to a target instance. Export and
//! import are asynchronous server-side jobs, so the core of the library is an
//! orchestrator: a group-tree walker that ensures target groups exist before
//! anything underneath them runs, a per-project export→download→import state
//! machine, and a scheduler that keeps a bounded number of those state
//! machines in flight at once.
//!
//! # Example
//!
//! ```ignore
//! use gitport::api::RestClient;
//! use gitport::migrate::{migrate_group_tree, MigrateOptions};
//!
//! let source = RestClient::new("https://gitlab.old.example", "token-a", timeout, true, None)?;
//! let target = RestClient::new("https://gitlab.new.example", "token-b", timeout, true, None)?;
//!
//! let report = migrate_group_tree(&source, &target, "teamA", &MigrateOptions::default(), None, None).await?;
//! println!("{} migrated, {} skipped, {} failed", report.succeeded(), report.skipped(), report.failed());
//! ```

pub mod api;
pub mod migrate;
pub mod retry;

pub use api::{ApiError, ExportStatus, GitlabApi, GroupNode, ImportStatus, JobToken, ProjectRef};
pub use migrate::{
    MigrateError, MigrateOptions, MigrateProgress, MigrationReport, ProgressCallback,
    migrate_group_tree,
};
pub use retry::{ApiRateLimiter, RetryConfig};
