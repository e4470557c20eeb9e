//! Options, outcomes and report types for migration runs.

use std::time::Duration;

use crate::api::ProjectRef;
use crate::retry::RetryConfig;

/// Default number of concurrently active project migrations.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default delay between export/import status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default ceiling on a single export or import wait.
///
/// A stuck server-side job otherwise holds a worker slot forever.
pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(600);

/// Wait after deleting an existing target project before re-importing.
///
/// GitLab processes deletion asynchronously; importing into the same path too
/// quickly fails with a path-taken error.
pub const DELETE_SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Archive size above which a warning is logged.
pub const LARGE_ARCHIVE_WARN_BYTES: u64 = 100 * 1024 * 1024;

/// Options for a migration run.
#[derive(Debug, Clone)]
pub struct MigrateOptions {
    /// Root path on the target. Defaults to the source group path, which
    /// yields an exact 1:1 mirror.
    pub target_group: Option<String>,
    /// Maximum concurrently active project migrations.
    pub concurrency: usize,
    /// Replace existing target projects instead of skipping them.
    pub overwrite: bool,
    /// Delay between export/import status polls.
    pub poll_interval: Duration,
    /// Ceiling on a single export or import wait.
    pub phase_timeout: Duration,
    /// Retry policy for individual API calls.
    pub retry: RetryConfig,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            target_group: None,
            concurrency: DEFAULT_CONCURRENCY,
            overwrite: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            phase_timeout: DEFAULT_PHASE_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }
}

/// Phase a migration job is in; recorded on failure outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Pending,
    Exporting,
    ExportPolling,
    Downloading,
    Importing,
    ImportPolling,
}

impl JobPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobPhase::Pending => "pending",
            JobPhase::Exporting => "exporting",
            JobPhase::ExportPolling => "export polling",
            JobPhase::Downloading => "downloading",
            JobPhase::Importing => "importing",
            JobPhase::ImportPolling => "import polling",
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of one project migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectStatus {
    Succeeded,
    Skipped { reason: String },
    Failed { phase: JobPhase, reason: String },
}

/// Terminal record for one project.
#[derive(Debug, Clone)]
pub struct ProjectOutcome {
    pub project: ProjectRef,
    /// Mirrored path on the target instance.
    pub target_full_path: String,
    pub status: ProjectStatus,
}

/// What happened to one target-side group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupStatus {
    /// Created fresh on the target.
    Created,
    /// Already existed with the mirrored path.
    Reused,
    /// Could not be created or resolved; descendants were skipped.
    Failed { reason: String },
}

/// Terminal record for one group.
#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub source_path: String,
    pub target_path: String,
    pub status: GroupStatus,
}

/// Aggregate outcome of a run.
///
/// Append-only; fed exclusively by the engine's collector task and read once
/// at the end to produce the summary and the process exit status.
#[derive(Debug, Default)]
pub struct MigrationReport {
    pub projects: Vec<ProjectOutcome>,
    pub groups: Vec<GroupOutcome>,
}

impl MigrationReport {
    pub fn record_project(&mut self, outcome: ProjectOutcome) {
        self.projects.push(outcome);
    }

    pub fn record_group(&mut self, outcome: GroupOutcome) {
        self.groups.push(outcome);
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.projects
            .iter()
            .filter(|o| matches!(o.status, ProjectStatus::Succeeded))
            .count()
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.projects
            .iter()
            .filter(|o| matches!(o.status, ProjectStatus::Skipped { .. }))
            .count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.projects
            .iter()
            .filter(|o| matches!(o.status, ProjectStatus::Failed { .. }))
            .count()
    }

    #[must_use]
    pub fn groups_created(&self) -> usize {
        self.groups
            .iter()
            .filter(|o| o.status == GroupStatus::Created)
            .count()
    }

    #[must_use]
    pub fn groups_reused(&self) -> usize {
        self.groups
            .iter()
            .filter(|o| o.status == GroupStatus::Reused)
            .count()
    }

    #[must_use]
    pub fn groups_failed(&self) -> usize {
        self.groups
            .iter()
            .filter(|o| matches!(o.status, GroupStatus::Failed { .. }))
            .count()
    }

    /// Whether the run should exit nonzero: any failed project or group.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed() > 0 || self.groups_failed() > 0
    }
}
