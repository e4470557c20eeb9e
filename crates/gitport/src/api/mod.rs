//! GitLab API capability surface.
//!
//! The orchestrator never talks to an instance directly; everything goes
//! through the [`GitlabApi`] trait. The production implementation is
//! [`RestClient`] (GitLab v4 REST); tests substitute an in-memory fake.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod error;
pub mod rest;
mod types;

pub use error::ApiError;
pub use rest::RestClient;

/// Visibility level of a group or project.
///
/// Created target groups copy the visibility of their source counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Internal,
    Public,
}

impl Visibility {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Internal => "internal",
            Visibility::Public => "public",
        }
    }
}

/// A group as seen on one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupNode {
    /// Numeric id on the owning instance.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Last path segment.
    pub path: String,
    /// Slash-joined path from the instance root.
    pub full_path: String,
    /// Parent group id, `None` for top-level groups.
    pub parent_id: Option<u64>,
    pub visibility: Visibility,
}

/// Immutable snapshot of a source project, captured at discovery time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRef {
    /// Numeric id on the source instance.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Last path segment.
    pub path: String,
    /// Slash-joined path from the instance root.
    pub full_path: String,
    /// Full path of the group that directly owns this project.
    pub group_full_path: String,
}

/// A project that already exists on the target instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectHandle {
    pub id: u64,
    pub full_path: String,
}

/// Opaque handle for polling a server-side export or import job.
///
/// GitLab reports export/import status per project, so the token wraps the
/// project id on the instance that runs the job. Callers treat it as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobToken(u64);

impl JobToken {
    #[must_use]
    pub fn new(project_id: u64) -> Self {
        Self(project_id)
    }

    #[must_use]
    pub fn project_id(self) -> u64 {
        self.0
    }
}

/// Status of a server-side export job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStatus {
    /// Queued or still running.
    Pending,
    /// Archive is ready for download.
    Ready,
    /// The server gave up on the export.
    Failed(String),
}

/// Status of a server-side import job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportStatus {
    Pending,
    Ready,
    Failed(String),
}

/// Capability interface onto a single GitLab instance.
///
/// One client per instance; a migration run holds two (source and target).
/// Implementations are expected to be cheap to clone so jobs can run in
/// spawned tasks.
#[async_trait]
pub trait GitlabApi: Send + Sync {
    /// Look up a group by full path. `Ok(None)` when it does not exist.
    async fn get_group(&self, full_path: &str) -> Result<Option<GroupNode>, ApiError>;

    /// Create a group. Fails with [`ApiError::Conflict`] when the path was
    /// taken concurrently; callers re-resolve by lookup in that case.
    async fn create_group(
        &self,
        name: &str,
        path: &str,
        parent_id: Option<u64>,
        visibility: Visibility,
    ) -> Result<GroupNode, ApiError>;

    /// Direct subgroups of a group.
    async fn list_subgroups(&self, group_id: u64) -> Result<Vec<GroupNode>, ApiError>;

    /// Projects directly owned by a group (no subgroup projects).
    async fn list_projects(&self, group_id: u64) -> Result<Vec<ProjectRef>, ApiError>;

    /// Look up a project by full path. `Ok(None)` when it does not exist.
    async fn find_project(&self, full_path: &str) -> Result<Option<ProjectHandle>, ApiError>;

    async fn delete_project(&self, project_id: u64) -> Result<(), ApiError>;

    /// Kick off an asynchronous export job for a project.
    async fn start_export(&self, project_id: u64) -> Result<JobToken, ApiError>;

    async fn poll_export(&self, token: JobToken) -> Result<ExportStatus, ApiError>;

    /// Stream a finished export archive to `dest`. Returns the byte count.
    async fn download_export(&self, token: JobToken, dest: &Path) -> Result<u64, ApiError>;

    /// Kick off an asynchronous import of `archive` into the given namespace.
    async fn start_import(
        &self,
        namespace_id: u64,
        name: &str,
        path: &str,
        archive: &Path,
    ) -> Result<JobToken, ApiError>;

    async fn poll_import(&self, token: JobToken) -> Result<ImportStatus, ApiError>;
}
