//! Migration engine: bounded-concurrency scheduling and result collection.
//!
//! The engine drives the [`GroupWalker`](super::tree::GroupWalker) and, for
//! every discovered project, spawns one migration job gated by a semaphore.
//! Terminal outcomes travel over a channel to a single collector task that
//! owns the [`MigrationReport`]; workers never share mutable report state, so
//! a torn write is impossible by construction.
//!
//! A failing job is recorded and never cancels siblings or the run; the only
//! fatal error is failing to resolve the source group before anything starts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

use crate::api::{ApiError, GitlabApi, ProjectRef};
use crate::retry::with_retry;

use super::job;
use super::progress::{MigrateProgress, ProgressCallback, emit};
use super::tree::{GroupWalker, WalkItem};
use super::types::{
    GroupOutcome, GroupStatus, JobPhase, MigrateOptions, MigrationReport, ProjectOutcome,
    ProjectStatus,
};

/// Fatal startup errors. Everything past startup is recorded per project or
/// group instead of returned.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("source group not found: {0}")]
    SourceGroupNotFound(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

enum Collected {
    Project(ProjectOutcome),
    Group(GroupOutcome),
}

/// Migrate a whole source group tree onto the target instance.
///
/// At most `options.concurrency` project migrations are active at once; a
/// group's target counterpart is always ensured before any project under it
/// is dispatched. The call returns once every dispatched job has reached a
/// terminal state.
///
/// `shutdown`, when set, is checked between groups: a requested shutdown
/// stops further dispatch while in-flight jobs run to completion. Server-side
/// export/import jobs already started are never retracted.
pub async fn migrate_group_tree<A>(
    source: &A,
    target: &A,
    source_group: &str,
    options: &MigrateOptions,
    shutdown: Option<&AtomicBool>,
    on_progress: Option<Arc<ProgressCallback>>,
) -> Result<MigrationReport, MigrateError>
where
    A: GitlabApi + Clone + Send + Sync + 'static,
{
    let root = with_retry(
        &options.retry,
        "get_group",
        source_group,
        on_progress.as_deref(),
        || source.get_group(source_group),
    )
    .await?
    .ok_or_else(|| MigrateError::SourceGroupNotFound(source_group.to_string()))?;

    tracing::info!(
        group = %root.full_path,
        id = root.id,
        concurrency = options.concurrency,
        overwrite = options.overwrite,
        "starting migration"
    );

    let target_root_path = options
        .target_group
        .clone()
        .unwrap_or_else(|| root.full_path.clone());

    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<Collected>(64);

    // Single aggregation point for all terminal outcomes.
    let collector: JoinHandle<MigrationReport> = tokio::spawn(async move {
        let mut report = MigrationReport::default();
        while let Some(item) = outcome_rx.recv().await {
            match item {
                Collected::Project(outcome) => report.record_project(outcome),
                Collected::Group(outcome) => report.record_group(outcome),
            }
        }
        report
    });

    let mut walker = GroupWalker::new(
        source,
        target,
        root,
        target_root_path,
        &options.retry,
        on_progress.as_deref(),
    );

    // Join handles keep project identity so a panicking task still yields
    // exactly one recorded outcome.
    let mut handles: Vec<(ProjectRef, String, JoinHandle<()>)> = Vec::new();

    loop {
        if shutdown.is_some_and(|flag| flag.load(Ordering::Acquire)) {
            tracing::warn!("shutdown requested, not dispatching further groups");
            break;
        }
        let Some(item) = walker.next().await else {
            break;
        };

        match item {
            WalkItem::Group(group) => {
                emit(
                    on_progress.as_deref(),
                    MigrateProgress::GroupEnsured {
                        source_path: group.source.full_path.clone(),
                        target_path: group.target.full_path.clone(),
                        created: group.created,
                    },
                );
                let status = if group.created {
                    GroupStatus::Created
                } else {
                    GroupStatus::Reused
                };
                let _ = outcome_tx
                    .send(Collected::Group(GroupOutcome {
                        source_path: group.source.full_path.clone(),
                        target_path: group.target.full_path.clone(),
                        status,
                    }))
                    .await;

                for project in group.projects {
                    let target_full_path =
                        format!("{}/{}", group.target.full_path, project.path);

                    let source = source.clone();
                    let target = target.clone();
                    let target_group = group.target.clone();
                    let options = options.clone();
                    let semaphore = Arc::clone(&semaphore);
                    let tx = outcome_tx.clone();
                    let progress = on_progress.clone();
                    let job_project = project.clone();

                    let handle = tokio::spawn(async move {
                        let _permit = match semaphore.acquire().await {
                            Ok(permit) => permit,
                            Err(_) => {
                                let _ = tx
                                    .send(Collected::Project(ProjectOutcome {
                                        target_full_path: format!(
                                            "{}/{}",
                                            target_group.full_path, job_project.path
                                        ),
                                        project: job_project,
                                        status: ProjectStatus::Failed {
                                            phase: JobPhase::Pending,
                                            reason: "scheduler semaphore closed".into(),
                                        },
                                    }))
                                    .await;
                                return;
                            }
                        };

                        let outcome = job::run_project_migration(
                            &source,
                            &target,
                            &job_project,
                            &target_group,
                            &options,
                            progress.as_deref(),
                        )
                        .await;
                        let _ = tx.send(Collected::Project(outcome)).await;
                    });

                    handles.push((project, target_full_path, handle));
                }
            }
            WalkItem::FailedBranch(branch) => {
                emit(
                    on_progress.as_deref(),
                    MigrateProgress::GroupFailed {
                        source_path: branch.source_path.clone(),
                        reason: branch.reason.clone(),
                        skipped_projects: branch.skipped_projects.len(),
                    },
                );
                let _ = outcome_tx
                    .send(Collected::Group(GroupOutcome {
                        source_path: branch.source_path.clone(),
                        target_path: branch.target_path.clone(),
                        status: GroupStatus::Failed {
                            reason: branch.reason.clone(),
                        },
                    }))
                    .await;

                // Per-project skip events are not emitted here; the
                // GroupFailed event above carries the count and the report
                // carries the detail.
                for project in branch.skipped_projects {
                    let target_full_path = format!("{}/{}", branch.target_path, project.path);
                    let _ = outcome_tx
                        .send(Collected::Project(ProjectOutcome {
                            project,
                            target_full_path,
                            status: ProjectStatus::Skipped {
                                reason: "parent group unavailable".into(),
                            },
                        }))
                        .await;
                }
            }
        }
    }

    // Wait for every dispatched job; a panic still produces one outcome.
    for (project, target_full_path, handle) in handles {
        if let Err(join_err) = handle.await {
            tracing::error!(
                project = %project.full_path,
                error = %join_err,
                "migration task panicked"
            );
            let _ = outcome_tx
                .send(Collected::Project(ProjectOutcome {
                    project,
                    target_full_path,
                    status: ProjectStatus::Failed {
                        phase: JobPhase::Pending,
                        reason: format!("task panicked: {join_err}"),
                    },
                }))
                .await;
        }
    }

    drop(outcome_tx);
    let report = match collector.await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "report collector task failed");
            MigrationReport::default()
        }
    };

    emit(
        on_progress.as_deref(),
        MigrateProgress::RunComplete {
            succeeded: report.succeeded(),
            skipped: report.skipped(),
            failed: report.failed(),
            groups_failed: report.groups_failed(),
        },
    );
    tracing::info!(
        succeeded = report.succeeded(),
        skipped = report.skipped(),
        failed = report.failed(),
        groups_created = report.groups_created(),
        groups_failed = report.groups_failed(),
        "migration finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        ExportStatus, GroupNode, ImportStatus, JobToken, ProjectHandle, Visibility,
    };
    use crate::retry::RetryConfig;
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;

    /// Instance with a single empty root group.
    #[derive(Clone)]
    struct LoneGroup {
        root: Option<GroupNode>,
    }

    #[async_trait]
    impl GitlabApi for LoneGroup {
        async fn get_group(&self, full_path: &str) -> Result<Option<GroupNode>, ApiError> {
            Ok(self
                .root
                .clone()
                .filter(|g| g.full_path == full_path))
        }

        async fn create_group(
            &self,
            name: &str,
            path: &str,
            parent_id: Option<u64>,
            visibility: Visibility,
        ) -> Result<GroupNode, ApiError> {
            Ok(GroupNode {
                id: 100,
                name: name.to_string(),
                path: path.to_string(),
                full_path: path.to_string(),
                parent_id,
                visibility,
            })
        }

        async fn list_subgroups(&self, _group_id: u64) -> Result<Vec<GroupNode>, ApiError> {
            Ok(Vec::new())
        }

        async fn list_projects(&self, _group_id: u64) -> Result<Vec<ProjectRef>, ApiError> {
            Ok(Vec::new())
        }

        async fn find_project(&self, _full_path: &str) -> Result<Option<ProjectHandle>, ApiError> {
            Ok(None)
        }

        async fn delete_project(&self, _project_id: u64) -> Result<(), ApiError> {
            Ok(())
        }

        async fn start_export(&self, project_id: u64) -> Result<JobToken, ApiError> {
            Ok(JobToken::new(project_id))
        }

        async fn poll_export(&self, _token: JobToken) -> Result<ExportStatus, ApiError> {
            Ok(ExportStatus::Ready)
        }

        async fn download_export(&self, _token: JobToken, _dest: &Path) -> Result<u64, ApiError> {
            Ok(0)
        }

        async fn start_import(
            &self,
            _namespace_id: u64,
            _name: &str,
            _path: &str,
            _archive: &Path,
        ) -> Result<JobToken, ApiError> {
            Ok(JobToken::new(1))
        }

        async fn poll_import(&self, _token: JobToken) -> Result<ImportStatus, ApiError> {
            Ok(ImportStatus::Ready)
        }
    }

    fn options() -> MigrateOptions {
        MigrateOptions {
            retry: RetryConfig::new(Duration::from_millis(1), Duration::from_millis(2), 1)
                .with_jitter(false),
            ..MigrateOptions::default()
        }
    }

    #[tokio::test]
    async fn missing_source_group_is_fatal() {
        let instance = LoneGroup { root: None };
        let err = migrate_group_tree(&instance, &instance, "ghost", &options(), None, None)
            .await
            .expect_err("expected startup failure");
        assert!(matches!(err, MigrateError::SourceGroupNotFound(path) if path == "ghost"));
    }

    #[tokio::test]
    async fn empty_tree_produces_group_outcome_only() {
        let root = GroupNode {
            id: 1,
            name: "teamA".into(),
            path: "teamA".into(),
            full_path: "teamA".into(),
            parent_id: None,
            visibility: Visibility::Private,
        };
        let instance = LoneGroup { root: Some(root) };

        let report = migrate_group_tree(&instance, &instance, "teamA", &options(), None, None)
            .await
            .expect("run succeeds");

        assert!(report.projects.is_empty());
        assert_eq!(report.groups.len(), 1);
        // The lone group already existed on the "target" (same fake).
        assert_eq!(report.groups_reused(), 1);
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn shutdown_before_walk_dispatches_nothing() {
        let root = GroupNode {
            id: 1,
            name: "teamA".into(),
            path: "teamA".into(),
            full_path: "teamA".into(),
            parent_id: None,
            visibility: Visibility::Private,
        };
        let instance = LoneGroup { root: Some(root) };

        let flag = AtomicBool::new(true);
        let report = migrate_group_tree(
            &instance,
            &instance,
            "teamA",
            &options(),
            Some(&flag),
            None,
        )
        .await
        .expect("run succeeds");

        assert!(report.projects.is_empty());
        assert!(report.groups.is_empty());
    }
}
