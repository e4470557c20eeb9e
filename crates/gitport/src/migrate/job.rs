//! Per-project export→download→import state machine.
//!
//! A job walks one project through
//! `Pending → Exporting → ExportPolling → Downloading → Importing →
//! ImportPolling` and ends in exactly one of succeeded, skipped or failed.
//! Export and import are server-side jobs, so both polling phases wait on a
//! fixed interval under a per-phase deadline; a stuck remote job fails the
//! phase instead of holding a worker slot forever.
//!
//! The downloaded archive lives in a tempdir owned by the job and is removed
//! on every exit path.

use tokio::time::{Instant, sleep};

use crate::api::error::short_error_message;
use crate::api::{ApiError, ExportStatus, GitlabApi, GroupNode, ImportStatus, ProjectRef};
use crate::retry::with_retry;

use super::progress::{MigrateProgress, ProgressCallback, emit};
use super::types::{
    DELETE_SETTLE_DELAY, JobPhase, LARGE_ARCHIVE_WARN_BYTES, MigrateOptions, ProjectOutcome,
    ProjectStatus,
};

/// A phase-attributed job failure.
struct Fail {
    phase: JobPhase,
    reason: String,
}

impl Fail {
    fn new(phase: JobPhase, reason: impl Into<String>) -> Self {
        Self {
            phase,
            reason: reason.into(),
        }
    }

    fn api(phase: JobPhase, err: &ApiError) -> Self {
        Self::new(phase, short_error_message(err))
    }
}

enum Completed {
    Succeeded,
    Skipped(String),
}

/// Run one project's migration to a terminal outcome.
///
/// Never returns an error: every failure is converted into a
/// [`ProjectStatus::Failed`] record so the caller can keep scheduling
/// siblings.
pub async fn run_project_migration<A: GitlabApi>(
    source: &A,
    target: &A,
    project: &ProjectRef,
    target_group: &GroupNode,
    options: &MigrateOptions,
    on_progress: Option<&ProgressCallback>,
) -> ProjectOutcome {
    let target_full_path = format!("{}/{}", target_group.full_path, project.path);

    emit(
        on_progress,
        MigrateProgress::ProjectStarted {
            full_path: project.full_path.clone(),
        },
    );
    tracing::info!(project = %project.full_path, target = %target_full_path, "migrating project");

    let status = match migrate_project(
        source,
        target,
        project,
        target_group,
        &target_full_path,
        options,
        on_progress,
    )
    .await
    {
        Ok(Completed::Succeeded) => ProjectStatus::Succeeded,
        Ok(Completed::Skipped(reason)) => ProjectStatus::Skipped { reason },
        Err(failure) => ProjectStatus::Failed {
            phase: failure.phase,
            reason: failure.reason,
        },
    };

    match &status {
        ProjectStatus::Succeeded => {
            tracing::info!(project = %project.full_path, target = %target_full_path, "project migrated");
            emit(
                on_progress,
                MigrateProgress::ProjectSucceeded {
                    full_path: project.full_path.clone(),
                    target_full_path: target_full_path.clone(),
                },
            );
        }
        ProjectStatus::Skipped { reason } => {
            tracing::info!(project = %project.full_path, reason = %reason, "project skipped");
            emit(
                on_progress,
                MigrateProgress::ProjectSkipped {
                    full_path: project.full_path.clone(),
                    reason: reason.clone(),
                },
            );
        }
        ProjectStatus::Failed { phase, reason } => {
            tracing::error!(
                project = %project.full_path,
                phase = %phase,
                reason = %reason,
                "project migration failed"
            );
            emit(
                on_progress,
                MigrateProgress::ProjectFailed {
                    full_path: project.full_path.clone(),
                    phase: *phase,
                    reason: reason.clone(),
                },
            );
        }
    }

    ProjectOutcome {
        project: project.clone(),
        target_full_path,
        status,
    }
}

#[allow(clippy::too_many_arguments)]
async fn migrate_project<A: GitlabApi>(
    source: &A,
    target: &A,
    project: &ProjectRef,
    target_group: &GroupNode,
    target_full_path: &str,
    options: &MigrateOptions,
    on_progress: Option<&ProgressCallback>,
) -> Result<Completed, Fail> {
    // Overwrite decision before any work is queued on either instance.
    let existing = with_retry(
        &options.retry,
        "find_project",
        target_full_path,
        on_progress,
        || target.find_project(target_full_path),
    )
    .await
    .map_err(|e| Fail::api(JobPhase::Pending, &e))?;

    if let Some(existing) = existing {
        if !options.overwrite {
            return Ok(Completed::Skipped("already exists".into()));
        }
        tracing::warn!(
            project = %target_full_path,
            "target project exists, deleting before re-import"
        );
        with_retry(
            &options.retry,
            "delete_project",
            target_full_path,
            on_progress,
            || target.delete_project(existing.id),
        )
        .await
        .map_err(|e| Fail::api(JobPhase::Pending, &e))?;
        // Deletion is asynchronous on the server; give it a moment before
        // claiming the same path again.
        sleep(DELETE_SETTLE_DELAY).await;
    }

    emit_phase(on_progress, project, JobPhase::Exporting);
    let export_token = with_retry(
        &options.retry,
        "start_export",
        &project.full_path,
        on_progress,
        || source.start_export(project.id),
    )
    .await
    .map_err(|e| Fail::api(JobPhase::Exporting, &e))?;

    emit_phase(on_progress, project, JobPhase::ExportPolling);
    wait_for_export(source, project, export_token, options, on_progress).await?;

    emit_phase(on_progress, project, JobPhase::Downloading);
    let workdir = tempfile::Builder::new()
        .prefix("gitport-")
        .tempdir()
        .map_err(|e| Fail::new(JobPhase::Downloading, e.to_string()))?;
    let archive_path = workdir.path().join(format!("{}.tar.gz", project.path));

    let bytes = with_retry(
        &options.retry,
        "download_export",
        &project.full_path,
        on_progress,
        || source.download_export(export_token, &archive_path),
    )
    .await
    .map_err(|e| Fail::api(JobPhase::Downloading, &e))?;

    emit(
        on_progress,
        MigrateProgress::ArchiveDownloaded {
            full_path: project.full_path.clone(),
            bytes,
        },
    );
    if bytes > LARGE_ARCHIVE_WARN_BYTES {
        tracing::warn!(
            project = %project.full_path,
            size_mib = bytes / (1024 * 1024),
            "large export archive, import may hit the target's upload limit"
        );
    } else {
        tracing::debug!(project = %project.full_path, bytes, "export archive downloaded");
    }

    emit_phase(on_progress, project, JobPhase::Importing);
    let import_token = with_retry(
        &options.retry,
        "start_import",
        target_full_path,
        on_progress,
        || target.start_import(target_group.id, &project.name, &project.path, &archive_path),
    )
    .await
    .map_err(|e| Fail::api(JobPhase::Importing, &e))?;

    emit_phase(on_progress, project, JobPhase::ImportPolling);
    wait_for_import(target, project, import_token, options, on_progress).await?;

    // The tempdir would also be removed on drop; closing surfaces IO errors.
    if let Err(e) = workdir.close() {
        tracing::warn!(project = %project.full_path, error = %e, "failed to remove artifact dir");
    }

    Ok(Completed::Succeeded)
}

fn emit_phase(on_progress: Option<&ProgressCallback>, project: &ProjectRef, phase: JobPhase) {
    emit(
        on_progress,
        MigrateProgress::ProjectPhase {
            full_path: project.full_path.clone(),
            phase,
        },
    );
}

async fn wait_for_export<A: GitlabApi>(
    source: &A,
    project: &ProjectRef,
    token: crate::api::JobToken,
    options: &MigrateOptions,
    on_progress: Option<&ProgressCallback>,
) -> Result<(), Fail> {
    let deadline = Instant::now() + options.phase_timeout;
    loop {
        let status = with_retry(
            &options.retry,
            "poll_export",
            &project.full_path,
            on_progress,
            || source.poll_export(token),
        )
        .await
        .map_err(|e| Fail::api(JobPhase::ExportPolling, &e))?;

        match status {
            ExportStatus::Ready => return Ok(()),
            ExportStatus::Failed(reason) => {
                return Err(Fail::new(JobPhase::ExportPolling, reason));
            }
            ExportStatus::Pending => {
                if Instant::now() >= deadline {
                    return Err(Fail::new(
                        JobPhase::ExportPolling,
                        format!(
                            "export not ready after {}s",
                            options.phase_timeout.as_secs()
                        ),
                    ));
                }
                sleep(options.poll_interval).await;
            }
        }
    }
}

async fn wait_for_import<A: GitlabApi>(
    target: &A,
    project: &ProjectRef,
    token: crate::api::JobToken,
    options: &MigrateOptions,
    on_progress: Option<&ProgressCallback>,
) -> Result<(), Fail> {
    let deadline = Instant::now() + options.phase_timeout;
    loop {
        let status = with_retry(
            &options.retry,
            "poll_import",
            &project.full_path,
            on_progress,
            || target.poll_import(token),
        )
        .await
        .map_err(|e| Fail::api(JobPhase::ImportPolling, &e))?;

        match status {
            ImportStatus::Ready => return Ok(()),
            ImportStatus::Failed(reason) => {
                return Err(Fail::new(JobPhase::ImportPolling, reason));
            }
            ImportStatus::Pending => {
                if Instant::now() >= deadline {
                    return Err(Fail::new(
                        JobPhase::ImportPolling,
                        format!(
                            "import not ready after {}s",
                            options.phase_timeout.as_secs()
                        ),
                    ));
                }
                sleep(options.poll_interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{JobToken, ProjectHandle, Visibility};
    use crate::retry::RetryConfig;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted instance pair for state-machine tests.
    #[derive(Default)]
    struct ScriptedApi {
        existing_project: Option<ProjectHandle>,
        export_pending_polls: usize,
        export_fails: bool,
        import_fails_with: Option<String>,
        export_polls: AtomicUsize,
        deleted: Mutex<Vec<u64>>,
        downloaded_to: Mutex<Option<PathBuf>>,
        imports: Mutex<Vec<(u64, String, String)>>,
    }

    #[async_trait]
    impl GitlabApi for ScriptedApi {
        async fn get_group(&self, _full_path: &str) -> Result<Option<GroupNode>, ApiError> {
            Ok(None)
        }

        async fn create_group(
            &self,
            _name: &str,
            _path: &str,
            _parent_id: Option<u64>,
            _visibility: Visibility,
        ) -> Result<GroupNode, ApiError> {
            unreachable!("jobs never create groups")
        }

        async fn list_subgroups(&self, _group_id: u64) -> Result<Vec<GroupNode>, ApiError> {
            Ok(Vec::new())
        }

        async fn list_projects(&self, _group_id: u64) -> Result<Vec<ProjectRef>, ApiError> {
            Ok(Vec::new())
        }

        async fn find_project(&self, _full_path: &str) -> Result<Option<ProjectHandle>, ApiError> {
            Ok(self.existing_project.clone())
        }

        async fn delete_project(&self, project_id: u64) -> Result<(), ApiError> {
            self.deleted.lock().unwrap().push(project_id);
            Ok(())
        }

        async fn start_export(&self, project_id: u64) -> Result<JobToken, ApiError> {
            Ok(JobToken::new(project_id))
        }

        async fn poll_export(&self, _token: JobToken) -> Result<ExportStatus, ApiError> {
            if self.export_fails {
                return Ok(ExportStatus::Failed("export failed on source".into()));
            }
            let n = self.export_polls.fetch_add(1, Ordering::SeqCst);
            if n < self.export_pending_polls {
                Ok(ExportStatus::Pending)
            } else {
                Ok(ExportStatus::Ready)
            }
        }

        async fn download_export(&self, _token: JobToken, dest: &Path) -> Result<u64, ApiError> {
            tokio::fs::write(dest, b"archive").await?;
            *self.downloaded_to.lock().unwrap() = Some(dest.to_path_buf());
            Ok(7)
        }

        async fn start_import(
            &self,
            namespace_id: u64,
            name: &str,
            path: &str,
            archive: &Path,
        ) -> Result<JobToken, ApiError> {
            assert!(archive.exists(), "archive must exist when import starts");
            self.imports
                .lock()
                .unwrap()
                .push((namespace_id, name.to_string(), path.to_string()));
            Ok(JobToken::new(999))
        }

        async fn poll_import(&self, _token: JobToken) -> Result<ImportStatus, ApiError> {
            match &self.import_fails_with {
                Some(reason) => Ok(ImportStatus::Failed(reason.clone())),
                None => Ok(ImportStatus::Ready),
            }
        }
    }

    fn project() -> ProjectRef {
        ProjectRef {
            id: 10,
            name: "App".into(),
            path: "app".into(),
            full_path: "teamA/sub1/app".into(),
            group_full_path: "teamA/sub1".into(),
        }
    }

    fn target_group() -> GroupNode {
        GroupNode {
            id: 55,
            name: "sub1".into(),
            path: "sub1".into(),
            full_path: "teamA/sub1".into(),
            parent_id: Some(54),
            visibility: Visibility::Private,
        }
    }

    fn options() -> MigrateOptions {
        MigrateOptions {
            poll_interval: Duration::from_millis(10),
            phase_timeout: Duration::from_secs(60),
            retry: RetryConfig::new(Duration::from_millis(1), Duration::from_millis(2), 1)
                .with_jitter(false),
            ..MigrateOptions::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_state_machine_succeeds() {
        let source = ScriptedApi {
            export_pending_polls: 3,
            ..ScriptedApi::default()
        };
        let target = ScriptedApi::default();

        let outcome = run_project_migration(
            &source,
            &target,
            &project(),
            &target_group(),
            &options(),
            None,
        )
        .await;

        assert_eq!(outcome.status, ProjectStatus::Succeeded);
        assert_eq!(outcome.target_full_path, "teamA/sub1/app");
        // Export was polled until ready.
        assert!(source.export_polls.load(Ordering::SeqCst) >= 4);
        // Import went into the ensured namespace under the mirrored path.
        let imports = target.imports.lock().unwrap();
        assert_eq!(&*imports, &[(55, "App".to_string(), "app".to_string())]);

        // The artifact directory is gone.
        let downloaded = source.downloaded_to.lock().unwrap().clone().unwrap();
        assert!(!downloaded.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn existing_target_skips_without_delete_or_import() {
        let source = ScriptedApi::default();
        let target = ScriptedApi {
            existing_project: Some(ProjectHandle {
                id: 77,
                full_path: "teamA/sub1/app".into(),
            }),
            ..ScriptedApi::default()
        };

        let outcome = run_project_migration(
            &source,
            &target,
            &project(),
            &target_group(),
            &options(),
            None,
        )
        .await;

        assert_eq!(
            outcome.status,
            ProjectStatus::Skipped {
                reason: "already exists".into()
            }
        );
        assert!(target.deleted.lock().unwrap().is_empty());
        assert!(target.imports.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_deletes_then_migrates() {
        let source = ScriptedApi::default();
        let target = ScriptedApi {
            existing_project: Some(ProjectHandle {
                id: 77,
                full_path: "teamA/sub1/app".into(),
            }),
            ..ScriptedApi::default()
        };

        let options = MigrateOptions {
            overwrite: true,
            ..options()
        };
        let outcome = run_project_migration(
            &source,
            &target,
            &project(),
            &target_group(),
            &options,
            None,
        )
        .await;

        assert_eq!(outcome.status, ProjectStatus::Succeeded);
        assert_eq!(&*target.deleted.lock().unwrap(), &[77]);
        assert_eq!(target.imports.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn export_failure_is_attributed_to_polling_phase() {
        let source = ScriptedApi {
            export_fails: true,
            ..ScriptedApi::default()
        };
        let target = ScriptedApi::default();

        let outcome = run_project_migration(
            &source,
            &target,
            &project(),
            &target_group(),
            &options(),
            None,
        )
        .await;

        match outcome.status {
            ProjectStatus::Failed { phase, reason } => {
                assert_eq!(phase, JobPhase::ExportPolling);
                assert!(reason.contains("export failed"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(target.imports.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_export_times_out() {
        let source = ScriptedApi {
            // Never goes ready within the deadline.
            export_pending_polls: usize::MAX,
            ..ScriptedApi::default()
        };
        let target = ScriptedApi::default();

        let options = MigrateOptions {
            phase_timeout: Duration::from_millis(50),
            ..options()
        };
        let outcome = run_project_migration(
            &source,
            &target,
            &project(),
            &target_group(),
            &options,
            None,
        )
        .await;

        match outcome.status {
            ProjectStatus::Failed { phase, reason } => {
                assert_eq!(phase, JobPhase::ExportPolling);
                assert!(reason.contains("not ready after"));
            }
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn import_failure_cleans_up_artifact() {
        let source = ScriptedApi::default();
        let target = ScriptedApi {
            import_fails_with: Some("sidekiq blew up".into()),
            ..ScriptedApi::default()
        };

        let outcome = run_project_migration(
            &source,
            &target,
            &project(),
            &target_group(),
            &options(),
            None,
        )
        .await;

        match outcome.status {
            ProjectStatus::Failed { phase, reason } => {
                assert_eq!(phase, JobPhase::ImportPolling);
                assert_eq!(reason, "sidekiq blew up");
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let downloaded = source.downloaded_to.lock().unwrap().clone().unwrap();
        assert!(!downloaded.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_auth_error_fails_the_job_only() {
        struct DeniedExport(ScriptedApi);

        #[async_trait]
        impl GitlabApi for DeniedExport {
            async fn get_group(&self, p: &str) -> Result<Option<GroupNode>, ApiError> {
                self.0.get_group(p).await
            }
            async fn create_group(
                &self,
                n: &str,
                p: &str,
                pid: Option<u64>,
                v: Visibility,
            ) -> Result<GroupNode, ApiError> {
                self.0.create_group(n, p, pid, v).await
            }
            async fn list_subgroups(&self, id: u64) -> Result<Vec<GroupNode>, ApiError> {
                self.0.list_subgroups(id).await
            }
            async fn list_projects(&self, id: u64) -> Result<Vec<ProjectRef>, ApiError> {
                self.0.list_projects(id).await
            }
            async fn find_project(&self, p: &str) -> Result<Option<ProjectHandle>, ApiError> {
                self.0.find_project(p).await
            }
            async fn delete_project(&self, id: u64) -> Result<(), ApiError> {
                self.0.delete_project(id).await
            }
            async fn start_export(&self, _id: u64) -> Result<JobToken, ApiError> {
                Err(ApiError::Auth("export scope missing".into()))
            }
            async fn poll_export(&self, t: JobToken) -> Result<ExportStatus, ApiError> {
                self.0.poll_export(t).await
            }
            async fn download_export(&self, t: JobToken, d: &Path) -> Result<u64, ApiError> {
                self.0.download_export(t, d).await
            }
            async fn start_import(
                &self,
                ns: u64,
                n: &str,
                p: &str,
                a: &Path,
            ) -> Result<JobToken, ApiError> {
                self.0.start_import(ns, n, p, a).await
            }
            async fn poll_import(&self, t: JobToken) -> Result<ImportStatus, ApiError> {
                self.0.poll_import(t).await
            }
        }

        let source = DeniedExport(ScriptedApi::default());
        let target = DeniedExport(ScriptedApi::default());

        let outcome = run_project_migration(
            &source,
            &target,
            &project(),
            &target_group(),
            &options(),
            None,
        )
        .await;

        match outcome.status {
            ProjectStatus::Failed { phase, reason } => {
                assert_eq!(phase, JobPhase::Exporting);
                assert!(reason.contains("export scope missing"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
