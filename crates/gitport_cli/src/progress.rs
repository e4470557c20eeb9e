//! Progress reporting for migration runs.
//!
//! Two modes:
//! - Interactive mode (TTY): animated progress bars using indicatif
//! - Logging mode (non-TTY): structured logging using tracing
//!
//! Interactive mode keeps two bars: one spinner for group discovery/creation
//! and one bar for project migrations, whose length grows as the walker
//! streams projects in.

use std::sync::{Arc, Mutex};

use console::Term;
use gitport::migrate::{MigrateProgress, ProgressCallback};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Progress reporter that handles both interactive and logging modes.
pub enum ProgressReporter {
    /// Interactive progress bars for TTY.
    Interactive(InteractiveReporter),
    /// Structured logging for non-TTY (CI, pipes).
    Logging(LoggingReporter),
}

impl ProgressReporter {
    /// Create a new progress reporter, auto-detecting TTY mode.
    pub fn new() -> Self {
        if Term::stdout().is_term() {
            Self::Interactive(InteractiveReporter::new())
        } else {
            Self::Logging(LoggingReporter::new())
        }
    }

    /// Handle a progress event.
    pub fn handle(&self, event: MigrateProgress) {
        match self {
            Self::Interactive(r) => r.handle(event),
            Self::Logging(r) => r.handle(event),
        }
    }

    /// Convert to a ProgressCallback for the library.
    pub fn as_callback(self: &Arc<Self>) -> Arc<ProgressCallback> {
        let reporter = Arc::clone(self);
        Arc::new(Box::new(move |event| {
            reporter.handle(event);
        }))
    }

    /// Finish all progress bars (interactive mode only).
    pub fn finish(&self) {
        if let Self::Interactive(r) = self {
            r.finish();
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Consolidated progress state under a single lock.
#[derive(Default)]
struct ProgressState {
    group_bar: Option<ProgressBar>,
    groups_ensured: usize,
    groups_created: usize,
    project_bar: Option<ProgressBar>,
    /// Projects dispatched so far; bar length tracks this.
    dispatched: usize,
    /// Projects with a terminal outcome; bar position tracks this.
    finished: usize,
}

/// Interactive progress reporter using indicatif.
pub struct InteractiveReporter {
    multi: MultiProgress,
    state: Mutex<ProgressState>,
}

impl InteractiveReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            state: Mutex::new(ProgressState::default()),
        }
    }

    fn group_bar<'a>(&self, state: &'a mut ProgressState) -> &'a ProgressBar {
        state.group_bar.get_or_insert_with(|| {
            let pb = self.multi.add(ProgressBar::new_spinner());
            pb.set_style(Self::spinner_style());
            pb.set_prefix(format!("{:10}", "Groups"));
            pb.enable_steady_tick(std::time::Duration::from_millis(100));
            pb
        })
    }

    fn project_bar<'a>(&self, state: &'a mut ProgressState) -> &'a ProgressBar {
        let dispatched = state.dispatched;
        state.project_bar.get_or_insert_with(|| {
            let pb = self.multi.add(ProgressBar::new(dispatched as u64));
            pb.set_style(Self::bar_style());
            pb.set_prefix(format!("{:10}", "Projects"));
            pb
        })
    }

    /// Handle a progress event.
    pub fn handle(&self, event: MigrateProgress) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        match event {
            MigrateProgress::DiscoveringGroup { path } => {
                self.group_bar(&mut state)
                    .set_message(format!("discovering {path}"));
            }

            MigrateProgress::GroupEnsured {
                target_path,
                created,
                ..
            } => {
                state.groups_ensured += 1;
                if created {
                    state.groups_created += 1;
                }
                let ensured = state.groups_ensured;
                let fresh = state.groups_created;
                let verb = if created { "created" } else { "found" };
                self.group_bar(&mut state).set_message(format!(
                    "{ensured} ensured ({fresh} created) - {verb} {target_path}"
                ));
            }

            MigrateProgress::GroupFailed {
                source_path,
                reason,
                skipped_projects,
            } => {
                drop(state);
                self.multi
                    .println(format!(
                        "✗ group {source_path}: {reason} ({skipped_projects} projects skipped)"
                    ))
                    .ok();
            }

            MigrateProgress::ProjectStarted { full_path } => {
                state.dispatched += 1;
                let dispatched = state.dispatched;
                let pb = self.project_bar(&mut state);
                pb.set_length(dispatched as u64);
                pb.set_message(full_path);
            }

            MigrateProgress::ProjectPhase { full_path, phase } => {
                if let Some(ref pb) = state.project_bar {
                    pb.set_message(format!("{full_path}: {phase}"));
                }
            }

            MigrateProgress::ArchiveDownloaded { full_path, bytes } => {
                if let Some(ref pb) = state.project_bar {
                    pb.set_message(format!(
                        "{full_path}: {:.1} MiB downloaded",
                        bytes as f64 / (1024.0 * 1024.0)
                    ));
                }
            }

            MigrateProgress::ProjectSucceeded {
                target_full_path, ..
            } => {
                state.finished += 1;
                let finished = state.finished;
                let pb = self.project_bar(&mut state);
                pb.set_position(finished as u64);
                pb.set_message(format!("✓ {target_full_path}"));
            }

            MigrateProgress::ProjectSkipped { full_path, reason } => {
                state.finished += 1;
                let finished = state.finished;
                let pb = self.project_bar(&mut state);
                pb.set_position(finished as u64);
                pb.set_message(format!("· {full_path} ({reason})"));
            }

            MigrateProgress::ProjectFailed {
                full_path,
                phase,
                reason,
            } => {
                state.finished += 1;
                let finished = state.finished;
                let pb = self.project_bar(&mut state);
                pb.set_position(finished as u64);
                pb.set_message(format!("✗ {full_path} ({phase}: {reason})"));
            }

            MigrateProgress::RetryBackoff {
                operation,
                subject,
                retry_after_ms,
                attempt,
            } => {
                if let Some(ref pb) = state.project_bar {
                    pb.set_message(format!(
                        "⏳ {subject}: {operation} retry {attempt} in {:.1}s",
                        retry_after_ms as f64 / 1000.0
                    ));
                }
            }

            MigrateProgress::RunComplete {
                succeeded,
                skipped,
                failed,
                groups_failed,
            } => {
                if let Some(ref pb) = state.group_bar {
                    let msg = if groups_failed > 0 {
                        format!(
                            "✓ {} ensured ({} created), {groups_failed} failed",
                            state.groups_ensured, state.groups_created
                        )
                    } else {
                        format!(
                            "✓ {} ensured ({} created)",
                            state.groups_ensured, state.groups_created
                        )
                    };
                    pb.finish_with_message(msg);
                }
                if let Some(ref pb) = state.project_bar {
                    pb.finish_with_message(format!(
                        "✓ {succeeded} migrated, {skipped} skipped, {failed} failed"
                    ));
                }
            }

            _ => {}
        }
    }

    /// Finish all progress bars.
    pub fn finish(&self) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ref pb) = state.group_bar {
            if !pb.is_finished() {
                pb.finish();
            }
        }
        if let Some(ref pb) = state.project_bar {
            if !pb.is_finished() {
                pb.finish();
            }
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.cyan} {spinner:.green} {msg}")
            .expect("Invalid template")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {pos:>3}/{len:3} {msg}")
            .expect("Invalid template")
            .progress_chars("█▓░")
    }
}

impl Default for InteractiveReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    /// Handle a progress event.
    pub fn handle(&self, event: MigrateProgress) {
        match event {
            MigrateProgress::DiscoveringGroup { path } => {
                tracing::debug!(group = %path, "Discovering group");
            }

            MigrateProgress::GroupEnsured {
                source_path,
                target_path,
                created,
            } => {
                if created {
                    tracing::info!(source = %source_path, target = %target_path, "Created target group");
                } else {
                    tracing::info!(source = %source_path, target = %target_path, "Using existing target group");
                }
            }

            MigrateProgress::GroupFailed {
                source_path,
                reason,
                skipped_projects,
            } => {
                tracing::error!(
                    group = %source_path,
                    reason = %reason,
                    skipped_projects,
                    "Target group unavailable"
                );
            }

            MigrateProgress::ProjectStarted { full_path } => {
                tracing::info!(project = %full_path, "Migrating project");
            }

            MigrateProgress::ProjectPhase { full_path, phase } => {
                tracing::debug!(project = %full_path, phase = %phase, "Phase change");
            }

            MigrateProgress::ArchiveDownloaded { full_path, bytes } => {
                tracing::info!(project = %full_path, bytes, "Export archive downloaded");
            }

            MigrateProgress::ProjectSkipped { full_path, reason } => {
                tracing::info!(project = %full_path, reason = %reason, "Skipped");
            }

            MigrateProgress::ProjectSucceeded {
                full_path,
                target_full_path,
            } => {
                tracing::info!(project = %full_path, target = %target_full_path, "Migrated");
            }

            MigrateProgress::ProjectFailed {
                full_path,
                phase,
                reason,
            } => {
                tracing::error!(project = %full_path, phase = %phase, reason = %reason, "Migration failed");
            }

            MigrateProgress::RetryBackoff {
                operation,
                subject,
                retry_after_ms,
                attempt,
            } => {
                tracing::warn!(
                    operation = %operation,
                    subject = %subject,
                    retry_after_ms,
                    attempt,
                    "Transient failure, backing off"
                );
            }

            MigrateProgress::RunComplete {
                succeeded,
                skipped,
                failed,
                groups_failed,
            } => {
                tracing::info!(succeeded, skipped, failed, groups_failed, "Migration complete");
            }

            _ => {}
        }
    }
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitport::migrate::JobPhase;

    #[test]
    fn logging_reporter_handles_all_events() {
        let reporter = LoggingReporter::new();
        reporter.handle(MigrateProgress::DiscoveringGroup {
            path: "teamA".into(),
        });
        reporter.handle(MigrateProgress::ProjectFailed {
            full_path: "teamA/app".into(),
            phase: JobPhase::ImportPolling,
            reason: "timed out".into(),
        });
        reporter.handle(MigrateProgress::RunComplete {
            succeeded: 1,
            skipped: 0,
            failed: 1,
            groups_failed: 0,
        });
    }

    #[test]
    fn interactive_reporter_tracks_counts() {
        let reporter = InteractiveReporter::new();
        reporter.handle(MigrateProgress::GroupEnsured {
            source_path: "teamA".into(),
            target_path: "teamA".into(),
            created: true,
        });
        reporter.handle(MigrateProgress::ProjectStarted {
            full_path: "teamA/app".into(),
        });
        reporter.handle(MigrateProgress::ProjectSucceeded {
            full_path: "teamA/app".into(),
            target_full_path: "teamA/app".into(),
        });

        let state = reporter.state.lock().unwrap();
        assert_eq!(state.groups_ensured, 1);
        assert_eq!(state.groups_created, 1);
        assert_eq!(state.dispatched, 1);
        assert_eq!(state.finished, 1);
    }

    #[test]
    fn callback_forwards_events() {
        let reporter = Arc::new(ProgressReporter::Interactive(InteractiveReporter::new()));
        let callback = reporter.as_callback();
        callback(MigrateProgress::ProjectStarted {
            full_path: "teamA/app".into(),
        });

        if let ProgressReporter::Interactive(ref inner) = *reporter {
            assert_eq!(inner.state.lock().unwrap().dispatched, 1);
        }
    }
}
