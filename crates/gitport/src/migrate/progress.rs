//! Progress events emitted during a migration run.

use super::types::JobPhase;

/// Progress events emitted by the walker, jobs and engine.
///
/// Consumers render these however they like (progress bars on a TTY,
/// structured logs otherwise); the orchestrator never prints directly.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum MigrateProgress {
    /// The walker picked up a source group.
    DiscoveringGroup {
        /// Source-side full path.
        path: String,
    },

    /// A target group was resolved or created.
    GroupEnsured {
        source_path: String,
        target_path: String,
        /// True when the group was created fresh on the target.
        created: bool,
    },

    /// A target group could not be ensured; its branch is skipped.
    GroupFailed {
        source_path: String,
        reason: String,
        /// Number of descendant projects skipped as a consequence.
        skipped_projects: usize,
    },

    /// A project migration job was dispatched.
    ProjectStarted {
        /// Source-side full path.
        full_path: String,
    },

    /// A job moved into a new phase.
    ProjectPhase {
        full_path: String,
        phase: JobPhase,
    },

    /// The export archive landed on local disk.
    ArchiveDownloaded {
        full_path: String,
        bytes: u64,
    },

    /// A job ended without migrating (already exists, parent unavailable...).
    ProjectSkipped {
        full_path: String,
        reason: String,
    },

    /// A job completed the full state machine.
    ProjectSucceeded {
        full_path: String,
        target_full_path: String,
    },

    /// A job failed; `phase` names where.
    ProjectFailed {
        full_path: String,
        phase: JobPhase,
        reason: String,
    },

    /// A transient API failure triggered a backoff wait.
    RetryBackoff {
        /// API operation being retried, e.g. "start_export".
        operation: String,
        /// Project or group path the operation was for.
        subject: String,
        /// Time to wait before the next attempt (ms).
        retry_after_ms: u64,
        /// Attempt number that just failed.
        attempt: u32,
    },

    /// All jobs reached a terminal state.
    RunComplete {
        succeeded: usize,
        skipped: usize,
        failed: usize,
        groups_failed: usize,
    },
}

/// Callback for progress updates during a migration run.
pub type ProgressCallback = Box<dyn Fn(MigrateProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: MigrateProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_with_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let callback: ProgressCallback = Box::new(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        emit(
            Some(&callback),
            MigrateProgress::ProjectStarted {
                full_path: "org/app".into(),
            },
        );
        emit(
            Some(&callback),
            MigrateProgress::ProjectSucceeded {
                full_path: "org/app".into(),
                target_full_path: "org/app".into(),
            },
        );

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn emit_without_callback_is_noop() {
        emit(
            None,
            MigrateProgress::RunComplete {
                succeeded: 1,
                skipped: 0,
                failed: 0,
                groups_failed: 0,
            },
        );
    }

    #[test]
    fn events_carry_context() {
        let event = MigrateProgress::ProjectFailed {
            full_path: "org/app".into(),
            phase: JobPhase::ImportPolling,
            reason: "timed out".into(),
        };
        let debug = format!("{event:?}");
        assert!(debug.contains("org/app"));
        assert!(debug.contains("ImportPolling"));
    }
}
