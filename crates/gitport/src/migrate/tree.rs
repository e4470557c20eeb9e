//! Group-tree walker.
//!
//! Walks the source group tree depth-first and ensures the mirrored group
//! exists on the target before yielding the projects underneath it. The
//! traversal uses an explicit work stack rather than recursion so arbitrarily
//! deep hierarchies cannot overflow the stack, and so the engine can pause
//! between groups at worker-pool boundaries.

use crate::api::error::short_error_message;
use crate::api::{ApiError, GitlabApi, GroupNode, ProjectRef, Visibility};
use crate::retry::{RetryConfig, with_retry};

use super::progress::{MigrateProgress, ProgressCallback, emit};

/// A source group whose target counterpart has been ensured.
#[derive(Debug)]
pub struct EnsuredGroup {
    pub source: GroupNode,
    pub target: GroupNode,
    /// True when the final path segment was created fresh on the target.
    pub created: bool,
    /// Projects directly owned by the source group.
    pub projects: Vec<ProjectRef>,
}

/// A branch whose target group could not be ensured.
///
/// Every project found under the source branch is listed so the engine can
/// record a skip for each; the walker does not descend further.
#[derive(Debug)]
pub struct FailedBranch {
    pub source_path: String,
    pub target_path: String,
    pub reason: String,
    pub skipped_projects: Vec<ProjectRef>,
}

/// One step of the walk.
#[derive(Debug)]
pub enum WalkItem {
    Group(EnsuredGroup),
    FailedBranch(FailedBranch),
}

struct PendingGroup {
    source: GroupNode,
    /// Mirrored full path on the target.
    target_path: String,
    /// Ensured target parent id; `None` only for the root entry, whose
    /// target path may span several not-yet-ensured segments.
    target_parent_id: Option<u64>,
}

/// Lazy depth-first walk over a source group tree.
///
/// Parent groups are always ensured on the target before any of their
/// projects or subgroups are yielded; importing into a missing namespace is
/// structurally impossible for consumers that follow the walk order.
pub struct GroupWalker<'a, A> {
    source: &'a A,
    target: &'a A,
    retry: &'a RetryConfig,
    on_progress: Option<&'a ProgressCallback>,
    stack: Vec<PendingGroup>,
}

impl<'a, A: GitlabApi> GroupWalker<'a, A> {
    /// Start a walk at an already-resolved source root group.
    ///
    /// `target_root_path` is where the root lands on the target; passing the
    /// source path yields an exact mirror.
    pub fn new(
        source: &'a A,
        target: &'a A,
        root: GroupNode,
        target_root_path: String,
        retry: &'a RetryConfig,
        on_progress: Option<&'a ProgressCallback>,
    ) -> Self {
        let stack = vec![PendingGroup {
            source: root,
            target_path: target_root_path,
            target_parent_id: None,
        }];
        Self {
            source,
            target,
            retry,
            on_progress,
            stack,
        }
    }

    /// Advance to the next group. `None` once the tree is exhausted.
    pub async fn next(&mut self) -> Option<WalkItem> {
        let pending = self.stack.pop()?;
        emit(
            self.on_progress,
            MigrateProgress::DiscoveringGroup {
                path: pending.source.full_path.clone(),
            },
        );

        let (target_group, created) = match self.ensure_target(&pending).await {
            Ok(ensured) => ensured,
            Err(reason) => return Some(self.fail_branch(pending, reason).await),
        };

        let projects = match with_retry(
            self.retry,
            "list_projects",
            &pending.source.full_path,
            self.on_progress,
            || self.source.list_projects(pending.source.id),
        )
        .await
        {
            Ok(projects) => projects,
            Err(e) => {
                let reason = format!(
                    "failed to list projects: {}",
                    short_error_message(&e)
                );
                return Some(self.fail_branch(pending, reason).await);
            }
        };

        let subgroups = match with_retry(
            self.retry,
            "list_subgroups",
            &pending.source.full_path,
            self.on_progress,
            || self.source.list_subgroups(pending.source.id),
        )
        .await
        {
            Ok(subgroups) => subgroups,
            Err(e) => {
                let reason = format!(
                    "failed to list subgroups: {}",
                    short_error_message(&e)
                );
                return Some(self.fail_branch(pending, reason).await);
            }
        };

        // Reverse keeps the pop order depth-first in discovery order.
        for subgroup in subgroups.into_iter().rev() {
            self.stack.push(PendingGroup {
                target_path: format!("{}/{}", target_group.full_path, subgroup.path),
                target_parent_id: Some(target_group.id),
                source: subgroup,
            });
        }

        Some(WalkItem::Group(EnsuredGroup {
            source: pending.source,
            target: target_group,
            created,
            projects,
        }))
    }

    /// Resolve or create the mirrored target group.
    async fn ensure_target(&self, pending: &PendingGroup) -> Result<(GroupNode, bool), String> {
        match pending.target_parent_id {
            None => self.ensure_root_path(pending).await,
            Some(parent_id) => {
                self.ensure_child(&pending.source, &pending.target_path, parent_id)
                    .await
            }
        }
    }

    /// Ensure every segment of the root target path, top-down.
    ///
    /// Intermediate segments inherit the source root's visibility; this
    /// matches creating the chain by hand before a run.
    async fn ensure_root_path(&self, pending: &PendingGroup) -> Result<(GroupNode, bool), String> {
        let visibility = pending.source.visibility;
        let mut parent: Option<GroupNode> = None;
        let mut created_last = false;
        let mut prefix = String::new();

        for segment in pending.target_path.split('/') {
            if prefix.is_empty() {
                prefix = segment.to_string();
            } else {
                prefix = format!("{prefix}/{segment}");
            }

            let existing = self.lookup_target(&prefix).await?;
            let (group, created) = match existing {
                Some(group) => (group, false),
                None => {
                    let parent_id = parent.as_ref().map(|g| g.id);
                    self.create_target(segment, segment, parent_id, visibility, &prefix)
                        .await?
                }
            };
            created_last = created;
            parent = Some(group);
        }

        parent
            .map(|g| (g, created_last))
            .ok_or_else(|| "empty target group path".to_string())
    }

    async fn ensure_child(
        &self,
        source: &GroupNode,
        target_path: &str,
        parent_id: u64,
    ) -> Result<(GroupNode, bool), String> {
        if let Some(existing) = self.lookup_target(target_path).await? {
            return Ok((existing, false));
        }
        self.create_target(
            &source.name,
            &source.path,
            Some(parent_id),
            source.visibility,
            target_path,
        )
        .await
    }

    async fn lookup_target(&self, path: &str) -> Result<Option<GroupNode>, String> {
        with_retry(self.retry, "get_group", path, self.on_progress, || {
            self.target.get_group(path)
        })
        .await
        .map_err(|e| format!("failed to resolve group: {}", short_error_message(&e)))
    }

    async fn create_target(
        &self,
        name: &str,
        path_segment: &str,
        parent_id: Option<u64>,
        visibility: Visibility,
        full_path: &str,
    ) -> Result<(GroupNode, bool), String> {
        let result = with_retry(
            self.retry,
            "create_group",
            full_path,
            self.on_progress,
            || {
                self.target
                    .create_group(name, path_segment, parent_id, visibility)
            },
        )
        .await;

        match result {
            Ok(group) => {
                tracing::info!(path = full_path, "created target group");
                Ok((group, true))
            }
            // A sibling branch (or another operator) won the race; the group
            // exists now, so resolve it instead of failing the branch.
            Err(ApiError::Conflict(_)) => match self.lookup_target(full_path).await? {
                Some(group) => Ok((group, false)),
                None => Err(format!(
                    "group creation conflicted but {full_path} is not resolvable"
                )),
            },
            Err(e) => Err(format!(
                "failed to create group: {}",
                short_error_message(&e)
            )),
        }
    }

    /// Build the failed-branch record, enumerating every project under the
    /// source branch so each can be recorded as skipped.
    async fn fail_branch(&self, pending: PendingGroup, reason: String) -> WalkItem {
        tracing::warn!(
            source = %pending.source.full_path,
            target = %pending.target_path,
            reason = %reason,
            "branch unavailable, skipping descendants"
        );
        let skipped_projects = self.collect_descendant_projects(&pending.source).await;
        WalkItem::FailedBranch(FailedBranch {
            source_path: pending.source.full_path,
            target_path: pending.target_path,
            reason,
            skipped_projects,
        })
    }

    /// Best-effort enumeration of all projects in a source subtree.
    ///
    /// Enumeration errors are tolerated; projects that cannot be listed
    /// simply do not appear (and so get no outcome record).
    async fn collect_descendant_projects(&self, root: &GroupNode) -> Vec<ProjectRef> {
        let mut projects = Vec::new();
        let mut queue = vec![root.clone()];

        while let Some(group) = queue.pop() {
            match with_retry(
                self.retry,
                "list_projects",
                &group.full_path,
                self.on_progress,
                || self.source.list_projects(group.id),
            )
            .await
            {
                Ok(found) => projects.extend(found),
                Err(e) => {
                    tracing::warn!(
                        group = %group.full_path,
                        error = %short_error_message(&e),
                        "could not enumerate projects under failed branch"
                    );
                }
            }

            match with_retry(
                self.retry,
                "list_subgroups",
                &group.full_path,
                self.on_progress,
                || self.source.list_subgroups(group.id),
            )
            .await
            {
                Ok(subgroups) => queue.extend(subgroups),
                Err(e) => {
                    tracing::warn!(
                        group = %group.full_path,
                        error = %short_error_message(&e),
                        "could not enumerate subgroups under failed branch"
                    );
                }
            }
        }

        projects
    }
}
