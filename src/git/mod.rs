use crate::errors::Error;

pub(crate) mod cmd;

/// Result of a commit as reported by the target backend. `short_hash` is the
/// abbreviated identifier from the commit report; callers must verify it
/// against an independently queried full hash before persisting anything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CommitOutcome {
    pub(crate) branch: String,
    pub(crate) short_hash: String,
    pub(crate) files_changed: u32,
    pub(crate) insertions: u32,
    pub(crate) deletions: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum StatusKind {
    Untracked,
    Added,
    Deleted,
    Modified,
    /// Already staged; nothing left to do for it.
    Staged,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct StatusEntry {
    pub(crate) kind: StatusKind,
    pub(crate) path: String,
}

/// Changed paths of the working tree partitioned for staging. Deletions are
/// staged before additions so a file replaced by a same-named directory (or
/// vice versa) never collides.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct WorkChanges {
    pub(crate) additions: Vec<String>,
    pub(crate) deletions: Vec<String>,
    pub(crate) modifications: Vec<String>,
}

impl WorkChanges {
    pub(crate) fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty() && self.modifications.is_empty()
    }

    pub(crate) fn from_status(entries: &[StatusEntry]) -> Self {
        let mut changes = Self::default();
        for entry in entries {
            match entry.kind {
                StatusKind::Untracked | StatusKind::Added => {
                    changes.additions.push(entry.path.clone());
                }
                StatusKind::Deleted => changes.deletions.push(entry.path.clone()),
                StatusKind::Modified => changes.modifications.push(entry.path.clone()),
                StatusKind::Staged => {}
            }
        }
        changes
    }
}

/// Write-side adapter over the target version control backend. Implementors
/// keep all text-format parsing out of the core.
pub(crate) trait GitTarget {
    /// Initializes a repository whose initial head is `head_branch`.
    fn init(&self, dir: &std::path::Path, head_branch: &str) -> Result<(), Error>;

    fn config(&self, dir: &std::path::Path, key: &str, value: &str) -> Result<(), Error>;

    fn remote_add(&self, dir: &std::path::Path, name: &str, url: &str) -> Result<(), Error>;

    /// Stages `changes`, deletions first.
    fn stage(&self, dir: &std::path::Path, changes: &WorkChanges) -> Result<(), Error>;

    /// Records a gitlink entry (mode 160000) for an external pin at
    /// `subdir`, pointing at `hash` of the dependency's repository.
    fn stage_gitlink(&self, dir: &std::path::Path, subdir: &str, hash: &str)
    -> Result<(), Error>;

    fn commit(
        &self,
        dir: &std::path::Path,
        author: &str,
        date: &str,
        message: &str,
        allow_empty: bool,
    ) -> Result<CommitOutcome, Error>;

    /// Full-length hash of the last commit, queried independently of any
    /// commit report.
    fn head_hash(&self, dir: &std::path::Path) -> Result<String, Error>;

    /// Creates `branch` at `start_hash` and switches the working tree to it.
    fn create_branch_at(
        &self,
        dir: &std::path::Path,
        branch: &str,
        start_hash: &str,
    ) -> Result<(), Error>;

    fn checkout(&self, dir: &std::path::Path, branch: &str) -> Result<(), Error>;

    fn status(&self, dir: &std::path::Path) -> Result<Vec<StatusEntry>, Error>;

    fn push(&self, dir: &std::path::Path, remote: &str, branch: &str) -> Result<(), Error>;
}

#[cfg(test)]
mod test {
    use super::{StatusEntry, StatusKind, WorkChanges};

    #[test]
    fn test_partition_status() {
        let entries = vec![
            StatusEntry {
                kind: StatusKind::Untracked,
                path: "new.c".into(),
            },
            StatusEntry {
                kind: StatusKind::Deleted,
                path: "old.c".into(),
            },
            StatusEntry {
                kind: StatusKind::Modified,
                path: "main.c".into(),
            },
            StatusEntry {
                kind: StatusKind::Staged,
                path: ".gitignore".into(),
            },
        ];

        let changes = WorkChanges::from_status(&entries);
        assert_eq!(changes.additions, vec!["new.c"]);
        assert_eq!(changes.deletions, vec!["old.c"]);
        assert_eq!(changes.modifications, vec!["main.c"]);
        assert!(!changes.is_empty());
        assert!(WorkChanges::default().is_empty());
    }
}
