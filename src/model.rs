use chrono::{DateTime, Utc};

/// Shortest hash length accepted for persisted state. Anything at or below
/// this is treated as an accidentally-truncated short form and rejected.
pub(crate) const SHORT_HASH_LEN: usize = 7;

pub(crate) fn is_short_hash(hash: &str) -> bool {
    hash.len() <= SHORT_HASH_LEN
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum FileAction {
    Added,
    Modified,
    Deleted,
    Replaced,
}

impl FileAction {
    pub(crate) fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "A" => Some(Self::Added),
            "M" => Some(Self::Modified),
            "D" => Some(Self::Deleted),
            "R" => Some(Self::Replaced),
            _ => None,
        }
    }

    pub(crate) fn as_marker(self) -> &'static str {
        match self {
            Self::Added => "A",
            Self::Modified => "M",
            Self::Deleted => "D",
            Self::Replaced => "R",
        }
    }
}

/// One changed path within a commit. `path` keeps the source log's copy-from
/// suffix (`… (from /other/path:REV)`) verbatim so provenance can be
/// re-resolved from the durable store alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FileChange {
    pub(crate) action: FileAction,
    pub(crate) path: String,
}

/// One durable record of a source-repository change.
///
/// `revision` is unique per source repository, not per logical project:
/// externals share the repository's global revision counter. `predecessor`
/// is a back-reference only; the store rejects forward links.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CommitEntry {
    pub(crate) revision: u32,
    pub(crate) line_name: String,
    pub(crate) tag_label: String,
    pub(crate) author: String,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) change_count: u32,
    pub(crate) file_changes: Vec<FileChange>,
    pub(crate) message: String,
    pub(crate) predecessor: Option<u32>,
    pub(crate) replayed_branch: Option<String>,
    pub(crate) replayed_hash: Option<String>,
    pub(crate) persisted: bool,
}

impl CommitEntry {
    pub(crate) fn new(
        revision: u32,
        line_name: &str,
        author: &str,
        timestamp: DateTime<Utc>,
        change_count: u32,
        file_changes: Vec<FileChange>,
        message: String,
    ) -> Self {
        Self {
            revision,
            line_name: line_name.into(),
            tag_label: tag_label_of(line_name).into(),
            author: author.into(),
            timestamp,
            change_count,
            file_changes,
            message,
            predecessor: None,
            replayed_branch: None,
            replayed_hash: None,
            persisted: false,
        }
    }

    pub(crate) fn is_replayed(&self) -> bool {
        self.replayed_hash.is_some()
    }
}

/// Last path segment of a line name, used as its short display label
/// (`branches/rel-1` -> `rel-1`, `trunk` -> `trunk`).
pub(crate) fn tag_label_of(line_name: &str) -> &str {
    line_name.rsplit('/').next().unwrap_or(line_name)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum LineKind {
    Trunk,
    Branch,
    Tag,
}

/// A named branch/tag/trunk path within a project. Immutable once created;
/// a rename shows up as a new line, never in-place mutation.
#[derive(Clone, Debug)]
pub(crate) struct LineOfDevelopment {
    pub(crate) name: String,
    pub(crate) kind: LineKind,
    pub(crate) url: String,
    pub(crate) first_revision: u32,
    pub(crate) first_seen_date: DateTime<Utc>,
}

/// A declared external dependency of one commit: mount `project` at
/// `subdir`, pinned to `revision` when given, otherwise "whatever was
/// current" at the owning commit's timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ExternalPin {
    pub(crate) project: String,
    pub(crate) url: String,
    pub(crate) revision: Option<u32>,
    pub(crate) subdir: String,
}

/// The concrete upstream commit an `ExternalPin` resolved to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ResolvedPin {
    pub(crate) revision: u32,
    pub(crate) replayed_branch: String,
    pub(crate) replayed_hash: String,
}

/// Structural facts about a project's repository layout. Loaded once per
/// project and never mutated afterwards; re-registering with different
/// values is a fatal configuration error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ProjectMetadata {
    pub(crate) name: String,
    pub(crate) root_url: String,
    pub(crate) base_path: String,
    pub(crate) trunk_name: String,
    pub(crate) branches_name: String,
    pub(crate) tags_name: String,
}

impl ProjectMetadata {
    /// URL of the project's base directory (the parent of trunk/branches/tags).
    pub(crate) fn base_url(&self) -> String {
        format!("{}/{}", self.root_url, self.base_path)
    }

    pub(crate) fn line_url(&self, line_name: &str) -> String {
        if line_name == self.trunk_name {
            format!("{}/{}", self.base_url(), self.trunk_name)
        } else {
            format!("{}/{}", self.base_url(), line_name)
        }
    }

    /// Splits a repository-absolute path (`/daq/projects/pdaq/branches/rel-1/x`)
    /// into project name and line name, when it falls under this project's
    /// base path.
    pub(crate) fn split_path<'a>(&'a self, path: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = path
            .strip_prefix('/')
            .unwrap_or(path)
            .strip_prefix(self.base_path.as_str())?;
        // "projects/pdaq" must not claim "projects/pdaq-common"
        let rel = if rest.is_empty() {
            rest
        } else {
            rest.strip_prefix('/')?
        };

        if rel.is_empty() {
            return Some((self.name.as_str(), self.trunk_name.as_str()));
        }

        let mut segments = rel.split('/');
        let first = segments.next()?;
        if first == self.trunk_name {
            Some((self.name.as_str(), self.trunk_name.as_str()))
        } else if first == self.branches_name || first == self.tags_name {
            let second = segments.next()?;
            let line_len = first.len() + 1 + second.len();
            Some((self.name.as_str(), &rel[..line_len]))
        } else {
            // a path directly under the base is trunk-equivalent
            Some((self.name.as_str(), self.trunk_name.as_str()))
        }
    }
}
