use crate::errors::{Error, with_retry};
use crate::model::{CommitEntry, FileChange, LineKind, LineOfDevelopment, ProjectMetadata};
use crate::store::RevisionStore;
use crate::svn::{LogChange, SvnSource};

/// The discovered lines of development of one project and the machinery to
/// ingest their commit logs into the durable store.
///
/// Replay order is trunk first, then branches and tags by their listing
/// date. A revision claimed by an earlier line keeps that attribution: a
/// branch log includes the pre-copy history of its source line, and those
/// shared entries belong to the line that saw them first.
pub(crate) struct BranchCatalog {
    lines: Vec<LineOfDevelopment>,
}

impl BranchCatalog {
    pub(crate) fn discover(
        source: &dyn SvnSource,
        meta: &ProjectMetadata,
        ignored: &[String],
    ) -> Result<Self, Error> {
        let base_url = meta.base_url();
        let base = with_retry(&format!("list {base_url}"), || source.list(&base_url))?;

        let has_trunk = base
            .iter()
            .any(|e| e.is_dir && e.name == meta.trunk_name);

        let mut lines = Vec::new();
        if has_trunk {
            lines.push(LineOfDevelopment {
                name: meta.trunk_name.clone(),
                kind: LineKind::Trunk,
                url: meta.line_url(&meta.trunk_name),
                first_revision: 0,
                first_seen_date: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
            });
        }

        let mut children = Vec::new();
        for (dir_name, kind) in [
            (meta.branches_name.as_str(), LineKind::Branch),
            (meta.tags_name.as_str(), LineKind::Tag),
        ] {
            if !base.iter().any(|e| e.is_dir && e.name == dir_name) {
                continue;
            }
            let dir_url = format!("{base_url}/{dir_name}");
            let entries = with_retry(&format!("list {dir_url}"), || source.list(&dir_url))?;
            for entry in entries {
                if !entry.is_dir {
                    continue;
                }
                let line_name = format!("{dir_name}/{}", entry.name);
                if ignored.iter().any(|s| line_name.contains(s.as_str())) {
                    tracing::debug!("{}: ignoring line {line_name}", meta.name);
                    continue;
                }
                children.push(LineOfDevelopment {
                    name: line_name.clone(),
                    kind,
                    url: meta.line_url(&line_name),
                    first_revision: 0,
                    first_seen_date: entry.last_changed,
                });
            }
        }
        children.sort_by(|a, b| {
            a.first_seen_date
                .cmp(&b.first_seen_date)
                .then_with(|| a.name.cmp(&b.name))
        });
        lines.extend(children);

        if lines.is_empty() {
            // no standard layout; the base directory itself is the sole
            // trunk-equivalent line
            tracing::info!("{}: no {}/{}/{} layout, treating base as trunk",
                meta.name, meta.trunk_name, meta.branches_name, meta.tags_name);
            lines.push(LineOfDevelopment {
                name: meta.trunk_name.clone(),
                kind: LineKind::Trunk,
                url: base_url,
                first_revision: 0,
                first_seen_date: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
            });
        }

        Ok(Self { lines })
    }

    pub(crate) fn lines(&self) -> &[LineOfDevelopment] {
        &self.lines
    }

    /// Ingests the commit log of every line into `store`, in replay order,
    /// and fills in each line's first revision and date. Returns the number
    /// of newly stored entries.
    pub(crate) fn ingest(
        &mut self,
        source: &dyn SvnSource,
        meta: &ProjectMetadata,
        store: &RevisionStore,
    ) -> Result<u32, Error> {
        let mut stored = 0;
        for line in &mut self.lines {
            let log = with_retry(&format!("log {}", line.url), || source.log(&line.url))?;

            for log_entry in &log {
                if store.get(log_entry.revision)?.is_some() {
                    continue;
                }
                let mut entry = CommitEntry::new(
                    log_entry.revision,
                    &line.name,
                    &log_entry.author,
                    log_entry.timestamp,
                    log_entry.change_count,
                    log_entry.changes.iter().map(stored_change).collect(),
                    log_entry.message.clone(),
                );
                store.put(&mut entry)?;
                stored += 1;
            }

            if let Some(first) = store.first_revision(&line.name)? {
                line.first_revision = first;
                if let Some(entry) = store.get(first)? {
                    line.first_seen_date = entry.timestamp;
                }
            }
            tracing::info!(
                "{}: line {} has {} log entries",
                meta.name,
                line.name,
                log.len(),
            );
        }
        Ok(stored)
    }
}

/// Composes the stored form of one changed path, re-attaching the provenance
/// annotation so it survives in the durable store.
fn stored_change(change: &LogChange) -> FileChange {
    let path = match &change.copied_from {
        Some((from, rev)) => format!("{} (from {from}:{rev})", change.path),
        None => change.path.clone(),
    };
    FileChange {
        action: change.action,
        path,
    }
}
