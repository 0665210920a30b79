use crate::errors::Error;
use crate::model::CommitEntry;
use crate::registry::ProjectRegistry;
use crate::svn::split_copy_suffix;

/// Copy-ancestry resolution. A line-creating commit carries a provenance
/// annotation in its stored change paths; this module turns that annotation
/// into a predecessor link so the replay can branch from the right commit.
///
/// Resolution works from the durable store alone, so it can run again long
/// after the source log was ingested. Failures here are diagnostics, not
/// fatal: a commit without a resolvable ancestor simply starts unparented.

/// First provenance annotation of a stored entry, as `(from_path, from_rev)`.
pub(crate) fn copy_marker(entry: &CommitEntry) -> Option<(String, u32)> {
    for change in &entry.file_changes {
        if let Some((_, from_path, from_rev)) = split_copy_suffix(&change.path) {
            return Some((from_path.to_string(), from_rev));
        }
    }
    None
}

/// Resolves the copy ancestor of `entry` and records it as the entry's
/// predecessor. The referenced revision need not exist verbatim: the link
/// lands on the nearest stored revision at or below it on the source line,
/// never on a later one.
///
/// Returns the attached predecessor, or `None` when the entry has no
/// annotation, the source path belongs to no registered project, the copy
/// crosses projects, or the source line has nothing old enough.
pub(crate) fn resolve_predecessor(
    registry: &mut ProjectRegistry,
    project: &str,
    entry: &CommitEntry,
) -> Result<Option<u32>, Error> {
    let Some((from_path, from_rev)) = copy_marker(entry) else {
        return Ok(None);
    };

    let Some((source_meta, source_line)) = registry.project_for_path(&from_path) else {
        tracing::warn!(
            "{project} r{}: copy source {from_path} matches no registered project",
            entry.revision,
        );
        return Ok(None);
    };
    let source_project = source_meta.name.clone();

    if source_project != project {
        // cross-project copies carry no predecessor; the dependency
        // machinery handles inter-project references
        tracing::debug!(
            "{project} r{}: copy source {from_path} belongs to {source_project}",
            entry.revision,
        );
        return Ok(None);
    }

    let found = registry
        .store(&source_project)?
        .latest_on_line_at_or_before(&source_line, from_rev)?;
    let Some(prev) = found else {
        tracing::warn!(
            "{project} r{}: no stored revision at or below r{from_rev} on {source_line}",
            entry.revision,
        );
        return Ok(None);
    };

    registry.store(project)?.set_predecessor(entry.revision, prev)?;
    Ok(Some(prev))
}

/// Resolves predecessors for every annotated entry on `line`. Returns the
/// number of links attached.
pub(crate) fn attach_line(
    registry: &mut ProjectRegistry,
    project: &str,
    line: &str,
) -> Result<u32, Error> {
    let entries = registry.store(project)?.entries_for_line(line)?;

    let mut attached = 0;
    for entry in &entries {
        if resolve_predecessor(registry, project, entry)?.is_some() {
            attached += 1;
        }
    }
    Ok(attached)
}
