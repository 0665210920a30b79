use chrono::{DateTime, Utc};

use crate::errors::Error;
use crate::model::{ExternalPin, ResolvedPin};
use crate::registry::ProjectRegistry;
use crate::svn::parse_external;

/// Resolution of declared external dependencies onto replayed commits.
///
/// An explicit pin names a revision directly; an unpinned external means
/// "whatever was current when the owning commit happened" and resolves by
/// the owning commit's timestamp. Either way the resolved revision may not
/// itself be replayed yet, in which case the predecessor chain is walked
/// backward until a replayed ancestor turns up.

/// Parses the lines of an `svn:externals` property value into typed pins.
pub(crate) fn parse_pins(prop_lines: &[String]) -> Result<Vec<ExternalPin>, Error> {
    let mut pins = Vec::new();
    for line in prop_lines {
        if let Some((revision, url, subdir)) = parse_external(line)? {
            pins.push(ExternalPin {
                project: derive_project_name(&url),
                url,
                revision,
                subdir,
            });
        }
    }
    Ok(pins)
}

/// Project name implied by an external's URL: the path segment preceding the
/// standard layout directory, or the last segment when the URL points
/// straight at a project base.
pub(crate) fn derive_project_name(url: &str) -> String {
    let path = url
        .split_once("://")
        .and_then(|(_, rest)| rest.split_once('/'))
        .map(|(_, path)| path)
        .unwrap_or("");

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 && matches!(*segment, "trunk" | "branches" | "tags" | "releases") {
            return segments[i - 1].to_string();
        }
    }
    segments.last().copied().unwrap_or("").to_string()
}

/// Line of development a pin's URL points into, per the pinned project's
/// registered layout.
pub(crate) fn pin_line(registry: &ProjectRegistry, pin: &ExternalPin) -> Result<String, Error> {
    let meta = registry.metadata(&pin.project)?;
    let path = pin
        .url
        .strip_prefix(meta.root_url.as_str())
        .ok_or_else(|| Error::Config {
            what: format!(
                "external URL {} is outside the repository of project \"{}\"",
                pin.url, pin.project,
            ),
        })?;

    match meta.split_path(path) {
        Some((_, line)) => Ok(line.to_string()),
        None => Ok(meta.trunk_name.clone()),
    }
}

/// The revision a pin targets before any replay-state considerations: the
/// explicit pin when present, otherwise the dependency's state at `at` via
/// the date fallback chain.
pub(crate) fn target_revision(
    registry: &mut ProjectRegistry,
    pin: &ExternalPin,
    at: &DateTime<Utc>,
) -> Result<u32, Error> {
    if let Some(revision) = pin.revision {
        return Ok(revision);
    }

    let line = pin_line(registry, pin)?;
    registry
        .store(&pin.project)?
        .latest_at_or_before(&line, at)?
        .ok_or_else(|| Error::NotFound {
            what: format!(
                "project \"{}\" has no revision on {line} at or before {at}",
                pin.project,
            ),
        })
}

/// Resolves a pin onto a replayed commit of the dependency project, walking
/// predecessor links backward from the target revision. Revisions absent
/// from the store resolve through the line's nearest older entry; a chain
/// walked to its end without any replayed ancestor is `ResolutionExhausted`.
pub(crate) fn resolve(
    registry: &mut ProjectRegistry,
    pin: &ExternalPin,
    at: &DateTime<Utc>,
) -> Result<ResolvedPin, Error> {
    let started_from = target_revision(registry, pin, at)?;
    let line = pin_line(registry, pin)?;
    let trunk = registry.metadata(&pin.project)?.trunk_name.clone();
    let store = registry.store(&pin.project)?;

    let exhausted = |revision: u32| Error::ResolutionExhausted {
        project: pin.project.clone(),
        revision,
        started_from,
    };

    let mut revision = started_from;
    loop {
        let Some(entry) = store.get(revision)? else {
            // the pinned revision touched some other part of the repository;
            // land on the line's nearest older entry
            match store.latest_on_line_at_or_before(&line, revision)? {
                Some(older) if older < revision => {
                    revision = older;
                    continue;
                }
                _ => return Err(exhausted(revision)),
            }
        };

        if let (Some(branch), Some(hash)) = (&entry.replayed_branch, &entry.replayed_hash) {
            return Ok(ResolvedPin {
                revision,
                replayed_branch: branch.clone(),
                replayed_hash: hash.clone(),
            });
        }

        let next = match entry.predecessor.filter(|p| *p < revision) {
            Some(prev) => Some(prev),
            None if revision > 1 => store
                .latest_on_line_at_or_before(&trunk, revision - 1)?
                .filter(|p| *p < revision),
            None => None,
        };
        match next {
            Some(prev) => revision = prev,
            None => return Err(exhausted(revision)),
        }
    }
}
