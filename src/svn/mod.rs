use chrono::{DateTime, Utc};

use crate::errors::Error;
use crate::model::FileAction;

pub(crate) mod cmd;
mod log_parse;

pub(crate) use log_parse::split_copy_suffix;

/// Structural info for a URL or working area.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SvnInfo {
    pub(crate) root_url: String,
    /// Path of the queried URL relative to the repository root, no leading
    /// slash.
    pub(crate) rel_path: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ListEntry {
    pub(crate) name: String,
    pub(crate) is_dir: bool,
    pub(crate) last_changed: DateTime<Utc>,
}

/// One changed path of a log entry. `copied_from` carries the provenance
/// annotation (`(from /path:REV)`) already parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LogChange {
    pub(crate) action: FileAction,
    pub(crate) path: String,
    pub(crate) copied_from: Option<(String, u32)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LogEntry {
    pub(crate) revision: u32,
    pub(crate) author: String,
    pub(crate) timestamp: DateTime<Utc>,
    /// Declared size of the log message, advisory only.
    pub(crate) change_count: u32,
    pub(crate) changes: Vec<LogChange>,
    pub(crate) message: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum WorkState {
    Unversioned,
    Modified,
    Missing,
    Conflicted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct WorkStatus {
    pub(crate) state: WorkState,
    pub(crate) path: String,
}

/// Read-side adapter over the source version control backend. All raw text
/// parsing lives behind this trait; the core only ever sees typed records.
///
/// Implementations must classify failures into the taxonomy: `NotFound` for
/// bad paths, `Transient` for connection-level failures (callers retry
/// those), `AncestryConflict` for conflicts needing explicit resolution.
pub(crate) trait SvnSource {
    fn info(&self, url: &str) -> Result<SvnInfo, Error>;

    /// Lists direct children of `url`.
    fn list(&self, url: &str) -> Result<Vec<ListEntry>, Error>;

    /// Streams the full log of `url`, oldest entry first.
    fn log(&self, url: &str) -> Result<Vec<LogEntry>, Error>;

    fn checkout(&self, url: &str, revision: u32, dir: &std::path::Path) -> Result<(), Error>;

    /// Switches an existing working area to a different URL/revision,
    /// leaving externals untouched.
    fn switch(&self, dir: &std::path::Path, url: &str, revision: u32) -> Result<(), Error>;

    fn update(&self, dir: &std::path::Path, revision: u32) -> Result<(), Error>;

    /// Reverts local modifications recursively.
    fn revert(&self, dir: &std::path::Path) -> Result<(), Error>;

    /// Reads a named property (`svn:ignore`, `svn:externals`) at
    /// `url`@`revision`, one value line per element. A missing property is
    /// an empty list, not an error.
    fn propget(&self, url: &str, revision: u32, name: &str) -> Result<Vec<String>, Error>;

    fn status(&self, dir: &std::path::Path) -> Result<Vec<WorkStatus>, Error>;
}

/// Parses one line of an `svn:externals` property value.
///
/// Both supported layouts appear in real repositories:
/// `subdir -r123 URL`, `subdir URL`, and `URL@123 subdir`.
pub(crate) fn parse_external(line: &str) -> Result<Option<(Option<u32>, String, String)>, Error> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split_whitespace().collect();

    let bad = || Error::Config {
        what: format!("unrecognized externals line \"{line}\""),
    };

    match fields.as_slice() {
        [subdir, rev_flag, url] if rev_flag.starts_with("-r") => {
            let rev = rev_flag[2..].parse::<u32>().map_err(|_| bad())?;
            Ok(Some((Some(rev), url.to_string(), subdir.to_string())))
        }
        [first, subdir] if first.contains("://") => {
            if let Some((url, rev)) = first.rsplit_once('@') {
                let rev = rev.parse::<u32>().map_err(|_| bad())?;
                Ok(Some((Some(rev), url.to_string(), subdir.to_string())))
            } else {
                Ok(Some((None, first.to_string(), subdir.to_string())))
            }
        }
        [subdir, url] => Ok(Some((None, url.to_string(), subdir.to_string()))),
        _ => Err(bad()),
    }
}
