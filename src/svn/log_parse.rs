use chrono::{DateTime, Utc};

use super::{LogChange, LogEntry};
use crate::errors::Error;
use crate::model::FileAction;

const DASHES: &str = "----------------------------------------------------------------------";

/// Parses the output of a verbose source log into typed entries, preserving
/// the order they appear in the text.
///
/// The declared line count of each entry header is authoritative for the
/// message body, so messages containing separator-like lines do not confuse
/// the parser.
pub(crate) fn parse_log(text: &str) -> Result<Vec<LogEntry>, Error> {
    let mut entries = Vec::new();
    let mut lines = text.lines();

    match lines.next() {
        None => return Ok(entries),
        Some(first) if first.starts_with(DASHES) => {}
        Some(first) => {
            return Err(bad_line("initial", first));
        }
    }

    loop {
        let header = match lines.next() {
            None | Some("") => break,
            Some(line) => line,
        };

        let (revision, author, timestamp, change_count) = parse_header(header)?;

        let mut changes = Vec::new();
        match lines.next() {
            Some(line) if line.contains("Changed paths") => {
                loop {
                    match lines.next() {
                        Some("") | None => break,
                        Some(line) => changes.push(parse_change_line(line)?),
                    }
                }
            }
            Some("") => {}
            Some(line) => return Err(bad_line("post-header", line)),
            None => {}
        }

        let mut message = String::new();
        for i in 0..change_count {
            match lines.next() {
                Some(line) => {
                    if i > 0 {
                        message.push('\n');
                    }
                    message.push_str(line);
                }
                None => break,
            }
        }

        entries.push(LogEntry {
            revision,
            author,
            timestamp,
            change_count,
            changes,
            message,
        });

        match lines.next() {
            None => break,
            Some(line) if line.starts_with(DASHES) => {}
            Some(line) => return Err(bad_line("post-message", line)),
        }
    }

    Ok(entries)
}

fn bad_line(context: &str, line: &str) -> Error {
    Error::ConsistencyViolation {
        what: format!("bad {context} log line: \"{line}\""),
    }
}

/// `r2 | alice | 2009-07-21 19:04:23 +0000 (Tue, 21 Jul 2009) | 1 line`
fn parse_header(line: &str) -> Result<(u32, String, DateTime<Utc>, u32), Error> {
    let mut fields = line.split(" | ");

    let rev_field = fields.next().unwrap_or("");
    let revision = rev_field
        .strip_prefix('r')
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| bad_line("header", line))?;

    let author = fields.next().ok_or_else(|| bad_line("header", line))?;

    let date_field = fields.next().ok_or_else(|| bad_line("header", line))?;
    let timestamp = parse_date(date_field).ok_or_else(|| bad_line("header", line))?;

    let count_field = fields.next().ok_or_else(|| bad_line("header", line))?;
    let change_count = count_field
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| bad_line("header", line))?;

    Ok((revision, author.to_string(), timestamp, change_count))
}

/// `2009-07-21 19:04:23 +0000 (Tue, 21 Jul 2009)` — the parenthesized
/// human-readable part is redundant and ignored.
pub(crate) fn parse_date(field: &str) -> Option<DateTime<Utc>> {
    let mut parts = field.split_whitespace();
    let date = parts.next()?;
    let time = parts.next()?;
    let offset = parts.next()?;

    DateTime::parse_from_str(&format!("{date} {time} {offset}"), "%Y-%m-%d %H:%M:%S %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `   A /projects/pdaq/tags/v1 (from /projects/pdaq/trunk:2)`
fn parse_change_line(line: &str) -> Result<LogChange, Error> {
    let trimmed = line.trim_start();
    let (marker, rest) = trimmed
        .split_once(' ')
        .ok_or_else(|| bad_line("changed-path", line))?;

    let action = FileAction::from_marker(marker).ok_or_else(|| bad_line("changed-path", line))?;

    let rest = rest.trim();
    let (path, copied_from) = match split_copy_suffix(rest) {
        Some((path, from_path, from_rev)) => {
            (path.to_string(), Some((from_path.to_string(), from_rev)))
        }
        None => (rest.to_string(), None),
    };

    Ok(LogChange {
        action,
        path,
        copied_from,
    })
}

/// Splits a `path (from /other/path:REV)` suffix off a changed-path field.
/// Returns `(path, from_path, from_rev)` when the suffix is present and
/// well-formed.
pub(crate) fn split_copy_suffix(field: &str) -> Option<(&str, &str, u32)> {
    let inner = field.strip_suffix(')')?;
    let (path, from_part) = inner.rsplit_once(" (from ")?;
    let (from_path, rev_text) = from_part.rsplit_once(':')?;
    let from_rev = rev_text.parse::<u32>().ok()?;
    Some((path, from_path, from_rev))
}
