use std::path::Path;
use std::process::Command;

use chrono::{Datelike as _, TimeZone as _, Utc};

use super::log_parse;
use super::{ListEntry, LogEntry, SvnInfo, SvnSource, WorkState, WorkStatus};
use crate::errors::Error;

/// `svn` command-line client. Owns all parsing of the client's text output;
/// nothing outside this module sees a raw status or log line.
pub(crate) struct CmdSvn;

impl CmdSvn {
    pub(crate) fn new() -> Self {
        Self
    }

    fn run(&self, args: &[&str], cwd: Option<&Path>) -> Result<String, Error> {
        let mut cmd = Command::new("svn");
        cmd.args(["--non-interactive"]);
        cmd.args(args);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(std::process::Stdio::null());

        let output = cmd.output().map_err(|e| Error::Command {
            what: format!("failed to spawn \"svn {}\": {e}", args.join(" ")),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(args, &stderr));
        }

        String::from_utf8(output.stdout).map_err(|_| Error::Command {
            what: format!("\"svn {}\" produced non-UTF-8 output", args.join(" ")),
        })
    }
}

/// Maps the client's `E…`/`W…` diagnostic codes onto the failure taxonomy.
/// Connection-level codes are the only retryable class.
fn classify_failure(args: &[&str], stderr: &str) -> Error {
    let what = format!(
        "svn {}: {}",
        args.first().copied().unwrap_or(""),
        stderr.trim(),
    );

    // E170013: unable to connect; E175012/E000110: connection timed out
    if stderr.contains("E170013:")
        || stderr.contains("E175012:")
        || stderr.contains("Connection timed out")
        || stderr.contains("Connection refused")
    {
        return Error::Transient { what };
    }

    // E160013/W160013: path not found; W170000/E170000: bad URL
    if stderr.contains("E160013:")
        || stderr.contains("W160013:")
        || stderr.contains("W170000:")
        || stderr.contains("E170000:")
        || stderr.contains("E200009:")
    {
        return Error::NotFound { what };
    }

    // E155015: conflict in working copy; E195012: unrelated switch target
    if stderr.contains("E155015:") || stderr.contains("E195012:") {
        return Error::AncestryConflict { what };
    }

    Error::Command { what }
}

impl SvnSource for CmdSvn {
    fn info(&self, url: &str) -> Result<SvnInfo, Error> {
        let out = self.run(&["info", url], None)?;

        let mut root_url = None;
        let mut full_url = None;
        for line in out.lines() {
            if let Some(value) = line.strip_prefix("Repository Root: ") {
                root_url = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("URL: ") {
                full_url = Some(value.trim().to_string());
            }
        }

        let root_url = root_url.ok_or_else(|| Error::Command {
            what: format!("no repository root in \"svn info\" output for {url}"),
        })?;
        let full_url = full_url.ok_or_else(|| Error::Command {
            what: format!("no URL in \"svn info\" output for {url}"),
        })?;

        let rel_path = full_url
            .strip_prefix(root_url.as_str())
            .map(|p| p.trim_start_matches('/').to_string())
            .ok_or_else(|| Error::Command {
                what: format!("URL {full_url} does not start with root {root_url}"),
            })?;

        Ok(SvnInfo { root_url, rel_path })
    }

    fn list(&self, url: &str) -> Result<Vec<ListEntry>, Error> {
        let out = self.run(&["ls", "-v", url], None)?;

        let mut entries = Vec::new();
        for line in out.lines() {
            match parse_list_line(line) {
                Some(entry) if entry.name == "." => {}
                Some(entry) => entries.push(entry),
                None => {
                    tracing::warn!("ignoring bad listing line for {url}: \"{line}\"");
                }
            }
        }

        Ok(entries)
    }

    fn log(&self, url: &str) -> Result<Vec<LogEntry>, Error> {
        let out = self.run(&["log", "-v", "-r", "1:HEAD", url], None)?;
        log_parse::parse_log(&out)
    }

    fn checkout(&self, url: &str, revision: u32, dir: &Path) -> Result<(), Error> {
        let rev = format!("-r{revision}");
        let dir_str = dir.to_string_lossy();
        self.run(&["checkout", &rev, url, &dir_str], None)?;
        Ok(())
    }

    fn switch(&self, dir: &Path, url: &str, revision: u32) -> Result<(), Error> {
        let rev = format!("-r{revision}");
        self.run(&["switch", "--ignore-externals", &rev, url], Some(dir))?;
        Ok(())
    }

    fn update(&self, dir: &Path, revision: u32) -> Result<(), Error> {
        let rev = format!("-r{revision}");
        self.run(&["update", "--ignore-externals", &rev], Some(dir))?;
        Ok(())
    }

    fn revert(&self, dir: &Path) -> Result<(), Error> {
        self.run(&["revert", "--recursive", "."], Some(dir))?;
        Ok(())
    }

    fn propget(&self, url: &str, revision: u32, name: &str) -> Result<Vec<String>, Error> {
        let rev = format!("-r{revision}");
        match self.run(&["propget", &rev, name, url], None) {
            Ok(out) => Ok(out.lines().map(str::to_string).collect()),
            // W200017: property not found
            Err(Error::Command { what }) if what.contains("W200017") || what.contains("E200017") => {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn status(&self, dir: &Path) -> Result<Vec<WorkStatus>, Error> {
        let out = self.run(&["status"], Some(dir))?;

        let mut statuses = Vec::new();
        for line in out.lines() {
            if line.len() < 2 {
                continue;
            }
            let state = match line.as_bytes()[0] {
                b'?' => WorkState::Unversioned,
                b'M' | b'A' | b'D' | b'R' => WorkState::Modified,
                b'!' => WorkState::Missing,
                b'C' => WorkState::Conflicted,
                _ => continue,
            };
            statuses.push(WorkStatus {
                state,
                path: line[1..].trim().to_string(),
            });
        }

        Ok(statuses)
    }
}

/// `   1234 alice         4096 Jul 21  2009 trunk/`
/// The date shows a time instead of a year for entries from the current
/// year; listing dates only order sibling lines, so current-year precision
/// is sufficient.
fn parse_list_line(line: &str) -> Option<ListEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return None;
    }

    let name = *fields.last()?;
    let (year_or_time_idx, name_idx) = (fields.len() - 2, fields.len() - 1);
    let (month, day, year_or_time) = (
        fields[name_idx - 3],
        fields[name_idx - 2].parse::<u32>().ok()?,
        fields[year_or_time_idx],
    );
    let _ = fields.first()?.parse::<u32>().ok()?;

    let month_no = match month {
        "Jan" => 1,
        "Feb" => 2,
        "Mar" => 3,
        "Apr" => 4,
        "May" => 5,
        "Jun" => 6,
        "Jul" => 7,
        "Aug" => 8,
        "Sep" => 9,
        "Oct" => 10,
        "Nov" => 11,
        "Dec" => 12,
        _ => return None,
    };

    let (year, hour, minute) = if let Some((h, m)) = year_or_time.split_once(':') {
        (
            Utc::now().year(),
            h.parse::<u32>().ok()?,
            m.parse::<u32>().ok()?,
        )
    } else {
        (year_or_time.parse::<i32>().ok()?, 0, 0)
    };

    let last_changed = Utc
        .with_ymd_and_hms(year, month_no, day, hour, minute, 0)
        .single()?;

    let (name, is_dir) = match name.strip_suffix('/') {
        Some(stripped) => (stripped, true),
        None => (name, false),
    };

    Some(ListEntry {
        name: name.to_string(),
        is_dir,
        last_changed,
    })
}
