use std::path::Path;
use std::process::Command;

use super::{CommitOutcome, GitTarget, StatusEntry, StatusKind, WorkChanges};
use crate::errors::Error;

/// `git` command-line client.
pub(crate) struct CmdGit;

impl CmdGit {
    pub(crate) fn new() -> Self {
        Self
    }

    fn run(&self, dir: &Path, args: &[&str]) -> Result<String, Error> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .stdin(std::process::Stdio::null())
            .output()
            .map_err(|e| Error::Command {
                what: format!("failed to spawn \"git {}\": {e}", args.join(" ")),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Command {
                what: format!(
                    "git {}: {}",
                    args.first().copied().unwrap_or(""),
                    stderr.trim(),
                ),
            });
        }

        String::from_utf8(output.stdout).map_err(|_| Error::Command {
            what: format!("\"git {}\" produced non-UTF-8 output", args.join(" ")),
        })
    }
}

impl GitTarget for CmdGit {
    fn init(&self, dir: &Path, head_branch: &str) -> Result<(), Error> {
        std::fs::create_dir_all(dir).map_err(|e| Error::Command {
            what: format!("failed to create {dir:?}: {e}"),
        })?;
        self.run(dir, &["init", "--initial-branch", head_branch])?;
        Ok(())
    }

    fn config(&self, dir: &Path, key: &str, value: &str) -> Result<(), Error> {
        self.run(dir, &["config", key, value])?;
        Ok(())
    }

    fn remote_add(&self, dir: &Path, name: &str, url: &str) -> Result<(), Error> {
        self.run(dir, &["remote", "add", name, url])?;
        Ok(())
    }

    fn stage(&self, dir: &Path, changes: &WorkChanges) -> Result<(), Error> {
        // deletions first, see WorkChanges
        if !changes.deletions.is_empty() {
            let mut args = vec!["rm", "-r", "--cached", "--ignore-unmatch", "--"];
            args.extend(changes.deletions.iter().map(String::as_str));
            self.run(dir, &args)?;
        }
        if !changes.additions.is_empty() {
            let mut args = vec!["add", "--"];
            args.extend(changes.additions.iter().map(String::as_str));
            self.run(dir, &args)?;
        }
        if !changes.modifications.is_empty() {
            let mut args = vec!["add", "--"];
            args.extend(changes.modifications.iter().map(String::as_str));
            self.run(dir, &args)?;
        }
        Ok(())
    }

    fn stage_gitlink(&self, dir: &Path, subdir: &str, hash: &str) -> Result<(), Error> {
        let cacheinfo = format!("160000,{hash},{subdir}");
        self.run(dir, &["update-index", "--add", "--cacheinfo", &cacheinfo])?;
        Ok(())
    }

    fn commit(
        &self,
        dir: &Path,
        author: &str,
        date: &str,
        message: &str,
        allow_empty: bool,
    ) -> Result<CommitOutcome, Error> {
        let mut args = vec![
            "commit",
            "--author",
            author,
            "--date",
            date,
            "--allow-empty-message",
            "-m",
            message,
        ];
        if allow_empty {
            args.push("--allow-empty");
        }

        let out = self.run(dir, &args)?;
        parse_commit_report(&out).ok_or_else(|| Error::Command {
            what: format!("unrecognized commit report: \"{}\"", out.trim()),
        })
    }

    fn head_hash(&self, dir: &Path) -> Result<String, Error> {
        let out = self.run(dir, &["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    fn create_branch_at(&self, dir: &Path, branch: &str, start_hash: &str) -> Result<(), Error> {
        self.run(dir, &["checkout", "-b", branch, start_hash])?;
        Ok(())
    }

    fn checkout(&self, dir: &Path, branch: &str) -> Result<(), Error> {
        self.run(dir, &["checkout", branch])?;
        Ok(())
    }

    fn status(&self, dir: &Path) -> Result<Vec<StatusEntry>, Error> {
        let out = self.run(dir, &["status", "--porcelain"])?;

        let mut entries = Vec::new();
        for line in out.lines() {
            if let Some(entry) = parse_porcelain_line(line)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn push(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), Error> {
        self.run(dir, &["push", "--set-upstream", remote, branch])?;
        Ok(())
    }
}

/// First line of a commit report:
/// `[main (root-commit) 1a2b3c4] message` or `[rel-1 1a2b3c4] message`,
/// followed by `N files changed, N insertions(+), N deletions(-)` with any
/// of the three counters possibly absent.
pub(crate) fn parse_commit_report(out: &str) -> Option<CommitOutcome> {
    let mut lines = out.lines();

    let top = lines.next()?.trim_start();
    let inner = top.strip_prefix('[')?;
    let (head, _message) = inner.split_once(']')?;

    let mut head_fields = head.split_whitespace();
    let branch = head_fields.next()?.to_string();
    let short_hash = head_fields.next_back()?.to_string();

    let mut files_changed = 0;
    let mut insertions = 0;
    let mut deletions = 0;
    for line in lines {
        let line = line.trim();
        if !line.contains("changed") {
            continue;
        }
        for piece in line.split(", ") {
            let mut words = piece.split_whitespace();
            let Some(n) = words.next().and_then(|w| w.parse::<u32>().ok()) else {
                continue;
            };
            match words.next() {
                Some(w) if w.starts_with("file") => files_changed = n,
                Some(w) if w.starts_with("insertion") => insertions = n,
                Some(w) if w.starts_with("deletion") => deletions = n,
                _ => {}
            }
        }
        break;
    }

    Some(CommitOutcome {
        branch,
        short_hash,
        files_changed,
        insertions,
        deletions,
    })
}

/// One `git status --porcelain` line. Entries staged with nothing further
/// to do are reported as `Staged`; unknown combinations are an error rather
/// than silently dropped.
pub(crate) fn parse_porcelain_line(line: &str) -> Result<Option<StatusEntry>, Error> {
    if line.is_empty() {
        return Ok(None);
    }
    if line.len() < 4 {
        return Err(Error::Command {
            what: format!("short porcelain status line \"{line}\""),
        });
    }

    let (index, work) = (line.as_bytes()[0], line.as_bytes()[1]);
    let path = line[3..].to_string();

    let kind = match (index, work) {
        (b'?', b'?') => StatusKind::Untracked,
        (_, b' ') => StatusKind::Staged,
        (b' ', b'A') => StatusKind::Added,
        (b' ', b'D') => StatusKind::Deleted,
        (b' ', b'M') => StatusKind::Modified,
        _ => {
            return Err(Error::Command {
                what: format!("unknown porcelain status line \"{line}\""),
            });
        }
    };

    Ok(Some(StatusEntry { kind, path }))
}
