use std::path::{Path, PathBuf};

use crate::FHashMap;
use crate::authors::AuthorMap;
use crate::catalog::BranchCatalog;
use crate::checkpoint::CheckpointManager;
use crate::deps;
use crate::errors::{Error, with_retry};
use crate::git::{GitTarget, WorkChanges};
use crate::model::{
    CommitEntry, ExternalPin, LineKind, LineOfDevelopment, ProjectMetadata, tag_label_of,
};
use crate::progress::Progress;
use crate::provenance;
use crate::registry::ProjectRegistry;
use crate::svn::{SvnSource, WorkState};

/// Run-wide settings, shared by every project the run touches.
pub(crate) struct ReplayOptions {
    pub(crate) workspace: PathBuf,
    pub(crate) main_branch: String,
    pub(crate) dry_run: bool,
    pub(crate) checkpoint: bool,
    pub(crate) from_checkpoint: bool,
}

/// Per-project settings. Revision numbers are repository-global but the
/// ignore intent behind them is not, and a push remote only ever belongs to
/// one project, so none of this may leak into the replay of a dependency. A
/// project discovered through an external and never configured replays with
/// the neutral defaults: no remote, nothing ignored.
#[derive(Clone, Debug, Default)]
pub(crate) struct ProjectTuning {
    pub(crate) remote_url: Option<String>,
    pub(crate) ignored_revisions: Vec<u32>,
    pub(crate) ignored_line_parts: Vec<String>,
}

/// Where the engine currently is in a project's replay. Purely
/// observational; transitions are driven by the operations themselves.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Uninitialized,
    TrunkBootstrapped,
    Replaying,
    SwitchingLine,
    Done,
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ReplaySummary {
    pub(crate) lines: u32,
    /// Commits created in the target repository by this run.
    pub(crate) replayed: u32,
    /// Entries already replayed by an earlier run.
    pub(crate) resumed: u32,
    /// Entries with no effect on the target, mapped onto their nearest
    /// replayed ancestor instead of an empty commit.
    pub(crate) mapped_empty: u32,
    pub(crate) skipped: Vec<u32>,
}

enum EntryOutcome {
    Committed,
    MappedEmpty,
}

/// Drives the whole conversion of one project: line discovery, log
/// ingestion, provenance resolution, then commit-by-commit replay into a
/// target repository initialized inside the source working copy.
///
/// Replay is resumable: entries whose replay mapping is already durable are
/// skipped, so a crashed run picks up where it stopped. Dependencies of a
/// commit may pull in the recursive replay of other projects; the registry's
/// in-flight set keeps that recursion acyclic.
pub(crate) struct ReplayEngine<'a> {
    svn: &'a dyn SvnSource,
    git: &'a dyn GitTarget,
    registry: &'a mut ProjectRegistry,
    authors: &'a AuthorMap,
    checkpoints: Option<&'a CheckpointManager>,
    progress: &'a Progress,
    opts: &'a ReplayOptions,
    tuning: &'a FHashMap<String, ProjectTuning>,
    phase: Phase,
}

impl<'a> ReplayEngine<'a> {
    pub(crate) fn new(
        svn: &'a dyn SvnSource,
        git: &'a dyn GitTarget,
        registry: &'a mut ProjectRegistry,
        authors: &'a AuthorMap,
        checkpoints: Option<&'a CheckpointManager>,
        progress: &'a Progress,
        opts: &'a ReplayOptions,
        tuning: &'a FHashMap<String, ProjectTuning>,
    ) -> Self {
        Self {
            svn,
            git,
            registry,
            authors,
            checkpoints,
            progress,
            opts,
            tuning,
            phase: Phase::Uninitialized,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    fn sandbox(&self, project: &str) -> PathBuf {
        self.opts.workspace.join(format!("{project}-sandbox"))
    }

    pub(crate) fn replay_project(&mut self, project: &str) -> Result<ReplaySummary, Error> {
        self.registry.begin(project)?;
        let result = self.run_project(project);
        self.registry.finish(project);
        self.progress.clear();

        match &result {
            Ok(summary) => {
                self.phase = Phase::Done;
                tracing::info!(
                    "{project}: {} replayed, {} resumed, {} empty, {} skipped over {} lines",
                    summary.replayed,
                    summary.resumed,
                    summary.mapped_empty,
                    summary.skipped.len(),
                    summary.lines,
                );
            }
            Err(e) => {
                self.phase = Phase::Failed;
                tracing::error!("{project}: replay failed: {e}");
            }
        }
        result
    }

    fn run_project(&mut self, project: &str) -> Result<ReplaySummary, Error> {
        self.phase = Phase::Uninitialized;
        let meta = self.registry.metadata(project)?.clone();
        let tuning = self.tuning.get(project).cloned().unwrap_or_default();

        let mut catalog =
            BranchCatalog::discover(self.svn, &meta, &tuning.ignored_line_parts)?;
        catalog.ingest(self.svn, &meta, self.registry.store(project)?)?;
        for line in catalog.lines() {
            let name = line.name.clone();
            provenance::attach_line(self.registry, project, &name)?;
        }

        let sandbox = self.sandbox(project);
        std::fs::create_dir_all(&self.opts.workspace).map_err(|e| Error::Config {
            what: format!("failed to create workspace {:?}: {e}", self.opts.workspace),
        })?;

        if self.opts.from_checkpoint && !self.opts.dry_run {
            if let Some(mgr) = self.checkpoints {
                mgr.restore(project, &sandbox)?;
            }
        }

        let mut summary = ReplaySummary::default();
        let mut bootstrapped = sandbox.join(".git").is_dir();
        let mut first_commit_done = bootstrapped;
        let mut current_line: Option<String> = None;

        let lines: Vec<LineOfDevelopment> = catalog.lines().to_vec();
        for line in &lines {
            if line.first_revision == 0 {
                tracing::warn!("{project}: line {} has no log entries", line.name);
                continue;
            }
            summary.lines += 1;

            let entries = self.registry.store(project)?.entries_for_line(&line.name)?;
            if self.opts.dry_run {
                self.dry_run_line(&entries, &tuning.ignored_revisions, &mut summary);
                continue;
            }

            let branch = if line.kind == LineKind::Trunk {
                self.opts.main_branch.clone()
            } else {
                tag_label_of(&line.name).to_string()
            };

            let pending = entries.iter().any(|e| {
                !e.is_replayed() && !tuning.ignored_revisions.contains(&e.revision)
            });
            if pending && current_line.as_deref() != Some(line.name.as_str()) {
                if !bootstrapped {
                    self.bootstrap(line, &sandbox, tuning.remote_url.as_deref())?;
                    bootstrapped = true;
                } else {
                    self.switch_line(project, &meta, line, &branch, &sandbox)?;
                }
                current_line = Some(line.name.clone());
            }

            self.phase = Phase::Replaying;
            let total = entries.len() as u32;
            let mut last_on_line = self
                .registry
                .store(project)?
                .latest_replayed_at_or_before(&line.name, None)?
                .map(|(rev, _, _)| rev);
            let mut line_tail = None;

            for (idx, entry) in entries.iter().enumerate() {
                if tuning.ignored_revisions.contains(&entry.revision) {
                    tracing::info!("{project}: skipping r{} as configured", entry.revision);
                    summary.skipped.push(entry.revision);
                    continue;
                }
                if entry.is_replayed() {
                    summary.resumed += 1;
                    last_on_line = Some(entry.revision);
                    continue;
                }

                self.progress.commit(
                    project,
                    &line.name,
                    entry.revision,
                    idx as u32 + 1,
                    total,
                );
                let allow_empty = !first_commit_done;
                let outcome = self.replay_entry(
                    project,
                    line,
                    &sandbox,
                    entry,
                    allow_empty,
                    last_on_line,
                )?;
                match outcome {
                    EntryOutcome::Committed => summary.replayed += 1,
                    EntryOutcome::MappedEmpty => summary.mapped_empty += 1,
                }
                first_commit_done = true;
                last_on_line = Some(entry.revision);
                line_tail = Some(entry.revision);
            }

            if let Some(tail) = line_tail {
                if tuning.remote_url.is_some() {
                    self.git.push(&sandbox, "origin", &branch)?;
                }
                if self.opts.checkpoint {
                    if let Some(mgr) = self.checkpoints {
                        mgr.save(project, tail, &sandbox);
                    }
                }
            }
        }

        Ok(summary)
    }

    fn dry_run_line(&self, entries: &[CommitEntry], ignored: &[u32], summary: &mut ReplaySummary) {
        for entry in entries {
            if ignored.contains(&entry.revision) {
                summary.skipped.push(entry.revision);
            } else if entry.is_replayed() {
                summary.resumed += 1;
            } else {
                tracing::info!(
                    "would replay r{} ({}, {} paths)",
                    entry.revision,
                    entry.author,
                    entry.file_changes.len(),
                );
                summary.replayed += 1;
            }
        }
    }

    /// Checks out the line's first revision and initializes the target
    /// repository inside the working copy, seeding `.gitignore` from the
    /// source's ignore property so repository internals never get committed.
    fn bootstrap(
        &mut self,
        line: &LineOfDevelopment,
        sandbox: &Path,
        remote: Option<&str>,
    ) -> Result<(), Error> {
        let first = line.first_revision;
        with_retry(&format!("checkout {}@{first}", line.url), || {
            self.svn.checkout(&line.url, first, sandbox)
        })?;

        self.git.init(sandbox, &self.opts.main_branch)?;
        self.git.config(sandbox, "user.name", "svn-replay")?;
        self.git.config(sandbox, "user.email", "svn-replay@localhost")?;
        if let Some(url) = remote {
            self.git.remote_add(sandbox, "origin", url)?;
        }
        self.seed_gitignore(&line.url, first, sandbox)?;

        self.phase = Phase::TrunkBootstrapped;
        Ok(())
    }

    fn seed_gitignore(&self, url: &str, revision: u32, sandbox: &Path) -> Result<(), Error> {
        let ignores = with_retry(&format!("propget svn:ignore {url}"), || {
            self.svn.propget(url, revision, "svn:ignore")
        })?;

        let mut content = String::from(".svn\n");
        for line in &ignores {
            let line = line.trim();
            if !line.is_empty() {
                content.push_str(line);
                content.push('\n');
            }
        }

        std::fs::write(sandbox.join(".gitignore"), content).map_err(|e| Error::Config {
            what: format!("failed to write .gitignore in {sandbox:?}: {e}"),
        })
    }

    /// Moves the replay onto another line: the target branch forks from the
    /// line's replayed copy point, then the working copy is switched over
    /// and scrubbed of leftovers from the previous line.
    fn switch_line(
        &mut self,
        project: &str,
        meta: &ProjectMetadata,
        line: &LineOfDevelopment,
        branch: &str,
        sandbox: &Path,
    ) -> Result<(), Error> {
        self.phase = Phase::SwitchingLine;

        let (partially_replayed, start_hash) = {
            let store = self.registry.store(project)?;

            let already = store.latest_replayed_at_or_before(&line.name, None)?;
            if already.is_some() {
                (true, None)
            } else {
                let first_entry =
                    store.get(line.first_revision)?.ok_or_else(|| Error::Store {
                        what: format!(
                            "{project}: first entry r{} of {} missing from store",
                            line.first_revision, line.name,
                        ),
                    })?;

                let mut hash = None;
                if let Some(prev) = first_entry.predecessor {
                    hash = store.get(prev)?.and_then(|e| e.replayed_hash);
                }
                if hash.is_none() {
                    hash = store
                        .latest_replayed_at_or_before(&meta.trunk_name, Some(line.first_revision))?
                        .map(|(_, _, h)| h);
                }
                (false, hash)
            }
        };

        if partially_replayed {
            self.git.checkout(sandbox, branch)?;
        } else {
            let start_hash = start_hash.ok_or_else(|| Error::AncestryConflict {
                what: format!(
                    "{project}: no replayed copy point for {} (first r{})",
                    line.name, line.first_revision,
                ),
            })?;
            tracing::info!(
                "{project}: branching {branch} at {} for {}",
                &start_hash[..crate::model::SHORT_HASH_LEN],
                line.name,
            );
            self.git.create_branch_at(sandbox, branch, &start_hash)?;
        }

        with_retry(&format!("switch {}@{}", line.url, line.first_revision), || {
            self.svn.switch(sandbox, &line.url, line.first_revision)
        })?;
        self.clean_sandbox(sandbox)?;
        Ok(())
    }

    /// Reverts local modifications and removes files left behind by the
    /// previous line so they cannot leak into the next commit. The target
    /// repository and its ignore file are kept.
    fn clean_sandbox(&self, sandbox: &Path) -> Result<(), Error> {
        self.svn.revert(sandbox)?;

        for status in self.svn.status(sandbox)? {
            if status.state != WorkState::Unversioned {
                continue;
            }
            if status.path == ".git"
                || status.path.starts_with(".git/")
                || status.path == ".gitignore"
            {
                continue;
            }

            let full = sandbox.join(&status.path);
            let removed = if full.is_dir() {
                std::fs::remove_dir_all(&full)
            } else {
                std::fs::remove_file(&full)
            };
            if let Err(e) = removed {
                tracing::warn!("could not remove stray {:?}: {e}", status.path);
            } else {
                tracing::debug!("removed stray {:?}", status.path);
            }
        }
        Ok(())
    }

    fn replay_entry(
        &mut self,
        project: &str,
        line: &LineOfDevelopment,
        sandbox: &Path,
        entry: &CommitEntry,
        allow_empty: bool,
        last_on_line: Option<u32>,
    ) -> Result<EntryOutcome, Error> {
        with_retry(&format!("update to r{}", entry.revision), || {
            self.svn.update(sandbox, entry.revision)
        })?;

        self.apply_externals(project, line, sandbox, entry)?;

        let status = self.git.status(sandbox)?;
        if status.is_empty() && !allow_empty {
            return self.map_empty_entry(project, line, entry, last_on_line);
        }

        let changes = WorkChanges::from_status(&status);
        self.git.stage(sandbox, &changes)?;

        let author = self.authors.resolve(&entry.author)?;
        let date = entry.timestamp.to_rfc3339();
        let outcome = self
            .git
            .commit(sandbox, &author, &date, &entry.message, allow_empty)?;

        // the working tree must be fully accounted for, and the reported
        // short hash must match the commit we think we just made
        let remaining = self.git.status(sandbox)?;
        if !remaining.is_empty() {
            return Err(Error::ConsistencyViolation {
                what: format!(
                    "{project} r{}: {} paths left uncommitted",
                    entry.revision,
                    remaining.len(),
                ),
            });
        }
        let full_hash = self.git.head_hash(sandbox)?;
        if !full_hash.starts_with(&outcome.short_hash) {
            return Err(Error::ConsistencyViolation {
                what: format!(
                    "{project} r{}: commit reported {} but head is {full_hash}",
                    entry.revision, outcome.short_hash,
                ),
            });
        }

        let store = self.registry.store(project)?;
        store.record_replay(entry.revision, &outcome.branch, &full_hash)?;
        if entry.predecessor.is_none() {
            if let Some(prev) = last_on_line {
                store.set_predecessor(entry.revision, prev)?;
            }
        }

        tracing::info!(
            "{project} r{} -> [{} {}] {} files changed",
            entry.revision,
            outcome.branch,
            outcome.short_hash,
            outcome.files_changed,
        );
        Ok(EntryOutcome::Committed)
    }

    /// Resolves the entry's declared externals and records each as a gitlink
    /// pinned to the dependency's replayed commit. A dependency with no
    /// replayed ancestor yet is replayed first, recursively.
    fn apply_externals(
        &mut self,
        project: &str,
        line: &LineOfDevelopment,
        sandbox: &Path,
        entry: &CommitEntry,
    ) -> Result<(), Error> {
        let prop_lines = with_retry(&format!("propget svn:externals {}", line.url), || {
            self.svn.propget(&line.url, entry.revision, "svn:externals")
        })?;
        let pins = deps::parse_pins(&prop_lines)?;

        for pin in &pins {
            self.ensure_registered(pin)?;

            let resolved = match deps::resolve(self.registry, pin, &entry.timestamp) {
                Ok(resolved) => resolved,
                Err(e @ (Error::ResolutionExhausted { .. } | Error::NotFound { .. })) => {
                    tracing::info!(
                        "{project} r{}: dependency {} not replayed yet ({e}), replaying it",
                        entry.revision,
                        pin.project,
                    );
                    self.replay_project(&pin.project)?;
                    deps::resolve(self.registry, pin, &entry.timestamp)?
                }
                Err(e) => return Err(e),
            };

            tracing::debug!(
                "{project} r{}: external {} -> {} r{}",
                entry.revision,
                pin.subdir,
                pin.project,
                resolved.revision,
            );
            self.git
                .stage_gitlink(sandbox, &pin.subdir, &resolved.replayed_hash)?;
        }
        Ok(())
    }

    /// Registers a dependency project discovered through an external,
    /// deriving its layout from the repository structure around its URL.
    fn ensure_registered(&mut self, pin: &ExternalPin) -> Result<(), Error> {
        if self.registry.metadata(&pin.project).is_ok() {
            return Ok(());
        }

        let info = with_retry(&format!("info {}", pin.url), || self.svn.info(&pin.url))?;
        let mut base_path = info.rel_path.trim_matches('/').to_string();
        for marker in ["/trunk", "/branches", "/tags"] {
            if let Some(pos) = base_path.find(marker) {
                base_path.truncate(pos);
                break;
            }
        }

        tracing::info!(
            "registering dependency project \"{}\" at {}/{base_path}",
            pin.project,
            info.root_url,
        );
        self.registry.register(ProjectMetadata {
            name: pin.project.clone(),
            root_url: info.root_url,
            base_path,
            trunk_name: "trunk".into(),
            branches_name: "branches".into(),
            tags_name: "tags".into(),
        })
    }

    /// An entry whose replay leaves the target untouched (all changes were
    /// outside the exported tree, or cancelled out) maps onto its nearest
    /// replayed ancestor rather than producing an empty commit.
    fn map_empty_entry(
        &mut self,
        project: &str,
        line: &LineOfDevelopment,
        entry: &CommitEntry,
        last_on_line: Option<u32>,
    ) -> Result<EntryOutcome, Error> {
        let store = self.registry.store(project)?;

        let ancestor = match last_on_line {
            Some(prev) => store.get(prev)?,
            None => None,
        };
        let (branch, hash) = match ancestor {
            Some(CommitEntry {
                replayed_branch: Some(branch),
                replayed_hash: Some(hash),
                ..
            }) => (branch, hash),
            _ => match store.latest_replayed_at_or_before(&line.name, Some(entry.revision))? {
                Some((_, branch, hash)) => (branch, hash),
                None => {
                    return Err(Error::ConsistencyViolation {
                        what: format!(
                            "{project} r{}: nothing to commit and no replayed ancestor",
                            entry.revision,
                        ),
                    });
                }
            },
        };

        tracing::info!(
            "{project} r{}: no target changes, mapped to {}",
            entry.revision,
            &hash[..crate::model::SHORT_HASH_LEN],
        );
        store.record_replay(entry.revision, &branch, &hash)?;
        if entry.predecessor.is_none() {
            if let Some(prev) = last_on_line {
                store.set_predecessor(entry.revision, prev)?;
            }
        }
        Ok(EntryOutcome::MappedEmpty)
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::path::{Path, PathBuf};
    use std::rc::Rc;

    use chrono::{TimeZone as _, Utc};

    use super::{Phase, ProjectTuning, ReplayEngine, ReplayOptions};
    use crate::authors::AuthorMap;
    use crate::errors::Error;
    use crate::git::{CommitOutcome, GitTarget, StatusEntry, StatusKind, WorkChanges};
    use crate::model::{FileAction, ProjectMetadata};
    use crate::progress::Progress;
    use crate::registry::ProjectRegistry;
    use crate::store::RevisionStore;
    use crate::svn::{ListEntry, LogChange, LogEntry, SvnInfo, SvnSource, WorkStatus};

    const ROOT: &str = "http://svn.example.com/daq";
    const BASE: &str = "http://svn.example.com/daq/projects/pdaq";

    struct MockCommit {
        branch: String,
        hash: String,
        author: String,
        message: String,
    }

    #[derive(Default)]
    struct World {
        lists: Vec<(String, Vec<ListEntry>)>,
        logs: Vec<(String, Vec<LogEntry>)>,
        /// Status produced by `update` to a revision.
        on_update: Vec<(u32, Vec<StatusEntry>)>,
        /// Status produced by `checkout`/`switch` of (url, revision).
        on_switch: Vec<((String, u32), Vec<StatusEntry>)>,
        /// `svn:externals` lines per revision.
        externals: Vec<(u32, Vec<String>)>,
        pending: Vec<StatusEntry>,
        commits: Vec<MockCommit>,
        branches_created: Vec<(String, String)>,
        current_branch: String,
        gitlinks: Vec<(String, String)>,
        pushed: Vec<String>,
        hash_counter: u64,
    }

    struct MockSvn(Rc<RefCell<World>>);
    struct MockGit(Rc<RefCell<World>>);

    impl SvnSource for MockSvn {
        fn info(&self, _url: &str) -> Result<SvnInfo, Error> {
            unimplemented!()
        }

        fn list(&self, url: &str) -> Result<Vec<ListEntry>, Error> {
            self.0
                .borrow()
                .lists
                .iter()
                .find(|(u, _)| u == url)
                .map(|(_, e)| e.clone())
                .ok_or_else(|| Error::NotFound {
                    what: format!("no listing for {url}"),
                })
        }

        fn log(&self, url: &str) -> Result<Vec<LogEntry>, Error> {
            self.0
                .borrow()
                .logs
                .iter()
                .find(|(u, _)| u == url)
                .map(|(_, e)| e.clone())
                .ok_or_else(|| Error::NotFound {
                    what: format!("no log for {url}"),
                })
        }

        fn checkout(&self, url: &str, revision: u32, _dir: &Path) -> Result<(), Error> {
            let mut world = self.0.borrow_mut();
            world.pending = switch_status(&world, url, revision);
            Ok(())
        }

        fn switch(&self, _dir: &Path, url: &str, revision: u32) -> Result<(), Error> {
            let mut world = self.0.borrow_mut();
            world.pending = switch_status(&world, url, revision);
            Ok(())
        }

        fn update(&self, _dir: &Path, revision: u32) -> Result<(), Error> {
            let mut world = self.0.borrow_mut();
            let status = world
                .on_update
                .iter()
                .find(|(r, _)| *r == revision)
                .map(|(_, s)| s.clone())
                .unwrap_or_default();
            world.pending = status;
            Ok(())
        }

        fn revert(&self, _dir: &Path) -> Result<(), Error> {
            Ok(())
        }

        fn propget(&self, _url: &str, revision: u32, name: &str) -> Result<Vec<String>, Error> {
            if name == "svn:externals" {
                Ok(self
                    .0
                    .borrow()
                    .externals
                    .iter()
                    .find(|(r, _)| *r == revision)
                    .map(|(_, l)| l.clone())
                    .unwrap_or_default())
            } else {
                Ok(Vec::new())
            }
        }

        fn status(&self, _dir: &Path) -> Result<Vec<WorkStatus>, Error> {
            Ok(Vec::new())
        }
    }

    fn switch_status(world: &World, url: &str, revision: u32) -> Vec<StatusEntry> {
        world
            .on_switch
            .iter()
            .find(|((u, r), _)| u == url && *r == revision)
            .map(|(_, s)| s.clone())
            .unwrap_or_default()
    }

    impl GitTarget for MockGit {
        fn init(&self, dir: &Path, head_branch: &str) -> Result<(), Error> {
            std::fs::create_dir_all(dir.join(".git")).unwrap();
            self.0.borrow_mut().current_branch = head_branch.to_string();
            Ok(())
        }

        fn config(&self, _: &Path, _: &str, _: &str) -> Result<(), Error> {
            Ok(())
        }

        fn remote_add(&self, _: &Path, _: &str, _: &str) -> Result<(), Error> {
            Ok(())
        }

        fn stage(&self, _: &Path, _changes: &WorkChanges) -> Result<(), Error> {
            Ok(())
        }

        fn stage_gitlink(&self, _: &Path, subdir: &str, hash: &str) -> Result<(), Error> {
            self.0
                .borrow_mut()
                .gitlinks
                .push((subdir.to_string(), hash.to_string()));
            Ok(())
        }

        fn commit(
            &self,
            _dir: &Path,
            author: &str,
            _date: &str,
            message: &str,
            _allow_empty: bool,
        ) -> Result<CommitOutcome, Error> {
            let mut world = self.0.borrow_mut();
            world.hash_counter += 1;
            let hash = format!("{:040x}", world.hash_counter);
            let files_changed = world.pending.len() as u32;
            world.pending.clear();
            let branch = world.current_branch.clone();
            world.commits.push(MockCommit {
                branch: branch.clone(),
                hash: hash.clone(),
                author: author.to_string(),
                message: message.to_string(),
            });
            Ok(CommitOutcome {
                branch,
                short_hash: hash[..7].to_string(),
                files_changed,
                insertions: 0,
                deletions: 0,
            })
        }

        fn head_hash(&self, _: &Path) -> Result<String, Error> {
            let world = self.0.borrow();
            world
                .commits
                .last()
                .map(|c| c.hash.clone())
                .ok_or_else(|| Error::Command {
                    what: "no commits".into(),
                })
        }

        fn create_branch_at(&self, _: &Path, branch: &str, start_hash: &str) -> Result<(), Error> {
            let mut world = self.0.borrow_mut();
            world.current_branch = branch.to_string();
            world
                .branches_created
                .push((branch.to_string(), start_hash.to_string()));
            Ok(())
        }

        fn checkout(&self, _: &Path, branch: &str) -> Result<(), Error> {
            self.0.borrow_mut().current_branch = branch.to_string();
            Ok(())
        }

        fn status(&self, _: &Path) -> Result<Vec<StatusEntry>, Error> {
            Ok(self.0.borrow().pending.clone())
        }

        fn push(&self, _: &Path, _remote: &str, branch: &str) -> Result<(), Error> {
            self.0.borrow_mut().pushed.push(branch.to_string());
            Ok(())
        }
    }

    fn meta() -> ProjectMetadata {
        ProjectMetadata {
            name: "pdaq".into(),
            root_url: ROOT.into(),
            base_path: "projects/pdaq".into(),
            trunk_name: "trunk".into(),
            branches_name: "branches".into(),
            tags_name: "tags".into(),
        }
    }

    fn dir(name: &str, day: u32) -> ListEntry {
        ListEntry {
            name: name.into(),
            is_dir: true,
            last_changed: Utc.with_ymd_and_hms(2009, 7, day, 0, 0, 0).unwrap(),
        }
    }

    fn log_entry(revision: u32, path: &str, copied: Option<(&str, u32)>) -> LogEntry {
        LogEntry {
            revision,
            author: "alice".into(),
            timestamp: Utc
                .with_ymd_and_hms(2009, 7, revision, 12, 0, 0)
                .unwrap(),
            change_count: 1,
            changes: vec![LogChange {
                action: FileAction::Added,
                path: path.into(),
                copied_from: copied.map(|(p, r)| (p.into(), r)),
            }],
            message: format!("change {revision}"),
        }
    }

    fn untracked(path: &str) -> StatusEntry {
        StatusEntry {
            kind: StatusKind::Untracked,
            path: path.into(),
        }
    }

    fn modified(path: &str) -> StatusEntry {
        StatusEntry {
            kind: StatusKind::Modified,
            path: path.into(),
        }
    }

    fn opts(workspace: PathBuf) -> ReplayOptions {
        ReplayOptions {
            workspace,
            main_branch: "main".into(),
            dry_run: false,
            checkpoint: false,
            from_checkpoint: false,
        }
    }

    fn no_tuning() -> crate::FHashMap<String, ProjectTuning> {
        crate::FHashMap::default()
    }

    fn authors() -> AuthorMap {
        AuthorMap::parse("alice: Alice Adams <alice@example.com>\n").unwrap()
    }

    /// Trunk r1..r3 plus tag v1 copied from trunk@2 in r4.
    fn trunk_and_tag_world() -> Rc<RefCell<World>> {
        let trunk_url = format!("{BASE}/trunk");
        let tag_url = format!("{BASE}/tags/v1");
        Rc::new(RefCell::new(World {
            lists: vec![
                (BASE.into(), vec![dir("trunk", 1), dir("tags", 2)]),
                (format!("{BASE}/tags"), vec![dir("v1", 4)]),
            ],
            logs: vec![
                (
                    trunk_url.clone(),
                    vec![
                        log_entry(1, "/projects/pdaq/trunk", None),
                        log_entry(2, "/projects/pdaq/trunk/a.c", None),
                        log_entry(3, "/projects/pdaq/trunk/b.c", None),
                    ],
                ),
                (
                    tag_url.clone(),
                    vec![
                        log_entry(1, "/projects/pdaq/trunk", None),
                        log_entry(2, "/projects/pdaq/trunk/a.c", None),
                        log_entry(
                            4,
                            "/projects/pdaq/tags/v1",
                            Some(("/projects/pdaq/trunk", 2)),
                        ),
                    ],
                ),
            ],
            on_switch: vec![
                ((trunk_url, 1), vec![untracked("README")]),
                ((tag_url, 4), vec![modified("a.c")]),
            ],
            on_update: vec![
                (1, vec![untracked("README")]),
                (2, vec![untracked("a.c")]),
                (3, vec![untracked("b.c")]),
                (4, vec![modified("a.c")]),
            ],
            current_branch: String::new(),
            ..World::default()
        }))
    }

    fn registry() -> ProjectRegistry {
        let mut reg = ProjectRegistry::new("/tmp/unused".into());
        reg.register(meta()).unwrap();
        reg.insert_store("pdaq", RevisionStore::open_in_memory("pdaq", "trunk").unwrap());
        reg
    }

    #[test]
    fn test_replay_trunk_and_tag() {
        let world = trunk_and_tag_world();
        let svn = MockSvn(world.clone());
        let git = MockGit(world.clone());
        let mut reg = registry();
        let authors = authors();
        let tmp = tempfile::tempdir().unwrap();
        let opts = opts(tmp.path().to_path_buf());
        let tuning = no_tuning();
        let progress = Progress::new(false);

        let mut engine =
            ReplayEngine::new(&svn, &git, &mut reg, &authors, None, &progress, &opts, &tuning);
        let summary = engine.replay_project("pdaq").unwrap();

        assert_eq!(summary.replayed, 4);
        assert_eq!(summary.resumed, 0);
        assert_eq!(summary.lines, 2);
        assert_eq!(engine.phase(), Phase::Done);

        let world = world.borrow();
        assert_eq!(world.commits.len(), 4);
        assert_eq!(world.commits[0].branch, "main");
        assert_eq!(world.commits[0].author, "Alice Adams <alice@example.com>");
        assert_eq!(world.commits[0].message, "change 1");
        assert_eq!(world.commits[3].branch, "v1");

        // the tag forks from the commit that replayed trunk r2
        assert_eq!(world.branches_created.len(), 1);
        let (branch, start) = &world.branches_created[0];
        assert_eq!(branch, "v1");
        assert_eq!(start, &world.commits[1].hash);

        let store = reg.store("pdaq").unwrap();
        let r4 = store.get(4).unwrap().unwrap();
        assert_eq!(r4.replayed_branch.as_deref(), Some("v1"));
        assert_eq!(r4.predecessor, Some(2));
        assert_eq!(store.get(3).unwrap().unwrap().predecessor, Some(2));
        assert_eq!(store.get(2).unwrap().unwrap().predecessor, Some(1));
    }

    #[test]
    fn test_resumed_run_commits_nothing() {
        let world = trunk_and_tag_world();
        let svn = MockSvn(world.clone());
        let git = MockGit(world.clone());
        let mut reg = registry();
        let authors = authors();
        let tmp = tempfile::tempdir().unwrap();
        let opts = opts(tmp.path().to_path_buf());
        let tuning = no_tuning();
        let progress = Progress::new(false);

        let mut engine =
            ReplayEngine::new(&svn, &git, &mut reg, &authors, None, &progress, &opts, &tuning);
        engine.replay_project("pdaq").unwrap();
        let summary = engine.replay_project("pdaq").unwrap();

        assert_eq!(summary.replayed, 0);
        assert_eq!(summary.resumed, 4);
        assert_eq!(world.borrow().commits.len(), 4);
    }

    #[test]
    fn test_empty_entry_maps_to_ancestor() {
        let world = trunk_and_tag_world();
        // r3 produces no changes in the target
        world.borrow_mut().on_update.retain(|(r, _)| *r != 3);
        let svn = MockSvn(world.clone());
        let git = MockGit(world.clone());
        let mut reg = registry();
        let authors = authors();
        let tmp = tempfile::tempdir().unwrap();
        let opts = opts(tmp.path().to_path_buf());
        let tuning = no_tuning();
        let progress = Progress::new(false);

        let mut engine =
            ReplayEngine::new(&svn, &git, &mut reg, &authors, None, &progress, &opts, &tuning);
        let summary = engine.replay_project("pdaq").unwrap();

        assert_eq!(summary.replayed, 3);
        assert_eq!(summary.mapped_empty, 1);
        assert_eq!(world.borrow().commits.len(), 3);

        let store = reg.store("pdaq").unwrap();
        let r3 = store.get(3).unwrap().unwrap();
        let r2 = store.get(2).unwrap().unwrap();
        assert_eq!(r3.replayed_hash, r2.replayed_hash);
    }

    #[test]
    fn test_ignored_revisions_skipped() {
        let world = trunk_and_tag_world();
        let svn = MockSvn(world.clone());
        let git = MockGit(world.clone());
        let mut reg = registry();
        let authors = authors();
        let tmp = tempfile::tempdir().unwrap();
        let opts = opts(tmp.path().to_path_buf());
        let mut tuning = no_tuning();
        tuning.insert(
            "pdaq".into(),
            ProjectTuning {
                ignored_revisions: vec![3],
                ..ProjectTuning::default()
            },
        );
        let progress = Progress::new(false);

        let mut engine =
            ReplayEngine::new(&svn, &git, &mut reg, &authors, None, &progress, &opts, &tuning);
        let summary = engine.replay_project("pdaq").unwrap();

        assert_eq!(summary.replayed, 3);
        assert_eq!(summary.skipped, vec![3]);
        assert!(reg.store("pdaq").unwrap().get(3).unwrap().unwrap().replayed_hash.is_none());
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let world = trunk_and_tag_world();
        let svn = MockSvn(world.clone());
        let git = MockGit(world.clone());
        let mut reg = registry();
        let authors = authors();
        let tmp = tempfile::tempdir().unwrap();
        let mut opts = opts(tmp.path().to_path_buf());
        opts.dry_run = true;
        let tuning = no_tuning();
        let progress = Progress::new(false);

        let mut engine =
            ReplayEngine::new(&svn, &git, &mut reg, &authors, None, &progress, &opts, &tuning);
        let summary = engine.replay_project("pdaq").unwrap();

        assert_eq!(summary.replayed, 4);
        assert!(world.borrow().commits.is_empty());
        assert!(reg.store("pdaq").unwrap().get(1).unwrap().unwrap().replayed_hash.is_none());
    }

    #[test]
    fn test_externals_become_gitlinks() {
        let world = trunk_and_tag_world();
        world.borrow_mut().externals = vec![(
            2,
            vec![format!(
                "daq-common -r7 {ROOT}/projects/daq-common/trunk"
            )],
        )];
        let svn = MockSvn(world.clone());
        let git = MockGit(world.clone());

        let mut reg = registry();
        reg.register(ProjectMetadata {
            name: "daq-common".into(),
            root_url: ROOT.into(),
            base_path: "projects/daq-common".into(),
            trunk_name: "trunk".into(),
            branches_name: "branches".into(),
            tags_name: "tags".into(),
        })
        .unwrap();
        let dep_store = RevisionStore::open_in_memory("daq-common", "trunk").unwrap();
        let dep_hash = "fedcba9876543210fedcba9876543210fedcba98";
        let mut dep_entry = crate::model::CommitEntry::new(
            7,
            "trunk",
            "alice",
            Utc.with_ymd_and_hms(2009, 6, 1, 0, 0, 0).unwrap(),
            1,
            vec![],
            "dep".into(),
        );
        dep_store.put(&mut dep_entry).unwrap();
        dep_store.record_replay(7, "main", dep_hash).unwrap();
        reg.insert_store("daq-common", dep_store);

        let authors = authors();
        let tmp = tempfile::tempdir().unwrap();
        let opts = opts(tmp.path().to_path_buf());
        let tuning = no_tuning();
        let progress = Progress::new(false);

        let mut engine =
            ReplayEngine::new(&svn, &git, &mut reg, &authors, None, &progress, &opts, &tuning);
        engine.replay_project("pdaq").unwrap();

        let world = world.borrow();
        assert_eq!(
            world.gitlinks,
            vec![("daq-common".to_string(), dep_hash.to_string())],
        );
    }

    #[test]
    fn test_push_per_line() {
        let world = trunk_and_tag_world();
        let svn = MockSvn(world.clone());
        let git = MockGit(world.clone());
        let mut reg = registry();
        let authors = authors();
        let tmp = tempfile::tempdir().unwrap();
        let opts = opts(tmp.path().to_path_buf());
        let mut tuning = no_tuning();
        tuning.insert(
            "pdaq".into(),
            ProjectTuning {
                remote_url: Some("git@github.example.com:daq/pdaq.git".into()),
                ..ProjectTuning::default()
            },
        );
        let progress = Progress::new(false);

        let mut engine =
            ReplayEngine::new(&svn, &git, &mut reg, &authors, None, &progress, &opts, &tuning);
        engine.replay_project("pdaq").unwrap();

        assert_eq!(world.borrow().pushed, vec!["main".to_string(), "v1".to_string()]);
    }

    /// A dependency pulled in through an external replays with its own
    /// settings: the dependent's ignore list and push remote must not apply
    /// to it.
    #[test]
    fn test_dependency_replay_uses_own_settings() {
        let world = trunk_and_tag_world();
        let dep_base = format!("{ROOT}/projects/daq-common");
        let dep_trunk = format!("{dep_base}/trunk");
        {
            let mut w = world.borrow_mut();
            w.externals = vec![(2, vec![format!("daq-common -r7 {dep_trunk}")])];
            w.lists.push((dep_base.clone(), vec![dir("trunk", 1)]));
            w.logs.push((
                dep_trunk.clone(),
                vec![log_entry(7, "/projects/daq-common/trunk/lib.c", None)],
            ));
            w.on_switch
                .push(((dep_trunk.clone(), 7), vec![untracked("lib.c")]));
            w.on_update.push((7, vec![untracked("lib.c")]));
        }
        let svn = MockSvn(world.clone());
        let git = MockGit(world.clone());

        let mut reg = registry();
        reg.register(ProjectMetadata {
            name: "daq-common".into(),
            root_url: ROOT.into(),
            base_path: "projects/daq-common".into(),
            trunk_name: "trunk".into(),
            branches_name: "branches".into(),
            tags_name: "tags".into(),
        })
        .unwrap();
        reg.insert_store(
            "daq-common",
            RevisionStore::open_in_memory("daq-common", "trunk").unwrap(),
        );

        let authors = authors();
        let tmp = tempfile::tempdir().unwrap();
        let opts = opts(tmp.path().to_path_buf());
        // r7 belongs to daq-common; listing it here must not suppress the
        // dependency's replay, and the remote is for pdaq lines only
        let mut tuning = no_tuning();
        tuning.insert(
            "pdaq".into(),
            ProjectTuning {
                remote_url: Some("git@github.example.com:daq/pdaq.git".into()),
                ignored_revisions: vec![7],
                ..ProjectTuning::default()
            },
        );
        let progress = Progress::new(false);

        let mut engine =
            ReplayEngine::new(&svn, &git, &mut reg, &authors, None, &progress, &opts, &tuning);
        engine.replay_project("pdaq").unwrap();

        let dep_hash = {
            let dep = reg.store("daq-common").unwrap().get(7).unwrap().unwrap();
            assert_eq!(dep.replayed_branch.as_deref(), Some("main"));
            dep.replayed_hash.unwrap()
        };

        let world = world.borrow();
        assert_eq!(world.gitlinks, vec![("daq-common".to_string(), dep_hash)]);
        // the dependency has no configured remote, so only pdaq lines push
        assert_eq!(world.pushed, vec!["main".to_string(), "v1".to_string()]);
    }

    /// Trunk r1 and r2 were already replayed by an interrupted run; a
    /// restart picks the line up at r3 without re-committing anything.
    #[test]
    fn test_resume_mid_line_replays_remaining() {
        let world = trunk_and_tag_world();
        let svn = MockSvn(world.clone());
        let git = MockGit(world.clone());
        let mut reg = registry();

        let hash1 = format!("{:040x}", 0xaa1_u32);
        let hash2 = format!("{:040x}", 0xaa2_u32);
        {
            let store = reg.store("pdaq").unwrap();
            for rev in [1, 2] {
                let mut e = crate::model::CommitEntry::new(
                    rev,
                    "trunk",
                    "alice",
                    Utc.with_ymd_and_hms(2009, 7, rev, 12, 0, 0).unwrap(),
                    1,
                    vec![],
                    format!("change {rev}"),
                );
                store.put(&mut e).unwrap();
            }
            store.record_replay(1, "main", &hash1).unwrap();
            store.record_replay(2, "main", &hash2).unwrap();
            store.set_predecessor(2, 1).unwrap();
        }

        let authors = authors();
        let tmp = tempfile::tempdir().unwrap();
        // the interrupted run left its sandbox behind
        std::fs::create_dir_all(tmp.path().join("pdaq-sandbox/.git")).unwrap();
        let opts = opts(tmp.path().to_path_buf());
        let tuning = no_tuning();
        let progress = Progress::new(false);

        let mut engine =
            ReplayEngine::new(&svn, &git, &mut reg, &authors, None, &progress, &opts, &tuning);
        let summary = engine.replay_project("pdaq").unwrap();

        assert_eq!(summary.resumed, 2);
        assert_eq!(summary.replayed, 2);

        let world = world.borrow();
        // only r3 and r4 produce new commits
        assert_eq!(world.commits.len(), 2);
        assert_eq!(world.commits[0].branch, "main");
        assert_eq!(world.commits[0].message, "change 3");
        assert_eq!(world.commits[1].branch, "v1");
        // the tag still forks from the commit that replayed trunk r2
        assert_eq!(
            world.branches_created,
            vec![("v1".to_string(), hash2.clone())],
        );

        let store = reg.store("pdaq").unwrap();
        let r3 = store.get(3).unwrap().unwrap();
        assert_eq!(r3.predecessor, Some(2));
        assert_eq!(r3.replayed_branch.as_deref(), Some("main"));
    }
}
