use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension as _, params};

use crate::errors::Error;
use crate::model::{CommitEntry, FileAction, FileChange, is_short_hash};

/// Durable, per-project storage of commit metadata and the revision to
/// replayed-commit mapping. One store instance per project; the on-disk file
/// is `<project>-replay.db` under the configured database directory.
///
/// In-memory caches elsewhere are rebuildable projections; once an entry is
/// persisted here, this is the source of truth.
pub(crate) struct RevisionStore {
    conn: Connection,
    project: String,
    trunk_name: String,
}

impl RevisionStore {
    pub(crate) fn open(dir: &Path, project: &str, trunk_name: &str) -> Result<Self, Error> {
        let path = dir.join(format!("{project}-replay.db"));
        let conn = Connection::open(&path).map_err(|e| Error::Store {
            what: format!("failed to open {path:?}: {e}"),
        })?;
        Self::init(conn, project, trunk_name)
    }

    #[cfg(test)]
    pub(crate) fn open_in_memory(project: &str, trunk_name: &str) -> Result<Self, Error> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Store {
            what: format!("failed to open in-memory store: {e}"),
        })?;
        Self::init(conn, project, trunk_name)
    }

    fn init(conn: Connection, project: &str, trunk_name: &str) -> Result<Self, Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS commit_log(
                 revision INTEGER NOT NULL PRIMARY KEY,
                 line TEXT NOT NULL,
                 tag TEXT NOT NULL,
                 author TEXT NOT NULL,
                 date TEXT NOT NULL,
                 change_count INTEGER NOT NULL,
                 message TEXT NOT NULL,
                 prev_revision INTEGER,
                 replayed_branch TEXT,
                 replayed_hash TEXT);
             CREATE TABLE IF NOT EXISTS commit_file(
                 file_id INTEGER PRIMARY KEY,
                 revision INTEGER NOT NULL,
                 action TEXT NOT NULL,
                 path TEXT NOT NULL,
                 FOREIGN KEY(revision) REFERENCES commit_log(revision));
             CREATE INDEX IF NOT EXISTS commit_file_rev ON commit_file(revision);",
        )?;

        Ok(Self {
            conn,
            project: project.into(),
            trunk_name: trunk_name.into(),
        })
    }

    pub(crate) fn project(&self) -> &str {
        &self.project
    }

    /// Idempotent upsert keyed by revision. File-change rows are rewritten,
    /// never duplicated. Stored predecessor and replay state always win over
    /// whatever the entry carries: re-linking goes through `set_predecessor`
    /// and its conflict policy, clearing through `clear_predecessor`.
    pub(crate) fn put(&self, entry: &mut CommitEntry) -> Result<(), Error> {
        if let Some(ref hash) = entry.replayed_hash {
            if is_short_hash(hash) {
                return Err(Error::ConsistencyViolation {
                    what: format!(
                        "cannot store short hash \"{hash}\" for {} r{}",
                        self.project, entry.revision,
                    ),
                });
            }
        }
        if let Some(prev) = entry.predecessor {
            if prev > entry.revision {
                return Err(Error::ConsistencyViolation {
                    what: format!(
                        "predecessor r{prev} of {} r{} is a forward reference",
                        self.project, entry.revision,
                    ),
                });
            }
        }

        let date = format_date(&entry.timestamp);
        self.conn.execute(
            "INSERT INTO commit_log(revision, line, tag, author, date,
                 change_count, message, prev_revision, replayed_branch, replayed_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(revision) DO UPDATE SET
                 line = excluded.line,
                 tag = excluded.tag,
                 author = excluded.author,
                 date = excluded.date,
                 change_count = excluded.change_count,
                 message = excluded.message,
                 prev_revision = COALESCE(commit_log.prev_revision, excluded.prev_revision),
                 replayed_branch = COALESCE(commit_log.replayed_branch, excluded.replayed_branch),
                 replayed_hash = COALESCE(commit_log.replayed_hash, excluded.replayed_hash)",
            params![
                entry.revision,
                entry.line_name,
                entry.tag_label,
                entry.author,
                date,
                entry.change_count,
                entry.message,
                entry.predecessor,
                entry.replayed_branch,
                entry.replayed_hash,
            ],
        )?;

        self.conn.execute(
            "DELETE FROM commit_file WHERE revision = ?1",
            params![entry.revision],
        )?;
        {
            let mut stmt = self.conn.prepare_cached(
                "INSERT INTO commit_file(revision, action, path) VALUES (?1, ?2, ?3)",
            )?;
            for change in &entry.file_changes {
                stmt.execute(params![entry.revision, change.action.as_marker(), change.path])?;
            }
        }

        entry.persisted = true;
        Ok(())
    }

    pub(crate) fn get(&self, revision: u32) -> Result<Option<CommitEntry>, Error> {
        let row = self
            .conn
            .query_row(
                "SELECT revision, line, tag, author, date, change_count, message,
                        prev_revision, replayed_branch, replayed_hash
                 FROM commit_log WHERE revision = ?1",
                params![revision],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, u32>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, Option<u32>>(7)?,
                        row.get::<_, Option<String>>(8)?,
                        row.get::<_, Option<String>>(9)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            revision,
            line_name,
            tag_label,
            author,
            date,
            change_count,
            message,
            predecessor,
            replayed_branch,
            replayed_hash,
        )) = row
        else {
            return Ok(None);
        };

        let timestamp = parse_date(&date).ok_or_else(|| Error::Store {
            what: format!("bad stored date \"{date}\" for {} r{revision}", self.project),
        })?;

        Ok(Some(CommitEntry {
            revision,
            line_name,
            tag_label,
            author,
            timestamp,
            change_count,
            file_changes: self.file_changes(revision)?,
            message,
            predecessor,
            replayed_branch,
            replayed_hash,
            persisted: true,
        }))
    }

    fn file_changes(&self, revision: u32) -> Result<Vec<FileChange>, Error> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT action, path FROM commit_file WHERE revision = ?1 ORDER BY file_id",
        )?;
        let rows = stmt.query_map(params![revision], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut changes = Vec::new();
        for row in rows {
            let (marker, path) = row?;
            let action = FileAction::from_marker(&marker).ok_or_else(|| Error::Store {
                what: format!("bad stored action \"{marker}\" for {} r{revision}", self.project),
            })?;
            changes.push(FileChange { action, path });
        }
        Ok(changes)
    }

    /// Attaches a predecessor link, enforcing the back-reference invariant.
    ///
    /// Identical re-derivation is a silent no-op. A link pointing forward
    /// (prev > revision) is rejected and not stored. Replacing an existing
    /// link with an *older* revision than the one recorded is refused (the
    /// stronger link wins); replacing it with a different newer one is
    /// applied with a warning. Returns whether the stored link changed.
    pub(crate) fn set_predecessor(&self, revision: u32, prev: u32) -> Result<bool, Error> {
        if prev > revision {
            return Err(Error::ConsistencyViolation {
                what: format!(
                    "predecessor r{prev} of {} r{revision} is a forward reference",
                    self.project,
                ),
            });
        }

        let existing: Option<u32> = self
            .conn
            .query_row(
                "SELECT prev_revision FROM commit_log WHERE revision = ?1",
                params![revision],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::Store {
                what: format!("no entry for {} r{revision}", self.project),
            })?;

        match existing {
            Some(old) if old == prev => return Ok(false),
            Some(old) if old > prev => {
                tracing::warn!(
                    "{} r{revision}: refusing to replace predecessor r{old} with weaker r{prev}",
                    self.project,
                );
                return Ok(false);
            }
            Some(old) => {
                tracing::warn!(
                    "{} r{revision}: overwriting predecessor r{old} with r{prev}",
                    self.project,
                );
            }
            None => {}
        }

        self.conn.execute(
            "UPDATE commit_log SET prev_revision = ?1 WHERE revision = ?2",
            params![prev, revision],
        )?;
        Ok(true)
    }

    /// Explicitly clears history state for a revision (predecessor link and
    /// replay mapping), distinct from the upsert path which preserves them.
    pub(crate) fn clear_predecessor(&self, revision: u32) -> Result<(), Error> {
        self.conn.execute(
            "UPDATE commit_log SET prev_revision = NULL WHERE revision = ?1",
            params![revision],
        )?;
        Ok(())
    }

    /// Records the replay result for a revision. Short hashes are rejected
    /// and the stored mapping left untouched.
    pub(crate) fn record_replay(
        &self,
        revision: u32,
        branch: &str,
        hash: &str,
    ) -> Result<(), Error> {
        if is_short_hash(hash) {
            return Err(Error::ConsistencyViolation {
                what: format!(
                    "cannot record short hash \"{hash}\" for {} r{revision}",
                    self.project,
                ),
            });
        }

        let updated = self.conn.execute(
            "UPDATE commit_log SET replayed_branch = ?1, replayed_hash = ?2
             WHERE revision = ?3",
            params![branch, hash, revision],
        )?;
        if updated == 0 {
            return Err(Error::Store {
                what: format!(
                    "cannot record replay of unknown {} r{revision} ({branch}/{hash})",
                    self.project,
                ),
            });
        }
        Ok(())
    }

    /// Latest replayed (revision, branch, hash) on `line` at or below
    /// `revision` (unbounded when `None`). Guards against truncated hashes
    /// that may have leaked into older databases.
    pub(crate) fn latest_replayed_at_or_before(
        &self,
        line: &str,
        revision: Option<u32>,
    ) -> Result<Option<(u32, String, String)>, Error> {
        let row = self
            .conn
            .query_row(
                "SELECT revision, replayed_branch, replayed_hash FROM commit_log
                 WHERE line = ?1 AND revision <= ?2
                       AND replayed_hash IS NOT NULL AND replayed_hash != ''
                 ORDER BY revision DESC LIMIT 1",
                params![line, revision.unwrap_or(u32::MAX)],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        if let Some((rev, _, ref hash)) = row {
            if is_short_hash(hash) {
                return Err(Error::ConsistencyViolation {
                    what: format!(
                        "found short hash \"{hash}\" stored for {} {line} r{rev}",
                        self.project,
                    ),
                });
            }
        }
        Ok(row)
    }

    /// Latest revision on `line` at or before `at`, with the three-tier
    /// fallback: line by date, then trunk by date, then the line's first
    /// revision. Resolves unpinned externals deterministically from
    /// wall-clock ordering.
    pub(crate) fn latest_at_or_before(
        &self,
        line: &str,
        at: &DateTime<Utc>,
    ) -> Result<Option<u32>, Error> {
        let date = format_date(at);

        let on_line: Option<u32> = self
            .conn
            .query_row(
                "SELECT revision FROM commit_log WHERE line = ?1 AND date <= ?2
                 ORDER BY date DESC LIMIT 1",
                params![line, date],
                |row| row.get(0),
            )
            .optional()?;
        if on_line.is_some() {
            return Ok(on_line);
        }

        if line != self.trunk_name {
            let on_trunk: Option<u32> = self
                .conn
                .query_row(
                    "SELECT revision FROM commit_log WHERE line = ?1 AND date <= ?2
                     ORDER BY date DESC LIMIT 1",
                    params![self.trunk_name, date],
                    |row| row.get(0),
                )
                .optional()?;
            if on_trunk.is_some() {
                return Ok(on_trunk);
            }
        }

        self.first_revision(line)
    }

    /// Latest revision on `line` at or below `revision`, replayed or not,
    /// falling back to the trunk line when `line` has nothing that old.
    /// A branch point recorded against the source line's pre-copy history
    /// resolves through the fallback.
    pub(crate) fn latest_on_line_at_or_before(
        &self,
        line: &str,
        revision: u32,
    ) -> Result<Option<u32>, Error> {
        let query = |line: &str| -> Result<Option<u32>, Error> {
            Ok(self
                .conn
                .query_row(
                    "SELECT revision FROM commit_log WHERE line = ?1 AND revision <= ?2
                     ORDER BY revision DESC LIMIT 1",
                    params![line, revision],
                    |row| row.get(0),
                )
                .optional()?)
        };

        if let Some(found) = query(line)? {
            return Ok(Some(found));
        }
        if line != self.trunk_name {
            return query(&self.trunk_name);
        }
        Ok(None)
    }

    pub(crate) fn first_revision(&self, line: &str) -> Result<Option<u32>, Error> {
        Ok(self
            .conn
            .query_row(
                "SELECT revision FROM commit_log WHERE line = ?1
                 ORDER BY revision ASC LIMIT 1",
                params![line],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// All entries on `line`, oldest revision first.
    pub(crate) fn entries_for_line(&self, line: &str) -> Result<Vec<CommitEntry>, Error> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT revision FROM commit_log WHERE line = ?1 ORDER BY revision ASC",
        )?;
        let revisions: Result<Vec<u32>, _> =
            stmt.query_map(params![line], |row| row.get(0))?.collect();

        let mut entries = Vec::new();
        for revision in revisions? {
            let entry = self.get(revision)?.ok_or_else(|| Error::Store {
                what: format!("{} r{revision} vanished mid-query", self.project),
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    pub(crate) fn total_entries(&self) -> Result<u32, Error> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM commit_log", [], |row| row.get(0))?)
    }

    /// Deletes all entries strictly below `floor` plus their file-change
    /// rows. Used for targeted repair of known-corrupt revision ranges.
    pub(crate) fn trim(&self, floor: u32) -> Result<u32, Error> {
        self.conn.execute(
            "DELETE FROM commit_file WHERE revision < ?1",
            params![floor],
        )?;
        let removed = self
            .conn
            .execute("DELETE FROM commit_log WHERE revision < ?1", params![floor])?;
        Ok(removed as u32)
    }
}

fn format_date(ts: &DateTime<Utc>) -> String {
    // fixed-width UTC form; string ordering equals chronological ordering
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod test {
    use chrono::{TimeZone as _, Utc};

    use super::RevisionStore;
    use crate::errors::Error;
    use crate::model::{CommitEntry, FileAction, FileChange};

    fn entry(revision: u32, line: &str, day: u32) -> CommitEntry {
        CommitEntry::new(
            revision,
            line,
            "alice",
            Utc.with_ymd_and_hms(2009, 7, day, 12, 0, 0).unwrap(),
            1,
            vec![FileChange {
                action: FileAction::Modified,
                path: format!("/p/{line}/file-{revision}.c"),
            }],
            format!("change {revision}"),
        )
    }

    fn store() -> RevisionStore {
        RevisionStore::open_in_memory("p", "trunk").unwrap()
    }

    #[test]
    fn test_put_get_roundtrip() {
        let store = store();
        let mut e = entry(3, "trunk", 1);
        store.put(&mut e).unwrap();
        assert!(e.persisted);

        let loaded = store.get(3).unwrap().unwrap();
        assert_eq!(loaded.line_name, "trunk");
        assert_eq!(loaded.tag_label, "trunk");
        assert_eq!(loaded.author, "alice");
        assert_eq!(loaded.timestamp, e.timestamp);
        assert_eq!(loaded.file_changes, e.file_changes);
        assert!(loaded.persisted);
        assert!(store.get(4).unwrap().is_none());
    }

    #[test]
    fn test_idempotent_upsert() {
        let store = store();
        let mut e = entry(5, "trunk", 1);
        store.put(&mut e).unwrap();
        store.put(&mut e).unwrap();

        let loaded = store.get(5).unwrap().unwrap();
        assert_eq!(loaded.file_changes.len(), 1);
        assert_eq!(store.total_entries().unwrap(), 1);
    }

    #[test]
    fn test_upsert_preserves_predecessor() {
        let store = store();
        store.put(&mut entry(1, "trunk", 1)).unwrap();
        store.put(&mut entry(2, "trunk", 2)).unwrap();
        store.set_predecessor(2, 1).unwrap();

        // an upsert without a predecessor must not lose the stored link
        store.put(&mut entry(2, "trunk", 2)).unwrap();
        assert_eq!(store.get(2).unwrap().unwrap().predecessor, Some(1));

        store.clear_predecessor(2).unwrap();
        assert_eq!(store.get(2).unwrap().unwrap().predecessor, None);
    }

    #[test]
    fn test_upsert_cannot_replace_predecessor() {
        let store = store();
        store.put(&mut entry(1, "trunk", 1)).unwrap();
        store.put(&mut entry(2, "trunk", 2)).unwrap();
        store.put(&mut entry(3, "trunk", 3)).unwrap();
        store.set_predecessor(3, 2).unwrap();

        // re-linking only happens through set_predecessor; an upsert
        // carrying a different link leaves the stored one alone
        let mut e = entry(3, "trunk", 3);
        e.predecessor = Some(1);
        store.put(&mut e).unwrap();
        assert_eq!(store.get(3).unwrap().unwrap().predecessor, Some(2));
    }

    #[test]
    fn test_monotonic_predecessor() {
        let store = store();
        store.put(&mut entry(4, "trunk", 1)).unwrap();
        store.put(&mut entry(9, "trunk", 2)).unwrap();

        let err = store.set_predecessor(4, 9).unwrap_err();
        assert!(matches!(err, Error::ConsistencyViolation { .. }));
        assert_eq!(store.get(4).unwrap().unwrap().predecessor, None);
    }

    #[test]
    fn test_predecessor_conflict_policy() {
        let store = store();
        store.put(&mut entry(1, "trunk", 1)).unwrap();
        store.put(&mut entry(2, "trunk", 2)).unwrap();
        store.put(&mut entry(6, "trunk", 3)).unwrap();

        assert!(store.set_predecessor(6, 2).unwrap());
        // identical re-derivation is a no-op
        assert!(!store.set_predecessor(6, 2).unwrap());
        // weaker link is refused
        assert!(!store.set_predecessor(6, 1).unwrap());
        assert_eq!(store.get(6).unwrap().unwrap().predecessor, Some(2));
    }

    #[test]
    fn test_short_hash_rejected() {
        let store = store();
        store.put(&mut entry(7, "trunk", 1)).unwrap();

        let err = store.record_replay(7, "main", "abc1234").unwrap_err();
        assert!(matches!(err, Error::ConsistencyViolation { .. }));
        assert_eq!(store.get(7).unwrap().unwrap().replayed_hash, None);

        store
            .record_replay(7, "main", "0123456789abcdef0123456789abcdef01234567")
            .unwrap();
        assert!(store.get(7).unwrap().unwrap().is_replayed());
    }

    #[test]
    fn test_three_tier_date_fallback() {
        let store = store();
        store.put(&mut entry(3, "trunk", 5)).unwrap();
        store.put(&mut entry(9, "trunk", 20)).unwrap();

        // nothing on branch "foo" before the date; trunk r3 wins
        let at = Utc.with_ymd_and_hms(2009, 7, 10, 0, 0, 0).unwrap();
        assert_eq!(
            store.latest_at_or_before("branches/foo", &at).unwrap(),
            Some(3),
        );

        // last tier: the line's own first revision
        store.put(&mut entry(30, "branches/foo", 25)).unwrap();
        let early = Utc.with_ymd_and_hms(2009, 7, 1, 0, 0, 0).unwrap();
        assert_eq!(
            store.latest_at_or_before("branches/foo", &early).unwrap(),
            Some(30),
        );
    }

    #[test]
    fn test_latest_on_line_backward_only() {
        let store = store();
        for rev in [5, 12, 20] {
            store.put(&mut entry(rev, "branches/rel-1", 10)).unwrap();
        }
        store.put(&mut entry(2, "trunk", 1)).unwrap();

        // a reference to r15 resolves backward to r12, never forward to r20
        assert_eq!(
            store
                .latest_on_line_at_or_before("branches/rel-1", 15)
                .unwrap(),
            Some(12),
        );
        // older than everything on the line: trunk fallback
        assert_eq!(
            store
                .latest_on_line_at_or_before("branches/rel-1", 3)
                .unwrap(),
            Some(2),
        );
        assert_eq!(store.latest_on_line_at_or_before("trunk", 1).unwrap(), None);
    }

    #[test]
    fn test_latest_replayed_lookup() {
        let store = store();
        store.put(&mut entry(2, "trunk", 1)).unwrap();
        store.put(&mut entry(5, "trunk", 2)).unwrap();
        store.put(&mut entry(8, "trunk", 3)).unwrap();
        store
            .record_replay(2, "main", "0123456789abcdef0123456789abcdef01234567")
            .unwrap();
        store
            .record_replay(5, "main", "89abcdef0123456789abcdef0123456789abcdef")
            .unwrap();

        let (rev, branch, _) = store
            .latest_replayed_at_or_before("trunk", Some(7))
            .unwrap()
            .unwrap();
        assert_eq!(rev, 5);
        assert_eq!(branch, "main");

        // r8 has no replay yet; the lookup falls back to r5
        let (rev, _, _) = store
            .latest_replayed_at_or_before("trunk", None)
            .unwrap()
            .unwrap();
        assert_eq!(rev, 5);

        assert!(
            store
                .latest_replayed_at_or_before("branches/none", None)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_trim() {
        let store = store();
        for rev in [1, 2, 3, 4] {
            store.put(&mut entry(rev, "trunk", rev)).unwrap();
        }

        let removed = store.trim(3).unwrap();
        assert_eq!(removed, 2);
        assert!(store.get(1).unwrap().is_none());
        assert!(store.get(2).unwrap().is_none());
        assert_eq!(store.get(3).unwrap().unwrap().file_changes.len(), 1);
    }

    #[test]
    fn test_entries_for_line_ordered() {
        let store = store();
        for rev in [9, 1, 5] {
            store.put(&mut entry(rev, "trunk", 10)).unwrap();
        }
        store.put(&mut entry(4, "branches/b", 10)).unwrap();

        let revs: Vec<u32> = store
            .entries_for_line("trunk")
            .unwrap()
            .iter()
            .map(|e| e.revision)
            .collect();
        assert_eq!(revs, vec![1, 5, 9]);
    }
}
