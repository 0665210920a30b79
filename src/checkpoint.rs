use std::path::{Path, PathBuf};

use crate::errors::Error;

/// Snapshots of a project's sandbox (the working copy with the target
/// repository inside it), taken at line boundaries so a failed run can
/// resume without replaying everything.
///
/// Only the most recent snapshot per project is kept; the previous one is
/// purged after a new one lands. A failed snapshot is a warning, never a
/// fatal error: losing a checkpoint costs time on the next resume, not
/// correctness, since the durable store still knows what was replayed.
pub(crate) struct CheckpointManager {
    dir: PathBuf,
}

pub(crate) struct Checkpoint {
    pub(crate) revision: u32,
    pub(crate) path: PathBuf,
}

impl CheckpointManager {
    pub(crate) fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn project_dir(&self, project: &str) -> PathBuf {
        self.dir.join(project)
    }

    /// Snapshots `sandbox` as the state after replaying `revision`, then
    /// drops any older snapshot of the project.
    pub(crate) fn save(&self, project: &str, revision: u32, sandbox: &Path) {
        let snap_dir = self.project_dir(project).join(format!("r{revision}"));

        let result = (|| -> Result<(), Error> {
            if snap_dir.exists() {
                remove_tree(&snap_dir)?;
            }
            copy_tree(sandbox, &snap_dir)
        })();

        match result {
            Ok(()) => {
                tracing::info!("{project}: checkpoint saved at r{revision}");
                self.purge_older(project, revision);
            }
            Err(e) => {
                tracing::warn!("{project}: checkpoint at r{revision} failed: {e}");
                if snap_dir.exists() {
                    if let Err(e) = remove_tree(&snap_dir) {
                        tracing::warn!("{project}: could not drop partial checkpoint: {e}");
                    }
                }
            }
        }
    }

    fn purge_older(&self, project: &str, keep_revision: u32) {
        for snap in self.snapshots(project).unwrap_or_default() {
            if snap.revision != keep_revision {
                if let Err(e) = remove_tree(&snap.path) {
                    tracing::warn!(
                        "{project}: could not purge old checkpoint r{}: {e}",
                        snap.revision,
                    );
                }
            }
        }
    }

    fn snapshots(&self, project: &str) -> Result<Vec<Checkpoint>, Error> {
        let project_dir = self.project_dir(project);
        if !project_dir.is_dir() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&project_dir).map_err(|e| Error::Store {
            what: format!("failed to read {project_dir:?}: {e}"),
        })?;

        let mut snaps = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::Store {
                what: format!("failed to read {project_dir:?}: {e}"),
            })?;
            let name = entry.file_name();
            let Some(revision) = name
                .to_str()
                .and_then(|n| n.strip_prefix('r'))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            snaps.push(Checkpoint {
                revision,
                path: entry.path(),
            });
        }
        snaps.sort_by_key(|s| s.revision);
        Ok(snaps)
    }

    pub(crate) fn latest(&self, project: &str) -> Result<Option<Checkpoint>, Error> {
        Ok(self.snapshots(project)?.pop())
    }

    /// Restores the latest snapshot into `sandbox`, replacing whatever is
    /// there. Returns the snapshot's revision, or `None` when the project
    /// has no checkpoint.
    pub(crate) fn restore(&self, project: &str, sandbox: &Path) -> Result<Option<u32>, Error> {
        let Some(snap) = self.latest(project)? else {
            return Ok(None);
        };

        if sandbox.exists() {
            remove_tree(sandbox)?;
        }
        copy_tree(&snap.path, sandbox)?;

        tracing::info!("{project}: restored checkpoint r{}", snap.revision);
        Ok(Some(snap.revision))
    }
}

fn remove_tree(path: &Path) -> Result<(), Error> {
    std::fs::remove_dir_all(path).map_err(|e| Error::Store {
        what: format!("failed to remove {path:?}: {e}"),
    })
}

fn copy_tree(from: &Path, to: &Path) -> Result<(), Error> {
    let io_err = |e: std::io::Error| Error::Store {
        what: format!("failed to copy {from:?} to {to:?}: {e}"),
    };

    std::fs::create_dir_all(to).map_err(io_err)?;
    for entry in std::fs::read_dir(from).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let target = to.join(entry.file_name());
        let file_type = entry.file_type().map_err(io_err)?;
        if file_type.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(io_err)?;
        }
    }
    Ok(())
}
