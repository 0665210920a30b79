use std::path::PathBuf;

use crate::FHashMap;
use crate::errors::Error;
use crate::model::ProjectMetadata;
use crate::store::RevisionStore;

/// Process-wide roster of known projects: layout metadata, lazily-opened
/// per-project stores, and the set of projects currently being replayed.
///
/// Metadata is set-once. A re-registration with identical values is a no-op;
/// a conflicting one is a fatal configuration error, never a silent
/// overwrite.
pub(crate) struct ProjectRegistry {
    db_dir: PathBuf,
    metadata: FHashMap<String, ProjectMetadata>,
    stores: FHashMap<String, RevisionStore>,
    in_flight: Vec<String>,
}

impl ProjectRegistry {
    pub(crate) fn new(db_dir: PathBuf) -> Self {
        Self {
            db_dir,
            metadata: FHashMap::default(),
            stores: FHashMap::default(),
            in_flight: Vec::new(),
        }
    }

    pub(crate) fn register(&mut self, meta: ProjectMetadata) -> Result<(), Error> {
        match self.metadata.get(&meta.name) {
            Some(existing) if *existing == meta => Ok(()),
            Some(existing) => Err(Error::Config {
                what: format!(
                    "project \"{}\" re-registered with conflicting layout \
                     (base {} vs {})",
                    meta.name, meta.base_path, existing.base_path,
                ),
            }),
            None => {
                self.metadata.insert(meta.name.clone(), meta);
                Ok(())
            }
        }
    }

    pub(crate) fn metadata(&self, project: &str) -> Result<&ProjectMetadata, Error> {
        self.metadata.get(project).ok_or_else(|| Error::NotFound {
            what: format!("project \"{project}\" is not registered"),
        })
    }

    /// Finds the registered project whose base path contains the
    /// repository-absolute `path`.
    pub(crate) fn project_for_path(&self, path: &str) -> Option<(&ProjectMetadata, String)> {
        for meta in self.metadata.values() {
            if let Some((_, line)) = meta.split_path(path) {
                return Some((meta, line.to_string()));
            }
        }
        None
    }

    pub(crate) fn store(&mut self, project: &str) -> Result<&RevisionStore, Error> {
        if !self.stores.contains_key(project) {
            let meta = self.metadata(project)?;
            let store = RevisionStore::open(&self.db_dir, &meta.name, &meta.trunk_name)?;
            self.stores.insert(project.to_string(), store);
        }
        // just inserted above if absent
        Ok(&self.stores[project])
    }

    #[cfg(test)]
    pub(crate) fn insert_store(&mut self, project: &str, store: RevisionStore) {
        self.stores.insert(project.to_string(), store);
    }

    /// Marks a project replay as started. Re-entering a project that is
    /// already in flight means the dependency graph loops back on itself.
    pub(crate) fn begin(&mut self, project: &str) -> Result<(), Error> {
        if self.in_flight.iter().any(|p| p == project) {
            return Err(Error::ConsistencyViolation {
                what: format!(
                    "dependency cycle: \"{project}\" is already being replayed \
                     (chain: {})",
                    self.in_flight.join(" -> "),
                ),
            });
        }
        self.in_flight.push(project.to_string());
        Ok(())
    }

    pub(crate) fn finish(&mut self, project: &str) {
        self.in_flight.retain(|p| p != project);
    }
}

#[cfg(test)]
mod test {
    use super::ProjectRegistry;
    use crate::errors::Error;
    use crate::model::ProjectMetadata;

    fn meta(name: &str, base: &str) -> ProjectMetadata {
        ProjectMetadata {
            name: name.into(),
            root_url: "http://svn.example.com/daq".into(),
            base_path: base.into(),
            trunk_name: "trunk".into(),
            branches_name: "branches".into(),
            tags_name: "tags".into(),
        }
    }

    #[test]
    fn test_register_set_once() {
        let mut reg = ProjectRegistry::new("/tmp/unused".into());
        reg.register(meta("pdaq", "projects/pdaq")).unwrap();
        // identical re-registration is fine
        reg.register(meta("pdaq", "projects/pdaq")).unwrap();

        let err = reg.register(meta("pdaq", "elsewhere/pdaq")).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert_eq!(reg.metadata("pdaq").unwrap().base_path, "projects/pdaq");
    }

    #[test]
    fn test_project_for_path() {
        let mut reg = ProjectRegistry::new("/tmp/unused".into());
        reg.register(meta("pdaq", "projects/pdaq")).unwrap();
        reg.register(meta("daq-common", "projects/daq-common")).unwrap();

        let (meta, line) = reg
            .project_for_path("/projects/daq-common/branches/rel-2/src/x.c")
            .unwrap();
        assert_eq!(meta.name, "daq-common");
        assert_eq!(line, "branches/rel-2");

        assert!(reg.project_for_path("/somewhere/else").is_none());
    }

    #[test]
    fn test_cycle_detection() {
        let mut reg = ProjectRegistry::new("/tmp/unused".into());
        reg.begin("pdaq").unwrap();
        reg.begin("daq-common").unwrap();

        let err = reg.begin("pdaq").unwrap_err();
        assert!(matches!(err, Error::ConsistencyViolation { .. }));

        reg.finish("daq-common");
        reg.begin("daq-common").unwrap();
    }
}
