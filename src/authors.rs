use std::path::Path;

use crate::FHashMap;
use crate::errors::Error;

/// Maps source-repository usernames onto full commit identities.
///
/// File format, one mapping per line:
///
/// ```text
/// # comment
/// jsmith: Jane Smith <jsmith@example.com>
/// ```
///
/// With a map configured, a commit by an unmapped author aborts the run
/// rather than fabricating an identity; the map file is the place to fix
/// that. Without one, every author gets the `user <user>` placeholder.
pub(crate) struct AuthorMap {
    map: FHashMap<String, String>,
    fallback: bool,
}

impl AuthorMap {
    pub(crate) fn load(path: &Path) -> Result<Self, Error> {
        let data = std::fs::read_to_string(path).map_err(|e| Error::Config {
            what: format!("failed to read author map {path:?}: {e}"),
        })?;
        Self::parse(&data).map_err(|what| Error::Config {
            what: format!("{path:?}: {what}"),
        })
    }

    pub(crate) fn parse(data: &str) -> Result<Self, String> {
        let mut map = FHashMap::default();
        for (lineno, line) in data.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((user, identity)) = line.split_once(':') else {
                return Err(format!("line {}: missing \":\"", lineno + 1));
            };
            let (user, identity) = (user.trim(), identity.trim());
            if user.is_empty() || identity.is_empty() {
                return Err(format!("line {}: empty user or identity", lineno + 1));
            }
            if !identity.ends_with('>') || !identity.contains('<') {
                return Err(format!(
                    "line {}: identity \"{identity}\" is not \"Name <email>\"",
                    lineno + 1,
                ));
            }

            if map.insert(user.to_string(), identity.to_string()).is_some() {
                return Err(format!("line {}: duplicate user \"{user}\"", lineno + 1));
            }
        }
        Ok(Self {
            map,
            fallback: false,
        })
    }

    pub(crate) fn with_fallback() -> Self {
        Self {
            map: FHashMap::default(),
            fallback: true,
        }
    }

    pub(crate) fn resolve(&self, user: &str) -> Result<String, Error> {
        if let Some(identity) = self.map.get(user) {
            return Ok(identity.clone());
        }
        if self.fallback {
            return Ok(format!("{user} <{user}>"));
        }
        Err(Error::Config {
            what: format!("author \"{user}\" is not in the author map"),
        })
    }
}
