/// Failure classes for a project replay.
///
/// `Transient` is the only retryable class. `ConsistencyViolation` must never
/// be downgraded to a warning: it means this tool and the target repository
/// disagree about committed state.
#[derive(Debug)]
pub(crate) enum Error {
    /// Bad source path or unknown project.
    NotFound { what: String },
    /// Connection-level failure; retried up to `MAX_ATTEMPTS` before
    /// escalating.
    Transient { what: String },
    /// The target line cannot be reached from the current state without an
    /// explicit override.
    AncestryConflict { what: String },
    /// Hash-prefix mismatch, short hash where a full one was expected, or a
    /// contradictory predecessor link.
    ConsistencyViolation { what: String },
    /// A dependency chain was walked to its end without finding any replayed
    /// ancestor.
    ResolutionExhausted {
        project: String,
        revision: u32,
        started_from: u32,
    },
    /// Invalid or contradictory run configuration.
    Config { what: String },
    /// Durable store failure.
    Store { what: String },
    /// External tool failure outside the named classes; fatal, not retried.
    Command { what: String },
}

/// Bound on automatic retries for `Transient` failures.
pub(crate) const MAX_ATTEMPTS: u32 = 3;

impl Error {
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { what } => write!(f, "not found: {what}"),
            Self::Transient { what } => write!(f, "transient failure: {what}"),
            Self::AncestryConflict { what } => write!(f, "ancestry conflict: {what}"),
            Self::ConsistencyViolation { what } => write!(f, "consistency violation: {what}"),
            Self::ResolutionExhausted {
                project,
                revision,
                started_from,
            } => write!(
                f,
                "no replayed ancestor for {project} r{revision} (started from r{started_from})",
            ),
            Self::Config { what } => write!(f, "configuration error: {what}"),
            Self::Store { what } => write!(f, "store error: {what}"),
            Self::Command { what } => write!(f, "command failed: {what}"),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        Self::Store {
            what: error.to_string(),
        }
    }
}

/// Runs `op` up to `MAX_ATTEMPTS` times, retrying only transient failures.
/// The last error is surfaced unchanged once the bound is reached.
pub(crate) fn with_retry<T>(
    what: &str,
    mut op: impl FnMut() -> Result<T, Error>,
) -> Result<T, Error> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                tracing::warn!("{what}: attempt {attempt} failed ({e}), retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Error, with_retry};

    #[test]
    fn retry_stops_at_bound() {
        let mut calls = 0;
        let r: Result<(), _> = with_retry("op", || {
            calls += 1;
            Err(Error::Transient {
                what: "connection reset".into(),
            })
        });
        assert!(r.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_does_not_retry_fatal() {
        let mut calls = 0;
        let r: Result<(), _> = with_retry("op", || {
            calls += 1;
            Err(Error::NotFound {
                what: "bad path".into(),
            })
        });
        assert!(r.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn retry_returns_first_success() {
        let mut calls = 0;
        let r = with_retry("op", || {
            calls += 1;
            if calls < 2 {
                Err(Error::Transient {
                    what: "timed out".into(),
                })
            } else {
                Ok(calls)
            }
        });
        assert_eq!(r.unwrap(), 2);
    }
}
