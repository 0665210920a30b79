use std::io::Write as _;

use crossterm::tty::IsTty as _;
use crossterm::{QueueableCommand as _, cursor, terminal};

/// Single-line replay progress on stderr, rewritten in place. Disabled when
/// stderr is not a terminal or the user asked for plain output; write
/// failures are ignored, progress is cosmetic.
pub(crate) struct Progress {
    enabled: bool,
}

impl Progress {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled: enabled && std::io::stderr().is_tty(),
        }
    }

    pub(crate) fn commit(&self, project: &str, line: &str, revision: u32, done: u32, total: u32) {
        if !self.enabled {
            return;
        }
        let mut err = std::io::stderr();
        let _ = err.queue(cursor::MoveToColumn(0));
        let _ = err.queue(terminal::Clear(terminal::ClearType::CurrentLine));
        let _ = write!(err, "{project} {line}: r{revision} ({done}/{total})");
        let _ = err.flush();
    }

    pub(crate) fn clear(&self) {
        if !self.enabled {
            return;
        }
        let mut err = std::io::stderr();
        let _ = err.queue(cursor::MoveToColumn(0));
        let _ = err.queue(terminal::Clear(terminal::ClearType::CurrentLine));
        let _ = err.flush();
    }
}
