//! Session transaction state and undo log.
//!
//! A typed state machine over a flat undo list, replayed in reverse on
//! ROLLBACK. This is an in-memory undo log scoped to a single open
//! transaction, not crash recovery.

use crate::storage::{Ctid, Tuple};

/// One reversible effect of a statement executed inside a transaction.
/// Replayed in reverse order on ROLLBACK.
#[derive(Debug, Clone)]
pub enum UndoAction {
    /// Undo an INSERT by deleting the row it created.
    InsertedRow { table: String, ctid: Ctid },
    /// Undo a DELETE by re-inserting the row it removed, at the same ctid.
    DeletedRow { table: String, ctid: Ctid, tuple: Tuple },
    /// Undo an UPDATE by writing the old tuple back over the row's current
    /// location (`ctid`, where the updated tuple now lives) and restoring
    /// every index entry from `new_tuple`'s key back to `old_tuple`'s.
    UpdatedRow { table: String, ctid: Ctid, old_tuple: Tuple, new_tuple: Tuple },
}

/// Per-session transaction state: `Idle` accepts any statement and
/// auto-commits it; `InTransaction` accumulates an undo log until COMMIT
/// or ROLLBACK; `AbortPending` is entered when a statement inside a
/// transaction fails, and accepts only ROLLBACK from then on — an error
/// inside a transaction marks it for mandatory rollback, it does not
/// auto-rollback.
#[derive(Debug, Default)]
pub enum SessionState {
    #[default]
    Idle,
    InTransaction { undo_log: Vec<UndoAction> },
    AbortPending { undo_log: Vec<UndoAction> },
}

pub struct Session {
    pub state: SessionState,
}

impl Session {
    pub fn new() -> Self {
        Session { state: SessionState::Idle }
    }

    pub fn in_transaction(&self) -> bool {
        !matches!(self.state, SessionState::Idle)
    }

    pub fn begin(&mut self) -> crate::error::Result<()> {
        match self.state {
            SessionState::Idle => {
                self.state = SessionState::InTransaction { undo_log: Vec::new() };
                Ok(())
            }
            _ => Err(crate::error::Error::transaction("a transaction is already open")),
        }
    }

    /// Records an undo action for the current statement. A no-op outside
    /// a transaction, since auto-committed statements need no undo log.
    pub fn record(&mut self, action: UndoAction) {
        match &mut self.state {
            SessionState::InTransaction { undo_log } | SessionState::AbortPending { undo_log } => {
                undo_log.push(action);
            }
            SessionState::Idle => {}
        }
    }

    /// Marks the transaction as doomed after a statement failure. Only
    /// ROLLBACK is accepted from this point on.
    pub fn mark_abort_pending(&mut self) {
        if let SessionState::InTransaction { undo_log } = &mut self.state {
            let undo_log = std::mem::take(undo_log);
            self.state = SessionState::AbortPending { undo_log };
        }
    }

    /// Takes and clears the undo log, returning to `Idle`. Used by both
    /// COMMIT (log is discarded) and ROLLBACK (log is replayed).
    pub fn take_and_close(&mut self) -> Vec<UndoAction> {
        let previous = std::mem::take(&mut self.state);
        self.state = SessionState::Idle;
        match previous {
            SessionState::InTransaction { undo_log } | SessionState::AbortPending { undo_log } => undo_log,
            SessionState::Idle => Vec::new(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
