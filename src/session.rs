//! Transaction lifecycle over the context's session slot.
//!
//! Each context owns one session slot. Builders read it at execution time,
//! not at construction time, so an operation started before a transaction
//! and executed inside it still runs on the transaction's session.

use std::sync::Arc;

use mongodb::ClientSession;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// Shared slot holding a context's active session, if any.
///
/// A `tokio` mutex because the guard is held across driver awaits for the
/// duration of one store operation.
pub(crate) type SessionSlot = Arc<Mutex<Option<ClientSession>>>;

/// Handle to an active transaction on one context.
///
/// Commit consumes the handle; dropping it without committing releases the
/// session, which aborts the server-side transaction. Either way the slot
/// is left empty so a new transaction can start on the same context.
#[derive(Debug)]
pub struct Transaction {
    slot: SessionSlot,
}

impl Transaction {
    pub(crate) fn new(slot: SessionSlot) -> Self {
        Self { slot }
    }

    /// Commit the transaction and release the session.
    pub async fn commit(self) -> Result<()> {
        let mut guard = self.slot.lock().await;
        match guard.take() {
            Some(mut session) => {
                session.commit_transaction().await?;
                debug!("transaction committed");
                Ok(())
            }
            None => Err(Error::invalid_operation("No transaction started")),
        }
    }

    /// Release the session without committing. Idempotent; also what
    /// `Drop` does.
    pub async fn dispose(self) {
        self.slot.lock().await.take();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // Best-effort release; the slot is otherwise cleared by commit or
        // dispose. try_lock cannot contend with ourselves here because the
        // async paths consume self before unlocking.
        if let Ok(mut guard) = self.slot.try_lock() {
            guard.take();
        }
    }
}
