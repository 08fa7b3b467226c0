//! Transactions and the single-writer coordinator.
//!
//! Any number of read-only transactions may run alongside at most one write
//! transaction. A write transaction owns a [`LocalStorage`] overlay that is
//! merged into committed storage on commit and discarded on rollback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::storage::{LocalStorage, StorageManager};
use crate::types::{PenumbraError, Result, TransactionId};

/// Kind of transaction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransactionKind {
    /// Sees committed data only.
    ReadOnly,
    /// Sees committed data plus its own uncommitted writes.
    Write,
}

#[derive(Default, Debug)]
struct LockState {
    readers: u32,
    writer: bool,
}

/// Snapshot of coordinator state for observability.
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub struct LockSnapshot {
    /// Number of active read-only transactions.
    pub readers: u32,
    /// Whether a write transaction is active.
    pub writer: bool,
}

#[derive(Debug)]
struct SlotGuard {
    state: Arc<Mutex<LockState>>,
    kind: TransactionKind,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        match self.kind {
            TransactionKind::ReadOnly => state.readers = state.readers.saturating_sub(1),
            TransactionKind::Write => state.writer = false,
        }
    }
}

/// A running transaction.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    kind: TransactionKind,
    local: Option<RwLock<LocalStorage>>,
    _slot: Option<SlotGuard>,
}

impl Transaction {
    /// Creates a detached transaction not registered with any coordinator.
    pub fn detached(id: TransactionId, kind: TransactionKind) -> Self {
        Self {
            id,
            kind,
            local: matches!(kind, TransactionKind::Write).then(|| RwLock::new(LocalStorage::new())),
            _slot: None,
        }
    }

    /// Transaction id.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Transaction kind.
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Returns `true` for write transactions.
    pub fn is_write_transaction(&self) -> bool {
        self.kind == TransactionKind::Write
    }

    /// Read access to the uncommitted overlay; `None` for read-only transactions.
    pub fn local_storage(&self) -> Option<RwLockReadGuard<'_, LocalStorage>> {
        self.local.as_ref().map(RwLock::read)
    }

    /// Write access to the uncommitted overlay.
    pub fn local_storage_mut(&self) -> Result<RwLockWriteGuard<'_, LocalStorage>> {
        self.local
            .as_ref()
            .map(RwLock::write)
            .ok_or(PenumbraError::Invalid("read-only transaction cannot write"))
    }

    fn into_parts(self) -> (Option<LocalStorage>, Option<SlotGuard>) {
        (self.local.map(RwLock::into_inner), self._slot)
    }
}

/// Hands out transactions and enforces the single-writer rule.
#[derive(Debug, Default)]
pub struct TransactionManager {
    next_id: AtomicU64,
    state: Arc<Mutex<LockState>>,
}

impl TransactionManager {
    /// Creates a coordinator with no active transactions.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> TransactionId {
        TransactionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Starts a read-only transaction.
    pub fn begin_read(&self) -> Transaction {
        self.state.lock().readers += 1;
        let id = self.next_id();
        debug!(txn = %id, "transaction.begin_read");
        Transaction {
            _slot: Some(SlotGuard {
                state: Arc::clone(&self.state),
                kind: TransactionKind::ReadOnly,
            }),
            ..Transaction::detached(id, TransactionKind::ReadOnly)
        }
    }

    /// Starts the write transaction; fails while another one is active.
    pub fn begin_write(&self) -> Result<Transaction> {
        {
            let mut state = self.state.lock();
            if state.writer {
                return Err(PenumbraError::Invalid("write transaction already active"));
            }
            state.writer = true;
        }
        let id = self.next_id();
        debug!(txn = %id, "transaction.begin_write");
        Ok(Transaction {
            _slot: Some(SlotGuard {
                state: Arc::clone(&self.state),
                kind: TransactionKind::Write,
            }),
            ..Transaction::detached(id, TransactionKind::Write)
        })
    }

    /// Publishes the transaction's overlay and releases its slot.
    pub fn commit(&self, txn: Transaction, storage: &StorageManager) -> Result<()> {
        let id = txn.id();
        // The slot stays held until the overlay is merged.
        let (local, _slot) = txn.into_parts();
        if let Some(local) = local {
            storage.commit(local)?;
        }
        debug!(txn = %id, "transaction.commit");
        Ok(())
    }

    /// Discards the transaction's overlay and releases its slot.
    pub fn rollback(&self, txn: Transaction) {
        debug!(txn = %txn.id(), "transaction.rollback");
        drop(txn);
    }

    /// Current coordinator state.
    pub fn snapshot(&self) -> LockSnapshot {
        let state = self.state.lock();
        LockSnapshot {
            readers: state.readers,
            writer: state.writer,
        }
    }
}
