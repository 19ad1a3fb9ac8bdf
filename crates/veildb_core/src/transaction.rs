//! Deferred-operation transaction batches.
//!
//! A transaction here is a *grouping* primitive, not an isolation one:
//! `begin` opens an empty batch, `queue` appends operations to it, and
//! `commit` runs them sequentially against the database. The first failing
//! operation stops the run and its error is returned; operations already
//! applied are **not** rolled back. `rollback` discards a batch without
//! applying anything.
//!
//! This weak contract is deliberate and documented rather than implied:
//! callers that need atomicity must layer an undo log of their own on top.

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::collections::HashMap;

/// One queued operation.
///
/// Operations own their key and value so a batch can outlive the buffers
/// the caller built it from. Values are plaintext here; they are sealed
/// when the batch commits, with the key and nonce passed to
/// [`TransactionManager::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOperation {
    /// Insert a key-value pair.
    Insert {
        /// User key.
        key: String,
        /// Plaintext value.
        value: Vec<u8>,
    },
    /// Update an existing key.
    Update {
        /// User key.
        key: String,
        /// Plaintext value.
        value: Vec<u8>,
    },
    /// Delete a key.
    Delete {
        /// User key.
        key: String,
    },
}

/// Tracks open transaction batches by caller-assigned id.
#[derive(Debug, Default)]
pub struct TransactionManager {
    transactions: Mutex<HashMap<u32, Vec<TxOperation>>>,
}

impl TransactionManager {
    /// Creates an empty transaction manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new empty batch under the given id.
    ///
    /// # Errors
    ///
    /// Returns `TransactionActive` if the id is already in use.
    pub fn begin(&self, tx_id: u32) -> CoreResult<()> {
        let mut transactions = self.transactions.lock();
        if transactions.contains_key(&tx_id) {
            return Err(CoreError::TransactionActive { id: tx_id });
        }
        transactions.insert(tx_id, Vec::new());
        Ok(())
    }

    /// Appends an operation to an open batch.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotFound` if no batch with this id is open.
    pub fn queue(&self, tx_id: u32, operation: TxOperation) -> CoreResult<()> {
        let mut transactions = self.transactions.lock();
        match transactions.get_mut(&tx_id) {
            Some(ops) => {
                ops.push(operation);
                Ok(())
            }
            None => Err(CoreError::TransactionNotFound { id: tx_id }),
        }
    }

    /// Runs a batch's operations sequentially against the database.
    ///
    /// The batch is consumed whether or not it succeeds. On the first
    /// failing operation the run stops and the error is returned;
    /// operations that already ran stay applied.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotFound` for an unknown id, or the first
    /// operation error.
    pub fn commit(
        &self,
        tx_id: u32,
        db: &Database,
        enc_key: &[u8],
        nonce: &[u8],
    ) -> CoreResult<()> {
        let ops = self
            .transactions
            .lock()
            .remove(&tx_id)
            .ok_or(CoreError::TransactionNotFound { id: tx_id })?;

        for op in ops {
            match op {
                TxOperation::Insert { key, value } => db.insert(&key, &value, enc_key, nonce)?,
                TxOperation::Update { key, value } => db.update(&key, &value, enc_key, nonce)?,
                TxOperation::Delete { key } => db.delete(&key)?,
            }
        }
        Ok(())
    }

    /// Discards a batch without applying any of its operations.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotFound` for an unknown id.
    pub fn rollback(&self, tx_id: u32) -> CoreResult<()> {
        self.transactions
            .lock()
            .remove(&tx_id)
            .map(|_| ())
            .ok_or(CoreError::TransactionNotFound { id: tx_id })
    }

    /// Returns the number of open batches.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.transactions.lock().len()
    }
}
