use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use ulid::Ulid;

pub type TransactionId = Ulid;

/// A committed batch of updates, with timestamp
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: TransactionId,
    /// Store version after the transaction was committed
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub patches: Vec<Patch>,
}

impl Transaction {
    /// Create a new transaction with the current timestamp
    pub fn new(id: TransactionId, version: u64, patches: Vec<Patch>) -> Self {
        Self {
            id,
            version,
            timestamp: Utc::now(),
            patches,
        }
    }

    /// Create a new transaction with a specific timestamp
    pub fn with_timestamp(
        id: TransactionId,
        version: u64,
        timestamp: DateTime<Utc>,
        patches: Vec<Patch>,
    ) -> Self {
        Self {
            id,
            version,
            timestamp,
            patches,
        }
    }
}

/// A single update recorded inside a transaction.
///
/// Patches carry absolute values, so replaying the live transactions in
/// arrival order reproduces the current state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Patch {
    SetField {
        table: String,
        record: String,
        field: String,
        value: Value,
    },

    ClearTable {
        table: String,
    },
}

/// Append-only transaction history with undo/redo bookkeeping.
///
/// Transaction content is never rewritten. Undo and redo only flip the
/// liveness counter kept for each transaction in the cemetery; a transaction
/// is part of the history while its counter is positive.
#[derive(Debug, Clone, Default)]
pub struct TransactionLog {
    transactions: HashMap<TransactionId, Transaction>,
    order: Vec<TransactionId>,
    cemetery: HashMap<TransactionId, i32>,
    undo_stack: Vec<TransactionId>,
    redo_stack: Vec<TransactionId>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transaction to the log.
    ///
    /// Returns `false` if a transaction with the same id was already added.
    /// A new transaction invalidates everything on the redo stack.
    pub fn append(&mut self, transaction: Transaction) -> bool {
        let id = transaction.id;
        if self.transactions.contains_key(&id) {
            return false;
        }

        self.transactions.insert(id, transaction);
        self.order.push(id);
        self.cemetery.insert(id, 1);
        self.undo_stack.push(id);
        self.redo_stack.clear();
        true
    }

    /// Get a transaction by id
    pub fn get(&self, id: TransactionId) -> Option<&Transaction> {
        self.transactions.get(&id)
    }

    /// Mark a transaction as undone.
    ///
    /// Counters are clamped to `{0, 1}`: undoing a transaction that is not
    /// applied does nothing and returns `false`.
    pub fn mark_undone(&mut self, id: TransactionId) -> bool {
        match self.cemetery.get_mut(&id) {
            Some(count) if *count > 0 => *count = 0,
            _ => return false,
        }
        remove_last_of(&mut self.undo_stack, id);
        self.redo_stack.push(id);
        true
    }

    /// Mark a transaction as redone. Returns `false` if it is already applied
    /// or unknown.
    pub fn mark_redone(&mut self, id: TransactionId) -> bool {
        match self.cemetery.get_mut(&id) {
            Some(count) if *count <= 0 => *count = 1,
            _ => return false,
        }
        remove_last_of(&mut self.redo_stack, id);
        self.undo_stack.push(id);
        true
    }

    /// Every currently applied transaction, in original arrival order.
    pub fn history(&self) -> impl Iterator<Item = &Transaction> + '_ {
        self.order
            .iter()
            .filter(|id| self.cemetery.get(*id).copied().unwrap_or(0) > 0)
            .filter_map(|id| self.transactions.get(id))
    }

    /// The most recent transaction that was appended or redone
    pub fn most_recent_applied(&self) -> Option<&Transaction> {
        self.undo_stack.last().and_then(|id| self.get(*id))
    }

    /// The most recent undone transaction
    pub fn most_recent_undone(&self) -> Option<&Transaction> {
        self.redo_stack.last().and_then(|id| self.get(*id))
    }

    pub fn has_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn has_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Liveness counter for a transaction
    pub fn cemetery(&self, id: TransactionId) -> Option<i32> {
        self.cemetery.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Forget all transactions
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn remove_last_of(stack: &mut Vec<TransactionId>, id: TransactionId) {
    if let Some(index) = stack.iter().rposition(|entry| *entry == id) {
        stack.remove(index);
    }
}
