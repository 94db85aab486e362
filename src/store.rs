use crate::error::StoreError;
use crate::transaction::{Patch, Transaction, TransactionId, TransactionLog};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};
use ulid::Ulid;

/// A record: field name to value
pub type Record = BTreeMap<String, Value>;

/// A table: record id to record
pub type Table = BTreeMap<String, Record>;

type Tables = BTreeMap<String, Table>;

/// Field types a schema can declare; each knows its default value.
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    Text,
    Number,
    Boolean,
    /// Opaque value replaced wholesale on update
    Register(fn() -> Value),
}

impl FieldKind {
    pub fn default_value(&self) -> Value {
        match self {
            FieldKind::Text => Value::String(String::new()),
            FieldKind::Number => Value::from(0),
            FieldKind::Boolean => Value::Bool(false),
            FieldKind::Register(default) => default(),
        }
    }
}

#[derive(Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Static description of a table
#[derive(Debug)]
pub struct Schema {
    pub id: &'static str,
    pub fields: &'static [FieldSpec],
}

impl Schema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// A record with every field at its default value
    pub fn new_record(&self) -> Record {
        self.fields
            .iter()
            .map(|f| (f.name.to_string(), f.kind.default_value()))
            .collect()
    }
}

/// Where a listener is looking
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Table {
        table: String,
    },
    Record {
        table: String,
        record: String,
    },
    Field {
        table: String,
        record: String,
        field: String,
    },
}

impl Location {
    pub fn table(schema: &Schema) -> Self {
        Location::Table {
            table: schema.id.to_string(),
        }
    }

    pub fn record(schema: &Schema, record: &str) -> Self {
        Location::Record {
            table: schema.id.to_string(),
            record: record.to_string(),
        }
    }

    pub fn field(schema: &Schema, record: &str, field: &str) -> Self {
        Location::Field {
            table: schema.id.to_string(),
            record: record.to_string(),
            field: field.to_string(),
        }
    }

    fn matches(&self, change: &FieldChange) -> bool {
        match self {
            Location::Table { table } => change.table == *table,
            Location::Record { table, record } => {
                change.table == *table && change.record == *record
            }
            Location::Field {
                table,
                record,
                field,
            } => change.table == *table && change.record == *record && change.field == *field,
        }
    }
}

/// Before/after values of one field. Absent records read as `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub table: String,
    pub record: String,
    pub field: String,
    pub previous: Value,
    pub current: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Transaction,
    Undo,
    Redo,
    Reset,
}

/// Payload of a change notification
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub transaction_id: Option<TransactionId>,
    pub kind: ChangeKind,
    pub changes: Vec<FieldChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    fn filtered(&self, location: &Location) -> Option<ChangeSet> {
        let changes: Vec<FieldChange> = self
            .changes
            .iter()
            .filter(|c| location.matches(c))
            .cloned()
            .collect();
        if changes.is_empty() {
            return None;
        }
        Some(ChangeSet {
            transaction_id: self.transaction_id,
            kind: self.kind,
            changes,
        })
    }
}

type Slot = Box<dyn FnMut(&ChangeSet)>;

struct Listener {
    id: u64,
    filter: Option<Location>,
    slot: Slot,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<Listener>,
    emitting: bool,
    // Disposed while their entries were checked out for an emission
    disposed: Vec<u64>,
}

impl Listeners {
    fn remove(&mut self, id: u64) {
        self.entries.retain(|l| l.id != id);
        if self.emitting {
            self.disposed.push(id);
        }
    }
}

/// Handle returned by the `listen_*` methods.
///
/// Dropping or disposing it stops future notifications; stored data is not
/// affected. Use [`Subscription::detach`] to keep listening for the lifetime
/// of the store.
#[must_use = "dropping a Subscription immediately stops the notifications"]
pub struct Subscription {
    id: u64,
    registry: Weak<RefCell<Listeners>>,
}

impl Subscription {
    pub fn dispose(mut self) {
        self.unsubscribe();
    }

    pub fn is_disposed(&self) -> bool {
        self.registry.upgrade().is_none()
    }

    /// Keep the listener registered until the store itself is dropped
    pub fn detach(mut self) {
        self.registry = Weak::new();
    }

    fn unsubscribe(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.borrow_mut().remove(self.id);
        }
        self.registry = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

struct OpenTransaction {
    id: TransactionId,
    patches: Vec<Patch>,
    // (table, record, field) -> value before the transaction touched it
    touched: BTreeMap<(String, String, String), Value>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    id: u32,
    version: u64,
    tables: Tables,
}

/// Transactional table storage with undo/redo and change notification.
///
/// Current state is always `baseline` plus the replay of the live
/// transactions in the log. Writes land in the live tables immediately, so
/// reads inside an open transaction observe them.
pub struct TransactionalStore {
    id: u32,
    schemas: Vec<&'static Schema>,
    baseline: Tables,
    tables: Tables,
    log: TransactionLog,
    open: Option<OpenTransaction>,
    version: u64,
    listeners: Rc<RefCell<Listeners>>,
}

impl TransactionalStore {
    /// Create an empty store for the given schemas
    pub fn new(id: u32, schemas: &[&'static Schema]) -> Self {
        let tables: Tables = schemas
            .iter()
            .map(|s| (s.id.to_string(), Table::new()))
            .collect();
        Self {
            id,
            schemas: schemas.to_vec(),
            baseline: tables.clone(),
            tables,
            log: TransactionLog::new(),
            open: None,
            version: 0,
            listeners: Rc::new(RefCell::new(Listeners::default())),
        }
    }

    /// Create a store from a state previously produced by [`serialize`].
    ///
    /// The restored state becomes the baseline; history starts empty.
    ///
    /// [`serialize`]: TransactionalStore::serialize
    pub fn restore(id: u32, schemas: &[&'static Schema], state: &str) -> Result<Self, StoreError> {
        let snapshot: Snapshot = serde_json::from_str(state)?;
        let mut store = Self::new(id, schemas);

        for (table_id, records) in snapshot.tables {
            let schema = store.schema(&table_id)?;
            let table = store
                .tables
                .get_mut(&table_id)
                .ok_or_else(|| StoreError::UnknownTable(table_id.clone()))?;

            for (record_id, fields) in records {
                let mut record = schema.new_record();
                for (name, value) in fields {
                    if schema.field(&name).is_none() {
                        return Err(StoreError::UnknownField {
                            table: table_id.clone(),
                            field: name,
                        });
                    }
                    record.insert(name, value);
                }
                table.insert(record_id, record);
            }
        }

        store.version = snapshot.version;
        store.baseline = store.tables.clone();
        Ok(store)
    }

    /// Serialize the current state of every table
    pub fn serialize(&self) -> Result<String, StoreError> {
        let snapshot = Snapshot {
            id: self.id,
            version: self.version,
            tables: self.tables.clone(),
        };
        Ok(serde_json::to_string(&snapshot)?)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Increases with every committed transaction, undo, redo and reset
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn in_transaction(&self) -> bool {
        self.open.is_some()
    }

    fn schema(&self, table: &str) -> Result<&'static Schema, StoreError> {
        self.schemas
            .iter()
            .copied()
            .find(|s| s.id == table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }

    // ========== Transactions ==========

    /// Begin a new transaction.
    ///
    /// Fails if one is already open; compose nested updates with
    /// [`with_transaction`](TransactionalStore::with_transaction) instead.
    pub fn begin_transaction(&mut self) -> Result<TransactionId, StoreError> {
        if self.open.is_some() {
            return Err(StoreError::TransactionInProgress);
        }
        let id = Ulid::new();
        self.open = Some(OpenTransaction {
            id,
            patches: Vec::new(),
            touched: BTreeMap::new(),
        });
        Ok(id)
    }

    /// Close the open transaction.
    ///
    /// Returns the transaction id, or `None` if nothing actually changed. A
    /// single change notification carrying every field delta is emitted
    /// before returning.
    pub fn end_transaction(&mut self) -> Result<Option<TransactionId>, StoreError> {
        let open = self.open.take().ok_or(StoreError::NoTransaction)?;

        let changes: Vec<FieldChange> = open
            .touched
            .into_iter()
            .filter_map(|((table, record, field), previous)| {
                let current = read_field(&self.tables, &table, &record, &field);
                (previous != current).then_some(FieldChange {
                    table,
                    record,
                    field,
                    previous,
                    current,
                })
            })
            .collect();

        if changes.is_empty() {
            tracing::debug!("Transaction {} made no changes", open.id);
            return Ok(None);
        }

        self.version += 1;
        let transaction = Transaction::new(open.id, self.version, open.patches);
        self.log.append(transaction);
        tracing::debug!(
            "Committed transaction {} ({} field changes, version {})",
            open.id,
            changes.len(),
            self.version
        );

        self.emit(&ChangeSet {
            transaction_id: Some(open.id),
            kind: ChangeKind::Transaction,
            changes,
        });

        Ok(Some(open.id))
    }

    /// Apply a transaction recorded by another store with the same schemas.
    ///
    /// Returns `false` if the transaction is already in this log.
    pub fn apply_transaction(&mut self, transaction: &Transaction) -> Result<bool, StoreError> {
        if self.in_transaction() {
            return Err(StoreError::TransactionInProgress);
        }
        if self.log.get(transaction.id).is_some() {
            return Ok(false);
        }

        let before = self.tables.clone();
        for patch in &transaction.patches {
            apply_patch(&mut self.tables, &self.schemas, patch);
        }

        self.version += 1;
        self.log.append(Transaction::with_timestamp(
            transaction.id,
            self.version,
            transaction.timestamp,
            transaction.patches.clone(),
        ));

        let changes = diff(&before, &self.tables);
        self.emit(&ChangeSet {
            transaction_id: Some(transaction.id),
            kind: ChangeKind::Transaction,
            changes,
        });
        Ok(true)
    }

    /// Run `update` inside a transaction.
    ///
    /// If a transaction is already open the update joins it and `None` is
    /// returned, so helpers compose without caring whether they are nested.
    /// If a top-level update fails, its writes are rolled back.
    pub fn with_transaction<F>(&mut self, update: F) -> Result<Option<TransactionId>, StoreError>
    where
        F: FnOnce(&mut Self) -> Result<(), StoreError>,
    {
        if self.in_transaction() {
            update(self)?;
            return Ok(None);
        }

        self.begin_transaction()?;
        if let Err(err) = update(self) {
            self.abort_transaction();
            return Err(err);
        }
        self.end_transaction()
    }

    /// Drop the open transaction and restore the committed state
    pub fn abort_transaction(&mut self) {
        if let Some(open) = self.open.take() {
            tracing::debug!("Aborting transaction {}", open.id);
            self.tables = replayed(&self.baseline, &self.schemas, &self.log);
        }
    }

    // ========== Updates ==========

    /// Set one field. Creates the record with default values if needed.
    pub fn update_field(
        &mut self,
        schema: &Schema,
        record: &str,
        field: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        let schema = self.schema(schema.id)?;
        if schema.field(field).is_none() {
            return Err(StoreError::UnknownField {
                table: schema.id.to_string(),
                field: field.to_string(),
            });
        }
        let open = self.open.as_mut().ok_or(StoreError::NoTransaction)?;

        let table = self
            .tables
            .get_mut(schema.id)
            .ok_or_else(|| StoreError::UnknownTable(schema.id.to_string()))?;

        if !table.contains_key(record) {
            for spec in schema.fields {
                note_previous(open, schema.id, record, spec.name, Value::Null);
            }
            table.insert(record.to_string(), schema.new_record());
        }

        let entry = table
            .get_mut(record)
            .ok_or_else(|| StoreError::InvalidRecord {
                table: schema.id.to_string(),
                record: record.to_string(),
                reason: "record vanished during update".to_string(),
            })?;
        let previous = entry.get(field).cloned().unwrap_or(Value::Null);
        note_previous(open, schema.id, record, field, previous);
        entry.insert(field.to_string(), value.clone());

        open.patches.push(Patch::SetField {
            table: schema.id.to_string(),
            record: record.to_string(),
            field: field.to_string(),
            value,
        });
        Ok(())
    }

    /// Set several fields of one record
    pub fn update_record(
        &mut self,
        schema: &Schema,
        record: &str,
        update: Map<String, Value>,
    ) -> Result<(), StoreError> {
        if !self.in_transaction() {
            return Err(StoreError::NoTransaction);
        }
        if let Some(name) = update.keys().find(|name| schema.field(name).is_none()) {
            return Err(StoreError::UnknownField {
                table: schema.id.to_string(),
                field: name.clone(),
            });
        }
        for (field, value) in update {
            self.update_field(schema, record, &field, value)?;
        }
        Ok(())
    }

    /// Update several records of one table
    pub fn update_table(
        &mut self,
        schema: &Schema,
        update: BTreeMap<String, Map<String, Value>>,
    ) -> Result<(), StoreError> {
        for (record, fields) in update {
            self.update_record(schema, &record, fields)?;
        }
        Ok(())
    }

    /// Remove every record of a table inside the open transaction
    pub fn clear_table(&mut self, schema: &Schema) -> Result<(), StoreError> {
        let schema = self.schema(schema.id)?;
        let open = self.open.as_mut().ok_or(StoreError::NoTransaction)?;
        let table = self
            .tables
            .get_mut(schema.id)
            .ok_or_else(|| StoreError::UnknownTable(schema.id.to_string()))?;

        for (record_id, record) in table.iter() {
            for (field, value) in record {
                note_previous(open, schema.id, record_id, field, value.clone());
            }
        }
        table.clear();
        open.patches.push(Patch::ClearTable {
            table: schema.id.to_string(),
        });
        Ok(())
    }

    /// Wipe a table outside of the undo history.
    ///
    /// The resulting state becomes the new baseline and the log is emptied,
    /// so nothing before the reset can be undone.
    pub fn reset_table(&mut self, schema: &Schema) -> Result<(), StoreError> {
        if self.in_transaction() {
            return Err(StoreError::TransactionInProgress);
        }
        let schema = self.schema(schema.id)?;
        let before = self.tables.clone();
        if let Some(table) = self.tables.get_mut(schema.id) {
            table.clear();
        }
        self.rebase_history()?;
        self.version += 1;

        let changes = diff(&before, &self.tables);
        self.emit(&ChangeSet {
            transaction_id: None,
            kind: ChangeKind::Reset,
            changes,
        });
        Ok(())
    }

    /// Make the current state the baseline and forget the history
    pub fn rebase_history(&mut self) -> Result<(), StoreError> {
        if self.in_transaction() {
            return Err(StoreError::TransactionInProgress);
        }
        self.baseline = self.tables.clone();
        self.log.clear();
        Ok(())
    }

    // ========== Reads ==========

    pub fn get_table(&self, schema: &Schema) -> Option<&Table> {
        self.tables.get(schema.id)
    }

    pub fn get_record(&self, schema: &Schema, record: &str) -> Option<&Record> {
        self.tables.get(schema.id)?.get(record)
    }

    pub fn get_field(&self, schema: &Schema, record: &str, field: &str) -> Option<&Value> {
        self.get_record(schema, record)?.get(field)
    }

    // ========== Undo / Redo ==========

    /// Undo a transaction, or the most recently applied one if `id` is `None`.
    ///
    /// Returns the undone transaction id, or `None` if there was nothing to
    /// undo.
    pub fn undo(&mut self, id: Option<TransactionId>) -> Result<Option<TransactionId>, StoreError> {
        if self.in_transaction() {
            return Err(StoreError::TransactionInProgress);
        }
        let Some(id) = id.or_else(|| self.log.most_recent_applied().map(|t| t.id)) else {
            return Ok(None);
        };
        if !self.log.mark_undone(id) {
            return Ok(None);
        }
        tracing::debug!("Undoing transaction {}", id);
        self.replay(ChangeKind::Undo, id);
        Ok(Some(id))
    }

    /// Redo a transaction, or the most recently undone one if `id` is `None`
    pub fn redo(&mut self, id: Option<TransactionId>) -> Result<Option<TransactionId>, StoreError> {
        if self.in_transaction() {
            return Err(StoreError::TransactionInProgress);
        }
        let Some(id) = id.or_else(|| self.log.most_recent_undone().map(|t| t.id)) else {
            return Ok(None);
        };
        if !self.log.mark_redone(id) {
            return Ok(None);
        }
        tracing::debug!("Redoing transaction {}", id);
        self.replay(ChangeKind::Redo, id);
        Ok(Some(id))
    }

    fn replay(&mut self, kind: ChangeKind, id: TransactionId) {
        let current = replayed(&self.baseline, &self.schemas, &self.log);
        let before = std::mem::replace(&mut self.tables, current);
        self.version += 1;

        let changes = diff(&before, &self.tables);
        self.emit(&ChangeSet {
            transaction_id: Some(id),
            kind,
            changes,
        });
    }

    pub fn history(&self) -> impl Iterator<Item = &Transaction> + '_ {
        self.log.history()
    }

    pub fn get_transaction(&self, id: TransactionId) -> Option<&Transaction> {
        self.log.get(id)
    }

    pub fn last_transaction(&self) -> Option<&Transaction> {
        self.log.most_recent_applied()
    }

    pub fn last_undo(&self) -> Option<&Transaction> {
        self.log.most_recent_undone()
    }

    pub fn cemetery(&self, id: TransactionId) -> Option<i32> {
        self.log.cemetery(id)
    }

    pub fn has_undo(&self) -> bool {
        self.log.has_undo()
    }

    pub fn has_redo(&self) -> bool {
        self.log.has_redo()
    }

    // ========== Listeners ==========

    /// Listen to every change notification
    pub fn connect(&self, slot: impl FnMut(&ChangeSet) + 'static) -> Subscription {
        self.subscribe(None, Box::new(slot))
    }

    pub fn listen_table(
        &self,
        schema: &Schema,
        slot: impl FnMut(&ChangeSet) + 'static,
    ) -> Subscription {
        self.subscribe(Some(Location::table(schema)), Box::new(slot))
    }

    pub fn listen_record(
        &self,
        schema: &Schema,
        record: &str,
        slot: impl FnMut(&ChangeSet) + 'static,
    ) -> Subscription {
        self.subscribe(Some(Location::record(schema, record)), Box::new(slot))
    }

    pub fn listen_field(
        &self,
        schema: &Schema,
        record: &str,
        field: &str,
        slot: impl FnMut(&ChangeSet) + 'static,
    ) -> Subscription {
        self.subscribe(Some(Location::field(schema, record, field)), Box::new(slot))
    }

    fn subscribe(&self, filter: Option<Location>, slot: Slot) -> Subscription {
        let mut registry = self.listeners.borrow_mut();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.entries.push(Listener { id, filter, slot });
        Subscription {
            id,
            registry: Rc::downgrade(&self.listeners),
        }
    }

    fn emit(&self, change_set: &ChangeSet) {
        // Entries are checked out so slots may subscribe or dispose freely.
        let mut entries = {
            let mut registry = self.listeners.borrow_mut();
            registry.emitting = true;
            std::mem::take(&mut registry.entries)
        };

        for listener in entries.iter_mut() {
            if self.listeners.borrow().disposed.contains(&listener.id) {
                continue;
            }
            match &listener.filter {
                None => (listener.slot)(change_set),
                Some(location) => {
                    if let Some(filtered) = change_set.filtered(location) {
                        (listener.slot)(&filtered);
                    }
                }
            }
        }

        let mut registry = self.listeners.borrow_mut();
        registry.emitting = false;
        let disposed = std::mem::take(&mut registry.disposed);
        entries.retain(|l| !disposed.contains(&l.id));
        let added = std::mem::take(&mut registry.entries);
        entries.extend(added);
        registry.entries = entries;
    }
}

impl std::fmt::Debug for TransactionalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalStore")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("transactions", &self.log.len())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

fn note_previous(open: &mut OpenTransaction, table: &str, record: &str, field: &str, value: Value) {
    open.touched
        .entry((table.to_string(), record.to_string(), field.to_string()))
        .or_insert(value);
}

fn read_field(tables: &Tables, table: &str, record: &str, field: &str) -> Value {
    tables
        .get(table)
        .and_then(|t| t.get(record))
        .and_then(|r| r.get(field))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Baseline plus every live transaction, in arrival order
fn replayed(baseline: &Tables, schemas: &[&'static Schema], log: &TransactionLog) -> Tables {
    let mut tables = baseline.clone();
    for transaction in log.history() {
        for patch in &transaction.patches {
            apply_patch(&mut tables, schemas, patch);
        }
    }
    tables
}

fn apply_patch(tables: &mut Tables, schemas: &[&'static Schema], patch: &Patch) {
    match patch {
        Patch::SetField {
            table,
            record,
            field,
            value,
        } => {
            let Some(schema) = schemas.iter().find(|s| s.id == table) else {
                tracing::warn!("Skipping patch for unknown table '{}'", table);
                return;
            };
            tables
                .entry(table.clone())
                .or_default()
                .entry(record.clone())
                .or_insert_with(|| schema.new_record())
                .insert(field.clone(), value.clone());
        }
        Patch::ClearTable { table } => {
            if let Some(t) = tables.get_mut(table) {
                t.clear();
            }
        }
    }
}

/// Field-level differences between two states
fn diff(before: &Tables, after: &Tables) -> Vec<FieldChange> {
    let mut keys: BTreeSet<(&str, &str, &str)> = BTreeSet::new();
    for tables in [before, after] {
        for (table, records) in tables {
            for (record, fields) in records {
                for field in fields.keys() {
                    keys.insert((table.as_str(), record.as_str(), field.as_str()));
                }
            }
        }
    }

    keys.into_iter()
        .filter_map(|(table, record, field)| {
            let previous = read_field(before, table, record, field);
            let current = read_field(after, table, record, field);
            (previous != current).then(|| FieldChange {
                table: table.to_string(),
                record: record.to_string(),
                field: field.to_string(),
                previous,
                current,
            })
        })
        .collect()
}
