use crate::error::StoreError;
use crate::position::WidgetPosition;
use crate::store::{ChangeSet, FieldKind, FieldSpec, Record, Schema, Subscription, TransactionalStore};
use crate::transaction::{Transaction, TransactionId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

fn default_pos() -> Value {
    serde_json::json!({ "left": 0, "top": 0, "width": 0, "height": 0 })
}

/// Table holding one record per dashboard widget
pub static WIDGET_SCHEMA: Schema = Schema {
    id: "widgets",
    fields: &[
        FieldSpec {
            name: "widgetId",
            kind: FieldKind::Text,
        },
        FieldSpec {
            name: "cellId",
            kind: FieldKind::Text,
        },
        FieldSpec {
            name: "notebookId",
            kind: FieldKind::Text,
        },
        FieldSpec {
            name: "pos",
            kind: FieldKind::Register(default_pos),
        },
        FieldSpec {
            name: "removed",
            kind: FieldKind::Boolean,
        },
    ],
};

/// Stored state of one widget
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WidgetInfo {
    pub widget_id: Ulid,
    pub cell_id: String,
    pub notebook_id: String,
    pub pos: WidgetPosition,
    #[serde(default)]
    pub removed: bool,
}

impl WidgetInfo {
    pub fn new(cell_id: impl Into<String>, notebook_id: impl Into<String>, pos: WidgetPosition) -> Self {
        Self {
            widget_id: WidgetRecordStore::new_widget_id(),
            cell_id: cell_id.into(),
            notebook_id: notebook_id.into(),
            pos,
            removed: false,
        }
    }

    fn from_record(record: &Record) -> Option<Self> {
        let object: Map<String, Value> = record
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        match serde_json::from_value(Value::Object(object)) {
            Ok(info) => Some(info),
            Err(err) => {
                tracing::warn!("Skipping malformed widget record: {}", err);
                None
            }
        }
    }
}

/// What a layout change did to a widget
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Move,
    Remove,
}

/// One entry of a layout change-set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardChange {
    #[serde(rename = "type")]
    pub kind: ChangeType,
    pub widget_id: Ulid,
    pub cell_id: String,
    pub notebook_id: String,
    pub pos: WidgetPosition,
    /// Changes flagged as ignored are not written to the store
    #[serde(default)]
    pub ignore: bool,
}

impl DashboardChange {
    pub fn new(kind: ChangeType, info: &WidgetInfo) -> Self {
        Self {
            kind,
            widget_id: info.widget_id,
            cell_id: info.cell_id.clone(),
            notebook_id: info.notebook_id.clone(),
            pos: info.pos,
            ignore: false,
        }
    }

    pub fn info(&self) -> WidgetInfo {
        WidgetInfo {
            widget_id: self.widget_id,
            cell_id: self.cell_id.clone(),
            notebook_id: self.notebook_id.clone(),
            pos: self.pos,
            removed: false,
        }
    }
}

/// Widget records on top of a [`TransactionalStore`].
///
/// Every mutation runs in its own transaction unless a batch is open, in
/// which case it joins the batch transaction.
#[derive(Debug)]
pub struct WidgetRecordStore {
    store: TransactionalStore,
    in_batch: bool,
}

impl WidgetRecordStore {
    pub fn new(id: u32) -> Self {
        Self {
            store: TransactionalStore::new(id, &[&WIDGET_SCHEMA]),
            in_batch: false,
        }
    }

    /// Restore from a state produced by [`WidgetRecordStore::serialize`]
    pub fn restore(id: u32, state: &str) -> Result<Self, StoreError> {
        Ok(Self {
            store: TransactionalStore::restore(id, &[&WIDGET_SCHEMA], state)?,
            in_batch: false,
        })
    }

    pub fn serialize(&self) -> Result<String, StoreError> {
        self.store.serialize()
    }

    pub fn new_widget_id() -> Ulid {
        Ulid::new()
    }

    pub fn store(&self) -> &TransactionalStore {
        &self.store
    }

    /// Raw store access. Transactions opened here bypass batching.
    pub fn store_mut(&mut self) -> &mut TransactionalStore {
        &mut self.store
    }

    pub fn version(&self) -> u64 {
        self.store.version()
    }

    /// Insert or replace a widget record, clearing its tombstone
    pub fn add_widget(&mut self, info: &WidgetInfo) -> Result<(), StoreError> {
        let mut update = Map::new();
        update.insert("widgetId".to_string(), Value::String(info.widget_id.to_string()));
        update.insert("cellId".to_string(), Value::String(info.cell_id.clone()));
        update.insert("notebookId".to_string(), Value::String(info.notebook_id.clone()));
        update.insert("pos".to_string(), serde_json::to_value(info.pos)?);
        update.insert("removed".to_string(), Value::Bool(false));

        let record = info.widget_id.to_string();
        self.store
            .with_transaction(|s| s.update_record(&WIDGET_SCHEMA, &record, update))?;
        Ok(())
    }

    /// Update only the position of a live widget.
    ///
    /// Returns `false` if the widget is unknown or tombstoned.
    pub fn move_widget(&mut self, widget_id: Ulid, pos: WidgetPosition) -> Result<bool, StoreError> {
        let record = widget_id.to_string();
        match self.store.get_field(&WIDGET_SCHEMA, &record, "removed") {
            Some(Value::Bool(false)) => {}
            _ => return Ok(false),
        }

        let value = serde_json::to_value(pos)?;
        self.store
            .with_transaction(|s| s.update_field(&WIDGET_SCHEMA, &record, "pos", value))?;
        Ok(true)
    }

    /// Tombstone a widget. Returns `false` if it is unknown.
    pub fn delete_widget(&mut self, widget_id: Ulid) -> Result<bool, StoreError> {
        let record = widget_id.to_string();
        if self.store.get_record(&WIDGET_SCHEMA, &record).is_none() {
            return Ok(false);
        }

        self.store.with_transaction(|s| {
            s.update_field(&WIDGET_SCHEMA, &record, "removed", Value::Bool(true))
        })?;
        Ok(true)
    }

    /// The full record, tombstoned or not
    pub fn get_widget(&self, widget_id: Ulid) -> Option<WidgetInfo> {
        self.store
            .get_record(&WIDGET_SCHEMA, &widget_id.to_string())
            .and_then(WidgetInfo::from_record)
    }

    /// Every live, fully identified widget. Each call re-reads current state.
    pub fn get_widgets(&self) -> impl Iterator<Item = WidgetInfo> + '_ {
        self.records().filter(|info| !info.removed)
    }

    /// Every well-formed record, tombstones included
    pub fn records(&self) -> impl Iterator<Item = WidgetInfo> + '_ {
        self.store
            .get_table(&WIDGET_SCHEMA)
            .into_iter()
            .flat_map(|table| table.values())
            .filter(|record| {
                matches!(record.get("widgetId"), Some(Value::String(id)) if !id.is_empty())
            })
            .filter_map(WidgetInfo::from_record)
    }

    // ========== Batching ==========

    /// Open a batch; nested calls are no-ops
    pub fn start_batch(&mut self) -> Result<(), StoreError> {
        if self.in_batch {
            return Ok(());
        }
        self.store.begin_transaction()?;
        self.in_batch = true;
        Ok(())
    }

    /// Close the batch, committing everything since `start_batch` as one
    /// transaction
    pub fn end_batch(&mut self) -> Result<Option<TransactionId>, StoreError> {
        if !self.in_batch {
            return Ok(None);
        }
        self.in_batch = false;
        self.store.end_transaction()
    }

    pub fn in_batch(&self) -> bool {
        self.in_batch
    }

    /// Write a layout change-set as a single transaction
    pub fn apply_changes(&mut self, changes: &[DashboardChange]) -> Result<Option<TransactionId>, StoreError> {
        let owns_batch = !self.in_batch;
        self.start_batch()?;

        for change in changes.iter().filter(|c| !c.ignore) {
            let applied = match change.kind {
                ChangeType::Add => self.add_widget(&change.info()).map(|_| true),
                ChangeType::Move => self.move_widget(change.widget_id, change.pos),
                ChangeType::Remove => self.delete_widget(change.widget_id),
            };
            match applied {
                Ok(true) => {}
                Ok(false) => tracing::warn!(
                    "Ignoring {:?} change for unknown widget {}",
                    change.kind,
                    change.widget_id
                ),
                Err(err) => {
                    if owns_batch {
                        self.in_batch = false;
                        self.store.abort_transaction();
                    }
                    return Err(err);
                }
            }
        }

        if owns_batch {
            self.end_batch()
        } else {
            Ok(None)
        }
    }

    /// Replay a transaction recorded by another widget store
    pub fn apply_transaction(&mut self, transaction: &Transaction) -> Result<bool, StoreError> {
        self.store.apply_transaction(transaction)
    }

    /// Remove every widget record. Not undoable.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.store.reset_table(&WIDGET_SCHEMA)
    }

    /// Make the current records the starting point of the undo history
    pub fn rebase_history(&mut self) -> Result<(), StoreError> {
        self.store.rebase_history()
    }

    // ========== History ==========

    pub fn undo(&mut self, id: Option<TransactionId>) -> Result<Option<TransactionId>, StoreError> {
        self.store.undo(id)
    }

    pub fn redo(&mut self, id: Option<TransactionId>) -> Result<Option<TransactionId>, StoreError> {
        self.store.redo(id)
    }

    pub fn has_undo(&self) -> bool {
        self.store.has_undo()
    }

    pub fn has_redo(&self) -> bool {
        self.store.has_redo()
    }

    pub fn history_len(&self) -> usize {
        self.store.history().count()
    }

    // ========== Listeners ==========

    /// Listen to changes of every widget record
    pub fn listen(&self, slot: impl FnMut(&ChangeSet) + 'static) -> Subscription {
        self.store.listen_table(&WIDGET_SCHEMA, slot)
    }

    pub fn listen_widget(&self, widget_id: Ulid, slot: impl FnMut(&ChangeSet) + 'static) -> Subscription {
        self.store
            .listen_record(&WIDGET_SCHEMA, &widget_id.to_string(), slot)
    }
}
