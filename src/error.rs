use crate::position::WidgetPosition;
use thiserror::Error;

/// Errors raised by the transactional store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a transaction is already in progress")]
    TransactionInProgress,

    #[error("no transaction is in progress")]
    NoTransaction,

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown field '{field}' in table '{table}'")]
    UnknownField { table: String, field: String },

    #[error("record '{record}' in table '{table}' is malformed: {reason}")]
    InvalidRecord {
        table: String,
        record: String,
        reason: String,
    },

    #[error("store serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Precondition violations at the dashboard level.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DashboardError {
    #[error("dashboard widgets reference more than one notebook: {found:?}")]
    MixedNotebooks { found: Vec<String> },

    #[error("dashboard has no widgets to save")]
    EmptyDashboard,

    #[error("conflicting notebook ids for path {path}: {first} and {second}")]
    ConflictingPaths {
        path: String,
        first: String,
        second: String,
    },

    #[error("error reading notebook {notebook_id} at {path}")]
    MissingNotebook { notebook_id: String, path: String },

    #[error("outputs reference notebook {0} which has no path entry")]
    UnknownNotebookReference(String),

    #[error("notebook path for notebook with id {0} not found")]
    NotebookPathUnknown(String),

    #[error("position {pos:?} of cell {cell_id} in notebook {notebook_id} is out of range")]
    PositionOutOfRange {
        notebook_id: String,
        cell_id: String,
        pos: WidgetPosition,
    },

    #[error("dashboard size {width}x{height} is out of range")]
    CanvasOutOfRange { width: i64, height: i64 },

    #[error("unsupported dashboard version {found} (newest supported is {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}
