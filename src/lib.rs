// Notebook Dashboard - Layout and Persistence Core

pub mod config;
pub mod dashboard;
pub mod error;
pub mod layout;
pub mod notebook;
pub mod position;
pub mod serialization;
pub mod store;
pub mod transaction;
pub mod widget;
pub mod widgetstore;

// Re-export main types for convenience
pub use config::DashboardSettings;
pub use dashboard::{
    Clipboard, DashboardController, DashboardDocument, DropAction, DropEvent, DropOutcome,
    DropPayload, Viewport,
};
pub use error::{DashboardError, StoreError};
pub use layout::{LayoutEngine, ScrollMode, DEFAULT_TILE_SIZE};
pub use notebook::{CellHandle, NotebookHandle, NotebookResolver, NotebookTracker};
pub use position::{Direction, Overlap, WidgetPosition, MAX_COORDINATE};
pub use serialization::{
    ContentStore, DashboardContent, DashboardMetadata, FsContentStore, MemoryContentStore,
    OutputInfo, DASHBOARD_VERSION,
};
pub use store::{ChangeKind, ChangeSet, FieldChange, Subscription, TransactionalStore};
pub use transaction::{Patch, Transaction, TransactionId, TransactionLog};
pub use widget::{CellOutputWidget, Corner, Gesture, GestureKind, HeadlessSurface, HostSurface, Mode};
pub use widgetstore::{ChangeType, DashboardChange, WidgetInfo, WidgetRecordStore};
