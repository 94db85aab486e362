use crate::config::DashboardSettings;
use crate::error::DashboardError;
use crate::layout::{LayoutEngine, ScrollMode};
use crate::notebook::NotebookResolver;
use crate::position::{Direction, WidgetPosition};
use crate::serialization::{
    dirname, join, relative_to, ContentStore, DashboardContent, DashboardMetadata, OutputInfo,
    DASHBOARD_VERSION,
};
use crate::transaction::TransactionId;
use crate::widget::{Gesture, GestureKind, HostSurface, Mode};
use crate::widgetstore::{WidgetInfo, WidgetRecordStore};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use ulid::Ulid;

/// Notebook metadata key `save_to_metadata` writes under
pub const METADATA_KEY: &str = "dashboard";

pub const DEFAULT_NAME: &str = "Unnamed Dashboard";

/// Action the host proposes for a drop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropAction {
    Move,
    Copy,
    Link,
    None,
}

/// What is being dragged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropPayload {
    /// A widget already placed on some dashboard
    Widget {
        dashboard: Ulid,
        widget: Ulid,
        width: i64,
        height: i64,
    },
    /// A cell output dragged out of a notebook
    Cell { notebook_id: String, cell_id: String },
}

/// A drop onto this dashboard. `left`/`top` are in canvas coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropEvent {
    pub action: DropAction,
    pub left: i64,
    pub top: i64,
    pub payload: DropPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    /// Widget moved within this dashboard
    Moved(Ulid),
    /// Widget moved here from another dashboard under a new id
    Transferred(Ulid),
    /// New widget created from a notebook cell
    Copied(Ulid),
    Ignored,
}

/// Visible part of the canvas
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Viewport {
    pub left: i64,
    pub top: i64,
    pub width: i64,
    pub height: i64,
}

/// Single-slot holder of copied widget snapshots
#[derive(Debug, Clone, Default)]
pub struct Clipboard {
    items: Vec<WidgetInfo>,
}

impl Clipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[WidgetInfo] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Read-only snapshot of a dashboard
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardDocument {
    pub id: Ulid,
    pub name: String,
    pub path: String,
    pub mode: Mode,
    pub scroll_mode: ScrollMode,
    pub width: i64,
    pub height: i64,
    pub tile_size: i64,
    pub widgets: Vec<WidgetInfo>,
}

/// Payload stored in notebook metadata
#[derive(Debug, Serialize)]
struct MetadataDashboard<'a> {
    #[serde(flatten)]
    metadata: &'a DashboardMetadata,
    outputs: Vec<OutputInfo>,
}

/// One dashboard document: layout, history and persistence.
///
/// The controller owns its [`LayoutEngine`] and talks to the host through
/// the notebook resolver, content store and surface it was built with.
pub struct DashboardController {
    id: Ulid,
    name: String,
    path: String,
    settings: DashboardSettings,
    layout: LayoutEngine,
    resolver: Box<dyn NotebookResolver>,
    contents: Box<dyn ContentStore>,
    saved_version: u64,
    last_edges: (i64, i64),
}

impl DashboardController {
    pub fn new(
        settings: DashboardSettings,
        resolver: Box<dyn NotebookResolver>,
        contents: Box<dyn ContentStore>,
        host: Box<dyn HostSurface>,
    ) -> Self {
        let layout = LayoutEngine::with_settings(WidgetRecordStore::new(1), host, &settings);
        let saved_version = layout.widgetstore().version();
        Self {
            id: Ulid::new(),
            name: DEFAULT_NAME.to_string(),
            path: String::new(),
            settings,
            layout,
            resolver,
            contents,
            saved_version,
            last_edges: (0, 0),
        }
    }

    /// Set the document path used by `save` and `load`
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    pub fn settings(&self) -> &DashboardSettings {
        &self.settings
    }

    pub fn layout(&self) -> &LayoutEngine {
        &self.layout
    }

    pub fn layout_mut(&mut self) -> &mut LayoutEngine {
        &mut self.layout
    }

    pub fn resolver(&self) -> &dyn NotebookResolver {
        self.resolver.as_ref()
    }

    pub fn resolver_mut(&mut self) -> &mut dyn NotebookResolver {
        self.resolver.as_mut()
    }

    pub fn contents(&self) -> &dyn ContentStore {
        self.contents.as_ref()
    }

    /// Whether the store changed since the last save or load
    pub fn dirty(&self) -> bool {
        self.layout.widgetstore().version() != self.saved_version
    }

    pub fn document(&self) -> DashboardDocument {
        DashboardDocument {
            id: self.id,
            name: self.name.clone(),
            path: self.path.clone(),
            mode: self.layout.mode(),
            scroll_mode: self.layout.scroll_mode(),
            width: self.layout.width(),
            height: self.layout.height(),
            tile_size: self.layout.tile_size(),
            widgets: self.layout.widgets().map(|w| w.info()).collect(),
        }
    }

    // ========== Widget Operations ==========

    /// Returns `false` if the widget is already on the dashboard
    pub fn add_widget(&mut self, info: &WidgetInfo) -> Result<bool> {
        Ok(self.layout.add_widget(info, self.resolver.as_ref())?)
    }

    /// Place a cell output at a position with the default widget size
    pub fn place_cell(&mut self, notebook_id: &str, cell_id: &str, left: i64, top: i64) -> Result<Ulid> {
        let pos = WidgetPosition::new(
            left,
            top,
            self.settings.default_widget_width,
            self.settings.default_widget_height,
        );
        let info = WidgetInfo::new(cell_id, notebook_id, pos);
        self.add_widget(&info)?;
        Ok(info.widget_id)
    }

    pub fn update_widget(&mut self, id: Ulid, pos: WidgetPosition) -> Result<bool> {
        Ok(self.layout.update_widget(id, pos)?)
    }

    pub fn resize_widget(&mut self, id: Ulid, pos: WidgetPosition) -> Result<bool> {
        Ok(self.layout.resize_widget(id, pos)?)
    }

    pub fn delete_widget(&mut self, id: Ulid) -> Result<bool> {
        Ok(self.layout.delete_widget(id)?)
    }

    /// Keyboard nudge; `fine` moves a single pixel
    pub fn bump_widget(&mut self, id: Ulid, direction: Direction, fine: bool) -> Result<bool> {
        let distance = if fine { 1 } else { self.settings.bump_distance };
        let Some(pos) = self.layout.get_widget(id).map(|w| w.bump(direction, distance)) else {
            return Ok(false);
        };
        self.update_widget(id, pos)
    }

    /// Start a drag or resize on a widget under the pointer
    pub fn begin_gesture(&self, id: Ulid, kind: GestureKind, x: i64, y: i64) -> Option<Gesture> {
        self.layout.get_widget(id)?.begin_gesture(kind, x, y)
    }

    /// Commit a gesture with the pointer released at `(x, y)`.
    ///
    /// Drags shorter than the drag threshold are treated as clicks.
    pub fn finish_gesture(&mut self, gesture: &Gesture, x: i64, y: i64) -> Result<bool> {
        let pos = gesture.propose(
            x,
            y,
            self.settings.min_widget_width,
            self.settings.min_widget_height,
        );
        match gesture.kind() {
            GestureKind::Drag => {
                if !gesture.exceeds_threshold(x, y, self.settings.drag_threshold) {
                    return Ok(false);
                }
                self.update_widget(gesture.widget(), pos)
            }
            GestureKind::Resize(_) => self.resize_widget(gesture.widget(), pos),
        }
    }

    pub fn undo(&mut self) -> Result<Option<TransactionId>> {
        Ok(self.layout.undo(self.resolver.as_ref())?)
    }

    pub fn redo(&mut self) -> Result<Option<TransactionId>> {
        Ok(self.layout.redo(self.resolver.as_ref())?)
    }

    pub fn set_mode(&mut self, mode: Mode) -> Result<()> {
        Ok(self.layout.set_mode(mode)?)
    }

    pub fn set_scroll_mode(&mut self, scroll_mode: ScrollMode) {
        self.layout.set_scroll_mode(scroll_mode);
    }

    pub fn set_tile_size(&mut self, tile_size: i64) -> Result<()> {
        Ok(self.layout.set_tile_size(tile_size)?)
    }

    /// Shrink the canvas to fit its widgets
    pub fn trim(&mut self) {
        self.layout.trim_dashboard();
    }

    // ========== Drag and Drop ==========

    /// Drop-zone preview while something is dragged over the canvas
    pub fn drag_over(&self, event: &DropEvent) -> Option<WidgetPosition> {
        if self.layout.mode() != Mode::GridEdit {
            return None;
        }
        match &event.payload {
            DropPayload::Widget { width, height, .. } => Some(
                self.layout
                    .drop_zone(WidgetPosition::new(event.left, event.top, *width, *height)),
            ),
            DropPayload::Cell { .. } => None,
        }
    }

    /// Apply a drop.
    ///
    /// `source` is the dashboard a dragged widget came from when it is not
    /// this one; a widget dropped from elsewhere without it is ignored.
    pub fn handle_drop(
        &mut self,
        event: DropEvent,
        source: Option<&mut DashboardController>,
    ) -> Result<DropOutcome> {
        match (event.action, event.payload) {
            (
                DropAction::Move,
                DropPayload::Widget {
                    dashboard,
                    widget,
                    width,
                    height,
                },
            ) => {
                let pos = WidgetPosition::new(event.left, event.top, width, height);
                if dashboard == self.id {
                    return Ok(if self.update_widget(widget, pos)? {
                        DropOutcome::Moved(widget)
                    } else {
                        DropOutcome::Ignored
                    });
                }

                let Some(source) = source.filter(|s| s.id == dashboard) else {
                    tracing::warn!("Dropped widget {} from unknown dashboard {}", widget, dashboard);
                    return Ok(DropOutcome::Ignored);
                };
                let Some(original) = source.layout.get_widget(widget).map(|w| w.info()) else {
                    return Ok(DropOutcome::Ignored);
                };

                let info = WidgetInfo::new(original.cell_id, original.notebook_id, pos);
                self.add_widget(&info)?;
                source.delete_widget(widget)?;
                tracing::debug!("Transferred widget {} as {}", widget, info.widget_id);
                Ok(DropOutcome::Transferred(info.widget_id))
            }
            (
                DropAction::Copy,
                DropPayload::Cell {
                    notebook_id,
                    cell_id,
                },
            ) => {
                let id = self.place_cell(&notebook_id, &cell_id, event.left, event.top)?;
                Ok(DropOutcome::Copied(id))
            }
            (action, _) => {
                tracing::debug!("Ignoring drop with action {:?}", action);
                Ok(DropOutcome::Ignored)
            }
        }
    }

    // ========== Clipboard ==========

    /// Replace the clipboard contents with snapshots of `ids`.
    ///
    /// Ids not on the dashboard are skipped; returns how many were copied.
    pub fn copy(&self, ids: &[Ulid], clipboard: &mut Clipboard) -> usize {
        clipboard.items = ids
            .iter()
            .filter_map(|id| self.layout.get_widget(*id))
            .map(|w| w.info())
            .collect();
        clipboard.len()
    }

    /// Copy then delete, as one undo step
    pub fn cut(&mut self, ids: &[Ulid], clipboard: &mut Clipboard) -> Result<usize> {
        let count = self.copy(ids, clipboard);
        if count == 0 {
            return Ok(0);
        }

        self.layout.start_batch();
        let deleted = clipboard
            .items
            .iter()
            .try_for_each(|info| self.layout.delete_widget(info.widget_id).map(|_| ()));
        self.layout.end_batch()?;
        deleted?;
        Ok(count)
    }

    /// Add clipboard snapshots under fresh ids, offset from the originals.
    /// One undo step.
    pub fn paste(&mut self, clipboard: &Clipboard) -> Result<Vec<Ulid>> {
        let offset = self.settings.paste_offset;
        let mut added = Vec::with_capacity(clipboard.len());

        self.layout.start_batch();
        let pasted = clipboard.items.iter().try_for_each(|item| {
            let info = WidgetInfo::new(
                item.cell_id.clone(),
                item.notebook_id.clone(),
                item.pos.translate(offset, offset),
            );
            self.layout.add_widget(&info, self.resolver.as_ref())?;
            added.push(info.widget_id);
            Ok::<_, crate::error::StoreError>(())
        });
        self.layout.end_batch()?;
        pasted?;
        Ok(added)
    }

    // ========== Scrolling ==========

    /// Grow an infinite canvas when the viewport reaches its far edge while
    /// scrolling outward. Returns `true` if the canvas grew. Unbounded axes
    /// (zero width or height) never grow.
    pub fn on_scroll(&mut self, viewport: Viewport) -> bool {
        if self.layout.scroll_mode() != ScrollMode::Infinite {
            return false;
        }
        let step = self.settings.scroll_expand_step;
        let right = viewport.left + viewport.width;
        let bottom = viewport.top + viewport.height;
        let (last_right, last_bottom) = self.last_edges;
        let (width, height) = (self.layout.width(), self.layout.height());
        let mut grew = false;

        if width != 0 && right >= width && right > last_right {
            self.layout.set_width(width + step);
            grew = true;
        }
        if height != 0 && bottom >= height && bottom > last_bottom {
            self.layout.set_height(height + step);
            grew = true;
        }

        self.last_edges = (right, bottom);
        grew
    }

    // ========== Persistence ==========

    fn metadata(&self) -> DashboardMetadata {
        DashboardMetadata {
            name: self.name.clone(),
            dashboard_width: self.layout.width(),
            dashboard_height: self.layout.height(),
        }
    }

    /// Current state in the persisted format
    pub fn to_content(&self) -> Result<DashboardContent> {
        let dir = dirname(&self.path);
        let mut content = DashboardContent::new(self.metadata());

        for info in self.layout.widgetstore().get_widgets() {
            let notebook = self
                .resolver
                .find_notebook(&info.notebook_id)
                .ok_or_else(|| DashboardError::NotebookPathUnknown(info.notebook_id.clone()))?;

            let path = relative_to(&dir, notebook.path());
            match content.paths.get(&path) {
                Some(existing) if *existing != info.notebook_id => {
                    return Err(DashboardError::ConflictingPaths {
                        path,
                        first: existing.clone(),
                        second: info.notebook_id,
                    }
                    .into());
                }
                Some(_) => {}
                None => {
                    content.paths.insert(path, info.notebook_id.clone());
                }
            }

            content
                .outputs
                .entry(info.notebook_id)
                .or_default()
                .push(OutputInfo {
                    cell_id: info.cell_id,
                    pos: info.pos,
                });
        }

        Ok(content)
    }

    /// Replace the dashboard with persisted content.
    ///
    /// Everything is validated before the store is touched. Widgets get
    /// fresh ids and the load is not undoable.
    pub fn from_content(&mut self, content: DashboardContent) -> Result<()> {
        if content.version > DASHBOARD_VERSION {
            return Err(DashboardError::UnsupportedVersion {
                found: content.version,
                supported: DASHBOARD_VERSION,
            }
            .into());
        }

        let dir = dirname(&self.path);
        let mut resolved: BTreeMap<String, &str> = BTreeMap::new();
        for (relative, notebook_id) in &content.paths {
            let path = join(&dir, relative);
            if let Some(first) = resolved.get(&path) {
                if *first != notebook_id.as_str() {
                    return Err(DashboardError::ConflictingPaths {
                        path,
                        first: first.to_string(),
                        second: notebook_id.clone(),
                    }
                    .into());
                }
                continue;
            }
            if self.resolver.find_notebook(notebook_id).is_none() && !self.contents.exists(&path) {
                return Err(DashboardError::MissingNotebook {
                    notebook_id: notebook_id.clone(),
                    path,
                }
                .into());
            }
            resolved.insert(path, notebook_id);
        }

        let known: HashSet<&str> = resolved.values().copied().collect();
        if let Some(unknown) = content.outputs.keys().find(|id| !known.contains(id.as_str())) {
            return Err(DashboardError::UnknownNotebookReference(unknown.clone()).into());
        }

        let canvas = WidgetPosition::new(
            0,
            0,
            content.metadata.dashboard_width,
            content.metadata.dashboard_height,
        );
        if !canvas.in_range() {
            return Err(DashboardError::CanvasOutOfRange {
                width: canvas.width,
                height: canvas.height,
            }
            .into());
        }
        for (notebook_id, outputs) in &content.outputs {
            if let Some(output) = outputs.iter().find(|o| !o.pos.in_range()) {
                return Err(DashboardError::PositionOutOfRange {
                    notebook_id: notebook_id.clone(),
                    cell_id: output.cell_id.clone(),
                    pos: output.pos,
                }
                .into());
            }
        }

        self.name = content.metadata.name;
        self.layout.set_width(content.metadata.dashboard_width);
        self.layout.set_height(content.metadata.dashboard_height);

        let widgetstore = self.layout.widgetstore_mut();
        widgetstore.clear()?;
        widgetstore.start_batch()?;
        for (notebook_id, outputs) in &content.outputs {
            for output in outputs {
                widgetstore.add_widget(&WidgetInfo::new(
                    output.cell_id.clone(),
                    notebook_id.clone(),
                    output.pos,
                ))?;
            }
        }
        widgetstore.end_batch()?;
        widgetstore.rebase_history()?;

        self.layout.update_layout_from_store(self.resolver.as_ref());
        self.saved_version = self.layout.widgetstore().version();
        tracing::info!(
            "Loaded dashboard '{}' with {} widgets",
            self.name,
            self.layout.len()
        );
        Ok(())
    }

    /// Write the dashboard to its path in the content store
    pub fn save(&mut self) -> Result<()> {
        let text = self.to_content()?.to_json_string()?;
        self.contents
            .save(&self.path, &text)
            .with_context(|| format!("Failed to save dashboard: {}", self.path))?;
        self.saved_version = self.layout.widgetstore().version();
        tracing::info!("Saved dashboard to {}", self.path);
        Ok(())
    }

    /// Read the dashboard from its path. An empty file leaves the dashboard
    /// empty.
    pub fn load(&mut self) -> Result<()> {
        let text = self
            .contents
            .load(&self.path)
            .with_context(|| format!("Failed to load dashboard: {}", self.path))?;
        if text.trim().is_empty() {
            tracing::debug!("Dashboard file {} is empty", self.path);
            return Ok(());
        }
        let content = DashboardContent::from_json_str(&text)
            .with_context(|| format!("Failed to parse dashboard: {}", self.path))?;
        self.from_content(content)
            .with_context(|| format!("Failed to load dashboard: {}", self.path))
    }

    /// Embed the dashboard in the metadata of its single source notebook
    pub fn save_to_metadata(&mut self) -> Result<()> {
        let widgets: Vec<WidgetInfo> = self.layout.widgetstore().get_widgets().collect();
        if widgets.is_empty() {
            return Err(DashboardError::EmptyDashboard.into());
        }

        let notebooks: BTreeSet<&str> = widgets.iter().map(|w| w.notebook_id.as_str()).collect();
        let notebook_id = match notebooks.iter().next() {
            Some(id) if notebooks.len() == 1 => id.to_string(),
            _ => {
                return Err(DashboardError::MixedNotebooks {
                    found: notebooks.iter().map(|id| id.to_string()).collect(),
                }
                .into())
            }
        };

        let metadata = self.metadata();
        let payload = MetadataDashboard {
            metadata: &metadata,
            outputs: widgets
                .into_iter()
                .map(|w| OutputInfo {
                    cell_id: w.cell_id,
                    pos: w.pos,
                })
                .collect(),
        };
        let value = serde_json::to_value(&payload).context("Failed to serialize dashboard")?;

        self.resolver
            .set_notebook_metadata(&notebook_id, METADATA_KEY, value)
            .with_context(|| format!("Failed to write metadata of notebook {}", notebook_id))
    }
}

impl std::fmt::Debug for DashboardController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardController")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("path", &self.path)
            .field("layout", &self.layout)
            .finish()
    }
}
