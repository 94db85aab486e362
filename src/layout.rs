use crate::config::DashboardSettings;
use crate::error::StoreError;
use crate::notebook::NotebookResolver;
use crate::position::{Direction, Overlap, WidgetPosition};
use crate::transaction::TransactionId;
use crate::widget::{CellOutputWidget, HostSurface, Mode};
use crate::widgetstore::{ChangeType, DashboardChange, WidgetInfo, WidgetRecordStore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use ulid::Ulid;

pub const DEFAULT_TILE_SIZE: i64 = 32;

/// How the canvas reacts to content reaching its far edges
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScrollMode {
    /// Grows as widgets are pushed or scrolled past the edge
    Infinite,
    #[default]
    Constrained,
}

type ChangeSlot = Box<dyn FnMut(&[DashboardChange])>;

/// Live arrangement of widgets on a dashboard canvas.
///
/// Geometry edits are clamped, snapped and de-overlapped here, collected
/// into a change buffer, and written to the widget store as one transaction
/// when the outermost batch ends. A zero width or height means the canvas
/// is unbounded on that axis.
pub struct LayoutEngine {
    widgetstore: WidgetRecordStore,
    host: Box<dyn HostSurface>,
    order: Vec<Ulid>,
    items: HashMap<Ulid, CellOutputWidget>,
    width: i64,
    height: i64,
    mode: Mode,
    scroll_mode: ScrollMode,
    tile_size: i64,
    changes: Vec<DashboardChange>,
    batch_depth: usize,
    signal_changes: bool,
    listeners: Vec<ChangeSlot>,
}

impl LayoutEngine {
    pub fn new(widgetstore: WidgetRecordStore, host: Box<dyn HostSurface>) -> Self {
        Self {
            widgetstore,
            host,
            order: Vec::new(),
            items: HashMap::new(),
            width: 0,
            height: 0,
            mode: Mode::default(),
            scroll_mode: ScrollMode::default(),
            tile_size: DEFAULT_TILE_SIZE,
            changes: Vec::new(),
            batch_depth: 0,
            signal_changes: true,
            listeners: Vec::new(),
        }
    }

    /// Engine with canvas, mode and tile size taken from `settings`
    pub fn with_settings(
        widgetstore: WidgetRecordStore,
        host: Box<dyn HostSurface>,
        settings: &DashboardSettings,
    ) -> Self {
        let mut layout = Self::new(widgetstore, host);
        layout.mode = settings.mode;
        layout.scroll_mode = settings.scroll_mode;
        if settings.tile_size > 0 {
            layout.tile_size = settings.tile_size;
        }
        layout.set_width(settings.width);
        layout.set_height(settings.height);
        layout
    }

    pub fn widgetstore(&self) -> &WidgetRecordStore {
        &self.widgetstore
    }

    pub fn widgetstore_mut(&mut self) -> &mut WidgetRecordStore {
        &mut self.widgetstore
    }

    pub fn host_mut(&mut self) -> &mut dyn HostSurface {
        self.host.as_mut()
    }

    // ========== Canvas ==========

    pub fn width(&self) -> i64 {
        self.width
    }

    pub fn height(&self) -> i64 {
        self.height
    }

    /// Negative widths are treated as zero (unbounded)
    pub fn set_width(&mut self, width: i64) {
        self.width = width.max(0);
        self.host.resize_canvas(self.width, self.height);
    }

    pub fn set_height(&mut self, height: i64) {
        self.height = height.max(0);
        self.host.resize_canvas(self.width, self.height);
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switch every widget to `mode`. Entering grid-edit re-snaps the layout.
    pub fn set_mode(&mut self, mode: Mode) -> Result<(), StoreError> {
        self.mode = mode;
        for id in &self.order {
            if let Some(widget) = self.items.get_mut(id) {
                widget.set_mode(mode);
                self.host.set_mode(*id, mode);
            }
        }
        if mode == Mode::GridEdit {
            self.set_tile_size(self.tile_size)?;
        }
        Ok(())
    }

    pub fn scroll_mode(&self) -> ScrollMode {
        self.scroll_mode
    }

    pub fn set_scroll_mode(&mut self, scroll_mode: ScrollMode) {
        self.scroll_mode = scroll_mode;
    }

    pub fn tile_size(&self) -> i64 {
        self.tile_size
    }

    /// Re-place every widget against a new tile size, as one batch
    pub fn set_tile_size(&mut self, tile_size: i64) -> Result<(), StoreError> {
        if tile_size <= 0 {
            tracing::warn!("Ignoring invalid tile size {}", tile_size);
            return Ok(());
        }
        self.tile_size = tile_size;

        self.start_batch();
        for id in self.order.clone() {
            if let Some(pos) = self.items.get(&id).map(|w| w.pos()) {
                self.move_and_record(id, pos, true);
            }
        }
        self.end_batch()
    }

    /// Shrink the canvas to the bounding box of its widgets
    pub fn trim_dashboard(&mut self) {
        let max_width = self.widgets().map(|w| w.pos().right()).max().unwrap_or(0);
        let max_height = self.widgets().map(|w| w.pos().bottom()).max().unwrap_or(0);

        if max_width > 0 {
            self.set_width(max_width);
        }
        if max_height > 0 {
            self.set_height(max_height);
        }
    }

    // ========== Widgets ==========

    /// Widgets on the canvas, in insertion order
    pub fn widgets(&self) -> impl Iterator<Item = &CellOutputWidget> + '_ {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    pub fn get_widget(&self, id: Ulid) -> Option<&CellOutputWidget> {
        self.items.get(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn set_locked(&mut self, id: Ulid, locked: bool) -> bool {
        match self.items.get_mut(&id) {
            Some(widget) => {
                widget.set_locked(locked);
                true
            }
            None => false,
        }
    }

    /// Retry resolution of placeholder widgets; returns how many resolved
    pub fn resolve_placeholders(&mut self, resolver: &dyn NotebookResolver) -> usize {
        self.items
            .values_mut()
            .filter(|w| w.is_placeholder())
            .map(|w| w.resolve(resolver))
            .filter(|resolved| *resolved)
            .count()
    }

    /// Put a widget on the canvas and push overlapping widgets out of the way.
    ///
    /// Returns `false` if a widget with the same id is already on the canvas.
    pub fn add_widget(
        &mut self,
        info: &WidgetInfo,
        resolver: &dyn NotebookResolver,
    ) -> Result<bool, StoreError> {
        if self.items.contains_key(&info.widget_id) {
            return Ok(false);
        }

        self.start_batch();
        self.insert_item(info, resolver);
        self.place(info.widget_id, info.pos, true);
        self.record(ChangeType::Add, info.widget_id);
        self.end_batch()?;
        Ok(true)
    }

    /// Move or resize a widget, resolving overlaps.
    ///
    /// Returns `false` if the widget is not on the canvas.
    pub fn update_widget(&mut self, id: Ulid, pos: WidgetPosition) -> Result<bool, StoreError> {
        self.start_batch();
        let moved = self.move_and_record(id, pos, true);
        self.end_batch()?;
        Ok(moved)
    }

    /// Resize in place without pushing other widgets
    pub fn resize_widget(&mut self, id: Ulid, pos: WidgetPosition) -> Result<bool, StoreError> {
        self.start_batch();
        let resized = self.move_and_record(id, pos, false);
        self.end_batch()?;
        Ok(resized)
    }

    pub fn delete_widget(&mut self, id: Ulid) -> Result<bool, StoreError> {
        if !self.items.contains_key(&id) {
            return Ok(false);
        }

        self.start_batch();
        self.record(ChangeType::Remove, id);
        self.remove_item(id);
        self.end_batch()?;
        Ok(true)
    }

    /// Widgets overlapping a point, excluding locked ones
    pub fn widgets_at_point(&self, x: i64, y: i64) -> Vec<Overlap> {
        self.widgets_in_selection(&WidgetPosition::new(x, y, 0, 0))
    }

    /// Widgets overlapping an area, excluding locked ones
    pub fn widgets_in_selection(&self, area: &WidgetPosition) -> Vec<Overlap> {
        self.widgets()
            .filter(|w| !w.locked())
            .filter_map(|w| w.overlaps(area))
            .collect()
    }

    /// Where a widget dropped at `pos` would land
    pub fn drop_zone(&self, pos: WidgetPosition) -> WidgetPosition {
        let rect = pos.clamped(self.width, self.height);
        if self.mode == Mode::GridEdit {
            rect.snapped(self.tile_size)
        } else {
            rect
        }
    }

    // ========== Batching ==========

    pub fn start_batch(&mut self) {
        self.batch_depth += 1;
    }

    /// Close a batch. The outermost close writes the collected changes to
    /// the widget store and notifies `on_change` listeners.
    ///
    /// If the store rejects the changes they stay pending: a later flush
    /// retries them, or `update_layout_from_store` reverts the canvas.
    pub fn end_batch(&mut self) -> Result<(), StoreError> {
        if self.batch_depth == 0 {
            return Ok(());
        }
        self.batch_depth -= 1;
        if self.batch_depth == 0 {
            self.flush()?;
        }
        Ok(())
    }

    pub fn in_batch(&self) -> bool {
        self.batch_depth > 0
    }

    /// Whether edits are waiting to be written to the widget store
    pub fn has_pending_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Observe every flushed change-set
    pub fn on_change(&mut self, slot: impl FnMut(&[DashboardChange]) + 'static) {
        self.listeners.push(Box::new(slot));
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if self.changes.is_empty() {
            return Ok(());
        }
        let changes = coalesce(std::mem::take(&mut self.changes));
        if changes.is_empty() {
            return Ok(());
        }
        if let Err(err) = self.widgetstore.apply_changes(&changes) {
            // Kept for the next flush; `update_layout_from_store` drops them.
            tracing::warn!("Widget store rejected {} layout changes: {}", changes.len(), err);
            self.changes = changes;
            return Err(err);
        }
        for listener in self.listeners.iter_mut() {
            listener(&changes);
        }
        Ok(())
    }

    // ========== Store synchronisation ==========

    /// Rebuild the canvas from the widget store.
    ///
    /// Widgets are restored at their stored rectangles without an overlap
    /// pass, and nothing is written back to the store. Changes still waiting
    /// for a flush are discarded.
    pub fn update_layout_from_store(&mut self, resolver: &dyn NotebookResolver) {
        self.changes.clear();
        self.signal_changes = false;

        let records: Vec<WidgetInfo> = self.widgetstore.records().collect();
        let known: HashSet<Ulid> = records.iter().map(|r| r.widget_id).collect();

        let stale: Vec<Ulid> = self
            .order
            .iter()
            .filter(|id| !known.contains(id))
            .copied()
            .collect();
        for id in stale {
            self.remove_item(id);
        }

        for record in records {
            let on_canvas = self.items.contains_key(&record.widget_id);
            match (on_canvas, record.removed) {
                (false, true) => {}
                (true, true) => self.remove_item(record.widget_id),
                (false, false) => {
                    self.insert_item(&record, resolver);
                    self.restore_item(record.widget_id, record.pos);
                }
                (true, false) => self.restore_item(record.widget_id, record.pos),
            }
        }

        self.signal_changes = true;
    }

    pub fn undo(&mut self, resolver: &dyn NotebookResolver) -> Result<Option<TransactionId>, StoreError> {
        let id = self.widgetstore.undo(None)?;
        self.update_layout_from_store(resolver);
        Ok(id)
    }

    pub fn redo(&mut self, resolver: &dyn NotebookResolver) -> Result<Option<TransactionId>, StoreError> {
        let id = self.widgetstore.redo(None)?;
        self.update_layout_from_store(resolver);
        Ok(id)
    }

    // ========== Internals ==========

    fn insert_item(&mut self, info: &WidgetInfo, resolver: &dyn NotebookResolver) {
        let mut widget = CellOutputWidget::new(info, resolver);
        widget.set_mode(self.mode);
        self.host.attach(&widget);
        self.host.fit(widget.id());
        self.order.push(widget.id());
        self.items.insert(widget.id(), widget);
    }

    fn remove_item(&mut self, id: Ulid) {
        if self.items.remove(&id).is_some() {
            self.order.retain(|entry| *entry != id);
            self.host.detach(id);
        }
    }

    fn restore_item(&mut self, id: Ulid, pos: WidgetPosition) {
        if let Some(widget) = self.items.get_mut(&id) {
            widget.set_pos(pos);
            self.host.set_geometry(id, pos);
        }
    }

    fn record(&mut self, kind: ChangeType, id: Ulid) {
        if !self.signal_changes {
            return;
        }
        if let Some(widget) = self.items.get(&id) {
            self.changes.push(DashboardChange::new(kind, &widget.info()));
        }
    }

    fn move_and_record(&mut self, id: Ulid, pos: WidgetPosition, fix: bool) -> bool {
        if !self.place(id, pos, fix) {
            return false;
        }
        self.record(ChangeType::Move, id);
        true
    }

    /// Clamp, snap and apply a rectangle, optionally resolving overlaps
    fn place(&mut self, id: Ulid, pos: WidgetPosition, fix: bool) -> bool {
        let Some(widget) = self.items.get_mut(&id) else {
            return false;
        };

        let mut rect = pos.clamped(self.width, self.height);
        if widget.mode() == Mode::GridEdit {
            rect = rect.snapped(self.tile_size);
        }
        widget.set_pos(rect);
        self.host.set_geometry(id, rect);

        if fix {
            self.fix_overlaps(id);
        }
        true
    }

    /// Push every widget overlapping `mover` clear of it, once.
    ///
    /// Widgets displaced here are not checked against third widgets.
    fn fix_overlaps(&mut self, mover: Ulid) {
        let Some(area) = self.items.get(&mover).map(|w| w.pos()) else {
            return;
        };
        let was_locked = self.set_lock(mover, true);

        let overlaps: Vec<Overlap> = self
            .widgets_in_selection(&area)
            .into_iter()
            .filter(|overlap| overlap.widget != mover)
            .collect();
        for overlap in overlaps {
            self.handle_overlap(mover, overlap);
        }

        self.set_lock(mover, was_locked);
    }

    fn set_lock(&mut self, id: Ulid, locked: bool) -> bool {
        self.items
            .get_mut(&id)
            .map(|w| {
                let previous = w.locked();
                w.set_locked(locked);
                previous
            })
            .unwrap_or(false)
    }

    fn handle_overlap(&mut self, mover: Ulid, overlap: Overlap) {
        let (Some(area), Some(mut pos)) = (
            self.items.get(&mover).map(|w| w.pos()),
            self.items.get(&overlap.widget).map(|w| w.pos()),
        ) else {
            return;
        };

        match overlap.direction {
            Direction::Up => pos.top = area.top - pos.height,
            Direction::Down => pos.top = area.bottom(),
            Direction::Left => pos.left = area.left - pos.width,
            Direction::Right => pos.left = area.right(),
        }

        if pos.left < 0 {
            let amount = -pos.left;
            pos.left = 0;
            self.expand_canvas(Direction::Left, amount, overlap.widget);
        }
        if pos.top < 0 {
            let amount = -pos.top;
            pos.top = 0;
            self.expand_canvas(Direction::Up, amount, overlap.widget);
        }

        if self.scroll_mode == ScrollMode::Infinite {
            if self.height != 0 && pos.bottom() > self.height {
                self.expand_canvas(Direction::Down, pos.bottom() - self.height, overlap.widget);
            }
            if self.width != 0 && pos.right() > self.width {
                self.expand_canvas(Direction::Right, pos.right() - self.width, overlap.widget);
            }
        }

        self.move_and_record(overlap.widget, pos, false);
    }

    /// Grow the canvas by `amount`. Growing up or left shifts every widget
    /// except `except` to make room at the origin.
    fn expand_canvas(&mut self, direction: Direction, amount: i64, except: Ulid) {
        tracing::debug!("Expanding dashboard canvas {:?} by {}px", direction, amount);

        let (dx, dy) = match direction {
            Direction::Up => (0, amount),
            Direction::Left => (amount, 0),
            Direction::Down | Direction::Right => (0, 0),
        };

        match direction {
            Direction::Up | Direction::Down if self.height != 0 => {
                self.set_height(self.height + amount)
            }
            Direction::Left | Direction::Right if self.width != 0 => {
                self.set_width(self.width + amount)
            }
            _ => {}
        }

        if dx == 0 && dy == 0 {
            return;
        }
        for id in self.order.clone() {
            if id == except {
                continue;
            }
            if let Some(pos) = self.items.get(&id).map(|w| w.pos()) {
                self.move_and_record(id, pos.translate(dx, dy), false);
            }
        }
    }
}

impl std::fmt::Debug for LayoutEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutEngine")
            .field("widgets", &self.order.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("mode", &self.mode)
            .field("scroll_mode", &self.scroll_mode)
            .field("tile_size", &self.tile_size)
            .field("batch_depth", &self.batch_depth)
            .finish()
    }
}

/// Merge changes per widget, keeping first-appearance order.
///
/// An add absorbs later moves, a remove replaces what came before, and an
/// add followed by a remove cancels out.
fn coalesce(changes: Vec<DashboardChange>) -> Vec<DashboardChange> {
    let mut merged: Vec<Option<DashboardChange>> = Vec::new();
    let mut index: HashMap<Ulid, usize> = HashMap::new();

    for change in changes {
        let Some(&i) = index.get(&change.widget_id) else {
            index.insert(change.widget_id, merged.len());
            merged.push(Some(change));
            continue;
        };

        merged[i] = match (merged[i].take(), change.kind) {
            (Some(existing), ChangeType::Move) if existing.kind == ChangeType::Add => {
                Some(DashboardChange {
                    pos: change.pos,
                    ..existing
                })
            }
            (Some(existing), ChangeType::Remove) if existing.kind == ChangeType::Add => None,
            (None, ChangeType::Add) | (Some(_), _) => Some(change),
            (None, _) => None,
        };
    }

    merged.into_iter().flatten().collect()
}
