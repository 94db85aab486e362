use crate::notebook::NotebookResolver;
use crate::position::{Direction, Overlap, WidgetPosition};
use crate::widgetstore::WidgetInfo;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub const MIN_WIDTH: i64 = 10;
pub const MIN_HEIGHT: i64 = 10;

/// Keyboard nudge distance in pixels
pub const BUMP_DISTANCE: i64 = 10;

/// Pointer travel before a press turns into a drag
pub const DRAG_THRESHOLD: i64 = 5;

pub const DEFAULT_WIDTH: i64 = 500;
pub const DEFAULT_HEIGHT: i64 = 500;

/// Interaction mode of a dashboard and its widgets
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Click-through only
    Present,
    FreeEdit,
    #[default]
    GridEdit,
}

/// The visual substrate widgets are drawn on.
///
/// Implemented by the host GUI; the layout calls it after every geometry or
/// mode change and never reads anything back.
pub trait HostSurface {
    fn attach(&mut self, widget: &CellOutputWidget);

    fn detach(&mut self, widget_id: Ulid);

    fn set_geometry(&mut self, widget_id: Ulid, pos: WidgetPosition);

    fn set_mode(&mut self, widget_id: Ulid, mode: Mode);

    fn resize_canvas(&mut self, width: i64, height: i64);

    /// Request a fit-to-content pass for a widget
    fn fit(&mut self, _widget_id: Ulid) {}
}

/// Surface that draws nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessSurface;

impl HostSurface for HeadlessSurface {
    fn attach(&mut self, _widget: &CellOutputWidget) {}

    fn detach(&mut self, _widget_id: Ulid) {}

    fn set_geometry(&mut self, _widget_id: Ulid, _pos: WidgetPosition) {}

    fn set_mode(&mut self, _widget_id: Ulid, _mode: Mode) {}

    fn resize_canvas(&mut self, _width: i64, _height: i64) {}
}

/// A notebook cell output placed on the dashboard canvas.
///
/// Pure data: identity, geometry and interaction state. A widget whose cell
/// or notebook cannot be resolved is still created, flagged as a
/// placeholder, so a dashboard with missing notebooks keeps loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellOutputWidget {
    id: Ulid,
    cell_id: String,
    notebook_id: String,
    pos: WidgetPosition,
    mode: Mode,
    locked: bool,
    placeholder: bool,
}

impl CellOutputWidget {
    pub fn new(info: &WidgetInfo, resolver: &dyn NotebookResolver) -> Self {
        let mut widget = Self {
            id: info.widget_id,
            cell_id: info.cell_id.clone(),
            notebook_id: info.notebook_id.clone(),
            pos: info.pos,
            mode: Mode::default(),
            locked: false,
            placeholder: true,
        };
        if !widget.resolve(resolver) {
            tracing::warn!(
                "Widget {} created as placeholder: cell '{}' in notebook '{}' not found",
                widget.id,
                widget.cell_id,
                widget.notebook_id
            );
        }
        widget
    }

    /// Look the cell and notebook up again, updating the placeholder flag.
    ///
    /// Returns `true` once both resolve and the cell belongs to the notebook.
    pub fn resolve(&mut self, resolver: &dyn NotebookResolver) -> bool {
        let notebook = resolver.find_notebook(&self.notebook_id);
        let cell = resolver.find_cell(&self.cell_id);

        self.placeholder = match (notebook, cell) {
            (Some(notebook), Some(cell)) => cell.notebook_id() != notebook.id(),
            _ => true,
        };
        !self.placeholder
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn cell_id(&self) -> &str {
        &self.cell_id
    }

    pub fn notebook_id(&self) -> &str {
        &self.notebook_id
    }

    pub fn pos(&self) -> WidgetPosition {
        self.pos
    }

    pub(crate) fn set_pos(&mut self, pos: WidgetPosition) {
        self.pos = pos;
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Locked widgets are not pushed around by the overlap cascade
    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    pub fn is_editable(&self) -> bool {
        self.mode != Mode::Present
    }

    pub fn info(&self) -> WidgetInfo {
        WidgetInfo {
            widget_id: self.id,
            cell_id: self.cell_id.clone(),
            notebook_id: self.notebook_id.clone(),
            pos: self.pos,
            removed: false,
        }
    }

    /// Whether this widget overlaps `area`, and which way it has to move to
    /// get clear of it
    pub fn overlaps(&self, area: &WidgetPosition) -> Option<Overlap> {
        self.pos.overlap_with(area).map(|direction| Overlap {
            direction,
            widget: self.id,
        })
    }

    /// Both coordinates are relative to the dashboard
    pub fn contains_point(&self, x: i64, y: i64) -> bool {
        self.pos.contains_point(x, y)
    }

    /// Start translating pointer input. Widgets in present mode ignore it.
    pub fn begin_gesture(&self, kind: GestureKind, x: i64, y: i64) -> Option<Gesture> {
        if !self.is_editable() {
            return None;
        }
        Some(Gesture {
            widget: self.id,
            kind,
            press_x: x,
            press_y: y,
            origin: self.pos,
        })
    }

    /// Rectangle shifted by a keyboard bump
    pub fn bump(&self, direction: Direction, distance: i64) -> WidgetPosition {
        match direction {
            Direction::Up => self.pos.translate(0, -distance),
            Direction::Down => self.pos.translate(0, distance),
            Direction::Left => self.pos.translate(-distance, 0),
            Direction::Right => self.pos.translate(distance, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureKind {
    Drag,
    Resize(Corner),
}

/// A pointer press on a widget, turned into proposed rectangles as the
/// pointer moves. The widget's stored position is never touched; callers
/// hand proposals to the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gesture {
    widget: Ulid,
    kind: GestureKind,
    press_x: i64,
    press_y: i64,
    origin: WidgetPosition,
}

impl Gesture {
    pub fn widget(&self) -> Ulid {
        self.widget
    }

    pub fn kind(&self) -> GestureKind {
        self.kind
    }

    pub fn origin(&self) -> WidgetPosition {
        self.origin
    }

    pub fn exceeds_threshold(&self, x: i64, y: i64, threshold: i64) -> bool {
        (x - self.press_x).abs() >= threshold || (y - self.press_y).abs() >= threshold
    }

    /// Rectangle for the pointer at `(x, y)`.
    ///
    /// Resizes keep the edges opposite the dragged corner fixed and never go
    /// below the minimum size.
    pub fn propose(&self, x: i64, y: i64, min_width: i64, min_height: i64) -> WidgetPosition {
        let dx = x - self.press_x;
        let dy = y - self.press_y;
        let o = self.origin;

        let corner = match self.kind {
            GestureKind::Drag => return o.translate(dx, dy),
            GestureKind::Resize(corner) => corner,
        };

        let grow_right = matches!(corner, Corner::TopRight | Corner::BottomRight);
        let grow_down = matches!(corner, Corner::BottomLeft | Corner::BottomRight);

        let width = if grow_right { o.width + dx } else { o.width - dx }.max(min_width);
        let height = if grow_down { o.height + dy } else { o.height - dy }.max(min_height);
        let left = if grow_right { o.left } else { o.right() - width };
        let top = if grow_down { o.top } else { o.bottom() - height };

        WidgetPosition::new(left, top, width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notebook::NotebookTracker;

    fn tracker() -> NotebookTracker {
        let mut tracker = NotebookTracker::new();
        tracker.add_notebook("nb-1", "a.ipynb");
        tracker.add_cell("nb-1", "cell-1").unwrap();
        tracker
    }

    fn info(cell: &str, notebook: &str) -> WidgetInfo {
        WidgetInfo::new(cell, notebook, WidgetPosition::new(100, 100, 200, 100))
    }

    #[test]
    fn test_resolved_widget() {
        let widget = CellOutputWidget::new(&info("cell-1", "nb-1"), &tracker());
        assert!(!widget.is_placeholder());
        assert_eq!(widget.mode(), Mode::GridEdit);
        assert_eq!(widget.info().cell_id, "cell-1");
    }

    #[test]
    fn test_placeholder_when_unresolved() {
        let tracker = tracker();
        assert!(CellOutputWidget::new(&info("missing", "nb-1"), &tracker).is_placeholder());
        assert!(CellOutputWidget::new(&info("cell-1", "nb-2"), &tracker).is_placeholder());
    }

    #[test]
    fn test_placeholder_resolves_later() {
        let mut tracker = NotebookTracker::new();
        let mut widget = CellOutputWidget::new(&info("cell-1", "nb-1"), &tracker);
        assert!(widget.is_placeholder());

        tracker.add_notebook("nb-1", "a.ipynb");
        tracker.add_cell("nb-1", "cell-1").unwrap();
        assert!(widget.resolve(&tracker));
        assert!(!widget.is_placeholder());
    }

    #[test]
    fn test_overlaps_reports_direction() {
        let widget = CellOutputWidget::new(&info("cell-1", "nb-1"), &tracker());

        let above = WidgetPosition::new(100, 0, 200, 150);
        let overlap = widget.overlaps(&above).unwrap();
        assert_eq!(overlap.direction, Direction::Down);
        assert_eq!(overlap.widget, widget.id());

        assert!(widget.overlaps(&WidgetPosition::new(400, 400, 10, 10)).is_none());
        assert!(widget.contains_point(150, 150));
        assert!(!widget.contains_point(350, 150));
    }

    #[test]
    fn test_no_gestures_in_present_mode() {
        let mut widget = CellOutputWidget::new(&info("cell-1", "nb-1"), &tracker());
        widget.set_mode(Mode::Present);
        assert!(widget.begin_gesture(GestureKind::Drag, 0, 0).is_none());

        widget.set_mode(Mode::FreeEdit);
        assert!(widget.begin_gesture(GestureKind::Drag, 0, 0).is_some());
    }

    #[test]
    fn test_drag_gesture() {
        let widget = CellOutputWidget::new(&info("cell-1", "nb-1"), &tracker());
        let gesture = widget.begin_gesture(GestureKind::Drag, 150, 150).unwrap();

        assert!(!gesture.exceeds_threshold(153, 152, DRAG_THRESHOLD));
        assert!(gesture.exceeds_threshold(150, 155, DRAG_THRESHOLD));
        assert_eq!(
            gesture.propose(170, 140, MIN_WIDTH, MIN_HEIGHT),
            WidgetPosition::new(120, 90, 200, 100)
        );
    }

    #[test]
    fn test_resize_gestures() {
        let widget = CellOutputWidget::new(&info("cell-1", "nb-1"), &tracker());
        let resize = |corner| widget.begin_gesture(GestureKind::Resize(corner), 0, 0).unwrap();

        assert_eq!(
            resize(Corner::BottomRight).propose(20, 30, MIN_WIDTH, MIN_HEIGHT),
            WidgetPosition::new(100, 100, 220, 130)
        );
        assert_eq!(
            resize(Corner::TopLeft).propose(20, 30, MIN_WIDTH, MIN_HEIGHT),
            WidgetPosition::new(120, 130, 180, 70)
        );
        assert_eq!(
            resize(Corner::TopRight).propose(-20, -10, MIN_WIDTH, MIN_HEIGHT),
            WidgetPosition::new(100, 90, 180, 110)
        );
        // Shrinking past the minimum keeps the right edge in place
        assert_eq!(
            resize(Corner::BottomLeft).propose(500, 0, MIN_WIDTH, MIN_HEIGHT),
            WidgetPosition::new(290, 100, 10, 100)
        );
    }

    #[test]
    fn test_bump() {
        let widget = CellOutputWidget::new(&info("cell-1", "nb-1"), &tracker());
        assert_eq!(
            widget.bump(Direction::Left, BUMP_DISTANCE),
            WidgetPosition::new(90, 100, 200, 100)
        );
        assert_eq!(widget.bump(Direction::Down, 1), WidgetPosition::new(100, 101, 200, 100));
    }
}
