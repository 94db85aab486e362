// Helper functions to build dashboards and layouts for integration tests
#![allow(dead_code)]

use notebook_dashboard::{
    ContentStore, DashboardController, DashboardSettings, HeadlessSurface, LayoutEngine, Mode,
    NotebookTracker, WidgetInfo, WidgetPosition, WidgetRecordStore,
};
use std::collections::BTreeMap;
use ulid::Ulid;

pub const DASHBOARD_PATH: &str = "dashboards/sales.dashboard";

/// Two open notebooks: `nb-1` with cells `cell-1`/`cell-2`, `nb-2` with `cell-3`
pub fn tracker() -> NotebookTracker {
    let mut tracker = NotebookTracker::new();
    tracker.add_notebook("nb-1", "notebooks/revenue.ipynb");
    tracker.add_cell("nb-1", "cell-1").unwrap();
    tracker.add_cell("nb-1", "cell-2").unwrap();
    tracker.add_notebook("nb-2", "notebooks/costs.ipynb");
    tracker.add_cell("nb-2", "cell-3").unwrap();
    tracker
}

/// Empty layout with an unbounded canvas
pub fn layout(mode: Mode) -> LayoutEngine {
    let mut layout = LayoutEngine::new(WidgetRecordStore::new(1), Box::new(HeadlessSurface));
    layout.set_mode(mode).unwrap();
    layout
}

pub fn controller(mode: Mode, contents: Box<dyn ContentStore>) -> DashboardController {
    let settings = DashboardSettings {
        mode,
        ..Default::default()
    };
    DashboardController::new(settings, Box::new(tracker()), contents, Box::new(HeadlessSurface))
        .with_path(DASHBOARD_PATH)
}

pub fn widget(cell: &str, notebook: &str, left: i64, top: i64, width: i64, height: i64) -> WidgetInfo {
    WidgetInfo::new(cell, notebook, WidgetPosition::new(left, top, width, height))
}

/// Rectangles currently on the canvas, by widget id
pub fn rects(layout: &LayoutEngine) -> BTreeMap<Ulid, WidgetPosition> {
    layout.widgets().map(|w| (w.id(), w.pos())).collect()
}

/// Live rectangles recorded in the widget store, by widget id
pub fn stored_rects(store: &WidgetRecordStore) -> BTreeMap<Ulid, WidgetPosition> {
    store.get_widgets().map(|w| (w.widget_id, w.pos)).collect()
}
