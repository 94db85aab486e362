// End-to-end dashboard behaviour: layout, history and persistence

mod fixtures;

use assert_matches::assert_matches;
use fixtures::{controller, layout, rects, stored_rects, tracker, widget, DASHBOARD_PATH};
use notebook_dashboard::{
    Clipboard, ContentStore, DashboardContent, DashboardController, DashboardError,
    DashboardSettings, FsContentStore, HeadlessSurface, LayoutEngine, MemoryContentStore, Mode,
    NotebookResolver, NotebookTracker, WidgetPosition, WidgetRecordStore,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tempfile::TempDir;
use ulid::Ulid;

// ========== Layout Scenarios ==========

#[test]
fn test_grid_edit_rounds_size_up_to_tiles() {
    let mut layout = layout(Mode::GridEdit);
    let w1 = widget("cell-1", "nb-1", 0, 0, 100, 100);
    layout.add_widget(&w1, &tracker()).unwrap();

    assert_eq!(
        layout.get_widget(w1.widget_id).unwrap().pos(),
        WidgetPosition::new(0, 0, 128, 128)
    );
}

#[test]
fn test_overlapping_widget_is_pushed_down() {
    let mut layout = layout(Mode::FreeEdit);
    let resolver = tracker();
    let w1 = widget("cell-1", "nb-1", 0, 0, 100, 100);
    let w2 = widget("cell-2", "nb-1", 50, 50, 100, 100);
    layout.add_widget(&w1, &resolver).unwrap();
    layout.add_widget(&w2, &resolver).unwrap();

    let p1 = layout.get_widget(w1.widget_id).unwrap().pos();
    let p2 = layout.get_widget(w2.widget_id).unwrap().pos();
    assert_eq!(p2.top, 100);
    assert!(!p1.intersects(&p2));
}

#[test]
fn test_move_past_fixed_width_slides_back() {
    let mut layout = layout(Mode::FreeEdit);
    layout.set_width(800);
    let w1 = widget("cell-1", "nb-1", 0, 0, 200, 100);
    layout.add_widget(&w1, &tracker()).unwrap();

    layout
        .update_widget(w1.widget_id, WidgetPosition::new(700, 0, 200, 100))
        .unwrap();
    let pos = layout.get_widget(w1.widget_id).unwrap().pos();
    assert_eq!(pos.width, 200);
    assert_eq!(pos.right(), 800);
}

#[test]
fn test_batch_commits_once_and_undoes_together() {
    let mut layout = layout(Mode::FreeEdit);
    let resolver = tracker();
    let widgets: Vec<_> = (0..3)
        .map(|i| widget("cell-1", "nb-1", i * 200, 0, 100, 100))
        .collect();
    for w in &widgets {
        layout.add_widget(w, &resolver).unwrap();
    }
    let before = rects(&layout);
    let history = layout.widgetstore().history_len();

    layout.start_batch();
    for w in &widgets {
        layout
            .update_widget(w.widget_id, w.pos.translate(0, 500))
            .unwrap();
    }
    layout.end_batch().unwrap();

    assert_eq!(layout.widgetstore().history_len(), history + 1);
    layout.undo(&resolver).unwrap();
    assert_eq!(rects(&layout), before);
}

// ========== Widget Store Scenarios ==========

#[test]
fn test_move_missing_widget_returns_false() {
    let mut store = WidgetRecordStore::new(1);
    assert!(!store
        .move_widget(Ulid::new(), WidgetPosition::new(0, 0, 10, 10))
        .unwrap());
    assert_eq!(store.get_widgets().count(), 0);
}

#[test]
fn test_delete_keeps_tombstone_and_undo_restores_it() {
    let mut store = WidgetRecordStore::new(1);
    let w1 = widget("cell-1", "nb-1", 40, 40, 100, 100);
    store.add_widget(&w1).unwrap();

    assert!(store.delete_widget(w1.widget_id).unwrap());
    let tombstone = store.get_widget(w1.widget_id).unwrap();
    assert!(tombstone.removed);
    assert_eq!(store.get_widgets().count(), 0);

    store.undo(None).unwrap();
    assert_eq!(store.get_widget(w1.widget_id), Some(w1.clone()));
    assert_eq!(store.get_widgets().collect::<Vec<_>>(), vec![w1]);
}

// ========== Controller Scenarios ==========

#[test]
fn test_save_to_metadata_with_two_notebooks_writes_nothing() {
    let mut dashboard = controller(Mode::FreeEdit, Box::new(MemoryContentStore::new()));
    dashboard
        .add_widget(&widget("cell-1", "nb-1", 0, 0, 100, 100))
        .unwrap();
    dashboard
        .add_widget(&widget("cell-3", "nb-2", 300, 0, 100, 100))
        .unwrap();

    let err = dashboard.save_to_metadata().unwrap_err();
    assert_matches!(
        err.downcast_ref::<DashboardError>(),
        Some(DashboardError::MixedNotebooks { .. })
    );
    for notebook in ["nb-1", "nb-2"] {
        assert!(dashboard
            .resolver()
            .notebook_metadata(notebook, "dashboard")
            .is_none());
    }
}

#[test]
fn test_cut_paste_between_dashboards() {
    let mut first = controller(Mode::FreeEdit, Box::new(MemoryContentStore::new()));
    let mut second = controller(Mode::FreeEdit, Box::new(MemoryContentStore::new()));
    let w1 = widget("cell-1", "nb-1", 100, 100, 100, 100);
    first.add_widget(&w1).unwrap();

    let mut clipboard = Clipboard::new();
    assert_eq!(first.cut(&[w1.widget_id], &mut clipboard).unwrap(), 1);
    assert!(first.layout().is_empty());

    let pasted = second.paste(&clipboard).unwrap();
    assert_eq!(pasted.len(), 1);
    assert_eq!(
        second.layout().get_widget(pasted[0]).unwrap().pos(),
        WidgetPosition::new(120, 120, 100, 100)
    );
}

#[test]
fn test_memory_save_load_roundtrip() {
    let mut dashboard = controller(Mode::FreeEdit, Box::new(MemoryContentStore::new()));
    dashboard.set_name("Quarterly");
    dashboard
        .add_widget(&widget("cell-1", "nb-1", 0, 0, 300, 200))
        .unwrap();
    dashboard
        .add_widget(&widget("cell-3", "nb-2", 320, 0, 300, 200))
        .unwrap();
    dashboard.save().unwrap();

    let text = dashboard.contents().load(DASHBOARD_PATH).unwrap();
    let content = DashboardContent::from_json_str(&text).unwrap();
    assert_eq!(content.metadata.name, "Quarterly");
    assert_eq!(
        content.paths.get("../notebooks/revenue.ipynb"),
        Some(&"nb-1".to_string())
    );
    assert_eq!(content.output_count(), 2);

    let mut contents = MemoryContentStore::new();
    contents.insert(DASHBOARD_PATH, text);
    let mut reloaded = controller(Mode::FreeEdit, Box::new(contents));
    reloaded.load().unwrap();

    let mut original: Vec<_> = dashboard.layout().widgets().map(|w| w.pos()).collect();
    let mut loaded: Vec<_> = reloaded.layout().widgets().map(|w| w.pos()).collect();
    original.sort_by_key(|p| (p.left, p.top));
    loaded.sort_by_key(|p| (p.left, p.top));
    assert_eq!(loaded, original);
    assert_eq!(reloaded.name(), "Quarterly");
}

#[test]
fn test_fs_save_load_with_closed_notebook() {
    let temp_dir = TempDir::new().unwrap();
    let mut contents = FsContentStore::open(temp_dir.path()).unwrap();
    contents
        .save("notebooks/revenue.ipynb", "{\"cells\": []}")
        .unwrap();

    let mut dashboard = controller(Mode::FreeEdit, Box::new(contents.clone()));
    dashboard
        .add_widget(&widget("cell-1", "nb-1", 10, 10, 100, 100))
        .unwrap();
    dashboard.save().unwrap();
    assert!(temp_dir.path().join(DASHBOARD_PATH).is_file());

    // nb-1 is not open here, but its file exists, so widgets load as placeholders
    let mut reloaded = DashboardController::new(
        DashboardSettings {
            mode: Mode::FreeEdit,
            ..Default::default()
        },
        Box::new(NotebookTracker::new()),
        Box::new(contents),
        Box::new(HeadlessSurface),
    )
    .with_path(DASHBOARD_PATH);
    reloaded.load().unwrap();

    let widget = reloaded.layout().widgets().next().unwrap();
    assert!(widget.is_placeholder());
    assert_eq!(widget.pos(), WidgetPosition::new(10, 10, 100, 100));
    assert_eq!(reloaded.layout().len(), 1);
}

#[test]
fn test_load_fails_for_missing_notebook() {
    let temp_dir = TempDir::new().unwrap();
    let mut contents = FsContentStore::open(temp_dir.path()).unwrap();
    contents
        .save(
            DASHBOARD_PATH,
            r#"{
                "version": 1,
                "metadata": { "name": "Broken", "dashboardWidth": 0, "dashboardHeight": 0 },
                "paths": { "../notebooks/gone.ipynb": "nb-gone" },
                "outputs": {}
            }"#,
        )
        .unwrap();

    let mut dashboard = controller(Mode::FreeEdit, Box::new(contents));
    let err = dashboard.load().unwrap_err();
    assert_eq!(
        err.downcast_ref::<DashboardError>(),
        Some(&DashboardError::MissingNotebook {
            notebook_id: "nb-gone".to_string(),
            path: "notebooks/gone.ipynb".to_string(),
        })
    );
    assert!(dashboard.layout().is_empty());
}

#[test]
fn test_load_rejects_position_that_would_overflow() {
    let temp_dir = TempDir::new().unwrap();
    let mut contents = FsContentStore::open(temp_dir.path()).unwrap();
    contents
        .save(
            DASHBOARD_PATH,
            r#"{
                "version": 1,
                "metadata": { "name": "Far away", "dashboardWidth": 0, "dashboardHeight": 0 },
                "paths": { "../notebooks/revenue.ipynb": "nb-1" },
                "outputs": {
                    "nb-1": [
                        { "cellId": "cell-1", "pos": { "left": 4611686018427387913, "top": 0, "width": 10, "height": 10 } }
                    ]
                }
            }"#,
        )
        .unwrap();

    let mut dashboard = controller(Mode::FreeEdit, Box::new(contents));
    let err = dashboard.load().unwrap_err();
    assert_matches!(
        err.downcast_ref::<DashboardError>(),
        Some(DashboardError::PositionOutOfRange { cell_id, .. }) if cell_id == "cell-1"
    );

    // The canvas is untouched and stays usable
    assert!(dashboard.layout().is_empty());
    let w1 = widget("cell-2", "nb-1", 0, 0, 10, 10);
    assert!(dashboard.add_widget(&w1).unwrap());
    assert_eq!(
        dashboard.layout().get_widget(w1.widget_id).unwrap().pos(),
        WidgetPosition::new(0, 0, 10, 10)
    );
}

// ========== Replay Properties ==========

#[derive(Debug, Clone)]
enum Op {
    Add(i64, i64, i64, i64),
    Move(usize, i64, i64),
    Delete(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0i64..400, 0i64..400, 10i64..150, 10i64..150).prop_map(|(l, t, w, h)| Op::Add(l, t, w, h)),
        (any::<usize>(), 0i64..400, 0i64..400).prop_map(|(i, l, t)| Op::Move(i, l, t)),
        any::<usize>().prop_map(Op::Delete),
    ]
}

fn apply(layout: &mut LayoutEngine, resolver: &dyn NotebookResolver, op: &Op) {
    let ids: Vec<Ulid> = layout.widgets().map(|w| w.id()).collect();
    match *op {
        Op::Add(left, top, width, height) => {
            let info = widget("cell-1", "nb-1", left, top, width, height);
            layout.add_widget(&info, resolver).unwrap();
        }
        Op::Move(i, left, top) if !ids.is_empty() => {
            let id = ids[i % ids.len()];
            let pos = layout.get_widget(id).unwrap().pos();
            layout
                .update_widget(id, WidgetPosition::new(left, top, pos.width, pos.height))
                .unwrap();
        }
        Op::Delete(i) if !ids.is_empty() => {
            layout.delete_widget(ids[i % ids.len()]).unwrap();
        }
        Op::Move(..) | Op::Delete(_) => {}
    }
}

proptest! {
    #[test]
    fn replayed_history_matches_live_layout(ops in prop::collection::vec(op_strategy(), 1..20)) {
        let resolver = tracker();
        let mut layout = layout(Mode::FreeEdit);
        for op in &ops {
            apply(&mut layout, &resolver, op);
        }
        let live = rects(&layout);
        prop_assert_eq!(&stored_rects(layout.widgetstore()), &live);

        let mut replica = WidgetRecordStore::new(2);
        for transaction in layout.widgetstore().store().history() {
            replica.apply_transaction(transaction).unwrap();
        }
        prop_assert_eq!(&stored_rects(&replica), &live);

        let state = layout.widgetstore().serialize().unwrap();
        let restored = WidgetRecordStore::restore(1, &state).unwrap();
        let mut rebuilt = LayoutEngine::new(restored, Box::new(HeadlessSurface));
        rebuilt.update_layout_from_store(&resolver);
        prop_assert_eq!(&rects(&rebuilt), &live);
    }

    #[test]
    fn undo_all_then_redo_all_is_identity(ops in prop::collection::vec(op_strategy(), 1..12)) {
        let resolver = tracker();
        let mut layout = layout(Mode::FreeEdit);
        for op in &ops {
            apply(&mut layout, &resolver, op);
        }
        let live = rects(&layout);

        while layout.widgetstore().has_undo() {
            layout.undo(&resolver).unwrap();
        }
        prop_assert!(layout.is_empty());

        while layout.widgetstore().has_redo() {
            layout.redo(&resolver).unwrap();
        }
        prop_assert_eq!(rects(&layout), live);
    }
}
