use std::fmt::Write as _;
use std::rc::Rc;
use std::time::Duration;

use insta::assert_snapshot;
use proptest::prelude::*;
use proptest_derive::Arbitrary;
use smithay::utils::{Logical, Point, Rectangle, Size};

use super::*;
use crate::output::ElementKind;
use crate::surface::{Commit, SnapshotKind, Surface, SurfaceId, SurfaceKind, SurfaceState};

fn rect(x: i32, y: i32, w: i32, h: i32) -> Rectangle<i32, Logical> {
    Rectangle::new(Point::from((x, y)), Size::from((w, h)))
}

fn hidden_panel() -> Panel {
    Panel {
        is_visible: false,
        ..Panel::default()
    }
}

struct TestWorkspace {
    ws: Workspace,
    /// Test ids of the windows that exist, with their surface ids.
    windows: Vec<(usize, SurfaceId)>,
}

impl TestWorkspace {
    fn new(options: Options) -> Self {
        let mut ws = Workspace::new(0, Rc::new(options));
        ws.notify_output_mode(Size::from((1280, 720)));
        Self {
            ws,
            windows: Vec::new(),
        }
    }

    fn surface_id(&self, id: usize) -> Option<SurfaceId> {
        self.windows
            .iter()
            .find(|(test_id, _)| *test_id == id)
            .map(|(_, surface)| *surface)
    }
}

/// Adds a window, sizes it, commits a matching buffer and maps it.
fn open_window(ws: &mut Workspace, geometry: Rectangle<i32, Logical>) -> SurfaceId {
    let id = ws.add_surface(Surface::new_toplevel()).unwrap();
    ws.configure_surface(
        id,
        SurfaceState::default().with_geometry(geometry),
        ConfigureFlags::GEOMETRY,
    );
    ws.commit_surface(id, Commit::with_buffer(geometry.size));
    ws.map_surface(id).unwrap();
    ws.verify_invariants();
    id
}

/// Acknowledges the pending state like a well-behaved client would.
fn ack(ws: &mut Workspace, id: SurfaceId) {
    let size = ws.surface(id).unwrap().pending().size();
    ws.commit_surface(id, Commit::with_buffer(size));
    ws.verify_invariants();
}

fn format_state(state: &SurfaceState) -> String {
    let mut buf = format!("{},{} {}×{}", state.x, state.y, state.width, state.height);
    let flags = [
        (state.is_activated, "activated"),
        (state.is_maximized, "maximized"),
        (state.is_minimized, "minimized"),
        (state.is_fullscreen, "fullscreen"),
    ];
    for (_, name) in flags.iter().filter(|(set, _)| *set) {
        buf.push(' ');
        buf.push_str(name);
    }
    buf
}

/// Formats the windows of the workspace, naming them A, B, C... in the order they were added.
fn format_workspace(ws: &Workspace) -> String {
    let name = |id: &SurfaceId| {
        let idx = ws.surfaces().iter().position(|s| s.id() == *id).unwrap();
        char::from(b'A' + idx as u8)
    };

    let mut lines = Vec::new();
    for surface in ws.surfaces() {
        let mut line = format!("{}: {}", name(&surface.id()), format_state(surface.current()));
        if surface.pending() != surface.current() {
            write!(line, " -> {}", format_state(surface.pending())).unwrap();
        }
        if surface.is_transaction_running() {
            line.push_str(" (waiting)");
        }
        lines.push(line);
    }

    let names = |ids: &[SurfaceId]| ids.iter().map(|id| name(id).to_string()).collect::<Vec<_>>();
    lines.push(format!("mapped: {}", names(ws.mapped()).join(" ")));
    lines.push(format!("visible: {}", names(ws.visible()).join(" ")));
    lines.push(format!("sentinel: {}", ws.transaction().sentinel()));
    lines.join("\n")
}

#[test]
fn maximize_waits_for_client() {
    let options = Options {
        panel: hidden_panel(),
        ..Options::default()
    };
    let mut ws = Workspace::new(0, Rc::new(options));
    ws.notify_output_mode(Size::from((640, 480)));

    let id = ws.add_surface(Surface::new_toplevel()).unwrap();

    // Not mapped yet, so this applies right away.
    ws.configure_surface(
        id,
        SurfaceState::default().with_geometry(rect(0, 0, 300, 200)),
        ConfigureFlags::GEOMETRY,
    );
    assert!(!ws.transaction().is_active());
    ws.commit_surface(id, Commit::with_buffer((300, 200)));
    ws.map_surface(id).unwrap();
    ws.verify_invariants();
    assert_eq!(ws.visible(), [id]);
    let _ = ws.surface_mut(id).unwrap().take_configure();

    ws.set_maximized(id, true);
    ws.verify_invariants();

    assert_eq!(ws.transaction().sentinel(), 1);
    let snapshot = ws.transaction().snapshot().unwrap();
    assert_eq!(snapshot.surfaces.len(), 1);
    assert_eq!(
        snapshot.surfaces[0].get(SnapshotKind::Normal).unwrap().geometry,
        rect(0, 0, 300, 200)
    );

    let surface = ws.surface(id).unwrap();
    assert!(surface.is_transaction_running());
    assert_eq!(surface.current().geometry(), rect(0, 0, 300, 200));
    assert_eq!(surface.pending().geometry(), rect(0, 0, 640, 480));

    let configure = ws.surface_mut(id).unwrap().take_configure().unwrap();
    assert_eq!(configure.state.size(), Size::from((640, 480)));
    assert!(configure.state.is_maximized);

    // While waiting, the snapshot is drawn instead of the window.
    assert!(ws
        .render_elements()
        .iter()
        .all(|e| matches!(e.kind, ElementKind::Snapshot(_))));

    ws.commit_surface(id, Commit::with_buffer((640, 480)));
    ws.verify_invariants();

    assert_eq!(ws.transaction().sentinel(), 0);
    assert!(ws.transaction().snapshot().is_none());
    let surface = ws.surface(id).unwrap();
    assert_eq!(surface.current(), surface.pending());
    assert_eq!(surface.current().geometry(), rect(0, 0, 640, 480));
    assert!(surface.current().is_maximized);
    assert_eq!(ws.visible(), [id]);
}

#[test]
fn maximize_and_restore() {
    let mut ws = Workspace::new(0, Rc::new(Options::default()));
    ws.notify_output_mode(Size::from((640, 480)));

    let a = open_window(&mut ws, rect(10, 10, 200, 100));
    let _b = open_window(&mut ws, rect(300, 50, 200, 200));

    ws.set_maximized(a, true);
    ws.verify_invariants();
    assert_snapshot!(format_workspace(&ws), @r"
    A: 10,10 200×100 maximized -> 0,32 640×448 maximized (waiting)
    B: 300,50 200×200 activated
    mapped: B A
    visible: B A
    sentinel: 1
    ");

    // Drawing the old layout: bottom to top, decoration below the surface.
    let kinds: Vec<_> = ws.render_elements().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        [
            ElementKind::Snapshot(SnapshotKind::Decoration),
            ElementKind::Snapshot(SnapshotKind::Normal),
            ElementKind::Snapshot(SnapshotKind::Decoration),
            ElementKind::Snapshot(SnapshotKind::Normal),
        ]
    );
    assert_eq!(ws.render_elements()[1].geometry, rect(10, 10, 200, 100));
    assert_eq!(ws.render_elements()[0].geometry, rect(2, 2, 216, 116));

    ack(&mut ws, a);
    ws.focus_surface(Some(a));
    ws.verify_invariants();

    ws.set_maximized(a, false);
    ws.verify_invariants();
    assert_snapshot!(format_workspace(&ws), @r"
    A: 0,32 640×448 activated maximized -> 10,10 200×100 activated (waiting)
    B: 300,50 200×200
    mapped: A B
    visible: A B
    sentinel: 1
    ");

    ack(&mut ws, a);
    assert_eq!(ws.surface(a).unwrap().current().geometry(), rect(10, 10, 200, 100));
    assert!(!ws.transaction().is_active());
}

#[test]
fn configure_is_idempotent() {
    let mut ws = Workspace::new(0, Rc::new(Options::default()));
    ws.notify_output_mode(Size::from((640, 480)));
    let id = open_window(&mut ws, rect(0, 0, 100, 100));
    let _ = ws.surface_mut(id).unwrap().take_configure();

    let state = SurfaceState::default().with_geometry(rect(0, 0, 200, 200));
    ws.configure_surface(id, state, ConfigureFlags::GEOMETRY);
    ws.verify_invariants();
    assert!(ws.surface_mut(id).unwrap().take_configure().is_some());
    let serial = ws.transaction().serial();

    ws.configure_surface(id, state, ConfigureFlags::GEOMETRY);
    ws.verify_invariants();
    assert!(ws.surface_mut(id).unwrap().take_configure().is_none());
    assert_eq!(ws.transaction().sentinel(), 1);
    assert_eq!(ws.transaction().serial(), serial);
}

#[test]
fn compute_layout_is_idempotent() {
    let mut ws = Workspace::new(0, Rc::new(Options::default()));
    ws.notify_output_mode(Size::from((640, 480)));
    let a = open_window(&mut ws, rect(0, 0, 100, 100));
    let b = open_window(&mut ws, rect(50, 50, 100, 100));
    ws.set_maximized(a, true);
    ws.set_minimized(b, true);
    ack(&mut ws, a);

    let before = format_workspace(&ws);
    let _ = ws.surface_mut(a).unwrap().take_configure();
    let _ = ws.surface_mut(b).unwrap().take_configure();

    ws.compute_layout();
    ws.compute_layout();
    ws.verify_invariants();

    assert_eq!(format_workspace(&ws), before);
    assert!(ws.surface_mut(a).unwrap().take_configure().is_none());
    assert!(ws.surface_mut(b).unwrap().take_configure().is_none());
}

#[test]
fn moving_does_not_start_transaction() {
    let mut ws = Workspace::new(0, Rc::new(Options::default()));
    ws.notify_output_mode(Size::from((640, 480)));
    let id = open_window(&mut ws, rect(0, 0, 100, 100));

    ws.move_surface(id, Point::from((50, 60)));
    ws.verify_invariants();
    assert!(!ws.transaction().is_active());
    assert_eq!(ws.surface(id).unwrap().current().geometry(), rect(50, 60, 100, 100));
}

#[test]
fn resize_back_to_current_size_resolves_participant() {
    let mut ws = Workspace::new(0, Rc::new(Options::default()));
    ws.notify_output_mode(Size::from((640, 480)));
    let id = open_window(&mut ws, rect(0, 0, 100, 100));

    ws.configure_surface(
        id,
        SurfaceState::default().with_geometry(rect(0, 0, 200, 200)),
        ConfigureFlags::GEOMETRY,
    );
    assert!(ws.transaction().is_active());

    ws.configure_surface(
        id,
        SurfaceState::default().with_geometry(rect(0, 0, 100, 100)),
        ConfigureFlags::GEOMETRY,
    );
    ws.verify_invariants();
    assert!(!ws.transaction().is_active());
    assert!(ws.transaction().snapshot().is_none());
}

#[test]
fn transaction_waits_for_every_participant() {
    let mut ws = Workspace::new(0, Rc::new(Options::default()));
    ws.notify_output_mode(Size::from((1280, 720)));
    let a = open_window(&mut ws, rect(0, 0, 100, 100));
    let b = open_window(&mut ws, rect(200, 0, 100, 100));

    for (id, x) in [(a, 0), (b, 200)] {
        ws.configure_surface(
            id,
            SurfaceState::default().with_geometry(rect(x, 0, 150, 150)),
            ConfigureFlags::GEOMETRY,
        );
    }
    ws.verify_invariants();
    assert_eq!(ws.transaction().sentinel(), 2);

    // Wrong size doesn't count.
    ws.commit_surface(a, Commit::with_buffer((120, 120)));
    ws.verify_invariants();
    assert_eq!(ws.transaction().sentinel(), 2);

    // Neither does a commit without a buffer.
    ws.commit_surface(
        a,
        Commit {
            buffer: None,
            damage: Some(rect(0, 0, 10, 10)),
        },
    );
    assert_eq!(ws.transaction().sentinel(), 2);

    ack(&mut ws, a);
    assert_eq!(ws.transaction().sentinel(), 1);
    // A is ready, but the snapshot still shows its old size.
    assert_eq!(ws.surface(a).unwrap().current().size(), Size::from((150, 150)));
    assert!(ws.transaction().snapshot().is_some());

    ack(&mut ws, b);
    assert_eq!(ws.transaction().sentinel(), 0);
    assert!(ws.transaction().snapshot().is_none());
    assert!(ws
        .render_elements()
        .iter()
        .all(|e| !matches!(e.kind, ElementKind::Snapshot(_))));
}

#[test]
fn timeout_forces_pending_state() {
    let mut ws = Workspace::new(0, Rc::new(Options::default()));
    ws.notify_output_mode(Size::from((640, 480)));
    let id = open_window(&mut ws, rect(20, 20, 100, 100));

    ws.configure_surface(
        id,
        SurfaceState::default().with_geometry(rect(20, 20, 200, 200)),
        ConfigureFlags::GEOMETRY,
    );
    let serial = ws.transaction().serial();

    // Stale watchdogs are ignored.
    assert!(!ws.on_transaction_timeout(serial.wrapping_sub(1)));
    assert!(ws.transaction().is_active());

    let _ = ws.take_damage();
    assert!(ws.on_transaction_timeout(serial));
    ws.verify_invariants();
    assert!(!ws.transaction().is_active());
    assert_eq!(ws.surface(id).unwrap().current().size(), Size::from((200, 200)));
    assert_eq!(ws.take_damage(), Some(rect(0, 0, 640, 480)));
    assert!(ws.take_redraw_request());

    // The second watchdog for the same transaction has nothing to do.
    assert!(!ws.on_transaction_timeout(serial));
}

#[test]
fn fatal_timeout() {
    let mut ws = Workspace::new(0, Rc::new(Options::default()));
    ws.notify_output_mode(Size::from((640, 480)));
    let id = open_window(&mut ws, rect(0, 0, 100, 100));

    ws.configure_surface(
        id,
        SurfaceState::default().with_geometry(rect(0, 0, 200, 200)),
        ConfigureFlags::GEOMETRY,
    );
    let start = ws.transaction().start_time().unwrap();
    let fatal = ws.options.fatal_transaction_timeout;

    assert!(!ws.check_fatal_timeout(start + fatal - Duration::from_millis(1)));
    assert!(ws.transaction().is_active());

    assert!(ws.check_fatal_timeout(start + fatal));
    ws.verify_invariants();
    assert!(!ws.transaction().is_active());
}

#[test]
fn removing_participant_commits() {
    let mut ws = Workspace::new(0, Rc::new(Options::default()));
    ws.notify_output_mode(Size::from((640, 480)));
    let a = open_window(&mut ws, rect(0, 0, 100, 100));
    let b = open_window(&mut ws, rect(200, 0, 100, 100));

    ws.configure_surface(
        a,
        SurfaceState::default().with_geometry(rect(0, 0, 200, 200)),
        ConfigureFlags::GEOMETRY,
    );
    assert!(ws.transaction().is_active());

    let removed = ws.remove_surface(a).unwrap();
    ws.verify_invariants();
    assert!(!ws.transaction().is_active());
    assert!(!removed.is_visible());
    assert_eq!(removed.current().size(), Size::from((200, 200)));
    assert_eq!(ws.visible(), [b]);
}

#[test]
fn removing_snapshotted_window_commits() {
    let mut ws = Workspace::new(0, Rc::new(Options::default()));
    ws.notify_output_mode(Size::from((640, 480)));
    let a = open_window(&mut ws, rect(0, 0, 100, 100));
    let b = open_window(&mut ws, rect(200, 0, 100, 100));

    ws.configure_surface(
        a,
        SurfaceState::default().with_geometry(rect(0, 0, 200, 200)),
        ConfigureFlags::GEOMETRY,
    );
    assert!(ws.transaction().references(b));

    // B doesn't take part, but the snapshot would keep drawing it.
    ws.remove_surface(b);
    ws.verify_invariants();
    assert!(!ws.transaction().is_active());
}

#[test]
fn transactions_can_be_disabled() {
    let options = Options {
        transactions: false,
        ..Options::default()
    };
    let mut ws = Workspace::new(0, Rc::new(options));
    ws.notify_output_mode(Size::from((640, 480)));
    let id = open_window(&mut ws, rect(0, 0, 100, 100));

    ws.set_maximized(id, true);
    ws.verify_invariants();
    assert!(!ws.transaction().is_active());
    assert_eq!(ws.surface(id).unwrap().current().geometry(), rect(0, 32, 640, 448));
}

#[test]
fn fullscreen_takes_whole_area() {
    let options = Options {
        transactions: false,
        ..Options::default()
    };
    let mut ws = Workspace::new(0, Rc::new(options));
    ws.notify_output_mode(Size::from((640, 480)));
    let a = open_window(&mut ws, rect(0, 0, 100, 100));
    let b = open_window(&mut ws, rect(0, 0, 100, 100));

    ws.set_maximized(a, true);
    ws.set_fullscreen(b, true);
    ws.verify_invariants();

    // B is focused, so it's the first one in the mapped order and wins.
    assert_eq!(ws.visible(), [b]);
    assert_eq!(ws.surface(b).unwrap().current().geometry(), rect(0, 0, 640, 480));
    assert!(!ws.surface(a).unwrap().is_visible());

    ws.focus_surface(Some(a));
    ws.verify_invariants();
    assert_eq!(ws.visible(), [a]);
    assert_eq!(ws.surface(a).unwrap().current().geometry(), rect(0, 32, 640, 448));

    ws.set_fullscreen(b, false);
    ws.verify_invariants();
    assert_eq!(ws.surface(b).unwrap().current().geometry(), rect(0, 0, 100, 100));
}

#[test]
fn minimize_refocuses() {
    let mut ws = Workspace::new(0, Rc::new(Options::default()));
    ws.notify_output_mode(Size::from((640, 480)));
    let a = open_window(&mut ws, rect(0, 0, 100, 100));
    let b = open_window(&mut ws, rect(0, 0, 100, 100));
    assert_eq!(ws.focused_surface(), Some(b));

    ws.set_minimized(b, true);
    ws.verify_invariants();
    assert_eq!(ws.focused_surface(), Some(a));
    assert_eq!(ws.visible(), [a]);
    assert!(ws.surface(a).unwrap().current().is_activated);
    assert!(!ws.surface(b).unwrap().current().is_activated);

    ws.set_minimized(a, true);
    ws.verify_invariants();
    assert_eq!(ws.focused_surface(), None);
    assert!(ws.visible().is_empty());

    // Focusing brings a window back.
    ws.focus_surface(Some(b));
    ws.verify_invariants();
    assert!(!ws.surface(b).unwrap().current().is_minimized);
    assert_eq!(ws.visible(), [b]);
}

#[test]
fn unmapping_focused_refocuses() {
    let mut ws = Workspace::new(0, Rc::new(Options::default()));
    ws.notify_output_mode(Size::from((640, 480)));
    let a = open_window(&mut ws, rect(0, 0, 100, 100));
    let b = open_window(&mut ws, rect(0, 0, 100, 100));

    ws.unmap_surface(b);
    ws.verify_invariants();
    assert_eq!(ws.focused_surface(), Some(a));
    assert_eq!(ws.mapped(), [a]);
    assert!(!ws.surface(b).unwrap().current().is_activated);
}

#[test]
fn interactive_resize() {
    let options = Options {
        transactions: false,
        ..Options::default()
    };
    let mut ws = Workspace::new(0, Rc::new(options));
    ws.notify_output_mode(Size::from((640, 480)));
    let id = open_window(&mut ws, rect(10, 10, 100, 100));

    assert!(ws.begin_interactive_resize(id));
    ws.configure_surface(
        id,
        SurfaceState::default().with_geometry(rect(10, 10, 150, 120)),
        ConfigureFlags::SIZE,
    );
    ws.cancel_interactive_resize(id);
    ws.verify_invariants();
    assert_eq!(ws.surface(id).unwrap().current().geometry(), rect(10, 10, 100, 100));

    assert!(ws.begin_interactive_resize(id));
    ws.end_interactive_resize(id, rect(20, 20, 300, 300));
    ws.verify_invariants();
    assert_eq!(ws.surface(id).unwrap().current().geometry(), rect(20, 20, 300, 300));
    assert!(ws.surface(id).unwrap().saved().is_none());

    ws.set_maximized(id, true);
    assert!(!ws.begin_interactive_resize(id));
}

#[test]
fn panel_shrinks_main_area() {
    let options = Options {
        transactions: false,
        ..Options::default()
    };
    let mut ws = Workspace::new(0, Rc::new(options));
    ws.notify_output_mode(Size::from((640, 480)));
    let id = open_window(&mut ws, rect(0, 0, 100, 100));
    ws.set_maximized(id, true);

    for (position, geometry) in [
        (PanelPosition::Top, rect(0, 40, 640, 440)),
        (PanelPosition::Bottom, rect(0, 0, 640, 440)),
        (PanelPosition::Left, rect(40, 0, 600, 480)),
        (PanelPosition::Right, rect(0, 0, 600, 480)),
    ] {
        ws.set_panel(Panel {
            position,
            size: 40,
            is_visible: true,
        });
        ws.verify_invariants();
        assert_eq!(ws.surface(id).unwrap().current().geometry(), geometry);
    }

    ws.set_panel(hidden_panel());
    assert_eq!(ws.surface(id).unwrap().current().geometry(), rect(0, 0, 640, 480));
}

#[test]
fn oversized_panel_leaves_empty_area() {
    let panel = Panel {
        position: PanelPosition::Left,
        size: 1000,
        is_visible: true,
    };
    let area = panel.main_area(rect(0, 0, 640, 480));
    assert_eq!(area.size, Size::from((0, 480)));
}

#[test]
fn panel_frozen_during_transaction() {
    let mut ws = Workspace::new(0, Rc::new(Options::default()));
    ws.notify_output_mode(Size::from((640, 480)));
    let id = open_window(&mut ws, rect(0, 0, 100, 100));
    ws.set_maximized(id, true);
    ack(&mut ws, id);

    let old = ws.panel();
    let new = Panel { size: 64, ..old };
    ws.set_panel(new);
    ws.verify_invariants();

    assert!(ws.transaction().is_active());
    assert_eq!(ws.panel(), new);
    assert_eq!(ws.effective_panel(), old);

    ack(&mut ws, id);
    assert_eq!(ws.effective_panel(), new);
}

#[test]
fn hit_testing_follows_stacking() {
    let mut ws = Workspace::new(0, Rc::new(Options::default()));
    ws.notify_output_mode(Size::from((640, 480)));
    let a = open_window(&mut ws, rect(0, 0, 100, 100));
    let b = open_window(&mut ws, rect(50, 50, 100, 100));

    let popup = ws.add_child(a, Surface::new(SurfaceKind::Temporary)).unwrap();
    ws.place_child(popup, rect(90, 90, 50, 50));

    // B is on top of A, but not of A's popup.
    assert_eq!(ws.surface_at(Point::from((60., 60.))).unwrap().0, b);
    assert_eq!(ws.surface_at(Point::from((10., 10.))).unwrap().0, a);

    ws.focus_surface(Some(a));
    let (hit, local) = ws.surface_at(Point::from((100., 100.))).unwrap();
    assert_eq!(hit, popup);
    assert_eq!(local, Point::from((10., 10.)));

    ws.set_pointer(Point::from((500., 500.)));
    assert!(ws.surface_under_pointer().is_none());
}

#[test]
fn damage_from_hidden_windows_is_dropped() {
    let mut ws = Workspace::new(0, Rc::new(Options::default()));
    ws.notify_output_mode(Size::from((640, 480)));
    let a = open_window(&mut ws, rect(0, 0, 100, 100));
    let b = open_window(&mut ws, rect(200, 200, 100, 100));
    ws.set_minimized(a, true);
    let _ = ws.take_damage();

    ws.commit_surface(
        a,
        Commit {
            buffer: None,
            damage: Some(rect(0, 0, 10, 10)),
        },
    );
    assert_eq!(ws.take_damage(), None);

    ws.commit_surface(
        b,
        Commit {
            buffer: None,
            damage: Some(rect(0, 0, 10, 10)),
        },
    );
    assert_eq!(ws.take_damage(), Some(rect(200, 200, 10, 10)));
}

#[test]
fn child_damage_is_offset_by_parent() {
    let mut ws = Workspace::new(0, Rc::new(Options::default()));
    ws.notify_output_mode(Size::from((640, 480)));
    let a = open_window(&mut ws, rect(100, 100, 200, 200));
    let child = ws.add_child(a, Surface::new(SurfaceKind::Subsurface)).unwrap();
    ws.place_child(child, rect(10, 10, 20, 20));
    let _ = ws.take_damage();

    ws.commit_surface(child, Commit::with_buffer((20, 20)));
    ws.verify_invariants();
    assert_eq!(ws.take_damage(), Some(rect(110, 110, 20, 20)));
}

fn arbitrary_bbox() -> impl Strategy<Value = Rectangle<i32, Logical>> {
    any::<(i16, i16, u16, u16)>().prop_map(|(x, y, w, h)| {
        let loc: Point<i32, _> = Point::from((x.into(), y.into()));
        let size: Size<i32, _> = Size::from((w.max(1).into(), h.max(1).into()));
        Rectangle::new(loc, size)
    })
}

fn arbitrary_size() -> impl Strategy<Value = Size<i32, Logical>> {
    (0..=4000i32, 0..=4000i32).prop_map(|(w, h)| Size::from((w, h)))
}

fn arbitrary_panel_position() -> impl Strategy<Value = PanelPosition> {
    prop_oneof![
        Just(PanelPosition::Top),
        Just(PanelPosition::Bottom),
        Just(PanelPosition::Left),
        Just(PanelPosition::Right),
    ]
}

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    AddWindow {
        #[proptest(strategy = "1..=5usize")]
        id: usize,
        #[proptest(strategy = "arbitrary_bbox()")]
        bbox: Rectangle<i32, Logical>,
    },
    AddChild {
        #[proptest(strategy = "1..=5usize")]
        parent: usize,
        #[proptest(strategy = "arbitrary_bbox()")]
        bbox: Rectangle<i32, Logical>,
    },
    MapWindow(#[proptest(strategy = "1..=5usize")] usize),
    UnmapWindow(#[proptest(strategy = "1..=5usize")] usize),
    RemoveWindow(#[proptest(strategy = "1..=5usize")] usize),
    /// Commits a buffer of the size the compositor asked for.
    AckWindow(#[proptest(strategy = "1..=5usize")] usize),
    CommitBuffer {
        #[proptest(strategy = "1..=5usize")]
        id: usize,
        #[proptest(strategy = "arbitrary_size()")]
        size: Size<i32, Logical>,
    },
    CommitDamage(#[proptest(strategy = "1..=5usize")] usize),
    ConfigureWindow {
        #[proptest(strategy = "1..=5usize")]
        id: usize,
        #[proptest(strategy = "arbitrary_bbox()")]
        bbox: Rectangle<i32, Logical>,
    },
    MoveWindow {
        #[proptest(strategy = "1..=5usize")]
        id: usize,
        x: i16,
        y: i16,
    },
    SetMaximized {
        #[proptest(strategy = "1..=5usize")]
        id: usize,
        maximized: bool,
    },
    SetFullscreen {
        #[proptest(strategy = "1..=5usize")]
        id: usize,
        fullscreen: bool,
    },
    SetMinimized {
        #[proptest(strategy = "1..=5usize")]
        id: usize,
        minimized: bool,
    },
    FocusWindow(#[proptest(strategy = "prop::option::of(1..=5usize)")] Option<usize>),
    BeginResize(#[proptest(strategy = "1..=5usize")] usize),
    EndResize {
        #[proptest(strategy = "1..=5usize")]
        id: usize,
        #[proptest(strategy = "arbitrary_bbox()")]
        bbox: Rectangle<i32, Logical>,
    },
    CancelResize(#[proptest(strategy = "1..=5usize")] usize),
    SetPanel {
        #[proptest(strategy = "arbitrary_panel_position()")]
        position: PanelPosition,
        #[proptest(strategy = "0..=500i32")]
        size: i32,
        is_visible: bool,
    },
    SetOutputSize(#[proptest(strategy = "arbitrary_size()")] Size<i32, Logical>),
    TransactionTimeout,
    FatalTimeout,
    TakeDamage,
}

impl Op {
    fn apply(self, t: &mut TestWorkspace) {
        match self {
            Op::AddWindow { id, bbox } => {
                if t.surface_id(id).is_some() {
                    return;
                }

                let surface = t.ws.add_surface(Surface::new_toplevel()).unwrap();
                t.ws.configure_surface(
                    surface,
                    SurfaceState::default().with_geometry(bbox),
                    ConfigureFlags::GEOMETRY,
                );
                t.windows.push((id, surface));
            }
            Op::AddChild { parent, bbox } => {
                let Some(parent) = t.surface_id(parent) else {
                    return;
                };

                let child = t
                    .ws
                    .add_child(parent, Surface::new(SurfaceKind::Subsurface))
                    .unwrap();
                t.ws.place_child(child, bbox);
            }
            Op::MapWindow(id) => {
                let Some(id) = t.surface_id(id) else {
                    return;
                };
                t.ws.map_surface(id).unwrap();
            }
            Op::UnmapWindow(id) => {
                let Some(id) = t.surface_id(id) else {
                    return;
                };
                t.ws.unmap_surface(id);
            }
            Op::RemoveWindow(id) => {
                let Some(surface) = t.surface_id(id) else {
                    return;
                };
                t.ws.remove_surface(surface).unwrap();
                t.windows.retain(|(test_id, _)| *test_id != id);
            }
            Op::AckWindow(id) => {
                let Some(id) = t.surface_id(id) else {
                    return;
                };
                let size = t.ws.surface(id).unwrap().pending().size();
                t.ws.commit_surface(id, Commit::with_buffer(size));
            }
            Op::CommitBuffer { id, size } => {
                let Some(id) = t.surface_id(id) else {
                    return;
                };
                t.ws.commit_surface(id, Commit::with_buffer(size));
            }
            Op::CommitDamage(id) => {
                let Some(id) = t.surface_id(id) else {
                    return;
                };
                let commit = Commit {
                    buffer: None,
                    damage: Some(rect(0, 0, 10, 10)),
                };
                t.ws.commit_surface(id, commit);
            }
            Op::ConfigureWindow { id, bbox } => {
                let Some(id) = t.surface_id(id) else {
                    return;
                };
                t.ws.configure_surface(
                    id,
                    SurfaceState::default().with_geometry(bbox),
                    ConfigureFlags::GEOMETRY,
                );
                t.ws.compute_layout();
            }
            Op::MoveWindow { id, x, y } => {
                let Some(id) = t.surface_id(id) else {
                    return;
                };
                t.ws.move_surface(id, Point::from((i32::from(x), i32::from(y))));
            }
            Op::SetMaximized { id, maximized } => {
                let Some(id) = t.surface_id(id) else {
                    return;
                };
                t.ws.set_maximized(id, maximized);
            }
            Op::SetFullscreen { id, fullscreen } => {
                let Some(id) = t.surface_id(id) else {
                    return;
                };
                t.ws.set_fullscreen(id, fullscreen);
            }
            Op::SetMinimized { id, minimized } => {
                let Some(id) = t.surface_id(id) else {
                    return;
                };
                t.ws.set_minimized(id, minimized);
            }
            Op::FocusWindow(id) => {
                let id = match id {
                    Some(id) => match t.surface_id(id) {
                        Some(id) => Some(id),
                        None => return,
                    },
                    None => None,
                };
                t.ws.focus_surface(id);
            }
            Op::BeginResize(id) => {
                let Some(id) = t.surface_id(id) else {
                    return;
                };
                t.ws.begin_interactive_resize(id);
            }
            Op::EndResize { id, bbox } => {
                let Some(id) = t.surface_id(id) else {
                    return;
                };
                t.ws.end_interactive_resize(id, bbox);
            }
            Op::CancelResize(id) => {
                let Some(id) = t.surface_id(id) else {
                    return;
                };
                t.ws.cancel_interactive_resize(id);
            }
            Op::SetPanel {
                position,
                size,
                is_visible,
            } => {
                t.ws.set_panel(Panel {
                    position,
                    size,
                    is_visible,
                });
            }
            Op::SetOutputSize(size) => t.ws.notify_output_mode(size),
            Op::TransactionTimeout => {
                let serial = t.ws.transaction().serial();
                t.ws.on_transaction_timeout(serial);
            }
            Op::FatalTimeout => {
                if let Some(start) = t.ws.transaction().start_time() {
                    let now = start + t.ws.options.fatal_transaction_timeout;
                    assert!(t.ws.check_fatal_timeout(now));
                }
            }
            Op::TakeDamage => {
                let _ = t.ws.take_damage();
                let _ = t.ws.take_redraw_request();
            }
        }
    }
}

#[track_caller]
fn check_ops_with_options(options: Options, ops: impl IntoIterator<Item = Op>) -> TestWorkspace {
    let mut t = TestWorkspace::new(options);
    for op in ops {
        op.apply(&mut t);
        t.ws.verify_invariants();
    }
    t
}

#[track_caller]
fn check_ops(ops: impl IntoIterator<Item = Op>) -> TestWorkspace {
    check_ops_with_options(Options::default(), ops)
}

#[test]
fn add_map_maximize_remove() {
    let ops = [
        Op::AddWindow {
            id: 1,
            bbox: rect(0, 0, 100, 200),
        },
        Op::MapWindow(1),
        Op::AddWindow {
            id: 2,
            bbox: rect(0, 0, 100, 200),
        },
        Op::MapWindow(2),
        Op::SetMaximized {
            id: 1,
            maximized: true,
        },
        Op::AckWindow(1),
        Op::SetFullscreen {
            id: 2,
            fullscreen: true,
        },
        Op::RemoveWindow(2),
    ];

    let t = check_ops(ops);
    let id = t.surface_id(1).unwrap();
    assert_eq!(t.ws.visible(), [id]);
    assert_eq!(t.ws.focused_surface(), Some(id));
}

#[test]
fn unmap_during_transaction() {
    let ops = [
        Op::AddWindow {
            id: 1,
            bbox: rect(0, 0, 100, 200),
        },
        Op::MapWindow(1),
        Op::ConfigureWindow {
            id: 1,
            bbox: rect(0, 0, 300, 300),
        },
        Op::UnmapWindow(1),
        Op::MapWindow(1),
        Op::SetMaximized {
            id: 1,
            maximized: true,
        },
        Op::SetOutputSize(Size::from((800, 600))),
        Op::AckWindow(1),
    ];

    let t = check_ops(ops);
    let id = t.surface_id(1).unwrap();
    assert!(!t.ws.transaction().is_active());
    assert_eq!(
        t.ws.surface(id).unwrap().current().geometry(),
        rect(0, 32, 800, 568)
    );
}

#[test]
fn zero_sized_output() {
    let ops = [
        Op::SetOutputSize(Size::from((0, 0))),
        Op::AddWindow {
            id: 1,
            bbox: rect(0, 0, 100, 200),
        },
        Op::MapWindow(1),
        Op::SetMaximized {
            id: 1,
            maximized: true,
        },
        Op::AckWindow(1),
        Op::SetFullscreen {
            id: 1,
            fullscreen: true,
        },
        Op::FatalTimeout,
    ];

    let t = check_ops(ops);
    let id = t.surface_id(1).unwrap();
    assert_eq!(t.ws.surface(id).unwrap().current().size(), Size::from((0, 0)));
}

#[test]
fn operations_dont_panic() {
    if std::env::var_os("RUN_SLOW_TESTS").is_none() {
        eprintln!("ignoring slow test");
        return;
    }

    let every_op = [
        Op::AddWindow {
            id: 1,
            bbox: rect(0, 0, 100, 200),
        },
        Op::AddWindow {
            id: 2,
            bbox: rect(50, 50, 300, 200),
        },
        Op::AddChild {
            parent: 1,
            bbox: rect(10, 10, 20, 20),
        },
        Op::MapWindow(1),
        Op::MapWindow(2),
        Op::UnmapWindow(1),
        Op::RemoveWindow(1),
        Op::AckWindow(1),
        Op::AckWindow(2),
        Op::CommitBuffer {
            id: 1,
            size: Size::from((10, 10)),
        },
        Op::CommitDamage(2),
        Op::ConfigureWindow {
            id: 1,
            bbox: rect(0, 0, 500, 500),
        },
        Op::MoveWindow { id: 2, x: 5, y: 5 },
        Op::SetMaximized {
            id: 1,
            maximized: true,
        },
        Op::SetMaximized {
            id: 1,
            maximized: false,
        },
        Op::SetFullscreen {
            id: 2,
            fullscreen: true,
        },
        Op::SetFullscreen {
            id: 2,
            fullscreen: false,
        },
        Op::SetMinimized {
            id: 1,
            minimized: true,
        },
        Op::SetMinimized {
            id: 1,
            minimized: false,
        },
        Op::FocusWindow(Some(1)),
        Op::FocusWindow(None),
        Op::BeginResize(2),
        Op::EndResize {
            id: 2,
            bbox: rect(0, 0, 50, 50),
        },
        Op::CancelResize(2),
        Op::SetPanel {
            position: PanelPosition::Left,
            size: 100,
            is_visible: true,
        },
        Op::SetOutputSize(Size::from((800, 600))),
        Op::TransactionTimeout,
        Op::FatalTimeout,
        Op::TakeDamage,
    ];

    for first in &every_op {
        for second in &every_op {
            for third in &every_op {
                check_ops([first.clone(), second.clone(), third.clone()]);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: if std::env::var_os("RUN_SLOW_TESTS").is_none() {
            eprintln!("ignoring slow test");
            0
        } else {
            ProptestConfig::default().cases
        },
        ..ProptestConfig::default()
    })]

    #[test]
    fn random_operations_dont_panic(ops: Vec<Op>, transactions: bool) {
        let options = Options {
            transactions,
            ..Default::default()
        };
        check_ops_with_options(options, ops);
    }
}
