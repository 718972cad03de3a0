use std::mem;
use std::rc::Rc;
use std::time::Instant;

use anyhow::{bail, Context as _};
use smithay::utils::{Logical, Point, Rectangle, Size, Transform};

use super::transaction::{SurfaceSnapshot, Transaction, TransactionSnapshot};
use super::{ConfigureFlags, Options, Panel};
use crate::damage::surface_damage;
use crate::output::{ElementKind, OutputId, RenderElement};
use crate::surface::{Commit, Snapshot, SnapshotKind, Surface, SurfaceId, SurfaceState};
use crate::utils::id::IdCounter;
use crate::utils::{expand, is_empty, union};

static WORKSPACE_ID_COUNTER: IdCounter = IdCounter::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkspaceId(u32);

impl WorkspaceId {
    fn next() -> WorkspaceId {
        WorkspaceId(WORKSPACE_ID_COUNTER.next())
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

#[derive(Debug)]
pub struct Workspace {
    id: WorkspaceId,

    /// Position of this workspace in the workspace list, as shown to the user.
    pub(crate) idx: usize,

    /// Windows of this workspace, in the order they were added.
    surfaces: Vec<Surface>,

    /// Windows that have content, most recently focused first.
    mapped: Vec<SurfaceId>,

    /// Windows to draw, top to bottom.
    ///
    /// Only ever rebuilt from scratch by [`Workspace::compute_layout()`].
    visible: Vec<SurfaceId>,

    focused_surface: Option<SurfaceId>,

    panel: Panel,

    /// Last known pointer location in workspace coordinates.
    pointer: Point<f64, Logical>,

    transaction: Transaction,

    /// Logical size of the output showing this workspace.
    ///
    /// Kept when the workspace goes back to the pool, so that its windows keep their layout.
    size: Size<i32, Logical>,

    /// Output currently showing this workspace, if any.
    output: Option<OutputId>,

    /// Area that needs repainting in addition to what surfaces report.
    damage: Rectangle<i32, Logical>,

    redraw_requested: bool,

    /// Configurable properties of the layout.
    pub options: Rc<Options>,
}

impl Workspace {
    pub fn new(idx: usize, options: Rc<Options>) -> Self {
        Self {
            id: WorkspaceId::next(),
            idx,
            surfaces: Vec::new(),
            mapped: Vec::new(),
            visible: Vec::new(),
            focused_surface: None,
            panel: options.panel,
            pointer: Point::from((0., 0.)),
            transaction: Transaction::new(),
            size: Size::from((0, 0)),
            output: None,
            damage: Rectangle::default(),
            redraw_requested: false,
            options,
        }
    }

    pub fn id(&self) -> WorkspaceId {
        self.id
    }

    pub fn idx(&self) -> usize {
        self.idx
    }

    pub fn size(&self) -> Size<i32, Logical> {
        self.size
    }

    pub fn output(&self) -> Option<OutputId> {
        self.output
    }

    pub(crate) fn set_output(&mut self, output: Option<OutputId>) {
        self.output = output;
    }

    pub fn panel(&self) -> Panel {
        self.panel
    }

    /// Panel as it should be drawn: frozen while a transaction is running.
    pub fn effective_panel(&self) -> Panel {
        self.transaction
            .snapshot()
            .map_or(self.panel, |snapshot| snapshot.panel)
    }

    pub fn pointer(&self) -> Point<f64, Logical> {
        self.pointer
    }

    pub fn focused_surface(&self) -> Option<SurfaceId> {
        self.focused_surface
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }

    pub fn mapped(&self) -> &[SurfaceId] {
        &self.mapped
    }

    pub fn visible(&self) -> &[SurfaceId] {
        &self.visible
    }

    pub fn area(&self) -> Rectangle<i32, Logical> {
        Rectangle::from_size(self.size)
    }

    /// The workspace area minus the panel strip.
    pub fn main_area(&self) -> Rectangle<i32, Logical> {
        self.panel.main_area(self.area())
    }

    /// Whether this workspace owns the surface, directly or as a child of one of its windows.
    pub fn has_surface(&self, id: SurfaceId) -> bool {
        self.surfaces.iter().any(|s| s.contains(id))
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.iter().find_map(|s| s.find(id))
    }

    pub(crate) fn surface_mut(&mut self, id: SurfaceId) -> Option<&mut Surface> {
        self.surfaces.iter_mut().find_map(|s| s.find_mut(id))
    }

    fn window(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.iter().find(|s| s.id() == id)
    }

    fn window_mut(&mut self, id: SurfaceId) -> Option<&mut Surface> {
        self.surfaces.iter_mut().find(|s| s.id() == id)
    }

    /// Adds a window to the workspace.
    ///
    /// Windows that are already mapped, e.g. ones moved from another workspace, go on top.
    pub fn add_surface(&mut self, surface: Surface) -> anyhow::Result<SurfaceId> {
        if !surface.is_window() {
            bail!("only windows can be added to a workspace, got {:?}", surface.kind());
        }

        self.surfaces
            .try_reserve(1)
            .context("error allocating workspace surface")?;
        if surface.is_mapped() {
            self.mapped
                .try_reserve(1)
                .context("error allocating workspace surface")?;
        }

        let id = surface.id();
        let is_mapped = surface.is_mapped();
        self.surfaces.push(surface);

        if is_mapped {
            self.mapped.insert(0, id);
            self.compute_layout();
        }

        Ok(id)
    }

    /// Makes sure that adding one more window can't fail.
    pub fn reserve_surface(&mut self) -> anyhow::Result<()> {
        self.surfaces
            .try_reserve(1)
            .context("error allocating workspace surface")?;
        self.mapped
            .try_reserve(1)
            .context("error allocating workspace surface")?;
        Ok(())
    }

    /// Removes a window together with its children.
    ///
    /// A transaction that waits for the window or draws its snapshot is committed first.
    pub fn remove_surface(&mut self, id: SurfaceId) -> Option<Surface> {
        let idx = self.surfaces.iter().position(|s| s.id() == id)?;

        let surface = &self.surfaces[idx];
        if surface.is_transaction_running || self.snapshot_references(surface) {
            debug!("committing transaction for removed surface {id:?}");
            self.commit_transaction();
        }

        let surface = &self.surfaces[idx];
        if surface.is_visible() {
            let rect = tree_bbox(surface, Point::from((0, 0)), self.options.decoration_margin);
            self.add_damage(rect);
        }

        if self.focused_surface == Some(id) {
            self.configure_surface(id, SurfaceState::default(), ConfigureFlags::ACTIVATED);
        }

        let mut surface = self.surfaces.remove(idx);
        surface.is_visible = false;
        self.mapped.retain(|x| *x != id);
        self.visible.retain(|x| *x != id);

        if self.focused_surface == Some(id) {
            self.focused_surface = None;
            self.compute_layout();
            self.refocus();
        } else {
            self.compute_layout();
        }

        Some(surface)
    }

    pub fn map_surface(&mut self, id: SurfaceId) -> anyhow::Result<()> {
        let Some(surface) = self.window(id) else {
            bail!("surface {id:?} is not a window of this workspace");
        };
        if surface.is_mapped() {
            return Ok(());
        }

        self.mapped
            .try_reserve(1)
            .context("error allocating mapped surface")?;

        if let Some(surface) = self.window_mut(id) {
            surface.set_mapped(true);
        }
        self.mapped.insert(0, id);

        self.focus_surface(Some(id));
        Ok(())
    }

    pub fn unmap_surface(&mut self, id: SurfaceId) {
        let Some(surface) = self.window(id) else {
            return;
        };
        if !surface.is_mapped() {
            return;
        }

        if surface.is_transaction_running {
            debug!("committing transaction for unmapped surface {id:?}");
            self.commit_transaction();
        }

        let margin = self.options.decoration_margin;
        let Some(surface) = self.window_mut(id) else {
            return;
        };
        let rect = if surface.is_visible() {
            Some(tree_bbox(surface, Point::from((0, 0)), margin))
        } else {
            None
        };
        surface.set_mapped(false);

        if let Some(rect) = rect {
            self.add_damage(rect);
        }
        self.mapped.retain(|x| *x != id);
        self.visible.retain(|x| *x != id);

        if self.focused_surface == Some(id) {
            self.configure_surface(id, SurfaceState::default(), ConfigureFlags::ACTIVATED);
            self.focused_surface = None;
            self.compute_layout();
            self.refocus();
        } else {
            self.compute_layout();
        }
    }

    /// Attaches a subsurface or popup to `parent`, which can itself be a child.
    pub fn add_child(&mut self, parent: SurfaceId, child: Surface) -> anyhow::Result<SurfaceId> {
        if child.is_toplevel() {
            bail!("toplevels can't be children");
        }

        let parent = self
            .surface_mut(parent)
            .with_context(|| format!("parent {parent:?} not found"))?;

        let id = child.id();
        parent
            .add_child(child)
            .context("error allocating child surface")?;
        Ok(id)
    }

    /// Moves a child relative to its parent.
    pub fn place_child(&mut self, id: SurfaceId, geometry: Rectangle<i32, Logical>) {
        let Some(child) = self.surface_mut(id) else {
            return;
        };
        if child.is_toplevel() {
            return;
        }

        let state = child.current().with_geometry(geometry);
        child.force_state(state);
    }

    pub fn remove_child(&mut self, id: SurfaceId) -> Option<Surface> {
        let idx = self.surfaces.iter().position(|s| s.contains(id))?;
        if self.surfaces[idx].id() == id {
            return None;
        }

        if self.transaction.references(id) {
            debug!("committing transaction for removed child {id:?}");
            self.commit_transaction();
        }

        let root = &mut self.surfaces[idx];
        let offset = root.ancestor_offset(id).unwrap_or_default();
        let is_visible = root.is_visible();
        let child = root.remove_child(id)?;

        if is_visible {
            self.add_damage(tree_bbox(&child, offset, 0));
        }

        Some(child)
    }

    /// Handles a client commit for the surface or one of the children.
    ///
    /// Returns `false` if the surface doesn't belong to this workspace.
    pub fn commit_surface(&mut self, id: SurfaceId, commit: Commit) -> bool {
        let Some(root) = self.surfaces.iter_mut().find(|s| s.contains(id)) else {
            return false;
        };

        let has_buffer = commit.buffer.is_some();

        if root.id() != id {
            if let Some(child) = root.find_mut(id) {
                let size = child.apply_commit(commit);
                if has_buffer {
                    child.adopt_size(size);
                }
            }
            return true;
        }

        let size = root.apply_commit(commit);
        if !has_buffer {
            return true;
        }

        if !root.is_transaction_running {
            root.adopt_size(size);
            return true;
        }

        if !root.matches_pending(size) {
            trace!(
                "surface {id:?} committed {size:?}, waiting for {:?}",
                root.pending().size()
            );
            return true;
        }

        root.is_transaction_running = false;
        root.apply_pending();
        if self.transaction.update() {
            self.commit_transaction();
        }

        true
    }

    /// Asks a window to change to `state`, with `flags` selecting which parts of it apply.
    ///
    /// Changes that make a mapped window redraw at a different size go through the workspace
    /// transaction. Everything else applies right away.
    pub fn configure_surface(&mut self, id: SurfaceId, state: SurfaceState, flags: ConfigureFlags) {
        let Some(idx) = self.surfaces.iter().position(|s| s.id() == id) else {
            return;
        };

        let surface = &self.surfaces[idx];
        let target = apply_flags(*surface.pending(), state, flags);
        if target == *surface.pending() {
            return;
        }

        let needs_transaction = self.options.transactions
            && surface.is_mapped()
            && target.size() != surface.current().size();

        if surface.is_transaction_running {
            let surface = &mut self.surfaces[idx];
            surface.request_state(target);

            // Went back to the size the client already has, nothing left to wait for.
            if !needs_transaction {
                surface.is_transaction_running = false;
                surface.apply_pending();
                if self.transaction.update() {
                    self.commit_transaction();
                }
            }
            return;
        }

        if needs_transaction {
            let margin = self.options.decoration_margin;
            let (surfaces, visible, panel) = (&self.surfaces, &self.visible, self.panel);
            let res = self
                .transaction
                .start(|| capture_snapshot(surfaces, visible, panel, margin));

            let surface = &mut self.surfaces[idx];
            surface.request_state(target);

            match res {
                Ok(_) => {
                    surface.is_transaction_running = true;
                    return;
                }
                Err(err) => {
                    warn!("error starting transaction, applying {id:?} directly: {err:?}");
                }
            }
        } else {
            self.surfaces[idx].request_state(target);
        }

        self.surfaces[idx].apply_pending();
    }

    /// Forces every participant into its pending state and drops the snapshot.
    pub fn commit_transaction(&mut self) {
        if !self.transaction.is_active() && self.transaction.snapshot().is_none() {
            return;
        }

        for surface in &mut self.surfaces {
            if surface.is_transaction_running {
                trace!("forcing pending state of {:?}", surface.id());
                surface.is_transaction_running = false;
                surface.apply_pending();
            }
        }

        self.transaction.finish();
        self.add_damage(self.area());
        self.redraw_requested = true;
    }

    /// Commits the transaction if its watchdog with this `serial` expired.
    ///
    /// Returns whether anything was committed.
    pub fn on_transaction_timeout(&mut self, serial: u64) -> bool {
        if !self.transaction.is_active() || self.transaction.serial() != serial {
            trace!("ignoring watchdog for finished transaction {serial}");
            return false;
        }

        debug!(
            sentinel = self.transaction.sentinel(),
            "transaction {serial} timed out, committing"
        );
        self.commit_transaction();
        true
    }

    /// Commits the transaction if it's older than the fatal timeout at `now`.
    pub fn check_fatal_timeout(&mut self, now: Instant) -> bool {
        let timeout = self.options.fatal_transaction_timeout;
        if !self.transaction.is_expired(now, timeout) {
            return false;
        }

        debug!(
            "transaction still pending after {:?}, committing",
            self.transaction.elapsed(now).unwrap_or_default()
        );
        self.commit_transaction();
        true
    }

    /// Rebuilds the mapped and visible lists and places the maximized or fullscreen window.
    pub fn compute_layout(&mut self) {
        let _span = tracy_client::span!("Workspace::compute_layout");

        if let Some(focused) = self.focused_surface {
            if let Some(pos) = self.mapped.iter().position(|id| *id == focused) {
                let id = self.mapped.remove(pos);
                self.mapped.insert(0, id);
            }
        }

        let area = self.area();
        let main_area = self.main_area();

        let occupant = self.mapped.iter().find_map(|id| {
            let state = self.window(*id)?.pending();
            if state.is_minimized {
                return None;
            }
            if state.is_fullscreen {
                Some((*id, area))
            } else if state.is_maximized {
                Some((*id, main_area))
            } else {
                None
            }
        });

        if let Some((id, rect)) = occupant {
            let state = SurfaceState::default().with_geometry(rect);
            self.configure_surface(id, state, ConfigureFlags::GEOMETRY);
        }

        let mut visible = Vec::with_capacity(self.mapped.len());
        for id in &self.mapped {
            let Some(surface) = self.window(*id) else {
                continue;
            };
            let state = surface.pending();
            if state.is_minimized {
                continue;
            }

            visible.push(*id);
            if state.is_maximized || state.is_fullscreen {
                break;
            }
        }

        let margin = self.options.decoration_margin;
        for surface in &mut self.surfaces {
            let is_visible = visible.contains(&surface.id());
            if surface.is_visible() != is_visible {
                surface.is_visible = is_visible;
                self.damage = union(
                    self.damage,
                    tree_bbox(surface, Point::from((0, 0)), margin),
                );
            }
        }

        self.visible = visible;
        self.redraw_requested = true;
    }

    pub fn focus_surface(&mut self, id: Option<SurfaceId>) {
        if let Some(id) = id {
            if self.window(id).is_none() {
                return;
            }
        }

        if let Some(old) = self.focused_surface {
            if Some(old) != id {
                self.configure_surface(old, SurfaceState::default(), ConfigureFlags::ACTIVATED);
            }
        }

        if let Some(id) = id {
            let state = SurfaceState {
                is_activated: true,
                is_minimized: false,
                ..Default::default()
            };
            self.configure_surface(id, state, ConfigureFlags::ACTIVATED | ConfigureFlags::MINIMIZED);
        }

        self.focused_surface = id;
        self.compute_layout();
    }

    /// Focuses the topmost window that isn't minimized, if any.
    fn refocus(&mut self) {
        let next = self.mapped.iter().copied().find(|id| {
            self.window(*id)
                .is_some_and(|s| !s.pending().is_minimized)
        });
        self.focus_surface(next);
    }

    pub fn set_maximized(&mut self, id: SurfaceId, maximized: bool) {
        let Some(surface) = self.window_mut(id) else {
            return;
        };
        if surface.pending().is_maximized == maximized {
            return;
        }

        let mut state = SurfaceState {
            is_maximized: maximized,
            ..Default::default()
        };
        let mut flags = ConfigureFlags::MAXIMIZED;

        if maximized {
            surface.save_state();
        } else if !surface.pending().is_fullscreen {
            if let Some(saved) = surface.take_saved() {
                state.set_geometry(saved.geometry());
                flags |= ConfigureFlags::GEOMETRY;
            }
        }

        self.configure_surface(id, state, flags);
        self.compute_layout();
    }

    pub fn set_fullscreen(&mut self, id: SurfaceId, fullscreen: bool) {
        let Some(surface) = self.window_mut(id) else {
            return;
        };
        if surface.pending().is_fullscreen == fullscreen {
            return;
        }

        let mut state = SurfaceState {
            is_fullscreen: fullscreen,
            ..Default::default()
        };
        let mut flags = ConfigureFlags::FULLSCREEN;

        if fullscreen {
            surface.save_state();
        } else if !surface.pending().is_maximized {
            if let Some(saved) = surface.take_saved() {
                state.set_geometry(saved.geometry());
                flags |= ConfigureFlags::GEOMETRY;
            }
        }

        self.configure_surface(id, state, flags);
        self.compute_layout();
    }

    pub fn set_minimized(&mut self, id: SurfaceId, minimized: bool) {
        let Some(surface) = self.window(id) else {
            return;
        };
        if surface.pending().is_minimized == minimized {
            return;
        }

        if !minimized {
            // Unminimizing brings the window to the front.
            self.focus_surface(Some(id));
            return;
        }

        let state = SurfaceState {
            is_minimized: true,
            ..Default::default()
        };
        self.configure_surface(id, state, ConfigureFlags::MINIMIZED);

        if self.focused_surface == Some(id) {
            self.configure_surface(id, SurfaceState::default(), ConfigureFlags::ACTIVATED);
            self.focused_surface = None;
            self.compute_layout();
            self.refocus();
        } else {
            self.compute_layout();
        }
    }

    /// Moves a window without resizing it.
    pub fn move_surface(&mut self, id: SurfaceId, loc: Point<i32, Logical>) {
        let state = SurfaceState {
            x: loc.x,
            y: loc.y,
            ..Default::default()
        };
        self.configure_surface(id, state, ConfigureFlags::POSITION);
    }

    /// Remembers the window geometry so that the resize can be cancelled.
    ///
    /// Returns `false` if the window can't be resized right now.
    pub fn begin_interactive_resize(&mut self, id: SurfaceId) -> bool {
        let Some(surface) = self.window_mut(id) else {
            return false;
        };

        let state = surface.pending();
        if !surface.is_mapped() || state.is_maximized || state.is_fullscreen {
            return false;
        }

        surface.save_state();
        true
    }

    pub fn end_interactive_resize(&mut self, id: SurfaceId, geometry: Rectangle<i32, Logical>) {
        let Some(surface) = self.window_mut(id) else {
            return;
        };
        if surface.take_saved().is_none() {
            return;
        }

        let state = SurfaceState::default().with_geometry(geometry);
        self.configure_surface(id, state, ConfigureFlags::GEOMETRY);
        self.compute_layout();
    }

    pub fn cancel_interactive_resize(&mut self, id: SurfaceId) {
        let Some(surface) = self.window_mut(id) else {
            return;
        };
        if surface.pending().is_maximized || surface.pending().is_fullscreen {
            return;
        }
        let Some(saved) = surface.take_saved() else {
            return;
        };

        let state = SurfaceState::default().with_geometry(saved.geometry());
        self.configure_surface(id, state, ConfigureFlags::GEOMETRY);
        self.compute_layout();
    }

    pub fn set_panel(&mut self, panel: Panel) {
        if self.panel == panel {
            return;
        }

        let old = mem::replace(&mut self.panel, panel);
        let was_active = self.transaction.is_active();
        self.add_damage(self.area());
        self.compute_layout();

        // A transaction started by this change must keep showing the old panel.
        if !was_active {
            if let Some(snapshot) = self.transaction.snapshot_mut() {
                snapshot.panel = old;
            }
        }
    }

    /// Updates the workspace size after its output changed mode, scale or transform.
    pub fn notify_output_mode(&mut self, size: Size<i32, Logical>) {
        if self.size == size {
            return;
        }

        self.size = size;
        self.add_damage(self.area());
        self.compute_layout();
    }

    pub fn set_pointer(&mut self, pointer: Point<f64, Logical>) {
        self.pointer = pointer;
    }

    /// Returns the topmost visible surface under `point`, and the point in its coordinates.
    pub fn surface_at(
        &self,
        point: Point<f64, Logical>,
    ) -> Option<(SurfaceId, Point<f64, Logical>)> {
        self.visible
            .iter()
            .filter_map(|id| self.window(*id))
            .find_map(|surface| surface.surface_under(point))
    }

    pub fn surface_under_pointer(&self) -> Option<(SurfaceId, Point<f64, Logical>)> {
        self.surface_at(self.pointer)
    }

    pub fn add_damage(&mut self, rect: Rectangle<i32, Logical>) {
        self.damage = union(self.damage, rect);
    }

    /// Takes everything that needs repainting since the last call, in workspace coordinates.
    ///
    /// Only visible windows contribute surface damage; hidden ones just have theirs reset.
    pub fn take_damage(&mut self) -> Option<Rectangle<i32, Logical>> {
        let margin = self.options.decoration_margin;
        let mut damage = mem::take(&mut self.damage);

        for surface in &mut self.surfaces {
            let is_visible = surface.is_visible();
            surface.for_each_mut(Point::from((0, 0)), &mut |surface, offset| {
                let rect = surface_damage(surface, offset, margin);
                if let Some(rect) = rect.filter(|_| is_visible) {
                    damage = union(damage, rect);
                }
            });
        }

        (!is_empty(damage)).then_some(damage)
    }

    pub fn take_redraw_request(&mut self) -> bool {
        mem::take(&mut self.redraw_requested)
    }

    /// Scene of this workspace, bottom to top, in workspace coordinates.
    ///
    /// While a transaction is running this is the frozen snapshot instead of live surfaces.
    pub fn render_elements(&self) -> Vec<RenderElement> {
        let mut elements = Vec::new();

        if let Some(snapshot) = self.transaction.snapshot() {
            for entry in &snapshot.surfaces {
                for kind in [SnapshotKind::Decoration, SnapshotKind::Normal] {
                    if let Some(snapshot) = entry.get(kind) {
                        elements.push(RenderElement {
                            surface: entry.surface,
                            buffer: snapshot.buffer,
                            geometry: snapshot.geometry,
                            transform: snapshot.transform,
                            kind: ElementKind::Snapshot(kind),
                        });
                    }
                }
            }
            return elements;
        }

        let margin = self.options.decoration_margin;
        for surface in self.visible.iter().rev().filter_map(|id| self.window(*id)) {
            push_live_elements(surface, Point::from((0, 0)), margin, &mut elements);
        }
        elements
    }

    fn snapshot_references(&self, surface: &Surface) -> bool {
        self.transaction.snapshot().is_some_and(|snapshot| {
            snapshot
                .surfaces
                .iter()
                .any(|entry| surface.contains(entry.surface))
        })
    }

    #[cfg(test)]
    pub fn verify_invariants(&self) {
        use std::collections::HashSet;

        assert!(self.size.w >= 0);
        assert!(self.size.h >= 0);

        let mut ids = HashSet::new();
        for surface in &self.surfaces {
            assert!(surface.is_window(), "only windows belong to a workspace");
            assert!(ids.insert(surface.id()), "surface ids must be unique");

            if surface.is_mapped() {
                assert!(self.mapped.contains(&surface.id()));
            }

            assert_eq!(surface.is_visible(), self.visible.contains(&surface.id()));

            if !surface.is_transaction_running() {
                assert_eq!(
                    surface.pending(),
                    surface.current(),
                    "pending must equal current outside of a transaction"
                );
            } else {
                assert!(surface.is_mapped(), "only mapped surfaces take part");
            }
        }

        let mut mapped = HashSet::new();
        for id in &self.mapped {
            assert!(mapped.insert(*id), "mapped surfaces must be unique");
            let surface = self.window(*id).expect("mapped surface must exist");
            assert!(surface.is_mapped());
        }

        // Visible is an ordered subsequence of mapped.
        let mut mapped_iter = self.mapped.iter();
        for id in &self.visible {
            assert!(
                mapped_iter.any(|x| x == id),
                "visible must follow mapped order"
            );
        }

        // Only the last visible window can be maximized or fullscreen.
        if let Some((_, rest)) = self.visible.split_last() {
            for id in rest {
                let state = self.window(*id).unwrap().pending();
                assert!(!state.is_maximized && !state.is_fullscreen);
            }
        }

        if let Some(focused) = self.focused_surface {
            assert!(self.window(focused).is_some(), "focused surface must exist");
        }

        let participants = self
            .surfaces
            .iter()
            .filter(|s| s.is_transaction_running())
            .count();
        assert_eq!(self.transaction.sentinel() as usize, participants);
        assert_eq!(
            self.transaction.is_active(),
            self.transaction.snapshot().is_some(),
            "snapshot must exist iff a transaction is active"
        );
    }
}

/// Overrides the parts of `state` selected by `flags`.
fn apply_flags(mut target: SurfaceState, state: SurfaceState, flags: ConfigureFlags) -> SurfaceState {
    if flags.contains(ConfigureFlags::POSITION) {
        target.x = state.x;
        target.y = state.y;
    }
    if flags.contains(ConfigureFlags::SIZE) {
        target.width = state.width.max(0);
        target.height = state.height.max(0);
    }
    if flags.contains(ConfigureFlags::ACTIVATED) {
        target.is_activated = state.is_activated;
    }
    if flags.contains(ConfigureFlags::MAXIMIZED) {
        target.is_maximized = state.is_maximized;
    }
    if flags.contains(ConfigureFlags::MINIMIZED) {
        target.is_minimized = state.is_minimized;
    }
    if flags.contains(ConfigureFlags::FULLSCREEN) {
        target.is_fullscreen = state.is_fullscreen;
    }
    target
}

fn capture_snapshot(
    surfaces: &[Surface],
    visible: &[SurfaceId],
    panel: Panel,
    margin: i32,
) -> anyhow::Result<TransactionSnapshot> {
    let mut entries = Vec::new();
    for id in visible.iter().rev() {
        let Some(surface) = surfaces.iter().find(|s| s.id() == *id) else {
            continue;
        };
        capture_tree(surface, Point::from((0, 0)), margin, &mut entries)?;
    }

    Ok(TransactionSnapshot {
        panel,
        surfaces: entries,
    })
}

fn capture_tree(
    surface: &Surface,
    offset: Point<i32, Logical>,
    margin: i32,
    out: &mut Vec<SurfaceSnapshot>,
) -> anyhow::Result<()> {
    out.try_reserve(1)
        .context("error allocating surface snapshot")?;

    let shift = |mut snapshot: Snapshot| {
        snapshot.geometry.loc += offset;
        snapshot
    };
    out.push(SurfaceSnapshot::new(
        surface.id(),
        surface.snapshot(SnapshotKind::Normal, margin).map(shift),
        surface.snapshot(SnapshotKind::Decoration, margin).map(shift),
    ));

    let offset = offset + surface.current().loc();
    for child in surface.children() {
        capture_tree(child, offset, margin, out)?;
    }
    Ok(())
}

fn push_live_elements(
    surface: &Surface,
    offset: Point<i32, Logical>,
    margin: i32,
    out: &mut Vec<RenderElement>,
) {
    let mut geometry = surface.current().geometry();
    geometry.loc += offset;
    let buffer = surface.buffer();
    let transform = buffer.map_or(Transform::Normal, |buffer| buffer.transform);

    if surface.has_decoration() {
        out.push(RenderElement {
            surface: surface.id(),
            buffer: None,
            geometry: expand(geometry, margin),
            transform,
            kind: ElementKind::Decoration,
        });
    }

    out.push(RenderElement {
        surface: surface.id(),
        buffer: buffer.map(|buffer| buffer.id),
        geometry,
        transform,
        kind: ElementKind::Live,
    });

    let offset = offset + surface.current().loc();
    for child in surface.children() {
        push_live_elements(child, offset, margin, out);
    }
}

/// Bounding box of a surface and its children, toplevels grown by the decoration margin.
fn tree_bbox(
    surface: &Surface,
    offset: Point<i32, Logical>,
    margin: i32,
) -> Rectangle<i32, Logical> {
    let mut rect = surface.current().geometry();
    rect.loc += offset;
    if surface.is_toplevel() {
        rect = expand(rect, margin);
    }

    let offset = offset + surface.current().loc();
    surface
        .children()
        .iter()
        .fold(rect, |acc, child| union(acc, tree_bbox(child, offset, 0)))
}
