use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use anyhow::{bail, Context as _};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{LoopHandle, RegistrationToken};
use rose_config::Config;
use smithay::utils::{Logical, Physical, Point, Rectangle, Size, Transform};

use crate::layout::{ConfigureFlags, Options, Panel, PanelPosition, Workspace, WorkspaceId};
use crate::output::{Frame, Output, OutputId};
use crate::surface::{
    Commit, Configure, Surface, SurfaceId, SurfaceKind, SurfaceState, WidgetType,
};
use crate::utils::to_smithay_transform;

pub struct State {
    pub rose: Rose,
}

/// Compositor state shared by the protocol, output and input layers.
///
/// Every entry point finishes by pushing workspace damage into the outputs and keeping the
/// transaction watchdogs in sync, so the renderer never observes a half-updated layout.
pub struct Rose {
    pub options: Rc<Options>,
    output_config: rose_config::Outputs,
    damage_config: rose_config::Damage,

    pub event_loop: LoopHandle<'static, State>,

    /// All workspaces in display order. Those without an output form the free pool.
    workspaces: Vec<Workspace>,
    outputs: Vec<Output>,

    /// Workspace receiving input.
    current_workspace: Option<WorkspaceId>,

    /// Armed transaction timers, per workspace.
    watchdogs: HashMap<WorkspaceId, Watchdog>,
}

#[derive(Debug)]
struct Watchdog {
    serial: u64,
    token: RegistrationToken,
}

#[derive(Debug, Clone, Copy)]
enum Owner {
    Workspace(usize),
    Output(usize),
}

impl State {
    pub fn new(config: Config, event_loop: LoopHandle<'static, State>) -> anyhow::Result<Self> {
        let rose = Rose::new(config, event_loop)?;
        Ok(Self { rose })
    }
}

impl Rose {
    pub fn new(config: Config, event_loop: LoopHandle<'static, State>) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("Rose::new");

        let options = Rc::new(Options::from_config(&config));

        let mut rose = Self {
            options,
            output_config: config.outputs,
            damage_config: config.damage,
            event_loop,
            workspaces: Vec::new(),
            outputs: Vec::new(),
            current_workspace: None,
            watchdogs: HashMap::new(),
        };

        for _ in 0..config.workspaces.count.max(1) {
            rose.add_workspace()?;
        }
        rose.current_workspace = rose.workspaces.first().map(|ws| ws.id());

        Ok(rose)
    }

    pub fn workspaces(&self) -> &[Workspace] {
        &self.workspaces
    }

    pub fn workspace(&self, id: WorkspaceId) -> Option<&Workspace> {
        self.workspaces.iter().find(|ws| ws.id() == id)
    }

    pub fn current_workspace(&self) -> Option<WorkspaceId> {
        self.current_workspace
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn output(&self, id: OutputId) -> Option<&Output> {
        self.outputs.iter().find(|o| o.id() == id)
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&Surface> {
        match self.owner(id)? {
            Owner::Workspace(idx) => self.workspaces[idx].surface(id),
            Owner::Output(idx) => self.outputs[idx].surface(id),
        }
    }

    fn surface_mut(&mut self, id: SurfaceId) -> Option<&mut Surface> {
        match self.owner(id)? {
            Owner::Workspace(idx) => self.workspaces[idx].surface_mut(id),
            Owner::Output(idx) => self.outputs[idx].surface_mut(id),
        }
    }

    /// Workspace a window or one of its children belongs to.
    pub fn workspace_of(&self, id: SurfaceId) -> Option<WorkspaceId> {
        match self.owner(id)? {
            Owner::Workspace(idx) => Some(self.workspaces[idx].id()),
            Owner::Output(_) => None,
        }
    }

    fn owner(&self, id: SurfaceId) -> Option<Owner> {
        if let Some(idx) = self.workspaces.iter().position(|ws| ws.has_surface(id)) {
            return Some(Owner::Workspace(idx));
        }
        self.outputs
            .iter()
            .position(|o| o.has_surface(id))
            .map(Owner::Output)
    }

    fn workspace_idx(&self, id: WorkspaceId) -> Option<usize> {
        self.workspaces.iter().position(|ws| ws.id() == id)
    }

    fn output_idx(&self, id: OutputId) -> Option<usize> {
        self.outputs.iter().position(|o| o.id() == id)
    }

    pub fn add_workspace(&mut self) -> anyhow::Result<WorkspaceId> {
        self.workspaces
            .try_reserve(1)
            .context("error allocating workspace")?;

        let mut ws = Workspace::new(self.workspaces.len(), self.options.clone());

        // Size pool workspaces like the current one so that windows opened there fit.
        if let Some(current) = self.current_workspace.and_then(|id| self.workspace(id)) {
            ws.notify_output_mode(current.size());
        }

        let id = ws.id();
        self.workspaces.push(ws);
        debug!("added workspace {id:?}");
        Ok(id)
    }

    /// Removes a workspace, moving its windows to the current workspace.
    ///
    /// The last workspace can't be removed.
    pub fn remove_workspace(&mut self, id: WorkspaceId) -> bool {
        if self.workspaces.len() <= 1 {
            warn!("refusing to remove the last workspace");
            return false;
        }

        let Some(idx) = self.workspace_idx(id) else {
            warn!("tried to remove unknown workspace {id:?}");
            return false;
        };

        let mut ws = self.workspaces.remove(idx);
        ws.commit_transaction();
        self.cancel_watchdog(id);

        let target = self
            .current_workspace
            .filter(|current| *current != id)
            .and_then(|current| self.workspace_idx(current))
            .unwrap_or(0);

        while let Some(surface_id) = ws.surfaces().first().map(|s| s.id()) {
            let Some(surface) = ws.remove_surface(surface_id) else {
                break;
            };

            let dest = &mut self.workspaces[target];
            let res = dest
                .reserve_surface()
                .and_then(|()| dest.add_surface(surface));
            if let Err(err) = res {
                warn!("error moving {surface_id:?} from removed workspace: {err:?}");
            }
        }

        if self.current_workspace == Some(id) {
            self.current_workspace = Some(self.workspaces[target].id());
        }

        if let Some(output_idx) = ws.output().and_then(|output| self.output_idx(output)) {
            self.outputs[output_idx].set_workspace(None);
            if let Some(free) = self.workspaces.iter().position(|ws| ws.output().is_none()) {
                self.attach_workspace(output_idx, free);
            }
        }

        self.renumber_workspaces();
        self.refresh_workspace(target);
        true
    }

    /// Assigns dense display indices `0..n` following the workspace list order.
    pub fn renumber_workspaces(&mut self) {
        for (idx, ws) in self.workspaces.iter_mut().enumerate() {
            ws.idx = idx;
        }
    }

    /// Makes the workspace current, showing it on the current output if it isn't shown anywhere.
    pub fn switch_workspace(&mut self, id: WorkspaceId) {
        let Some(idx) = self.workspace_idx(id) else {
            warn!("tried to switch to unknown workspace {id:?}");
            return;
        };

        if self.workspaces[idx].output().is_some() {
            self.current_workspace = Some(id);
            return;
        }

        let output_idx = self
            .current_workspace
            .and_then(|current| self.workspace(current))
            .and_then(|ws| ws.output())
            .and_then(|output| self.output_idx(output))
            .or_else(|| (!self.outputs.is_empty()).then_some(0));

        if let Some(output_idx) = output_idx {
            if let Some(old) = self.outputs[output_idx]
                .workspace()
                .and_then(|old| self.workspace_idx(old))
            {
                self.workspaces[old].set_output(None);
            }
            self.attach_workspace(output_idx, idx);
        }

        self.current_workspace = Some(id);
    }

    fn attach_workspace(&mut self, output_idx: usize, ws_idx: usize) {
        let output = &mut self.outputs[output_idx];
        let ws = &mut self.workspaces[ws_idx];

        ws.set_output(Some(output.id()));
        ws.notify_output_mode(output.logical_size());
        output.set_workspace(Some(ws.id()));

        self.sync_panel_widget(output_idx);
        self.refresh_workspace(ws_idx);
    }

    /// Connects an output, showing a free workspace on it.
    pub fn add_output(
        &mut self,
        name: String,
        mode_size: Size<i32, Physical>,
    ) -> anyhow::Result<OutputId> {
        let config = self.output_config.find(&name);
        let scale = config.and_then(|c| c.scale).map_or(1., |scale| scale.0);
        let transform = config.map_or(Transform::Normal, |c| to_smithay_transform(c.transform));

        let ws_idx = match self.workspaces.iter().position(|ws| ws.output().is_none()) {
            Some(idx) => idx,
            None => {
                self.add_workspace()?;
                self.workspaces.len() - 1
            }
        };

        self.outputs
            .try_reserve(1)
            .context("error allocating output")?;
        let output = Output::new(name, mode_size, scale, transform, &self.damage_config);
        let id = output.id();
        debug!("added output {} with {mode_size:?}", output.name());
        self.outputs.push(output);

        self.attach_workspace(self.outputs.len() - 1, ws_idx);

        let current_is_shown = self
            .current_workspace
            .and_then(|current| self.workspace(current))
            .is_some_and(|ws| ws.output().is_some());
        if !current_is_shown {
            self.current_workspace = Some(self.workspaces[ws_idx].id());
        }

        Ok(id)
    }

    /// Disconnects an output; its workspace goes back to the pool and its widgets are dropped.
    pub fn remove_output(&mut self, id: OutputId) {
        let Some(idx) = self.output_idx(id) else {
            warn!("tried to remove unknown output {id:?}");
            return;
        };

        let output = self.outputs.remove(idx);
        debug!("removed output {}", output.name());

        if let Some(ws_idx) = output.workspace().and_then(|ws| self.workspace_idx(ws)) {
            self.workspaces[ws_idx].set_output(None);

            if self.current_workspace == Some(self.workspaces[ws_idx].id()) {
                if let Some(other) = self.outputs.iter().find_map(|o| o.workspace()) {
                    self.current_workspace = Some(other);
                }
            }
        }
    }

    pub fn output_mode_changed(
        &mut self,
        id: OutputId,
        mode_size: Size<i32, Physical>,
        scale: Option<f64>,
        transform: Option<Transform>,
    ) {
        let Some(idx) = self.output_idx(id) else {
            warn!("mode change for unknown output {id:?}");
            return;
        };

        let output = &mut self.outputs[idx];
        output.set_mode(mode_size, scale, transform);
        let size = output.logical_size();

        if let Some(ws_idx) = output.workspace().and_then(|ws| self.workspace_idx(ws)) {
            self.workspaces[ws_idx].notify_output_mode(size);
            self.sync_panel_widget(idx);
            self.refresh_workspace(ws_idx);
        }
    }

    /// Damage reported by the output layer, in logical output coordinates.
    pub fn output_damage(&mut self, id: OutputId, rect: Rectangle<i32, Logical>) {
        let Some(idx) = self.output_idx(id) else {
            warn!("damage for unknown output {id:?}");
            return;
        };
        self.outputs[idx].add_damage(rect);
    }

    pub fn can_skip_frame(&self, id: OutputId) -> bool {
        self.output(id).is_some_and(|o| o.can_skip_frame())
    }

    /// Assembles the next frame of an output.
    ///
    /// A transaction that is still running past the fatal timeout is committed first, in case
    /// its watchdog never got to run.
    pub fn render_frame(&mut self, id: OutputId, buffer_age: usize, now: Instant) -> Option<Frame> {
        let _span = tracy_client::span!("Rose::render_frame");

        let Some(idx) = self.output_idx(id) else {
            warn!("frame for unknown output {id:?}");
            return None;
        };

        let ws_idx = self.outputs[idx]
            .workspace()
            .and_then(|ws| self.workspace_idx(ws));

        let (elements, show_panel) = match ws_idx {
            Some(ws_idx) => {
                self.workspaces[ws_idx].check_fatal_timeout(now);
                self.refresh_workspace(ws_idx);

                let ws = &self.workspaces[ws_idx];
                (ws.render_elements(), ws.effective_panel().is_visible)
            }
            None => (Vec::new(), false),
        };

        Some(self.outputs[idx].build_frame(buffer_age, elements, show_panel))
    }

    /// Assembles frames for every output that needs redrawing.
    pub fn redraw_outputs(&mut self, buffer_age: usize, now: Instant) -> Vec<(OutputId, Frame)> {
        let ids: Vec<_> = self
            .outputs
            .iter()
            .filter(|o| !o.can_skip_frame() && o.is_redraw_queued())
            .map(|o| o.id())
            .collect();

        ids.into_iter()
            .filter_map(|id| Some((id, self.render_frame(id, buffer_age, now)?)))
            .collect()
    }

    /// Creates a window on the given workspace, or the current one.
    pub fn new_toplevel(&mut self, workspace: Option<WorkspaceId>) -> anyhow::Result<SurfaceId> {
        let id = workspace
            .or(self.current_workspace)
            .context("no workspace for the new surface")?;
        let idx = self
            .workspace_idx(id)
            .with_context(|| format!("workspace {id:?} not found"))?;

        self.workspaces[idx].add_surface(Surface::new_toplevel())
    }

    pub fn new_widget(
        &mut self,
        output: OutputId,
        widget_type: WidgetType,
    ) -> anyhow::Result<SurfaceId> {
        let idx = self
            .output_idx(output)
            .with_context(|| format!("output {output:?} not found"))?;

        self.outputs[idx].add_widget(Surface::new_widget(widget_type))
    }

    /// Creates a subsurface or popup of `parent`, placed relative to it.
    pub fn new_child(
        &mut self,
        parent: SurfaceId,
        kind: SurfaceKind,
        geometry: Rectangle<i32, Logical>,
    ) -> anyhow::Result<SurfaceId> {
        if matches!(kind, SurfaceKind::Toplevel { .. }) {
            bail!("toplevels can't be children");
        }

        let mut child = Surface::new(kind);
        child.force_state(SurfaceState::default().with_geometry(geometry));

        match self.owner(parent) {
            Some(Owner::Workspace(idx)) => self.workspaces[idx].add_child(parent, child),
            Some(Owner::Output(idx)) => {
                let id = child.id();
                self.outputs[idx]
                    .surface_mut(parent)
                    .with_context(|| format!("parent {parent:?} not found"))?
                    .add_child(child)
                    .context("error allocating child surface")?;
                Ok(id)
            }
            None => bail!("parent {parent:?} not found"),
        }
    }

    pub fn place_child(&mut self, id: SurfaceId, geometry: Rectangle<i32, Logical>) {
        match self.owner(id) {
            Some(Owner::Workspace(idx)) => {
                self.workspaces[idx].place_child(id, geometry);
                self.refresh_workspace(idx);
            }
            Some(Owner::Output(idx)) => {
                if let Some(child) = self.outputs[idx].surface_mut(id) {
                    if !child.is_toplevel() {
                        let state = child.current().with_geometry(geometry);
                        child.force_state(state);
                    }
                }
            }
            None => warn!("tried to place unknown surface {id:?}"),
        }
    }

    pub fn map_surface(&mut self, id: SurfaceId) -> anyhow::Result<()> {
        match self.owner(id) {
            Some(Owner::Workspace(idx)) => {
                self.workspaces[idx].map_surface(id)?;
                self.refresh_workspace(idx);
            }
            Some(Owner::Output(idx)) => {
                self.outputs[idx].map_widget(id, true);
                self.sync_panel_widget(idx);
            }
            None => bail!("surface {id:?} not found"),
        }
        Ok(())
    }

    pub fn unmap_surface(&mut self, id: SurfaceId) {
        match self.owner(id) {
            Some(Owner::Workspace(idx)) => {
                self.workspaces[idx].unmap_surface(id);
                self.refresh_workspace(idx);
            }
            Some(Owner::Output(idx)) => {
                self.outputs[idx].map_widget(id, false);
            }
            None => warn!("tried to unmap unknown surface {id:?}"),
        }
    }

    /// Handles a client commit: either updates the surface right away or advances the
    /// transaction it takes part in.
    pub fn commit(&mut self, id: SurfaceId, commit: Commit) {
        match self.owner(id) {
            Some(Owner::Workspace(idx)) => {
                self.workspaces[idx].commit_surface(id, commit);
                self.refresh_workspace(idx);
            }
            Some(Owner::Output(idx)) => {
                self.outputs[idx].commit_widget(id, commit);
                if self.outputs[idx].mapped_panel().is_some_and(|p| p.id() == id) {
                    self.sync_panel_widget(idx);
                }
            }
            None => warn!("commit for unknown surface {id:?}"),
        }
    }

    /// Destroys a surface together with its children.
    pub fn destroy_surface(&mut self, id: SurfaceId) -> Option<Surface> {
        match self.owner(id) {
            Some(Owner::Workspace(idx)) => {
                let ws = &mut self.workspaces[idx];
                let surface = if ws.surface(id).is_some_and(|s| s.is_window()) {
                    ws.remove_surface(id)
                } else {
                    ws.remove_child(id)
                };
                self.refresh_workspace(idx);
                surface
            }
            Some(Owner::Output(idx)) => self.outputs[idx].remove_widget(id),
            None => {
                warn!("tried to destroy unknown surface {id:?}");
                None
            }
        }
    }

    /// Asks the client to close the surface.
    pub fn request_close(&mut self, id: SurfaceId) {
        let Some(surface) = self.surface_mut(id) else {
            warn!("close request for unknown surface {id:?}");
            return;
        };

        debug!("requesting close of {id:?}");
        surface.request_close();
    }

    /// Takes the configure the protocol layer should send for the surface, if any.
    pub fn take_configure(&mut self, id: SurfaceId) -> Option<Configure> {
        self.surface_mut(id)?.take_configure()
    }

    fn with_workspace_of(&mut self, id: SurfaceId, f: impl FnOnce(&mut Workspace)) -> bool {
        let Some(idx) = self.workspaces.iter().position(|ws| ws.has_surface(id)) else {
            warn!("no workspace has surface {id:?}");
            return false;
        };

        f(&mut self.workspaces[idx]);
        self.refresh_workspace(idx);
        true
    }

    pub fn configure_surface(&mut self, id: SurfaceId, state: SurfaceState, flags: ConfigureFlags) {
        self.with_workspace_of(id, |ws| {
            ws.configure_surface(id, state, flags);
            ws.compute_layout();
        });
    }

    pub fn move_surface(&mut self, id: SurfaceId, loc: Point<i32, Logical>) {
        self.with_workspace_of(id, |ws| ws.move_surface(id, loc));
    }

    pub fn set_maximized(&mut self, id: SurfaceId, maximized: bool) {
        self.with_workspace_of(id, |ws| ws.set_maximized(id, maximized));
    }

    pub fn set_fullscreen(&mut self, id: SurfaceId, fullscreen: bool) {
        self.with_workspace_of(id, |ws| ws.set_fullscreen(id, fullscreen));
    }

    pub fn set_minimized(&mut self, id: SurfaceId, minimized: bool) {
        self.with_workspace_of(id, |ws| ws.set_minimized(id, minimized));
    }

    /// Focuses a window, making its workspace current.
    pub fn focus_surface(&mut self, id: SurfaceId) {
        let mut workspace = None;
        self.with_workspace_of(id, |ws| {
            ws.focus_surface(Some(id));
            workspace = Some(ws.id());
        });

        if let Some(workspace) = workspace {
            self.current_workspace = Some(workspace);
        }
    }

    pub fn begin_interactive_resize(&mut self, id: SurfaceId) -> bool {
        let mut started = false;
        self.with_workspace_of(id, |ws| started = ws.begin_interactive_resize(id));
        started
    }

    pub fn end_interactive_resize(&mut self, id: SurfaceId, geometry: Rectangle<i32, Logical>) {
        self.with_workspace_of(id, |ws| ws.end_interactive_resize(id, geometry));
    }

    pub fn cancel_interactive_resize(&mut self, id: SurfaceId) {
        self.with_workspace_of(id, |ws| ws.cancel_interactive_resize(id));
    }

    /// Moves a window to another workspace.
    pub fn move_surface_to_workspace(&mut self, id: SurfaceId, workspace: WorkspaceId) -> bool {
        let Some(from) = self
            .workspaces
            .iter()
            .position(|ws| ws.surface(id).is_some_and(|s| s.is_window()))
        else {
            warn!("tried to move unknown window {id:?}");
            return false;
        };
        let Some(to) = self.workspace_idx(workspace) else {
            warn!("tried to move {id:?} to unknown workspace {workspace:?}");
            return false;
        };
        if from == to {
            return true;
        }

        if let Err(err) = self.workspaces[to].reserve_surface() {
            warn!("error moving {id:?}: {err:?}");
            return false;
        }

        self.workspaces[from].commit_transaction();
        let Some(surface) = self.workspaces[from].remove_surface(id) else {
            return false;
        };

        let target = &mut self.workspaces[to];
        target.commit_transaction();
        if let Err(err) = target.add_surface(surface) {
            warn!("error moving {id:?}: {err:?}");
            self.refresh_workspace(from);
            return false;
        }

        if self.current_workspace == Some(workspace) {
            self.workspaces[to].focus_surface(Some(id));
        }

        self.refresh_workspace(from);
        self.refresh_workspace(to);
        true
    }

    pub fn set_panel(&mut self, workspace: WorkspaceId, panel: Panel) {
        let Some(idx) = self.workspace_idx(workspace) else {
            warn!("panel change for unknown workspace {workspace:?}");
            return;
        };

        self.workspaces[idx].set_panel(panel);
        if let Some(output_idx) = self.workspaces[idx]
            .output()
            .and_then(|output| self.output_idx(output))
        {
            self.sync_panel_widget(output_idx);
        }
        self.refresh_workspace(idx);
    }

    pub fn pointer_motion(&mut self, point: Point<f64, Logical>) {
        if let Some(idx) = self.current_workspace.and_then(|ws| self.workspace_idx(ws)) {
            self.workspaces[idx].set_pointer(point);
        }
    }

    /// Topmost surface under `point` on the current workspace's output, widgets included.
    pub fn surface_under(
        &self,
        point: Point<f64, Logical>,
    ) -> Option<(SurfaceId, Point<f64, Logical>)> {
        let ws = self.current_workspace.and_then(|id| self.workspace(id))?;
        let output = ws.output().and_then(|id| self.output(id));
        let widgets = output.map_or(&[][..], |o| o.widgets());
        let show_panel = ws.effective_panel().is_visible;

        let widget_under = |above: bool| {
            widgets
                .iter()
                .rev()
                .filter(|w| w.is_mapped())
                .filter(|w| (w.widget_type() > Some(WidgetType::Background)) == above)
                .filter(|w| show_panel || w.widget_type() != Some(WidgetType::Panel))
                .find_map(|w| w.surface_under(point))
        };

        widget_under(true)
            .or_else(|| ws.surface_at(point))
            .or_else(|| widget_under(false))
    }

    pub fn surface_under_pointer(&self) -> Option<(SurfaceId, Point<f64, Logical>)> {
        let ws = self.current_workspace.and_then(|id| self.workspace(id))?;
        self.surface_under(ws.pointer())
    }

    /// Called by the watchdog timer armed when a transaction started.
    pub fn on_transaction_timeout(&mut self, workspace: WorkspaceId, serial: u64) {
        let _span = tracy_client::span!("Rose::on_transaction_timeout");

        if self
            .watchdogs
            .get(&workspace)
            .is_some_and(|watchdog| watchdog.serial == serial)
        {
            // The timer drops itself.
            self.watchdogs.remove(&workspace);
        }

        let Some(idx) = self.workspace_idx(workspace) else {
            warn!("transaction timeout for unknown workspace {workspace:?}");
            return;
        };

        if self.workspaces[idx].on_transaction_timeout(serial) {
            self.refresh_workspace(idx);
        }
    }

    /// Updates the panel of the workspace on this output from the mapped panel widget, and moves
    /// the widget to the edge the panel is on.
    fn sync_panel_widget(&mut self, output_idx: usize) {
        let output = &self.outputs[output_idx];
        let Some(ws_idx) = output.workspace().and_then(|ws| self.workspace_idx(ws)) else {
            return;
        };
        let Some(widget) = output.mapped_panel() else {
            return;
        };

        let widget_id = widget.id();
        let widget_size = widget.current().size();
        let output_size = output.logical_size();

        let ws = &mut self.workspaces[ws_idx];
        let mut panel = ws.panel();
        let (size, loc) = match panel.position {
            PanelPosition::Top => (widget_size.h, Point::from((0, 0))),
            PanelPosition::Bottom => (
                widget_size.h,
                Point::from((0, output_size.h - widget_size.h)),
            ),
            PanelPosition::Left => (widget_size.w, Point::from((0, 0))),
            PanelPosition::Right => (
                widget_size.w,
                Point::from((output_size.w - widget_size.w, 0)),
            ),
        };
        panel.size = size;
        ws.set_panel(panel);

        self.outputs[output_idx].place_widget(widget_id, loc);
        self.refresh_workspace(ws_idx);
    }

    /// Moves workspace damage and redraw requests to its output and syncs the watchdog.
    fn refresh_workspace(&mut self, idx: usize) {
        let ws = &mut self.workspaces[idx];
        let damage = ws.take_damage();
        let redraw = ws.take_redraw_request();

        if let Some(output) = ws
            .output()
            .and_then(|id| self.outputs.iter_mut().find(|o| o.id() == id))
        {
            if let Some(damage) = damage {
                output.add_damage(damage);
            }
            if redraw {
                output.queue_redraw();
            }
        }

        self.sync_watchdog(idx);
    }

    /// Arms the watchdog for a newly started transaction, or disarms it once it's finished.
    fn sync_watchdog(&mut self, idx: usize) {
        let ws = &self.workspaces[idx];
        let id = ws.id();
        let transaction = ws.transaction();

        if !transaction.is_active() {
            self.cancel_watchdog(id);
            return;
        }

        let serial = transaction.serial();
        if self
            .watchdogs
            .get(&id)
            .is_some_and(|watchdog| watchdog.serial == serial)
        {
            return;
        }

        self.cancel_watchdog(id);

        let timer = Timer::from_duration(self.options.transaction_timeout);
        let res = self.event_loop.insert_source(timer, move |_, _, state| {
            state.rose.on_transaction_timeout(id, serial);
            TimeoutAction::Drop
        });

        match res {
            Ok(token) => {
                trace!("armed watchdog for transaction {serial} on {id:?}");
                self.watchdogs.insert(id, Watchdog { serial, token });
            }
            // The fatal timeout at frame time still gets the transaction through.
            Err(err) => warn!("error arming transaction watchdog: {:?}", err.error),
        }
    }

    fn cancel_watchdog(&mut self, id: WorkspaceId) {
        if let Some(watchdog) = self.watchdogs.remove(&id) {
            trace!("disarmed watchdog for transaction {}", watchdog.serial);
            self.event_loop.remove(watchdog.token);
        }
    }

    pub fn has_watchdog(&self, id: WorkspaceId) -> bool {
        self.watchdogs.contains_key(&id)
    }
}
