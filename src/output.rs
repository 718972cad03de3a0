//! Outputs and the frames drawn on them.
//!
//! An output shows one workspace and owns the widgets drawn around it: the background below the
//! windows, and the panel, notifications, prompts and the screen lock above them. Everything that
//! changes on screen ends up in the output's [`DamageTracker`], and once per frame the renderer
//! asks for a [`Frame`]: the damaged area together with the scene to draw into it.

use anyhow::{bail, Context as _};
use smithay::utils::{Logical, Physical, Point, Rectangle, Size, Transform};

use crate::damage::{surface_damage, DamageTracker};
use crate::layout::WorkspaceId;
use crate::surface::{BufferId, Commit, SnapshotKind, Surface, SurfaceId, WidgetType};
use crate::utils::id::IdCounter;
use crate::utils::transform::logical_output_size;

static OUTPUT_ID_COUNTER: IdCounter = IdCounter::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputId(u32);

impl OutputId {
    fn next() -> OutputId {
        OutputId(OUTPUT_ID_COUNTER.next())
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

#[derive(Debug)]
pub struct Output {
    id: OutputId,
    name: String,

    /// Current mode in physical pixels, before the transform is applied.
    mode_size: Size<i32, Physical>,
    scale: f64,
    transform: Transform,

    damage: DamageTracker,
    /// Always redraw everything.
    damage_disabled: bool,

    /// Workspace shown on this output.
    workspace: Option<WorkspaceId>,

    /// Widgets sorted by type, bottom to top.
    widgets: Vec<Surface>,

    redraw_queued: bool,
}

/// One frame for the renderer to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Part of the buffer to repaint, in output buffer pixels.
    pub damage: Rectangle<i32, Physical>,
    /// What to draw, bottom to top, in logical output coordinates.
    pub elements: Vec<RenderElement>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderElement {
    pub surface: SurfaceId,
    pub buffer: Option<BufferId>,
    pub geometry: Rectangle<i32, Logical>,
    pub transform: Transform,
    pub kind: ElementKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// Current contents of a surface.
    Live,
    /// Decoration frame drawn around a window.
    Decoration,
    /// Frozen contents captured when a transaction started.
    Snapshot(SnapshotKind),
}

impl Output {
    pub fn new(
        name: String,
        mode_size: Size<i32, Physical>,
        scale: f64,
        transform: Transform,
        damage: &rose_config::Damage,
    ) -> Self {
        let mut output = Self {
            id: OutputId::next(),
            name,
            mode_size,
            scale: usable_scale(scale),
            transform,
            damage: DamageTracker::new(damage.ring_len()),
            damage_disabled: damage.disable,
            workspace: None,
            widgets: Vec::new(),
            redraw_queued: false,
        };
        output.damage_all();
        output
    }

    pub fn id(&self) -> OutputId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode_size(&self) -> Size<i32, Physical> {
        self.mode_size
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Size of the output in logical coordinates, after the transform.
    pub fn logical_size(&self) -> Size<i32, Logical> {
        logical_output_size(self.mode_size, self.scale, self.transform)
    }

    pub fn workspace(&self) -> Option<WorkspaceId> {
        self.workspace
    }

    pub(crate) fn set_workspace(&mut self, workspace: Option<WorkspaceId>) {
        self.workspace = workspace;
        self.damage_all();
    }

    pub fn damage_tracker(&self) -> &DamageTracker {
        &self.damage
    }

    pub fn widgets(&self) -> &[Surface] {
        &self.widgets
    }

    pub fn has_surface(&self, id: SurfaceId) -> bool {
        self.widgets.iter().any(|w| w.contains(id))
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&Surface> {
        self.widgets.iter().find_map(|w| w.find(id))
    }

    pub(crate) fn surface_mut(&mut self, id: SurfaceId) -> Option<&mut Surface> {
        self.widgets.iter_mut().find_map(|w| w.find_mut(id))
    }

    /// Changes the mode, scale or transform; the whole output needs a redraw afterwards.
    pub fn set_mode(
        &mut self,
        mode_size: Size<i32, Physical>,
        scale: Option<f64>,
        transform: Option<Transform>,
    ) {
        self.mode_size = mode_size;
        if let Some(scale) = scale {
            self.scale = usable_scale(scale);
        }
        if let Some(transform) = transform {
            self.transform = transform;
        }

        debug!(
            "output {} mode changed to {mode_size:?} at {} {:?}",
            self.name, self.scale, self.transform
        );
        self.damage_all();
    }

    /// Adds damage in logical output coordinates.
    pub fn add_damage(&mut self, rect: Rectangle<i32, Logical>) {
        self.damage.add_damage(rect);
        self.redraw_queued = true;
    }

    pub fn damage_all(&mut self) {
        self.damage.add_full_damage(self.logical_size());
        self.redraw_queued = true;
    }

    pub fn queue_redraw(&mut self) {
        self.redraw_queued = true;
    }

    pub fn is_redraw_queued(&self) -> bool {
        self.redraw_queued
    }

    /// Whether nothing changed for long enough that the previous frame can stay on screen.
    ///
    /// This is what allows direct scan-out of a client buffer to go on undisturbed.
    pub fn can_skip_frame(&self) -> bool {
        !self.redraw_queued && self.damage.is_settled()
    }

    pub fn add_widget(&mut self, widget: Surface) -> anyhow::Result<SurfaceId> {
        let Some(widget_type) = widget.widget_type() else {
            bail!("only widgets can be added to an output, got {:?}", widget.kind());
        };

        self.widgets
            .try_reserve(1)
            .context("error allocating widget")?;

        // Keep widgets sorted by type, newer ones above older ones of the same type.
        let idx = self
            .widgets
            .iter()
            .position(|w| w.widget_type().is_some_and(|t| t > widget_type))
            .unwrap_or(self.widgets.len());

        let id = widget.id();
        self.widgets.insert(idx, widget);
        Ok(id)
    }

    /// Removes a widget, or a child of one.
    pub fn remove_widget(&mut self, id: SurfaceId) -> Option<Surface> {
        if let Some(idx) = self.widgets.iter().position(|w| w.id() == id) {
            let widget = self.widgets.remove(idx);
            if widget.is_mapped() {
                self.add_damage(widget.current().geometry());
            }
            return Some(widget);
        }

        let root = self.widgets.iter_mut().find(|w| w.contains(id))?;
        let offset = root.ancestor_offset(id).unwrap_or_default();
        let is_mapped = root.is_mapped();
        let child = root.remove_child(id)?;
        if is_mapped {
            let mut rect = child.current().geometry();
            rect.loc += offset;
            self.add_damage(rect);
        }
        Some(child)
    }

    /// Places the widget at `loc` in output coordinates.
    pub(crate) fn place_widget(&mut self, id: SurfaceId, loc: Point<i32, Logical>) {
        let Some(widget) = self.widgets.iter_mut().find(|w| w.id() == id) else {
            return;
        };

        let mut state = *widget.current();
        state.x = loc.x;
        state.y = loc.y;
        widget.force_state(state);
    }

    pub(crate) fn map_widget(&mut self, id: SurfaceId, mapped: bool) -> bool {
        let Some(widget) = self.widgets.iter_mut().find(|w| w.id() == id) else {
            return false;
        };
        if widget.is_mapped() == mapped {
            return true;
        }

        widget.set_mapped(mapped);
        widget.is_visible = mapped;
        let rect = widget.current().geometry();
        self.add_damage(rect);
        true
    }

    /// Handles a commit of a widget or one of its children.
    ///
    /// Widgets are placed by the compositor, so the committed size is adopted directly. The damage
    /// goes into the tracker right away, queueing a redraw.
    pub(crate) fn commit_widget(&mut self, id: SurfaceId, commit: Commit) -> bool {
        let Some(root) = self.widgets.iter_mut().find(|w| w.contains(id)) else {
            return false;
        };

        let has_buffer = commit.buffer.is_some();
        if let Some(surface) = root.find_mut(id) {
            let size = surface.apply_commit(commit);
            if has_buffer {
                surface.adopt_size(size);
            }
        }

        self.collect_widget_damage();
        true
    }

    /// Panel widget currently shown on this output, if any.
    pub fn mapped_panel(&self) -> Option<&Surface> {
        self.widgets
            .iter()
            .rev()
            .find(|w| w.widget_type() == Some(WidgetType::Panel) && w.is_mapped())
    }

    /// Moves damage from the mapped widgets into the tracker.
    pub(crate) fn collect_widget_damage(&mut self) {
        let mut damage = Vec::new();
        for widget in &mut self.widgets {
            let is_mapped = widget.is_mapped();
            widget.for_each_mut(Point::from((0, 0)), &mut |surface, offset| {
                if let Some(rect) = surface_damage(surface, offset, 0) {
                    if is_mapped {
                        damage.push(rect);
                    }
                }
            });
        }

        for rect in damage {
            self.add_damage(rect);
        }
    }

    /// Builds the next frame around the workspace scene.
    ///
    /// `buffer_age` is the age of the buffer the renderer is about to draw into, 0 if unknown.
    /// Panel widgets are left out when the workspace panel is hidden.
    pub(crate) fn build_frame(
        &mut self,
        buffer_age: usize,
        workspace: Vec<RenderElement>,
        show_panel: bool,
    ) -> Frame {
        let _span = tracy_client::span!("Output::build_frame");

        self.collect_widget_damage();

        let damage = if self.damage_disabled {
            // Still age the ring so that it's consistent if damage tracking gets enabled.
            self.damage
                .consume_damage(0, self.scale, self.transform, self.mode_size)
        } else {
            self.damage
                .consume_damage(buffer_age, self.scale, self.transform, self.mode_size)
        };
        self.redraw_queued = false;

        let mut elements = Vec::with_capacity(workspace.len() + self.widgets.len());
        let mut workspace = Some(workspace);

        for widget in &self.widgets {
            let Some(widget_type) = widget.widget_type() else {
                continue;
            };

            // The workspace goes between the background and everything else.
            if widget_type > WidgetType::Background {
                if let Some(workspace) = workspace.take() {
                    elements.extend(workspace);
                }
            }

            if !widget.is_mapped() || (widget_type == WidgetType::Panel && !show_panel) {
                continue;
            }

            push_widget_elements(widget, Point::from((0, 0)), &mut elements);
        }

        if let Some(workspace) = workspace {
            elements.extend(workspace);
        }

        trace!(
            "frame on {} with damage {damage:?} and {} elements",
            self.name,
            elements.len()
        );

        Frame { damage, elements }
    }
}

/// Clamps the scale to the range where logical sizes stay sane.
fn usable_scale(scale: f64) -> f64 {
    if !scale.is_finite() {
        warn!("ignoring invalid output scale {scale}");
        return 1.;
    }

    let clamped = scale.clamp(0.1, 10.);
    if clamped != scale {
        warn!("clamping output scale {scale} to {clamped}");
    }
    clamped
}

fn push_widget_elements(
    surface: &Surface,
    offset: Point<i32, Logical>,
    out: &mut Vec<RenderElement>,
) {
    let mut geometry = surface.current().geometry();
    geometry.loc += offset;
    let buffer = surface.buffer();

    out.push(RenderElement {
        surface: surface.id(),
        buffer: buffer.map(|buffer| buffer.id),
        geometry,
        transform: buffer.map_or(Transform::Normal, |buffer| buffer.transform),
        kind: ElementKind::Live,
    });

    let offset = offset + surface.current().loc();
    for child in surface.children() {
        push_widget_elements(child, offset, out);
    }
}
