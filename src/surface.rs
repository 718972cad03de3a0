//! Client surfaces.
//!
//! A [`Surface`] is one rectangular piece of client content: a toplevel window, a subsurface, or
//! a popup. Subsurfaces and popups are owned by the surface they are attached to, so a toplevel
//! together with its children forms a tree with the toplevel at the root.
//!
//! Every surface carries three copies of its state. `current` is what is on screen, `pending` is
//! what the compositor asked the client for, and `previous` is what was on screen before the last
//! change and is only kept around for damage tracking. Outside of a layout transaction `pending`
//! and `current` are always equal.

use smithay::utils::{Logical, Point, Rectangle, Size, Transform};

use crate::utils::id::IdCounter;

static SURFACE_ID_COUNTER: IdCounter = IdCounter::new();
static BUFFER_ID_COUNTER: IdCounter = IdCounter::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u32);

impl SurfaceId {
    fn next() -> SurfaceId {
        SurfaceId(SURFACE_ID_COUNTER.next())
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u32);

impl BufferId {
    pub fn next() -> BufferId {
        BufferId(BUFFER_ID_COUNTER.next())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    /// A top-level window, or a widget if `widget` is set.
    Toplevel { widget: Option<WidgetType> },
    /// A subsurface attached to another surface.
    Subsurface,
    /// A popup.
    Temporary,
}

/// Special-purpose toplevels that live outside of workspace window management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WidgetType {
    Background,
    Panel,
    Notification,
    Prompt,
    ScreenLock,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceState {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub is_activated: bool,
    pub is_maximized: bool,
    pub is_minimized: bool,
    pub is_fullscreen: bool,
}

/// A client buffer attached to a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buffer {
    pub id: BufferId,
    pub size: Size<i32, Logical>,
    pub transform: Transform,
}

/// Which of the two per-surface snapshot slots an entry occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Normal,
    Decoration,
}

/// Frozen visual state of a surface, drawn instead of the surface during a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub buffer: Option<BufferId>,
    pub geometry: Rectangle<i32, Logical>,
    pub transform: Transform,
}

/// Request for the client to adopt a new state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configure {
    pub serial: u32,
    pub state: SurfaceState,
}

/// What the client sent along with a commit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Commit {
    /// Newly attached buffer, if any.
    pub buffer: Option<Buffer>,
    /// Damaged part of the surface in surface-local coordinates.
    pub damage: Option<Rectangle<i32, Logical>>,
}

#[derive(Debug)]
pub struct Surface {
    id: SurfaceId,
    kind: SurfaceKind,

    previous: SurfaceState,
    current: SurfaceState,
    pending: SurfaceState,

    /// Geometry to restore after unmaximizing, unfullscreening or cancelling a resize.
    saved: Option<SurfaceState>,

    /// Whether the workspace transaction waits for this surface to commit.
    pub(crate) is_transaction_running: bool,

    is_mapped: bool,
    pub(crate) is_visible: bool,

    /// Whether the compositor draws a decoration frame around this surface.
    has_decoration: bool,

    buffer: Option<Buffer>,

    /// Accumulated damage in surface-local coordinates.
    damage: Option<Rectangle<i32, Logical>>,

    /// Subsurfaces and popups, bottom to top.
    children: Vec<Surface>,

    last_configure_serial: u32,
    pending_configure: Option<Configure>,
    close_requested: bool,
}

impl SurfaceState {
    pub fn loc(&self) -> Point<i32, Logical> {
        Point::from((self.x, self.y))
    }

    pub fn size(&self) -> Size<i32, Logical> {
        Size::from((self.width, self.height))
    }

    pub fn geometry(&self) -> Rectangle<i32, Logical> {
        Rectangle::new(self.loc(), self.size())
    }

    pub fn set_geometry(&mut self, geometry: Rectangle<i32, Logical>) {
        self.x = geometry.loc.x;
        self.y = geometry.loc.y;
        self.width = geometry.size.w;
        self.height = geometry.size.h;
    }

    pub fn with_geometry(mut self, geometry: Rectangle<i32, Logical>) -> Self {
        self.set_geometry(geometry);
        self
    }
}

impl Buffer {
    pub fn new(size: impl Into<Size<i32, Logical>>) -> Self {
        Self {
            id: BufferId::next(),
            size: size.into(),
            transform: Transform::Normal,
        }
    }
}

impl Commit {
    pub fn with_buffer(size: impl Into<Size<i32, Logical>>) -> Self {
        Self {
            buffer: Some(Buffer::new(size)),
            damage: None,
        }
    }
}

impl Surface {
    pub fn new(kind: SurfaceKind) -> Self {
        let has_decoration = kind == SurfaceKind::Toplevel { widget: None };

        Self {
            id: SurfaceId::next(),
            kind,
            previous: SurfaceState::default(),
            current: SurfaceState::default(),
            pending: SurfaceState::default(),
            saved: None,
            is_transaction_running: false,
            is_mapped: false,
            is_visible: false,
            has_decoration,
            buffer: None,
            damage: None,
            children: Vec::new(),
            last_configure_serial: 0,
            pending_configure: None,
            close_requested: false,
        }
    }

    pub fn new_toplevel() -> Self {
        Self::new(SurfaceKind::Toplevel { widget: None })
    }

    pub fn new_widget(widget: WidgetType) -> Self {
        Self::new(SurfaceKind::Toplevel {
            widget: Some(widget),
        })
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn kind(&self) -> SurfaceKind {
        self.kind
    }

    pub fn widget_type(&self) -> Option<WidgetType> {
        match self.kind {
            SurfaceKind::Toplevel { widget } => widget,
            _ => None,
        }
    }

    pub fn is_toplevel(&self) -> bool {
        matches!(self.kind, SurfaceKind::Toplevel { .. })
    }

    /// Whether this is a regular window, managed by a workspace.
    pub fn is_window(&self) -> bool {
        self.kind == SurfaceKind::Toplevel { widget: None }
    }

    pub fn previous(&self) -> &SurfaceState {
        &self.previous
    }

    pub fn current(&self) -> &SurfaceState {
        &self.current
    }

    pub fn pending(&self) -> &SurfaceState {
        &self.pending
    }

    pub fn saved(&self) -> Option<&SurfaceState> {
        self.saved.as_ref()
    }

    pub fn is_transaction_running(&self) -> bool {
        self.is_transaction_running
    }

    pub fn is_mapped(&self) -> bool {
        self.is_mapped
    }

    pub fn is_visible(&self) -> bool {
        self.is_visible
    }

    pub fn has_decoration(&self) -> bool {
        self.has_decoration
    }

    pub fn set_decoration(&mut self, has_decoration: bool) {
        self.has_decoration = has_decoration && self.is_toplevel();
    }

    pub fn buffer(&self) -> Option<&Buffer> {
        self.buffer.as_ref()
    }

    pub fn children(&self) -> &[Surface] {
        &self.children
    }

    pub fn is_close_requested(&self) -> bool {
        self.close_requested
    }

    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    /// Takes the configure that should be sent to the client, if any.
    pub fn take_configure(&mut self) -> Option<Configure> {
        self.pending_configure.take()
    }

    /// Serial of the most recent configure sent to the client.
    pub fn last_configure_serial(&self) -> u32 {
        self.last_configure_serial
    }

    pub(crate) fn set_mapped(&mut self, mapped: bool) {
        self.is_mapped = mapped;
        if !mapped {
            self.is_visible = false;
        }
    }

    pub(crate) fn save_state(&mut self) {
        if self.saved.is_none() {
            self.saved = Some(self.pending);
        }
    }

    pub(crate) fn take_saved(&mut self) -> Option<SurfaceState> {
        self.saved.take()
    }

    /// Sets the state we want the client to adopt and queues a configure for it.
    pub(crate) fn request_state(&mut self, state: SurfaceState) {
        self.pending = state;
        self.last_configure_serial = self.last_configure_serial.wrapping_add(1);
        self.pending_configure = Some(Configure {
            serial: self.last_configure_serial,
            state,
        });
    }

    /// Makes the pending state current.
    pub(crate) fn apply_pending(&mut self) {
        if self.current != self.pending {
            self.previous = self.current;
            self.current = self.pending;
        }
    }

    /// Whether a commit at `size` satisfies the pending state.
    pub fn matches_pending(&self, size: Size<i32, Logical>) -> bool {
        self.pending.size() == size
    }

    /// Applies a client commit to the buffer and damage, leaving geometry alone.
    ///
    /// Returns the size of the committed content.
    pub(crate) fn apply_commit(&mut self, commit: Commit) -> Size<i32, Logical> {
        if let Some(buffer) = commit.buffer {
            self.buffer = Some(buffer);
            // A new buffer replaces all of the content.
            self.damage = Some(Rectangle::from_size(buffer.size));
        } else if let Some(damage) = commit.damage {
            self.damage = Some(match self.damage {
                Some(existing) => crate::utils::union(existing, damage),
                None => damage,
            });
        }

        self.buffer.map_or(self.current.size(), |buffer| buffer.size)
    }

    /// Adopts the size the client committed while no transaction is waiting on this surface.
    pub(crate) fn adopt_size(&mut self, size: Size<i32, Logical>) {
        let mut state = self.current;
        state.width = size.w;
        state.height = size.h;
        if state != self.current {
            self.previous = self.current;
            self.current = state;
        }
        self.pending = self.current;
    }

    /// Forces a state without any client round-trip.
    ///
    /// Used for subsurfaces and popups, whose position is decided by their parent.
    pub(crate) fn force_state(&mut self, state: SurfaceState) {
        self.pending = state;
        self.apply_pending();
    }

    /// Takes the accumulated surface-local damage and forgets the previous geometry.
    pub(crate) fn take_damage(&mut self) -> Option<Rectangle<i32, Logical>> {
        self.previous = self.current;
        self.damage.take()
    }

    pub fn snapshot(&self, kind: SnapshotKind, margin: i32) -> Option<Snapshot> {
        let geometry = match kind {
            SnapshotKind::Normal => self.current.geometry(),
            SnapshotKind::Decoration if self.has_decoration => {
                crate::utils::expand(self.current.geometry(), margin)
            }
            SnapshotKind::Decoration => return None,
        };

        Some(Snapshot {
            buffer: self.buffer.map(|buffer| buffer.id),
            geometry,
            transform: self.buffer.map_or(Transform::Normal, |buffer| buffer.transform),
        })
    }

    pub(crate) fn add_child(&mut self, child: Surface) -> anyhow::Result<()> {
        self.children.try_reserve(1)?;
        self.children.push(child);
        Ok(())
    }

    pub(crate) fn remove_child(&mut self, id: SurfaceId) -> Option<Surface> {
        if let Some(idx) = self.children.iter().position(|c| c.id == id) {
            return Some(self.children.remove(idx));
        }

        self.children
            .iter_mut()
            .find_map(|child| child.remove_child(id))
    }

    /// Whether this surface or one of its descendants has the given id.
    pub fn contains(&self, id: SurfaceId) -> bool {
        self.id == id || self.children.iter().any(|c| c.contains(id))
    }

    pub fn find(&self, id: SurfaceId) -> Option<&Surface> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    pub(crate) fn find_mut(&mut self, id: SurfaceId) -> Option<&mut Surface> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }

    /// Returns the sum of the current locations of all ancestors of `id`.
    ///
    /// Children store their location relative to their parent, so this is the offset to add to a
    /// descendant's geometry to get workspace-local coordinates.
    pub fn ancestor_offset(&self, id: SurfaceId) -> Option<Point<i32, Logical>> {
        if self.id == id {
            return Some(Point::from((0, 0)));
        }

        self.children.iter().find_map(|child| {
            child
                .ancestor_offset(id)
                .map(|offset| offset + self.current.loc())
        })
    }

    /// Visits this surface and all descendants, passing each one's ancestor offset.
    pub(crate) fn for_each_mut(
        &mut self,
        offset: Point<i32, Logical>,
        f: &mut impl FnMut(&mut Surface, Point<i32, Logical>),
    ) {
        f(self, offset);
        let offset = offset + self.current.loc();
        for child in &mut self.children {
            child.for_each_mut(offset, f);
        }
    }

    /// Returns the topmost surface of this tree under `point`, given in parent coordinates.
    pub fn surface_under(
        &self,
        point: Point<f64, Logical>,
    ) -> Option<(SurfaceId, Point<f64, Logical>)> {
        let local = point - self.current.loc().to_f64();

        if let Some(hit) = self
            .children
            .iter()
            .rev()
            .find_map(|child| child.surface_under(local))
        {
            return Some(hit);
        }

        let size = self.current.size().to_f64();
        let inside = local.x >= 0. && local.y >= 0. && local.x < size.w && local.y < size.h;
        inside.then_some((self.id, local))
    }
}
