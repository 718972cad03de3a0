//! Per-output damage tracking.
//!
//! The renderer reuses buffers from a small swapchain, and each buffer it gets back is some
//! number of frames old. To repaint such a buffer it has to redraw everything that changed in
//! those frames. The tracker keeps one accumulated rectangle per possible age: slot 0 is the
//! damage of the frame being built, slot `i` is everything that changed over the last `i` frames.
//!
//! Rectangles are combined into their bounding box rather than kept as a list. This repaints a
//! bit more than necessary but keeps every operation constant-time.

use smithay::utils::{Logical, Physical, Point, Rectangle, Size, Transform};

use crate::surface::{Surface, SurfaceKind};
use crate::utils::transform::to_output_buffer;
use crate::utils::{expand, is_empty, union};

/// After this many frames without damage it's safe to skip rendering altogether.
const MAX_FRAMES_WITHOUT_DAMAGE: u8 = 2;

#[derive(Debug)]
pub struct DamageTracker {
    /// Accumulated damage per buffer age, in workspace-local logical coordinates.
    ring: Vec<Rectangle<i32, Logical>>,
    frames_without_damage: u8,
}

impl DamageTracker {
    /// Creates a tracker able to handle buffer ages up to `ring_len - 1`.
    pub fn new(ring_len: usize) -> Self {
        Self {
            ring: vec![Rectangle::default(); ring_len.max(1)],
            frames_without_damage: 0,
        }
    }

    pub fn ring_len(&self) -> usize {
        self.ring.len()
    }

    /// Damage accumulated for a buffer of the given age.
    pub fn damage(&self, age: usize) -> Option<Rectangle<i32, Logical>> {
        self.ring.get(age).copied()
    }

    pub fn frames_without_damage(&self) -> u8 {
        self.frames_without_damage
    }

    /// Marks `rect` as damaged for every buffer age.
    pub fn add_damage(&mut self, rect: Rectangle<i32, Logical>) {
        if is_empty(rect) {
            return;
        }

        for slot in &mut self.ring {
            *slot = union(*slot, rect);
        }
        self.frames_without_damage = 0;
    }

    /// Marks the whole `area` as damaged, e.g. after an output mode change.
    pub fn add_full_damage(&mut self, area: Size<i32, Logical>) {
        self.add_damage(Rectangle::from_size(area));
    }

    /// Accounts for the changes a surface went through since its damage was last taken.
    ///
    /// `offset` is the sum of the locations of the surface's ancestors, see
    /// [`Surface::ancestor_offset()`].
    pub fn add_surface_damage(
        &mut self,
        surface: &mut Surface,
        offset: Point<i32, Logical>,
        decoration_margin: i32,
    ) {
        if let Some(rect) = surface_damage(surface, offset, decoration_margin) {
            self.add_damage(rect);
        }
    }

    /// Returns what needs to be redrawn in a buffer of the given age and ages the ring by a frame.
    ///
    /// The result is in output buffer pixels. Ages outside of what the ring can answer, including
    /// 0 for a fresh buffer, get the full output.
    pub fn consume_damage(
        &mut self,
        buffer_age: usize,
        scale: f64,
        transform: Transform,
        output_size: Size<i32, Physical>,
    ) -> Rectangle<i32, Physical> {
        let damage = if (1..self.ring.len()).contains(&buffer_age) {
            to_output_buffer(self.ring[buffer_age], scale, transform, output_size)
        } else {
            Rectangle::from_size(output_size)
        };

        if is_empty(self.ring[0]) {
            self.frames_without_damage =
                (self.frames_without_damage + 1).min(MAX_FRAMES_WITHOUT_DAMAGE);
        }

        self.ring.rotate_right(1);
        self.ring[0] = Rectangle::default();

        damage
    }

    /// Whether enough frames passed without damage that the output contents are settled.
    pub fn is_settled(&self) -> bool {
        self.frames_without_damage >= MAX_FRAMES_WITHOUT_DAMAGE
    }
}

/// Computes the workspace-local area a surface change needs repainted.
///
/// If the surface moved or resized, that's both the old and the new geometry, including the
/// decoration frame for toplevels. Otherwise it's the damage the client reported. Committing
/// popups damage their whole geometry since their own damage reports turned out to be unreliable.
///
/// Takes the surface damage, so calling this twice in a row returns `None` the second time.
pub fn surface_damage(
    surface: &mut Surface,
    offset: Point<i32, Logical>,
    decoration_margin: i32,
) -> Option<Rectangle<i32, Logical>> {
    let previous = surface.previous().geometry();
    let current = surface.current().geometry();
    let kind = surface.kind();
    let reported = surface.take_damage();

    let mut rect = if previous != current {
        let margin = if surface.is_toplevel() {
            decoration_margin
        } else {
            0
        };
        union(expand(previous, margin), expand(current, margin))
    } else if kind == SurfaceKind::Temporary {
        // Only once something was committed.
        reported.map(|_| current)?
    } else {
        let mut damage = reported?;
        damage.loc += current.loc;
        damage
    };

    if is_empty(rect) {
        return None;
    }

    rect.loc += offset;
    Some(rect)
}
