use git_version::git_version;
use smithay::utils::{Logical, Point, Rectangle, Size, Transform};

pub mod id;
pub mod transform;

pub fn version() -> String {
    format!(
        "{} ({})",
        env!("CARGO_PKG_VERSION"),
        git_version!(fallback = "unknown commit"),
    )
}

/// Whether the rectangle covers no area at all.
pub fn is_empty<Kind>(rect: Rectangle<i32, Kind>) -> bool {
    rect.size.w <= 0 || rect.size.h <= 0
}

/// Combines two rectangles into their bounding box.
///
/// A rectangle with zero area does not contribute, so the union of an empty rectangle with `b`
/// is exactly `b`, even if the empty rectangle sits somewhere far away.
pub fn union<Kind>(a: Rectangle<i32, Kind>, b: Rectangle<i32, Kind>) -> Rectangle<i32, Kind> {
    if is_empty(a) {
        return b;
    }
    if is_empty(b) {
        return a;
    }
    a.merge(b)
}

/// Grows the rectangle by `margin` on every side.
pub fn expand<Kind>(rect: Rectangle<i32, Kind>, margin: i32) -> Rectangle<i32, Kind> {
    Rectangle::new(
        Point::from((rect.loc.x - margin, rect.loc.y - margin)),
        Size::from((rect.size.w + margin * 2, rect.size.h + margin * 2)),
    )
}

/// Returns the size with negative components replaced by zero.
pub fn clamp_size(size: Size<i32, Logical>) -> Size<i32, Logical> {
    Size::from((size.w.max(0), size.h.max(0)))
}

pub fn to_smithay_transform(transform: rose_config::Transform) -> Transform {
    match transform {
        rose_config::Transform::Normal => Transform::Normal,
        rose_config::Transform::_90 => Transform::_90,
        rose_config::Transform::_180 => Transform::_180,
        rose_config::Transform::_270 => Transform::_270,
        rose_config::Transform::Flipped => Transform::Flipped,
        rose_config::Transform::Flipped90 => Transform::Flipped90,
        rose_config::Transform::Flipped180 => Transform::Flipped180,
        rose_config::Transform::Flipped270 => Transform::Flipped270,
    }
}
