//! Conversion of workspace-local rectangles into output buffer coordinates.
//!
//! Damage is tracked in logical workspace coordinates. The renderer wants it in the pixel
//! coordinates of the buffer it is about to draw into, which is the output mode before the
//! output transform is applied. So a rectangle goes through two steps: scaling by the output
//! scale, then remapping by the output transform.

use smithay::utils::{Logical, Physical, Point, Rectangle, Size, Transform};

/// Rounds a logical coordinate to the nearest physical pixel, halves rounding up.
fn round_scaled(value: i32, scale: f64) -> i32 {
    (f64::from(value) * scale + 0.5).floor() as i32
}

/// Scales all four edges of the rectangle by `scale`.
///
/// The edges are rounded independently, so the resulting size is the distance between the
/// rounded edges rather than the rounded size. This keeps adjacent rectangles adjacent.
pub fn scale_rect(rect: Rectangle<i32, Logical>, scale: f64) -> Rectangle<i32, Physical> {
    let x1 = round_scaled(rect.loc.x, scale);
    let y1 = round_scaled(rect.loc.y, scale);
    let x2 = round_scaled(rect.loc.x + rect.size.w, scale);
    let y2 = round_scaled(rect.loc.y + rect.size.h, scale);

    Rectangle::new(Point::from((x1, y1)), Size::from((x2 - x1, y2 - y1)))
}

/// Remaps a scaled rectangle into the output buffer according to the output transform.
///
/// `output_size` is the output mode in pixels, i.e. before the transform is applied. For the
/// rotated variants the rectangle comes from a space that is `output_size` with width and height
/// swapped.
pub fn transform_rect(
    rect: Rectangle<i32, Physical>,
    transform: Transform,
    output_size: Size<i32, Physical>,
) -> Rectangle<i32, Physical> {
    let Rectangle { loc, size } = rect;
    let (ow, oh) = (output_size.w, output_size.h);
    let (x, y, w, h) = (loc.x, loc.y, size.w, size.h);

    let (dx, dy) = match transform {
        Transform::Normal => (x, y),
        Transform::_90 => (ow - y - h, x),
        Transform::_180 => (ow - x - w, oh - y - h),
        Transform::_270 => (y, oh - x - w),
        Transform::Flipped => (ow - x - w, y),
        Transform::Flipped90 => (y, x),
        Transform::Flipped180 => (x, oh - y - h),
        Transform::Flipped270 => (ow - y - h, oh - x - w),
    };

    let size = if is_rotated(transform) {
        Size::from((h, w))
    } else {
        size
    };

    Rectangle::new(Point::from((dx, dy)), size)
}

/// Converts a workspace-local rectangle to output buffer pixels.
pub fn to_output_buffer(
    rect: Rectangle<i32, Logical>,
    scale: f64,
    transform: Transform,
    output_size: Size<i32, Physical>,
) -> Rectangle<i32, Physical> {
    transform_rect(scale_rect(rect, scale), transform, output_size)
}

/// Whether the transform rotates by an odd multiple of 90 degrees.
pub fn is_rotated(transform: Transform) -> bool {
    matches!(
        transform,
        Transform::_90 | Transform::_270 | Transform::Flipped90 | Transform::Flipped270
    )
}

/// Logical size of an output with the given mode, scale and transform.
pub fn logical_output_size(
    mode_size: Size<i32, Physical>,
    scale: f64,
    transform: Transform,
) -> Size<i32, Logical> {
    let (w, h) = if is_rotated(transform) {
        (mode_size.h, mode_size.w)
    } else {
        (mode_size.w, mode_size.h)
    };
    Size::from((
        (f64::from(w) / scale).round() as i32,
        (f64::from(h) / scale).round() as i32,
    ))
}
