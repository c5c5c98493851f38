//! Coordinate mapping between PDF user space and render/canvas space.
//!
//! PDF user space has its origin at the bottom-left of the page with Y
//! increasing upward; canvas space has its origin at the top-left with Y
//! increasing downward. Annotation geometry is always stored in PDF
//! user-space units (top-left anchored) so it survives zoom and re-render;
//! the viewport transform here is display-only and is inverted before any
//! pointer coordinate is stored back.

use serde::{Deserialize, Serialize};

/// A 2D point (x, y).
pub type Point = (f64, f64);

/// Small epsilon for floating-point comparisons.
pub const EPSILON: f64 = 1e-9;

/// Minimum zoom factor for the display viewport.
pub const MIN_ZOOM: f64 = 0.5;

/// Maximum zoom factor for the display viewport.
pub const MAX_ZOOM: f64 = 3.0;

/// Fields taller than this are treated as digit boxes and never nudged.
pub const DIGIT_BOX_HEIGHT: f64 = 20.0;

/// Fields narrower than `height * DIGIT_BOX_ASPECT` are digit boxes.
pub const DIGIT_BOX_ASPECT: f64 = 2.0;

/// An axis-aligned rectangle in PDF user-space units.
///
/// `(x, y)` is the anchor corner: bottom-left when the rectangle comes
/// straight from the PDF, top-left once converted to canvas orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Right edge.
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    /// Far edge along Y (top in PDF space, bottom in canvas space).
    pub fn far_y(&self) -> f64 {
        self.y + self.height
    }

    /// True if `other` lies fully inside `self` expanded by `tolerance`
    /// on every side.
    pub fn contains(&self, other: &Rect, tolerance: f64) -> bool {
        other.x >= self.x - tolerance
            && other.right() <= self.right() + tolerance
            && other.y >= self.y - tolerance
            && other.far_y() <= self.far_y() + tolerance
    }
}

/// Compares two floats for approximate equality.
#[inline]
pub fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b).abs() < epsilon
}

/// Converts a PDF user-space position to canvas space.
///
/// Takes the element's own height so the returned Y is the element's
/// top-left corner in canvas orientation.
#[inline]
pub fn pdf_to_canvas(x: f64, y: f64, height: f64, page_height: f64) -> Point {
    (x, page_height - y - height)
}

/// Inverse of [`pdf_to_canvas`]: recovers the PDF-space bottom-left
/// position from a canvas-space top-left position.
#[inline]
pub fn canvas_to_pdf(cx: f64, cy: f64, height: f64, page_height: f64) -> Point {
    (cx, page_height - cy - height)
}

/// Converts PDF units to render pixels at the page's render scale.
#[inline]
pub fn scale_to_render(pdf_units: f64, render_scale: f64) -> f64 {
    pdf_units * render_scale
}

/// Converts render pixels back to PDF units.
#[inline]
pub fn render_to_pdf(pixels: f64, render_scale: f64) -> f64 {
    pixels / render_scale
}

/// True if a field rectangle looks like a single-character digit box.
///
/// Digit boxes are already centered by the PDF author and must not
/// receive the single-line vertical nudge.
pub fn is_digit_box(rect: &Rect) -> bool {
    rect.height > DIGIT_BOX_HEIGHT || rect.width < rect.height * DIGIT_BOX_ASPECT
}

/// Canvas-space Y adjustment for a field's display position.
///
/// PDF form rectangles for single underlined lines sit below the writing
/// line, so non-digit-box fields are shifted up by half their height.
pub fn display_nudge(rect: &Rect) -> f64 {
    if is_digit_box(rect) {
        0.0
    } else {
        -(rect.height * 0.5)
    }
}

/// Display-only zoom/pan transform layered on top of the render scale.
///
/// Never persisted into annotation geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub zoom: f64,
    pub pan: Point,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan: (0.0, 0.0),
        }
    }
}

impl Viewport {
    /// Adjusts zoom by `delta`, clamped to `[MIN_ZOOM, MAX_ZOOM]`.
    pub fn zoom_by(&mut self, delta: f64) {
        self.zoom = (self.zoom + delta).clamp(MIN_ZOOM, MAX_ZOOM);
    }

    /// Shifts the pan offset by a screen-pixel delta.
    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        self.pan = (self.pan.0 + dx, self.pan.1 + dy);
    }

    /// Maps a canvas-space point (PDF units, top-left origin) to screen
    /// pixels: render scale first, then zoom, then pan.
    pub fn to_screen(&self, p: Point, render_scale: f64) -> Point {
        (
            p.0 * render_scale * self.zoom + self.pan.0,
            p.1 * render_scale * self.zoom + self.pan.1,
        )
    }

    /// Maps a screen-pixel point (e.g. a pointer event) back to
    /// canvas-space PDF units, undoing pan, zoom and render scale.
    pub fn to_page(&self, p: Point, render_scale: f64) -> Point {
        (
            (p.0 - self.pan.0) / (self.zoom * render_scale),
            (p.1 - self.pan.1) / (self.zoom * render_scale),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canvas_round_trip_recovers_pdf_position() {
        let cases = [
            (100.0, 700.0, 20.0, 792.0),
            (0.0, 0.0, 30.0, 842.0),
            (12.5, 401.25, 9.75, 612.0),
        ];
        for (x, y, h, page_h) in cases {
            let (cx, cy) = pdf_to_canvas(x, y, h, page_h);
            let (rx, ry) = canvas_to_pdf(cx, cy, h, page_h);
            assert!(approx_eq(rx, x, EPSILON));
            assert!(approx_eq(ry, y, EPSILON));
        }
    }

    #[test]
    fn narrow_field_is_digit_box_and_not_nudged() {
        let rect = Rect::new(0.0, 0.0, 12.0, 10.0);
        assert!(is_digit_box(&rect));
        assert_eq!(display_nudge(&rect), 0.0);
    }

    #[test]
    fn wide_single_line_field_is_nudged_up_half_height() {
        let rect = Rect::new(0.0, 0.0, 200.0, 10.0);
        assert!(!is_digit_box(&rect));
        assert_eq!(display_nudge(&rect), -5.0);
    }

    #[test]
    fn tall_field_counts_as_digit_box() {
        let rect = Rect::new(0.0, 0.0, 300.0, 24.0);
        assert!(is_digit_box(&rect));
    }

    #[test]
    fn zoom_is_clamped_to_viewport_range() {
        let mut vp = Viewport::default();
        vp.zoom_by(10.0);
        assert_eq!(vp.zoom, MAX_ZOOM);
        vp.zoom_by(-10.0);
        assert_eq!(vp.zoom, MIN_ZOOM);
    }

    #[test]
    fn viewport_transform_round_trips_pointer_coordinates() {
        let mut vp = Viewport::default();
        vp.zoom_by(0.8);
        vp.pan_by(40.0, -12.5);
        let scale = 1.5;
        let page = (123.4, 56.7);
        let screen = vp.to_screen(page, scale);
        let back = vp.to_page(screen, scale);
        assert!(approx_eq(back.0, page.0, 1e-9));
        assert!(approx_eq(back.1, page.1, 1e-9));
    }

    #[test]
    fn render_scale_conversion_inverts() {
        let px = scale_to_render(72.0, 1.5);
        assert!(approx_eq(px, 108.0, EPSILON));
        assert!(approx_eq(render_to_pdf(px, 1.5), 72.0, EPSILON));
    }
}
