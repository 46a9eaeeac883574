//! Geographic windows and their projection onto a raster's pixel grid

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::raster::GeoTransform;

/// Axis-aligned rectangle in the rasters' reference frame.
///
/// An extent with `max <= min` on either axis is empty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Build from a GDAL-style projection window `[min_x, max_y, max_x, min_y]`
    pub fn from_projwin(projwin: [f64; 4]) -> Self {
        Self::new(projwin[0], projwin[3], projwin[2], projwin[1])
    }

    /// Full extent of a raster with the given transform and size (cols, rows)
    pub fn of_raster(transform: &GeoTransform, cols: usize, rows: usize) -> Self {
        let (min_x, min_y, max_x, max_y) = transform.bounds(cols, rows);
        Self::new(min_x, min_y, max_x, max_y)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn is_empty(&self) -> bool {
        !(self.max_x > self.min_x && self.max_y > self.min_y)
    }

    /// Overlapping part of both extents; empty when they don't overlap
    pub fn intersect(&self, other: &Extent) -> Extent {
        Extent::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        )
    }

    /// Whether `other` lies completely inside this extent
    pub fn contains(&self, other: &Extent) -> bool {
        !other.is_empty()
            && other.min_x >= self.min_x
            && other.min_y >= self.min_y
            && other.max_x <= self.max_x
            && other.max_y <= self.max_y
    }

    /// Project this extent onto the pixel grid of a raster and clip the
    /// result to the raster bounds.
    ///
    /// Returns `None` when the transform can't be inverted or when nothing of
    /// the raster falls inside the extent.
    pub fn to_pixel_window(
        &self,
        transform: &GeoTransform,
        cols: usize,
        rows: usize,
    ) -> Option<PixelWindow> {
        if self.is_empty() || cols == 0 || rows == 0 {
            return None;
        }
        let inv = transform.invert()?;

        let corners = [
            inv.apply(self.min_x, self.max_y),
            inv.apply(self.max_x, self.max_y),
            inv.apply(self.min_x, self.min_y),
            inv.apply(self.max_x, self.min_y),
        ];
        let (mut c0, mut r0) = (f64::INFINITY, f64::INFINITY);
        let (mut c1, mut r1) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (c, r) in corners {
            c0 = c0.min(c);
            r0 = r0.min(r);
            c1 = c1.max(c);
            r1 = r1.max(r);
        }

        // Snap corners sitting on a pixel edge back onto that edge.
        const EPS: f64 = 1e-9;
        let col_start = (c0 + EPS).floor().max(0.0);
        let row_start = (r0 + EPS).floor().max(0.0);
        let col_end = (c1 - EPS).ceil().min(cols as f64);
        let row_end = (r1 - EPS).ceil().min(rows as f64);

        if !(col_end > col_start && row_end > row_start) {
            return None;
        }

        Some(PixelWindow {
            col_off: col_start as usize,
            row_off: row_start as usize,
            cols: (col_end - col_start) as usize,
            rows: (row_end - row_start) as usize,
        })
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

/// Rectangular block of pixels, offsets counted from the raster's top-left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub cols: usize,
    pub rows: usize,
}

impl PixelWindow {
    pub fn new(col_off: usize, row_off: usize, cols: usize, rows: usize) -> Self {
        Self {
            col_off,
            row_off,
            cols,
            rows,
        }
    }

    /// Window covering a whole raster of size (cols, rows)
    pub fn full(cols: usize, rows: usize) -> Self {
        Self::new(0, 0, cols, rows)
    }

    pub fn len(&self) -> usize {
        self.cols * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this window fits inside a raster of size (cols, rows)
    pub fn fits(&self, cols: usize, rows: usize) -> bool {
        self.col_off + self.cols <= cols && self.row_off + self.rows <= rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersect_and_contains() {
        let a = Extent::new(0.0, 0.0, 10.0, 10.0);
        let b = Extent::new(5.0, 5.0, 15.0, 15.0);
        let i = a.intersect(&b);
        assert_eq!(i, Extent::new(5.0, 5.0, 10.0, 10.0));
        assert!(a.contains(&i));
        assert!(!a.contains(&b));

        let far = Extent::new(20.0, 20.0, 30.0, 30.0);
        assert!(a.intersect(&far).is_empty());
    }

    #[test]
    fn test_projwin_order() {
        let e = Extent::from_projwin([1.0, 9.0, 5.0, 2.0]);
        assert_eq!(e, Extent::new(1.0, 2.0, 5.0, 9.0));
    }

    #[test]
    fn test_pixel_window_full_extent() {
        let gt = GeoTransform::new(0.0, 100.0, 1.0, -1.0);
        let e = Extent::of_raster(&gt, 100, 50);
        let w = e.to_pixel_window(&gt, 100, 50).unwrap();
        assert_eq!(w, PixelWindow::full(100, 50));
    }

    #[test]
    fn test_pixel_window_clipped() {
        let gt = GeoTransform::new(0.0, 10.0, 1.0, -1.0);
        // Overhangs the right and bottom edges.
        let e = Extent::new(7.5, -5.0, 20.0, 8.0);
        let w = e.to_pixel_window(&gt, 10, 10).unwrap();
        assert_eq!(w, PixelWindow::new(7, 2, 3, 8));
    }

    #[test]
    fn test_pixel_window_outside() {
        let gt = GeoTransform::new(0.0, 10.0, 1.0, -1.0);
        let e = Extent::new(50.0, 50.0, 60.0, 60.0);
        assert!(e.to_pixel_window(&gt, 10, 10).is_none());
    }
}
