use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use ulid::Ulid;

/// Largest coordinate or extent accepted from a persisted document
pub const MAX_COORDINATE: i64 = i32::MAX as i64;

/// Position and size of a widget on the dashboard canvas (pixels).
///
/// Fields are signed so intermediate results of a nudge can sit above or
/// left of the origin; the layout clamps them before they are stored.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WidgetPosition {
    pub left: i64,
    pub top: i64,
    pub width: i64,
    pub height: i64,
}

impl WidgetPosition {
    pub fn new(left: i64, top: i64, width: i64, height: i64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Whether every field lies in `0..=MAX_COORDINATE`, so edge and center
    /// arithmetic cannot overflow
    pub fn in_range(&self) -> bool {
        [self.left, self.top, self.width, self.height]
            .iter()
            .all(|v| (0..=MAX_COORDINATE).contains(v))
    }

    /// Get the right edge of the rectangle
    pub fn right(&self) -> i64 {
        self.left + self.width
    }

    /// Get the bottom edge of the rectangle
    pub fn bottom(&self) -> i64 {
        self.top + self.height
    }

    pub fn translate(&self, dx: i64, dy: i64) -> Self {
        Self {
            left: self.left + dx,
            top: self.top + dy,
            ..*self
        }
    }

    // Doubled centers keep the overlap test in integer arithmetic.
    fn center_x2(&self) -> i64 {
        2 * self.left + self.width
    }

    fn center_y2(&self) -> i64 {
        2 * self.top + self.height
    }

    /// Whether the two rectangles intersect under the center-distance test:
    /// the distance between centers on each axis must be strictly less than
    /// the half-sum of the extents on that axis.
    pub fn intersects(&self, other: &WidgetPosition) -> bool {
        let dx = (self.center_x2() - other.center_x2()).abs();
        let dy = (self.center_y2() - other.center_y2()).abs();
        dx < self.width + other.width && dy < self.height + other.height
    }

    /// Classify an overlap with `other` from the point of view of `self`.
    ///
    /// Returns the direction `self` has to travel to get clear of `other`,
    /// or `None` if the rectangles do not intersect. The label is decided
    /// by comparing vertical centers, falling back to the top edge and the
    /// horizontal center/left edge, so that for any two distinct rectangles
    /// `a.overlap_with(b)` and `b.overlap_with(a)` are opposite.
    pub fn overlap_with(&self, other: &WidgetPosition) -> Option<Direction> {
        if !self.intersects(other) {
            return None;
        }

        let key = |p: &WidgetPosition| (p.center_y2(), p.top, p.center_x2(), p.left);
        match key(self).cmp(&key(other)) {
            Ordering::Less => Some(Direction::Up),
            Ordering::Equal | Ordering::Greater => Some(Direction::Down),
        }
    }

    /// Check if this rectangle contains a point (strictly inside)
    pub fn contains_point(&self, x: i64, y: i64) -> bool {
        self.intersects(&WidgetPosition::new(x, y, 0, 0))
    }

    /// Snap to a grid of `tile` pixels: origin rounds down, extent rounds up
    /// to at least one tile.
    pub fn snapped(&self, tile: i64) -> Self {
        if tile <= 0 {
            return *self;
        }
        let ceil = |v: i64| (v + tile - 1).div_euclid(tile) * tile;
        Self {
            left: self.left.div_euclid(tile) * tile,
            top: self.top.div_euclid(tile) * tile,
            width: ceil(self.width).max(tile),
            height: ceil(self.height).max(tile),
        }
    }

    /// Keep the rectangle on the canvas.
    ///
    /// A zero canvas dimension means that axis is unbounded. The rectangle is
    /// slid back inside a bounded far edge, never resized, and never starts
    /// above or left of the origin.
    pub fn clamped(&self, canvas_width: i64, canvas_height: i64) -> Self {
        let width = self.width.max(0);
        let height = self.height.max(0);
        let mut left = self.left;
        let mut top = self.top;

        if canvas_width != 0 && left + width > canvas_width {
            left = canvas_width - width;
        }
        if canvas_height != 0 && top + height > canvas_height {
            top = canvas_height - height;
        }

        Self {
            left: left.max(0),
            top: top.max(0),
            width,
            height,
        }
    }
}

/// Direction an overlapping widget is pushed (or a canvas grows).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

/// A widget that overlaps some area, and which way it should move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overlap {
    pub direction: Direction,
    pub widget: Ulid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rectangle_edges() {
        let rect = WidgetPosition::new(10, 20, 100, 50);
        assert_eq!(rect.right(), 110);
        assert_eq!(rect.bottom(), 70);
        assert_eq!(rect.translate(-10, 5), WidgetPosition::new(0, 25, 100, 50));
    }

    #[test]
    fn test_intersects_center_distance() {
        let rect1 = WidgetPosition::new(0, 0, 100, 100);
        let rect2 = WidgetPosition::new(50, 50, 100, 100);
        let rect3 = WidgetPosition::new(100, 0, 100, 100);
        let rect4 = WidgetPosition::new(200, 200, 100, 100);

        assert!(rect1.intersects(&rect2));
        // Touching edges do not overlap
        assert!(!rect1.intersects(&rect3));
        assert!(!rect1.intersects(&rect4));
    }

    #[test]
    fn test_overlap_direction() {
        let upper = WidgetPosition::new(0, 0, 100, 100);
        let lower = WidgetPosition::new(50, 50, 100, 100);

        assert_eq!(upper.overlap_with(&lower), Some(Direction::Up));
        assert_eq!(lower.overlap_with(&upper), Some(Direction::Down));
        assert_eq!(upper.overlap_with(&WidgetPosition::new(500, 0, 10, 10)), None);
    }

    #[test]
    fn test_overlap_tie_break_on_same_row() {
        let left = WidgetPosition::new(0, 0, 100, 100);
        let right = WidgetPosition::new(40, 0, 100, 100);

        assert_eq!(left.overlap_with(&right), Some(Direction::Up));
        assert_eq!(right.overlap_with(&left), Some(Direction::Down));
    }

    #[test]
    fn test_contains_point() {
        let rect = WidgetPosition::new(0, 0, 100, 100);
        assert!(rect.contains_point(50, 50));
        assert!(!rect.contains_point(150, 150));
    }

    #[test]
    fn test_snapped_rounds_extent_up() {
        let rect = WidgetPosition::new(0, 0, 100, 100);
        assert_eq!(rect.snapped(32), WidgetPosition::new(0, 0, 128, 128));

        let rect = WidgetPosition::new(40, 70, 10, 0);
        assert_eq!(rect.snapped(32), WidgetPosition::new(32, 64, 32, 32));
    }

    #[test]
    fn test_clamped_slides_back_inside() {
        let rect = WidgetPosition::new(950, 10, 100, 100);
        assert_eq!(rect.clamped(1000, 0), WidgetPosition::new(900, 10, 100, 100));

        let rect = WidgetPosition::new(-20, -5, 100, 100);
        assert_eq!(rect.clamped(0, 0), WidgetPosition::new(0, 0, 100, 100));

        // Wider than the canvas: pinned to the origin, never resized
        let rect = WidgetPosition::new(10, 0, 300, 10);
        assert_eq!(rect.clamped(200, 0), WidgetPosition::new(0, 0, 300, 10));
    }

    #[test]
    fn test_in_range() {
        assert!(WidgetPosition::new(0, 0, 0, 0).in_range());
        assert!(WidgetPosition::new(MAX_COORDINATE, 0, MAX_COORDINATE, 1).in_range());
        assert!(!WidgetPosition::new(MAX_COORDINATE + 1, 0, 10, 10).in_range());
        assert!(!WidgetPosition::new(0, -1, 10, 10).in_range());
        assert!(!WidgetPosition::new(0, 0, i64::MAX, 10).in_range());
    }

    #[test]
    fn test_direction_opposite() {
        assert_eq!(Direction::Up.opposite(), Direction::Down);
        assert_eq!(Direction::Left.opposite(), Direction::Right);
    }

    fn rect_strategy() -> impl Strategy<Value = WidgetPosition> {
        (-200i64..800, -200i64..800, 1i64..300, 1i64..300)
            .prop_map(|(l, t, w, h)| WidgetPosition::new(l, t, w, h))
    }

    proptest! {
        #[test]
        fn overlap_labels_are_opposite(a in rect_strategy(), b in rect_strategy()) {
            prop_assume!(a != b);
            let ab = a.overlap_with(&b);
            let ba = b.overlap_with(&a);
            prop_assert_eq!(ab.is_some(), ba.is_some());
            if let (Some(ab), Some(ba)) = (ab, ba) {
                prop_assert_eq!(ab, ba.opposite());
            }
        }

        #[test]
        fn clamping_is_idempotent(r in rect_strategy(), w in 0i64..1000, h in 0i64..1000) {
            let once = r.clamped(w, h);
            prop_assert_eq!(once.clamped(w, h), once);
            prop_assert!(once.left >= 0 && once.top >= 0);
        }

        #[test]
        fn aligned_rect_inside_canvas_is_untouched(
            col in 0i64..10, row in 0i64..10, cols in 1i64..5, rows in 1i64..5
        ) {
            let tile = 32;
            let r = WidgetPosition::new(col * tile, row * tile, cols * tile, rows * tile);
            prop_assert_eq!(r.clamped(20 * tile, 20 * tile), r);
            prop_assert_eq!(r.snapped(tile), r);
        }
    }
}
