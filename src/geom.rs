//! Document-space geometry

/// Axis-aligned rectangle in document units (72 per inch), mupdf corner
/// convention: `x0,y0` top-left, `x1,y1` bottom-right.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    #[must_use]
    pub const fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    #[must_use]
    pub const fn from_size(width: f32, height: f32) -> Self {
        Self::new(0.0, 0.0, width, height)
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    #[must_use]
    pub fn area(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.width() * self.height()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }

    #[must_use]
    pub fn center(&self) -> (f32, f32) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    #[must_use]
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1 && self.y0 < other.y1 && other.y0 < self.y1
    }

    /// Intersection of two rects; empty rects compare `is_empty`.
    #[must_use]
    pub fn intersect(&self, other: &Rect) -> Rect {
        Rect::new(
            self.x0.max(other.x0),
            self.y0.max(other.y0),
            self.x1.min(other.x1),
            self.y1.min(other.y1),
        )
    }

    /// True when `other` lies entirely within `self`.
    #[must_use]
    pub fn contains_rect(&self, other: &Rect) -> bool {
        self.x0 <= other.x0 && self.y0 <= other.y0 && self.x1 >= other.x1 && self.y1 >= other.y1
    }

    #[must_use]
    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }

    /// Distance from the rect's centre to a point.
    #[must_use]
    pub fn center_distance(&self, x: f32, y: f32) -> f32 {
        let (cx, cy) = self.center();
        (cx - x).hypot(cy - y)
    }
}

/// Region identity at 0.1-document-unit precision.
///
/// Stored as tenths so float rects that describe the same region compare
/// equal and hash identically (the same trick the tile keys use for scale).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegionKey {
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
}

impl RegionKey {
    #[must_use]
    pub fn from_rect(rect: &Rect) -> Self {
        let tenths = |v: f32| (v * 10.0).round() as i32;
        Self {
            x0: tenths(rect.x0),
            y0: tenths(rect.y0),
            x1: tenths(rect.x1),
            y1: tenths(rect.y1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_clips_to_overlap() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 15.0, 15.0);
        let i = a.intersect(&b);
        assert_eq!(i, Rect::new(5.0, 5.0, 10.0, 10.0));
        assert!(a.intersects(&b));
    }

    #[test]
    fn disjoint_rects_do_not_intersect() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(10.0, 0.0, 20.0, 10.0);
        assert!(!a.intersects(&b));
        assert!(a.intersect(&b).is_empty());
    }

    #[test]
    fn region_key_rounds_to_tenths() {
        let a = Rect::new(0.0, 0.0, 128.04, 128.04);
        let b = Rect::new(0.01, 0.0, 128.0, 128.01);
        assert_eq!(RegionKey::from_rect(&a), RegionKey::from_rect(&b));

        let c = Rect::new(0.0, 0.0, 128.3, 128.0);
        assert_ne!(RegionKey::from_rect(&a), RegionKey::from_rect(&c));
    }

    #[test]
    fn containment() {
        let page = Rect::from_size(612.0, 792.0);
        assert!(page.contains_rect(&Rect::new(0.0, 0.0, 128.0, 128.0)));
        assert!(!page.contains_rect(&Rect::new(600.0, 0.0, 640.0, 128.0)));
        assert!(page.contains_point(0.0, 0.0));
        assert!(!page.contains_point(612.0, 0.0));
    }
}
