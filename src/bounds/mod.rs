pub mod shapes;

pub use shapes::{BoundBall, BoundBox, BoundCircle, BoundRect, BoundSphere, QueryShape};

/// Generic axis-aligned bounding box for N-dimensional space.
///
/// Bounds are inclusive on both ends, so two boxes that only share a face still overlap.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox<const D: usize> {
    pub min: [f32; D],
    pub max: [f32; D],
}

impl<const D: usize> BoundingBox<D> {
    pub fn new(min: [f32; D], max: [f32; D]) -> Self {
        Self { min, max }
    }

    /// The identity of [`BoundingBox::union`]: a box that contains nothing.
    pub fn empty() -> Self {
        Self {
            min: [f32::INFINITY; D],
            max: [f32::NEG_INFINITY; D],
        }
    }

    /// A degenerate box holding a single point.
    pub fn from_point(point: [f32; D]) -> Self {
        Self { min: point, max: point }
    }

    /// A box of half extent `radius` around `center`.
    pub fn around(center: [f32; D], radius: f32) -> Self {
        let mut min = center;
        let mut max = center;
        for i in 0..D {
            min[i] -= radius;
            max[i] += radius;
        }
        Self { min, max }
    }

    pub fn is_empty(&self) -> bool {
        (0..D).any(|i| self.min[i] > self.max[i])
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut out = *self;
        out.expand(other);
        out
    }

    /// Grows the box in place so it also covers `other`.
    pub fn expand(&mut self, other: &Self) {
        for i in 0..D {
            self.min[i] = self.min[i].min(other.min[i]);
            self.max[i] = self.max[i].max(other.max[i]);
        }
    }

    pub fn expand_point(&mut self, point: &[f32; D]) {
        for i in 0..D {
            self.min[i] = self.min[i].min(point[i]);
            self.max[i] = self.max[i].max(point[i]);
        }
    }

    pub fn center(&self) -> [f32; D] {
        let mut c = [0.0; D];
        for i in 0..D {
            c[i] = (self.min[i] + self.max[i]) * 0.5;
        }
        c
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        (0..D).all(|i| self.min[i] <= other.max[i] && self.max[i] >= other.min[i])
    }

    pub fn contains(&self, point: &[f32; D]) -> bool {
        (0..D).all(|i| point[i] >= self.min[i] && point[i] <= self.max[i])
    }

    /// Squared distance from `point` to the closest point of the box, zero inside.
    pub fn distance_sq(&self, point: &[f32; D]) -> f32 {
        let mut d2 = 0.0;
        for i in 0..D {
            let d = (self.min[i] - point[i]).max(0.0).max(point[i] - self.max[i]);
            d2 += d * d;
        }
        d2
    }
}

/// Squared euclidean distance between two points.
pub fn distance_sq<const D: usize>(a: &[f32; D], b: &[f32; D]) -> f32 {
    let mut d2 = 0.0;
    for i in 0..D {
        let d = a[i] - b[i];
        d2 += d * d;
    }
    d2
}
