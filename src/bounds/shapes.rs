use super::BoundingBox;

/// Axis-aligned rectangle in 2D.
pub type BoundRect = BoundingBox<2>;
/// Axis-aligned box in 3D.
pub type BoundBox = BoundingBox<3>;
/// Circle in 2D.
pub type BoundCircle = BoundBall<2>;
/// Sphere in 3D.
pub type BoundSphere = BoundBall<3>;

/// A shape that tree queries can test node bounds against.
///
/// Queries are generic over the shape so each shape kind gets its own monomorphized
/// traversal, there is no runtime tag.
pub trait QueryShape<const D: usize> {
    /// Checks whether the shape touches the (inclusive) box.
    fn overlaps(&self, bound: &BoundingBox<D>) -> bool;
}

impl<const D: usize> QueryShape<D> for BoundingBox<D> {
    #[inline]
    fn overlaps(&self, bound: &BoundingBox<D>) -> bool {
        BoundingBox::overlaps(self, bound)
    }
}

/// A ball (circle, sphere) given by center and radius.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundBall<const D: usize> {
    pub center: [f32; D],
    pub radius: f32,
}

impl<const D: usize> BoundBall<D> {
    pub fn new(center: [f32; D], radius: f32) -> Self {
        Self { center, radius }
    }

    pub fn bounding_box(&self) -> BoundingBox<D> {
        BoundingBox::around(self.center, self.radius)
    }
}

impl<const D: usize> QueryShape<D> for BoundBall<D> {
    #[inline]
    fn overlaps(&self, bound: &BoundingBox<D>) -> bool {
        bound.distance_sq(&self.center) <= self.radius * self.radius
    }
}
