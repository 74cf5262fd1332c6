//! Bounding volumes.

use glam::{DVec3, Vec3};

/// A bounding sphere in dataset coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    /// Sphere center.
    pub center: DVec3,
    /// Sphere radius. Never negative.
    pub radius: f64,
}

impl BoundingSphere {
    /// Create a new bounding sphere. Negative radii are clamped to zero.
    #[must_use]
    pub fn new(center: DVec3, radius: f64) -> Self {
        Self {
            center,
            radius: radius.max(0.0),
        }
    }

    /// Diameter of the sphere.
    #[must_use]
    pub fn diameter(&self) -> f64 {
        2.0 * self.radius
    }
}

/// An axis-aligned range of points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range3 {
    /// Component-wise minimum.
    pub low: Vec3,
    /// Component-wise maximum.
    pub high: Vec3,
}

impl Range3 {
    /// Range covering all points, or `None` if there are none.
    #[must_use]
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut range = Self {
            low: *first,
            high: *first,
        };
        for &p in rest {
            range.extend(p);
        }
        Some(range)
    }

    /// Grow the range to include a point.
    pub fn extend(&mut self, point: Vec3) {
        self.low = self.low.min(point);
        self.high = self.high.max(point);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_radius_is_clamped() {
        let sphere = BoundingSphere::new(DVec3::ZERO, -5.0);
        assert!(sphere.radius.abs() < f64::EPSILON);
    }

    #[test]
    fn test_range_covers_points() {
        let range = Range3::from_points(&[Vec3::ZERO, Vec3::ONE, Vec3::splat(-1.0)]).unwrap();
        assert_eq!(range.low, Vec3::splat(-1.0));
        assert_eq!(range.high, Vec3::ONE);
        assert!(Range3::from_points(&[]).is_none());
    }
}
