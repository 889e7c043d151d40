//! 3D transformation utilities

use nalgebra::{Matrix3, Matrix4, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// An affine 3D transformation applied when baking node transforms into
/// vertex data
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform3D {
    pub matrix: Matrix4<f32>,
}

impl Transform3D {
    /// Create an identity transformation
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    /// Create a translation transformation
    pub fn translation(translation: Vector3<f32>) -> Self {
        Self {
            matrix: Matrix4::new_translation(&translation),
        }
    }

    /// Create a scaling transformation
    pub fn scaling(scale: Vector3<f32>) -> Self {
        Self {
            matrix: Matrix4::new_nonuniform_scaling(&scale),
        }
    }

    /// Create from a column-major 4x4 array, the layout glTF uses
    pub fn from_column_major(columns: [[f32; 4]; 4]) -> Self {
        Self {
            matrix: Matrix4::from_fn(|row, col| columns[col][row]),
        }
    }

    #[inline]
    fn linear(&self) -> Matrix3<f32> {
        self.matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// Apply the transformation to a point
    pub fn transform_point(&self, point: &Point3<f32>) -> Point3<f32> {
        let homogeneous = self.matrix * point.to_homogeneous();
        Point3::from_homogeneous(homogeneous).unwrap_or(*point)
    }

    /// Apply the transformation to a vector
    pub fn transform_vector(&self, vector: &Vector3<f32>) -> Vector3<f32> {
        self.linear() * vector
    }

    /// Transform a surface normal with the inverse transpose and renormalize
    pub fn transform_normal(&self, normal: &Vector3<f32>) -> Vector3<f32> {
        let m = self
            .linear()
            .try_inverse()
            .map(|inv| inv.transpose())
            .unwrap_or_else(|| self.linear());
        (m * normal).try_normalize(f32::EPSILON).unwrap_or(*normal)
    }

    /// True when the transform mirrors space
    pub fn flips_winding(&self) -> bool {
        self.linear().determinant() < 0.0
    }

    /// `self` applied after `other`
    pub fn compose(self, other: Self) -> Self {
        Self {
            matrix: self.matrix * other.matrix,
        }
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_column_major_translation() {
        let t = Transform3D::from_column_major([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [3.0, 4.0, 5.0, 1.0],
        ]);
        let p = t.transform_point(&Point3::new(1.0, 1.0, 1.0));
        assert_relative_eq!(p, Point3::new(4.0, 5.0, 6.0));
        assert!(!t.flips_winding());
    }

    #[test]
    fn test_normal_under_nonuniform_scale() {
        // Plane x = y scaled along x: normal must stay perpendicular
        let t = Transform3D::scaling(Vector3::new(2.0, 1.0, 1.0));
        let n = Vector3::new(1.0, -1.0, 0.0).normalize();
        let tangent = t.transform_vector(&Vector3::new(1.0, 1.0, 0.0));
        let tn = t.transform_normal(&n);
        assert_relative_eq!(tn.dot(&tangent), 0.0, epsilon = 1e-6);
        assert_relative_eq!(tn.norm(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_compose_applies_child_first() {
        let parent = Transform3D::translation(Vector3::new(10.0, 0.0, 0.0));
        let child = Transform3D::scaling(Vector3::new(2.0, 2.0, -2.0));
        let world = parent.compose(child);
        let p = world.transform_point(&Point3::new(1.0, 1.0, 1.0));
        assert_relative_eq!(p, Point3::new(12.0, 2.0, -2.0));
        assert!(world.flips_winding());
    }
}
