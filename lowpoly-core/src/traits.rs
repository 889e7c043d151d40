//! Core traits for lowpoly

use crate::{mesh::*, point::*, transform::Transform3D};

/// Trait for objects with a spatial extent
pub trait Bounded {
    /// Get the axis-aligned bounding box of the object
    fn bounding_box(&self) -> (Point3f, Point3f);

    /// Get the center point of the object
    fn center(&self) -> Point3f {
        let (min, max) = self.bounding_box();
        Point3f::from((min.coords + max.coords) * 0.5)
    }

    /// Length of the bounding box diagonal
    fn diagonal(&self) -> f32 {
        let (min, max) = self.bounding_box();
        (max - min).norm()
    }
}

/// Trait for objects that can be transformed
pub trait Transformable {
    /// Apply a transformation to the object
    fn transform(&mut self, transform: &Transform3D);
}

impl Bounded for TriangleMesh {
    fn bounding_box(&self) -> (Point3f, Point3f) {
        if self.vertices.is_empty() {
            return (Point3f::origin(), Point3f::origin());
        }

        let mut min = self.vertices[0];
        let mut max = self.vertices[0];

        for vertex in &self.vertices {
            min.x = min.x.min(vertex.x);
            min.y = min.y.min(vertex.y);
            min.z = min.z.min(vertex.z);

            max.x = max.x.max(vertex.x);
            max.y = max.y.max(vertex.y);
            max.z = max.z.max(vertex.z);
        }

        (min, max)
    }
}

impl Transformable for TriangleMesh {
    /// Bake a transform into positions and normals. Mirroring transforms
    /// also reverse the face winding so normals keep pointing outward.
    fn transform(&mut self, transform: &Transform3D) {
        for v in &mut self.vertices {
            *v = transform.transform_point(v);
        }
        if let Some(normals) = self.normals.as_mut() {
            for n in normals.iter_mut() {
                *n = transform.transform_normal(n);
            }
        }
        if transform.flips_winding() {
            for face in &mut self.faces {
                face.swap(1, 2);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn make_triangle() -> TriangleMesh {
        let mut mesh = TriangleMesh::from_vertices_and_faces(
            vec![Point3f::origin(), Point3f::new(2.0, 0.0, 0.0), Point3f::new(0.0, 4.0, 0.0)],
            vec![[0, 1, 2]],
        );
        mesh.update_vertex_normals();
        mesh
    }

    #[test]
    fn test_bounding_box_and_center() {
        let mesh = make_triangle();
        let (min, max) = mesh.bounding_box();
        assert_eq!(min, Point3f::origin());
        assert_eq!(max, Point3f::new(2.0, 4.0, 0.0));
        assert_eq!(mesh.center(), Point3f::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn test_mirror_transform_flips_winding() {
        let mut mesh = make_triangle();
        mesh.transform(&Transform3D::scaling(Vector3::new(1.0, 1.0, -1.0)));
        assert_eq!(mesh.faces[0], [0, 2, 1]);
        let normal = mesh.calculate_face_normals()[0];
        let stored = mesh.normals.as_ref().unwrap()[0];
        assert_relative_eq!(normal.dot(&stored), 1.0, epsilon = 1e-6);
    }
}
