//! Integration tests for lowpoly-reconstruction
//!
//! These run the voxel remesher on curved, messy inputs and check that the
//! result is a clean closed surface close to the source.

use lowpoly_algorithms::{Bvh, EdgeFaces};
use lowpoly_core::{Point3f, StageOutcome, TriangleMesh};
use lowpoly_reconstruction::*;

/// Latitude/longitude sphere with duplicated seam vertices
fn create_uv_sphere(radius: f32, rings: usize, segments: usize) -> TriangleMesh {
    let mut vertices = Vec::new();
    for r in 0..=rings {
        let phi = std::f32::consts::PI * r as f32 / rings as f32;
        for s in 0..=segments {
            let theta = 2.0 * std::f32::consts::PI * s as f32 / segments as f32;
            vertices.push(Point3f::new(
                radius * phi.sin() * theta.cos(),
                radius * phi.sin() * theta.sin(),
                radius * phi.cos(),
            ));
        }
    }
    let stride = segments + 1;
    let mut faces = Vec::new();
    for r in 0..rings {
        for s in 0..segments {
            let a = r * stride + s;
            let b = a + stride;
            faces.push([a, b, a + 1]);
            faces.push([a + 1, b, b + 1]);
        }
    }
    TriangleMesh::from_vertices_and_faces(vertices, faces)
}

#[test]
fn test_sphere_remesh_is_watertight() {
    // The seam and pole duplicates leave the source open in index space
    let sphere = create_uv_sphere(1.0, 24, 48);
    assert!(EdgeFaces::build(&sphere).boundary_edge_count() > 0);

    let (remeshed, outcome) = voxel_remesh(&sphere, &RemeshConfig::new(0.08)).unwrap();
    assert_eq!(outcome, StageOutcome::Completed);

    let adjacency = EdgeFaces::build(&remeshed);
    assert_eq!(adjacency.boundary_edge_count(), 0);
    assert_eq!(adjacency.non_manifold_edge_count(), 0);

    for p in &remeshed.vertices {
        let r = p.coords.norm();
        assert!((r - 1.0).abs() < 0.08, "vertex at radius {}", r);
    }
}

#[test]
fn test_remesh_follows_source_surface() {
    let sphere = create_uv_sphere(2.0, 16, 32);
    let (remeshed, _) = voxel_remesh(&sphere, &RemeshConfig::new(0.2)).unwrap();
    let bvh = Bvh::build(&sphere);
    for p in &remeshed.vertices {
        let closest = bvh.closest_point(p).unwrap();
        assert!(closest.distance_squared.sqrt() < 0.2);
    }
}

#[test]
fn test_remesh_is_deterministic() {
    let sphere = create_uv_sphere(1.0, 12, 24);
    let config = RemeshConfig::new(0.1);
    let (a, _) = voxel_remesh(&sphere, &config).unwrap();
    let (b, _) = voxel_remesh(&sphere, &config).unwrap();
    assert_eq!(a.faces, b.faces);
    assert_eq!(a.vertices, b.vertices);
}
