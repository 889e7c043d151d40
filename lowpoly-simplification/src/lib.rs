//! Mesh simplification to a triangle budget
//!
//! This crate reduces mesh complexity with quadric error edge collapse:
//! - Half-edge edge collapse with link, flip and volume checks
//! - A target-count driver that never increases density

pub mod edge_collapse;

pub use edge_collapse::*;

use lowpoly_core::{Degradation, DegradationKind, Result, StageOutcome, TriangleMesh};
use tracing::{info, warn};

/// Lowest fraction of the original faces a single pass may keep
pub const MIN_KEEP_RATIO: f32 = 0.01;

/// Simplify a mesh by reducing the number of faces/vertices
pub trait MeshSimplifier {
    /// Simplify mesh keeping roughly `keep_ratio` of its faces (1.0 = unchanged)
    fn simplify(&self, mesh: &TriangleMesh, keep_ratio: f32) -> Result<TriangleMesh>;
}

/// Fraction of faces to keep for a target count, clamped to
/// `[MIN_KEEP_RATIO, 1.0]`
pub fn keep_ratio(target: i64, faces: usize) -> f32 {
    if faces == 0 {
        return 1.0;
    }
    (target as f64 / faces as f64).clamp(MIN_KEEP_RATIO as f64, 1.0) as f32
}

/// Reduce `mesh` toward `target` faces.
///
/// A target at or above the current face count returns the mesh unchanged.
/// A non-positive target or a mesh without faces is a no-op reported as a
/// degraded outcome. Otherwise the result has at most
/// `round(keep_ratio * F)` faces unless the mesh runs out of collapsible
/// edges first.
pub fn simplify_to_target<S: MeshSimplifier>(
    simplifier: &S,
    mesh: &TriangleMesh,
    target: i64,
) -> Result<(TriangleMesh, StageOutcome)> {
    let faces = mesh.face_count();
    if target <= 0 || faces == 0 {
        let reason = if faces == 0 {
            "mesh has no faces, simplification skipped".to_string()
        } else {
            format!("target triangle count {} is not positive, simplification skipped", target)
        };
        warn!("{}", reason);
        return Ok((
            mesh.clone(),
            StageOutcome::Degraded(vec![Degradation::new(DegradationKind::SimplifyNoop, reason)]),
        ));
    }
    if target as u64 >= faces as u64 {
        info!(faces, target, "mesh already within budget");
        return Ok((mesh.clone(), StageOutcome::Completed));
    }

    let ratio = keep_ratio(target, faces);
    let simplified = simplifier.simplify(mesh, ratio)?;
    info!(
        before = faces,
        after = simplified.face_count(),
        target,
        ratio,
        "simplified mesh"
    );
    Ok((simplified, StageOutcome::Completed))
}

#[cfg(test)]
pub(crate) mod test_meshes {
    use lowpoly_core::{Point3f, TriangleMesh};

    pub fn make_plane_grid(size: usize) -> TriangleMesh {
        let mut vertices = Vec::new();
        for y in 0..size {
            for x in 0..size {
                vertices.push(Point3f::new(x as f32, y as f32, 0.0));
            }
        }
        let mut faces = Vec::new();
        for y in 0..(size - 1) {
            for x in 0..(size - 1) {
                let tl = y * size + x;
                let tr = tl + 1;
                let bl = (y + 1) * size + x;
                let br = bl + 1;
                faces.push([tl, tr, bl]);
                faces.push([tr, br, bl]);
            }
        }
        TriangleMesh::from_vertices_and_faces(vertices, faces)
    }

    /// Closed cube over `[-1, 1]^3` with `n * n * 2` outward facing
    /// triangles per side and shared vertices along the edges
    pub fn make_subdivided_cube(n: usize) -> TriangleMesh {
        let mut mesh = TriangleMesh::new();
        let mut index = std::collections::HashMap::new();
        let mut vertex = |mesh: &mut TriangleMesh, p: [i64; 3]| -> usize {
            *index.entry(p).or_insert_with(|| {
                let s = |c: i64| c as f32 / n as f32 * 2.0 - 1.0;
                mesh.add_vertex(Point3f::new(s(p[0]), s(p[1]), s(p[2])))
            })
        };
        let n_i = n as i64;
        // (normal axis, side, u axis, v axis) with u x v pointing outward
        let sides = [(0, n_i, 1, 2), (0, 0, 2, 1), (1, n_i, 2, 0), (1, 0, 0, 2), (2, n_i, 0, 1), (2, 0, 1, 0)];
        for (axis, level, ua, va) in sides {
            for i in 0..n_i {
                for j in 0..n_i {
                    let corner = |di: i64, dj: i64| {
                        let mut p = [0i64; 3];
                        p[axis] = level;
                        p[ua] = i + di;
                        p[va] = j + dj;
                        p
                    };
                    let a = vertex(&mut mesh, corner(0, 0));
                    let b = vertex(&mut mesh, corner(1, 0));
                    let c = vertex(&mut mesh, corner(1, 1));
                    let d = vertex(&mut mesh, corner(0, 1));
                    mesh.add_face([a, b, c]);
                    mesh.add_face([a, c, d]);
                }
            }
        }
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_meshes::make_subdivided_cube;

    #[test]
    fn test_keep_ratio_is_clamped() {
        assert_eq!(keep_ratio(1, 1000), MIN_KEEP_RATIO);
        assert_eq!(keep_ratio(500, 1000), 0.5);
        assert_eq!(keep_ratio(5000, 1000), 1.0);
    }

    #[test]
    fn test_target_above_face_count_is_unchanged() {
        let mesh = make_subdivided_cube(4);
        let faces = mesh.face_count();
        for target in [faces as i64, faces as i64 + 1, 5000] {
            let (out, outcome) = simplify_to_target(&EdgeCollapseSimplifier::new(), &mesh, target).unwrap();
            assert_eq!(out.face_count(), faces);
            assert_eq!(out.vertices, mesh.vertices);
            assert_eq!(outcome, StageOutcome::Completed);
        }
    }

    #[test]
    fn test_non_positive_target_is_noop() {
        let mesh = make_subdivided_cube(3);
        for target in [0, -10] {
            let (out, outcome) = simplify_to_target(&EdgeCollapseSimplifier::new(), &mesh, target).unwrap();
            assert_eq!(out.faces, mesh.faces);
            assert_eq!(outcome.degradations()[0].kind, DegradationKind::SimplifyNoop);
        }
    }

    #[test]
    fn test_empty_mesh_is_noop() {
        let (out, outcome) = simplify_to_target(&EdgeCollapseSimplifier::new(), &TriangleMesh::new(), 100).unwrap();
        assert_eq!(out.face_count(), 0);
        assert_eq!(outcome.degradations().len(), 1);
    }

    #[test]
    fn test_target_below_face_count_is_respected() {
        let mesh = make_subdivided_cube(8);
        let faces = mesh.face_count();
        for target in [300i64, 100, 40] {
            let (out, outcome) = simplify_to_target(&EdgeCollapseSimplifier::new(), &mesh, target).unwrap();
            assert!(out.face_count() <= target as usize, "{} > {}", out.face_count(), target);
            assert!(out.face_count() + 4 >= target as usize);
            assert!(out.face_count() < faces);
            assert_eq!(outcome, StageOutcome::Completed);
        }
    }

    #[test]
    fn test_tiny_target_hits_ratio_floor() {
        let mesh = make_subdivided_cube(20);
        assert_eq!(mesh.face_count(), 4800);
        let (out, _) = simplify_to_target(&EdgeCollapseSimplifier::new(), &mesh, 1).unwrap();
        assert!(out.face_count() <= 48);
        assert!(out.face_count() >= 12);
    }
}
