//! Normal recalculation: consistent winding, outward orientation, smooth
//! shading and auto-smooth hard edges

use crate::topology::{face_components, face_edges, has_directed_edge, EdgeFaces};
use lowpoly_core::{edge_key, Shading, TriangleMesh, Vector3f};
use std::collections::HashMap;
use tracing::debug;

/// Summary of one normal recalculation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalsReport {
    pub components: usize,
    pub flipped_faces: usize,
    pub hard_edges: usize,
}

/// Make face winding consistent across every connected component and
/// orient each component so its signed volume is positive.
///
/// Components are flood-filled over manifold edges starting from their
/// smallest face. Returns the number of faces that were flipped.
pub fn orient_consistently(mesh: &mut TriangleMesh) -> (usize, usize) {
    let adjacency = EdgeFaces::build(mesh);
    let components = face_components(mesh, &adjacency);
    let mut flip = vec![false; mesh.face_count()];
    let mut visited = vec![false; mesh.face_count()];

    let oriented = |faces: &[[usize; 3]], flip: &[bool], f: usize| {
        let face = faces[f];
        if flip[f] {
            [face[0], face[2], face[1]]
        } else {
            face
        }
    };

    for members in &components {
        let seed = members[0];
        visited[seed] = true;
        let mut queue = vec![seed];
        let mut cursor = 0;
        while cursor < queue.len() {
            let f = queue[cursor];
            cursor += 1;
            let face = oriented(&mesh.faces, &flip, f);
            for (a, b) in face_edges(&face) {
                let Some(g) = adjacency.opposite(f, a, b) else {
                    continue;
                };
                if visited[g] {
                    continue;
                }
                visited[g] = true;
                // A consistent neighbour walks the shared edge as b -> a
                if has_directed_edge(&mesh.faces[g], a, b) {
                    flip[g] = true;
                }
                queue.push(g);
            }
        }

        // Signed volume about the component centroid
        let mut centroid = Vector3f::zeros();
        let mut corners = 0usize;
        for &f in members {
            for &v in &mesh.faces[f] {
                centroid += mesh.vertices[v].coords;
                corners += 1;
            }
        }
        centroid /= corners.max(1) as f32;
        let mut volume = 0.0f32;
        for &f in members {
            let [a, b, c] = oriented(&mesh.faces, &flip, f);
            let pa = mesh.vertices[a].coords - centroid;
            let pb = mesh.vertices[b].coords - centroid;
            let pc = mesh.vertices[c].coords - centroid;
            volume += pa.dot(&pb.cross(&pc));
        }
        if volume < 0.0 {
            for &f in members {
                flip[f] = !flip[f];
            }
        }
    }

    let mut flipped = 0;
    for (face, &f) in mesh.faces.iter_mut().zip(&flip) {
        if f {
            face.swap(1, 2);
            flipped += 1;
        }
    }
    (components.len(), flipped)
}

/// Manifold edges whose dihedral angle is at least `angle_degrees`,
/// sorted by vertex pair
pub fn find_hard_edges(mesh: &TriangleMesh, angle_degrees: f32) -> Vec<[usize; 2]> {
    let face_normals = mesh.calculate_face_normals();
    let adjacency = EdgeFaces::build(mesh);
    let threshold = angle_degrees.to_radians();
    let mut hard = Vec::new();
    for (fi, face) in mesh.faces.iter().enumerate() {
        for (a, b) in face_edges(face) {
            let Some(g) = adjacency.opposite(fi, a, b) else {
                continue;
            };
            // Visit each edge once, from its smaller face
            if g < fi {
                continue;
            }
            let (n1, n2) = (face_normals[fi], face_normals[g]);
            if n1 == Vector3f::zeros() || n2 == Vector3f::zeros() {
                continue;
            }
            let angle = n1.dot(&n2).clamp(-1.0, 1.0).acos();
            if angle >= threshold {
                hard.push(edge_key(a, b));
            }
        }
    }
    hard.sort_unstable();
    hard.dedup();
    hard
}

/// Recompute normals with outward orientation and mark the mesh smooth.
///
/// A positive `auto_smooth_angle` (degrees) turns creases at or above the
/// threshold into hard edges; zero or negative disables auto-smoothing and
/// leaves no hard edges at all.
pub fn recalculate_normals(mesh: &mut TriangleMesh, auto_smooth_angle: f32) -> NormalsReport {
    let (components, flipped_faces) = orient_consistently(mesh);
    mesh.update_vertex_normals();

    mesh.shading = if auto_smooth_angle > 0.0 {
        Shading {
            smooth: true,
            auto_smooth_angle: Some(auto_smooth_angle),
            hard_edges: find_hard_edges(mesh, auto_smooth_angle),
        }
    } else {
        Shading::fully_smooth()
    };

    debug!(
        components,
        flipped_faces,
        hard_edges = mesh.shading.hard_edges.len(),
        "normals recalculated"
    );

    NormalsReport {
        components,
        flipped_faces,
        hard_edges: mesh.shading.hard_edges.len(),
    }
}

/// Per-corner smoothing groups.
///
/// `groups[f][k]` names the shading vertex of corner `k` of face `f`;
/// `normals[g]` is that group's normal. Corners around one vertex share a
/// group unless a hard edge separates them.
#[derive(Debug, Clone)]
pub struct CornerNormals {
    pub groups: Vec<[usize; 3]>,
    pub group_vertex: Vec<usize>,
    pub normals: Vec<Vector3f>,
}

/// Split vertex normals along hard edges.
///
/// Without hard edges every vertex forms a single group carrying its stored
/// normal, so fully smooth meshes keep their normals untouched.
pub fn corner_normals(mesh: &TriangleMesh) -> CornerNormals {
    let vertex_normals = mesh
        .normals
        .clone()
        .unwrap_or_else(|| mesh.compute_vertex_normals());

    if mesh.shading.hard_edges.is_empty() {
        return CornerNormals {
            groups: mesh.faces.clone(),
            group_vertex: (0..mesh.vertex_count()).collect(),
            normals: vertex_normals,
        };
    }

    let mut incident: Vec<Vec<(usize, usize)>> = vec![Vec::new(); mesh.vertex_count()];
    for (fi, face) in mesh.faces.iter().enumerate() {
        for (k, &v) in face.iter().enumerate() {
            incident[v].push((fi, k));
        }
    }

    let mut groups = vec![[usize::MAX; 3]; mesh.face_count()];
    let mut group_vertex = Vec::new();
    let mut normals = Vec::new();

    for (v, corners) in incident.iter().enumerate() {
        if corners.is_empty() {
            continue;
        }
        // Union-find over the faces around v
        let mut parent: Vec<usize> = (0..corners.len()).collect();
        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }

        let mut by_neighbor: HashMap<usize, Vec<usize>> = HashMap::new();
        for (local, &(fi, k)) in corners.iter().enumerate() {
            let face = mesh.faces[fi];
            for w in [face[(k + 1) % 3], face[(k + 2) % 3]] {
                by_neighbor.entry(w).or_default().push(local);
            }
        }
        let mut neighbors: Vec<_> = by_neighbor.into_iter().collect();
        neighbors.sort_unstable_by_key(|(w, _)| *w);
        for (w, locals) in neighbors {
            if mesh.shading.is_hard_edge(v, w) || locals.len() != 2 {
                continue;
            }
            let (ra, rb) = (find(&mut parent, locals[0]), find(&mut parent, locals[1]));
            if ra != rb {
                parent[ra.max(rb)] = ra.min(rb);
            }
        }

        let mut root_group: HashMap<usize, usize> = HashMap::new();
        for (local, &(fi, k)) in corners.iter().enumerate() {
            let root = find(&mut parent, local);
            let g = *root_group.entry(root).or_insert_with(|| {
                group_vertex.push(v);
                normals.push(Vector3f::zeros());
                normals.len() - 1
            });
            groups[fi][k] = g;
            normals[g] += mesh.face_cross(fi);
        }
    }

    for (g, n) in normals.iter_mut().enumerate() {
        *n = n
            .try_normalize(f32::EPSILON)
            .unwrap_or(vertex_normals[group_vertex[g]]);
    }

    CornerNormals {
        groups,
        group_vertex,
        normals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lowpoly_core::Point3f;

    /// Unit cube with outward winding
    fn make_cube() -> TriangleMesh {
        let vertices = vec![
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(1.0, 1.0, 0.0),
            Point3f::new(0.0, 1.0, 0.0),
            Point3f::new(0.0, 0.0, 1.0),
            Point3f::new(1.0, 0.0, 1.0),
            Point3f::new(1.0, 1.0, 1.0),
            Point3f::new(0.0, 1.0, 1.0),
        ];
        let faces = vec![
            [0, 2, 1], [0, 3, 2], // bottom
            [4, 5, 6], [4, 6, 7], // top
            [0, 1, 5], [0, 5, 4], // front
            [2, 3, 7], [2, 7, 6], // back
            [1, 2, 6], [1, 6, 5], // right
            [3, 0, 4], [3, 4, 7], // left
        ];
        TriangleMesh::from_vertices_and_faces(vertices, faces)
    }

    fn signed_volume(mesh: &TriangleMesh) -> f32 {
        mesh.faces
            .iter()
            .map(|f| {
                let a = mesh.vertices[f[0]].coords;
                let b = mesh.vertices[f[1]].coords;
                let c = mesh.vertices[f[2]].coords;
                a.dot(&b.cross(&c)) / 6.0
            })
            .sum()
    }

    #[test]
    fn test_cube_is_already_consistent() {
        let mut mesh = make_cube();
        let (components, flipped) = orient_consistently(&mut mesh);
        assert_eq!(components, 1);
        assert_eq!(flipped, 0);
        assert!(signed_volume(&mesh) > 0.99);
    }

    #[test]
    fn test_flipped_faces_are_repaired() {
        let mut mesh = make_cube();
        mesh.faces[3].swap(1, 2);
        mesh.faces[8].swap(1, 2);
        let (_, flipped) = orient_consistently(&mut mesh);
        assert_eq!(flipped, 2);
        assert_eq!(mesh.faces, make_cube().faces);
    }

    #[test]
    fn test_inside_out_cube_is_turned_outward() {
        let mut mesh = make_cube();
        for f in &mut mesh.faces {
            f.swap(1, 2);
        }
        orient_consistently(&mut mesh);
        assert!(signed_volume(&mesh) > 0.99);
    }

    #[test]
    fn test_orientation_is_idempotent() {
        let mut mesh = make_cube();
        mesh.faces[5].swap(1, 2);
        orient_consistently(&mut mesh);
        let once = mesh.faces.clone();
        let (_, flipped) = orient_consistently(&mut mesh);
        assert_eq!(flipped, 0);
        assert_eq!(mesh.faces, once);
    }

    #[test]
    fn test_auto_smooth_disabled_means_no_hard_edges() {
        let mut mesh = make_cube();
        let report = recalculate_normals(&mut mesh, 0.0);
        assert!(mesh.shading.smooth);
        assert!(mesh.shading.auto_smooth_angle.is_none());
        assert!(mesh.shading.hard_edges.is_empty());
        assert_eq!(report.hard_edges, 0);

        recalculate_normals(&mut mesh, -5.0);
        assert!(mesh.shading.hard_edges.is_empty());
    }

    #[test]
    fn test_auto_smooth_marks_cube_edges_hard() {
        let mut mesh = make_cube();
        recalculate_normals(&mut mesh, 30.0);
        // 12 cube edges are 90 degree creases; face diagonals are flat
        assert_eq!(mesh.shading.hard_edges.len(), 12);
        assert_eq!(mesh.shading.auto_smooth_angle, Some(30.0));
    }

    #[test]
    fn test_corner_normals_split_at_hard_edges() {
        let mut mesh = make_cube();
        recalculate_normals(&mut mesh, 30.0);
        let corners = corner_normals(&mesh);
        // Each cube corner touches three flat sides
        assert_eq!(corners.normals.len(), 24);
        for (fi, face) in corners.groups.iter().enumerate() {
            let fnormal = mesh.calculate_face_normals()[fi];
            for &g in face {
                assert!((corners.normals[g] - fnormal).norm() < 1e-5);
            }
        }
    }

    #[test]
    fn test_corner_normals_without_hard_edges_use_vertex_normals() {
        let mut mesh = make_cube();
        recalculate_normals(&mut mesh, 0.0);
        let corners = corner_normals(&mesh);
        assert_eq!(corners.normals.len(), 8);
        assert_eq!(corners.groups, mesh.faces);
    }
}
