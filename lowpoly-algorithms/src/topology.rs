//! Edge/face adjacency shared by the repair and unwrap passes

use lowpoly_core::{edge_key, TriangleMesh};
use std::collections::HashMap;

/// Faces incident to every undirected edge, in face order
#[derive(Debug, Clone, Default)]
pub struct EdgeFaces {
    map: HashMap<[usize; 2], Vec<usize>>,
}

impl EdgeFaces {
    pub fn build(mesh: &TriangleMesh) -> Self {
        let mut map: HashMap<[usize; 2], Vec<usize>> = HashMap::with_capacity(mesh.face_count() * 3 / 2);
        for (fi, face) in mesh.faces.iter().enumerate() {
            for j in 0..3 {
                map.entry(edge_key(face[j], face[(j + 1) % 3])).or_default().push(fi);
            }
        }
        Self { map }
    }

    /// Faces using the edge `a`-`b`
    pub fn faces(&self, a: usize, b: usize) -> &[usize] {
        self.map.get(&edge_key(a, b)).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The other face of a manifold edge, if there is exactly one
    pub fn opposite(&self, face: usize, a: usize, b: usize) -> Option<usize> {
        match self.faces(a, b) {
            [f, g] if *f == face => Some(*g),
            [f, g] if *g == face => Some(*f),
            _ => None,
        }
    }

    /// Number of edges used by exactly one face
    pub fn boundary_edge_count(&self) -> usize {
        self.map.values().filter(|f| f.len() == 1).count()
    }

    /// Number of edges used by more than two faces
    pub fn non_manifold_edge_count(&self) -> usize {
        self.map.values().filter(|f| f.len() > 2).count()
    }
}

/// Directed edges of a face in winding order
#[inline]
pub fn face_edges(face: &[usize; 3]) -> [(usize, usize); 3] {
    [(face[0], face[1]), (face[1], face[2]), (face[2], face[0])]
}

/// Whether the face traverses `a -> b` in its winding order
#[inline]
pub fn has_directed_edge(face: &[usize; 3], a: usize, b: usize) -> bool {
    face_edges(face).iter().any(|&(s, t)| s == a && t == b)
}

/// Connected components over manifold edges, each listing faces in
/// ascending order. Components are ordered by their smallest face.
pub fn face_components(mesh: &TriangleMesh, adjacency: &EdgeFaces) -> Vec<Vec<usize>> {
    let mut component = vec![usize::MAX; mesh.face_count()];
    let mut components = Vec::new();
    for seed in 0..mesh.face_count() {
        if component[seed] != usize::MAX {
            continue;
        }
        let id = components.len();
        let mut members = vec![seed];
        component[seed] = id;
        let mut cursor = 0;
        while cursor < members.len() {
            let f = members[cursor];
            cursor += 1;
            for (a, b) in face_edges(&mesh.faces[f]) {
                if let Some(g) = adjacency.opposite(f, a, b) {
                    if component[g] == usize::MAX {
                        component[g] = id;
                        members.push(g);
                    }
                }
            }
        }
        members.sort_unstable();
        components.push(members);
    }
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use lowpoly_core::Point3f;

    #[test]
    fn test_edge_faces_on_two_triangles() {
        let mesh = TriangleMesh::from_vertices_and_faces(
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(1.0, 1.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
                Point3f::new(5.0, 5.0, 0.0),
                Point3f::new(6.0, 5.0, 0.0),
                Point3f::new(5.0, 6.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3], [4, 5, 6]],
        );
        let adj = EdgeFaces::build(&mesh);
        assert_eq!(adj.faces(2, 0), &[0, 1]);
        assert_eq!(adj.opposite(0, 0, 2), Some(1));
        assert_eq!(adj.opposite(0, 0, 1), None);
        assert_eq!(adj.boundary_edge_count(), 7);
        assert_eq!(face_components(&mesh, &adj), vec![vec![0, 1], vec![2]]);
    }
}
