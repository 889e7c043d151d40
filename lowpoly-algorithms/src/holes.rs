//! Hole detection and filling
//!
//! Boundary edges (used by exactly one face) are chained into loops. Loops
//! up to a size limit are capped by ear clipping in the loop's best-fit
//! plane, falling back to a fan when no ear can be found. Larger loops are
//! reported and left open.

use crate::topology::{face_edges, EdgeFaces};
use lowpoly_core::{TriangleMesh, Vector3f};
use tracing::{debug, warn};

/// Default maximum number of edges of a hole that gets filled
pub const DEFAULT_MAX_HOLE_EDGES: usize = 50;

/// Configuration for hole filling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoleFillConfig {
    /// Loops with more edges than this stay open
    pub max_edges: usize,
}

impl Default for HoleFillConfig {
    fn default() -> Self {
        Self {
            max_edges: DEFAULT_MAX_HOLE_EDGES,
        }
    }
}

/// An open boundary loop.
///
/// Vertices are ordered so that a cap triangulated in this order winds
/// consistently with the faces around the hole.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryLoop {
    pub vertices: Vec<usize>,
}

impl BoundaryLoop {
    pub fn edge_count(&self) -> usize {
        self.vertices.len()
    }
}

/// Result of a hole filling pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HoleFillReport {
    pub filled: usize,
    pub faces_added: usize,
    /// Edge counts of loops left open because they exceed the limit
    pub skipped: Vec<usize>,
}

/// Find every boundary loop of the mesh, ordered by first boundary edge
pub fn detect_holes(mesh: &TriangleMesh) -> Vec<BoundaryLoop> {
    let adjacency = EdgeFaces::build(mesh);

    // Cap edges run opposite to the boundary edges of the mesh
    let mut cap_out: Vec<Vec<usize>> = vec![Vec::new(); mesh.vertex_count()];
    let mut cap_edges = Vec::new();
    for face in &mesh.faces {
        for (a, b) in face_edges(face) {
            if adjacency.faces(a, b).len() == 1 {
                cap_out[b].push(cap_edges.len());
                cap_edges.push((b, a));
            }
        }
    }

    let mut used = vec![false; cap_edges.len()];
    let mut loops = Vec::new();
    for start in 0..cap_edges.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let (origin, mut current) = cap_edges[start];
        let mut vertices = vec![origin];
        let mut closed = false;

        for _ in 0..cap_edges.len() {
            if current == origin {
                closed = true;
                break;
            }
            vertices.push(current);
            let next = cap_out[current].iter().copied().find(|&e| !used[e]);
            match next {
                Some(e) => {
                    used[e] = true;
                    current = cap_edges[e].1;
                }
                None => break,
            }
        }

        if closed && vertices.len() >= 3 {
            loops.push(BoundaryLoop { vertices });
        } else if !closed {
            debug!(length = vertices.len(), "boundary chain does not close");
        }
    }
    loops
}

/// Newell normal of a polygon
fn polygon_normal(mesh: &TriangleMesh, polygon: &[usize]) -> Vector3f {
    let mut n = Vector3f::zeros();
    for i in 0..polygon.len() {
        let a = mesh.vertices[polygon[i]];
        let b = mesh.vertices[polygon[(i + 1) % polygon.len()]];
        n.x += (a.y - b.y) * (a.z + b.z);
        n.y += (a.z - b.z) * (a.x + b.x);
        n.z += (a.x - b.x) * (a.y + b.y);
    }
    n
}

#[inline]
fn cross2(o: [f32; 2], a: [f32; 2], b: [f32; 2]) -> f32 {
    (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}

fn point_in_triangle(p: [f32; 2], a: [f32; 2], b: [f32; 2], c: [f32; 2]) -> bool {
    cross2(a, b, p) >= 0.0 && cross2(b, c, p) >= 0.0 && cross2(c, a, p) >= 0.0
}

/// Triangulate a boundary loop. Triangles keep the loop's winding.
pub fn triangulate_loop(mesh: &TriangleMesh, hole: &BoundaryLoop) -> Vec<[usize; 3]> {
    let polygon = &hole.vertices;
    if polygon.len() < 3 {
        return Vec::new();
    }
    if polygon.len() == 3 {
        return vec![[polygon[0], polygon[1], polygon[2]]];
    }

    let normal = match polygon_normal(mesh, polygon).try_normalize(f32::EPSILON) {
        Some(n) => n,
        None => return fan(polygon),
    };
    let helper = if normal.x.abs() < 0.9 { Vector3f::x() } else { Vector3f::y() };
    let u_axis = helper.cross(&normal).normalize();
    let v_axis = normal.cross(&u_axis);
    let projected: Vec<[f32; 2]> = polygon
        .iter()
        .map(|&v| {
            let p = mesh.vertices[v].coords;
            [p.dot(&u_axis), p.dot(&v_axis)]
        })
        .collect();

    // Indices into `polygon` that are still part of the remaining polygon
    let mut remaining: Vec<usize> = (0..polygon.len()).collect();
    let mut triangles = Vec::with_capacity(polygon.len() - 2);

    while remaining.len() > 3 {
        let n = remaining.len();
        let mut clipped = false;
        for i in 0..n {
            let prev = remaining[(i + n - 1) % n];
            let cur = remaining[i];
            let next = remaining[(i + 1) % n];
            let (a, b, c) = (projected[prev], projected[cur], projected[next]);
            if cross2(a, b, c) <= 0.0 {
                continue;
            }
            let blocked = remaining.iter().any(|&r| {
                r != prev && r != cur && r != next && point_in_triangle(projected[r], a, b, c)
            });
            if blocked {
                continue;
            }
            triangles.push([polygon[prev], polygon[cur], polygon[next]]);
            remaining.remove(i);
            clipped = true;
            break;
        }
        if !clipped {
            let rest: Vec<usize> = remaining.iter().map(|&i| polygon[i]).collect();
            triangles.extend(fan(&rest));
            return triangles;
        }
    }
    triangles.push([polygon[remaining[0]], polygon[remaining[1]], polygon[remaining[2]]]);
    triangles
}

fn fan(polygon: &[usize]) -> Vec<[usize; 3]> {
    (1..polygon.len() - 1)
        .map(|i| [polygon[0], polygon[i], polygon[i + 1]])
        .collect()
}

/// Fill every hole with at most `config.max_edges` edges.
///
/// Running the pass twice adds nothing the second time: filled loops no
/// longer have boundary edges and the remaining ones still exceed the limit.
pub fn fill_holes(mesh: &mut TriangleMesh, config: &HoleFillConfig) -> HoleFillReport {
    let mut report = HoleFillReport::default();
    for hole in detect_holes(mesh) {
        if hole.edge_count() > config.max_edges {
            warn!(
                edges = hole.edge_count(),
                limit = config.max_edges,
                "hole exceeds fill limit, left open"
            );
            report.skipped.push(hole.edge_count());
            continue;
        }
        let cap = triangulate_loop(mesh, &hole);
        report.faces_added += cap.len();
        report.filled += 1;
        mesh.faces.extend(cap);
    }
    if report.faces_added > 0 {
        // Stale normals would no longer match the face set
        if mesh.normals.is_some() {
            mesh.update_vertex_normals();
        }
    }
    debug!(filled = report.filled, skipped = report.skipped.len(), "hole filling done");
    report
}
