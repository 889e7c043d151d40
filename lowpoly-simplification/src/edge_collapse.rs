//! Edge collapse simplification
//!
//! Implements iterative edge collapse mesh simplification using a half-edge
//! data structure for local topology operations and quadric error metrics
//! (QEM) for error-driven edge prioritization. Collapses that change the
//! enclosed volume too much are penalized rather than rejected.

use crate::MeshSimplifier;
use nalgebra::{Matrix4, Vector4};
use priority_queue::PriorityQueue;
use std::cmp::Ordering;
use std::collections::HashMap;
use lowpoly_core::{Bounded, Error, Point3f, Result, TriangleMesh, Vector3f};
use tracing::{debug, warn};

const INVALID: usize = usize::MAX;

/// Relative determinant below which the quadric is treated as singular
const SINGULAR_EPSILON: f64 = 1e-9;

/// Lowest cosine allowed between a face normal before and after a collapse
const MIN_NORMAL_COSINE: f32 = 0.0;

// ============================================================
// Half-Edge Data Structure
// ============================================================

#[derive(Debug, Clone)]
struct HalfEdge {
    target: usize,
    twin: usize,
    next: usize,
    prev: usize,
    face: usize,
}

/// Half-edge mesh for topology-aware edge collapse operations.
struct HalfEdgeMesh {
    half_edges: Vec<HalfEdge>,
    /// One outgoing half-edge per vertex (INVALID if removed)
    vertex_edge: Vec<usize>,
    /// One half-edge per face (INVALID if removed)
    face_edge: Vec<usize>,
    active_face_count: usize,
    positions: Vec<Point3f>,
    normals: Option<Vec<Vector3f>>,
    quadrics: Vec<Matrix4<f64>>,
    vertex_removed: Vec<bool>,
    /// Vertices on non-manifold edges or fans; never collapsed
    vertex_locked: Vec<bool>,
}

impl HalfEdgeMesh {
    fn from_triangle_mesh(mesh: &TriangleMesh) -> Self {
        let nv = mesh.vertices.len();
        let nf = mesh.faces.len();

        let mut half_edges = Vec::with_capacity(nf * 3);
        let mut vertex_edge = vec![INVALID; nv];
        let mut face_edge = Vec::with_capacity(nf);

        for (fi, face) in mesh.faces.iter().enumerate() {
            let base = fi * 3;
            for j in 0..3usize {
                half_edges.push(HalfEdge {
                    target: face[(j + 1) % 3],
                    twin: INVALID,
                    next: base + (j + 1) % 3,
                    prev: base + (j + 2) % 3,
                    face: fi,
                });
                if vertex_edge[face[j]] == INVALID {
                    vertex_edge[face[j]] = base + j;
                }
            }
            face_edge.push(base);
        }

        // Pair twins only across edges used once in each direction
        let mut edge_map: HashMap<(usize, usize), Vec<usize>> = HashMap::with_capacity(nf * 3);
        for (he_idx, he) in half_edges.iter().enumerate() {
            let src = half_edges[he.prev].target;
            edge_map.entry((src, he.target)).or_default().push(he_idx);
        }
        let mut vertex_locked = vec![false; nv];
        for he_idx in 0..half_edges.len() {
            let src = half_edges[half_edges[he_idx].prev].target;
            let tgt = half_edges[he_idx].target;
            let forward = edge_map.get(&(src, tgt)).map_or(0, Vec::len);
            let backward = edge_map.get(&(tgt, src)).map(Vec::as_slice).unwrap_or(&[]);
            match (forward, backward) {
                (1, [twin_idx]) => half_edges[he_idx].twin = *twin_idx,
                (1, []) => {}
                _ => {
                    vertex_locked[src] = true;
                    vertex_locked[tgt] = true;
                }
            }
        }

        let mut hem = HalfEdgeMesh {
            half_edges,
            vertex_edge,
            face_edge,
            active_face_count: nf,
            positions: mesh.vertices.clone(),
            normals: mesh.normals.clone(),
            quadrics: vec![Matrix4::zeros(); nv],
            vertex_removed: vec![false; nv],
            vertex_locked,
        };

        // A vertex whose fan rotation misses some of its faces is pinched
        let mut out_degree = vec![0usize; nv];
        for he_idx in 0..hem.half_edges.len() {
            out_degree[hem.source(he_idx)] += 1;
        }
        for v in 0..nv {
            if hem.outgoing_half_edges(v).len() != out_degree[v] {
                hem.vertex_locked[v] = true;
            }
        }

        hem.initialize_quadrics();
        hem
    }

    #[inline]
    fn source(&self, he: usize) -> usize {
        self.half_edges[self.half_edges[he].prev].target
    }

    fn compute_plane(v0: &Point3f, v1: &Point3f, v2: &Point3f) -> Vector4<f64> {
        let e1 = v1 - v0;
        let e2 = v2 - v0;
        let n = e1.cross(&e2).normalize();
        if !n.iter().all(|x| x.is_finite()) {
            return Vector4::new(0.0, 0.0, 1.0, 0.0);
        }
        let d = -n.dot(&v0.coords);
        Vector4::new(n.x as f64, n.y as f64, n.z as f64, d as f64)
    }

    fn plane_to_quadric(p: &Vector4<f64>) -> Matrix4<f64> {
        p * p.transpose()
    }

    fn initialize_quadrics(&mut self) {
        for fi in 0..self.face_edge.len() {
            let [v0, v1, v2] = match self.face_vertices(fi) {
                Some(f) => f,
                None => continue,
            };
            let plane = Self::compute_plane(&self.positions[v0], &self.positions[v1], &self.positions[v2]);
            let q = Self::plane_to_quadric(&plane);
            self.quadrics[v0] += q;
            self.quadrics[v1] += q;
            self.quadrics[v2] += q;
        }
    }

    fn face_vertices(&self, face: usize) -> Option<[usize; 3]> {
        let he0 = self.face_edge[face];
        if he0 == INVALID {
            return None;
        }
        let he1 = self.half_edges[he0].next;
        Some([self.source(he0), self.half_edges[he0].target, self.half_edges[he1].target])
    }

    /// Get all outgoing half-edges from a vertex (handles boundary vertices).
    fn outgoing_half_edges(&self, v: usize) -> Vec<usize> {
        let start = self.vertex_edge[v];
        if start == INVALID {
            return vec![];
        }

        let mut result = Vec::new();
        let mut current = start;

        // Rotate counterclockwise: current.prev.twin
        loop {
            result.push(current);
            let prev = self.half_edges[current].prev;
            let twin = self.half_edges[prev].twin;
            if twin == INVALID {
                break;
            }
            current = twin;
            if current == start {
                return result;
            }
        }

        // Boundary: also rotate clockwise from start via twin.next
        let twin_of_start = self.half_edges[start].twin;
        if twin_of_start != INVALID {
            let mut current = self.half_edges[twin_of_start].next;
            loop {
                if current == start {
                    break;
                }
                result.push(current);
                let twin = self.half_edges[current].twin;
                if twin == INVALID {
                    break;
                }
                current = self.half_edges[twin].next;
            }
        }

        result
    }

    /// Neighbouring vertices in ascending order. Boundary vertices also
    /// reach the vertex across their last boundary edge.
    fn neighbors(&self, v: usize) -> Vec<usize> {
        let mut result = Vec::new();
        for he in self.outgoing_half_edges(v) {
            result.push(self.half_edges[he].target);
            let prev = self.half_edges[he].prev;
            if self.half_edges[prev].twin == INVALID {
                result.push(self.source(prev));
            }
        }
        result.sort_unstable();
        result.dedup();
        result
    }

    /// Faces around a vertex, by index
    fn incident_faces(&self, v: usize) -> Vec<usize> {
        self.outgoing_half_edges(v)
            .into_iter()
            .map(|he| self.half_edges[he].face)
            .filter(|&f| f != INVALID)
            .collect()
    }

    fn is_boundary_vertex(&self, v: usize) -> bool {
        self.outgoing_half_edges(v).iter().any(|&he| {
            self.half_edges[he].twin == INVALID || self.half_edges[self.half_edges[he].prev].twin == INVALID
        })
    }

    /// Check the link condition: common neighbors must equal exactly the
    /// face apices opposite the edge (2 for interior, 1 for boundary).
    fn check_link_condition(&self, v1: usize, v2: usize) -> bool {
        let h = match self.find_half_edge(v1, v2).or_else(|| self.find_half_edge(v2, v1)) {
            Some(h) => h,
            None => return false,
        };
        let n1 = self.neighbors(v1);
        let n2 = self.neighbors(v2);
        let common_count = n1.iter().filter(|v| n2.binary_search(v).is_ok()).count();

        let is_boundary = self.half_edges[h].twin == INVALID;
        if !is_boundary {
            // An interior edge between two boundary vertices would pinch
            if self.is_boundary_vertex(v1) && self.is_boundary_vertex(v2) {
                return false;
            }
            // Collapsing must leave a fan of at least three neighbours
            let union = n1.len() + n2.len() - common_count;
            if union < 5 {
                return false;
            }
        }
        let expected = if is_boundary { 1 } else { 2 };
        common_count == expected
    }

    fn find_half_edge(&self, from: usize, to: usize) -> Option<usize> {
        self.outgoing_half_edges(from)
            .into_iter()
            .find(|&he| self.half_edges[he].target == to)
    }

    /// Optimal position for merging `v1` and `v2` and its quadric error.
    ///
    /// Solves the quadric system when it is well conditioned, and always
    /// compares against the endpoints and the midpoint.
    fn compute_collapse_cost(&self, v1: usize, v2: usize) -> (Point3f, f64) {
        let q = self.quadrics[v1] + self.quadrics[v2];
        let error = |p: &Point3f| -> f64 {
            let vh = Vector4::new(p.x as f64, p.y as f64, p.z as f64, 1.0);
            (vh.transpose() * q * vh)[0].max(0.0)
        };

        let p1 = self.positions[v1];
        let p2 = self.positions[v2];
        let mut candidates = vec![p1, p2, Point3f::from((p1.coords + p2.coords) * 0.5)];

        let q3 = q.fixed_view::<3, 3>(0, 0).into_owned();
        let scale = q3.trace().abs().max(f64::MIN_POSITIVE);
        if q3.determinant().abs() > SINGULAR_EPSILON * scale * scale * scale {
            if let Some(inv) = q3.try_inverse() {
                let p = -inv * q.fixed_view::<3, 1>(0, 3);
                let optimal = Point3f::new(p[0] as f32, p[1] as f32, p[2] as f32);
                if optimal.iter().all(|c| c.is_finite()) {
                    candidates.insert(0, optimal);
                }
            }
        }

        let mut best = (candidates[0], error(&candidates[0]));
        for p in candidates.into_iter().skip(1) {
            let e = error(&p);
            if e < best.1 {
                best = (p, e);
            }
        }
        best
    }

    /// Signed volume change of the fan around `v1` and `v2` when both move to
    /// `p`, and whether any surviving face would flip or degenerate.
    fn collapse_effect(&self, v1: usize, v2: usize, p: &Point3f) -> (f64, bool) {
        let mut faces = self.incident_faces(v1);
        faces.extend(self.incident_faces(v2));
        faces.sort_unstable();
        faces.dedup();

        let mut delta = 0.0f64;
        let mut flips = false;
        for f in faces {
            let Some(old) = self.face_vertices(f) else {
                continue;
            };
            let [a, b, c] = old.map(|v| self.positions[v]);
            let new = old.map(|v| if v == v1 || v == v2 { *p } else { self.positions[v] });
            let old_volume = a.coords.dot(&b.coords.cross(&c.coords)) as f64 / 6.0;
            let new_volume = new[0].coords.dot(&new[1].coords.cross(&new[2].coords)) as f64 / 6.0;
            delta += new_volume - old_volume;

            let removed = old.contains(&v1) && old.contains(&v2);
            if removed {
                continue;
            }
            let n_old = (b - a).cross(&(c - a));
            let n_new = (new[1] - new[0]).cross(&(new[2] - new[0]));
            match (n_old.try_normalize(f32::EPSILON), n_new.try_normalize(f32::EPSILON)) {
                (Some(o), Some(n)) => {
                    if o.dot(&n) < MIN_NORMAL_COSINE {
                        flips = true;
                    }
                }
                (_, None) => flips = true,
                (None, Some(_)) => {}
            }
        }
        (delta, flips)
    }

    /// Find any valid outgoing half-edge from a vertex (linear scan fallback).
    fn find_valid_outgoing(&self, v: usize) -> usize {
        for (i, he) in self.half_edges.iter().enumerate() {
            if he.face != INVALID && self.source(i) == v {
                return i;
            }
        }
        INVALID
    }

    /// Collapse the edge between `a` and `b` at `new_pos`. Boundary edges
    /// only exist in one direction, so the survivor is whichever endpoint
    /// the stored half-edge leaves from. Returns the surviving vertex.
    fn collapse(&mut self, a: usize, b: usize, new_pos: Point3f) -> Option<usize> {
        if self.collapse_edge(a, b, new_pos) {
            Some(a)
        } else if self.collapse_edge(b, a, new_pos) {
            Some(b)
        } else {
            None
        }
    }

    /// Collapse edge (v1, v2), merging v2 into v1 at new_pos.
    /// Returns true on success.
    fn collapse_edge(&mut self, v1: usize, v2: usize, new_pos: Point3f) -> bool {
        let h = match self.find_half_edge(v1, v2) {
            Some(h) => h,
            None => return false,
        };

        let h_twin = self.half_edges[h].twin;
        let h_next = self.half_edges[h].next;
        let h_prev = self.half_edges[h].prev;
        let face_a = self.half_edges[h].face;
        let h_next_twin = self.half_edges[h_next].twin;
        let h_prev_twin = self.half_edges[h_prev].twin;
        let c = self.half_edges[h_next].target;

        let (face_b, ht_next, ht_prev, ht_next_twin, ht_prev_twin, d) = if h_twin != INVALID {
            let hn = self.half_edges[h_twin].next;
            let hp = self.half_edges[h_twin].prev;
            (
                self.half_edges[h_twin].face,
                hn,
                hp,
                self.half_edges[hn].twin,
                self.half_edges[hp].twin,
                self.half_edges[hn].target,
            )
        } else {
            (INVALID, INVALID, INVALID, INVALID, INVALID, INVALID)
        };

        // Collect v2 outgoing edges BEFORE any modifications
        let v2_outgoing = self.outgoing_half_edges(v2);

        // Re-pair twins for face A border edges
        if h_next_twin != INVALID {
            self.half_edges[h_next_twin].twin = h_prev_twin;
        }
        if h_prev_twin != INVALID {
            self.half_edges[h_prev_twin].twin = h_next_twin;
        }

        // Mark face A as removed
        self.half_edges[h].face = INVALID;
        self.half_edges[h_next].face = INVALID;
        self.half_edges[h_prev].face = INVALID;
        self.face_edge[face_a] = INVALID;
        self.active_face_count -= 1;

        // Handle face B
        if face_b != INVALID {
            if ht_next_twin != INVALID {
                self.half_edges[ht_next_twin].twin = ht_prev_twin;
            }
            if ht_prev_twin != INVALID {
                self.half_edges[ht_prev_twin].twin = ht_next_twin;
            }
            self.half_edges[h_twin].face = INVALID;
            self.half_edges[ht_next].face = INVALID;
            self.half_edges[ht_prev].face = INVALID;
            self.face_edge[face_b] = INVALID;
            self.active_face_count -= 1;
        }

        // Redirect all v2 references to v1
        for &he in &v2_outgoing {
            let prev = self.half_edges[he].prev;
            self.half_edges[prev].target = v1;

            let twin = self.half_edges[he].twin;
            if twin != INVALID && self.half_edges[twin].face != INVALID {
                self.half_edges[twin].target = v1;
            }
        }

        self.repair_vertex_edge(v1, h_prev_twin);
        self.repair_vertex_edge(c, h_next_twin);
        if d != c {
            self.repair_vertex_edge(d, ht_next_twin);
        }

        self.finish_collapse(v1, v2, new_pos);
        true
    }

    /// Point `vertex_edge[v]` at a live outgoing half-edge
    fn repair_vertex_edge(&mut self, v: usize, candidate: usize) {
        if v == INVALID {
            return;
        }
        let current = self.vertex_edge[v];
        if current != INVALID && self.half_edges[current].face != INVALID && self.source(current) == v {
            return;
        }
        self.vertex_edge[v] = if candidate != INVALID
            && self.half_edges[candidate].face != INVALID
            && self.source(candidate) == v
        {
            candidate
        } else {
            self.find_valid_outgoing(v)
        };
    }

    fn finish_collapse(&mut self, v1: usize, v2: usize, new_pos: Point3f) {
        self.vertex_edge[v2] = INVALID;
        self.vertex_removed[v2] = true;

        let v2_quadric = self.quadrics[v2];
        self.positions[v1] = new_pos;
        self.quadrics[v1] += v2_quadric;

        // Interpolate normals
        if let Some(ref mut normals) = self.normals {
            let avg = (normals[v1] + normals[v2]).normalize();
            if avg.iter().all(|x| x.is_finite()) {
                normals[v1] = avg;
            }
        }
    }

    fn to_triangle_mesh(&self) -> TriangleMesh {
        let mut old_to_new = vec![INVALID; self.positions.len()];
        let mut new_positions = Vec::new();
        let mut new_normals = Vec::new();

        for (i, &removed) in self.vertex_removed.iter().enumerate() {
            if !removed && self.vertex_edge[i] != INVALID {
                old_to_new[i] = new_positions.len();
                new_positions.push(self.positions[i]);
                if let Some(ref normals) = self.normals {
                    new_normals.push(normals[i]);
                }
            }
        }

        let mut new_faces = Vec::new();
        for fi in 0..self.face_edge.len() {
            let Some(face) = self.face_vertices(fi) else {
                continue;
            };
            let mapped = face.map(|v| old_to_new[v]);
            if mapped.contains(&INVALID) {
                continue;
            }
            if mapped[0] != mapped[1] && mapped[1] != mapped[2] && mapped[2] != mapped[0] {
                new_faces.push(mapped);
            }
        }

        let mut mesh = TriangleMesh::from_vertices_and_faces(new_positions, new_faces);
        if self.normals.is_some() {
            mesh.set_normals(new_normals);
        }
        mesh
    }
}

// ============================================================
// Edge Cost for Priority Queue
// ============================================================

#[derive(Debug, Clone)]
struct EdgeCost {
    v1: usize,
    v2: usize,
    cost: f64,
}

impl PartialEq for EdgeCost {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for EdgeCost {}

impl PartialOrd for EdgeCost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EdgeCost {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: smallest cost first, ties by vertex index
        other
            .cost
            .total_cmp(&self.cost)
            .then(other.v1.cmp(&self.v1))
            .then(other.v2.cmp(&self.v2))
    }
}

// ============================================================
// Edge Collapse Simplifier
// ============================================================

/// Edge collapse mesh simplifier using half-edge data structure and QEM.
///
/// This simplifier builds a half-edge mesh for local topology queries
/// (neighbor iteration, boundary detection, link condition checks) and uses
/// quadric error metrics to prioritize edge collapses.
#[derive(Debug, Clone)]
pub struct EdgeCollapseSimplifier {
    /// Stop when the minimum collapse cost exceeds this threshold
    pub error_threshold: Option<f64>,
    /// Never collapse edges touching the mesh boundary
    pub preserve_boundary: bool,
    /// Extra cost added to boundary edges, relative to the squared bounding
    /// box diagonal
    pub boundary_weight: f64,
    /// Relative volume change above which a collapse is penalized
    pub volume_tolerance: f64,
    /// Cost added per multiple of `volume_tolerance` exceeded, relative to
    /// the squared bounding box diagonal
    pub volume_weight: f64,
}

impl Default for EdgeCollapseSimplifier {
    fn default() -> Self {
        Self {
            error_threshold: None,
            preserve_boundary: false,
            boundary_weight: 1.0e-3,
            volume_tolerance: 0.05,
            volume_weight: 1.0e-2,
        }
    }
}

/// Geometry-dependent scales used while costing edges
struct CostContext {
    diagonal_squared: f64,
    reference_volume: f64,
}

impl EdgeCollapseSimplifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(error_threshold: Option<f64>, preserve_boundary: bool, boundary_weight: f64) -> Self {
        Self {
            error_threshold,
            preserve_boundary,
            boundary_weight,
            ..Self::default()
        }
    }

    pub fn with_volume_tolerance(mut self, tolerance: f64) -> Self {
        self.volume_tolerance = tolerance;
        self
    }

    /// Cost of collapsing `(v1, v2)`, or `None` if the edge is not eligible
    fn edge_cost(&self, hem: &HalfEdgeMesh, ctx: &CostContext, v1: usize, v2: usize) -> Option<EdgeCost> {
        if hem.vertex_locked[v1] || hem.vertex_locked[v2] {
            return None;
        }
        let on_boundary = hem.is_boundary_vertex(v1) || hem.is_boundary_vertex(v2);
        if self.preserve_boundary && on_boundary {
            return None;
        }

        let (pos, mut cost) = hem.compute_collapse_cost(v1, v2);
        if on_boundary {
            cost += self.boundary_weight * ctx.diagonal_squared;
        }

        let (delta, _) = hem.collapse_effect(v1, v2, &pos);
        let relative = delta.abs() / ctx.reference_volume;
        if self.volume_tolerance >= 0.0 && relative > self.volume_tolerance {
            let excess = relative / self.volume_tolerance.max(f64::EPSILON);
            cost += self.volume_weight * excess * ctx.diagonal_squared;
        }

        Some(EdgeCost { v1, v2, cost })
    }

    fn cost_context(mesh: &TriangleMesh) -> CostContext {
        let diagonal = mesh.diagonal() as f64;
        let diagonal_squared = (diagonal * diagonal).max(f64::MIN_POSITIVE);
        let volume: f64 = mesh
            .faces
            .iter()
            .map(|f| {
                let [a, b, c] = f.map(|v| mesh.vertices[v].coords);
                a.dot(&b.cross(&c)) as f64 / 6.0
            })
            .sum();
        // Open or flat meshes fall back to a bounding box scale
        let reference_volume = volume.abs().max(diagonal * diagonal * diagonal * 1e-3).max(f64::MIN_POSITIVE);
        CostContext {
            diagonal_squared,
            reference_volume,
        }
    }

    /// Build the initial priority queue of edge collapse candidates.
    fn build_queue(&self, hem: &HalfEdgeMesh, ctx: &CostContext) -> PriorityQueue<(usize, usize), EdgeCost> {
        let mut queue = PriorityQueue::new();
        for vi in 0..hem.positions.len() {
            if hem.vertex_removed[vi] {
                continue;
            }
            for target in hem.neighbors(vi) {
                if target < vi {
                    continue;
                }
                if let Some(cost) = self.edge_cost(hem, ctx, vi, target) {
                    queue.push((vi, target), cost);
                }
            }
        }
        queue
    }

    /// Collapse edges until at most `target_faces` faces remain or no
    /// eligible edge is left.
    pub fn simplify_to_face_count(&self, mesh: &TriangleMesh, target_faces: usize) -> Result<TriangleMesh> {
        if mesh.is_empty() || mesh.face_count() == 0 {
            return Err(Error::InvalidData("Mesh is empty".to_string()));
        }
        if target_faces >= mesh.face_count() {
            return Ok(mesh.clone());
        }

        let ctx = Self::cost_context(mesh);
        let mut hem = HalfEdgeMesh::from_triangle_mesh(mesh);
        let mut queue = self.build_queue(&hem, &ctx);
        let mut collapse_count = 0usize;
        let mut rejected = 0usize;

        while hem.active_face_count > target_faces {
            let Some(((v1, v2), edge_cost)) = queue.pop() else {
                break;
            };

            if let Some(threshold) = self.error_threshold {
                if edge_cost.cost > threshold {
                    break;
                }
            }

            // Validate: both vertices still alive and still neighbors
            if hem.vertex_removed[v1]
                || hem.vertex_removed[v2]
                || hem.vertex_edge[v1] == INVALID
                || hem.vertex_edge[v2] == INVALID
            {
                continue;
            }

            // Costs of edges away from the last collapse can go stale
            let Some(fresh) = self.edge_cost(&hem, &ctx, v1, v2) else {
                continue;
            };
            if fresh.cost > edge_cost.cost * (1.0 + 1e-9) + 1e-12 {
                queue.push((v1, v2), fresh);
                continue;
            }

            // Check link condition to avoid non-manifold topology
            if !hem.check_link_condition(v1, v2) {
                rejected += 1;
                continue;
            }

            let (pos, _cost) = hem.compute_collapse_cost(v1, v2);
            let (_, flips) = hem.collapse_effect(v1, v2, &pos);
            if flips {
                rejected += 1;
                continue;
            }

            if let Some(survivor) = hem.collapse(v1, v2, pos) {
                collapse_count += 1;
                for w in hem.neighbors(survivor) {
                    let key = (survivor.min(w), survivor.max(w));
                    if let Some(cost) = self.edge_cost(&hem, &ctx, key.0, key.1) {
                        queue.push(key, cost);
                    }
                }
            }
        }

        if hem.active_face_count > target_faces {
            warn!(
                faces = hem.active_face_count,
                target = target_faces,
                "ran out of collapsible edges before reaching the target"
            );
        }
        debug!(collapses = collapse_count, rejected, faces = hem.active_face_count, "edge collapse finished");

        Ok(hem.to_triangle_mesh())
    }
}

impl MeshSimplifier for EdgeCollapseSimplifier {
    fn simplify(&self, mesh: &TriangleMesh, keep_ratio: f32) -> Result<TriangleMesh> {
        if mesh.is_empty() {
            return Err(Error::InvalidData("Mesh is empty".to_string()));
        }
        if !(0.0..=1.0).contains(&keep_ratio) {
            return Err(Error::InvalidData("Keep ratio must be between 0.0 and 1.0".to_string()));
        }
        if keep_ratio == 1.0 {
            return Ok(mesh.clone());
        }
        let target_faces = (keep_ratio as f64 * mesh.face_count() as f64).round() as usize;
        self.simplify_to_face_count(mesh, target_faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_meshes::{make_plane_grid, make_subdivided_cube};
    use nalgebra::Point3;

    fn make_single_triangle() -> TriangleMesh {
        TriangleMesh::from_vertices_and_faces(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.5, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        )
    }

    fn make_tetrahedron() -> TriangleMesh {
        // Consistently wound: each shared edge appears in opposite directions
        TriangleMesh::from_vertices_and_faces(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.5, 1.0, 0.0),
                Point3::new(0.5, 0.5, 1.0),
            ],
            vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
        )
    }

    fn make_curved_surface(size: usize) -> TriangleMesh {
        let mut mesh = make_plane_grid(size);
        for p in &mut mesh.vertices {
            let fx = p.x / (size - 1) as f32 * std::f32::consts::PI;
            let fy = p.y / (size - 1) as f32 * std::f32::consts::PI;
            p.z = fx.sin() * fy.sin() * 2.0;
        }
        mesh
    }

    fn is_manifold(mesh: &TriangleMesh) -> bool {
        let mut directed = std::collections::HashSet::new();
        for f in &mesh.faces {
            for j in 0..3 {
                if !directed.insert((f[j], f[(j + 1) % 3])) {
                    return false;
                }
            }
        }
        true
    }

    // ---- Construction tests ----

    #[test]
    fn test_creation() {
        let s = EdgeCollapseSimplifier::new();
        assert!(!s.preserve_boundary);
        assert!(s.error_threshold.is_none());
        assert_eq!(s.volume_tolerance, 0.05);
    }

    #[test]
    fn test_with_params() {
        let s = EdgeCollapseSimplifier::with_params(Some(0.01), true, 50.0).with_volume_tolerance(0.2);
        assert_eq!(s.error_threshold, Some(0.01));
        assert!(s.preserve_boundary);
        assert_eq!(s.boundary_weight, 50.0);
        assert_eq!(s.volume_tolerance, 0.2);
    }

    #[test]
    fn test_cost_ordering_breaks_ties_by_vertex() {
        let a = EdgeCost { v1: 1, v2: 2, cost: 0.0 };
        let b = EdgeCost { v1: 3, v2: 4, cost: 0.0 };
        let c = EdgeCost { v1: 0, v2: 9, cost: 1.0 };
        // Larger means popped first
        assert!(a > b);
        assert!(b > c);
    }

    // ---- Half-edge structure tests ----

    #[test]
    fn test_halfedge_construction() {
        let mesh = make_tetrahedron();
        let hem = HalfEdgeMesh::from_triangle_mesh(&mesh);
        assert_eq!(hem.half_edges.len(), 12);
        assert_eq!(hem.active_face_count, 4);
        for he in &hem.half_edges {
            assert_ne!(he.twin, INVALID, "interior half-edge should have twin");
        }
        assert!(hem.vertex_locked.iter().all(|l| !l));
    }

    #[test]
    fn test_halfedge_boundary() {
        let mesh = make_single_triangle();
        let hem = HalfEdgeMesh::from_triangle_mesh(&mesh);
        for he in &hem.half_edges {
            assert_eq!(he.twin, INVALID);
        }
        assert!((0..3).all(|v| hem.is_boundary_vertex(v)));
        assert_eq!(hem.neighbors(0), vec![1, 2]);
    }

    #[test]
    fn test_non_manifold_edge_locks_vertices() {
        // Three triangles sharing the edge 0-1
        let mesh = TriangleMesh::from_vertices_and_faces(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.5, 1.0, 0.0),
                Point3::new(0.5, -1.0, 0.0),
                Point3::new(0.5, 0.0, 1.0),
            ],
            vec![[0, 1, 2], [1, 0, 3], [0, 1, 4]],
        );
        let hem = HalfEdgeMesh::from_triangle_mesh(&mesh);
        assert!(hem.vertex_locked[0]);
        assert!(hem.vertex_locked[1]);
        assert!(!hem.vertex_locked[2]);
    }

    #[test]
    fn test_link_condition_rejects_tetrahedron_collapse() {
        let mesh = make_tetrahedron();
        let hem = HalfEdgeMesh::from_triangle_mesh(&mesh);
        // Collapsing any tetrahedron edge leaves two coincident triangles
        assert!(!hem.check_link_condition(0, 1));
    }

    #[test]
    fn test_link_condition_on_grid() {
        let mesh = make_plane_grid(4);
        let hem = HalfEdgeMesh::from_triangle_mesh(&mesh);
        // Interior vertex 5 to interior vertex 6
        assert!(hem.check_link_condition(5, 6));
    }

    // ---- Simplification tests ----

    #[test]
    fn test_empty_mesh() {
        let s = EdgeCollapseSimplifier::new();
        assert!(s.simplify(&TriangleMesh::new(), 0.5).is_err());
    }

    #[test]
    fn test_invalid_keep_ratio() {
        let s = EdgeCollapseSimplifier::new();
        let mesh = make_single_triangle();
        assert!(s.simplify(&mesh, -0.1).is_err());
        assert!(s.simplify(&mesh, 1.1).is_err());
    }

    #[test]
    fn test_full_keep_ratio_is_identity() {
        let s = EdgeCollapseSimplifier::new();
        let mesh = make_single_triangle();
        let result = s.simplify(&mesh, 1.0).unwrap();
        assert_eq!(result.vertices, mesh.vertices);
        assert_eq!(result.faces, mesh.faces);
    }

    #[test]
    fn test_tetrahedron_stays_valid() {
        let s = EdgeCollapseSimplifier::new();
        let mesh = make_tetrahedron();
        let result = s.simplify(&mesh, 0.5).unwrap();
        assert_eq!(result.face_count(), 4);
        result.validate().unwrap();
    }

    #[test]
    fn test_planar_grid_simplification() {
        let s = EdgeCollapseSimplifier::new();
        let mesh = make_plane_grid(6);
        assert_eq!(mesh.face_count(), 50);

        let result = s.simplify(&mesh, 0.5).unwrap();
        assert!(result.face_count() <= 25);
        assert!(result.face_count() > 0);
        assert!(is_manifold(&result));
        for n in result.calculate_face_normals() {
            assert!(n.z > 0.99, "face flipped: {:?}", n);
        }
    }

    #[test]
    fn test_curved_surface_simplification() {
        let s = EdgeCollapseSimplifier::new();
        let mesh = make_curved_surface(8);
        let result = s.simplify(&mesh, 0.5).unwrap();
        assert!(result.face_count() <= 49);
        assert!(result.face_count() > 0);
        result.validate().unwrap();
    }

    #[test]
    fn test_boundary_preservation() {
        let s = EdgeCollapseSimplifier::with_params(None, true, 0.0);
        let mesh = make_plane_grid(6);
        let result = s.simplify(&mesh, 0.5).unwrap();
        let on_border = |x: f32, y: f32| x == 0.0 || y == 0.0 || x == 5.0 || y == 5.0;
        let kept = result.vertices.iter().filter(|p| on_border(p.x, p.y)).count();
        assert_eq!(kept, 20, "all boundary vertices should survive");
    }

    #[test]
    fn test_error_threshold_stops_early() {
        let s = EdgeCollapseSimplifier::with_params(Some(1e-12), false, 0.0);
        let mesh = make_curved_surface(8);
        let result = s.simplify(&mesh, 0.1).unwrap();
        assert!(result.face_count() > (mesh.face_count() as f32 * 0.1) as usize);
    }

    #[test]
    fn test_attribute_preservation_normals() {
        let mut mesh = make_plane_grid(5);
        mesh.set_normals(vec![Vector3f::new(0.0, 0.0, 1.0); mesh.vertex_count()]);

        let result = EdgeCollapseSimplifier::new().simplify(&mesh, 0.3).unwrap();
        let normals = result.normals.as_ref().expect("normals should be preserved");
        assert_eq!(normals.len(), result.vertex_count());
        assert!(normals.iter().all(|n| n.z > 0.9));
    }

    #[test]
    fn test_closed_cube_reaches_target() {
        let mesh = make_subdivided_cube(10);
        assert_eq!(mesh.face_count(), 1200);
        let result = EdgeCollapseSimplifier::new().simplify_to_face_count(&mesh, 120).unwrap();
        assert!(result.face_count() <= 120);
        assert!(result.face_count() >= 100);
        assert!(is_manifold(&result));
        assert_eq!(result.face_count(), 2 * result.vertex_count() - 4);
    }

    #[test]
    fn test_cube_corners_survive() {
        let mesh = make_subdivided_cube(6);
        let result = EdgeCollapseSimplifier::new().simplify_to_face_count(&mesh, 60).unwrap();
        for corner in [
            Point3::new(-1.0f32, -1.0, -1.0),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(1.0, -1.0, 1.0),
        ] {
            let nearest = result
                .vertices
                .iter()
                .map(|p| (p - corner).norm())
                .fold(f32::INFINITY, f32::min);
            assert!(nearest < 1e-4, "corner {:?} moved by {}", corner, nearest);
        }
    }

    #[test]
    fn test_simplification_is_deterministic() {
        let mesh = make_curved_surface(10);
        let s = EdgeCollapseSimplifier::new();
        let a = s.simplify(&mesh, 0.3).unwrap();
        let b = s.simplify(&mesh, 0.3).unwrap();
        assert_eq!(a.vertices, b.vertices);
        assert_eq!(a.faces, b.faces);
    }
}
