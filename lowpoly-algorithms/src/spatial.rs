//! Bounding volume hierarchy over mesh triangles
//!
//! Provides nearest-hit ray casting, all-hits ray casting and closest point
//! queries. The node array is flat and `Pod` so the same hierarchy can be
//! uploaded to a compute device unchanged.

use bytemuck::{Pod, Zeroable};
use lowpoly_core::{Point3f, TriangleMesh, Vector3f};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Maximum number of triangles stored in a leaf
pub const LEAF_SIZE: usize = 4;

/// Hits with `t` down to this negative value are accepted, so rays that
/// start exactly on a surface still find it.
pub const RAY_T_EPSILON: f32 = 1.0e-6;

/// Determinant threshold below which a ray counts as parallel to a triangle
pub const PARALLEL_EPSILON: f32 = 1.0e-12;

/// Flattened BVH node.
///
/// For a leaf (`count > 0`) `left_or_first` is the first entry in the
/// triangle order array. For an interior node it is the index of the left
/// child; the right child follows it directly.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq)]
pub struct BvhNode {
    pub min: [f32; 3],
    pub left_or_first: u32,
    pub max: [f32; 3],
    pub count: u32,
}

impl BvhNode {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }

    /// Slab test; returns the entry distance if the ray hits the box
    /// before `t_max`.
    #[inline]
    fn ray_entry(&self, origin: &Point3f, inv_dir: &Vector3f, t_max: f32) -> Option<f32> {
        let mut t0 = -RAY_T_EPSILON;
        let mut t1 = t_max;
        for k in 0..3 {
            let a = (self.min[k] - origin[k]) * inv_dir[k];
            let b = (self.max[k] - origin[k]) * inv_dir[k];
            let (near, far) = if a <= b { (a, b) } else { (b, a) };
            // NaN from 0 * inf keeps the current interval
            if near > t0 {
                t0 = near;
            }
            if far < t1 {
                t1 = far;
            }
            if t0 > t1 {
                return None;
            }
        }
        Some(t0)
    }

    #[inline]
    fn distance_squared(&self, p: &Point3f) -> f32 {
        let mut d = 0.0;
        for k in 0..3 {
            let v = if p[k] < self.min[k] {
                self.min[k] - p[k]
            } else if p[k] > self.max[k] {
                p[k] - self.max[k]
            } else {
                0.0
            };
            d += v * v;
        }
        d
    }
}

/// A ray with an origin and a (not necessarily normalized) direction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Point3f,
    pub direction: Vector3f,
}

impl Ray {
    pub fn new(origin: Point3f, direction: Vector3f) -> Self {
        Self { origin, direction }
    }
}

/// Nearest intersection of a ray with the mesh.
///
/// `u` and `v` weight the second and third corner of the face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub face: usize,
    pub t: f32,
    pub u: f32,
    pub v: f32,
}

impl RayHit {
    /// Barycentric weights of the three corners
    pub fn barycentric(&self) -> [f32; 3] {
        [1.0 - self.u - self.v, self.u, self.v]
    }

    /// Deterministic preference: smaller `t`, then smaller face index
    #[inline]
    pub fn is_closer_than(&self, other: &RayHit) -> bool {
        self.t < other.t || (self.t == other.t && self.face < other.face)
    }
}

/// Closest point on the mesh to a query point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosestPoint {
    pub face: usize,
    pub point: Point3f,
    pub distance_squared: f32,
}

/// Möller-Trumbore ray/triangle intersection, two-sided.
///
/// Returns `(t, u, v)`. The arithmetic order is mirrored by the compute
/// shader so both paths agree on every hit.
#[inline]
pub fn ray_triangle_intersect(
    origin: &Point3f,
    dir: &Vector3f,
    v0: &Point3f,
    v1: &Point3f,
    v2: &Point3f,
) -> Option<(f32, f32, f32)> {
    let e1 = v1 - v0;
    let e2 = v2 - v0;
    let p = dir.cross(&e2);
    let det = e1.dot(&p);
    if det.abs() < PARALLEL_EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - v0;
    let u = s.dot(&p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(&e1);
    let v = dir.dot(&q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(&q) * inv_det;
    Some((t, u, v))
}

/// Closest point on a triangle (Ericson, Real-Time Collision Detection 5.1.5)
pub fn closest_point_on_triangle(p: &Point3f, a: &Point3f, b: &Point3f, c: &Point3f) -> Point3f {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return *a;
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return *b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return *c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

/// Bounding volume hierarchy over the triangles of one mesh
#[derive(Debug, Clone)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    order: Vec<u32>,
    triangles: Vec<[Point3f; 3]>,
}

struct BuildItem {
    face: u32,
    min: [f32; 3],
    max: [f32; 3],
    centroid: [f32; 3],
}

impl Bvh {
    /// Build a hierarchy with median splits on the longest centroid axis
    pub fn build(mesh: &TriangleMesh) -> Self {
        let triangles: Vec<[Point3f; 3]> = (0..mesh.face_count()).map(|f| mesh.triangle(f)).collect();
        let mut items: Vec<BuildItem> = triangles
            .iter()
            .enumerate()
            .map(|(i, tri)| {
                let mut min = [f32::INFINITY; 3];
                let mut max = [f32::NEG_INFINITY; 3];
                for p in tri {
                    for k in 0..3 {
                        min[k] = min[k].min(p[k]);
                        max[k] = max[k].max(p[k]);
                    }
                }
                let centroid = [
                    (tri[0].x + tri[1].x + tri[2].x) / 3.0,
                    (tri[0].y + tri[1].y + tri[2].y) / 3.0,
                    (tri[0].z + tri[1].z + tri[2].z) / 3.0,
                ];
                BuildItem {
                    face: i as u32,
                    min,
                    max,
                    centroid,
                }
            })
            .collect();

        let mut nodes = Vec::with_capacity(2 * items.len().max(1));
        if !items.is_empty() {
            nodes.push(BvhNode::zeroed());
            let len = items.len();
            Self::build_node(&mut nodes, 0, &mut items, 0, len);
        }
        let order = items.iter().map(|it| it.face).collect();

        Self {
            nodes,
            order,
            triangles,
        }
    }

    fn build_node(nodes: &mut Vec<BvhNode>, node: usize, items: &mut [BuildItem], start: usize, end: usize) {
        let slice = &mut items[start..end];
        let mut min = [f32::INFINITY; 3];
        let mut max = [f32::NEG_INFINITY; 3];
        let mut cmin = [f32::INFINITY; 3];
        let mut cmax = [f32::NEG_INFINITY; 3];
        for it in slice.iter() {
            for k in 0..3 {
                min[k] = min[k].min(it.min[k]);
                max[k] = max[k].max(it.max[k]);
                cmin[k] = cmin[k].min(it.centroid[k]);
                cmax[k] = cmax[k].max(it.centroid[k]);
            }
        }
        nodes[node].min = min;
        nodes[node].max = max;

        let count = end - start;
        if count <= LEAF_SIZE {
            nodes[node].left_or_first = start as u32;
            nodes[node].count = count as u32;
            return;
        }

        let extent = [cmax[0] - cmin[0], cmax[1] - cmin[1], cmax[2] - cmin[2]];
        let axis = if extent[0] >= extent[1] && extent[0] >= extent[2] {
            0
        } else if extent[1] >= extent[2] {
            1
        } else {
            2
        };

        let mid = count / 2;
        slice.select_nth_unstable_by(mid, |a, b| {
            a.centroid[axis]
                .total_cmp(&b.centroid[axis])
                .then(a.face.cmp(&b.face))
        });

        let left = nodes.len();
        nodes.push(BvhNode::zeroed());
        nodes.push(BvhNode::zeroed());
        nodes[node].left_or_first = left as u32;
        nodes[node].count = 0;
        Self::build_node(nodes, left, items, start, start + mid);
        Self::build_node(nodes, left + 1, items, start + mid, end);
    }

    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    /// Face indices in leaf order
    pub fn order(&self) -> &[u32] {
        &self.order
    }

    /// Triangle corners indexed by face
    pub fn triangles(&self) -> &[[Point3f; 3]] {
        &self.triangles
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Nearest hit with `t` in `[-RAY_T_EPSILON, t_max]`
    pub fn intersect(&self, ray: &Ray, t_max: f32) -> Option<RayHit> {
        if self.nodes.is_empty() {
            return None;
        }
        let inv_dir = ray.direction.map(|d| 1.0 / d);
        let mut best: Option<RayHit> = None;
        let mut limit = t_max;
        let mut stack = vec![0usize];

        while let Some(ni) = stack.pop() {
            let node = &self.nodes[ni];
            if node.ray_entry(&ray.origin, &inv_dir, limit).is_none() {
                continue;
            }
            if node.is_leaf() {
                let first = node.left_or_first as usize;
                for &face in &self.order[first..first + node.count as usize] {
                    let face = face as usize;
                    let [a, b, c] = &self.triangles[face];
                    if let Some((t, u, v)) = ray_triangle_intersect(&ray.origin, &ray.direction, a, b, c) {
                        if t < -RAY_T_EPSILON || t > limit {
                            continue;
                        }
                        let hit = RayHit { face, t, u, v };
                        if best.map_or(true, |b| hit.is_closer_than(&b)) {
                            best = Some(hit);
                            limit = t;
                        }
                    }
                }
            } else {
                let left = node.left_or_first as usize;
                stack.push(left + 1);
                stack.push(left);
            }
        }
        best
    }

    /// Every hit along the ray with `t` in `[-RAY_T_EPSILON, t_max]`,
    /// sorted by `t`
    pub fn intersect_all(&self, ray: &Ray, t_max: f32) -> Vec<RayHit> {
        let mut hits = Vec::new();
        if self.nodes.is_empty() {
            return hits;
        }
        let inv_dir = ray.direction.map(|d| 1.0 / d);
        let mut stack = vec![0usize];
        while let Some(ni) = stack.pop() {
            let node = &self.nodes[ni];
            if node.ray_entry(&ray.origin, &inv_dir, t_max).is_none() {
                continue;
            }
            if node.is_leaf() {
                let first = node.left_or_first as usize;
                for &face in &self.order[first..first + node.count as usize] {
                    let face = face as usize;
                    let [a, b, c] = &self.triangles[face];
                    if let Some((t, u, v)) = ray_triangle_intersect(&ray.origin, &ray.direction, a, b, c) {
                        if t >= -RAY_T_EPSILON && t <= t_max {
                            hits.push(RayHit { face, t, u, v });
                        }
                    }
                }
            } else {
                let left = node.left_or_first as usize;
                stack.push(left + 1);
                stack.push(left);
            }
        }
        hits.sort_by(|a, b| a.t.total_cmp(&b.t).then(a.face.cmp(&b.face)));
        hits
    }

    /// Closest point on any triangle, best-first over node distances
    pub fn closest_point(&self, p: &Point3f) -> Option<ClosestPoint> {
        if self.nodes.is_empty() {
            return None;
        }

        #[derive(PartialEq)]
        struct Entry(f32, usize);
        impl Eq for Entry {}
        impl PartialOrd for Entry {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }
        impl Ord for Entry {
            fn cmp(&self, other: &Self) -> Ordering {
                // Min-heap on distance
                other.0.total_cmp(&self.0).then(other.1.cmp(&self.1))
            }
        }

        let mut best: Option<ClosestPoint> = None;
        let mut heap = BinaryHeap::new();
        heap.push(Entry(self.nodes[0].distance_squared(p), 0));

        while let Some(Entry(d, ni)) = heap.pop() {
            if best.is_some_and(|b| d > b.distance_squared) {
                break;
            }
            let node = &self.nodes[ni];
            if node.is_leaf() {
                let first = node.left_or_first as usize;
                for &face in &self.order[first..first + node.count as usize] {
                    let face = face as usize;
                    let [a, b, c] = &self.triangles[face];
                    let q = closest_point_on_triangle(p, a, b, c);
                    let dq = (q - p).norm_squared();
                    let better = match best {
                        None => true,
                        Some(b) => dq < b.distance_squared || (dq == b.distance_squared && face < b.face),
                    };
                    if better {
                        best = Some(ClosestPoint {
                            face,
                            point: q,
                            distance_squared: dq,
                        });
                    }
                }
            } else {
                let left = node.left_or_first as usize;
                for child in [left, left + 1] {
                    heap.push(Entry(self.nodes[child].distance_squared(p), child));
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_grid(size: usize, z: f32) -> TriangleMesh {
        let mut vertices = Vec::new();
        for y in 0..size {
            for x in 0..size {
                vertices.push(Point3f::new(x as f32, y as f32, z));
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

    fn brute_force_hit(mesh: &TriangleMesh, ray: &Ray, t_max: f32) -> Option<RayHit> {
        let mut best: Option<RayHit> = None;
        for f in 0..mesh.face_count() {
            let [a, b, c] = mesh.triangle(f);
            if let Some((t, u, v)) = ray_triangle_intersect(&ray.origin, &ray.direction, &a, &b, &c) {
                if t >= -RAY_T_EPSILON && t <= t_max {
                    let hit = RayHit { face: f, t, u, v };
                    if best.map_or(true, |b| hit.is_closer_than(&b)) {
                        best = Some(hit);
                    }
                }
            }
        }
        best
    }

    #[test]
    fn test_ray_triangle_hit_and_miss() {
        let a = Point3f::new(0.0, 0.0, 0.0);
        let b = Point3f::new(1.0, 0.0, 0.0);
        let c = Point3f::new(0.0, 1.0, 0.0);
        let origin = Point3f::new(0.25, 0.25, 1.0);
        let down = Vector3f::new(0.0, 0.0, -1.0);
        let (t, u, v) = ray_triangle_intersect(&origin, &down, &a, &b, &c).unwrap();
        assert_relative_eq!(t, 1.0, epsilon = 1e-6);
        assert_relative_eq!(u, 0.25, epsilon = 1e-6);
        assert_relative_eq!(v, 0.25, epsilon = 1e-6);

        let outside = Point3f::new(2.0, 2.0, 1.0);
        assert!(ray_triangle_intersect(&outside, &down, &a, &b, &c).is_none());
        let sideways = Vector3f::new(1.0, 0.0, 0.0);
        assert!(ray_triangle_intersect(&origin, &sideways, &a, &b, &c).is_none());
    }

    #[test]
    fn test_bvh_matches_brute_force() {
        let mut mesh = make_grid(12, 0.0);
        // Second layer above to exercise nearest selection
        let upper = make_grid(12, 0.5);
        let offset = mesh.vertex_count();
        mesh.vertices.extend(upper.vertices);
        mesh.faces.extend(upper.faces.iter().map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]));

        let bvh = Bvh::build(&mesh);
        for i in 0..40 {
            let x = 0.3 + (i as f32 * 0.271) % 10.5;
            let y = 0.2 + (i as f32 * 0.613) % 10.5;
            let ray = Ray::new(Point3f::new(x, y, 2.0), Vector3f::new(0.0, 0.0, -1.0));
            let expected = brute_force_hit(&mesh, &ray, 10.0);
            let got = bvh.intersect(&ray, 10.0);
            assert_eq!(expected.map(|h| h.face), got.map(|h| h.face));
            let hit = got.unwrap();
            assert_relative_eq!(hit.t, 1.5, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_intersect_respects_t_max() {
        let mesh = make_grid(4, 0.0);
        let bvh = Bvh::build(&mesh);
        let ray = Ray::new(Point3f::new(1.2, 1.3, 1.0), Vector3f::new(0.0, 0.0, -1.0));
        assert!(bvh.intersect(&ray, 0.5).is_none());
        assert!(bvh.intersect(&ray, 1.5).is_some());
    }

    #[test]
    fn test_ray_starting_on_surface_hits() {
        let mesh = make_grid(4, 0.0);
        let bvh = Bvh::build(&mesh);
        let ray = Ray::new(Point3f::new(1.2, 1.3, 0.0), Vector3f::new(0.0, 0.0, -1.0));
        let hit = bvh.intersect(&ray, 0.1).unwrap();
        assert!(hit.t.abs() <= RAY_T_EPSILON);
    }

    #[test]
    fn test_intersect_all_sorted() {
        let mut mesh = make_grid(3, 0.0);
        let upper = make_grid(3, 1.0);
        let offset = mesh.vertex_count();
        mesh.vertices.extend(upper.vertices);
        mesh.faces.extend(upper.faces.iter().map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]));
        let bvh = Bvh::build(&mesh);
        let ray = Ray::new(Point3f::new(0.3, 0.6, -1.0), Vector3f::new(0.0, 0.0, 1.0));
        let hits = bvh.intersect_all(&ray, 10.0);
        assert_eq!(hits.len(), 2);
        assert!(hits[0].t < hits[1].t);
    }

    #[test]
    fn test_closest_point_on_grid() {
        let mesh = make_grid(6, 0.0);
        let bvh = Bvh::build(&mesh);
        let q = bvh.closest_point(&Point3f::new(2.3, 1.7, 0.8)).unwrap();
        assert_relative_eq!(q.point, Point3f::new(2.3, 1.7, 0.0), epsilon = 1e-5);
        assert_relative_eq!(q.distance_squared, 0.64, epsilon = 1e-5);

        // Outside the grid: nearest point is on the border
        let q = bvh.closest_point(&Point3f::new(-1.0, 2.5, 0.0)).unwrap();
        assert_relative_eq!(q.point, Point3f::new(0.0, 2.5, 0.0), epsilon = 1e-5);
    }

    #[test]
    fn test_closest_point_on_triangle_regions() {
        let a = Point3f::new(0.0, 0.0, 0.0);
        let b = Point3f::new(1.0, 0.0, 0.0);
        let c = Point3f::new(0.0, 1.0, 0.0);
        assert_eq!(closest_point_on_triangle(&Point3f::new(-1.0, -1.0, 0.0), &a, &b, &c), a);
        let edge = closest_point_on_triangle(&Point3f::new(0.5, -1.0, 0.0), &a, &b, &c);
        assert_relative_eq!(edge, Point3f::new(0.5, 0.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_empty_mesh_has_no_hits() {
        let bvh = Bvh::build(&TriangleMesh::new());
        assert!(bvh.is_empty());
        let ray = Ray::new(Point3f::origin(), Vector3f::z());
        assert!(bvh.intersect(&ray, 1.0).is_none());
        assert!(bvh.closest_point(&Point3f::origin()).is_none());
    }
}
