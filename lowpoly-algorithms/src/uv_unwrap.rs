//! Angle-based UV unwrapping and atlas packing
//!
//! Faces are grown into islands across manifold edges while both the
//! neighbouring face and the island's seed face stay within the angle
//! limit. Each island is projected onto the plane of its seed normal, then
//! all islands are packed into the unit square on shelves with one uniform
//! scale, each inside its own margin-sized cell. The margin is divided by
//! the side of the smallest square grid holding every island, so it
//! shrinks with the island count the way per-island texel budgets do.

use crate::normals::corner_normals;
use crate::topology::{face_edges, EdgeFaces};
use lowpoly_core::{
    edge_key, Degradation, DegradationKind, Error, Result, TriangleMesh, UvIsland, Vector3f,
};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Default seam angle in degrees
pub const DEFAULT_ANGLE_LIMIT: f32 = 66.0;

/// Default spacing between islands, relative to the island grid cell
pub const DEFAULT_ISLAND_MARGIN: f32 = 0.06;

const SCALE_SEARCH_STEPS: usize = 48;

/// Unwrap parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvUnwrapConfig {
    /// Maximum angle in degrees between faces of one island
    pub angle_limit: f32,
    /// Spacing between islands as a fraction of one cell of a square grid
    /// holding every island; a single island gets the full value
    pub margin: f32,
}

impl Default for UvUnwrapConfig {
    fn default() -> Self {
        Self {
            angle_limit: DEFAULT_ANGLE_LIMIT,
            margin: DEFAULT_ISLAND_MARGIN,
        }
    }
}

/// Islands produced by an unwrap and how they were packed
#[derive(Debug, Clone, PartialEq)]
pub struct UvLayout {
    pub islands: Vec<UvIsland>,
    /// Uniform world-to-atlas scale applied to every island
    pub scale: f32,
    /// Margin actually used in atlas units
    pub margin: f32,
    pub degradations: Vec<Degradation>,
}

/// Result of packing rectangles into the unit square
#[derive(Debug, Clone, PartialEq)]
pub struct Packing {
    /// Lower corner of every rectangle, margin already applied
    pub offsets: Vec<[f32; 2]>,
    pub scale: f32,
    /// Spacing used in atlas units
    pub margin: f32,
    /// The requested spacing did not fit and was lowered
    pub reduced: bool,
}

/// Side of the smallest square grid with a cell per island
fn grid_side(islands: usize) -> f32 {
    (islands as f32).sqrt().ceil().max(1.0)
}

/// Group faces into islands. Returns the island index of every face and
/// the faces of every island in ascending order.
pub fn segment_islands(mesh: &TriangleMesh, angle_limit: f32) -> (Vec<usize>, Vec<Vec<usize>>) {
    let adjacency = EdgeFaces::build(mesh);
    let normals = mesh.calculate_face_normals();
    let cos_limit = angle_limit.clamp(0.0, 180.0).to_radians().cos();

    let mut island_of = vec![usize::MAX; mesh.face_count()];
    let mut islands = Vec::new();
    for seed in 0..mesh.face_count() {
        if island_of[seed] != usize::MAX {
            continue;
        }
        let id = islands.len();
        let seed_normal = normals[seed];
        island_of[seed] = id;
        let mut members = vec![seed];
        let mut cursor = 0;
        while cursor < members.len() {
            let f = members[cursor];
            cursor += 1;
            for (a, b) in face_edges(&mesh.faces[f]) {
                let Some(g) = adjacency.opposite(f, a, b) else {
                    continue;
                };
                if island_of[g] != usize::MAX {
                    continue;
                }
                if normals[f].dot(&normals[g]) >= cos_limit && seed_normal.dot(&normals[g]) >= cos_limit {
                    island_of[g] = id;
                    members.push(g);
                }
            }
        }
        members.sort_unstable();
        islands.push(members);
    }
    (island_of, islands)
}

/// Right-handed in-plane basis for a projection direction
fn plane_basis(n: &Vector3f) -> (Vector3f, Vector3f) {
    let abs = n.abs();
    let helper = if abs.x <= abs.y && abs.x <= abs.z {
        Vector3f::x()
    } else if abs.y <= abs.z {
        Vector3f::y()
    } else {
        Vector3f::z()
    };
    let u = helper.cross(n).try_normalize(f32::EPSILON).unwrap_or_else(Vector3f::x);
    let v = n.cross(&u);
    (u, v)
}

/// Shelf layout of `sizes` at a given scale. Returns the lower corner of
/// every cell, or `None` if the cells do not fit in the unit square.
fn shelf_layout(sizes: &[[f32; 2]], order: &[usize], scale: f32, margin: f32) -> Option<Vec<[f32; 2]>> {
    let mut cells = vec![[0.0; 2]; sizes.len()];
    let (mut x, mut y, mut shelf_height) = (0.0f32, 0.0f32, 0.0f32);
    for &i in order {
        let w = sizes[i][0] * scale + margin;
        let h = sizes[i][1] * scale + margin;
        if w > 1.0 {
            return None;
        }
        if x + w > 1.0 {
            y += shelf_height;
            x = 0.0;
            shelf_height = 0.0;
        }
        if y + h > 1.0 {
            return None;
        }
        cells[i] = [x, y];
        x += w;
        shelf_height = shelf_height.max(h);
    }
    Some(cells)
}

fn search_scale(sizes: &[[f32; 2]], order: &[usize], margin: f32) -> Option<(f32, Vec<[f32; 2]>)> {
    let largest = sizes.iter().flat_map(|s| s.iter().copied()).fold(0.0f32, f32::max);
    let zero = shelf_layout(sizes, order, 0.0, margin)?;
    if largest <= f32::EPSILON {
        return Some((1.0, zero));
    }
    let mut hi = (1.0 - margin) / largest;
    if hi <= 0.0 {
        return None;
    }
    if let Some(cells) = shelf_layout(sizes, order, hi, margin) {
        return Some((hi, cells));
    }
    let mut lo = 0.0f32;
    let mut best = None;
    for _ in 0..SCALE_SEARCH_STEPS {
        let mid = 0.5 * (lo + hi);
        match shelf_layout(sizes, order, mid, margin) {
            Some(cells) => {
                lo = mid;
                best = Some(cells);
            }
            None => hi = mid,
        }
    }
    best.filter(|_| lo > 0.0).map(|cells| (lo, cells))
}

/// Pack rectangles of `sizes` (world units) into the unit square.
///
/// All rectangles share one scale, found by bisection. Each one sits in a
/// cell grown by `margin / ceil(sqrt(n))`, so margin-inflated boxes never
/// overlap. When that spacing leaves no room at any positive scale it is
/// reduced to `0.5 / ceil(sqrt(n))`. The result depends only on the inputs.
pub fn pack_islands(sizes: &[[f32; 2]], margin: f32) -> Packing {
    let margin = if margin.is_finite() { margin.max(0.0) } else { 0.0 };
    let side = grid_side(sizes.len());
    let spacing = margin / side;
    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by(|&a, &b| {
        sizes[b][1]
            .total_cmp(&sizes[a][1])
            .then(sizes[b][0].total_cmp(&sizes[a][0]))
            .then(a.cmp(&b))
    });

    let (scale, cells, margin) = match search_scale(sizes, &order, spacing) {
        Some((scale, cells)) => (scale, cells, spacing),
        None => {
            let reduced = (0.5 / side).min(spacing);
            match search_scale(sizes, &order, reduced) {
                Some((scale, cells)) => (scale, cells, reduced),
                None => {
                    let cells = shelf_layout(sizes, &order, 0.0, 0.0).unwrap_or_else(|| vec![[0.0; 2]; sizes.len()]);
                    (0.0, cells, 0.0)
                }
            }
        }
    };

    let half = margin * 0.5;
    let offsets = cells.iter().map(|c| [c[0] + half, c[1] + half]).collect();
    Packing {
        offsets,
        scale,
        margin,
        reduced: margin < spacing,
    }
}

/// Replace the mesh's UVs with a fresh unwrap.
///
/// Vertices are split wherever an island seam or a hard edge passes, so
/// every vertex carries exactly one UV and one normal afterwards. Face
/// order is preserved.
pub fn unwrap_uvs(mesh: &mut TriangleMesh, config: &UvUnwrapConfig) -> Result<UvLayout> {
    if mesh.face_count() == 0 {
        return Err(Error::EmptyGeometry("cannot unwrap a mesh without faces".to_string()));
    }

    let (island_of, island_faces) = segment_islands(mesh, config.angle_limit);
    let face_normals = mesh.calculate_face_normals();

    // Island-local projected coordinates and bounds
    let mut bases = Vec::with_capacity(island_faces.len());
    let mut bounds = Vec::with_capacity(island_faces.len());
    for faces in &island_faces {
        let n = face_normals[faces[0]].try_normalize(f32::EPSILON).unwrap_or_else(Vector3f::z);
        let (u, v) = plane_basis(&n);
        let mut lo = [f32::INFINITY; 2];
        let mut hi = [f32::NEG_INFINITY; 2];
        for &f in faces {
            for &vi in &mesh.faces[f] {
                let p = mesh.vertices[vi].coords;
                let q = [p.dot(&u), p.dot(&v)];
                for k in 0..2 {
                    lo[k] = lo[k].min(q[k]);
                    hi[k] = hi[k].max(q[k]);
                }
            }
        }
        bases.push((u, v));
        bounds.push((lo, hi));
    }

    let sizes: Vec<[f32; 2]> = bounds.iter().map(|(lo, hi)| [hi[0] - lo[0], hi[1] - lo[1]]).collect();
    let packing = pack_islands(&sizes, config.margin);

    let mut degradations = Vec::new();
    if packing.reduced {
        warn!(
            requested = config.margin,
            applied = packing.margin,
            islands = sizes.len(),
            "island margin reduced to fit the atlas"
        );
        degradations.push(Degradation::new(
            DegradationKind::MarginReduced,
            format!(
                "island margin {} does not fit {} islands, used {}",
                config.margin,
                sizes.len(),
                packing.margin
            ),
        ));
    }

    // Split vertices per island and smoothing group
    let corners = corner_normals(mesh);
    let mut remap: HashMap<(usize, usize), usize> = HashMap::new();
    let mut vertices = Vec::new();
    let mut normals = Vec::new();
    let mut uvs = Vec::new();
    let mut faces = Vec::with_capacity(mesh.face_count());
    for (fi, face) in mesh.faces.iter().enumerate() {
        let island = island_of[fi];
        let (u_axis, v_axis) = bases[island];
        let (lo, hi) = bounds[island];
        let offset = packing.offsets[island];
        let mut new_face = [0; 3];
        for k in 0..3 {
            let group = corners.groups[fi][k];
            let next = vertices.len();
            let index = *remap.entry((island, group)).or_insert(next);
            if index == next {
                let p = mesh.vertices[face[k]];
                // v runs down the image, projected v runs up
                let uv = [
                    offset[0] + (p.coords.dot(&u_axis) - lo[0]) * packing.scale,
                    offset[1] + (hi[1] - p.coords.dot(&v_axis)) * packing.scale,
                ];
                vertices.push(p);
                normals.push(corners.normals[group]);
                uvs.push(uv);
            }
            new_face[k] = index;
        }
        faces.push(new_face);
    }

    let mut hard_edges: Vec<[usize; 2]> = Vec::new();
    if !mesh.shading.hard_edges.is_empty() {
        for (old, new) in mesh.faces.iter().zip(&faces) {
            for k in 0..3 {
                let j = (k + 1) % 3;
                if mesh.shading.is_hard_edge(old[k], old[j]) {
                    hard_edges.push(edge_key(new[k], new[j]));
                }
            }
        }
        hard_edges.sort_unstable();
        hard_edges.dedup();
    }

    let islands: Vec<UvIsland> = island_faces
        .into_iter()
        .enumerate()
        .map(|(i, faces)| {
            let min = packing.offsets[i];
            let max = [min[0] + sizes[i][0] * packing.scale, min[1] + sizes[i][1] * packing.scale];
            UvIsland {
                faces,
                min,
                max,
                margin: packing.margin,
            }
        })
        .collect();

    debug!(
        islands = islands.len(),
        vertices_before = mesh.vertex_count(),
        vertices_after = vertices.len(),
        scale = packing.scale,
        "unwrapped low mesh"
    );

    mesh.vertices = vertices;
    mesh.faces = faces;
    mesh.normals = Some(normals);
    mesh.uvs = Some(uvs);
    mesh.shading.hard_edges = hard_edges;

    Ok(UvLayout {
        islands,
        scale: packing.scale,
        margin: packing.margin,
        degradations,
    })
}

/// Pairs of islands whose margin-inflated boxes overlap
pub fn overlapping_islands(islands: &[UvIsland], tolerance: f32) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for i in 0..islands.len() {
        for j in i + 1..islands.len() {
            if islands[i].overlaps(&islands[j], tolerance) {
                pairs.push((i, j));
            }
        }
    }
    pairs
}
