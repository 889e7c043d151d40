//! Voxel remeshing
//!
//! Samples a signed distance field of the input mesh on a regular grid and
//! extracts a new surface with surface nets: one vertex per cell crossed by
//! the surface, one quad per grid edge with a sign change. The result is a
//! welded, evenly tessellated mesh that no longer depends on the input's
//! triangulation.

use lowpoly_algorithms::{face_components, Bvh, EdgeFaces, Ray};
use lowpoly_core::{
    Bounded, Degradation, DegradationKind, Error, Point3f, Result, StageOutcome, TriangleMesh, Vector3f,
};
use ndarray::Array3;
use rayon::prelude::*;
use tracing::{debug, info, warn};

/// Default cap on grid samples per axis
pub const DEFAULT_MAX_REMESH_CELLS: usize = 512;

/// Empty voxels kept around the mesh bounds on every side
const PADDING_VOXELS: usize = 2;

/// Smallest grid that still leaves room for padding
const MIN_GRID_CELLS: usize = 2 * PADDING_VOXELS + 4;

/// Sub-voxel offsets applied to parity rays so they avoid mesh edges that
/// line up with the grid
const RAY_JITTER: [f32; 2] = [1.37e-3, 2.11e-3];

/// Voxel remesh parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemeshConfig {
    /// Edge length of one voxel; non-positive disables remeshing
    pub voxel_size: f32,
    /// Keep only the largest connected piece of the result
    pub remove_disconnected: bool,
    /// Maximum number of grid samples along any axis
    pub max_cells: usize,
}

impl Default for RemeshConfig {
    fn default() -> Self {
        Self {
            voxel_size: 0.0,
            remove_disconnected: false,
            max_cells: DEFAULT_MAX_REMESH_CELLS,
        }
    }
}

impl RemeshConfig {
    pub fn new(voxel_size: f32) -> Self {
        Self {
            voxel_size,
            ..Self::default()
        }
    }

    pub fn with_remove_disconnected(mut self, remove: bool) -> Self {
        self.remove_disconnected = remove;
        self
    }

    pub fn with_max_cells(mut self, max_cells: usize) -> Self {
        self.max_cells = max_cells;
        self
    }
}

/// Scalar field sampled on a regular grid
#[derive(Debug, Clone)]
pub struct VolumetricGrid {
    /// Samples indexed `[x, y, z]`
    pub values: Array3<f32>,
    /// Distance between neighbouring samples
    pub voxel_size: f32,
    /// World position of sample `[0, 0, 0]`
    pub origin: Point3f,
}

impl VolumetricGrid {
    /// Create a grid filled with zeros
    pub fn new(dimensions: [usize; 3], voxel_size: f32, origin: Point3f) -> Self {
        Self {
            values: Array3::zeros((dimensions[0], dimensions[1], dimensions[2])),
            voxel_size,
            origin,
        }
    }

    pub fn dimensions(&self) -> [usize; 3] {
        let (x, y, z) = self.values.dim();
        [x, y, z]
    }

    /// Get scalar value at grid coordinates (with bounds checking)
    pub fn get_value(&self, x: usize, y: usize, z: usize) -> Option<f32> {
        self.values.get((x, y, z)).copied()
    }

    /// Convert grid coordinates to world coordinates
    pub fn grid_to_world(&self, x: usize, y: usize, z: usize) -> Point3f {
        self.origin + Vector3f::new(x as f32, y as f32, z as f32) * self.voxel_size
    }

    /// Signed distance to a closed mesh: negative inside, positive outside.
    ///
    /// Magnitudes come from closest point queries, signs from the parity of
    /// surface crossings along one ray per grid row in `+x`.
    pub fn signed_distance(mesh: &TriangleMesh, dimensions: [usize; 3], voxel_size: f32, origin: Point3f) -> Self {
        let bvh = Bvh::build(mesh);
        let [nx, ny, nz] = dimensions;
        let reach = (nx + 2) as f32 * voxel_size;
        let dedup = voxel_size * 1e-4;

        let rows: Vec<Vec<f32>> = (0..ny * nz)
            .into_par_iter()
            .map(|row| {
                let (y, z) = (row % ny, row / ny);
                let base = origin + Vector3f::new(0.0, y as f32, z as f32) * voxel_size;

                let ray_origin = Point3f::new(
                    base.x - voxel_size,
                    base.y + RAY_JITTER[0] * voxel_size,
                    base.z + RAY_JITTER[1] * voxel_size,
                );
                let mut crossings: Vec<f32> = Vec::new();
                for hit in bvh.intersect_all(&Ray::new(ray_origin, Vector3f::x()), reach) {
                    let x = ray_origin.x + hit.t;
                    if crossings.last().map_or(true, |&last| x - last > dedup) {
                        crossings.push(x);
                    }
                }

                (0..nx)
                    .map(|x| {
                        let p = Point3f::new(base.x + x as f32 * voxel_size, base.y, base.z);
                        let distance = bvh
                            .closest_point(&p)
                            .map_or(f32::INFINITY, |c| c.distance_squared.sqrt());
                        let passed = crossings.iter().take_while(|&&c| c < p.x).count();
                        if passed % 2 == 1 {
                            -distance
                        } else {
                            distance
                        }
                    })
                    .collect()
            })
            .collect();

        let mut grid = VolumetricGrid::new(dimensions, voxel_size, origin);
        for (row, samples) in rows.into_iter().enumerate() {
            let (y, z) = (row % ny, row / ny);
            for (x, value) in samples.into_iter().enumerate() {
                grid.values[(x, y, z)] = value;
            }
        }
        grid
    }
}

#[inline]
fn inside(value: f32) -> bool {
    value < 0.0
}

/// Extract the zero level set of a grid with surface nets.
///
/// Faces wind counter-clockwise seen from the positive side of the field.
pub fn surface_nets(grid: &VolumetricGrid) -> TriangleMesh {
    let [nx, ny, nz] = grid.dimensions();
    let mut mesh = TriangleMesh::new();
    if nx < 2 || ny < 2 || nz < 2 {
        return mesh;
    }

    const CORNERS: [[usize; 3]; 8] = [
        [0, 0, 0], [1, 0, 0], [0, 1, 0], [1, 1, 0],
        [0, 0, 1], [1, 0, 1], [0, 1, 1], [1, 1, 1],
    ];
    const EDGES: [[usize; 2]; 12] = [
        [0, 1], [2, 3], [4, 5], [6, 7],
        [0, 2], [1, 3], [4, 6], [5, 7],
        [0, 4], [1, 5], [2, 6], [3, 7],
    ];

    // One vertex per cell with a sign change
    let mut cell_vertex = Array3::from_elem((nx - 1, ny - 1, nz - 1), usize::MAX);
    for x in 0..nx - 1 {
        for y in 0..ny - 1 {
            for z in 0..nz - 1 {
                let values = CORNERS.map(|c| grid.values[(x + c[0], y + c[1], z + c[2])]);
                let inside_count = values.iter().filter(|v| inside(**v)).count();
                if inside_count == 0 || inside_count == 8 {
                    continue;
                }
                let mut sum = Vector3f::zeros();
                let mut crossings = 0;
                for [a, b] in EDGES {
                    if inside(values[a]) == inside(values[b]) {
                        continue;
                    }
                    let denom = values[a] - values[b];
                    let t = if denom.abs() > f32::EPSILON { (values[a] / denom).clamp(0.0, 1.0) } else { 0.5 };
                    let pa = Vector3f::new(CORNERS[a][0] as f32, CORNERS[a][1] as f32, CORNERS[a][2] as f32);
                    let pb = Vector3f::new(CORNERS[b][0] as f32, CORNERS[b][1] as f32, CORNERS[b][2] as f32);
                    sum += pa + (pb - pa) * t;
                    crossings += 1;
                }
                let local = sum / crossings as f32;
                let position = grid.grid_to_world(x, y, z) + local * grid.voxel_size;
                cell_vertex[(x, y, z)] = mesh.add_vertex(position);
            }
        }
    }

    let mut emit = |quad: [usize; 4], flip: bool| {
        if quad.contains(&usize::MAX) {
            return;
        }
        let [a, b, c, d] = if flip { [quad[0], quad[3], quad[2], quad[1]] } else { quad };
        mesh.faces.push([a, b, c]);
        mesh.faces.push([a, c, d]);
    };

    for x in 0..nx {
        for y in 0..ny {
            for z in 0..nz {
                let here = inside(grid.values[(x, y, z)]);
                // Edge along +x
                if x + 1 < nx && y >= 1 && z >= 1 && y < ny - 1 && z < nz - 1 {
                    if here != inside(grid.values[(x + 1, y, z)]) {
                        let quad = [
                            cell_vertex[(x, y - 1, z - 1)],
                            cell_vertex[(x, y, z - 1)],
                            cell_vertex[(x, y, z)],
                            cell_vertex[(x, y - 1, z)],
                        ];
                        emit(quad, !here);
                    }
                }
                // Edge along +y
                if y + 1 < ny && x >= 1 && z >= 1 && x < nx - 1 && z < nz - 1 {
                    if here != inside(grid.values[(x, y + 1, z)]) {
                        let quad = [
                            cell_vertex[(x - 1, y, z - 1)],
                            cell_vertex[(x - 1, y, z)],
                            cell_vertex[(x, y, z)],
                            cell_vertex[(x, y, z - 1)],
                        ];
                        emit(quad, !here);
                    }
                }
                // Edge along +z
                if z + 1 < nz && x >= 1 && y >= 1 && x < nx - 1 && y < ny - 1 {
                    if here != inside(grid.values[(x, y, z + 1)]) {
                        let quad = [
                            cell_vertex[(x - 1, y - 1, z)],
                            cell_vertex[(x, y - 1, z)],
                            cell_vertex[(x, y, z)],
                            cell_vertex[(x - 1, y, z)],
                        ];
                        emit(quad, !here);
                    }
                }
            }
        }
    }

    mesh.update_vertex_normals();
    mesh
}

/// Keep only the connected piece with the most faces
pub fn keep_largest_component(mesh: &mut TriangleMesh) -> usize {
    let adjacency = EdgeFaces::build(mesh);
    let mut components = face_components(mesh, &adjacency);
    if components.len() <= 1 {
        return 0;
    }
    let largest = components
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.len().cmp(&b.1.len()).then(b.0.cmp(&a.0)))
        .map_or(0, |(i, _)| i);
    let keep = components.swap_remove(largest);
    let removed = components.len();
    mesh.faces = keep.into_iter().map(|f| mesh.faces[f]).collect();
    mesh.remove_unreferenced_vertices();
    removed
}

/// Grid layout for a voxel size, coarsened to the cell cap if needed.
/// Returns `(dimensions, voxel_size, origin)`.
fn plan_grid(min: Point3f, max: Point3f, voxel_size: f32, max_cells: usize) -> ([usize; 3], f32, Point3f) {
    let extent = max - min;
    let largest = extent.x.max(extent.y).max(extent.z);
    let pad = 2 * PADDING_VOXELS + 1;

    let samples = |v: f32| (largest / v).ceil() as usize + pad;
    let voxel = if samples(voxel_size) > max_cells {
        largest / (max_cells - pad - 1) as f32
    } else {
        voxel_size
    };

    let dims = [extent.x, extent.y, extent.z].map(|e| (e / voxel).ceil() as usize + pad);
    let origin = min - Vector3f::repeat(PADDING_VOXELS as f32 * voxel);
    (dims, voxel, origin)
}

/// Re-tessellate `mesh` on a voxel grid.
///
/// A non-positive voxel size skips the stage. When the requested voxel
/// would need more than `max_cells` samples per axis, a coarser voxel is
/// used and the outcome is degraded.
pub fn voxel_remesh(mesh: &TriangleMesh, config: &RemeshConfig) -> Result<(TriangleMesh, StageOutcome)> {
    if !(config.voxel_size > 0.0) || !config.voxel_size.is_finite() {
        return Ok((
            mesh.clone(),
            StageOutcome::Skipped(format!("voxel size {} disables remeshing", config.voxel_size)),
        ));
    }
    if mesh.face_count() == 0 {
        return Err(Error::EmptyGeometry("cannot remesh a mesh without faces".to_string()));
    }
    if config.max_cells < MIN_GRID_CELLS {
        return Err(Error::InvalidData(format!(
            "max remesh cells must be at least {}, got {}",
            MIN_GRID_CELLS, config.max_cells
        )));
    }

    let (min, max) = mesh.bounding_box();
    let (dims, voxel, origin) = plan_grid(min, max, config.voxel_size, config.max_cells);
    let mut degradations = Vec::new();
    if voxel > config.voxel_size {
        warn!(
            requested = config.voxel_size,
            used = voxel,
            max_cells = config.max_cells,
            "voxel size coarsened to respect the grid cap"
        );
        degradations.push(Degradation::new(
            DegradationKind::RemeshClamped,
            format!(
                "voxel size {} exceeds {} cells per axis, used {}",
                config.voxel_size, config.max_cells, voxel
            ),
        ));
    }
    debug!(?dims, voxel, "sampling signed distance field");

    let grid = VolumetricGrid::signed_distance(mesh, dims, voxel, origin);
    let mut remeshed = surface_nets(&grid);
    if remeshed.face_count() == 0 {
        return Err(Error::EmptyGeometry(format!(
            "voxel remesh at size {} produced no surface",
            voxel
        )));
    }

    if config.remove_disconnected {
        let removed = keep_largest_component(&mut remeshed);
        if removed > 0 {
            debug!(removed, "discarded disconnected pieces");
        }
        remeshed.update_vertex_normals();
    }

    info!(
        before = mesh.face_count(),
        after = remeshed.face_count(),
        voxel,
        "voxel remesh done"
    );
    Ok((remeshed, StageOutcome::from_degradations(degradations)))
}
