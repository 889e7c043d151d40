//! Shrinkwrap the simplified mesh back onto the reference surface

use crate::spatial::Bvh;
use lowpoly_core::{Error, Result, StageOutcome, TriangleMesh, Vector3f};
use rayon::prelude::*;
use tracing::debug;

/// Statistics of a conform pass
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConformReport {
    pub moved: usize,
    pub max_displacement: f32,
}

/// Move every vertex of `low` along its normal toward the closest point of
/// `high`, never by more than `offset` in either direction.
///
/// A non-positive (or NaN) offset skips the pass and leaves `low` untouched.
pub fn conform_to_surface(low: &mut TriangleMesh, high: &TriangleMesh, offset: f32) -> Result<StageOutcome> {
    if !(offset > 0.0) {
        return Ok(StageOutcome::Skipped(format!("shrinkwrap offset {} disables conforming", offset)));
    }
    if high.face_count() == 0 {
        return Err(Error::EmptyGeometry("reference mesh has no faces to conform to".to_string()));
    }
    let report = conform_with_bvh(low, &Bvh::build(high), offset);
    debug!(
        moved = report.moved,
        max_displacement = report.max_displacement,
        "conformed low mesh"
    );
    Ok(StageOutcome::Completed)
}

/// Conform against a prebuilt hierarchy
pub fn conform_with_bvh(low: &mut TriangleMesh, bvh: &Bvh, offset: f32) -> ConformReport {
    let normals = low.normals.clone().unwrap_or_else(|| low.compute_vertex_normals());

    let displacements: Vec<Vector3f> = low
        .vertices
        .par_iter()
        .zip(normals.par_iter())
        .map(|(p, n)| {
            let n = match n.try_normalize(f32::EPSILON) {
                Some(n) => n,
                None => return Vector3f::zeros(),
            };
            match bvh.closest_point(p) {
                Some(closest) => {
                    let along = (closest.point - p).dot(&n).clamp(-offset, offset);
                    n * along
                }
                None => Vector3f::zeros(),
            }
        })
        .collect();

    let mut report = ConformReport::default();
    for (p, d) in low.vertices.iter_mut().zip(&displacements) {
        let len = d.norm();
        if len > 0.0 {
            *p += d;
            report.moved += 1;
            report.max_displacement = report.max_displacement.max(len);
        }
    }
    if report.moved > 0 {
        low.update_vertex_normals();
    }
    report
}
