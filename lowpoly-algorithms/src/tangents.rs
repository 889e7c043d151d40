//! Per-vertex tangent frames for tangent-space normal maps
//!
//! Tangents follow the glTF convention: `xyz` points toward increasing `u`,
//! `w` holds the handedness and the bitangent `cross(n, t) * w` points
//! toward the top of the image (decreasing `v`).

use lowpoly_core::{Error, Result, TriangleMesh, Vector3f};

/// Compute one tangent per vertex, `[x, y, z, handedness]`.
///
/// Requires UVs and normals on the mesh. Vertices whose UV gradient is
/// degenerate get a tangent perpendicular to their normal.
pub fn compute_tangents(mesh: &TriangleMesh) -> Result<Vec<[f32; 4]>> {
    let uvs = mesh
        .uvs
        .as_ref()
        .ok_or_else(|| Error::InvalidData("UV coordinates required for tangent computation".to_string()))?;
    let normals = mesh
        .normals
        .as_ref()
        .ok_or_else(|| Error::InvalidData("normals required for tangent computation".to_string()))?;

    let vertex_count = mesh.vertex_count();
    let mut tan_u = vec![Vector3f::zeros(); vertex_count];
    let mut tan_v = vec![Vector3f::zeros(); vertex_count];

    for face in &mesh.faces {
        let [i0, i1, i2] = *face;
        let e1 = mesh.vertices[i1] - mesh.vertices[i0];
        let e2 = mesh.vertices[i2] - mesh.vertices[i0];

        // Image-up is decreasing v
        let s1 = uvs[i1][0] - uvs[i0][0];
        let s2 = uvs[i2][0] - uvs[i0][0];
        let t1 = uvs[i0][1] - uvs[i1][1];
        let t2 = uvs[i0][1] - uvs[i2][1];

        let det = s1 * t2 - s2 * t1;
        if det.abs() < 1e-12 {
            continue;
        }
        let r = 1.0 / det;
        let sdir = (e1 * t2 - e2 * t1) * r;
        let tdir = (e2 * s1 - e1 * s2) * r;

        for i in [i0, i1, i2] {
            tan_u[i] += sdir;
            tan_v[i] += tdir;
        }
    }

    let tangents = (0..vertex_count)
        .map(|i| {
            let n = normals[i].try_normalize(f32::EPSILON).unwrap_or_else(Vector3f::z);
            let t = tan_u[i] - n * n.dot(&tan_u[i]);
            let t = t.try_normalize(1e-12).unwrap_or_else(|| any_perpendicular(&n));
            let w = if n.cross(&t).dot(&tan_v[i]) < 0.0 { -1.0 } else { 1.0 };
            [t.x, t.y, t.z, w]
        })
        .collect();
    Ok(tangents)
}

fn any_perpendicular(n: &Vector3f) -> Vector3f {
    let helper = if n.x.abs() < 0.9 { Vector3f::x() } else { Vector3f::y() };
    (helper - n * n.dot(&helper)).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lowpoly_core::Point3f;

    fn make_quad(uvs: Vec<[f32; 2]>) -> TriangleMesh {
        let mut mesh = TriangleMesh::from_vertices_and_faces(
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(1.0, 1.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        );
        mesh.update_vertex_normals();
        mesh.set_uvs(uvs);
        mesh
    }

    #[test]
    fn test_tangent_follows_u_and_bitangent_image_up() {
        // v grows downward, so world +y maps to image up
        let mesh = make_quad(vec![[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]]);
        let tangents = compute_tangents(&mesh).unwrap();
        for t in tangents {
            assert_relative_eq!(t[0], 1.0, epsilon = 1e-5);
            assert_relative_eq!(t[1], 0.0, epsilon = 1e-5);
            assert_eq!(t[3], 1.0);
        }
    }

    #[test]
    fn test_mirrored_uvs_flip_handedness() {
        let mesh = make_quad(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]);
        let tangents = compute_tangents(&mesh).unwrap();
        assert!(tangents.iter().all(|t| t[3] == -1.0));
    }

    #[test]
    fn test_missing_uvs_is_an_error() {
        let mut mesh = make_quad(vec![[0.0, 0.0]; 4]);
        mesh.uvs = None;
        assert!(compute_tangents(&mesh).is_err());
    }

    #[test]
    fn test_degenerate_uvs_still_give_unit_tangents() {
        let mesh = make_quad(vec![[0.5, 0.5]; 4]);
        for t in compute_tangents(&mesh).unwrap() {
            let v = Vector3f::new(t[0], t[1], t[2]);
            assert_relative_eq!(v.norm(), 1.0, epsilon = 1e-5);
            assert_relative_eq!(v.z, 0.0, epsilon = 1e-5);
        }
    }
}
