//! Convex Hull Builder
//!
//! Incremental convex hull construction from a point cloud.
//!
//! # Algorithm
//!
//! 1. Find an initial tetrahedron from 4 non-coplanar points
//! 2. For each remaining point, test against all faces
//! 3. If the point is outside any face, remove visible faces and patch the
//!    horizon with new faces fanned to the point
//!
//! The result keeps only vertices referenced by hull faces and a consistent
//! counter-clockwise (outward) triangle winding, which the raycaster and mass
//! computation rely on.

use crate::error::PhysicsError;
use crate::math::{is_finite, Aabb, DVec3};

/// Triangulated convex hull
#[derive(Clone, Debug, PartialEq)]
pub struct HullMesh {
    /// Hull vertices (only those referenced by faces)
    pub vertices: Vec<DVec3>,
    /// Outward-wound triangles indexing `vertices`
    pub triangles: Vec<[u32; 3]>,
}

/// Face of the hull under construction (unit outward normal)
#[derive(Clone, Copy, Debug)]
struct HullFace {
    indices: [usize; 3],
    normal: DVec3,
}

/// Compute the centroid (average) of a set of points
///
/// Returns the zero vector if the input slice is empty.
#[must_use]
pub fn compute_centroid(points: &[DVec3]) -> DVec3 {
    if points.is_empty() {
        return DVec3::ZERO;
    }
    points.iter().copied().sum::<DVec3>() / points.len() as f64
}

/// Build a convex hull from a set of points
///
/// Fails with [`PhysicsError::DegenerateShape`] when fewer than 4
/// non-coplanar finite points are given.
pub fn build_convex_hull(points: &[DVec3]) -> Result<HullMesh, PhysicsError> {
    if points.len() < 4 {
        return Err(PhysicsError::DegenerateShape {
            reason: "convex hull needs at least 4 points",
        });
    }
    if !points.iter().all(|p| is_finite(*p)) {
        return Err(PhysicsError::DegenerateShape {
            reason: "non-finite vertex",
        });
    }

    let scale = Aabb::from_points(points).extents().max_element().max(1.0e-6);
    let eps = scale * 1.0e-9;

    let (tet, remaining) = find_initial_tetrahedron(points, eps)?;

    let mut verts: Vec<DVec3> = Vec::with_capacity(points.len());
    verts.extend_from_slice(&tet);
    let interior = compute_centroid(&verts);

    let mut faces: Vec<HullFace> = Vec::with_capacity(64);
    for fi in [[0, 1, 2], [0, 3, 1], [0, 2, 3], [1, 3, 2]] {
        if let Some(face) = oriented_face(&verts, interior, fi) {
            faces.push(face);
        }
    }

    for &point in &remaining {
        insert_point(&mut verts, &mut faces, interior, point, eps);
    }

    // Re-index onto the vertices the faces actually use
    let mut remap = vec![u32::MAX; verts.len()];
    let mut out_verts = Vec::new();
    let mut triangles = Vec::with_capacity(faces.len());
    for face in &faces {
        let mut tri = [0u32; 3];
        for (k, &idx) in face.indices.iter().enumerate() {
            if remap[idx] == u32::MAX {
                remap[idx] = out_verts.len() as u32;
                out_verts.push(verts[idx]);
            }
            tri[k] = remap[idx];
        }
        triangles.push(tri);
    }

    Ok(HullMesh {
        vertices: out_verts,
        triangles,
    })
}

fn oriented_face(verts: &[DVec3], interior: DVec3, fi: [usize; 3]) -> Option<HullFace> {
    let a = verts[fi[0]];
    let normal = (verts[fi[1]] - a).cross(verts[fi[2]] - a);
    let normal = normal.try_normalize()?;
    // Orient normal (and winding) away from the interior point
    if normal.dot(interior - a) > 0.0 {
        Some(HullFace {
            indices: [fi[0], fi[2], fi[1]],
            normal: -normal,
        })
    } else {
        Some(HullFace {
            indices: fi,
            normal,
        })
    }
}

/// Find 4 non-coplanar points to form an initial tetrahedron
///
/// Returns `(tetrahedron_points, remaining_points)`.
fn find_initial_tetrahedron(
    points: &[DVec3],
    eps: f64,
) -> Result<([DVec3; 4], Vec<DVec3>), PhysicsError> {
    let n = points.len();

    // Extreme pair along the widest axis is a good approximate diameter
    let mut i0 = 0usize;
    let mut i1 = 0usize;
    let mut best = 0.0;
    for axis in 0..3 {
        let (mut lo, mut hi) = (0usize, 0usize);
        for (i, p) in points.iter().enumerate() {
            if p[axis] < points[lo][axis] {
                lo = i;
            }
            if p[axis] > points[hi][axis] {
                hi = i;
            }
        }
        let d = (points[hi] - points[lo]).length_squared();
        if d > best {
            best = d;
            i0 = lo;
            i1 = hi;
        }
    }
    if best.sqrt() <= eps {
        return Err(PhysicsError::DegenerateShape {
            reason: "all points coincide",
        });
    }

    // Point furthest from the line (i0, i1)
    let line_dir = (points[i1] - points[i0]).normalize();
    let mut i2 = 0usize;
    let mut max_line_dist = 0.0;
    for (i, p) in points.iter().enumerate() {
        let d = line_dir.cross(*p - points[i0]).length();
        if d > max_line_dist {
            max_line_dist = d;
            i2 = i;
        }
    }
    if max_line_dist <= eps {
        return Err(PhysicsError::DegenerateShape {
            reason: "all points are collinear",
        });
    }

    // Point furthest from the plane (i0, i1, i2)
    let tri_normal = (points[i1] - points[i0])
        .cross(points[i2] - points[i0])
        .normalize();
    let mut i3 = 0usize;
    let mut max_plane_dist = 0.0;
    for (i, p) in points.iter().enumerate() {
        let d = (*p - points[i0]).dot(tri_normal).abs();
        if d > max_plane_dist {
            max_plane_dist = d;
            i3 = i;
        }
    }
    if max_plane_dist <= eps {
        return Err(PhysicsError::DegenerateShape {
            reason: "all points are coplanar",
        });
    }

    let tet = [points[i0], points[i1], points[i2], points[i3]];
    let remaining = (0..n)
        .filter(|&i| i != i0 && i != i1 && i != i2 && i != i3)
        .map(|i| points[i])
        .collect();
    Ok((tet, remaining))
}

/// Insert a point into the convex hull, expanding it if necessary
fn insert_point(
    verts: &mut Vec<DVec3>,
    faces: &mut Vec<HullFace>,
    interior: DVec3,
    point: DVec3,
    eps: f64,
) {
    let visible: Vec<usize> = faces
        .iter()
        .enumerate()
        .filter(|(_, f)| f.normal.dot(point - verts[f.indices[0]]) > eps)
        .map(|(i, _)| i)
        .collect();

    if visible.is_empty() {
        // Inside (or on) the hull
        return;
    }

    // Horizon: edges of visible faces whose twin is not visible
    let mut horizon: Vec<(usize, usize)> = Vec::new();
    for &fi in &visible {
        let face = faces[fi];
        for k in 0..3 {
            let e0 = face.indices[k];
            let e1 = face.indices[(k + 1) % 3];
            let twin_visible = visible.iter().any(|&other| {
                other != fi && {
                    let o = faces[other].indices;
                    (0..3).any(|m| o[m] == e1 && o[(m + 1) % 3] == e0)
                }
            });
            if !twin_visible {
                horizon.push((e0, e1));
            }
        }
    }

    let mut sorted = visible;
    sorted.sort_unstable();
    for &fi in sorted.iter().rev() {
        faces.swap_remove(fi);
    }

    let new_idx = verts.len();
    verts.push(point);
    for (e0, e1) in horizon {
        if let Some(face) = oriented_face(verts, interior, [e0, e1, new_idx]) {
            faces.push(face);
        }
    }
}
