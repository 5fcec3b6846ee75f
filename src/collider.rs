//! Collision Detection using GJK and EPA
//!
//! Convex-vs-convex overlap and penetration for the narrow phase.
//!
//! # Algorithms
//!
//! - **GJK (Gilbert-Johnson-Keerthi)**: Determines if two convex shapes intersect
//! - **EPA (Expanding Polytope Algorithm)**: Computes penetration depth, normal
//!   and a witness point on each shape

use crate::math::{tangent_frame, DVec3, Pose, EPSILON};

// ============================================================================
// Collider Shapes
// ============================================================================

/// Support function trait for GJK
pub trait Support {
    /// Farthest point of the shape along `direction` (need not be unit length)
    fn support(&self, direction: DVec3) -> DVec3;
}

/// Sphere collider
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sphere {
    /// Center
    pub center: DVec3,
    /// Radius
    pub radius: f64,
}

impl Sphere {
    /// Create a new sphere
    pub fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }
}

impl Support for Sphere {
    #[inline]
    fn support(&self, direction: DVec3) -> DVec3 {
        self.center + direction.normalize_or_zero() * self.radius
    }
}

/// Single triangle (one convex sub-piece of a concave polyhedron)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangle {
    /// Vertices
    pub v: [DVec3; 3],
}

impl Triangle {
    /// Create from three vertices
    pub fn new(a: DVec3, b: DVec3, c: DVec3) -> Self {
        Self { v: [a, b, c] }
    }

    /// Unnormalized face normal (counter-clockwise winding)
    #[inline]
    pub fn area_normal(&self) -> DVec3 {
        (self.v[1] - self.v[0]).cross(self.v[2] - self.v[0])
    }

    /// Closest point on the triangle to `p` (Ericson, RTCD 5.1.5)
    pub fn closest_point(&self, p: DVec3) -> DVec3 {
        let [a, b, c] = self.v;
        let ab = b - a;
        let ac = c - a;
        let ap = p - a;
        let d1 = ab.dot(ap);
        let d2 = ac.dot(ap);
        if d1 <= 0.0 && d2 <= 0.0 {
            return a;
        }
        let bp = p - b;
        let d3 = ab.dot(bp);
        let d4 = ac.dot(bp);
        if d3 >= 0.0 && d4 <= d3 {
            return b;
        }
        let vc = d1 * d4 - d3 * d2;
        if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
            let v = d1 / (d1 - d3);
            return a + ab * v;
        }
        let cp = p - c;
        let d5 = ab.dot(cp);
        let d6 = ac.dot(cp);
        if d6 >= 0.0 && d5 <= d6 {
            return c;
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
}

impl Support for Triangle {
    #[inline]
    fn support(&self, direction: DVec3) -> DVec3 {
        let mut best = self.v[0];
        let mut best_dot = best.dot(direction);
        for &p in &self.v[1..] {
            let d = p.dot(direction);
            if d > best_dot {
                best_dot = d;
                best = p;
            }
        }
        best
    }
}

/// Convex hull given by its vertex cloud
#[derive(Clone, Copy, Debug)]
pub struct PointCloud<'a> {
    /// Hull vertices
    pub vertices: &'a [DVec3],
}

impl<'a> PointCloud<'a> {
    /// Wrap a vertex slice
    pub fn new(vertices: &'a [DVec3]) -> Self {
        Self { vertices }
    }
}

impl Support for PointCloud<'_> {
    #[inline]
    fn support(&self, direction: DVec3) -> DVec3 {
        let mut best = DVec3::ZERO;
        let mut best_dot = f64::NEG_INFINITY;
        for &v in self.vertices {
            let d = v.dot(direction);
            if d > best_dot {
                best_dot = d;
                best = v;
            }
        }
        best
    }
}

/// Local-space shape carried into world space by a pose
#[derive(Clone, Copy, Debug)]
pub struct Transformed<'a, S: ?Sized> {
    shape: &'a S,
    pose: Pose,
}

impl<'a, S: ?Sized> Transformed<'a, S> {
    /// Wrap `shape` at `pose`
    pub fn new(shape: &'a S, pose: Pose) -> Self {
        Self { shape, pose }
    }
}

impl<S: Support + ?Sized> Support for Transformed<'_, S> {
    #[inline]
    fn support(&self, direction: DVec3) -> DVec3 {
        let local = self.pose.inverse_transform_vector(direction);
        self.pose.transform_point(self.shape.support(local))
    }
}

/// Shape swept by a sphere of radius `margin` (Minkowski sum)
#[derive(Clone, Copy, Debug)]
pub struct Inflated<S> {
    shape: S,
    margin: f64,
}

impl<S> Inflated<S> {
    /// Inflate `shape` by `margin`
    pub fn new(shape: S, margin: f64) -> Self {
        Self { shape, margin }
    }
}

impl<S: Support> Support for Inflated<S> {
    #[inline]
    fn support(&self, direction: DVec3) -> DVec3 {
        let base = self.shape.support(direction);
        if self.margin > 0.0 {
            base + direction.normalize_or_zero() * self.margin
        } else {
            base
        }
    }
}

// ============================================================================
// GJK Algorithm
// ============================================================================

/// Point of the Minkowski difference with its witnesses on A and B
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SupportPoint {
    /// `a - b`
    pub w: DVec3,
    /// Witness on A
    pub a: DVec3,
    /// Witness on B
    pub b: DVec3,
}

/// Minkowski difference support function
#[inline(always)]
fn minkowski_support<A: Support + ?Sized, B: Support + ?Sized>(
    a: &A,
    b: &B,
    direction: DVec3,
) -> SupportPoint {
    let pa = a.support(direction);
    let pb = b.support(-direction);
    SupportPoint {
        w: pa - pb,
        a: pa,
        b: pb,
    }
}

/// Simplex for GJK (up to 4 points in 3D, newest first)
#[derive(Clone, Debug)]
struct Simplex {
    points: [SupportPoint; 4],
    size: usize,
}

impl Simplex {
    fn new() -> Self {
        let zero = SupportPoint {
            w: DVec3::ZERO,
            a: DVec3::ZERO,
            b: DVec3::ZERO,
        };
        Self {
            points: [zero; 4],
            size: 0,
        }
    }

    fn push(&mut self, point: SupportPoint) {
        for i in (1..4).rev() {
            self.points[i] = self.points[i - 1];
        }
        self.points[0] = point;
        self.size = (self.size + 1).min(4);
    }

    fn set(&mut self, points: &[SupportPoint]) {
        for (i, &p) in points.iter().enumerate().take(4) {
            self.points[i] = p;
        }
        self.size = points.len().min(4);
    }

    fn as_slice(&self) -> &[SupportPoint] {
        &self.points[..self.size]
    }
}

/// GJK collision result
#[derive(Clone, Debug)]
pub struct GjkResult {
    /// Whether the two shapes are intersecting
    pub colliding: bool,
    /// Final simplex (seed for EPA when colliding)
    pub simplex: Vec<SupportPoint>,
}

/// GJK algorithm for collision detection
pub fn gjk<A: Support + ?Sized, B: Support + ?Sized>(a: &A, b: &B) -> GjkResult {
    const MAX_ITERATIONS: usize = 64;

    let mut direction = DVec3::X;
    let mut simplex = Simplex::new();
    simplex.push(minkowski_support(a, b, direction));
    direction = -simplex.points[0].w;

    for _ in 0..MAX_ITERATIONS {
        if direction.length_squared() < EPSILON * EPSILON {
            // Origin is on the simplex
            return GjkResult {
                colliding: true,
                simplex: simplex.as_slice().to_vec(),
            };
        }

        let new_point = minkowski_support(a, b, direction);

        // Passed the origin without reaching it
        if new_point.w.dot(direction) < 0.0 {
            return GjkResult {
                colliding: false,
                simplex: simplex.as_slice().to_vec(),
            };
        }

        simplex.push(new_point);

        if do_simplex(&mut simplex, &mut direction) {
            return GjkResult {
                colliding: true,
                simplex: simplex.as_slice().to_vec(),
            };
        }
    }

    GjkResult {
        colliding: false,
        simplex: simplex.as_slice().to_vec(),
    }
}

/// Boolean overlap test
#[inline]
pub fn intersects<A: Support + ?Sized, B: Support + ?Sized>(a: &A, b: &B) -> bool {
    gjk(a, b).colliding
}

fn do_simplex(simplex: &mut Simplex, direction: &mut DVec3) -> bool {
    match simplex.size {
        2 => do_simplex_line(simplex, direction),
        3 => do_simplex_triangle(simplex, direction),
        4 => do_simplex_tetrahedron(simplex, direction),
        _ => false,
    }
}

fn do_simplex_line(simplex: &mut Simplex, direction: &mut DVec3) -> bool {
    let a = simplex.points[0];
    let b = simplex.points[1];
    let ab = b.w - a.w;
    let ao = -a.w;

    if ab.dot(ao) > 0.0 {
        *direction = ab.cross(ao).cross(ab);
    } else {
        simplex.set(&[a]);
        *direction = ao;
    }
    false
}

fn do_simplex_triangle(simplex: &mut Simplex, direction: &mut DVec3) -> bool {
    let a = simplex.points[0];
    let b = simplex.points[1];
    let c = simplex.points[2];

    let ab = b.w - a.w;
    let ac = c.w - a.w;
    let ao = -a.w;
    let abc = ab.cross(ac);

    if abc.cross(ac).dot(ao) > 0.0 {
        if ac.dot(ao) > 0.0 {
            simplex.set(&[a, c]);
            *direction = ac.cross(ao).cross(ac);
        } else {
            simplex.set(&[a, b]);
            return do_simplex_line(simplex, direction);
        }
    } else if ab.cross(abc).dot(ao) > 0.0 {
        simplex.set(&[a, b]);
        return do_simplex_line(simplex, direction);
    } else if abc.dot(ao) > 0.0 {
        *direction = abc;
    } else {
        simplex.set(&[a, c, b]);
        *direction = -abc;
    }
    false
}

fn do_simplex_tetrahedron(simplex: &mut Simplex, direction: &mut DVec3) -> bool {
    let a = simplex.points[0];
    let b = simplex.points[1];
    let c = simplex.points[2];
    let d = simplex.points[3];

    let ab = b.w - a.w;
    let ac = c.w - a.w;
    let ad = d.w - a.w;
    let ao = -a.w;

    let abc = ab.cross(ac);
    let acd = ac.cross(ad);
    let adb = ad.cross(ab);

    if abc.dot(ao) > 0.0 {
        simplex.set(&[a, b, c]);
        return do_simplex_triangle(simplex, direction);
    }
    if acd.dot(ao) > 0.0 {
        simplex.set(&[a, c, d]);
        return do_simplex_triangle(simplex, direction);
    }
    if adb.dot(ao) > 0.0 {
        simplex.set(&[a, d, b]);
        return do_simplex_triangle(simplex, direction);
    }

    // Origin is inside the tetrahedron
    true
}

// ============================================================================
// EPA Algorithm (Expanding Polytope Algorithm)
// ============================================================================

/// Penetration information from EPA
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Contact {
    /// Penetration depth (>= 0)
    pub depth: f64,
    /// Contact normal (unit, pointing from A toward B)
    pub normal: DVec3,
    /// Deepest point of A inside B
    pub point_a: DVec3,
    /// Deepest point of B inside A
    pub point_b: DVec3,
}

#[derive(Clone, Copy, Debug)]
struct EpaFace {
    indices: [usize; 3],
    normal: DVec3,
    distance: f64,
}

/// Grow a touching simplex into a tetrahedron around the origin region
fn expand_simplex<A: Support + ?Sized, B: Support + ?Sized>(
    a: &A,
    b: &B,
    simplex: &mut Vec<SupportPoint>,
) -> bool {
    const AXES: [DVec3; 6] = [
        DVec3::X,
        DVec3::NEG_X,
        DVec3::Y,
        DVec3::NEG_Y,
        DVec3::Z,
        DVec3::NEG_Z,
    ];
    let tol = 1.0e-7;

    if simplex.is_empty() {
        simplex.push(minkowski_support(a, b, DVec3::X));
    }
    if simplex.len() == 1 {
        for d in AXES {
            let p = minkowski_support(a, b, d);
            if (p.w - simplex[0].w).length_squared() > tol * tol {
                simplex.push(p);
                break;
            }
        }
    }
    if simplex.len() == 2 {
        let axis = (simplex[1].w - simplex[0].w).normalize_or_zero();
        let (t1, t2) = tangent_frame(axis);
        for d in [t1, -t1, t2, -t2] {
            let p = minkowski_support(a, b, d);
            let off = p.w - simplex[0].w;
            if (off - axis * off.dot(axis)).length_squared() > tol * tol {
                simplex.push(p);
                break;
            }
        }
    }
    if simplex.len() == 3 {
        let n = (simplex[1].w - simplex[0].w)
            .cross(simplex[2].w - simplex[0].w)
            .normalize_or_zero();
        if n == DVec3::ZERO {
            return false;
        }
        for d in [n, -n] {
            let p = minkowski_support(a, b, d);
            if (p.w - simplex[0].w).dot(n).abs() > tol {
                simplex.push(p);
                break;
            }
        }
    }
    simplex.len() == 4
}

/// Drop simplex points that add no dimension (duplicates, collinear, coplanar)
fn independent_points(simplex: &[SupportPoint]) -> Vec<SupportPoint> {
    let tol = 1.0e-7;
    let mut out: Vec<SupportPoint> = Vec::with_capacity(4);
    for &p in simplex {
        let keep = match out.len() {
            0 => true,
            1 => (p.w - out[0].w).length_squared() > tol * tol,
            2 => {
                let axis = (out[1].w - out[0].w).normalize_or_zero();
                let off = p.w - out[0].w;
                (off - axis * off.dot(axis)).length_squared() > tol * tol
            }
            3 => {
                let n = (out[1].w - out[0].w)
                    .cross(out[2].w - out[0].w)
                    .normalize_or_zero();
                (p.w - out[0].w).dot(n).abs() > tol
            }
            _ => false,
        };
        if keep {
            out.push(p);
        }
    }
    out
}

fn add_face(faces: &mut Vec<EpaFace>, vertices: &[SupportPoint], interior: DVec3, i: usize, j: usize, k: usize) {
    let a = vertices[i].w;
    let raw = (vertices[j].w - a).cross(vertices[k].w - a);
    let len = raw.length();
    if len < EPSILON {
        faces.push(EpaFace {
            indices: [i, j, k],
            normal: DVec3::ZERO,
            distance: f64::INFINITY,
        });
        return;
    }
    let mut normal = raw / len;
    let mut indices = [i, j, k];
    // Keep winding consistent with an outward normal
    if normal.dot(a - interior) < 0.0 {
        normal = -normal;
        indices = [i, k, j];
    }
    faces.push(EpaFace {
        indices,
        normal,
        distance: normal.dot(a),
    });
}

fn face_contact(face: &EpaFace, vertices: &[SupportPoint]) -> Contact {
    let [i, j, k] = face.indices;
    let (p0, p1, p2) = (vertices[i], vertices[j], vertices[k]);
    let projected = face.normal * face.distance;
    let bary = barycentric(projected, p0.w, p1.w, p2.w);
    let (point_a, point_b) = match bary {
        Some((u, v, w)) => (p0.a * u + p1.a * v + p2.a * w, p0.b * u + p1.b * v + p2.b * w),
        None => (p0.a, p0.b),
    };
    Contact {
        depth: face.distance.max(0.0),
        normal: face.normal,
        point_a,
        point_b,
    }
}

fn barycentric(p: DVec3, a: DVec3, b: DVec3, c: DVec3) -> Option<(f64, f64, f64)> {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < EPSILON * EPSILON {
        return None;
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    Some((1.0 - v - w, v, w))
}

/// EPA algorithm for penetration depth
///
/// Call this after GJK reports a collision, passing its final simplex.
pub fn epa<A: Support + ?Sized, B: Support + ?Sized>(
    a: &A,
    b: &B,
    initial_simplex: &[SupportPoint],
) -> Option<Contact> {
    const MAX_ITERATIONS: usize = 64;
    const TOLERANCE: f64 = 1.0e-7;

    let mut vertices = independent_points(initial_simplex);
    if vertices.len() < 4 && !expand_simplex(a, b, &mut vertices) {
        return None;
    }

    let interior = (vertices[0].w + vertices[1].w + vertices[2].w + vertices[3].w) * 0.25;
    let mut faces: Vec<EpaFace> = Vec::with_capacity(64);
    add_face(&mut faces, &vertices, interior, 0, 1, 2);
    add_face(&mut faces, &vertices, interior, 0, 3, 1);
    add_face(&mut faces, &vertices, interior, 0, 2, 3);
    add_face(&mut faces, &vertices, interior, 1, 3, 2);

    let mut best: Option<EpaFace> = None;
    for _ in 0..MAX_ITERATIONS {
        let closest = faces
            .iter()
            .filter(|f| f.distance.is_finite())
            .min_by(|x, y| x.distance.total_cmp(&y.distance))
            .copied()?;
        best = Some(closest);

        let support = minkowski_support(a, b, closest.normal);
        let distance = support.w.dot(closest.normal);

        if distance - closest.distance < TOLERANCE {
            return Some(face_contact(&closest, &vertices));
        }

        let new_idx = vertices.len();
        vertices.push(support);

        // Remove faces visible from the new vertex, keep the horizon
        let mut edges: Vec<(usize, usize)> = Vec::new();
        faces.retain(|face| {
            if face.normal.dot(support.w - vertices[face.indices[0]].w) > 0.0 {
                for i in 0..3 {
                    let edge = (face.indices[i], face.indices[(i + 1) % 3]);
                    if let Some(pos) = edges.iter().position(|&e| e == (edge.1, edge.0)) {
                        edges.swap_remove(pos);
                    } else {
                        edges.push(edge);
                    }
                }
                false
            } else {
                true
            }
        });

        for (i, j) in edges {
            add_face(&mut faces, &vertices, interior, i, j, new_idx);
        }
    }

    // Iteration budget exhausted: best face seen is close enough
    best.map(|f| face_contact(&f, &vertices))
}

/// GJK + EPA in one call
pub fn penetration<A: Support + ?Sized, B: Support + ?Sized>(a: &A, b: &B) -> Option<Contact> {
    let result = gjk(a, b);
    if !result.colliding {
        return None;
    }
    epa(a, b, &result.simplex)
}
