//! Narrow Phase
//!
//! Exact contact generation between two posed shapes. Each shape is split
//! into parts (ball, convex piece, mesh triangle) and every overlapping part
//! pair yields at most one [`ContactPoint`]:
//!
//! | A \ B  | Ball         | Convex   | Mesh triangle    |
//! |--------|--------------|----------|------------------|
//! | Ball   | closed form  | GJK/EPA  | closest point    |
//! | Convex | GJK/EPA      | GJK/EPA  | GJK/EPA          |
//! | Mesh   | closest point| GJK/EPA  | GJK/EPA          |
//!
//! Shapes are inflated by their body margin. An extra `skin` lets resting
//! contacts be reported slightly before they touch (negative depth) so the
//! contact set does not flicker between steps.

use crate::collider::{penetration, Inflated, Sphere, Support, Transformed, Triangle};
use crate::math::{Aabb, DVec3, Pose, EPSILON};
use crate::shape::{ConvexPiece, Shape, TriMesh};

/// One contact between bodies A and B (world space)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContactPoint {
    /// Deepest point of A's surface
    pub point_a: DVec3,
    /// Deepest point of B's surface
    pub point_b: DVec3,
    /// Unit normal pointing from A toward B
    pub normal: DVec3,
    /// Penetration depth along `normal` (negative inside the skin)
    pub depth: f64,
}

impl ContactPoint {
    /// Same contact seen from B
    #[inline]
    #[must_use]
    pub fn flipped(self) -> Self {
        Self {
            point_a: self.point_b,
            point_b: self.point_a,
            normal: -self.normal,
            depth: self.depth,
        }
    }

    /// Midpoint of the two witnesses
    #[inline]
    pub fn midpoint(&self) -> DVec3 {
        (self.point_a + self.point_b) * 0.5
    }
}

/// A shape placed in the world
#[derive(Clone, Copy, Debug)]
pub struct PosedShape<'a> {
    /// Geometry (object space)
    pub shape: &'a Shape,
    /// Object -> world
    pub pose: Pose,
    /// Collision margin around the geometry
    pub margin: f64,
}

impl<'a> PosedShape<'a> {
    /// Place `shape` at `pose`
    pub fn new(shape: &'a Shape, pose: Pose, margin: f64) -> Self {
        Self {
            shape,
            pose,
            margin,
        }
    }

    fn parts(&self) -> Vec<Part<'a>> {
        match self.shape {
            Shape::Ball { radius } => vec![Part::Ball(*radius)],
            Shape::Compound { convex, concave } => convex
                .iter()
                .map(Part::Convex)
                .chain(concave.iter().map(Part::Mesh))
                .collect(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Part<'a> {
    Ball(f64),
    Convex(&'a ConvexPiece),
    Mesh(&'a TriMesh),
}

impl Part<'_> {
    fn world_aabb(&self, pose: &Pose) -> Aabb {
        match self {
            Part::Ball(r) => Aabb::new(pose.position - DVec3::splat(*r), pose.position + DVec3::splat(*r)),
            Part::Convex(piece) => piece.aabb.transformed(pose),
            Part::Mesh(mesh) => mesh.aabb.transformed(pose),
        }
    }
}

/// Contacts between `a` and `b`, appended to `out`; returns how many were added
pub fn collide(a: &PosedShape<'_>, b: &PosedShape<'_>, skin: f64, out: &mut Vec<ContactPoint>) -> usize {
    let start = out.len();
    let pad_a = a.margin + 0.5 * skin;
    let pad_b = b.margin + 0.5 * skin;
    for pa in a.parts() {
        let bounds_a = pa.world_aabb(&a.pose).expanded(pad_a);
        for pb in b.parts() {
            let bounds_b = pb.world_aabb(&b.pose).expanded(pad_b);
            if !bounds_a.intersects(&bounds_b) {
                continue;
            }
            collide_parts(
                (pa, &a.pose, pad_a),
                (pb, &b.pose, pad_b),
                (&bounds_a, &bounds_b),
                skin,
                out,
            );
        }
    }
    out.len() - start
}

type PartRef<'p, 'a> = (Part<'a>, &'p Pose, f64);

fn collide_parts(
    a: PartRef<'_, '_>,
    b: PartRef<'_, '_>,
    bounds: (&Aabb, &Aabb),
    skin: f64,
    out: &mut Vec<ContactPoint>,
) {
    let (pa, pose_a, pad_a) = a;
    let (pb, pose_b, pad_b) = b;
    match (pa, pb) {
        (Part::Ball(ra), Part::Ball(rb)) => {
            if let Some(c) = ball_ball(pose_a.position, ra + pad_a, pose_b.position, rb + pad_b) {
                out.push(unskin(c, skin));
            }
        }
        (Part::Ball(ra), Part::Convex(piece)) => {
            let sphere = Sphere::new(pose_a.position, ra + pad_a);
            let hull = Inflated::new(Transformed::new(piece, *pose_b), pad_b);
            push_convex(&sphere, &hull, skin, out);
        }
        (Part::Convex(_), Part::Ball(_)) | (Part::Mesh(_), Part::Ball(_)) => {
            let mut swapped = Vec::new();
            collide_parts(b, a, (bounds.1, bounds.0), skin, &mut swapped);
            out.extend(swapped.into_iter().map(ContactPoint::flipped));
        }
        (Part::Ball(ra), Part::Mesh(mesh)) => {
            let center = pose_a.position;
            let radius = ra + pad_a + pad_b;
            for tri in mesh_triangles(mesh, pose_b, &bounds.0.expanded(pad_b)) {
                if let Some(c) = ball_triangle(center, radius, &tri, pad_b) {
                    out.push(unskin(c, skin));
                }
            }
        }
        (Part::Convex(piece_a), Part::Convex(piece_b)) => {
            let ha = Inflated::new(Transformed::new(piece_a, *pose_a), pad_a);
            let hb = Inflated::new(Transformed::new(piece_b, *pose_b), pad_b);
            push_convex(&ha, &hb, skin, out);
        }
        (Part::Convex(piece), Part::Mesh(mesh)) => {
            let hull = Inflated::new(Transformed::new(piece, *pose_a), pad_a);
            for tri in mesh_triangles(mesh, pose_b, &bounds.0.expanded(pad_b)) {
                push_convex(&hull, &Inflated::new(tri, pad_b), skin, out);
            }
        }
        (Part::Mesh(mesh), Part::Convex(piece)) => {
            let hull = Inflated::new(Transformed::new(piece, *pose_b), pad_b);
            for tri in mesh_triangles(mesh, pose_a, &bounds.1.expanded(pad_a)) {
                push_convex(&Inflated::new(tri, pad_a), &hull, skin, out);
            }
        }
        (Part::Mesh(mesh_a), Part::Mesh(mesh_b)) => {
            let tris_b: Vec<Triangle> = mesh_triangles(mesh_b, pose_b, &bounds.0.expanded(pad_b)).collect();
            for ta in mesh_triangles(mesh_a, pose_a, &bounds.1.expanded(pad_a)) {
                let box_a = Aabb::from_points(&ta.v).expanded(pad_a);
                for tb in &tris_b {
                    let box_b = Aabb::from_points(&tb.v).expanded(pad_b);
                    if box_a.intersects(&box_b) {
                        push_convex(&Inflated::new(ta, pad_a), &Inflated::new(*tb, pad_b), skin, out);
                    }
                }
            }
        }
    }
}

/// World-space triangles of `mesh` near the world region `near`
fn mesh_triangles<'m>(mesh: &'m TriMesh, pose: &Pose, near: &Aabb) -> impl Iterator<Item = Triangle> + 'm {
    let local_region = near.transformed(&pose.inverse());
    let pose = *pose;
    let hits: Vec<usize> = mesh.query(&local_region).collect();
    hits.into_iter().map(move |i| {
        let t = mesh.triangle(i);
        Triangle::new(
            pose.transform_point(t.v[0]),
            pose.transform_point(t.v[1]),
            pose.transform_point(t.v[2]),
        )
    })
}

fn push_convex<A: Support + ?Sized, B: Support + ?Sized>(a: &A, b: &B, skin: f64, out: &mut Vec<ContactPoint>) {
    if let Some(c) = penetration(a, b) {
        if c.normal.is_finite() && c.normal.length_squared() > 0.5 {
            out.push(unskin(
                ContactPoint {
                    point_a: c.point_a,
                    point_b: c.point_b,
                    normal: c.normal,
                    depth: c.depth,
                },
                skin,
            ));
        } else {
            log::warn!("narrowphase: degenerate contact normal skipped");
        }
    }
}

/// Pull the witnesses back from the skin-padded surfaces
fn unskin(c: ContactPoint, skin: f64) -> ContactPoint {
    let half = 0.5 * skin;
    ContactPoint {
        point_a: c.point_a - c.normal * half,
        point_b: c.point_b + c.normal * half,
        normal: c.normal,
        depth: c.depth - skin,
    }
}

/// Closed-form sphere/sphere contact
pub fn ball_ball(ca: DVec3, ra: f64, cb: DVec3, rb: f64) -> Option<ContactPoint> {
    let delta = cb - ca;
    let dist_sq = delta.length_squared();
    let reach = ra + rb;
    if dist_sq > reach * reach {
        return None;
    }
    let dist = dist_sq.sqrt();
    // Coincident centers: any direction separates them
    let normal = if dist > EPSILON { delta / dist } else { DVec3::Y };
    Some(ContactPoint {
        point_a: ca + normal * ra,
        point_b: cb - normal * rb,
        normal,
        depth: reach - dist,
    })
}

/// Sphere (radius already including the triangle's padding) against a triangle
///
/// `pad_tri` is the part of `radius` that belongs to the triangle side; the
/// triangle witness is pushed out by it.
fn ball_triangle(center: DVec3, radius: f64, tri: &Triangle, pad_tri: f64) -> Option<ContactPoint> {
    let closest = tri.closest_point(center);
    let delta = closest - center;
    let dist_sq = delta.length_squared();
    if dist_sq > radius * radius {
        return None;
    }
    let dist = dist_sq.sqrt();
    let normal = if dist > EPSILON {
        delta / dist
    } else {
        // Center on the surface: push out along the face normal
        let n = tri.area_normal().normalize_or_zero();
        if n == DVec3::ZERO {
            log::warn!("narrowphase: degenerate triangle skipped");
            return None;
        }
        -n
    };
    Some(ContactPoint {
        point_a: center + normal * (radius - pad_tri),
        point_b: closest - normal * pad_tri,
        normal,
        depth: radius - dist,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::DQuat;
    use crate::shape::{PointBuffer, Polyhedron};
    use approx::assert_relative_eq;

    fn cube_shape(half: f64) -> Shape {
        let mut pts = Vec::new();
        for x in [-half, half] {
            for y in [-half, half] {
                for z in [-half, half] {
                    pts.push(DVec3::new(x, y, z));
                }
            }
        }
        Shape::from_geometry(&[PointBuffer::new(pts)], &[], true).unwrap()
    }

    fn floor_shape(half: f64) -> Shape {
        let points = vec![
            DVec3::new(-half, 0.0, -half),
            DVec3::new(half, 0.0, -half),
            DVec3::new(half, 0.0, half),
            DVec3::new(-half, 0.0, half),
        ];
        // Counter-clockwise seen from +Y
        let poly = Polyhedron::new(points, vec![0, 2, 1, 0, 3, 2]);
        Shape::from_geometry(&[], &[poly], true).unwrap()
    }

    fn at(p: DVec3) -> Pose {
        Pose::new(p, DQuat::IDENTITY)
    }

    #[test]
    fn test_ball_ball_depth_and_normal() {
        let ball = Shape::ball(1.0).unwrap();
        let a = PosedShape::new(&ball, at(DVec3::ZERO), 0.0);
        let b = PosedShape::new(&ball, at(DVec3::new(1.5, 0.0, 0.0)), 0.0);
        let mut out = Vec::new();
        assert_eq!(collide(&a, &b, 0.0, &mut out), 1);
        assert_relative_eq!(out[0].depth, 0.5, epsilon = 1e-12);
        assert_relative_eq!(out[0].normal.x, 1.0);
        assert_relative_eq!(out[0].point_a.x, 1.0);
        assert_relative_eq!(out[0].point_b.x, 0.5);
    }

    #[test]
    fn test_skin_reports_near_contact() {
        let ball = Shape::ball(1.0).unwrap();
        let a = PosedShape::new(&ball, at(DVec3::ZERO), 0.0);
        let b = PosedShape::new(&ball, at(DVec3::new(2.005, 0.0, 0.0)), 0.0);
        let mut out = Vec::new();
        assert_eq!(collide(&a, &b, 0.0, &mut out), 0);
        assert_eq!(collide(&a, &b, 0.01, &mut out), 1);
        assert_relative_eq!(out[0].depth, -0.005, epsilon = 1e-9);
        assert_relative_eq!(out[0].point_a.x, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ball_on_floor_mesh() {
        let ball = Shape::ball(0.5).unwrap();
        let floor = floor_shape(5.0);
        let a = PosedShape::new(&ball, at(DVec3::new(0.3, 0.4, 0.2)), 0.0);
        let b = PosedShape::new(&floor, Pose::IDENTITY, 0.0);
        let mut out = Vec::new();
        assert!(collide(&a, &b, 0.0, &mut out) >= 1);
        let c = out[0];
        assert_relative_eq!(c.normal.y, -1.0, epsilon = 1e-9);
        assert_relative_eq!(c.depth, 0.1, epsilon = 1e-9);
        assert_relative_eq!(c.point_b.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_floor_vs_ball_flipped() {
        let ball = Shape::ball(0.5).unwrap();
        let floor = floor_shape(5.0);
        let a = PosedShape::new(&floor, Pose::IDENTITY, 0.0);
        let b = PosedShape::new(&ball, at(DVec3::new(1.0, 0.45, 1.0)), 0.0);
        let mut out = Vec::new();
        assert!(collide(&a, &b, 0.0, &mut out) >= 1);
        assert_relative_eq!(out[0].normal.y, 1.0, epsilon = 1e-9);
        assert_relative_eq!(out[0].depth, 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_box_on_box() {
        let cube = cube_shape(0.5);
        let a = PosedShape::new(&cube, Pose::IDENTITY, 0.0);
        let b = PosedShape::new(&cube, at(DVec3::new(0.0, 0.95, 0.0)), 0.0);
        let mut out = Vec::new();
        assert_eq!(collide(&a, &b, 0.0, &mut out), 1);
        assert_relative_eq!(out[0].depth, 0.05, epsilon = 1e-6);
        assert_relative_eq!(out[0].normal.y, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_ball_vs_box() {
        let cube = cube_shape(1.0);
        let ball = Shape::ball(0.5).unwrap();
        let a = PosedShape::new(&ball, at(DVec3::new(0.0, 0.0, 1.4)), 0.0);
        let b = PosedShape::new(&cube, Pose::IDENTITY, 0.0);
        let mut out = Vec::new();
        assert_eq!(collide(&a, &b, 0.0, &mut out), 1);
        assert_relative_eq!(out[0].depth, 0.1, epsilon = 1e-3);
        assert!(out[0].normal.z < -0.99);
    }

    #[test]
    fn test_margin_inflates() {
        let ball = Shape::ball(1.0).unwrap();
        let a = PosedShape::new(&ball, at(DVec3::ZERO), 0.2);
        let b = PosedShape::new(&ball, at(DVec3::new(2.1, 0.0, 0.0)), 0.0);
        let mut out = Vec::new();
        assert_eq!(collide(&a, &b, 0.0, &mut out), 1);
        assert_relative_eq!(out[0].depth, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_separated_shapes() {
        let cube = cube_shape(0.5);
        let floor = floor_shape(1.0);
        let a = PosedShape::new(&cube, at(DVec3::new(0.0, 3.0, 0.0)), 0.0);
        let b = PosedShape::new(&floor, Pose::IDENTITY, 0.0);
        let mut out = Vec::new();
        assert_eq!(collide(&a, &b, 0.01, &mut out), 0);
    }
}
