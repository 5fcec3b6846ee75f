//! Collision Shapes and Named Surfaces
//!
//! A body's collision geometry is either a ball or a compound made of convex
//! pieces (hulls built from point buffers) and concave pieces (triangle
//! meshes built from polyhedra). Shapes live in object space and are shared
//! between bodies through the per-environment [`SurfaceCache`].
//!
//! # Mass properties
//!
//! Volume, center and inertia come from signed-tetrahedron integration over
//! the closed surfaces of the shape. Open meshes (a floor made of two
//! triangles) have no volume and fall back to the bounding box.

use std::collections::HashMap;
use std::sync::Arc;

use glam::DMat3;

use crate::collider::{PointCloud, Support, Triangle};
use crate::error::PhysicsError;
use crate::hull::{build_convex_hull, HullMesh};
use crate::math::{is_finite, Aabb, DVec3, EPSILON};

// ============================================================================
// Host geometry
// ============================================================================

/// Loose point set (input to a convex piece)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointBuffer {
    /// Points in object space
    pub points: Vec<DVec3>,
}

impl PointBuffer {
    /// Wrap a point list
    pub fn new(points: Vec<DVec3>) -> Self {
        Self { points }
    }

    /// Build from packed `[x, y, z, x, y, z, ...]`
    pub fn from_flat(coords: &[f32]) -> Self {
        Self {
            points: coords
                .chunks_exact(3)
                .map(|c| DVec3::new(f64::from(c[0]), f64::from(c[1]), f64::from(c[2])))
                .collect(),
        }
    }
}

/// Indexed triangle set (input to a concave piece)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Polyhedron {
    /// Vertices in object space
    pub points: Vec<DVec3>,
    /// Triangle list, three indices per triangle
    pub indices: Vec<u32>,
}

impl Polyhedron {
    /// Create an indexed triangle set
    pub fn new(points: Vec<DVec3>, indices: Vec<u32>) -> Self {
        Self { points, indices }
    }
}

// ============================================================================
// Pieces
// ============================================================================

/// Convex piece: a triangulated hull
#[derive(Clone, Debug, PartialEq)]
pub struct ConvexPiece {
    /// Hull geometry
    pub hull: HullMesh,
    /// Object-space bounds
    pub aabb: Aabb,
}

impl ConvexPiece {
    /// Hull of `points`
    pub fn from_points(points: &[DVec3]) -> Result<Self, PhysicsError> {
        let hull = build_convex_hull(points)?;
        let aabb = Aabb::from_points(&hull.vertices);
        Ok(Self { hull, aabb })
    }

    /// Hull triangles in object space
    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.hull.triangles.iter().map(move |t| {
            Triangle::new(
                self.hull.vertices[t[0] as usize],
                self.hull.vertices[t[1] as usize],
                self.hull.vertices[t[2] as usize],
            )
        })
    }
}

impl Support for ConvexPiece {
    #[inline]
    fn support(&self, direction: DVec3) -> DVec3 {
        PointCloud::new(&self.hull.vertices).support(direction)
    }
}

/// Concave piece: a triangle mesh whose triangles collide individually
#[derive(Clone, Debug, PartialEq)]
pub struct TriMesh {
    /// Vertices
    pub vertices: Vec<DVec3>,
    /// Triangles (zero-area input triangles are dropped)
    pub triangles: Vec<[u32; 3]>,
    /// Per-triangle bounds
    pub triangle_aabbs: Vec<Aabb>,
    /// Whole-mesh bounds
    pub aabb: Aabb,
}

impl TriMesh {
    /// Validate and index a polyhedron
    pub fn from_polyhedron(poly: &Polyhedron) -> Result<Self, PhysicsError> {
        if poly.indices.is_empty() || poly.indices.len() % 3 != 0 {
            return Err(PhysicsError::DegenerateShape {
                reason: "polyhedron index count must be a positive multiple of 3",
            });
        }
        if !poly.points.iter().all(|p| is_finite(*p)) {
            return Err(PhysicsError::DegenerateShape {
                reason: "non-finite vertex",
            });
        }
        let n = poly.points.len() as u32;
        if poly.indices.iter().any(|&i| i >= n) {
            return Err(PhysicsError::DegenerateShape {
                reason: "polyhedron index out of range",
            });
        }

        let mut triangles = Vec::with_capacity(poly.indices.len() / 3);
        let mut triangle_aabbs = Vec::with_capacity(poly.indices.len() / 3);
        for tri in poly.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| poly.points[i as usize]);
            if (b - a).cross(c - a).length_squared() <= EPSILON * EPSILON {
                continue;
            }
            triangles.push([tri[0], tri[1], tri[2]]);
            triangle_aabbs.push(Aabb::from_points(&[a, b, c]));
        }
        if triangles.is_empty() {
            return Err(PhysicsError::DegenerateShape {
                reason: "polyhedron has only zero-area triangles",
            });
        }
        let aabb = triangle_aabbs
            .iter()
            .fold(Aabb::EMPTY, |acc, b| acc.union(b));
        Ok(Self {
            vertices: poly.points.clone(),
            triangles,
            triangle_aabbs,
            aabb,
        })
    }

    /// Triangle `i`
    #[inline]
    pub fn triangle(&self, i: usize) -> Triangle {
        let t = self.triangles[i];
        Triangle::new(
            self.vertices[t[0] as usize],
            self.vertices[t[1] as usize],
            self.vertices[t[2] as usize],
        )
    }

    /// Indices of triangles whose bounds overlap `region`
    pub fn query(&self, region: &Aabb) -> impl Iterator<Item = usize> + '_ {
        let region = *region;
        self.triangle_aabbs
            .iter()
            .enumerate()
            .filter(move |(_, b)| b.intersects(&region))
            .map(|(i, _)| i)
    }

    /// All triangles
    pub fn iter_triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        (0..self.triangles.len()).map(move |i| self.triangle(i))
    }
}

// ============================================================================
// Shape
// ============================================================================

/// Collision geometry of one body (object space)
#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    /// Sphere centered on the body origin
    Ball {
        /// Radius
        radius: f64,
    },
    /// Set of convex and concave pieces
    Compound {
        /// Convex pieces
        convex: Vec<ConvexPiece>,
        /// Concave pieces
        concave: Vec<TriMesh>,
    },
}

/// Volume-derived mass properties (per unit mass where noted)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MassProperties {
    /// Enclosed volume (0 for open geometry)
    pub volume: f64,
    /// Geometric center in object space
    pub center: DVec3,
    /// Principal-axis inertia per unit mass about `center` (object axes)
    pub unit_inertia: DVec3,
}

impl Shape {
    /// Ball of `radius`
    pub fn ball(radius: f64) -> Result<Self, PhysicsError> {
        if !(radius.is_finite() && radius > 0.0) {
            return Err(PhysicsError::DegenerateShape {
                reason: "ball radius must be positive",
            });
        }
        Ok(Self::Ball { radius })
    }

    /// Compound from host geometry.
    ///
    /// With `merge_convex`, all point buffers are merged into one hull;
    /// otherwise each buffer becomes its own convex piece.
    pub fn from_geometry(
        convex: &[PointBuffer],
        concave: &[Polyhedron],
        merge_convex: bool,
    ) -> Result<Self, PhysicsError> {
        let mut pieces = Vec::new();
        if merge_convex {
            let all: Vec<DVec3> = convex.iter().flat_map(|b| b.points.iter().copied()).collect();
            if !all.is_empty() {
                pieces.push(ConvexPiece::from_points(&all)?);
            }
        } else {
            for buffer in convex {
                pieces.push(ConvexPiece::from_points(&buffer.points)?);
            }
        }
        let meshes = concave
            .iter()
            .map(TriMesh::from_polyhedron)
            .collect::<Result<Vec<_>, _>>()?;

        if pieces.is_empty() && meshes.is_empty() {
            return Err(PhysicsError::EmptyShape);
        }
        Ok(Self::Compound {
            convex: pieces,
            concave: meshes,
        })
    }

    /// Object-space bounds
    pub fn local_aabb(&self) -> Aabb {
        match self {
            Self::Ball { radius } => Aabb::new(DVec3::splat(-radius), DVec3::splat(*radius)),
            Self::Compound { convex, concave } => convex
                .iter()
                .map(|p| p.aabb)
                .chain(concave.iter().map(|m| m.aabb))
                .fold(Aabb::EMPTY, |acc, b| acc.union(&b)),
        }
    }

    /// Ball radius, if this is a ball
    #[inline]
    pub fn ball_radius(&self) -> Option<f64> {
        match self {
            Self::Ball { radius } => Some(*radius),
            Self::Compound { .. } => None,
        }
    }

    /// Volume, center and unit inertia of the shape
    pub fn mass_properties(&self) -> MassProperties {
        match self {
            Self::Ball { radius } => MassProperties {
                volume: 4.0 / 3.0 * std::f64::consts::PI * radius.powi(3),
                center: DVec3::ZERO,
                unit_inertia: DVec3::splat(0.4 * radius * radius),
            },
            Self::Compound { convex, concave } => {
                let mut acc = VolumeIntegral::default();
                for piece in convex {
                    acc.add_surface(piece.triangles(), false);
                }
                for mesh in concave {
                    acc.add_surface(mesh.iter_triangles(), true);
                }
                acc.finish()
                    .unwrap_or_else(|| box_mass_properties(&self.local_aabb()))
            }
        }
    }
}

/// Solid box fallback for shapes without enclosed volume
fn box_mass_properties(aabb: &Aabb) -> MassProperties {
    if aabb.is_empty() {
        return MassProperties {
            volume: 0.0,
            center: DVec3::ZERO,
            unit_inertia: DVec3::ONE,
        };
    }
    let e = aabb.extents();
    let (x2, y2, z2) = (e.x * e.x, e.y * e.y, e.z * e.z);
    let inertia = DVec3::new(y2 + z2, x2 + z2, x2 + y2) / 12.0;
    MassProperties {
        volume: e.x * e.y * e.z,
        center: aabb.center(),
        unit_inertia: inertia.max(DVec3::splat(EPSILON)),
    }
}

/// Running sums of signed-tetrahedron integrals (apex at the origin)
struct VolumeIntegral {
    volume: f64,
    first_moment: DVec3,
    covariance: DMat3,
}

impl Default for VolumeIntegral {
    fn default() -> Self {
        Self {
            volume: 0.0,
            first_moment: DVec3::ZERO,
            covariance: DMat3::ZERO,
        }
    }
}

impl VolumeIntegral {
    fn add_surface(&mut self, triangles: impl Iterator<Item = Triangle>, fix_winding: bool) {
        let mut part = Self::default();
        for tri in triangles {
            let [a, b, c] = tri.v;
            let det = a.dot(b.cross(c));
            part.volume += det / 6.0;
            part.first_moment += (a + b + c) * (det / 24.0);
            let s = a + b + c;
            let outer = |v: DVec3| DMat3::from_cols(v * v.x, v * v.y, v * v.z);
            part.covariance += (outer(a) + outer(b) + outer(c) + outer(s)) * (det / 120.0);
        }
        // Inward-wound meshes integrate to negative volume
        let sign = if fix_winding && part.volume < 0.0 { -1.0 } else { 1.0 };
        self.volume += part.volume * sign;
        self.first_moment += part.first_moment * sign;
        self.covariance += part.covariance * sign;
    }

    fn finish(self) -> Option<MassProperties> {
        if self.volume <= 1.0e-12 {
            return None;
        }
        let center = self.first_moment / self.volume;
        // Covariance about the center, per unit volume
        let c = self.covariance * (1.0 / self.volume)
            - DMat3::from_cols(center * center.x, center * center.y, center * center.z);
        let trace = c.x_axis.x + c.y_axis.y + c.z_axis.z;
        let inertia = DVec3::new(trace - c.x_axis.x, trace - c.y_axis.y, trace - c.z_axis.z);
        Some(MassProperties {
            volume: self.volume,
            center,
            unit_inertia: inertia.max(DVec3::splat(EPSILON)),
        })
    }
}

// ============================================================================
// Surface cache
// ============================================================================

/// Named, shared shapes of one environment
#[derive(Clone, Debug, Default)]
pub struct SurfaceCache {
    surfaces: HashMap<String, Arc<Shape>>,
}

impl SurfaceCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared shape registered under `name`
    pub fn get(&self, name: &str) -> Option<Arc<Shape>> {
        self.surfaces.get(name).cloned()
    }

    /// True when `name` is cached
    pub fn contains(&self, name: &str) -> bool {
        self.surfaces.contains_key(name)
    }

    /// Register (or replace) `name`
    pub fn insert(&mut self, name: impl Into<String>, shape: Arc<Shape>) {
        self.surfaces.insert(name.into(), shape);
    }

    /// Number of cached surfaces
    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    /// Forget every name; bodies keep their shapes alive
    pub fn clear(&mut self) {
        self.surfaces.clear();
    }
}
