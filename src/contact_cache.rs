//! Persistent Contact Manifolds
//!
//! Contact manifolds that survive across steps, keyed by body pair.
//!
//! # Features
//!
//! - **4-point manifold**: Up to 4 contact points per body pair
//! - **Persistent contacts**: New points within a small distance of a cached
//!   point update it in place; when full, the shallowest point is replaced
//! - **Lifecycle tracking**: each step reports which pairs started touching
//!   and which stopped, with a stable friction id per pair
//!
//! Points are stored as anchors in each body's mass frame (center of mass +
//! orientation) so the solver can re-evaluate them every substep.
//!
//! A manifold may hold speculative points: pairs closer than the contact
//! margin that have not met yet. The solver sees them, but a pair only counts
//! as touching once a point is within [`CONTACT_SLOP`] or the solver had to
//! push it apart.

use std::collections::HashMap;

use crate::body::BodyHandle;
use crate::math::{DVec3, Pose};
use crate::narrowphase::ContactPoint;

/// Maximum contact points per manifold
pub const MAX_MANIFOLD_POINTS: usize = 4;

/// Separation below which a point counts as touching
pub const CONTACT_SLOP: f64 = 1.0e-3;

/// A single cached contact point within a manifold
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ManifoldPoint {
    /// Anchor on body A (mass frame)
    pub local_a: DVec3,
    /// Anchor on body B (mass frame)
    pub local_b: DVec3,
    /// Contact normal (world space, A -> B)
    pub normal: DVec3,
    /// Penetration depth at detection time
    pub depth: f64,
    /// Largest normal multiplier the solver applied in the last step
    pub lambda_n: f64,
    /// Number of steps this point has persisted
    pub age: u32,
}

impl ManifoldPoint {
    /// Anchor a world contact in the two mass frames
    pub fn new(contact: &ContactPoint, frame_a: &Pose, frame_b: &Pose) -> Self {
        Self {
            local_a: frame_a.inverse_transform_point(contact.point_a),
            local_b: frame_b.inverse_transform_point(contact.point_b),
            normal: contact.normal,
            depth: contact.depth,
            lambda_n: 0.0,
            age: 0,
        }
    }

    /// True if the bodies meet at this point
    #[inline]
    pub fn is_touching(&self) -> bool {
        self.depth >= -CONTACT_SLOP || self.lambda_n > 0.0
    }

    /// Current world positions of both anchors
    #[inline]
    pub fn world_points(&self, frame_a: &Pose, frame_b: &Pose) -> (DVec3, DVec3) {
        (
            frame_a.transform_point(self.local_a),
            frame_b.transform_point(self.local_b),
        )
    }
}

/// Body pair key for manifold lookup (`a < b`)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyPair {
    /// Smaller handle
    pub a: BodyHandle,
    /// Larger handle
    pub b: BodyHandle,
}

impl BodyPair {
    /// Create a canonical body pair key
    #[inline]
    pub fn new(x: BodyHandle, y: BodyHandle) -> Self {
        if x <= y {
            Self { a: x, b: y }
        } else {
            Self { a: y, b: x }
        }
    }

    /// True if `h` is one of the pair
    #[inline]
    pub fn contains(&self, h: BodyHandle) -> bool {
        self.a == h || self.b == h
    }

    /// The other body of the pair
    #[inline]
    pub fn other(&self, h: BodyHandle) -> BodyHandle {
        if self.a == h {
            self.b
        } else {
            self.a
        }
    }
}

/// Contact manifold: up to 4 persistent contact points between two bodies
#[derive(Clone, Debug)]
pub struct ContactManifold {
    /// Body pair this manifold belongs to
    pub pair: BodyPair,
    /// Active contact points (up to MAX_MANIFOLD_POINTS)
    pub points: Vec<ManifoldPoint>,
    /// Combined friction coefficient
    pub friction: f64,
    /// Combined restitution coefficient
    pub restitution: f64,
    /// Stable id reported to friction listeners
    pub friction_id: u32,
    /// Steps since the pair entered the contact margin
    pub age: u32,
    /// Relative normal approach speed measured before the pair started touching
    pub impact_speed: f64,
    touched: bool,
    reported: bool,
}

impl ContactManifold {
    /// Create a new empty manifold
    pub fn new(pair: BodyPair, friction: f64, restitution: f64, friction_id: u32) -> Self {
        Self {
            pair,
            points: Vec::with_capacity(MAX_MANIFOLD_POINTS),
            friction,
            restitution,
            friction_id,
            age: 0,
            impact_speed: 0.0,
            touched: true,
            reported: false,
        }
    }

    /// Add or update a contact point in the manifold
    ///
    /// A cached point whose anchor on A lies within `match_distance` is
    /// replaced in place (keeping its age). Otherwise the point is appended,
    /// or replaces the shallowest point when the manifold is full.
    pub fn add_or_update(&mut self, point: ManifoldPoint, match_distance: f64) {
        let mut best_match: Option<usize> = None;
        let mut best_dist_sq = match_distance * match_distance;
        for (i, existing) in self.points.iter().enumerate() {
            let dist_sq = (existing.local_a - point.local_a).length_squared();
            if dist_sq < best_dist_sq {
                best_dist_sq = dist_sq;
                best_match = Some(i);
            }
        }

        if let Some(idx) = best_match {
            let age = self.points[idx].age;
            self.points[idx] = ManifoldPoint {
                age: age + 1,
                ..point
            };
        } else if self.points.len() < MAX_MANIFOLD_POINTS {
            self.points.push(point);
        } else if let Some((idx, shallowest)) = self
            .points
            .iter()
            .enumerate()
            .min_by(|x, y| x.1.depth.total_cmp(&y.1.depth))
        {
            if point.depth > shallowest.depth {
                self.points[idx] = point;
            }
        }
        self.touched = true;
    }

    /// Re-evaluate cached points at the current poses and drop the ones that
    /// separated beyond `skin` or slid more than `match_distance`
    pub fn refresh(&mut self, frame_a: &Pose, frame_b: &Pose, skin: f64, match_distance: f64) {
        self.points.retain_mut(|p| {
            let (wa, wb) = p.world_points(frame_a, frame_b);
            let delta = wa - wb;
            let depth = delta.dot(p.normal);
            let drift = (delta - p.normal * depth).length();
            p.depth = depth;
            depth >= -skin && drift <= match_distance
        });
    }

    /// Shared normal (average of point normals)
    pub fn normal(&self) -> DVec3 {
        self.points
            .iter()
            .map(|p| p.normal)
            .sum::<DVec3>()
            .normalize_or_zero()
    }

    /// Deepest point, if any
    pub fn deepest(&self) -> Option<&ManifoldPoint> {
        self.points.iter().max_by(|x, y| x.depth.total_cmp(&y.depth))
    }

    /// Number of active contact points
    #[inline]
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Check if this manifold is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// True if any point touches
    pub fn is_touching(&self) -> bool {
        self.points.iter().any(ManifoldPoint::is_touching)
    }

    /// True once the start of this contact was reported to listeners
    #[inline]
    pub fn is_reported(&self) -> bool {
        self.reported
    }
}

/// Contact cache: the contact set of the last step
#[derive(Debug, Default)]
pub struct ContactCache {
    manifolds: HashMap<BodyPair, ContactManifold>,
    next_friction_id: u32,
}

impl ContactCache {
    /// Create a new contact cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a detection pass: every manifold is untouched until re-detected
    pub fn begin_step(&mut self) {
        for manifold in self.manifolds.values_mut() {
            manifold.touched = false;
        }
    }

    /// Find or create the manifold for a pair
    pub fn get_or_create(&mut self, pair: BodyPair, friction: f64, restitution: f64) -> &mut ContactManifold {
        let next_id = &mut self.next_friction_id;
        self.manifolds.entry(pair).or_insert_with(|| {
            *next_id = next_id.wrapping_add(1);
            ContactManifold::new(pair, friction, restitution, *next_id)
        })
    }

    /// Find manifold for a body pair (read-only)
    pub fn find(&self, pair: &BodyPair) -> Option<&ContactManifold> {
        self.manifolds.get(pair)
    }

    /// Find manifold for a body pair (mutable)
    pub fn find_mut(&mut self, pair: &BodyPair) -> Option<&mut ContactManifold> {
        self.manifolds.get_mut(pair)
    }

    /// Finish a detection pass: drop manifolds that were not re-detected or
    /// lost all points, age the survivors, and return the ended ones
    pub fn end_step(&mut self) -> Vec<ContactManifold> {
        let mut ended = Vec::new();
        let stale: Vec<BodyPair> = self
            .manifolds
            .iter()
            .filter(|(_, m)| !m.touched || m.points.is_empty())
            .map(|(k, _)| *k)
            .collect();
        for key in stale {
            if let Some(m) = self.manifolds.remove(&key) {
                ended.push(m);
            }
        }
        ended.sort_by_key(|m| m.pair);
        ended
    }

    /// Flip the reported state of manifolds whose touching state changed.
    ///
    /// Returns the pairs that started touching and the pairs that stopped,
    /// both in pair order. Stopped manifolds are returned as they were
    /// before the flip, still marked reported.
    pub fn update_touching(&mut self) -> (Vec<ContactManifold>, Vec<ContactManifold>) {
        let mut started = Vec::new();
        let mut stopped = Vec::new();
        for m in self.manifolds.values_mut() {
            match (m.reported, m.is_touching()) {
                (false, true) => {
                    m.reported = true;
                    started.push(m.clone());
                }
                (true, false) => {
                    stopped.push(m.clone());
                    m.reported = false;
                }
                _ => {}
            }
        }
        started.sort_by_key(|m| m.pair);
        stopped.sort_by_key(|m| m.pair);
        (started, stopped)
    }

    /// Advance the age of every surviving manifold (after events went out)
    pub fn age_all(&mut self) {
        for m in self.manifolds.values_mut() {
            m.age = m.age.saturating_add(1);
        }
    }

    /// Remove every manifold involving `body` and return them
    pub fn remove_body(&mut self, body: BodyHandle) -> Vec<ContactManifold> {
        let keys: Vec<BodyPair> = self
            .manifolds
            .keys()
            .filter(|k| k.contains(body))
            .copied()
            .collect();
        let mut removed: Vec<ContactManifold> =
            keys.iter().filter_map(|k| self.manifolds.remove(k)).collect();
        removed.sort_by_key(|m| m.pair);
        removed
    }

    /// Remove manifolds rejected by `keep`
    pub fn retain(&mut self, mut keep: impl FnMut(&ContactManifold) -> bool) -> Vec<ContactManifold> {
        let keys: Vec<BodyPair> = self
            .manifolds
            .values()
            .filter(|m| !keep(m))
            .map(|m| m.pair)
            .collect();
        let mut removed: Vec<ContactManifold> =
            keys.iter().filter_map(|k| self.manifolds.remove(k)).collect();
        removed.sort_by_key(|m| m.pair);
        removed
    }

    /// True if the last step left `x` and `y` touching
    pub fn is_contact(&self, x: BodyHandle, y: BodyHandle) -> bool {
        self.manifolds
            .get(&BodyPair::new(x, y))
            .map_or(false, ContactManifold::is_touching)
    }

    /// Manifolds in deterministic (pair) order
    pub fn manifolds(&self) -> Vec<&ContactManifold> {
        let mut out: Vec<&ContactManifold> = self.manifolds.values().collect();
        out.sort_by_key(|m| m.pair);
        out
    }

    /// Mutable manifolds in deterministic (pair) order
    pub fn manifolds_mut(&mut self) -> Vec<&mut ContactManifold> {
        let mut out: Vec<&mut ContactManifold> = self.manifolds.values_mut().collect();
        out.sort_by_key(|m| m.pair);
        out
    }

    /// Pairs touching `body`
    pub fn contacts_of(&self, body: BodyHandle) -> impl Iterator<Item = &ContactManifold> + '_ {
        self.manifolds.values().filter(move |m| m.pair.contains(body))
    }

    /// Touching pairs of `body`
    pub fn touching(&self, body: BodyHandle) -> impl Iterator<Item = &ContactManifold> + '_ {
        self.contacts_of(body).filter(|m| m.is_touching())
    }

    /// Total number of active manifolds
    #[inline]
    pub fn manifold_count(&self) -> usize {
        self.manifolds.len()
    }

    /// Total number of active contact points across all manifolds
    pub fn total_contact_points(&self) -> usize {
        self.manifolds.values().map(ContactManifold::point_count).sum()
    }

    /// Clear all manifolds
    pub fn clear(&mut self) {
        self.manifolds.clear();
    }
}
