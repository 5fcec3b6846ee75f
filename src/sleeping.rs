//! Sleeping and Island Management
//!
//! Freezes low-energy bodies and groups connected bodies into islands.
//!
//! # Sleeping
//!
//! A body whose kinetic energy per unit mass stays below the configured
//! threshold for `time_to_sleep` seconds is ready to sleep. Frozen bodies
//! keep their pose, drop their velocity and act as static colliders until
//! something wakes them.
//!
//! # Islands
//!
//! Bodies connected by contacts or constraints form an island. An island
//! freezes only when every body in it is ready, so a resting stack goes to
//! sleep as a whole instead of leaving one body hovering.

use crate::config::SleepConfig;
use crate::math::DVec3;

/// Per-body sleep tracking data
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SleepData {
    /// Seconds spent continuously below the energy threshold
    pub idle_time: f64,
}

impl SleepData {
    /// Feed one step of motion; returns true once the body is ready to sleep
    pub fn observe(&mut self, energy: f64, dt: f64, config: &SleepConfig) -> bool {
        if energy < config.energy_threshold {
            self.idle_time += dt;
        } else {
            self.idle_time = 0.0;
        }
        self.idle_time >= config.time_to_sleep
    }

    /// Forget accumulated rest time
    #[inline]
    pub fn reset(&mut self) {
        self.idle_time = 0.0;
    }
}

/// Kinetic energy per unit mass: `0.5 * (|v|^2 + w . (I w))`
///
/// `angular_local` is the angular velocity in body axes and `unit_inertia`
/// the principal inertia per unit mass.
#[inline]
#[must_use]
pub fn energy_per_mass(velocity: DVec3, angular_local: DVec3, unit_inertia: DVec3) -> f64 {
    0.5 * (velocity.length_squared() + (angular_local * angular_local * unit_inertia).element_sum())
}

/// Union-find over dense body indices
pub struct IslandBuilder {
    parent: Vec<usize>,
    rank: Vec<u32>,
}

impl IslandBuilder {
    /// `n` singleton islands
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    /// Find root with path halving
    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Union two bodies into the same island
    pub fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            core::cmp::Ordering::Less => self.parent[ra] = rb,
            core::cmp::Ordering::Greater => self.parent[rb] = ra,
            core::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }

    /// Islands as lists of member indices
    pub fn islands(&mut self) -> Vec<Vec<usize>> {
        let n = self.parent.len();
        let mut slot: Vec<Option<usize>> = vec![None; n];
        let mut out: Vec<Vec<usize>> = Vec::new();
        for i in 0..n {
            let root = self.find(i);
            let idx = *slot[root].get_or_insert_with(|| {
                out.push(Vec::new());
                out.len() - 1
            });
            out[idx].push(i);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_after_threshold() {
        let cfg = SleepConfig {
            enabled: true,
            energy_threshold: 0.01,
            time_to_sleep: 0.5,
        };
        let mut data = SleepData::default();
        let dt = 0.1;
        for _ in 0..4 {
            assert!(!data.observe(0.0, dt, &cfg));
        }
        assert!(data.observe(0.0, dt, &cfg));
    }

    #[test]
    fn test_motion_resets_timer() {
        let cfg = SleepConfig::default();
        let mut data = SleepData::default();
        data.observe(0.0, 0.9, &cfg);
        assert!(!data.observe(10.0, 0.1, &cfg));
        assert_eq!(data.idle_time, 0.0);
    }

    #[test]
    fn test_energy_per_mass() {
        let e = energy_per_mass(DVec3::new(2.0, 0.0, 0.0), DVec3::ZERO, DVec3::ONE);
        assert!((e - 2.0).abs() < 1e-12);
        let e = energy_per_mass(DVec3::ZERO, DVec3::new(0.0, 2.0, 0.0), DVec3::splat(0.5));
        assert!((e - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_union_find_islands() {
        let mut islands = IslandBuilder::new(5);
        islands.union(0, 1);
        islands.union(3, 4);
        islands.union(1, 4);
        let groups = islands.islands();
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().any(|g| g == &vec![0, 1, 3, 4]));
        assert!(groups.iter().any(|g| g == &vec![2]));
    }
}
