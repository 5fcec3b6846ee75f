//! Broad Phase
//!
//! Sweep-and-prune over world AABBs:
//! 1. Sort proxies by min-X
//! 2. Sweep through sorted intervals to find X overlaps
//! 3. Check Y and Z only for X-overlapping pairs
//!
//! Pair eligibility (layers, system groups, immovable pruning) is decided by
//! the caller's predicate so the sweep stays independent of body state.

use crate::math::Aabb;

/// One entry in the sweep
#[derive(Clone, Copy, Debug)]
pub struct Proxy {
    /// Caller-defined index (dense body index)
    pub index: usize,
    /// World bounds
    pub aabb: Aabb,
}

/// Sweep-and-prune broad phase
#[derive(Clone, Debug, Default)]
pub struct SweepAndPrune {
    proxies: Vec<Proxy>,
}

impl SweepAndPrune {
    /// Create an empty broad phase
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the proxy set and sort it along X
    ///
    /// Empty or non-finite bounds are dropped: they can never overlap anything
    /// and NaN would break sort transitivity.
    pub fn rebuild(&mut self, proxies: impl IntoIterator<Item = Proxy>) {
        self.proxies.clear();
        self.proxies.extend(proxies.into_iter().filter(|p| {
            !p.aabb.is_empty() && p.aabb.min.is_finite() && p.aabb.max.is_finite()
        }));
        self.proxies
            .sort_by(|a, b| a.aabb.min.x.total_cmp(&b.aabb.min.x));
    }

    /// Number of proxies in the sweep
    #[inline]
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// True when nothing is registered
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// All overlapping pairs accepted by `accept`, normalized so `a < b`
    ///
    /// Self pairs are never reported.
    pub fn query_pairs(&self, mut accept: impl FnMut(usize, usize) -> bool) -> Vec<(usize, usize)> {
        let mut pairs = Vec::with_capacity(self.proxies.len() * 2);
        let n = self.proxies.len();
        for i in 0..n {
            let pi = &self.proxies[i];
            for pj in &self.proxies[i + 1..] {
                if pj.aabb.min.x > pi.aabb.max.x {
                    break;
                }
                if pi.index == pj.index || !pi.aabb.intersects(&pj.aabb) {
                    continue;
                }
                let (a, b) = if pi.index < pj.index {
                    (pi.index, pj.index)
                } else {
                    (pj.index, pi.index)
                };
                if accept(a, b) {
                    pairs.push((a, b));
                }
            }
        }
        pairs.sort_unstable();
        pairs
    }

    /// Proxies whose bounds overlap `region`
    pub fn query_aabb(&self, region: &Aabb) -> impl Iterator<Item = usize> + '_ {
        let region = *region;
        self.proxies
            .iter()
            .take_while(move |p| p.aabb.min.x <= region.max.x)
            .filter(move |p| p.aabb.intersects(&region))
            .map(|p| p.index)
    }
}
