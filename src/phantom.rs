//! Phantom Volumes
//!
//! Overlap-only volumes. Each step the environment hands the tracker the set
//! of bodies currently overlapping each phantom; the tracker diffs it with
//! the previous snapshot and reports edge-triggered enter/exit transitions.
//! Because only transitions are reported, enter and exit strictly alternate
//! for every (phantom, body) pair.

use std::collections::{BTreeMap, BTreeSet};

use crate::body::BodyHandle;

/// Overlap transition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhantomTransition {
    /// Phantom volume
    pub phantom: BodyHandle,
    /// Body entering or leaving
    pub other: BodyHandle,
    /// `true` on enter, `false` on exit
    pub entered: bool,
}

/// Latest overlap snapshot of every phantom
#[derive(Clone, Debug, Default)]
pub struct PhantomTracker {
    inside: BTreeMap<BodyHandle, BTreeSet<BodyHandle>>,
}

impl PhantomTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `phantom` with nothing inside
    pub fn register(&mut self, phantom: BodyHandle) {
        self.inside.entry(phantom).or_default();
    }

    /// True if `phantom` is tracked
    pub fn is_phantom(&self, phantom: BodyHandle) -> bool {
        self.inside.contains_key(&phantom)
    }

    /// Tracked phantoms in handle order
    pub fn phantoms(&self) -> Vec<BodyHandle> {
        self.inside.keys().copied().collect()
    }

    /// Replace the snapshot of `phantom`, appending the transitions to `out`
    pub fn update(
        &mut self,
        phantom: BodyHandle,
        current: BTreeSet<BodyHandle>,
        out: &mut Vec<PhantomTransition>,
    ) {
        let previous = self.inside.entry(phantom).or_default();
        for &other in current.difference(previous) {
            out.push(PhantomTransition {
                phantom,
                other,
                entered: true,
            });
        }
        for &other in previous.difference(&current) {
            out.push(PhantomTransition {
                phantom,
                other,
                entered: false,
            });
        }
        *previous = current;
    }

    /// Membership in the last snapshot
    pub fn is_inside(&self, phantom: BodyHandle, other: BodyHandle) -> bool {
        self.inside
            .get(&phantom)
            .map_or(false, |set| set.contains(&other))
    }

    /// Number of bodies inside `phantom`
    pub fn count_inside(&self, phantom: BodyHandle) -> usize {
        self.inside.get(&phantom).map_or(0, BTreeSet::len)
    }

    /// Forget `body` as phantom and as occupant; returns the exits it causes
    pub fn remove_body(&mut self, body: BodyHandle) -> Vec<PhantomTransition> {
        let mut exits = Vec::new();
        if let Some(set) = self.inside.remove(&body) {
            exits.extend(set.into_iter().map(|other| PhantomTransition {
                phantom: body,
                other,
                entered: false,
            }));
        }
        for (&phantom, set) in &mut self.inside {
            if set.remove(&body) {
                exits.push(PhantomTransition {
                    phantom,
                    other: body,
                    entered: false,
                });
            }
        }
        exits
    }

    /// Drop every snapshot
    pub fn clear(&mut self) {
        self.inside.clear();
    }
}
