//! Collision Filtering (Layer Table + System Groups)
//!
//! Two stages decide whether a body pair may collide:
//!
//! 1. **Layer table**: each body sits on one layer id (0..32). The
//!    environment's table maps a layer to the bitmask of layers it may touch.
//!    The check is symmetric: both directions must allow the pair.
//! 2. **System groups**: bodies of one articulated object share a non-zero
//!    system group. Inside a group, bodies collide only when their
//!    sub-system ids differ and neither names the other in its
//!    `sub_system_dont_collide_with` slot.
//!
//! # Usage
//!
//! ```
//! use ballance_physics::filter::{CollisionFilter, LayerMaskTable};
//!
//! // Layer 0 = level, layer 1 = ball, layer 2 = debris (touches level only)
//! let table = LayerMaskTable::from_masks(&[0b111, 0b011, 0b001]);
//! let ball = CollisionFilter::on_layer(1);
//! let debris = CollisionFilter::on_layer(2);
//! assert!(!table.can_collide(&ball, &debris));
//! ```

/// Number of addressable layers
pub const MAX_LAYERS: usize = 32;

/// Per-body filter data
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CollisionFilter {
    /// Layer id (0..32)
    pub layer: u32,
    /// System group id (0 = none)
    pub system_group: u32,
    /// Sub-system id inside the group
    pub sub_system_id: u32,
    /// Sub-system id this body never collides with inside its group
    pub sub_system_dont_collide_with: u32,
}

impl CollisionFilter {
    /// Filter on `layer`, outside any system group
    #[inline]
    pub const fn on_layer(layer: u32) -> Self {
        Self {
            layer,
            system_group: 0,
            sub_system_id: 0,
            sub_system_dont_collide_with: 0,
        }
    }

    /// Builder: join a system group
    #[inline]
    #[must_use]
    pub const fn with_system_group(
        mut self,
        system_group: u32,
        sub_system_id: u32,
        dont_collide_with: u32,
    ) -> Self {
        self.system_group = system_group;
        self.sub_system_id = sub_system_id;
        self.sub_system_dont_collide_with = dont_collide_with;
        self
    }

    /// Layer as a single-bit mask (zero for out-of-range layers)
    #[inline]
    pub fn layer_bit(&self) -> u32 {
        if (self.layer as usize) < MAX_LAYERS {
            1u32 << self.layer
        } else {
            0
        }
    }

    /// System-group stage of the filter
    #[inline]
    pub fn group_allows(a: &Self, b: &Self) -> bool {
        if a.system_group == 0 || a.system_group != b.system_group {
            return true;
        }
        a.sub_system_id != b.sub_system_id
            && a.sub_system_dont_collide_with != b.sub_system_id
            && b.sub_system_dont_collide_with != a.sub_system_id
    }
}

/// Layer id -> collidable-layers bitmask
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerMaskTable {
    masks: [u32; MAX_LAYERS],
}

impl LayerMaskTable {
    /// Every layer collides with every layer
    pub fn all() -> Self {
        Self {
            masks: [u32::MAX; MAX_LAYERS],
        }
    }

    /// Table from a host-provided prefix; missing entries collide with all
    pub fn from_masks(masks: &[u32]) -> Self {
        let mut table = Self::all();
        for (slot, mask) in table.masks.iter_mut().zip(masks) {
            *slot = *mask;
        }
        table
    }

    /// Mask of `layer` (zero for out-of-range layers)
    #[inline]
    pub fn mask(&self, layer: u32) -> u32 {
        self.masks.get(layer as usize).copied().unwrap_or(0)
    }

    /// OR (`enable`) or clear `to_mask` into the mask of `layer` only
    pub fn set_masks(&mut self, layer: u32, to_mask: u32, enable: bool) {
        if let Some(slot) = self.masks.get_mut(layer as usize) {
            if enable {
                *slot |= to_mask;
            } else {
                *slot &= !to_mask;
            }
        } else {
            log::warn!("set_masks: layer {layer} out of range");
        }
    }

    /// Layer stage of the filter (symmetric)
    #[inline]
    pub fn layers_allow(&self, a: &CollisionFilter, b: &CollisionFilter) -> bool {
        (self.mask(a.layer) & b.layer_bit()) != 0 && (self.mask(b.layer) & a.layer_bit()) != 0
    }

    /// Full filter: layer stage then system-group stage
    #[inline]
    pub fn can_collide(&self, a: &CollisionFilter, b: &CollisionFilter) -> bool {
        self.layers_allow(a, b) && CollisionFilter::group_allows(a, b)
    }

    /// Raycast flag test: `flag == 0` accepts every layer
    #[inline]
    pub fn ray_accepts(flag: u32, filter: &CollisionFilter) -> bool {
        flag == 0 || (flag & filter.layer_bit()) != 0
    }
}

impl Default for LayerMaskTable {
    fn default() -> Self {
        Self::all()
    }
}

/// Hands out system group ids: 1, 2, 3, ...
#[derive(Clone, Debug, Default)]
pub struct SystemGroupAllocator {
    last: u32,
}

impl SystemGroupAllocator {
    /// Next unused group id (never 0)
    pub fn allocate(&mut self) -> u32 {
        self.last = self.last.wrapping_add(1).max(1);
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_allows_all() {
        let table = LayerMaskTable::default();
        let a = CollisionFilter::on_layer(3);
        let b = CollisionFilter::on_layer(17);
        assert!(table.can_collide(&a, &b));
    }

    #[test]
    fn test_symmetric_check_over_asymmetric_table() {
        // Layer 0 sees layer 1, layer 1 sees nothing
        let table = LayerMaskTable::from_masks(&[0b10, 0b00]);
        let a = CollisionFilter::on_layer(0);
        let b = CollisionFilter::on_layer(1);
        assert!(!table.can_collide(&a, &b));
        assert!(!table.can_collide(&b, &a));
    }

    #[test]
    fn test_mask_toggle_roundtrip() {
        let mut table = LayerMaskTable::from_masks(&[0b01, 0b10]);
        let a = CollisionFilter::on_layer(0);
        let b = CollisionFilter::on_layer(1);
        assert!(!table.can_collide(&a, &b));

        table.set_masks(0, 0b10, true);
        table.set_masks(1, 0b01, true);
        assert!(table.can_collide(&a, &b));

        table.set_masks(0, 0b10, false);
        table.set_masks(1, 0b01, false);
        assert!(!table.can_collide(&a, &b));
        assert_eq!(table, LayerMaskTable::from_masks(&[0b01, 0b10]));
    }

    #[test]
    fn test_set_masks_is_one_directional() {
        let mut table = LayerMaskTable::from_masks(&[0, 0]);
        table.set_masks(0, 0b10, true);
        assert_eq!(table.mask(0), 0b10);
        assert_eq!(table.mask(1), 0);
    }

    #[test]
    fn test_out_of_range_layer_never_collides() {
        let table = LayerMaskTable::all();
        let a = CollisionFilter::on_layer(40);
        let b = CollisionFilter::on_layer(0);
        assert!(!table.can_collide(&a, &b));
    }

    #[test]
    fn test_system_group_sub_ids() {
        let table = LayerMaskTable::all();
        let upper = CollisionFilter::on_layer(0).with_system_group(7, 1, 0);
        let lower = CollisionFilter::on_layer(0).with_system_group(7, 2, 0);
        let twin = CollisionFilter::on_layer(0).with_system_group(7, 1, 0);
        let outsider = CollisionFilter::on_layer(0).with_system_group(8, 1, 0);

        assert!(table.can_collide(&upper, &lower));
        assert!(!table.can_collide(&upper, &twin));
        assert!(table.can_collide(&upper, &outsider));
    }

    #[test]
    fn test_dont_collide_with() {
        let table = LayerMaskTable::all();
        let arm = CollisionFilter::on_layer(0).with_system_group(3, 1, 2);
        let hand = CollisionFilter::on_layer(0).with_system_group(3, 2, 0);
        let foot = CollisionFilter::on_layer(0).with_system_group(3, 3, 0);
        assert!(!table.can_collide(&arm, &hand));
        assert!(!table.can_collide(&hand, &arm));
        assert!(table.can_collide(&arm, &foot));
    }

    #[test]
    fn test_group_allocator_starts_at_one() {
        let mut groups = SystemGroupAllocator::default();
        assert_eq!(groups.allocate(), 1);
        assert_eq!(groups.allocate(), 2);
    }

    #[test]
    fn test_ray_flag() {
        let f = CollisionFilter::on_layer(4);
        assert!(LayerMaskTable::ray_accepts(0, &f));
        assert!(LayerMaskTable::ray_accepts(1 << 4, &f));
        assert!(!LayerMaskTable::ray_accepts(1 << 3, &f));
    }
}
