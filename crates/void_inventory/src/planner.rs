//! Distribution planning
//!
//! Decides where an incoming quantity goes before anything is inserted:
//! partial stacks are topped off first, then generic storage and tagged
//! slots are filled in the order the [`PlacementPolicy`] asks for.

use crate::catalog::ItemDefinition;
use crate::inventory::Inventory;
use crate::item::{ItemId, SlotAddress};
use crate::tag::Tag;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Where incoming items are placed first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlacementPolicy {
    /// Generic storage, then tagged slots
    #[default]
    PreferGeneric,
    /// Specialized and universal slots, then generic storage
    PreferTagged,
    /// Specialized and matching universal slots, then generic storage, then
    /// remaining universal slots
    PreferSpecializedTagged,
}

/// One planned placement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub address: SlotAddress,
    pub quantity: u32,
}

/// Ordered placements for an incoming quantity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionPlan {
    placements: Vec<Placement>,
}

impl DistributionPlan {
    /// All placements, tagged first, then generic chunks
    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    /// Total planned
    pub fn total(&self) -> u32 {
        self.placements.iter().map(|p| p.quantity).sum()
    }

    /// Planned into generic storage
    pub fn generic_quantity(&self) -> u32 {
        self.placements
            .iter()
            .filter(|p| p.address.is_generic())
            .map(|p| p.quantity)
            .sum()
    }

    /// Tagged placements in planned order
    pub fn tagged(&self) -> impl Iterator<Item = (&Tag, u32)> {
        self.placements
            .iter()
            .filter_map(|p| p.address.tag().map(|tag| (tag, p.quantity)))
    }

    /// Whether nothing is planned
    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }
}

impl Inventory {
    /// Plan how `quantity` of an item would be distributed
    ///
    /// The plan is capped at the receivable quantity, so its total may be
    /// less than requested.
    pub fn plan_distribution(&self, item: &ItemId, quantity: u32, policy: PlacementPolicy) -> DistributionPlan {
        match self.catalog.lookup(item) {
            Some(def) => {
                let viable = self.receivable_total(&def, quantity, false);
                self.plan_for(&def, viable, policy)
            }
            None => DistributionPlan::default(),
        }
    }

    pub(crate) fn plan_for(&self, def: &ItemDefinition, quantity: u32, policy: PlacementPolicy) -> DistributionPlan {
        let mut tagged: Vec<(Tag, u32)> = Vec::new();
        let mut planned: HashSet<Tag> = HashSet::new();
        let mut total = 0;
        let mut generic = 0;
        let mut topped_off = 0;

        if quantity == 0 {
            return DistributionPlan::default();
        }

        if def.max_stack > 1 {
            for entry in self.tagged.iter() {
                if total >= quantity {
                    break;
                }
                if entry.blocked || entry.item_id() != Some(&def.id) {
                    continue;
                }
                let room = def.max_stack.saturating_sub(entry.quantity()).min(quantity - total);
                if room > 0 {
                    tagged.push((entry.tag.clone(), room));
                    planned.insert(entry.tag.clone());
                    total += room;
                }
            }

            let partial = self.container_only(&def.id) % def.max_stack;
            if partial != 0 && total < quantity {
                topped_off = (def.max_stack - partial).min(quantity - total);
                generic += topped_off;
                total += topped_off;
            }
        }

        let mut generic_room = self.generic_capacity(def).saturating_sub(topped_off);

        if policy == PlacementPolicy::PreferGeneric {
            let amount = (quantity - total).min(generic_room);
            generic += amount;
            total += amount;
            generic_room -= amount;
        }

        if total < quantity {
            for tag in self.registry.specialized() {
                if total >= quantity {
                    break;
                }
                if planned.contains(tag) {
                    continue;
                }
                let amount = (quantity - total).min(self.receivable_for_tagged(def, tag, u32::MAX, true, false));
                if amount > 0 {
                    tagged.push((tag.clone(), amount));
                    planned.insert(tag.clone());
                    total += amount;
                }
            }

            // Universal slots matching one of the item's categories
            let mut would_block: HashSet<Tag> = HashSet::new();
            for slot in self.registry.universal() {
                if total >= quantity {
                    break;
                }
                if !def.categories.has_tag(&slot.tag) || planned.contains(&slot.tag) || would_block.contains(&slot.tag) {
                    continue;
                }
                let amount = (quantity - total).min(self.receivable_for_tagged(def, &slot.tag, u32::MAX, true, false));
                if amount > 0 {
                    tagged.push((slot.tag.clone(), amount));
                    planned.insert(slot.tag.clone());
                    total += amount;
                    if let Some(blocked) = slot.blocks.clone().filter(|_| slot.activates_blocking(def)) {
                        would_block.insert(blocked);
                    }
                }
            }

            if policy == PlacementPolicy::PreferSpecializedTagged && total < quantity {
                let amount = (quantity - total).min(generic_room);
                generic += amount;
                total += amount;
            }

            for slot in self.registry.universal() {
                if total >= quantity {
                    break;
                }
                if planned.contains(&slot.tag) || would_block.contains(&slot.tag) {
                    continue;
                }
                let amount = (quantity - total).min(self.receivable_for_tagged(def, &slot.tag, u32::MAX, true, false));
                if amount > 0 {
                    tagged.push((slot.tag.clone(), amount));
                    planned.insert(slot.tag.clone());
                    total += amount;
                    if let Some(blocked) = slot.blocks.clone().filter(|_| slot.activates_blocking(def)) {
                        would_block.insert(blocked);
                    }
                }
            }
        }

        if total < quantity {
            generic += quantity - total;
        }

        let mut placements: Vec<Placement> = tagged
            .into_iter()
            .map(|(tag, quantity)| Placement {
                address: SlotAddress::Tagged(tag),
                quantity,
            })
            .collect();
        placements.extend(self.generic_chunks(def, generic, topped_off));
        DistributionPlan { placements }
    }

    /// Split a generic quantity into stack-sized placements at packed positions
    fn generic_chunks(&self, def: &ItemDefinition, quantity: u32, topped_off: u32) -> Vec<Placement> {
        let layout = self.container.packed_layout(&self.catalog, &self.tagged);
        let mut next_new: u32 = layout.iter().map(|(_, _, count)| count).sum();
        let mut chunks = Vec::new();
        let mut left = quantity;

        if topped_off > 0 {
            if let Some((_, first, count)) = layout.iter().find(|(item, _, _)| item == &def.id) {
                chunks.push(Placement {
                    address: SlotAddress::Generic(first + count.saturating_sub(1)),
                    quantity: topped_off,
                });
                left -= topped_off;
            }
        }

        let max_stack = def.max_stack.max(1);
        while left > 0 {
            let amount = left.min(max_stack);
            chunks.push(Placement {
                address: SlotAddress::Generic(next_new),
                quantity: amount,
            });
            next_new += 1;
            left -= amount;
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::Authority;
    use crate::catalog::ItemCatalog;
    use crate::config::InventoryConfig;
    use crate::tagged::UniversalSlotSpec;
    use crate::world::UnlimitedSource;
    use std::sync::Arc;

    fn catalog() -> Arc<ItemCatalog> {
        Arc::new(ItemCatalog::from_definitions([
            ItemDefinition::new("rock", "Rock").with_weight(1.0),
            ItemDefinition::new("helmet", "Helmet")
                .with_max_stack(1)
                .with_category("Armor.Helmet"),
            ItemDefinition::new("torch", "Torch").with_category("Hand.Left"),
            ItemDefinition::new("spear", "Spear")
                .with_max_stack(1)
                .with_category("TwoHanded"),
        ]))
    }

    fn inventory(max_slots: u32) -> Inventory {
        let config = InventoryConfig::default()
            .with_max_slots(max_slots)
            .with_specialized_slot("Armor.Helmet")
            .with_universal_slot(
                UniversalSlotSpec::new("Hand.Right")
                    .blocking("Hand.Left", Some(Tag::new("TwoHanded")))
                    .exclusive("TwoHanded"),
            )
            .with_universal_slot(UniversalSlotSpec::new("Hand.Left"));
        Inventory::new(config, catalog(), Arc::new(Authority::Server))
    }

    fn give(inv: &mut Inventory, item: &str, quantity: u32, policy: PlacementPolicy) -> u32 {
        let mut source = UnlimitedSource::new(inv.catalog().clone());
        inv.add_item(&mut source, &ItemId::new(item), quantity, true, policy)
    }

    fn generic(index: u32, quantity: u32) -> Placement {
        Placement {
            address: SlotAddress::Generic(index),
            quantity,
        }
    }

    fn tagged(tag: &str, quantity: u32) -> Placement {
        Placement {
            address: SlotAddress::Tagged(Tag::new(tag)),
            quantity,
        }
    }

    #[test]
    fn test_prefer_generic_fills_stacks() {
        let inv = inventory(10);
        let plan = inv.plan_distribution(&ItemId::new("rock"), 8, PlacementPolicy::PreferGeneric);
        assert_eq!(plan.placements(), &[generic(0, 5), generic(1, 3)]);
        assert_eq!(plan.total(), 8);
    }

    #[test]
    fn test_prefer_tagged_fills_slots_first() {
        let inv = inventory(10);
        let plan = inv.plan_distribution(&ItemId::new("rock"), 12, PlacementPolicy::PreferTagged);
        assert_eq!(
            plan.placements(),
            &[tagged("Hand.Right", 5), tagged("Hand.Left", 5), generic(0, 2)]
        );
    }

    #[test]
    fn test_specialized_slot_takes_matching_item() {
        let inv = inventory(10);
        let plan = inv.plan_distribution(&ItemId::new("helmet"), 1, PlacementPolicy::PreferTagged);
        assert_eq!(plan.placements(), &[tagged("Armor.Helmet", 1)]);
    }

    #[test]
    fn test_matching_universal_slot_preferred() {
        let inv = inventory(10);
        let plan = inv.plan_distribution(&ItemId::new("torch"), 7, PlacementPolicy::PreferSpecializedTagged);
        assert_eq!(plan.placements(), &[tagged("Hand.Left", 5), generic(0, 2)]);
    }

    #[test]
    fn test_generic_overflow_goes_to_tagged() {
        let inv = inventory(1);
        let plan = inv.plan_distribution(&ItemId::new("rock"), 8, PlacementPolicy::PreferGeneric);
        assert_eq!(plan.generic_quantity(), 5);
        assert_eq!(plan.tagged().collect::<Vec<_>>(), vec![(&Tag::new("Hand.Right"), 3)]);
    }

    #[test]
    fn test_top_off_partial_stacks_first() {
        let mut inv = inventory(10);
        give(&mut inv, "rock", 3, PlacementPolicy::PreferGeneric);
        give(&mut inv, "helmet", 1, PlacementPolicy::PreferGeneric);

        let plan = inv.plan_distribution(&ItemId::new("rock"), 9, PlacementPolicy::PreferGeneric);
        assert_eq!(plan.placements(), &[generic(0, 2), generic(2, 5), generic(3, 2)]);
    }

    #[test]
    fn test_top_off_is_not_counted_twice() {
        let mut inv = inventory(1);
        give(&mut inv, "rock", 3, PlacementPolicy::PreferGeneric);

        let plan = inv.plan_distribution(&ItemId::new("rock"), 6, PlacementPolicy::PreferGeneric);
        assert_eq!(plan.generic_quantity(), 2);
        assert_eq!(plan.tagged().map(|(_, q)| q).sum::<u32>(), 4);
    }

    #[test]
    fn test_blocking_item_skips_blocked_slot() {
        let inv = inventory(0);
        let plan = inv.plan_distribution(&ItemId::new("spear"), 1, PlacementPolicy::PreferTagged);
        assert_eq!(plan.placements(), &[tagged("Hand.Right", 1)]);
    }

    #[test]
    fn test_plan_capped_by_capacity() {
        let inv = inventory(1);
        let plan = inv.plan_distribution(&ItemId::new("rock"), 30, PlacementPolicy::PreferGeneric);
        assert_eq!(plan.total(), 15);
        assert_eq!(plan.total(), inv.get_receivable_quantity(&ItemId::new("rock")));
        assert_eq!(plan.generic_quantity(), 5);
    }

    #[test]
    fn test_plan_does_not_mutate() {
        let inv = inventory(10);
        let before = inv.snapshot();
        inv.plan_distribution(&ItemId::new("rock"), 20, PlacementPolicy::PreferTagged);
        assert_eq!(inv.snapshot(), before);
    }
}
