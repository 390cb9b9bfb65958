//! Moves between generic storage and tagged slots
//!
//! Every move is validated first, then executed against the container and the
//! tagged slot set. A move that would leave the container over its slot limit
//! is rolled back as a whole, swap included.

use crate::catalog::ItemDefinition;
use crate::error::{sentinel, InventoryError, Result};
use crate::events::{ChangeReason, InventoryEvent};
use crate::inventory::Inventory;
use crate::item::{move_between_slots, InstanceId, ItemId, ItemStack, SlotAddress};
use crate::planner::PlacementPolicy;
use crate::tag::Tag;
use crate::world::HeldStack;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A request to move units inside one inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    /// Item to move
    pub item: ItemId,
    /// Units to move
    pub quantity: u32,
    /// Specific instances to move, if any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<InstanceId>,
    /// Where the units are now
    pub source: SlotAddress,
    /// Where they should go
    pub target: SlotAddress,
    /// Whether a different occupant of a tagged target may be swapped out
    #[serde(default = "default_allow_swap")]
    pub allow_swap: bool,
    /// Item and quantity to bring back into a tagged source
    #[serde(default)]
    pub swap_back: Option<(ItemId, u32)>,
}

fn default_allow_swap() -> bool {
    true
}

impl MoveRequest {
    /// Move that may swap with a tagged target's occupant
    pub fn new(item: impl Into<ItemId>, quantity: u32, source: SlotAddress, target: SlotAddress) -> Self {
        Self {
            item: item.into(),
            quantity,
            instances: Vec::new(),
            source,
            target,
            allow_swap: true,
            swap_back: None,
        }
    }

    /// Refuse to displace a different occupant
    pub fn without_swap(mut self) -> Self {
        self.allow_swap = false;
        self
    }

    /// Bring `quantity` of `item` back into the tagged source
    pub fn with_swap_back(mut self, item: impl Into<ItemId>, quantity: u32) -> Self {
        self.swap_back = Some((item.into(), quantity));
        self
    }

    /// Move these instances
    pub fn with_instances(mut self, instances: Vec<InstanceId>) -> Self {
        self.quantity = instances.len() as u32;
        self.instances = instances;
        self
    }

    fn swap_back_requested(&self) -> Option<(&ItemId, u32)> {
        self.swap_back
            .as_ref()
            .filter(|(_, quantity)| *quantity > 0)
            .map(|(item, quantity)| (item, *quantity))
    }
}

/// Validated move, ready to execute
struct ValidatedMove {
    quantity: u32,
    def: Arc<ItemDefinition>,
}

impl Inventory {
    /// Move units between slots; returns units moved, 0 on refusal
    pub fn move_item(&mut self, request: &MoveRequest) -> u32 {
        sentinel("move_item", self.try_move_item(request))
    }

    /// Units a move would transfer, without changing anything
    pub fn validate_move(&self, request: &MoveRequest) -> u32 {
        sentinel("validate_move", self.check_move(request).map(|v| v.quantity))
    }

    /// Fallible [`Inventory::move_item`]
    pub fn try_move_item(&mut self, request: &MoveRequest) -> Result<u32> {
        let validated = self.check_move(request)?;
        if request.source.is_generic() && request.target.is_generic() {
            // Generic storage is packed; reordering it changes nothing
            return Ok(validated.quantity);
        }

        let container_before = self.container.clone();
        let tagged_before = self.tagged.clone();
        let used_before = self.container.used_slot_count();

        let events = match (&request.source, &request.target) {
            (SlotAddress::Tagged(source), SlotAddress::Tagged(target)) => {
                self.move_tagged_to_tagged(source, target, &validated, request)
            }
            (SlotAddress::Tagged(source), _) => self.move_tagged_to_container(source, &validated, request),
            (_, SlotAddress::Tagged(target)) => self.move_container_to_tagged(target, &validated, request),
            _ => Ok(Vec::new()),
        };
        let events = match events {
            Ok(events) => events,
            Err(err) => {
                self.container = container_before;
                self.tagged = tagged_before;
                self.update_weight_and_slots();
                return Err(err);
            }
        };

        self.update_weight_and_slots();
        let used = self.container.used_slot_count();
        if used > self.container.max_slot_count() && used > used_before {
            self.container = container_before;
            self.tagged = tagged_before;
            self.update_weight_and_slots();
            return Err(InventoryError::CapacityExceeded {
                item: request.item.clone(),
                requested: request.quantity,
                receivable: 0,
            });
        }

        for event in events {
            self.publish(event);
        }
        Ok(validated.quantity)
    }

    fn check_move(&self, request: &MoveRequest) -> Result<ValidatedMove> {
        self.ensure_authority("move_item")?;
        let def = self.catalog.try_lookup(&request.item)?;
        let item = &request.item;

        if request.quantity == 0 {
            return Err(InventoryError::InsufficientQuantity {
                item: item.clone(),
                requested: 0,
                available: 0,
            });
        }
        for address in [&request.source, &request.target] {
            if let SlotAddress::Tagged(tag) = address {
                if !self.registry.contains(tag) {
                    return Err(InventoryError::InvalidSlotReference(tag.to_string()));
                }
            }
        }
        if request.source == request.target && !request.source.is_generic() {
            return Err(InventoryError::InvalidSlotReference(format!(
                "{} to itself",
                request.source
            )));
        }

        let source_quantity = match &request.source {
            SlotAddress::Tagged(tag) => self
                .tagged
                .item(tag)
                .filter(|s| &s.item_id == item)
                .map_or(0, |s| s.quantity),
            _ => self.container_only(item),
        };
        if source_quantity == 0 {
            return Err(InventoryError::InsufficientQuantity {
                item: item.clone(),
                requested: request.quantity,
                available: 0,
            });
        }
        if !request.instances.is_empty() {
            let held = match &request.source {
                SlotAddress::Tagged(tag) => self.tagged.item(tag).cloned(),
                _ => self.container.stack(item).map(|stack| {
                    ItemStack::with_instances(item.clone(), self.free_instances(item, stack.quantity))
                }),
            };
            if !held.is_some_and(|held| held.contains(0, &request.instances)) {
                return Err(InventoryError::InsufficientQuantity {
                    item: item.clone(),
                    requested: request.quantity,
                    available: source_quantity,
                });
            }
        }

        if request.source.is_generic() && request.target.is_generic() {
            return Ok(ValidatedMove {
                quantity: request.quantity.min(source_quantity),
                def,
            });
        }

        let swap_back = request.swap_back_requested();
        let swap_ok = request.allow_swap || swap_back.is_some();
        let mut quantity = request.quantity.min(source_quantity);

        match &request.target {
            SlotAddress::Tagged(target) => {
                let moves_whole_source = quantity == source_quantity;
                let source_tag = request.source.tag();

                if self.tagged.is_blocked(target) {
                    let blocked_by_source = source_tag.is_some_and(|source| {
                        self.registry.blockers_of(target).any(|spec| &spec.tag == source)
                    });
                    if !(blocked_by_source && moves_whole_source) {
                        return Err(InventoryError::SlotBlocked(target.clone()));
                    }
                }
                if !self.registry.is_compatible(&def, target) {
                    return Err(InventoryError::SlotIncompatible {
                        item: item.clone(),
                        tag: target.clone(),
                    });
                }
                if let Some(conflict) = self.indirect_blocking_conflict(target, &def) {
                    if !(Some(&conflict) == source_tag && moves_whole_source) {
                        return Err(InventoryError::SlotBlocked(conflict));
                    }
                }

                if let Some((swap_item, swap_quantity)) = swap_back {
                    let held = self
                        .tagged
                        .item(target)
                        .filter(|o| &o.item_id == swap_item)
                        .map_or(0, |o| o.quantity);
                    if held < swap_quantity {
                        return Err(InventoryError::SwapRejected(format!(
                            "{target} holds {held} {swap_item}, {swap_quantity} requested back"
                        )));
                    }
                }
                if let Some(occupant) = self.tagged.item(target).filter(|o| &o.item_id != item) {
                    if !swap_ok {
                        return Err(InventoryError::SwapRejected(format!(
                            "{target} holds {}",
                            occupant.item_id
                        )));
                    }
                    if let SlotAddress::Tagged(source) = &request.source {
                        self.check_swap_into_source(source, occupant, moves_whole_source)?;
                    }
                }

                quantity = quantity.min(self.receivable_for_tagged(&def, target, request.quantity, true, swap_ok));
            }
            _ => {
                if let Some((swap_item, swap_quantity)) = swap_back {
                    if self.container_only(swap_item) < swap_quantity {
                        return Err(InventoryError::SwapRejected(format!(
                            "not enough {swap_item} to swap back"
                        )));
                    }
                }
                quantity = quantity.min(self.container.receivable_by_slots(
                    &def,
                    self.container_only(item),
                    swap_back.is_some(),
                ));
            }
        }

        if quantity == 0 {
            return Err(InventoryError::CapacityExceeded {
                item: item.clone(),
                requested: request.quantity,
                receivable: 0,
            });
        }

        if let (Some((swap_item, swap_quantity)), SlotAddress::Tagged(source)) = (swap_back, &request.source) {
            if request.target.is_generic() {
                if quantity < source_quantity {
                    return Err(InventoryError::SwapRejected(format!(
                        "{source} would hold two items"
                    )));
                }
                let swap_def = self.catalog.try_lookup(swap_item)?;
                let accepted = self.receivable_for_tagged(&swap_def, source, swap_quantity, false, true);
                if !self.registry.is_compatible(&swap_def, source) || accepted < swap_quantity {
                    return Err(InventoryError::SwapRejected(format!(
                        "{source} cannot take {swap_item}"
                    )));
                }
            }
        }

        Ok(ValidatedMove { quantity, def })
    }

    /// The displaced occupant of a tagged target must fit the tagged source
    fn check_swap_into_source(&self, source: &Tag, occupant: &ItemStack, moves_whole_source: bool) -> Result<()> {
        if !moves_whole_source {
            return Err(InventoryError::SwapRejected(format!(
                "{source} would hold two items"
            )));
        }
        let occupant_def = self.catalog.try_lookup(&occupant.item_id)?;
        let accepted = self.receivable_for_tagged(&occupant_def, source, occupant.quantity, false, true);
        if !self.registry.is_compatible(&occupant_def, source) || accepted < occupant.quantity {
            return Err(InventoryError::SwapRejected(format!(
                "{source} cannot take {}",
                occupant.item_id
            )));
        }
        Ok(())
    }

    fn move_tagged_to_tagged(
        &mut self,
        source: &Tag,
        target: &Tag,
        validated: &ValidatedMove,
        request: &MoveRequest,
    ) -> Result<Vec<InventoryEvent>> {
        let source_before = self.tagged.item(source).cloned();
        let target_before = self.tagged.item(target).cloned();
        let mut source_slot = source_before.clone();
        let mut target_slot = target_before.clone();

        let result = move_between_slots(
            &mut source_slot,
            &mut target_slot,
            validated.def.max_stack,
            validated.quantity,
            false,
            true,
        );
        if result.moved == 0 {
            return Err(InventoryError::CapacityExceeded {
                item: request.item.clone(),
                requested: validated.quantity,
                receivable: 0,
            });
        }

        *self.tagged.slot_mut(source) = source_slot;
        *self.tagged.slot_mut(target) = target_slot;
        self.tagged.prune();
        self.refresh_blocking_for(source);
        self.refresh_blocking_for(target);

        let moved_instances = match &source_before {
            Some(stack) if result.swapped => stack.instances.clone(),
            Some(stack) => tail(&stack.instances, result.moved),
            None => Vec::new(),
        };

        let mut events = vec![InventoryEvent::ItemRemovedFromTaggedSlot {
            tag: source.clone(),
            item: request.item.clone(),
            quantity: result.moved,
            instances: moved_instances.clone(),
            reason: ChangeReason::Moved,
        }];
        if result.swapped {
            if let Some(displaced) = &target_before {
                events.push(InventoryEvent::ItemRemovedFromTaggedSlot {
                    tag: target.clone(),
                    item: displaced.item_id.clone(),
                    quantity: displaced.quantity,
                    instances: displaced.instances.clone(),
                    reason: ChangeReason::Moved,
                });
                events.push(InventoryEvent::ItemAddedToTaggedSlot {
                    tag: source.clone(),
                    item: displaced.item_id.clone(),
                    quantity: displaced.quantity,
                    instances: displaced.instances.clone(),
                    previous: source_before.clone(),
                    reason: ChangeReason::Moved,
                });
            }
        }
        events.push(InventoryEvent::ItemAddedToTaggedSlot {
            tag: target.clone(),
            item: request.item.clone(),
            quantity: result.moved,
            instances: moved_instances,
            previous: target_before,
            reason: ChangeReason::Moved,
        });
        Ok(events)
    }

    fn move_tagged_to_container(
        &mut self,
        source: &Tag,
        validated: &ValidatedMove,
        request: &MoveRequest,
    ) -> Result<Vec<InventoryEvent>> {
        let source_before = self.tagged.item(source).cloned();
        let moved = if request.instances.is_empty() {
            self.unearmark(source, validated.quantity)
        } else {
            let slot = self.tagged.slot_mut(source);
            let taken = slot.as_mut().and_then(|s| s.take_instances(&request.instances));
            if slot.as_ref().is_some_and(|s| s.is_empty()) {
                *slot = None;
            }
            self.tagged.prune();
            taken
        };
        let moved = moved.ok_or_else(|| InventoryError::InsufficientQuantity {
            item: request.item.clone(),
            requested: validated.quantity,
            available: 0,
        })?;

        let mut events = Vec::new();
        let mut swapped_in = None;
        if let Some((swap_item, swap_quantity)) = request.swap_back_requested() {
            let swap_def = self.catalog.try_lookup(swap_item)?;
            let portion = self.earmark(&swap_def, source, swap_quantity, &[]);
            events.push(InventoryEvent::ItemRemovedFromContainer {
                item: swap_item.clone(),
                quantity: portion.quantity,
                instances: portion.instances.clone(),
                reason: ChangeReason::Moved,
            });
            swapped_in = Some(portion);
        }
        self.refresh_blocking_for(source);

        events.push(InventoryEvent::ItemRemovedFromTaggedSlot {
            tag: source.clone(),
            item: request.item.clone(),
            quantity: moved.quantity,
            instances: moved.instances.clone(),
            reason: ChangeReason::Moved,
        });
        events.push(InventoryEvent::ItemAddedToContainer {
            item: request.item.clone(),
            quantity: moved.quantity,
            instances: moved.instances,
            reason: ChangeReason::Moved,
        });
        if let Some(portion) = swapped_in {
            events.push(InventoryEvent::ItemAddedToTaggedSlot {
                tag: source.clone(),
                item: portion.item_id.clone(),
                quantity: portion.quantity,
                instances: portion.instances,
                previous: source_before,
                reason: ChangeReason::Moved,
            });
        }
        Ok(events)
    }

    fn move_container_to_tagged(
        &mut self,
        target: &Tag,
        validated: &ValidatedMove,
        request: &MoveRequest,
    ) -> Result<Vec<InventoryEvent>> {
        let previous = self.tagged.item(target).cloned();
        let mut events = Vec::new();

        if let Some(displaced) = previous.as_ref().filter(|p| p.item_id != request.item) {
            self.unearmark(target, displaced.quantity);
            self.refresh_blocking_for(target);
            events.push(InventoryEvent::ItemRemovedFromTaggedSlot {
                tag: target.clone(),
                item: displaced.item_id.clone(),
                quantity: displaced.quantity,
                instances: displaced.instances.clone(),
                reason: ChangeReason::Moved,
            });
            events.push(InventoryEvent::ItemAddedToContainer {
                item: displaced.item_id.clone(),
                quantity: displaced.quantity,
                instances: displaced.instances.clone(),
                reason: ChangeReason::Moved,
            });
        }

        let portion = self.earmark(&validated.def, target, validated.quantity, &request.instances);
        events.push(InventoryEvent::ItemRemovedFromContainer {
            item: request.item.clone(),
            quantity: portion.quantity,
            instances: portion.instances.clone(),
            reason: ChangeReason::Moved,
        });
        events.push(InventoryEvent::ItemAddedToTaggedSlot {
            tag: target.clone(),
            item: request.item.clone(),
            quantity: portion.quantity,
            instances: portion.instances,
            previous,
            reason: ChangeReason::Moved,
        });
        Ok(events)
    }

    /// Move units into another inventory; leftovers return here or drop
    pub fn move_to_inventory(
        &mut self,
        target: &mut Inventory,
        item: &ItemId,
        quantity: u32,
        source_tag: Option<&Tag>,
        target_tag: Option<&Tag>,
    ) -> u32 {
        sentinel(
            "move_to_inventory",
            self.try_move_to_inventory(target, item, quantity, source_tag, target_tag),
        )
    }

    /// Fallible [`Inventory::move_to_inventory`]
    pub fn try_move_to_inventory(
        &mut self,
        target: &mut Inventory,
        item: &ItemId,
        quantity: u32,
        source_tag: Option<&Tag>,
        target_tag: Option<&Tag>,
    ) -> Result<u32> {
        self.ensure_authority("move_to_inventory")?;
        target.ensure_authority("move_to_inventory")?;
        let def = self.catalog.try_lookup(item)?;

        let available = match source_tag {
            Some(tag) => self
                .tagged
                .item(tag)
                .filter(|s| &s.item_id == item)
                .map_or(0, |s| s.quantity),
            None => self.container.quantity(item),
        };
        let mut receivable = target.receivable_total(&def, quantity, false);
        if let Some(tag) = target_tag {
            receivable = receivable.min(target.receivable_for_tagged(&def, tag, quantity, true, false));
        }
        let amount = quantity.min(available).min(receivable);
        if amount == 0 {
            return Err(InventoryError::CapacityExceeded {
                item: item.clone(),
                requested: quantity,
                receivable,
            });
        }

        let stack = match source_tag {
            Some(tag) => self.extract_from_tagged_internal(tag, item, amount, ChangeReason::Transferred)?,
            None => self.extract_internal(item, amount, &[], ChangeReason::Transferred, false)?,
        };
        let mut held = HeldStack::new(stack);

        let received = match target_tag {
            Some(tag) => target.add_to_tagged_internal(&mut held, tag, item, amount, true, false, ChangeReason::Transferred),
            None => target.add_item_internal(
                &mut held,
                item,
                amount,
                true,
                PlacementPolicy::PreferGeneric,
                ChangeReason::Transferred,
            ),
        }
        .unwrap_or_else(|err| {
            err.log("move_to_inventory");
            0
        });

        let leftover = held.quantity();
        if leftover > 0 {
            let returned = self
                .add_item_internal(&mut held, item, leftover, true, PlacementPolicy::PreferGeneric, ChangeReason::Added)
                .unwrap_or(0);
            log::debug!("Returned {returned} of {leftover} {item} after transfer");
            if let Some(rest) = held.take() {
                let location = self.drop_origin.in_front(self.config.default_drop_distance);
                self.drop_sink.spawn(rest, location);
            }
        }
        Ok(received)
    }
}

fn tail(instances: &[InstanceId], count: u32) -> Vec<InstanceId> {
    let at = instances.len().saturating_sub(count as usize);
    instances[at..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::Authority;
    use crate::catalog::ItemCatalog;
    use crate::config::InventoryConfig;
    use crate::events::drain;
    use crate::tagged::UniversalSlotSpec;
    use crate::world::{CollectingDropSink, UnlimitedSource};

    fn catalog() -> Arc<ItemCatalog> {
        Arc::new(ItemCatalog::from_definitions([
            ItemDefinition::new("rock", "Rock"),
            ItemDefinition::new("helmet", "Helmet")
                .with_max_stack(1)
                .with_category("Armor.Helmet"),
            ItemDefinition::new("spear", "Spear")
                .with_max_stack(1)
                .with_category("TwoHanded"),
            ItemDefinition::new("shield", "Shield").with_max_stack(1),
        ]))
    }

    fn config(max_slots: u32) -> InventoryConfig {
        InventoryConfig::default()
            .with_max_slots(max_slots)
            .with_specialized_slot("Armor.Helmet")
            .with_universal_slot(
                UniversalSlotSpec::new("Hand.Right")
                    .blocking("Hand.Left", Some(Tag::new("TwoHanded")))
                    .exclusive("TwoHanded"),
            )
            .with_universal_slot(UniversalSlotSpec::new("Hand.Left"))
    }

    fn inventory(max_slots: u32) -> Inventory {
        Inventory::new(config(max_slots), catalog(), Arc::new(Authority::Server))
    }

    fn give(inv: &mut Inventory, item: &str, quantity: u32) {
        let mut source = UnlimitedSource::new(inv.catalog().clone());
        inv.add_item(&mut source, &ItemId::new(item), quantity, true, PlacementPolicy::PreferGeneric);
    }

    fn equip(inv: &mut Inventory, tag: &str, item: &str, quantity: u32) {
        let mut source = UnlimitedSource::new(inv.catalog().clone());
        inv.add_item_to_tagged_slot(&mut source, &Tag::new(tag), &ItemId::new(item), quantity, false, false);
    }

    fn to_tag(item: &str, quantity: u32, tag: &str) -> MoveRequest {
        MoveRequest::new(item, quantity, SlotAddress::Generic(0), SlotAddress::Tagged(Tag::new(tag)))
    }

    #[test]
    fn test_generic_to_tagged_frees_slot() {
        let mut inv = inventory(10);
        give(&mut inv, "rock", 5);
        assert_eq!(inv.get_used_slot_count(), 1);
        let rx = inv.subscribe();

        assert_eq!(inv.move_item(&to_tag("rock", 5, "Hand.Left")), 5);
        assert_eq!(inv.get_used_slot_count(), 0);
        assert_eq!(inv.get_item_count(&ItemId::new("rock")), 5);
        assert_eq!(inv.get_item_for_tagged_slot(&Tag::new("Hand.Left")).unwrap().quantity, 5);

        let events = drain(&rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], InventoryEvent::ItemRemovedFromContainer { quantity: 5, reason: ChangeReason::Moved, .. }));
        assert!(matches!(events[1], InventoryEvent::ItemAddedToTaggedSlot { quantity: 5, previous: None, .. }));
    }

    #[test]
    fn test_blocked_target_rejected() {
        let mut inv = inventory(10);
        equip(&mut inv, "Hand.Right", "spear", 1);
        give(&mut inv, "rock", 3);
        let before = inv.snapshot();

        let request = to_tag("rock", 3, "Hand.Left");
        assert!(matches!(inv.try_move_item(&request), Err(InventoryError::SlotBlocked(_))));
        assert_eq!(inv.validate_move(&request), 0);
        assert_eq!(inv.snapshot(), before);
    }

    #[test]
    fn test_blocking_item_needs_empty_target() {
        let mut inv = inventory(10);
        equip(&mut inv, "Hand.Left", "shield", 1);
        give(&mut inv, "spear", 1);

        let request = to_tag("spear", 1, "Hand.Right");
        assert!(matches!(
            inv.try_move_item(&request),
            Err(InventoryError::SlotBlocked(tag)) if tag == Tag::new("Hand.Left")
        ));
    }

    #[test]
    fn test_validate_does_not_mutate() {
        let mut inv = inventory(10);
        give(&mut inv, "rock", 4);
        let before = inv.snapshot();
        assert_eq!(inv.validate_move(&to_tag("rock", 9, "Hand.Left")), 4);
        assert_eq!(inv.snapshot(), before);
    }

    #[test]
    fn test_tagged_to_container() {
        let mut inv = inventory(10);
        equip(&mut inv, "Hand.Left", "rock", 4);
        let request = MoveRequest::new("rock", 3, SlotAddress::Tagged(Tag::new("Hand.Left")), SlotAddress::Container);
        assert_eq!(inv.move_item(&request), 3);
        assert_eq!(inv.get_container_only_item_count(&ItemId::new("rock")), 3);
        assert_eq!(inv.get_item_for_tagged_slot(&Tag::new("Hand.Left")).unwrap().quantity, 1);
    }

    #[test]
    fn test_tagged_to_container_respects_slot_limit() {
        let mut inv = inventory(1);
        give(&mut inv, "rock", 5);
        equip(&mut inv, "Hand.Left", "shield", 1);
        let request = MoveRequest::new("shield", 1, SlotAddress::Tagged(Tag::new("Hand.Left")), SlotAddress::Container);
        assert!(matches!(inv.try_move_item(&request), Err(InventoryError::CapacityExceeded { .. })));
        assert!(inv.get_item_for_tagged_slot(&Tag::new("Hand.Left")).is_some());
    }

    #[test]
    fn test_swap_back_from_container() {
        let mut inv = inventory(10);
        equip(&mut inv, "Hand.Left", "shield", 1);
        give(&mut inv, "rock", 2);
        let rx = inv.subscribe();

        let request = MoveRequest::new("shield", 1, SlotAddress::Tagged(Tag::new("Hand.Left")), SlotAddress::Container)
            .with_swap_back("rock", 2);
        assert_eq!(inv.move_item(&request), 1);
        assert_eq!(inv.get_item_for_tagged_slot(&Tag::new("Hand.Left")), Some(&ItemStack::new("rock", 2)));
        assert_eq!(inv.get_container_only_item_count(&ItemId::new("shield")), 1);
        assert_eq!(inv.get_container_only_item_count(&ItemId::new("rock")), 0);
        assert_eq!(drain(&rx).len(), 4);
    }

    #[test]
    fn test_swap_back_must_match_target_occupant() {
        let mut inv = inventory(10);
        equip(&mut inv, "Hand.Left", "shield", 1);
        give(&mut inv, "rock", 3);
        let before = inv.snapshot();
        let rx = inv.subscribe();

        let wrong_item = to_tag("rock", 3, "Hand.Left").with_swap_back("helmet", 5);
        assert!(matches!(inv.try_move_item(&wrong_item), Err(InventoryError::SwapRejected(_))));
        let too_many = to_tag("rock", 3, "Hand.Left").with_swap_back("shield", 2);
        assert_eq!(inv.move_item(&too_many), 0);
        assert_eq!(inv.snapshot(), before);
        assert!(drain(&rx).is_empty());

        let matching = to_tag("rock", 3, "Hand.Left").with_swap_back("shield", 1);
        assert_eq!(inv.move_item(&matching), 3);
        assert_eq!(inv.get_item_for_tagged_slot(&Tag::new("Hand.Left")), Some(&ItemStack::new("rock", 3)));
        assert_eq!(inv.get_container_only_item_count(&ItemId::new("shield")), 1);
    }

    #[test]
    fn test_swap_between_tagged_slots() {
        let mut inv = inventory(10);
        equip(&mut inv, "Hand.Left", "shield", 1);
        equip(&mut inv, "Hand.Right", "rock", 3);

        let request = MoveRequest::new(
            "rock",
            3,
            SlotAddress::Tagged(Tag::new("Hand.Right")),
            SlotAddress::Tagged(Tag::new("Hand.Left")),
        );
        assert_eq!(inv.move_item(&request), 3);
        assert_eq!(inv.get_item_for_tagged_slot(&Tag::new("Hand.Left")), Some(&ItemStack::new("rock", 3)));
        assert_eq!(inv.get_item_for_tagged_slot(&Tag::new("Hand.Right")), Some(&ItemStack::new("shield", 1)));
    }

    #[test]
    fn test_swap_rejected_when_source_cannot_take_occupant() {
        let mut inv = inventory(10);
        equip(&mut inv, "Hand.Right", "spear", 1);
        equip(&mut inv, "Armor.Helmet", "helmet", 1);
        let before = inv.snapshot();

        // The displaced spear would have to go into the helmet slot
        let request = MoveRequest::new(
            "helmet",
            1,
            SlotAddress::Tagged(Tag::new("Armor.Helmet")),
            SlotAddress::Tagged(Tag::new("Hand.Right")),
        );
        assert!(matches!(inv.try_move_item(&request), Err(InventoryError::SwapRejected(_))));
        assert_eq!(inv.snapshot(), before);
    }

    #[test]
    fn test_without_swap_rejects_occupied_target() {
        let mut inv = inventory(10);
        equip(&mut inv, "Hand.Left", "shield", 1);
        give(&mut inv, "rock", 1);
        let request = to_tag("rock", 1, "Hand.Left").without_swap();
        assert!(matches!(inv.try_move_item(&request), Err(InventoryError::SwapRejected(_))));
    }

    #[test]
    fn test_swap_into_full_container_rolls_back() {
        let mut inv = inventory(1);
        equip(&mut inv, "Hand.Left", "shield", 1);
        give(&mut inv, "rock", 5);
        let before = inv.snapshot();
        let rx = inv.subscribe();

        // Moving 4 rocks leaves 1 generic rock while the displaced shield needs a slot
        let request = to_tag("rock", 4, "Hand.Left");
        assert!(matches!(inv.try_move_item(&request), Err(InventoryError::CapacityExceeded { .. })));
        assert_eq!(inv.snapshot(), before);
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_moving_blocker_into_blocked_slot() {
        let mut inv = inventory(10);
        let config = config(10).with_universal_slot(UniversalSlotSpec::new("Back").blocking("Hand.Left", None));
        let mut back = Inventory::new(config, catalog(), Arc::new(Authority::Server));
        equip(&mut back, "Back", "shield", 1);
        assert!(back.is_tagged_slot_blocked(&Tag::new("Hand.Left")));

        let request = MoveRequest::new(
            "shield",
            1,
            SlotAddress::Tagged(Tag::new("Back")),
            SlotAddress::Tagged(Tag::new("Hand.Left")),
        );
        assert_eq!(back.move_item(&request), 1);
        assert!(!back.is_tagged_slot_blocked(&Tag::new("Hand.Left")));

        give(&mut inv, "rock", 1);
        assert_eq!(inv.move_item(&MoveRequest::new("rock", 1, SlotAddress::Generic(0), SlotAddress::Generic(3))), 1);
    }

    #[test]
    fn test_client_move_rejected() {
        let mut inv = Inventory::new(config(10), catalog(), Arc::new(Authority::Client));
        assert_eq!(inv.move_item(&to_tag("rock", 1, "Hand.Left")), 0);
    }

    #[test]
    fn test_move_between_inventories() {
        let mut chest = inventory(10);
        let mut player = inventory(10);
        give(&mut chest, "rock", 8);

        assert_eq!(chest.move_to_inventory(&mut player, &ItemId::new("rock"), 6, None, None), 6);
        assert_eq!(chest.get_item_count(&ItemId::new("rock")), 2);
        assert_eq!(player.get_item_count(&ItemId::new("rock")), 6);

        let moved = chest.move_to_inventory(&mut player, &ItemId::new("rock"), 2, None, Some(&Tag::new("Hand.Left")));
        assert_eq!(moved, 2);
        assert_eq!(player.get_item_for_tagged_slot(&Tag::new("Hand.Left")).unwrap().quantity, 2);
    }

    #[test]
    fn test_move_between_inventories_caps_by_target() {
        let sink = Arc::new(CollectingDropSink::new());
        let mut chest = inventory(10).with_drop_sink(sink.clone());
        let mut player = Inventory::new(InventoryConfig::default().with_max_slots(1), catalog(), Arc::new(Authority::Server));
        give(&mut chest, "rock", 8);

        assert_eq!(chest.move_to_inventory(&mut player, &ItemId::new("rock"), 8, None, None), 5);
        assert_eq!(chest.get_item_count(&ItemId::new("rock")), 3);
        assert_eq!(sink.spawned_quantity(&ItemId::new("rock")), 0);
    }
}
