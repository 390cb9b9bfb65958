//! Client requests
//!
//! Requests are what a client sends to the authority after predicting an
//! operation locally. They name slots by tag and never carry instance data.

use crate::crafting::RecipeId;
use crate::error::{sentinel, InventoryError, Result};
use crate::inventory::Inventory;
use crate::item::{ItemId, SlotAddress};
use crate::planner::PlacementPolicy;
use crate::tag::Tag;
use crate::transfer::MoveRequest;
use crate::world::WorldItem;
use serde::{Deserialize, Serialize};

/// An operation requested by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InventoryRequest {
    /// Move between generic storage (`None`) and tagged slots
    MoveItem {
        item: ItemId,
        quantity: u32,
        source: Option<Tag>,
        target: Option<Tag>,
        #[serde(default)]
        swap_item: Option<ItemId>,
        #[serde(default)]
        swap_quantity: u32,
    },
    DropItem {
        item: ItemId,
        quantity: u32,
    },
    DropFromTaggedSlot {
        tag: Tag,
        quantity: u32,
    },
    UseItem {
        item: ItemId,
        #[serde(default)]
        tag: Option<Tag>,
    },
    Pickup {
        world_item: u64,
        #[serde(default)]
        policy: PlacementPolicy,
    },
    Craft {
        recipe: RecipeId,
    },
}

impl InventoryRequest {
    /// Encode for the wire
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from the wire
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Move request equivalent of a `MoveItem`
    pub fn move_request(&self) -> Option<MoveRequest> {
        let Self::MoveItem {
            item,
            quantity,
            source,
            target,
            swap_item,
            swap_quantity,
        } = self
        else {
            return None;
        };
        let address = |tag: &Option<Tag>| match tag {
            Some(tag) => SlotAddress::Tagged(tag.clone()),
            None => SlotAddress::Container,
        };
        let mut request = MoveRequest::new(item.clone(), *quantity, address(source), address(target));
        if let Some(swap_item) = swap_item {
            request = request.with_swap_back(swap_item.clone(), *swap_quantity);
        }
        Some(request)
    }
}

impl Inventory {
    /// Apply a client request on the authority; returns units affected
    ///
    /// `world_items` is searched for pickup targets.
    pub fn apply_request(&mut self, request: &InventoryRequest, world_items: &mut [WorldItem]) -> u32 {
        sentinel("apply_request", self.try_apply_request(request, world_items))
    }

    /// Fallible [`Inventory::apply_request`]
    pub fn try_apply_request(&mut self, request: &InventoryRequest, world_items: &mut [WorldItem]) -> Result<u32> {
        log::trace!("Applying {request:?}");
        match request {
            InventoryRequest::MoveItem { .. } => {
                let Some(move_request) = request.move_request() else {
                    return Ok(0);
                };
                self.try_move_item(&move_request)
            }
            InventoryRequest::DropItem { item, quantity } => self.try_drop_item(item, *quantity, None),
            InventoryRequest::DropFromTaggedSlot { tag, quantity } => {
                self.try_drop_from_tagged_slot(tag, *quantity, None)
            }
            InventoryRequest::UseItem { item, tag } => self.try_use_item(item, tag.as_ref()),
            InventoryRequest::Pickup { world_item, policy } => {
                let target = world_items
                    .iter_mut()
                    .find(|w| w.id == *world_item)
                    .ok_or_else(|| InventoryError::InvalidSlotReference(format!("world item {world_item}")))?;
                let Some((item, quantity)) = target.represented().map(|(i, q)| (i.clone(), q)) else {
                    return Ok(0);
                };
                self.try_add_item(target, &item, quantity, true, *policy)
            }
            InventoryRequest::Craft { recipe } => self.try_craft_recipe(recipe).map(|_| 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::Authority;
    use crate::catalog::{ItemCatalog, ItemDefinition};
    use crate::config::InventoryConfig;
    use crate::item::ItemStack;
    use crate::tagged::UniversalSlotSpec;
    use std::sync::Arc;

    fn inventory() -> Inventory {
        let catalog = Arc::new(ItemCatalog::from_definitions([ItemDefinition::new("rock", "Rock")]));
        let config = InventoryConfig::default().with_universal_slot(UniversalSlotSpec::new("Hand.Left"));
        Inventory::new(config, catalog, Arc::new(Authority::Server))
    }

    #[test]
    fn test_json_wire_format() {
        let request = InventoryRequest::MoveItem {
            item: ItemId::new("rock"),
            quantity: 3,
            source: None,
            target: Some(Tag::new("Hand.Left")),
            swap_item: None,
            swap_quantity: 0,
        };
        let json = request.to_json().unwrap();
        assert!(json.contains("\"type\":\"MoveItem\""));
        assert_eq!(InventoryRequest::from_json(&json).unwrap(), request);
    }

    #[test]
    fn test_pickup_request() {
        let mut inv = inventory();
        let mut world = vec![WorldItem::new(ItemStack::new("rock", 4), [0.0; 3])];
        let request = InventoryRequest::Pickup {
            world_item: world[0].id,
            policy: PlacementPolicy::PreferTagged,
        };

        assert_eq!(inv.apply_request(&request, &mut world), 4);
        assert!(world[0].is_depleted());
        assert_eq!(inv.get_item_for_tagged_slot(&Tag::new("Hand.Left")).unwrap().quantity, 4);
    }

    #[test]
    fn test_unknown_world_item() {
        let mut inv = inventory();
        let request = InventoryRequest::Pickup {
            world_item: u64::MAX,
            policy: PlacementPolicy::PreferGeneric,
        };
        assert!(matches!(
            inv.try_apply_request(&request, &mut []),
            Err(InventoryError::InvalidSlotReference(_))
        ));
    }
}
