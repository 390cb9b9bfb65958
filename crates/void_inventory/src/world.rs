//! Item sources and world drops
//!
//! Items enter an inventory by being extracted from an [`ItemSource`] and
//! leave it into the world through a [`WorldDropSink`]. A dropped item is a
//! new [`WorldItem`] with no link back to the inventory it came from.

use crate::catalog::ItemCatalog;
use crate::item::{take_from, ItemId, ItemStack};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Something items can be pulled from
pub trait ItemSource {
    /// Remove up to `quantity` of `item`; `None` when nothing is available
    fn extract(&mut self, item: &ItemId, quantity: u32) -> Option<ItemStack>;
}

/// Source that creates items on demand (crafting output, cheats, tests)
#[derive(Debug, Clone)]
pub struct UnlimitedSource {
    catalog: Arc<ItemCatalog>,
}

impl UnlimitedSource {
    /// Create a source minting items known to `catalog`
    pub fn new(catalog: Arc<ItemCatalog>) -> Self {
        Self { catalog }
    }
}

impl ItemSource for UnlimitedSource {
    fn extract(&mut self, item: &ItemId, quantity: u32) -> Option<ItemStack> {
        let def = self.catalog.lookup(item)?;
        if quantity == 0 {
            return None;
        }
        if def.uses_instances {
            Some(ItemStack::with_instances(
                item.clone(),
                self.catalog.allocate_instances(quantity),
            ))
        } else {
            Some(ItemStack::new(item.clone(), quantity))
        }
    }
}

/// A stack in transit between two inventories
#[derive(Debug, Clone, Default)]
pub struct HeldStack(pub Option<ItemStack>);

impl HeldStack {
    /// Wrap a stack
    pub fn new(stack: ItemStack) -> Self {
        Self(Some(stack))
    }

    /// Units still held
    pub fn quantity(&self) -> u32 {
        self.0.as_ref().map_or(0, |s| s.quantity)
    }

    /// Take what is left
    pub fn take(&mut self) -> Option<ItemStack> {
        self.0.take()
    }
}

impl ItemSource for HeldStack {
    fn extract(&mut self, item: &ItemId, quantity: u32) -> Option<ItemStack> {
        if self.0.as_ref()?.item_id != *item {
            return None;
        }
        take_from(&mut self.0, quantity)
    }
}

static NEXT_WORLD_ITEM: AtomicU64 = AtomicU64::new(1);

/// A stack lying in the world
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldItem {
    /// Unique id, used by pickup requests
    pub id: u64,
    /// Item stack to pick up; `None` once fully picked up
    pub item: Option<ItemStack>,
    /// World position
    pub position: [f32; 3],
}

impl WorldItem {
    /// Create a world item
    pub fn new(item: ItemStack, position: [f32; 3]) -> Self {
        Self {
            id: NEXT_WORLD_ITEM.fetch_add(1, Ordering::Relaxed),
            item: Some(item),
            position,
        }
    }

    /// Whether everything was picked up
    pub fn is_depleted(&self) -> bool {
        self.item.is_none()
    }

    /// Represented item and quantity
    pub fn represented(&self) -> Option<(&ItemId, u32)> {
        self.item.as_ref().map(|s| (&s.item_id, s.quantity))
    }
}

impl ItemSource for WorldItem {
    fn extract(&mut self, item: &ItemId, quantity: u32) -> Option<ItemStack> {
        if self.item.as_ref()?.item_id != *item {
            return None;
        }
        take_from(&mut self.item, quantity)
    }
}

/// Receives items leaving an inventory into the world
pub trait WorldDropSink: Send + Sync {
    /// Spawn a world representation; fire-and-forget
    fn spawn(&self, stack: ItemStack, location: [f32; 3]);
}

/// Sink that discards drops
#[derive(Debug, Default)]
pub struct DiscardDropSink;

impl WorldDropSink for DiscardDropSink {
    fn spawn(&self, stack: ItemStack, _location: [f32; 3]) {
        log::debug!("Discarding drop of {} x{}", stack.item_id, stack.quantity);
    }
}

/// Sink that keeps spawned world items for a host to collect
#[derive(Debug, Default)]
pub struct CollectingDropSink {
    spawned: Mutex<Vec<WorldItem>>,
}

impl CollectingDropSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every world item spawned so far
    pub fn take_spawned(&self) -> Vec<WorldItem> {
        std::mem::take(&mut *self.spawned.lock())
    }

    /// Quantity of an item spawned and not yet taken
    pub fn spawned_quantity(&self, item: &ItemId) -> u32 {
        self.spawned
            .lock()
            .iter()
            .filter_map(|w| w.item.as_ref())
            .filter(|s| &s.item_id == item)
            .map(|s| s.quantity)
            .sum()
    }
}

impl WorldDropSink for CollectingDropSink {
    fn spawn(&self, stack: ItemStack, location: [f32; 3]) {
        self.spawned.lock().push(WorldItem::new(stack, location));
    }
}

/// Owner placement used to position drops
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DropOrigin {
    /// Owner position
    pub position: [f32; 3],
    /// Owner facing, normalized
    pub forward: [f32; 3],
}

impl Default for DropOrigin {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            forward: [1.0, 0.0, 0.0],
        }
    }
}

impl DropOrigin {
    /// Point `distance` in front of the owner
    pub fn in_front(&self, distance: f32) -> [f32; 3] {
        [
            self.position[0] + self.forward[0] * distance,
            self.position[1] + self.forward[1] * distance,
            self.position[2] + self.forward[2] * distance,
        ]
    }

    /// `count` points evenly spaced on a horizontal circle around the owner
    pub fn ring(&self, count: usize, radius: f32) -> Vec<[f32; 3]> {
        if count == 0 {
            return Vec::new();
        }
        let step = std::f32::consts::TAU / count as f32;
        (0..count)
            .map(|i| {
                let angle = step * i as f32;
                [
                    self.position[0] + angle.cos() * radius,
                    self.position[1],
                    self.position[2] + angle.sin() * radius,
                ]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ItemDefinition;

    #[test]
    fn test_unlimited_source_mints_instances() {
        let catalog = Arc::new(ItemCatalog::from_definitions([
            ItemDefinition::new("sword", "Sword").with_max_stack(1).with_instances(),
            ItemDefinition::new("rock", "Rock"),
        ]));
        let mut source = UnlimitedSource::new(catalog);

        let swords = source.extract(&ItemId::new("sword"), 2).unwrap();
        assert_eq!(swords.instances.len(), 2);
        let rocks = source.extract(&ItemId::new("rock"), 3).unwrap();
        assert!(rocks.instances.is_empty());
        assert!(source.extract(&ItemId::new("ghost"), 1).is_none());
    }

    #[test]
    fn test_world_item_depletes() {
        let mut world = WorldItem::new(ItemStack::new("rock", 4), [0.0; 3]);
        assert!(world.extract(&ItemId::new("stick"), 1).is_none());
        assert_eq!(world.extract(&ItemId::new("rock"), 3).unwrap().quantity, 3);
        assert!(!world.is_depleted());
        assert_eq!(world.extract(&ItemId::new("rock"), 3).unwrap().quantity, 1);
        assert!(world.is_depleted());
    }

    #[test]
    fn test_ring_positions() {
        let origin = DropOrigin::default();
        let ring = origin.ring(4, 100.0);
        assert_eq!(ring.len(), 4);
        assert!((ring[0][0] - 100.0).abs() < 1e-3);
        assert!((ring[1][2] - 100.0).abs() < 1e-3);
        assert_eq!(origin.in_front(100.0), [100.0, 0.0, 0.0]);
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingDropSink::new();
        sink.spawn(ItemStack::new("rock", 2), [0.0; 3]);
        sink.spawn(ItemStack::new("rock", 1), [1.0; 3]);
        assert_eq!(sink.spawned_quantity(&ItemId::new("rock")), 3);
        assert_eq!(sink.take_spawned().len(), 2);
    }
}
