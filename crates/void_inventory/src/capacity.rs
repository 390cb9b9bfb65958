//! Capacity accounting for generic storage
//!
//! The container holds one aggregated stack per item id. Its totals include
//! items earmarked by tagged slots; slot usage counts only the container-only
//! share, packed into stacks of the item's max stack size.

use crate::catalog::{ItemCatalog, ItemDefinition};
use crate::config::InventoryConfig;
use crate::item::{InstanceId, ItemId, ItemStack};
use crate::tagged::TaggedSlotSet;
use serde::{Deserialize, Serialize};

/// Generic item storage with weight and slot limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    /// One stack per item id, in arrival order
    stacks: Vec<ItemStack>,
    /// Maximum weight
    max_weight: f32,
    /// Maximum number of generic slots
    max_slot_count: u32,
    /// Footprint mode
    jigsaw_mode: bool,
    /// Cached weight of everything held
    #[serde(skip)]
    current_weight: f32,
    /// Cached generic slot usage
    #[serde(skip)]
    used_slot_count: u32,
}

impl Container {
    /// Create an empty container
    pub fn new(max_weight: f32, max_slot_count: u32, jigsaw_mode: bool) -> Self {
        Self {
            stacks: Vec::new(),
            max_weight,
            max_slot_count,
            jigsaw_mode,
            current_weight: 0.0,
            used_slot_count: 0,
        }
    }

    /// Create from configuration limits
    pub fn from_config(config: &InventoryConfig) -> Self {
        Self::new(config.max_weight, config.max_slot_count, config.jigsaw_mode)
    }

    /// All stacks
    pub fn stacks(&self) -> &[ItemStack] {
        &self.stacks
    }

    /// Stack of an item
    pub fn stack(&self, item: &ItemId) -> Option<&ItemStack> {
        self.stacks.iter().find(|s| &s.item_id == item)
    }

    /// Total held of an item, tagged share included
    pub fn quantity(&self, item: &ItemId) -> u32 {
        self.stack(item).map_or(0, |s| s.quantity)
    }

    /// Cached weight
    pub fn current_weight(&self) -> f32 {
        self.current_weight
    }

    /// Maximum weight
    pub fn max_weight(&self) -> f32 {
        self.max_weight
    }

    /// Cached slot usage
    pub fn used_slot_count(&self) -> u32 {
        self.used_slot_count
    }

    /// Maximum slots
    pub fn max_slot_count(&self) -> u32 {
        self.max_slot_count
    }

    /// Footprint mode
    pub fn jigsaw_mode(&self) -> bool {
        self.jigsaw_mode
    }

    /// Whether nothing is held
    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    pub(crate) fn insert(&mut self, stack: ItemStack) {
        if stack.is_empty() {
            return;
        }
        match self.stacks.iter_mut().find(|s| s.item_id == stack.item_id) {
            Some(existing) => {
                existing.merge(stack);
            }
            None => self.stacks.push(stack),
        }
    }

    pub(crate) fn remove(&mut self, item: &ItemId, quantity: u32) -> Option<ItemStack> {
        let idx = self.stacks.iter().position(|s| &s.item_id == item)?;
        let taken = self.stacks[idx].take(quantity);
        if self.stacks[idx].is_empty() {
            self.stacks.remove(idx);
        }
        taken
    }

    pub(crate) fn remove_instances(&mut self, item: &ItemId, instances: &[InstanceId]) -> Option<ItemStack> {
        let idx = self.stacks.iter().position(|s| &s.item_id == item)?;
        let taken = self.stacks[idx].take_instances(instances);
        if self.stacks[idx].is_empty() {
            self.stacks.remove(idx);
        }
        taken
    }

    pub(crate) fn clear(&mut self) -> Vec<ItemStack> {
        std::mem::take(&mut self.stacks)
    }

    /// Recompute cached weight and slot usage
    pub fn update_weight_and_slots(&mut self, catalog: &ItemCatalog, tagged: &TaggedSlotSet) {
        let mut weight = 0.0;
        let mut slots: u64 = 0;
        for stack in &self.stacks {
            let Some(def) = catalog.lookup(&stack.item_id) else {
                log::warn!("No definition for held item {}", stack.item_id);
                continue;
            };
            weight += def.unit_weight * stack.quantity as f32;
            let generic = stack.quantity.saturating_sub(tagged.quantity_of(&stack.item_id));
            slots += stacks_needed(generic, def.max_stack) as u64
                * def.slots_per_stack(self.jigsaw_mode) as u64;
        }
        self.current_weight = weight;
        self.used_slot_count = slots.min(u32::MAX as u64) as u32;
        if self.used_slot_count > self.max_slot_count {
            log::warn!(
                "Slot usage {} above maximum {}",
                self.used_slot_count,
                self.max_slot_count
            );
        }
    }

    /// Additional units the weight limit allows
    pub fn receivable_by_weight(&self, def: &ItemDefinition) -> u32 {
        if def.unit_weight <= 0.0 {
            return u32::MAX;
        }
        let free = (self.max_weight - self.current_weight).max(0.0);
        // Tolerance for float division landing just below a whole unit
        ((free / def.unit_weight) + 1e-4).floor() as u32
    }

    /// Additional units the slot limit allows, given the item's generic quantity
    pub fn receivable_by_slots(&self, def: &ItemDefinition, contained_generic: u32, swapback: bool) -> u32 {
        let max_stack = def.max_stack.max(1) as u64;
        let contained = contained_generic as u64;
        let remainder = if max_stack > 1 && contained % max_stack != 0 {
            max_stack - contained % max_stack
        } else {
            0
        };
        let free = self.max_slot_count.saturating_sub(self.used_slot_count) as u64;
        let per_stack = def.slots_per_stack(self.jigsaw_mode).max(1) as u64;
        let mut receivable = (free / per_stack) * max_stack + remainder;
        if swapback && receivable == 0 {
            receivable = max_stack;
        }
        receivable.min(u32::MAX as u64) as u32
    }

    /// Packed generic layout: first stack position and stack count per item
    pub fn packed_layout(&self, catalog: &ItemCatalog, tagged: &TaggedSlotSet) -> Vec<(ItemId, u32, u32)> {
        let mut next = 0;
        self.stacks
            .iter()
            .map(|stack| {
                let max_stack = catalog.lookup(&stack.item_id).map_or(1, |d| d.max_stack);
                let generic = stack.quantity.saturating_sub(tagged.quantity_of(&stack.item_id));
                let count = stacks_needed(generic, max_stack);
                let entry = (stack.item_id.clone(), next, count);
                next += count;
                entry
            })
            .collect()
    }
}

/// Stacks needed to hold `quantity` units
pub fn stacks_needed(quantity: u32, max_stack: u32) -> u32 {
    quantity.div_ceil(max_stack.max(1))
}
