//! Client-side inventory mirror
//!
//! The mirror is what a client shows: a fixed grid of generic stacks plus the
//! tagged slots. It carries quantities only; instance data stays on the
//! authority. Operations that cannot be applied return
//! [`InventoryError::PredictionDesync`] and leave the mirror unchanged.

use crate::error::{InventoryError, Result};
use crate::inventory::InventorySnapshot;
use crate::item::{ItemId, ItemStack};
use crate::tag::Tag;
use crate::tagged::TaggedStack;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Grid positions to try first when applying a change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GridHints {
    /// Drain this grid slot first on removal
    pub remove_from: Option<usize>,
    /// Fill this grid slot first on addition
    pub add_to: Option<usize>,
}

/// Client view of an inventory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMirror {
    grid: Vec<Option<ItemStack>>,
    tagged: BTreeMap<Tag, Option<ItemStack>>,
}

impl InventoryMirror {
    /// Empty mirror with `grid_slots` grid cells and the given tagged slots
    pub fn new(grid_slots: usize, tags: impl IntoIterator<Item = Tag>) -> Self {
        Self {
            grid: vec![None; grid_slots],
            tagged: tags.into_iter().map(|tag| (tag, None)).collect(),
        }
    }

    pub fn grid(&self) -> &[Option<ItemStack>] {
        &self.grid
    }

    pub fn grid_slot(&self, index: usize) -> Option<&ItemStack> {
        self.grid.get(index).and_then(|slot| slot.as_ref())
    }

    pub fn tagged_item(&self, tag: &Tag) -> Option<&ItemStack> {
        self.tagged.get(tag).and_then(|slot| slot.as_ref())
    }

    pub fn tagged_slots(&self) -> impl Iterator<Item = (&Tag, Option<&ItemStack>)> {
        self.tagged.iter().map(|(tag, slot)| (tag, slot.as_ref()))
    }

    /// First empty grid cell
    pub fn first_empty_grid_slot(&self) -> Option<usize> {
        self.grid.iter().position(|slot| slot.is_none())
    }

    /// Quantity in the grid
    pub fn grid_quantity_of(&self, item: &ItemId) -> u32 {
        self.grid
            .iter()
            .flatten()
            .filter(|s| &s.item_id == item)
            .map(|s| s.quantity)
            .sum()
    }

    /// Quantity in tagged slots
    pub fn tagged_quantity_of(&self, item: &ItemId) -> u32 {
        self.tagged
            .values()
            .flatten()
            .filter(|s| &s.item_id == item)
            .map(|s| s.quantity)
            .sum()
    }

    /// Totals per item, grid and tagged slots together
    pub fn totals(&self) -> BTreeMap<ItemId, u32> {
        let mut totals = BTreeMap::new();
        for stack in self.grid.iter().flatten().chain(self.tagged.values().flatten()) {
            *totals.entry(stack.item_id.clone()).or_insert(0) += stack.quantity;
        }
        totals
    }

    /// Snapshot in authority form: container totals include tagged units
    pub fn to_snapshot(&self) -> InventorySnapshot {
        let mut container: Vec<ItemStack> = Vec::new();
        for stack in self.grid.iter().flatten().chain(self.tagged.values().flatten()) {
            match container.iter_mut().find(|s| s.item_id == stack.item_id) {
                Some(existing) => existing.quantity += stack.quantity,
                None => container.push(ItemStack::new(stack.item_id.clone(), stack.quantity)),
            }
        }
        let tagged = self
            .tagged
            .iter()
            .filter_map(|(tag, slot)| {
                slot.as_ref().map(|stack| TaggedStack {
                    tag: tag.clone(),
                    stack: Some(ItemStack::new(stack.item_id.clone(), stack.quantity)),
                    blocked: false,
                })
            })
            .collect();
        InventorySnapshot { container, tagged }
    }

    /// Add to the grid: hinted cell, partial stacks, then empty cells
    pub fn add_to_grid(&mut self, item: &ItemId, quantity: u32, max_stack: u32, hint: Option<usize>) -> Result<()> {
        let max_stack = max_stack.max(1);
        let mut grid = self.grid.clone();
        let mut left = quantity;

        let mut fill = |slot: &mut Option<ItemStack>, left: &mut u32| match slot {
            Some(stack) if &stack.item_id == item => {
                let amount = max_stack.saturating_sub(stack.quantity).min(*left);
                stack.quantity += amount;
                *left -= amount;
            }
            Some(_) => {}
            None => {
                let amount = max_stack.min(*left);
                if amount > 0 {
                    *slot = Some(ItemStack::new(item.clone(), amount));
                    *left -= amount;
                }
            }
        };

        if let Some(slot) = hint.and_then(|i| grid.get_mut(i)) {
            fill(slot, &mut left);
        }
        for slot in grid.iter_mut().filter(|s| s.as_ref().is_some_and(|s| &s.item_id == item)) {
            fill(slot, &mut left);
        }
        for slot in grid.iter_mut().filter(|s| s.is_none()) {
            if left == 0 {
                break;
            }
            fill(slot, &mut left);
        }

        if left > 0 {
            return Err(InventoryError::PredictionDesync(format!(
                "no grid room for {left} {item}"
            )));
        }
        self.grid = grid;
        Ok(())
    }

    /// Remove from the grid: hinted cell, then left to right
    pub fn remove_from_grid(&mut self, item: &ItemId, quantity: u32, hint: Option<usize>) -> Result<()> {
        if self.grid_quantity_of(item) < quantity {
            return Err(InventoryError::PredictionDesync(format!(
                "grid holds {} {item}, {quantity} removed",
                self.grid_quantity_of(item)
            )));
        }
        let mut left = quantity;
        let order = hint.into_iter().chain(0..self.grid.len());
        for index in order {
            if left == 0 {
                break;
            }
            let Some(slot) = self.grid.get_mut(index) else { continue };
            let Some(stack) = slot.as_mut().filter(|s| &s.item_id == item) else {
                continue;
            };
            let amount = stack.quantity.min(left);
            stack.quantity -= amount;
            left -= amount;
            if stack.quantity == 0 {
                *slot = None;
            }
        }
        Ok(())
    }

    /// Add to a tagged slot holding nothing or the same item
    pub fn add_to_tagged(&mut self, tag: &Tag, item: &ItemId, quantity: u32) -> Result<()> {
        let slot = self
            .tagged
            .get_mut(tag)
            .ok_or_else(|| InventoryError::PredictionDesync(format!("unknown tagged slot {tag}")))?;
        match slot {
            Some(stack) if &stack.item_id == item => stack.quantity += quantity,
            Some(stack) => {
                return Err(InventoryError::PredictionDesync(format!(
                    "{tag} holds {}, {item} added",
                    stack.item_id
                )))
            }
            None => *slot = Some(ItemStack::new(item.clone(), quantity)),
        }
        Ok(())
    }

    /// Remove from a tagged slot
    pub fn remove_from_tagged(&mut self, tag: &Tag, item: &ItemId, quantity: u32) -> Result<()> {
        let slot = self
            .tagged
            .get_mut(tag)
            .ok_or_else(|| InventoryError::PredictionDesync(format!("unknown tagged slot {tag}")))?;
        let Some(stack) = slot.as_mut().filter(|s| &s.item_id == item && s.quantity >= quantity) else {
            return Err(InventoryError::PredictionDesync(format!(
                "{tag} does not hold {quantity} {item}"
            )));
        };
        stack.quantity -= quantity;
        if stack.quantity == 0 {
            *slot = None;
        }
        Ok(())
    }

    /// Move a whole grid cell; merges onto the same item, swaps otherwise
    pub fn move_in_grid(&mut self, from: usize, to: usize, max_stack: u32) -> Result<u32> {
        self.check_cells(from, to)?;
        if from == to {
            return Ok(0);
        }
        let Some(source) = self.grid[from].clone() else {
            return Ok(0);
        };
        let moved = match self.grid[to].as_mut() {
            Some(target) if target.item_id == source.item_id && max_stack > 1 => {
                let amount = max_stack.saturating_sub(target.quantity).min(source.quantity);
                target.quantity += amount;
                if amount == source.quantity {
                    self.grid[from] = None;
                } else if let Some(rest) = self.grid[from].as_mut() {
                    rest.quantity -= amount;
                }
                amount
            }
            _ => {
                self.grid.swap(from, to);
                source.quantity
            }
        };
        Ok(moved)
    }

    /// Split `quantity` off a grid cell into an empty or matching cell
    pub fn split_stack(&mut self, from: usize, to: usize, quantity: u32, max_stack: u32) -> Result<u32> {
        self.check_cells(from, to)?;
        let Some(source) = self.grid[from].clone() else {
            return Ok(0);
        };
        if from == to || quantity == 0 || quantity >= source.quantity {
            return self.move_in_grid(from, to, max_stack);
        }
        let amount = match &self.grid[to] {
            None => quantity,
            Some(target) if target.item_id == source.item_id => {
                quantity.min(max_stack.saturating_sub(target.quantity))
            }
            Some(_) => 0,
        };
        if amount == 0 {
            return Ok(0);
        }
        if let Some(rest) = self.grid[from].as_mut() {
            rest.quantity -= amount;
        }
        match self.grid[to].as_mut() {
            Some(target) => target.quantity += amount,
            None => self.grid[to] = Some(ItemStack::new(source.item_id, amount)),
        }
        Ok(amount)
    }

    fn check_cells(&self, from: usize, to: usize) -> Result<()> {
        for index in [from, to] {
            if index >= self.grid.len() {
                return Err(InventoryError::InvalidSlotReference(format!("grid[{index}]")));
            }
        }
        Ok(())
    }

    /// Rebuild from an authority snapshot, keeping grid positions that still hold
    ///
    /// Fails with [`InventoryError::PredictionDesync`] when the container
    /// does not fit the grid; everything that fits is still placed.
    pub fn rebuild(&mut self, snapshot: &InventorySnapshot, max_stack: impl Fn(&ItemId) -> u32) -> Result<()> {
        for slot in self.tagged.values_mut() {
            *slot = None;
        }
        for entry in &snapshot.tagged {
            if let Some(stack) = &entry.stack {
                self.tagged
                    .insert(entry.tag.clone(), Some(ItemStack::new(stack.item_id.clone(), stack.quantity)));
            }
        }

        let mut remaining: BTreeMap<ItemId, u32> = snapshot
            .container_only()
            .into_iter()
            .map(|s| (s.item_id, s.quantity))
            .collect();
        for slot in self.grid.iter_mut() {
            let Some(stack) = slot.as_mut() else { continue };
            let left = remaining.get_mut(&stack.item_id).map_or(0, |q| {
                let kept = stack.quantity.min(*q);
                *q -= kept;
                kept
            });
            stack.quantity = left;
            if left == 0 {
                *slot = None;
            }
        }

        let mut overflow = None;
        for (item, quantity) in remaining {
            if quantity == 0 {
                continue;
            }
            if let Err(err) = self.add_to_grid(&item, quantity, max_stack(&item), None) {
                log::warn!("Full update does not fit the grid: {err}");
                overflow.get_or_insert(err);
            }
        }
        overflow.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rock() -> ItemId {
        ItemId::new("rock")
    }

    fn mirror() -> InventoryMirror {
        InventoryMirror::new(4, [Tag::new("Hand.Left")])
    }

    #[test]
    fn test_add_tops_off_then_fills() {
        let mut m = mirror();
        m.add_to_grid(&rock(), 3, 5, None).unwrap();
        m.add_to_grid(&rock(), 4, 5, None).unwrap();
        assert_eq!(m.grid_slot(0), Some(&ItemStack::new("rock", 5)));
        assert_eq!(m.grid_slot(1), Some(&ItemStack::new("rock", 2)));
    }

    #[test]
    fn test_add_respects_hint() {
        let mut m = mirror();
        m.add_to_grid(&rock(), 2, 5, Some(3)).unwrap();
        assert_eq!(m.grid_slot(3), Some(&ItemStack::new("rock", 2)));
        assert!(m.grid_slot(0).is_none());
    }

    #[test]
    fn test_overflow_leaves_mirror_unchanged() {
        let mut m = mirror();
        let before = m.clone();
        assert!(matches!(
            m.add_to_grid(&rock(), 21, 5, None),
            Err(InventoryError::PredictionDesync(_))
        ));
        assert_eq!(m, before);
    }

    #[test]
    fn test_remove_drains_left_to_right() {
        let mut m = mirror();
        m.add_to_grid(&rock(), 8, 5, None).unwrap();
        m.remove_from_grid(&rock(), 6, None).unwrap();
        assert!(m.grid_slot(0).is_none());
        assert_eq!(m.grid_slot(1), Some(&ItemStack::new("rock", 2)));
        assert!(m.remove_from_grid(&rock(), 3, None).is_err());
    }

    #[test]
    fn test_tagged_slot_holds_one_item() {
        let mut m = mirror();
        let left = Tag::new("Hand.Left");
        m.add_to_tagged(&left, &rock(), 2).unwrap();
        assert!(m.add_to_tagged(&left, &ItemId::new("stick"), 1).is_err());
        m.remove_from_tagged(&left, &rock(), 2).unwrap();
        assert!(m.tagged_item(&left).is_none());
        assert!(m.add_to_tagged(&Tag::new("Hand.Right"), &rock(), 1).is_err());
    }

    #[test]
    fn test_move_and_split_in_grid() {
        let mut m = mirror();
        m.add_to_grid(&rock(), 4, 5, None).unwrap();
        assert_eq!(m.split_stack(0, 2, 1, 5).unwrap(), 1);
        assert_eq!(m.grid_slot(0).unwrap().quantity, 3);
        assert_eq!(m.move_in_grid(2, 0, 5).unwrap(), 1);
        assert_eq!(m.grid_slot(0).unwrap().quantity, 4);
        assert!(m.grid_slot(2).is_none());
        assert!(m.move_in_grid(0, 9, 5).is_err());
    }

    #[test]
    fn test_snapshot_counts_tagged_in_container() {
        let mut m = mirror();
        m.add_to_grid(&rock(), 2, 5, None).unwrap();
        m.add_to_tagged(&Tag::new("Hand.Left"), &rock(), 3).unwrap();
        let snapshot = m.to_snapshot();
        assert_eq!(snapshot.container, vec![ItemStack::new("rock", 5)]);
        assert_eq!(snapshot.tagged.len(), 1);
    }

    #[test]
    fn test_rebuild_keeps_positions() {
        let mut m = mirror();
        m.add_to_grid(&rock(), 2, 5, Some(2)).unwrap();
        let snapshot = InventorySnapshot {
            container: vec![ItemStack::new("rock", 9), ItemStack::new("stick", 1)],
            tagged: vec![TaggedStack {
                tag: Tag::new("Hand.Left"),
                stack: Some(ItemStack::new("rock", 1)),
                blocked: false,
            }],
        };
        m.rebuild(&snapshot, |_| 5).unwrap();
        assert_eq!(m.grid_slot(2), Some(&ItemStack::new("rock", 5)));
        assert_eq!(m.grid_quantity_of(&rock()), 8);
        assert_eq!(m.grid_quantity_of(&ItemId::new("stick")), 1);
        assert_eq!(m.tagged_item(&Tag::new("Hand.Left")).unwrap().quantity, 1);
    }

    #[test]
    fn test_rebuild_reports_grid_overflow() {
        let mut m = mirror();
        let snapshot = InventorySnapshot {
            container: vec![ItemStack::new("rock", 100), ItemStack::new("stick", 1)],
            tagged: Vec::new(),
        };
        assert!(matches!(m.rebuild(&snapshot, |_| 5), Err(InventoryError::PredictionDesync(_))));
        assert_eq!(m.grid_quantity_of(&ItemId::new("stick")), 1);
    }
}
