//! Item identifiers, stacks and slot addresses

use crate::tag::Tag;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an item definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Create a new item id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Reference to per-unit instance data (durability, rolls, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

/// A quantity of one item
///
/// A stack always has a positive quantity; an empty slot is `None`, never a
/// zero-quantity stack. When `instances` is non-empty it holds exactly one
/// entry per unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    /// Item ID (references ItemDefinition)
    pub item_id: ItemId,
    /// Quantity
    pub quantity: u32,
    /// Instance references, one per unit when the item uses instances
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<InstanceId>,
}

impl ItemStack {
    /// Create a new item stack without instance data
    pub fn new(item_id: impl Into<ItemId>, quantity: u32) -> Self {
        Self {
            item_id: item_id.into(),
            quantity,
            instances: Vec::new(),
        }
    }

    /// Create a stack whose quantity is given by its instances
    pub fn with_instances(item_id: impl Into<ItemId>, instances: Vec<InstanceId>) -> Self {
        Self {
            item_id: item_id.into(),
            quantity: instances.len() as u32,
            instances,
        }
    }

    /// Check if this stack holds nothing
    pub fn is_empty(&self) -> bool {
        self.quantity == 0
    }

    /// Take up to `amount` units off the tail of the stack
    pub fn take(&mut self, amount: u32) -> Option<ItemStack> {
        let amount = amount.min(self.quantity);
        if amount == 0 {
            return None;
        }
        self.quantity -= amount;
        let instances = if self.instances.is_empty() {
            Vec::new()
        } else {
            let at = self.instances.len().saturating_sub(amount as usize);
            self.instances.split_off(at)
        };
        Some(ItemStack {
            item_id: self.item_id.clone(),
            quantity: amount,
            instances,
        })
    }

    /// Remove specific instances; returns the removed part
    pub fn take_instances(&mut self, wanted: &[InstanceId]) -> Option<ItemStack> {
        if wanted.is_empty() || !wanted.iter().all(|i| self.instances.contains(i)) {
            return None;
        }
        self.instances.retain(|i| !wanted.contains(i));
        self.quantity = self.instances.len() as u32;
        Some(ItemStack::with_instances(self.item_id.clone(), wanted.to_vec()))
    }

    /// Merge another stack of the same item into this one
    ///
    /// The quantity saturates at `u32::MAX`; units past it are lost and logged.
    pub fn merge(&mut self, other: ItemStack) -> bool {
        if self.item_id != other.item_id {
            return false;
        }
        self.quantity = self.quantity.checked_add(other.quantity).unwrap_or_else(|| {
            log::error!("Stack of {} overflowed while merging {} units", self.item_id, other.quantity);
            u32::MAX
        });
        self.instances.extend(other.instances);
        true
    }

    /// Whether this stack holds at least `quantity` units including the given instances
    pub fn contains(&self, quantity: u32, instances: &[InstanceId]) -> bool {
        self.quantity >= quantity && instances.iter().all(|i| self.instances.contains(i))
    }
}

/// Take from an optional stack, clearing it once drained
pub fn take_from(slot: &mut Option<ItemStack>, amount: u32) -> Option<ItemStack> {
    let stack = slot.as_mut()?;
    let taken = stack.take(amount);
    if stack.is_empty() {
        *slot = None;
    }
    taken
}

/// Where an item lives inside an inventory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotAddress {
    /// A generic position; on the authority generic storage is packed by item
    /// id, on a client mirror this is a grid index
    Generic(u32),
    /// A named tagged slot
    Tagged(Tag),
    /// Any generic storage for the item
    Container,
}

impl SlotAddress {
    /// Tag when this addresses a tagged slot
    pub fn tag(&self) -> Option<&Tag> {
        match self {
            Self::Tagged(tag) => Some(tag),
            _ => None,
        }
    }

    /// Whether this addresses generic storage
    pub fn is_generic(&self) -> bool {
        !matches!(self, Self::Tagged(_))
    }
}

impl fmt::Display for SlotAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic(index) => write!(f, "generic[{index}]"),
            Self::Tagged(tag) => write!(f, "tagged[{tag}]"),
            Self::Container => f.write_str("container"),
        }
    }
}

/// Outcome of moving between two slots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveResult {
    /// Units moved from source to target
    pub moved: u32,
    /// Whether source and target exchanged contents
    pub swapped: bool,
}

/// Move or swap between two single-item slots
///
/// Stacks onto a target holding the same stackable item, swaps with a target
/// holding anything else, and refuses to split a source onto an occupied slot
/// of a different item.
pub fn move_between_slots(
    source: &mut Option<ItemStack>,
    target: &mut Option<ItemStack>,
    max_stack: u32,
    requested: u32,
    ignore_max_stack: bool,
    allow_partial: bool,
) -> MoveResult {
    let Some(src) = source.as_ref() else {
        return MoveResult::default();
    };
    if !allow_partial && requested > src.quantity {
        return MoveResult::default();
    }

    let mut transfer = requested.min(src.quantity);
    let swap = match target.as_ref() {
        Some(tgt) => {
            let stacks = max_stack > 1 && tgt.item_id == src.item_id;
            if !stacks && src.quantity > requested {
                return MoveResult::default();
            }
            if stacks && !ignore_max_stack {
                transfer = transfer.min(max_stack.saturating_sub(tgt.quantity));
            }
            !stacks
        }
        None => transfer >= src.quantity,
    };

    if transfer == 0 || (!allow_partial && transfer < requested) {
        return MoveResult::default();
    }

    if swap {
        std::mem::swap(source, target);
        return MoveResult {
            moved: transfer,
            swapped: true,
        };
    }

    if let Some(moved) = take_from(source, transfer) {
        match target {
            Some(tgt) => {
                tgt.merge(moved);
            }
            None => *target = Some(moved),
        }
    }
    MoveResult {
        moved: transfer,
        swapped: false,
    }
}
