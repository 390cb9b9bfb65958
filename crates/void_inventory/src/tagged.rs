//! Tagged slot registry and tagged slot contents
//!
//! Specialized slots accept only items carrying the slot's tag. Universal slots
//! accept anything unless the item is exclusive to a different universal slot.
//! A universal slot may block another universal slot while its occupant
//! activates blocking (a two-handed weapon in the main hand blocks the off
//! hand).

use crate::catalog::ItemDefinition;
use crate::item::{ItemId, ItemStack};
use crate::tag::Tag;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Kind of a tagged slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    /// Accepts any category unless excluded
    Universal,
    /// Accepts only items tagged with the slot tag
    Specialized,
}

/// Configuration of a universal slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniversalSlotSpec {
    /// Slot tag
    pub tag: Tag,
    /// Universal slot blocked while this one holds a blocking item
    #[serde(default)]
    pub blocks: Option<Tag>,
    /// Category that activates blocking; `None` means every occupant blocks
    #[serde(default)]
    pub blocking_category: Option<Tag>,
    /// Items carrying this category may only go into this universal slot
    #[serde(default)]
    pub exclusive_category: Option<Tag>,
}

impl UniversalSlotSpec {
    /// Create a plain universal slot
    pub fn new(tag: impl Into<Tag>) -> Self {
        Self {
            tag: tag.into(),
            blocks: None,
            blocking_category: None,
            exclusive_category: None,
        }
    }

    /// Block `other` while occupied by an item with `category`
    pub fn blocking(mut self, other: impl Into<Tag>, category: Option<Tag>) -> Self {
        self.blocks = Some(other.into());
        self.blocking_category = category;
        self
    }

    /// Reserve items with `category` for this slot
    pub fn exclusive(mut self, category: impl Into<Tag>) -> Self {
        self.exclusive_category = Some(category.into());
        self
    }

    /// Whether placing `def` here blocks the `blocks` target
    pub fn activates_blocking(&self, def: &ItemDefinition) -> bool {
        self.blocks.is_some()
            && self
                .blocking_category
                .as_ref()
                .map_or(true, |category| def.categories.has_tag(category))
    }
}

/// The configured set of tagged slots
#[derive(Debug, Clone, Default)]
pub struct TaggedSlotRegistry {
    specialized: Vec<Tag>,
    universal: Vec<UniversalSlotSpec>,
}

impl TaggedSlotRegistry {
    /// Create a registry; universal slots are reordered so blockers come first
    pub fn new(specialized: Vec<Tag>, universal: Vec<UniversalSlotSpec>) -> Self {
        Self {
            specialized,
            universal: sort_universal_slots(universal),
        }
    }

    /// Specialized slots in declared order
    pub fn specialized(&self) -> &[Tag] {
        &self.specialized
    }

    /// Universal slots, blockers before the slots they block
    pub fn universal(&self) -> &[UniversalSlotSpec] {
        &self.universal
    }

    /// All slot tags, specialized first
    pub fn all_tags(&self) -> impl Iterator<Item = &Tag> {
        self.specialized
            .iter()
            .chain(self.universal.iter().map(|s| &s.tag))
    }

    /// Kind of a configured slot
    pub fn kind(&self, tag: &Tag) -> Option<SlotKind> {
        if self.universal.iter().any(|s| &s.tag == tag) {
            Some(SlotKind::Universal)
        } else if self.specialized.contains(tag) {
            Some(SlotKind::Specialized)
        } else {
            None
        }
    }

    /// Whether `tag` names a configured slot
    pub fn contains(&self, tag: &Tag) -> bool {
        self.kind(tag).is_some()
    }

    /// Universal slot configuration
    pub fn universal_spec(&self, tag: &Tag) -> Option<&UniversalSlotSpec> {
        self.universal.iter().find(|s| &s.tag == tag)
    }

    /// Universal slots that block `tag`
    pub fn blockers_of<'a>(&'a self, tag: &'a Tag) -> impl Iterator<Item = &'a UniversalSlotSpec> {
        self.universal
            .iter()
            .filter(move |s| s.blocks.as_ref() == Some(tag))
    }

    /// Category compatibility, ignoring contents and blocking
    pub fn is_compatible(&self, def: &ItemDefinition, tag: &Tag) -> bool {
        match self.kind(tag) {
            Some(SlotKind::Specialized) => def.categories.has_tag(tag),
            Some(SlotKind::Universal) => !self.is_exclusive_elsewhere(def, tag),
            None => false,
        }
    }

    /// True if another universal slot claims one of the item's categories
    pub fn is_exclusive_elsewhere(&self, def: &ItemDefinition, tag: &Tag) -> bool {
        self.universal.iter().any(|slot| {
            &slot.tag != tag
                && slot
                    .exclusive_category
                    .as_ref()
                    .is_some_and(|category| def.categories.has_tag(category))
        })
    }
}

/// Kahn ordering of universal slots by their `blocks` edges
fn sort_universal_slots(slots: Vec<UniversalSlotSpec>) -> Vec<UniversalSlotSpec> {
    let index: HashMap<Tag, usize> = slots
        .iter()
        .enumerate()
        .map(|(i, s)| (s.tag.clone(), i))
        .collect();

    let mut in_degree = vec![0usize; slots.len()];
    for slot in &slots {
        if let Some(target) = slot.blocks.as_ref().and_then(|b| index.get(b)) {
            in_degree[*target] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..slots.len()).filter(|i| in_degree[*i] == 0).collect();
    let mut order = Vec::with_capacity(slots.len());
    while let Some(i) = queue.pop_front() {
        order.push(i);
        if let Some(target) = slots[i].blocks.as_ref().and_then(|b| index.get(b)) {
            in_degree[*target] -= 1;
            if in_degree[*target] == 0 {
                queue.push_back(*target);
            }
        }
    }

    if order.len() < slots.len() {
        log::warn!("Cyclic blocking between universal slots; keeping declared order for the cycle");
        let placed: HashSet<usize> = order.iter().copied().collect();
        order.extend((0..slots.len()).filter(|i| !placed.contains(i)));
    }

    let mut slots: Vec<Option<UniversalSlotSpec>> = slots.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

/// Contents of one tagged slot
///
/// An entry exists while the slot holds an item or is blocked; a blocked empty
/// slot is kept as a marker with no stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedStack {
    /// Slot tag
    pub tag: Tag,
    /// Occupant
    pub stack: Option<ItemStack>,
    /// Blocked by another slot's occupant
    #[serde(default)]
    pub blocked: bool,
}

impl TaggedStack {
    /// Occupant item id
    pub fn item_id(&self) -> Option<&ItemId> {
        self.stack.as_ref().map(|s| &s.item_id)
    }

    /// Occupant quantity
    pub fn quantity(&self) -> u32 {
        self.stack.as_ref().map_or(0, |s| s.quantity)
    }
}

/// Tagged slot contents of one inventory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedSlotSet {
    entries: Vec<TaggedStack>,
}

impl TaggedSlotSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from existing entries
    pub fn from_entries(entries: Vec<TaggedStack>) -> Self {
        let mut set = Self { entries };
        set.prune();
        set
    }

    /// Entry for a tag
    pub fn get(&self, tag: &Tag) -> Option<&TaggedStack> {
        self.entries.iter().find(|e| &e.tag == tag)
    }

    /// Occupant of a tag
    pub fn item(&self, tag: &Tag) -> Option<&ItemStack> {
        self.get(tag).and_then(|e| e.stack.as_ref())
    }

    /// Mutable occupant slot, creating the entry if needed
    pub(crate) fn slot_mut(&mut self, tag: &Tag) -> &mut Option<ItemStack> {
        let idx = match self.entries.iter().position(|e| &e.tag == tag) {
            Some(idx) => idx,
            None => {
                self.entries.push(TaggedStack {
                    tag: tag.clone(),
                    stack: None,
                    blocked: false,
                });
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx].stack
    }

    /// Drop entries that are neither occupied nor blocked
    pub(crate) fn prune(&mut self) {
        self.entries.retain(|e| e.stack.is_some() || e.blocked);
    }

    /// Whether a slot is blocked
    pub fn is_blocked(&self, tag: &Tag) -> bool {
        self.get(tag).is_some_and(|e| e.blocked)
    }

    /// Set or clear the blocked marker
    pub fn set_blocked(&mut self, tag: &Tag, blocked: bool) {
        match self.entries.iter_mut().find(|e| &e.tag == tag) {
            Some(entry) => entry.blocked = blocked,
            None if blocked => self.entries.push(TaggedStack {
                tag: tag.clone(),
                stack: None,
                blocked: true,
            }),
            None => {}
        }
        self.prune();
    }

    /// Total of an item across tagged slots
    pub fn quantity_of(&self, item: &ItemId) -> u32 {
        self.entries
            .iter()
            .filter_map(|e| e.stack.as_ref())
            .filter(|s| &s.item_id == item)
            .map(|s| s.quantity)
            .sum()
    }

    /// Slots holding an item, in insertion order
    pub fn slots_holding<'a>(&'a self, item: &'a ItemId) -> impl Iterator<Item = &'a TaggedStack> {
        self.entries
            .iter()
            .filter(move |e| e.item_id() == Some(item))
    }

    /// Iterate over entries
    pub fn iter(&self) -> impl Iterator<Item = &TaggedStack> {
        self.entries.iter()
    }

    /// Occupied entries
    pub fn occupied(&self) -> impl Iterator<Item = (&Tag, &ItemStack)> {
        self.entries
            .iter()
            .filter_map(|e| e.stack.as_ref().map(|s| (&e.tag, s)))
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
