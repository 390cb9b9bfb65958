//! Inventory component
//!
//! An [`Inventory`] owns a generic [`Container`] and a [`TaggedSlotSet`].
//! Tagged slots earmark units that the container already counts, so the
//! container total of an item is always at least its tagged total.
//!
//! Mutating calls come in two flavours: `try_*` methods return a
//! [`Result`], while the plain methods collapse failures into a sentinel
//! (`0`, `false`, `None`) and log the cause.

use crate::authority::AuthorityGate;
use crate::capacity::{stacks_needed, Container};
use crate::catalog::{ItemCatalog, ItemDefinition};
use crate::config::InventoryConfig;
use crate::crafting::RecipeBook;
use crate::error::{sentinel, InventoryError, Result};
use crate::events::{ChangeNotifier, ChangeReason, InventoryEvent};
use crate::item::{take_from, InstanceId, ItemId, ItemStack, SlotAddress};
use crate::planner::PlacementPolicy;
use crate::tag::Tag;
use crate::tagged::{SlotKind, TaggedSlotRegistry, TaggedSlotSet, TaggedStack};
use crate::transfer::MoveRequest;
use crate::world::{DiscardDropSink, DropOrigin, ItemSource, WorldDropSink, WorldItem};
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Clamp applied to every receivable quantity
pub type AddValidator = Box<dyn Fn(&ItemId, u32) -> u32 + Send + Sync>;

/// Effect handler for a usable item, keyed by behavior id
pub type UseHandler = Box<dyn Fn(&ItemUse) + Send + Sync>;

/// A consumed use, handed to the registered handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemUse {
    /// Item used
    pub item: ItemId,
    /// Handler key
    pub behavior_id: String,
    /// Units consumed
    pub quantity: u32,
    /// Instances consumed
    pub instances: Vec<InstanceId>,
    /// Tagged slot the item was used from
    pub slot: Option<Tag>,
}

/// Serializable picture of an inventory's contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    /// Container stacks, tagged share included
    pub container: Vec<ItemStack>,
    /// Tagged slot entries
    pub tagged: Vec<TaggedStack>,
}

impl InventorySnapshot {
    /// Total per item
    pub fn totals(&self) -> BTreeMap<ItemId, u32> {
        let mut totals = BTreeMap::new();
        for stack in &self.container {
            *totals.entry(stack.item_id.clone()).or_insert(0) += stack.quantity;
        }
        totals
    }

    /// Occupant of a tagged slot
    pub fn tagged_item(&self, tag: &Tag) -> Option<&ItemStack> {
        self.tagged
            .iter()
            .find(|e| &e.tag == tag)
            .and_then(|e| e.stack.as_ref())
    }

    /// Per-item quantities outside tagged slots
    pub fn container_only(&self) -> Vec<ItemStack> {
        self.container
            .iter()
            .filter_map(|stack| {
                let tagged: u32 = self
                    .tagged
                    .iter()
                    .filter_map(|e| e.stack.as_ref())
                    .filter(|s| s.item_id == stack.item_id)
                    .map(|s| s.quantity)
                    .sum();
                let generic = stack.quantity.saturating_sub(tagged);
                (generic > 0).then(|| ItemStack::new(stack.item_id.clone(), generic))
            })
            .collect()
    }
}

/// Authoritative inventory
pub struct Inventory {
    /// Configuration the inventory was built from
    pub(crate) config: InventoryConfig,
    /// Shared item catalog
    pub(crate) catalog: Arc<ItemCatalog>,
    /// Generic storage
    pub(crate) container: Container,
    /// Tagged slot configuration
    pub(crate) registry: TaggedSlotRegistry,
    /// Tagged slot contents
    pub(crate) tagged: TaggedSlotSet,
    /// Outbound events
    pub(crate) notifier: ChangeNotifier,
    /// Mutation gate
    pub(crate) authority: Arc<dyn AuthorityGate>,
    /// Optional receivable clamp
    pub(crate) validator: Option<AddValidator>,
    /// Where dropped items go
    pub(crate) drop_sink: Arc<dyn WorldDropSink>,
    /// Use effect handlers
    pub(crate) use_handlers: HashMap<String, UseHandler>,
    /// Known recipes
    pub(crate) recipes: RecipeBook,
    /// Owner placement for drops
    pub(crate) drop_origin: DropOrigin,
}

impl Inventory {
    /// Create an empty inventory
    pub fn new(
        config: InventoryConfig,
        catalog: Arc<ItemCatalog>,
        authority: Arc<dyn AuthorityGate>,
    ) -> Self {
        Self {
            container: Container::from_config(&config),
            registry: config.registry(),
            recipes: RecipeBook::new(),
            config,
            catalog,
            tagged: TaggedSlotSet::new(),
            notifier: ChangeNotifier::new(),
            authority,
            validator: None,
            drop_sink: Arc::new(DiscardDropSink),
            use_handlers: HashMap::new(),
            drop_origin: DropOrigin::default(),
        }
    }

    /// Rebuild an inventory from a snapshot
    pub fn from_snapshot(
        config: InventoryConfig,
        catalog: Arc<ItemCatalog>,
        authority: Arc<dyn AuthorityGate>,
        snapshot: InventorySnapshot,
    ) -> Self {
        let mut inventory = Self::new(config, catalog, authority);
        for stack in snapshot.container {
            inventory.container.insert(stack);
        }
        inventory.tagged = TaggedSlotSet::from_entries(snapshot.tagged);
        inventory.derive_blocking_markers();
        inventory.update_weight_and_slots();
        inventory
    }

    /// Mark every slot blocked by a current occupant
    fn derive_blocking_markers(&mut self) {
        let targets: Vec<Tag> = self
            .tagged
            .occupied()
            .filter_map(|(tag, stack)| {
                let spec = self.registry.universal_spec(tag)?;
                let def = self.catalog.lookup(&stack.item_id)?;
                spec.blocks.clone().filter(|_| spec.activates_blocking(&def))
            })
            .collect();
        for target in targets {
            self.tagged.set_blocked(&target, true);
        }
    }

    /// Set the drop sink
    pub fn with_drop_sink(mut self, sink: Arc<dyn WorldDropSink>) -> Self {
        self.drop_sink = sink;
        self
    }

    /// Set the recipe book
    pub fn with_recipes(mut self, recipes: RecipeBook) -> Self {
        self.recipes = recipes;
        self.refresh_recipe_availability();
        self
    }

    /// Install a clamp on receivable quantities
    pub fn set_add_validator(&mut self, validator: impl Fn(&ItemId, u32) -> u32 + Send + Sync + 'static) {
        self.validator = Some(Box::new(validator));
    }

    /// Register the effect handler for a behavior id
    pub fn register_use_handler(
        &mut self,
        behavior_id: impl Into<String>,
        handler: impl Fn(&ItemUse) + Send + Sync + 'static,
    ) {
        self.use_handlers.insert(behavior_id.into(), Box::new(handler));
    }

    /// Set owner placement used for drops
    pub fn set_drop_origin(&mut self, origin: DropOrigin) {
        self.drop_origin = origin;
    }

    /// Subscribe to change events
    pub fn subscribe(&mut self) -> Receiver<InventoryEvent> {
        self.notifier.subscribe()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Configuration
    pub fn config(&self) -> &InventoryConfig {
        &self.config
    }

    /// Item catalog
    pub fn catalog(&self) -> &Arc<ItemCatalog> {
        &self.catalog
    }

    /// Generic storage
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Tagged slot configuration
    pub fn registry(&self) -> &TaggedSlotRegistry {
        &self.registry
    }

    /// Tagged slot contents
    pub fn tagged_slots(&self) -> &TaggedSlotSet {
        &self.tagged
    }

    /// Recipe book
    pub fn recipes(&self) -> &RecipeBook {
        &self.recipes
    }

    /// Total held of an item, tagged share included
    pub fn get_item_count(&self, item: &ItemId) -> u32 {
        self.container.quantity(item)
    }

    /// Held outside tagged slots
    pub fn get_container_only_item_count(&self, item: &ItemId) -> u32 {
        self.container_only(item)
    }

    /// Whether at least `quantity` is held
    pub fn contains(&self, item: &ItemId, quantity: u32) -> bool {
        self.container.quantity(item) >= quantity
    }

    /// Whether generic storage alone holds at least `quantity`
    pub fn contains_in_container(&self, item: &ItemId, quantity: u32) -> bool {
        self.container_only(item) >= quantity
    }

    /// Whether a tagged slot holds at least `quantity` of `item`
    pub fn contains_in_tagged_slot(&self, tag: &Tag, item: &ItemId, quantity: u32) -> bool {
        self.tagged
            .item(tag)
            .is_some_and(|s| &s.item_id == item && s.quantity >= quantity)
    }

    /// Occupant of a tagged slot
    pub fn get_item_for_tagged_slot(&self, tag: &Tag) -> Option<&ItemStack> {
        self.tagged.item(tag)
    }

    /// All container stacks
    pub fn get_all_items(&self) -> &[ItemStack] {
        self.container.stacks()
    }

    /// Stacks outside tagged slots, one per item
    pub fn get_container_items(&self) -> Vec<ItemStack> {
        self.snapshot().container_only()
    }

    /// Occupied tagged slots
    pub fn get_all_tagged_items(&self) -> Vec<(Tag, ItemStack)> {
        self.tagged
            .occupied()
            .map(|(tag, stack)| (tag.clone(), stack.clone()))
            .collect()
    }

    /// Current weight
    pub fn get_current_weight(&self) -> f32 {
        self.container.current_weight()
    }

    /// Maximum weight
    pub fn get_max_weight(&self) -> f32 {
        self.container.max_weight()
    }

    /// Generic slots in use
    pub fn get_used_slot_count(&self) -> u32 {
        self.container.used_slot_count()
    }

    /// Maximum generic slots
    pub fn get_max_slot_count(&self) -> u32 {
        self.container.max_slot_count()
    }

    /// Whether a tagged slot is blocked
    pub fn is_tagged_slot_blocked(&self, tag: &Tag) -> bool {
        self.tagged.is_blocked(tag)
    }

    /// Empty, unblocked universal slots
    pub fn get_empty_universal_slots(&self) -> Vec<Tag> {
        self.registry
            .universal()
            .iter()
            .map(|s| &s.tag)
            .filter(|tag| self.tagged.get(tag).is_none())
            .cloned()
            .collect()
    }

    /// Empty, unblocked specialized slots
    pub fn get_empty_specialized_slots(&self) -> Vec<Tag> {
        self.registry
            .specialized()
            .iter()
            .filter(|tag| self.tagged.get(tag).is_none())
            .cloned()
            .collect()
    }

    /// Category compatibility of an item with a slot
    pub fn is_tagged_slot_compatible(&self, item: &ItemId, tag: &Tag) -> bool {
        self.catalog
            .lookup(item)
            .is_some_and(|def| self.registry.is_compatible(&def, tag))
    }

    /// Whether a tagged slot can take all of `quantity`
    pub fn can_tagged_slot_receive_item(&self, item: &ItemId, quantity: u32, tag: &Tag, allow_swapback: bool) -> bool {
        self.catalog.lookup(item).is_some_and(|def| {
            self.receivable_for_tagged(&def, tag, quantity, false, allow_swapback) >= quantity
        })
    }

    /// Maximum additional quantity the inventory can take right now
    pub fn get_receivable_quantity(&self, item: &ItemId) -> u32 {
        self.catalog
            .lookup(item)
            .map_or(0, |def| self.receivable_total(&def, u32::MAX, false))
    }

    /// Maximum additional quantity generic storage alone can take
    pub fn get_receivable_quantity_container_only(&self, item: &ItemId, requested: u32, allow_partial: bool) -> u32 {
        self.catalog.lookup(item).map_or(0, |def| {
            self.receivable_container_only(&def, requested, allow_partial, false)
        })
    }

    /// Quantity a tagged slot can take
    pub fn get_receivable_quantity_for_tagged_slot(
        &self,
        item: &ItemId,
        tag: &Tag,
        requested: u32,
        allow_partial: bool,
        allow_swapback: bool,
    ) -> u32 {
        self.catalog.lookup(item).map_or(0, |def| {
            self.receivable_for_tagged(&def, tag, requested, allow_partial, allow_swapback)
        })
    }

    /// Serializable copy of the contents
    pub fn snapshot(&self) -> InventorySnapshot {
        InventorySnapshot {
            container: self.container.stacks().to_vec(),
            tagged: self.tagged.iter().cloned().collect(),
        }
    }

    // ------------------------------------------------------------------
    // Capacity
    // ------------------------------------------------------------------

    pub(crate) fn container_only(&self, item: &ItemId) -> u32 {
        self.container
            .quantity(item)
            .saturating_sub(self.tagged.quantity_of(item))
    }

    /// Recompute cached weight and slot usage
    pub fn update_weight_and_slots(&mut self) {
        self.container.update_weight_and_slots(&self.catalog, &self.tagged);
    }

    fn validate_add(&self, item: &ItemId, quantity: u32) -> u32 {
        match &self.validator {
            Some(validator) => validator(item, quantity).min(quantity),
            None => quantity,
        }
    }

    /// Generic room by slots and weight, without the validation hook
    pub(crate) fn generic_capacity(&self, def: &ItemDefinition) -> u32 {
        self.container
            .receivable_by_slots(def, self.container_only(&def.id), false)
            .min(self.container.receivable_by_weight(def))
    }

    pub(crate) fn receivable_total(&self, def: &ItemDefinition, requested: u32, allow_swapback: bool) -> u32 {
        let by_weight = self.container.receivable_by_weight(def);
        let mut by_slots = self
            .container
            .receivable_by_slots(def, self.container_only(&def.id), false) as u64;

        for tag in self.registry.specialized() {
            by_slots += self.receivable_for_tagged(def, tag, u32::MAX, true, false) as u64;
        }

        let mut would_block: HashSet<&Tag> = HashSet::new();
        for slot in self.registry.universal() {
            if would_block.contains(&slot.tag) {
                continue;
            }
            let take = self.receivable_for_tagged(def, &slot.tag, u32::MAX, true, false);
            by_slots += take as u64;
            if take > 0 && slot.activates_blocking(def) {
                if let Some(blocked) = &slot.blocks {
                    would_block.insert(blocked);
                }
            }
        }

        if allow_swapback && by_slots == 0 {
            by_slots = def.max_stack as u64;
        }
        let by_slots = by_slots.min(u32::MAX as u64) as u32;
        self.validate_add(&def.id, requested.min(by_weight).min(by_slots))
    }

    pub(crate) fn receivable_container_only(
        &self,
        def: &ItemDefinition,
        requested: u32,
        allow_partial: bool,
        allow_swapback: bool,
    ) -> u32 {
        let by_weight = self.container.receivable_by_weight(def);
        let by_slots = self
            .container
            .receivable_by_slots(def, self.container_only(&def.id), allow_swapback);
        let viable = by_slots.min(by_weight);
        if !allow_partial && viable < requested {
            return 0;
        }
        self.validate_add(&def.id, viable.min(requested))
    }

    pub(crate) fn receivable_for_tagged(
        &self,
        def: &ItemDefinition,
        tag: &Tag,
        requested: u32,
        allow_partial: bool,
        allow_swapback: bool,
    ) -> u32 {
        match self.registry.kind(tag) {
            Some(SlotKind::Universal) => {
                if self.registry.is_exclusive_elsewhere(def, tag) {
                    return 0;
                }
                if !allow_swapback && self.indirect_blocking_conflict(tag, def).is_some() {
                    return 0;
                }
            }
            Some(SlotKind::Specialized) => {
                if !def.categories.has_tag(tag) {
                    return 0;
                }
            }
            None => return 0,
        }

        let entry = self.tagged.get(tag);
        let occupant = entry.and_then(|e| e.stack.as_ref());
        let blocked = entry.is_some_and(|e| e.blocked);
        let mut viable = def.max_stack.min(requested);

        match occupant {
            Some(stack) if stack.item_id == def.id => {
                if !allow_swapback || def.max_stack > 1 {
                    viable = viable.min(def.max_stack.saturating_sub(stack.quantity));
                }
            }
            Some(_) if !allow_swapback => return 0,
            _ => {}
        }

        if blocked && !allow_swapback {
            return 0;
        }
        if occupant.is_none() {
            return viable;
        }
        if !allow_partial && viable < requested {
            return 0;
        }
        viable
    }

    // ------------------------------------------------------------------
    // Blocking
    // ------------------------------------------------------------------

    /// Slot that would have to be emptied before `def` can go into `tag`
    pub fn indirect_blocking_conflict(&self, tag: &Tag, def: &ItemDefinition) -> Option<Tag> {
        let spec = self.registry.universal_spec(tag)?;
        let blocks = spec.blocks.as_ref()?;
        (self.tagged.item(blocks).is_some() && spec.activates_blocking(def)).then(|| blocks.clone())
    }

    /// Block or release the slot `tag` blocks, for an occupant `def`
    pub(crate) fn update_blocking_state(&mut self, tag: &Tag, def: Option<&ItemDefinition>, equip: bool) {
        let Some(spec) = self.registry.universal_spec(tag) else {
            return;
        };
        let Some(target) = spec.blocks.clone() else {
            return;
        };
        let block = equip && def.is_some_and(|d| spec.activates_blocking(d));
        self.tagged.set_blocked(&target, block);
    }

    /// Re-derive blocking from the slot's current occupant
    pub(crate) fn refresh_blocking_for(&mut self, tag: &Tag) {
        let def = self
            .tagged
            .item(tag)
            .and_then(|s| self.catalog.lookup(&s.item_id));
        self.update_blocking_state(tag, def.as_deref(), def.is_some());
    }

    /// Force a slot's blocked marker
    pub fn set_tagged_slot_blocked(&mut self, tag: &Tag, blocked: bool) {
        self.tagged.set_blocked(tag, blocked);
    }

    // ------------------------------------------------------------------
    // Earmarking
    // ------------------------------------------------------------------

    /// Container-only instances, newest first taken
    pub(crate) fn free_instances(&self, item: &ItemId, count: u32) -> Vec<InstanceId> {
        let Some(stack) = self.container.stack(item) else {
            return Vec::new();
        };
        if stack.instances.is_empty() || count == 0 {
            return Vec::new();
        }
        let earmarked: HashSet<InstanceId> = self
            .tagged
            .slots_holding(item)
            .filter_map(|e| e.stack.as_ref())
            .flat_map(|s| s.instances.iter().copied())
            .collect();
        let mut picked: Vec<InstanceId> = stack
            .instances
            .iter()
            .rev()
            .filter(|i| !earmarked.contains(i))
            .take(count as usize)
            .copied()
            .collect();
        picked.reverse();
        picked
    }

    /// Earmark container-only units into a tagged slot, replacing a different occupant
    pub(crate) fn earmark(&mut self, def: &ItemDefinition, tag: &Tag, quantity: u32, preferred: &[InstanceId]) -> ItemStack {
        let instances = if preferred.is_empty() {
            self.free_instances(&def.id, quantity)
        } else {
            preferred.to_vec()
        };
        let portion = if instances.is_empty() {
            ItemStack::new(def.id.clone(), quantity)
        } else {
            ItemStack::with_instances(def.id.clone(), instances)
        };
        let slot = self.tagged.slot_mut(tag);
        let stacks_onto = slot.as_ref().is_some_and(|existing| existing.item_id == def.id);
        if let Some(existing) = slot.as_mut().filter(|_| stacks_onto) {
            existing.merge(portion.clone());
        } else {
            *slot = Some(portion.clone());
        }
        self.update_blocking_state(tag, Some(def), true);
        portion
    }

    /// Release units of a tagged slot back to container-only
    pub(crate) fn unearmark(&mut self, tag: &Tag, quantity: u32) -> Option<ItemStack> {
        let taken = take_from(self.tagged.slot_mut(tag), quantity);
        self.tagged.prune();
        taken
    }

    pub(crate) fn ensure_authority(&self, context: &'static str) -> Result<()> {
        if self.authority.has_authority() {
            Ok(())
        } else {
            Err(InventoryError::AuthorityViolation(context))
        }
    }

    pub(crate) fn publish(&mut self, event: InventoryEvent) {
        self.notifier.publish(event);
    }

    // ------------------------------------------------------------------
    // Adding
    // ------------------------------------------------------------------

    /// Add from a source, distributing over generic storage and tagged slots
    pub fn add_item(
        &mut self,
        source: &mut dyn ItemSource,
        item: &ItemId,
        quantity: u32,
        allow_partial: bool,
        policy: PlacementPolicy,
    ) -> u32 {
        sentinel(
            "add_item",
            self.try_add_item(source, item, quantity, allow_partial, policy),
        )
    }

    /// Fallible [`Inventory::add_item`]
    pub fn try_add_item(
        &mut self,
        source: &mut dyn ItemSource,
        item: &ItemId,
        quantity: u32,
        allow_partial: bool,
        policy: PlacementPolicy,
    ) -> Result<u32> {
        self.ensure_authority("add_item")?;
        self.add_item_internal(source, item, quantity, allow_partial, policy, ChangeReason::Added)
    }

    pub(crate) fn add_item_internal(
        &mut self,
        source: &mut dyn ItemSource,
        item: &ItemId,
        quantity: u32,
        allow_partial: bool,
        policy: PlacementPolicy,
        reason: ChangeReason,
    ) -> Result<u32> {
        let def = self.catalog.try_lookup(item)?;
        if quantity == 0 {
            return Ok(0);
        }

        let receivable = self.receivable_total(&def, quantity, false);
        let viable = if allow_partial {
            receivable
        } else if receivable >= quantity {
            quantity
        } else {
            0
        };
        if viable == 0 {
            return Err(InventoryError::CapacityExceeded {
                item: item.clone(),
                requested: quantity,
                receivable,
            });
        }

        let received = source
            .extract(item, viable)
            .ok_or_else(|| InventoryError::InsufficientQuantity {
                item: item.clone(),
                requested: viable,
                available: 0,
            })?;
        if !allow_partial && received.quantity < quantity {
            log::error!("add_item: source handed {} of {} {}", received.quantity, quantity, item);
        }

        let total = received.quantity;
        let plan = self.plan_for(&def, total, policy);
        let mut generic_instances = received.instances.clone();
        self.container.insert(received);

        let mut tagged_added = Vec::new();
        for (tag, amount) in plan.tagged() {
            let previous = self.tagged.item(tag).cloned();
            let portion = self.earmark(&def, tag, amount, &[]);
            generic_instances.retain(|i| !portion.instances.contains(i));
            tagged_added.push((tag.clone(), portion, previous));
        }
        let tagged_total: u32 = tagged_added.iter().map(|(_, p, _)| p.quantity).sum();
        let generic = total - tagged_total;

        self.update_weight_and_slots();

        if generic > 0 {
            self.publish(InventoryEvent::ItemAddedToContainer {
                item: item.clone(),
                quantity: generic,
                instances: generic_instances,
                reason,
            });
        }
        for (tag, portion, previous) in tagged_added {
            self.publish(InventoryEvent::ItemAddedToTaggedSlot {
                tag,
                item: item.clone(),
                quantity: portion.quantity,
                instances: portion.instances,
                previous,
                reason,
            });
        }

        self.refresh_recipe_availability();
        Ok(total)
    }

    /// Add straight into a tagged slot, optionally pushing occupants out
    pub fn add_item_to_tagged_slot(
        &mut self,
        source: &mut dyn ItemSource,
        tag: &Tag,
        item: &ItemId,
        quantity: u32,
        allow_partial: bool,
        push_out: bool,
    ) -> u32 {
        sentinel(
            "add_item_to_tagged_slot",
            self.try_add_item_to_tagged_slot(source, tag, item, quantity, allow_partial, push_out),
        )
    }

    /// Fallible [`Inventory::add_item_to_tagged_slot`]
    pub fn try_add_item_to_tagged_slot(
        &mut self,
        source: &mut dyn ItemSource,
        tag: &Tag,
        item: &ItemId,
        quantity: u32,
        allow_partial: bool,
        push_out: bool,
    ) -> Result<u32> {
        self.ensure_authority("add_item_to_tagged_slot")?;
        self.add_to_tagged_internal(source, tag, item, quantity, allow_partial, push_out, ChangeReason::Added)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn add_to_tagged_internal(
        &mut self,
        source: &mut dyn ItemSource,
        tag: &Tag,
        item: &ItemId,
        quantity: u32,
        allow_partial: bool,
        push_out: bool,
        reason: ChangeReason,
    ) -> Result<u32> {
        let def = self.catalog.try_lookup(item)?;
        if !self.registry.contains(tag) {
            return Err(InventoryError::InvalidSlotReference(tag.to_string()));
        }
        if !self.registry.is_compatible(&def, tag) {
            return Err(InventoryError::SlotIncompatible {
                item: item.clone(),
                tag: tag.clone(),
            });
        }

        let conflict = self.indirect_blocking_conflict(tag, &def);
        let foreign_occupant = self
            .tagged
            .item(tag)
            .filter(|occupant| &occupant.item_id != item)
            .map(|occupant| occupant.item_id.clone());
        if !push_out {
            if let Some(conflict) = conflict {
                return Err(InventoryError::SlotBlocked(conflict));
            }
            if let Some(occupant) = foreign_occupant {
                return Err(InventoryError::SwapRejected(format!("{tag} holds {occupant}")));
            }
            if self.tagged.is_blocked(tag) {
                return Err(InventoryError::SlotBlocked(tag.clone()));
            }
        }

        let receivable = self
            .receivable_for_tagged(&def, tag, quantity, allow_partial, push_out)
            .min(self.container.receivable_by_weight(&def));
        let viable = self.validate_add(item, receivable);
        if viable == 0 || (viable < quantity && !allow_partial) {
            return Err(InventoryError::CapacityExceeded {
                item: item.clone(),
                requested: quantity,
                receivable: viable,
            });
        }

        if let Some(conflict) = conflict {
            self.push_out_to_container(&conflict)?;
            log::debug!("Unequipped {conflict} to make room in {tag}");
        }
        if foreign_occupant.is_some() {
            self.push_out_to_container(tag)?;
        }
        if self.tagged.is_blocked(tag) {
            let blockers: Vec<Tag> = self
                .registry
                .blockers_of(tag)
                .map(|s| s.tag.clone())
                .filter(|blocker| self.tagged.item(blocker).is_some())
                .collect();
            for blocker in blockers {
                self.push_out_to_container(&blocker)?;
            }
            if self.tagged.is_blocked(tag) {
                return Err(InventoryError::SlotBlocked(tag.clone()));
            }
        }

        let received = source
            .extract(item, viable)
            .ok_or_else(|| InventoryError::InsufficientQuantity {
                item: item.clone(),
                requested: viable,
                available: 0,
            })?;
        let previous = self.tagged.item(tag).cloned();
        let instances = received.instances.clone();
        let amount = received.quantity;
        self.container.insert(received);
        let portion = self.earmark(&def, tag, amount, &instances);

        self.update_weight_and_slots();
        self.publish(InventoryEvent::ItemAddedToTaggedSlot {
            tag: tag.clone(),
            item: item.clone(),
            quantity: portion.quantity,
            instances: portion.instances,
            previous,
            reason,
        });
        self.refresh_recipe_availability();
        Ok(amount)
    }

    /// Move a tagged slot's whole occupant to generic storage
    fn push_out_to_container(&mut self, tag: &Tag) -> Result<()> {
        let Some(occupant) = self.tagged.item(tag).cloned() else {
            return Ok(());
        };
        let request = MoveRequest::new(
            occupant.item_id.clone(),
            occupant.quantity,
            SlotAddress::Tagged(tag.clone()),
            SlotAddress::Container,
        );
        let moved = self.try_move_item(&request)?;
        if moved < occupant.quantity {
            return Err(InventoryError::CapacityExceeded {
                item: occupant.item_id,
                requested: occupant.quantity,
                receivable: moved,
            });
        }
        Ok(())
    }

    /// Pick up as much of a world item as fits
    pub fn pickup_item(&mut self, world_item: &mut WorldItem, policy: PlacementPolicy) -> u32 {
        let Some((item, quantity)) = world_item.represented().map(|(i, q)| (i.clone(), q)) else {
            return 0;
        };
        self.add_item(world_item, &item, quantity, true, policy)
    }

    // ------------------------------------------------------------------
    // Removing
    // ------------------------------------------------------------------

    /// Extract units, generic storage first, tagged slots for the shortfall
    pub fn extract_item(&mut self, item: &ItemId, quantity: u32, reason: ChangeReason, allow_partial: bool) -> Option<ItemStack> {
        match self.try_extract_item(item, quantity, reason, allow_partial) {
            Ok(stack) => Some(stack),
            Err(err) => {
                err.log("extract_item");
                None
            }
        }
    }

    /// Fallible [`Inventory::extract_item`]
    pub fn try_extract_item(
        &mut self,
        item: &ItemId,
        quantity: u32,
        reason: ChangeReason,
        allow_partial: bool,
    ) -> Result<ItemStack> {
        self.ensure_authority("extract_item")?;
        self.extract_internal(item, quantity, &[], reason, allow_partial)
    }

    /// Extract specific instances
    pub fn try_extract_instances(&mut self, item: &ItemId, instances: &[InstanceId], reason: ChangeReason) -> Result<ItemStack> {
        self.ensure_authority("extract_instances")?;
        self.extract_internal(item, instances.len() as u32, instances, reason, false)
    }

    /// Destroy units; returns how many were destroyed
    pub fn destroy_item(&mut self, item: &ItemId, quantity: u32, reason: ChangeReason) -> u32 {
        self.extract_item(item, quantity, reason, true)
            .map_or(0, |stack| stack.quantity)
    }

    pub(crate) fn extract_internal(
        &mut self,
        item: &ItemId,
        quantity: u32,
        instances: &[InstanceId],
        reason: ChangeReason,
        allow_partial: bool,
    ) -> Result<ItemStack> {
        let total = self.container.quantity(item);
        let wanted = if instances.is_empty() {
            quantity
        } else {
            instances.len() as u32
        };
        let insufficient = || InventoryError::InsufficientQuantity {
            item: item.clone(),
            requested: wanted,
            available: total,
        };
        if wanted == 0 || total == 0 || (!allow_partial && total < wanted) {
            return Err(insufficient());
        }

        let mut tagged_parts: Vec<(Tag, ItemStack)> = Vec::new();
        let mut extracted: Option<ItemStack> = None;
        let generic_instances: Vec<InstanceId>;

        if instances.is_empty() {
            let amount = wanted.min(total);
            let generic = amount.min(self.container_only(item));
            generic_instances = self.free_instances(item, generic);
            if generic > 0 {
                extracted = if generic_instances.is_empty() {
                    self.container.remove(item, generic)
                } else {
                    self.container.remove_instances(item, &generic_instances)
                };
            }

            let mut shortfall = amount - generic;
            let tags: Vec<Tag> = self.tagged.slots_holding(item).map(|e| e.tag.clone()).collect();
            for tag in tags.iter().rev() {
                if shortfall == 0 {
                    break;
                }
                if let Some(part) = self.unearmark(tag, shortfall) {
                    shortfall -= part.quantity;
                    self.refresh_blocking_for(tag);
                    tagged_parts.push((tag.clone(), part));
                }
            }
        } else {
            let held = self.container.stack(item).ok_or_else(insufficient)?;
            if !held.contains(0, instances) {
                return Err(insufficient());
            }
            let tags: Vec<Tag> = self.tagged.slots_holding(item).map(|e| e.tag.clone()).collect();
            for tag in tags {
                let slot = self.tagged.slot_mut(&tag);
                let Some(stack) = slot.as_mut() else { continue };
                let hits: Vec<InstanceId> = stack
                    .instances
                    .iter()
                    .filter(|i| instances.contains(i))
                    .copied()
                    .collect();
                if let Some(part) = stack.take_instances(&hits) {
                    if stack.is_empty() {
                        *slot = None;
                    }
                    tagged_parts.push((tag.clone(), part));
                }
                self.tagged.prune();
                self.refresh_blocking_for(&tag);
            }
            generic_instances = instances
                .iter()
                .filter(|i| !tagged_parts.iter().any(|(_, p)| p.instances.contains(i)))
                .copied()
                .collect();
            if !generic_instances.is_empty() {
                extracted = self.container.remove_instances(item, &generic_instances);
            }
        }

        for (_, part) in &tagged_parts {
            let removed = if part.instances.is_empty() {
                self.container.remove(item, part.quantity)
            } else {
                self.container.remove_instances(item, &part.instances)
            };
            let Some(removed) = removed else { continue };
            if let Some(acc) = extracted.as_mut() {
                acc.merge(removed);
            } else {
                extracted = Some(removed);
            }
        }

        let extracted = extracted.ok_or_else(insufficient)?;
        let tagged_total: u32 = tagged_parts.iter().map(|(_, p)| p.quantity).sum();
        let generic = extracted.quantity.saturating_sub(tagged_total);

        self.update_weight_and_slots();
        for (tag, part) in tagged_parts {
            self.publish(InventoryEvent::ItemRemovedFromTaggedSlot {
                tag,
                item: item.clone(),
                quantity: part.quantity,
                instances: part.instances,
                reason,
            });
        }
        if generic > 0 {
            self.publish(InventoryEvent::ItemRemovedFromContainer {
                item: item.clone(),
                quantity: generic,
                instances: generic_instances,
                reason,
            });
        }
        self.refresh_recipe_availability();
        Ok(extracted)
    }

    /// Extract from one tagged slot
    pub fn extract_from_tagged_slot(
        &mut self,
        tag: &Tag,
        item: &ItemId,
        quantity: u32,
        reason: ChangeReason,
    ) -> Option<ItemStack> {
        match self.try_extract_from_tagged_slot(tag, item, quantity, reason) {
            Ok(stack) => Some(stack),
            Err(err) => {
                err.log("extract_from_tagged_slot");
                None
            }
        }
    }

    /// Fallible [`Inventory::extract_from_tagged_slot`]
    pub fn try_extract_from_tagged_slot(
        &mut self,
        tag: &Tag,
        item: &ItemId,
        quantity: u32,
        reason: ChangeReason,
    ) -> Result<ItemStack> {
        self.ensure_authority("extract_from_tagged_slot")?;
        self.extract_from_tagged_internal(tag, item, quantity, reason)
    }

    pub(crate) fn extract_from_tagged_internal(
        &mut self,
        tag: &Tag,
        item: &ItemId,
        quantity: u32,
        reason: ChangeReason,
    ) -> Result<ItemStack> {
        if !self.registry.contains(tag) {
            return Err(InventoryError::InvalidSlotReference(tag.to_string()));
        }
        let available = self
            .tagged
            .item(tag)
            .filter(|s| &s.item_id == item)
            .map_or(0, |s| s.quantity);
        if quantity == 0 || available < quantity {
            return Err(InventoryError::InsufficientQuantity {
                item: item.clone(),
                requested: quantity,
                available,
            });
        }

        let part = self
            .unearmark(tag, quantity)
            .ok_or_else(|| InventoryError::InvalidSlotReference(tag.to_string()))?;
        self.refresh_blocking_for(tag);
        if part.instances.is_empty() {
            self.container.remove(item, part.quantity);
        } else {
            self.container.remove_instances(item, &part.instances);
        }

        self.update_weight_and_slots();
        self.publish(InventoryEvent::ItemRemovedFromTaggedSlot {
            tag: tag.clone(),
            item: item.clone(),
            quantity: part.quantity,
            instances: part.instances.clone(),
            reason,
        });
        self.refresh_recipe_availability();
        Ok(part)
    }

    /// Take up to `quantity` of whatever a tagged slot holds
    ///
    /// With `destroy_from_container` the units leave the inventory; otherwise
    /// they go back to generic storage.
    pub fn remove_quantity_from_tagged_slot(
        &mut self,
        tag: &Tag,
        quantity: u32,
        reason: ChangeReason,
        destroy_from_container: bool,
    ) -> u32 {
        let Some(occupant) = self.tagged.item(tag).cloned() else {
            log::debug!("remove_quantity_from_tagged_slot: {tag} is empty");
            return 0;
        };
        let quantity = quantity.min(occupant.quantity);
        if destroy_from_container {
            return self
                .extract_from_tagged_slot(tag, &occupant.item_id, quantity, reason)
                .map_or(0, |stack| stack.quantity);
        }
        let request = MoveRequest::new(
            occupant.item_id,
            quantity,
            SlotAddress::Tagged(tag.clone()),
            SlotAddress::Container,
        )
        .without_swap();
        self.move_item(&request)
    }

    /// Destroy an item from tagged slots, last slot first
    pub fn remove_item_from_any_tagged_slots(&mut self, item: &ItemId, quantity: u32, reason: ChangeReason) -> u32 {
        let slots: Vec<(Tag, u32)> = self
            .tagged
            .slots_holding(item)
            .map(|e| (e.tag.clone(), e.quantity()))
            .collect();
        let mut removed = 0;
        for (tag, held) in slots.into_iter().rev() {
            if removed >= quantity {
                break;
            }
            removed += self
                .extract_from_tagged_slot(&tag, item, held.min(quantity - removed), reason)
                .map_or(0, |stack| stack.quantity);
        }
        removed
    }

    /// Move a tagged slot's occupant back to generic storage
    pub fn remove_any_item_from_tagged_slot(&mut self, tag: &Tag) -> u32 {
        let Some(occupant) = self.tagged.item(tag).cloned() else {
            return 0;
        };
        self.move_item(&MoveRequest::new(
            occupant.item_id,
            occupant.quantity,
            SlotAddress::Tagged(tag.clone()),
            SlotAddress::Container,
        ))
    }

    /// Destroy everything
    pub fn clear(&mut self) -> bool {
        sentinel("clear", self.try_clear().map(|_| true))
    }

    /// Fallible [`Inventory::clear`]
    pub fn try_clear(&mut self) -> Result<()> {
        self.ensure_authority("clear")?;
        let occupied: Vec<(Tag, ItemId, u32)> = self
            .tagged
            .occupied()
            .map(|(tag, stack)| (tag.clone(), stack.item_id.clone(), stack.quantity))
            .collect();
        for (tag, item, quantity) in occupied {
            self.extract_from_tagged_internal(&tag, &item, quantity, ChangeReason::ForceDestroyed)?;
        }
        self.tagged.clear();
        for stack in self.container.clear() {
            self.publish(InventoryEvent::ItemRemovedFromContainer {
                item: stack.item_id,
                quantity: stack.quantity,
                instances: stack.instances,
                reason: ChangeReason::ForceDestroyed,
            });
        }
        self.update_weight_and_slots();
        self.refresh_recipe_availability();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dropping and using
    // ------------------------------------------------------------------

    fn default_drop_location(&self) -> [f32; 3] {
        self.drop_origin.in_front(self.config.default_drop_distance)
    }

    /// Drop units into the world; returns how many were dropped
    pub fn drop_item(&mut self, item: &ItemId, quantity: u32, location: Option<[f32; 3]>) -> u32 {
        sentinel("drop_item", self.try_drop_item(item, quantity, location))
    }

    /// Fallible [`Inventory::drop_item`]
    pub fn try_drop_item(&mut self, item: &ItemId, quantity: u32, location: Option<[f32; 3]>) -> Result<u32> {
        self.ensure_authority("drop_item")?;
        let stack = self.extract_internal(item, quantity, &[], ChangeReason::Dropped, true)?;
        let dropped = stack.quantity;
        let location = location.unwrap_or_else(|| self.default_drop_location());
        self.drop_sink.spawn(stack, location);
        Ok(dropped)
    }

    /// Drop from one tagged slot
    pub fn drop_from_tagged_slot(&mut self, tag: &Tag, quantity: u32, location: Option<[f32; 3]>) -> u32 {
        sentinel(
            "drop_from_tagged_slot",
            self.try_drop_from_tagged_slot(tag, quantity, location),
        )
    }

    /// Fallible [`Inventory::drop_from_tagged_slot`]
    pub fn try_drop_from_tagged_slot(&mut self, tag: &Tag, quantity: u32, location: Option<[f32; 3]>) -> Result<u32> {
        self.ensure_authority("drop_from_tagged_slot")?;
        let item = self
            .tagged
            .item(tag)
            .map(|s| s.item_id.clone())
            .ok_or_else(|| InventoryError::InvalidSlotReference(tag.to_string()))?;
        let stack = self.extract_from_tagged_internal(tag, &item, quantity, ChangeReason::Dropped)?;
        let dropped = stack.quantity;
        let location = location.unwrap_or_else(|| self.default_drop_location());
        self.drop_sink.spawn(stack, location);
        Ok(dropped)
    }

    /// Drop everything, one stack at a time, in a circle around the owner
    pub fn drop_all_items(&mut self) -> u32 {
        sentinel("drop_all_items", self.try_drop_all_items())
    }

    /// Fallible [`Inventory::drop_all_items`]
    pub fn try_drop_all_items(&mut self) -> Result<u32> {
        self.ensure_authority("drop_all_items")?;
        let tagged: Vec<(Tag, ItemId, u32)> = self
            .tagged
            .occupied()
            .map(|(tag, stack)| (tag.clone(), stack.item_id.clone(), stack.quantity))
            .collect();
        let generic: Vec<(ItemId, u32)> = self
            .container
            .stacks()
            .iter()
            .map(|s| {
                let max_stack = self.catalog.lookup(&s.item_id).map_or(1, |d| d.max_stack);
                (s.item_id.clone(), max_stack)
            })
            .collect();

        let generic_drops: u32 = generic
            .iter()
            .map(|(item, max_stack)| stacks_needed(self.container_only(item), *max_stack))
            .sum();
        let mut positions = self
            .drop_origin
            .ring(tagged.len() + generic_drops as usize, self.config.default_drop_distance)
            .into_iter();

        let mut dropped = 0;
        for (tag, item, quantity) in tagged {
            let location = positions.next().unwrap_or_else(|| self.default_drop_location());
            let stack = self.extract_from_tagged_internal(&tag, &item, quantity, ChangeReason::Dropped)?;
            dropped += stack.quantity;
            self.drop_sink.spawn(stack, location);
        }
        for (item, max_stack) in generic {
            loop {
                let left = self.container.quantity(&item);
                if left == 0 {
                    break;
                }
                let location = positions.next().unwrap_or_else(|| self.default_drop_location());
                let stack = self.extract_internal(&item, left.min(max_stack), &[], ChangeReason::Dropped, true)?;
                dropped += stack.quantity;
                self.drop_sink.spawn(stack, location);
            }
        }
        Ok(dropped)
    }

    /// Consume one use of an item and run its handler; returns units consumed
    pub fn use_item(&mut self, item: &ItemId, slot: Option<&Tag>) -> u32 {
        sentinel("use_item", self.try_use_item(item, slot))
    }

    /// Fallible [`Inventory::use_item`]
    pub fn try_use_item(&mut self, item: &ItemId, slot: Option<&Tag>) -> Result<u32> {
        self.ensure_authority("use_item")?;
        let def = self.catalog.try_lookup(item)?;
        let usable = def
            .usable
            .clone()
            .ok_or_else(|| InventoryError::NotUsable(item.clone()))?;

        let consumed = match slot {
            Some(tag) => self.extract_from_tagged_internal(tag, item, usable.quantity_per_use, ChangeReason::Consumed)?,
            None => self.extract_internal(item, usable.quantity_per_use, &[], ChangeReason::Consumed, false)?,
        };

        let item_use = ItemUse {
            item: item.clone(),
            behavior_id: usable.behavior_id.clone(),
            quantity: consumed.quantity,
            instances: consumed.instances,
            slot: slot.cloned(),
        };
        match self.use_handlers.get(&usable.behavior_id) {
            Some(handler) => handler(&item_use),
            None => log::debug!("No use handler for behavior {}", usable.behavior_id),
        }
        Ok(item_use.quantity)
    }
}

impl std::fmt::Debug for Inventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inventory")
            .field("container", &self.container)
            .field("tagged", &self.tagged)
            .field("has_authority", &self.authority.has_authority())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::Authority;
    use crate::tagged::UniversalSlotSpec;
    use crate::world::{CollectingDropSink, UnlimitedSource};
    use parking_lot::Mutex;

    fn catalog() -> Arc<ItemCatalog> {
        Arc::new(ItemCatalog::from_definitions([
            ItemDefinition::new("rock", "Rock").with_weight(1.0),
            ItemDefinition::new("helmet", "Helmet")
                .with_max_stack(1)
                .with_category("Armor.Helmet"),
            ItemDefinition::new("spear", "Spear")
                .with_max_stack(1)
                .with_category("TwoHanded"),
            ItemDefinition::new("potion", "Potion")
                .with_max_stack(10)
                .with_usable(1, "heal"),
            ItemDefinition::new("gem", "Gem").with_instances(),
        ]))
    }

    fn config() -> InventoryConfig {
        InventoryConfig::default()
            .with_max_slots(4)
            .with_max_weight(50.0)
            .with_specialized_slot("Armor.Helmet")
            .with_universal_slot(
                UniversalSlotSpec::new("Hand.Right")
                    .blocking("Hand.Left", Some(Tag::new("TwoHanded")))
                    .exclusive("TwoHanded"),
            )
            .with_universal_slot(UniversalSlotSpec::new("Hand.Left"))
    }

    fn inventory() -> Inventory {
        Inventory::new(config(), catalog(), Arc::new(Authority::Server))
    }

    fn give(inv: &mut Inventory, item: &str, quantity: u32) -> u32 {
        let mut source = UnlimitedSource::new(inv.catalog().clone());
        inv.add_item(&mut source, &ItemId::new(item), quantity, true, PlacementPolicy::PreferGeneric)
    }

    #[test]
    fn test_add_prefers_generic() {
        let mut inv = inventory();
        assert_eq!(give(&mut inv, "rock", 7), 7);
        assert_eq!(inv.get_item_count(&ItemId::new("rock")), 7);
        assert_eq!(inv.get_used_slot_count(), 2);
        assert!(inv.get_all_tagged_items().is_empty());
    }

    #[test]
    fn test_add_overflows_into_tagged_slots() {
        let mut inv = inventory();
        // 4 generic slots of 5 plus two hands of 5
        assert_eq!(give(&mut inv, "rock", 40), 30);
        assert_eq!(inv.get_used_slot_count(), 4);
        assert_eq!(inv.tagged_slots().quantity_of(&ItemId::new("rock")), 10);
    }

    #[test]
    fn test_all_or_nothing_add() {
        let mut inv = inventory();
        let mut source = UnlimitedSource::new(inv.catalog().clone());
        let added = inv.add_item(&mut source, &ItemId::new("rock"), 31, false, PlacementPolicy::PreferGeneric);
        assert_eq!(added, 0);
        assert_eq!(inv.get_item_count(&ItemId::new("rock")), 0);
    }

    #[test]
    fn test_remove_quantity_from_tagged_slot() {
        let mut inv = inventory();
        let mut source = UnlimitedSource::new(inv.catalog().clone());
        let rock = ItemId::new("rock");
        let right = Tag::new("Hand.Right");
        inv.add_item(&mut source, &rock, 3, true, PlacementPolicy::PreferTagged);
        assert!(inv.contains_in_tagged_slot(&right, &rock, 3));
        assert!(!inv.contains_in_container(&rock, 1));

        assert_eq!(inv.remove_quantity_from_tagged_slot(&right, 2, ChangeReason::Removed, false), 2);
        assert_eq!(inv.get_item_count(&rock), 3);
        assert!(inv.contains_in_container(&rock, 2));
        assert_eq!(inv.get_container_items(), vec![ItemStack::new("rock", 2)]);

        assert_eq!(inv.remove_quantity_from_tagged_slot(&right, 5, ChangeReason::Removed, true), 1);
        assert_eq!(inv.get_item_count(&rock), 2);
        assert!(inv.get_item_for_tagged_slot(&right).is_none());
    }

    #[test]
    fn test_client_cannot_mutate() {
        let mut inv = Inventory::new(config(), catalog(), Arc::new(Authority::Client));
        let mut source = UnlimitedSource::new(inv.catalog().clone());
        let result = inv.try_add_item(&mut source, &ItemId::new("rock"), 1, true, PlacementPolicy::PreferGeneric);
        assert!(matches!(result, Err(InventoryError::AuthorityViolation(_))));
        assert_eq!(give(&mut inv, "rock", 1), 0);
    }

    #[test]
    fn test_weight_limits_receivable() {
        let mut inv = inventory();
        give(&mut inv, "rock", 18);
        assert_eq!(inv.get_current_weight(), 18.0);
        let config = config().with_max_weight(20.0);
        let mut light = Inventory::new(config, catalog(), Arc::new(Authority::Server));
        give(&mut light, "rock", 18);
        assert_eq!(light.get_receivable_quantity(&ItemId::new("rock")), 2);
    }

    #[test]
    fn test_validator_clamps() {
        let mut inv = inventory();
        inv.set_add_validator(|item, quantity| if item.as_str() == "rock" { quantity.min(3) } else { quantity });
        assert_eq!(give(&mut inv, "rock", 10), 3);
    }

    #[test]
    fn test_add_to_tagged_slot_and_events() {
        let mut inv = inventory();
        let rx = inv.subscribe();
        let mut source = UnlimitedSource::new(inv.catalog().clone());
        let helmet_slot = Tag::new("Armor.Helmet");
        let added = inv.add_item_to_tagged_slot(&mut source, &helmet_slot, &ItemId::new("helmet"), 1, false, false);
        assert_eq!(added, 1);
        assert_eq!(inv.get_used_slot_count(), 0);

        let events = crate::events::drain(&rx);
        assert!(matches!(
            &events[0],
            InventoryEvent::ItemAddedToTaggedSlot { tag, quantity: 1, previous: None, .. } if tag == &helmet_slot
        ));
    }

    #[test]
    fn test_incompatible_tagged_add() {
        let mut inv = inventory();
        let mut source = UnlimitedSource::new(inv.catalog().clone());
        let result = inv.try_add_item_to_tagged_slot(
            &mut source,
            &Tag::new("Armor.Helmet"),
            &ItemId::new("rock"),
            1,
            true,
            false,
        );
        assert!(matches!(result, Err(InventoryError::SlotIncompatible { .. })));
    }

    #[test]
    fn test_two_handed_blocks_other_hand() {
        let mut inv = inventory();
        let mut source = UnlimitedSource::new(inv.catalog().clone());
        let right = Tag::new("Hand.Right");
        let left = Tag::new("Hand.Left");
        inv.add_item_to_tagged_slot(&mut source, &right, &ItemId::new("spear"), 1, false, false);
        assert!(inv.is_tagged_slot_blocked(&left));
        assert_eq!(
            inv.get_receivable_quantity_for_tagged_slot(&ItemId::new("rock"), &left, 1, true, false),
            0
        );

        inv.remove_any_item_from_tagged_slot(&right);
        assert!(!inv.is_tagged_slot_blocked(&left));
        assert_eq!(inv.get_container_only_item_count(&ItemId::new("spear")), 1);
    }

    #[test]
    fn test_push_out_blocking_item() {
        let mut inv = inventory();
        let mut source = UnlimitedSource::new(inv.catalog().clone());
        let right = Tag::new("Hand.Right");
        let left = Tag::new("Hand.Left");
        inv.add_item_to_tagged_slot(&mut source, &left, &ItemId::new("rock"), 2, false, false);

        let refused = inv.try_add_item_to_tagged_slot(&mut source, &right, &ItemId::new("spear"), 1, false, false);
        assert!(matches!(refused, Err(InventoryError::SlotBlocked(_))));

        let added = inv.add_item_to_tagged_slot(&mut source, &right, &ItemId::new("spear"), 1, false, true);
        assert_eq!(added, 1);
        assert!(inv.get_item_for_tagged_slot(&left).is_none());
        assert!(inv.is_tagged_slot_blocked(&left));
        assert_eq!(inv.get_container_only_item_count(&ItemId::new("rock")), 2);
    }

    #[test]
    fn test_extract_takes_generic_first() {
        let mut inv = inventory();
        let mut source = UnlimitedSource::new(inv.catalog().clone());
        let left = Tag::new("Hand.Left");
        give(&mut inv, "rock", 2);
        inv.add_item_to_tagged_slot(&mut source, &left, &ItemId::new("rock"), 3, false, false);
        let rx = inv.subscribe();

        let stack = inv.extract_item(&ItemId::new("rock"), 4, ChangeReason::Removed, false).unwrap();
        assert_eq!(stack.quantity, 4);
        assert_eq!(inv.get_item_for_tagged_slot(&left).unwrap().quantity, 1);

        let events = crate::events::drain(&rx);
        assert!(events.iter().any(|e| matches!(e, InventoryEvent::ItemRemovedFromTaggedSlot { quantity: 2, .. })));
        assert!(events.iter().any(|e| matches!(e, InventoryEvent::ItemRemovedFromContainer { quantity: 2, .. })));
    }

    #[test]
    fn test_instances_follow_units() {
        let mut inv = inventory();
        give(&mut inv, "gem", 3);
        let held = inv.container().stack(&ItemId::new("gem")).unwrap().instances.clone();
        assert_eq!(held.len(), 3);

        let stack = inv
            .try_extract_instances(&ItemId::new("gem"), &held[..1], ChangeReason::Removed)
            .unwrap();
        assert_eq!(stack.instances, vec![held[0]]);
        assert_eq!(inv.get_item_count(&ItemId::new("gem")), 2);
    }

    #[test]
    fn test_drop_item_spawns() {
        let sink = Arc::new(CollectingDropSink::new());
        let mut inv = inventory().with_drop_sink(sink.clone());
        give(&mut inv, "rock", 3);
        assert_eq!(inv.drop_item(&ItemId::new("rock"), 2, None), 2);
        let spawned = sink.take_spawned();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].position, [100.0, 0.0, 0.0]);
        assert_eq!(inv.get_item_count(&ItemId::new("rock")), 1);
    }

    #[test]
    fn test_drop_all_items_one_stack_each() {
        let sink = Arc::new(CollectingDropSink::new());
        let mut inv = inventory().with_drop_sink(sink.clone());
        let mut source = UnlimitedSource::new(inv.catalog().clone());
        give(&mut inv, "rock", 12);
        inv.add_item_to_tagged_slot(&mut source, &Tag::new("Armor.Helmet"), &ItemId::new("helmet"), 1, false, false);

        assert_eq!(inv.drop_all_items(), 13);
        let spawned = sink.take_spawned();
        assert_eq!(spawned.len(), 4);
        assert!(inv.get_all_items().is_empty());
        assert!(inv.get_all_tagged_items().is_empty());
    }

    #[test]
    fn test_use_item_dispatches_handler() {
        let mut inv = inventory();
        let used = Arc::new(Mutex::new(Vec::new()));
        let log = used.clone();
        inv.register_use_handler("heal", move |item_use| log.lock().push(item_use.quantity));
        give(&mut inv, "potion", 2);

        assert_eq!(inv.use_item(&ItemId::new("potion"), None), 1);
        assert_eq!(inv.get_item_count(&ItemId::new("potion")), 1);
        assert_eq!(*used.lock(), vec![1]);
        assert_eq!(inv.use_item(&ItemId::new("rock"), None), 0);
    }

    #[test]
    fn test_clear() {
        let mut inv = inventory();
        let mut source = UnlimitedSource::new(inv.catalog().clone());
        give(&mut inv, "rock", 6);
        inv.add_item_to_tagged_slot(&mut source, &Tag::new("Hand.Right"), &ItemId::new("spear"), 1, false, false);
        let rx = inv.subscribe();

        assert!(inv.clear());
        assert!(inv.get_all_items().is_empty());
        assert!(!inv.is_tagged_slot_blocked(&Tag::new("Hand.Left")));
        assert!(crate::events::drain(&rx)
            .iter()
            .all(|e| matches!(
                e,
                InventoryEvent::ItemRemovedFromContainer { reason: ChangeReason::ForceDestroyed, .. }
                    | InventoryEvent::ItemRemovedFromTaggedSlot { reason: ChangeReason::ForceDestroyed, .. }
            )));
    }

    #[test]
    fn test_pickup_leaves_remainder() {
        let config = InventoryConfig::default().with_max_slots(1);
        let mut inv = Inventory::new(config, catalog(), Arc::new(Authority::Server));
        let mut world = WorldItem::new(ItemStack::new("rock", 8), [0.0; 3]);
        assert_eq!(inv.pickup_item(&mut world, PlacementPolicy::PreferGeneric), 5);
        assert_eq!(world.represented().map(|(_, q)| q), Some(3));
    }

    #[test]
    fn test_snapshot_roundtrip_restores_blocking() {
        let mut inv = inventory();
        let mut source = UnlimitedSource::new(inv.catalog().clone());
        inv.add_item_to_tagged_slot(&mut source, &Tag::new("Hand.Right"), &ItemId::new("spear"), 1, false, false);
        give(&mut inv, "rock", 3);

        let snapshot = inv.snapshot();
        let copy = Inventory::from_snapshot(config(), catalog(), Arc::new(Authority::LocalSimulation), snapshot.clone());
        assert_eq!(copy.snapshot(), snapshot);
        assert!(copy.is_tagged_slot_blocked(&Tag::new("Hand.Left")));
        assert_eq!(copy.get_used_slot_count(), 1);
        assert_eq!(snapshot.container_only(), vec![ItemStack::new("rock", 3)]);
    }
}
