//! Client prediction and reconciliation
//!
//! A client predicts an operation by running it against a scratch inventory
//! rebuilt from its mirror under [`Authority::LocalSimulation`]. The events
//! the scratch run produces are applied to the mirror right away and queued
//! as pending operations; the request goes to the outbox for the authority.
//!
//! When the authority's events arrive, an event that structurally matches a
//! pending operation confirms it and leaves the mirror alone. Any other event
//! is applied to the mirror. An event the mirror cannot absorb puts the
//! reconciler in [`ReconcilerState::Desynced`] until a full update.

use crate::authority::Authority;
use crate::catalog::ItemCatalog;
use crate::config::InventoryConfig;
use crate::crafting::Recipe;
use crate::error::{InventoryError, Result};
use crate::events::{drain, InventoryEvent};
use crate::inventory::{Inventory, InventorySnapshot};
use crate::item::{ItemId, SlotAddress};
use crate::mirror::{GridHints, InventoryMirror};
use crate::planner::PlacementPolicy;
use crate::request::InventoryRequest;
use crate::tag::Tag;
use crate::tagged::TaggedSlotRegistry;
use crate::transfer::MoveRequest;
use crate::world::WorldItem;
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Kind of a predicted change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PendingKind {
    Add,
    Remove,
    AddTagged,
    RemoveTagged,
}

/// A predicted change awaiting confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub kind: PendingKind,
    pub tag: Option<Tag>,
    pub item: ItemId,
    pub quantity: u32,
}

impl PendingOperation {
    /// Structural form of an item event
    pub fn from_event(event: &InventoryEvent) -> Option<Self> {
        let (kind, tag, item, quantity) = match event {
            InventoryEvent::ItemAddedToContainer { item, quantity, .. } => (PendingKind::Add, None, item, *quantity),
            InventoryEvent::ItemRemovedFromContainer { item, quantity, .. } => {
                (PendingKind::Remove, None, item, *quantity)
            }
            InventoryEvent::ItemAddedToTaggedSlot { tag, item, quantity, .. } => {
                (PendingKind::AddTagged, Some(tag.clone()), item, *quantity)
            }
            InventoryEvent::ItemRemovedFromTaggedSlot { tag, item, quantity, .. } => {
                (PendingKind::RemoveTagged, Some(tag.clone()), item, *quantity)
            }
            _ => return None,
        };
        Some(Self {
            kind,
            tag,
            item: item.clone(),
            quantity,
        })
    }
}

/// Reconciler state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcilerState {
    /// Nothing pending
    #[default]
    Idle,
    /// Predictions sent, none confirmed yet
    Predicting,
    /// Applying authority events
    Reconciling,
    /// Mirror diverged; waiting for a full update
    Desynced,
}

/// Client-side predictor for one inventory
pub struct PredictionReconciler {
    config: InventoryConfig,
    catalog: Arc<ItemCatalog>,
    registry: TaggedSlotRegistry,
    mirror: InventoryMirror,
    pending: VecDeque<PendingOperation>,
    outbox: Vec<InventoryRequest>,
    state: ReconcilerState,
}

impl PredictionReconciler {
    /// Create with an empty mirror
    pub fn new(config: InventoryConfig, catalog: Arc<ItemCatalog>) -> Self {
        let registry = config.registry();
        let mirror = InventoryMirror::new(config.grid_slot_count as usize, registry.all_tags().cloned());
        Self {
            config,
            catalog,
            registry,
            mirror,
            pending: VecDeque::new(),
            outbox: Vec::new(),
            state: ReconcilerState::Idle,
        }
    }

    pub fn mirror(&self) -> &InventoryMirror {
        &self.mirror
    }

    pub fn state(&self) -> ReconcilerState {
        self.state
    }

    /// Predicted changes not yet confirmed
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingOperation> {
        self.pending.iter()
    }

    /// Take the requests to send to the authority
    pub fn take_requests(&mut self) -> Vec<InventoryRequest> {
        std::mem::take(&mut self.outbox)
    }

    /// Whether a tagged slot is blocked in the mirror
    pub fn is_tagged_slot_blocked(&self, tag: &Tag) -> bool {
        self.scratch().is_tagged_slot_blocked(tag)
    }

    /// Scratch inventory built from the mirror
    fn scratch(&self) -> Inventory {
        let config = self
            .config
            .clone()
            .with_max_slots(self.config.max_slot_count.min(self.config.grid_slot_count));
        Inventory::from_snapshot(
            config,
            self.catalog.clone(),
            Arc::new(Authority::LocalSimulation),
            self.mirror.to_snapshot(),
        )
    }

    fn max_stack(&self, item: &ItemId) -> Result<u32> {
        Ok(self.catalog.try_lookup(item)?.max_stack)
    }

    fn ensure_in_sync(&self) -> Result<()> {
        if self.state == ReconcilerState::Desynced {
            return Err(InventoryError::PredictionDesync("awaiting full update".into()));
        }
        Ok(())
    }

    /// Run `op` on a scratch copy, apply its events to the mirror and queue the request
    fn predict(
        &mut self,
        request: InventoryRequest,
        hints: GridHints,
        op: impl FnOnce(&mut Inventory) -> Result<u32>,
    ) -> Result<u32> {
        self.ensure_in_sync()?;
        let mut scratch = self.scratch();
        let rx = scratch.subscribe();
        let result = op(&mut scratch)?;

        let ops: Vec<PendingOperation> = drain(&rx).iter().filter_map(PendingOperation::from_event).collect();
        let before = self.mirror.clone();
        if let Err(err) = self.apply_ops(&ops, hints) {
            self.mirror = before;
            return Err(err);
        }

        log::debug!("Predicted {request:?}: {} pending changes", ops.len());
        self.pending.extend(ops);
        self.outbox.push(request);
        self.state = ReconcilerState::Predicting;
        Ok(result)
    }

    /// Apply changes to the mirror, generic removals first
    fn apply_ops(&mut self, ops: &[PendingOperation], hints: GridHints) -> Result<()> {
        for op in ops.iter().filter(|op| op.kind == PendingKind::Remove) {
            self.apply_op(op, hints)?;
        }
        for op in ops.iter().filter(|op| op.kind != PendingKind::Remove) {
            self.apply_op(op, hints)?;
        }
        Ok(())
    }

    fn apply_op(&mut self, op: &PendingOperation, hints: GridHints) -> Result<()> {
        match (&op.kind, &op.tag) {
            (PendingKind::Add, _) => {
                let max_stack = self.max_stack(&op.item)?;
                self.mirror.add_to_grid(&op.item, op.quantity, max_stack, hints.add_to)
            }
            (PendingKind::Remove, _) => self.mirror.remove_from_grid(&op.item, op.quantity, hints.remove_from),
            (PendingKind::AddTagged, Some(tag)) => self.mirror.add_to_tagged(tag, &op.item, op.quantity),
            (PendingKind::RemoveTagged, Some(tag)) => self.mirror.remove_from_tagged(tag, &op.item, op.quantity),
            _ => Err(InventoryError::PredictionDesync(format!("{op:?} without a tag"))),
        }
    }

    // ------------------------------------------------------------------
    // Predictions
    // ------------------------------------------------------------------

    /// Predict a move between grid cells and tagged slots
    ///
    /// `quantity` of `None` moves the whole source stack. Grid to grid moves
    /// only rearrange the mirror.
    pub fn predict_move(&mut self, source: SlotAddress, target: SlotAddress, quantity: Option<u32>) -> Result<u32> {
        self.ensure_in_sync()?;
        let source_stack = match &source {
            SlotAddress::Generic(index) => self.mirror.grid_slot(*index as usize),
            SlotAddress::Tagged(tag) => self.mirror.tagged_item(tag),
            SlotAddress::Container => None,
        }
        .cloned()
        .ok_or_else(|| InventoryError::InvalidSlotReference(source.to_string()))?;
        let item = source_stack.item_id.clone();
        let quantity = quantity.unwrap_or(source_stack.quantity).min(source_stack.quantity);
        let splitting = quantity < source_stack.quantity;
        let max_stack = self.max_stack(&item)?;

        if let (SlotAddress::Generic(from), SlotAddress::Generic(to)) = (&source, &target) {
            return if splitting {
                self.mirror.split_stack(*from as usize, *to as usize, quantity, max_stack)
            } else {
                self.mirror.move_in_grid(*from as usize, *to as usize, max_stack)
            };
        }

        let mut request = MoveRequest::new(item.clone(), quantity, server_address(&source), server_address(&target));
        let mut hints = GridHints::default();
        if let SlotAddress::Generic(index) = &source {
            hints.remove_from = Some(*index as usize);
            hints.add_to = Some(*index as usize);
        }
        if let SlotAddress::Generic(index) = &target {
            hints.add_to = Some(*index as usize);
            hints.remove_from = Some(*index as usize);
            if let (Some(occupant), false) = (self.mirror.grid_slot(*index as usize), splitting) {
                if occupant.item_id != item && !source.is_generic() {
                    request = request.with_swap_back(occupant.item_id.clone(), occupant.quantity);
                }
            }
        }

        if let SlotAddress::Tagged(target_tag) = &target {
            if self.scratch().validate_move(&request) == 0 {
                self.unblock(target_tag, &item)?;
            }
        }

        let wire = InventoryRequest::MoveItem {
            item: item.clone(),
            quantity,
            source: source.tag().cloned(),
            target: target.tag().cloned(),
            swap_item: request.swap_back.as_ref().map(|(i, _)| i.clone()),
            swap_quantity: request.swap_back.as_ref().map_or(0, |(_, q)| *q),
        };
        self.predict(wire, hints, |inv| inv.try_move_item(&request))
    }

    /// Empty whatever keeps `item` out of `target` into free grid cells
    fn unblock(&mut self, target: &Tag, item: &ItemId) -> Result<()> {
        let def = self.catalog.try_lookup(item)?;
        let scratch = self.scratch();
        let mut to_clear: Vec<Tag> = Vec::new();
        if scratch.is_tagged_slot_blocked(target) {
            to_clear.extend(
                self.registry
                    .blockers_of(target)
                    .filter(|spec| self.mirror.tagged_item(&spec.tag).is_some())
                    .map(|spec| spec.tag.clone()),
            );
        }
        if let Some(conflict) = scratch.indirect_blocking_conflict(target, &def) {
            to_clear.push(conflict);
        }

        for tag in to_clear {
            let Some(empty) = self.mirror.first_empty_grid_slot() else {
                return Err(InventoryError::SlotBlocked(tag));
            };
            log::debug!("Moving {tag} contents to grid[{empty}] to free {target}");
            self.predict_move(SlotAddress::Tagged(tag), SlotAddress::Generic(empty as u32), None)?;
        }
        Ok(())
    }

    /// Predict dropping units, generic storage first
    pub fn predict_drop(&mut self, item: &ItemId, quantity: u32) -> Result<u32> {
        let request = InventoryRequest::DropItem {
            item: item.clone(),
            quantity,
        };
        self.predict(request, GridHints::default(), |inv| inv.try_drop_item(item, quantity, None))
    }

    /// Predict dropping from a tagged slot
    pub fn predict_drop_from_tagged(&mut self, tag: &Tag, quantity: u32) -> Result<u32> {
        let request = InventoryRequest::DropFromTaggedSlot {
            tag: tag.clone(),
            quantity,
        };
        self.predict(request, GridHints::default(), |inv| {
            inv.try_drop_from_tagged_slot(tag, quantity, None)
        })
    }

    /// Predict using an item
    pub fn predict_use(&mut self, item: &ItemId, tag: Option<&Tag>) -> Result<u32> {
        let request = InventoryRequest::UseItem {
            item: item.clone(),
            tag: tag.cloned(),
        };
        self.predict(request, GridHints::default(), |inv| inv.try_use_item(item, tag))
    }

    /// Predict picking up a world item
    pub fn predict_pickup(&mut self, world_item: &WorldItem, policy: PlacementPolicy) -> Result<u32> {
        let Some((item, quantity)) = world_item.represented().map(|(i, q)| (i.clone(), q)) else {
            return Ok(0);
        };
        let request = InventoryRequest::Pickup {
            world_item: world_item.id,
            policy,
        };
        let mut copy = world_item.clone();
        self.predict(request, GridHints::default(), |inv| {
            inv.try_add_item(&mut copy, &item, quantity, true, policy)
        })
    }

    /// Predict crafting a recipe
    pub fn predict_craft(&mut self, recipe: &Recipe) -> Result<u32> {
        let request = InventoryRequest::Craft {
            recipe: recipe.id.clone(),
        };
        self.predict(request, GridHints::default(), |inv| inv.try_craft(recipe).map(|_| 1))
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Apply one authority event
    pub fn apply_event(&mut self, event: &InventoryEvent) -> Result<()> {
        if self.state == ReconcilerState::Desynced {
            log::debug!("Ignoring event while desynced");
            return Ok(());
        }
        let Some(op) = PendingOperation::from_event(event) else {
            return Ok(());
        };

        if let Some(position) = self.pending.iter().position(|p| p == &op) {
            self.pending.remove(position);
        } else {
            self.state = ReconcilerState::Reconciling;
            if let Err(err) = self.apply_op(&op, GridHints::default()) {
                log::warn!("Mirror desynced: {err}");
                self.state = ReconcilerState::Desynced;
                self.pending.clear();
                return Err(err);
            }
        }

        self.state = if self.pending.is_empty() {
            ReconcilerState::Idle
        } else {
            ReconcilerState::Predicting
        };
        Ok(())
    }

    /// Drain a subscription; returns how many events were read
    pub fn reconcile(&mut self, rx: &Receiver<InventoryEvent>) -> Result<usize> {
        let mut read = 0;
        let mut first_error = None;
        while let Ok(event) = rx.try_recv() {
            read += 1;
            if let Err(err) = self.apply_event(&event) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(read),
        }
    }

    /// Replace the mirror with the authority's state and drop all predictions
    ///
    /// Stays [`ReconcilerState::Desynced`] if the authority's container does
    /// not fit the grid.
    pub fn force_full_update(&mut self, snapshot: &InventorySnapshot) -> Result<()> {
        self.pending.clear();
        let catalog = self.catalog.clone();
        let rebuilt = self
            .mirror
            .rebuild(snapshot, |item| catalog.lookup(item).map_or(1, |d| d.max_stack));
        self.state = match rebuilt {
            Ok(()) => ReconcilerState::Idle,
            Err(_) => ReconcilerState::Desynced,
        };
        rebuilt
    }

    /// Resync when nothing is pending but the mirror disagrees with `snapshot`
    ///
    /// Returns whether a full update ran.
    pub fn verify(&mut self, snapshot: &InventorySnapshot) -> Result<bool> {
        let desynced = self.state == ReconcilerState::Desynced;
        if !desynced && (!self.pending.is_empty() || self.is_settled(snapshot)) {
            return Ok(false);
        }
        log::warn!("Mirror disagrees with the authority; running a full update");
        self.force_full_update(snapshot)?;
        Ok(true)
    }

    /// Whether the mirror agrees with the authority and nothing is pending
    pub fn is_settled(&self, snapshot: &InventorySnapshot) -> bool {
        if !self.pending.is_empty() || self.mirror.totals() != snapshot.totals() {
            return false;
        }
        self.mirror.tagged_slots().all(|(tag, stack)| {
            let expected = snapshot.tagged_item(tag);
            match (stack, expected) {
                (None, None) => true,
                (Some(a), Some(b)) => a.item_id == b.item_id && a.quantity == b.quantity,
                _ => false,
            }
        })
    }
}

fn server_address(address: &SlotAddress) -> SlotAddress {
    match address {
        SlotAddress::Tagged(tag) => SlotAddress::Tagged(tag.clone()),
        _ => SlotAddress::Container,
    }
}
