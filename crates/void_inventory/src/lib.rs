//! Void Inventory - Authoritative Item Inventory
//!
//! This crate provides server-authoritative inventories with client-side
//! prediction.
//!
//! # Features
//!
//! - Item catalog with stack sizes, weights, categories and instance tracking
//! - Generic storage bounded by weight and slot count
//! - Tagged slots (hands, belts, armor) with blocking and exclusivity rules
//! - Distribution planning across generic storage and tagged slots
//! - Moves with swaps and rollback, within and between inventories
//! - Recipe book and crafting
//! - Client mirror with prediction and reconciliation of authority events
//!
//! # Example
//!
//! ```ignore
//! use void_inventory::prelude::*;
//! use std::sync::Arc;
//!
//! let catalog = Arc::new(ItemCatalog::from_definitions([
//!     ItemDefinition::new("rock", "Rock").with_max_stack(5),
//! ]));
//! let config = InventoryConfig::default()
//!     .with_universal_slot(UniversalSlotSpec::new("Hand.Left"));
//!
//! let mut inventory = Inventory::new(config, catalog.clone(), Arc::new(Authority::Server));
//! let mut source = UnlimitedSource::new(catalog);
//! inventory.add_item(&mut source, &ItemId::new("rock"), 8, true, PlacementPolicy::PreferGeneric);
//!
//! let request = MoveRequest::new("rock", 3, SlotAddress::Container, SlotAddress::Tagged(Tag::new("Hand.Left")));
//! inventory.move_item(&request);
//! ```

pub mod authority;
pub mod capacity;
pub mod catalog;
pub mod config;
pub mod crafting;
pub mod error;
pub mod events;
pub mod inventory;
pub mod item;
pub mod mirror;
pub mod planner;
pub mod reconciler;
pub mod request;
pub mod tag;
pub mod tagged;
pub mod transfer;
pub mod world;

pub mod prelude {
    pub use crate::authority::{Authority, AuthorityGate, SwitchableAuthority};
    pub use crate::capacity::Container;
    pub use crate::catalog::{CatalogState, ItemCatalog, ItemDefinition, UsableBehavior};
    pub use crate::config::InventoryConfig;
    pub use crate::crafting::{Recipe, RecipeBook, RecipeComponent, RecipeId, RecipeOutput};
    pub use crate::error::{InventoryError, Result};
    pub use crate::events::{ChangeReason, InventoryEvent};
    pub use crate::inventory::{Inventory, InventorySnapshot, ItemUse};
    pub use crate::item::{InstanceId, ItemId, ItemStack, SlotAddress};
    pub use crate::mirror::{GridHints, InventoryMirror};
    pub use crate::planner::{DistributionPlan, Placement, PlacementPolicy};
    pub use crate::reconciler::{PendingOperation, PredictionReconciler, ReconcilerState};
    pub use crate::request::InventoryRequest;
    pub use crate::tag::{Tag, TagSet};
    pub use crate::tagged::{TaggedSlotRegistry, UniversalSlotSpec};
    pub use crate::transfer::MoveRequest;
    pub use crate::world::{
        CollectingDropSink, DiscardDropSink, ItemSource, UnlimitedSource, WorldDropSink, WorldItem,
    };
}

pub use prelude::*;
