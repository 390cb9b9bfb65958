//! Error types for the inventory system

use crate::item::ItemId;
use crate::tag::Tag;
use thiserror::Error;

/// Inventory system errors
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Not enough weight or slot capacity for the requested quantity
    #[error("Capacity exceeded: {item} can take {receivable} of {requested}")]
    CapacityExceeded {
        item: ItemId,
        requested: u32,
        receivable: u32,
    },

    /// Item does not fit the slot's category rules
    #[error("Item {item} is not compatible with slot {tag}")]
    SlotIncompatible { item: ItemId, tag: Tag },

    /// Slot is blocked by another slot's occupant
    #[error("Slot {0} is blocked")]
    SlotBlocked(Tag),

    /// Source does not hold enough of the item
    #[error("Insufficient quantity of {item}: need {requested}, have {available}")]
    InsufficientQuantity {
        item: ItemId,
        requested: u32,
        available: u32,
    },

    /// Slot address does not resolve to a configured slot
    #[error("Invalid slot reference: {0}")]
    InvalidSlotReference(String),

    /// A swap could not be carried out as a whole
    #[error("Swap rejected: {0}")]
    SwapRejected(String),

    /// Mutating call made without authority
    #[error("{0} called from non authority")]
    AuthorityViolation(&'static str),

    /// Crafting removed less than the recipe guaranteed
    #[error("Recipe invariant violated for {item}: removed {removed} of {required}")]
    RecipeInvariantViolation {
        item: ItemId,
        required: u32,
        removed: u32,
    },

    /// Client mirror disagrees with authority
    #[error("Prediction desync: {0}")]
    PredictionDesync(String),

    /// Item id missing from the catalog
    #[error("Unknown item: {0}")]
    UnknownItem(ItemId),

    /// Recipe id missing from the recipe book
    #[error("Unknown recipe: {0}")]
    UnknownRecipe(String),

    /// Item has no usable behavior
    #[error("Item {0} cannot be used")]
    NotUsable(ItemId),

    /// Catalog consulted before it finished loading
    #[error("Item catalog is not ready")]
    CatalogNotReady,

    /// Catalog lifecycle step out of order
    #[error("Invalid catalog transition from {from} to {to}")]
    InvalidCatalogTransition {
        from: &'static str,
        to: &'static str,
    },

    /// Invalid configuration
    #[error("Invalid inventory configuration: {0}")]
    Config(String),

    /// IO error while loading data
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl InventoryError {
    /// Whether this error marks a caller or state bug rather than an expected rejection
    pub fn is_anomaly(&self) -> bool {
        matches!(
            self,
            Self::AuthorityViolation(_) | Self::RecipeInvariantViolation { .. }
        )
    }

    /// Log the error at the level matching its kind
    pub(crate) fn log(&self, context: &str) {
        if self.is_anomaly() {
            log::error!("{context}: {self}");
        } else {
            log::debug!("{context}: {self}");
        }
    }
}

/// Result type for inventory operations
pub type Result<T> = std::result::Result<T, InventoryError>;

/// Collapse a fallible operation into its sentinel value, logging the error
pub(crate) fn sentinel<T: Default>(context: &str, result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            err.log(context);
            T::default()
        }
    }
}
