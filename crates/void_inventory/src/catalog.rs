//! Item definitions and the shared item catalog
//!
//! The catalog is passed explicitly to every inventory. It moves through a
//! `NotLoaded -> Loading -> Ready` lifecycle and only answers lookups once
//! ready, so a half-loaded catalog can never feed capacity math.

use crate::error::{InventoryError, Result};
use crate::item::{InstanceId, ItemId};
use crate::tag::{Tag, TagSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Numeric contract of a usable item; effects live in an external handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsableBehavior {
    /// Units consumed per use
    pub quantity_per_use: u32,
    /// Key of the handler that applies the effect
    pub behavior_id: String,
}

/// Static item metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemDefinition {
    /// Unique identifier
    pub id: ItemId,
    /// Display name
    pub name: String,
    /// Maximum stack size (1 = not stackable)
    pub max_stack: u32,
    /// Weight per unit
    pub unit_weight: f32,
    /// Category tags, checked against slot tags
    pub categories: TagSet,
    /// Width and height in grid slots when footprint mode is on
    pub footprint: (u32, u32),
    /// Whether each unit carries instance data
    pub uses_instances: bool,
    /// Use behavior, if the item can be used
    pub usable: Option<UsableBehavior>,
}

impl ItemDefinition {
    /// Create a new item definition
    pub fn new(id: impl Into<ItemId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set max stack size
    pub fn with_max_stack(mut self, max: u32) -> Self {
        self.max_stack = max.max(1);
        self
    }

    /// Set weight per unit
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.unit_weight = weight;
        self
    }

    /// Add a category tag
    pub fn with_category(mut self, category: impl Into<Tag>) -> Self {
        self.categories.insert(category);
        self
    }

    /// Set footprint
    pub fn with_footprint(mut self, width: u32, height: u32) -> Self {
        self.footprint = (width.max(1), height.max(1));
        self
    }

    /// Mark as carrying per-unit instance data
    pub fn with_instances(mut self) -> Self {
        self.uses_instances = true;
        self
    }

    /// Make usable
    pub fn with_usable(mut self, quantity_per_use: u32, behavior_id: impl Into<String>) -> Self {
        self.usable = Some(UsableBehavior {
            quantity_per_use: quantity_per_use.max(1),
            behavior_id: behavior_id.into(),
        });
        self
    }

    /// Check if stackable
    pub fn is_stackable(&self) -> bool {
        self.max_stack > 1
    }

    /// Slots one stack occupies
    pub fn slots_per_stack(&self, footprint_mode: bool) -> u32 {
        if footprint_mode {
            self.footprint.0.max(1) * self.footprint.1.max(1)
        } else {
            1
        }
    }
}

impl Default for ItemDefinition {
    fn default() -> Self {
        Self {
            id: ItemId::new("unknown"),
            name: String::new(),
            max_stack: 5,
            unit_weight: 0.0,
            categories: TagSet::new(),
            footprint: (1, 1),
            uses_instances: false,
            usable: None,
        }
    }
}

/// Catalog lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogState {
    /// Nothing registered yet
    NotLoaded,
    /// Definitions are being registered
    Loading,
    /// Lookups are served
    Ready,
}

impl CatalogState {
    fn name(self) -> &'static str {
        match self {
            Self::NotLoaded => "not_loaded",
            Self::Loading => "loading",
            Self::Ready => "ready",
        }
    }
}

struct CatalogInner {
    state: CatalogState,
    items: HashMap<ItemId, Arc<ItemDefinition>>,
}

/// Shared registry of item definitions
pub struct ItemCatalog {
    inner: RwLock<CatalogInner>,
    next_instance: AtomicU64,
}

impl ItemCatalog {
    /// Create an empty, unloaded catalog
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CatalogInner {
                state: CatalogState::NotLoaded,
                items: HashMap::new(),
            }),
            next_instance: AtomicU64::new(1),
        }
    }

    /// Build a ready catalog from definitions
    pub fn from_definitions(defs: impl IntoIterator<Item = ItemDefinition>) -> Self {
        let catalog = Self::new();
        {
            let mut inner = catalog.inner.write();
            for def in defs {
                inner.items.insert(def.id.clone(), Arc::new(def));
            }
            inner.state = CatalogState::Ready;
        }
        catalog
    }

    /// Current lifecycle state
    pub fn state(&self) -> CatalogState {
        self.inner.read().state
    }

    /// Start (re)loading definitions
    pub fn begin_loading(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.state == CatalogState::Loading {
            return Err(InventoryError::InvalidCatalogTransition {
                from: inner.state.name(),
                to: CatalogState::Loading.name(),
            });
        }
        inner.state = CatalogState::Loading;
        Ok(())
    }

    /// Register a definition while loading
    pub fn register(&self, def: ItemDefinition) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.state != CatalogState::Loading {
            return Err(InventoryError::InvalidCatalogTransition {
                from: inner.state.name(),
                to: CatalogState::Loading.name(),
            });
        }
        if def.max_stack == 0 {
            return Err(InventoryError::Config(format!(
                "item {} has a max stack of 0",
                def.id
            )));
        }
        if inner.items.insert(def.id.clone(), Arc::new(def)).is_some() {
            log::warn!("Item definition replaced during load");
        }
        Ok(())
    }

    /// Finish loading and start serving lookups
    pub fn finish_loading(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.state != CatalogState::Loading {
            return Err(InventoryError::InvalidCatalogTransition {
                from: inner.state.name(),
                to: CatalogState::Ready.name(),
            });
        }
        inner.state = CatalogState::Ready;
        log::info!("Item catalog ready with {} definitions", inner.items.len());
        Ok(())
    }

    /// Load a JSON array of definitions
    pub fn load_json(&self, json: &str) -> Result<usize> {
        let defs: Vec<ItemDefinition> = serde_json::from_str(json)?;
        self.begin_loading()?;
        let count = defs.len();
        for def in defs {
            if let Err(err) = self.register(def) {
                self.inner.write().state = CatalogState::NotLoaded;
                return Err(err);
            }
        }
        self.finish_loading()?;
        Ok(count)
    }

    /// Load a JSON definitions file
    pub fn load_json_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        self.load_json(&content)
    }

    /// Look up a definition; `None` for unknown items or an unready catalog
    pub fn lookup(&self, id: &ItemId) -> Option<Arc<ItemDefinition>> {
        let inner = self.inner.read();
        if inner.state != CatalogState::Ready {
            return None;
        }
        inner.items.get(id).cloned()
    }

    /// Look up a definition, reporting why it is missing
    pub fn try_lookup(&self, id: &ItemId) -> Result<Arc<ItemDefinition>> {
        let inner = self.inner.read();
        if inner.state != CatalogState::Ready {
            return Err(InventoryError::CatalogNotReady);
        }
        inner
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| InventoryError::UnknownItem(id.clone()))
    }

    /// Number of registered definitions
    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    /// Whether no definitions are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocate `count` fresh instance ids
    pub fn allocate_instances(&self, count: u32) -> Vec<InstanceId> {
        let first = self.next_instance.fetch_add(count as u64, Ordering::Relaxed);
        (first..first + count as u64).map(InstanceId).collect()
    }
}

impl Default for ItemCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ItemCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ItemCatalog")
            .field("state", &inner.state)
            .field("items", &inner.items.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_definition() {
        let helmet = ItemDefinition::new("helmet", "Helmet")
            .with_category("Armor.Helmet")
            .with_max_stack(1)
            .with_footprint(2, 2);
        assert!(!helmet.is_stackable());
        assert!(helmet.categories.has_tag(&Tag::new("Armor")));
        assert_eq!(helmet.slots_per_stack(true), 4);
        assert_eq!(helmet.slots_per_stack(false), 1);

        let rock = ItemDefinition::new("rock", "Rock").with_max_stack(5).with_usable(0, "throw");
        assert!(rock.is_stackable());
        let usable = rock.usable.unwrap();
        assert_eq!(usable.quantity_per_use, 1);
        assert_eq!(usable.behavior_id, "throw");
    }

    #[test]
    fn test_lifecycle() {
        let catalog = ItemCatalog::new();
        assert!(catalog.lookup(&ItemId::new("rock")).is_none());
        assert!(catalog.register(ItemDefinition::new("rock", "Rock")).is_err());

        catalog.begin_loading().unwrap();
        catalog.register(ItemDefinition::new("rock", "Rock")).unwrap();
        assert!(matches!(
            catalog.try_lookup(&ItemId::new("rock")),
            Err(InventoryError::CatalogNotReady)
        ));

        catalog.finish_loading().unwrap();
        assert_eq!(catalog.state(), CatalogState::Ready);
        assert!(catalog.lookup(&ItemId::new("rock")).is_some());
        assert!(matches!(
            catalog.try_lookup(&ItemId::new("stone")),
            Err(InventoryError::UnknownItem(_))
        ));
    }

    #[test]
    fn test_load_json() {
        let catalog = ItemCatalog::new();
        let count = catalog
            .load_json(
                r#"[
                    {"id": "rock", "name": "Rock", "unit_weight": 1.5},
                    {"id": "helmet", "name": "Helmet", "max_stack": 1, "categories": ["Armor.Helmet"]}
                ]"#,
            )
            .unwrap();
        assert_eq!(count, 2);

        let rock = catalog.lookup(&ItemId::new("rock")).unwrap();
        assert_eq!(rock.max_stack, 5);
        assert_eq!(rock.footprint, (1, 1));
        let helmet = catalog.lookup(&ItemId::new("helmet")).unwrap();
        assert!(helmet.categories.has_tag(&Tag::new("Armor")));
    }

    #[test]
    fn test_instance_allocation() {
        let catalog = ItemCatalog::new();
        let first = catalog.allocate_instances(2);
        let second = catalog.allocate_instances(1);
        assert_eq!(first.len(), 2);
        assert!(!first.contains(&second[0]));
    }
}
