//! Inventory configuration

use crate::error::{InventoryError, Result};
use crate::tag::Tag;
use crate::tagged::{TaggedSlotRegistry, UniversalSlotSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Inventory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Maximum carried weight
    pub max_weight: f32,
    /// Maximum number of generic slots
    pub max_slot_count: u32,
    /// Items occupy width x height slots instead of one
    pub jigsaw_mode: bool,
    /// Radius used when dropping items around the owner
    pub default_drop_distance: f32,
    /// Number of grid positions in a client mirror
    pub grid_slot_count: u32,
    /// Slots that only take items tagged with the slot tag
    pub specialized_slots: Vec<Tag>,
    /// Slots that take any item unless excluded
    pub universal_slots: Vec<UniversalSlotSpec>,
    /// Tags used to group available recipes
    pub recipe_tag_filters: Vec<Tag>,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            max_weight: 999_999.0,
            max_slot_count: i32::MAX as u32,
            jigsaw_mode: false,
            default_drop_distance: 100.0,
            grid_slot_count: 9,
            specialized_slots: Vec::new(),
            universal_slots: Vec::new(),
            recipe_tag_filters: Vec::new(),
        }
    }
}

impl InventoryConfig {
    /// Parse from TOML
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check slot declarations for duplicates and dangling references
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for tag in self
            .specialized_slots
            .iter()
            .chain(self.universal_slots.iter().map(|s| &s.tag))
        {
            if !seen.insert(tag) {
                return Err(InventoryError::Config(format!("slot {tag} declared twice")));
            }
        }
        for slot in &self.universal_slots {
            if let Some(blocks) = &slot.blocks {
                if !self.universal_slots.iter().any(|s| &s.tag == blocks) {
                    log::warn!("Universal slot {} blocks unknown slot {}", slot.tag, blocks);
                }
            }
        }
        if self.max_weight < 0.0 {
            return Err(InventoryError::Config("max_weight is negative".into()));
        }
        Ok(())
    }

    /// Set maximum weight
    pub fn with_max_weight(mut self, max_weight: f32) -> Self {
        self.max_weight = max_weight;
        self
    }

    /// Set maximum generic slot count
    pub fn with_max_slots(mut self, slots: u32) -> Self {
        self.max_slot_count = slots;
        self
    }

    /// Enable footprint mode
    pub fn with_jigsaw_mode(mut self, enabled: bool) -> Self {
        self.jigsaw_mode = enabled;
        self
    }

    /// Set client grid size
    pub fn with_grid_slots(mut self, count: u32) -> Self {
        self.grid_slot_count = count;
        self
    }

    /// Add a specialized slot
    pub fn with_specialized_slot(mut self, tag: impl Into<Tag>) -> Self {
        self.specialized_slots.push(tag.into());
        self
    }

    /// Add a universal slot
    pub fn with_universal_slot(mut self, slot: UniversalSlotSpec) -> Self {
        self.universal_slots.push(slot);
        self
    }

    /// Add a recipe filter tag
    pub fn with_recipe_filter(mut self, tag: impl Into<Tag>) -> Self {
        self.recipe_tag_filters.push(tag.into());
        self
    }

    /// Build the slot registry described by this config
    pub fn registry(&self) -> TaggedSlotRegistry {
        TaggedSlotRegistry::new(self.specialized_slots.clone(), self.universal_slots.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = InventoryConfig::default();
        assert_eq!(config.grid_slot_count, 9);
        assert_eq!(config.default_drop_distance, 100.0);
        assert!(!config.jigsaw_mode);
    }

    #[test]
    fn test_from_toml() {
        let config = InventoryConfig::from_toml_str(
            r#"
            max_weight = 50.0
            max_slot_count = 12
            specialized_slots = ["Armor.Helmet"]
            recipe_tag_filters = ["Recipe.Tools"]

            [[universal_slots]]
            tag = "Hand.Right"
            blocks = "Hand.Left"
            blocking_category = "TwoHanded"

            [[universal_slots]]
            tag = "Hand.Left"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_slot_count, 12);
        assert_eq!(config.universal_slots.len(), 2);
        assert_eq!(config.universal_slots[0].blocks, Some(Tag::new("Hand.Left")));
        assert_eq!(config.grid_slot_count, 9);
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let result = InventoryConfig::from_toml_str(
            r#"
            specialized_slots = ["Hand.Left"]
            [[universal_slots]]
            tag = "Hand.Left"
            "#,
        );
        assert!(matches!(result, Err(InventoryError::Config(_))));
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            InventoryConfig::from_toml_str("max_weight = \"heavy\""),
            Err(InventoryError::Toml(_))
        ));
    }
}
