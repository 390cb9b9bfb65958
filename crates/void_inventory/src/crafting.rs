//! Recipes and crafting
//!
//! A [`RecipeBook`] holds the recipes an inventory knows and which of them
//! are unlocked. Availability (unlocked and craftable from current contents)
//! is recomputed after every change to the inventory and published as
//! [`InventoryEvent::AvailableRecipesUpdated`] when it differs.

use crate::error::{sentinel, InventoryError, Result};
use crate::events::{ChangeReason, InventoryEvent};
use crate::inventory::Inventory;
use crate::item::ItemId;
use crate::planner::PlacementPolicy;
use crate::tag::{Tag, TagSet};
use crate::world::{ItemSource, UnlimitedSource};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Recipe identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipeId(String);

impl RecipeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecipeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One required input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeComponent {
    pub item: ItemId,
    pub quantity: u32,
}

/// What a recipe produces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecipeOutput {
    /// Items added to the crafting inventory
    Item(ItemId),
    /// A non-item object the host spawns on [`InventoryEvent::CraftConfirmed`]
    Object(String),
}

/// A crafting recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: RecipeId,
    pub output: RecipeOutput,
    /// Units produced per craft
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub components: Vec<RecipeComponent>,
    /// Grouping tags, matched against recipe filters
    #[serde(default)]
    pub tags: TagSet,
}

fn default_quantity() -> u32 {
    1
}

impl Recipe {
    /// Recipe producing one unit of an item
    pub fn item(id: impl Into<RecipeId>, output: impl Into<ItemId>) -> Self {
        Self {
            id: id.into(),
            output: RecipeOutput::Item(output.into()),
            quantity: 1,
            components: Vec::new(),
            tags: TagSet::new(),
        }
    }

    /// Recipe producing one non-item object
    pub fn object(id: impl Into<RecipeId>, class: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            output: RecipeOutput::Object(class.into()),
            quantity: 1,
            components: Vec::new(),
            tags: TagSet::new(),
        }
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_component(mut self, item: impl Into<ItemId>, quantity: u32) -> Self {
        self.components.push(RecipeComponent {
            item: item.into(),
            quantity,
        });
        self
    }

    pub fn with_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tags.insert(tag);
        self
    }

    /// Components with duplicates summed
    pub fn requirements(&self) -> BTreeMap<ItemId, u32> {
        let mut needed = BTreeMap::new();
        for component in &self.components {
            *needed.entry(component.item.clone()).or_insert(0) += component.quantity;
        }
        needed
    }
}

/// Known recipes and their lock state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipeBook {
    recipes: Vec<Recipe>,
    locked: HashSet<RecipeId>,
    #[serde(skip)]
    available: Vec<RecipeId>,
}

impl RecipeBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON array of recipes, all unlocked
    pub fn from_json(json: &str) -> Result<Self> {
        let recipes: Vec<Recipe> = serde_json::from_str(json)?;
        let mut book = Self::new();
        for recipe in recipes {
            book.add_recipe(recipe, true);
        }
        Ok(book)
    }

    /// Add or replace a recipe
    pub fn add_recipe(&mut self, recipe: Recipe, unlocked: bool) {
        if unlocked {
            self.locked.remove(&recipe.id);
        } else {
            self.locked.insert(recipe.id.clone());
        }
        match self.recipes.iter_mut().find(|r| r.id == recipe.id) {
            Some(existing) => *existing = recipe,
            None => self.recipes.push(recipe),
        }
    }

    pub fn get(&self, id: &RecipeId) -> Option<&Recipe> {
        self.recipes.iter().find(|r| &r.id == id)
    }

    pub fn is_unlocked(&self, id: &RecipeId) -> bool {
        self.get(id).is_some() && !self.locked.contains(id)
    }

    /// Lock or unlock; returns whether anything changed
    pub fn set_locked(&mut self, id: &RecipeId, locked: bool) -> Result<bool> {
        if self.get(id).is_none() {
            return Err(InventoryError::UnknownRecipe(id.to_string()));
        }
        Ok(if locked {
            self.locked.insert(id.clone())
        } else {
            self.locked.remove(id)
        })
    }

    /// Unlocked recipes in insertion order
    pub fn all_unlocked_recipes(&self) -> impl Iterator<Item = &Recipe> {
        self.recipes.iter().filter(|r| !self.locked.contains(&r.id))
    }

    /// Unlocked recipes whose tags match `filter`
    pub fn unlocked_with_tag<'a>(&'a self, filter: &'a Tag) -> impl Iterator<Item = &'a Recipe> {
        self.all_unlocked_recipes().filter(move |r| r.tags.has_tag(filter))
    }

    /// Last computed availability
    pub fn available(&self) -> &[RecipeId] {
        &self.available
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    pub(crate) fn set_available(&mut self, available: Vec<RecipeId>) -> bool {
        if self.available == available {
            return false;
        }
        self.available = available;
        true
    }
}

impl Inventory {
    /// Whether the container holds every component
    pub fn can_craft(&self, recipe: &Recipe) -> bool {
        recipe
            .requirements()
            .iter()
            .all(|(item, quantity)| self.container.quantity(item) >= *quantity)
    }

    /// Craft a recipe; false when components are missing
    pub fn craft(&mut self, recipe: &Recipe) -> bool {
        sentinel("craft", self.try_craft(recipe).map(|_| true))
    }

    /// Fallible [`Inventory::craft`]
    pub fn try_craft(&mut self, recipe: &Recipe) -> Result<()> {
        self.ensure_authority("craft")?;
        let missing = recipe
            .requirements()
            .into_iter()
            .find(|(item, quantity)| self.container.quantity(item) < *quantity);
        if let Some((item, required)) = missing {
            let available = self.container.quantity(&item);
            return Err(InventoryError::InsufficientQuantity {
                item,
                requested: required,
                available,
            });
        }

        for (item, required) in recipe.requirements() {
            let removed = self
                .extract_internal(&item, required, &[], ChangeReason::Transformed, false)
                .map_or(0, |stack| stack.quantity);
            if removed < required {
                return Err(InventoryError::RecipeInvariantViolation {
                    item,
                    required,
                    removed,
                });
            }
        }

        match &recipe.output {
            RecipeOutput::Item(output) => {
                let mut source = UnlimitedSource::new(self.catalog.clone());
                let added = self
                    .add_item_internal(
                        &mut source,
                        output,
                        recipe.quantity,
                        true,
                        PlacementPolicy::PreferGeneric,
                        ChangeReason::Added,
                    )
                    .unwrap_or(0);
                let overflow = recipe.quantity.saturating_sub(added);
                if overflow > 0 {
                    if let Some(stack) = source.extract(output, overflow) {
                        log::debug!("Crafted {overflow} {output} did not fit; dropping");
                        let location = self.drop_origin.in_front(self.config.default_drop_distance);
                        self.drop_sink.spawn(stack, location);
                    }
                }
            }
            RecipeOutput::Object(class) => {
                self.publish(InventoryEvent::CraftConfirmed {
                    class: class.clone(),
                    quantity: recipe.quantity,
                });
            }
        }
        Ok(())
    }

    /// Craft an unlocked recipe from the book
    pub fn craft_recipe(&mut self, id: &RecipeId) -> bool {
        sentinel("craft_recipe", self.try_craft_recipe(id).map(|_| true))
    }

    /// Fallible [`Inventory::craft_recipe`]
    pub fn try_craft_recipe(&mut self, id: &RecipeId) -> Result<()> {
        let recipe = self
            .recipes
            .all_unlocked_recipes()
            .find(|r| &r.id == id)
            .cloned()
            .ok_or_else(|| InventoryError::UnknownRecipe(id.to_string()))?;
        self.try_craft(&recipe)
    }

    /// Add a recipe to the book
    pub fn add_recipe(&mut self, recipe: Recipe, unlocked: bool) {
        self.recipes.add_recipe(recipe, unlocked);
        self.refresh_recipe_availability();
    }

    /// Lock or unlock a recipe
    pub fn set_recipe_lock(&mut self, id: &RecipeId, locked: bool) -> bool {
        let result = self
            .ensure_authority("set_recipe_lock")
            .and_then(|_| self.recipes.set_locked(id, locked));
        let changed = sentinel("set_recipe_lock", result);
        if changed {
            self.refresh_recipe_availability();
        }
        changed
    }

    /// Unlocked, craftable recipes, optionally narrowed to a tag
    pub fn available_recipes(&self, filter: Option<&Tag>) -> Vec<&Recipe> {
        self.recipes
            .available()
            .iter()
            .filter_map(|id| self.recipes.get(id))
            .filter(|r| filter.map_or(true, |tag| r.tags.has_tag(tag)))
            .collect()
    }

    /// Available recipe ids grouped by the configured filters
    pub fn available_recipes_by_filter(&self) -> Vec<(Tag, Vec<RecipeId>)> {
        self.config
            .recipe_tag_filters
            .iter()
            .map(|tag| {
                let ids = self
                    .available_recipes(Some(tag))
                    .into_iter()
                    .map(|r| r.id.clone())
                    .collect();
                (tag.clone(), ids)
            })
            .collect()
    }

    pub(crate) fn refresh_recipe_availability(&mut self) {
        if self.recipes.is_empty() {
            return;
        }
        let available: Vec<RecipeId> = self
            .recipes
            .all_unlocked_recipes()
            .filter(|r| self.can_craft(r))
            .map(|r| r.id.clone())
            .collect();
        if self.recipes.set_available(available.clone()) {
            self.publish(InventoryEvent::AvailableRecipesUpdated { available });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::Authority;
    use crate::catalog::{ItemCatalog, ItemDefinition};
    use crate::config::InventoryConfig;
    use crate::events::drain;
    use crate::world::CollectingDropSink;
    use std::sync::Arc;

    fn catalog() -> Arc<ItemCatalog> {
        Arc::new(ItemCatalog::from_definitions([
            ItemDefinition::new("wood", "Wood").with_max_stack(10),
            ItemDefinition::new("stone", "Stone").with_max_stack(10),
            ItemDefinition::new("axe", "Axe").with_max_stack(1),
        ]))
    }

    fn inventory(max_slots: u32) -> Inventory {
        let config = InventoryConfig::default()
            .with_max_slots(max_slots)
            .with_recipe_filter("Recipe.Tools");
        Inventory::new(config, catalog(), Arc::new(Authority::Server))
    }

    fn give(inv: &mut Inventory, item: &str, quantity: u32) {
        let mut source = UnlimitedSource::new(inv.catalog().clone());
        inv.add_item(&mut source, &ItemId::new(item), quantity, true, PlacementPolicy::PreferGeneric);
    }

    fn axe_recipe() -> Recipe {
        Recipe::item("axe", "axe")
            .with_component("wood", 2)
            .with_component("stone", 1)
            .with_tag("Recipe.Tools")
    }

    #[test]
    fn test_craft_consumes_and_produces() {
        let mut inv = inventory(10);
        give(&mut inv, "wood", 3);
        give(&mut inv, "stone", 1);
        let rx = inv.subscribe();

        assert!(inv.craft(&axe_recipe()));
        assert_eq!(inv.get_item_count(&ItemId::new("wood")), 1);
        assert_eq!(inv.get_item_count(&ItemId::new("stone")), 0);
        assert_eq!(inv.get_item_count(&ItemId::new("axe")), 1);

        let events = drain(&rx);
        assert!(events.iter().any(|e| matches!(
            e,
            InventoryEvent::ItemRemovedFromContainer { quantity: 2, reason: ChangeReason::Transformed, .. }
        )));
    }

    #[test]
    fn test_craft_draws_from_tagged_slots() {
        use crate::tagged::UniversalSlotSpec;

        let config = InventoryConfig::default()
            .with_max_slots(10)
            .with_universal_slot(UniversalSlotSpec::new("Hand.Right"))
            .with_universal_slot(UniversalSlotSpec::new("Hand.Left"));
        let mut inv = Inventory::new(config, catalog(), Arc::new(Authority::Server));
        let mut source = UnlimitedSource::new(inv.catalog().clone());
        let (wood, stone) = (ItemId::new("wood"), ItemId::new("stone"));
        inv.add_item(&mut source, &stone, 1, false, PlacementPolicy::PreferGeneric);
        inv.add_item_to_tagged_slot(&mut source, &Tag::new("Hand.Left"), &stone, 1, false, false);
        inv.add_item_to_tagged_slot(&mut source, &Tag::new("Hand.Right"), &wood, 3, false, false);
        assert_eq!(inv.get_item_count(&stone), 2);
        assert_eq!(inv.get_container_only_item_count(&wood), 0);

        let recipe = Recipe::item("axe", "axe")
            .with_component("stone", 2)
            .with_component("wood", 3);
        assert!(inv.can_craft(&recipe));
        let rx = inv.subscribe();
        assert!(inv.craft(&recipe));

        assert_eq!(inv.get_item_count(&stone), 0);
        assert_eq!(inv.get_item_count(&wood), 0);
        assert_eq!(inv.get_item_count(&ItemId::new("axe")), 1);
        assert!(inv.get_all_tagged_items().is_empty());
        assert!(drain(&rx).iter().any(|e| matches!(
            e,
            InventoryEvent::ItemRemovedFromTaggedSlot { tag, quantity: 3, reason: ChangeReason::Transformed, .. }
                if tag == &Tag::new("Hand.Right")
        )));
    }

    #[test]
    fn test_craft_missing_component_changes_nothing() {
        let mut inv = inventory(10);
        give(&mut inv, "wood", 1);
        give(&mut inv, "stone", 1);
        let before = inv.snapshot();

        assert!(!inv.craft(&axe_recipe()));
        assert_eq!(inv.snapshot(), before);
    }

    #[test]
    fn test_duplicate_components_are_summed() {
        let mut inv = inventory(10);
        give(&mut inv, "wood", 3);
        let recipe = Recipe::item("plank", "stone")
            .with_component("wood", 2)
            .with_component("wood", 2);
        assert!(!inv.can_craft(&recipe));
        give(&mut inv, "wood", 1);
        assert!(inv.can_craft(&recipe));
    }

    #[test]
    fn test_full_inventory_drops_output() {
        let sink = Arc::new(CollectingDropSink::new());
        let mut inv = inventory(1).with_drop_sink(sink.clone());
        give(&mut inv, "wood", 10);
        let recipe = Recipe::item("stonecutter", "stone").with_quantity(3).with_component("wood", 1);

        assert!(inv.craft(&recipe));
        assert_eq!(inv.get_item_count(&ItemId::new("stone")), 0);
        assert_eq!(sink.spawned_quantity(&ItemId::new("stone")), 3);
    }

    #[test]
    fn test_object_recipe_confirms() {
        let mut inv = inventory(10);
        give(&mut inv, "wood", 5);
        let rx = inv.subscribe();
        let campfire = Recipe::object("campfire", "Campfire").with_component("wood", 5);

        assert!(inv.craft(&campfire));
        assert!(drain(&rx).contains(&InventoryEvent::CraftConfirmed {
            class: "Campfire".into(),
            quantity: 1,
        }));
    }

    #[test]
    fn test_availability_tracks_contents() {
        let mut inv = inventory(10);
        inv.add_recipe(axe_recipe(), true);
        inv.add_recipe(Recipe::object("campfire", "Campfire").with_component("wood", 5), false);
        let rx = inv.subscribe();

        give(&mut inv, "wood", 5);
        give(&mut inv, "stone", 1);
        assert_eq!(inv.recipes().available(), &[RecipeId::new("axe")]);
        assert_eq!(
            inv.available_recipes_by_filter(),
            vec![(Tag::new("Recipe.Tools"), vec![RecipeId::new("axe")])]
        );

        assert!(inv.set_recipe_lock(&RecipeId::new("campfire"), false));
        assert_eq!(inv.available_recipes(None).len(), 2);

        let updates = drain(&rx)
            .into_iter()
            .filter(|e| matches!(e, InventoryEvent::AvailableRecipesUpdated { .. }))
            .count();
        assert_eq!(updates, 2);
    }

    #[test]
    fn test_craft_locked_recipe_fails() {
        let mut inv = inventory(10);
        inv.add_recipe(axe_recipe(), false);
        give(&mut inv, "wood", 2);
        give(&mut inv, "stone", 1);
        assert!(!inv.craft_recipe(&RecipeId::new("axe")));
        assert!(inv.set_recipe_lock(&RecipeId::new("axe"), false));
        assert!(inv.craft_recipe(&RecipeId::new("axe")));
    }

    #[test]
    fn test_recipe_book_from_json() {
        let book = RecipeBook::from_json(
            r#"[{"id": "axe", "output": {"Item": "axe"}, "components": [{"item": "wood", "quantity": 2}]}]"#,
        )
        .unwrap();
        assert_eq!(book.len(), 1);
        assert_eq!(book.get(&RecipeId::new("axe")).unwrap().quantity, 1);
        assert!(book.is_unlocked(&RecipeId::new("axe")));
    }
}
