//! Client/server inventory session
//!
//! This example shows:
//! - Loading an inventory layout from TOML
//! - Authority-side adds with placement policies
//! - Client-side prediction of a move and a drop
//! - Reconciling the client mirror with authority events
//! - Crafting from the recipe book

use std::sync::Arc;
use void_inventory::prelude::*;

const LAYOUT: &str = r#"
max_weight = 60.0
max_slot_count = 6
grid_slot_count = 6
specialized_slots = ["Belt"]

[[universal_slots]]
tag = "Hand.Right"
blocks = "Hand.Left"
blocking_category = "TwoHanded"
exclusive_category = "TwoHanded"

[[universal_slots]]
tag = "Hand.Left"
"#;

fn print_mirror(client: &PredictionReconciler) {
    for (index, cell) in client.mirror().grid().iter().enumerate() {
        if let Some(stack) = cell {
            println!("   grid[{index}] {} x{}", stack.item_id, stack.quantity);
        }
    }
    for (tag, stack) in client.mirror().tagged_slots() {
        if let Some(stack) = stack {
            println!("   {tag} {} x{}", stack.item_id, stack.quantity);
        }
    }
}

fn main() -> void_inventory::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("Inventory Session Demo");
    println!("======================\n");

    let config = InventoryConfig::from_toml_str(LAYOUT)?;
    let catalog = Arc::new(ItemCatalog::from_definitions([
        ItemDefinition::new("rock", "Rock").with_max_stack(5).with_weight(1.0),
        ItemDefinition::new("stick", "Stick").with_max_stack(10).with_weight(0.5),
        ItemDefinition::new("spear", "Spear")
            .with_max_stack(1)
            .with_weight(4.0)
            .with_category("TwoHanded"),
        ItemDefinition::new("bandage", "Bandage")
            .with_max_stack(4)
            .with_category("Belt")
            .with_usable(1, "heal"),
    ]));

    let sink = Arc::new(CollectingDropSink::new());
    let mut server =
        Inventory::new(config.clone(), catalog.clone(), Arc::new(Authority::Server)).with_drop_sink(sink.clone());
    server.add_recipe(
        Recipe::item("spear", "spear")
            .with_component("stick", 2)
            .with_component("rock", 1),
        true,
    );
    let events = server.subscribe();
    let mut client = PredictionReconciler::new(config, catalog.clone());

    let mut source = UnlimitedSource::new(catalog);
    server.add_item(&mut source, &ItemId::new("rock"), 8, true, PlacementPolicy::PreferGeneric);
    server.add_item(&mut source, &ItemId::new("stick"), 4, true, PlacementPolicy::PreferGeneric);
    server.add_item(&mut source, &ItemId::new("bandage"), 2, true, PlacementPolicy::PreferSpecializedTagged);
    client.reconcile(&events)?;
    println!("✓ Server granted starting items");
    print_mirror(&client);

    println!("\n📦 Predicting: rock stack into the left hand, drop one stick");
    client.predict_move(SlotAddress::Generic(0), SlotAddress::Tagged(Tag::new("Hand.Left")), None)?;
    client.predict_drop(&ItemId::new("stick"), 1)?;
    println!("   {} changes pending", client.pending_len());
    print_mirror(&client);

    for request in client.take_requests() {
        println!("   → {}", request.to_json()?);
        server.apply_request(&request, &mut []);
    }
    client.reconcile(&events)?;
    println!("✓ Reconciled, state {:?}", client.state());

    println!("\n🔨 Crafting a spear");
    let recipe = RecipeId::new("spear");
    if server.craft_recipe(&recipe) {
        client.reconcile(&events)?;
        print_mirror(&client);
    }

    if client.verify(&server.snapshot())? {
        println!("⚠ Mirror drifted; rebuilt from the server snapshot");
    }
    let settled = client.is_settled(&server.snapshot());
    println!("\n{} Client mirror matches the server", if settled { "✓" } else { "❌" });
    println!("   {} item(s) lying in the world", sink.take_spawned().len());
    Ok(())
}
