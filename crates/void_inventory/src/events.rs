//! Change events and their fan-out
//!
//! Container events describe the container-only share of an item; tagged slot
//! events describe tagged contents. Replaying the events of an operation on a
//! mirror therefore reproduces the authority's generic and tagged views.

use crate::crafting::RecipeId;
use crate::item::{InstanceId, ItemId, ItemStack};
use crate::tag::Tag;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

/// Why a change happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeReason {
    Added,
    Removed,
    Updated,
    ForceDestroyed,
    Moved,
    Dropped,
    Consumed,
    Transformed,
    Transferred,
    Synced,
}

/// Inventory events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InventoryEvent {
    /// Units entered generic storage
    ItemAddedToContainer {
        item: ItemId,
        quantity: u32,
        instances: Vec<InstanceId>,
        reason: ChangeReason,
    },
    /// Units left generic storage
    ItemRemovedFromContainer {
        item: ItemId,
        quantity: u32,
        instances: Vec<InstanceId>,
        reason: ChangeReason,
    },
    /// Units entered a tagged slot
    ItemAddedToTaggedSlot {
        tag: Tag,
        item: ItemId,
        quantity: u32,
        instances: Vec<InstanceId>,
        /// Slot occupant before the change
        previous: Option<ItemStack>,
        reason: ChangeReason,
    },
    /// Units left a tagged slot
    ItemRemovedFromTaggedSlot {
        tag: Tag,
        item: ItemId,
        quantity: u32,
        instances: Vec<InstanceId>,
        reason: ChangeReason,
    },
    /// An object recipe was crafted
    CraftConfirmed { class: String, quantity: u32 },
    /// Craftable recipes changed
    AvailableRecipesUpdated { available: Vec<RecipeId> },
}

impl InventoryEvent {
    /// Item the event is about, if any
    pub fn item(&self) -> Option<&ItemId> {
        match self {
            Self::ItemAddedToContainer { item, .. }
            | Self::ItemRemovedFromContainer { item, .. }
            | Self::ItemAddedToTaggedSlot { item, .. }
            | Self::ItemRemovedFromTaggedSlot { item, .. } => Some(item),
            _ => None,
        }
    }
}

/// Fans events out to subscribers over channels
#[derive(Debug, Default)]
pub struct ChangeNotifier {
    subscribers: Vec<Sender<InventoryEvent>>,
    published: u64,
}

impl ChangeNotifier {
    /// Create a notifier with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe; drain the receiver with `try_recv`
    pub fn subscribe(&mut self) -> Receiver<InventoryEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Send an event to every live subscriber
    pub fn publish(&mut self, event: InventoryEvent) {
        self.published += 1;
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Events published so far
    pub fn published(&self) -> u64 {
        self.published
    }
}

/// Drain everything currently queued on a receiver
pub fn drain(rx: &Receiver<InventoryEvent>) -> Vec<InventoryEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn added(quantity: u32) -> InventoryEvent {
        InventoryEvent::ItemAddedToContainer {
            item: ItemId::new("rock"),
            quantity,
            instances: Vec::new(),
            reason: ChangeReason::Added,
        }
    }

    #[test]
    fn test_publish_to_subscribers() {
        let mut notifier = ChangeNotifier::new();
        let a = notifier.subscribe();
        let b = notifier.subscribe();

        notifier.publish(added(3));

        assert_eq!(drain(&a), vec![added(3)]);
        assert_eq!(drain(&b).len(), 1);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let mut notifier = ChangeNotifier::new();
        let rx = notifier.subscribe();
        drop(rx);
        notifier.publish(added(1));
        assert_eq!(notifier.subscriber_count(), 0);
        assert_eq!(notifier.published(), 1);
    }
}
