use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed events, one channel per staff member.
/// Calendar views subscribe to invalidate on bookings, cancellations and
/// window edits.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a staff member. Creates the channel if needed.
    pub fn subscribe(&self, staff_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(staff_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event. No-op if nobody is listening.
    pub fn send(&self, staff_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&staff_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a channel (e.g. when a staff member is deleted).
    pub fn remove(&self, staff_id: &Ulid) {
        self.channels.remove(staff_id);
    }
}
