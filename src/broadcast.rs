// src/broadcast.rs
//
// One shared room-state channel plus one lazily created channel per room.
// Publishing never blocks; without subscribers the event is dropped.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::debug;

use crate::models::{ReservationStateChange, RoomStateChange};

pub type RoomStateBatch = Vec<RoomStateChange>;

#[derive(Debug)]
pub struct ChangeBroadcaster {
    capacity: usize,
    room_states: Mutex<Option<broadcast::Sender<RoomStateBatch>>>,
    // None once closed
    reservations: Mutex<Option<HashMap<i64, broadcast::Sender<ReservationStateChange>>>>,
}

impl ChangeBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            capacity,
            room_states: Mutex::new(Some(tx)),
            reservations: Mutex::new(Some(HashMap::new())),
        }
    }

    fn closed_receiver<T: Clone>() -> broadcast::Receiver<T> {
        let (_tx, rx) = broadcast::channel(1);
        rx
    }

    pub fn subscribe_room_states(&self) -> broadcast::Receiver<RoomStateBatch> {
        match self.room_states.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(tx) => tx.subscribe(),
            None => Self::closed_receiver(),
        }
    }

    /// Returns the number of subscribers the batch reached.
    pub fn publish_room_states(&self, batch: RoomStateBatch) -> usize {
        let guard = self.room_states.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = guard.as_ref() else {
            return 0;
        };
        match tx.send(batch) {
            Ok(reached) => reached,
            Err(broadcast::error::SendError(batch)) => {
                debug!(changes = batch.len(), "no room-state subscribers, batch dropped");
                0
            }
        }
    }

    pub fn subscribe_reservations(&self, room_id: i64) -> broadcast::Receiver<ReservationStateChange> {
        let mut guard = self.reservations.lock().unwrap_or_else(|e| e.into_inner());
        let Some(channels) = guard.as_mut() else {
            return Self::closed_receiver();
        };
        channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Returns the number of subscribers the event reached.
    pub fn publish_reservation(&self, room_id: i64, change: ReservationStateChange) -> usize {
        let mut guard = self.reservations.lock().unwrap_or_else(|e| e.into_inner());
        let Some(channels) = guard.as_mut() else {
            return 0;
        };
        let tx = channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        match tx.send(change) {
            Ok(reached) => reached,
            Err(_) => {
                debug!(room_id, reservation_id = change.reservation_id, "no subscribers for room, event dropped");
                0
            }
        }
    }

    pub fn room_channel_count(&self) -> usize {
        self.reservations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(0, HashMap::len)
    }

    /// Drop every sender; subscribers see the stream end.
    pub fn close(&self) {
        self.room_states.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.reservations.lock().unwrap_or_else(|e| e.into_inner()).take();
        debug!("change broadcaster closed");
    }
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
