use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ServerFullError;

/// Hard cap on concurrent client sessions.
pub const MAX_CLIENTS: usize = 15;

// A synchronized handle to a connection's write half. The mutex keeps
// concurrently relayed lines from interleaving mid-write.
pub type Sender = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Writes `message` through a client's sender. A failed send is dropped:
/// the peer is either gone or about to be cleaned up by its own handler.
pub async fn send_to(sender: &Sender, message: &str) {
    let mut writer = sender.lock().await;
    if let Err(err) = writer.write_all(message.as_bytes()).await {
        debug!("Failed to send to client: {err}");
    }
}

/// A `(slot, generation)` reference into the registry. The generation is
/// bumped on release, so a handle kept past a disconnect never resolves to
/// a later occupant of the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHandle {
    slot: usize,
    generation: u64,
}

impl ClientHandle {
    #[cfg(test)]
    pub(crate) fn stub(slot: usize) -> ClientHandle {
        ClientHandle { slot, generation: 0 }
    }
}

struct ClientSlot {
    active: bool,
    generation: u64,
    name: String,
    current_room: String,
    addr: Option<SocketAddr>,
    sender: Option<Sender>,
}

impl ClientSlot {
    fn vacant() -> ClientSlot {
        ClientSlot {
            active: false,
            generation: 0,
            name: String::new(),
            current_room: String::new(),
            addr: None,
            sender: None,
        }
    }

    fn owned_by(&self, handle: ClientHandle) -> bool {
        self.active && self.generation == handle.generation
    }
}

/// Fixed table of [`MAX_CLIENTS`] slots behind one lock. The name map is a
/// bijection over active clients; released names are reusable immediately.
pub struct ClientRegistry {
    slots: Mutex<Vec<ClientSlot>>,
}

impl ClientRegistry {
    pub fn new() -> ClientRegistry {
        ClientRegistry {
            slots: Mutex::new((0..MAX_CLIENTS).map(|_| ClientSlot::vacant()).collect()),
        }
    }

    /// Reserves the first vacant slot for a freshly accepted connection.
    /// The slot starts active with an empty name and no room.
    pub async fn reserve(
        &self,
        sender: Sender,
        addr: SocketAddr,
    ) -> Result<ClientHandle, ServerFullError> {
        let mut slots = self.slots.lock().await;
        let Some(index) = slots.iter().position(|slot| !slot.active) else {
            return Err(ServerFullError);
        };
        let slot = &mut slots[index];
        slot.active = true;
        slot.name.clear();
        slot.current_room.clear();
        slot.addr = Some(addr);
        slot.sender = Some(sender);
        Ok(ClientHandle { slot: index, generation: slot.generation })
    }

    /// Stores `name` for `handle` unless another active client already holds
    /// it. Uniqueness check and store are one critical section.
    pub async fn claim_name(&self, handle: ClientHandle, name: &str) -> bool {
        let mut slots = self.slots.lock().await;
        if slots.iter().any(|slot| slot.active && slot.name == name) {
            return false;
        }
        match slots.get_mut(handle.slot) {
            Some(slot) if slot.owned_by(handle) => {
                slot.name = name.to_string();
                true
            }
            _ => false,
        }
    }

    /// Linear scan for a registered client by name.
    pub async fn find_by_name(&self, name: &str) -> Option<Sender> {
        let slots = self.slots.lock().await;
        slots
            .iter()
            .find(|slot| slot.active && !slot.name.is_empty() && slot.name == name)
            .and_then(|slot| slot.sender.clone())
    }

    pub async fn peer_addr(&self, handle: ClientHandle) -> Option<SocketAddr> {
        let slots = self.slots.lock().await;
        match slots.get(handle.slot) {
            Some(slot) if slot.owned_by(handle) => slot.addr,
            _ => None,
        }
    }

    /// The client's current room name; empty means not in any room.
    pub async fn room_of(&self, handle: ClientHandle) -> String {
        let slots = self.slots.lock().await;
        match slots.get(handle.slot) {
            Some(slot) if slot.owned_by(handle) => slot.current_room.clone(),
            _ => String::new(),
        }
    }

    pub async fn set_room(&self, handle: ClientHandle, room: &str) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(handle.slot) {
            if slot.owned_by(handle) {
                slot.current_room.clear();
                slot.current_room.push_str(room);
            }
        }
    }

    /// Releases the slot: bumps the generation, clears identity, and shuts
    /// the transport down if this handle still owns the slot. The name is
    /// free for reuse as soon as the lock drops.
    pub async fn release(&self, handle: ClientHandle) {
        let sender = {
            let mut slots = self.slots.lock().await;
            match slots.get_mut(handle.slot) {
                Some(slot) if slot.owned_by(handle) => {
                    slot.active = false;
                    slot.generation += 1;
                    slot.name.clear();
                    slot.current_room.clear();
                    slot.addr = None;
                    slot.sender.take()
                }
                _ => None,
            }
        };
        if let Some(sender) = sender {
            let mut writer = sender.lock().await;
            let _ = writer.shutdown().await;
        }
    }

    /// Sends `message` to every active connection, registered or not, and
    /// returns how many were reached. Handles are copied out of the lock
    /// before any send happens.
    pub async fn notify_all(&self, message: &str) -> usize {
        let senders: Vec<Sender> = {
            let slots = self.slots.lock().await;
            slots
                .iter()
                .filter(|slot| slot.active)
                .filter_map(|slot| slot.sender.clone())
                .collect()
        };
        for sender in &senders {
            send_to(sender, message).await;
        }
        senders.len()
    }

    #[cfg(test)]
    pub(crate) async fn active_count(&self) -> usize {
        self.slots.lock().await.iter().filter(|slot| slot.active).count()
    }
}
