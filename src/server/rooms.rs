use tokio::sync::Mutex;

use crate::error::RoomJoinError;
use crate::server::clients::{send_to, ClientHandle, Sender};

/// Hard cap on simultaneously active rooms.
pub const MAX_ROOMS: usize = 10;
/// Hard cap on members in one room, matching the client capacity.
pub const MAX_ROOM_MEMBERS: usize = 15;

struct Member {
    handle: ClientHandle,
    name: String,
    sender: Sender,
}

struct RoomSlot {
    active: bool,
    name: String,
    members: Vec<Member>,
}

impl RoomSlot {
    fn vacant() -> RoomSlot {
        RoomSlot { active: false, name: String::new(), members: Vec::new() }
    }
}

/// Fixed table of [`MAX_ROOMS`] rooms behind one lock. Rooms come into
/// being when the first member joins and vanish when the last one leaves;
/// two rooms with the same name never coexist.
///
/// This lock is independent of the clients lock and the two are never held
/// together.
pub struct RoomRegistry {
    rooms: Mutex<Vec<RoomSlot>>,
}

impl RoomRegistry {
    pub fn new() -> RoomRegistry {
        RoomRegistry {
            rooms: Mutex::new((0..MAX_ROOMS).map(|_| RoomSlot::vacant()).collect()),
        }
    }

    /// Adds a member to `room_name`, creating the room in the first vacant
    /// slot when it does not exist yet.
    pub async fn join(
        &self,
        room_name: &str,
        handle: ClientHandle,
        name: &str,
        sender: Sender,
    ) -> Result<(), RoomJoinError> {
        let mut rooms = self.rooms.lock().await;
        let index = match rooms.iter().position(|room| room.active && room.name == room_name) {
            Some(index) => index,
            None => {
                let Some(index) = rooms.iter().position(|room| !room.active) else {
                    return Err(RoomJoinError::NoFreeRoom);
                };
                let room = &mut rooms[index];
                room.active = true;
                room.name.clear();
                room.name.push_str(room_name);
                room.members.clear();
                index
            }
        };
        let room = &mut rooms[index];
        if room.members.len() >= MAX_ROOM_MEMBERS {
            return Err(RoomJoinError::RoomFull);
        }
        room.members.push(Member { handle, name: name.to_string(), sender });
        Ok(())
    }

    /// Removes `handle` from `room_name`, preserving the order of the
    /// remaining members. An empty room is deactivated on the spot.
    /// Leaving a room one is not a member of is a no-op.
    pub async fn leave(&self, room_name: &str, handle: ClientHandle) {
        let mut rooms = self.rooms.lock().await;
        if let Some(room) = rooms.iter_mut().find(|room| room.active && room.name == room_name) {
            if let Some(index) = room.members.iter().position(|member| member.handle == handle) {
                room.members.remove(index);
            }
            if room.members.is_empty() {
                room.active = false;
                room.name.clear();
            }
        }
    }

    /// Relays `"[<room>] <sender>: <body>"` to every member except the
    /// sender. Recipient handles are copied under the lock; the sends
    /// happen after it is released, so a slow peer cannot stall the table.
    pub async fn broadcast(&self, room_name: &str, sender_name: &str, body: &str) {
        let recipients: Vec<Sender> = {
            let rooms = self.rooms.lock().await;
            let Some(room) = rooms.iter().find(|room| room.active && room.name == room_name)
            else {
                return;
            };
            room.members
                .iter()
                .filter(|member| member.name != sender_name)
                .map(|member| member.sender.clone())
                .collect()
        };
        let message = format!("[{room_name}] {sender_name}: {body}\n");
        for recipient in &recipients {
            send_to(recipient, &message).await;
        }
    }

    #[cfg(test)]
    pub(crate) async fn active_room_count(&self) -> usize {
        self.rooms.lock().await.iter().filter(|room| room.active).count()
    }

    #[cfg(test)]
    pub(crate) async fn members_of(&self, room_name: &str) -> Vec<String> {
        let rooms = self.rooms.lock().await;
        rooms
            .iter()
            .find(|room| room.active && room.name == room_name)
            .map(|room| room.members.iter().map(|member| member.name.clone()).collect())
            .unwrap_or_default()
    }
}
