use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::server::clients::ClientRegistry;
use crate::server::log::EventLog;
use crate::server::rooms::RoomRegistry;
use crate::server::uploads::UploadQueue;

/// Shared server context. Owned by the listener, handed to every session
/// task and the transfer worker; each component serializes its own state
/// behind its own lock.
pub struct ServerState {
    pub clients: ClientRegistry,
    pub rooms: RoomRegistry,
    pub uploads: UploadQueue,
    pub log: EventLog,
    pub shutdown: CancellationToken,
}

impl ServerState {
    pub fn new(log: EventLog) -> Arc<ServerState> {
        Arc::new(ServerState {
            clients: ClientRegistry::new(),
            rooms: RoomRegistry::new(),
            uploads: UploadQueue::new(),
            log,
            shutdown: CancellationToken::new(),
        })
    }
}
