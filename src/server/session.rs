use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info};

use crate::error::RoomJoinError;
use crate::protocol::{self, Command};
use crate::server::clients::{send_to, ClientHandle, Sender};
use crate::server::state::ServerState;
use crate::server::uploads::{FileTransfer, MAX_FILE_SIZE};
use crate::validate::{valid_filename, valid_name, MAX_ROOM_NAME_LEN, MAX_USERNAME_LEN};

type Lines = FramedRead<OwnedReadHalf, LinesCodec>;

/// Drives one client connection from the registration handshake through
/// the command loop to cleanup. The accept loop has already reserved the
/// registry slot behind `handle`.
pub async fn run(state: Arc<ServerState>, handle: ClientHandle, read: OwnedReadHalf, sender: Sender) {
    let mut lines = protocol::framed_lines(read);

    let Some(username) = register(&state, handle, &mut lines, &sender).await else {
        cleanup(&state, handle, &sender, None).await;
        return;
    };

    let ip = match state.clients.peer_addr(handle).await {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    };
    state
        .log
        .record(&format!("[LOGIN] user '{username}' connected from {ip}"))
        .await;
    info!("New client connected: {username} from {ip}");
    send_to(&sender, "[SUCCESS] Connected to chat server!\n").await;
    send_to(
        &sender,
        "Commands: /join <room>, /leave, /broadcast <msg>, /whisper <user> <msg>, /sendfile <file> <user>, /exit\n",
    )
    .await;

    loop {
        let line = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            line = lines.next() => line,
        };
        let line = match line {
            Some(Ok(line)) => line,
            Some(Err(err)) => {
                debug!("Read failed for {username}: {err}");
                break;
            }
            None => break,
        };
        if line.is_empty() {
            continue;
        }

        match Command::parse(&line) {
            Ok(Command::Join(room)) => {
                handle_join(&state, handle, &username, &sender, room).await;
            }
            Ok(Command::Leave) => handle_leave(&state, handle, &username, &sender).await,
            Ok(Command::Broadcast(text)) => {
                handle_broadcast(&state, handle, &username, &sender, text).await;
            }
            Ok(Command::Whisper { target, text }) => {
                handle_whisper(&state, &username, &sender, target, text).await;
            }
            Ok(Command::SendFile { filename, target }) => {
                handle_sendfile(&state, &username, &sender, filename, target).await;
            }
            Ok(Command::Exit) => {
                send_to(&sender, "[INFO] Goodbye!\n").await;
                break;
            }
            Ok(Command::Unknown) => {
                send_to(&sender, "[ERROR] Unknown command. Type a valid command.\n").await;
            }
            Err(usage) => send_to(&sender, usage.message()).await,
        }
    }

    cleanup(&state, handle, &sender, Some(&username)).await;
}

/// The name handshake. Prompts until the client supplies a valid, unused
/// name; returns `None` when the connection drops or the server shuts
/// down first. A rejected attempt never consumes anything; the slot was
/// reserved at accept time and the name is only stored on success.
async fn register(
    state: &ServerState,
    handle: ClientHandle,
    lines: &mut Lines,
    sender: &Sender,
) -> Option<String> {
    loop {
        send_to(sender, "Enter username (max 16 chars, alphanumeric): ").await;
        let line = tokio::select! {
            _ = state.shutdown.cancelled() => return None,
            line = lines.next() => line,
        };
        let name = match line {
            Some(Ok(name)) => name,
            _ => return None,
        };
        if !valid_name(&name, MAX_USERNAME_LEN) {
            send_to(sender, "[ERROR] Invalid username. Use alphanumeric characters only.\n").await;
            continue;
        }
        if !state.clients.claim_name(handle, &name).await {
            send_to(sender, "[ERROR] Username already taken. Choose another.\n").await;
            state
                .log
                .record(&format!("[REJECTED] Duplicate username attempted: {name}"))
                .await;
            continue;
        }
        return Some(name);
    }
}

async fn handle_join(
    state: &ServerState,
    handle: ClientHandle,
    username: &str,
    sender: &Sender,
    room: &str,
) {
    if !valid_name(room, MAX_ROOM_NAME_LEN) {
        send_to(sender, "[ERROR] Invalid room name. Use alphanumeric characters only.\n").await;
        return;
    }

    // Changing rooms is leave-then-join, with both replies and both log
    // records.
    let current = state.clients.room_of(handle).await;
    if !current.is_empty() {
        leave_room(state, handle, username, sender, &current).await;
    }

    match state.rooms.join(room, handle, username, sender.clone()).await {
        Ok(()) => {
            state.clients.set_room(handle, room).await;
            send_to(sender, &format!("[SUCCESS] Joined room '{room}'\n")).await;
            state
                .log
                .record(&format!("[JOIN] user '{username}' joined room '{room}'"))
                .await;
            info!("{username} joined room '{room}'");
        }
        Err(RoomJoinError::NoFreeRoom) => {
            send_to(sender, "[ERROR] Unable to join room.\n").await;
        }
        Err(RoomJoinError::RoomFull) => {
            send_to(sender, "[ERROR] Room is full.\n").await;
        }
    }
}

async fn handle_leave(
    state: &ServerState,
    handle: ClientHandle,
    username: &str,
    sender: &Sender,
) {
    let current = state.clients.room_of(handle).await;
    if current.is_empty() {
        send_to(sender, "[ERROR] You are not in any room.\n").await;
        return;
    }
    leave_room(state, handle, username, sender, &current).await;
}

async fn leave_room(
    state: &ServerState,
    handle: ClientHandle,
    username: &str,
    sender: &Sender,
    room: &str,
) {
    state.rooms.leave(room, handle).await;
    state.clients.set_room(handle, "").await;
    send_to(sender, &format!("[SUCCESS] Left room '{room}'\n")).await;
    state
        .log
        .record(&format!("[LEAVE] user '{username}' left room '{room}'"))
        .await;
}

async fn handle_broadcast(
    state: &ServerState,
    handle: ClientHandle,
    username: &str,
    sender: &Sender,
    text: &str,
) {
    let current = state.clients.room_of(handle).await;
    if current.is_empty() {
        send_to(sender, "[ERROR] Join a room first.\n").await;
        return;
    }
    state.rooms.broadcast(&current, username, text).await;
    send_to(sender, "[SUCCESS] Message broadcasted.\n").await;
    state.log.record(&format!("[BROADCAST] user '{username}': {text}")).await;
    info!("{username} broadcasted to '{current}'");
}

async fn handle_whisper(
    state: &ServerState,
    username: &str,
    sender: &Sender,
    target: &str,
    text: &str,
) {
    match state.clients.find_by_name(target).await {
        Some(peer) => {
            send_to(&peer, &format!("[WHISPER from {username}]: {text}\n")).await;
            send_to(sender, "[SUCCESS] Whisper sent.\n").await;
            state.log.record(&format!("[WHISPER] {username} to {target}: {text}")).await;
            info!("{username} sent whisper to {target}");
        }
        None => send_to(sender, "[ERROR] User not found or offline.\n").await,
    }
}

async fn handle_sendfile(
    state: &ServerState,
    username: &str,
    sender: &Sender,
    filename: &str,
    target: &str,
) {
    if !valid_filename(filename) {
        send_to(sender, "[ERROR] Invalid file type. Allowed: .txt, .pdf, .jpg, .png\n").await;
        return;
    }
    if state.clients.find_by_name(target).await.is_none() {
        send_to(sender, "[ERROR] Target user not found or offline.\n").await;
        return;
    }

    // Only a statable regular file gets a real size; anything else is
    // queued with the nominal 1024.
    let size = match tokio::fs::metadata(filename).await {
        Ok(meta) if meta.is_file() => {
            if meta.len() > MAX_FILE_SIZE {
                send_to(sender, "[ERROR] File exceeds size limit (3MB).\n").await;
                state
                    .log
                    .record(&format!(
                        "[ERROR] File '{filename}' from user '{username}' exceeds size limit"
                    ))
                    .await;
                return;
            }
            meta.len()
        }
        _ => 1024,
    };

    let job = FileTransfer {
        filename: filename.to_string(),
        sender: username.to_string(),
        receiver: target.to_string(),
        size,
        queued_at: Instant::now(),
    };

    if state.uploads.try_reserve() {
        let depth = state.uploads.push(job).await;
        send_to(sender, "[SUCCESS] File added to upload queue.\n").await;
        state
            .log
            .record(&format!(
                "[FILE-QUEUE] Upload '{filename}' from {username} added to queue. Queue size: {depth}"
            ))
            .await;
        info!("{username} initiated file transfer to {target}");
    } else {
        send_to(sender, "[INFO] Upload queue full. Waiting...\n").await;
        state.uploads.reserve().await;
        let depth = state.uploads.push(job).await;
        send_to(sender, "[SUCCESS] File queued for upload.\n").await;
        state
            .log
            .record(&format!(
                "[FILE-QUEUE] Upload '{filename}' from {username} added to queue after wait. Queue size: {depth}"
            ))
            .await;
    }
}

/// Tears a session down in order: leave the current room, record the
/// disconnect for registered clients, then release the slot (which also
/// shuts the transport down). The name is reusable as soon as the slot
/// is released.
async fn cleanup(
    state: &ServerState,
    handle: ClientHandle,
    sender: &Sender,
    username: Option<&str>,
) {
    if let Some(username) = username {
        let current = state.clients.room_of(handle).await;
        if !current.is_empty() {
            leave_room(state, handle, username, sender, &current).await;
        }
        state
            .log
            .record(&format!("[DISCONNECT] user '{username}' lost connection. Cleaned up resources."))
            .await;
        info!("Client {username} disconnected.");
    }
    state.clients.release(handle).await;
}
