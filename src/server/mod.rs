pub mod clients;
pub mod log;
pub mod rooms;
pub mod session;
pub mod state;
pub mod uploads;
pub mod worker;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket};
use tokio::signal;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::server::clients::{send_to, Sender};
use crate::server::log::EventLog;
use crate::server::state::ServerState;

/// Listen backlog, matching the client capacity.
const BACKLOG: u32 = 15;

/// Opens the event log, binds the listener, and runs the server until a
/// shutdown signal arrives. Initialization failures propagate out and the
/// process exits non-zero.
pub async fn start(port: u16) -> anyhow::Result<()> {
    let log = EventLog::open("server.log").context("Failed to open server.log")?;
    let state = ServerState::new(log);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let socket = TcpSocket::new_v4().context("Socket creation failed")?;
    socket.set_reuseaddr(true).context("Failed to set SO_REUSEADDR")?;
    socket.bind(addr).with_context(|| format!("Bind failed on {addr}"))?;
    let listener = socket.listen(BACKLOG).context("Listen failed")?;

    state.log.record(&format!("[SERVER] Chat server started on port {port}")).await;
    info!("Server listening on port {port}...");

    tokio::spawn(worker::run(state.clone()));

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = accept_loop(listener, state.clone()) => {}
    }

    shutdown(&state).await;
    Ok(())
}

/// Accepts connections forever. Each accepted connection gets a registry
/// slot and a detached session task; when the table is full the connection
/// is turned away on the spot.
async fn accept_loop(listener: TcpListener, state: Arc<ServerState>) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("Accept failed: {err}");
                continue;
            }
        };

        let (read, write) = stream.into_split();
        let sender: Sender = Arc::new(Mutex::new(Box::new(write)));

        match state.clients.reserve(sender.clone(), addr).await {
            Ok(handle) => {
                tokio::spawn(session::run(state.clone(), handle, read, sender));
            }
            Err(err) => {
                warn!("Rejecting {addr}: {err}");
                send_to(&sender, "[ERROR] Server full. Try again later.\n").await;
                let mut writer = sender.lock().await;
                let _ = writer.shutdown().await;
            }
        }
    }
}

/// Cooperative shutdown: cancel every task, wave goodbye to the connected
/// clients, and record the final count.
pub(crate) async fn shutdown(state: &Arc<ServerState>) {
    state.shutdown.cancel();
    let disconnected = state.clients.notify_all("[SERVER] Server shutting down. Goodbye!\n").await;
    state
        .log
        .record(&format!(
            "[SHUTDOWN] Shutdown signal received. Disconnecting {disconnected} clients, saving logs."
        ))
        .await;
    info!("Shutting down. Disconnected {disconnected} clients.");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::{timeout, Duration};

    static LOG_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn temp_log() -> PathBuf {
        let n = LOG_COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("parley-server-{}-{n}.log", std::process::id()))
    }

    async fn spawn_server() -> (SocketAddr, Arc<ServerState>, PathBuf) {
        let path = temp_log();
        let _ = std::fs::remove_file(&path);
        let log = EventLog::open(&path).unwrap();
        let state = ServerState::new(log);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(worker::run(state.clone()));
        tokio::spawn(accept_loop(listener, state.clone()));
        (addr, state, path)
    }

    /// Reads until `pattern` shows up and returns everything read so far.
    async fn read_until(stream: &mut TcpStream, pattern: &str) -> String {
        let mut collected = String::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = timeout(Duration::from_secs(30), stream.read(&mut buf))
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {pattern:?}; got {collected:?}"))
                .expect("read failed");
            if n == 0 {
                panic!("connection closed while waiting for {pattern:?}; got {collected:?}");
            }
            collected.push_str(&String::from_utf8_lossy(&buf[..n]));
            if collected.contains(pattern) {
                return collected;
            }
        }
    }

    async fn send_line(stream: &mut TcpStream, line: &str) {
        stream.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    }

    async fn login(addr: SocketAddr, name: &str) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        read_until(&mut stream, "Enter username").await;
        send_line(&mut stream, name).await;
        read_until(&mut stream, "Connected to chat server!").await;
        stream
    }

    #[tokio::test]
    async fn test_register_and_broadcast() {
        let (addr, _state, path) = spawn_server().await;
        let mut alice = login(addr, "alice").await;
        let mut bob = login(addr, "bob").await;

        send_line(&mut alice, "/join lobby").await;
        read_until(&mut alice, "[SUCCESS] Joined room 'lobby'").await;
        send_line(&mut bob, "/join lobby").await;
        read_until(&mut bob, "[SUCCESS] Joined room 'lobby'").await;

        send_line(&mut alice, "/broadcast hello").await;
        read_until(&mut bob, "[lobby] alice: hello").await;
        let alice_replies = read_until(&mut alice, "[SUCCESS] Message broadcasted.").await;
        assert!(!alice_replies.contains("[lobby] alice: hello"));

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_duplicate_username_retry() {
        let (addr, state, path) = spawn_server().await;
        let _alice = login(addr, "alice").await;

        let mut carol = TcpStream::connect(addr).await.unwrap();
        read_until(&mut carol, "Enter username").await;
        send_line(&mut carol, "alice").await;
        read_until(&mut carol, "[ERROR] Username already taken. Choose another.").await;
        read_until(&mut carol, "Enter username").await;
        send_line(&mut carol, "carol").await;
        read_until(&mut carol, "Connected to chat server!").await;

        // The retry reused the reserved slot instead of burning another.
        assert_eq!(state.clients.active_count().await, 2);

        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.contains("[REJECTED] Duplicate username attempted: alice"));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_invalid_username_retries_without_consuming_slot() {
        let (addr, state, path) = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        read_until(&mut stream, "Enter username").await;
        send_line(&mut stream, "not valid!").await;
        read_until(&mut stream, "[ERROR] Invalid username. Use alphanumeric characters only.").await;
        read_until(&mut stream, "Enter username").await;
        assert_eq!(state.clients.active_count().await, 1);

        send_line(&mut stream, "dave").await;
        read_until(&mut stream, "Connected to chat server!").await;
        assert_eq!(state.clients.active_count().await, 1);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_whisper_delivery_and_offline_target() {
        let (addr, _state, path) = spawn_server().await;
        let mut alice = login(addr, "alice").await;
        let mut bob = login(addr, "bob").await;

        send_line(&mut alice, "/whisper dave hi").await;
        read_until(&mut alice, "[ERROR] User not found or offline.").await;

        send_line(&mut alice, "/whisper bob psst secret").await;
        read_until(&mut alice, "[SUCCESS] Whisper sent.").await;
        read_until(&mut bob, "[WHISPER from alice]: psst secret").await;

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_join_twice_and_leave_twice() {
        let (addr, state, path) = spawn_server().await;
        let mut alice = login(addr, "alice").await;

        send_line(&mut alice, "/join lobby").await;
        read_until(&mut alice, "[SUCCESS] Joined room 'lobby'").await;

        // Rejoining the same room is leave-then-join and ends with a single
        // membership entry.
        send_line(&mut alice, "/join lobby").await;
        let replies = read_until(&mut alice, "[SUCCESS] Joined room 'lobby'").await;
        assert!(replies.contains("[SUCCESS] Left room 'lobby'"));
        assert_eq!(state.rooms.members_of("lobby").await, vec!["alice"]);

        send_line(&mut alice, "/leave").await;
        read_until(&mut alice, "[SUCCESS] Left room 'lobby'").await;
        send_line(&mut alice, "/leave").await;
        read_until(&mut alice, "[ERROR] You are not in any room.").await;

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_leave_empties_room_and_next_join_is_fresh() {
        let (addr, state, path) = spawn_server().await;
        let mut alice = login(addr, "alice").await;

        send_line(&mut alice, "/join lobby").await;
        read_until(&mut alice, "[SUCCESS] Joined room 'lobby'").await;
        send_line(&mut alice, "/leave").await;
        read_until(&mut alice, "[SUCCESS] Left room 'lobby'").await;
        assert_eq!(state.rooms.active_room_count().await, 0);

        let mut bob = login(addr, "bob").await;
        send_line(&mut bob, "/join lobby").await;
        read_until(&mut bob, "[SUCCESS] Joined room 'lobby'").await;
        assert_eq!(state.rooms.members_of("lobby").await, vec!["bob"]);

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_unknown_command_and_not_in_room_errors() {
        let (addr, _state, path) = spawn_server().await;
        let mut alice = login(addr, "alice").await;

        send_line(&mut alice, "/dance").await;
        read_until(&mut alice, "[ERROR] Unknown command.").await;
        send_line(&mut alice, "/broadcast hello").await;
        read_until(&mut alice, "[ERROR] Join a room first.").await;
        send_line(&mut alice, "/whisper bob").await;
        read_until(&mut alice, "[ERROR] Usage: /whisper <username> <message>").await;
        send_line(&mut alice, "/join bad room!").await;
        read_until(&mut alice, "[SUCCESS] Joined room 'bad'").await;
        send_line(&mut alice, "/join no-good").await;
        read_until(&mut alice, "[ERROR] Invalid room name.").await;

        // An overlong alphanumeric room name joins under its first 32 bytes.
        send_line(&mut alice, &format!("/join {}", "x".repeat(40))).await;
        read_until(&mut alice, &format!("[SUCCESS] Joined room '{}'", "x".repeat(32))).await;

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_exit_frees_name_for_reuse() {
        let (addr, _state, path) = spawn_server().await;
        let mut alice = login(addr, "alice").await;
        send_line(&mut alice, "/exit").await;
        read_until(&mut alice, "[INFO] Goodbye!").await;

        // The server closes the connection after the goodbye.
        let mut buf = [0u8; 64];
        loop {
            match timeout(Duration::from_secs(10), alice.read(&mut buf)).await {
                Ok(Ok(0)) | Ok(Err(_)) => break,
                Ok(Ok(_)) => continue,
                Err(_) => panic!("server did not close the connection after /exit"),
            }
        }

        let _again = login(addr, "alice").await;
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_sixteenth_client_is_turned_away() {
        let (addr, _state, path) = spawn_server().await;
        let mut held = Vec::new();
        for _ in 0..clients::MAX_CLIENTS {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            read_until(&mut stream, "Enter username").await;
            held.push(stream);
        }

        let mut extra = TcpStream::connect(addr).await.unwrap();
        read_until(&mut extra, "[ERROR] Server full. Try again later.").await;

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_eleventh_room_is_rejected() {
        let (addr, _state, path) = spawn_server().await;
        let mut streams = Vec::new();
        for i in 0..rooms::MAX_ROOMS {
            let mut stream = login(addr, &format!("user{i}")).await;
            send_line(&mut stream, &format!("/join room{i}")).await;
            read_until(&mut stream, &format!("[SUCCESS] Joined room 'room{i}'")).await;
            streams.push(stream);
        }

        let mut late = login(addr, "late").await;
        send_line(&mut late, "/join overflow").await;
        read_until(&mut late, "[ERROR] Unable to join room.").await;

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_sendfile_validation_and_size_boundary() {
        let (addr, _state, path) = spawn_server().await;
        let mut alice = login(addr, "alice").await;
        let mut bob = login(addr, "bob").await;

        send_line(&mut alice, "/sendfile virus.exe bob").await;
        read_until(&mut alice, "[ERROR] Invalid file type. Allowed: .txt, .pdf, .jpg, .png").await;

        send_line(&mut alice, "/sendfile notes.txt ghost").await;
        read_until(&mut alice, "[ERROR] Target user not found or offline.").await;

        let exact = std::env::temp_dir().join(format!("parley-exact-{}.txt", std::process::id()));
        let over = std::env::temp_dir().join(format!("parley-over-{}.txt", std::process::id()));
        std::fs::write(&exact, vec![0u8; uploads::MAX_FILE_SIZE as usize]).unwrap();
        std::fs::write(&over, vec![0u8; uploads::MAX_FILE_SIZE as usize + 1]).unwrap();

        send_line(&mut alice, &format!("/sendfile {} bob", over.display())).await;
        read_until(&mut alice, "[ERROR] File exceeds size limit (3MB).").await;

        send_line(&mut alice, &format!("/sendfile {} bob", exact.display())).await;
        read_until(&mut alice, "[SUCCESS] File added to upload queue.").await;
        let notice = read_until(&mut bob, "[FILE] Received").await;
        assert!(notice.contains(&format!("({} bytes)", uploads::MAX_FILE_SIZE)));

        let _ = std::fs::remove_file(exact);
        let _ = std::fs::remove_file(over);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_upload_queue_backpressure_and_fifo_delivery() {
        let (addr, _state, path) = spawn_server().await;
        let mut alice = login(addr, "alice").await;
        let mut bob = login(addr, "bob").await;

        for i in 1..=uploads::MAX_UPLOAD_QUEUE {
            send_line(&mut alice, &format!("/sendfile a{i}.txt bob")).await;
            read_until(&mut alice, "[SUCCESS] File added to upload queue.").await;
        }

        // The sixth producer blocks until the worker finishes a job.
        let blocked_at = Instant::now();
        send_line(&mut alice, "/sendfile a6.txt bob").await;
        read_until(&mut alice, "[INFO] Upload queue full. Waiting...").await;
        read_until(&mut alice, "[SUCCESS] File queued for upload.").await;
        assert!(blocked_at.elapsed() >= Duration::from_millis(1500));

        // Deliveries arrive in enqueue order; absent files carry the
        // nominal size.
        let notices = read_until(&mut bob, "a6.txt").await;
        let positions: Vec<usize> = (1..=6)
            .map(|i| notices.find(&format!("[FILE] Received 'a{i}.txt' from alice (1024 bytes)")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));

        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.contains("[FILE-QUEUE] Upload 'a6.txt' from alice added to queue after wait."));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_shutdown_notifies_all_clients() {
        let (addr, state, path) = spawn_server().await;
        let mut alice = login(addr, "alice").await;
        let mut bob = login(addr, "bob").await;
        send_line(&mut alice, "/join red").await;
        read_until(&mut alice, "[SUCCESS] Joined room 'red'").await;
        send_line(&mut bob, "/join blue").await;
        read_until(&mut bob, "[SUCCESS] Joined room 'blue'").await;

        shutdown(&state).await;
        read_until(&mut alice, "[SERVER] Server shutting down. Goodbye!").await;
        read_until(&mut bob, "[SERVER] Server shutting down. Goodbye!").await;

        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.contains("[SHUTDOWN] Shutdown signal received. Disconnecting 2 clients, saving logs."));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_disconnect_cleans_up_room_and_name() {
        let (addr, state, path) = spawn_server().await;
        {
            let mut alice = login(addr, "alice").await;
            send_line(&mut alice, "/join lobby").await;
            read_until(&mut alice, "[SUCCESS] Joined room 'lobby'").await;
        }

        // The dropped connection is reaped; wait for the session task to
        // run its cleanup.
        timeout(Duration::from_secs(10), async {
            while state.clients.active_count().await != 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("session cleanup did not run");
        assert_eq!(state.rooms.active_room_count().await, 0);

        let _again = login(addr, "alice").await;
        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.contains("[DISCONNECT] user 'alice' lost connection. Cleaned up resources."));
        let _ = std::fs::remove_file(path);
    }
}
