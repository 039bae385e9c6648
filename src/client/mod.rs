use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::signal;
use tracing::debug;

/// Connects to the server and drives the interactive terminal session:
/// a background task prints server output colorized by tag while the
/// foreground loop forwards stdin lines.
pub async fn start(host: &str, port: u16) -> anyhow::Result<()> {
    println!("Connecting to server {host}:{port}...");
    let stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("Connection failed to {host}:{port}"))?;
    let (mut read, mut write) = stream.into_split();

    println!("{}", "Connected to chat server!".green());
    print_menu();

    let running = Arc::new(AtomicBool::new(true));

    let reader_running = running.clone();
    let mut reader = tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match read.read(&mut buf).await {
                Ok(0) | Err(_) => {
                    if reader_running.load(Ordering::SeqCst) {
                        println!("{}", "\nConnection lost.".red());
                    }
                    break;
                }
                Ok(n) => print_colored(&String::from_utf8_lossy(&buf[..n])),
            }
        }
    });

    // Stdin is read on a plain thread; lines reach the socket writer
    // through a channel.
    let (tx, rx) = flume::unbounded::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        tokio::select! {
            _ = &mut reader => break,
            _ = signal::ctrl_c() => {
                println!("{}", "\nExiting...".yellow());
                running.store(false, Ordering::SeqCst);
                break;
            }
            line = rx.recv_async() => {
                let Ok(line) = line else { break };
                let line = line.trim_end_matches('\r');
                if line.is_empty() {
                    continue;
                }
                if line == "/exit" {
                    running.store(false, Ordering::SeqCst);
                }
                if let Err(err) = write.write_all(format!("{line}\n").as_bytes()).await {
                    debug!("Send failed: {err}");
                    break;
                }
                if line == "/exit" {
                    break;
                }
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    reader.abort();
    println!("{}", "Disconnected from server.".yellow());
    Ok(())
}

/// Colors a chunk of server output by its leading tag. The tag set is part
/// of the wire protocol.
fn print_colored(message: &str) {
    let painted = if message.contains("[ERROR]") {
        message.red().to_string()
    } else if message.contains("[SUCCESS]") {
        message.green().to_string()
    } else if message.contains("[INFO]") {
        message.blue().to_string()
    } else if message.contains("[WHISPER") {
        message.magenta().to_string()
    } else if message.contains("[FILE]") {
        message.cyan().to_string()
    } else if message.contains("[SERVER]") {
        message.yellow().to_string()
    } else {
        message.to_string()
    };
    print!("{painted}");
    let _ = std::io::stdout().flush();
}

fn print_menu() {
    println!("{}", "\n=== Chat Client Commands ===".cyan());
    println!("/join <room_name>     - Join or create a room");
    println!("/leave               - Leave current room");
    println!("/broadcast <message> - Send message to room");
    println!("/whisper <user> <msg>- Send private message");
    println!("/sendfile <file> <user> - Send file to user");
    println!("/exit                - Disconnect from server");
    println!("{}", "============================\n".cyan());
}
