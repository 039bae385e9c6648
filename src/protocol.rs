use tokio::net::tcp::OwnedReadHalf;
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::validate::MAX_ROOM_NAME_LEN;

/// Hard cap on a single inbound command line, in bytes.
pub const MAX_LINE_LEN: usize = 4096;

/// Wraps a connection's read half in newline framing. Lines longer than
/// [`MAX_LINE_LEN`] surface as a decode error and end the session.
pub fn framed_lines(read: OwnedReadHalf) -> FramedRead<OwnedReadHalf, LinesCodec> {
    FramedRead::new(read, LinesCodec::new_with_max_length(MAX_LINE_LEN))
}

/// One parsed client command. Borrows from the input line.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Join(&'a str),
    Leave,
    Broadcast(&'a str),
    Whisper { target: &'a str, text: &'a str },
    SendFile { filename: &'a str, target: &'a str },
    Exit,
    Unknown,
}

/// A line that names a known verb but does not match its grammar.
#[derive(Debug, PartialEq, Eq)]
pub enum Usage {
    Whisper,
    SendFile,
}

impl Usage {
    pub fn message(&self) -> &'static str {
        match self {
            Usage::Whisper => "[ERROR] Usage: /whisper <username> <message>\n",
            Usage::SendFile => "[ERROR] Usage: /sendfile <filename> <username>\n",
        }
    }
}

impl<'a> Command<'a> {
    /// Dispatch is by exact prefix. A verb without its argument separator
    /// (`/join` with no space, `/broadcast` alone) is an unknown command.
    pub fn parse(line: &'a str) -> Result<Command<'a>, Usage> {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(rest) = line.strip_prefix("/join ") {
            let room = rest.split_whitespace().next().unwrap_or("");
            return Ok(Command::Join(clip(room, MAX_ROOM_NAME_LEN)));
        }
        if line == "/leave" {
            return Ok(Command::Leave);
        }
        if let Some(text) = line.strip_prefix("/broadcast ") {
            return Ok(Command::Broadcast(text));
        }
        if let Some(rest) = line.strip_prefix("/whisper ") {
            // The target ends at the first space; the rest is the message.
            return match rest.split_once(' ') {
                Some((target, text)) => Ok(Command::Whisper { target, text }),
                None => Err(Usage::Whisper),
            };
        }
        if let Some(rest) = line.strip_prefix("/sendfile ") {
            let mut parts = rest.split_whitespace();
            return match (parts.next(), parts.next()) {
                (Some(filename), Some(target)) => Ok(Command::SendFile { filename, target }),
                _ => Err(Usage::SendFile),
            };
        }
        if line == "/exit" {
            return Ok(Command::Exit);
        }
        Ok(Command::Unknown)
    }
}

/// Clips a token to at most `max` bytes without splitting a character.
/// An overlong room argument joins under its truncated name, the same as
/// a width-limited scan would produce.
fn clip(token: &str, max: usize) -> &str {
    if token.len() <= max {
        return token;
    }
    let mut end = max;
    while !token.is_char_boundary(end) {
        end -= 1;
    }
    &token[..end]
}
