use std::error::Error;
use std::fmt;

/// Every client slot is occupied. The caller turns the connection away.
#[derive(Debug)]
pub struct ServerFullError;

impl fmt::Display for ServerFullError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "all client slots are occupied")
    }
}

impl Error for ServerFullError {}

/// Why a join request could not be honored.
#[derive(Debug, PartialEq, Eq)]
pub enum RoomJoinError {
    /// No vacant slot in the room table.
    NoFreeRoom,
    /// The room exists but its membership is at capacity.
    RoomFull,
}

impl fmt::Display for RoomJoinError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RoomJoinError::NoFreeRoom => write!(f, "no vacant room slot"),
            RoomJoinError::RoomFull => write!(f, "room membership is at capacity"),
        }
    }
}

impl Error for RoomJoinError {}
