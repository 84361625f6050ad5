use std::fmt;

use bytes::Bytes;

/// Which side of a pairing an operation stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Write,
    Read,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Write => write!(f, "write"),
            OpKind::Read => write!(f, "read"),
        }
    }
}

/// Terminal result handed to a writer or reader.
///
/// `Ok` resolves a writer whose payload was picked up, `Data` resolves a
/// reader with the payload. The remaining variants end an operation that
/// never got paired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Data(Bytes),
    Timeout,
    Closed,
    PeerDisconnected,
}

impl Outcome {
    /// Numeric code carried in the JSON envelope.
    pub fn code(&self) -> i32 {
        match self {
            Outcome::Ok | Outcome::Data(_) => 0,
            Outcome::Closed => -1,
            Outcome::PeerDisconnected => 1,
            Outcome::Timeout => 2,
        }
    }

    pub fn message(&self) -> Option<&'static str> {
        match self {
            Outcome::Ok | Outcome::Data(_) => None,
            Outcome::Closed => Some("channel closed"),
            Outcome::PeerDisconnected => Some("peer disconnected whilst writing data"),
            Outcome::Timeout => Some("request timed out"),
        }
    }

    /// Whether the operation was paired with its counterpart.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Ok | Outcome::Data(_))
    }
}

/// The ways a pending operation can end without a pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Timeout,
    Closed,
    PeerDisconnected,
}

impl From<Failure> for Outcome {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Timeout => Outcome::Timeout,
            Failure::Closed => Outcome::Closed,
            Failure::PeerDisconnected => Outcome::PeerDisconnected,
        }
    }
}

/// Snapshot of a channel's state variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Standby,
    WriteWaiting,
    ReadWaiting,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKind::Standby => write!(f, "Standby"),
            StateKind::WriteWaiting => write!(f, "WriteWaiting"),
            StateKind::ReadWaiting => write!(f, "ReadWaiting"),
        }
    }
}
