use thiserror::Error;

use crate::outcome::OpKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// A second operation of the same kind arrived while one is waiting.
    #[error("channel '{channel}' already has a pending {kind}")]
    Conflict { channel: String, kind: OpKind },

    /// The channel was torn down and can no longer be addressed.
    #[error("channel '{channel}' is closed")]
    Closed { channel: String },

    /// The pending operation was dropped without being resolved.
    #[error("channel closed unexpectedly")]
    Abandoned,
}

impl ChannelError {
    /// Envelope code for errors that are reported to a waiting caller.
    pub fn code(&self) -> Option<i32> {
        match self {
            ChannelError::Abandoned => Some(3),
            ChannelError::Conflict { .. } | ChannelError::Closed { .. } => None,
        }
    }
}
