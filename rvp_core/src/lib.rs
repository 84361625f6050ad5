//! Core of the rvp rendezvous relay.
//!
//! A writer and a reader that know nothing about each other meet at a named
//! [`Channel`]. Whichever arrives first is parked as a pending operation until
//! the other one shows up, its wait times out, or it disconnects. After one
//! handoff the channel is back in standby, ready for the next pair.
//!
//! [`ChannelRegistry`] owns the name → channel mapping and evicts channels
//! nobody has used for a while.

pub mod channel;
pub mod error;
pub mod outcome;
pub mod pending;
pub mod registry;
pub mod timer;

pub use channel::Channel;
pub use error::ChannelError;
pub use outcome::{Failure, OpKind, Outcome, StateKind};
pub use pending::{OperationId, PendingOperation, Waiter};
pub use registry::{ChannelRegistry, RegistryConfig, DEFAULT_IDLE_TIMEOUT, DEFAULT_OPERATION_TIMEOUT};
pub use timer::{Armed, TimeoutScheduler};
