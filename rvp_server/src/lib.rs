//! HTTP front end for the rvp rendezvous relay.

pub mod config;
pub mod handler;
pub mod response;
pub mod server;

pub use config::{Args, ConfigError, ServerConfig};
pub use handler::{is_valid_name, RelayHandler, ServerError};
pub use server::{run, serve};
