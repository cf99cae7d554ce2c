//! Embergate Game Server Library
//!
//! This library provides the core of the Embergate game server: a framed,
//! encrypted TCP transport, a key exchange per connection, and a partitioned
//! processor that keeps each connection's and each map's work in order.
//!
//! ## Modules
//!
//! - `config` - Server configuration management
//! - `crypto` - Key exchange, stream cipher and randomness
//! - `error` - Error types and result definitions
//! - `game` - Processors, dispatch, handlers and game registries
//! - `logging` - Tracing setup and the async log sink
//! - `net` - Listener, framing and connection lifecycle
//! - `protocol` - Wire messages
//! - `state` - Shared server state

pub mod config;
pub mod crypto;
pub mod error;
pub mod game;
pub mod logging;
pub mod net;
pub mod protocol;
pub mod state;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use game::GameServer;
pub use state::ServerState;

/// Server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
