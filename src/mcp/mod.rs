//! Model Context Protocol integration: transports, protocol parsing, and
//! the cached per-server connections that bridge remote tools into the
//! gateway's tool sets.

pub mod connection;
pub mod protocol;
pub mod transport;

pub use connection::{McpConnection, McpPool};
