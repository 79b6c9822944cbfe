//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming connection
//!     → listener.rs (accept, admission limit, fatal vs retryable errors)
//!     → socket.rs / memory.rs (transport: pumps bytes into pipes)
//!     → transport.rs (contract the dispatcher sees)
//!     → connection.rs (dispatch id + lifecycle state)
//!
//! Connection States:
//!     Active → Draining → Closed
//! ```
//!
//! # Design Decisions
//! - The application only ever sees pipes, never the socket
//! - Backpressure lives in the pipes (pipe.rs)
//! - closed.rs turns the transport's close notification into something awaitable

pub mod closed;
pub mod connection;
pub mod listener;
pub mod memory;
pub mod pipe;
pub mod socket;
pub mod transport;

pub use closed::{wait_for_closed, ClosedSignal};
pub use connection::{ConnectionId, ConnectionRecord, ConnectionState};
pub use listener::{AcceptError, ConnectionListener, TcpConnectionListener};
pub use transport::TransportConnection;
