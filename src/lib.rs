//! Connection dispatch engine for asynchronous network servers.

pub mod config;
pub mod dispatch;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod pipeline;
pub mod resilience;

pub use config::ServerConfig;
pub use dispatch::{Dispatcher, ServiceContext};
pub use lifecycle::Shutdown;
pub use pipeline::ConnectionDelegate;
