//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → limits copied into the dispatcher's ServiceContext
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::AcceptConfig;
pub use schema::BufferLimit;
pub use schema::HeartbeatConfig;
pub use schema::LimitsConfig;
pub use schema::ListenerConfig;
pub use schema::ServerConfig;
