//! Thin key-value store adapter (spec 4: C1). Wraps a single-node
//! Redis-compatible store: hashes, sorted sets, lists, atomic Lua
//! scripts, and pub/sub, behind a pooled connection. Every other
//! component treats this as the sole shared mutable resource.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mailengine_kv::{KvStore, KvConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = KvConfig::builder()
//!         .url("redis://localhost:6379")
//!         .pool_size(10)
//!         .build();
//!
//!     let kv = KvStore::new(config).await?;
//!     kv.set_value("iad:acct-1", "{}").await?;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod pool;
mod pubsub;
mod service;

pub use config::{KvConfig, KvConfigBuilder};
pub use error::{KvError, Result};
pub use pool::{KvConnection, KvPool};
pub use pubsub::{Message, PubSub, Subscription};
pub use service::KvStore;

// Re-export redis crate for convenience
pub use redis;
pub use redis::{AsyncCommands, Commands, RedisResult, Value};

/// Prelude for common imports.
///
/// ```
/// use mailengine_kv::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{KvConfig, KvConfigBuilder};
    pub use crate::error::{KvError, Result};
    pub use crate::pool::{KvConnection, KvPool};
    pub use crate::pubsub::{Message, PubSub, Subscription};
    pub use crate::service::KvStore;
    pub use redis::{AsyncCommands, Commands};
}
