//! Outbound notification webhook delivery (spec 4: C7 Notification
//! Worker). One job in, one POST out: load the per-account config,
//! skip if unsubscribed, strip embedded Basic auth into a header,
//! sign the body, and classify the response for the caller's queue
//! retry decision.
//!
//! ```rust,no_run
//! use mailengine_webhooks::{EventEnvelope, EventKind, WebhookClient, WebhookConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = WebhookClient::new("service-secret");
//!     let config = WebhookConfig::new("https://example.com/hook");
//!     let envelope = EventEnvelope::new("acct-1", EventKind::MessageNew, serde_json::json!({}));
//!
//!     let outcome = client.deliver(&config, &envelope).await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod payload;
mod signature;

pub use client::{DeliveryOutcome, WebhookClient};
pub use config::{WebhookConfig, WebhookConfigBuilder};
pub use error::WebhookError;
pub use payload::{EventEnvelope, EventKind};
pub use signature::WebhookSignature;

/// Result type for notification delivery operations.
pub type Result<T> = std::result::Result<T, WebhookError>;

pub mod prelude {
    pub use crate::client::{DeliveryOutcome, WebhookClient};
    pub use crate::config::{WebhookConfig, WebhookConfigBuilder};
    pub use crate::error::WebhookError;
    pub use crate::payload::{EventEnvelope, EventKind};
    pub use crate::Result;
}
