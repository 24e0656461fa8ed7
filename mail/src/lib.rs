//! SMTP submission transport (spec 1: C6 Submission Worker's external
//! collaborator). The core forwards an already-composed message; this
//! crate's job ends at handing it to `lettre` for delivery, not at
//! building or templating it.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mailengine_mail::{Email, SmtpConfig, SmtpTransport, Transport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SmtpConfig::new("smtp.example.com")
//!         .credentials("user@example.com", "password")
//!         .port(587)
//!         .starttls();
//!
//!     let transport = SmtpTransport::new(config).await?;
//!
//!     let email = Email::new()
//!         .from("sender@example.com")
//!         .to("recipient@example.com")
//!         .subject("Hello")
//!         .text("This is a test email.");
//!
//!     transport.send(&email).await?;
//!     Ok(())
//! }
//! ```

mod address;
mod attachment;
mod email;
mod error;
mod transport;

pub use address::{Address, IntoAddress, Mailbox};
pub use attachment::{Attachment, ContentDisposition};
pub use email::{Email, EmailBuilder};
pub use error::{MailError, Result};
pub use transport::{SmtpConfig, SmtpSecurity, SmtpTransport, Transport};

/// Prelude for common imports.
///
/// ```
/// use mailengine_mail::prelude::*;
/// ```
pub mod prelude {
    pub use crate::address::{Address, IntoAddress, Mailbox};
    pub use crate::attachment::{Attachment, ContentDisposition};
    pub use crate::email::{Email, EmailBuilder};
    pub use crate::error::{MailError, Result};
    pub use crate::transport::{SmtpConfig, SmtpSecurity, SmtpTransport, Transport};
}
