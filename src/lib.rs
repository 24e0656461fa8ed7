//! Multi-tenant email-sync engine core (spec 1: OVERVIEW). Owns account
//! lifecycle, worker assignment, and the submission/notification
//! queues; the IMAP/SMTP wire protocols themselves are out of scope
//! and consumed as capabilities (spec 1: Non-goals).

pub mod account;
pub mod assign;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod imap;
pub mod notify;
pub mod registry;
pub mod stats;
pub mod submit;
pub mod supervisor;
pub mod tokens;

pub use account::{Account, AccountError, AccountMeta, AccountPatch, AccountState, Credentials};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use registry::{AccountPage, AccountRegistry};
pub use stats::StatsRecorder;
pub use supervisor::{CallPayload, CallResult, ControlMessage, Supervisor};
pub use tokens::{ServiceToken, TokenStore};

pub mod prelude {
    pub use crate::account::{Account, AccountError, AccountMeta, AccountPatch, AccountState, Credentials};
    pub use crate::assign::{AssignmentController, AssignmentState};
    pub use crate::config::EngineConfig;
    pub use crate::crypto::SecretCipher;
    pub use crate::error::{EngineError, Result};
    pub use crate::imap::{ConnectionState, ImapCapability, ImapWorker};
    pub use crate::registry::{AccountPage, AccountRegistry};
    pub use crate::stats::StatsRecorder;
    pub use crate::supervisor::{CallPayload, CallResult, ControlMessage, Supervisor};
    pub use crate::tokens::{ServiceToken, TokenStore};
}
