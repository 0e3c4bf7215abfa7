//! # followup-gmail
//!
//! Gmail mail collaborator for the follow-up reminder engine.
//!
//! ## Features
//!
//! - **Message listing**: most recent messages, paged
//! - **Metadata fetch**: `Subject`, `From`, `To` and `Date` headers plus the
//!   provider timestamp
//! - **Sending**: plain-text RFC 5322 messages from the account owner
//! - **Token management**: refresh-token grant, reuse until shortly before
//!   expiry
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use followup_core::{FollowUpEngine, MemoryReminderStore};
//! use followup_gmail::{GmailClient, GmailConfig};
//!
//! let config = GmailConfig::new("client_id", "client_secret", "refresh_token");
//! let mail = Arc::new(GmailClient::new(config)?);
//! let engine = FollowUpEngine::new(mail, Arc::new(MemoryReminderStore::new()));
//! let created = engine.ingest(20).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod auth;
mod client;
mod error;

pub use auth::{OAuthClient, Token, TokenResponse};
pub use client::{DEFAULT_API_BASE, DEFAULT_TOKEN_URL, GmailClient, GmailConfig};
pub use error::{Error, Result};
