//! Secure refresh-token storage using the system keyring.
//!
//! Uses the platform's native credential storage:
//! - Linux: Secret Service (GNOME Keyring, `KWallet`)
//! - macOS: Keychain
//! - Windows: Credential Manager

use keyring::Entry;
use tracing::debug;

use crate::config::{ENV_REFRESH_TOKEN, MailConfig};

/// Service name used for keyring entries.
const SERVICE_NAME: &str = "followup";

/// Keyring user under which the refresh token is stored.
const REFRESH_TOKEN_CREDENTIAL: &str = "gmail_refresh_token";

/// Error type for credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Failed to access keyring.
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Result type for credential operations.
pub type CredentialResult<T> = std::result::Result<T, CredentialError>;

fn refresh_token_entry() -> CredentialResult<Entry> {
    Ok(Entry::new(SERVICE_NAME, REFRESH_TOKEN_CREDENTIAL)?)
}

/// Stores the Gmail refresh token securely in the system keyring.
///
/// # Errors
///
/// Returns an error if the keyring operation fails.
pub fn store_refresh_token(token: &str) -> CredentialResult<()> {
    refresh_token_entry()?.set_password(token)?;
    debug!("Stored refresh token");
    Ok(())
}

/// Retrieves the Gmail refresh token from the system keyring.
///
/// # Errors
///
/// Returns an error if the keyring operation fails.
pub fn get_refresh_token() -> CredentialResult<Option<String>> {
    match refresh_token_entry()?.get_password() {
        Ok(token) => Ok(Some(token)),
        Err(keyring::Error::NoEntry) => {
            debug!("No refresh token found in keyring");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Deletes the Gmail refresh token from the keyring.
///
/// Returns false if there was nothing to delete.
///
/// # Errors
///
/// Returns an error if the keyring operation fails (except for a missing entry).
pub fn delete_refresh_token() -> CredentialResult<bool> {
    match refresh_token_entry()?.delete_credential() {
        Ok(()) => {
            debug!("Deleted refresh token");
            Ok(true)
        }
        Err(keyring::Error::NoEntry) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Finds the refresh token: configuration (file, then environment) first,
/// then the keyring.
///
/// # Errors
///
/// Returns a configuration error if no source has a token.
pub fn resolve_refresh_token(mail: &MailConfig) -> Result<String, followup_core::Error> {
    resolve_with(mail, get_refresh_token)
}

fn resolve_with(
    mail: &MailConfig,
    keyring_lookup: impl FnOnce() -> CredentialResult<Option<String>>,
) -> Result<String, followup_core::Error> {
    if let Some(token) = mail.refresh_token.as_ref().filter(|t| !t.trim().is_empty()) {
        return Ok(token.clone());
    }

    match keyring_lookup() {
        Ok(Some(token)) => return Ok(token),
        Ok(None) => {}
        Err(e) => debug!(error = %e, "Keyring unavailable"),
    }

    Err(followup_core::Error::Config(format!(
        "no Gmail refresh token: set mail.refresh_token, {ENV_REFRESH_TOKEN}, \
         or run `followup credentials set`"
    )))
}
