//! Error types for the companion sync core

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the sync core
#[derive(Error, Debug)]
pub enum Error {
    // Wallet store errors
    #[error("Wallet not found at index {0}")]
    WalletNotFound(usize),

    #[error("Address derivation failed for {wallet}: {reason}")]
    AddressDerivation { wallet: String, reason: String },

    #[error("Wallet {0} does not accept incoming payments")]
    ReceiveNotAllowed(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("Invoice creation failed: {0}")]
    Invoice(String),

    #[error("Wallet store error: {0}")]
    WalletStore(String),

    // Sync channel errors
    #[error("Transport send failed: {0}")]
    Transport(String),

    #[error("Companion unreachable")]
    CompanionUnavailable,

    #[error("Payload too large: {size} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    // Preference store errors
    #[error("Preference store error: {0}")]
    Preference(String),

    // Notification subscription errors
    #[error("Notification subscription failed: {0}")]
    Notification(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error came from the sync channel (logged, never retried)
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::CompanionUnavailable | Error::PayloadTooLarge { .. }
        )
    }

    /// Check if this error is isolated to a single wallet
    pub fn is_per_wallet(&self) -> bool {
        matches!(
            self,
            Error::WalletNotFound(_)
                | Error::AddressDerivation { .. }
                | Error::ReceiveNotAllowed(_)
                | Error::InvalidAmount(_)
                | Error::Invoice(_)
        )
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            Error::Deserialization(e.to_string())
        } else {
            Error::Serialization(e.to_string())
        }
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
