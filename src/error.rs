// src/error.rs

use std::time::Duration;
use thiserror::Error;

/// What a ledger lookup failed to find.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFound {
    #[error("lobby {0} not found")]
    Lobby(String),
    #[error("item {0} not found")]
    Item(String),
    #[error("participant {0} not found")]
    Participant(String),
}

/// Errors surfaced by lobby and claim operations. None of them leave a
/// partially applied change behind.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("claim of {requested} on item {item_id} exceeds the {available} still available")]
    OverClaim {
        item_id: String,
        requested: f64,
        available: f64,
    },

    #[error("invalid quantity {quantity} for item {item_id}: {reason}")]
    InvalidQuantity {
        item_id: String,
        quantity: f64,
        reason: &'static str,
    },

    #[error(transparent)]
    NotFound(#[from] NotFound),

    #[error("participant {participant_id} is not the lobby host")]
    Unauthorized { participant_id: String },

    #[error("invalid lobby passcode")]
    InvalidCredential,

    #[error("passcode rejected: {0}")]
    InvalidPasscode(String),

    #[error("invalid item: {0}")]
    InvalidItem(String),

    #[error("lobby {lobby_id} kept changing underneath the update; try again")]
    StaleLobby { lobby_id: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Failures of the external text/fallback extraction boundary. A failed
/// interpretation never produces a lobby.
#[derive(Debug, Error)]
pub enum InterpretError {
    #[error("external extraction did not finish within {after:?}")]
    ExternalExtractionTimeout { after: Duration },

    #[error("external extraction failed: {0}")]
    ExternalExtraction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("lobby {0} not found in store")]
    NotFound(String),

    #[error("lobby {lobby_id} version {attempted} is not newer than stored version {stored}")]
    Conflict {
        lobby_id: String,
        stored: u64,
        attempted: u64,
    },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to edit configuration: {0}")]
    Edit(#[from] toml_edit::TomlError),

    #[error("invalid classifier rule {pattern:?}: {source}")]
    InvalidRule {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

pub type LedgerResult<T> = Result<T, LedgerError>;
