// src/lib.rs

pub mod config;
pub mod credential;
pub mod error;
pub mod extraction;
pub mod heuristics;
pub mod ledger;
pub mod llm_extract;
pub mod lobby_db;
pub mod service;
pub mod settlement;

pub use error::{ConfigError, InterpretError, LedgerError, LedgerResult, NotFound, StoreError};
pub use heuristics::{Interpretation, LineItem, OcrLine, ReceiptTotals, interpret_receipt};
pub use ledger::Lobby;
pub use service::LobbyService;
pub use settlement::Summary;
