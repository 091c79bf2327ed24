use std::io;

use chess_rules::{RuleError, Side};

/// Failures of a [`MoveStore`](crate::MoveStore) backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("ledger i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("ledger file is malformed: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("game {0} is not tracked by the local ledger")]
    UnknownGame(u32),
    #[error("game {game_id}: move {move_number} is older than the last recorded move {last}")]
    SequenceRegression {
        game_id: u32,
        move_number: u16,
        last: u16,
    },
    #[error("game {game_id}: cannot build a submission, {reason}")]
    OutOfOrder { game_id: u32, reason: &'static str },
    #[error("game {game_id} is already tracked as {existing:?}")]
    SideMismatch { game_id: u32, existing: Side },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("game {0}: it is not this side's turn")]
    WrongTurn(u32),
    #[error("game {0}: opponent signature does not match the claimed state")]
    SignatureMismatch(u32),
    #[error("game {0}: claimed state differs from the replayed move")]
    StateMismatch(u32),
    #[error("signer failed: {0}")]
    Signer(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}
