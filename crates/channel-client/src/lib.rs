//! # Channel Client
//!
//! The off-ledger half of a chess state channel. A [`ChannelSession`] checks
//! every move with the shared rule engine, signs or verifies the resulting
//! position through a [`SigningBridge`], and keeps a durable per-game move
//! history in a [`LocalLedger`]. That history is what a player hands to the
//! arbiter contract when the opponent stops cooperating.
//!
//! The wallet (see [`Signer`]) and the persistence backend (see [`MoveStore`])
//! are supplied by the embedding application.

pub mod config;
pub mod error;
pub mod ledger;
pub mod session;
pub mod signing;
pub mod store;

pub use config::ClientConfig;
pub use error::{ConfigError, LedgerError, SessionError, StoreError};
pub use ledger::{LedgerSnapshot, LocalLedger, LocalMoveRecord, RecordedMove, SubmissionPackage};
pub use session::{ChannelSession, SignedMove};
pub use signing::{move_hash, state_hash, Digest, Signer, SigningBridge, StateSignature};
pub use store::{JsonFileStore, MemoryStore, MoveStore};
