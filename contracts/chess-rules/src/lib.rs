#![no_std]

//! # Chess Rules
//!
//! The canonical board model and move-legality engine shared by both peers of
//! a chess state channel and by the on-ledger arbiter contract. Every
//! participant must evaluate positions identically, so this crate is pure,
//! allocation-free and deterministic: boards are `Copy` values and every
//! operation returns a new board instead of mutating its input.
//!
//! ## Modules
//! - [`board`]: the 128-cell padded layout and its reserved bookkeeping cells.
//! - [`codec`]: FEN-style notation to/from [`Board`].
//! - [`rules`]: legal move generation, move application, check/mate detection.
//! - [`digest`]: the canonical byte preimage that gets hashed and signed.

#[cfg(test)]
extern crate std;

pub mod board;
pub mod codec;
pub mod digest;
pub mod rules;

pub use board::{Board, Piece, Side};
pub use codec::{decode, encode, FormatError};
pub use rules::{
    apply_move, has_any_legal_move, is_in_check, is_square_attacked, legal_move_targets, status,
    GameStatus, MoveSet, RuleError,
};
