//! State digests and the wallet seam.
//!
//! Digests are keccak-256 over the ABI-style preimages from
//! [`chess_rules::digest`], so a signature produced here verifies against the
//! arbiter contract's own hash of the same board.

use chess_rules::digest::{state_preimage, WORD};
use chess_rules::Board;
use serde::{Deserialize, Serialize};
use sha3::{Digest as _, Keccak256};

pub type Digest = [u8; 32];

/// Recoverable secp256k1 signature: `r`, `s` and the recovery id `v` (0..=3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: u8,
}

/// Wallet capability used to sign and check channel messages.
///
/// `Account` identifies whose key is meant: implementations decide whether
/// that is an address, a public key or a key handle.
pub trait Signer {
    type Account;
    type Error: std::error::Error + Send + Sync + 'static;

    fn sign(&self, account: &Self::Account, digest: &Digest) -> Result<StateSignature, Self::Error>;

    fn verify(&self, account: &Self::Account, signature: &StateSignature, digest: &Digest) -> bool;
}

/// keccak-256 of the canonical state preimage.
pub fn state_hash(board: &Board, game_id: u32) -> Digest {
    keccak(&state_preimage(board, game_id))
}

/// keccak-256 over `(game_id, move_number, from, to)`, each as a 32-byte
/// big-endian word.
pub fn move_hash(game_id: u32, move_number: u16, from: u8, to: u8) -> Digest {
    let mut preimage = [0u8; 4 * WORD];
    preimage[WORD - 4..WORD].copy_from_slice(&game_id.to_be_bytes());
    preimage[2 * WORD - 2..2 * WORD].copy_from_slice(&move_number.to_be_bytes());
    preimage[3 * WORD - 1] = from;
    preimage[4 * WORD - 1] = to;
    keccak(&preimage)
}

fn keccak(bytes: &[u8]) -> Digest {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(bytes));
    out
}

/// Binds a [`Signer`] to the channel's digest scheme.
pub struct SigningBridge<S> {
    signer: S,
}

impl<S: Signer> SigningBridge<S> {
    pub fn new(signer: S) -> Self {
        Self { signer }
    }

    pub fn signer(&self) -> &S {
        &self.signer
    }

    pub fn state_hash(&self, board: &Board, game_id: u32) -> Digest {
        state_hash(board, game_id)
    }

    pub fn sign_state(
        &self,
        account: &S::Account,
        board: &Board,
        game_id: u32,
    ) -> Result<StateSignature, S::Error> {
        self.signer.sign(account, &state_hash(board, game_id))
    }

    pub fn verify_state(
        &self,
        account: &S::Account,
        board: &Board,
        game_id: u32,
        signature: &StateSignature,
    ) -> bool {
        self.signer
            .verify(account, signature, &state_hash(board, game_id))
    }

    pub fn sign_move(
        &self,
        account: &S::Account,
        game_id: u32,
        move_number: u16,
        from: u8,
        to: u8,
    ) -> Result<StateSignature, S::Error> {
        self.signer
            .sign(account, &move_hash(game_id, move_number, from, to))
    }

    pub fn verify_move(
        &self,
        account: &S::Account,
        game_id: u32,
        move_number: u16,
        from: u8,
        to: u8,
        signature: &StateSignature,
    ) -> bool {
        self.signer
            .verify(account, signature, &move_hash(game_id, move_number, from, to))
    }
}
