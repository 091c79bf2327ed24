//! Canonical byte preimage of a signed game state.
//!
//! Every cell is sign-extended into a 32-byte big-endian word and the game id
//! is appended as one more word, matching an EVM `abi.encode(int8[128],
//! uint256)` layout. Peers hash this with keccak-256 off the ledger and the
//! arbiter hashes the same bytes on the ledger, so the layout must never
//! change.

use crate::board::{Board, BOARD_SIZE};

pub const WORD: usize = 32;
pub const PREIMAGE_LEN: usize = (BOARD_SIZE + 1) * WORD;

pub fn state_preimage(board: &Board, game_id: u32) -> [u8; PREIMAGE_LEN] {
    let mut out = [0u8; PREIMAGE_LEN];
    for (word, &cell) in out.chunks_exact_mut(WORD).zip(board.cells().iter()) {
        if cell < 0 {
            word.fill(0xff);
        }
        word[WORD - 1] = cell as u8;
    }
    let tail = &mut out[BOARD_SIZE * WORD..];
    tail[WORD - 4..].copy_from_slice(&game_id.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{A8, SIDE_TO_MOVE};

    #[test]
    fn cells_are_sign_extended() {
        let preimage = state_preimage(&Board::initial(), 7);
        assert_eq!(preimage.len(), 4128);

        // a8 holds a black rook (-4).
        let a8 = &preimage[A8 * WORD..(A8 + 1) * WORD];
        assert!(a8[..WORD - 1].iter().all(|&b| b == 0xff));
        assert_eq!(a8[WORD - 1], 0xfc);

        let side = &preimage[SIDE_TO_MOVE * WORD..(SIDE_TO_MOVE + 1) * WORD];
        assert!(side[..WORD - 1].iter().all(|&b| b == 0));
        assert_eq!(side[WORD - 1], 1);
    }

    #[test]
    fn game_id_is_last_word() {
        let preimage = state_preimage(&Board::initial(), 0x0102_0304);
        let tail = &preimage[BOARD_SIZE * WORD..];
        assert!(tail[..WORD - 4].iter().all(|&b| b == 0));
        assert_eq!(&tail[WORD - 4..], &[1, 2, 3, 4]);
        assert_ne!(preimage, state_preimage(&Board::initial(), 5));
    }
}
