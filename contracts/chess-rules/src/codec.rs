//! FEN-style text notation for [`Board`].
//!
//! ```text
//! <rank8>/<rank7>/.../<rank1> <w|b> <KQkq|-> <ep square|-> [halfmove] <fullmove>
//! ```
//!
//! The halfmove clock of six-field FEN is accepted and discarded; the board
//! has no cell for it. The move counter is recovered as
//! `2 * (fullmove - 1) + (black to move ? 1 : 0)`.

use core::fmt;

use crate::board::{
    file_of, row_of, square, Board, Piece, Side, BLACK_KING_POS, CASTLE_AVAILABLE,
    CASTLE_BLACK_KING, CASTLE_BLACK_QUEEN, CASTLE_WHITE_KING, CASTLE_WHITE_QUEEN, EP_BLACK,
    EP_WHITE, MAX_MOVE_COUNT, WHITE_KING_POS,
};

/// Castling letters in emission order with the flag cell each one reads.
const CASTLING: [(char, usize); 4] = [
    ('K', CASTLE_WHITE_KING),
    ('Q', CASTLE_WHITE_QUEEN),
    ('k', CASTLE_BLACK_KING),
    ('q', CASTLE_BLACK_QUEEN),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("missing {0} field")]
    MissingField(&'static str),
    #[error("unexpected trailing field")]
    TrailingField,
    #[error("expected 8 ranks, found {0}")]
    RankCount(usize),
    #[error("rank {rank} does not span exactly 8 files")]
    RankWidth { rank: usize },
    #[error("unknown piece character {0:?}")]
    UnknownChar(char),
    #[error("side to move must be 'w' or 'b'")]
    Side,
    #[error("malformed castling field")]
    Castling,
    #[error("malformed en-passant field")]
    EnPassant,
    #[error("move number out of range")]
    MoveNumber,
    #[error("each side needs exactly one king")]
    KingCount,
    #[error("position violates board invariants")]
    InvalidPosition,
}

/// Parses algebraic square names such as `e4`.
pub fn parse_square(name: &str) -> Option<usize> {
    match name.as_bytes() {
        &[file @ b'a'..=b'h', rank @ b'1'..=b'8'] => {
            Some(square((file - b'a') as usize, (rank - b'1') as usize))
        }
        _ => None,
    }
}

pub fn decode(notation: &str) -> Result<Board, FormatError> {
    let mut fields = notation.split_ascii_whitespace();
    let placement = fields.next().ok_or(FormatError::MissingField("placement"))?;
    let side = fields.next().ok_or(FormatError::MissingField("side"))?;
    let castling = fields.next().ok_or(FormatError::MissingField("castling"))?;
    let en_passant = fields.next().ok_or(FormatError::MissingField("en passant"))?;
    let first = fields.next().ok_or(FormatError::MissingField("fullmove"))?;
    let fullmove = match fields.next() {
        Some(fullmove) => {
            first.parse::<u32>().map_err(|_| FormatError::MoveNumber)?;
            fullmove
        }
        None => first,
    };
    if fields.next().is_some() {
        return Err(FormatError::TrailingField);
    }

    let mut board = Board::empty();
    decode_placement(&mut board, placement)?;

    let side = match side {
        "w" => Side::White,
        "b" => Side::Black,
        _ => return Err(FormatError::Side),
    };
    board.set_side_to_move(side);

    if castling != "-" {
        for c in castling.chars() {
            let (_, cell) = CASTLING
                .iter()
                .find(|(letter, _)| *letter == c)
                .ok_or(FormatError::Castling)?;
            if board.castling_available(*cell) {
                return Err(FormatError::Castling);
            }
            board.set(*cell, CASTLE_AVAILABLE);
        }
    }

    if en_passant != "-" {
        let target = parse_square(en_passant).ok_or(FormatError::EnPassant)?;
        // The target sits behind a pawn that the side not to move just
        // pushed two squares.
        let (cell, row) = match side {
            Side::White => (EP_BLACK, 2),
            Side::Black => (EP_WHITE, 5),
        };
        if row_of(target) != row {
            return Err(FormatError::EnPassant);
        }
        board.set(cell, target as i8);
    }

    let fullmove: u32 = fullmove.parse().map_err(|_| FormatError::MoveNumber)?;
    if fullmove == 0 {
        return Err(FormatError::MoveNumber);
    }
    let counter = (fullmove - 1)
        .checked_mul(2)
        .and_then(|n| n.checked_add((side == Side::Black) as u32))
        .filter(|&n| n <= MAX_MOVE_COUNT as u32)
        .ok_or(FormatError::MoveNumber)?;
    board.set_move_count(counter as u16);

    board.validate().map_err(|_| FormatError::InvalidPosition)?;
    Ok(board)
}

fn decode_placement(board: &mut Board, placement: &str) -> Result<(), FormatError> {
    let ranks = placement.split('/').count();
    if ranks != 8 {
        return Err(FormatError::RankCount(ranks));
    }

    let mut kings = [0u8; 2];
    for (row, rank) in placement.split('/').enumerate() {
        let width_error = FormatError::RankWidth { rank: 8 - row };
        let mut file = 0usize;
        for c in rank.chars() {
            if let Some(skip) = c.to_digit(10) {
                if !(1..=8).contains(&skip) {
                    return Err(FormatError::UnknownChar(c));
                }
                file += skip as usize;
            } else {
                let (piece, side) = Piece::from_char(c).ok_or(FormatError::UnknownChar(c))?;
                if file >= 8 {
                    return Err(width_error);
                }
                let index = row * 16 + file;
                board.set(index, piece.cell(side));
                if piece == Piece::King {
                    let slot = (side == Side::Black) as usize;
                    kings[slot] += 1;
                    let cache = match side {
                        Side::White => WHITE_KING_POS,
                        Side::Black => BLACK_KING_POS,
                    };
                    board.set(cache, index as i8);
                }
                file += 1;
            }
            if file > 8 {
                return Err(width_error);
            }
        }
        if file != 8 {
            return Err(width_error);
        }
    }

    if kings != [1, 1] {
        return Err(FormatError::KingCount);
    }
    Ok(())
}

/// Renders `board` as notation. Nothing is allocated until the caller
/// formats the returned value.
pub fn encode(board: &Board) -> Notation<'_> {
    Notation(board)
}

pub struct Notation<'a>(&'a Board);

impl fmt::Display for Notation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let board = self.0;
        for row in 0..8 {
            if row > 0 {
                f.write_str("/")?;
            }
            let mut empty = 0;
            for file in 0..8 {
                match board.piece_at(row * 16 + file) {
                    Some((piece, side)) => {
                        if empty > 0 {
                            write!(f, "{empty}")?;
                            empty = 0;
                        }
                        write!(f, "{}", piece.to_char(side))?;
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                write!(f, "{empty}")?;
            }
        }

        let side = match board.side_to_move() {
            Side::White => 'w',
            Side::Black => 'b',
        };
        write!(f, " {side} ")?;

        let mut any = false;
        for (letter, cell) in CASTLING {
            if board.castling_available(cell) {
                write!(f, "{letter}")?;
                any = true;
            }
        }
        if !any {
            f.write_str("-")?;
        }

        match board.en_passant_target() {
            Some(target) => {
                let file = (b'a' + file_of(target) as u8) as char;
                let rank = (b'8' - row_of(target) as u8) as char;
                write!(f, " {file}{rank}")?;
            }
            None => f.write_str(" -")?,
        }

        write!(f, " {}", (board.move_count() as u32 + 2) / 2)
    }
}

impl fmt::Debug for Notation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::apply_move;
    use std::string::ToString;

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 1";

    #[test]
    fn initial_position_round_trips() {
        let board = decode(START).unwrap();
        assert_eq!(board, Board::initial());
        assert_eq!(encode(&board).to_string(), START);
    }

    #[test]
    fn six_field_notation_is_accepted() {
        let board = decode("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1").unwrap();
        let expected = apply_move(&Board::initial(), 100, 68, None).unwrap();
        assert_eq!(board, expected);
        assert_eq!(board.move_count(), 1);
        assert_eq!(board.cells()[EP_WHITE], 84);
        assert_eq!(
            encode(&board).to_string(),
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 1"
        );
    }

    #[test]
    fn fullmove_maps_to_counter() {
        let white = decode("4k3/8/8/8/8/8/8/4K3 w - - 7").unwrap();
        assert_eq!(white.move_count(), 12);
        let black = decode("4k3/8/8/8/8/8/8/4K3 b - - 7").unwrap();
        assert_eq!(black.move_count(), 13);
        assert_eq!(encode(&black).to_string(), "4k3/8/8/8/8/8/8/4K3 b - - 7");
    }

    #[test]
    fn castling_emitted_in_canonical_order() {
        let board = decode("r3k2r/8/8/8/8/8/8/R3K2R w qkQK - 3").unwrap();
        assert_eq!(
            encode(&board).to_string(),
            "r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 3"
        );
    }

    #[test]
    fn played_position_round_trips() {
        let mut board = Board::initial();
        for (from, to) in [("d2", "d4"), ("g8", "f6"), ("c2", "c4"), ("e7", "e6")] {
            board = apply_move(
                &board,
                parse_square(from).unwrap(),
                parse_square(to).unwrap(),
                None,
            )
            .unwrap();
        }
        let text = encode(&board).to_string();
        assert_eq!(
            text,
            "rnbqkb1r/pppp1ppp/4pn2/8/2PP4/8/PP2PPPP/RNBQKBNR w KQkq - 3"
        );
        assert_eq!(decode(&text).unwrap(), board);
    }

    #[test]
    fn rejects_malformed_input() {
        let cases: [(&str, FormatError); 14] = [
            ("8/8/8/8/8/8/8 w - - 1", FormatError::RankCount(7)),
            ("4k3/8/8/8/8/8/8/4K2 w - - 1", FormatError::RankWidth { rank: 1 }),
            ("4k4/8/8/8/8/8/8/4K3 w - - 1", FormatError::RankWidth { rank: 8 }),
            ("4k3/8/8/8/8/8/8/4X3 w - - 1", FormatError::UnknownChar('X')),
            ("4k3/8/8/8/8/8/8/4K3 x - - 1", FormatError::Side),
            ("4k3/8/8/8/8/8/8/4K3 w KK - 1", FormatError::Castling),
            ("4k3/8/8/8/8/8/8/4K3 w - e3 1", FormatError::EnPassant),
            ("4k3/8/8/8/8/8/8/4K3 w - - 0", FormatError::MoveNumber),
            ("4k3/8/8/8/8/8/8/4K3 w - - 9000", FormatError::MoveNumber),
            ("4k3/8/8/8/8/8/8/4K3 w - - 4294967295", FormatError::MoveNumber),
            ("4k3/8/8/8/8/8/8/4K3 b - - 2147483648", FormatError::MoveNumber),
            ("8/8/8/8/8/8/8/4K3 w - - 1", FormatError::KingCount),
            ("4k3/8/8/8/8/8/8/P3K3 w - - 1", FormatError::InvalidPosition),
            ("4k3/8/8/8/8/8/8/4K3 w - - 0 1 2", FormatError::TrailingField),
        ];
        for (text, expected) in cases {
            assert_eq!(decode(text), Err(expected), "{text}");
        }
        assert_eq!(decode("4k3/8/8/8/8/8/8/4K3 w -"), Err(FormatError::MissingField("en passant")));
    }

    #[test]
    fn parse_square_bounds() {
        assert_eq!(parse_square("a8"), Some(0));
        assert_eq!(parse_square("h1"), Some(119));
        assert_eq!(parse_square("e2"), Some(100));
        assert_eq!(parse_square("i1"), None);
        assert_eq!(parse_square("a9"), None);
        assert_eq!(parse_square("a"), None);
    }
}
