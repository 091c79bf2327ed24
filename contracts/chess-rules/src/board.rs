//! Padded 0x88 board layout.
//!
//! The board is 16 columns by 8 rows. Row 0 is rank 8 and column 0 is the
//! a-file, so `index = row * 16 + file` (a8 = 0, h8 = 7, a1 = 112, h1 = 119).
//! Columns 8..15 of every row form the "shadow" strip: any index with
//! `index & 0x88 != 0` is off the playable board, which lets move generation
//! step off an edge without a bounds branch.
//!
//! A handful of shadow cells carry game bookkeeping:
//!
//! | Index | Meaning                                                 |
//! |-------|---------------------------------------------------------|
//! | 8, 9  | move counter, `counter = 128 * cell[8] + cell[9]`       |
//! | 56    | side to move (+1 white, -1 black)                       |
//! | 61    | en-passant target left by a white double step (0: none) |
//! | 77    | en-passant target left by a black double step (0: none) |
//! | 62/63 | black queen-side / king-side castling (0 ok, -1 revoked)|
//! | 78/79 | white queen-side / king-side castling (0 ok, -1 revoked)|
//! | 123   | black king index                                        |
//! | 124   | white king index                                        |

use core::fmt;

use crate::codec;
use crate::rules::RuleError;

pub const BOARD_SIZE: usize = 128;

pub const MOVE_COUNT_HI: usize = 8;
pub const MOVE_COUNT_LO: usize = 9;
pub const SIDE_TO_MOVE: usize = 56;
pub const EP_WHITE: usize = 61;
pub const CASTLE_BLACK_QUEEN: usize = 62;
pub const CASTLE_BLACK_KING: usize = 63;
pub const EP_BLACK: usize = 77;
pub const CASTLE_WHITE_QUEEN: usize = 78;
pub const CASTLE_WHITE_KING: usize = 79;
pub const BLACK_KING_POS: usize = 123;
pub const WHITE_KING_POS: usize = 124;

const RESERVED: [usize; 11] = [
    MOVE_COUNT_HI,
    MOVE_COUNT_LO,
    SIDE_TO_MOVE,
    EP_WHITE,
    CASTLE_BLACK_QUEEN,
    CASTLE_BLACK_KING,
    EP_BLACK,
    CASTLE_WHITE_QUEEN,
    CASTLE_WHITE_KING,
    BLACK_KING_POS,
    WHITE_KING_POS,
];

/// Largest value the two-cell move counter can hold.
pub const MAX_MOVE_COUNT: u16 = 128 * 128 - 1;

pub const CASTLE_AVAILABLE: i8 = 0;
pub const CASTLE_REVOKED: i8 = -1;

/// Home squares of the four castling rooks and of both kings.
pub const A8: usize = 0;
pub const E8: usize = 4;
pub const H8: usize = 7;
pub const A1: usize = 112;
pub const E1: usize = 116;
pub const H1: usize = 119;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    White,
    Black,
}

impl Side {
    /// Sign used for this side's pieces and for the side-to-move cell.
    pub const fn sign(self) -> i8 {
        match self {
            Side::White => 1,
            Side::Black => -1,
        }
    }

    pub const fn opponent(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    pub const fn from_flag(flag: i8) -> Option<Side> {
        match flag {
            1 => Some(Side::White),
            -1 => Some(Side::Black),
            _ => None,
        }
    }

    /// Row direction a pawn of this side advances in.
    pub(crate) const fn pawn_step(self) -> i16 {
        match self {
            Side::White => -16,
            Side::Black => 16,
        }
    }

    pub(crate) const fn pawn_start_row(self) -> usize {
        match self {
            Side::White => 6,
            Side::Black => 1,
        }
    }

    pub(crate) const fn promotion_row(self) -> usize {
        match self {
            Side::White => 0,
            Side::Black => 7,
        }
    }

    pub(crate) const fn king_cache(self) -> usize {
        match self {
            Side::White => WHITE_KING_POS,
            Side::Black => BLACK_KING_POS,
        }
    }

    /// Cell recording the en-passant target this side's double step created.
    pub(crate) const fn ep_cell(self) -> usize {
        match self {
            Side::White => EP_WHITE,
            Side::Black => EP_BLACK,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum Piece {
    Pawn = 1,
    Knight = 2,
    Bishop = 3,
    Rook = 4,
    Queen = 5,
    King = 6,
}

impl Piece {
    pub const fn code(self) -> i8 {
        self as i8
    }

    /// Decodes the magnitude of a cell value; the sign is ignored.
    pub const fn from_code(code: i8) -> Option<Piece> {
        match code.unsigned_abs() {
            1 => Some(Piece::Pawn),
            2 => Some(Piece::Knight),
            3 => Some(Piece::Bishop),
            4 => Some(Piece::Rook),
            5 => Some(Piece::Queen),
            6 => Some(Piece::King),
            _ => None,
        }
    }

    /// Cell value for this piece owned by `side`.
    pub const fn cell(self, side: Side) -> i8 {
        self.code() * side.sign()
    }

    pub const fn is_promotion_choice(self) -> bool {
        matches!(self, Piece::Knight | Piece::Bishop | Piece::Rook | Piece::Queen)
    }

    pub const fn to_char(self, side: Side) -> char {
        let c = match self {
            Piece::Pawn => 'p',
            Piece::Knight => 'n',
            Piece::Bishop => 'b',
            Piece::Rook => 'r',
            Piece::Queen => 'q',
            Piece::King => 'k',
        };
        match side {
            Side::White => c.to_ascii_uppercase(),
            Side::Black => c,
        }
    }

    pub const fn from_char(c: char) -> Option<(Piece, Side)> {
        let side = if c.is_ascii_uppercase() {
            Side::White
        } else {
            Side::Black
        };
        let piece = match c.to_ascii_lowercase() {
            'p' => Piece::Pawn,
            'n' => Piece::Knight,
            'b' => Piece::Bishop,
            'r' => Piece::Rook,
            'q' => Piece::Queen,
            'k' => Piece::King,
            _ => return None,
        };
        Some((piece, side))
    }
}

/// True when `index` addresses one of the 64 playable squares.
#[inline]
pub const fn on_board(index: i16) -> bool {
    index >= 0 && index < BOARD_SIZE as i16 && index & 0x88 == 0
}

#[inline]
pub const fn row_of(index: usize) -> usize {
    index >> 4
}

#[inline]
pub const fn file_of(index: usize) -> usize {
    index & 0x0f
}

/// Index of the square at `file` (0 = a) and `rank` (0 = rank 1).
#[inline]
pub const fn square(file: usize, rank: usize) -> usize {
    (7 - rank) * 16 + file
}

/// The canonical board. Two boards are equal exactly when all 128 cells are.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Board {
    cells: [i8; BOARD_SIZE],
}

impl Board {
    /// A board with no pieces, white to move, move counter 0 and every
    /// castling right revoked. Fails [`Board::validate`] until both kings
    /// are placed.
    pub(crate) const fn empty() -> Self {
        let mut cells = [0i8; BOARD_SIZE];
        cells[SIDE_TO_MOVE] = 1;
        cells[CASTLE_BLACK_QUEEN] = CASTLE_REVOKED;
        cells[CASTLE_BLACK_KING] = CASTLE_REVOKED;
        cells[CASTLE_WHITE_QUEEN] = CASTLE_REVOKED;
        cells[CASTLE_WHITE_KING] = CASTLE_REVOKED;
        Board { cells }
    }

    /// The standard starting position.
    pub const fn initial() -> Self {
        const BACK_RANK: [Piece; 8] = [
            Piece::Rook,
            Piece::Knight,
            Piece::Bishop,
            Piece::Queen,
            Piece::King,
            Piece::Bishop,
            Piece::Knight,
            Piece::Rook,
        ];
        let mut cells = [0i8; BOARD_SIZE];
        let mut file = 0;
        while file < 8 {
            cells[file] = BACK_RANK[file].cell(Side::Black);
            cells[16 + file] = Piece::Pawn.cell(Side::Black);
            cells[96 + file] = Piece::Pawn.cell(Side::White);
            cells[112 + file] = BACK_RANK[file].cell(Side::White);
            file += 1;
        }
        cells[SIDE_TO_MOVE] = 1;
        cells[BLACK_KING_POS] = E8 as i8;
        cells[WHITE_KING_POS] = E1 as i8;
        Board { cells }
    }

    /// Builds a board from raw cells, rejecting anything that breaks the
    /// structural invariants.
    pub fn from_cells(cells: [i8; BOARD_SIZE]) -> Result<Self, RuleError> {
        let board = Board { cells };
        board.validate()?;
        Ok(board)
    }

    /// Decodes the transport form: 128 two's-complement bytes.
    pub fn from_bytes(bytes: [u8; BOARD_SIZE]) -> Result<Self, RuleError> {
        Self::from_cells(bytes.map(|b| b as i8))
    }

    pub fn to_bytes(&self) -> [u8; BOARD_SIZE] {
        self.cells.map(|c| c as u8)
    }

    pub const fn cells(&self) -> &[i8; BOARD_SIZE] {
        &self.cells
    }

    /// Raw cell value; off-board indices read as empty.
    #[inline]
    pub fn get(&self, index: usize) -> i8 {
        if index < BOARD_SIZE && on_board(index as i16) {
            self.cells[index]
        } else {
            0
        }
    }

    pub fn piece_at(&self, index: usize) -> Option<(Piece, Side)> {
        let cell = self.get(index);
        let piece = Piece::from_code(cell)?;
        let side = if cell > 0 { Side::White } else { Side::Black };
        Some((piece, side))
    }

    pub fn move_count(&self) -> u16 {
        let hi = self.cells[MOVE_COUNT_HI] as u16;
        let lo = self.cells[MOVE_COUNT_LO] as u16;
        hi * 128 + lo
    }

    /// Side whose turn it is. Validated boards always hold ±1 here.
    pub fn side_to_move(&self) -> Side {
        if self.cells[SIDE_TO_MOVE] < 0 {
            Side::Black
        } else {
            Side::White
        }
    }

    pub fn king_index(&self, side: Side) -> usize {
        self.cells[side.king_cache()] as u8 as usize
    }

    pub fn castling_available(&self, flag_cell: usize) -> bool {
        self.cells[flag_cell] == CASTLE_AVAILABLE
    }

    /// En-passant target the side to move may capture onto, if any.
    pub fn en_passant_target(&self) -> Option<usize> {
        let cell = self.cells[self.side_to_move().opponent().ep_cell()];
        if cell == 0 {
            None
        } else {
            Some(cell as u8 as usize)
        }
    }

    #[inline]
    pub(crate) fn set(&mut self, index: usize, value: i8) {
        self.cells[index] = value;
    }

    pub(crate) fn set_move_count(&mut self, count: u16) {
        self.cells[MOVE_COUNT_HI] = (count / 128) as i8;
        self.cells[MOVE_COUNT_LO] = (count % 128) as i8;
    }

    pub(crate) fn set_side_to_move(&mut self, side: Side) {
        self.cells[SIDE_TO_MOVE] = side.sign();
    }

    pub(crate) fn clear_en_passant(&mut self) {
        self.cells[EP_WHITE] = 0;
        self.cells[EP_BLACK] = 0;
    }

    /// Checks the structural invariants every exchanged board must satisfy:
    /// one king per side at its cached index, well-formed reserved cells,
    /// nothing stray in the shadow strip, no pawn on a back rank, and a move
    /// counter whose parity agrees with the side to move.
    pub fn validate(&self) -> Result<(), RuleError> {
        let side = Side::from_flag(self.cells[SIDE_TO_MOVE]).ok_or(RuleError::InvalidState)?;

        let hi = self.cells[MOVE_COUNT_HI];
        let lo = self.cells[MOVE_COUNT_LO];
        if hi < 0 || lo < 0 {
            return Err(RuleError::InvalidState);
        }
        if (self.move_count() % 2 == 0) != (side == Side::White) {
            return Err(RuleError::InvalidState);
        }

        for flag in [
            CASTLE_BLACK_QUEEN,
            CASTLE_BLACK_KING,
            CASTLE_WHITE_QUEEN,
            CASTLE_WHITE_KING,
        ] {
            let v = self.cells[flag];
            if v != CASTLE_AVAILABLE && v != CASTLE_REVOKED {
                return Err(RuleError::InvalidState);
            }
        }

        // A white double step leaves its target on rank 3 (row 5), a black
        // one on rank 6 (row 2).
        for (cell, row) in [(EP_WHITE, 5), (EP_BLACK, 2)] {
            let v = self.cells[cell];
            if v != 0 && !(on_board(v as i16) && row_of(v as usize) == row) {
                return Err(RuleError::InvalidState);
            }
        }

        let mut kings = [0u8; 2];
        for (index, &cell) in self.cells.iter().enumerate() {
            if !on_board(index as i16) {
                if cell != 0 && !RESERVED.contains(&index) {
                    return Err(RuleError::InvalidState);
                }
                continue;
            }
            let Some(piece) = Piece::from_code(cell) else {
                if cell != 0 {
                    return Err(RuleError::InvalidState);
                }
                continue;
            };
            let owner = if cell > 0 { Side::White } else { Side::Black };
            match piece {
                Piece::King => {
                    if self.king_index(owner) != index {
                        return Err(RuleError::InvalidState);
                    }
                    kings[(owner == Side::Black) as usize] += 1;
                }
                Piece::Pawn if row_of(index) == 0 || row_of(index) == 7 => {
                    return Err(RuleError::InvalidState);
                }
                _ => {}
            }
        }
        if kings != [1, 1] {
            return Err(RuleError::InvalidState);
        }
        Ok(())
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Board")
            .field(&format_args!("{}", codec::encode(self)))
            .finish()
    }
}
