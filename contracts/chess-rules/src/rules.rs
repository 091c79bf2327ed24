//! Move legality, move application and terminal-position detection.
//!
//! Generation works in two passes. Pseudo-legal targets come from per-piece
//! step and slide tables over the 0x88 layout; each candidate is then played
//! on a scratch copy of the board and dropped if the mover's king ends up
//! attacked. Because [`Board`] is `Copy`, the trial and the committed move
//! never share state.

use crate::board::{
    on_board, row_of, Board, Piece, Side, A1, A8, BOARD_SIZE, CASTLE_BLACK_KING,
    CASTLE_BLACK_QUEEN, CASTLE_REVOKED, CASTLE_WHITE_KING, CASTLE_WHITE_QUEEN, E1, E8, H1, H8,
    MAX_MOVE_COUNT,
};

const KNIGHT_STEPS: [i16; 8] = [-33, -31, -18, -14, 14, 18, 31, 33];
const KING_STEPS: [i16; 8] = [-17, -16, -15, -1, 1, 15, 16, 17];
const DIAGONALS: [i16; 4] = [-17, -15, 15, 17];
const ORTHOGONALS: [i16; 4] = [-16, -1, 1, 16];

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("illegal move")]
    IllegalMove,
    #[error("promotion must be to a knight, bishop, rook or queen")]
    InvalidPromotion,
    #[error("board violates its structural invariants")]
    InvalidState,
}

/// Outcome of a position from the point of view of the side to move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameStatus {
    Ongoing,
    Checkmate,
    Stalemate,
}

/// Set of board indices, one bit per cell of the 128-cell layout.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MoveSet(u128);

impl MoveSet {
    pub const EMPTY: MoveSet = MoveSet(0);

    #[inline]
    pub fn insert(&mut self, index: usize) {
        self.0 |= 1u128 << index;
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        index < 128 && self.0 & (1u128 << index) != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> MoveSetIter {
        MoveSetIter(self.0)
    }
}

impl core::fmt::Debug for MoveSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl IntoIterator for MoveSet {
    type Item = usize;
    type IntoIter = MoveSetIter;

    fn into_iter(self) -> MoveSetIter {
        self.iter()
    }
}

pub struct MoveSetIter(u128);

impl Iterator for MoveSetIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            return None;
        }
        let index = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1;
        Some(index)
    }
}

/// Legal destinations for the piece on `from`.
///
/// Empty when `from` is off the board, empty, or holds a piece of the side
/// not on move.
pub fn legal_move_targets(board: &Board, from: usize) -> MoveSet {
    let side = board.side_to_move();
    let Some((piece, owner)) = board.piece_at(from) else {
        return MoveSet::EMPTY;
    };
    if owner != side {
        return MoveSet::EMPTY;
    }

    let mut legal = MoveSet::EMPTY;
    for to in pseudo_targets(board, from, piece, side) {
        // The promotion choice cannot affect the mover's own king safety.
        let trial = play(board, from, to, Some(Piece::Queen));
        if !is_in_check(&trial, side) {
            legal.insert(to);
        }
    }
    legal
}

/// Plays `from -> to` and returns the resulting board.
///
/// `promotion` is required when a pawn reaches its last rank and ignored
/// otherwise. The input board is never modified.
pub fn apply_move(
    board: &Board,
    from: usize,
    to: usize,
    promotion: Option<Piece>,
) -> Result<Board, RuleError> {
    if board.move_count() >= MAX_MOVE_COUNT {
        return Err(RuleError::IllegalMove);
    }
    if !legal_move_targets(board, from).contains(to) {
        return Err(RuleError::IllegalMove);
    }

    let side = board.side_to_move();
    let promoting =
        matches!(board.piece_at(from), Some((Piece::Pawn, _))) && row_of(to) == side.promotion_row();
    let promotion = if promoting {
        match promotion {
            Some(choice) if choice.is_promotion_choice() => Some(choice),
            _ => return Err(RuleError::InvalidPromotion),
        }
    } else {
        None
    };

    Ok(play(board, from, to, promotion))
}

/// True if any piece of `by` attacks `target`.
pub fn is_square_attacked(board: &Board, target: usize, by: Side) -> bool {
    if target >= BOARD_SIZE || !on_board(target as i16) {
        return false;
    }
    let target = target as i16;

    // A pawn of `by` sits one row behind the target (relative to its own
    // direction of travel) and one file to either side.
    let behind = target - by.pawn_step();
    for origin in [behind - 1, behind + 1] {
        if holds(board, origin, Piece::Pawn, by) {
            return true;
        }
    }

    for step in KNIGHT_STEPS {
        if holds(board, target + step, Piece::Knight, by) {
            return true;
        }
    }
    for step in KING_STEPS {
        if holds(board, target + step, Piece::King, by) {
            return true;
        }
    }

    slider_attacks(board, target, by, &DIAGONALS, Piece::Bishop)
        || slider_attacks(board, target, by, &ORTHOGONALS, Piece::Rook)
}

pub fn is_in_check(board: &Board, side: Side) -> bool {
    is_square_attacked(board, board.king_index(side), side.opponent())
}

/// Whether `side` has at least one legal move.
///
/// When `side` is not the side to move the position is evaluated as if it
/// were that side's turn, with no en-passant capture available.
pub fn has_any_legal_move(board: &Board, side: Side) -> bool {
    let mut view = *board;
    if view.side_to_move() != side {
        view.set_side_to_move(side);
        view.clear_en_passant();
    }
    (0..128usize)
        .filter(|&index| matches!(view.piece_at(index), Some((_, owner)) if owner == side))
        .any(|index| !legal_move_targets(&view, index).is_empty())
}

pub fn status(board: &Board) -> GameStatus {
    let side = board.side_to_move();
    if has_any_legal_move(board, side) {
        GameStatus::Ongoing
    } else if is_in_check(board, side) {
        GameStatus::Checkmate
    } else {
        GameStatus::Stalemate
    }
}

// ─── Internal helpers ──────────────────────────────────────────────────────

#[inline]
fn holds(board: &Board, index: i16, piece: Piece, side: Side) -> bool {
    on_board(index) && board.get(index as usize) == piece.cell(side)
}

/// Walks each ray from `target` and reports whether the first piece met is a
/// `kind` or a queen of `by`.
fn slider_attacks(board: &Board, target: i16, by: Side, rays: &[i16; 4], kind: Piece) -> bool {
    for &ray in rays {
        let mut index = target + ray;
        while on_board(index) {
            let cell = board.get(index as usize);
            if cell != 0 {
                if cell == kind.cell(by) || cell == Piece::Queen.cell(by) {
                    return true;
                }
                break;
            }
            index += ray;
        }
    }
    false
}

fn pseudo_targets(board: &Board, from: usize, piece: Piece, side: Side) -> MoveSet {
    let mut targets = MoveSet::EMPTY;
    let origin = from as i16;
    match piece {
        Piece::Pawn => pawn_targets(board, origin, side, &mut targets),
        Piece::Knight => step_targets(board, origin, side, &KNIGHT_STEPS, &mut targets),
        Piece::Bishop => slide_targets(board, origin, side, &DIAGONALS, &mut targets),
        Piece::Rook => slide_targets(board, origin, side, &ORTHOGONALS, &mut targets),
        Piece::Queen => {
            slide_targets(board, origin, side, &DIAGONALS, &mut targets);
            slide_targets(board, origin, side, &ORTHOGONALS, &mut targets);
        }
        Piece::King => {
            step_targets(board, origin, side, &KING_STEPS, &mut targets);
            castling_targets(board, from, side, &mut targets);
        }
    }
    targets
}

/// Empty or enemy-occupied.
#[inline]
fn can_land(board: &Board, index: i16, side: Side) -> bool {
    on_board(index) && board.get(index as usize) * side.sign() <= 0
}

fn step_targets(board: &Board, origin: i16, side: Side, steps: &[i16], out: &mut MoveSet) {
    for &step in steps {
        let to = origin + step;
        if can_land(board, to, side) {
            out.insert(to as usize);
        }
    }
}

fn slide_targets(board: &Board, origin: i16, side: Side, rays: &[i16], out: &mut MoveSet) {
    for &ray in rays {
        let mut to = origin + ray;
        while on_board(to) {
            let cell = board.get(to as usize);
            if cell * side.sign() > 0 {
                break;
            }
            out.insert(to as usize);
            if cell != 0 {
                break;
            }
            to += ray;
        }
    }
}

fn pawn_targets(board: &Board, origin: i16, side: Side, out: &mut MoveSet) {
    let step = side.pawn_step();

    let one = origin + step;
    if on_board(one) && board.get(one as usize) == 0 {
        out.insert(one as usize);
        let two = one + step;
        if row_of(origin as usize) == side.pawn_start_row() && board.get(two as usize) == 0 {
            out.insert(two as usize);
        }
    }

    let en_passant = board.en_passant_target();
    for to in [one - 1, one + 1] {
        if !on_board(to) {
            continue;
        }
        let cell = board.get(to as usize);
        if cell * side.sign() < 0 || en_passant == Some(to as usize) {
            out.insert(to as usize);
        }
    }
}

fn castling_targets(board: &Board, from: usize, side: Side, out: &mut MoveSet) {
    let (home, king_flag, queen_flag, king_rook, queen_rook) = match side {
        Side::White => (E1, CASTLE_WHITE_KING, CASTLE_WHITE_QUEEN, H1, A1),
        Side::Black => (E8, CASTLE_BLACK_KING, CASTLE_BLACK_QUEEN, H8, A8),
    };
    if from != home {
        return;
    }
    let enemy = side.opponent();
    if is_square_attacked(board, home, enemy) {
        return;
    }
    let rook = Piece::Rook.cell(side);

    if board.castling_available(king_flag)
        && board.get(king_rook) == rook
        && board.get(home + 1) == 0
        && board.get(home + 2) == 0
        && !is_square_attacked(board, home + 1, enemy)
        && !is_square_attacked(board, home + 2, enemy)
    {
        out.insert(home + 2);
    }

    if board.castling_available(queen_flag)
        && board.get(queen_rook) == rook
        && board.get(home - 1) == 0
        && board.get(home - 2) == 0
        && board.get(home - 3) == 0
        && !is_square_attacked(board, home - 1, enemy)
        && !is_square_attacked(board, home - 2, enemy)
    {
        out.insert(home - 2);
    }
}

/// Castling flag guarding the rook that starts on `corner`, if it is one.
fn corner_flag(corner: usize) -> Option<usize> {
    match corner {
        A8 => Some(CASTLE_BLACK_QUEEN),
        H8 => Some(CASTLE_BLACK_KING),
        A1 => Some(CASTLE_WHITE_QUEEN),
        H1 => Some(CASTLE_WHITE_KING),
        _ => None,
    }
}

/// Plays a pseudo-legal move without checking it. `promotion` is used only
/// when a pawn lands on its last rank.
fn play(board: &Board, from: usize, to: usize, promotion: Option<Piece>) -> Board {
    let side = board.side_to_move();
    let moving = board.get(from);
    let en_passant = board.en_passant_target();

    let mut next = *board;
    next.clear_en_passant();
    next.set(from, 0);

    let mut placed = moving;
    match Piece::from_code(moving) {
        Some(Piece::Pawn) => {
            if Some(to) == en_passant && board.get(to) == 0 {
                let captured = (to as i16 - side.pawn_step()) as usize;
                next.set(captured, 0);
            }
            if (to as i16 - from as i16).abs() == 32 {
                next.set(side.ep_cell(), ((from + to) / 2) as i8);
            }
            if row_of(to) == side.promotion_row() {
                placed = promotion.unwrap_or(Piece::Queen).cell(side);
            }
        }
        Some(Piece::King) => {
            next.set(side.king_cache(), to as i8);
            let (king_flag, queen_flag) = match side {
                Side::White => (CASTLE_WHITE_KING, CASTLE_WHITE_QUEEN),
                Side::Black => (CASTLE_BLACK_KING, CASTLE_BLACK_QUEEN),
            };
            next.set(king_flag, CASTLE_REVOKED);
            next.set(queen_flag, CASTLE_REVOKED);
            if to == from + 2 {
                next.set(from + 3, 0);
                next.set(from + 1, Piece::Rook.cell(side));
            } else if to + 2 == from {
                next.set(from - 4, 0);
                next.set(from - 1, Piece::Rook.cell(side));
            }
        }
        _ => {}
    }

    // A rook leaving its corner, or anything landing on one, ends that right.
    for square in [from, to] {
        if let Some(flag) = corner_flag(square) {
            next.set(flag, CASTLE_REVOKED);
        }
    }

    next.set(to, placed);
    next.set_move_count(board.move_count() + 1);
    next.set_side_to_move(side.opponent());
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{square, EP_BLACK, EP_WHITE, SIDE_TO_MOVE};
    use crate::codec::{decode, parse_square};

    fn sq(name: &str) -> usize {
        parse_square(name).unwrap()
    }

    fn play_all(mut board: Board, moves: &[(&str, &str)]) -> Board {
        for (from, to) in moves {
            board = apply_move(&board, sq(from), sq(to), None).unwrap();
        }
        board
    }

    #[test]
    fn opening_pawn_push_updates_bookkeeping() {
        let board = Board::initial();
        let moved = board.get(100);
        let next = apply_move(&board, 100, 84, None).unwrap();
        assert_eq!(next.get(100), 0);
        assert_eq!(next.get(84), moved);
        assert_eq!(next.cells()[SIDE_TO_MOVE], -1);
        assert_eq!(next.move_count(), 1);
        // The input value is untouched.
        assert_eq!(board, Board::initial());
    }

    #[test]
    fn initial_position_has_twenty_moves() {
        let board = Board::initial();
        let total: usize = (0..128).map(|i| legal_move_targets(&board, i).len()).sum();
        assert_eq!(total, 20);
        assert_eq!(status(&board), GameStatus::Ongoing);
    }

    #[test]
    fn knight_targets_from_start() {
        let board = Board::initial();
        let targets = legal_move_targets(&board, sq("g1"));
        assert_eq!(targets.len(), 2);
        assert!(targets.contains(sq("f3")));
        assert!(targets.contains(sq("h3")));
    }

    #[test]
    fn opponent_pieces_have_no_targets() {
        let board = Board::initial();
        assert!(legal_move_targets(&board, sq("e7")).is_empty());
        assert!(legal_move_targets(&board, sq("e4")).is_empty());
        assert!(legal_move_targets(&board, 8).is_empty());
    }

    #[test]
    fn counter_and_side_alternate() {
        let mut board = Board::initial();
        let line = [("e2", "e4"), ("e7", "e5"), ("g1", "f3"), ("b8", "c6"), ("f1", "b5")];
        for (ply, (from, to)) in line.iter().enumerate() {
            let before = board.side_to_move();
            board = apply_move(&board, sq(from), sq(to), None).unwrap();
            assert_eq!(board.move_count() as usize, ply + 1);
            assert_eq!(board.side_to_move(), before.opponent());
        }
    }

    #[test]
    fn move_exposing_own_king_is_rejected() {
        // The e2 knight is pinned against the white king by the e8 rook.
        let board = decode("4r1k1/8/8/8/8/8/4N3/4K3 w - - 1").unwrap();
        assert!(legal_move_targets(&board, sq("e2")).is_empty());
        assert_eq!(
            apply_move(&board, sq("e2"), sq("c3"), None),
            Err(RuleError::IllegalMove)
        );
    }

    #[test]
    fn king_cannot_step_into_check() {
        let board = decode("4k3/8/8/8/8/8/3r4/4K3 w - - 1").unwrap();
        let targets = legal_move_targets(&board, sq("e1"));
        assert!(targets.contains(sq("d2")));
        assert!(!targets.contains(sq("e2")));
        assert!(!targets.contains(sq("d1")));
        assert!(targets.contains(sq("f1")));
    }

    #[test]
    fn sliders_stop_at_the_edge() {
        let board = decode("4k3/8/8/8/8/8/8/R3K3 w - - 1").unwrap();
        let targets = legal_move_targets(&board, sq("a1"));
        // a2..a8 plus b1..d1; nothing wraps into the shadow strip.
        assert_eq!(targets.len(), 10);
        assert!(targets.iter().all(|t| on_board(t as i16)));
    }

    #[test]
    fn checkmate_leaves_no_moves() {
        let board = play_all(
            Board::initial(),
            &[("f2", "f3"), ("e7", "e5"), ("g2", "g4"), ("d8", "h4")],
        );
        assert_eq!(status(&board), GameStatus::Checkmate);
        assert!(!has_any_legal_move(&board, Side::White));
        assert!(is_in_check(&board, Side::White));
        for from in 0..128 {
            assert!(legal_move_targets(&board, from).is_empty());
        }
        assert_eq!(
            apply_move(&board, sq("e1"), sq("f2"), None),
            Err(RuleError::IllegalMove)
        );
    }

    #[test]
    fn stalemate_is_not_checkmate() {
        let board = decode("7k/5Q2/6K1/8/8/8/8/8 b - - 1").unwrap();
        assert_eq!(status(&board), GameStatus::Stalemate);
    }

    #[test]
    fn has_any_legal_move_for_side_not_on_turn() {
        let board = decode("7k/5Q2/6K1/8/8/8/8/8 w - - 1").unwrap();
        assert!(has_any_legal_move(&board, Side::White));
        assert!(!has_any_legal_move(&board, Side::Black));
    }

    #[test]
    fn en_passant_available_for_one_ply_only() {
        let board = play_all(
            Board::initial(),
            &[("e2", "e4"), ("a7", "a6"), ("e4", "e5"), ("d7", "d5")],
        );
        assert_eq!(board.en_passant_target(), Some(sq("d6")));
        assert_eq!(board.cells()[EP_BLACK], sq("d6") as i8);

        let captured = apply_move(&board, sq("e5"), sq("d6"), None).unwrap();
        assert_eq!(captured.get(sq("d5")), 0);
        assert_eq!(captured.get(sq("d6")), Piece::Pawn.cell(Side::White));
        assert_eq!(captured.cells()[EP_BLACK], 0);

        // Declining for one ply forfeits the capture.
        let declined = play_all(board, &[("h2", "h3"), ("h7", "h6")]);
        assert_eq!(declined.en_passant_target(), None);
        assert!(!legal_move_targets(&declined, sq("e5")).contains(sq("d6")));
    }

    #[test]
    fn double_step_records_target_behind_pawn() {
        let board = apply_move(&Board::initial(), sq("c2"), sq("c4"), None).unwrap();
        assert_eq!(board.cells()[EP_WHITE], square(2, 2) as i8);
        let next = apply_move(&board, sq("g8"), sq("f6"), None).unwrap();
        assert_eq!(next.cells()[EP_WHITE], 0);
    }

    #[test]
    fn castling_moves_rook_and_revokes_rights() {
        let board = decode("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 1").unwrap();
        let targets = legal_move_targets(&board, sq("e1"));
        assert!(targets.contains(sq("g1")));
        assert!(targets.contains(sq("c1")));

        let castled = apply_move(&board, sq("e1"), sq("g1"), None).unwrap();
        assert_eq!(castled.get(sq("f1")), Piece::Rook.cell(Side::White));
        assert_eq!(castled.get(sq("h1")), 0);
        assert_eq!(castled.king_index(Side::White), sq("g1"));
        assert!(!castled.castling_available(CASTLE_WHITE_KING));
        assert!(!castled.castling_available(CASTLE_WHITE_QUEEN));
        assert!(castled.castling_available(CASTLE_BLACK_KING));

        let long = apply_move(&castled, sq("e8"), sq("c8"), None).unwrap();
        assert_eq!(long.get(sq("d8")), Piece::Rook.cell(Side::Black));
        assert_eq!(long.get(sq("a8")), 0);
    }

    #[test]
    fn castling_through_attacked_square_is_rejected() {
        // The f8 rook covers f1.
        let board = decode("4kr2/8/8/8/8/8/8/R3K2R w KQ - 1").unwrap();
        let targets = legal_move_targets(&board, sq("e1"));
        assert!(!targets.contains(sq("g1")));
        assert!(targets.contains(sq("c1")));
    }

    #[test]
    fn castling_out_of_check_is_rejected() {
        let board = decode("4k3/8/8/8/8/8/4r3/R3K2R w KQ - 1").unwrap();
        let targets = legal_move_targets(&board, sq("e1"));
        assert!(!targets.contains(sq("g1")));
        assert!(!targets.contains(sq("c1")));
    }

    #[test]
    fn rook_capture_revokes_castling() {
        let board = decode("r3k3/8/8/8/8/8/8/R3K3 w Qq - 1").unwrap();
        let next = apply_move(&board, sq("a1"), sq("a8"), None).unwrap();
        assert!(!next.castling_available(CASTLE_WHITE_QUEEN));
        assert!(!next.castling_available(CASTLE_BLACK_QUEEN));
    }

    #[test]
    fn revoked_castling_stays_revoked() {
        let board = decode("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 1").unwrap();
        let board = play_all(board, &[("h1", "h2"), ("a8", "a7"), ("h2", "h1"), ("a7", "a8")]);
        assert!(!board.castling_available(CASTLE_WHITE_KING));
        assert!(!board.castling_available(CASTLE_BLACK_QUEEN));
        assert!(!legal_move_targets(&board, sq("e1")).contains(sq("g1")));
    }

    #[test]
    fn promotion_requires_a_valid_choice() {
        let board = decode("4k3/P7/8/8/8/8/8/4K3 w - - 1").unwrap();
        assert_eq!(
            apply_move(&board, sq("a7"), sq("a8"), None),
            Err(RuleError::InvalidPromotion)
        );
        assert_eq!(
            apply_move(&board, sq("a7"), sq("a8"), Some(Piece::King)),
            Err(RuleError::InvalidPromotion)
        );
        assert_eq!(
            apply_move(&board, sq("a7"), sq("a8"), Some(Piece::Pawn)),
            Err(RuleError::InvalidPromotion)
        );
        let promoted = apply_move(&board, sq("a7"), sq("a8"), Some(Piece::Knight)).unwrap();
        assert_eq!(promoted.get(sq("a8")), Piece::Knight.cell(Side::White));
    }

    #[test]
    fn promotion_choice_ignored_for_ordinary_moves() {
        let next = apply_move(&Board::initial(), sq("e2"), sq("e4"), Some(Piece::Queen)).unwrap();
        assert_eq!(next.get(sq("e4")), Piece::Pawn.cell(Side::White));
    }

    #[test]
    fn move_counter_limit_is_enforced() {
        let mut board = Board::initial();
        board.set_move_count(MAX_MOVE_COUNT - 1);
        let full = apply_move(&board, sq("e2"), sq("e4"), None).unwrap();
        assert_eq!(full.move_count(), MAX_MOVE_COUNT);
        assert_eq!(full.validate(), Ok(()));
        assert_eq!(
            apply_move(&full, sq("e7"), sq("e5"), None),
            Err(RuleError::IllegalMove)
        );
    }

    #[test]
    fn indices_past_the_board_are_rejected() {
        // 65636 and 65620 alias e2 and e3 when truncated to 16 bits.
        let board = Board::initial();
        assert!(legal_move_targets(&board, 65636).is_empty());
        assert_eq!(board.get(65636), 0);
        assert_eq!(board.piece_at(65636), None);
        assert_eq!(apply_move(&board, 65636, sq("e3"), None), Err(RuleError::IllegalMove));
        assert_eq!(apply_move(&board, sq("e2"), 65620, None), Err(RuleError::IllegalMove));
        assert!(is_square_attacked(&board, sq("e3"), Side::White));
        assert!(!is_square_attacked(&board, 65620, Side::White));
        assert!(legal_move_targets(&board, usize::MAX).is_empty());
    }
}
