//! Per-game history of signed moves.
//!
//! The ledger remembers every move this player made and every opponent move
//! it accepted, together with the signatures that make them provable on the
//! ledger. Every mutation is written through the [`MoveStore`] before the
//! call returns; if the write fails the in-memory change is undone.

use std::collections::BTreeMap;

use chess_rules::{Board, Piece, Side};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::signing::StateSignature;
use crate::store::MoveStore;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedMove {
    pub from: u8,
    pub to: u8,
    /// Piece code (2..=5) chosen on promotion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<i8>,
    /// Move counter of `state`.
    pub move_number: u16,
    #[serde(with = "board_cells")]
    pub state: Board,
    pub move_signature: Option<StateSignature>,
    pub state_signature: Option<StateSignature>,
}

impl RecordedMove {
    pub fn promotion_piece(&self) -> Option<Piece> {
        self.promotion.and_then(Piece::from_code)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMoveRecord {
    pub game_id: u32,
    #[serde(with = "SideDef")]
    pub side: Side,
    pub self_moves: Vec<RecordedMove>,
    pub opponent_moves: Vec<RecordedMove>,
    pub last_move_number: u16,
}

impl LocalMoveRecord {
    pub fn new(game_id: u32, side: Side) -> Self {
        Self {
            game_id,
            side,
            self_moves: Vec::new(),
            opponent_moves: Vec::new(),
            last_move_number: 0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub games: BTreeMap<u32, LocalMoveRecord>,
}

/// What a player needs to bring their latest move on the ledger.
///
/// When `prior_state` is present it is the opponent-signed position the move
/// was played from (the `move_from_state` entry point); otherwise the move
/// is the game's first and is played on the stored initial board.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionPackage {
    pub game_id: u32,
    pub prior_state: Option<Board>,
    pub prior_signature: Option<StateSignature>,
    pub from: u8,
    pub to: u8,
    pub promotion: Option<Piece>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mover {
    SelfSide,
    Opponent,
}

pub struct LocalLedger<M> {
    store: M,
    games: BTreeMap<u32, LocalMoveRecord>,
}

impl<M: MoveStore> LocalLedger<M> {
    /// Loads whatever the store holds; an empty store yields an empty ledger.
    pub fn open(mut store: M) -> Result<Self, LedgerError> {
        let games = store.load()?.map(|s| s.games).unwrap_or_default();
        debug!(games = games.len(), "local ledger opened");
        Ok(Self { store, games })
    }

    pub fn store(&self) -> &M {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut M {
        &mut self.store
    }

    pub fn record(&self, game_id: u32) -> Option<&LocalMoveRecord> {
        self.games.get(&game_id)
    }

    pub fn game_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.games.keys().copied()
    }

    /// Starts tracking `game_id`. Observing a tracked game again is a no-op
    /// as long as the side agrees.
    pub fn observe_game(&mut self, game_id: u32, side: Side) -> Result<(), LedgerError> {
        if let Some(existing) = self.games.get(&game_id) {
            if existing.side != side {
                return Err(LedgerError::SideMismatch {
                    game_id,
                    existing: existing.side,
                });
            }
            return Ok(());
        }

        self.games
            .insert(game_id, LocalMoveRecord::new(game_id, side));
        if let Err(err) = self.persist() {
            self.games.remove(&game_id);
            return Err(err);
        }
        info!(game_id, ?side, "tracking new game");
        Ok(())
    }

    /// Appends a move this player made. Returns `false` when a move with the
    /// same number is already the latest one.
    pub fn record_self_move(
        &mut self,
        game_id: u32,
        from: u8,
        to: u8,
        promotion: Option<Piece>,
        state: Board,
        state_signature: Option<StateSignature>,
    ) -> Result<bool, LedgerError> {
        let entry = RecordedMove {
            from,
            to,
            promotion: promotion.map(Piece::code),
            move_number: state.move_count(),
            state,
            move_signature: None,
            state_signature,
        };
        self.append(game_id, Mover::SelfSide, entry)
    }

    /// Appends a move the opponent made, with the signatures they sent.
    #[allow(clippy::too_many_arguments)]
    pub fn record_opponent_move(
        &mut self,
        game_id: u32,
        from: u8,
        to: u8,
        promotion: Option<Piece>,
        move_signature: Option<StateSignature>,
        state: Board,
        state_signature: Option<StateSignature>,
    ) -> Result<bool, LedgerError> {
        let entry = RecordedMove {
            from,
            to,
            promotion: promotion.map(Piece::code),
            move_number: state.move_count(),
            state,
            move_signature,
            state_signature,
        };
        self.append(game_id, Mover::Opponent, entry)
    }

    fn append(
        &mut self,
        game_id: u32,
        mover: Mover,
        entry: RecordedMove,
    ) -> Result<bool, LedgerError> {
        let record = self
            .games
            .get_mut(&game_id)
            .ok_or(LedgerError::UnknownGame(game_id))?;

        let move_number = entry.move_number;
        let last = record.last_move_number;
        if move_number == last {
            debug!(game_id, move_number, "move already recorded");
            return Ok(false);
        }
        if move_number < last {
            warn!(game_id, move_number, last, "rejected move older than the ledger");
            return Err(LedgerError::SequenceRegression {
                game_id,
                move_number,
                last,
            });
        }

        let moves = match mover {
            Mover::SelfSide => &mut record.self_moves,
            Mover::Opponent => &mut record.opponent_moves,
        };
        moves.push(entry);
        record.last_move_number = move_number;

        if let Err(err) = self.persist() {
            if let Some(record) = self.games.get_mut(&game_id) {
                match mover {
                    Mover::SelfSide => record.self_moves.pop(),
                    Mover::Opponent => record.opponent_moves.pop(),
                };
                record.last_move_number = last;
            }
            return Err(err);
        }
        debug!(game_id, move_number, ?mover, "move recorded");
        Ok(true)
    }

    /// Assembles the latest self move with the opponent-signed position it
    /// was played from.
    pub fn build_submission_package(&self, game_id: u32) -> Result<SubmissionPackage, LedgerError> {
        let record = self
            .games
            .get(&game_id)
            .ok_or(LedgerError::UnknownGame(game_id))?;
        let out_of_order = |reason| LedgerError::OutOfOrder { game_id, reason };

        let latest = record
            .self_moves
            .last()
            .ok_or_else(|| out_of_order("no move of ours is recorded"))?;
        if latest.move_number != record.last_move_number {
            return Err(out_of_order("the opponent has moved since our last move"));
        }

        let (prior_state, prior_signature) = if latest.move_number == 1 {
            (None, None)
        } else {
            let prior = record
                .opponent_moves
                .iter()
                .rev()
                .find(|m| m.move_number + 1 == latest.move_number)
                .ok_or_else(|| out_of_order("the preceding opponent move is missing"))?;
            let signature = prior
                .state_signature
                .ok_or_else(|| out_of_order("the preceding opponent move is unsigned"))?;
            (Some(prior.state), Some(signature))
        };

        info!(game_id, move_number = latest.move_number, "submission package built");
        Ok(SubmissionPackage {
            game_id,
            prior_state,
            prior_signature,
            from: latest.from,
            to: latest.to,
            promotion: latest.promotion_piece(),
        })
    }

    /// Whether `remote` is ahead of everything recorded locally.
    pub fn is_remote_state_newer(&self, game_id: u32, remote: &Board) -> Result<bool, LedgerError> {
        let record = self
            .games
            .get(&game_id)
            .ok_or(LedgerError::UnknownGame(game_id))?;
        Ok(remote.move_count() > record.last_move_number)
    }

    pub fn remove_game(&mut self, game_id: u32) -> Result<LocalMoveRecord, LedgerError> {
        let record = self
            .games
            .remove(&game_id)
            .ok_or(LedgerError::UnknownGame(game_id))?;
        if let Err(err) = self.persist() {
            self.games.insert(game_id, record);
            return Err(err);
        }
        info!(game_id, "stopped tracking game");
        Ok(record)
    }

    fn persist(&mut self) -> Result<(), LedgerError> {
        let snapshot = LedgerSnapshot {
            games: self.games.clone(),
        };
        self.store.save(&snapshot)?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(remote = "Side", rename_all = "lowercase")]
enum SideDef {
    White,
    Black,
}

/// Boards travel as their 128 raw cells and are re-validated on the way in.
mod board_cells {
    use chess_rules::board::BOARD_SIZE;
    use chess_rules::Board;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(board: &Board, serializer: S) -> Result<S::Ok, S::Error> {
        board.cells().as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Board, D::Error> {
        let cells = Vec::<i8>::deserialize(deserializer)?;
        let cells: [i8; BOARD_SIZE] = cells
            .try_into()
            .map_err(|v: Vec<i8>| D::Error::invalid_length(v.len(), &"128 board cells"))?;
        Board::from_cells(cells).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chess_rules::apply_move;

    fn sig(tag: u8) -> StateSignature {
        StateSignature {
            r: [tag; 32],
            s: [tag.wrapping_add(1); 32],
            v: 0,
        }
    }

    /// Plays `moves` from the initial position, returning every intermediate
    /// board (index `n` is the board after move `n`).
    fn line(moves: &[(u8, u8)]) -> Vec<Board> {
        let mut boards = vec![Board::initial()];
        for &(from, to) in moves {
            let next = apply_move(boards.last().unwrap(), from as usize, to as usize, None).unwrap();
            boards.push(next);
        }
        boards
    }

    // e2e4, e7e5, g1f3, b8c6
    const OPENING: [(u8, u8); 4] = [(100, 68), (20, 52), (118, 85), (1, 34)];

    fn ledger() -> LocalLedger<MemoryStore> {
        LocalLedger::open(MemoryStore::new()).unwrap()
    }

    #[test]
    fn observe_is_idempotent_and_persisted() {
        let mut ledger = ledger();
        ledger.observe_game(9, Side::White).unwrap();
        ledger.observe_game(9, Side::White).unwrap();
        assert_eq!(ledger.store().saves(), 1);
        assert!(matches!(
            ledger.observe_game(9, Side::Black),
            Err(LedgerError::SideMismatch { game_id: 9, existing: Side::White })
        ));
    }

    #[test]
    fn unknown_game_is_reported() {
        let mut ledger = ledger();
        let board = Board::initial();
        assert!(matches!(
            ledger.record_self_move(1, 100, 84, None, board, None),
            Err(LedgerError::UnknownGame(1))
        ));
        assert!(matches!(
            ledger.is_remote_state_newer(1, &board),
            Err(LedgerError::UnknownGame(1))
        ));
    }

    #[test]
    fn equal_move_number_is_a_no_op() {
        let boards = line(&OPENING);
        let mut ledger = ledger();
        ledger.observe_game(1, Side::White).unwrap();

        assert!(ledger
            .record_self_move(1, 100, 68, None, boards[1], Some(sig(1)))
            .unwrap());
        let saves = ledger.store().saves();
        assert!(!ledger
            .record_self_move(1, 100, 68, None, boards[1], Some(sig(1)))
            .unwrap());
        assert_eq!(ledger.store().saves(), saves);
        assert_eq!(ledger.record(1).unwrap().self_moves.len(), 1);
    }

    #[test]
    fn older_move_number_is_a_regression() {
        let boards = line(&OPENING);
        let mut ledger = ledger();
        ledger.observe_game(1, Side::Black).unwrap();
        ledger
            .record_opponent_move(1, 100, 68, None, Some(sig(1)), boards[1], Some(sig(2)))
            .unwrap();
        ledger
            .record_self_move(1, 20, 52, None, boards[2], Some(sig(3)))
            .unwrap();

        let err = ledger
            .record_opponent_move(1, 100, 68, None, None, boards[1], None)
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::SequenceRegression { game_id: 1, move_number: 1, last: 2 }
        ));
        assert_eq!(ledger.record(1).unwrap().last_move_number, 2);
    }

    #[test]
    fn failed_save_rolls_back() {
        let boards = line(&OPENING);
        let mut ledger = ledger();
        ledger.observe_game(1, Side::White).unwrap();
        ledger.store_mut().set_failing(true);

        assert!(matches!(
            ledger.record_self_move(1, 100, 68, None, boards[1], None),
            Err(LedgerError::Store(_))
        ));
        let record = ledger.record(1).unwrap();
        assert!(record.self_moves.is_empty());
        assert_eq!(record.last_move_number, 0);

        assert!(ledger.observe_game(2, Side::Black).is_err());
        assert!(ledger.record(2).is_none());
        assert!(ledger.remove_game(1).is_err());
        assert!(ledger.record(1).is_some());
    }

    #[test]
    fn first_move_package_has_no_prior_state() {
        let boards = line(&OPENING);
        let mut ledger = ledger();
        ledger.observe_game(3, Side::White).unwrap();
        ledger
            .record_self_move(3, 100, 68, None, boards[1], Some(sig(1)))
            .unwrap();

        let package = ledger.build_submission_package(3).unwrap();
        assert_eq!(package.prior_state, None);
        assert_eq!(package.prior_signature, None);
        assert_eq!((package.from, package.to), (100, 68));
    }

    #[test]
    fn later_package_carries_signed_opponent_state() {
        let boards = line(&OPENING);
        let mut ledger = ledger();
        ledger.observe_game(3, Side::White).unwrap();
        ledger.record_self_move(3, 100, 68, None, boards[1], Some(sig(1))).unwrap();
        ledger
            .record_opponent_move(3, 20, 52, None, Some(sig(5)), boards[2], Some(sig(6)))
            .unwrap();

        // The opponent moved last: nothing of ours to submit.
        assert!(matches!(
            ledger.build_submission_package(3),
            Err(LedgerError::OutOfOrder { game_id: 3, .. })
        ));

        ledger.record_self_move(3, 118, 85, None, boards[3], Some(sig(7))).unwrap();
        let package = ledger.build_submission_package(3).unwrap();
        assert_eq!(package.prior_state, Some(boards[2]));
        assert_eq!(package.prior_signature, Some(sig(6)));
        assert_eq!((package.from, package.to), (118, 85));
    }

    #[test]
    fn unsigned_opponent_state_cannot_be_submitted() {
        let boards = line(&OPENING);
        let mut ledger = ledger();
        ledger.observe_game(3, Side::Black).unwrap();
        ledger
            .record_opponent_move(3, 100, 68, None, None, boards[1], None)
            .unwrap();
        ledger.record_self_move(3, 20, 52, None, boards[2], Some(sig(1))).unwrap();
        assert!(matches!(
            ledger.build_submission_package(3),
            Err(LedgerError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn remote_state_newer_compares_move_numbers() {
        let boards = line(&OPENING);
        let mut ledger = ledger();
        ledger.observe_game(5, Side::White).unwrap();
        ledger.record_self_move(5, 100, 68, None, boards[1], None).unwrap();

        assert!(!ledger.is_remote_state_newer(5, &boards[0]).unwrap());
        assert!(!ledger.is_remote_state_newer(5, &boards[1]).unwrap());
        assert!(ledger.is_remote_state_newer(5, &boards[2]).unwrap());
    }

    #[test]
    fn snapshot_survives_reopen() {
        let boards = line(&OPENING);
        let mut ledger = ledger();
        ledger.observe_game(8, Side::Black).unwrap();
        ledger
            .record_opponent_move(8, 100, 68, None, Some(sig(1)), boards[1], Some(sig(2)))
            .unwrap();
        let snapshot = ledger.store().snapshot().cloned().unwrap();

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"side\":\"black\""));
        let decoded: LedgerSnapshot = serde_json::from_str(&json).unwrap();

        let reopened = LocalLedger::open(MemoryStore::with_snapshot(decoded)).unwrap();
        let record = reopened.record(8).unwrap();
        assert_eq!(record.opponent_moves[0].state, boards[1]);
        assert_eq!(record.last_move_number, 1);
    }

    #[test]
    fn malformed_board_is_rejected_on_load() {
        let json = r#"{"games":{"1":{"game_id":1,"side":"white","self_moves":[{"from":100,"to":84,"move_number":1,"state":[0,0,0],"move_signature":null,"state_signature":null}],"opponent_moves":[],"last_move_number":1}}}"#;
        assert!(serde_json::from_str::<LedgerSnapshot>(json).is_err());
    }

    #[test]
    fn removed_game_is_forgotten() {
        let mut ledger = ledger();
        ledger.observe_game(2, Side::White).unwrap();
        let removed = ledger.remove_game(2).unwrap();
        assert_eq!(removed.game_id, 2);
        assert!(ledger.record(2).is_none());
        assert!(ledger.store().snapshot().unwrap().games.is_empty());
        assert!(matches!(ledger.remove_game(2), Err(LedgerError::UnknownGame(2))));
    }
}
