//! One player's view of their open channels.

use chess_rules::{apply_move, Board, Piece};
use tracing::{info, warn};

use crate::error::{LedgerError, SessionError};
use crate::ledger::{LocalLedger, LocalMoveRecord, SubmissionPackage};
use crate::signing::{Signer, SigningBridge, StateSignature};
use crate::store::MoveStore;

/// A move as it travels between the two players.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedMove {
    pub game_id: u32,
    pub from: u8,
    pub to: u8,
    pub promotion: Option<Piece>,
    /// Position after the move.
    pub state: Board,
    /// Mover's signature over the state hash of `state`.
    pub state_signature: StateSignature,
    /// Mover's signature over the move hash.
    pub move_signature: StateSignature,
}

impl SignedMove {
    pub fn move_number(&self) -> u16 {
        self.state.move_count()
    }
}

pub struct ChannelSession<S: Signer, M> {
    bridge: SigningBridge<S>,
    ledger: LocalLedger<M>,
    account: S::Account,
    opponent: S::Account,
}

impl<S: Signer, M: MoveStore> ChannelSession<S, M> {
    pub fn new(
        signer: S,
        ledger: LocalLedger<M>,
        account: S::Account,
        opponent: S::Account,
    ) -> Self {
        Self {
            bridge: SigningBridge::new(signer),
            ledger,
            account,
            opponent,
        }
    }

    pub fn bridge(&self) -> &SigningBridge<S> {
        &self.bridge
    }

    pub fn ledger(&self) -> &LocalLedger<M> {
        &self.ledger
    }

    pub fn account(&self) -> &S::Account {
        &self.account
    }

    pub fn opponent(&self) -> &S::Account {
        &self.opponent
    }

    /// Starts tracking a game in which this player holds `side`.
    pub fn join(&mut self, game_id: u32, side: chess_rules::Side) -> Result<(), SessionError> {
        self.ledger.observe_game(game_id, side)?;
        Ok(())
    }

    /// Plays one of our moves on `board`, signs the result and records it.
    pub fn propose_move(
        &mut self,
        game_id: u32,
        board: &Board,
        from: u8,
        to: u8,
        promotion: Option<Piece>,
    ) -> Result<SignedMove, SessionError> {
        let side = self.tracked(game_id)?.side;
        if board.side_to_move() != side {
            return Err(SessionError::WrongTurn(game_id));
        }

        let state = apply_move(board, from as usize, to as usize, promotion)?;
        let move_number = state.move_count();
        let state_signature = self
            .bridge
            .sign_state(&self.account, &state, game_id)
            .map_err(signer_error)?;
        let move_signature = self
            .bridge
            .sign_move(&self.account, game_id, move_number, from, to)
            .map_err(signer_error)?;

        self.ledger.record_self_move(
            game_id,
            from,
            to,
            promotion,
            state,
            Some(state_signature),
        )?;
        info!(game_id, move_number, from, to, "proposed move");

        Ok(SignedMove {
            game_id,
            from,
            to,
            promotion,
            state,
            state_signature,
            move_signature,
        })
    }

    /// Replays an opponent move on `board`, checks their signatures and
    /// records it. Returns the new position.
    pub fn accept_opponent_move(
        &mut self,
        board: &Board,
        incoming: &SignedMove,
    ) -> Result<Board, SessionError> {
        let game_id = incoming.game_id;
        let side = self.tracked(game_id)?.side;
        if board.side_to_move() != side.opponent() {
            return Err(SessionError::WrongTurn(game_id));
        }

        let state = apply_move(
            board,
            incoming.from as usize,
            incoming.to as usize,
            incoming.promotion,
        )?;
        if state != incoming.state {
            warn!(game_id, "opponent state does not follow from their move");
            return Err(SessionError::StateMismatch(game_id));
        }

        let move_number = state.move_count();
        let state_ok = self.bridge.verify_state(
            &self.opponent,
            &state,
            game_id,
            &incoming.state_signature,
        );
        let move_ok = self.bridge.verify_move(
            &self.opponent,
            game_id,
            move_number,
            incoming.from,
            incoming.to,
            &incoming.move_signature,
        );
        if !(state_ok && move_ok) {
            warn!(game_id, move_number, state_ok, move_ok, "opponent signature rejected");
            return Err(SessionError::SignatureMismatch(game_id));
        }

        self.ledger.record_opponent_move(
            game_id,
            incoming.from,
            incoming.to,
            incoming.promotion,
            Some(incoming.move_signature),
            state,
            Some(incoming.state_signature),
        )?;
        info!(game_id, move_number, "accepted opponent move");
        Ok(state)
    }

    pub fn submission_package(&self, game_id: u32) -> Result<SubmissionPackage, SessionError> {
        Ok(self.ledger.build_submission_package(game_id)?)
    }

    /// True when the on-ledger position is ahead of our local history.
    pub fn needs_resync(&self, game_id: u32, remote: &Board) -> Result<bool, SessionError> {
        Ok(self.ledger.is_remote_state_newer(game_id, remote)?)
    }

    /// Drops a settled game from the local history.
    pub fn forget(&mut self, game_id: u32) -> Result<LocalMoveRecord, SessionError> {
        Ok(self.ledger.remove_game(game_id)?)
    }

    fn tracked(&self, game_id: u32) -> Result<&LocalMoveRecord, LedgerError> {
        self.ledger
            .record(game_id)
            .ok_or(LedgerError::UnknownGame(game_id))
    }
}

fn signer_error<E: std::error::Error + Send + Sync + 'static>(err: E) -> SessionError {
    SessionError::Signer(Box::new(err))
}
