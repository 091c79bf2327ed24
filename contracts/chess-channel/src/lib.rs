#![no_std]

//! # Chess Channel
//!
//! On-ledger arbiter for two-player chess played over a state channel.
//!
//! Moves are normally exchanged off the ledger: after each move the mover
//! signs the resulting board and hands it to the opponent. The ledger is only
//! touched to open and join a game, to settle it, or to arbitrate when one
//! side stops cooperating.
//!
//! ## Game flow
//! 1. `init_game` escrows the initiator's stake and registers the game as open.
//! 2. `join_game` escrows a matching (or larger) stake and activates the game.
//! 3. Play happens off the ledger. Any position the opponent signed can be
//!    brought on the ledger with `move_from_state`, together with the next
//!    move; `make_move` plays directly on the stored board.
//! 4. A stalled or finished game is resolved through a pending claim:
//!    `claim_win` (opponent is mated), `claim_timeout` (opponent stopped
//!    moving) or `offer_draw`. The opponent either confirms, answers with a
//!    move (which cancels the claim), or lets the deadline pass.
//! 5. Settlement credits the pot to the winner (split on a draw) and updates
//!    both ratings. Funds are pulled with `withdraw`.
//!
//! ## State signatures
//! `state_hash = keccak256(abi.encode(int8[128] board, uint256 game_id))`,
//! signed with recoverable secp256k1 ECDSA. Each player registers the
//! uncompressed public key they sign with when they enter the game.

use chess_rules::digest::state_preimage;
use chess_rules::{apply_move, status, Board, GameStatus, Piece, RuleError, Side};
use soroban_sdk::crypto::Hash;
use soroban_sdk::{
    contract, contracterror, contractevent, contractimpl, contracttype, panic_with_error, token,
    Address, Bytes, BytesN, Env, String, Vec,
};

mod rating;

pub use rating::PlayerRating;

// ═══════════════════════════════════════════════════════════════════════════════
//  Contract Events
// ═══════════════════════════════════════════════════════════════════════════════

#[contractevent]
pub struct EvGameInitialized {
    pub game_id: u32,
    pub player: Address,
    pub white: bool,
    pub stake: i128,
    pub turn_timeout: u64,
}

#[contractevent]
pub struct EvGameJoined {
    pub game_id: u32,
    pub player: Address,
    pub stake: i128,
}

#[contractevent]
pub struct EvGameStateChanged {
    pub game_id: u32,
    pub state: u32,
}

#[contractevent]
pub struct EvMove {
    pub game_id: u32,
    pub player: Address,
    pub from: u32,
    pub to: u32,
    pub promotion: u32,
    pub move_number: u32,
}

#[contractevent]
pub struct EvGameTimeoutStarted {
    pub game_id: u32,
    pub initiator: Address,
    pub kind: u32,
    pub deadline: u64,
}

#[contractevent]
pub struct EvGameEnded {
    pub game_id: u32,
    pub outcome: u32,
    pub winner: Option<Address>,
    pub white_rating: u32,
    pub black_rating: u32,
}

#[contractevent]
pub struct EvRatingUpdate {
    pub game_id: u32,
    pub player: Address,
    pub rating: u32,
}

#[contractevent]
pub struct EvGameClosed {
    pub game_id: u32,
    pub refunded: i128,
}

#[contractevent]
pub struct EvWithdrawn {
    pub game_id: u32,
    pub player: Address,
    pub amount: i128,
}

// ═══════════════════════════════════════════════════════════════════════════════
//  Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum ChessChannelError {
    GameNotFound = 1,
    NotAPlayer = 2,
    SelfPlayNotAllowed = 3,
    StateTransition = 4,
    NotYourTurn = 5,
    IllegalMove = 6,
    InvalidPromotion = 7,
    InvalidState = 8,
    SignatureMismatch = 9,
    StaleState = 10,
    StakeTooLow = 11,
    InvalidAmount = 12,
    InvalidTimeout = 13,
    InvalidAlias = 14,
    InvalidConfig = 15,
    NotCheckmate = 16,
    NothingToWithdraw = 17,
    AdminNotSet = 18,
    TokenNotSet = 19,
    ConfigNotSet = 20,
}

impl From<RuleError> for ChessChannelError {
    fn from(err: RuleError) -> Self {
        match err {
            RuleError::IllegalMove => ChessChannelError::IllegalMove,
            RuleError::InvalidPromotion => ChessChannelError::InvalidPromotion,
            RuleError::InvalidState => ChessChannelError::InvalidState,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
//  Lifecycle states (compact u32 encoding for storage efficiency)
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) type LifecycleState = u32;

pub const STATE_OPEN: LifecycleState = 1;
pub const STATE_ACTIVE: LifecycleState = 2;
pub const STATE_TIMEOUT_CLAIMED: LifecycleState = 3;
pub const STATE_ENDED: LifecycleState = 4;
pub const STATE_CLOSED: LifecycleState = 5;

pub(crate) type Outcome = u32;

pub const OUTCOME_UNRESOLVED: Outcome = 0;
pub const OUTCOME_WHITE_WIN: Outcome = 1;
pub const OUTCOME_BLACK_WIN: Outcome = 2;
pub const OUTCOME_DRAW: Outcome = 3;

// Pending claim kinds
pub const CLAIM_WIN: u32 = 1;
pub const CLAIM_TIMEOUT: u32 = 2;
pub const CLAIM_DRAW_OFFER: u32 = 3;

// Promotion codes accepted by make_move / move_from_state
pub const PROMOTE_NONE: u32 = 0;

// Player slots
const PLAYER_1: u32 = 1;
const PLAYER_2: u32 = 2;

// ═══════════════════════════════════════════════════════════════════════════════
//  Game state & storage keys
// ═══════════════════════════════════════════════════════════════════════════════

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingClaim {
    pub kind: u32,
    pub initiator: Address,
    pub started_at: u64,
    pub deadline: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChessGame {
    pub player1: Address,
    pub player2: Option<Address>,
    pub player1_white: bool,
    pub alias1: String,
    pub alias2: String,
    /// Uncompressed secp256k1 keys the peers sign states with.
    pub signer1: BytesN<65>,
    pub signer2: Option<BytesN<65>>,
    // Escrow
    pub stake1: i128,
    pub stake2: i128,
    pub pot: i128,
    pub withdrawable1: i128,
    pub withdrawable2: i128,
    // State machine
    pub turn_timeout: u64,
    pub lifecycle_state: u32,
    pub outcome: u32,
    pub winner: Option<Address>,
    pub board: BytesN<128>,
    pub pending: Option<PendingClaim>,
    pub created_at: u64,
    pub last_move_at: u64,
}

/// Recoverable secp256k1 signature over a state hash. `v` is the recovery id
/// (0..=3).
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StateSignature {
    pub r: BytesN<32>,
    pub s: BytesN<32>,
    pub v: u32,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChannelConfig {
    /// Bounds, in seconds, for a game's turn timeout.
    pub min_turn_timeout: u64,
    pub max_turn_timeout: u64,
    pub initial_rating: u32,
    pub rating_floor: u32,
}

#[contracttype]
#[derive(Clone)]
enum StorageKey {
    Game(u32),
    NextGameId,
    Admin,
    Token,
    Config,
    OpenGames,
    PlayerGames(Address),
    Rating(Address),
}

// ═══════════════════════════════════════════════════════════════════════════════
//  Constants
// ═══════════════════════════════════════════════════════════════════════════════

const MAX_ALIAS_LEN: u32 = 32;

// Ledger rate is approximately 5 seconds per ledger on Stellar
const LEDGER_RATE_SECS: u32 = 5;

// Games hold escrowed funds, so they live in persistent storage (30 days,
// refreshed on every write).
const TTL_SECONDS: u32 = 30 * 24 * 60 * 60;
const GAME_TTL_LEDGERS: u32 = TTL_SECONDS / LEDGER_RATE_SECS;

// ═══════════════════════════════════════════════════════════════════════════════
//  Contract
// ═══════════════════════════════════════════════════════════════════════════════

#[contract]
pub struct ChessChannel;

#[contractimpl]
impl ChessChannel {
    // ───────────────────────────────────────────────────────────────────────────
    //  Public: Constructor & Membership
    // ───────────────────────────────────────────────────────────────────────────

    pub fn __constructor(env: Env, admin: Address, token: Address, config: ChannelConfig) {
        if !Self::config_is_valid(&config) {
            panic_with_error!(&env, ChessChannelError::InvalidConfig);
        }
        env.storage().instance().set(&StorageKey::Admin, &admin);
        env.storage().instance().set(&StorageKey::Token, &token);
        env.storage().instance().set(&StorageKey::Config, &config);
    }

    /// Open a new game and escrow the initiator's stake. Returns the game id.
    pub fn init_game(
        env: Env,
        player: Address,
        alias: String,
        white: bool,
        signer: BytesN<65>,
        stake: i128,
        turn_timeout: u64,
    ) -> Result<u32, ChessChannelError> {
        player.require_auth();

        Self::check_alias(&alias)?;
        if stake < 0 {
            return Err(ChessChannelError::InvalidAmount);
        }
        let config = Self::load_config(&env)?;
        if turn_timeout < config.min_turn_timeout || turn_timeout > config.max_turn_timeout {
            return Err(ChessChannelError::InvalidTimeout);
        }

        Self::pull_stake(&env, &player, stake)?;

        let game_id = Self::next_game_id(&env);
        let now = env.ledger().timestamp();
        let game = ChessGame {
            player1: player.clone(),
            player2: None,
            player1_white: white,
            alias1: alias,
            alias2: String::from_str(&env, ""),
            signer1: signer,
            signer2: None,
            stake1: stake,
            stake2: 0,
            pot: stake,
            withdrawable1: 0,
            withdrawable2: 0,
            turn_timeout,
            lifecycle_state: STATE_OPEN,
            outcome: OUTCOME_UNRESOLVED,
            winner: None,
            board: BytesN::from_array(&env, &Board::initial().to_bytes()),
            pending: None,
            created_at: now,
            last_move_at: now,
        };

        let mut open = Self::open_games(&env);
        open.push_back(game_id);
        env.storage().instance().set(&StorageKey::OpenGames, &open);
        Self::index_player(&env, &player, game_id);

        EvGameInitialized {
            game_id,
            player,
            white,
            stake,
            turn_timeout,
        }
        .publish(&env);

        Self::write_game(&env, game_id, &game);
        Ok(game_id)
    }

    pub fn join_game(
        env: Env,
        game_id: u32,
        player: Address,
        alias: String,
        signer: BytesN<65>,
        stake: i128,
    ) -> Result<(), ChessChannelError> {
        player.require_auth();

        let mut game = Self::read_game(&env, game_id)?;
        if game.lifecycle_state != STATE_OPEN {
            return Err(ChessChannelError::StateTransition);
        }
        if player == game.player1 {
            return Err(ChessChannelError::SelfPlayNotAllowed);
        }
        Self::check_alias(&alias)?;
        if stake < game.stake1 {
            return Err(ChessChannelError::StakeTooLow);
        }

        Self::pull_stake(&env, &player, stake)?;

        game.player2 = Some(player.clone());
        game.alias2 = alias;
        game.signer2 = Some(signer);
        game.stake2 = stake;
        game.pot += stake;
        game.lifecycle_state = STATE_ACTIVE;
        game.last_move_at = env.ledger().timestamp();

        Self::unlist_open(&env, game_id);
        Self::index_player(&env, &player, game_id);

        EvGameJoined {
            game_id,
            player,
            stake,
        }
        .publish(&env);
        Self::publish_state(&env, game_id, &game);

        Self::write_game(&env, game_id, &game);
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────────
    //  Public: Moves
    // ───────────────────────────────────────────────────────────────────────────

    /// Play a move on the stored board.
    ///
    /// `promotion` is 0 for none, otherwise 2 (knight) to 5 (queen).
    pub fn make_move(
        env: Env,
        game_id: u32,
        player: Address,
        from: u32,
        to: u32,
        promotion: u32,
    ) -> Result<(), ChessChannelError> {
        player.require_auth();

        let mut game = Self::read_game(&env, game_id)?;
        let slot = Self::resolve_slot(&game, &player)?;
        Self::require_playable(&env, game_id, &mut game, &player)?;

        let board = Self::stored_board(&game)?;
        Self::play(&env, game_id, &mut game, &player, slot, &board, from, to, promotion)?;

        Self::write_game(&env, game_id, &game);
        Ok(())
    }

    /// Adopt a position the opponent signed off the ledger, then play the
    /// caller's next move on it.
    ///
    /// The signed position must be at least as recent as the stored one and,
    /// when both carry the same move number, identical to it.
    #[allow(clippy::too_many_arguments)]
    pub fn move_from_state(
        env: Env,
        game_id: u32,
        player: Address,
        state: BytesN<128>,
        signature: StateSignature,
        from: u32,
        to: u32,
        promotion: u32,
    ) -> Result<(), ChessChannelError> {
        player.require_auth();

        let mut game = Self::read_game(&env, game_id)?;
        let slot = Self::resolve_slot(&game, &player)?;
        Self::require_playable(&env, game_id, &mut game, &player)?;

        let prior = Board::from_bytes(state.to_array())?;
        let opponent_key = Self::signer_of(&game, Self::other_slot(slot))?;
        Self::verify_state_signature(&env, game_id, &prior, &signature, &opponent_key)?;

        let stored = Self::stored_board(&game)?;
        if prior.move_count() < stored.move_count()
            || (prior.move_count() == stored.move_count() && prior != stored)
        {
            return Err(ChessChannelError::StaleState);
        }

        Self::play(&env, game_id, &mut game, &player, slot, &prior, from, to, promotion)?;

        Self::write_game(&env, game_id, &game);
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────────
    //  Public: Claims & Disputes
    // ───────────────────────────────────────────────────────────────────────────

    /// Claim the win when the side on turn is checkmated on the stored board.
    pub fn claim_win(env: Env, game_id: u32, player: Address) -> Result<(), ChessChannelError> {
        player.require_auth();

        let mut game = Self::read_game(&env, game_id)?;
        let slot = Self::resolve_slot(&game, &player)?;
        let board = Self::require_waiting(&game, slot)?;
        if status(&board) != GameStatus::Checkmate {
            return Err(ChessChannelError::NotCheckmate);
        }

        Self::start_claim(&env, game_id, &mut game, CLAIM_WIN, player);
        Self::write_game(&env, game_id, &game);
        Ok(())
    }

    /// Start the clock on an opponent who has stopped moving.
    pub fn claim_timeout(env: Env, game_id: u32, player: Address) -> Result<(), ChessChannelError> {
        player.require_auth();

        let mut game = Self::read_game(&env, game_id)?;
        let slot = Self::resolve_slot(&game, &player)?;
        Self::require_waiting(&game, slot)?;

        Self::start_claim(&env, game_id, &mut game, CLAIM_TIMEOUT, player);
        Self::write_game(&env, game_id, &game);
        Ok(())
    }

    /// Offer a draw, or accept the one the opponent has pending.
    ///
    /// Only the side not on turn may open an offer. The side on turn answers
    /// it by calling `offer_draw` too, by confirming, or by moving (which
    /// declines it).
    pub fn offer_draw(env: Env, game_id: u32, player: Address) -> Result<(), ChessChannelError> {
        player.require_auth();

        let mut game = Self::read_game(&env, game_id)?;
        let slot = Self::resolve_slot(&game, &player)?;

        match game.lifecycle_state {
            STATE_ACTIVE => {
                Self::require_waiting(&game, slot)?;
                Self::start_claim(&env, game_id, &mut game, CLAIM_DRAW_OFFER, player);
            }
            STATE_TIMEOUT_CLAIMED => {
                let claim = game
                    .pending
                    .clone()
                    .ok_or(ChessChannelError::StateTransition)?;
                if claim.kind != CLAIM_DRAW_OFFER || claim.initiator == player {
                    return Err(ChessChannelError::StateTransition);
                }
                Self::settle(&env, game_id, &mut game, OUTCOME_DRAW)?;
            }
            _ => return Err(ChessChannelError::StateTransition),
        }

        Self::write_game(&env, game_id, &game);
        Ok(())
    }

    /// Resolve an unanswered claim once its deadline has passed. Only the
    /// claimant may call this.
    pub fn claim_timeout_ended(
        env: Env,
        game_id: u32,
        player: Address,
    ) -> Result<(), ChessChannelError> {
        player.require_auth();

        let mut game = Self::read_game(&env, game_id)?;
        Self::resolve_slot(&game, &player)?;
        let claim = Self::pending_claim(&game)?;
        if claim.initiator != player || env.ledger().timestamp() < claim.deadline {
            return Err(ChessChannelError::StateTransition);
        }

        let outcome = Self::claim_outcome(&game, &claim)?;
        Self::settle(&env, game_id, &mut game, outcome)?;
        Self::write_game(&env, game_id, &game);
        Ok(())
    }

    /// Concede a pending claim without waiting for its deadline. Only the
    /// side the claim was raised against may call this.
    pub fn confirm_game_ended(
        env: Env,
        game_id: u32,
        player: Address,
    ) -> Result<(), ChessChannelError> {
        player.require_auth();

        let mut game = Self::read_game(&env, game_id)?;
        Self::resolve_slot(&game, &player)?;
        let claim = Self::pending_claim(&game)?;
        if claim.initiator == player {
            return Err(ChessChannelError::StateTransition);
        }

        let outcome = Self::claim_outcome(&game, &claim)?;
        Self::settle(&env, game_id, &mut game, outcome)?;
        Self::write_game(&env, game_id, &game);
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────────
    //  Public: Close & Withdraw
    // ───────────────────────────────────────────────────────────────────────────

    /// Close an open game (refunding the initiator) or retire an ended one.
    pub fn close_game(env: Env, game_id: u32, player: Address) -> Result<(), ChessChannelError> {
        player.require_auth();

        let mut game = Self::read_game(&env, game_id)?;
        Self::resolve_slot(&game, &player)?;

        let refunded = match game.lifecycle_state {
            STATE_OPEN => {
                let refund = game.pot;
                game.pot = 0;
                Self::push_payout(&env, &game.player1, refund)?;
                Self::unlist_open(&env, game_id);
                Self::unindex_player(&env, &game.player1, game_id);
                refund
            }
            STATE_ENDED => {
                Self::unindex_player(&env, &game.player1, game_id);
                if let Some(player2) = &game.player2 {
                    Self::unindex_player(&env, player2, game_id);
                }
                0
            }
            STATE_CLOSED => return Ok(()),
            _ => return Err(ChessChannelError::StateTransition),
        };

        game.lifecycle_state = STATE_CLOSED;
        Self::publish_state(&env, game_id, &game);
        EvGameClosed { game_id, refunded }.publish(&env);

        Self::write_game(&env, game_id, &game);
        Ok(())
    }

    /// Pay out the caller's settled balance. Returns the amount transferred.
    pub fn withdraw(env: Env, game_id: u32, player: Address) -> Result<i128, ChessChannelError> {
        player.require_auth();

        let mut game = Self::read_game(&env, game_id)?;
        let slot = Self::resolve_slot(&game, &player)?;
        if game.lifecycle_state != STATE_ENDED && game.lifecycle_state != STATE_CLOSED {
            return Err(ChessChannelError::StateTransition);
        }

        let balance = match slot {
            PLAYER_1 => &mut game.withdrawable1,
            _ => &mut game.withdrawable2,
        };
        let amount = *balance;
        if amount <= 0 {
            return Err(ChessChannelError::NothingToWithdraw);
        }
        *balance = 0;

        Self::push_payout(&env, &player, amount)?;
        EvWithdrawn {
            game_id,
            player,
            amount,
        }
        .publish(&env);

        Self::write_game(&env, game_id, &game);
        Ok(amount)
    }

    // ───────────────────────────────────────────────────────────────────────────
    //  Public: Read & Admin
    // ───────────────────────────────────────────────────────────────────────────

    pub fn get_game(env: Env, game_id: u32) -> Result<ChessGame, ChessChannelError> {
        Self::read_game(&env, game_id)
    }

    pub fn get_open_games(env: Env) -> Vec<u32> {
        Self::open_games(&env)
    }

    pub fn get_player_games(env: Env, player: Address) -> Vec<u32> {
        Self::player_games(&env, &player)
    }

    /// Current rating; players who never finished a game report the
    /// configured initial rating.
    pub fn get_rating(env: Env, player: Address) -> Result<PlayerRating, ChessChannelError> {
        let config = Self::load_config(&env)?;
        Ok(rating::load(&env, &player, config.initial_rating))
    }

    /// The digest peers sign for `state` in game `game_id`.
    pub fn state_hash(
        env: Env,
        game_id: u32,
        state: BytesN<128>,
    ) -> Result<BytesN<32>, ChessChannelError> {
        let board = Board::from_bytes(state.to_array())?;
        Ok(Self::hash_state(&env, &board, game_id).into())
    }

    pub fn get_config(env: Env) -> Result<ChannelConfig, ChessChannelError> {
        Self::load_config(&env)
    }

    pub fn set_config(env: Env, config: ChannelConfig) -> Result<(), ChessChannelError> {
        let admin = Self::load_admin(&env)?;
        admin.require_auth();
        if !Self::config_is_valid(&config) {
            return Err(ChessChannelError::InvalidConfig);
        }
        env.storage().instance().set(&StorageKey::Config, &config);
        Ok(())
    }

    pub fn get_admin(env: Env) -> Result<Address, ChessChannelError> {
        Self::load_admin(&env)
    }

    pub fn set_admin(env: Env, new_admin: Address) -> Result<(), ChessChannelError> {
        let admin = Self::load_admin(&env)?;
        admin.require_auth();
        env.storage().instance().set(&StorageKey::Admin, &new_admin);
        Ok(())
    }

    pub fn upgrade(env: Env, new_wasm_hash: BytesN<32>) -> Result<(), ChessChannelError> {
        let admin = Self::load_admin(&env)?;
        admin.require_auth();
        env.deployer().update_current_contract_wasm(new_wasm_hash);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    //  Internal: Play
    // ═══════════════════════════════════════════════════════════════════════════

    #[allow(clippy::too_many_arguments)]
    fn play(
        env: &Env,
        game_id: u32,
        game: &mut ChessGame,
        player: &Address,
        slot: u32,
        board: &Board,
        from: u32,
        to: u32,
        promotion: u32,
    ) -> Result<(), ChessChannelError> {
        if Self::side_of(game, slot) != board.side_to_move() {
            return Err(ChessChannelError::NotYourTurn);
        }
        let choice = Self::decode_promotion(promotion)?;
        if from >= 128 || to >= 128 {
            return Err(ChessChannelError::IllegalMove);
        }

        let next = apply_move(board, from as usize, to as usize, choice)?;
        game.board = BytesN::from_array(env, &next.to_bytes());
        game.last_move_at = env.ledger().timestamp();

        EvMove {
            game_id,
            player: player.clone(),
            from,
            to,
            promotion,
            move_number: next.move_count() as u32,
        }
        .publish(env);
        Self::publish_state(env, game_id, game);
        Ok(())
    }

    fn decode_promotion(code: u32) -> Result<Option<Piece>, ChessChannelError> {
        if code == PROMOTE_NONE {
            return Ok(None);
        }
        match Piece::from_code(code.min(i8::MAX as u32) as i8) {
            Some(piece) if piece.is_promotion_choice() => Ok(Some(piece)),
            _ => Err(ChessChannelError::InvalidPromotion),
        }
    }

    /// Moves are allowed while Active. During a pending claim the side it was
    /// raised against may still move, which cancels the claim.
    fn require_playable(
        env: &Env,
        game_id: u32,
        game: &mut ChessGame,
        player: &Address,
    ) -> Result<(), ChessChannelError> {
        match game.lifecycle_state {
            STATE_ACTIVE => Ok(()),
            STATE_TIMEOUT_CLAIMED => {
                let claim = Self::pending_claim(game)?;
                if claim.initiator == *player {
                    return Err(ChessChannelError::StateTransition);
                }
                game.pending = None;
                game.lifecycle_state = STATE_ACTIVE;
                Self::publish_state(env, game_id, game);
                Ok(())
            }
            _ => Err(ChessChannelError::StateTransition),
        }
    }

    /// Claims may only be raised while Active by the side waiting for the
    /// opponent to move. Returns the stored board.
    fn require_waiting(game: &ChessGame, slot: u32) -> Result<Board, ChessChannelError> {
        if game.lifecycle_state != STATE_ACTIVE {
            return Err(ChessChannelError::StateTransition);
        }
        let board = Self::stored_board(game)?;
        if Self::side_of(game, slot) == board.side_to_move() {
            return Err(ChessChannelError::StateTransition);
        }
        Ok(board)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    //  Internal: Claims & Settlement
    // ═══════════════════════════════════════════════════════════════════════════

    fn start_claim(env: &Env, game_id: u32, game: &mut ChessGame, kind: u32, initiator: Address) {
        let now = env.ledger().timestamp();
        let deadline = now.saturating_add(game.turn_timeout);
        game.pending = Some(PendingClaim {
            kind,
            initiator: initiator.clone(),
            started_at: now,
            deadline,
        });
        game.lifecycle_state = STATE_TIMEOUT_CLAIMED;

        Self::publish_state(env, game_id, game);
        EvGameTimeoutStarted {
            game_id,
            initiator,
            kind,
            deadline,
        }
        .publish(env);
    }

    fn pending_claim(game: &ChessGame) -> Result<PendingClaim, ChessChannelError> {
        if game.lifecycle_state != STATE_TIMEOUT_CLAIMED {
            return Err(ChessChannelError::StateTransition);
        }
        game.pending.clone().ok_or(ChessChannelError::StateTransition)
    }

    /// Win and timeout claims resolve in the claimant's favour; a draw offer
    /// resolves as a draw.
    fn claim_outcome(game: &ChessGame, claim: &PendingClaim) -> Result<Outcome, ChessChannelError> {
        if claim.kind == CLAIM_DRAW_OFFER {
            return Ok(OUTCOME_DRAW);
        }
        let slot = Self::resolve_slot(game, &claim.initiator)?;
        Ok(match Self::side_of(game, slot) {
            Side::White => OUTCOME_WHITE_WIN,
            Side::Black => OUTCOME_BLACK_WIN,
        })
    }

    fn settle(
        env: &Env,
        game_id: u32,
        game: &mut ChessGame,
        outcome: Outcome,
    ) -> Result<(), ChessChannelError> {
        let player2 = game
            .player2
            .clone()
            .ok_or(ChessChannelError::StateTransition)?;
        let (white, black) = if game.player1_white {
            (game.player1.clone(), player2)
        } else {
            (player2, game.player1.clone())
        };

        let pot = game.pot;
        let winner = match outcome {
            OUTCOME_WHITE_WIN => Some(white.clone()),
            OUTCOME_BLACK_WIN => Some(black.clone()),
            _ => None,
        };
        match &winner {
            Some(winner) if *winner == game.player1 => game.withdrawable1 += pot,
            Some(_) => game.withdrawable2 += pot,
            None => {
                // Odd unit goes to the initiator.
                let half = pot / 2;
                game.withdrawable1 += pot - half;
                game.withdrawable2 += half;
            }
        }
        game.pot = 0;
        game.outcome = outcome;
        game.winner = winner.clone();
        game.pending = None;
        game.lifecycle_state = STATE_ENDED;

        let config = Self::load_config(env)?;
        let (white_rating, black_rating) = rating::record(
            env,
            &white,
            &black,
            outcome,
            config.initial_rating,
            config.rating_floor,
        );

        Self::publish_state(env, game_id, game);
        EvGameEnded {
            game_id,
            outcome,
            winner,
            white_rating: white_rating.rating,
            black_rating: black_rating.rating,
        }
        .publish(env);
        EvRatingUpdate {
            game_id,
            player: white,
            rating: white_rating.rating,
        }
        .publish(env);
        EvRatingUpdate {
            game_id,
            player: black,
            rating: black_rating.rating,
        }
        .publish(env);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    //  Internal: Signatures
    // ═══════════════════════════════════════════════════════════════════════════

    fn hash_state(env: &Env, board: &Board, game_id: u32) -> Hash<32> {
        let preimage = state_preimage(board, game_id);
        env.crypto().keccak256(&Bytes::from_slice(env, &preimage))
    }

    fn verify_state_signature(
        env: &Env,
        game_id: u32,
        board: &Board,
        signature: &StateSignature,
        expected: &BytesN<65>,
    ) -> Result<(), ChessChannelError> {
        if signature.v > 3 {
            return Err(ChessChannelError::SignatureMismatch);
        }
        let digest = Self::hash_state(env, board, game_id);

        let mut rs = [0u8; 64];
        rs[..32].copy_from_slice(&signature.r.to_array());
        rs[32..].copy_from_slice(&signature.s.to_array());
        let recovered =
            env.crypto()
                .secp256k1_recover(&digest, &BytesN::from_array(env, &rs), signature.v);

        if recovered != *expected {
            return Err(ChessChannelError::SignatureMismatch);
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    //  Internal: Players
    // ═══════════════════════════════════════════════════════════════════════════

    fn resolve_slot(game: &ChessGame, player: &Address) -> Result<u32, ChessChannelError> {
        if *player == game.player1 {
            Ok(PLAYER_1)
        } else if game.player2.as_ref() == Some(player) {
            Ok(PLAYER_2)
        } else {
            Err(ChessChannelError::NotAPlayer)
        }
    }

    fn other_slot(slot: u32) -> u32 {
        if slot == PLAYER_1 {
            PLAYER_2
        } else {
            PLAYER_1
        }
    }

    fn side_of(game: &ChessGame, slot: u32) -> Side {
        if (slot == PLAYER_1) == game.player1_white {
            Side::White
        } else {
            Side::Black
        }
    }

    fn signer_of(game: &ChessGame, slot: u32) -> Result<BytesN<65>, ChessChannelError> {
        match slot {
            PLAYER_1 => Ok(game.signer1.clone()),
            _ => game.signer2.clone().ok_or(ChessChannelError::NotAPlayer),
        }
    }

    fn check_alias(alias: &String) -> Result<(), ChessChannelError> {
        if alias.len() > MAX_ALIAS_LEN {
            return Err(ChessChannelError::InvalidAlias);
        }
        Ok(())
    }

    fn config_is_valid(config: &ChannelConfig) -> bool {
        config.min_turn_timeout > 0
            && config.min_turn_timeout <= config.max_turn_timeout
            && config.initial_rating >= config.rating_floor
    }

    fn publish_state(env: &Env, game_id: u32, game: &ChessGame) {
        EvGameStateChanged {
            game_id,
            state: game.lifecycle_state,
        }
        .publish(env);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    //  Internal: Escrow
    // ═══════════════════════════════════════════════════════════════════════════

    fn pull_stake(env: &Env, player: &Address, amount: i128) -> Result<(), ChessChannelError> {
        if amount > 0 {
            let token = Self::load_token(env)?;
            token::Client::new(env, &token).transfer(
                player,
                &env.current_contract_address(),
                &amount,
            );
        }
        Ok(())
    }

    fn push_payout(env: &Env, player: &Address, amount: i128) -> Result<(), ChessChannelError> {
        if amount > 0 {
            let token = Self::load_token(env)?;
            token::Client::new(env, &token).transfer(
                &env.current_contract_address(),
                player,
                &amount,
            );
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    //  Internal: Registries & Storage
    // ═══════════════════════════════════════════════════════════════════════════

    fn next_game_id(env: &Env) -> u32 {
        let id: u32 = env
            .storage()
            .instance()
            .get(&StorageKey::NextGameId)
            .unwrap_or(1);
        env.storage()
            .instance()
            .set(&StorageKey::NextGameId, &(id + 1));
        id
    }

    fn open_games(env: &Env) -> Vec<u32> {
        env.storage()
            .instance()
            .get(&StorageKey::OpenGames)
            .unwrap_or(Vec::new(env))
    }

    fn unlist_open(env: &Env, game_id: u32) {
        let mut open = Self::open_games(env);
        if let Some(i) = open.first_index_of(game_id) {
            open.remove(i);
            env.storage().instance().set(&StorageKey::OpenGames, &open);
        }
    }

    fn player_games(env: &Env, player: &Address) -> Vec<u32> {
        env.storage()
            .persistent()
            .get(&StorageKey::PlayerGames(player.clone()))
            .unwrap_or(Vec::new(env))
    }

    fn write_player_games(env: &Env, player: &Address, games: &Vec<u32>) {
        let key = StorageKey::PlayerGames(player.clone());
        env.storage().persistent().set(&key, games);
        env.storage()
            .persistent()
            .extend_ttl(&key, GAME_TTL_LEDGERS, GAME_TTL_LEDGERS);
    }

    fn index_player(env: &Env, player: &Address, game_id: u32) {
        let mut games = Self::player_games(env, player);
        if !games.contains(game_id) {
            games.push_back(game_id);
            Self::write_player_games(env, player, &games);
        }
    }

    fn unindex_player(env: &Env, player: &Address, game_id: u32) {
        let mut games = Self::player_games(env, player);
        if let Some(i) = games.first_index_of(game_id) {
            games.remove(i);
            Self::write_player_games(env, player, &games);
        }
    }

    fn stored_board(game: &ChessGame) -> Result<Board, ChessChannelError> {
        Ok(Board::from_bytes(game.board.to_array())?)
    }

    fn read_game(env: &Env, game_id: u32) -> Result<ChessGame, ChessChannelError> {
        env.storage()
            .persistent()
            .get(&StorageKey::Game(game_id))
            .ok_or(ChessChannelError::GameNotFound)
    }

    fn write_game(env: &Env, game_id: u32, game: &ChessGame) {
        let key = StorageKey::Game(game_id);
        env.storage().persistent().set(&key, game);
        env.storage()
            .persistent()
            .extend_ttl(&key, GAME_TTL_LEDGERS, GAME_TTL_LEDGERS);
        // Keep instance storage (admin, token, config, open list) alive
        env.storage()
            .instance()
            .extend_ttl(GAME_TTL_LEDGERS, GAME_TTL_LEDGERS);
    }

    fn load_admin(env: &Env) -> Result<Address, ChessChannelError> {
        env.storage()
            .instance()
            .get(&StorageKey::Admin)
            .ok_or(ChessChannelError::AdminNotSet)
    }

    fn load_token(env: &Env) -> Result<Address, ChessChannelError> {
        env.storage()
            .instance()
            .get(&StorageKey::Token)
            .ok_or(ChessChannelError::TokenNotSet)
    }

    fn load_config(env: &Env) -> Result<ChannelConfig, ChessChannelError> {
        env.storage()
            .instance()
            .get(&StorageKey::Config)
            .ok_or(ChessChannelError::ConfigNotSet)
    }
}
