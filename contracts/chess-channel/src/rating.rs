//! Integer ELO bookkeeping for channel players.
//!
//! Ratings live in persistent storage keyed by address and are touched only
//! when a game settles.

use soroban_sdk::{contracttype, Address, Env};

use crate::{StorageKey, OUTCOME_WHITE_WIN, OUTCOME_BLACK_WIN};

const K_NEW: u32 = 32; // players with fewer than ESTABLISHED_AFTER games
const K_ESTABLISHED: u32 = 16;
const ESTABLISHED_AFTER: u32 = 30;

// Ledger rate is approximately 5 seconds per ledger on Stellar
const LEDGER_RATE_SECS: u32 = 5;

// 120 days
const TTL_SECONDS: u32 = 120 * 24 * 60 * 60;
const TTL_LEDGERS: u32 = TTL_SECONDS / LEDGER_RATE_SECS;

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlayerRating {
    pub rating: u32,
    pub games_played: u32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub last_updated: u64,
}

impl PlayerRating {
    pub(crate) fn fresh(rating: u32) -> Self {
        PlayerRating {
            rating,
            games_played: 0,
            wins: 0,
            losses: 0,
            draws: 0,
            last_updated: 0,
        }
    }

    fn k_factor(&self) -> u32 {
        if self.games_played < ESTABLISHED_AFTER {
            K_NEW
        } else {
            K_ESTABLISHED
        }
    }
}

pub(crate) fn load(env: &Env, player: &Address, initial: u32) -> PlayerRating {
    env.storage()
        .persistent()
        .get(&StorageKey::Rating(player.clone()))
        .unwrap_or_else(|| PlayerRating::fresh(initial))
}

fn save(env: &Env, player: &Address, rating: &PlayerRating) {
    let key = StorageKey::Rating(player.clone());
    env.storage().persistent().set(&key, rating);
    env.storage()
        .persistent()
        .extend_ttl(&key, TTL_LEDGERS, TTL_LEDGERS);
}

/// Applies one finished game to both players and returns their new ratings
/// in `(white, black)` order.
pub(crate) fn record(
    env: &Env,
    white: &Address,
    black: &Address,
    outcome: u32,
    initial: u32,
    floor: u32,
) -> (PlayerRating, PlayerRating) {
    let now = env.ledger().timestamp();
    let mut r1 = load(env, white, initial);
    let mut r2 = load(env, black, initial);

    let (new1, new2) = calculate(
        r1.rating,
        r2.rating,
        outcome,
        r1.k_factor(),
        r2.k_factor(),
        floor,
    );

    r1.rating = new1;
    r2.rating = new2;
    match outcome {
        OUTCOME_WHITE_WIN => {
            r1.wins += 1;
            r2.losses += 1;
        }
        OUTCOME_BLACK_WIN => {
            r2.wins += 1;
            r1.losses += 1;
        }
        _ => {
            r1.draws += 1;
            r2.draws += 1;
        }
    }
    for r in [&mut r1, &mut r2] {
        r.games_played += 1;
        r.last_updated = now;
    }

    save(env, white, &r1);
    save(env, black, &r2);
    (r1, r2)
}

/// New ratings after a game. `outcome` uses the lifecycle outcome codes;
/// anything that is not a player win counts as a draw.
pub(crate) fn calculate(
    rating1: u32,
    rating2: u32,
    outcome: u32,
    k1: u32,
    k2: u32,
    floor: u32,
) -> (u32, u32) {
    // gap > 0 means the second player is the higher rated
    let gap = rating2 as i64 - rating1 as i64;
    let expected1 = expected_score_pct(gap);
    let expected2 = expected_score_pct(-gap);

    let (actual1, actual2) = match outcome {
        OUTCOME_WHITE_WIN => (100i64, 0i64),
        OUTCOME_BLACK_WIN => (0, 100),
        _ => (50, 50),
    };

    let mut change1 = k1 as i64 * (actual1 - expected1) / 100;
    let mut change2 = k2 as i64 * (actual2 - expected2) / 100;

    // A decisive result always moves both ratings.
    match outcome {
        OUTCOME_WHITE_WIN => {
            change1 = change1.max(1);
            change2 = change2.min(-1);
        }
        OUTCOME_BLACK_WIN => {
            change1 = change1.min(-1);
            change2 = change2.max(1);
        }
        _ => {}
    }

    let apply = |rating: u32, change: i64| (rating as i64 + change).max(floor as i64) as u32;
    (apply(rating1, change1), apply(rating2, change2))
}

/// Expected score (0-100) of a player facing an opponent rated `gap` points
/// higher. Symmetric: `expected(g) + expected(-g) == 100`.
fn expected_score_pct(gap: i64) -> i64 {
    let underdog = match gap.unsigned_abs() {
        0 => 50,
        d if d <= 50 => 43,
        d if d <= 100 => 36,
        d if d <= 200 => 24,
        d if d <= 300 => 15,
        _ => 8,
    };
    if gap >= 0 {
        underdog
    } else {
        100 - underdog
    }
}
