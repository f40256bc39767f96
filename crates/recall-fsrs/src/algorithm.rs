//! The FSRS transition function: pure, deterministic, total.
//!
//! Given a prior [`FsrsState`], a [`Rating`], and the instant of review,
//! [`update`] computes the next memory state. No I/O, no randomness, no
//! clock reads — callers supply `reviewed_at` explicitly so the whole
//! pipeline stays testable against an injected [`recall_core`]-style clock.

use chrono::{DateTime, Utc};

use crate::types::{CardState, FsrsParameters, FsrsState, Rating};

/// Longest interval FSRS will ever schedule, in days.
const MAX_INTERVAL_DAYS: f64 = 36_500.0;
/// Shortest interval FSRS will ever schedule, in days.
const MIN_INTERVAL_DAYS: f64 = 1.0;

/// Build the state for a point that has never been reviewed.
pub fn create_initial_state(now: DateTime<Utc>, params: &FsrsParameters) -> FsrsState {
    FsrsState {
        difficulty: params.initial_difficulty.clamp(1.0, 10.0),
        stability: params.initial_stability.max(params.minimum_stability),
        due: now,
        last_review: None,
        reps: 0,
        lapses: 0,
        state: CardState::New,
    }
}

/// Apply one review outcome, returning the next [`FsrsState`].
///
/// Total: defined for every `(prior, rating, reviewed_at)` triple. Never
/// returns `stability < params.minimum_stability`; `due >= reviewed_at`
/// always, and strictly greater for any rating but `Again` on a state
/// that was already reviewed at least once at `reviewed_at`.
pub fn update(prior: &FsrsState, rating: Rating, reviewed_at: DateTime<Utc>, params: &FsrsParameters) -> FsrsState {
    let elapsed_days = if let Some(last) = prior.last_review {
        (reviewed_at - last).num_seconds().max(0) as f64 / 86_400.0
    } else {
        0.0
    };

    let retrievability = if prior.is_new() {
        1.0
    } else {
        retrievability_at(elapsed_days, prior.stability)
    };

    let next_difficulty = next_difficulty(prior.difficulty, rating, params);
    let next_stability = next_stability(prior, rating, retrievability, next_difficulty, params);

    let next_state = match (prior.state, rating) {
        (CardState::New, Rating::Again) => CardState::Learning,
        (CardState::New, _) => CardState::Review,
        (CardState::Learning, Rating::Again) => CardState::Learning,
        (CardState::Learning, _) => CardState::Review,
        (CardState::Review, Rating::Again) => CardState::Relearning,
        (CardState::Review, _) => CardState::Review,
        (CardState::Relearning, Rating::Again) => CardState::Relearning,
        (CardState::Relearning, _) => CardState::Review,
    };

    let interval_days = interval_for(next_stability, params.desired_retention)
        .clamp(MIN_INTERVAL_DAYS, MAX_INTERVAL_DAYS);
    let due = reviewed_at + chrono::Duration::seconds((interval_days * 86_400.0).round() as i64);

    FsrsState {
        difficulty: next_difficulty,
        stability: next_stability.max(params.minimum_stability),
        due,
        last_review: Some(reviewed_at),
        reps: prior.reps + 1,
        lapses: if rating == Rating::Again && prior.state != CardState::New {
            prior.lapses + 1
        } else {
            prior.lapses
        },
        state: next_state,
    }
}

/// Retrievability (probability of successful recall) after `elapsed_days`
/// with memory stability `stability` days.
///
/// `R(t, S) = (1 + t / (9S))^-1` — the FSRS forgetting curve, chosen so
/// `R(S, S) = 0.9`, matching `interval_for`'s inverse at the default
/// desired retention.
pub fn retrievability_at(elapsed_days: f64, stability: f64) -> f64 {
    if stability <= 0.0 {
        return 0.0;
    }
    1.0 / (1.0 + elapsed_days / (9.0 * stability))
}

/// Inverse of [`retrievability_at`]: the interval (days) at which
/// retrievability decays to `desired_retention` for a card of the given
/// `stability`.
fn interval_for(stability: f64, desired_retention: f64) -> f64 {
    let r = desired_retention.clamp(0.001, 0.999);
    9.0 * stability * (1.0 / r - 1.0)
}

fn next_difficulty(prior: f64, rating: Rating, params: &FsrsParameters) -> f64 {
    let delta = rating_weight(rating) - 3.0;
    let shifted = prior - params.w[6] * delta;
    // Mean-reversion toward the "Easy" initial difficulty, per FSRS-4.5.
    let easy_anchor = (params.w[4] - (params.w[5] * (4.0 - 1.0)).exp() + 1.0).clamp(1.0, 10.0);
    let reverted = params.w[7] * easy_anchor + (1.0 - params.w[7]) * shifted;
    reverted.clamp(1.0, 10.0)
}

fn next_stability(
    prior: &FsrsState,
    rating: Rating,
    retrievability: f64,
    next_difficulty: f64,
    params: &FsrsParameters,
) -> f64 {
    // `rating as usize` is safe: Rating is a field-less 4-variant enum whose
    // discriminants 0..3 index the first four FSRS weights w0..w3.
    if prior.is_new() {
        return params.w[rating as usize].max(params.minimum_stability);
    }

    if rating == Rating::Again {
        // Post-lapse stability resets to a small fraction of the prior value.
        return (params.w[11]
            * prior.difficulty.powf(-params.w[12])
            * ((prior.stability + 1.0).powf(params.w[13]) - 1.0)
            * (params.w[14] * (1.0 - retrievability)).exp())
        .max(params.minimum_stability);
    }

    let hard_penalty = if rating == Rating::Hard { params.w[15] } else { 1.0 };
    let easy_bonus = if rating == Rating::Easy { params.w[16] } else { 1.0 };

    let growth = (params.w[8]).exp()
        * (11.0 - next_difficulty)
        * prior.stability.powf(-params.w[9])
        * ((params.w[10] * (1.0 - retrievability)).exp() - 1.0)
        * hard_penalty
        * easy_bonus;

    (prior.stability * (1.0 + growth)).max(params.minimum_stability)
}

/// Numeric grade (1..4) used by the difficulty-shift term.
fn rating_weight(rating: Rating) -> f64 {
    match rating {
        Rating::Again => 1.0,
        Rating::Hard => 2.0,
        Rating::Good => 3.0,
        Rating::Easy => 4.0,
    }
}
