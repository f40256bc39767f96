use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a single recall point's memory model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardState {
    New,
    Learning,
    Review,
    Relearning,
}

impl std::fmt::Display for CardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CardState::New => "new",
            CardState::Learning => "learning",
            CardState::Review => "review",
            CardState::Relearning => "relearning",
        };
        write!(f, "{s}")
    }
}

/// The grade a reviewer assigns to one recall attempt.
///
/// Derived from evaluator confidence via [`Rating::from_confidence`] —
/// callers outside the evaluator should rarely construct this directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Again,
    Hard,
    Good,
    Easy,
}

impl Rating {
    /// Map an evaluator confidence in `[0,1]` to a rating.
    ///
    /// Boundaries are half-open on the low end: `0.3` maps to `Hard`,
    /// `0.85` maps to `Easy`. Values outside `[0,1]` are clamped.
    pub fn from_confidence(confidence: f64) -> Self {
        let c = confidence.clamp(0.0, 1.0);
        if c < 0.3 {
            Rating::Again
        } else if c < 0.6 {
            Rating::Hard
        } else if c < 0.85 {
            Rating::Good
        } else {
            Rating::Easy
        }
    }
}

impl std::fmt::Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Rating::Again => "again",
            Rating::Hard => "hard",
            Rating::Good => "good",
            Rating::Easy => "easy",
        };
        write!(f, "{s}")
    }
}

/// Per-point FSRS memory state.
///
/// `difficulty` is clamped to `[1,10]`; `stability` is days until
/// retrievability decays to the configured desired retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsrsState {
    pub difficulty: f64,
    pub stability: f64,
    pub due: DateTime<Utc>,
    pub last_review: Option<DateTime<Utc>>,
    pub reps: u32,
    pub lapses: u32,
    pub state: CardState,
}

impl FsrsState {
    /// True when this state has never been reviewed.
    pub fn is_new(&self) -> bool {
        self.state == CardState::New && self.reps == 0 && self.last_review.is_none()
    }
}

/// Tunable weights and targets for the FSRS algorithm.
///
/// Defaults are the commonly published FSRS-4.5 parameter set. Callers
/// that have fit their own weights from review logs may substitute them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsrsParameters {
    /// The 19 weighted parameters `w0..w18`.
    pub w: [f64; 19],
    /// Target retrievability at the due date, e.g. `0.9`.
    pub desired_retention: f64,
    /// Floor applied to `stability` after every update.
    pub minimum_stability: f64,
    /// Initial difficulty/stability used by [`crate::create_initial_state`].
    pub initial_difficulty: f64,
    pub initial_stability: f64,
}

impl Default for FsrsParameters {
    fn default() -> Self {
        Self {
            w: [
                0.4072, 1.1829, 3.1262, 15.4722, 7.2102, 0.5316, 1.0651, 0.0234, 1.616, 0.1544,
                1.0824, 1.9813, 0.0953, 0.2975, 2.2042, 0.2407, 2.9466, 0.5034, 0.6567,
            ],
            desired_retention: 0.9,
            minimum_stability: 0.04,
            initial_difficulty: 5.0,
            initial_stability: 1.0,
        }
    }
}
