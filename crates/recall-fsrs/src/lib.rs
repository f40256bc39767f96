//! `recall-fsrs` — the Free Spaced Repetition Scheduler transition function.
//!
//! # Overview
//!
//! This crate has no I/O and no async runtime. It exposes a single pure,
//! total transition function — [`update`] — plus [`create_initial_state`]
//! for brand-new recall points. Everything else in the repository treats
//! this crate as a leaf: the session engine calls `update` once per
//! demonstrated point and persists the result through a repository trait
//! it owns, never through this crate.
//!
//! # Rating mapping
//!
//! Evaluator confidence in `[0,1]` maps to a [`Rating`] via
//! [`Rating::from_confidence`]: `[0,0.3)→Again, [0.3,0.6)→Hard,
//! [0.6,0.85)→Good, [0.85,1]→Easy`.

pub mod algorithm;
pub mod types;

pub use algorithm::{create_initial_state, retrievability_at, update};
pub use types::{CardState, FsrsParameters, FsrsState, Rating};
