//! Session state machine and streaming turn loop (spec §4.5, component C6):
//! one [`engine::SessionEngine`] task per live session, driven entirely by
//! frames arriving on its [`engine::SessionHandle`].

pub mod checklist;
pub mod collaborators;
pub mod engine;
pub mod metrics;
pub mod prompt;

pub use checklist::Checklist;
pub use collaborators::SessionCollaborators;
pub use engine::{start, SessionHandle, SubmitOutcome};
