//! Wire protocol for the tutoring transport (spec §4.6): the tagged JSON
//! frames a client and the session engine exchange over one channel per
//! session (a WebSocket, in the reference gateway).

pub mod frames;

pub use frames::{ClientFrame, Correction, MetricsSummary, ServerFrame, SourceKind};
