//! Transcription pipeline (spec §4.4, component C5): turns raw
//! voice-transcribed text into display-ready and LLM-context text, with
//! terminology correction and notation detection.

mod config;
mod json;
mod notation;
mod process;

pub use config::{extract_terminology, TranscriptionConfig};
pub use notation::has_notation;
pub use process::{process, Correction, ProcessedText, SourceKind};
