//! Numa - voice-first personal finance assistant
//!
//! A conversational pipeline that:
//! - Transcribes short voice utterances and classifies them through a
//!   deterministic 3-level cascade (Validity → Domain → Financial Resolution)
//! - Records financial movements in a multi-tenant ledger with a
//!   PROVISIONAL → VERIFIED / VERIFIED_MANUAL state machine
//! - Answers queries from deterministic aggregations; the reasoning model
//!   only rephrases precomputed figures, never produces them
//!
//! PIPELINE:
//! AUDIO → TRANSCRIBE → CLASSIFY → DISPATCH → RESPOND

pub mod api;
pub mod config;
pub mod error;
pub mod fim;
pub mod ledger;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod taxonomy;

pub use error::{NumaError, Result};

// Re-export common types
pub use config::NumaConfig;
pub use fim::IntentMotor;
pub use ledger::{Ledger, NewTransaction};
pub use models::*;
pub use orchestrator::Orchestrator;
pub use taxonomy::Category;
