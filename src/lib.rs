//! `attune` - stage-gated two-party conversation backend.
//!
//! A five-stage mediated conversation protocol with an empathy
//! reconciliation engine: participants draft guesses at each other's
//! feelings, a gap analyzer scores them, and gated sharing cycles close
//! the gap before anything is mutually revealed.

pub mod analyzer;
pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod gate;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reconciler;
pub mod stage;
pub mod store;
