//! Empathy reconciliation: engine, share offers, refinement loop.

pub mod engine;
pub mod offer;
pub mod refinement;

pub use engine::ReconcilerEngine;
pub use offer::{OfferAction, ShareOfferCoordinator};
pub use refinement::RefinementCoordinator;
