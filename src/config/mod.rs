//! Configuration loading and validation.

pub mod schema;

pub use schema::{
    AnalyzerConfig, AttuneConfig, ReconcilerConfig, ServerConfig, SharingDeclinePolicy,
    load_config,
};
