//! Language-model provider layer used by the intent extractor

pub mod provider;
pub mod providers;

pub use provider::*;
pub use providers::*;
