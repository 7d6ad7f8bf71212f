//! Testing utilities and mock implementations
//!
//! Mock providers, extractors and handlers for exercising the router without
//! embedding or language-model services.

pub mod mocks;

pub use mocks::*;
