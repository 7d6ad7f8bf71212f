//! Concrete `LlmProvider` backends

pub mod openai;

pub use openai::*;
