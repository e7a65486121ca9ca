//! Library root — the binary in `src/main.rs` and the integration tests under
//! `tests/` both build on these modules.

pub mod config;
pub mod error;
pub mod llm;
pub mod logger;
pub mod session;
