//! # microloop-core
//!
//! Core types and traits for the microloop reactor.
//!
//! This crate holds the contract between the reactor and everything it
//! drives. It contains no reactor or pool logic; the concrete loop, the
//! worker pool and the bundled sources live in `microloop`.
//!
//! ## Modules
//!
//! - `source` - `EventSource` trait and the `Interest` readiness mask
//! - `error` - kernel facility errors and loop errors
//! - `kprint` - Kernel-style leveled stderr logging macros
//! - `env` - Environment variable utilities

pub mod source;
pub mod error;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use source::{EventSource, Interest, NO_FD};
pub use error::{KernelError, LoopError, LoopResult};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str};
