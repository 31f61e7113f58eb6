//! Test utilities and fixtures for Chunkline
//!
//! Shared by the integration tests of `chunkline-core` (tests/ directory).
//! Unit tests inside `chunkline-core` cannot depend on this crate.

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use harness::{init_tracing, Harness};
