//! Shared types for the Tutorbench evaluation harness.
//!
//! Everything other crates agree on lives here: the error type, the
//! configuration tree, run/result records, the dialogue transcript model,
//! progress journal events, and structured trace events. This crate does no
//! I/O of its own.

pub mod config;
pub mod dialogue;
pub mod error;
pub mod progress;
pub mod record;
pub mod trace;

pub use error::{Error, Result};
