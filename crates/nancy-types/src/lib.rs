//! Nancy shared types and utilities
//!
//! This crate provides the common types, error taxonomy, configuration
//! schema, and the Knowledge Packet / Query Intent data models shared
//! across all Nancy crates. It has no I/O and no dependency on any
//! particular storage brain.

pub mod common;
pub mod config;
pub mod error;
pub mod intent;
pub mod packet;
pub mod storage;

// Re-export everything for easy access
pub use common::*;
pub use config::*;
pub use error::*;
pub use intent::*;
pub use packet::*;
pub use storage::*;
