//! Stratus Core
//!
//! Core library for managing cloud resources whose operations complete
//! asynchronously: the resource model, provider traits, and the waiters that
//! converge on remote state.

pub mod provider;
pub mod registry;
pub mod resource;
pub mod wait;
