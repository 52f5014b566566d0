//! # csvault core
//!
//! Storage-agnostic logic for csvault: the row normalizer, the recovery
//! parser, content hashing, the dedup gate, table materialization, the
//! store abstraction, keyword search, and the import engine that ties
//! them together.
//!
//! This crate does no filesystem or database I/O of its own. The binary
//! crate supplies readers and a [`store::Store`] implementation; tests use
//! [`store::memory::InMemoryStore`].

pub mod dedup;
pub mod error;
pub mod hash;
pub mod import;
pub mod models;
pub mod normalize;
pub mod recovery;
pub mod search;
pub mod store;
pub mod table;
