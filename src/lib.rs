//! # csvault
//!
//! Deduplicating CSV import into SQLite, with keyword search.
//!
//! The storage-agnostic engine (parsing, hashing, dedup, table
//! materialization, search) lives in the `csvault-core` crate. This crate
//! adds everything that touches the outside world: configuration, the
//! SQLite store, the folder scanner, and the CLI commands.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │ Folder scan │──▶│  Import engine    │──▶│    SQLite     │
//! │  *.csv      │   │ parse+hash+dedup │   │ tables+hashes │
//! └─────────────┘   └──────────────────┘   └──────┬───────┘
//!                                                  │
//!                                                  ▼
//!                                           ┌──────────────┐
//!                                           │ Keyword search│
//!                                           └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`migrate`] | Bookkeeping schema |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` trait |
//! | [`scan`] | Import folder scanner |
//! | [`ingest`] | `import` command |
//! | [`search`] | `search` command |
//! | [`stats`] | `stats` command |
//! | [`progress`] | Import progress on stderr |

pub mod config;
pub mod ingest;
pub mod migrate;
pub mod progress;
pub mod scan;
pub mod search;
pub mod sqlite_store;
pub mod stats;
