//! Local memory daemon for coding agents.
//!
//! `memoryd` keeps short-lived hook processes fast by holding the expensive
//! parts of the memory system in one long-lived process: a bounded pool of
//! SQLite connections, a TTL cache of repository identifiers, and a bounded
//! queue feeding a background worker that extracts learnings from session
//! transcripts with an LLM.
//!
//! Clients talk to it over a Unix socket with newline-delimited JSON. Every
//! operation degrades gracefully: a missing daemon, an unreachable database or
//! a slow backend yields empty results, never an error in the caller's face.
//!
//! # Modules
//!
//! - [`config`] - TOML configuration with environment overrides
//! - [`db`] - connection setup, schema, migrations and the connection pool
//! - [`memory`] - learnings: types, save path, scope-cascading search, dedup
//! - [`repo`] - repository identification and its TTL cache
//! - [`extraction`] - extraction queue, transcript handling, LLM extractor, worker
//! - [`server`] - socket server, request dispatch, health loop, PID file
//! - [`client`] - degrading client for hooks and tools

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod extraction;
pub mod memory;
pub mod repo;
pub mod server;

pub use error::{DaemonError, Result};
