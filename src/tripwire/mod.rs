//! Tripwire — BLAKE3 content hashing for the `File.watched` drift check
//! and the append-only provenance event log.

pub mod eventlog;
pub mod hasher;
