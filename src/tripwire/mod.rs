//! Tripwire: BLAKE3 hashing and provenance event log.

pub mod eventlog;
pub mod hasher;
