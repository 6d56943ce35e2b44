//! lakeforge: per-environment data lake and ML platform stacks.
//!
//! Components declare provider resource descriptors, the composition
//! driver wires them into one template, and an external orchestrator
//! deploys it. BLAKE3 state hashing and a JSONL provenance log track
//! what was deployed.

pub mod cli;
pub mod components;
pub mod core;
pub mod transport;
pub mod tripwire;
