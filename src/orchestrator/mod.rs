//! Session orchestration modules.
//!
//! Covers agent process spawning, the session registry, and the stop and
//! restart protocols.

pub mod spawner;
