//! Proof-of-work sealing for the OMNI ledger.

pub mod pow_engine;

pub use pow_engine::{CancelToken, ProofOfWork, DEFAULT_CHECK_INTERVAL};
