//! Encrypted persistent idempotency store (spec §4.4 / §6, component C4).

pub mod encrypted_kv;
pub mod tracker;

pub use encrypted_kv::EncryptedStore;
pub use tracker::{hash_url, FailedKeywordRecord, Tracker};
