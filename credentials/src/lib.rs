//! # Credential Pool
//!
//! Rotates model API credentials least-recently-used first and takes
//! credentials out of rotation after repeated failures.

pub mod pool;

pub use pool::{Credential, CredentialPool};
