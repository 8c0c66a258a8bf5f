//! Cryptographic primitives for targpg.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption using XChaCha20-Poly1305
//! - The password envelope that wraps an archive on disk
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged

pub mod aead;
pub mod envelope;
pub mod kdf;
pub mod keys;

pub use envelope::{open, seal};
pub use kdf::{derive_key, KdfParams};
pub use keys::{ArchiveKey, Salt};
