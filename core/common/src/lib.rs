//! Common utilities and types shared across targpg modules.
//!
//! This module provides the error type and the small value types
//! (member names, passphrases, container modes) every other crate uses.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{clean_name, ContainerMode, MemberName, Passphrase};
