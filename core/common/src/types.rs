//! Common types used throughout targpg.

use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Access mode of an archive container's backing buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerMode {
    /// Members can be enumerated and their content read.
    Read,
    /// Members can only be appended.
    Write,
}

impl fmt::Display for ContainerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerMode::Read => write!(f, "read"),
            ContainerMode::Write => write!(f, "write"),
        }
    }
}

/// Strip trailing separators from a member name.
///
/// `docs/` and `docs` name the same member.
pub fn clean_name(name: &str) -> &str {
    name.trim_end_matches('/')
}

/// Canonical name of a member inside the archive.
///
/// Always `/`-separated and never carries a trailing separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberName(String);

impl MemberName {
    /// Create a member name, stripping any trailing separator.
    ///
    /// # Errors
    /// - Returns error if nothing is left after cleaning
    pub fn new(name: impl AsRef<str>) -> crate::Result<Self> {
        let cleaned = clean_name(name.as_ref());
        if cleaned.is_empty() {
            return Err(crate::Error::InvalidInput(format!(
                "'{}' is not a valid member name",
                name.as_ref()
            )));
        }
        Ok(Self(cleaned.to_string()))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether dropping this name also drops `other`.
    ///
    /// True for the name itself and for anything stored beneath it.
    pub fn covers(&self, other: &str) -> bool {
        let other = clean_name(other);
        other == self.0
            || other
                .strip_prefix(self.0.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl fmt::Display for MemberName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for MemberName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Archive password that zeroizes on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Passphrase(String);

impl Passphrase {
    /// Wrap a password string.
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    /// Get the password bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Constant-time comparison with another passphrase.
    pub fn matches(&self, other: &Passphrase) -> bool {
        self.as_bytes().ct_eq(other.as_bytes()).into()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Passphrase([REDACTED])")
    }
}
