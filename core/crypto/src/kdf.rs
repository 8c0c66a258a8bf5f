//! Key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use crate::keys::{ArchiveKey, Salt, KEY_LENGTH};
use targpg_common::{Error, Result};

/// Largest memory cost accepted from an archive header, in KiB (1 GiB).
pub const MAX_MEMORY_COST: u32 = 1 << 20;

/// Largest iteration count accepted from an archive header.
pub const MAX_TIME_COST: u32 = 16;

/// Largest degree of parallelism accepted from an archive header.
pub const MAX_PARALLELISM: u32 = 16;

/// Parameters for Argon2id key derivation.
///
/// The parameters used for an archive travel in its envelope header, so an
/// archive sealed at any strength opens with nothing but the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    ///
    /// These parameters provide a balance between security and usability,
    /// targeting approximately 0.5-1 second of derivation time.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for constrained machines.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Look up a preset by name: `interactive`, `moderate` or `sensitive`.
    pub fn from_strength(strength: &str) -> Result<Self> {
        match strength {
            "interactive" => Ok(Self::interactive()),
            "moderate" => Ok(Self::moderate()),
            "sensitive" => Ok(Self::sensitive()),
            other => Err(Error::InvalidInput(format!(
                "Unknown KDF strength '{}'; use interactive, moderate or sensitive",
                other
            ))),
        }
    }

    /// Whether every parameter is within the accepted caps.
    ///
    /// Header parameters are read before anything is authenticated, so
    /// they are checked against these caps before any key is derived.
    pub fn within_limits(&self) -> bool {
        self.memory_cost <= MAX_MEMORY_COST
            && self.time_cost <= MAX_TIME_COST
            && self.parallelism <= MAX_PARALLELISM
    }

    fn to_argon2(&self) -> Result<Params> {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(KEY_LENGTH),
        )
        .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Derive an archive key from a password and salt using Argon2id.
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - Returns error if password is empty
/// - Returns error if Argon2id parameters are invalid
///
/// # Security
/// - Password is not stored or logged
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<ArchiveKey> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);

    let mut key_bytes = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(password, salt.as_bytes(), &mut key_bytes)
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

    Ok(ArchiveKey::from_bytes(key_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> KdfParams {
        KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_derive_key_deterministic() {
        let password = b"test-password-123";
        let salt = Salt::from_bytes([42u8; 32]);

        let key1 = derive_key(password, &salt, &cheap()).unwrap();
        let key2 = derive_key(password, &salt, &cheap()).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_salt() {
        let password = b"test-password-123";
        let salt1 = Salt::from_bytes([1u8; 32]);
        let salt2 = Salt::from_bytes([2u8; 32]);

        let key1 = derive_key(password, &salt1, &cheap()).unwrap();
        let key2 = derive_key(password, &salt2, &cheap()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_password() {
        let salt = Salt::from_bytes([42u8; 32]);

        let key1 = derive_key(b"password1", &salt, &cheap()).unwrap();
        let key2 = derive_key(b"password2", &salt, &cheap()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_empty_password_fails() {
        let salt = Salt::generate();
        assert!(derive_key(b"", &salt, &cheap()).is_err());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = KdfParams {
            memory_cost: 1,
            time_cost: 0,
            parallelism: 1,
        };
        let result = derive_key(b"password", &Salt::generate(), &params);
        assert!(matches!(result, Err(Error::Crypto(_))));
    }

    #[test]
    fn test_presets_within_limits() {
        assert!(KdfParams::interactive().within_limits());
        assert!(KdfParams::moderate().within_limits());
        assert!(KdfParams::sensitive().within_limits());
        assert!(cheap().within_limits());
    }

    #[test]
    fn test_oversized_params_outside_limits() {
        let huge_memory = KdfParams {
            memory_cost: u32::MAX,
            ..cheap()
        };
        let huge_time = KdfParams {
            time_cost: MAX_TIME_COST + 1,
            ..cheap()
        };
        let huge_lanes = KdfParams {
            parallelism: MAX_PARALLELISM + 1,
            ..cheap()
        };
        assert!(!huge_memory.within_limits());
        assert!(!huge_time.within_limits());
        assert!(!huge_lanes.within_limits());
    }

    #[test]
    fn test_from_strength() {
        assert_eq!(
            KdfParams::from_strength("moderate").unwrap(),
            KdfParams::moderate()
        );
        assert_eq!(KdfParams::default(), KdfParams::interactive());
        assert!(KdfParams::from_strength("extreme").is_err());
    }
}
