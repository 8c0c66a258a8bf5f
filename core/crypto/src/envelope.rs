//! Password envelope around the compressed archive bytes.
//!
//! Layout on disk:
//!
//! ```text
//! MAGIC (6) | version (1) | header length (u32 LE) | header JSON | nonce || ciphertext || tag
//! ```
//!
//! The header carries the salt and KDF parameters used to seal the archive.
//! Everything before the AEAD body is authenticated as associated data.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aead;
use crate::kdf::{derive_key, KdfParams};
use crate::keys::Salt;
use targpg_common::{Error, Passphrase, Result};

/// File magic identifying a targpg archive.
pub const MAGIC: &[u8; 6] = b"TARGPG";

/// Envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Upper bound on the header size accepted when opening.
const MAX_HEADER_LEN: usize = 4096;

const PREFIX_LEN: usize = MAGIC.len() + 1 + 4;

#[derive(Debug, Serialize, Deserialize)]
struct EnvelopeHeader {
    salt: Salt,
    kdf_params: KdfParams,
}

/// Encrypt `plaintext` under `password`.
///
/// A fresh salt and nonce are drawn on every call, so sealing the same
/// bytes twice never yields the same output.
///
/// # Errors
/// - `Error::Encryption` on any failure, including an empty password
pub fn seal(plaintext: &[u8], password: &Passphrase, params: &KdfParams) -> Result<Vec<u8>> {
    seal_inner(plaintext, password, params).map_err(|e| match e {
        Error::Encryption(_) => e,
        other => Error::Encryption(other.to_string()),
    })
}

fn seal_inner(plaintext: &[u8], password: &Passphrase, params: &KdfParams) -> Result<Vec<u8>> {
    if !params.within_limits() {
        return Err(Error::Encryption(
            "KDF parameters exceed the supported limits".to_string(),
        ));
    }

    let header = EnvelopeHeader {
        salt: Salt::generate(),
        kdf_params: params.clone(),
    };
    let header_bytes =
        serde_json::to_vec(&header).map_err(|e| Error::Serialization(e.to_string()))?;

    let key = derive_key(password.as_bytes(), &header.salt, &header.kdf_params)?;

    let mut sealed = Vec::with_capacity(PREFIX_LEN + header_bytes.len() + plaintext.len() + 64);
    sealed.extend_from_slice(MAGIC);
    sealed.push(ENVELOPE_VERSION);
    sealed.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    sealed.extend_from_slice(&header_bytes);

    let body = aead::encrypt(&key, plaintext, &sealed)?;
    sealed.extend_from_slice(&body);

    debug!(
        plaintext = plaintext.len(),
        sealed = sealed.len(),
        "Sealed archive envelope"
    );
    Ok(sealed)
}

/// Decrypt an envelope produced by [`seal`].
///
/// # Errors
/// - `Error::Decryption` for a wrong password, a foreign or corrupt file,
///   or an unsupported envelope version; these cases are not distinguished
pub fn open(sealed: &[u8], password: &Passphrase) -> Result<Vec<u8>> {
    open_inner(sealed, password).map_err(|e| match e {
        Error::Decryption(_) => e,
        other => Error::Decryption(other.to_string()),
    })
}

fn open_inner(sealed: &[u8], password: &Passphrase) -> Result<Vec<u8>> {
    if sealed.len() < PREFIX_LEN || &sealed[..MAGIC.len()] != MAGIC {
        return Err(Error::Decryption("not a targpg archive".to_string()));
    }

    let version = sealed[MAGIC.len()];
    if version != ENVELOPE_VERSION {
        return Err(Error::Decryption(format!(
            "unsupported envelope version {}",
            version
        )));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&sealed[MAGIC.len() + 1..PREFIX_LEN]);
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    if header_len > MAX_HEADER_LEN || sealed.len() < PREFIX_LEN + header_len {
        return Err(Error::Decryption("truncated envelope header".to_string()));
    }

    let (authenticated, body) = sealed.split_at(PREFIX_LEN + header_len);
    let header: EnvelopeHeader = serde_json::from_slice(&authenticated[PREFIX_LEN..])
        .map_err(|e| Error::Decryption(format!("corrupt envelope header: {}", e)))?;
    if !header.kdf_params.within_limits() {
        return Err(Error::Decryption(
            "envelope KDF parameters exceed the supported limits".to_string(),
        ));
    }

    let key = derive_key(password.as_bytes(), &header.salt, &header.kdf_params)?;
    let plaintext = aead::decrypt(&key, body, authenticated)?;

    debug!(
        sealed = sealed.len(),
        plaintext = plaintext.len(),
        "Opened archive envelope"
    );
    Ok(plaintext)
}
