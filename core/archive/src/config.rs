//! Archive options.


use crate::compress::DEFAULT_COMPRESSION_LEVEL;
use targpg_common::{Error, Result};
use targpg_crypto::KdfParams;

/// Options controlling how an archive is opened and saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// Create a missing archive without asking for confirmation.
    pub autocreate: bool,
    /// KDF parameters used when sealing on save.
    pub kdf_params: KdfParams,
    /// Gzip level, 0 (store) to 9 (best).
    pub compression_level: u32,
}

impl ArchiveOptions {
    /// Set whether a missing archive is created without confirmation.
    pub fn with_autocreate(mut self, autocreate: bool) -> Self {
        self.autocreate = autocreate;
        self
    }

    /// Set the KDF parameters used on save.
    pub fn with_kdf_params(mut self, kdf_params: KdfParams) -> Self {
        self.kdf_params = kdf_params;
        self
    }

    /// Set the gzip level used on save.
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Check the options before use.
    pub fn validate(&self) -> Result<()> {
        if self.compression_level > 9 {
            return Err(Error::InvalidInput(format!(
                "Compression level must be between 0 and 9, got {}",
                self.compression_level
            )));
        }
        Ok(())
    }
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            autocreate: false,
            kdf_params: KdfParams::default(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ArchiveOptions::default();
        assert!(!options.autocreate);
        assert_eq!(options.kdf_params, KdfParams::interactive());
        assert_eq!(options.compression_level, 6);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_invalid_level_rejected() {
        let options = ArchiveOptions::default().with_compression_level(10);
        assert!(matches!(options.validate(), Err(Error::InvalidInput(_))));
    }
}
