//! Local 256-bit key file for the offline key service.
//!
//! This module provides [`KeyManager`] for loading or generating the key that
//! backs [`crate::kms::LocalKms`].
//!
//! ## Security Features
//!
//! - Keys are zeroized on drop (via `Zeroize` trait)
//! - Unix file permissions set to 0600 (owner read/write only)
//! - Cryptographically secure random generation via `OsRng`

use crate::error::{Result, SecretsError};
use chacha20poly1305::{KeyInit, XChaCha20Poly1305};
use rand_core::OsRng;
use rand_core::RngCore;
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};
use zeroize::Zeroize;

pub const KEY_LEN: usize = 32;

/// Holds the key bytes for the local key service.
/// Prefer a real KMS for anything shared between machines.
pub struct KeyManager {
    key_bytes: [u8; KEY_LEN],
}

impl Drop for KeyManager {
    fn drop(&mut self) {
        self.key_bytes.zeroize();
    }
}

impl KeyManager {
    /// Load an existing key file. Decryption must never mint a fresh key.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let exists = fs::try_exists(path)
            .await
            .map_err(|e| SecretsError::key(format!("checking {}: {}", path.display(), e)))?;
        if !exists {
            return Err(SecretsError::key(format!("key file {} not found", path.display())));
        }
        Self::load(path).await
    }

    /// Load the key file, generating it first if it does not exist.
    pub async fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let exists = fs::try_exists(path)
            .await
            .map_err(|e| SecretsError::key(format!("checking {}: {}", path.display(), e)))?;
        if exists {
            Self::load(path).await
        } else {
            Self::generate(path).await
        }
    }

    async fn load(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "loading existing encryption key");
        let mut data = fs::read(path)
            .await
            .map_err(|e| SecretsError::key(format!("reading key from {}: {}", path.display(), e)))?;
        if data.len() != KEY_LEN {
            warn!(path = %path.display(), found_bytes = data.len(), "invalid key size");
            let found = data.len();
            data.zeroize();
            return Err(SecretsError::key(format!(
                "expected {}-byte key at {} but found {} bytes",
                KEY_LEN,
                path.display(),
                found
            )));
        }
        let mut key_bytes = [0u8; KEY_LEN];
        key_bytes.copy_from_slice(&data);
        data.zeroize();
        Ok(Self { key_bytes })
    }

    async fn generate(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "generating new encryption key");
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);

        #[cfg(unix)]
        {
            let path_buf = path.to_path_buf();
            let key_clone = key;
            tokio::task::spawn_blocking(move || {
                use std::fs::OpenOptions;
                use std::io::Write;
                use std::os::unix::fs::OpenOptionsExt;

                let mut f = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(&path_buf)?;
                f.write_all(&key_clone)?;
                Ok::<(), std::io::Error>(())
            })
            .await
            .map_err(|e| SecretsError::key(format!("key writer task failed: {}", e)))?
            .map_err(|e| SecretsError::key(format!("writing key to {}: {}", path.display(), e)))?;
        }
        #[cfg(not(unix))]
        {
            fs::write(path, &key)
                .await
                .map_err(|e| SecretsError::key(format!("writing key to {}: {}", path.display(), e)))?;
        }

        Ok(Self { key_bytes: key })
    }

    pub fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(&self.key_bytes.into())
    }
}
