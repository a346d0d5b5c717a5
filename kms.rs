//! Key-management capability.
//!
//! [`KeyService`] is the only contact point with the key store: encrypt a
//! small plaintext under a key, or decrypt a ciphertext back. Implementations:
//!
//! - [`AwsKms`]: AWS Key Management Service
//! - [`LocalKms`]: XChaCha20-Poly1305 under a local key file, for offline use
//! - [`Retrying`]: bounded retry with exponential backoff around another service
//!
//! Callers must never pass more than [`CONTENT_LIMIT_BYTES`] of plaintext.

use crate::error::{Result, SecretsError};
use crate::key_manager::KeyManager;
use crate::strategy::CONTENT_LIMIT_BYTES;
use aws_sdk_kms::config::Region;
use aws_sdk_kms::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_kms::primitives::Blob;
use chacha20poly1305::aead::{Aead, AeadCore, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

const NONCE_LEN: usize = 24;

/// KMS error codes that may clear up on a later attempt.
const TRANSIENT_CODES: &[&str] = &[
    "ThrottlingException",
    "KMSInternalException",
    "DependencyTimeoutException",
    "KeyUnavailableException",
];

pub trait KeyService: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn decrypt(&self, ciphertext: &[u8]) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// AWS KMS client bound to one key, region and profile.
pub struct AwsKms {
    client: aws_sdk_kms::Client,
    key_id: Option<String>,
}

impl AwsKms {
    /// `key_id` is only needed for encryption; KMS finds the key for a
    /// ciphertext on its own.
    pub async fn new(key_id: Option<String>, region: &str, profile: &str) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .profile_name(profile)
            .load()
            .await;
        debug!(region, profile, "aws kms client configured");
        Self {
            client: aws_sdk_kms::Client::new(&sdk_config),
            key_id,
        }
    }
}

impl KeyService for AwsKms {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key_id = self
            .key_id
            .as_deref()
            .ok_or_else(|| SecretsError::config("key id is required for encryption"))?;

        let resp = self
            .client
            .encrypt()
            .key_id(key_id)
            .plaintext(Blob::new(plaintext))
            .send()
            .await
            .map_err(|e| sdk_error("encrypt", e))?;

        resp.ciphertext_blob()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| SecretsError::remote("kms encrypt returned no ciphertext"))
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let resp = self
            .client
            .decrypt()
            .ciphertext_blob(Blob::new(ciphertext))
            .send()
            .await
            .map_err(|e| sdk_error("decrypt", e))?;

        resp.plaintext()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| SecretsError::remote("kms decrypt returned no plaintext"))
    }
}

fn is_transient_code(code: Option<&str>) -> bool {
    code.is_some_and(|c| TRANSIENT_CODES.contains(&c))
}

/// Timeouts, connection failures and the codes in [`TRANSIENT_CODES`] become
/// [`SecretsError::Unavailable`]; every other SDK failure is final.
fn sdk_error<E, R>(op: &str, err: SdkError<E, R>) -> SecretsError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => true,
        SdkError::ServiceError(ctx) => is_transient_code(ctx.err().code()),
        _ => false,
    };
    let msg = format!("kms {}: {}", op, DisplayErrorContext(&err));
    if transient {
        SecretsError::unavailable(msg)
    } else {
        SecretsError::remote(msg)
    }
}

/// Offline key service: `[nonce:24][ciphertext+tag]` under a local key.
///
/// Enforces the same plaintext ceiling as the remote service so artifacts
/// follow identical naming whichever backend produced them. Its failures are
/// never transient.
pub struct LocalKms {
    cipher: XChaCha20Poly1305,
}

impl LocalKms {
    pub fn new(km: &KeyManager) -> Self {
        Self { cipher: km.cipher() }
    }
}

impl KeyService for LocalKms {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.len() > CONTENT_LIMIT_BYTES {
            return Err(SecretsError::remote(format!(
                "plaintext of {} bytes exceeds the {}-byte limit",
                plaintext.len(),
                CONTENT_LIMIT_BYTES
            )));
        }

        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| SecretsError::remote(format!("local encrypt: {}", e)))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return Err(SecretsError::remote(format!(
                "ciphertext too short: {} bytes",
                ciphertext.len()
            )));
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), sealed)
            .map_err(|e| SecretsError::remote(format!("local decrypt: {}", e)))
    }
}

/// Retries transient failures of the wrapped service with exponential backoff.
pub struct Retrying<K> {
    inner: K,
    attempts: u32,
    base_delay: Duration,
}

impl<K: KeyService> Retrying<K> {
    /// `attempts` counts the first call; values below 1 are treated as 1.
    pub fn new(inner: K, attempts: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            base_delay,
        }
    }

    pub fn into_inner(self) -> K {
        self.inner
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << (attempt - 1).min(16))
    }
}

impl<K: KeyService> KeyService for Retrying<K> {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut attempt = 1;
        loop {
            match self.inner.encrypt(plaintext).await {
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    let delay = self.backoff(attempt);
                    warn!(attempt, max_attempts = self.attempts, ?delay, error = %e, "encrypt failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let mut attempt = 1;
        loop {
            match self.inner.decrypt(ciphertext).await {
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    let delay = self.backoff(attempt);
                    warn!(attempt, max_attempts = self.attempts, ?delay, error = %e, "decrypt failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
