//! # kms-secrets - Encrypt a directory of secrets with a key-management service
//!
//! Key-management services only accept small plaintexts (4096 bytes for AWS
//! KMS). kms-secrets encrypts whole files anyway by picking a strategy per file
//! and encoding it in the artifact name, so decryption needs nothing but the
//! files themselves.
//!
//! ## Strategies
//!
//! - **Direct**: files up to the limit, written as `<name>.enc`
//! - **Compressed**: files that fit once gzipped, written as `<name>.gz.enc`
//! - **Split**: everything else, written as `<name>.<i>of<n>.enc` parts
//!
//! ## Quick Start
//!
//! ```no_run
//! use kms_secrets::{key_manager::KeyManager, kms::LocalKms, secret_ops::SecretOps};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let km = KeyManager::open_or_create("./local.key").await?;
//!     let ops = SecretOps::new(LocalKms::new(&km));
//!
//!     // Writes *.enc artifacts next to every file under ./secrets
//!     ops.encrypt("./secrets").await?.into_result()?;
//!
//!     // Restores the plaintext files from the artifacts
//!     ops.decrypt("./secrets").await?.into_result()?;
//!     Ok(())
//! }
//! ```

pub mod chunk;
pub mod compress;
pub mod config;
pub mod error;
pub mod key_manager;
pub mod kms;
pub mod secret_ops;
pub mod strategy;
pub mod util;
pub mod walk;

// Re-export common types for convenience
pub use error::SecretsError;
pub use strategy::{Strategy, CONTENT_LIMIT_BYTES};
