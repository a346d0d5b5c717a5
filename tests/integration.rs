use anyhow::Result;
use rand_core::{OsRng, RngCore};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use kms_secrets::error::SecretsError;
use kms_secrets::key_manager::KeyManager;
use kms_secrets::kms::{KeyService, LocalKms};
use kms_secrets::secret_ops::SecretOps;
use kms_secrets::walk::FileFilter;
use kms_secrets::CONTENT_LIMIT_BYTES;

/// Size-preserving key service that insists on the plaintext limit
struct Xor;

impl KeyService for Xor {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, SecretsError> {
        assert!(plaintext.len() <= CONTENT_LIMIT_BYTES, "limit exceeded");
        Ok(plaintext.iter().map(|b| b ^ 0x5a).collect())
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, SecretsError> {
        Ok(ciphertext.iter().map(|b| b ^ 0x5a).collect())
    }
}

/// Key service whose every call fails
struct Unavailable;

impl KeyService for Unavailable {
    async fn encrypt(&self, _plaintext: &[u8]) -> Result<Vec<u8>, SecretsError> {
        Err(SecretsError::remote("service unavailable"))
    }

    async fn decrypt(&self, _ciphertext: &[u8]) -> Result<Vec<u8>, SecretsError> {
        Err(SecretsError::remote("service unavailable"))
    }
}

/// Helper to create a temp tree and a local key service
async fn setup_test_env() -> Result<(TempDir, TempDir, SecretOps<LocalKms>)> {
    let tree = TempDir::new()?;
    let keys = TempDir::new()?;
    let km = KeyManager::open_or_create(keys.path().join("local.key")).await?;
    Ok((tree, keys, SecretOps::new(LocalKms::new(&km))))
}

fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    OsRng.fill_bytes(&mut buf);
    buf
}

fn listing(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn split_file_round_trip() -> Result<()> {
    let (tree, _keys, ops) = setup_test_env().await?;
    let path = tree.path().join("f");
    let original = random_bytes(10_000);
    fs::write(&path, &original)?;

    let report = ops.encrypt(tree.path()).await?.into_result()?;
    assert_eq!(report.written.len(), 3);
    assert_eq!(listing(tree.path()), vec!["f", "f.1of3.enc", "f.2of3.enc", "f.3of3.enc"]);

    fs::remove_file(&path)?;
    ops.decrypt(tree.path()).await?.into_result()?;
    assert_eq!(fs::read(&path)?, original);
    Ok(())
}

#[tokio::test]
async fn split_parts_carry_limit_sized_plaintext() -> Result<()> {
    let tree = TempDir::new()?;
    fs::write(tree.path().join("f"), random_bytes(10_000))?;

    // XOR keeps sizes, so artifact length equals plaintext length
    let ops = SecretOps::new(Xor);
    ops.encrypt(tree.path()).await?.into_result()?;

    let part_sizes: Vec<usize> = ["f.1of3.enc", "f.2of3.enc", "f.3of3.enc"]
        .iter()
        .map(|name| fs::read(tree.path().join(name)).map(|b| b.len()))
        .collect::<std::io::Result<_>>()?;
    assert_eq!(part_sizes, vec![4096, 4096, 1808]);
    Ok(())
}

#[tokio::test]
async fn limit_sized_file_is_sent_directly() -> Result<()> {
    let (tree, _keys, ops) = setup_test_env().await?;
    let path = tree.path().join("f");
    let original = random_bytes(CONTENT_LIMIT_BYTES);
    fs::write(&path, &original)?;

    ops.encrypt(tree.path()).await?.into_result()?;
    assert_eq!(listing(tree.path()), vec!["f", "f.enc"]);

    fs::remove_file(&path)?;
    ops.decrypt(tree.path()).await?.into_result()?;
    assert_eq!(fs::read(&path)?, original);
    Ok(())
}

#[tokio::test]
async fn compressible_file_uses_gzip_artifact() -> Result<()> {
    let (tree, _keys, ops) = setup_test_env().await?;
    let path = tree.path().join("app.yaml");
    let original = "database:\n  host: localhost\n  port: 5432\n".repeat(500);
    fs::write(&path, &original)?;

    ops.encrypt(tree.path()).await?.into_result()?;
    assert_eq!(listing(tree.path()), vec!["app.yaml", "app.yaml.gz.enc"]);

    fs::remove_file(&path)?;
    ops.decrypt(tree.path()).await?.into_result()?;
    assert_eq!(fs::read_to_string(&path)?, original);
    Ok(())
}

#[tokio::test]
async fn empty_file_is_skipped() -> Result<()> {
    let (tree, _keys, ops) = setup_test_env().await?;
    fs::write(tree.path().join("empty"), b"")?;

    let report = ops.encrypt(tree.path()).await?.into_result()?;
    assert!(report.written.is_empty());
    assert_eq!(report.skipped, vec![tree.path().join("empty")]);
    assert_eq!(listing(tree.path()), vec!["empty"]);
    Ok(())
}

#[tokio::test]
async fn nested_tree_with_hidden_entries() -> Result<()> {
    let (tree, _keys, ops) = setup_test_env().await?;
    let root = tree.path();
    fs::create_dir_all(root.join("prod/certs"))?;
    fs::create_dir_all(root.join(".git"))?;
    fs::write(root.join("prod/db.json"), b"{\"password\":\"hunter2\"}")?;
    fs::write(root.join("prod/certs/tls.pem"), random_bytes(9000))?;
    fs::write(root.join(".git/config"), b"[core]")?;
    fs::write(root.join(".env"), b"TOKEN=abc")?;

    ops.encrypt(root).await?.into_result()?;
    assert!(root.join("prod/db.json.enc").exists());
    assert!(root.join("prod/certs/tls.pem.1of3.enc").exists());
    assert!(!root.join(".env.enc").exists());
    assert!(!root.join(".git/config.enc").exists());

    let db = fs::read(root.join("prod/db.json"))?;
    let pem = fs::read(root.join("prod/certs/tls.pem"))?;
    fs::remove_file(root.join("prod/db.json"))?;
    fs::remove_file(root.join("prod/certs/tls.pem"))?;

    ops.decrypt(root).await?.into_result()?;
    assert_eq!(fs::read(root.join("prod/db.json"))?, db);
    assert_eq!(fs::read(root.join("prod/certs/tls.pem"))?, pem);
    Ok(())
}

#[tokio::test]
async fn filter_limits_processed_files() -> Result<()> {
    let (tree, _keys, ops) = setup_test_env().await?;
    let ops = ops.with_filter(FileFilter::new(r"\.json(\..*)?$")?);
    fs::write(tree.path().join("a.json"), b"{}")?;
    fs::write(tree.path().join("b.txt"), b"text")?;

    ops.encrypt(tree.path()).await?.into_result()?;
    assert_eq!(listing(tree.path()), vec!["a.json", "a.json.enc", "b.txt"]);
    Ok(())
}

#[tokio::test]
async fn broken_group_does_not_block_others() -> Result<()> {
    let (tree, _keys, ops) = setup_test_env().await?;
    let root = tree.path();
    let good = random_bytes(9000);
    fs::write(root.join("good.bin"), &good)?;
    fs::write(root.join("bad.bin"), random_bytes(9000))?;
    ops.encrypt(root).await?.into_result()?;

    fs::remove_file(root.join("good.bin"))?;
    fs::remove_file(root.join("bad.bin"))?;
    fs::write(root.join("bad.bin.2of3.enc"), b"not a ciphertext")?;

    let report = ops.decrypt(root).await?;
    assert!(!report.is_success());
    assert_eq!(fs::read(root.join("good.bin"))?, good);
    assert!(!root.join("bad.bin").exists());

    let failed: Vec<_> = report.failures.iter().map(|(p, _)| p.clone()).collect();
    assert!(failed.contains(&root.join("bad.bin.2of3.enc")));
    assert!(failed.contains(&root.join("bad.bin")));

    match report.into_result() {
        Err(SecretsError::Aggregate { failed, .. }) => assert_eq!(failed, 2),
        other => panic!("expected aggregate error, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn missing_part_is_not_joined() -> Result<()> {
    let (tree, _keys, ops) = setup_test_env().await?;
    let root = tree.path();
    fs::write(root.join("f"), random_bytes(10_000))?;
    ops.encrypt(root).await?.into_result()?;
    fs::remove_file(root.join("f"))?;
    fs::remove_file(root.join("f.3of3.enc"))?;

    let report = ops.decrypt(root).await?;
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(report.failures[0].1, SecretsError::Format(_)));
    assert!(!root.join("f").exists());
    Ok(())
}

#[tokio::test]
async fn remote_failure_is_reported_per_file() -> Result<()> {
    let tree = TempDir::new()?;
    fs::write(tree.path().join("a"), b"one")?;
    fs::write(tree.path().join("b"), b"two")?;

    let report = SecretOps::new(Unavailable).encrypt(tree.path()).await?;
    assert_eq!(report.attempted, 2);
    assert_eq!(report.failures.len(), 2);
    assert!(report
        .failures
        .iter()
        .all(|(_, e)| matches!(e, SecretsError::Remote(_))));
    assert_eq!(listing(tree.path()), vec!["a", "b"]);
    Ok(())
}

#[tokio::test]
async fn reencrypting_overwrites_artifacts() -> Result<()> {
    let (tree, _keys, ops) = setup_test_env().await?;
    let path = tree.path().join("token");
    fs::write(&path, b"v1")?;
    ops.encrypt(tree.path()).await?.into_result()?;

    fs::write(&path, b"v2")?;
    ops.encrypt(tree.path()).await?.into_result()?;
    assert_eq!(listing(tree.path()), vec!["token", "token.enc"]);

    fs::remove_file(&path)?;
    ops.decrypt(tree.path()).await?.into_result()?;
    assert_eq!(fs::read(&path)?, b"v2");
    Ok(())
}

#[tokio::test]
async fn reencrypting_split_file_as_direct_restores_latest() -> Result<()> {
    let (tree, _keys, ops) = setup_test_env().await?;
    let root = tree.path();
    let path = root.join("f");
    fs::write(&path, random_bytes(10_000))?;
    ops.encrypt(root).await?.into_result()?;

    fs::write(&path, b"new secret")?;
    ops.encrypt(root).await?.into_result()?;
    assert!(root.join("f.enc").exists());
    assert!(root.join("f.1of3.enc").exists());

    let report = ops.decrypt(root).await?;
    assert_eq!(fs::read(&path)?, b"new secret");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, path);
    assert!(matches!(report.failures[0].1, SecretsError::Format(_)));
    Ok(())
}
