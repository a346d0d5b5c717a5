//! Directory-wide encryption and decryption.
//!
//! This module provides [`SecretOps`], which walks a directory tree and turns
//! plaintext files into key-service artifacts and back.
//!
//! ## Encryption
//!
//! Each file is sent through [`select_for_encryption`] and written as one of:
//!
//! - `<path>.enc` for content within the key service limit
//! - `<path>.gz.enc` for content that fits once gzipped
//! - `<path>.<i>of<n>.enc` for each limit-sized part of anything larger
//!
//! ## Decryption
//!
//! Artifacts are decrypted in a single pass. Split parts are held in memory,
//! grouped by original path, and joined in part order once the walk is done.
//!
//! A target is written at most once per run. A second artifact decoding to
//! a path already restored, such as split parts left behind after a file
//! was re-encrypted directly, is reported as a conflict and not applied.
//!
//! A failing file or group is logged and recorded in the [`RunReport`]; the
//! rest of the tree is still processed.

use crate::chunk::chunk;
use crate::compress;
use crate::error::{Result, SecretsError};
use crate::kms::KeyService;
use crate::strategy::{
    artifact_path, original_file_name, part_info, select_for_decryption, select_for_encryption,
    EncryptionPlan, Strategy, CONTENT_LIMIT_BYTES, ENC_SUFFIX,
};
use crate::util::write_output;
use crate::walk::{walk, FileFilter};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info};

/// One decrypted part of a split file.
#[derive(Debug)]
struct SplitPart {
    number: u32,
    total: u32,
    content: Vec<u8>,
}

/// Split parts seen during one decrypt run, keyed by the file they rebuild.
type ReconstructionGroups = BTreeMap<PathBuf, Vec<SplitPart>>;

/// Summary of an encrypt or decrypt run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Files written (artifacts on encrypt, plaintext on decrypt)
    pub written: Vec<PathBuf>,
    /// Files left alone on purpose (empty input)
    pub skipped: Vec<PathBuf>,
    /// Files, split groups or directory entries that failed
    pub failures: Vec<(PathBuf, SecretsError)>,
    /// Number of files and split groups attempted
    pub attempted: usize,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn a report with failures into [`SecretsError::Aggregate`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SecretsError::Aggregate {
                failed: self.failures.len(),
                total: self.attempted.max(self.failures.len()),
            })
        }
    }

    fn fail(&mut self, path: PathBuf, err: SecretsError) {
        error!(path = %path.display(), error = %err, "processing failed");
        self.failures.push((path, err));
    }
}

enum FileOutcome {
    Done,
    Skipped,
}

pub struct SecretOps<K> {
    kms: K,
    filter: FileFilter,
}

impl<K: KeyService> SecretOps<K> {
    pub fn new(kms: K) -> Self {
        Self {
            kms,
            filter: FileFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: FileFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Encrypt every matching plaintext file under `root`.
    pub async fn encrypt(&self, root: impl AsRef<Path>) -> Result<RunReport> {
        let root = root.as_ref();
        ensure_dir(root).await?;
        info!(root = %root.display(), filter = self.filter.as_str(), "encrypting directory");

        let found = walk(root, &self.filter);
        let mut report = RunReport::default();
        for (path, err) in found.errors {
            report.fail(path, err);
        }

        for path in found.files {
            if has_suffix(&path, ENC_SUFFIX) {
                continue;
            }
            report.attempted += 1;
            match self.encrypt_file(&path, &mut report.written).await {
                Ok(FileOutcome::Done) => {}
                Ok(FileOutcome::Skipped) => report.skipped.push(path),
                Err(e) => report.fail(path, e),
            }
        }

        info!(
            written = report.written.len(),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            "encryption finished"
        );
        Ok(report)
    }

    /// Decrypt every matching `.enc` artifact under `root`, rebuilding split files.
    pub async fn decrypt(&self, root: impl AsRef<Path>) -> Result<RunReport> {
        let root = root.as_ref();
        ensure_dir(root).await?;
        info!(root = %root.display(), filter = self.filter.as_str(), "decrypting directory");

        let found = walk(root, &self.filter);
        let mut report = RunReport::default();
        for (path, err) in found.errors {
            report.fail(path, err);
        }

        let mut groups = ReconstructionGroups::new();
        let mut restored = HashSet::new();
        for path in found.files {
            if !has_suffix(&path, ENC_SUFFIX) {
                continue;
            }
            report.attempted += 1;
            match self.decrypt_file(&path, &mut groups, &restored).await {
                Ok(Some(target)) => {
                    restored.insert(target.clone());
                    report.written.push(target);
                }
                Ok(None) => {}
                Err(e) => report.fail(path, e),
            }
        }

        for (target, parts) in groups {
            report.attempted += 1;
            if restored.contains(&target) {
                let err = SecretsError::format(format!(
                    "split parts of {} conflict with an artifact already restored to it",
                    target.display()
                ));
                report.fail(target, err);
                continue;
            }
            match join_parts(&target, parts) {
                Ok(content) => match write_output(&target, &content).await {
                    Ok(()) => {
                        info!(target = %target.display(), bytes = content.len(), "joined split file");
                        report.written.push(target);
                    }
                    Err(e) => {
                        let err = SecretsError::io(format!("writing {}: {}", target.display(), e));
                        report.fail(target, err);
                    }
                },
                Err(e) => report.fail(target, e),
            }
        }

        info!(
            written = report.written.len(),
            failed = report.failures.len(),
            "decryption finished"
        );
        Ok(report)
    }

    async fn encrypt_file(&self, path: &Path, written: &mut Vec<PathBuf>) -> Result<FileOutcome> {
        let content = fs::read(path)
            .await
            .map_err(|e| SecretsError::io(format!("reading {}: {}", path.display(), e)))?;

        if content.is_empty() {
            info!(path = %path.display(), "skipping empty file");
            return Ok(FileOutcome::Skipped);
        }

        let plan = select_for_encryption(&content)?;
        debug!(path = %path.display(), size = content.len(), strategy = %plan.strategy(), "selected strategy");

        match plan {
            EncryptionPlan::Direct => {
                let target = artifact_path(path, Strategy::Direct, None);
                self.seal(path, &target, &content).await?;
                written.push(target);
            }
            EncryptionPlan::Compressed(compressed) => {
                let target = artifact_path(path, Strategy::Compressed, None);
                self.seal(path, &target, &compressed).await?;
                written.push(target);
            }
            EncryptionPlan::Split => {
                let parts = chunk(&content, CONTENT_LIMIT_BYTES);
                let total = parts.len();
                for (i, part) in parts.into_iter().enumerate() {
                    let target = artifact_path(path, Strategy::Split, Some((i + 1, total)));
                    self.seal(path, &target, part).await?;
                    written.push(target);
                }
            }
        }

        Ok(FileOutcome::Done)
    }

    async fn seal(&self, source: &Path, target: &Path, plaintext: &[u8]) -> Result<()> {
        let ciphertext = self.kms.encrypt(plaintext).await?;
        write_output(target, &ciphertext)
            .await
            .map_err(|e| SecretsError::io(format!("writing {}: {}", target.display(), e)))?;
        info!(source = %source.display(), target = %target.display(), "encrypted file");
        Ok(())
    }

    /// Returns the restored path, or `None` when the artifact was a split
    /// part collected into `groups`.
    async fn decrypt_file(
        &self,
        path: &Path,
        groups: &mut ReconstructionGroups,
        restored: &HashSet<PathBuf>,
    ) -> Result<Option<PathBuf>> {
        let full = path
            .to_str()
            .ok_or_else(|| SecretsError::format(format!("non UTF-8 path {}", path.display())))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SecretsError::format(format!("no file name in {}", path.display())))?;

        let ciphertext = fs::read(path)
            .await
            .map_err(|e| SecretsError::io(format!("reading {}: {}", path.display(), e)))?;

        let strategy = select_for_decryption(file_name);
        let target = PathBuf::from(original_file_name(full));
        debug!(path = %path.display(), %strategy, "decrypting artifact");

        if strategy != Strategy::Split && restored.contains(&target) {
            return Err(SecretsError::format(format!(
                "{} was already restored from another artifact",
                target.display()
            )));
        }

        match strategy {
            Strategy::Direct => {
                let plaintext = self.kms.decrypt(&ciphertext).await?;
                self.restore(path, target, &plaintext).await.map(Some)
            }
            Strategy::Compressed => {
                let compressed = self.kms.decrypt(&ciphertext).await?;
                let plaintext = compress::decode(&compressed)?;
                self.restore(path, target, &plaintext).await.map(Some)
            }
            Strategy::Split => {
                let (number, total) = part_info(file_name).ok_or_else(|| {
                    SecretsError::format(format!("unreadable part index in {}", file_name))
                })?;
                if number == 0 || number > total {
                    return Err(SecretsError::format(format!(
                        "part {} of {} is out of range in {}",
                        number, total, file_name
                    )));
                }
                let content = self.kms.decrypt(&ciphertext).await?;
                debug!(path = %path.display(), number, total, "collected split part");
                groups.entry(target).or_default().push(SplitPart {
                    number,
                    total,
                    content,
                });
                Ok(None)
            }
        }
    }

    async fn restore(&self, source: &Path, target: PathBuf, plaintext: &[u8]) -> Result<PathBuf> {
        write_output(&target, plaintext)
            .await
            .map_err(|e| SecretsError::io(format!("writing {}: {}", target.display(), e)))?;
        info!(source = %source.display(), target = %target.display(), "decrypted file");
        Ok(target)
    }
}

/// Order parts by number and concatenate them.
///
/// Refuses groups whose parts disagree on the total or do not cover
/// `1..=total` exactly, so a partial file is never written.
fn join_parts(target: &Path, mut parts: Vec<SplitPart>) -> Result<Vec<u8>> {
    parts.sort_by_key(|p| p.number);

    let total = parts.first().map(|p| p.total).unwrap_or(0);
    if parts.iter().any(|p| p.total != total) {
        return Err(SecretsError::format(format!(
            "parts of {} disagree on the part count",
            target.display()
        )));
    }

    let numbers: Vec<u32> = parts.iter().map(|p| p.number).collect();
    let complete = numbers.len() == total as usize
        && numbers.iter().enumerate().all(|(i, n)| *n as usize == i + 1);
    if !complete {
        return Err(SecretsError::format(format!(
            "incomplete split group for {}: have parts {:?} of {}",
            target.display(),
            numbers,
            total
        )));
    }

    let size = parts.iter().map(|p| p.content.len()).sum();
    let mut out = Vec::with_capacity(size);
    for part in parts {
        out.extend_from_slice(&part.content);
    }
    Ok(out)
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(suffix))
        .unwrap_or(false)
}

async fn ensure_dir(root: &Path) -> Result<()> {
    let meta = fs::metadata(root)
        .await
        .map_err(|e| SecretsError::config(format!("root directory {}: {}", root.display(), e)))?;
    if !meta.is_dir() {
        return Err(SecretsError::config(format!(
            "{} is not a directory",
            root.display()
        )));
    }
    Ok(())
}
