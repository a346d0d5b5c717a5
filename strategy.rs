//! Per-file encryption strategy and the artifact naming scheme that encodes it.
//!
//! The key service refuses plaintext above [`CONTENT_LIMIT_BYTES`]. Files that
//! fit are sent as-is, files that fit once gzipped are sent compressed, and
//! everything else is split into limit-sized parts.
//!
//! ## Artifact Names
//!
//! ```text
//! Direct:      <name>.enc
//! Compressed:  <name>.gz.enc
//! Split:       <name>.<i>of<n>.enc      (1 <= i <= n)
//! ```
//!
//! The strategy is recovered from the name alone at decryption time.

use crate::compress;
use crate::error::Result;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Maximum plaintext size accepted by the key service in a single call
pub const CONTENT_LIMIT_BYTES: usize = 4096;

pub const ENC_SUFFIX: &str = ".enc";
pub const GZIP_ENC_SUFFIX: &str = ".gz.enc";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Direct,
    Compressed,
    Split,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strategy::Direct => "direct",
            Strategy::Compressed => "compressed",
            Strategy::Split => "split",
        };
        f.write_str(s)
    }
}

/// Outcome of [`select_for_encryption`].
///
/// `Compressed` carries the already-compressed bytes so the caller does not
/// compress twice. `Split` means the original, uncompressed content is chunked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionPlan {
    Direct,
    Compressed(Vec<u8>),
    Split,
}

impl EncryptionPlan {
    pub fn strategy(&self) -> Strategy {
        match self {
            EncryptionPlan::Direct => Strategy::Direct,
            EncryptionPlan::Compressed(_) => Strategy::Compressed,
            EncryptionPlan::Split => Strategy::Split,
        }
    }
}

/// `<name>.<i>of<n>.enc`
fn split_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?s:.*)\.(\d+)of(\d+)\.enc$").expect("split artifact pattern is valid")
    })
}

/// `<name>.<i>of<n>` once `.enc` is gone
fn part_suffix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^((?s:.*))\.\d+of\d+$").expect("part suffix pattern is valid")
    })
}

fn exceeds_limit(content: &[u8]) -> bool {
    content.len() > CONTENT_LIMIT_BYTES
}

/// Pick a strategy for raw file content.
///
/// Compression is only attempted when the content is over the limit. The
/// split path deliberately chunks the uncompressed content.
pub fn select_for_encryption(content: &[u8]) -> Result<EncryptionPlan> {
    if !exceeds_limit(content) {
        return Ok(EncryptionPlan::Direct);
    }

    let compressed = compress::encode(content)?;
    if !exceeds_limit(&compressed) {
        return Ok(EncryptionPlan::Compressed(compressed));
    }

    Ok(EncryptionPlan::Split)
}

/// Recover the strategy from an artifact file name.
///
/// `.enc` is a suffix of both other encodings, so it is checked last.
pub fn select_for_decryption(file_name: &str) -> Strategy {
    if file_name.ends_with(GZIP_ENC_SUFFIX) {
        Strategy::Compressed
    } else if split_pattern().is_match(file_name) {
        Strategy::Split
    } else {
        Strategy::Direct
    }
}

/// Strip every artifact suffix, returning the name of the plaintext file.
pub fn original_file_name(name: &str) -> String {
    let orig = name
        .strip_suffix(GZIP_ENC_SUFFIX)
        .or_else(|| name.strip_suffix(ENC_SUFFIX))
        .unwrap_or(name);

    match part_suffix_pattern().captures(orig) {
        Some(caps) => caps[1].to_string(),
        None => orig.to_string(),
    }
}

/// Part number and total part count of a split artifact name.
///
/// Returns `None` if the name is not a split artifact or a number overflows.
pub fn part_info(name: &str) -> Option<(u32, u32)> {
    let caps = split_pattern().captures(name)?;
    let number = caps[1].parse().ok()?;
    let total = caps[2].parse().ok()?;
    Some((number, total))
}

pub fn find_part_number(name: &str) -> Option<u32> {
    part_info(name).map(|(number, _)| number)
}

/// Artifact path for a plaintext file under the given strategy.
///
/// `part` is `(i, n)` and only used for [`Strategy::Split`].
pub fn artifact_path(source: &Path, strategy: Strategy, part: Option<(usize, usize)>) -> PathBuf {
    let mut name = source.as_os_str().to_os_string();
    match (strategy, part) {
        (Strategy::Split, Some((i, n))) => name.push(format!(".{}of{}{}", i, n, ENC_SUFFIX)),
        (Strategy::Compressed, _) => name.push(GZIP_ENC_SUFFIX),
        _ => name.push(ENC_SUFFIX),
    }
    PathBuf::from(name)
}
