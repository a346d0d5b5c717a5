use thiserror::Error;

/// Error types for kms-secrets operations
#[derive(Debug, Error)]
pub enum SecretsError {
    /// Key-management call rejected (encrypt or decrypt)
    #[error("Remote error: {0}")]
    Remote(String),

    /// Key-management call that may succeed when repeated
    /// (throttling, service-side faults, timeouts, unreachable endpoint)
    #[error("Remote service unavailable: {0}")]
    Unavailable(String),

    /// File read/write and compression failures
    #[error("IO error: {0}")]
    Io(String),

    /// Malformed compressed data or artifact names
    #[error("Format error: {0}")]
    Format(String),

    /// Local key file errors (loading, generation, validation)
    #[error("Key error: {0}")]
    Key(String),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// One or more files or split groups failed during a run
    #[error("{failed} of {total} item(s) failed")]
    Aggregate { failed: usize, total: usize },
}

impl SecretsError {
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub fn key(msg: impl Into<String>) -> Self {
        Self::Key(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether retrying the same call could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<std::io::Error> for SecretsError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SecretsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(SecretsError::unavailable("throttled").is_transient());
        assert!(!SecretsError::remote("access denied").is_transient());
        assert!(!SecretsError::format("bad gzip").is_transient());
        assert!(!SecretsError::io("disk full").is_transient());
    }
}
