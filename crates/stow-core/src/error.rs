use thiserror::Error;

pub type StowResult<T> = Result<T, StowError>;

#[derive(Debug, Error)]
pub enum StowError {
    /// A chunk upload failed. Retryable errors are re-attempted up to the
    /// configured bound before surfacing; non-retryable errors abort the
    /// whole file immediately.
    #[error("upload failed: {message}")]
    Upload { message: String, retryable: bool },

    #[error("fetch failed: {0}")]
    Fetch(String),

    /// AEAD tag mismatch. Never retried — the data is corrupt or the key is
    /// wrong, and neither resolves itself on a second attempt.
    #[error("chunk authentication failed: corrupted data or wrong key")]
    Integrity,

    #[error("malformed share code: {0}")]
    MalformedDescriptor(String),

    #[error("corrupt blob: head size {head} exceeds blob length {len}")]
    CorruptBlob { head: usize, len: usize },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("script error: {0}")]
    Script(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StowError {
    pub fn upload(message: impl Into<String>, retryable: bool) -> Self {
        StowError::Upload {
            message: message.into(),
            retryable,
        }
    }

    /// Whether the transfer engine may re-attempt the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StowError::Upload { retryable: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(StowError::upload("503", true).is_retryable());
        assert!(!StowError::upload("bad request", false).is_retryable());
        assert!(!StowError::Integrity.is_retryable());
        assert!(!StowError::Fetch("timeout".into()).is_retryable());
        assert!(!StowError::Cancelled.is_retryable());
    }

    #[test]
    fn display_messages() {
        let e = StowError::CorruptBlob { head: 100, len: 10 };
        assert!(e.to_string().contains("100"));
        assert!(e.to_string().contains("10"));

        let e = StowError::MalformedDescriptor("bad prefix".into());
        assert!(e.to_string().contains("bad prefix"));
    }
}
