use pagestore_core::PageKey;

/// Errors returned by [`AsyncPageStore`](crate::store::AsyncPageStore).
///
/// Running out of queue capacity is not an error: it switches `store` to
/// the synchronous path.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid store configuration: {reason}")]
    InvalidConfig { reason: String },
    #[error("failed to persist page {key}")]
    Persist {
        key: PageKey,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to read page {key}")]
    Read {
        key: PageKey,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to remove page {key}")]
    Remove {
        key: PageKey,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to evict pages of session {session_id}")]
    Evict {
        session_id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{} page(s) could not be persisted during shutdown", .failures.len())]
    Drain { failures: Vec<DrainFailure> },
    #[error("failed to close underlying store")]
    Close(#[source] anyhow::Error),
    #[error("store has been shut down")]
    ShutDown,
}

/// A pending page that shutdown could not persist.
#[derive(Debug)]
pub struct DrainFailure {
    pub key: PageKey,
    pub error: anyhow::Error,
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn persist_error_names_key_and_keeps_source() {
        let err = StoreError::Persist {
            key: PageKey::new("s1", 4),
            source: anyhow::anyhow!("disk full"),
        };
        assert_eq!(err.to_string(), "failed to persist page s1:4");
        assert_eq!(err.source().unwrap().to_string(), "disk full");
    }

    #[test]
    fn drain_error_counts_failures() {
        let err = StoreError::Drain {
            failures: vec![
                DrainFailure {
                    key: PageKey::new("a", 1),
                    error: anyhow::anyhow!("x"),
                },
                DrainFailure {
                    key: PageKey::new("a", 2),
                    error: anyhow::anyhow!("y"),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "2 page(s) could not be persisted during shutdown"
        );
    }
}
