use thiserror::Error;

/// Failure talking to an external bibliographic / citation / vocabulary
/// service. The split drives the retry policy: transient failures are
/// retried with backoff, permanent ones are not.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network failure, timeout, or 5xx from the upstream service.
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// The upstream answered, but the document could not be understood.
    #[error("permanent remote failure: {0}")]
    Permanent(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// Storage-layer failure. Unique-key conflicts never surface here; they
/// are absorbed by the upsert operations. Anything that does surface has
/// already been rolled back.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Referential integrity or invariant violation. Not retryable; the
    /// caller has a bug.
    #[error("integrity violation: {0}")]
    Integrity(String),
}

/// Failure computing an embedding.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding service error: {0}")]
    Remote(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },
}

/// Top-level error surfaced by the pipeline coordinator.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The keyword list was empty after normalization. Nothing was written.
    #[error("no usable keywords in query")]
    EmptyQuery,

    /// The bibliographic fetch failed after retries. The search row (if
    /// already created) remains with zero linked articles.
    #[error("bibliographic search failed: {0}")]
    Bibliographic(#[source] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error("search {0} does not exist")]
    SearchNotFound(i64),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
pub type StoreResult<T> = Result<T, StoreError>;
