use thiserror::Error;

/// Failures raised by the blob store and content index adapters.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("bucket does not exist: {0}")]
    NoSuchBucket(String),

    #[error("index does not exist: {0}")]
    NoSuchIndex(String),

    #[error("document {id} not found in index {index}")]
    DocumentMissing { index: String, id: String },

    #[error("invalid presigned url: {0}")]
    InvalidPresign(String),

    #[error("invalid partition name: {0:?}")]
    InvalidName(String),
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Encoding(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for BackendError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BackendError::Encoding(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BackendError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BackendError::Encoding(err.to_string())
    }
}

/// Error returned by every public dedup operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {user}/{path}")]
    NotFound { user: String, path: String },

    #[error("{op} failed for {user}/{path}: {source}")]
    RemoteStore {
        op: &'static str,
        user: String,
        path: String,
        #[source]
        source: BackendError,
    },

    #[error("dedup invariant violated: {0}")]
    InvariantViolation(String),

    #[error("validation failed: {0}")]
    Validation(String),
}

impl StoreError {
    pub fn not_found(user: &str, path: &str) -> Self {
        StoreError::NotFound {
            user: user.to_string(),
            path: path.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Attaches operation context to a backend result.
pub trait RemoteContext<T> {
    fn remote(self, op: &'static str, user: &str, path: &str) -> Result<T, StoreError>;
}

impl<T> RemoteContext<T> for Result<T, BackendError> {
    fn remote(self, op: &'static str, user: &str, path: &str) -> Result<T, StoreError> {
        self.map_err(|source| StoreError::RemoteStore {
            op,
            user: user.to_string(),
            path: path.to_string(),
            source,
        })
    }
}
