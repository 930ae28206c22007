use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pdf parse error in {path}: {details}")]
    PdfParse { path: PathBuf, details: String },

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed artifact {path}: {details}")]
    MalformedArtifact { path: PathBuf, details: String },

    #[error("json error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("embedding failed: {0}")]
    Backend(#[from] BackendError),

    #[error("index build failed: {0}")]
    Index(#[from] IndexError),
}

impl IngestError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{backend} request timed out")]
    Timeout { backend: String },

    #[error("{backend} transport error: {details}")]
    Transport { backend: String, details: String },

    #[error("{backend} returned status {status}: {details}")]
    Status {
        backend: String,
        status: u16,
        details: String,
    },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("{backend} returned {actual} embeddings for {expected} inputs")]
    CountMismatch {
        backend: String,
        expected: usize,
        actual: usize,
    },

    #[error("empty input: {0}")]
    EmptyInput(String),

    #[error("invalid backend configuration: {0}")]
    Config(String),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl BackendError {
    pub fn from_reqwest(backend: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                backend: backend.to_string(),
            }
        } else if error.is_decode() {
            Self::BackendResponse {
                backend: backend.to_string(),
                details: error.to_string(),
            }
        } else {
            Self::Transport {
                backend: backend.to_string(),
                details: error.to_string(),
            }
        }
    }

    /// Timeouts, connection failures, rate limiting and server-side errors may
    /// succeed on a later attempt; everything else is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("cannot build an index from an empty corpus")]
    EmptyCorpus,

    #[error("vector {position} has zero or non-finite norm and cannot be normalized")]
    ZeroVector { position: usize },

    #[error("query vector has zero or non-finite norm")]
    ZeroQuery,

    #[error("vector {position} has dimension {actual}, expected {expected}")]
    RaggedDimensions {
        position: usize,
        expected: usize,
        actual: usize,
    },

    #[error("query dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index was built with embedding model {indexed}, but {configured} is configured")]
    ModelMismatch { indexed: String, configured: String },

    #[error("corrupt index file {path}: {details}")]
    Corrupt { path: PathBuf, details: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query is empty")]
    EmptyQuery,

    #[error("top_k must be at least 1")]
    InvalidTopK,

    #[error("missing artifact: {0}")]
    MissingArtifact(PathBuf),

    #[error("index and chunk metadata are out of sync: {0}")]
    Inconsistent(String),

    #[error("could not read an action from the model reply: {0}")]
    Undecided(String),

    #[error("could not read artifact: {0}")]
    Artifact(#[from] IngestError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
