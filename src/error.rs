use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no cached table for {key}")]
    NotFound { key: String },
    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },
    #[error("parse failure: {message}")]
    Parse { message: String },
    #[error("partition collision in {dimension}: {first:?} and {second:?} both map to {token:?}")]
    PartitionCollision {
        dimension: String,
        token: String,
        first: String,
        second: String,
    },
    #[error("refusing to replace {path}: {reason}")]
    UnsafeCacheRoot { path: String, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
