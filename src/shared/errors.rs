use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Resource url does not support chunking, the server ignored the range request.")]
    ResourceNotChunkable,

    #[error("Could not determine resource size.")]
    SizeUnknown,

    #[error("Could not allocate {path}, not enough disk space or path not writable: {source}")]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not all file parts finished downloading ({done} of {expected} parts done).")]
    IncompleteDownload { done: usize, expected: usize },

    #[error("Workers count must be greater than 0, got {0}.")]
    InvalidWorkerCount(i64),

    #[error("Unexpected end of input: received {received} of {expected} bytes.")]
    UnexpectedEof { received: u64, expected: u64 },

    #[error("Network connection error: {0}")]
    ReqwestClient(#[from] reqwest::Error),

    #[error("Network connection error: {0}")]
    ReqwestMiddleware(#[from] reqwest_middleware::Error),

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Download interrupted by user.")]
    Interrupted,

    #[error("Critical system failure: {0}")]
    Fatal(String),
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Cache(err.to_string())
    }
}

// sysexits(3) codes
const EX_DATAERR: u8 = 65;
const EX_UNAVAILABLE: u8 = 69;
const EX_SOFTWARE: u8 = 70;
const EX_IOERR: u8 = 74;
const EX_TEMPFAIL: u8 = 75;

impl FetchError {
    /// Process exit code for this error when it reaches the binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            FetchError::ResourceNotChunkable
            | FetchError::SizeUnknown
            | FetchError::ReqwestClient(_)
            | FetchError::ReqwestMiddleware(_)
            | FetchError::UnexpectedEof { .. } => EX_UNAVAILABLE,
            FetchError::FileSystem { .. } | FetchError::Io(_) | FetchError::Cache(_) => EX_IOERR,
            FetchError::IncompleteDownload { .. } | FetchError::Interrupted => EX_TEMPFAIL,
            FetchError::InvalidWorkerCount(_) | FetchError::ParseError(_) => EX_DATAERR,
            FetchError::Fatal(_) => EX_SOFTWARE,
        }
    }

    /// Whether a later call can pick up where this one stopped.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            FetchError::IncompleteDownload { .. } | FetchError::Interrupted
        )
    }
}
