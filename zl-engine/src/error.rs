use std::sync::Arc;

use zl_manifest::ZiplineFileError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("fetching {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid url {url}: {source}")]
    BadUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    MalformedManifest(#[from] zl_manifest::Error),

    #[error("malformed zipline file: {0}")]
    MalformedZiplineFile(String),

    #[error("unsupported zipline file version {0}")]
    UnsupportedFileVersion(u32),

    #[error(transparent)]
    Cache(#[from] zl_cache::Error),

    #[error("module {module_id} failed: {message}")]
    EngineError { module_id: String, message: String },

    #[error("dependency failed: {0}")]
    DependencyFailed(Arc<Error>),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<ZiplineFileError> for Error {
    fn from(e: ZiplineFileError) -> Self {
        match e {
            ZiplineFileError::Malformed(msg) => Error::MalformedZiplineFile(msg),
            ZiplineFileError::UnsupportedVersion(v) => Error::UnsupportedFileVersion(v),
        }
    }
}
