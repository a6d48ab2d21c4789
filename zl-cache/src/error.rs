#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cached entry for {0} is corrupt, evicted")]
    CorruptCacheEntry(String),

    #[error("fetched bytes for {0} do not match the declared digest")]
    IntegrityMismatch(String),

    #[error("cache IO error: {0}")]
    CacheIoError(String),

    #[error("producer failed: {0}")]
    ProducerFailed(String),

    #[error("cache operation cancelled")]
    Cancelled,
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::CacheIoError(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::CacheIoError(e.to_string())
    }
}
