#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),
}
