use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Error;

/// The opaque "GET url -> bytes" transport the fetch pipeline consumes. Kept as a trait so tests
/// can swap in an in-memory double instead of making real requests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn download(&self, url: &str) -> Result<Bytes, Error>;
}

/// Resolves `relative` against `base`, the same way a module or manifest URL that is relative is
/// resolved against the manifest URL's own location.
pub fn resolve_url(base: &str, relative: &str) -> Result<String, Error> {
    let base = url::Url::parse(base).map_err(|e| Error::BadUrl {
        url: base.to_string(),
        source: e,
    })?;
    let joined = base.join(relative).map_err(|e| Error::BadUrl {
        url: relative.to_string(),
        source: e,
    })?;
    Ok(joined.into())
}

/// `reqwest`-backed implementation of [`HttpClient`], built the way `peoci::ocidist::Client::new`
/// builds its client: HTTPS-only, a small bounded redirect policy, one shared connection-pooling
/// client.
pub struct ReqwestDownloader {
    client: reqwest::Client,
}

impl ReqwestDownloader {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(2))
            .https_only(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestDownloader {
    async fn download(&self, url: &str) -> Result<Bytes, Error> {
        let to_err = |source: reqwest::Error| Error::NetworkError {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).send().await.map_err(to_err)?;
        let response = response.error_for_status().map_err(to_err)?;
        response.bytes().await.map_err(to_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_against_manifest_url() {
        let resolved = resolve_url(
            "https://cdn.example.com/app/manifest.zipline.json",
            "alpha.zipline",
        )
        .unwrap();
        assert_eq!(resolved, "https://cdn.example.com/app/alpha.zipline");
    }

    #[test]
    fn leaves_absolute_urls_untouched() {
        let resolved = resolve_url(
            "https://cdn.example.com/app/manifest.zipline.json",
            "https://other.example.com/alpha.zipline",
        )
        .unwrap();
        assert_eq!(resolved, "https://other.example.com/alpha.zipline");
    }
}
