use std::path::PathBuf;
use std::sync::Arc;

use zl_cache::ContentCache;
use zl_manifest::{Digest, Manifest, Module};

use crate::error::Error;
use crate::http::{resolve_url, HttpClient};
use crate::listener::LoadListener;
use crate::throttle::Throttle;

/// Resolves bytes for a single module (or the manifest itself) via tiered lookup: embedded
/// directory, then content cache, falling back to network only on a cache miss. Network fetches
/// share one process-wide [`Throttle`]; embedded-directory and cache reads bypass it.
pub struct FetchPipeline {
    embedded_dir: Option<PathBuf>,
    cache: Arc<ContentCache>,
    http: Arc<dyn HttpClient>,
    throttle: Arc<Throttle>,
}

impl FetchPipeline {
    pub fn new(
        embedded_dir: Option<PathBuf>,
        cache: Arc<ContentCache>,
        http: Arc<dyn HttpClient>,
        throttle: Arc<Throttle>,
    ) -> Self {
        Self {
            embedded_dir,
            cache,
            http,
            throttle,
        }
    }

    async fn read_embedded(&self, name: &str) -> Option<Vec<u8>> {
        let dir = self.embedded_dir.as_ref()?;
        match tokio::fs::read(dir.join(name)).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                log::warn!("error reading embedded file {name}: {e}");
                None
            }
        }
    }

    /// Resolves a single module's bytecode bytes: embedded build output if present (trusted, no
    /// re-verification), otherwise the content cache (which itself falls back to network).
    /// `module.url` may be relative, in which case it is resolved against `manifest_url`'s base.
    pub async fn resolve_module_bytes(
        &self,
        manifest_url: &str,
        module: &Module,
    ) -> Result<Vec<u8>, Error> {
        let digest_hex = module.sha256.to_hex();
        if let Some(bytes) = self.read_embedded(&digest_hex).await {
            return Ok(bytes);
        }

        let url = resolve_url(manifest_url, &module.url)?;
        let http = self.http.clone();
        let throttle = self.throttle.clone();
        let digest: Digest = module.sha256;

        self.cache
            .get_or_put(digest, move || async move {
                let _permit = throttle.acquire().await;
                http.download(&url)
                    .await
                    .map(|b| b.to_vec())
                    .map_err(|e| zl_cache::Error::ProducerFailed(e.to_string()))
            })
            .await
            .map_err(Error::from)
    }

    /// Downloads and parses the manifest at `manifest_url`, falling back to
    /// `<embedded_dir>/manifest.zipline.json` on network failure. Reports both the network
    /// fallback and any parse failure to `listener` before surfacing them.
    pub async fn fetch_manifest(
        &self,
        manifest_url: &str,
        listener: &dyn LoadListener,
        app_name: &str,
    ) -> Result<Manifest, Error> {
        let network_result = {
            let _permit = self.throttle.acquire().await;
            self.http.download(manifest_url).await
        };

        let json = match network_result {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(network_err) => {
                listener.on_manifest_fetch_failed(app_name, manifest_url, &network_err);
                match self.read_embedded("manifest.zipline.json").await {
                    Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    None => return Err(network_err),
                }
            }
        };

        Manifest::parse(&json).map_err(|e| {
            let err = Error::from(e);
            listener.on_manifest_fetch_failed(app_name, manifest_url, &err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::NoopListener;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use zl_manifest::ModuleId;

    struct FailingHttp;

    #[async_trait]
    impl HttpClient for FailingHttp {
        async fn download(&self, url: &str) -> Result<Bytes, Error> {
            let source = reqwest::Client::new()
                .get("not a url")
                .send()
                .await
                .unwrap_err();
            Err(Error::NetworkError {
                url: url.to_string(),
                source,
            })
        }
    }

    struct CountingHttp {
        calls: AtomicUsize,
        body: Vec<u8>,
        last_url: std::sync::Mutex<Option<String>>,
    }

    impl CountingHttp {
        fn new(body: Vec<u8>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                body,
                last_url: std::sync::Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl HttpClient for CountingHttp {
        async fn download(&self, url: &str) -> Result<Bytes, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_url.lock().unwrap() = Some(url.to_string());
            Ok(Bytes::from(self.body.clone()))
        }
    }

    fn cache(dir: &std::path::Path) -> Arc<ContentCache> {
        Arc::new(ContentCache::open(dir, 1_000_000, || 0).unwrap())
    }

    #[tokio::test]
    async fn embedded_file_bypasses_cache_and_network() {
        let embedded = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let bytecode = b"trusted bytes".to_vec();
        let digest = Digest::of(&bytecode);
        std::fs::write(embedded.path().join(digest.to_hex()), &bytecode).unwrap();

        let pipeline = FetchPipeline::new(
            Some(embedded.path().to_path_buf()),
            cache(cache_dir.path()),
            Arc::new(FailingHttp),
            Arc::new(Throttle::new(1)),
        );

        let module = Module::new("https://example.com/m.zipline", digest, vec![]);
        let bytes = pipeline
            .resolve_module_bytes("https://example.com/manifest.zipline.json", &module)
            .await
            .unwrap();
        assert_eq!(bytes, bytecode);
    }

    #[tokio::test]
    async fn cache_miss_falls_through_to_network_once() {
        let cache_dir = tempfile::tempdir().unwrap();
        let body = b"network bytes".to_vec();
        let digest = Digest::of(&body);
        let http = Arc::new(CountingHttp::new(body.clone()));

        let pipeline = FetchPipeline::new(
            None,
            cache(cache_dir.path()),
            http.clone(),
            Arc::new(Throttle::new(1)),
        );

        let module = Module::new("https://example.com/m.zipline", digest, vec![]);
        let manifest_url = "https://example.com/manifest.zipline.json";
        let first = pipeline
            .resolve_module_bytes(manifest_url, &module)
            .await
            .unwrap();
        let second = pipeline
            .resolve_module_bytes(manifest_url, &module)
            .await
            .unwrap();
        assert_eq!(first, body);
        assert_eq!(second, body);
        assert_eq!(http.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn module_relative_url_resolves_against_manifest_url() {
        let cache_dir = tempfile::tempdir().unwrap();
        let body = b"relative network bytes".to_vec();
        let digest = Digest::of(&body);
        let http = Arc::new(CountingHttp::new(body.clone()));

        let pipeline = FetchPipeline::new(
            None,
            cache(cache_dir.path()),
            http.clone(),
            Arc::new(Throttle::new(1)),
        );

        // "alpha.zipline" is relative; it must resolve against the manifest's own URL, not be
        // handed to the transport as-is.
        let module = Module::new("alpha.zipline", digest, vec![]);
        let bytes = pipeline
            .resolve_module_bytes("https://cdn.example.com/app/manifest.zipline.json", &module)
            .await
            .unwrap();
        assert_eq!(bytes, body);
        assert_eq!(
            http.last_url.lock().unwrap().as_deref(),
            Some("https://cdn.example.com/app/alpha.zipline")
        );
    }

    #[tokio::test]
    async fn manifest_fetch_falls_back_to_embedded_on_network_failure() {
        let embedded = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let digest = Digest::of(b"x");
        let manifest_json = format!(
            r#"{{"modules": {{"alpha": {{"url": "a", "sha256": "{}", "dependsOnIds": []}}}}, "mainModuleId": "alpha"}}"#,
            digest.to_hex()
        );
        std::fs::write(
            embedded.path().join("manifest.zipline.json"),
            &manifest_json,
        )
        .unwrap();

        let pipeline = FetchPipeline::new(
            Some(embedded.path().to_path_buf()),
            cache(cache_dir.path()),
            Arc::new(FailingHttp),
            Arc::new(Throttle::new(1)),
        );

        let manifest = pipeline
            .fetch_manifest(
                "https://example.com/manifest.zipline.json",
                &NoopListener,
                "app",
            )
            .await
            .unwrap();
        assert_eq!(manifest.main_module_id(), &ModuleId::new("alpha"));
    }
}
