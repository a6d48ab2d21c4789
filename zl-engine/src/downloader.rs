use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::error::Error;
use crate::fetch::FetchPipeline;
use crate::listener::LoadListener;

/// Same pipeline as [`crate::Loader`], different sink: materializes a manifest's modules to a
/// directory instead of linking them into an engine. Dependency ordering is not observable
/// across independent files, so this fans every module out concurrently with no dependency
/// barrier -- the same `JoinSet` fan-out-with-early-abort shape as
/// `peoci::ocidist_cache::Client::get_layers`.
pub struct Downloader {
    pipeline: Arc<FetchPipeline>,
}

impl Downloader {
    pub fn new(pipeline: Arc<FetchPipeline>) -> Self {
        Self { pipeline }
    }

    pub async fn download(
        &self,
        manifest_url: &str,
        download_dir: &Path,
        listener: Arc<dyn LoadListener>,
        app_name: &str,
    ) -> Result<(), Error> {
        tokio::fs::create_dir_all(download_dir)
            .await
            .map_err(|e| Error::Cache(zl_cache::Error::CacheIoError(e.to_string())))?;

        let manifest = self
            .pipeline
            .fetch_manifest(manifest_url, listener.as_ref(), app_name)
            .await?;

        write_atomic(
            &download_dir.join("manifest.zipline.json"),
            manifest.to_json()?.as_bytes(),
        )
        .await?;

        let mut set = JoinSet::new();
        for (module_id, module) in manifest.modules().clone() {
            let pipeline = self.pipeline.clone();
            let download_dir = download_dir.to_path_buf();
            let listener = listener.clone();
            let app_name = app_name.to_string();
            let manifest_url = manifest_url.to_string();
            set.spawn(async move {
                let result =
                    fetch_and_write(&pipeline, &manifest_url, &module, &download_dir).await;
                if let Err(e) = &result {
                    listener.on_module_failed(&app_name, &module_id, e);
                }
                result
            });
        }

        let mut first_err = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_err.get_or_insert(e);
                }
                Err(e) if e.is_panic() => {
                    first_err.get_or_insert(Error::EngineError {
                        module_id: String::new(),
                        message: format!("download task panicked: {e}"),
                    });
                }
                Err(_) => {
                    first_err.get_or_insert(Error::Cancelled);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn fetch_and_write(
    pipeline: &Arc<FetchPipeline>,
    manifest_url: &str,
    module: &zl_manifest::Module,
    download_dir: &Path,
) -> Result<(), Error> {
    let bytes = pipeline.resolve_module_bytes(manifest_url, module).await?;
    let path = download_dir.join(module.sha256.to_hex());
    write_atomic(&path, &bytes).await
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(Error::Cache(zl_cache::Error::CacheIoError(e.to_string())));
    }
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::Cache(zl_cache::Error::CacheIoError(e.to_string())))
}
