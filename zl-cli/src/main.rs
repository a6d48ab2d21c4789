use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;

use zl_cache::ContentCache;
use zl_engine::{
    Downloader, FetchPipeline, LoadListener, LoggingListener, ReqwestDownloader, Throttle,
};

/// Materializes a zipline manifest and its modules to a directory.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// URL of the manifest to download.
    manifest_url: String,

    /// Directory to write the manifest and module files to.
    download_dir: PathBuf,

    /// Offline-fallback directory holding `manifest.zipline.json` and trusted module files.
    #[arg(long)]
    embedded_dir: Option<PathBuf>,

    /// Directory for the on-disk content cache.
    #[arg(long, default_value = "zipline-cache")]
    cache_dir: PathBuf,

    /// Maximum total size, in bytes, of the content cache.
    #[arg(long, default_value_t = 512 * 1024 * 1024)]
    cache_size: u64,

    /// Maximum number of concurrent network downloads.
    #[arg(long, default_value_t = 3)]
    concurrent_downloads: usize,

    /// Application name reported to the load listener.
    #[arg(long, default_value = "zipline-download")]
    app_name: String,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the epoch")
        .as_millis() as u64
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();

    let args = Args::parse();

    let listener = Arc::new(LoggingListener);
    let hook_listener = listener.clone();
    let app_name = args.app_name.clone();
    let cache = ContentCache::open(&args.cache_dir, args.cache_size, now_ms)
        .unwrap_or_else(|e| panic!("failed to open cache at {:?}: {e}", args.cache_dir))
        .with_eviction_hook(move |digest| hook_listener.on_cache_evicted(&app_name, digest));
    let http = ReqwestDownloader::new().expect("failed to build http client");
    let throttle = Throttle::new(args.concurrent_downloads);

    let pipeline = Arc::new(FetchPipeline::new(
        args.embedded_dir,
        Arc::new(cache),
        Arc::new(http),
        Arc::new(throttle),
    ));

    let downloader = Downloader::new(pipeline);
    match downloader
        .download(
            &args.manifest_url,
            &args.download_dir,
            listener,
            &args.app_name,
        )
        .await
    {
        Ok(()) => log::info!(
            "downloaded {} to {:?}",
            args.manifest_url,
            args.download_dir
        ),
        Err(e) => {
            log::error!("download failed: {e}");
            std::process::exit(1);
        }
    }
}
