use log::{error, warn};

use zl_manifest::ModuleId;

use crate::error::Error;

/// Observability seam for the loader: every failure is reported here, with application name and
/// URL context, before it is raised to the caller. Logging happens inline at every fallible branch
/// (mirroring `peoci::ocidist_cache::Client::get_blob`'s hit/miss `info!` calls), lifted into a
/// trait so callers can swap in their own sink without forking this crate. All methods default to
/// doing nothing, so a listener only needs to override what it cares about.
pub trait LoadListener: Send + Sync {
    fn on_manifest_fetch_failed(&self, _app: &str, _manifest_url: &str, _error: &Error) {}
    fn on_module_failed(&self, _app: &str, _module_id: &ModuleId, _error: &Error) {}
    fn on_cache_evicted(&self, _app: &str, _digest: &str) {}
    fn on_signature_verification_failed(&self, _app: &str, _error: &Error) {}
}

/// Default [`LoadListener`] that reports every event through `log::{warn, error}`.
pub struct LoggingListener;

impl LoadListener for LoggingListener {
    fn on_manifest_fetch_failed(&self, app: &str, manifest_url: &str, error: &Error) {
        warn!("{app}: manifest fetch failed for {manifest_url}: {error}");
    }

    fn on_module_failed(&self, app: &str, module_id: &ModuleId, error: &Error) {
        error!("{app}: module {module_id} failed: {error}");
    }

    fn on_cache_evicted(&self, app: &str, digest: &str) {
        warn!("{app}: cache entry {digest} evicted");
    }

    fn on_signature_verification_failed(&self, app: &str, error: &Error) {
        error!("{app}: signature verification failed: {error}");
    }
}

/// No-op listener for callers (and tests) that do not care about observability events.
pub struct NoopListener;

impl LoadListener for NoopListener {}
