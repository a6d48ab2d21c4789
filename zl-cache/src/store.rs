use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use rusqlite::Connection;
use tokio::sync::Notify;

use zl_manifest::Digest;

use crate::db::{self, State};
use crate::error::Error;

struct Inner {
    conn: Connection,
    waiters: HashMap<String, Arc<Notify>>,
}

enum Lookup {
    Ready,
    BecomeWriter(Arc<Notify>),
    Wait(Arc<Notify>),
}

/// Upper bound on a single wait for an in-flight producer before re-checking cache state. `Notify`
/// buffers no wakeup for a waiter that wasn't registered yet when `notify_waiters()` fired, so a
/// fast producer finishing in the gap between observing `DOWNLOADING` and polling `notified()`
/// could otherwise leave a waiter blocked forever; bounding the wait makes a missed wakeup
/// self-heal on the next iteration instead of deadlocking.
const WAIT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

/// A content-addressed blob store bounded by `max_size_bytes`, with LRU eviction over a sqlite
/// metadata index. Two callers racing on the same digest are guaranteed at most one
/// `producer` invocation: the first to observe no row becomes the writer and the rest wait on a
/// per-digest `Notify`.
pub struct ContentCache {
    cache_dir: PathBuf,
    max_size_bytes: u64,
    inner: Mutex<Inner>,
    now_ms: Box<dyn Fn() -> u64 + Send + Sync>,
    on_evicted: Box<dyn Fn(&str) + Send + Sync>,
}

impl ContentCache {
    /// Opens (creating if absent) a cache rooted at `cache_dir`, with a `now_ms` clock source so
    /// tests can drive time deterministically instead of reading the wall clock.
    pub fn open(
        cache_dir: impl Into<PathBuf>,
        max_size_bytes: u64,
        now_ms: impl Fn() -> u64 + Send + Sync + 'static,
    ) -> Result<Self, Error> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)?;
        let conn = db::open(&cache_dir.join("cache.sqlite3"))?;
        Ok(Self {
            cache_dir,
            max_size_bytes,
            inner: Mutex::new(Inner {
                conn,
                waiters: HashMap::new(),
            }),
            now_ms: Box::new(now_ms),
            on_evicted: Box::new(|_digest| {}),
        })
    }

    /// Registers a callback invoked (with the evicted entry's hex digest) whenever a row is
    /// removed by [`Self::evict`] or [`Self::prune`]. Lets a caller (e.g. a `LoadListener`) learn
    /// about cache state transitions without this crate depending on that caller's event type.
    pub fn with_eviction_hook(mut self, on_evicted: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_evicted = Box::new(on_evicted);
        self
    }

    fn now(&self) -> u64 {
        (self.now_ms)()
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.cache_dir.join(digest.to_hex())
    }

    fn tmp_path(&self, digest: &Digest) -> PathBuf {
        self.cache_dir.join(format!("{}.tmp", digest.to_hex()))
    }

    /// Returns the bytes for `digest`, invoking `producer` at most once to obtain them if they
    /// are not already cached. See module docs for the concurrency contract.
    pub async fn get_or_put<F, Fut>(&self, digest: Digest, producer: F) -> Result<Vec<u8>, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, Error>>,
    {
        let mut producer = Some(producer);
        let mut retried_corrupt = false;
        let key = digest.to_hex();

        loop {
            let lookup = {
                let mut inner = self.inner.lock();
                let row = db::get_row(&inner.conn, &key)?;
                match row {
                    Some(row) if row.state == State::Ready => {
                        db::touch(&inner.conn, &key, self.now())?;
                        Lookup::Ready
                    }
                    Some(_downloading) => {
                        let notify = inner
                            .waiters
                            .entry(key.clone())
                            .or_insert_with(|| Arc::new(Notify::new()))
                            .clone();
                        Lookup::Wait(notify)
                    }
                    None => {
                        db::insert_downloading_if_absent(&inner.conn, &key, self.now())?;
                        let notify = Arc::new(Notify::new());
                        inner.waiters.insert(key.clone(), notify.clone());
                        Lookup::BecomeWriter(notify)
                    }
                }
            };

            match lookup {
                Lookup::Ready => match self.read_verified(&digest).await {
                    Ok(bytes) => return Ok(bytes),
                    Err(Error::CorruptCacheEntry(_)) if !retried_corrupt => {
                        retried_corrupt = true;
                        self.evict(&digest).await?;
                        continue;
                    }
                    Err(e) => return Err(e),
                },
                Lookup::Wait(notify) => {
                    // `notify_waiters()` wakes only waiters already registered when it's called; a
                    // waiter that clones the `Arc<Notify>` and calls `.notified()` after the writer
                    // has already finished and notified would otherwise block forever. Bounding the
                    // wait makes a missed wakeup self-heal: we just re-check cache state on the next
                    // loop iteration instead of relying on the notification ever arriving.
                    let _ = tokio::time::timeout(WAIT_POLL_INTERVAL, notify.notified()).await;
                    continue;
                }
                Lookup::BecomeWriter(notify) => {
                    let producer = producer
                        .take()
                        .expect("the DOWNLOADING row is only absent on the first iteration");
                    let result = self.produce_and_store(&digest, producer).await;
                    let mut inner = self.inner.lock();
                    inner.waiters.remove(&key);
                    drop(inner);
                    notify.notify_waiters();
                    return result;
                }
            }
        }
    }

    async fn produce_and_store<F, Fut>(
        &self,
        digest: &Digest,
        producer: F,
    ) -> Result<Vec<u8>, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, Error>>,
    {
        let key = digest.to_hex();
        let bytes = match producer().await {
            Ok(bytes) => bytes,
            Err(e) => {
                let inner = self.inner.lock();
                db::delete_row(&inner.conn, &key)?;
                return Err(e);
            }
        };

        if Digest::of(&bytes) != *digest {
            let inner = self.inner.lock();
            db::delete_row(&inner.conn, &key)?;
            return Err(Error::IntegrityMismatch(key));
        }

        self.write_blob_atomically(digest, &bytes).await?;

        {
            let inner = self.inner.lock();
            db::promote_to_ready(&inner.conn, &key, bytes.len() as u64, self.now())?;
        }
        self.prune().await?;
        Ok(bytes)
    }

    async fn write_blob_atomically(&self, digest: &Digest, bytes: &[u8]) -> Result<(), Error> {
        let tmp = self.tmp_path(digest);
        let result = tokio::fs::write(&tmp, bytes).await;
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tokio::fs::rename(&tmp, self.blob_path(digest)).await?;
        Ok(())
    }

    async fn read_verified(&self, digest: &Digest) -> Result<Vec<u8>, Error> {
        let bytes = tokio::fs::read(self.blob_path(digest)).await?;
        if Digest::of(&bytes) != *digest {
            return Err(Error::CorruptCacheEntry(digest.to_hex()));
        }
        Ok(bytes)
    }

    async fn evict(&self, digest: &Digest) -> Result<(), Error> {
        warn!("evicting corrupt cache entry {digest}");
        let key = digest.to_hex();
        {
            let inner = self.inner.lock();
            db::delete_row(&inner.conn, &key)?;
        }
        let _ = tokio::fs::remove_file(self.blob_path(digest)).await;
        (self.on_evicted)(&key);
        Ok(())
    }

    /// While the sum of `READY` row sizes exceeds `max_size_bytes`, evicts the `READY` row with
    /// the smallest `last_access_ms` (ties broken by ascending digest).
    pub async fn prune(&self) -> Result<(), Error> {
        loop {
            let victim = {
                let inner = self.inner.lock();
                let total = db::sum_ready_size(&inner.conn)?;
                if total <= self.max_size_bytes {
                    return Ok(());
                }
                db::oldest_ready(&inner.conn)?
            };
            let Some(row) = victim else {
                return Ok(());
            };
            info!(
                "pruning cache entry {} (size={}, last_access_ms={})",
                row.digest, row.size_bytes, row.last_access_ms
            );
            {
                let inner = self.inner.lock();
                db::delete_row(&inner.conn, &row.digest)?;
            }
            let _ = tokio::fs::remove_file(self.cache_dir.join(&row.digest)).await;
            (self.on_evicted)(&row.digest);
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}
