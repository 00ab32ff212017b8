//! Disk cache engine — the heart of the crate.
//!
//! Orchestrates hit detection, single-flight miss dispatch, temp-file
//! lifecycle, atomic publication, and the in-flight registry. Grounded on
//! `original_source/response_cache/disk_cache.go` (hit path, temp-file +
//! rename publication) and `disk_cache_writer.go` (the writer that
//! transitions the progress tracker as the header and body are written),
//! with the single-flight registry built from an `FxHashMap` + `parking_lot::Mutex`
//! pairing: one in-flight entry per key, so concurrent identical requests
//! share a single upstream fetch.
//!
//! Design decision (documented in `DESIGN.md`): the populator never holds a
//! reference to any particular caller's response sink. It writes only to
//! the temp file and the progress tracker (exactly mirroring
//! `disk_cache_writer.go`, which has no concept of a client writer at all).
//! Every `get()` caller — whether it created the entry or joined an
//! in-flight one — streams bytes to its own sink by attaching a reader to
//! the shared streaming file. This is what makes a client disconnect
//! harmless to the populator and to other readers: only that one
//! reader detaches, the populate task and the registry entry are
//! untouched.

use crate::error::CacheError;
use crate::header_codec::EntryHeader;
use crate::populator::Populator;
use crate::progress::ProgressTracker;
use crate::shared_file::SharedStreamingFile;
use crate::sink::ResponseSink;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::warn;

const READ_CHUNK: usize = 64 * 1024;

/// Default cacheability predicate: only status 200 is cached.
pub fn is_cacheable(status: u16) -> bool {
    status == 200
}

fn content_length(headers: &[(String, String)]) -> Option<u64> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

struct InFlightEntry {
    tracker: Arc<ProgressTracker>,
    shared_file: Arc<SharedStreamingFile>,
}

struct Inner {
    cache_root: PathBuf,
    registry: parking_lot::Mutex<FxHashMap<String, Arc<InFlightEntry>>>,
}

/// A content-addressed, concurrent, streaming HTTP response cache backed by
/// files under `cache_root`. Cheap to clone — internally an `Arc`.
#[derive(Clone)]
pub struct DiskCacheEngine {
    inner: Arc<Inner>,
}

impl DiskCacheEngine {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache_root: cache_root.into(),
                registry: parking_lot::Mutex::new(FxHashMap::default()),
            }),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.inner.cache_root.join(key)
    }

    /// Get a cached response, populating it via `populator` on a miss.
    ///
    /// `Ok(())` means `client` received a full response, served either from
    /// disk or as the tail of a population this call joined. `Err(_)` means
    /// the underlying upstream response was uncacheable, or that both the
    /// cache and the fallback upstream retry failed — `client` may still
    /// have received a partial or complete response in either case, exactly
    /// by re-invoking the populator directly against its own client.
    pub async fn get(
        &self,
        key: &str,
        populator: Arc<dyn Populator>,
        client: &mut dyn ResponseSink,
    ) -> Result<(), CacheError> {
        // 1. optimistic hit, no registry lock taken
        match self.try_serve_published(key, client).await {
            Ok(true) => return Ok(()),
            Ok(false) => {} // not found; fall through to the miss path
            Err(e) => {
                warn!(key, error = %e, "cache read failed, falling back to miss path");
            }
        }

        // 2. register or join the single-flight population
        let entry = self.register_or_join(key, Arc::clone(&populator))?;

        // 3. wait for the header to be durable. This blocks on a
        // `parking_lot` condvar, so it must not run directly on the async
        // executor: the populator that wakes it runs as a `tokio::spawn`
        // task on that same executor, and on a current-thread runtime the
        // only worker would be parked here, unable to ever poll it.
        let tracker = Arc::clone(&entry.tracker);
        let wait_result = tokio::task::spawn_blocking(move || tracker.wait_for_response())
            .await
            .expect("blocking wait_for_response task panicked");

        match wait_result {
            Ok(()) => {}
            Err(CacheError::Uncacheable) => {
                populator.populate(client).await.map_err(CacheError::from)?;
                return Err(CacheError::Uncacheable);
            }
            Err(original) => {
                warn!(key, error = %original, "populator failed, re-issuing upstream request for this client");
                if let Err(retry_err) = populator.populate(client).await {
                    return Err(CacheError::from(retry_err));
                }
                return Err(original);
            }
        }

        // 4. stream from the shared in-progress (or just-finished) file
        self.stream_in_progress(key, &entry, client).await
    }

    async fn try_serve_published(&self, key: &str, client: &mut dyn ResponseSink) -> Result<bool, CacheError> {
        let path = self.entry_path(key);
        let file = match tokio::task::spawn_blocking(move || File::open(&path))
            .await
            .expect("blocking open task panicked")
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(CacheError::from(e)),
        };

        let (file, header) = tokio::task::spawn_blocking(move || {
            let mut file = file;
            let header = EntryHeader::decode_from(&mut file);
            (file, header)
        })
        .await
        .expect("blocking decode task panicked");

        let header = header?;
        client.write_header(header.status, &header.headers).map_err(CacheError::from)?;
        copy_blocking_to_sink(file, client).await?;
        Ok(true)
    }

    fn register_or_join(&self, key: &str, populator: Arc<dyn Populator>) -> Result<Arc<InFlightEntry>, CacheError> {
        let mut registry = self.inner.registry.lock();
        if let Some(existing) = registry.get(key) {
            return Ok(Arc::clone(existing));
        }

        let temp_file = NamedTempFile::new_in(&self.inner.cache_root).map_err(CacheError::from)?;
        let backing_file = temp_file.as_file().try_clone().map_err(CacheError::from)?;

        let tracker = Arc::new(ProgressTracker::new());
        let shared_file = SharedStreamingFile::new(backing_file);

        let entry = Arc::new(InFlightEntry { tracker: Arc::clone(&tracker), shared_file: Arc::clone(&shared_file) });
        registry.insert(key.to_string(), Arc::clone(&entry));
        drop(registry);

        let engine = self.clone();
        let key_owned = key.to_string();
        tokio::spawn(async move {
            engine.populate(key_owned, temp_file, tracker, shared_file, populator).await;
        });

        Ok(entry)
    }

    async fn stream_in_progress(
        &self,
        key: &str,
        entry: &InFlightEntry,
        client: &mut dyn ResponseSink,
    ) -> Result<(), CacheError> {
        let mut reader = match entry.shared_file.spawn_reader() {
            Ok(reader) => reader,
            Err(CacheError::NotFound) => {
                // The writer already released its reference (closed
                // successfully) before we attached as a reader. The file is
                // published under `key` by the time `close_writer` runs, so
                // the optimistic published-file path now serves it.
                return match self.try_serve_published(key, client).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(CacheError::NotFound),
                    Err(e) => Err(e),
                };
            }
            Err(e) => return Err(e),
        };

        let header = tokio::task::spawn_blocking(move || {
            let header = EntryHeader::decode_from(&mut reader);
            (reader, header)
        })
        .await
        .expect("blocking header decode task panicked");
        let (mut reader, header) = header;
        let header = header?;

        client.write_header(header.status, &header.headers).map_err(CacheError::from)?;

        loop {
            let (returned_reader, result) = tokio::task::spawn_blocking(move || {
                let mut buf = vec![0u8; READ_CHUNK];
                let outcome = reader.read(&mut buf);
                (reader, outcome.map(|n| {
                    buf.truncate(n);
                    buf
                }))
            })
            .await
            .expect("blocking body read task panicked");
            reader = returned_reader;

            match result {
                Ok(chunk) if chunk.is_empty() => return Ok(()), // EOF
                Ok(chunk) => client.write(&chunk).await.map_err(CacheError::from)?,
                Err(e) => return Err(e),
            }
        }
    }

    /// Drive a single-flight population: invoke the populator against a
    /// sink that writes only to the temp file and the progress tracker,
    /// then publish (rename) on success or discard on failure/
    /// uncacheable, and finally remove the registry entry.
    async fn populate(
        &self,
        key: String,
        temp_file: NamedTempFile,
        tracker: Arc<ProgressTracker>,
        shared_file: Arc<SharedStreamingFile>,
        populator: Arc<dyn Populator>,
    ) {
        let mut sink =
            TempFileSink::new(Arc::clone(&shared_file), Arc::clone(&tracker));

        if let Err(e) = populator.populate(&mut sink).await {
            sink.fail(CacheError::io(e));
        }

        if sink.is_live() {
            if let Some(expected) = sink.expected_length {
                if expected != sink.written {
                    sink.fail(CacheError::Truncated { expected, got: sink.written });
                }
            }
        }

        if sink.is_live() {
            if let Err(e) = shared_file.sync() {
                sink.fail(CacheError::io(e));
            }
        }

        if sink.is_live() {
            let final_path = self.entry_path(&key);
            let persisted = tokio::task::spawn_blocking(move || temp_file.persist(final_path))
                .await
                .expect("blocking persist task panicked");

            match persisted {
                Ok(_file) => {
                    tracker.success();
                    shared_file.close_writer();
                }
                Err(persist_err) => {
                    let err = CacheError::io(persist_err.error);
                    tracker.failure(err.clone());
                    shared_file.abort(err);
                }
            }
        } else {
            // `temp_file` is dropped here (never persisted), which removes
            // it from disk per `tempfile`'s own `Drop` impl — there is no
            // published path to clean up because nothing was renamed.
            shared_file.abort(sink.failure_reason());
        }

        self.inner.registry.lock().remove(&key);
    }

    /// Remove every non-hidden entry under the cache root. Hidden files
    /// (leading `.`, e.g. lockfiles an operator may have placed) are left
    /// alone. Safe to call while idle; concurrent behavior with active
    /// populators is not otherwise constrained.
    pub fn clear(&self) -> io::Result<()> {
        for entry in std::fs::read_dir(&self.inner.cache_root)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            if entry.file_type()?.is_file() {
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

async fn copy_blocking_to_sink(mut file: File, client: &mut dyn ResponseSink) -> Result<(), CacheError> {
    loop {
        let (returned_file, chunk) = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; READ_CHUNK];
            let result = file.read(&mut buf);
            (file, result.map(|n| {
                buf.truncate(n);
                buf
            }))
        })
        .await
        .expect("blocking file read task panicked");
        file = returned_file;

        let chunk = chunk.map_err(CacheError::from)?;
        if chunk.is_empty() {
            return Ok(());
        }
        client.write(&chunk).await.map_err(CacheError::from)?;
    }
}

/// Writes an upstream response into the temp file and the progress
/// tracker. Direct Rust analogue of `disk_cache_writer.go`'s
/// `diskCacheWriter`: no client is involved here at all.
struct TempFileSink {
    shared_file: Arc<SharedStreamingFile>,
    tracker: Arc<ProgressTracker>,
    cacheable: bool,
    aborted: bool,
    expected_length: Option<u64>,
    written: u64,
    reason: Option<CacheError>,
}

impl TempFileSink {
    fn new(shared_file: Arc<SharedStreamingFile>, tracker: Arc<ProgressTracker>) -> Self {
        Self {
            shared_file,
            tracker,
            cacheable: true,
            aborted: false,
            expected_length: None,
            written: 0,
            reason: None,
        }
    }

    fn is_live(&self) -> bool {
        self.cacheable && !self.aborted
    }

    fn fail(&mut self, err: CacheError) {
        if self.aborted {
            return; // terminal states are sticky
        }
        self.aborted = true;
        self.reason = Some(err.clone());
        self.tracker.failure(err);
    }

    fn failure_reason(&self) -> CacheError {
        self.reason.clone().unwrap_or(CacheError::Uncacheable)
    }
}

#[async_trait]
impl ResponseSink for TempFileSink {
    fn write_header(&mut self, status: u16, headers: &[(String, String)]) -> io::Result<()> {
        if !is_cacheable(status) {
            self.cacheable = false;
            self.tracker.uncacheable();
            return Ok(());
        }

        self.expected_length = content_length(headers);

        let header = EntryHeader::new(status, headers.to_vec());
        let mut encoded = Vec::new();
        if let Err(e) = header.encode_to(&mut encoded) {
            self.fail(e);
            return Ok(());
        }
        if let Err(e) = self.shared_file.write(&encoded) {
            self.fail(CacheError::from(e));
            return Ok(());
        }

        self.tracker.set_reading();
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.is_live() {
            match self.shared_file.write(data) {
                Ok(n) => {
                    self.tracker.wrote(n as u64);
                    self.written += n as u64;
                }
                Err(e) => self.fail(CacheError::from(e)),
            }
        }
        Ok(())
    }
}
