//! The HTTP-writer contract the core hands to a [`crate::populator::Populator`]
//! and to its own callers.
//!
//! This plays the role of Go's `http.ResponseWriter` in
//! `original_source/response_cache/disk_cache_writer.go` and
//! `cache_writer.go`: something status/headers/body can be written to,
//! without the core needing to know whether the other end is a real TCP
//! client, a test harness, or (inside the populator) a tee to both the
//! client and the temp file.

use async_trait::async_trait;
use std::io;

/// Anything that can receive an HTTP response: status line, headers, then
/// a body written in one or more chunks.
#[async_trait]
pub trait ResponseSink: Send {
    /// Write the status line and headers. Called at most once, before any
    /// call to `write`.
    fn write_header(&mut self, status: u16, headers: &[(String, String)]) -> io::Result<()>;

    /// Write a chunk of body bytes. May be called any number of times
    /// after `write_header`.
    async fn write(&mut self, data: &[u8]) -> io::Result<()>;
}

/// An in-memory [`ResponseSink`], used by tests and by the "uncacheable /
/// cache-error fallback" paths where the driver needs to materialize a
/// response before forwarding it on.
#[derive(Debug, Default)]
pub struct BufferedSink {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[async_trait]
impl ResponseSink for BufferedSink {
    fn write_header(&mut self, status: u16, headers: &[(String, String)]) -> io::Result<()> {
        self.status = status;
        self.headers = headers.to_vec();
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.body.extend_from_slice(data);
        Ok(())
    }
}
