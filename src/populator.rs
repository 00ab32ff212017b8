//! The `Populator` hook and a concrete implementation that performs the
//! real upstream fetch with `reqwest`.
//!
//! The core (`cache.rs`) only depends on the `Populator` trait — it has no
//! idea whether `populate` hits the network, a mock, or a local file. This
//! is a trait object in place of a first-class closure.

use crate::sink::ResponseSink;
use async_trait::async_trait;
use std::io;

/// One upstream fetch. Implementations write status, headers, and body to
/// `writer` exactly as the original `missFn(httpResponseWriter) -> err`
/// contract.
#[async_trait]
pub trait Populator: Send + Sync {
    async fn populate(&self, writer: &mut dyn ResponseSink) -> io::Result<()>;
}

/// Everything needed to replay a buffered client request against the real
/// upstream host.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Hop-by-hop headers that must not be forwarded upstream or relayed back
/// to the client verbatim (RFC 7230 §6.1).
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// A [`Populator`] that re-issues the buffered request against the real
/// upstream over HTTP, using a shared `reqwest::Client`.
pub struct HttpPopulator {
    client: reqwest::Client,
    request: UpstreamRequest,
}

impl HttpPopulator {
    pub fn new(client: reqwest::Client, request: UpstreamRequest) -> Self {
        Self { client, request }
    }
}

#[async_trait]
impl Populator for HttpPopulator {
    async fn populate(&self, writer: &mut dyn ResponseSink) -> io::Result<()> {
        let method = reqwest::Method::from_bytes(self.request.method.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let mut builder = self.client.request(method, &self.request.url);
        for (name, value) in &self.request.headers {
            if is_hop_by_hop(name) {
                continue;
            }
            builder = builder.header(name, value);
        }
        if !self.request.body.is_empty() {
            builder = builder.body(self.request.body.clone());
        }

        let response = builder.send().await.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_string()))
            .collect();
        writer.write_header(status, &headers)?;

        let mut body = response.bytes_stream();
        use futures_util::StreamExt;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            writer.write(&chunk).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::BufferedSink;

    struct FixedPopulator {
        status: u16,
        headers: Vec<(String, String)>,
        chunks: Vec<Vec<u8>>,
    }

    #[async_trait]
    impl Populator for FixedPopulator {
        async fn populate(&self, writer: &mut dyn ResponseSink) -> io::Result<()> {
            writer.write_header(self.status, &self.headers)?;
            for chunk in &self.chunks {
                writer.write(chunk).await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn fixed_populator_writes_through_to_sink() {
        let populator = FixedPopulator {
            status: 200,
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            chunks: vec![b"hello ".to_vec(), b"world".to_vec()],
        };
        let mut sink = BufferedSink::default();
        populator.populate(&mut sink).await.unwrap();
        assert_eq!(sink.status, 200);
        assert_eq!(sink.body, b"hello world");
    }

    #[test]
    fn hop_by_hop_headers_are_identified_case_insensitively() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("TRANSFER-ENCODING"));
        assert!(!is_hop_by_hop("Content-Type"));
    }
}
