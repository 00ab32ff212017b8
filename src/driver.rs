//! Request driver: classification, body buffering, fingerprinting, and the
//! single call into [`crate::cache::DiskCacheEngine`].
//!
//! The two classification predicates and their constants come from the
//! upstream's documented request shapes for git-upload-pack and Debian pool
//! fetches, rather than a source file that already encoded them.

use crate::cache::DiskCacheEngine;
use crate::error::CacheError;
use crate::fingerprint::{fingerprint, FingerprintInput};
use crate::populator::{HttpPopulator, Populator, UpstreamRequest};
use crate::sink::ResponseSink;
use crate::upstreams::UpstreamMatcher;
use std::sync::Arc;

/// A small limit on git-upload-pack request bodies: these are negotiation
/// requests, not pack transfers, so legitimate ones stay on the order of
/// 64 KiB.
const MAX_GIT_UPLOAD_PACK_BODY: usize = 64 * 1024;

/// An inbound request as read off the wire, already fully buffered.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: String,
    pub host: String,
    pub path: String,
    pub url: String,
    pub protocol: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl InboundRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }
}

fn is_git_upload_pack(req: &InboundRequest, matcher: &UpstreamMatcher) -> bool {
    req.method.eq_ignore_ascii_case("POST")
        && !req.body.is_empty()
        && req.body.len() <= MAX_GIT_UPLOAD_PACK_BODY
        && req.header("content-type") == Some("application/x-git-upload-pack-request")
        && req.header("accept") == Some("application/x-git-upload-pack-result")
        && !req.has_header("cache-control")
        && !req.has_header("authorization")
        && matcher.listed(&req.host, &req.path)
}

fn is_deb_pool(req: &InboundRequest, matcher: &UpstreamMatcher) -> bool {
    req.method.eq_ignore_ascii_case("GET")
        && !req.has_header("cache-control")
        && !req.has_header("authorization")
        && matcher.listed(&req.host, &req.path)
}

/// The two upstream sets classification checks against.
pub struct Matchers {
    pub git_packs: UpstreamMatcher,
    pub deb_pools: UpstreamMatcher,
}

/// Decides whether a request is cacheable and, if so, drives it through the
/// cache engine; otherwise forwards it straight upstream.
pub struct Driver {
    matchers: Matchers,
    engine: DiskCacheEngine,
    http_client: reqwest::Client,
}

impl Driver {
    pub fn new(matchers: Matchers, engine: DiskCacheEngine, http_client: reqwest::Client) -> Self {
        Self { matchers, engine, http_client }
    }

    fn classify(&self, req: &InboundRequest) -> bool {
        is_git_upload_pack(req, &self.matchers.git_packs) || is_deb_pool(req, &self.matchers.deb_pools)
    }

    /// Classify → buffer (already done by the caller) → fingerprint →
    /// `cache.get`, or forward straight upstream for anything uncacheable.
    pub async fn drive(&self, req: InboundRequest, client: &mut dyn ResponseSink) -> Result<(), CacheError> {
        let populator: Arc<dyn Populator> = Arc::new(HttpPopulator::new(
            self.http_client.clone(),
            UpstreamRequest {
                method: req.method.clone(),
                url: req.url.clone(),
                headers: req.headers.clone(),
                body: req.body.clone(),
            },
        ));

        if !self.classify(&req) {
            return populator.populate(client).await.map_err(CacheError::from);
        }

        let key = fingerprint(&FingerprintInput {
            method: &req.method,
            url: &req.url,
            protocol: &req.protocol,
            headers: &req.headers,
            body: &req.body,
        });

        self.engine.get(&key, populator, client).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> InboundRequest {
        InboundRequest {
            method: "GET".to_string(),
            host: "deb.example.com".to_string(),
            path: "/pool/main/a/apt/apt_2.0.0.deb".to_string(),
            url: "http://deb.example.com/pool/main/a/apt/apt_2.0.0.deb".to_string(),
            protocol: "HTTP/1.1".to_string(),
            headers: vec![],
            body: vec![],
        }
    }

    fn matcher(hosts: &str) -> UpstreamMatcher {
        UpstreamMatcher::parse(hosts)
    }

    #[test]
    fn deb_pool_get_is_classified_when_listed_and_unconditional() {
        let req = base_request();
        let deb_pools = matcher("deb.example.com");
        assert!(is_deb_pool(&req, &deb_pools));
    }

    #[test]
    fn deb_pool_get_is_rejected_when_not_listed() {
        let req = base_request();
        let deb_pools = matcher("other.example.com");
        assert!(!is_deb_pool(&req, &deb_pools));
    }

    #[test]
    fn deb_pool_get_is_rejected_with_authorization_header() {
        let mut req = base_request();
        req.headers.push(("Authorization".to_string(), "Basic abc".to_string()));
        let deb_pools = matcher("deb.example.com");
        assert!(!is_deb_pool(&req, &deb_pools));
    }

    #[test]
    fn git_upload_pack_post_is_classified() {
        let req = InboundRequest {
            method: "POST".to_string(),
            host: "git.example.com".to_string(),
            path: "/repo.git/git-upload-pack".to_string(),
            url: "http://git.example.com/repo.git/git-upload-pack".to_string(),
            protocol: "HTTP/1.1".to_string(),
            headers: vec![
                ("Content-Type".to_string(), "application/x-git-upload-pack-request".to_string()),
                ("Accept".to_string(), "application/x-git-upload-pack-result".to_string()),
            ],
            body: b"0032want deadbeef\n".to_vec(),
        };
        let git_packs = matcher("git.example.com");
        assert!(is_git_upload_pack(&req, &git_packs));
    }

    #[test]
    fn git_upload_pack_post_is_rejected_over_size_limit() {
        let mut req = InboundRequest {
            method: "POST".to_string(),
            host: "git.example.com".to_string(),
            path: "/repo.git/git-upload-pack".to_string(),
            url: "http://git.example.com/repo.git/git-upload-pack".to_string(),
            protocol: "HTTP/1.1".to_string(),
            headers: vec![
                ("Content-Type".to_string(), "application/x-git-upload-pack-request".to_string()),
                ("Accept".to_string(), "application/x-git-upload-pack-result".to_string()),
            ],
            body: vec![],
        };
        req.body = vec![0u8; MAX_GIT_UPLOAD_PACK_BODY + 1];
        let git_packs = matcher("git.example.com");
        assert!(!is_git_upload_pack(&req, &git_packs));
    }

    #[test]
    fn git_upload_pack_post_is_rejected_without_matching_content_type() {
        let req = InboundRequest {
            method: "POST".to_string(),
            host: "git.example.com".to_string(),
            path: "/repo.git/git-upload-pack".to_string(),
            url: "http://git.example.com/repo.git/git-upload-pack".to_string(),
            protocol: "HTTP/1.1".to_string(),
            headers: vec![("Content-Type".to_string(), "application/octet-stream".to_string())],
            body: b"anything".to_vec(),
        };
        let git_packs = matcher("git.example.com");
        assert!(!is_git_upload_pack(&req, &git_packs));
    }
}
