//! Upstream matcher: decides whether a request's host/path is configured
//! as cacheable.
//!
//! Grounded on `original_source/response_cache/upstreams.go`: configured
//! from a comma-separated list of `host[/path-prefix]` tokens, a host may
//! appear more than once with different prefixes, and an empty prefix
//! matches any path under that host.

use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Default)]
pub struct UpstreamMatcher {
    // host (lowercased) -> path prefixes configured for that host
    hosts: FxHashMap<String, Vec<String>>,
}

impl UpstreamMatcher {
    /// Parse a comma-separated `host[/path-prefix]` list, e.g.
    /// `"github.com/willbryant,github.com/rails,gitlab.com"`. An empty
    /// string produces a matcher that matches nothing.
    pub fn parse(cache_servers: &str) -> Self {
        let mut hosts: FxHashMap<String, Vec<String>> = FxHashMap::default();

        for token in cache_servers.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }

            let (host, path) = match token.split_once('/') {
                Some((host, rest)) => (host, format!("/{rest}")),
                None => (token, String::new()),
            };

            hosts.entry(host.to_ascii_lowercase()).or_default().push(path);
        }

        Self { hosts }
    }

    /// True iff `host` (case-insensitive) is configured and `path` is equal
    /// to, or starts with, one of that host's configured prefixes. An empty
    /// prefix matches any path.
    pub fn listed(&self, host: &str, path: &str) -> bool {
        let host = host.to_ascii_lowercase();
        match self.hosts.get(&host) {
            Some(prefixes) => prefixes.iter().any(|prefix| prefix.is_empty() || path.starts_with(prefix.as_str())),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_configuration_matches_nothing() {
        let m = UpstreamMatcher::parse("");
        assert!(!m.listed("github.com", "/foo"));
    }

    #[test]
    fn bare_host_matches_any_path() {
        let m = UpstreamMatcher::parse("gitlab.com");
        assert!(m.listed("gitlab.com", "/anything/at/all"));
        assert!(m.listed("GitLab.com", "/"));
    }

    #[test]
    fn host_with_path_prefix_requires_prefix_match() {
        let m = UpstreamMatcher::parse("github.com/willbryant,github.com/rails");
        assert!(m.listed("github.com", "/willbryant/proximate.git"));
        assert!(m.listed("github.com", "/rails/rails.git"));
        assert!(!m.listed("github.com", "/someone-else/repo.git"));
    }

    #[test]
    fn unlisted_host_never_matches() {
        let m = UpstreamMatcher::parse("github.com");
        assert!(!m.listed("example.com", "/"));
    }

    #[test]
    fn path_equal_to_prefix_matches() {
        let m = UpstreamMatcher::parse("security.ubuntu.com/ubuntu");
        assert!(m.listed("security.ubuntu.com", "/ubuntu"));
    }
}
