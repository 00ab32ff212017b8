//! CLI configuration, `clap`-derived, mirroring
//! `original_source/proximate.go`'s flag set one-for-one with
//! `PROXIMATE_*` environment overrides via `clap`'s `env` feature —
//! the idiomatic replacement for the original's hand-rolled
//! `setFlagFromEnvironment`.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "proximate", about = "A forwarding HTTP proxy with a streaming, single-flight response cache")]
pub struct Config {
    /// Cache root directory.
    #[arg(long, env = "PROXIMATE_DATA", default_value = "/var/cache/proximate")]
    pub data: PathBuf,

    /// Comma-separated `host[/path-prefix]` list of upstreams whose
    /// git-upload-pack responses are cached.
    #[arg(long, env = "PROXIMATE_CACHE_GIT_PACKS", default_value = "")]
    pub cache_git_packs: String,

    /// Comma-separated `host[/path-prefix]` list of upstreams whose
    /// Debian pool responses are cached.
    #[arg(long, env = "PROXIMATE_CACHE_DEB_POOLS", default_value = "")]
    pub cache_deb_pools: String,

    /// Address to bind the listener to.
    #[arg(long, env = "PROXIMATE_LISTEN", default_value = "0.0.0.0")]
    pub listen: String,

    /// Port to bind the listener to.
    #[arg(long, env = "PROXIMATE_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Suppress startup and per-request logging.
    #[arg(long, env = "PROXIMATE_QUIET", default_value_t = false)]
    pub quiet: bool,

    /// Request path treated as a health check rather than forwarded.
    #[arg(long, env = "PROXIMATE_HEALTH_CHECK_PATH", default_value = "/health-check")]
    pub health_check_path: String,

    /// Report unhealthy (503) unless this file exists.
    #[arg(long, env = "PROXIMATE_HEALTHY_IF_FILE")]
    pub healthy_if_file: Option<PathBuf>,

    /// Report unhealthy (503) if this file exists.
    #[arg(long, env = "PROXIMATE_HEALTHY_UNLESS_FILE")]
    pub healthy_unless_file: Option<PathBuf>,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.listen, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_with_no_arguments() {
        let config = Config::parse_from(["proximate"]);
        assert_eq!(config.port, 8080);
        assert!(!config.quiet);
        assert_eq!(config.health_check_path, "/health-check");
    }

    #[test]
    fn bind_address_combines_listen_and_port() {
        let mut config = Config::parse_from(["proximate"]);
        config.listen = "127.0.0.1".to_string();
        config.port = 9090;
        assert_eq!(config.bind_address(), "127.0.0.1:9090");
    }

    #[test]
    fn explicit_flags_override_defaults() {
        let config = Config::parse_from([
            "proximate",
            "--data",
            "/tmp/cache",
            "--cache-git-packs",
            "github.com/rails",
            "--quiet",
        ]);
        assert_eq!(config.data, PathBuf::from("/tmp/cache"));
        assert_eq!(config.cache_git_packs, "github.com/rails");
        assert!(config.quiet);
    }
}
