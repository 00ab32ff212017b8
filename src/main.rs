//! Binary entry point: parse configuration, wire the cache engine, the
//! upstream matchers, and the HTTP client into a [`proximate::driver::Driver`],
//! then run the accept loop.

use clap::Parser;
use proximate::cache::DiskCacheEngine;
use proximate::config::Config;
use proximate::driver::{Driver, Matchers};
use proximate::logging;
use proximate::server;
use proximate::upstreams::UpstreamMatcher;
use std::sync::Arc;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = Config::parse();
    logging::init(config.quiet);

    std::fs::create_dir_all(&config.data)?;

    let matchers = Matchers {
        git_packs: UpstreamMatcher::parse(&config.cache_git_packs),
        deb_pools: UpstreamMatcher::parse(&config.cache_deb_pools),
    };
    let engine = DiskCacheEngine::new(config.data.clone());
    let http_client = reqwest::Client::builder()
        .build()
        .expect("failed to build upstream HTTP client");
    let driver = Arc::new(Driver::new(matchers, engine, http_client));

    server::run(config, driver).await
}
