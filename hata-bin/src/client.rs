use anyhow::{Context, Result};
use hata_lib::{Client, ClientBuilder};
use http::HeaderMap;

use crate::options::{Config, HeaderMapExt};

/// Creates a client according to the command-line config
pub(crate) fn create(cfg: &Config) -> Result<Client> {
    let headers = HeaderMap::from_header_pairs(&cfg.header)?;

    ClientBuilder::builder()
        .token(cfg.token.clone())
        .api_base(cfg.api_base.clone())
        .user_agent(cfg.user_agent.clone())
        .custom_headers(headers)
        .max_retries(cfg.max_retries)
        .retry_wait_time(cfg.retry_wait_time)
        .timeout(cfg.timeout)
        .connector(cfg.connector())
        .rate_limit(cfg.rate_limit())
        .build()
        .client()
        .context("Failed to create request client")
}
