//! `hata_lib` is the HTTP plumbing of a Discord API client: rate-limit
//! governance for the REST API and the connection pool underneath it.
//!
//! Most users only need a [`Client`], which wires a [`RateLimiter`] and a
//! [`Connector`] together and retries rate limited requests transparently:
//!
//! ```no_run
//! use hata_lib::{ClientBuilder, Result, ratelimit::groups};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = ClientBuilder::builder()
//!         .token(Some("my-bot-token".into()))
//!         .build()
//!         .client()?;
//!     let channel_id = 81384788765712384;
//!     let response = client
//!         .get(&format!("channels/{channel_id}"), &groups::CHANNEL_GET, channel_id)
//!         .await?;
//!     println!("{}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! The building blocks are public as well. A [`RatelimitHandler`] can gate
//! any kind of work, not only HTTP requests:
//!
//! ```
//! use hata_lib::ratelimit::{Limiter, RateLimiter, RateLimitConfig, RatelimitGroup};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let limiter = RateLimiter::with_config(RateLimitConfig::default());
//! let group = RatelimitGroup::new(Limiter::Channel);
//! let handler = limiter.handler(&group, 1234);
//!
//! let mut ctx = handler.ctx().await;
//! // ... perform the rate limited work ...
//! ctx.exit(None);
//! # }
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unused_extern_crates,
    variant_size_differences
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]

mod client;
mod retry;
mod types;

pub mod connector;
pub mod ratelimit;

#[cfg(test)]
#[macro_use]
pub mod test_utils;

pub use crate::{
    client::{
        Client, ClientBuilder, DEFAULT_API_BASE, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_WAIT_TIME,
        DEFAULT_USER_AGENT,
    },
    connector::{Connector, ConnectorConfig},
    ratelimit::{RateLimiter, RatelimitGroup, RatelimitHandler},
    types::{ErrorKind, Response, Result},
};
