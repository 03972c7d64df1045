//! `hata` sends requests to the Discord REST API and reports what the rate
//! limiter saw while doing so.
//!
//! The hata binary is a wrapper around hata-lib, which queues requests per
//! rate limit scope, learns Discord's limits from response headers and
//! retries rate limited requests.
//!
//! Fetch a channel:
//! ```sh
//! DISCORD_TOKEN=... hata --group channel_get --limiter-id 1234 channels/1234
//! ```
//!
//! Send ten messages at once and watch them being queued:
//! ```sh
//! hata -vv -X post -g message_create -i 1234 -n 10 \
//!     -d '{"content": "hello"}' channels/1234/messages
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]

use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Error, Result, bail};
use bytes::Bytes;
use clap::{Parser, crate_version};
use futures::future::join_all;
use log::{error, info, warn};

mod client;
mod formatters;
mod options;
mod verbosity;

use crate::formatters::log::init_logging;
use crate::formatters::report::{Outcome, Report};
use crate::options::{Config, HATA_CONFIG_FILE, HataOptions};

/// A C-like enum that can be cast to `i32` and used as process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Success = 0,
    // NOTE: exit code 1 is used for any `Result::Err` bubbled up to `main()`
    // using the `?` operator.
    #[allow(unused)]
    UnexpectedFailure = 1,
    RequestFailure = 2,
    ConfigFile = 3,
}

fn main() -> Result<()> {
    // std::process::exit doesn't guarantee that all destructors will be run,
    // therefore we wrap the main code in another function to ensure that.
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Merge all provided config options into one.
/// This includes a potential config file, command-line- and environment variables
fn load_config() -> Result<HataOptions> {
    let mut opts = HataOptions::parse();

    init_logging(&opts.config.verbose);

    // Load a potentially existing config file and merge it into the config from
    // the CLI
    if let Some(config_file) = &opts.config_file {
        match Config::load_from_file(config_file) {
            Ok(c) => opts.config.merge(c),
            Err(e) => {
                bail!(
                    "Cannot load configuration file `{}`: {e:?}",
                    config_file.display()
                );
            }
        }
    } else {
        // A missing default config file is fine, an invalid one is not
        let default_config = PathBuf::from(HATA_CONFIG_FILE);
        if default_config.is_file() {
            match Config::load_from_file(&default_config) {
                Ok(c) => opts.config.merge(c),
                Err(e) => {
                    bail!(
                        "Cannot load default configuration file `{}`: {e:?}",
                        default_config.display()
                    );
                }
            }
        }
    }

    if opts.config.token.is_none() {
        warn!("No bot token given, requests are sent without authorization");
    }

    Ok(opts)
}

/// Set up runtime and call hata entrypoint
fn run_main() -> Result<i32> {
    use std::process::exit;

    let opts = match load_config() {
        Ok(opts) => opts,
        Err(e) => {
            error!("Error while loading config: {e} (hata v{})", crate_version!());
            exit(ExitCode::ConfigFile as i32);
        }
    };

    let runtime = match opts.config.threads {
        Some(threads) => {
            // We define our own runtime instead of the `tokio::main` attribute
            // since we want to make the number of threads configurable
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(threads)
                .enable_all()
                .build()?
        }
        None => tokio::runtime::Runtime::new()?,
    };

    match runtime.block_on(run(&opts)) {
        Err(e) if Some(ErrorKind::BrokenPipe) == underlying_io_error_kind(&e) => {
            exit(ExitCode::Success as i32);
        }
        res => res,
    }
}

/// Check if the given error can be traced back to an `io::ErrorKind`
fn underlying_io_error_kind(error: &Error) -> Option<io::ErrorKind> {
    for cause in error.chain() {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return Some(io_error.kind());
        }
    }
    None
}

/// Issue the configured requests and print the report
async fn run(opts: &HataOptions) -> Result<i32> {
    let cfg = &opts.config;
    let method = cfg.method()?;
    let group = cfg.group()?;

    let body = match &cfg.data {
        Some(data) => {
            serde_json::from_str::<serde_json::Value>(data)
                .context("Request body is not valid JSON")?;
            Some(Bytes::from(data.clone()))
        }
        None => None,
    };

    let client = client::create(cfg)?;
    let url = client
        .api_base()
        .join(opts.path.trim_start_matches('/'))
        .with_context(|| format!("Invalid API path `{}`", opts.path))?;
    info!(
        "Sending {} x {method} {url} (limiter id {})",
        cfg.repeat, cfg.limiter_id
    );

    let requests = (1..=cfg.repeat).map(|request| {
        let client = &client;
        let (method, group, body) = (method.clone(), &group, body.clone());
        async move {
            let start = Instant::now();
            let result = client
                .request(method, &opts.path, group, cfg.limiter_id, body)
                .await;
            Outcome::new(request, start.elapsed(), result)
        }
    });
    let outcomes = join_all(requests).await;

    let successful = outcomes.iter().filter(|outcome| outcome.is_success()).count();
    let report = Report {
        method: method.to_string(),
        url: url.to_string(),
        total: outcomes.len(),
        successful,
        failed: outcomes.len() - successful,
        global_locked: client.rate_limiter().global().is_locked(),
        handler: client
            .rate_limiter()
            .handler(&group, cfg.limiter_id)
            .snapshot()
            .into(),
        pool: client.connector().stats().into(),
        outcomes,
    };
    client.close();

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", report.format(cfg.format)?)?;

    let exit_code = if report.is_success() {
        ExitCode::Success
    } else {
        ExitCode::RequestFailure
    };
    Ok(exit_code as i32)
}
