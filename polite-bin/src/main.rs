//! `polite` fetches URLs without overwhelming the servers behind them.
//!
//! All URLs are requested concurrently, but every request first has to be
//! admitted by its destination and by the overall limits. The binary is a
//! wrapper around polite-lib, which provides the rate limiting.
//!
//! Fetch a few pages with the default limits
//! (100 requests per second overall, 10 per second per domain):
//! ```sh
//! polite https://example.com https://example.org/about
//! ```
//!
//! Be gentler with a single site and retry server errors:
//! ```sh
//! polite --domain-rate 1 --domain-concurrency 1 --retry-policy transient \
//!     https://example.com/a https://example.com/b
//! ```
//!
//! Limits can also be read from a `polite.toml` in the current directory,
//! or any other file given with `--config`.
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

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Result, bail};
use clap::{Parser, crate_version};
use formatters::log::init_logging;
use futures::future::join_all;
use log::{error, info};
use polite_lib::ratelimit::RateSettings;
use reqwest::Method;
use url::Url;

#[cfg(feature = "native-tls")]
use openssl_sys as _; // required for vendored-openssl feature

mod client;
mod formatters;
mod options;
mod verbosity;

use crate::formatters::report::Outcome;
use crate::options::{Config, POLITE_CONFIG_FILE, PoliteOptions};

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
    // See: https://doc.rust-lang.org/stable/std/process/fn.exit.html
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Merge all provided config options into one.
/// This includes a potential config file, command-line- and environment variables
fn load_config() -> Result<PoliteOptions> {
    let mut opts = PoliteOptions::parse();

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
        // If no config file was explicitly provided, we try to load the default
        // config file from the current directory if the file exits. This will
        // raise an error if the file is invalid, just like the explicit provided
        // config file.
        let default_config = PathBuf::from(POLITE_CONFIG_FILE);
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

    Ok(opts)
}

fn run_main() -> Result<i32> {
    use std::process::exit;

    let opts = match load_config() {
        Ok(opts) => opts,
        Err(e) => {
            error!("Error while loading config: {e} (polite {})", crate_version!());
            exit(ExitCode::ConfigFile as i32);
        }
    };

    let settings = match client::settings(&opts.config) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid rate limits: {e}");
            exit(ExitCode::ConfigFile as i32);
        }
    };

    let Ok(method) = Method::from_str(&opts.config.method.to_uppercase()) else {
        error!("Invalid request method `{}`", opts.config.method);
        exit(ExitCode::ConfigFile as i32);
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

    runtime.block_on(run(&opts, settings, method))
}

/// Run requests for all URLs and print the report
async fn run(opts: &PoliteOptions, settings: RateSettings, method: Method) -> Result<i32> {
    info!("Rate limits: {settings:?}");
    let client = client::create(&opts.config, settings)?;

    let requests = opts.urls.iter().map(|raw| {
        let client = &client;
        let method = method.clone();
        async move {
            match Url::parse(raw) {
                Ok(url) => Outcome::new(raw, &client.request(method, url).await),
                Err(e) => Outcome::failed(raw, format!("Invalid URL: {e}")),
            }
        }
    });
    let outcomes = join_all(requests).await;

    client.close().await;

    let formatter = formatters::get_report_formatter(&opts.config.format);
    print!("{}", formatter.format(&outcomes)?);

    let exit_code = if outcomes.iter().all(Outcome::is_success) {
        ExitCode::Success
    } else {
        ExitCode::RequestFailure
    };
    Ok(exit_code as i32)
}
