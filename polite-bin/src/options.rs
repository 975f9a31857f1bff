use crate::verbosity::Verbosity;
use anyhow::{Context, Error, Result, anyhow};
use clap::builder::PossibleValuesParser;
use clap::{Parser, builder::TypedValueParser};
use const_format::{concatcp, formatcp};
use http::{
    HeaderMap,
    header::{HeaderName, HeaderValue},
};
use polite_lib::{DEFAULT_MAX_REDIRECTS, DEFAULT_USER_AGENT, RetryPolicy};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::{fs, path::Path, path::PathBuf, str::FromStr, time::Duration};
use strum::{Display, EnumString, VariantNames};

pub(crate) const POLITE_CONFIG_FILE: &str = "polite.toml";

/// Default requests per second across all destinations, 100.
pub(crate) const DEFAULT_GLOBAL_RATE: f64 = 100.0;
/// Default requests per second to a single destination, 10.
pub(crate) const DEFAULT_DOMAIN_RATE: f64 = 10.0;
/// Default number of simultaneous requests, 10.
pub(crate) const DEFAULT_GLOBAL_CONCURRENCY: usize = 10;
/// Default number of simultaneous requests to a single destination, 5.
pub(crate) const DEFAULT_DOMAIN_CONCURRENCY: usize = 5;
/// Default number of retries per request, 1.
pub(crate) const DEFAULT_MAX_RETRIES: u64 = 1;
/// Default timeout in seconds per attempt, 20.
pub(crate) const DEFAULT_TIMEOUT_SECS: usize = 20;

const DEFAULT_METHOD: &str = "get";

// this exists because clap requires `&str` type values for defaults
// whereas serde expects owned `String` types
// (`concatcp!` does not format floats, so the rates are spelled out)
const GLOBAL_RATE_STR: &str = "100";
const DOMAIN_RATE_STR: &str = "10";
const GLOBAL_CONCURRENCY_STR: &str = concatcp!(DEFAULT_GLOBAL_CONCURRENCY);
const DOMAIN_CONCURRENCY_STR: &str = concatcp!(DEFAULT_DOMAIN_CONCURRENCY);
const MAX_RETRIES_STR: &str = concatcp!(DEFAULT_MAX_RETRIES);
const MAX_REDIRECTS_STR: &str = concatcp!(DEFAULT_MAX_REDIRECTS);
const TIMEOUT_STR: &str = concatcp!(DEFAULT_TIMEOUT_SECS);
// We use a custom help message here because we want to show the default
// value of the config file, but also be able to check if the user has
// provided a custom value. If they didn't, we won't throw an error if
// the file doesn't exist.
const HELP_MSG_CONFIG_FILE: &str = formatcp!(
    "Configuration file to use\n\n[default: {}]",
    POLITE_CONFIG_FILE,
);

/// The format of the report printed once all requests are done
#[derive(
    Debug, Deserialize, Default, Clone, Copy, Display, EnumString, VariantNames, PartialEq, Eq,
)]
#[non_exhaustive]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub(crate) enum OutputFormat {
    /// One line per URL with status and elapsed time
    #[default]
    Plain,
    /// A JSON array with one object per URL
    Json,
}

macro_rules! default_function {
    ( $( $name:ident : $T:ty = $e:expr; )* ) => {
        $(
            #[allow(clippy::missing_const_for_fn)]
            fn $name() -> $T {
                $e
            }
        )*
    };
}

// Generate the functions for serde defaults
default_function! {
    global_rate: f64 = DEFAULT_GLOBAL_RATE;
    domain_rate: f64 = DEFAULT_DOMAIN_RATE;
    global_concurrency: usize = DEFAULT_GLOBAL_CONCURRENCY;
    domain_concurrency: usize = DEFAULT_DOMAIN_CONCURRENCY;
    max_retries: u64 = DEFAULT_MAX_RETRIES;
    max_redirects: usize = DEFAULT_MAX_REDIRECTS;
    user_agent: String = DEFAULT_USER_AGENT.to_string();
    timeout: usize = DEFAULT_TIMEOUT_SECS;
    method: String = DEFAULT_METHOD.to_string();
    verbosity: Verbosity = Verbosity::default();
}

// Macro for merging configuration values
macro_rules! fold_in {
    ($cli:ident , $toml:ident ; $ty:ident { $(..$ignore:ident,)* $( $key:ident : $default:expr, )* } ) => {
        if (false) {
            #[allow(dead_code, unused, clippy::diverging_sub_expression)]
            let _check_fold_in_exhaustivity = $ty {
                $($key: unreachable!(), )*
                $($ignore: unreachable!(), )*
            };
        };
        $(
            if $cli.$key == $default && $toml.$key != $default {
                $cli.$key = $toml.$key;
            }
        )*
    };
}

/// Parse a single header into a [`HeaderName`] and [`HeaderValue`]
///
/// Headers are expected to be in format `Header-Name: Header-Value`.
/// The header name and value are trimmed of whitespace.
///
/// # Errors
///
/// This fails if the header does not contain a `:` character or
/// if the header name contains non-ASCII characters.
fn parse_single_header(header: &str) -> Result<(HeaderName, HeaderValue)> {
    let parts: Vec<&str> = header.splitn(2, ':').collect();
    match parts.as_slice() {
        [name, value] => {
            let name = name.trim();
            let name = HeaderName::from_str(name)
                .map_err(|e| anyhow!("Unable to convert header name '{name}': {e}"))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|e| anyhow!("Unable to read value of header with name '{name}': {e}"))?;
            Ok((name, value))
        }
        _ => Err(anyhow!(
            "Invalid header format. Expected colon-separated string in the format 'HeaderName: HeaderValue'"
        )),
    }
}

/// Parses a single HTTP header into a tuple of (String, String)
///
/// This does NOT merge multiple headers into one.
#[derive(Clone, Debug)]
struct HeaderParser;

impl TypedValueParser for HeaderParser {
    type Value = (String, String);

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> Result<Self::Value, clap::Error> {
        let invalid = |message: String| clap::Error::raw(clap::error::ErrorKind::InvalidValue, message);

        let header_str = value
            .to_str()
            .ok_or_else(|| invalid("Header value contains invalid UTF-8".into()))?;
        let (name, value) = parse_single_header(header_str).map_err(|e| invalid(e.to_string()))?;
        let value = value
            .to_str()
            .map_err(|_| invalid("Header value contains invalid UTF-8".into()))?;
        Ok((name.to_string(), value.to_string()))
    }
}

impl clap::builder::ValueParserFactory for HeaderParser {
    type Parser = HeaderParser;
    fn value_parser() -> Self::Parser {
        HeaderParser
    }
}

/// Extension trait for converting a Vec of header pairs to a `HeaderMap`
pub(crate) trait HeaderMapExt {
    /// Convert a collection of header key-value pairs to a `HeaderMap`
    fn from_header_pairs(headers: &[(String, String)]) -> Result<HeaderMap, Error>;
}

impl HeaderMapExt for HeaderMap {
    fn from_header_pairs(headers: &[(String, String)]) -> Result<HeaderMap, Error> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| anyhow!("Invalid header name '{name}': {e}"))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| anyhow!("Invalid header value '{value}': {e}"))?;
            header_map.insert(header_name, header_value);
        }
        Ok(header_map)
    }
}

/// Headers are given as a table in the configuration file
fn deserialize_headers<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = HashMap::<String, String>::deserialize(deserializer)?;
    Ok(map.into_iter().collect())
}

/// polite fetches URLs while keeping the request rate to every site, and
/// overall, below configurable limits.
///
/// polite is powered by polite-lib, the Rust library for rate-limited HTTP requests.
#[derive(Parser, Debug)]
#[command(version, about, next_display_order = None)]
pub(crate) struct PoliteOptions {
    /// URLs to fetch
    #[arg(name = "urls", value_name = "URLS", required = true)]
    pub(crate) urls: Vec<String>,

    /// Configuration file to use
    #[arg(short, long = "config")]
    #[arg(help = HELP_MSG_CONFIG_FILE)]
    pub(crate) config_file: Option<PathBuf>,

    #[clap(flatten)]
    pub(crate) config: Config,
}

/// The main configuration for polite
#[derive(Parser, Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Verbose program output
    #[clap(flatten)]
    #[serde(default = "verbosity")]
    pub(crate) verbose: Verbosity,

    /// Maximum requests per second across all destinations
    #[arg(long, default_value = &GLOBAL_RATE_STR)]
    #[serde(default = "global_rate")]
    pub(crate) global_rate: f64,

    /// Maximum requests per second to a single destination
    #[arg(long, default_value = &DOMAIN_RATE_STR)]
    #[serde(default = "domain_rate")]
    pub(crate) domain_rate: f64,

    /// Do not limit the request rate across all destinations
    #[arg(long)]
    #[serde(default)]
    pub(crate) no_global_rate: bool,

    /// Do not limit the request rate to single destinations
    #[arg(long)]
    #[serde(default)]
    pub(crate) no_domain_rate: bool,

    /// Maximum number of simultaneous requests across all destinations
    #[arg(long, default_value = &GLOBAL_CONCURRENCY_STR)]
    #[serde(default = "global_concurrency")]
    pub(crate) global_concurrency: usize,

    /// Maximum number of simultaneous requests to a single destination
    #[arg(long, default_value = &DOMAIN_CONCURRENCY_STR)]
    #[serde(default = "domain_concurrency")]
    pub(crate) domain_concurrency: usize,

    /// Maximum number of retries per request
    #[arg(long, default_value = &MAX_RETRIES_STR)]
    #[serde(default = "max_retries")]
    pub(crate) max_retries: u64,

    /// Wait time before the first retry of a request, doubled for every
    /// further retry (e.g. `500ms`). Retries are sent immediately if unset.
    #[arg(long, value_parser = humantime::parse_duration)]
    #[serde(default, with = "humantime_serde")]
    pub(crate) retry_wait_time: Option<Duration>,

    /// Which failures to retry: `unsuccessful` retries every non-2xx response,
    /// `transient` only server errors, 408, 429, timeouts and connection errors
    #[arg(long, default_value = "unsuccessful", value_parser = PossibleValuesParser::new(RetryPolicy::VARIANTS).map(|s| s.parse::<RetryPolicy>().unwrap()))]
    #[serde(default)]
    pub(crate) retry_policy: RetryPolicy,

    /// Forget idle destinations once this many are tracked
    #[arg(long)]
    #[serde(default)]
    pub(crate) max_domains: Option<usize>,

    /// Limit every hostname on its own instead of every registrable domain
    /// (e.g. `api.example.com` and `www.example.com` separately)
    #[arg(long)]
    #[serde(default)]
    pub(crate) per_host: bool,

    /// Request method
    // Using `-X` as a short param similar to curl
    #[arg(short = 'X', long, default_value = DEFAULT_METHOD)]
    #[serde(default = "method")]
    pub(crate) method: String,

    /// Custom request header
    #[arg(
        short = 'H',
        long = "header",
        // Note: We use a `Vec<(String, String)>` for headers, which is
        // unfortunate. The reason is that `clap::ArgAction::Append` collects
        // multiple values, and `clap` cannot automatically convert these tuples
        // into a `HashMap<String, String>`.
        action = clap::ArgAction::Append,
        value_parser = HeaderParser,
        value_name = "HEADER:VALUE",
    )]
    #[serde(default, deserialize_with = "deserialize_headers")]
    pub(crate) header: Vec<(String, String)>,

    /// User agent
    #[arg(short, long, default_value = DEFAULT_USER_AGENT)]
    #[serde(default = "user_agent")]
    pub(crate) user_agent: String,

    /// Timeout in seconds per attempt, from connect to response finished
    #[arg(short, long, default_value = &TIMEOUT_STR)]
    #[serde(default = "timeout")]
    pub(crate) timeout: usize,

    /// Maximum number of allowed redirects
    #[arg(short, long, default_value = &MAX_REDIRECTS_STR)]
    #[serde(default = "max_redirects")]
    pub(crate) max_redirects: usize,

    /// Proceed for server connections considered insecure (invalid TLS)
    #[arg(short, long)]
    #[serde(default)]
    pub(crate) insecure: bool,

    /// Output format of the report
    #[arg(short, long, default_value = "plain", value_parser = PossibleValuesParser::new(OutputFormat::VARIANTS).map(|s| s.parse::<OutputFormat>().unwrap()))]
    #[serde(default)]
    pub(crate) format: OutputFormat,

    /// Number of threads to utilize.
    /// Defaults to number of cores available to the system
    #[arg(short = 'T', long)]
    #[serde(default)]
    pub(crate) threads: Option<usize>,
}

impl Config {
    fn merge_headers(&mut self, other: &[(String, String)]) {
        let self_map = self.header.iter().cloned().collect::<HashMap<_, _>>();
        let other_map = other.iter().cloned().collect::<HashMap<_, _>>();

        // Merge the two maps, with `other` taking precedence
        let merged_map: HashMap<_, _> = self_map.into_iter().chain(other_map).collect();

        self.header = merged_map.into_iter().collect();
    }

    /// Load configuration from a file
    pub(crate) fn load_from_file(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).with_context(|| "Failed to parse configuration file")
    }

    /// Merge the configuration from TOML into the CLI configuration.
    /// Values given on the command line take precedence.
    pub(crate) fn merge(&mut self, toml: Config) {
        // Special handling for headers before fold_in!
        self.merge_headers(&toml.header);

        // NOTE: if you see an error within this macro call, check to make sure that
        // that the fields provided to fold_in! match all the fields of the Config struct.
        fold_in! {
            // Destination and source configs
            self, toml;

            Config {
                // Keys which are handled outside of fold_in
                ..header,

                // Keys with defaults to assign
                verbose: Verbosity::default(),
                global_rate: DEFAULT_GLOBAL_RATE,
                domain_rate: DEFAULT_DOMAIN_RATE,
                no_global_rate: false,
                no_domain_rate: false,
                global_concurrency: DEFAULT_GLOBAL_CONCURRENCY,
                domain_concurrency: DEFAULT_DOMAIN_CONCURRENCY,
                max_retries: DEFAULT_MAX_RETRIES,
                retry_wait_time: None,
                retry_policy: RetryPolicy::default(),
                max_domains: None,
                per_host: false,
                method: DEFAULT_METHOD,
                user_agent: DEFAULT_USER_AGENT,
                timeout: DEFAULT_TIMEOUT_SECS,
                max_redirects: DEFAULT_MAX_REDIRECTS,
                insecure: false,
                format: OutputFormat::default(),
                threads: None,
            }
        }
    }
}
