use anyhow::{Context, Result};
use polite_lib::Response;
use serde::Serialize;
use std::fmt::{self, Display, Write};
use std::time::Duration;

/// What happened to one of the requested URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct Outcome {
    /// The URL as given on the command line
    pub(crate) url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) status: Option<u16>,
    /// Time spent on the request, retries included
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

impl Outcome {
    pub(crate) fn new(url: &str, result: &polite_lib::Result<Response>) -> Self {
        match result {
            Ok(response) => Self {
                url: url.to_string(),
                status: Some(response.status().as_u16()),
                elapsed_ms: Some(millis(response.elapsed())),
                error: None,
            },
            Err(e) => Self::failed(url, e),
        }
    }

    /// The request for `url` was not made or did not get a response
    pub(crate) fn failed(url: &str, error: impl Display) -> Self {
        Self {
            url: url.to_string(),
            status: None,
            elapsed_ms: None,
            error: Some(error.to_string()),
        }
    }

    /// Returns `true` for `2xx` responses
    pub(crate) fn is_success(&self) -> bool {
        self.status.is_some_and(|status| (200..300).contains(&status))
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, &self.error) {
            (Some(status), _) => write!(f, "{status} {}", self.url)?,
            (None, Some(error)) => write!(f, "ERR {} ({error})", self.url)?,
            (None, None) => write!(f, "ERR {}", self.url)?,
        }
        if let Some(elapsed) = self.elapsed_ms {
            write!(f, " [{elapsed}ms]")?;
        }
        Ok(())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) trait ReportFormatter {
    /// Format the outcomes of all requests, in the order they were given
    fn format(&self, outcomes: &[Outcome]) -> Result<String>;
}

/// One line per URL: `<status> <url> [<elapsed>]`
pub(crate) struct Plain;

impl ReportFormatter for Plain {
    fn format(&self, outcomes: &[Outcome]) -> Result<String> {
        let mut output = String::new();
        for outcome in outcomes {
            writeln!(output, "{outcome}")?;
        }
        Ok(output)
    }
}

pub(crate) struct Json;

impl ReportFormatter for Json {
    /// Format outcomes as JSON array
    fn format(&self, outcomes: &[Outcome]) -> Result<String> {
        serde_json::to_string_pretty(outcomes).context("Cannot format report as JSON")
    }
}
