use async_trait::async_trait;
use http::StatusCode;
use reqwest::{Method, Request};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::{ErrorKind, Response, Result, Transport};

/// What a [`ScriptedTransport`] does for one request
#[derive(Debug, Clone, Copy)]
pub(crate) enum Step {
    Status(StatusCode),
    Fault,
}

/// A [`Transport`] which never touches the network.
///
/// Answers follow the script in order; once the script runs out every request
/// gets `200 OK`. Each request takes `latency`, spent in a tokio sleep so that
/// paused-clock tests stay deterministic.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    latency: Duration,
    calls: AtomicUsize,
    sent: Mutex<Vec<(Url, Instant)>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_statuses(statuses: impl IntoIterator<Item = StatusCode>) -> Self {
        Self::with_steps(statuses.into_iter().map(Step::Status))
    }

    pub(crate) fn with_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    pub(crate) fn latency(self, latency: Duration) -> Self {
        Self { latency, ..self }
    }

    /// Number of requests received so far
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// When each request was received, in order
    pub(crate) fn sent(&self) -> Vec<(Url, Instant)> {
        self.sent.lock().unwrap().clone()
    }

    /// When requests to `url` were received, in order
    pub(crate) fn sent_to(&self, url: &Url) -> Vec<Instant> {
        self.sent()
            .into_iter()
            .filter(|(sent, _)| sent == url)
            .map(|(_, at)| at)
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: Request) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .unwrap()
            .push((request.url().clone(), Instant::now()));

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Status(StatusCode::OK));

        tokio::time::sleep(self.latency).await;

        match step {
            Step::Status(status) => {
                let response = http::Response::builder()
                    .status(status)
                    .body(String::new())
                    .unwrap();
                Ok(Response::from(response).with_elapsed(self.latency))
            }
            Step::Fault => Err(ErrorKind::Transport("scripted fault".into())),
        }
    }
}

pub(crate) fn get(url: &str) -> Request {
    Request::new(Method::GET, url.parse().unwrap())
}
