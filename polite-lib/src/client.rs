//! Handler of outbound requests.
//!
//! A [`PoliteClient`] admits every request through two scopes, its
//! destination and the client as a whole. Each scope caps how many requests
//! may be outstanding and how often a slot frees up again, so that a crawl
//! never hits a single site harder than configured. Create clients with
//! [`ClientBuilder`].
#![allow(
    clippy::module_name_repetitions,
    clippy::struct_excessive_bools,
    clippy::default_trait_access,
    clippy::used_underscore_binding
)]
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use http::header::{self, HeaderMap, HeaderValue};
use reqwest::{Method, Request};
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;
use typed_builder::TypedBuilder;
use url::Url;

use crate::executor::RetryingExecutor;
use crate::ratelimit::{
    DomainResolver, RateSettings, RegistrableDomain, ReleaseScheduler, Scope, ScopePool,
};
use crate::{ErrorKind, ReqwestTransport, Response, Result, Transport};

/// Default number of redirects before a request is deemed as failed, 5.
pub const DEFAULT_MAX_REDIRECTS: usize = 5;
/// Default user agent, `polite-<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("polite/", env!("CARGO_PKG_VERSION"));

/// Builder for [`PoliteClient`].
///
/// See crate-level documentation for usage example.
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default, setter(into)))]
#[builder(builder_method(doc = "
Create a builder for building `ClientBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `ClientBuilder`.
"))]
pub struct ClientBuilder {
    /// Rate, concurrency and retry limits of the client.
    ///
    /// Defaults to [`RateSettings::unlimited`], which admits every request
    /// right away and never retries.
    settings: RateSettings,
    /// Maps request URLs to the destination they are limited under.
    ///
    /// Defaults to [`RegistrableDomain`], so `api.example.com` and
    /// `www.example.co.uk` share the budget of `example`.
    #[builder(default_code = "Arc::new(RegistrableDomain)", setter(!into))]
    resolver: Arc<dyn DomainResolver>,
    /// User-agent sent with every request.
    ///
    /// Only used by [`ClientBuilder::client`]; injected transports send
    /// their own headers.
    #[builder(default_code = "String::from(DEFAULT_USER_AGENT)")]
    user_agent: String,
    /// Response timeout per attempt.
    timeout: Option<Duration>,
    /// Maximum number of redirects per request.
    #[builder(default = DEFAULT_MAX_REDIRECTS)]
    max_redirects: usize,
    /// When `true`, accept invalid SSL certificates.
    ///
    /// ## Warning
    ///
    /// You should think very carefully before allowing invalid SSL
    /// certificates. It will accept any certificate for any site to be
    /// trusted including expired certificates. This introduces significant
    /// vulnerabilities, and should only be used as a last resort.
    allow_insecure: bool,
    /// Sets the default [headers] for every request. See also [here].
    ///
    /// [headers]: https://docs.rs/http/latest/http/header/struct.HeaderName.html
    /// [here]: https://docs.rs/reqwest/latest/reqwest/struct.ClientBuilder.html#method.default_headers
    custom_headers: HeaderMap,
}

impl Default for ClientBuilder {
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ClientBuilder {
    /// Instantiates a [`PoliteClient`] which sends requests through `reqwest`.
    ///
    /// Must be called from within a tokio runtime, as releases are
    /// scheduled on it.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - The user-agent is invalid.
    /// - The request client cannot be created.
    ///   See [here](https://docs.rs/reqwest/latest/reqwest/struct.ClientBuilder.html#errors).
    pub fn client(self) -> Result<PoliteClient> {
        let mut headers = self.custom_headers.clone();
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_str(&self.user_agent).map_err(ErrorKind::InvalidHeader)?,
        );

        let builder = reqwest::ClientBuilder::new()
            .gzip(true)
            .default_headers(headers)
            .danger_accept_invalid_certs(self.allow_insecure)
            .redirect(reqwest::redirect::Policy::limited(self.max_redirects));

        let reqwest_client = (match self.timeout {
            Some(t) => builder.timeout(t),
            None => builder,
        })
        .build()
        .map_err(ErrorKind::BuildRequestClient)?;

        Ok(self.client_with_transport(ReqwestTransport::new(reqwest_client)))
    }

    /// Instantiates a [`PoliteClient`] which sends admitted requests through
    /// `transport`. HTTP options of the builder are not applied.
    #[must_use]
    pub fn client_with_transport<T: Transport + 'static>(self, transport: T) -> PoliteClient {
        log::debug!("Creating client with {:?}", self.settings);
        PoliteClient {
            inner: Arc::new(ClientInner {
                pool: ScopePool::new(&self.settings),
                executor: RetryingExecutor::new(&self.settings),
                scheduler: ReleaseScheduler::new(),
                settings: self.settings,
                resolver: self.resolver,
                transport: Arc::new(transport),
            }),
        }
    }
}

#[derive(Debug)]
struct ClientInner {
    settings: RateSettings,
    pool: ScopePool,
    scheduler: ReleaseScheduler,
    executor: RetryingExecutor,
    resolver: Arc<dyn DomainResolver>,
    transport: Arc<dyn Transport>,
}

/// Permits held by an admitted request.
///
/// Both permits go back through the [`ReleaseScheduler`]. When the request is
/// dropped before it finishes, the time since admission counts as elapsed, so
/// a cancelled request still occupies its slots for the interval.
struct Admission<'a> {
    inner: &'a ClientInner,
    domain: Option<OwnedSemaphorePermit>,
    global: Option<OwnedSemaphorePermit>,
    admitted: Instant,
}

impl<'a> Admission<'a> {
    fn new(
        inner: &'a ClientInner,
        domain: Option<OwnedSemaphorePermit>,
        global: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            inner,
            domain,
            global,
            admitted: Instant::now(),
        }
    }

    fn release(mut self, elapsed: Duration) {
        self.schedule(elapsed);
    }

    fn schedule(&mut self, elapsed: Duration) {
        let ClientInner {
            scheduler,
            settings,
            ..
        } = self.inner;
        if let Some(permit) = self.domain.take() {
            scheduler.schedule(permit, Scope::Domain, settings.domain_interval(), elapsed);
        }
        if let Some(permit) = self.global.take() {
            scheduler.schedule(permit, Scope::Global, settings.global_interval(), elapsed);
        }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.domain.is_none() && self.global.is_none() {
            return;
        }
        // Timers need a runtime; without one the permits are simply dropped
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        log::debug!("Request cancelled after {:?}", self.admitted.elapsed());
        self.schedule(self.admitted.elapsed());
    }
}

/// Sends requests while honoring the configured rate and concurrency limits.
///
/// Cloning is cheap: all clones share the same limits and admission state.
///
/// See [`ClientBuilder`] which contains sane defaults for all configuration options.
#[derive(Debug, Clone)]
pub struct PoliteClient {
    inner: Arc<ClientInner>,
}

impl PoliteClient {
    /// Send a request once admitted by its destination and the client.
    ///
    /// The request waits in line for a permit of its destination first and a
    /// global permit second. Unsuccessful responses are retried while the
    /// permits are held. Afterwards each permit is handed back once the
    /// interval of its scope has passed, counting the time already spent on
    /// the request. This method does not wait for that to happen.
    ///
    /// # Errors
    ///
    /// This returns an `Err` if
    /// - the client was closed, before or while the request waited in line.
    /// - no destination can be derived from the request URL.
    /// - the transport failed to deliver the request.
    ///
    /// An unsuccessful status code is not an error.
    pub async fn send(&self, request: Request) -> Result<Response> {
        let inner = &*self.inner;
        let _guard = inner.scheduler.enter()?;
        let key = inner.resolver.resolve(request.url())?;

        let mut shutdown = inner.scheduler.shutdown_signal();
        let domain_permit = inner.pool.acquire_domain(&key, &mut shutdown).await?;
        let global_permit = inner.pool.acquire_global(&mut shutdown).await?;
        let admission = Admission::new(inner, domain_permit, global_permit);

        log::debug!("Admitted {} {} ({key})", request.method(), request.url());
        let execution = inner
            .executor
            .execute(inner.transport.as_ref(), request)
            .await;
        log::debug!(
            "Request to {key} done after {} attempt(s) in {:?}",
            execution.attempts,
            execution.elapsed
        );

        // Faults hold their permits just as long as responses do
        admission.release(execution.elapsed);
        execution.outcome
    }

    /// Send a request without a body
    ///
    /// # Errors
    ///
    /// See [`PoliteClient::send`].
    pub async fn request(&self, method: Method, url: Url) -> Result<Response> {
        self.send(Request::new(method, url)).await
    }

    /// Send a `GET` request
    ///
    /// # Errors
    ///
    /// See [`PoliteClient::send`].
    pub async fn get(&self, url: Url) -> Result<Response> {
        self.request(Method::GET, url).await
    }

    /// Send a `HEAD` request
    ///
    /// # Errors
    ///
    /// See [`PoliteClient::send`].
    pub async fn head(&self, url: Url) -> Result<Response> {
        self.request(Method::HEAD, url).await
    }

    /// Send `GET` requests to all `urls` concurrently, leaving it to the
    /// limits to pace them. Results are in the order of `urls`.
    pub async fn get_all(&self, urls: impl IntoIterator<Item = Url>) -> Vec<Result<Response>> {
        join_all(urls.into_iter().map(|url| self.get(url))).await
    }

    /// Close the client.
    ///
    /// Requests waiting for admission fail with [`ErrorKind::ClientClosed`],
    /// and so does every later call to [`PoliteClient::send`]. Pending
    /// releases are cut short. Returns once all requests in flight have
    /// finished and every permit is back.
    ///
    /// Closing is idempotent and affects all clones of the client.
    pub async fn close(&self) {
        self.inner.scheduler.shutdown().await;
        log::debug!("Client closed");
    }

    /// Returns `true` once [`PoliteClient::close`] has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.scheduler.is_closed()
    }

    /// The limits this client was created with
    #[must_use]
    pub fn settings(&self) -> &RateSettings {
        &self.inner.settings
    }

    /// Number of permits currently waiting for their delayed release
    #[must_use]
    pub fn pending_releases(&self) -> usize {
        self.inner.scheduler.pending()
    }

    /// The admission state of the client
    #[must_use]
    pub fn pool(&self) -> &ScopePool {
        &self.inner.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{DomainKey, HostName};
    use crate::test_utils::{ScriptedTransport, Step, get};
    use http::StatusCode;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tokio::time::Instant;

    const EXAMPLE_URLS: [&str; 2] = ["https://test.example.com", "https://another.one.com"];

    fn client(settings: RateSettings, transport: &Arc<ScriptedTransport>) -> PoliteClient {
        ClientBuilder::builder()
            .settings(settings)
            .build()
            .client_with_transport(transport.clone())
    }

    fn url(url: &str) -> Url {
        url.parse().unwrap()
    }

    /// `elapsed` lies within a second above `expected`
    fn assert_paced(elapsed: Duration, expected: Duration) {
        assert!(
            elapsed >= expected,
            "took {elapsed:?}, expected at least {expected:?}"
        );
        assert!(
            elapsed < expected + Duration::from_secs(1),
            "took {elapsed:?}, expected less than a second above {expected:?}"
        );
    }

    #[tokio::test]
    async fn test_retries_unused() {
        let transport = Arc::new(ScriptedTransport::with_statuses([StatusCode::OK; 3]));
        let client = client(RateSettings::unlimited().with_max_retries(2), &transport);

        let response = client.get(url(EXAMPLE_URLS[0])).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_retries_used() {
        let transport = Arc::new(ScriptedTransport::with_statuses([
            StatusCode::FORBIDDEN,
            StatusCode::FORBIDDEN,
            StatusCode::OK,
        ]));
        let client = client(RateSettings::unlimited().with_max_retries(2), &transport);

        let response = client.get(url(EXAMPLE_URLS[0])).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_max_retries_used() {
        let transport = Arc::new(ScriptedTransport::with_statuses([StatusCode::FORBIDDEN; 3]));
        let client = client(RateSettings::unlimited().with_max_retries(2), &transport);

        let response = client.get(url(EXAMPLE_URLS[0])).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(transport.calls(), 3);
    }

    #[rstest]
    #[case(17.0)]
    #[case(23.0)]
    #[case(31.0)]
    #[tokio::test(start_paused = true)]
    async fn test_global_limits_adhered(#[case] global_rate: f64) {
        let transport = Arc::new(ScriptedTransport::new());
        let settings = RateSettings::new(Some(global_rate), None).unwrap();
        let client = client(settings, &transport);
        let num_requests: u32 = 47;

        let start = Instant::now();
        let responses = client
            .get_all((0..num_requests).map(|_| url(EXAMPLE_URLS[0])))
            .await;
        let elapsed = start.elapsed();

        assert!(responses.iter().all(|r| r.as_ref().unwrap().is_success()));
        let interval = settings.global_interval().unwrap();
        assert_paced(elapsed, interval * (num_requests - 1));
    }

    #[rstest]
    #[case(7.0)]
    #[case(11.0)]
    #[case(17.0)]
    #[tokio::test(start_paused = true)]
    async fn test_domain_limits_adhered(#[case] domain_rate: f64) {
        let transport = Arc::new(ScriptedTransport::new());
        let settings = RateSettings::new(None, Some(domain_rate))
            .unwrap()
            .with_domain_concurrency(1)
            .unwrap();
        let client = client(settings, &transport);

        let base_num_requests_per_domain = 13;
        let urls = EXAMPLE_URLS
            .iter()
            .enumerate()
            .flat_map(|(i, example_url)| {
                let num_requests = base_num_requests_per_domain + i * 11;
                std::iter::repeat_n(url(example_url), num_requests)
            });

        let start = Instant::now();
        let responses = client.get_all(urls).await;
        let elapsed = start.elapsed();

        assert_eq!(responses.len(), 13 + 24);
        assert!(responses.iter().all(|r| r.as_ref().unwrap().is_success()));

        // Limited by the busiest destination
        let max_requests_to_domain: u32 = 24;
        let interval = settings.domain_interval().unwrap();
        assert_paced(elapsed, interval * (max_requests_to_domain - 1));

        let to_first = transport.sent_to(&url(EXAMPLE_URLS[0]));
        assert_eq!(to_first.len(), 13);
        for pair in to_first.windows(2) {
            assert!(pair[1] - pair[0] >= interval);
        }
    }

    #[rstest]
    #[case(10.0, 5, 20)]
    #[case(4.0, 2, 9)]
    #[case(30.0, 3, 31)]
    #[tokio::test(start_paused = true)]
    async fn test_global_concurrency_admits_bursts(
        #[case] global_rate: f64,
        #[case] concurrency: usize,
        #[case] num_requests: usize,
    ) {
        let transport = Arc::new(ScriptedTransport::new());
        let settings = RateSettings::new(Some(global_rate), None)
            .unwrap()
            .with_global_concurrency(concurrency)
            .unwrap();
        let client = client(settings, &transport);

        let start = Instant::now();
        let responses = client
            .get_all((0..num_requests).map(|i| url(EXAMPLE_URLS[i % 2])))
            .await;
        let elapsed = start.elapsed();

        assert!(responses.iter().all(|r| r.as_ref().unwrap().is_success()));
        let interval = settings.global_interval().unwrap();
        let batches = u32::try_from(num_requests.div_ceil(concurrency)).unwrap();
        assert_paced(elapsed, interval * (batches - 1));

        let sent: Vec<Instant> = transport.sent().into_iter().map(|(_, at)| at).collect();
        assert_eq!(sent.iter().filter(|at| **at == start).count(), concurrency);
        for window in sent.windows(concurrency + 1) {
            assert!(window[concurrency] - window[0] >= interval);
        }
    }

    #[rstest]
    #[case(10.0, 5, 20)]
    #[case(3.0, 3, 10)]
    #[tokio::test(start_paused = true)]
    async fn test_domain_concurrency_admits_bursts(
        #[case] domain_rate: f64,
        #[case] concurrency: usize,
        #[case] num_requests: usize,
    ) {
        let transport = Arc::new(ScriptedTransport::new());
        let settings = RateSettings::new(None, Some(domain_rate))
            .unwrap()
            .with_domain_concurrency(concurrency)
            .unwrap();
        let client = client(settings, &transport);

        let start = Instant::now();
        let responses = client
            .get_all((0..num_requests).map(|_| url(EXAMPLE_URLS[0])))
            .await;
        let elapsed = start.elapsed();

        assert!(responses.iter().all(|r| r.as_ref().unwrap().is_success()));
        let interval = settings.domain_interval().unwrap();
        let batches = u32::try_from(num_requests.div_ceil(concurrency)).unwrap();
        assert_paced(elapsed, interval * (batches - 1));

        let sent = transport.sent_to(&url(EXAMPLE_URLS[0]));
        assert_eq!(sent.iter().filter(|at| **at == start).count(), concurrency);
        for window in sent.windows(concurrency + 1) {
            assert!(window[concurrency] - window[0] >= interval);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_domains_are_isolated() {
        let transport = Arc::new(ScriptedTransport::new());
        let settings = RateSettings::new(None, Some(1.0)).unwrap();
        let client = client(settings, &transport);

        client.get(url(EXAMPLE_URLS[0])).await.unwrap();
        let start = Instant::now();
        client.get(url(EXAMPLE_URLS[1])).await.unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(client.pool().domain_count(), 2);
        assert_eq!(
            client
                .pool()
                .available_domain_permits(&DomainKey::from("example")),
            Some(0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_subdomains_share_a_destination() {
        let transport = Arc::new(ScriptedTransport::new());
        let settings = RateSettings::new(None, Some(2.0)).unwrap();
        let client = client(settings, &transport);

        let start = Instant::now();
        client.get(url("https://a.example.com")).await.unwrap();
        client.get(url("https://b.example.com")).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(client.pool().domain_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_resolver() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = ClientBuilder::builder()
            .settings(RateSettings::new(None, Some(1.0)).unwrap())
            .resolver(Arc::new(HostName))
            .build()
            .client_with_transport(transport.clone());

        let start = Instant::now();
        client.get(url("https://a.example.com")).await.unwrap();
        client.get(url("https://b.example.com")).await.unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(client.pool().domain_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_client_adds_no_latency() {
        let latency = Duration::from_millis(100);
        let transport = Arc::new(ScriptedTransport::new().latency(latency));
        let client = client(RateSettings::unlimited(), &transport);

        let start = Instant::now();
        for _ in 0..5 {
            client.get(url(EXAMPLE_URLS[0])).await.unwrap();
        }
        assert_eq!(start.elapsed(), latency * 5);

        let start = Instant::now();
        client
            .get_all((0..10).map(|_| url(EXAMPLE_URLS[0])))
            .await;
        assert_eq!(start.elapsed(), latency);
        assert_eq!(client.pending_releases(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_counts_toward_interval() {
        let transport = Arc::new(ScriptedTransport::new().latency(Duration::from_millis(400)));
        let settings = RateSettings::new(None, Some(1.0)).unwrap();
        let client = client(settings, &transport);

        client.get(url(EXAMPLE_URLS[0])).await.unwrap();
        assert_eq!(client.pending_releases(), 1);
        client.get(url(EXAMPLE_URLS[0])).await.unwrap();

        let sent = transport.sent_to(&url(EXAMPLE_URLS[0]));
        let gap = sent[1] - sent[0];
        // 400ms spent on the request, 600ms waited for the release
        assert!(gap >= Duration::from_secs(1));
        assert!(gap < Duration::from_millis(1010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_request_releases_immediately() {
        let transport = Arc::new(ScriptedTransport::new().latency(Duration::from_millis(1500)));
        let settings = RateSettings::new(Some(1.0), Some(1.0)).unwrap();
        let client = client(settings, &transport);

        client.get(url(EXAMPLE_URLS[0])).await.unwrap();

        assert_eq!(client.pending_releases(), 0);
        assert!(client.pool().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_hold_permits() {
        let transport = Arc::new(
            ScriptedTransport::with_statuses([StatusCode::BAD_GATEWAY, StatusCode::OK])
                .latency(Duration::from_millis(300)),
        );
        let settings = RateSettings::new(None, Some(1.0))
            .unwrap()
            .with_max_retries(1);
        let client = client(settings, &transport);

        let response = client.get(url(EXAMPLE_URLS[0])).await.unwrap();
        assert_eq!(response.elapsed(), Duration::from_millis(600));

        let start = Instant::now();
        client.get(url(EXAMPLE_URLS[0])).await.unwrap();
        let waited = start.elapsed() - Duration::from_millis(300);
        assert!(waited >= Duration::from_millis(400));
        assert!(waited < Duration::from_millis(410));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_releases_permits() {
        let transport = Arc::new(ScriptedTransport::with_steps([Step::Fault]));
        let settings = RateSettings::new(Some(10.0), Some(10.0)).unwrap();
        let client = client(settings, &transport);

        let error = client.get(url(EXAMPLE_URLS[0])).await.unwrap_err();
        assert!(error.is_transport_fault());
        assert_eq!(client.pending_releases(), 2);

        let start = Instant::now();
        let response = client.get(url(EXAMPLE_URLS[0])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(start.elapsed() >= Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(client.pending_releases(), 0);
        assert!(client.pool().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_request_keeps_interval() {
        let transport = Arc::new(ScriptedTransport::new().latency(Duration::from_millis(100)));
        let settings = RateSettings::new(Some(1.0), Some(1.0)).unwrap();
        let client = client(settings, &transport);
        let timeout = Duration::from_millis(50);

        for _ in 0..5 {
            let result = tokio::time::timeout(timeout, client.get(url(EXAMPLE_URLS[0]))).await;
            assert!(result.is_err());
        }
        assert_eq!(transport.calls(), 1);
        assert_eq!(client.pending_releases(), 2);

        client.get(url(EXAMPLE_URLS[0])).await.unwrap();

        let sent = transport.sent_to(&url(EXAMPLE_URLS[0]));
        assert_eq!(sent.len(), 2);
        let gap = sent[1] - sent[0];
        assert!(gap >= Duration::from_secs(1));
        assert!(gap < Duration::from_millis(1010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_releases_everything() {
        let transport = Arc::new(ScriptedTransport::new());
        let settings = RateSettings::new(None, Some(0.1)).unwrap();
        let client = client(settings, &transport);

        client.get(url(EXAMPLE_URLS[0])).await.unwrap();
        client.get(url(EXAMPLE_URLS[1])).await.unwrap();
        assert_eq!(client.pending_releases(), 2);

        let start = Instant::now();
        client.close().await;

        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(client.pending_releases(), 0);
        assert!(client.pool().is_idle());
        assert!(client.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_rejects_waiting_and_new_requests() {
        let transport = Arc::new(ScriptedTransport::new());
        let settings = RateSettings::new(None, Some(0.1)).unwrap();
        let client = client(settings, &transport);

        client.get(url(EXAMPLE_URLS[0])).await.unwrap();
        let waiting = tokio::spawn({
            let client = client.clone();
            async move { client.get(url(EXAMPLE_URLS[0])).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        client.close().await;

        assert_eq!(waiting.await.unwrap().unwrap_err(), ErrorKind::ClientClosed);
        assert_eq!(
            client.get(url(EXAMPLE_URLS[0])).await.unwrap_err(),
            ErrorKind::ClientClosed
        );
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_waits_for_requests_in_flight() {
        let latency = Duration::from_secs(2);
        let transport = Arc::new(ScriptedTransport::new().latency(latency));
        let settings = RateSettings::new(Some(1.0), Some(1.0)).unwrap();
        let client = client(settings, &transport);

        let start = Instant::now();
        let in_flight = tokio::spawn({
            let client = client.clone();
            async move { client.get(url(EXAMPLE_URLS[0])).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        client.close().await;

        assert!(start.elapsed() >= latency);
        assert!(in_flight.await.unwrap().unwrap().is_success());
        assert!(client.pool().is_idle());
        assert_eq!(client.pending_releases(), 0);
    }

    #[tokio::test]
    async fn test_url_without_host() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(RateSettings::new(None, Some(1.0)).unwrap(), &transport);

        let error = client.send(get("data:text/plain,hello")).await.unwrap_err();

        assert_eq!(error, ErrorKind::InvalidUrlHost);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_reqwest_client_sends_user_agent() {
        use wiremock::matchers::{header, method};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", DEFAULT_USER_AGENT))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ClientBuilder::default().client().unwrap();
        let response = client.get(url(&mock_server.uri())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reqwest_client_retries_against_server() {
        let mock_server = test_utils::sequence_mock_server!(
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::OK
        );

        let client = ClientBuilder::builder()
            .settings(
                RateSettings::new(Some(50.0), Some(50.0))
                    .unwrap()
                    .with_max_retries(1),
            )
            .build()
            .client()
            .unwrap();
        let response = client.get(url(&mock_server.uri())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(test_utils::received_requests!(mock_server), 2);
        client.close().await;
    }

    #[tokio::test]
    async fn test_transient_policy_retries_timeouts() {
        use wiremock::{Mock, MockServer, ResponseTemplate, matchers::method};

        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&mock_server)
            .await;

        let client = ClientBuilder::builder()
            .settings(
                RateSettings::unlimited()
                    .with_max_retries(2)
                    .with_retry_policy(crate::RetryPolicy::Transient),
            )
            .timeout(Duration::from_millis(50))
            .build()
            .client()
            .unwrap();
        let error = client.get(url(&mock_server.uri())).await.unwrap_err();

        assert!(error.is_timeout());
        assert_eq!(test_utils::received_requests!(mock_server), 3);
    }
}
