//! `test-utils` is used for testing in both `polite-lib` and `polite-bin`.
//! This crate does not depend on `polite-lib` or `polite-bin`, else we would get dependency cycles.
//! Macros are used instead, so that the importer is responsible for providing the dependencies.

/// Create a mock web server, which responds with a predefined status when
/// handling a matching request
#[macro_export]
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("GET")).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Create a mock web server which answers `GET` requests with the given
/// statuses, one per request and in order. Requests beyond the last status
/// are answered with `404 Not Found`.
#[macro_export]
macro_rules! sequence_mock_server {
    ($($status:expr),+ $(,)?) => {{
        let mock_server = wiremock::MockServer::start().await;
        $(
            wiremock::Mock::given(wiremock::matchers::method("GET"))
                .respond_with(wiremock::ResponseTemplate::new(http::StatusCode::from($status)))
                .up_to_n_times(1)
                .mount(&mock_server)
                .await;
        )+
        mock_server
    }};
}

/// Number of requests a mock server received so far
#[macro_export]
macro_rules! received_requests {
    ($mock_server:expr) => {
        $mock_server
            .received_requests()
            .await
            .map_or(0, |requests| requests.len())
    };
}
