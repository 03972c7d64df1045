//! Mock servers and clients for tests

use std::time::Duration;

use wiremock::MockServer;

use crate::{Client, ClientBuilder};

#[macro_export]
/// Creates a mock web server, which responds with a predefined status when
/// handling a matching request
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::any())
            .respond_with(template)
            .mount(&mock_server)
            .await;
        mock_server
    }};
}

/// A client talking to `server` instead of Discord, with short retry waits
///
/// # Panic
///
/// This panics on error, so it should only be used for testing
pub(crate) fn mock_client(server: &MockServer) -> Client {
    ClientBuilder::builder()
        .token(Some("secret-token".into()))
        .api_base(format!("{}/api/v10", server.uri()))
        .retry_wait_time(Duration::from_millis(10))
        .build()
        .client()
        .expect("Expected a valid mock client")
}
