use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING};
use reqwest::Client;

const APP_USER_AGENT: &str = concat!("LauncherSync/", env!("CARGO_PKG_VERSION"));

/// Shared client for remote fetches.
///
/// Content encoding is disabled so streamed byte counts line up with the
/// manifest sizes. `connect_timeout` bounds the handshake; stalls during the
/// body are handled per chunk by the orchestrator.
pub fn build_http_client(connect_timeout: Duration) -> Result<Client, reqwest::Error> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    Client::builder()
        .user_agent(APP_USER_AGENT)
        .default_headers(default_headers)
        .connect_timeout(connect_timeout)
        .build()
}
