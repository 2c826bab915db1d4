use reqwest::Client;
use std::time::Duration;

const USER_AGENT: &str = concat!("tract-income/", env!("CARGO_PKG_VERSION"));

/// Client shared by every external API backend. The timeout bounds each call.
pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}

/// Short description of a reqwest failure suitable for per-item logs.
pub(crate) fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_decode() {
        format!("malformed response: {err}")
    } else if let Some(status) = err.status() {
        format!("HTTP {status}")
    } else {
        err.to_string()
    }
}
