//! Shared HTTP client.
use reqwest::redirect::Policy;
use std::time::Duration;

const MAX_REDIRECTS: usize = 5;

/// User-Agent sent with every request.
pub const USER_AGENT: &str = concat!("feedmail/", env!("CARGO_PKG_VERSION"));

/// Build the client used for feed and resource requests.
///
/// No client-wide timeout is set: feeds, HEAD checks and downloads each
/// run under their own deadline.
pub fn build_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(redirect_policy())
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(10))
        .build()
}

/// Follow at most five redirects and stop on loops.
fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev == url) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}
