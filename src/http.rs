use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::source::SourceError;

/// Plain GET transport the adapters are written against.
pub trait Fetch: Send + Sync {
    fn get_text(&self, url: &str, bearer: Option<&str>) -> Result<String, SourceError>;
}

pub fn get_json<T: DeserializeOwned>(
    fetch: &dyn Fetch,
    url: &str,
    bearer: Option<&str>,
) -> Result<T, SourceError> {
    let body = fetch.get_text(url, bearer)?;
    serde_json::from_str(&body)
        .map_err(|err| SourceError::MalformedResponse(format!("{url}: {err}")))
}

pub struct HttpFetcher {
    http: HttpClient,
    user_agent: String,
    retries: u32,
    retry_backoff: Duration,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("http: user agent required");
        }
        let http = HttpClient::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            user_agent: config.user_agent.clone(),
            retries: config.retries,
            retry_backoff: config.retry_backoff,
        })
    }

    fn attempt(&self, url: &str, bearer: Option<&str>) -> Result<String, SourceError> {
        let mut req = self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json, application/xml;q=0.9, */*;q=0.8");
        if let Some(token) = bearer {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let resp = req
            .send()
            .map_err(|err| SourceError::UpstreamUnavailable(format!("{url}: {err}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, url));
        }
        resp.text()
            .map_err(|err| SourceError::UpstreamUnavailable(format!("{url}: {err}")))
    }
}

impl Fetch for HttpFetcher {
    fn get_text(&self, url: &str, bearer: Option<&str>) -> Result<String, SourceError> {
        with_retries(url, self.retries, self.retry_backoff, || self.attempt(url, bearer))
    }
}

/// Runs `attempt` until it succeeds, fails with a non-retryable error, or
/// `retries` extra attempts are used up. The wait grows linearly.
fn with_retries<T>(
    url: &str,
    retries: u32,
    backoff: Duration,
    mut attempt: impl FnMut() -> Result<T, SourceError>,
) -> Result<T, SourceError> {
    let mut retried = 0;
    loop {
        debug!(%url, attempt = retried, "GET");
        match attempt() {
            Err(err) if err.is_retryable() && retried < retries => {
                retried += 1;
                warn!(%url, attempt = retried, error = %err, "retrying request");
                thread::sleep(backoff * retried);
            }
            other => return other,
        }
    }
}

fn status_error(status: StatusCode, url: &str) -> SourceError {
    match status.as_u16() {
        404 | 410 => SourceError::NotFound(url.to_string()),
        _ => SourceError::UpstreamUnavailable(format!("{url}: {status}")),
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;

    use parking_lot::Mutex;

    use super::Fetch;
    use crate::source::SourceError;

    /// Canned responses keyed by exact URL. Unknown URLs are `NotFound`.
    #[derive(Default)]
    pub struct StubFetcher {
        responses: Mutex<HashMap<String, Result<String, SourceError>>>,
        requests: Mutex<Vec<(String, Option<String>)>>,
    }

    impl StubFetcher {
        pub fn with(self, url: &str, body: &str) -> Self {
            self.responses
                .lock()
                .insert(url.to_string(), Ok(body.to_string()));
            self
        }

        pub fn failing(self, url: &str, err: SourceError) -> Self {
            self.responses.lock().insert(url.to_string(), Err(err));
            self
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests
                .lock()
                .iter()
                .map(|(url, _)| url.clone())
                .collect()
        }

        pub fn bearer_for(&self, url: &str) -> Option<String> {
            self.requests
                .lock()
                .iter()
                .find(|(u, _)| u == url)
                .and_then(|(_, bearer)| bearer.clone())
        }

        pub fn count(&self, url: &str) -> usize {
            self.requests.lock().iter().filter(|(u, _)| u == url).count()
        }
    }

    impl Fetch for StubFetcher {
        fn get_text(&self, url: &str, bearer: Option<&str>) -> Result<String, SourceError> {
            self.requests
                .lock()
                .push((url.to_string(), bearer.map(str::to_string)));
            self.responses
                .lock()
                .get(url)
                .cloned()
                .unwrap_or_else(|| Err(SourceError::NotFound(url.to_string())))
        }
    }
}
