//! CDN endpoints and the bounded retry helper.

use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CdnConfig {
    /// Packager endpoint; the dependency set is POSTed here and a flattened
    /// manifest comes back.
    pub packager_url: String,
    /// Module endpoint; `{module_url}/{name}@{version}` returns the compact
    /// file map for one package.
    pub module_url: String,
    /// Public CDNs tried in order when the module endpoint fails. Each
    /// returns raw text treated as a single pre-transpiled `index.js`.
    pub fallback_urls: Vec<String>,
    pub retries: usize,
    pub retry_delay: Duration,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            packager_url: "https://packager.sandpit.dev/api/v2/dependencies".to_string(),
            module_url: "https://packager.sandpit.dev/api/v2/module".to_string(),
            fallback_urls: vec![
                "https://cdn.jsdelivr.net/npm".to_string(),
                "https://unpkg.com".to_string(),
            ],
            retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Run `op` up to `1 + retries` times with a fixed delay between attempts.
pub(crate) async fn retry<T, E, F, Fut>(retries: usize, delay: Duration, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < retries => {
                attempt += 1;
                tracing::debug!(%err, attempt, "retrying after failed request");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
