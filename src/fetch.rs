use crate::error::FetchError;
use std::future::Future;
use std::time::Duration;

/// Delivers raw bodies for static files and real-time feeds.
pub trait FeedFetcher: Send + Sync {
    fn fetch(&self, location: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

/// Fetches `http(s)://` locations with reqwest and anything else from the
/// local filesystem.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl FeedFetcher for HttpFetcher {
    fn fetch(&self, location: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send {
        let location = location.to_string();
        let client = self.client.clone();
        async move {
            if !is_remote(&location) {
                return tokio::fs::read(&location)
                    .await
                    .map_err(|e| FetchError::Network(format!("{location}: {e}")));
            }

            let response = client
                .get(&location)
                .send()
                .await
                .map_err(|e| FetchError::Network(e.to_string()))?;
            if !response.status().is_success() {
                return Err(FetchError::Status(response.status().as_u16()));
            }
            let body = response
                .bytes()
                .await
                .map_err(|e| FetchError::Network(e.to_string()))?;
            Ok(body.to_vec())
        }
    }
}

pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Join a base directory or URL with a file name.
pub fn join_location(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}
