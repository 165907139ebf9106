use thiserror::Error;

/// Failure of the static schedule load. Any of these aborts the load and no
/// partial schedule is published.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to fetch {file}: {reason}")]
    Fetch { file: &'static str, reason: String },
    #[error("{file} returned HTTP {status}")]
    Status { file: &'static str, status: u16 },
    #[error("failed to read header of {file}: {source}")]
    Csv {
        file: &'static str,
        #[source]
        source: csv::Error,
    },
    #[error("{file} is not valid UTF-8")]
    Encoding { file: &'static str },
    #[error("invalid route_stops.json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of one real-time feed for one refresh cycle. Never fatal: the
/// previous snapshot for that feed stays visible.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("malformed feed: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("gzip error: {0}")]
    Gzip(#[from] std::io::Error),
}

/// Failure of the I/O collaborator to deliver a body.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("{0}")]
    Network(String),
    #[error("HTTP {0}")]
    Status(u16),
}

impl From<FetchError> for FeedError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Network(reason) => FeedError::Network(reason),
            FetchError::Status(status) => FeedError::Status(status),
        }
    }
}

impl LoadError {
    pub fn from_fetch(file: &'static str, e: FetchError) -> Self {
        match e {
            FetchError::Network(reason) => LoadError::Fetch { file, reason },
            FetchError::Status(status) => LoadError::Status { file, status },
        }
    }
}
