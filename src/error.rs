use std::path::PathBuf;

use thiserror::Error;

/// A single page request that did not produce markup.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("invalid request header {name}: {value:?}")]
    InvalidHeader { name: &'static str, value: String },
    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Fatal to one category's traversal; sibling categories keep going.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("{category}: page {page} ({url}): {source}")]
    Fetch {
        category: String,
        page: u32,
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("{0}: record receiver dropped")]
    ChannelClosed(String),
    #[error("{category}: traversal task aborted: {reason}")]
    Aborted { category: String, reason: String },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("interchange file not found: {0} (run the scrape step first)")]
    MissingInterchange(PathBuf),
    #[error("interchange file {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("interchange file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage: {0}")]
    Storage(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("configuration: {0}")]
    Source(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
