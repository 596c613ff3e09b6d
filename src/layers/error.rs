use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{service} API error: {status}: {body}")]
    Api {
        service: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("model returned an empty response")]
    EmptyResponse,
    /// The model answered, but without the markup we asked for.
    #[error("no <{expected}> tags found in model response")]
    MissingTags {
        expected: &'static str,
        response: String,
    },
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn missing_tags(expected: &'static str, response: impl Into<String>) -> Self {
        let response = response.into();
        tracing::debug!("Response without <{}> tags: {}", expected, response);
        Error::MissingTags { expected, response }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Joins `path` onto `base`, treating `base` as a directory even without a
/// trailing slash.
pub fn endpoint(base: &str, path: &str) -> Result<url::Url> {
    let mut base = base.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Ok(url::Url::parse(&base)?.join(path.trim_start_matches('/'))?)
}
