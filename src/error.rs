//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the optimistic collection engine.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Serde(#[from] serde_json::Error),

	#[cfg(feature = "http-transport")]
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[cfg(feature = "http-transport")]
	#[error(transparent)]
	Http(#[from] http::Error),

	#[error("Cache error: {0}")]
	Cache(String),
	#[error("Fetch failed after retries: {0}")]
	Fetch(String),
	#[error("Collection '{id}' is not registered.")]
	NotRegistered { id: String },
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Sync error: {0}")]
	Sync(String),
	#[error("Upstream HTTP status {status} from {url}: {body:?}")]
	Transport { status: u16, url: String, body: Option<String> },
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
#[cfg(feature = "metrics")]
impl<T> From<metrics::SetRecorderError<T>> for Error
where
	T: std::fmt::Display,
{
	fn from(value: metrics::SetRecorderError<T>) -> Self {
		Self::Metrics(value.to_string())
	}
}
