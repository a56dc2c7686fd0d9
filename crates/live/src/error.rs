use std::path::PathBuf;

/// Failure talking to the realtime backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ChannelError {
	/// Network drop, timeout or token refresh; retried with backoff.
	#[error("transient channel failure: {0}")]
	Transient(String),
	/// The subscriber fell behind and events were lost; recovered by a full resync.
	#[error("subscription lagged; {missed} events missed")]
	Gap { missed: u64 },
	/// Credentials were rejected; never retried.
	#[error("credentials rejected: {0}")]
	Auth(String),
	/// The channel ended without an error.
	#[error("channel closed")]
	Closed,
}

impl ChannelError {
	/// Returns true for failures that must not be retried.
	pub fn is_fatal(&self) -> bool {
		matches!(self, Self::Auth(_))
	}
}

/// Fatal condition surfaced by the subscription manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
	#[error("backend rejected the session: {0}")]
	Rejected(String),
	#[error("gave up after {attempts} attempts; last error: {last}")]
	RetriesExhausted { attempts: u32, last: String },
}

/// Configuration loading failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("invalid config syntax: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("failed to render config: {0}")]
	Render(#[from] toml::ser::Error),
	#[error("invalid config value `{field}`: {reason}")]
	Invalid { field: &'static str, reason: String },
}
