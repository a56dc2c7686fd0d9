use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source-supplied UTC instant attached to every change.
///
/// Ordering is total; the store uses it for last-writer-wins resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
	/// The Unix epoch.
	pub const EPOCH: Timestamp = Timestamp(DateTime::UNIX_EPOCH);

	/// Current wall-clock time.
	pub fn now() -> Self {
		Self(Utc::now())
	}

	/// Builds a timestamp from milliseconds since the Unix epoch.
	///
	/// Values chrono cannot represent saturate to the epoch.
	pub fn from_millis(millis: i64) -> Self {
		Self(DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH))
	}

	pub fn as_millis(&self) -> i64 {
		self.0.timestamp_millis()
	}

	/// Returns this instant shifted forward by `millis` (negative shifts backward).
	pub fn offset_millis(&self, millis: i64) -> Self {
		Self::from_millis(self.as_millis().saturating_add(millis))
	}
}

impl From<DateTime<Utc>> for Timestamp {
	fn from(value: DateTime<Utc>) -> Self {
		Self(value)
	}
}

impl fmt::Display for Timestamp {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0.to_rfc3339())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn millis_round_trip_and_order() {
		let a = Timestamp::from_millis(1);
		let b = Timestamp::from_millis(2);
		assert!(a < b);
		assert_eq!(b.as_millis(), 2);
		assert_eq!(a.offset_millis(1), b);
	}

	#[test]
	fn parses_rfc3339_from_wire() {
		let ts: Timestamp = serde_json::from_str(r#""2024-03-01T10:00:00.250Z""#).unwrap();
		assert_eq!(ts.as_millis() % 1000, 250);
	}
}
