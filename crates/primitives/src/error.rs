use crate::EventKind;

/// Rejection reason for a malformed change event or position sample.
///
/// Validation failures are never fatal: callers drop the offending input,
/// report it, and keep their previous state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ValidationError {
	/// An insert or update arrived without a payload.
	#[error("{kind} event carries no payload")]
	MissingPayload { kind: EventKind },
	/// A field required to materialize a new vehicle is absent.
	#[error("missing required field `{field}`")]
	MissingField { field: &'static str },
	/// Latitude outside `[-90, 90]`.
	#[error("latitude {0} out of range [-90, 90]")]
	LatitudeOutOfRange(f64),
	/// Longitude outside `[-180, 180]`.
	#[error("longitude {0} out of range [-180, 180]")]
	LongitudeOutOfRange(f64),
	/// NaN or infinite coordinate.
	#[error("non-finite coordinate")]
	NonFiniteCoordinate,
	/// Neither the new nor the old row carried an identifier.
	#[error("change carries no vehicle id")]
	MissingId,
	/// No timestamp could be derived for the change.
	#[error("change carries no timestamp")]
	MissingTimestamp,
	/// The wire event type is not one of INSERT, UPDATE or DELETE.
	#[error("unknown event type `{0}`")]
	UnknownEventType(String),
	/// The raw message could not be decoded at all.
	#[error("malformed message: {0}")]
	Malformed(String),
}
