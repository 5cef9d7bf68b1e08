//! Canonical content hash used as a grievance's identity on the external ledger.
//!
//! The hash input is the compact JSON object
//! `{"id","title","description","creatorId","timestamp"}` in exactly that key
//! order, with the timestamp rendered as `YYYY-MM-DDTHH:MM:SS.mmmZ`. Any
//! reimplementation must feed byte-identical input to SHA-256.

use serde::Serialize;
use sha2::{Digest, Sha256};
use time::{OffsetDateTime, UtcOffset};

use crate::{CoreError, Grievance, GrievanceId};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CanonicalFields<'a> {
    pub id: String,
    pub title: &'a str,
    pub description: &'a str,
    #[serde(rename = "creatorId")]
    pub creator_id: &'a str,
    pub timestamp: String,
}

impl<'a> CanonicalFields<'a> {
    #[must_use]
    pub fn new(
        id: GrievanceId,
        title: &'a str,
        description: &'a str,
        creator_id: &'a str,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: id.to_string(),
            title,
            description,
            creator_id,
            timestamp: canonical_timestamp(created_at),
        }
    }

    #[must_use]
    pub fn from_grievance(grievance: &'a Grievance) -> Self {
        Self::new(
            grievance.id,
            &grievance.title,
            &grievance.description,
            &grievance.creator_id,
            grievance.created_at,
        )
    }
}

/// Render a timestamp as ISO-8601 in UTC with millisecond precision and a `Z` suffix.
#[must_use]
pub fn canonical_timestamp(value: OffsetDateTime) -> String {
    let utc = value.to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        utc.year(),
        u8::from(utc.month()),
        utc.day(),
        utc.hour(),
        utc.minute(),
        utc.second(),
        utc.millisecond()
    )
}

/// Compute the lowercase hex SHA-256 of the canonical JSON encoding.
///
/// # Errors
/// Returns [`CoreError::Validation`] when the canonical fields cannot be encoded.
pub fn canonical_hash(fields: &CanonicalFields<'_>) -> Result<String, CoreError> {
    let encoded = serde_json::to_vec(fields)
        .map_err(|err| CoreError::Validation(format!("canonical encoding failed: {err}")))?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

#[cfg(test)]
mod tests {
    use time::Duration;
    use ulid::Ulid;

    use super::*;

    fn fixture_id() -> GrievanceId {
        match Ulid::from_string("01K1D3A7E9J5MNNN8F5JVCJY51") {
            Ok(id) => GrievanceId(id),
            Err(err) => panic!("invalid fixture ULID: {err}"),
        }
    }

    fn fixture_time() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000) + Duration::milliseconds(42)
    }

    fn hash_of(title: &str, description: &str, creator: &str, at: OffsetDateTime) -> String {
        let fields = CanonicalFields::new(fixture_id(), title, description, creator, at);
        match canonical_hash(&fields) {
            Ok(hash) => hash,
            Err(err) => panic!("fixture should hash: {err}"),
        }
    }

    #[test]
    fn timestamp_uses_milliseconds_and_zulu_suffix() {
        assert_eq!(canonical_timestamp(fixture_time()), "2023-11-14T22:13:20.042Z");
    }

    #[test]
    fn timestamp_is_normalized_to_utc() {
        let offset = match UtcOffset::from_hms(5, 30, 0) {
            Ok(offset) => offset,
            Err(err) => panic!("invalid fixture offset: {err}"),
        };
        assert_eq!(
            canonical_timestamp(fixture_time().to_offset(offset)),
            "2023-11-14T22:13:20.042Z"
        );
    }

    #[test]
    fn canonical_json_keeps_declared_key_order() {
        let fields = CanonicalFields::new(fixture_id(), "t", "d", "c", fixture_time());
        let encoded = match serde_json::to_string(&fields) {
            Ok(encoded) => encoded,
            Err(err) => panic!("fixture should encode: {err}"),
        };
        assert_eq!(
            encoded,
            "{\"id\":\"01K1D3A7E9J5MNNN8F5JVCJY51\",\"title\":\"t\",\"description\":\"d\",\
             \"creatorId\":\"c\",\"timestamp\":\"2023-11-14T22:13:20.042Z\"}"
        );
    }

    #[test]
    fn hash_is_stable_across_repeated_computation() {
        let first = hash_of("Pothole", "Deep pothole on 5th street", "citizen-1", fixture_time());
        let second = hash_of("Pothole", "Deep pothole on 5th street", "citizen-1", fixture_time());
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hash_changes_when_any_single_field_changes() {
        let base = hash_of("Pothole", "Deep pothole", "citizen-1", fixture_time());
        assert_ne!(base, hash_of("Pothole!", "Deep pothole", "citizen-1", fixture_time()));
        assert_ne!(base, hash_of("Pothole", "Deep pothole.", "citizen-1", fixture_time()));
        assert_ne!(base, hash_of("Pothole", "Deep pothole", "citizen-2", fixture_time()));
        assert_ne!(
            base,
            hash_of("Pothole", "Deep pothole", "citizen-1", fixture_time() + Duration::milliseconds(1))
        );

        let other_id = CanonicalFields::new(
            GrievanceId::new(),
            "Pothole",
            "Deep pothole",
            "citizen-1",
            fixture_time(),
        );
        assert_ne!(Ok(base), canonical_hash(&other_id));
    }

    #[test]
    fn sub_millisecond_precision_does_not_affect_the_hash() {
        let base = hash_of("Pothole", "Deep pothole", "citizen-1", fixture_time());
        let jittered = hash_of(
            "Pothole",
            "Deep pothole",
            "citizen-1",
            fixture_time() + Duration::nanoseconds(999),
        );
        assert_eq!(base, jittered);
    }
}
