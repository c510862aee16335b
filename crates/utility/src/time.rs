use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    #[error("unparsable timestamp '{0}'")]
    Unparsable(String),

    /// The local time does not exist (or is ambiguous) in the given zone.
    #[error("timestamp '{value}' is not a valid local time in {zone}")]
    NotRepresentable { value: String, zone: Tz },
}

/// Parses an API timestamp into UTC.
///
/// Timestamps carrying an offset keep it. Timestamps without one are read
/// as local time of `zone`.
pub fn parse_in_zone(value: &str, zone: Tz) -> Result<DateTime<Utc>, TimestampError> {
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(value) {
        return Ok(with_offset.with_timezone(&Utc));
    }
    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .ok_or_else(|| TimestampError::Unparsable(value.to_owned()))?;
    zone.from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| TimestampError::NotRepresentable {
            value: value.to_owned(),
            zone,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;
    use rstest::rstest;

    #[rstest]
    #[case("2025-02-01T12:30:00Z")]
    #[case("2025-02-01T12:30:00.000000Z")]
    #[case("2025-02-01T07:30:00-05:00")]
    fn keeps_explicit_offsets(#[case] value: &str) {
        let parsed = parse_in_zone(value, New_York).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 2, 1, 12, 30, 0).unwrap());
    }

    #[test]
    fn naive_values_use_the_zone() {
        let parsed = parse_in_zone("2025-02-01T07:30:00.123", New_York).unwrap();
        assert_eq!(
            parsed.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "2025-02-01T12:30:00"
        );
    }

    #[test]
    fn garbage_is_rejected() {
        let result = parse_in_zone("yesterday", chrono_tz::UTC);
        assert_eq!(result, Err(TimestampError::Unparsable("yesterday".to_owned())));
        assert_eq!(
            result.unwrap_err().to_string(),
            "unparsable timestamp 'yesterday'"
        );
    }

    #[test]
    fn skipped_local_time_is_rejected() {
        // clocks jump from 02:00 to 03:00 in New York on this day
        let error = parse_in_zone("2025-03-09T02:30:00", New_York).unwrap_err();
        assert!(matches!(error, TimestampError::NotRepresentable { .. }));
        assert_eq!(
            error.to_string(),
            "timestamp '2025-03-09T02:30:00' is not a valid local time in America/New_York"
        );
    }
}
