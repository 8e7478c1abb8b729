//! Human-readable duration parsing for group intervals and rule timing.

use std::time::Duration;

/// Parse a human-readable duration string into a [`Duration`].
///
/// The grammar is a sequence of `<number><unit>` segments, where the unit is
/// `d`, `h`, `m`, or `s`: "2h30m", "1d12h", "90s". A bare number with no unit
/// is seconds. Returns `None` on empty input, unknown units, a segment
/// missing its number, digits left over after the last unit ("30m15"), or
/// overflow.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let text = s.trim();
    if text.is_empty() {
        return None;
    }

    // Bare seconds, no unit.
    if text.bytes().all(|b| b.is_ascii_digit()) {
        return text.parse().ok().map(Duration::from_secs);
    }

    let mut total: u64 = 0;
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 || digits == rest.len() {
            // A unit with no number, or trailing digits with no unit.
            return None;
        }
        let value: u64 = rest[..digits].parse().ok()?;
        let unit = rest[digits..].chars().next()?;
        let scale: u64 = match unit {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        total = total.checked_add(value.checked_mul(scale)?)?;
        rest = &rest[digits + unit.len_utf8()..];
    }

    Some(Duration::from_secs(total))
}

/// Render a duration in the same grammar [`parse_duration`] accepts.
pub fn format_duration(d: Duration) -> String {
    let mut secs = d.as_secs();
    if secs == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    for (unit, label) in [(86_400, 'd'), (3_600, 'h'), (60, 'm'), (1, 's')] {
        let n = secs / unit;
        if n > 0 {
            out.push_str(&format!("{n}{label}"));
            secs -= n * unit;
        }
    }
    out
}

/// Serde adapter for `Option<Duration>` fields holding duration strings.
pub mod opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::{format_duration, parse_duration};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => parse_duration(&s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid duration '{s}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minutes() {
        assert_eq!(parse_duration("30m"), Some(Duration::from_secs(30 * 60)));
    }

    #[test]
    fn parse_hours() {
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3_600)));
    }

    #[test]
    fn parse_combined() {
        assert_eq!(
            parse_duration("2h30m"),
            Some(Duration::from_secs(2 * 3_600 + 30 * 60))
        );
    }

    #[test]
    fn parse_days() {
        assert_eq!(parse_duration("1d"), Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn parse_seconds() {
        assert_eq!(parse_duration("90s"), Some(Duration::from_secs(90)));
    }

    #[test]
    fn parse_complex() {
        assert_eq!(
            parse_duration("1d2h30m15s"),
            Some(Duration::from_secs(86_400 + 7_200 + 1_800 + 15))
        );
    }

    #[test]
    fn parse_empty_returns_none() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("  "), None);
    }

    #[test]
    fn parse_invalid_returns_none() {
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("30m15"), None);
    }

    #[test]
    fn parse_bare_number_as_seconds() {
        assert_eq!(parse_duration("120"), Some(Duration::from_secs(120)));
    }

    #[test]
    fn parse_zero_with_unit() {
        assert_eq!(parse_duration("0s"), Some(Duration::ZERO));
    }

    #[test]
    fn format_round_trips() {
        for text in ["90s", "1m30s", "2h30m", "1d2h30m15s", "0s"] {
            let parsed = parse_duration(text).unwrap();
            assert_eq!(parse_duration(&format_duration(parsed)), Some(parsed));
        }
    }

    #[test]
    fn format_decomposes_units() {
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(86_400 + 60)), "1d1m");
    }
}
