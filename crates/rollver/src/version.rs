//! API version parsing and ordering
//!
//! A [`Version`] is a raw version string paired with its parsed form in one
//! of two formats: calendar date (`2024-01-01`) or semantic version
//! (`1.2.3`). Versions are comparable only within the same format;
//! cross-format ordering predicates return `false` rather than panicking.

use crate::error::RollverError;
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::fmt;

/// Format in which API versions are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionFormat {
    /// Calendar dates, `YYYY-MM-DD`, no time component
    #[default]
    Date,

    /// Semantic versions, `major.minor.patch`
    Semver,
}

impl VersionFormat {
    /// The earliest possible version in this format.
    ///
    /// Every registry starts with this version so unversioned callers
    /// resolve to the oldest behavior.
    #[must_use]
    pub fn zero(self) -> Version {
        match self {
            Self::Date => Version {
                raw: "0001-01-01".to_string(),
                parsed: Parsed::Date(
                    NaiveDate::from_ymd_opt(1, 1, 1).expect("0001-01-01 is a valid date"),
                ),
            },
            Self::Semver => Version {
                raw: "0.0.0".to_string(),
                parsed: Parsed::Semver(semver::Version::new(0, 0, 0)),
            },
        }
    }
}

/// A parsed API version.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    parsed: Parsed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Parsed {
    Date(NaiveDate),
    Semver(semver::Version),
}

impl Version {
    /// Parse and validate a version string in the given format.
    ///
    /// # Errors
    /// Returns [`RollverError::InvalidVersion`] if the string does not
    /// parse in `format`. Validation happens here, once, so comparisons
    /// never have to deal with malformed values.
    pub fn parse(value: &str, format: VersionFormat) -> Result<Self, RollverError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(RollverError::InvalidVersion(value.to_string()));
        }

        let parsed = match format {
            VersionFormat::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(Parsed::Date)
                .map_err(|_| RollverError::InvalidVersion(value.to_string()))?,
            VersionFormat::Semver => semver::Version::parse(value)
                .map(Parsed::Semver)
                .map_err(|_| RollverError::InvalidVersion(value.to_string()))?,
        };

        Ok(Self {
            raw: value.to_string(),
            parsed,
        })
    }

    /// Format this version was parsed in
    #[inline]
    #[must_use]
    pub fn format(&self) -> VersionFormat {
        match self.parsed {
            Parsed::Date(_) => VersionFormat::Date,
            Parsed::Semver(_) => VersionFormat::Semver,
        }
    }

    /// The raw version string as supplied by the caller
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// `true` if `self` precedes `other`.
    ///
    /// Versions of different formats are not comparable and this returns
    /// `false` for them.
    #[must_use]
    pub fn is_older_than(&self, other: &Self) -> bool {
        matches!(self.partial_cmp(other), Some(Ordering::Less))
    }

    /// Sort a sequence of versions ascending, oldest first.
    ///
    /// Versions of mismatched formats compare as equal and keep their
    /// relative order; a registry only ever holds a single format.
    pub fn sort_ascending(versions: &mut [Version]) {
        versions.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.parsed == other.parsed
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (&self.parsed, &other.parsed) {
            (Parsed::Date(a), Parsed::Date(b)) => Some(a.cmp(b)),
            (Parsed::Semver(a), Parsed::Semver(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_date() {
        let v = Version::parse("2024-01-01", VersionFormat::Date).unwrap();
        assert_eq!(v.as_str(), "2024-01-01");
        assert_eq!(v.format(), VersionFormat::Date);
    }

    #[test]
    fn parse_semver() {
        let v = Version::parse("1.2.3", VersionFormat::Semver).unwrap();
        assert_eq!(v.format(), VersionFormat::Semver);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Version::parse("not-a-date", VersionFormat::Date).is_err());
        assert!(Version::parse("2024-13-45", VersionFormat::Date).is_err());
        assert!(Version::parse("v1", VersionFormat::Semver).is_err());
        assert!(Version::parse("", VersionFormat::Date).is_err());
    }

    #[test]
    fn date_ordering() {
        let a = Version::parse("2023-06-01", VersionFormat::Date).unwrap();
        let b = Version::parse("2024-01-01", VersionFormat::Date).unwrap();
        assert!(a.is_older_than(&b));
        assert!(!b.is_older_than(&a));
        assert!(!a.is_older_than(&a));
    }

    #[test]
    fn semver_ordering() {
        let a = Version::parse("1.9.0", VersionFormat::Semver).unwrap();
        let b = Version::parse("1.10.0", VersionFormat::Semver).unwrap();
        assert!(a.is_older_than(&b));
    }

    #[test]
    fn cross_format_not_comparable() {
        let date = Version::parse("2024-01-01", VersionFormat::Date).unwrap();
        let sv = Version::parse("1.0.0", VersionFormat::Semver).unwrap();
        assert!(!date.is_older_than(&sv));
        assert!(!sv.is_older_than(&date));
        assert_ne!(date, sv);
    }

    #[test]
    fn zero_precedes_everything() {
        let zero = VersionFormat::Date.zero();
        let v = Version::parse("1970-01-01", VersionFormat::Date).unwrap();
        assert!(zero.is_older_than(&v));

        let zero = VersionFormat::Semver.zero();
        let v = Version::parse("0.0.1", VersionFormat::Semver).unwrap();
        assert!(zero.is_older_than(&v));
    }

    #[test]
    fn sort_ascending_orders_dates() {
        let mut versions = vec![
            Version::parse("2024-01-01", VersionFormat::Date).unwrap(),
            Version::parse("2023-03-01", VersionFormat::Date).unwrap(),
            Version::parse("2023-06-01", VersionFormat::Date).unwrap(),
        ];
        Version::sort_ascending(&mut versions);
        let raw: Vec<_> = versions.iter().map(Version::as_str).collect();
        assert_eq!(raw, vec!["2023-03-01", "2023-06-01", "2024-01-01"]);
    }

    proptest! {
        #[test]
        fn sorted_sequence_is_pairwise_ordered(mut days in proptest::collection::vec(0u32..20_000, 1..20)) {
            let base = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
            let mut versions: Vec<Version> = days
                .drain(..)
                .map(|d| {
                    let date = base + chrono::Duration::days(i64::from(d));
                    Version::parse(&date.format("%Y-%m-%d").to_string(), VersionFormat::Date).unwrap()
                })
                .collect();
            Version::sort_ascending(&mut versions);
            for pair in versions.windows(2) {
                prop_assert!(!pair[1].is_older_than(&pair[0]));
            }
        }

        #[test]
        fn semver_roundtrip_display(major in 0u64..100, minor in 0u64..100, patch in 0u64..100) {
            let raw = format!("{major}.{minor}.{patch}");
            let v = Version::parse(&raw, VersionFormat::Semver).unwrap();
            prop_assert_eq!(v.to_string(), raw);
        }
    }
}
