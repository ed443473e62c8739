use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Article metadata pulled from the rendered page.
///
/// Missing fields are empty strings, never absent, so front-matter and record
/// formatting stay stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    pub author: String,
    pub account_name: String,
    /// ISO-8601 instant, or empty when the page carried no timestamp.
    pub publish_date: String,
    pub cover_image: String,
}

impl Metadata {
    pub fn publish_instant(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.publish_date)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Builds the ISO date from a Unix timestamp in seconds.
    pub fn iso_from_unix_seconds(seconds: i64) -> Option<String> {
        DateTime::<Utc>::from_timestamp(seconds, 0)
            .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
    }
}

#[cfg(test)]
mod tests {
    use super::Metadata;

    #[test]
    fn unix_seconds_become_utc_instant() {
        let iso = Metadata::iso_from_unix_seconds(1_700_000_000).unwrap();
        assert_eq!(iso, "2023-11-14T22:13:20.000Z");

        let meta = Metadata {
            publish_date: iso,
            ..Metadata::default()
        };
        assert_eq!(meta.publish_instant().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn empty_date_has_no_instant() {
        assert!(Metadata::default().publish_instant().is_none());
    }
}
