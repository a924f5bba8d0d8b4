//! Records stored by the ingestion engine and read by the feed resolver.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Unicode case folding shared by keyword filters and substring search.
pub fn fold_case(text: &str) -> String {
    text.to_lowercase()
}

/// A point in the same planar coordinate space used for radius queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    fn from_columns(lat: Option<f64>, lng: Option<f64>) -> Option<Self> {
        match (lat, lng) {
            (Some(lat), Some(lng)) => Some(Self { lat, lng }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Organisation {
    pub id: i64,
    pub name: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl Organisation {
    pub fn location(&self) -> Option<GeoPoint> {
        GeoPoint::from_columns(self.lat, self.lng)
    }
}

/// How a source is fed. Local sources are written by people, not polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Rss,
    Local,
    Other(String),
}

impl SourceKind {
    pub fn parse(kind: &str) -> Self {
        if kind.eq_ignore_ascii_case("rss") {
            SourceKind::Rss
        } else if kind.eq_ignore_ascii_case("local") {
            SourceKind::Local
        } else {
            SourceKind::Other(kind.to_string())
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Source {
    pub id: i64,
    pub organisation_id: Option<i64>,
    pub name: String,
    pub url: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub source_type: String,
    /// Keyword an item's title or teaser must contain to be admitted.
    pub filter: Option<String>,
    pub last_fetched: Option<String>,
    pub last_error: Option<String>,
}

impl Source {
    pub fn kind(&self) -> SourceKind {
        SourceKind::parse(&self.source_type)
    }

    /// Case-insensitive keyword check. An unset or blank filter admits everything.
    pub fn admits(&self, title: &str, teaser: &str) -> bool {
        let term = match self.filter.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => fold_case(term),
            _ => return true,
        };
        fold_case(title).contains(&term) || fold_case(teaser).contains(&term)
    }
}

#[derive(Debug, Clone)]
pub struct NewSource {
    pub organisation_id: Option<i64>,
    pub name: String,
    pub url: String,
    pub source_type: String,
    pub filter: Option<String>,
}

impl NewSource {
    pub fn rss(organisation_id: i64, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            organisation_id: Some(organisation_id),
            name: name.into(),
            url: url.into(),
            source_type: "RSS".to_string(),
            filter: None,
        }
    }

    pub fn with_type(mut self, source_type: impl Into<String>) -> Self {
        self.source_type = source_type.into();
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Article {
    pub id: i64,
    pub source_id: i64,
    pub date: Option<String>,
    pub title: String,
    pub teaser: String,
    pub image_url: Option<String>,
    pub link: String,
    pub guid: Option<String>,
    pub published: bool,
    pub is_visible: bool,
    pub is_hot: bool,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    #[sqlx(skip)]
    pub tags: Vec<i64>,
}

impl Article {
    pub fn location(&self) -> Option<GeoPoint> {
        GeoPoint::from_columns(self.lat, self.lng)
    }
}

/// An article candidate built from a polled feed item.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub source_id: i64,
    pub date: Option<DateTime<Utc>>,
    pub title: String,
    pub teaser: String,
    pub image_url: Option<String>,
    pub link: String,
    pub guid: Option<String>,
    pub published: bool,
}

impl NewArticle {
    pub fn new(source_id: i64, title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            source_id,
            date: None,
            title: title.into(),
            teaser: String::new(),
            image_url: None,
            link: link.into(),
            guid: None,
            published: true,
        }
    }

    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }

    pub fn with_teaser(mut self, teaser: impl Into<String>) -> Self {
        self.teaser = teaser.into();
        self
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Storage form of `date`; second precision keeps text order chronological.
    pub fn date_string(&self) -> Option<String> {
        self.date.map(|d| d.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    /// Organisation the user belongs to, for ownership checks.
    pub organisation_id: Option<i64>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius: f64,
}

impl User {
    pub fn location(&self) -> Option<GeoPoint> {
        GeoPoint::from_columns(self.lat, self.lng)
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub organisation_id: Option<i64>,
    pub location: Option<GeoPoint>,
    pub radius: f64,
}

impl NewUser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            organisation_id: None,
            location: None,
            radius: 0.0,
        }
    }

    pub fn with_location(mut self, location: GeoPoint, radius: f64) -> Self {
        self.location = Some(location);
        self.radius = radius;
        self
    }

    pub fn with_organisation(mut self, organisation_id: i64) -> Self {
        self.organisation_id = Some(organisation_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_with_filter(filter: Option<&str>) -> Source {
        Source {
            id: 1,
            organisation_id: None,
            name: "Gazette".to_string(),
            url: "https://gazette.example.com/rss".to_string(),
            source_type: "RSS".to_string(),
            filter: filter.map(str::to_string),
            last_fetched: None,
            last_error: None,
        }
    }

    mod geo_tests {
        use super::*;

        #[test]
        fn test_location_requires_both_columns() {
            assert!(GeoPoint::from_columns(Some(1.0), None).is_none());
            assert_eq!(
                GeoPoint::from_columns(Some(1.0), Some(2.0)),
                Some(GeoPoint::new(1.0, 2.0))
            );
        }
    }

    mod source_tests {
        use super::*;

        #[test]
        fn test_kind_parsing() {
            assert_eq!(SourceKind::parse("RSS"), SourceKind::Rss);
            assert_eq!(SourceKind::parse("rss"), SourceKind::Rss);
            assert_eq!(SourceKind::parse("local"), SourceKind::Local);
            assert_eq!(
                SourceKind::parse("twitter"),
                SourceKind::Other("twitter".to_string())
            );
        }

        #[test]
        fn test_no_filter_admits_everything() {
            let source = source_with_filter(None);
            assert!(source.admits("Weather", "Sunny"));
        }

        #[test]
        fn test_filter_matches_title_case_insensitively() {
            let source = source_with_filter(Some("election"));
            assert!(source.admits("ELECTION results", ""));
        }

        #[test]
        fn test_filter_matches_teaser() {
            let source = source_with_filter(Some("Election"));
            assert!(source.admits("Council news", "the local election is near"));
        }

        #[test]
        fn test_filter_rejects_missing_term() {
            let source = source_with_filter(Some("election"));
            assert!(!source.admits("Weather", "Sunny all week"));
        }

        #[test]
        fn test_filter_folds_non_ascii() {
            let source = source_with_filter(Some("NEUKÖLLN"));
            assert!(source.admits("Neukölln wählt", ""));
        }

        #[test]
        fn test_blank_filter_is_ignored() {
            let source = source_with_filter(Some("  "));
            assert!(source.admits("Weather", "Sunny"));
        }
    }

    #[test]
    fn test_date_string_is_second_precision_utc() {
        let date = DateTime::parse_from_rfc3339("2024-12-09T12:00:00.250+02:00")
            .unwrap()
            .with_timezone(&Utc);
        let article = NewArticle::new(1, "t", "https://a.example.com").with_date(date);
        assert_eq!(article.date_string().as_deref(), Some("2024-12-09T10:00:00Z"));
    }
}
