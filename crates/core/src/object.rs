//! Stored-object value types: references, metadata and tags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Identifies one artifact in the object store (container + path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    bucket: String,
    key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> DomainResult<Self> {
        let bucket = bucket.into();
        let key = key.into();
        if bucket.is_empty() {
            return Err(DomainError::invalid_id("bucket must not be empty"));
        }
        if key.is_empty() {
            return Err(DomainError::invalid_id("key must not be empty"));
        }
        Ok(Self { bucket, key })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Last path segment of the key (`"a/b/foo-fail.json"` → `"foo-fail.json"`).
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Same key, prefixed, in another bucket (used for the outbound copy).
    pub fn relocated(&self, bucket: impl Into<String>, prefix: &str) -> Self {
        Self {
            bucket: bucket.into(),
            key: format!("{prefix}{}", self.key),
        }
    }
}

impl core::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Metadata resolved from the object store at ingestion time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub last_modified: DateTime<Utc>,
    pub etag: String,
}

/// A single object tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// Ordered tag set. Setting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(Vec<Tag>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|t| t.key == key) {
            Some(existing) => existing.value = value,
            None => self.0.push(Tag { key, value }),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|t| t.key == key).map(|t| t.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse the form-urlencoded tagging header (`k1=v1&k2=v2`).
    ///
    /// Keys and values are percent-decoded; `+` decodes to a space.
    pub fn parse_query(raw: &str) -> DomainResult<Self> {
        if let Some(pair) = raw.split('&').find(|p| !p.is_empty() && !p.contains('=')) {
            return Err(DomainError::validation(format!("tag without '=': {pair}")));
        }

        let mut tags = Self::new();
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            if key.is_empty() {
                return Err(DomainError::validation("tag key must not be empty"));
            }
            tags.set(key, value);
        }
        Ok(tags)
    }
}

/// Result of an idempotent delete against a collaborator.
///
/// Both variants are success: deleting something already gone is not an error.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    AlreadyGone,
}

/// Parse an ISO-8601 / RFC 3339 timestamp (a trailing `Z` is accepted) into UTC.
pub fn parse_timestamp(raw: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DomainError::invalid_timestamp(format!("{raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_last_segment() {
        let object = ObjectRef::new("inbound", "processed/2024/foo-fail.json").unwrap();
        assert_eq!(object.file_name(), "foo-fail.json");

        let flat = ObjectRef::new("inbound", "ok.txt").unwrap();
        assert_eq!(flat.file_name(), "ok.txt");
    }

    #[test]
    fn relocated_prefixes_key() {
        let object = ObjectRef::new("inbound", "foo-fail.json").unwrap();
        let copy = object.relocated("outbound", "copied/");
        assert_eq!(copy.bucket(), "outbound");
        assert_eq!(copy.key(), "copied/foo-fail.json");
    }

    #[test]
    fn empty_parts_are_rejected() {
        assert!(ObjectRef::new("", "k").is_err());
        assert!(ObjectRef::new("b", "").is_err());
    }

    #[test]
    fn tag_set_replaces_existing_keys() {
        let mut tags = TagSet::new().with("owner", "ops");
        tags.set("owner", "data");
        tags.set("ElapsedSeconds", "3");
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("owner"), Some("data"));
    }

    #[test]
    fn tag_query_parsing() {
        let tags = TagSet::parse_query("team=ingest&tier=gold").unwrap();
        assert_eq!(tags.get("team"), Some("ingest"));
        assert_eq!(tags.get("tier"), Some("gold"));
        assert!(TagSet::parse_query("broken").is_err());
        assert!(TagSet::parse_query("").unwrap().is_empty());
        assert!(TagSet::parse_query("=orphan").is_err());
    }

    #[test]
    fn tag_query_values_are_percent_decoded() {
        let tags = TagSet::parse_query("project=Q1%20report&owner=a%26b&note=two+words").unwrap();
        assert_eq!(tags.get("project"), Some("Q1 report"));
        assert_eq!(tags.get("owner"), Some("a&b"));
        assert_eq!(tags.get("note"), Some("two words"));

        let tags = TagSet::parse_query("cost%3Dcenter=42").unwrap();
        assert_eq!(tags.get("cost=center"), Some("42"));
    }

    #[test]
    fn timestamps_accept_zulu_suffix() {
        let t = parse_timestamp("2024-05-01T12:00:00Z").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-05-01T12:00:00+00:00");
        assert!(parse_timestamp("yesterday").is_err());
    }
}
