//! Canonical data model for event discovery.
//!
//! Every source adapter converts its native records into [`CanonicalEvent`],
//! the one representation the rest of the engine understands. Provenance
//! tracks which sources contributed to a merged event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SourceError;

/// Event category, normalized across sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Music,
    Tech,
    Arts,
    Sports,
    Food,
    Community,
    #[default]
    Other,
}

impl EventCategory {
    /// Lenient mapping from source-native category labels.
    ///
    /// Sources disagree wildly here ("Concerts", "Music", "concert"), so we
    /// match on lowercase substrings and fall back to `Other`.
    pub fn from_label(label: &str) -> Self {
        let l = label.to_lowercase();
        if l.contains("music") || l.contains("concert") {
            EventCategory::Music
        } else if l.contains("tech") || l.contains("science") || l.contains("business") {
            EventCategory::Tech
        } else if l.contains("art") || l.contains("theat") || l.contains("film") || l.contains("comedy") {
            EventCategory::Arts
        } else if l.contains("sport") {
            EventCategory::Sports
        } else if l.contains("food") || l.contains("drink") {
            EventCategory::Food
        } else if l.contains("community") || l.contains("family") || l.contains("charit") {
            EventCategory::Community
        } else {
            EventCategory::Other
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EventCategory::Music => "music",
            EventCategory::Tech => "tech",
            EventCategory::Arts => "arts",
            EventCategory::Sports => "sports",
            EventCategory::Food => "food",
            EventCategory::Community => "community",
            EventCategory::Other => "other",
        }
    }
}

/// Structured search request produced by the upstream intake layer.
///
/// Immutable per request; the engine never mutates it, only clones it into
/// adapter calls and background tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchProfile {
    /// Free-text keywords, joined for sources that take a single query string.
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Categories to search; empty means all.
    #[serde(default)]
    pub categories: Vec<EventCategory>,

    /// Start of the time window (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_after: Option<DateTime<Utc>>,

    /// End of the time window (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_before: Option<DateTime<Utc>>,

    /// Only return free events.
    #[serde(default)]
    pub free_only: bool,

    /// Location hint, typically a city name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

impl SearchProfile {
    pub fn new(keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_window(mut self, after: DateTime<Utc>, before: DateTime<Utc>) -> Self {
        self.starts_after = Some(after);
        self.starts_before = Some(before);
        self
    }

    pub fn with_category(mut self, category: EventCategory) -> Self {
        self.categories.push(category);
        self
    }

    pub fn free_only(mut self) -> Self {
        self.free_only = true;
        self
    }

    /// Keywords joined into a single query string.
    pub fn keyword_query(&self) -> String {
        self.keywords.join(" ")
    }

    /// Enforce the profile invariant: if a window is present, start <= end.
    pub fn validate(&self) -> Result<(), SourceError> {
        if let (Some(after), Some(before)) = (self.starts_after, self.starts_before) {
            if after > before {
                return Err(SourceError::InvalidInput(format!(
                    "search window start {after} is after end {before}"
                )));
            }
        }
        Ok(())
    }
}

/// An opaque source-native record.
///
/// Only the converter of the adapter that produced it may interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord(pub Value);

impl SourceRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn into_inner(self) -> Value {
        self.0
    }
}

impl From<Value> for SourceRecord {
    fn from(value: Value) -> Self {
        SourceRecord(value)
    }
}

/// One contributing source for a (possibly merged) canonical event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    pub source_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    pub fetched_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// The unified event representation all sources convert into.
///
/// `id` and `dedupe_key` are derived by the deduplicator and stable within a
/// request. `provenance` is never empty; the first entry is the primary
/// source whose fields win, later entries only backfill missing ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub id: String,

    pub title: String,

    pub start_time: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,

    #[serde(default)]
    pub is_free: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_min: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_max: Option<f64>,

    #[serde(default)]
    pub category: EventCategory,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    /// Name of the primary source.
    pub source_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    pub provenance: Vec<ProvenanceEntry>,

    pub dedupe_key: String,
}

impl CanonicalEvent {
    /// Create an event with the required fields and a single provenance
    /// entry for the originating source. `id` and `dedupe_key` are filled
    /// in later by the deduplicator.
    pub fn new(
        title: impl Into<String>,
        start_time: DateTime<Utc>,
        source_name: impl Into<String>,
    ) -> Self {
        let source_name = source_name.into();
        Self {
            id: String::new(),
            title: title.into(),
            start_time,
            end_time: None,
            venue_name: None,
            address: None,
            city: None,
            is_free: false,
            price_min: None,
            price_max: None,
            category: EventCategory::Other,
            description: None,
            image_url: None,
            source_name: source_name.clone(),
            source_url: None,
            provenance: vec![ProvenanceEntry {
                source_name,
                url: None,
                fetched_at: Utc::now(),
                confidence: None,
            }],
            dedupe_key: String::new(),
        }
    }

    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn with_venue(mut self, venue_name: impl Into<String>) -> Self {
        self.venue_name = Some(venue_name.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_price(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.is_free = min == Some(0.0) && max.unwrap_or(0.0) == 0.0;
        self.price_min = min;
        self.price_max = max;
        self
    }

    pub fn free(mut self) -> Self {
        self.is_free = true;
        self.price_min = Some(0.0);
        self.price_max = Some(0.0);
        self
    }

    pub fn with_category(mut self, category: EventCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    /// Set the canonical URL on the event and on its primary provenance
    /// entry.
    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        if let Some(entry) = self.provenance.first_mut() {
            entry.url = Some(url.clone());
        }
        self.source_url = Some(url);
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        if let Some(entry) = self.provenance.first_mut() {
            entry.confidence = Some(confidence);
        }
        self
    }
}

/// Search outcome classification.
///
/// `Unavailable` (zero enabled sources) is a first-class outcome, not an
/// error; `Partial` means at least one source timed out or dropped out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    #[default]
    Ok,
    Partial,
    Unavailable,
}

/// The synchronous response: capped, deduplicated, time-ordered events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub events: Vec<CanonicalEvent>,

    /// Sources that contributed at least one surviving event.
    pub contributing_sources: Vec<String>,

    pub status: SearchStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl SearchResult {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            events: Vec::new(),
            contributing_sources: Vec::new(),
            status: SearchStatus::Unavailable,
            message: Some(message.into()),
            duration_ms: None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.status == SearchStatus::Unavailable
    }
}

/// An event pushed to a session after the synchronous response went out.
///
/// The `type` discriminator distinguishes late background batches from the
/// keepalives the transport emits while the queue is idle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    MoreEvents {
        source: String,
        events: Vec<CanonicalEvent>,
    },
    Keepalive,
}
