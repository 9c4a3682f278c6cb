//! Cross-source event deduplication.
//!
//! Events from different sources describing the same real-world event rarely
//! agree byte-for-byte, so matching runs on a fingerprint of three normalized
//! components: title prefix, start-time bucket, venue+city. The fingerprint
//! is a pure function of those fields; no clock, no randomness. Because a
//! fixed bucket grid has boundaries, `merge` also probes the two adjacent
//! buckets and accepts a match there when the start times are within one
//! bucket width, so two listings straddling a boundary still collapse.
//!
//! Known approximation: instances of a recurring series that share title,
//! venue and time bucket collapse into one event. Accepted by design.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::model::CanonicalEvent;

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

/// Generic venue words that carry no identity ("Tech Hub" vs "Tech Hub
/// Downtown" should match).
const VENUE_NOISE_WORDS: &[&str] = &[
    "hall", "center", "centre", "room", "theatre", "theater", "arena", "stadium", "club",
    "lounge", "house", "downtown", "the",
];

/// Lowercase, strip punctuation, collapse whitespace.
fn normalize_text(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let cleaned = NON_ALNUM.replace_all(&lower, " ");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn normalize_title(raw: &str, prefix_len: usize) -> String {
    normalize_text(raw).chars().take(prefix_len).collect()
}

pub fn normalize_venue(venue: &str, city: &str) -> String {
    let venue = normalize_text(venue)
        .split_whitespace()
        .filter(|word| !VENUE_NOISE_WORDS.contains(word))
        .collect::<Vec<_>>()
        .join(" ");
    format!("{}|{}", venue, normalize_text(city))
}

/// Start time floored to a fixed-width bucket. Tolerates small listing
/// discrepancies across sources while separating same-day events at clearly
/// different times.
pub fn time_bucket(start: chrono::DateTime<chrono::Utc>, bucket_minutes: i64) -> i64 {
    start.timestamp().div_euclid(bucket_minutes * 60)
}

/// Merges near-duplicate canonical events into one record with combined
/// provenance.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    bucket_minutes: i64,
    title_prefix_len: usize,
}

impl Deduplicator {
    pub fn new(bucket_minutes: i64, title_prefix_len: usize) -> Self {
        Self {
            bucket_minutes,
            title_prefix_len,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.bucket_minutes, config.title_prefix_len)
    }

    /// Deterministic fingerprint of (title, start time, venue, city).
    pub fn key_for(&self, event: &CanonicalEvent) -> String {
        self.key_in_bucket(event, time_bucket(event.start_time, self.bucket_minutes))
    }

    fn key_in_bucket(&self, event: &CanonicalEvent, bucket: i64) -> String {
        let title = normalize_title(&event.title, self.title_prefix_len);
        let venue = normalize_venue(
            event.venue_name.as_deref().unwrap_or(""),
            event.city.as_deref().unwrap_or(""),
        );

        let mut hasher = Sha256::new();
        hasher.update(title.as_bytes());
        hasher.update([0x1f]);
        hasher.update(bucket.to_le_bytes());
        hasher.update([0x1f]);
        hasher.update(venue.as_bytes());
        let digest = hasher.finalize();

        digest[..8].iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Key this event groups under, given what is already merged. The event's
    /// own bucket wins; failing that, an adjacent bucket's key is accepted
    /// when the resident's start time is within one bucket width, so listings
    /// straddling a grid boundary (7:00pm and 7:45pm on a 90-minute grid)
    /// still land together.
    fn match_key(&self, event: &CanonicalEvent, by_key: &HashMap<String, CanonicalEvent>) -> String {
        let own = self.key_for(event);
        if by_key.contains_key(&own) {
            return own;
        }

        let bucket = time_bucket(event.start_time, self.bucket_minutes);
        let width = chrono::Duration::minutes(self.bucket_minutes);
        for adjacent in [bucket - 1, bucket + 1] {
            let key = self.key_in_bucket(event, adjacent);
            if let Some(resident) = by_key.get(&key) {
                if (event.start_time - resident.start_time).abs() <= width {
                    return key;
                }
            }
        }

        own
    }

    /// Collapse events sharing a dedupe key. Input order decides the primary
    /// (the orchestrator concatenates batches in source-priority order, so
    /// first-seen == highest-priority source, then arrival order).
    ///
    /// Idempotent: events that already carry a key keep it, so a second pass
    /// over merged output changes nothing.
    pub fn merge(&self, events: Vec<CanonicalEvent>) -> Vec<CanonicalEvent> {
        let mut order: Vec<String> = Vec::new();
        let mut by_key: HashMap<String, CanonicalEvent> = HashMap::new();

        for mut event in events {
            let key = if event.dedupe_key.is_empty() {
                self.match_key(&event, &by_key)
            } else {
                event.dedupe_key.clone()
            };
            event.dedupe_key = key.clone();
            event.id = format!("ev_{key}");

            match by_key.get_mut(&key) {
                Some(primary) => backfill(primary, event),
                None => {
                    order.push(key.clone());
                    by_key.insert(key, event);
                }
            }
        }

        order.into_iter().filter_map(|k| by_key.remove(&k)).collect()
    }
}

/// Fold a duplicate into its primary: append provenance (once per source)
/// and fill only what the primary is missing. A longer description replaces
/// a shorter one; everything else is backfill-only.
fn backfill(primary: &mut CanonicalEvent, other: CanonicalEvent) {
    for entry in other.provenance {
        let already = primary
            .provenance
            .iter()
            .any(|p| p.source_name == entry.source_name);
        if !already {
            primary.provenance.push(entry);
        }
    }

    let primary_desc_len = primary.description.as_deref().map_or(0, str::len);
    if other.description.as_deref().map_or(0, str::len) > primary_desc_len {
        primary.description = other.description;
    }

    if primary.image_url.is_none() {
        primary.image_url = other.image_url;
    }

    if primary.price_min.is_none() && other.price_min.is_some() {
        primary.price_min = other.price_min;
        primary.price_max = other.price_max;
        primary.is_free = other.is_free;
    }

    if primary.end_time.is_none() {
        primary.end_time = other.end_time;
    }
    if primary.venue_name.is_none() {
        primary.venue_name = other.venue_name;
    }
    if primary.address.is_none() {
        primary.address = other.address;
    }
    if primary.city.is_none() {
        primary.city = other.city;
    }
}
