//! SeatGeek Platform API.
//!
//! Auth is a `client_id` query parameter. Timestamps come back as naive UTC
//! (`datetime_utc`), prices as aggregate stats that may be null.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::Client;
use serde_json::Value;
use tracing::warn;

use super::USER_AGENT;
use crate::auth::AuthDetails;
use crate::error::SourceError;
use crate::model::{CanonicalEvent, EventCategory, SearchProfile, SourceRecord};
use crate::EventSource;

const EVENTS_URL: &str = "https://api.seatgeek.com/2/events";
const NAIVE_UTC_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub struct SeatGeekSource {
    client: Client,
    client_id: Option<String>,
}

impl SeatGeekSource {
    pub fn new(auth: AuthDetails) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SourceError::Internal(e.to_string()))?;
        let client_id = auth.get("client_id").cloned();
        Ok(Self { client, client_id })
    }

    fn resolved_id(&self) -> Option<String> {
        self.client_id
            .clone()
            .or_else(|| std::env::var("SEATGEEK_CLIENT_ID").ok())
    }

    async fn fetch(
        &self,
        client_id: &str,
        profile: &SearchProfile,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        let mut query: Vec<(&str, String)> = vec![
            ("client_id", client_id.to_string()),
            ("per_page", "50".to_string()),
            ("sort", "datetime_utc.asc".to_string()),
        ];

        let keywords = profile.keyword_query();
        if !keywords.is_empty() {
            query.push(("q", keywords));
        }
        if let Some(city) = &profile.city {
            query.push(("venue.city", city.clone()));
        }
        if let Some(after) = profile.starts_after {
            query.push(("datetime_utc.gte", after.format(NAIVE_UTC_FORMAT).to_string()));
        }
        if let Some(before) = profile.starts_before {
            query.push(("datetime_utc.lte", before.format(NAIVE_UTC_FORMAT).to_string()));
        }

        let body: Value = self
            .client
            .get(EVENTS_URL)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let events = body
            .get("events")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(events.into_iter().map(SourceRecord).collect())
    }
}

#[async_trait]
impl EventSource for SeatGeekSource {
    fn name(&self) -> &'static str {
        "seatgeek"
    }

    fn description(&self) -> &'static str {
        "SeatGeek: live events with aggregate ticket pricing."
    }

    fn priority(&self) -> u32 {
        30
    }

    fn is_enabled(&self) -> bool {
        self.resolved_id().is_some()
    }

    async fn search(&self, profile: &SearchProfile) -> Vec<SourceRecord> {
        let client_id = match self.resolved_id() {
            Some(id) => id,
            None => return Vec::new(),
        };
        match self.fetch(&client_id, profile).await {
            Ok(records) => records,
            Err(e) => {
                warn!(source = self.name(), error = %e, "search failed");
                Vec::new()
            }
        }
    }

    fn convert(&self, record: &SourceRecord) -> Result<CanonicalEvent, SourceError> {
        let title = record
            .get("title")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::MalformedRecord("event without title".into()))?;
        let start_raw = record
            .get("datetime_utc")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::MalformedRecord("event without start time".into()))?;
        let start = NaiveDateTime::parse_from_str(start_raw, NAIVE_UTC_FORMAT)
            .map_err(|e| SourceError::MalformedRecord(format!("bad start time {start_raw}: {e}")))?
            .and_utc();

        let mut event = CanonicalEvent::new(title, start, self.name());

        if let Some(url) = record.get("url").and_then(Value::as_str) {
            event = event.with_source_url(url);
        }
        if let Some(venue) = record.get("venue") {
            if let Some(name) = venue.get("name").and_then(Value::as_str) {
                event = event.with_venue(name);
            }
            if let Some(address) = venue.get("address").and_then(Value::as_str) {
                event = event.with_address(address);
            }
            if let Some(city) = venue.get("city").and_then(Value::as_str) {
                event = event.with_city(city);
            }
        }
        let lowest = record.0.pointer("/stats/lowest_price").and_then(Value::as_f64);
        let highest = record.0.pointer("/stats/highest_price").and_then(Value::as_f64);
        if lowest.is_some() || highest.is_some() {
            event = event.with_price(lowest, highest);
        }
        if let Some(taxonomy) = record
            .0
            .pointer("/taxonomies/0/name")
            .and_then(Value::as_str)
        {
            event = event.with_category(EventCategory::from_label(taxonomy));
        }
        if let Some(image) = record
            .0
            .pointer("/performers/0/image")
            .and_then(Value::as_str)
        {
            event = event.with_image_url(image);
        }

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> SeatGeekSource {
        SeatGeekSource::new(AuthDetails::new().with("client_id", "test")).unwrap()
    }

    #[test]
    fn convert_event_with_stats() {
        let record = SourceRecord(json!({
            "title": "Springfield Isotopes vs. Shelbyville",
            "datetime_utc": "2026-09-04T19:05:00",
            "url": "https://sg.example/e/7",
            "venue": {
                "name": "Duff Stadium",
                "address": "100 Stadium Way",
                "city": "Springfield"
            },
            "stats": { "lowest_price": 14.0, "highest_price": 88.0 },
            "taxonomies": [ { "name": "sports" } ],
            "performers": [ { "image": "https://sg.example/p/7.jpg" } ]
        }));

        let event = source().convert(&record).unwrap();
        assert_eq!(event.title, "Springfield Isotopes vs. Shelbyville");
        assert_eq!(event.start_time.timestamp(), 1788548700);
        assert_eq!(event.price_min, Some(14.0));
        assert_eq!(event.category, EventCategory::Sports);
        assert_eq!(event.venue_name.as_deref(), Some("Duff Stadium"));
    }

    #[test]
    fn convert_tolerates_null_prices() {
        let record = SourceRecord(json!({
            "title": "Free Preview Night",
            "datetime_utc": "2026-09-04T19:00:00",
            "stats": { "lowest_price": null, "highest_price": null }
        }));

        let event = source().convert(&record).unwrap();
        assert_eq!(event.price_min, None);
        assert!(!event.is_free);
    }
}
