//! Ticketmaster Discovery API v2.
//!
//! Auth is a plain `apikey` query parameter. Events live under
//! `_embedded.events`; venue and classification details are embedded in
//! each event.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use tracing::warn;

use super::{format_utc, USER_AGENT};
use crate::auth::AuthDetails;
use crate::error::SourceError;
use crate::model::{CanonicalEvent, EventCategory, SearchProfile, SourceRecord};
use crate::EventSource;

const EVENTS_URL: &str = "https://app.ticketmaster.com/discovery/v2/events.json";
const PAGE_SIZE: &str = "50";

pub struct TicketmasterSource {
    client: Client,
    api_key: Option<String>,
}

impl TicketmasterSource {
    pub fn new(auth: AuthDetails) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SourceError::Internal(e.to_string()))?;
        let api_key = auth.get("api_key").cloned();
        Ok(Self { client, api_key })
    }

    fn resolved_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("TICKETMASTER_API_KEY").ok())
    }

    async fn fetch(
        &self,
        key: &str,
        profile: &SearchProfile,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        let mut query: Vec<(&str, String)> = vec![
            ("apikey", key.to_string()),
            ("size", PAGE_SIZE.to_string()),
            ("sort", "date,asc".to_string()),
        ];

        let keywords = profile.keyword_query();
        if !keywords.is_empty() {
            query.push(("keyword", keywords));
        }
        if let Some(city) = &profile.city {
            query.push(("city", city.clone()));
        }
        if let Some(after) = profile.starts_after {
            query.push(("startDateTime", format_utc(after)));
        }
        if let Some(before) = profile.starts_before {
            query.push(("endDateTime", format_utc(before)));
        }
        if let Some(category) = profile.categories.first() {
            query.push(("classificationName", category.label().to_string()));
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
            .pointer("/_embedded/events")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(events.into_iter().map(SourceRecord).collect())
    }
}

#[async_trait]
impl EventSource for TicketmasterSource {
    fn name(&self) -> &'static str {
        "ticketmaster"
    }

    fn description(&self) -> &'static str {
        "Ticketmaster Discovery API: ticketed concerts, sports and shows."
    }

    fn priority(&self) -> u32 {
        10
    }

    fn is_enabled(&self) -> bool {
        self.resolved_key().is_some()
    }

    async fn search(&self, profile: &SearchProfile) -> Vec<SourceRecord> {
        let key = match self.resolved_key() {
            Some(key) => key,
            None => return Vec::new(),
        };
        match self.fetch(&key, profile).await {
            Ok(records) => records,
            Err(e) => {
                warn!(source = self.name(), error = %e, "search failed");
                Vec::new()
            }
        }
    }

    fn convert(&self, record: &SourceRecord) -> Result<CanonicalEvent, SourceError> {
        let title = record
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::MalformedRecord("event without name".into()))?;
        let start_raw = record
            .0
            .pointer("/dates/start/dateTime")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::MalformedRecord("event without start time".into()))?;
        let start = DateTime::parse_from_rfc3339(start_raw)
            .map_err(|e| SourceError::MalformedRecord(format!("bad start time {start_raw}: {e}")))?
            .with_timezone(&Utc);

        let mut event = CanonicalEvent::new(title, start, self.name());

        if let Some(url) = record.get("url").and_then(Value::as_str) {
            event = event.with_source_url(url);
        }
        if let Some(venue) = record.0.pointer("/_embedded/venues/0") {
            if let Some(name) = venue.get("name").and_then(Value::as_str) {
                event = event.with_venue(name);
            }
            if let Some(line) = venue.pointer("/address/line1").and_then(Value::as_str) {
                event = event.with_address(line);
            }
            if let Some(city) = venue.pointer("/city/name").and_then(Value::as_str) {
                event = event.with_city(city);
            }
        }
        if let Some(range) = record.0.pointer("/priceRanges/0") {
            event = event.with_price(
                range.get("min").and_then(Value::as_f64),
                range.get("max").and_then(Value::as_f64),
            );
        }
        if let Some(segment) = record
            .0
            .pointer("/classifications/0/segment/name")
            .and_then(Value::as_str)
        {
            event = event.with_category(EventCategory::from_label(segment));
        }
        if let Some(info) = record
            .get("info")
            .or_else(|| record.get("description"))
            .and_then(Value::as_str)
        {
            event = event.with_description(info);
        }
        if let Some(image) = record.0.pointer("/images/0/url").and_then(Value::as_str) {
            event = event.with_image_url(image);
        }

        Ok(event)
    }
}
