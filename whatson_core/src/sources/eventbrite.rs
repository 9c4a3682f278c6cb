//! Eventbrite API v3.
//!
//! Bearer-token auth. `expand=venue,category` inlines the venue and category
//! objects so a single search call carries everything the converter needs.

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

const SEARCH_URL: &str = "https://www.eventbriteapi.com/v3/events/search/";

pub struct EventbriteSource {
    client: Client,
    token: Option<String>,
}

impl EventbriteSource {
    pub fn new(auth: AuthDetails) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SourceError::Internal(e.to_string()))?;
        let token = auth.get("token").cloned();
        Ok(Self { client, token })
    }

    fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var("EVENTBRITE_TOKEN").ok())
    }

    async fn fetch(
        &self,
        token: &str,
        profile: &SearchProfile,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        let mut query: Vec<(&str, String)> = vec![("expand", "venue,category".to_string())];

        let keywords = profile.keyword_query();
        if !keywords.is_empty() {
            query.push(("q", keywords));
        }
        if let Some(city) = &profile.city {
            query.push(("location.address", city.clone()));
        }
        if let Some(after) = profile.starts_after {
            query.push(("start_date.range_start", format_utc(after)));
        }
        if let Some(before) = profile.starts_before {
            query.push(("start_date.range_end", format_utc(before)));
        }
        if profile.free_only {
            query.push(("price", "free".to_string()));
        }

        let body: Value = self
            .client
            .get(SEARCH_URL)
            .bearer_auth(token)
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
impl EventSource for EventbriteSource {
    fn name(&self) -> &'static str {
        "eventbrite"
    }

    fn description(&self) -> &'static str {
        "Eventbrite: community events, meetups, workshops and classes."
    }

    fn priority(&self) -> u32 {
        20
    }

    fn is_enabled(&self) -> bool {
        self.resolved_token().is_some()
    }

    async fn search(&self, profile: &SearchProfile) -> Vec<SourceRecord> {
        let token = match self.resolved_token() {
            Some(token) => token,
            None => return Vec::new(),
        };
        match self.fetch(&token, profile).await {
            Ok(records) => records,
            Err(e) => {
                warn!(source = self.name(), error = %e, "search failed");
                Vec::new()
            }
        }
    }

    fn convert(&self, record: &SourceRecord) -> Result<CanonicalEvent, SourceError> {
        let title = record
            .0
            .pointer("/name/text")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::MalformedRecord("event without name".into()))?;
        let start_raw = record
            .0
            .pointer("/start/utc")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::MalformedRecord("event without start time".into()))?;
        let start = DateTime::parse_from_rfc3339(start_raw)
            .map_err(|e| SourceError::MalformedRecord(format!("bad start time {start_raw}: {e}")))?
            .with_timezone(&Utc);

        let mut event = CanonicalEvent::new(title, start, self.name());

        if let Some(end_raw) = record.0.pointer("/end/utc").and_then(Value::as_str) {
            if let Ok(end) = DateTime::parse_from_rfc3339(end_raw) {
                event = event.with_end_time(end.with_timezone(&Utc));
            }
        }
        if let Some(url) = record.get("url").and_then(Value::as_str) {
            event = event.with_source_url(url);
        }
        if record.get("is_free").and_then(Value::as_bool) == Some(true) {
            event = event.free();
        }
        if let Some(description) = record.0.pointer("/description/text").and_then(Value::as_str) {
            event = event.with_description(description);
        }
        if let Some(image) = record.0.pointer("/logo/url").and_then(Value::as_str) {
            event = event.with_image_url(image);
        }
        if let Some(venue) = record.get("venue") {
            if let Some(name) = venue.get("name").and_then(Value::as_str) {
                event = event.with_venue(name);
            }
            if let Some(address) = venue
                .pointer("/address/localized_address_display")
                .and_then(Value::as_str)
            {
                event = event.with_address(address);
            }
            if let Some(city) = venue.pointer("/address/city").and_then(Value::as_str) {
                event = event.with_city(city);
            }
        }
        if let Some(category) = record.0.pointer("/category/name").and_then(Value::as_str) {
            event = event.with_category(EventCategory::from_label(category));
        }

        Ok(event)
    }
}
