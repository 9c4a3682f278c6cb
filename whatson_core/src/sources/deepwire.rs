//! Deepwire verified event discovery.
//!
//! Deepwire crawls and cross-checks event listings on demand; a discovery
//! run is a remote job that can take minutes, so this source only ever runs
//! through the background manager. The synchronous `search` is a no-op by
//! design.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::{format_utc, USER_AGENT};
use crate::auth::AuthDetails;
use crate::error::SourceError;
use crate::model::{CanonicalEvent, EventCategory, SearchProfile, SourceRecord};
use crate::{DeepSource, EventSource, JobPoll};

const DEFAULT_API_BASE: &str = "https://api.deepwire.dev";

pub struct DeepwireSource {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl DeepwireSource {
    pub fn new(auth: AuthDetails) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SourceError::Internal(e.to_string()))?;
        let api_key = auth.get("api_key").cloned();
        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_API_BASE.to_string(),
        })
    }

    /// Point the source at a different endpoint (self-hosted or test).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn resolved_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("DEEPWIRE_API_KEY").ok())
    }

    fn require_key(&self) -> Result<String, SourceError> {
        self.resolved_key()
            .ok_or_else(|| SourceError::Authentication("missing DEEPWIRE_API_KEY".into()))
    }
}

#[async_trait]
impl EventSource for DeepwireSource {
    fn name(&self) -> &'static str {
        "deepwire"
    }

    fn description(&self) -> &'static str {
        "Deepwire verified discovery: job-based deep search across the open web."
    }

    fn priority(&self) -> u32 {
        90
    }

    fn is_enabled(&self) -> bool {
        self.resolved_key().is_some()
    }

    async fn search(&self, _profile: &SearchProfile) -> Vec<SourceRecord> {
        // Job-based source; the synchronous window is too short for it.
        debug!(source = self.name(), "skipping synchronous search for job-based source");
        Vec::new()
    }

    fn convert(&self, record: &SourceRecord) -> Result<CanonicalEvent, SourceError> {
        let title = record
            .get("title")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::MalformedRecord("event without title".into()))?;
        let start_raw = record
            .get("starts_at")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::MalformedRecord("event without start time".into()))?;
        let start = DateTime::parse_from_rfc3339(start_raw)
            .map_err(|e| SourceError::MalformedRecord(format!("bad start time {start_raw}: {e}")))?
            .with_timezone(&Utc);

        let mut event = CanonicalEvent::new(title, start, self.name());

        if let Some(end_raw) = record.get("ends_at").and_then(Value::as_str) {
            if let Ok(end) = DateTime::parse_from_rfc3339(end_raw) {
                event = event.with_end_time(end.with_timezone(&Utc));
            }
        }
        if let Some(url) = record.get("url").and_then(Value::as_str) {
            event = event.with_source_url(url);
        }
        if let Some(venue) = record.get("venue").and_then(Value::as_str) {
            event = event.with_venue(venue);
        }
        if let Some(address) = record.get("address").and_then(Value::as_str) {
            event = event.with_address(address);
        }
        if let Some(city) = record.get("city").and_then(Value::as_str) {
            event = event.with_city(city);
        }
        if record.get("free").and_then(Value::as_bool) == Some(true) {
            event = event.free();
        } else {
            let min = record.get("price_min").and_then(Value::as_f64);
            let max = record.get("price_max").and_then(Value::as_f64);
            if min.is_some() || max.is_some() {
                event = event.with_price(min, max);
            }
        }
        if let Some(category) = record.get("category").and_then(Value::as_str) {
            event = event.with_category(EventCategory::from_label(category));
        }
        if let Some(description) = record.get("description").and_then(Value::as_str) {
            event = event.with_description(description);
        }
        if let Some(image) = record.get("image").and_then(Value::as_str) {
            event = event.with_image_url(image);
        }
        if let Some(confidence) = record.get("confidence").and_then(Value::as_f64) {
            event = event.with_confidence(confidence as f32);
        }

        Ok(event)
    }
}

#[async_trait]
impl DeepSource for DeepwireSource {
    async fn create_job(&self, profile: &SearchProfile) -> Result<String, SourceError> {
        let key = self.require_key()?;

        let mut body = json!({
            "query": profile.keyword_query(),
            "free_only": profile.free_only,
        });
        if let Some(city) = &profile.city {
            body["city"] = json!(city);
        }
        if let Some(after) = profile.starts_after {
            body["window_start"] = json!(format_utc(after));
        }
        if let Some(before) = profile.starts_before {
            body["window_end"] = json!(format_utc(before));
        }

        let response: Value = self
            .client
            .post(format!("{}/v1/discovery/jobs", self.base_url))
            .header("x-api-key", key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .get("job_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SourceError::Internal("job creation response without job_id".into()))
    }

    async fn poll_job(&self, job_id: &str) -> Result<JobPoll, SourceError> {
        let key = self.require_key()?;

        let response = self
            .client
            .get(format!("{}/v1/discovery/jobs/{job_id}", self.base_url))
            .header("x-api-key", key)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::JobNotFound(job_id.to_string()));
        }
        let body: Value = response.error_for_status()?.json().await?;

        match body.get("status").and_then(Value::as_str) {
            Some("queued") | Some("running") => Ok(JobPoll::Pending),
            Some("failed") => Ok(JobPoll::Failed(
                body.get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown failure")
                    .to_string(),
            )),
            Some("complete") => {
                let records = body
                    .get("events")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                Ok(JobPoll::Complete(
                    records.into_iter().map(SourceRecord).collect(),
                ))
            }
            other => Err(SourceError::Internal(format!(
                "unexpected job status {other:?}"
            ))),
        }
    }
}
