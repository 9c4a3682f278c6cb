//! Search execution engine.
//!
//! Fans a request out to every enabled source concurrently, tolerates
//! partial failure, then converts, deduplicates, orders and caps the merged
//! result. Each source call is isolated behind its own timeout: one slow or
//! broken source costs its own results and nothing else.

use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::background::BackgroundDiscovery;
use crate::config::EngineConfig;
use crate::dedupe::Deduplicator;
use crate::error::SourceError;
use crate::model::{CanonicalEvent, SearchProfile, SearchResult, SearchStatus};
use crate::registry::SourceRegistry;
use crate::session::SessionChannels;

pub struct SearchOrchestrator {
    registry: Arc<SourceRegistry>,
    config: EngineConfig,
    dedupe: Deduplicator,
    sessions: Arc<SessionChannels>,
    background: Arc<BackgroundDiscovery>,
}

impl SearchOrchestrator {
    pub fn new(
        registry: Arc<SourceRegistry>,
        config: EngineConfig,
        sessions: Arc<SessionChannels>,
    ) -> Self {
        let background = Arc::new(BackgroundDiscovery::new(Arc::clone(&sessions), &config));
        let dedupe = Deduplicator::from_config(&config);
        Self {
            registry,
            config,
            dedupe,
            sessions,
            background,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionChannels> {
        &self.sessions
    }

    pub fn background(&self) -> &Arc<BackgroundDiscovery> {
        &self.background
    }

    /// The synchronous search path.
    ///
    /// The only error is an invalid profile; every source-side problem
    /// degrades to fewer results. Zero enabled sources is a first-class
    /// `Unavailable` outcome, not an error.
    pub async fn search(&self, profile: &SearchProfile) -> Result<SearchResult, SourceError> {
        profile.validate()?;
        let started = Instant::now();

        let sources = self.registry.enabled();
        if sources.is_empty() {
            return Ok(SearchResult::unavailable(
                "no event sources are configured; set source API keys to enable discovery",
            ));
        }

        // One future per source, each isolated behind its own timeout.
        let per_source = Duration::from_millis(self.config.source_timeout_ms);
        let futures: Vec<_> = sources
            .iter()
            .map(|source| {
                let source = Arc::clone(source);
                let profile = profile.clone();
                async move {
                    let call_started = Instant::now();
                    match timeout(per_source, source.search(&profile)).await {
                        Ok(records) => (source, Some(records), call_started.elapsed()),
                        Err(_) => (source, None, call_started.elapsed()),
                    }
                }
            })
            .collect();

        let outcomes = join_all(futures).await;

        // join_all preserves input order, so candidates concatenate in
        // source-priority order and the deduplicator's first-seen rule picks
        // the highest-priority source as primary.
        let mut timed_out: Vec<&str> = Vec::new();
        let mut candidates: Vec<CanonicalEvent> = Vec::new();
        for (source, records, elapsed) in outcomes {
            match records {
                None => {
                    warn!(
                        source = source.name(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "source timed out, treating as empty"
                    );
                    timed_out.push(source.name());
                }
                Some(records) => {
                    debug!(
                        source = source.name(),
                        count = records.len(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "source responded"
                    );
                    for record in &records {
                        match source.convert(record) {
                            Ok(event) => candidates.push(event),
                            Err(e) => debug!(
                                source = source.name(),
                                error = %e,
                                "skipping malformed record"
                            ),
                        }
                    }
                }
            }
        }

        let mut events = self.dedupe.merge(candidates);
        events.sort_by_key(|e| e.start_time);
        events.truncate(self.config.max_results);

        let mut contributing_sources: Vec<String> = Vec::new();
        for event in &events {
            for entry in &event.provenance {
                if !contributing_sources.contains(&entry.source_name) {
                    contributing_sources.push(entry.source_name.clone());
                }
            }
        }

        let (status, message) = if !timed_out.is_empty() {
            (
                SearchStatus::Partial,
                Some(format!("partial results: {} did not respond in time", timed_out.join(", "))),
            )
        } else if events.is_empty() {
            (SearchStatus::Ok, Some("no matching events found".to_string()))
        } else {
            (SearchStatus::Ok, None)
        };

        Ok(SearchResult {
            events,
            contributing_sources,
            status,
            message,
            duration_ms: Some(started.elapsed().as_millis() as u64),
        })
    }

    /// Synchronous search plus background discovery for the session.
    ///
    /// Kicks off every enabled deep source as a detached task before
    /// returning; the response never waits on them. Late results arrive via
    /// the session's push channel.
    pub async fn search_with_session(
        &self,
        profile: &SearchProfile,
        session_id: &str,
    ) -> Result<SearchResult, SourceError> {
        let result = self.search(profile).await?;

        for source in self.registry.enabled_deep() {
            self.background.start(source, profile.clone(), session_id);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PushEvent, SourceRecord};
    use crate::{DeepSource, EventSource, JobPoll};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    /// Canned source: optional startup delay, fixed record batch.
    struct StaticSource {
        name: &'static str,
        priority: u32,
        delay: Duration,
        records: Vec<SourceRecord>,
    }

    impl StaticSource {
        fn with_events(name: &'static str, priority: u32, events: &[(&str, &str)]) -> Self {
            Self {
                name,
                priority,
                delay: Duration::ZERO,
                records: events
                    .iter()
                    .map(|(title, start)| {
                        SourceRecord(json!({
                            "title": title,
                            "starts_at": start,
                            "venue": format!("{title} venue"),
                            "city": "Springfield",
                        }))
                    })
                    .collect(),
            }
        }

        fn slow(name: &'static str, delay: Duration) -> Self {
            Self {
                name,
                priority: 99,
                delay,
                records: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl EventSource for StaticSource {
        fn name(&self) -> &'static str {
            self.name
        }
        fn description(&self) -> &'static str {
            "static test source"
        }
        fn priority(&self) -> u32 {
            self.priority
        }
        fn is_enabled(&self) -> bool {
            true
        }
        async fn search(&self, _profile: &SearchProfile) -> Vec<SourceRecord> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.records.clone()
        }
        fn convert(&self, record: &SourceRecord) -> Result<CanonicalEvent, SourceError> {
            let title = record
                .get("title")
                .and_then(|v| v.as_str())
                .ok_or_else(|| SourceError::MalformedRecord("missing title".into()))?;
            let start = record
                .get("starts_at")
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| SourceError::MalformedRecord("missing start time".into()))?;
            let mut event = CanonicalEvent::new(title, start, self.name);
            if let Some(venue) = record.get("venue").and_then(|v| v.as_str()) {
                event = event.with_venue(venue);
            }
            if let Some(city) = record.get("city").and_then(|v| v.as_str()) {
                event = event.with_city(city);
            }
            Ok(event)
        }
    }

    /// Deep source that never finishes inside a test's window.
    struct SlowDeep;

    #[async_trait]
    impl EventSource for SlowDeep {
        fn name(&self) -> &'static str {
            "slow-deep"
        }
        fn description(&self) -> &'static str {
            "slow deep test source"
        }
        fn priority(&self) -> u32 {
            90
        }
        fn is_enabled(&self) -> bool {
            true
        }
        async fn search(&self, _profile: &SearchProfile) -> Vec<SourceRecord> {
            Vec::new()
        }
        fn convert(&self, _record: &SourceRecord) -> Result<CanonicalEvent, SourceError> {
            Err(SourceError::MalformedRecord("unused".into()))
        }
    }

    #[async_trait]
    impl DeepSource for SlowDeep {
        async fn create_job(&self, _profile: &SearchProfile) -> Result<String, SourceError> {
            // deliberately slower than the assertion window below
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok("job-slow".to_string())
        }
        async fn poll_job(&self, _job_id: &str) -> Result<JobPoll, SourceError> {
            Ok(JobPoll::Pending)
        }
    }

    fn orchestrator(registry: SourceRegistry, config: EngineConfig) -> SearchOrchestrator {
        SearchOrchestrator::new(
            Arc::new(registry),
            config,
            Arc::new(SessionChannels::new()),
        )
    }

    fn starts(hour: u32) -> String {
        format!("2026-09-04T{hour:02}:00:00Z")
    }

    #[tokio::test]
    async fn zero_enabled_sources_is_unavailable_not_an_error() {
        let orchestrator = orchestrator(SourceRegistry::new(), EngineConfig::default());
        let result = orchestrator.search(&SearchProfile::default()).await.unwrap();

        assert!(result.is_unavailable());
        assert!(result.events.is_empty());
        assert!(result.message.is_some());
    }

    #[tokio::test]
    async fn timed_out_source_does_not_block_or_drop_the_rest() {
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(StaticSource::with_events(
            "alpha",
            10,
            &[
                ("Jazz Night", &starts(20)),
                ("Open Mic", &starts(18)),
                ("Book Club", &starts(10)),
                ("Food Rally", &starts(12)),
                ("Late Show", &starts(23)),
            ],
        )));
        registry.register(Arc::new(StaticSource::with_events(
            "beta",
            20,
            &[
                ("Gallery Walk", &starts(9)),
                ("Tech Talk", &starts(11)),
                ("Run Club", &starts(7)),
                ("Trivia", &starts(19)),
                ("Karaoke", &starts(21)),
            ],
        )));
        registry.register(Arc::new(StaticSource::slow(
            "molasses",
            Duration::from_millis(500),
        )));

        let config = EngineConfig {
            source_timeout_ms: 50,
            ..EngineConfig::default()
        };
        let searcher = orchestrator(registry, config);
        let search_started = Instant::now();
        let result = searcher.search(&SearchProfile::default()).await.unwrap();

        assert!(search_started.elapsed() < Duration::from_millis(400));
        assert_eq!(result.events.len(), 10);
        assert_eq!(result.status, SearchStatus::Partial);
        assert!(result.contributing_sources.contains(&"alpha".to_string()));
        assert!(result.contributing_sources.contains(&"beta".to_string()));
        assert!(!result.contributing_sources.contains(&"molasses".to_string()));
    }

    #[tokio::test]
    async fn results_are_time_ordered_and_capped() {
        let events: Vec<(String, String)> = (0..20)
            .map(|i| (format!("Event {i}"), format!("2026-09-0{}T{:02}:00:00Z", 1 + i % 4, 23 - i % 24)))
            .collect();
        let pairs: Vec<(&str, &str)> = events
            .iter()
            .map(|(t, s)| (t.as_str(), s.as_str()))
            .collect();

        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(StaticSource::with_events("alpha", 10, &pairs)));

        let searcher = orchestrator(registry, EngineConfig::default());
        let result = searcher.search(&SearchProfile::default()).await.unwrap();

        assert_eq!(result.events.len(), 15);
        for pair in result.events.windows(2) {
            assert!(pair[0].start_time <= pair[1].start_time);
        }
    }

    #[tokio::test]
    async fn malformed_record_drops_alone() {
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(StaticSource {
            name: "mixed",
            priority: 10,
            delay: Duration::ZERO,
            records: vec![
                SourceRecord(json!({"title": "Good One", "starts_at": starts(18)})),
                SourceRecord(json!({"title": "No Start Time"})),
                SourceRecord(json!({"title": "Good Two", "starts_at": starts(20)})),
            ],
        }));

        let searcher = orchestrator(registry, EngineConfig::default());
        let result = searcher.search(&SearchProfile::default()).await.unwrap();

        assert_eq!(result.events.len(), 2);
        assert_eq!(result.status, SearchStatus::Ok);
    }

    #[tokio::test]
    async fn duplicates_across_sources_merge_with_priority_primary() {
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(StaticSource::with_events(
            "second",
            20,
            &[("AI Meetup", &starts(19))],
        )));
        registry.register(Arc::new(StaticSource::with_events(
            "first",
            10,
            &[("AI Meetup", &starts(19))],
        )));

        let searcher = orchestrator(registry, EngineConfig::default());
        let result = searcher.search(&SearchProfile::default()).await.unwrap();

        assert_eq!(result.events.len(), 1);
        // lower priority value queried first, wins as primary
        assert_eq!(result.events[0].source_name, "first");
        assert_eq!(result.events[0].provenance.len(), 2);
        assert_eq!(result.contributing_sources, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn invalid_window_is_a_typed_error() {
        let searcher = orchestrator(SourceRegistry::new(), EngineConfig::default());
        let profile = SearchProfile::new(["jazz"]).with_window(
            DateTime::parse_from_rfc3339("2026-09-05T00:00:00Z").unwrap().with_timezone(&Utc),
            DateTime::parse_from_rfc3339("2026-09-01T00:00:00Z").unwrap().with_timezone(&Utc),
        );
        let err = searcher.search(&profile).await.unwrap_err();
        assert_eq!(err.code_str(), "invalid_input");
    }

    #[tokio::test]
    async fn background_discovery_never_delays_the_synchronous_path() {
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(StaticSource::with_events(
            "alpha",
            10,
            &[("Jazz Night", &starts(20))],
        )));
        registry.register_deep(Arc::new(SlowDeep));

        let sessions = Arc::new(SessionChannels::new());
        let searcher = SearchOrchestrator::new(
            Arc::new(registry),
            EngineConfig::default(),
            Arc::clone(&sessions),
        );
        let mut rx = sessions.register("s1");

        let started = Instant::now();
        let result = searcher
            .search_with_session(&SearchProfile::default(), "s1")
            .await
            .unwrap();

        // returns well before SlowDeep's 500ms job creation completes
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(result.events.len(), 1);

        // nothing pushed yet either
        let probe = crate::session::next_or_keepalive(&mut rx, Duration::from_millis(10)).await;
        assert!(matches!(probe, Some(PushEvent::Keepalive)));
    }
}
