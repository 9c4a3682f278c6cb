//! Background discovery for job-based sources.
//!
//! Some sources cannot answer inside the synchronous request window: their
//! discovery runs as a remote job taking up to minutes. The manager records
//! a task, spawns a detached poll loop and returns immediately; whatever the
//! job eventually produces is pushed to the owning session's channel. The
//! loop self-limits with a wall-clock deadline, an attempt budget and a
//! liveness check on the session, so no task ever runs forever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::dedupe::Deduplicator;
use crate::model::{PushEvent, SearchProfile};
use crate::session::SessionChannels;
use crate::{DeepSource, JobPoll};

/// Task lifecycle: `Pending -> Polling -> {Completed | Failed | Abandoned}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Polling,
    Completed,
    Failed,
    Abandoned,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Abandoned
        )
    }
}

#[derive(Debug, Clone)]
struct TaskRecord {
    session_id: String,
    status: TaskStatus,
    created_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
}

/// Serializable view of a background task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: Uuid,
    pub session_id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

pub struct BackgroundDiscovery {
    sessions: Arc<SessionChannels>,
    dedupe: Deduplicator,
    tasks: Mutex<HashMap<Uuid, TaskRecord>>,
    shutdown: CancellationToken,
    poll_interval: Duration,
    poll_deadline: Duration,
    max_attempts: u32,
}

impl BackgroundDiscovery {
    pub fn new(sessions: Arc<SessionChannels>, config: &EngineConfig) -> Self {
        Self {
            sessions,
            dedupe: Deduplicator::from_config(config),
            tasks: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            poll_deadline: Duration::from_millis(config.poll_deadline_ms),
            max_attempts: config.poll_max_attempts,
        }
    }

    /// Kick off discovery on a deep source for a session. Returns the task
    /// id without blocking: the caller's synchronous path never waits on the
    /// job.
    pub fn start(
        self: &Arc<Self>,
        source: Arc<dyn DeepSource>,
        profile: SearchProfile,
        session_id: &str,
    ) -> Uuid {
        self.reap_finished();

        let task_id = Uuid::new_v4();
        let now = Utc::now();
        {
            let mut tasks = self.tasks.lock().expect("task table poisoned");
            tasks.insert(
                task_id,
                TaskRecord {
                    session_id: session_id.to_string(),
                    status: TaskStatus::Pending,
                    created_at: now,
                    deadline: now
                        + chrono::Duration::milliseconds(self.poll_deadline.as_millis() as i64),
                },
            );
        }

        let this = Arc::clone(self);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            this.run_task(task_id, source, profile, session_id).await;
        });

        task_id
    }

    pub fn status(&self, task_id: Uuid) -> Option<TaskStatus> {
        let tasks = self.tasks.lock().expect("task table poisoned");
        tasks.get(&task_id).map(|t| t.status)
    }

    /// Observability snapshot of one task.
    pub fn info(&self, task_id: Uuid) -> Option<TaskInfo> {
        let tasks = self.tasks.lock().expect("task table poisoned");
        tasks.get(&task_id).map(|t| TaskInfo {
            task_id,
            session_id: t.session_id.clone(),
            status: t.status,
            created_at: t.created_at,
            deadline: t.deadline,
        })
    }

    pub fn task_count(&self) -> usize {
        let tasks = self.tasks.lock().expect("task table poisoned");
        tasks.len()
    }

    /// Drop terminal task records. Called on each `start`, keeping the table
    /// bounded without a sweeper task; records stay queryable until then.
    pub fn reap_finished(&self) {
        let mut tasks = self.tasks.lock().expect("task table poisoned");
        tasks.retain(|_, record| !record.status.is_terminal());
    }

    /// Stop all poll loops at their next wakeup (process shutdown).
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn set_status(&self, task_id: Uuid, status: TaskStatus) {
        let mut tasks = self.tasks.lock().expect("task table poisoned");
        if let Some(record) = tasks.get_mut(&task_id) {
            record.status = status;
        }
    }

    async fn run_task(
        &self,
        task_id: Uuid,
        source: Arc<dyn DeepSource>,
        profile: SearchProfile,
        session_id: String,
    ) {
        let job_id = match source.create_job(&profile).await {
            Ok(id) => id,
            Err(e) => {
                warn!(source = source.name(), error = %e, "deep discovery job creation failed");
                self.set_status(task_id, TaskStatus::Failed);
                return;
            }
        };

        debug!(source = source.name(), %task_id, job_id, "deep discovery job started");
        self.set_status(task_id, TaskStatus::Polling);

        let deadline = Instant::now() + self.poll_deadline;
        let mut attempts = 0u32;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.set_status(task_id, TaskStatus::Abandoned);
                    return;
                }
                _ = sleep(self.poll_interval) => {}
            }

            // Session gone means nobody is listening; stop paying for polls.
            if !self.sessions.is_active(&session_id) {
                debug!(%task_id, session_id, "session torn down, abandoning task");
                self.set_status(task_id, TaskStatus::Abandoned);
                return;
            }

            if Instant::now() >= deadline || attempts >= self.max_attempts {
                debug!(%task_id, attempts, "deep discovery deadline reached");
                self.set_status(task_id, TaskStatus::Abandoned);
                return;
            }
            attempts += 1;

            match source.poll_job(&job_id).await {
                Ok(JobPoll::Pending) => continue,
                Ok(JobPoll::Failed(reason)) => {
                    warn!(source = source.name(), %task_id, reason, "deep discovery job failed");
                    self.set_status(task_id, TaskStatus::Failed);
                    return;
                }
                Ok(JobPoll::Complete(records)) => {
                    let mut events = Vec::with_capacity(records.len());
                    for record in &records {
                        match source.convert(record) {
                            Ok(event) => events.push(event),
                            Err(e) => {
                                debug!(source = source.name(), error = %e, "skipping malformed record")
                            }
                        }
                    }
                    let events = self.dedupe.merge(events);

                    if !events.is_empty() {
                        self.sessions.push(
                            &session_id,
                            PushEvent::MoreEvents {
                                source: source.name().to_string(),
                                events,
                            },
                        );
                    }
                    self.set_status(task_id, TaskStatus::Completed);
                    return;
                }
                Err(e) => {
                    warn!(source = source.name(), %task_id, error = %e, "deep discovery poll failed");
                    self.set_status(task_id, TaskStatus::Failed);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CanonicalEvent, SourceRecord};
    use crate::{EventSource, SourceError};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeDeep {
        polls_until_complete: u32,
        polls: AtomicU32,
        fail: bool,
        records: Vec<SourceRecord>,
    }

    impl FakeDeep {
        fn completing_after(polls: u32, titles: &[&str]) -> Self {
            Self {
                polls_until_complete: polls,
                polls: AtomicU32::new(0),
                fail: false,
                records: titles
                    .iter()
                    .map(|t| SourceRecord(json!({ "title": t, "starts_at": "2026-09-04T19:00:00Z" })))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl EventSource for FakeDeep {
        fn name(&self) -> &'static str {
            "fake-deep"
        }
        fn description(&self) -> &'static str {
            "test deep source"
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
        fn convert(&self, record: &SourceRecord) -> Result<CanonicalEvent, SourceError> {
            let title = record
                .get("title")
                .and_then(|v| v.as_str())
                .ok_or_else(|| SourceError::MalformedRecord("missing title".into()))?;
            let start = Utc.with_ymd_and_hms(2026, 9, 4, 19, 0, 0).unwrap();
            Ok(CanonicalEvent::new(title, start, self.name()))
        }
    }

    #[async_trait]
    impl DeepSource for FakeDeep {
        async fn create_job(&self, _profile: &SearchProfile) -> Result<String, SourceError> {
            Ok("job-1".to_string())
        }

        async fn poll_job(&self, _job_id: &str) -> Result<JobPoll, SourceError> {
            let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Ok(JobPoll::Failed("remote says no".into()));
            }
            if polls >= self.polls_until_complete {
                Ok(JobPoll::Complete(self.records.clone()))
            } else {
                Ok(JobPoll::Pending)
            }
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            poll_interval_ms: 10,
            poll_deadline_ms: 2_000,
            poll_max_attempts: 100,
            ..EngineConfig::default()
        }
    }

    async fn wait_for_status(
        manager: &Arc<BackgroundDiscovery>,
        task_id: Uuid,
        expected: TaskStatus,
    ) {
        for _ in 0..100 {
            if manager.status(task_id) == Some(expected) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "task never reached {expected:?}, last status {:?}",
            manager.status(task_id)
        );
    }

    #[tokio::test]
    async fn completes_and_pushes_to_session() {
        let sessions = Arc::new(SessionChannels::new());
        let manager = Arc::new(BackgroundDiscovery::new(Arc::clone(&sessions), &fast_config()));
        let mut rx = sessions.register("s1");

        let source = Arc::new(FakeDeep::completing_after(3, &["Late Night Show", "Encore"]));
        let task_id = manager.start(source, SearchProfile::default(), "s1");

        let pushed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("push arrived")
            .expect("channel open");
        match pushed {
            PushEvent::MoreEvents { source, events } => {
                assert_eq!(source, "fake-deep");
                assert_eq!(events.len(), 2);
            }
            other => panic!("unexpected push: {other:?}"),
        }
        wait_for_status(&manager, task_id, TaskStatus::Completed).await;

        let info = manager.info(task_id).expect("task info");
        assert_eq!(info.session_id, "s1");
        assert!(info.deadline > info.created_at);
    }

    #[tokio::test]
    async fn session_teardown_abandons_within_one_interval() {
        let sessions = Arc::new(SessionChannels::new());
        let manager = Arc::new(BackgroundDiscovery::new(Arc::clone(&sessions), &fast_config()));
        let rx = sessions.register("s1");

        // never completes on its own
        let source = Arc::new(FakeDeep::completing_after(u32::MAX, &[]));
        let task_id = manager.start(source, SearchProfile::default(), "s1");

        sleep(Duration::from_millis(30)).await;
        drop(rx);
        sessions.unregister("s1");

        wait_for_status(&manager, task_id, TaskStatus::Abandoned).await;
        assert!(!sessions.push("s1", PushEvent::Keepalive));
    }

    #[tokio::test]
    async fn job_failure_is_silent_and_terminal() {
        let sessions = Arc::new(SessionChannels::new());
        let manager = Arc::new(BackgroundDiscovery::new(Arc::clone(&sessions), &fast_config()));
        let mut rx = sessions.register("s1");

        let source = Arc::new(FakeDeep {
            polls_until_complete: 1,
            polls: AtomicU32::new(0),
            fail: true,
            records: Vec::new(),
        });
        let task_id = manager.start(source, SearchProfile::default(), "s1");

        wait_for_status(&manager, task_id, TaskStatus::Failed).await;
        // no push event was ever delivered
        assert!(matches!(
            next_or_keepalive_probe(&mut rx).await,
            PushEvent::Keepalive
        ));
    }

    #[tokio::test]
    async fn attempt_budget_abandons() {
        let sessions = Arc::new(SessionChannels::new());
        let config = EngineConfig {
            poll_interval_ms: 5,
            poll_deadline_ms: 60_000,
            poll_max_attempts: 3,
            ..EngineConfig::default()
        };
        let manager = Arc::new(BackgroundDiscovery::new(Arc::clone(&sessions), &config));
        let _rx = sessions.register("s1");

        let source = Arc::new(FakeDeep::completing_after(u32::MAX, &[]));
        let task_id = manager.start(source, SearchProfile::default(), "s1");

        wait_for_status(&manager, task_id, TaskStatus::Abandoned).await;
    }

    #[tokio::test]
    async fn reap_drops_terminal_tasks() {
        let sessions = Arc::new(SessionChannels::new());
        let manager = Arc::new(BackgroundDiscovery::new(Arc::clone(&sessions), &fast_config()));
        let _rx = sessions.register("s1");

        let source = Arc::new(FakeDeep::completing_after(1, &["One"]));
        let task_id = manager.start(source, SearchProfile::default(), "s1");
        wait_for_status(&manager, task_id, TaskStatus::Completed).await;

        manager.reap_finished();
        assert_eq!(manager.task_count(), 0);
    }

    async fn next_or_keepalive_probe(
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<PushEvent>,
    ) -> PushEvent {
        crate::session::next_or_keepalive(rx, Duration::from_millis(50))
            .await
            .unwrap_or(PushEvent::Keepalive)
    }
}
