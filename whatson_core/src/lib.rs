// src/lib.rs
pub mod auth;
pub mod background;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod session;
pub mod sources;

use async_trait::async_trait;
use std::sync::Arc;

pub use crate::auth::AuthDetails;
pub use crate::background::{BackgroundDiscovery, TaskStatus};
pub use crate::config::EngineConfig;
pub use crate::dedupe::Deduplicator;
pub use crate::error::SourceError;
pub use crate::model::{
    CanonicalEvent, EventCategory, ProvenanceEntry, PushEvent, SearchProfile, SearchResult,
    SearchStatus, SourceRecord,
};
pub use crate::orchestrator::SearchOrchestrator;
pub use crate::registry::{SourceInfo, SourceRegistry};
pub use crate::session::{next_or_keepalive, SessionChannels};

/// Contract every external event source implements.
///
/// `search` must never fail past its own boundary: network errors, rate
/// limits, auth failures and malformed responses are logged inside the
/// adapter and surface only as an empty batch. `convert` interprets exactly
/// one of this adapter's own records and may fail per record; callers drop
/// the failed record and keep the rest of the batch.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Unique source name, used for provenance and credential lookup.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Query ordering and dedup tie-breaking; lower runs first. Never used
    /// to skip a source.
    fn priority(&self) -> u32 {
        50
    }

    /// Evaluated at call time, so credential changes take effect without a
    /// restart. Typically "has credentials".
    fn is_enabled(&self) -> bool;

    /// Fetch source-native records for the profile. Infallible by contract.
    async fn search(&self, profile: &SearchProfile) -> Vec<SourceRecord>;

    /// Map one source-native record to the canonical model.
    fn convert(&self, record: &SourceRecord) -> Result<CanonicalEvent, SourceError>;
}

/// Poll outcome of an asynchronous discovery job.
#[derive(Debug)]
pub enum JobPoll {
    Pending,
    Complete(Vec<SourceRecord>),
    Failed(String),
}

/// A source whose discovery runs as an asynchronous job (deep search taking
/// up to minutes). These are excluded from the synchronous fan-out; the
/// background manager drives them via create/poll.
#[async_trait]
pub trait DeepSource: EventSource {
    /// Create the discovery job on the remote source; returns its job id.
    async fn create_job(&self, profile: &SearchProfile) -> Result<String, SourceError>;

    /// Check job status; `Complete` carries the full record batch.
    async fn poll_job(&self, job_id: &str) -> Result<JobPoll, SourceError>;
}

/// Build the process-wide registry with every shipped source registered.
///
/// Sources without credentials still register; `enabled()` filters them out
/// at query time, and they come alive as soon as their API key appears in
/// the environment.
pub fn build_default_registry() -> SourceRegistry {
    let mut registry = SourceRegistry::new();

    if let Ok(source) = sources::ticketmaster::TicketmasterSource::new(AuthDetails::new()) {
        registry.register(Arc::new(source));
    }

    if let Ok(source) = sources::eventbrite::EventbriteSource::new(AuthDetails::new()) {
        registry.register(Arc::new(source));
    }

    if let Ok(source) = sources::seatgeek::SeatGeekSource::new(AuthDetails::new()) {
        registry.register(Arc::new(source));
    }

    if let Ok(source) = sources::deepwire::DeepwireSource::new(AuthDetails::new()) {
        registry.register_deep(Arc::new(source));
    }

    registry
}
