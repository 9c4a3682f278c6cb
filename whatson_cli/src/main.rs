//! `whatson`: search event sources from the terminal.

use chrono::{DateTime, Utc};
use clap::Parser;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use owo_colors::OwoColorize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use whatson_core::{
    build_default_registry, next_or_keepalive, CanonicalEvent, EngineConfig, EventCategory,
    PushEvent, SearchOrchestrator, SearchProfile, SearchStatus, SessionChannels, SourceError,
};

#[derive(Parser, Debug)]
#[command(
    name = "whatson",
    about = "Find out what's on: search ticketing and event sources in one go.",
    version
)]
struct Cli {
    /// Free-text keywords (e.g. "jazz trio")
    query: Vec<String>,

    /// City to search around
    #[arg(long)]
    city: Option<String>,

    /// Category filter (music, tech, arts, sports, food, community)
    #[arg(long)]
    category: Option<String>,

    /// Only free events
    #[arg(long)]
    free: bool,

    /// Window start, RFC 3339 (e.g. 2026-09-04T00:00:00Z)
    #[arg(long)]
    from: Option<String>,

    /// Window end, RFC 3339
    #[arg(long)]
    to: Option<String>,

    /// Keep the session open and print background discoveries as they land
    #[arg(long)]
    follow: bool,

    /// How long to wait for background discoveries (seconds)
    #[arg(long, default_value_t = 120)]
    follow_secs: u64,

    /// Print the raw result as JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_instant(raw: &str, flag: &str) -> Result<DateTime<Utc>, SourceError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SourceError::InvalidInput(format!("--{flag} {raw}: {e}")))
}

fn build_profile(cli: &Cli) -> Result<SearchProfile, SourceError> {
    let mut profile = SearchProfile::new(cli.query.clone());
    if let Some(city) = &cli.city {
        profile = profile.with_city(city.clone());
    }
    if let Some(category) = &cli.category {
        profile = profile.with_category(EventCategory::from_label(category));
    }
    if cli.free {
        profile = profile.free_only();
    }
    if let Some(raw) = &cli.from {
        profile.starts_after = Some(parse_instant(raw, "from")?);
    }
    if let Some(raw) = &cli.to {
        profile.starts_before = Some(parse_instant(raw, "to")?);
    }
    profile.validate()?;
    Ok(profile)
}

fn price_column(event: &CanonicalEvent) -> String {
    if event.is_free {
        return "free".to_string();
    }
    match (event.price_min, event.price_max) {
        (Some(min), Some(max)) if min != max => format!("{min:.0}-{max:.0}"),
        (Some(min), _) => format!("{min:.0}"),
        (None, Some(max)) => format!("up to {max:.0}"),
        (None, None) => "-".to_string(),
    }
}

fn render_events(events: &[CanonicalEvent]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(["When", "Event", "Venue", "Price", "Sources"]);

    for event in events {
        let sources: Vec<&str> = event
            .provenance
            .iter()
            .map(|p| p.source_name.as_str())
            .collect();
        table.add_row([
            event.start_time.format("%a %b %e %H:%M").to_string(),
            event.title.clone(),
            event.venue_name.clone().unwrap_or_else(|| "-".to_string()),
            price_column(event),
            sources.join(", "),
        ]);
    }

    println!("{table}");
}

const KEEPALIVE_WAIT: Duration = Duration::from_secs(15);

/// Wait for the next drain, clamped so the loop never sleeps past the
/// follow deadline. Zero means the deadline has passed.
fn drain_wait(deadline: Instant, keepalive: Duration) -> Duration {
    deadline.saturating_duration_since(Instant::now()).min(keepalive)
}

async fn follow_pushes(
    sessions: &Arc<SessionChannels>,
    session_id: &str,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<PushEvent>,
    window: Duration,
) {
    println!("{}", "waiting for background discoveries...".dimmed());
    let deadline = Instant::now() + window;

    loop {
        let wait = drain_wait(deadline, KEEPALIVE_WAIT);
        if wait.is_zero() {
            break;
        }
        match next_or_keepalive(&mut rx, wait).await {
            Some(PushEvent::MoreEvents { source, events }) => {
                println!(
                    "\n{} {} more event(s) from {}:",
                    "+".green().bold(),
                    events.len(),
                    source.bold()
                );
                render_events(&events);
            }
            Some(PushEvent::Keepalive) => continue,
            None => break,
        }
    }

    sessions.unregister(session_id);
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "whatson=debug" } else { "whatson=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), SourceError> {
    let profile = build_profile(&cli)?;

    let registry = Arc::new(build_default_registry());
    let sessions = Arc::new(SessionChannels::new());
    let orchestrator = SearchOrchestrator::new(
        registry,
        EngineConfig::default(),
        Arc::clone(&sessions),
    );

    let session_id = uuid::Uuid::new_v4().to_string();
    let (result, rx) = if cli.follow {
        let rx = sessions.register(&session_id);
        let result = orchestrator
            .search_with_session(&profile, &session_id)
            .await?;
        (result, Some(rx))
    } else {
        (orchestrator.search(&profile).await?, None)
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).map_err(SourceError::SerdeJson)?
        );
    } else {
        match result.status {
            SearchStatus::Unavailable => {
                println!(
                    "{} {}",
                    "unavailable:".yellow().bold(),
                    result.message.as_deref().unwrap_or("no sources enabled")
                );
                return Ok(());
            }
            SearchStatus::Partial => {
                if let Some(message) = &result.message {
                    println!("{} {message}", "note:".yellow());
                }
            }
            SearchStatus::Ok => {}
        }

        if result.events.is_empty() {
            println!("{}", result.message.as_deref().unwrap_or("no events found"));
        } else {
            render_events(&result.events);
            println!(
                "{} event(s) from {} in {}ms",
                result.events.len(),
                result.contributing_sources.join(", "),
                result.duration_ms.unwrap_or(0)
            );
        }
    }

    if let Some(rx) = rx {
        follow_pushes(
            &sessions,
            &session_id,
            rx,
            Duration::from_secs(cli.follow_secs),
        )
        .await;
    }

    Ok(())
}
