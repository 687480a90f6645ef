//! One-shot sync pipeline: fetch both feeds, merge, write the calendar; optional cron scheduling.

pub mod registry;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use fxcal_core::FeedRole;
use fxcal_feeds::{
    adapter_for_location, render_calendar, AdapterContext, CalendarHeader, FeedAdapter,
    FetchedFeed, ParsedCalendar,
};
use fxcal_merge::{
    EventFilter, MergeEngine, MergeReport, PhaseStats, Rejection, SignatureBuilder,
};
use fxcal_storage::{write_atomic, ArtifactStore, FeedFetcher, FetcherConfig};
use serde::Serialize;
use tokio::fs;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use registry::{FeedRegistry, FilterSection};

pub const CRATE_NAME: &str = "fxcal-sync";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub workspace_root: PathBuf,
    pub feeds_path: PathBuf,
    pub output_path: PathBuf,
    /// Raw feed snapshots are archived only when set.
    pub artifacts_dir: Option<PathBuf>,
    pub reports_enabled: bool,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| {
            lookup(key)
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false)
        };
        Self {
            workspace_root: lookup("FXCAL_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            feeds_path: lookup("FXCAL_FEEDS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("feeds.yaml")),
            output_path: lookup("FXCAL_OUTPUT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("napoli.ics")),
            artifacts_dir: lookup("FXCAL_ARTIFACTS_DIR").map(PathBuf::from),
            reports_enabled: flag("FXCAL_REPORTS_ENABLED"),
            user_agent: lookup("FXCAL_USER_AGENT")
                .unwrap_or_else(|| format!("fxcal/{}", env!("CARGO_PKG_VERSION"))),
            http_timeout_secs: lookup("FXCAL_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            scheduler_enabled: flag("FXCAL_SCHEDULER_ENABLED"),
            sync_cron: lookup("FXCAL_SYNC_CRON").unwrap_or_else(|| "0 0 6 * * *".to_string()),
        }
    }

    /// Relative paths in the config are taken from the workspace root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedRunStats {
    pub feed_id: String,
    pub location: String,
    pub bytes: usize,
    pub events_parsed: usize,
    pub archived_as: Option<String>,
    pub merge: PhaseStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub primary: FeedRunStats,
    pub secondary: FeedRunStats,
    pub output_fixtures: usize,
    pub output_path: String,
    pub report_path: Option<String>,
}

/// How the merge would treat one fixture of a feed, looked at in isolation.
#[derive(Debug, Clone, Serialize)]
pub struct FixtureVerdict {
    pub summary: String,
    pub date: Option<NaiveDate>,
    pub structured: bool,
    pub team_tokens: Vec<String>,
    pub rejection: Option<Rejection>,
}

pub struct SyncPipeline {
    config: SyncConfig,
    http: FeedFetcher,
    artifact_store: Option<ArtifactStore>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let http = FeedFetcher::new(FetcherConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        let artifact_store = config
            .artifacts_dir
            .as_ref()
            .map(|dir| ArtifactStore::new(config.resolve(dir)));
        Ok(Self {
            config,
            http,
            artifact_store,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let ctx = AdapterContext::new();
        let span = info_span!("sync_run", run_id = %ctx.run_id);
        self.run_with_context(ctx).instrument(span).await
    }

    async fn run_with_context(&self, ctx: AdapterContext) -> Result<SyncRunSummary> {
        let started_at = ctx.fetched_at;
        let registry = self.load_registry().await?;
        let options = registry.merge_options()?;
        let mut engine = MergeEngine::new(options).context("building merge engine")?;

        let primary = adapter_for_location(
            "primary",
            FeedRole::Primary,
            &registry.primary,
            &self.config.workspace_root,
        );
        let secondary = adapter_for_location(
            "secondary",
            FeedRole::Secondary,
            &registry.secondary,
            &self.config.workspace_root,
        );

        let primary_feed = self.retrieve(primary.as_ref(), &ctx).await?;
        let secondary_feed = self.retrieve(secondary.as_ref(), &ctx).await?;
        let primary_archive = self.archive(&primary_feed).await?;
        let secondary_archive = self.archive(&secondary_feed).await?;

        let primary_cal = parse_feed(primary.as_ref(), &primary_feed)?;
        let secondary_cal = parse_feed(secondary.as_ref(), &secondary_feed)?;
        let primary_events = primary_cal.fixtures.len();
        let secondary_events = secondary_cal.fixtures.len();

        engine.ingest_primary(primary_cal.fixtures)?;
        engine.ingest_secondary(secondary_cal.fixtures)?;
        let merged = engine.finish();

        let header = merged_header(
            registry.calendar_name.clone(),
            &primary_cal.header,
            &secondary_cal.header,
        );
        let rendered = render_calendar(&header, &merged.fixtures);
        let output_path = self.config.resolve(&self.config.output_path);
        write_atomic(&output_path, rendered.as_bytes())
            .await
            .with_context(|| format!("writing calendar {}", output_path.display()))?;

        let mut summary = SyncRunSummary {
            run_id: ctx.run_id,
            started_at,
            finished_at: Utc::now(),
            primary: FeedRunStats {
                feed_id: primary_feed.feed_id.clone(),
                location: primary_feed.location.clone(),
                bytes: primary_feed.body.len(),
                events_parsed: primary_events,
                archived_as: primary_archive,
                merge: merged.report.primary,
            },
            secondary: FeedRunStats {
                feed_id: secondary_feed.feed_id.clone(),
                location: secondary_feed.location.clone(),
                bytes: secondary_feed.body.len(),
                events_parsed: secondary_events,
                archived_as: secondary_archive,
                merge: merged.report.secondary,
            },
            output_fixtures: merged.fixtures.len(),
            output_path: output_path.display().to_string(),
            report_path: None,
        };

        if self.config.reports_enabled {
            let path = self.write_report(&summary, &merged.report).await?;
            summary.report_path = Some(path.display().to_string());
        }

        info!(
            fixtures = summary.output_fixtures,
            primary_accepted = summary.primary.merge.accepted,
            secondary_accepted = summary.secondary.merge.accepted,
            duplicates = summary.secondary.merge.duplicates,
            output = %summary.output_path,
            "sync complete"
        );
        Ok(summary)
    }

    /// Parses one feed and reports, fixture by fixture, what the filter and signature make of it.
    pub async fn inspect(&self, location: &str, role: FeedRole) -> Result<Vec<FixtureVerdict>> {
        let options = match self.load_registry().await {
            Ok(registry) => registry.merge_options()?,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "no usable feed registry, inspecting with defaults");
                Default::default()
            }
        };
        let adapter = adapter_for_location(
            role.as_str(),
            role,
            location,
            &self.config.workspace_root,
        );
        let ctx = AdapterContext::new();
        let feed = self.retrieve(adapter.as_ref(), &ctx).await?;
        let calendar = parse_feed(adapter.as_ref(), &feed)?;

        let builder = SignatureBuilder::new(&options.filter.subject_team_keyword, &options.signature);
        let cup_only = role == FeedRole::Secondary && options.secondary_cup_only;
        let filter = EventFilter::new(options.filter).context("building event filter")?;

        Ok(calendar
            .fixtures
            .iter()
            .map(|fixture| {
                let signature = builder.build(fixture);
                FixtureVerdict {
                    summary: fixture.summary.clone(),
                    date: signature.date_key,
                    structured: signature.is_structured(),
                    team_tokens: signature.team_tokens.iter().cloned().collect(),
                    rejection: filter.rejection(fixture, cup_only),
                }
            })
            .collect())
    }

    pub async fn maybe_build_scheduler(&self) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let config = self.config.clone();
        let cron = self.config.sync_cron.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let config = config.clone();
            Box::pin(async move {
                let outcome = match SyncPipeline::new(config) {
                    Ok(pipeline) => pipeline.run_once().await,
                    Err(err) => Err(err),
                };
                match outcome {
                    Ok(summary) => info!(
                        run_id = %summary.run_id,
                        fixtures = summary.output_fixtures,
                        "scheduled sync finished"
                    ),
                    Err(err) => error!(error = %format!("{err:#}"), "scheduled sync failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }

    async fn load_registry(&self) -> Result<FeedRegistry> {
        FeedRegistry::load(&self.config.resolve(&self.config.feeds_path)).await
    }

    async fn retrieve(&self, adapter: &dyn FeedAdapter, ctx: &AdapterContext) -> Result<FetchedFeed> {
        let feed = adapter
            .fetch(&self.http, ctx)
            .await
            .with_context(|| format!("retrieving {} feed from {}", adapter.role(), adapter.location()))?;
        info!(
            feed = %feed.role,
            location = %feed.location,
            bytes = feed.body.len(),
            "feed retrieved"
        );
        Ok(feed)
    }

    async fn archive(&self, feed: &FetchedFeed) -> Result<Option<String>> {
        let Some(store) = &self.artifact_store else {
            return Ok(None);
        };
        let archived = store
            .archive_feed(feed.fetched_at, &feed.feed_id, &feed.body)
            .await
            .with_context(|| format!("archiving {} feed", feed.role))?;
        Ok(Some(archived.relative_path.display().to_string()))
    }

    async fn write_report(&self, summary: &SyncRunSummary, report: &MergeReport) -> Result<PathBuf> {
        let reports_dir = self
            .config
            .workspace_root
            .join("reports")
            .join(summary.run_id.to_string());
        fs::create_dir_all(&reports_dir)
            .await
            .with_context(|| format!("creating {}", reports_dir.display()))?;

        let body = serde_json::to_vec_pretty(&serde_json::json!({
            "run": summary,
            "merge": report,
        }))
        .context("serializing merge report")?;
        let path = reports_dir.join("merge_report.json");
        fs::write(&path, body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

fn parse_feed(adapter: &dyn FeedAdapter, feed: &FetchedFeed) -> Result<ParsedCalendar> {
    adapter
        .parse(feed)
        .with_context(|| format!("parsing {} feed from {}", feed.role, feed.location))
}

/// Configured name first, then the primary's, then the secondary's.
fn merged_header(
    name: Option<String>,
    primary: &CalendarHeader,
    secondary: &CalendarHeader,
) -> CalendarHeader {
    CalendarHeader {
        name: name
            .or_else(|| primary.name.clone())
            .or_else(|| secondary.name.clone()),
    }
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let config = SyncConfig::from_env();
    let pipeline = SyncPipeline::new(config)?;
    pipeline.run_once().await
}
