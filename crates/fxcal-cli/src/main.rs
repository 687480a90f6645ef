use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fxcal_core::FeedRole;
use fxcal_sync::{SyncConfig, SyncPipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fxcal")]
#[command(about = "Merge a primary and a secondary fixture feed into one calendar")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch both feeds once and write the merged calendar.
    Sync,
    /// Show how each fixture of one feed is filtered and tokenised.
    Inspect {
        /// Feed URL or local path.
        feed: String,
        #[arg(long, value_enum, default_value_t = RoleArg::Secondary)]
        role: RoleArg,
    },
    /// Run the sync on FXCAL_SYNC_CRON until interrupted.
    Schedule,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Primary,
    Secondary,
}

impl From<RoleArg> for FeedRole {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::Primary => FeedRole::Primary,
            RoleArg::Secondary => FeedRole::Secondary,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = fxcal_sync::run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} fixtures={} primary={} secondary={} duplicates={} output={}",
                summary.run_id,
                summary.output_fixtures,
                summary.primary.merge.accepted,
                summary.secondary.merge.accepted,
                summary.secondary.merge.duplicates,
                summary.output_path
            );
            if let Some(report) = summary.report_path {
                println!("report: {report}");
            }
        }
        Commands::Inspect { feed, role } => {
            let pipeline = SyncPipeline::new(SyncConfig::from_env())?;
            let verdicts = pipeline.inspect(&feed, role.into()).await?;
            for verdict in &verdicts {
                let date = verdict
                    .date
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "----------".to_string());
                let shape = if verdict.structured { "pair" } else { "text" };
                let outcome = verdict
                    .rejection
                    .map(|r| format!("filtered: {r}"))
                    .unwrap_or_else(|| "kept".to_string());
                println!(
                    "{date}  {shape}  [{}]  {}  -> {outcome}",
                    verdict.team_tokens.join(","),
                    verdict.summary
                );
            }
            println!("{} fixtures", verdicts.len());
        }
        Commands::Schedule => {
            let mut config = SyncConfig::from_env();
            config.scheduler_enabled = true;
            let cron = config.sync_cron.clone();
            let pipeline = SyncPipeline::new(config)?;
            let mut sched = pipeline
                .maybe_build_scheduler()
                .await?
                .context("scheduler was not built")?;
            sched.start().await.context("starting scheduler")?;
            info!(%cron, "scheduler running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}
