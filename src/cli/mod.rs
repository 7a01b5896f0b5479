//! Command-line interface for salient.
//!
//! Provides the long-running entry points (HTTP server, polling worker)
//! plus operational commands: manual meeting import, reprocessing,
//! phrase-analysis triggers, and dead-job recovery.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::adapters::{CompletionApi, CrmApi, CrmClient, CrmDeal, EnrichmentApi, RecorderClient};
use crate::analysis::PhraseAnalyzer;
use crate::config::{self, Config};
use crate::core::{Orchestrator, Worker};
use crate::domain::JobType;
use crate::server::{serve, AppState};
use crate::storage::{Database, EventStore, JobQueue};

/// salient - sales-call evaluation and phrase-analytics pipeline
#[derive(Parser, Debug)]
#[command(name = "salient")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server (webhook intake + admin/geo routes)
    Serve {
        /// Address to bind to (overrides config)
        #[arg(short, long)]
        address: Option<String>,
    },

    /// Start a polling worker
    Worker,

    /// Claim and process up to N eligible jobs, then exit
    RunOnce {
        /// Maximum jobs to process
        #[arg(short, long, default_value = "1")]
        max_jobs: usize,
    },

    /// Import a meeting by its recorder URL and enqueue processing
    Import {
        /// Meeting URL (url or share_url)
        url: String,
    },

    /// Enqueue a reprocess for an existing call
    Reprocess {
        /// Call ID (UUID)
        call_id: String,
    },

    /// Phrase-analysis operations
    Geo {
        #[command(subcommand)]
        command: GeoCommands,
    },

    /// Queue maintenance
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum GeoCommands {
    /// Enqueue a phrase-extraction pass over CRM-matched calls
    Trigger {
        #[arg(long)]
        backfill: bool,
    },

    /// Enqueue the weekly cumulative analysis
    Weekly,

    /// Run phrase extraction over qualified calls, in-process
    Qualified,

    /// List recent analysis runs
    Runs {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum JobCommands {
    /// List dead-lettered jobs
    ListDead,

    /// Re-enqueue every dead job with a fresh retry budget
    RequeueDead,
}

/// CRM stand-in used when no API key is configured; geo extraction jobs
/// fail with a config error instead of a confusing upstream 401.
struct UnconfiguredCrm;

#[async_trait]
impl CrmClient for UnconfiguredCrm {
    async fn fetch_pipeline_deals(&self, _p: &str, _s: &str) -> Result<Vec<CrmDeal>> {
        anyhow::bail!("CRM_API_KEY not configured")
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = config::config()?;

        match self.command {
            Commands::Serve { address } => {
                let db = Database::open(&config.db_path)?;
                let state = AppState::new(db, config);
                let bind = address.as_deref().unwrap_or(&config.bind_addr);
                serve(state, bind).await
            }
            Commands::Worker => run_worker(config).await,
            Commands::RunOnce { max_jobs } => {
                let worker = build_worker(config)?;
                let processed = worker.run_once(max_jobs).await?;
                println!("Processed {processed} job(s).");
                Ok(())
            }
            Commands::Import { url } => import_meeting(config, &url).await,
            Commands::Reprocess { call_id } => reprocess(config, &call_id),
            Commands::Geo { command } => execute_geo(config, command).await,
            Commands::Jobs { command } => execute_jobs(config, command),
            Commands::Config => show_config(config),
        }
    }
}

/// Wire the worker with its collaborators from configuration.
fn build_worker(config: &Config) -> Result<Worker> {
    let db = Database::open(&config.db_path)?;

    let completion_key = config
        .completion_api_key
        .clone()
        .context("COMPLETION_API_KEY not configured")?;
    let completion = Arc::new(CompletionApi::new(
        config.completion_base_url.clone(),
        completion_key,
        config.completion_model.clone(),
    ));

    let enrichment = Arc::new(EnrichmentApi::new(
        config.enrichment_base_url.clone(),
        config.enrichment_api_key.clone(),
    ));

    let crm: Arc<dyn CrmClient> = match &config.crm_api_key {
        Some(key) => Arc::new(CrmApi::new(config.crm_base_url.clone(), key.clone())),
        None => Arc::new(UnconfiguredCrm),
    };

    let orchestrator = Arc::new(Orchestrator::new(
        db.clone(),
        completion.clone(),
        enrichment,
        config.team.clone(),
    ));
    let analyzer = Arc::new(PhraseAnalyzer::new(
        db.clone(),
        completion,
        crm,
        config.completion_model.clone(),
    ));

    Ok(Worker::new(
        queue(config, &db),
        orchestrator,
        analyzer,
        Duration::from_secs(config.worker.poll_interval_secs),
        config.worker.max_attempts,
    ))
}

fn queue(config: &Config, db: &Database) -> JobQueue {
    JobQueue::new(
        db.clone(),
        ChronoDuration::seconds(config.worker.lease_timeout_secs as i64),
    )
}

async fn run_worker(config: &Config) -> Result<()> {
    let worker = build_worker(config)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    worker.run(shutdown_rx).await
}

async fn import_meeting(config: &Config, url: &str) -> Result<()> {
    let api_key = config
        .recorder_api_key
        .clone()
        .context("RECORDER_API_KEY not configured")?;
    let recorder = RecorderClient::new(config.recorder_base_url.clone(), api_key);

    let meeting = recorder
        .find_by_url(url)
        .await?
        .context("Meeting not found in the recorder account")?;

    let recording_id = meeting
        .get("recording_id")
        .map(|v| v.to_string())
        .unwrap_or_default();
    let title = meeting
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or("(untitled)")
        .to_string();

    let db = Database::open(&config.db_path)?;
    let events = EventStore::new(db.clone());
    let event = events.admit(
        &format!("manual_import_{recording_id}"),
        true,
        &serde_json::json!({"source": "manual_import"}),
        &meeting,
    )?;
    queue(config, &db).enqueue(
        JobType::ProcessMeeting,
        &serde_json::json!({"webhook_event_id": event.id}),
    )?;

    println!("Queued processing for \"{title}\" (event {}).", event.id);
    Ok(())
}

fn reprocess(config: &Config, call_id: &str) -> Result<()> {
    let call_id = Uuid::parse_str(call_id).context("call_id is not a valid UUID")?;

    let db = Database::open(&config.db_path)?;
    let calls = crate::storage::CallStore::new(db.clone());
    if !calls.call_exists(call_id)? {
        anyhow::bail!("Call {call_id} not found");
    }

    let job = queue(config, &db).enqueue(
        JobType::ReprocessCall,
        &serde_json::json!({"call_id": call_id}),
    )?;
    println!("Queued reprocess job {}.", job.id);
    Ok(())
}

async fn execute_geo(config: &Config, command: GeoCommands) -> Result<()> {
    let db = Database::open(&config.db_path)?;

    match command {
        GeoCommands::Trigger { backfill } => {
            let pipeline_id = config
                .crm_pipeline_id
                .clone()
                .context("crm pipeline id not configured")?;
            let stage_id = config
                .crm_stage_id
                .clone()
                .context("crm stage id not configured")?;

            let job = queue(config, &db).enqueue(
                JobType::ExtractPhrases,
                &serde_json::json!({
                    "crm_pipeline_id": pipeline_id,
                    "crm_stage_id": stage_id,
                    "backfill": backfill,
                }),
            )?;
            println!("Queued extraction job {}.", job.id);
            Ok(())
        }
        GeoCommands::Weekly => {
            let job = queue(config, &db)
                .enqueue(JobType::RunWeeklyAnalysis, &serde_json::json!({}))?;
            println!("Queued weekly analysis job {}.", job.id);
            Ok(())
        }
        GeoCommands::Qualified => {
            let completion_key = config
                .completion_api_key
                .clone()
                .context("COMPLETION_API_KEY not configured")?;
            let completion = Arc::new(CompletionApi::new(
                config.completion_base_url.clone(),
                completion_key,
                config.completion_model.clone(),
            ));
            let analyzer = PhraseAnalyzer::new(
                db,
                completion,
                Arc::new(UnconfiguredCrm),
                config.completion_model.clone(),
            );
            let (run_id, processed) = analyzer.run_qualified_extraction().await?;
            println!("Run {run_id}: {processed} call(s) processed.");
            Ok(())
        }
        GeoCommands::Runs { limit } => {
            let analysis = crate::storage::AnalysisStore::new(db);
            for run in analysis.list_runs(limit)? {
                println!(
                    "{}  {:<17} {:<9} calls={:<4} {}",
                    run.started_at.format("%Y-%m-%d %H:%M"),
                    run.run_type.as_str(),
                    run.status.as_str(),
                    run.calls_processed,
                    run.error.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
    }
}

fn execute_jobs(config: &Config, command: JobCommands) -> Result<()> {
    let db = Database::open(&config.db_path)?;
    let queue = queue(config, &db);

    match command {
        JobCommands::ListDead => {
            let dead = queue.list_dead()?;
            if dead.is_empty() {
                println!("No dead jobs.");
                return Ok(());
            }
            for job in dead {
                println!(
                    "{}  {:<20} attempts={} {}",
                    job.id,
                    job.job_type.as_str(),
                    job.attempts,
                    job.updated_at.format("%Y-%m-%d %H:%M"),
                );
            }
            Ok(())
        }
        JobCommands::RequeueDead => {
            let count = queue.requeue_dead()?;
            println!("Re-enqueued {count} job(s).");
            Ok(())
        }
    }
}

fn show_config(config: &Config) -> Result<()> {
    println!("database:        {}", config.db_path.display());
    println!("bind address:    {}", config.bind_addr);
    println!("company:         {}", config.team.company());
    println!(
        "config file:     {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );
    println!("poll interval:   {}s", config.worker.poll_interval_secs);
    println!("max attempts:    {}", config.worker.max_attempts);
    println!("lease timeout:   {}s", config.worker.lease_timeout_secs);
    let set = |v: &Option<String>| if v.is_some() { "set" } else { "NOT SET" };
    println!("webhook secret:  {}", set(&config.webhook_secret));
    println!("pipeline key:    {}", set(&config.pipeline_api_key));
    println!("completion key:  {}", set(&config.completion_api_key));
    println!("recorder key:    {}", set(&config.recorder_api_key));
    println!("crm key:         {}", set(&config.crm_api_key));
    println!("enrichment key:  {}", set(&config.enrichment_api_key));
    Ok(())
}
