use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use pricewatch_client::HttpEngineClient;
use pricewatch_core::{
    CreateScrapeJobRequest, DispatchConfig, Dispatcher, EngineId, EngineRegistry, JobStatus,
    JobStore, RegisterEngineRequest, ScrapeJob, ScraperEngine,
};
use pricewatch_db::{Database, DatabaseConfig, PgEngineRegistry, PgJobStore};

type PgDispatcher = Dispatcher<PgEngineRegistry, PgJobStore, HttpEngineClient>;

#[derive(Parser)]
#[command(name = "pricewatch", version, about = "Scrape dispatch for price tracking")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage scraper engines
    Engines {
        #[command(subcommand)]
        command: EngineCommand,
    },

    /// Track a product URL: create a scrape job and dispatch it
    Track {
        /// Product page to scrape
        #[arg(short, long)]
        url: String,

        /// Owner e-mail attached to the job
        #[arg(short, long)]
        email: Option<String>,

        /// Assignment attempts before giving up (defaults to PRICEWATCH_MAX_ATTEMPTS)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        max_attempts: Option<u32>,

        /// Base URL engines post completion reports to
        #[arg(long, env = "PRICEWATCH_PUBLIC_URL")]
        callback_url: Option<String>,

        /// Hand-off timeout in seconds
        #[arg(long, env = "PRICEWATCH_ENGINE_TIMEOUT_SECS", default_value_t = 10)]
        engine_timeout: u64,
    },

    /// Inspect and cancel scrape jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommand,
    },
}

#[derive(Subcommand)]
enum EngineCommand {
    /// List registered engines with their load
    List,

    /// Register a new engine
    Register {
        /// Unique engine name
        #[arg(short, long)]
        name: String,

        /// Engine IP address
        #[arg(long)]
        host: IpAddr,

        /// Engine HTTP port
        #[arg(short, long)]
        port: u16,

        /// Mark the engine active immediately
        #[arg(long, default_value_t = false)]
        active: bool,
    },

    /// Mark an engine healthy
    Activate { id: i64 },

    /// Take an engine out of rotation
    Deactivate { id: i64 },
}

#[derive(Subcommand)]
enum JobCommand {
    /// List recent jobs, newest first
    List {
        /// Filter by status (pending, assigned, running, succeeded, failed, cancelled)
        #[arg(short, long)]
        status: Option<JobStatus>,

        /// Number of results to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show one job as JSON
    Show { id: Uuid },

    /// Cancel a job, aborting it on its engine if it was handed off
    Cancel { id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pricewatch=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db = connect_db().await?;

    match cli.command {
        Commands::Engines { command } => cmd_engines(command, &db.engine_repo()).await?,
        Commands::Track {
            url,
            email,
            max_attempts,
            callback_url,
            engine_timeout,
        } => {
            let dispatcher =
                build_dispatcher(&db, callback_url.as_deref(), Duration::from_secs(engine_timeout))?;
            let mut request = CreateScrapeJobRequest::new(url);
            if let Some(email) = email {
                request = request.with_email(email);
            }
            if let Some(max) = max_attempts {
                request = request.with_max_attempts(max);
            }
            cmd_track(&dispatcher, request).await?;
        }
        Commands::Jobs { command } => match command {
            JobCommand::List { status, limit } => cmd_list_jobs(&db, status, limit).await?,
            JobCommand::Show { id } => {
                let job = db
                    .job_repo()
                    .get_job(id)
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?
                    .with_context(|| format!("Job not found: {id}"))?;
                println!("{}", serde_json::to_string_pretty(&job)?);
            }
            JobCommand::Cancel { id } => {
                let dispatcher = build_dispatcher(&db, None, Duration::from_secs(10))?;
                let job = dispatcher.cancel(id).await.map_err(|e| anyhow::anyhow!(e))?;
                println!("Cancelled job {} (was on engine {:?})", job.id, job.engine_id.map(|e| e.0));
            }
        },
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(db)
}

fn build_dispatcher(
    db: &Database,
    callback_url: Option<&str>,
    timeout: Duration,
) -> Result<PgDispatcher> {
    let mut executor = HttpEngineClient::with_timeout(timeout).context("Failed to create HTTP client")?;
    if let Some(url) = callback_url {
        executor = executor.with_callback_base(url)?;
    }
    let config = DispatchConfig::from_env()?;
    Ok(Dispatcher::new(
        db.engine_repo(),
        db.job_repo(),
        executor,
        config,
    ))
}

async fn cmd_engines(command: EngineCommand, registry: &PgEngineRegistry) -> Result<()> {
    match command {
        EngineCommand::List => {
            let engines = registry.list().await.map_err(|e| anyhow::anyhow!(e))?;
            if engines.is_empty() {
                println!("No engines registered");
                return Ok(());
            }
            for engine in &engines {
                print_engine(engine);
            }
            println!("\nTotal: {} engines", engines.len());
        }
        EngineCommand::Register {
            name,
            host,
            port,
            active,
        } => {
            let engine = registry
                .register(RegisterEngineRequest::new(name, host, port).active(active))
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            tracing::info!(engine_id = %engine.id, "Engine registered");
            print_engine(&engine);
        }
        EngineCommand::Activate { id } => {
            let engine = registry
                .mark_active(EngineId(id))
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            print_engine(&engine);
        }
        EngineCommand::Deactivate { id } => {
            let engine = registry
                .mark_inactive(EngineId(id))
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            print_engine(&engine);
        }
    }
    Ok(())
}

fn print_engine(engine: &ScraperEngine) {
    println!(
        "  [{}] {} {} at {} (tasks: {})",
        engine.id,
        if engine.active { "ACTIVE  " } else { "inactive" },
        engine.name,
        engine.address(),
        engine.task_count,
    );
}

async fn cmd_track(dispatcher: &PgDispatcher, request: CreateScrapeJobRequest) -> Result<()> {
    tracing::info!(url = %request.url, "Dispatching");

    let assignment = dispatcher
        .track_product(request)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    match &assignment.engine {
        Some(engine) if assignment.is_assigned() => {
            tracing::info!(engine = %engine.name, attempts = assignment.job.attempts, "Job handed off");
        }
        _ => {
            tracing::warn!(
                status = %assignment.job.status,
                reason = ?assignment.job.failure_reason,
                "Job was not dispatched"
            );
        }
    }

    println!("{}", serde_json::to_string_pretty(&assignment.job)?);
    Ok(())
}

async fn cmd_list_jobs(db: &Database, status: Option<JobStatus>, limit: usize) -> Result<()> {
    let jobs = db
        .job_repo()
        .list_jobs(status, limit)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    if jobs.is_empty() {
        println!("No jobs found");
        return Ok(());
    }

    for job in &jobs {
        print_job(job);
    }
    println!("\nTotal: {} jobs", jobs.len());
    Ok(())
}

fn print_job(job: &ScrapeJob) {
    let engine = job
        .engine_id
        .map(|id| format!("engine {id}"))
        .unwrap_or_else(|| "unassigned".to_string());
    let reason = job
        .failure_reason
        .map(|r| format!(" ({r})"))
        .unwrap_or_default();
    println!(
        "  {} {} [{}{}] {} attempts {}/{}: {}",
        job.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        job.id,
        job.status,
        reason,
        engine,
        job.attempts,
        job.max_attempts,
        job.url,
    );
}
