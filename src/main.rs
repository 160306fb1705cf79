use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod aggregate;
mod config;
mod db;
mod error;
mod models;
mod report;
mod risk;
mod satisfaction;
mod scheduler;
mod schema;
mod semester;
mod service;
mod store;

use crate::db::{ImportKind, PgStore};
use crate::models::{Envelope, SemesterKey};
use crate::scheduler::TaskScheduler;
use crate::service::{AnalyticsService, RecomputeOutcome};
use crate::store::RecordFilter;

#[derive(Parser)]
#[command(name = "volunteer-dropout-analytics")]
#[command(about = "Volunteer participation and dropout analytics", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "VOLUNTEER_ANALYTICS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the analytics schema and tables
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import records from a CSV file
    Import {
        #[arg(long, value_enum)]
        kind: ImportKind,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Recompute participation history per volunteer and semester
    Recompute {
        #[command(flatten)]
        scope: Scope,
    },
    /// Build the dropout analytics report
    Report {
        #[command(flatten)]
        scope: Scope,
        #[arg(long, value_enum, default_value_t = ReportFormat::Json)]
        format: ReportFormat,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
        /// Report on stored history rows without recomputing
        #[arg(long)]
        stored: bool,
    },
    /// Show satisfaction for one semester, refreshed when its surveys changed
    Satisfaction {
        #[arg(long)]
        year: i32,
        #[arg(long)]
        semester: u8,
        /// Recompute and store even if the stored row is current
        #[arg(long)]
        recompute: bool,
    },
    /// Recompute participation after a delay; Enter runs it now, Ctrl-C cancels
    ScheduleRecompute {
        #[command(flatten)]
        scope: Scope,
        #[arg(long, default_value_t = 60)]
        delay_secs: i64,
    },
}

#[derive(clap::Args)]
struct Scope {
    #[arg(long)]
    email: Option<String>,
    /// Only events that started within this many days
    #[arg(long)]
    since_days: Option<i64>,
    /// Reference date for inactivity (defaults to today, UTC)
    #[arg(long)]
    as_of: Option<NaiveDate>,
}

impl Scope {
    fn filter(&self) -> RecordFilter {
        RecordFilter {
            volunteer_email: self.email.clone(),
            since: self.since_days.map(cutoff_date),
        }
    }

    fn as_of(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| Utc::now().date_naive())
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Json,
    Markdown,
}

fn cutoff_date(since_days: i64) -> NaiveDate {
    Utc::now().date_naive() - Duration::days(since_days.max(1))
}

fn print_outcome(outcome: &RecomputeOutcome) {
    println!(
        "Recomputed {} volunteer-semester rows.",
        outcome.histories.len()
    );
    for warning in &outcome.warnings {
        println!("- warning [{}] {}: {}", warning.kind, warning.subject, warning.message);
    }
}

fn print_envelope<T: serde::Serialize>(envelope: &Envelope<T>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(envelope)?);
    if !envelope.success {
        anyhow::bail!(
            "{}",
            envelope.error.as_deref().unwrap_or("analytics request failed")
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "volunteer_dropout_analytics={},sqlx=warn",
            config.logging.level.to_lowercase()
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let database_url = config
        .database
        .url
        .clone()
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    info!("connected to Postgres");

    let store = PgStore::new(pool.clone());
    let result = run(cli.command, store, &config).await;
    pool.close().await;
    result
}

async fn run(command: Commands, store: PgStore, config: &config::AppConfig) -> anyhow::Result<()> {
    match command {
        Commands::InitDb => {
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&store).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { kind, csv } => {
            let imported = db::import_csv(&store, kind, &csv).await?;
            println!("Imported {imported} rows from {}.", csv.display());
        }
        Commands::Recompute { scope } => {
            let service = AnalyticsService::new(store, config)?;
            let outcome = service
                .recompute_participation(&scope.filter(), scope.as_of())
                .await?;
            print_outcome(&outcome);
        }
        Commands::Report {
            scope,
            format,
            out,
            stored,
        } => {
            let service = AnalyticsService::new(store, config)?;
            let envelope = if stored {
                service.get_stored_dropout_analytics(&scope.filter()).await
            } else {
                service
                    .get_dropout_analytics(&scope.filter(), scope.as_of())
                    .await
            };

            let rendered = match (format, &envelope.data) {
                (ReportFormat::Markdown, Some(data)) => {
                    report::render_markdown(data, scope.email.as_deref(), scope.as_of())
                }
                _ => serde_json::to_string_pretty(&envelope)?,
            };

            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Report written to {}.", path.display());
                }
                None => println!("{rendered}"),
            }

            if !envelope.success {
                anyhow::bail!(
                    "{}",
                    envelope.error.as_deref().unwrap_or("dropout analytics failed")
                );
            }
        }
        Commands::Satisfaction {
            year,
            semester,
            recompute,
        } => {
            let service = AnalyticsService::new(store, config)?;
            let key = SemesterKey::new(year, semester);
            let envelope = if recompute {
                match service.recompute_satisfaction(key).await {
                    Ok(summary) => Envelope::ok(summary, Vec::new()),
                    Err(err) => Envelope::failed(&err),
                }
            } else {
                service.get_semester_satisfaction(key).await
            };
            print_envelope(&envelope)?;
        }
        Commands::ScheduleRecompute { scope, delay_secs } => {
            let service = Arc::new(AnalyticsService::new(store, config)?);
            let scheduler = TaskScheduler::new();
            let (done, mut finished) = oneshot::channel();

            let task_service = Arc::clone(&service);
            let filter = scope.filter();
            let as_of = scope.as_of;
            let id = scheduler
                .schedule(
                    "participation-recompute",
                    Utc::now() + Duration::seconds(delay_secs.max(0)),
                    async move {
                        let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
                        let result = task_service.recompute_participation(&filter, as_of).await;
                        let _ = done.send(result);
                    },
                )
                .await;
            for (task_id, name, run_at) in scheduler.pending().await {
                info!("pending task {name} ({task_id}) at {run_at}");
            }
            println!(
                "Recompute {id} scheduled in {delay_secs}s; press Enter to run now, Ctrl-C to cancel."
            );

            let mut stdin = BufReader::new(tokio::io::stdin()).lines();
            let mut stdin_open = true;
            loop {
                tokio::select! {
                    result = &mut finished => {
                        let outcome = result.context("scheduled recompute was dropped")??;
                        print_outcome(&outcome);
                        break;
                    }
                    line = stdin.next_line(), if stdin_open => match line {
                        Ok(Some(_)) => {
                            if scheduler.run_now(id).await {
                                println!("Running recompute now.");
                            }
                        }
                        _ => stdin_open = false,
                    },
                    _ = tokio::signal::ctrl_c() => {
                        if scheduler.cancel(id).await {
                            println!("Scheduled recompute cancelled.");
                        } else {
                            println!("Recompute already started; exiting without waiting.");
                        }
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
