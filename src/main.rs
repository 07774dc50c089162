use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use threatpatterns::config::ThreatPatternsConfig;
use threatpatterns::pipeline::RunReport;
use threatpatterns::storage::incidents::IncidentRecord;
use threatpatterns::storage::{PatternStore, SqliteStore};

#[derive(Parser)]
#[command(
    name = "threatpatterns",
    about = "Recurring pattern detection for threat-intelligence incidents",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one detection pass and persist the patterns found
    Detect {
        /// Analysis window in days
        #[arg(long)]
        days: Option<u32>,

        /// Number of most re-detected patterns to list in the report
        #[arg(long, default_value = "10")]
        top: usize,
    },

    /// Import incidents from a JSON array (upsert by id)
    Import {
        /// JSON file exported by a feed connector
        #[arg(long)]
        file: PathBuf,
    },

    /// List persisted patterns, most re-detected first
    Patterns {
        /// Maximum number of patterns to show
        #[arg(long, default_value = "20")]
        limit: usize,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ThreatPatternsConfig::resolve(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }

    match cli.command {
        Commands::Detect { days, top } => {
            let window_days = days.unwrap_or(config.detection.window_days);
            tracing::info!(window_days, "Starting detection run");

            let result = tokio::task::spawn_blocking(move || {
                threatpatterns::detect(&config, window_days, top)
            })
            .await?;

            // Detection never fails the process; problems are logged and reported.
            match result {
                Ok(report) => print_report(&report),
                Err(e) => {
                    tracing::error!(error = %format!("{e:#}"), "Detection run aborted");
                    println!("\nDetection run aborted: {e:#}\n");
                }
            }
        }
        Commands::Import { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let records: Vec<IncidentRecord> = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", file.display()))?;
            let undated = records
                .iter()
                .filter(|r| r.discovered_at.is_none() && r.published_at.is_none())
                .count();

            let db_path = config.storage.db_path.clone();
            let imported = tokio::task::spawn_blocking(move || -> Result<usize> {
                let store = SqliteStore::open(&db_path)?;
                Ok(store.import_incidents(&records)?)
            })
            .await??;

            println!("Imported {} incidents from {}.", imported, file.display());
            if undated > 0 {
                println!("{undated} of them have no discovered/published date and will be ignored by detection.");
            }
        }
        Commands::Patterns { limit, json } => {
            let db_path = config.storage.db_path.clone();
            let patterns = tokio::task::spawn_blocking(move || -> Result<_> {
                let store = SqliteStore::open(&db_path)?;
                Ok(store.top_patterns(limit)?)
            })
            .await??;

            if json {
                println!("{}", serde_json::to_string_pretty(&patterns)?);
            } else if patterns.is_empty() {
                println!("No patterns found.");
            } else {
                println!(
                    "{:<6} | {:<17} | {:<48} | {:<5} | Last seen",
                    "Count", "Type", "Key", "Conf"
                );
                println!("{:-<6}-|-{:-<17}-|-{:-<48}-|-{:-<5}-|-{:-<20}", "", "", "", "", "");
                for p in &patterns {
                    println!(
                        "{:<6} | {:<17} | {:<48} | {:<5.2} | {}",
                        p.detection_count,
                        p.pattern_type,
                        p.pattern_key,
                        p.confidence,
                        p.last_detected.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!("\n=== Pattern Detection Report ===");
    println!(
        "Window:     {} days (since {})",
        report.window_days,
        report.since.format("%Y-%m-%d %H:%M UTC")
    );
    println!("Incidents:  {}", report.incidents);

    println!("\n{:<18} | {:<10} | Status", "Detector", "Candidates");
    println!("{:-<18}-|-{:-<10}-|-{:-<30}", "", "", "");
    for d in &report.detectors {
        let status = match &d.error {
            Some(e) => format!("FAILED: {e}"),
            None => "ok".to_string(),
        };
        println!("{:<18} | {:<10} | {}", d.name, d.candidates, status);
    }

    println!("\nCandidates:        {}", report.candidates);
    if report.duplicate_keys > 0 {
        println!("Duplicate keys:    {} (coalesced)", report.duplicate_keys);
    }
    if report.coarse_keys > 0 {
        println!("Coarse keys:       {} (approximate dedup)", report.coarse_keys);
    }
    println!("New patterns:      {}", report.outcome.inserted);
    println!("Updated patterns:  {}", report.outcome.updated);
    if report.outcome.failures() > 0 {
        println!(
            "Write failures:    {} inserts in {} batches, {} updates",
            report.outcome.failed_inserts,
            report.outcome.failed_insert_batches,
            report.outcome.failed_updates
        );
    }

    if !report.top_patterns.is_empty() {
        println!("\n=== Top Patterns by Detection Count ===");
        for p in &report.top_patterns {
            println!(
                "{:>4}x  {:<17} {}",
                p.detection_count,
                p.pattern_type,
                p.description().unwrap_or(&p.pattern_key)
            );
        }
    }
    println!("================================\n");
}
