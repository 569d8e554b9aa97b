use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tlx_core::{DealFamily, Findings};
use tlx_sync::archive::read_run_report;
use tlx_sync::{maybe_build_scheduler, pipeline_from_env};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_SOURCE_SYSTEM: &str = "NUCLEUS";

#[derive(Debug, Parser)]
#[command(name = "tlx-cli")]
#[command(about = "Trade ledger extraction command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Extract one family for a trade date and advance its cursor.
    Extract {
        #[arg(long)]
        family: DealFamily,
        #[arg(long)]
        trade_date: NaiveDate,
        /// Fetch without committing the cursor.
        #[arg(long)]
        dry_run: bool,
    },
    /// Extract every enabled family and write a run report.
    Cycle {
        #[arg(long)]
        trade_date: Option<NaiveDate>,
    },
    /// Print headers for explicit deal keys as JSON.
    Lookup {
        #[arg(long)]
        family: DealFamily,
        #[arg(long, value_delimiter = ',', required = true)]
        keys: Vec<i64>,
    },
    /// Merge scorer findings onto a run's headers and upsert them.
    Submit {
        #[arg(long)]
        headers: PathBuf,
        #[arg(long)]
        findings: PathBuf,
    },
    Cursor {
        #[arg(long)]
        family: DealFamily,
        #[arg(long)]
        trade_date: NaiveDate,
    },
    RiskMappings {
        #[arg(long, default_value = DEFAULT_SOURCE_SYSTEM)]
        source_system: String,
    },
    /// Print the latest LAR credit base list as JSON.
    LarBaseList {
        #[arg(long, default_value = DEFAULT_SOURCE_SYSTEM)]
        source_system: String,
    },
    Migrate,
    /// Run the extraction cron job until interrupted.
    Schedule,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let pipeline = pipeline_from_env().await?;

    match cli.command {
        Commands::Extract {
            family,
            trade_date,
            dry_run,
        } => {
            let outcome = pipeline.extract_family(family, trade_date).await?;
            let committed = if dry_run {
                None
            } else {
                Some(pipeline.commit(&outcome).await?)
            };
            println!(
                "extract complete: family={} headers={} terms={} since={} cutoff={} committed={}",
                family,
                outcome.headers.len(),
                outcome.term_count(),
                outcome.since,
                outcome.cutoff,
                committed
                    .map(|watermark| watermark.run_id.to_string())
                    .unwrap_or_else(|| "no".to_string())
            );
        }
        Commands::Cycle { trade_date } => {
            let trade_date = trade_date.unwrap_or_else(|| Local::now().date_naive());
            let summary = pipeline.run_cycle(trade_date).await?;
            println!(
                "cycle complete: run_id={} families={} failed={} reports={}",
                summary.report.run_id,
                summary.report.families.len(),
                summary.report.failed_families().len(),
                summary.run_dir.display()
            );
        }
        Commands::Lookup { family, keys } => {
            let headers = pipeline.lookup(family, keys).await?;
            let json = serde_json::to_string_pretty(&headers).context("serializing headers")?;
            println!("{json}");
        }
        Commands::Submit { headers, findings } => {
            let report = read_run_report(&headers).await?;
            let text = tokio::fs::read_to_string(&findings)
                .await
                .with_context(|| format!("reading {}", findings.display()))?;
            let findings: Findings = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", findings.display()))?;
            let summary = pipeline
                .submit_findings(report.run_id, &report.committed_headers(), &findings)
                .await?;
            println!(
                "submit complete: run_id={} rows={} manifest={}",
                summary.run_id,
                summary.written,
                summary.manifest.display()
            );
        }
        Commands::Cursor { family, trade_date } => {
            match pipeline.cursor(family, trade_date).await? {
                Some(watermark) => println!(
                    "{} {}: run_id={} cutoff={} created_at={}",
                    family, trade_date, watermark.run_id, watermark.cutoff, watermark.created_at
                ),
                None => println!("{family} {trade_date}: no cursor"),
            }
        }
        Commands::RiskMappings { source_system } => {
            let mappings = pipeline
                .analytics()
                .portfolio_risk_mappings(&source_system)
                .await
                .context("reading portfolio risk mappings")?;
            for mapping in mappings {
                println!("{}\t{}", mapping.portfolio, mapping.legal_entity);
            }
        }
        Commands::LarBaseList { source_system } => {
            let entries = pipeline
                .analytics()
                .lar_base_list(&source_system)
                .await
                .context("reading lar base list")?;
            let json = serde_json::to_string_pretty(&entries).context("serializing lar base list")?;
            println!("{json}");
        }
        Commands::Migrate => {
            pipeline
                .analytics()
                .migrate()
                .await
                .context("running analytics migrations")?;
            println!("migrations applied");
        }
        Commands::Schedule => {
            let pipeline = Arc::new(pipeline);
            let mut sched = maybe_build_scheduler(Arc::clone(&pipeline))
                .await?
                .context("scheduler disabled; set TLX_SCHEDULER_ENABLED=true")?;
            sched.start().await.context("starting scheduler")?;
            info!(cron = %pipeline.config().extract_cron, "scheduler running");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for shutdown signal")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lar_base_list_defaults_to_the_ledger_source_system() {
        let cli = Cli::try_parse_from(["tlx-cli", "lar-base-list"]).expect("parse");
        match cli.command {
            Commands::LarBaseList { source_system } => assert_eq!(source_system, "NUCLEUS"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn lookup_keys_split_on_commas() {
        let cli = Cli::try_parse_from(["tlx-cli", "lookup", "--family", "PWR", "--keys", "1,2,3"])
            .expect("parse");
        match cli.command {
            Commands::Lookup { family, keys } => {
                assert_eq!(family, DealFamily::Power);
                assert_eq!(keys, vec![1, 2, 3]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
