//! Carbon Advice CLI
//!
//! Runs one placement decision against live WattTime forecasts.
//!
//! Usage:
//!   carbon-advise --request request.json [--output advice.json] [--verbose]
//!
//! The request file holds `{"policy": {...}, "job": {...}}`. Credentials come
//! from `WATTTIME_USERNAME` / `WATTTIME_PASSWORD`.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use carbon_core::{audit_sink_from_config, AuditConfig, OrchestrationRequest, RequestContext, SystemClock};
use carbon_engine::{AdviceEngine, EngineConfig};
use clap::Parser;
use region_map::StaticRegionMap;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;
use watttime_provider::{WattTimeConfig, WattTimeSignals};

#[derive(Parser, Debug)]
#[command(
    name = "carbon-advise",
    about = "Pick the lowest-carbon cloud region and start time for a job"
)]
struct Args {
    /// Path to the request JSON file
    #[arg(short, long)]
    request: PathBuf,

    /// Write the advice here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let file = File::open(&args.request)
        .with_context(|| format!("opening request {}", args.request.display()))?;
    let request: OrchestrationRequest = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing request {}", args.request.display()))?;

    let audit = audit_sink_from_config(&AuditConfig::from_env());
    let watttime = WattTimeConfig::from_env();
    info!(base_url = %watttime.base_url, "using WattTime forecasts");
    let signals = WattTimeSignals::from_config(watttime, audit.clone())?;

    let engine = AdviceEngine::new(
        Arc::new(StaticRegionMap::new()),
        Arc::new(signals),
        audit,
        Arc::new(SystemClock),
        EngineConfig::default(),
    );

    let request_id = Uuid::new_v4();
    info!(%request_id, mode = request.policy.mode.as_str(), "requesting advice");
    let advice = engine
        .advise(&request.job, &request.policy, &RequestContext::new(request_id))
        .await?;

    match &args.output {
        Some(path) => {
            let writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(writer, &advice)?;
            info!("Wrote advice to {:?}", path);
        }
        None => println!("{}", serde_json::to_string_pretty(&advice)?),
    }

    info!("{}", advice.rationale);
    Ok(())
}
