use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pricescout::challenge::ConsoleGate;
use pricescout::scout::Scout;
use pricescout::session::BrowserlessSession;
use pricescout::tabular::{self, Delim};
use pricescout_common::{Config, ExtractionStrategy, PriceEncoding};

/// Look up current price ranges for a list of products.
#[derive(Debug, Parser)]
#[command(name = "pricescout", version)]
struct Args {
    /// Delimited file holding the product queries.
    #[arg(long)]
    input: PathBuf,

    /// Header of the column holding the queries.
    #[arg(long, default_value = "Produto")]
    column: String,

    #[arg(long, default_value = "precos_encontrados.csv")]
    summary_out: PathBuf,

    #[arg(long, default_value = "itens_procurados.csv")]
    ledger_out: PathBuf,

    /// Skip writing the per-candidate ledger.
    #[arg(long)]
    no_ledger: bool,

    #[arg(long, value_enum, default_value_t = Delim::Csv)]
    delimiter: Delim,

    /// Also write the full run report (outcomes, ledgers, stats) as JSON.
    #[arg(long)]
    report_out: Option<PathBuf>,

    #[arg(long)]
    similarity_threshold: Option<f64>,

    #[arg(long)]
    outlier_std_multiplier: Option<f64>,

    /// decimal-comma or integer-cents
    #[arg(long)]
    price_encoding: Option<PriceEncoding>,

    /// aria-label, titled-container or auto
    #[arg(long)]
    extraction_strategy: Option<ExtractionStrategy>,

    #[arg(long)]
    page_timeout_secs: Option<u64>,

    #[arg(long)]
    query_delay_secs: Option<u64>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(v) = self.similarity_threshold {
            config.similarity_threshold = v;
        }
        if let Some(v) = self.outlier_std_multiplier {
            config.outlier_std_multiplier = v;
        }
        if let Some(v) = self.price_encoding {
            config.price_encoding = v;
        }
        if let Some(v) = self.extraction_strategy {
            config.extraction_strategy = v;
        }
        if let Some(v) = self.page_timeout_secs {
            config.page_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.query_delay_secs {
            config.query_delay = Duration::from_secs(v);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::from_default_env().add_directive("pricescout=info".parse()?);
    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Price scout starting...");

    // Load config
    let mut config = Config::from_env()?;
    args.apply(&mut config);
    config.validate()?;
    config.log_redacted();

    let queries = tabular::load_queries(&args.input, &args.column)
        .with_context(|| format!("Failed to load queries from {}", args.input.display()))?;
    if queries.is_empty() {
        warn!("No queries to run");
        return Ok(());
    }

    // Acquire the browser before anything else; without it there is no batch
    let session = BrowserlessSession::connect(&config)
        .await
        .context("Failed to acquire browser session")?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            ctrl_c.cancel();
        }
    });

    let scout = Scout::new(config, Box::new(session), Box::new(ConsoleGate), cancel);
    let report = scout.run_batch(&queries).await;

    tabular::write_summary(&args.summary_out, &report.outcomes, args.delimiter)
        .context("Failed to write summary")?;
    if !args.no_ledger {
        tabular::write_ledger(&args.ledger_out, &report.outcomes, args.delimiter)
            .context("Failed to write ledger")?;
    }
    if let Some(path) = &args.report_out {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &report)
            .context("Failed to write run report")?;
        info!(path = %path.display(), "Run report written");
    }

    info!("Price scout run complete. {report}");

    Ok(())
}
