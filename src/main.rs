use std::process::ExitCode;

use tracing::{error, info};

use availbench::config::BenchConfig;
use availbench::error::BenchError;
use availbench::generator::Generator;
use availbench::report;
use availbench::runner::{run_benchmark, standard_plan};
use availbench::store::MemoryStore;

const WAL_FILE: &str = "availbench.wal";

async fn run(config: &BenchConfig) -> Result<(), BenchError> {
    let store = match &config.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            MemoryStore::open(&dir.join(WAL_FILE))?
        }
        None => MemoryStore::new(),
    };

    let generator = Generator::new(config.seed);
    let measurements = run_benchmark(&store, generator, config.batch_size, &standard_plan()).await?;

    report::log_summary(&measurements);
    let timestamp = report::run_timestamp(chrono::Utc::now());
    let (csv, txt) = report::aggregate(&measurements).write(&config.reports_dir, &timestamp)?;
    info!("reports saved:");
    info!("- {}", csv.display());
    info!("- {}", txt.display());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let config = BenchConfig::from_env();
    if let Err(e) = availbench::observability::init(config.metrics_port) {
        error!("metrics exporter failed to start: {e}");
        return ExitCode::FAILURE;
    }
    info!("availbench starting");
    info!("  seed: {:#x}", config.seed);
    info!("  batch_size: {}", config.batch_size);
    info!("  reports: {}", config.reports_dir.display());
    info!(
        "  store: {}",
        config
            .data_dir
            .as_ref()
            .map_or("in-memory".to_string(), |d| d.join(WAL_FILE).display().to_string())
    );

    match run(&config).await {
        Ok(()) => {
            info!("performance test completed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("benchmark failed: {e}");
            eprintln!("benchmark failed: {e}");
            ExitCode::FAILURE
        }
    }
}
