//! Download command implementation

use super::parse_time;
use super::validate::validate_file;
use crate::backtest::DataType;
use crate::config::Config;
use crate::data::{BinanceHistoricalSource, DataRequest, DownloadProgress, DownloadStatus};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Symbols, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    pub symbols: Vec<String>,

    #[arg(long, value_parser = parse_time)]
    pub start: i64,

    #[arg(long, value_parser = parse_time)]
    pub end: i64,

    /// Kline interval, e.g. 1m, 1h, 1d
    #[arg(long, default_value = "1m")]
    pub interval: String,

    /// Output directory; defaults to `data.data_dir`
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Skip validating the written files
    #[arg(long)]
    pub no_validate: bool,
}

fn log_progress(progress: &DownloadProgress) {
    match progress.status {
        DownloadStatus::Failed => tracing::warn!(symbol = %progress.symbol, "Download failed"),
        DownloadStatus::Completed => tracing::info!(
            symbol = %progress.symbol,
            records = progress.total_records,
            bytes = progress.downloaded_bytes,
            "Download complete"
        ),
        _ => tracing::debug!(
            symbol = %progress.symbol,
            chunks = progress.completed_chunks,
            total_chunks = progress.total_chunks,
            progress = %format!("{:.0}%", progress.progress * 100.0),
            "Downloading"
        ),
    }
}

impl DownloadArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let dir = self
            .output_dir
            .clone()
            .unwrap_or_else(|| config.data.file.data_dir.clone());
        let mut template = DataRequest::new("", self.start, self.end);
        template.data_type = DataType::Kline;
        template.time_frame = self.interval.clone();
        let symbols = self.symbols.clone();

        let mut source = BinanceHistoricalSource::new(config.remote.clone())?;
        source.set_progress_callback(Arc::new(log_progress));

        tracing::info!(symbols = ?symbols, interval = %self.interval, dir = %dir.display(), "Starting download");
        let batch_dir = dir.clone();
        let outcomes =
            tokio::task::spawn_blocking(move || source.download_batch(&symbols, &template, &batch_dir)).await?;

        let mut failures = 0;
        for (symbol, outcome) in &outcomes {
            match outcome {
                Ok(rows) => {
                    let path = dir.join(format!("{}_{}.csv", symbol, self.interval));
                    println!("{}: {} rows -> {}", symbol, rows, path.display());
                    if self.no_validate {
                        continue;
                    }
                    let (report, _) = validate_file(&config.data.file, &path)?;
                    if !report.is_valid() {
                        println!("  {} issues in {} bars", report.issues.len(), report.invalid_records());
                        for issue in report.issues.iter().take(5) {
                            println!("    {}", issue);
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    println!("{}: failed: {}", symbol, e);
                }
            }
        }
        if failures > 0 {
            anyhow::bail!("{} of {} downloads failed", failures, outcomes.len());
        }
        Ok(())
    }
}
