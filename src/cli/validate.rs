//! Validate command implementation

use crate::config::Config;
use crate::data::{
    validate_klines, DataSourceError, FileDataSource, FileSourceConfig, KlineRecord, ParseStats,
    ValidationReport,
};
use clap::Args;
use std::path::{Path, PathBuf};

/// Issues printed before the listing is cut short
const MAX_PRINTED_ISSUES: usize = 20;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// OHLCV CSV file
    pub file: PathBuf,

    /// Symbol for files without a symbol column
    #[arg(long)]
    pub symbol: Option<String>,
}

/// Check an OHLCV file in file order
///
/// Rows the parser rejects are counted in the returned stats; the report
/// covers the rows that parsed.
pub fn validate_file(
    config: &FileSourceConfig,
    path: &Path,
) -> Result<(ValidationReport, ParseStats), DataSourceError> {
    let source = FileDataSource::new(config.clone());
    let mut records = Vec::new();
    source.stream_file(path, |event| {
        if let Some(record) = KlineRecord::from_event(&event) {
            records.push(record);
        }
        true
    })?;
    Ok((validate_klines(&records), source.last_stats()))
}

impl ValidateArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let mut file_config = config.data.file.clone();
        if self.symbol.is_some() {
            file_config.market = self.symbol.clone();
        }
        let path = self.file.clone();
        let (report, stats) =
            tokio::task::spawn_blocking(move || validate_file(&file_config, &path)).await??;

        println!("Validation of {}", self.file.display());
        println!("  Rows read:     {}", stats.total_rows);
        println!("  Rows rejected: {}", stats.invalid_rows);
        for error in &stats.errors {
            println!("    {}", error);
        }
        println!("  Bars checked:  {}", report.total_records);
        println!("  Issues:        {}", report.issues.len());
        for issue in report.issues.iter().take(MAX_PRINTED_ISSUES) {
            println!("    {}", issue);
        }
        if report.issues.len() > MAX_PRINTED_ISSUES {
            println!("    ... {} more", report.issues.len() - MAX_PRINTED_ISSUES);
        }

        if !report.is_valid() || stats.invalid_rows > 0 {
            anyhow::bail!("{} failed validation", self.file.display());
        }
        println!("  OK");
        Ok(())
    }
}
