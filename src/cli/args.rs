//! Command line arguments and the run they describe

use crate::archive::{HttpArchiveSource, BINANCE_VISION_BASE_URL};
use crate::downloader::config::{parse_workers, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::output::OutputLayout;
use crate::pipeline::{Pipeline, RunConfig, RunSummary, DEFAULT_OUTPUT_DIR};
use crate::settings::{Settings, SETTINGS_FILE_NAME};
use crate::shutdown::SharedShutdown;
use crate::{normalize_symbol, Frequency, Interval, MarketType};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::report::{print_human, print_json};
use super::tables::TableCommand;
use super::CliError;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    #[default]
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// Kline archive downloader
#[derive(Parser, Debug)]
#[command(name = "kline-archiver")]
#[command(
    about = "Download Binance Vision kline archives and convert them to Parquet",
    long_about = None
)]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Work on written tables instead of downloading
    #[command(subcommand)]
    pub command: Option<TableCommand>,

    /// Trading symbol (e.g., BTCUSDT)
    #[arg(long, default_value = "BTCUSDT", value_parser = normalize_symbol)]
    pub symbol: String,

    /// Kline interval (1s, 1m, 3m, 5m, 15m, 30m, 1h, 2h, 4h, 6h, 8h, 12h, 1d, 3d, 1w, 1M)
    #[arg(long, default_value = "1m", value_parser = Interval::from_str)]
    pub interval: Interval,

    /// Market: spot, futures (alias of futures-um), futures-um or futures-cm
    #[arg(long, default_value = "futures", value_parser = MarketType::from_str)]
    pub market: MarketType,

    /// Archive frequency: monthly or daily
    #[arg(long, default_value = "monthly", value_parser = Frequency::from_str)]
    pub frequency: Frequency,

    /// Years to download (comma separated or repeated)
    #[arg(long, value_delimiter = ',')]
    pub years: Vec<i32>,

    /// Months to download, 1-12 (comma separated or repeated)
    #[arg(long, value_delimiter = ',')]
    pub months: Vec<u32>,

    /// Days to download, 1-31, daily archives only (comma separated or repeated)
    #[arg(long, value_delimiter = ',')]
    pub days: Vec<u32>,

    /// Number of concurrent download workers (default: 5, max: 32)
    ///
    /// Falls back to `max_download_workers` from the settings file when not given.
    #[arg(long, value_parser = parse_workers)]
    pub workers: Option<usize>,

    /// Root directory for archives, Parquet files and settings
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,

    /// Parquet layout: combined (one file per symbol/interval) or per-archive
    #[arg(long, default_value = "combined", value_parser = OutputLayout::from_str)]
    pub layout: OutputLayout,

    /// Per-request download timeout in seconds
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..=600))]
    pub timeout_secs: u64,

    /// Validate every archive against its published CHECKSUM
    #[arg(long, default_value_t = false)]
    pub verify_checksum: bool,

    /// Only download, do not convert to Parquet
    #[arg(long, default_value_t = false)]
    pub no_convert: bool,

    /// Delete archives after they were converted
    #[arg(long, overrides_with = "keep_archives")]
    pub delete_archives: bool,

    /// Keep archives after conversion, even if the settings file deletes them
    #[arg(long, overrides_with = "delete_archives")]
    pub keep_archives: bool,

    /// Download archives even if they already exist locally
    #[arg(long, overrides_with = "skip_existing")]
    pub no_skip_existing: bool,

    /// Reuse archives that already exist locally, even if the settings file disables it
    #[arg(long, overrides_with = "no_skip_existing")]
    pub skip_existing: bool,

    /// Start at the market launch year instead of looking for the first archive
    #[arg(long, overrides_with = "smart_year")]
    pub no_smart_year: bool,

    /// Look for the first available year, even if the settings file disables it
    #[arg(long, overrides_with = "no_smart_year")]
    pub smart_year: bool,

    /// Settings file (default: <output-dir>/kline_archiver.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output format (json or human)
    #[arg(long, default_value = "human")]
    pub output_format: OutputFormat,

    /// Archive host
    #[arg(long, default_value = BINANCE_VISION_BASE_URL, hide = true)]
    pub base_url: String,
}

/// Resolve a pair of opposing switches; `None` leaves the setting alone
fn switch(enable: bool, disable: bool) -> Option<bool> {
    match (enable, disable) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

impl Cli {
    /// `--delete-archives` / `--keep-archives`
    pub fn delete_archives_flag(&self) -> Option<bool> {
        switch(self.delete_archives, self.keep_archives)
    }

    /// `--skip-existing` / `--no-skip-existing`
    pub fn skip_existing_flag(&self) -> Option<bool> {
        switch(self.skip_existing, self.no_skip_existing)
    }

    /// `--smart-year` / `--no-smart-year`
    pub fn smart_year_flag(&self) -> Option<bool> {
        switch(self.smart_year, self.no_smart_year)
    }

    /// Settings file for this invocation
    pub fn settings_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.output_dir.join(SETTINGS_FILE_NAME))
    }

    /// Combine the arguments with persisted settings; flags win
    pub fn to_run_config(&self, settings: &Settings) -> Result<RunConfig, CliError> {
        let config = RunConfig::builder(&self.symbol, self.interval.as_str())?
            .market(self.market)
            .frequency(self.frequency)
            .years(self.years.clone())
            .months(self.months.clone())
            .days(self.days.clone())
            .workers(self.workers.unwrap_or(settings.max_download_workers))
            .output_dir(self.output_dir.clone())
            .layout(self.layout)
            .request_timeout(Duration::from_secs(self.timeout_secs))
            .verify_checksum(self.verify_checksum)
            .convert(!self.no_convert)
            .delete_archives(
                self.delete_archives_flag()
                    .unwrap_or(settings.delete_archives_after_conversion),
            )
            .skip_existing(self.skip_existing_flag().unwrap_or(settings.skip_existing_files))
            .smart_year(self.smart_year_flag().unwrap_or(settings.smart_year_detection))
            .config_path(self.settings_path())
            .build();

        config.validate()?;
        Ok(config)
    }

    /// Run the download and print the summary
    pub async fn execute(&self, shutdown: SharedShutdown) -> Result<RunSummary, CliError> {
        let settings = Settings::load(&self.settings_path());
        let config = self.to_run_config(&settings)?;

        let source = HttpArchiveSource::new_with_base_url(&self.base_url, config.request_timeout)?
            .with_checksum_verification(config.verify_checksum);

        info!(
            "Downloading {} {} {} klines into {}",
            config.market,
            config.symbol,
            config.interval,
            config.output_dir.display()
        );

        let pipeline = Pipeline::new(config, Arc::new(source))
            .with_shutdown(shutdown)
            .with_progress(self.progress_bar());
        let summary = pipeline.run().await?;

        match self.output_format {
            OutputFormat::Json => print_json(pipeline.config(), &summary)?,
            OutputFormat::Human => print_human(pipeline.config(), &summary),
        }
        Ok(summary)
    }

    fn progress_bar(&self) -> ProgressBar {
        if self.output_format == OutputFormat::Json {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(format!("{} {}", self.symbol, self.interval));
        pb
    }
}
