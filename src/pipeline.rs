//! End-to-end run orchestration
//!
//! A run resolves the first archive year, builds the references, downloads
//! them with the [`FetcherPool`] and converts every available archive to
//! Parquet. Nothing in a run is ambient: all inputs come from [`RunConfig`].

use crate::archive::url::detect_first_year;
use crate::archive::{ArchiveReference, ArchiveSource, ReferenceFilter, UrlBuilder};
use crate::downloader::config::{DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_WORKERS, MAX_WORKERS};
use crate::downloader::{FetchOutcome, FetchRecord, FetcherPool};
use crate::normalize::normalize_archive;
use crate::output::{KlinesWriter, OutputLayout, OutputPathBuilder, OutputWriter, ParquetKlinesWriter};
use crate::settings::{Settings, SETTINGS_FILE_NAME};
use crate::shutdown::SharedShutdown;
use crate::{normalize_symbol, ConfigError, Frequency, Interval, MarketType};
use chrono::{Datelike, NaiveDate, Utc};
use indicatif::ProgressBar;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default output directory
pub const DEFAULT_OUTPUT_DIR: &str = "binance_data";

/// Errors that prevent a run from starting
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid run configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Output directories could not be prepared
    #[error("IO error: {0}")]
    Io(String),
}

/// Complete description of one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Upper-case trading symbol
    pub symbol: String,
    /// Kline interval
    pub interval: Interval,
    /// Market to download from
    pub market: MarketType,
    /// Monthly or daily archives
    pub frequency: Frequency,
    /// Year/month/day restrictions
    pub filter: ReferenceFilter,
    /// Concurrent download workers
    pub workers: usize,
    /// Root of all downloaded and generated files
    pub output_dir: PathBuf,
    /// Parquet file layout
    pub layout: OutputLayout,
    /// Per-request download timeout
    pub request_timeout: Duration,
    /// Validate archives against their CHECKSUM files
    pub verify_checksum: bool,
    /// Convert archives to Parquet after downloading
    pub convert: bool,
    /// Delete archives once converted
    pub delete_archives: bool,
    /// Reuse archives already on disk
    pub skip_existing: bool,
    /// Ask the host for the first archive year
    pub smart_year: bool,
    /// Settings file; defaults to `{output_dir}/kline_archiver.json`
    pub config_path: Option<PathBuf>,
    /// Date treated as today when building references
    pub today: NaiveDate,
}

impl RunConfig {
    /// Start a config for `symbol` and `interval` with default options
    pub fn builder(symbol: &str, interval: &str) -> Result<RunConfigBuilder, ConfigError> {
        let symbol = normalize_symbol(symbol)?;
        let interval: Interval = interval.parse()?;

        Ok(RunConfigBuilder {
            config: RunConfig {
                symbol,
                interval,
                market: MarketType::UsdMargined,
                frequency: Frequency::Monthly,
                filter: ReferenceFilter::all(),
                workers: DEFAULT_WORKERS,
                output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
                layout: OutputLayout::Combined,
                request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
                verify_checksum: false,
                convert: true,
                delete_archives: false,
                skip_existing: true,
                smart_year: true,
                config_path: None,
                today: Utc::now().date_naive(),
            },
        })
    }

    /// Settings file used by this run
    pub fn settings_path(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| self.output_dir.join(SETTINGS_FILE_NAME))
    }

    /// Check ranges that the type system does not enforce
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkers(self.workers));
        }
        if let Some(&year) = self.filter.years.iter().find(|y| !(1970..=9999).contains(*y)) {
            return Err(ConfigError::InvalidFilter {
                field: "years",
                value: i64::from(year),
            });
        }
        if let Some(&month) = self.filter.months.iter().find(|m| !(1..=12).contains(*m)) {
            return Err(ConfigError::InvalidFilter {
                field: "months",
                value: i64::from(month),
            });
        }
        if let Some(&day) = self.filter.days.iter().find(|d| !(1..=31).contains(*d)) {
            return Err(ConfigError::InvalidFilter {
                field: "days",
                value: i64::from(day),
            });
        }
        Ok(())
    }

    fn paths(&self) -> OutputPathBuilder {
        OutputPathBuilder::new(
            self.output_dir.clone(),
            self.market,
            &self.symbol,
            self.interval,
        )
    }
}

/// Builder for [`RunConfig`]
#[derive(Debug, Clone)]
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    /// Set market
    pub fn market(mut self, market: MarketType) -> Self {
        self.config.market = market;
        self
    }

    /// Set archive frequency
    pub fn frequency(mut self, frequency: Frequency) -> Self {
        self.config.frequency = frequency;
        self
    }

    /// Restrict to these years
    pub fn years(mut self, years: Vec<i32>) -> Self {
        self.config.filter.years = years;
        self
    }

    /// Restrict to these months
    pub fn months(mut self, months: Vec<u32>) -> Self {
        self.config.filter.months = months;
        self
    }

    /// Restrict to these days (daily archives)
    pub fn days(mut self, days: Vec<u32>) -> Self {
        self.config.filter.days = days;
        self
    }

    /// Set worker count
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Set output directory
    pub fn output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = output_dir.into();
        self
    }

    /// Set Parquet layout
    pub fn layout(mut self, layout: OutputLayout) -> Self {
        self.config.layout = layout;
        self
    }

    /// Set per-request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Enable CHECKSUM validation
    pub fn verify_checksum(mut self, enabled: bool) -> Self {
        self.config.verify_checksum = enabled;
        self
    }

    /// Enable Parquet conversion
    pub fn convert(mut self, enabled: bool) -> Self {
        self.config.convert = enabled;
        self
    }

    /// Delete archives after conversion
    pub fn delete_archives(mut self, enabled: bool) -> Self {
        self.config.delete_archives = enabled;
        self
    }

    /// Reuse archives already on disk
    pub fn skip_existing(mut self, enabled: bool) -> Self {
        self.config.skip_existing = enabled;
        self
    }

    /// Enable first-year detection
    pub fn smart_year(mut self, enabled: bool) -> Self {
        self.config.smart_year = enabled;
        self
    }

    /// Use a settings file other than the default
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.config_path = Some(path.into());
        self
    }

    /// Override the current date
    pub fn today(mut self, today: NaiveDate) -> Self {
        self.config.today = today;
        self
    }

    /// Finish the config
    pub fn build(self) -> RunConfig {
        self.config
    }
}

/// Stage at which a reference failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    /// Archive could not be downloaded
    Download,
    /// Archive could not be read or parsed
    Conversion,
}

/// One reference that did not make it into the output
#[derive(Debug, Clone, Serialize)]
pub struct FailedReference {
    /// Trading symbol
    pub symbol: String,
    /// Kline interval
    pub interval: Interval,
    /// Archive period (`YYYY-MM` or `YYYY-MM-DD`)
    pub period: String,
    /// Archive location
    pub url: String,
    /// Where it failed
    pub stage: FailureStage,
    /// Error description
    pub reason: String,
}

impl FailedReference {
    fn new(record: &FetchRecord, stage: FailureStage, reason: String) -> Self {
        Self {
            symbol: record.reference.symbol.clone(),
            interval: record.reference.interval,
            period: record.reference.period.to_string(),
            url: record.location.clone(),
            stage,
            reason,
        }
    }
}

/// Parquet table that could not be written
#[derive(Debug, Clone, Serialize)]
pub struct OutputFailure {
    /// Destination of the table
    pub path: PathBuf,
    /// Error description
    pub reason: String,
}

/// Totals of a finished run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// First year references were built from
    pub first_year: i32,
    /// References built for the run
    pub references_total: usize,
    /// Archives downloaded in this run
    pub downloaded: usize,
    /// Archives already present locally
    pub skipped: usize,
    /// Archives that failed to download
    pub failed: usize,
    /// References not attempted because of shutdown
    pub cancelled: usize,
    /// Bytes downloaded in this run
    pub bytes_downloaded: u64,
    /// Archives converted to Parquet
    pub converted_files: usize,
    /// Archives that could not be converted
    pub conversion_failures: usize,
    /// Rows written across all tables
    pub rows_written: u64,
    /// Malformed rows skipped during normalization
    pub rows_skipped: u64,
    /// Archives removed after conversion
    pub archives_deleted: usize,
    /// Tables written in this run
    pub output_files: Vec<PathBuf>,
    /// References missing from the output
    pub failed_references: Vec<FailedReference>,
    /// Tables that could not be written
    pub output_failures: Vec<OutputFailure>,
}

impl RunSummary {
    /// Whether any output table failed to write
    pub fn has_output_failures(&self) -> bool {
        !self.output_failures.is_empty()
    }

    fn absorb(&mut self, group: GroupResult) {
        self.converted_files += group.converted;
        self.conversion_failures += group.failures.len();
        self.rows_written += group.rows_written;
        self.rows_skipped += group.rows_skipped;
        self.archives_deleted += group.archives_deleted;
        self.failed_references.extend(group.failures);
        if let Some(path) = group.written {
            self.output_files.push(path);
        }
        if let Some(failure) = group.output_failure {
            self.output_failures.push(failure);
        }
    }
}

/// Archives that end up in the same Parquet table
struct OutputGroup {
    path: PathBuf,
    records: Vec<FetchRecord>,
}

#[derive(Default)]
struct GroupResult {
    converted: usize,
    failures: Vec<FailedReference>,
    rows_written: u64,
    rows_skipped: u64,
    archives_deleted: usize,
    written: Option<PathBuf>,
    output_failure: Option<OutputFailure>,
}

/// Runs one download and conversion job
pub struct Pipeline {
    config: RunConfig,
    source: Arc<dyn ArchiveSource>,
    shutdown: Option<SharedShutdown>,
    progress: Option<ProgressBar>,
}

impl Pipeline {
    /// Create a pipeline fetching from `source`
    pub fn new(config: RunConfig, source: Arc<dyn ArchiveSource>) -> Self {
        Self {
            config,
            source,
            shutdown: None,
            progress: None,
        }
    }

    /// Attach a shared shutdown handle for graceful cancellation
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Report download progress on `progress`
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Configuration of this run
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Execute the run
    ///
    /// Individual download, conversion and write failures are recorded in the
    /// returned summary. Only an invalid configuration or unusable output
    /// directory is an error.
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let config = &self.config;
        config.validate()?;

        let paths = config.paths();
        paths
            .ensure_directories()
            .map_err(|e| PipelineError::Io(e.to_string()))?;

        let first_year = self.resolve_first_year().await;
        let references = UrlBuilder::new(config.symbol.clone(), config.interval, config.market)
            .with_frequency(config.frequency)
            .with_filter(config.filter.clone())
            .with_first_year(first_year)
            .with_today(config.today)
            .build();

        info!(
            "{} {} {} {}: {} archives from {}",
            config.market,
            config.symbol,
            config.interval,
            config.frequency,
            references.len(),
            first_year
        );
        if references.is_empty() {
            warn!("No archives match the requested period");
        }

        let mut pool = FetcherPool::new(Arc::clone(&self.source), paths.download_dir())
            .with_workers(config.workers)
            .with_skip_existing(config.skip_existing);
        if let Some(shutdown) = &self.shutdown {
            pool = pool.with_shutdown(Arc::clone(shutdown));
        }
        if let Some(pb) = &self.progress {
            pb.set_length(references.len() as u64);
            pool = pool.with_progress(pb.clone());
        }

        let report = pool.run(references).await;
        if let Some(pb) = &self.progress {
            pb.finish_and_clear();
        }

        let mut summary = RunSummary {
            first_year,
            references_total: report.records.len(),
            downloaded: report.downloaded(),
            skipped: report.skipped(),
            failed: report.failed(),
            cancelled: report.cancelled(),
            bytes_downloaded: report.bytes_downloaded(),
            ..RunSummary::default()
        };

        for record in &report.records {
            if let FetchOutcome::Failed { reason } = &record.outcome {
                summary.failed_references.push(FailedReference::new(
                    record,
                    FailureStage::Download,
                    reason.clone(),
                ));
            }
        }

        if !config.convert {
            info!("Conversion disabled, archives kept in {}", paths.download_dir().display());
            return Ok(summary);
        }

        for group in group_records(&paths, config.layout, report.records) {
            let path = group.path.clone();
            let delete_archives = config.delete_archives;
            let result =
                tokio::task::spawn_blocking(move || convert_group(group, delete_archives)).await;

            match result {
                Ok(group_result) => summary.absorb(group_result),
                Err(e) => {
                    error!("Conversion task for {} failed: {}", path.display(), e);
                    summary.output_failures.push(OutputFailure {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Run finished: {} downloaded, {} skipped, {} failed, {} rows written",
            summary.downloaded, summary.skipped, summary.failed, summary.rows_written
        );
        Ok(summary)
    }

    async fn resolve_first_year(&self) -> i32 {
        let config = &self.config;
        let launch_year = config.market.launch_year();

        if !config.smart_year || !config.filter.years.is_empty() {
            return launch_year;
        }

        let settings_path = config.settings_path();
        let mut settings = Settings::load(&settings_path);
        if let Some(year) = settings.start_year(config.market, &config.symbol) {
            debug!("Using cached first year {} for {}", year, config.symbol);
            return year;
        }

        let detected = detect_first_year(
            self.source.as_ref(),
            &config.symbol,
            config.interval,
            config.market,
            config.today,
        )
        .await;

        let Some(year) = detected else {
            let current_year = config.today.year();
            warn!(
                "No archive found for {} {}, starting at {} without caching it",
                config.market, config.symbol, current_year
            );
            return current_year;
        };

        settings.set_start_year(config.market, &config.symbol, year);
        if let Err(e) = settings.save(&settings_path) {
            warn!(
                "Could not cache first year in {}: {}",
                settings_path.display(),
                e
            );
        }
        year
    }
}

/// A group without rows must not keep a table from an earlier run
fn remove_stale_table(path: &Path, result: &mut GroupResult) {
    match std::fs::remove_file(path) {
        Ok(()) => info!("No rows for {}, removed table from earlier run", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No rows for {}", path.display())
        }
        Err(e) => {
            error!("Failed to remove stale {}: {}", path.display(), e);
            result.output_failure = Some(OutputFailure {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }
    }
}

/// Split available archives into output groups, keeping reference order
fn group_records(
    paths: &OutputPathBuilder,
    layout: OutputLayout,
    records: Vec<FetchRecord>,
) -> Vec<OutputGroup> {
    let mut groups: Vec<OutputGroup> = Vec::new();

    for record in records.into_iter().filter(FetchRecord::is_available) {
        let path = paths.parquet_path(layout, &record.reference);
        match groups.iter_mut().find(|g| g.path == path) {
            Some(group) => group.records.push(record),
            None => groups.push(OutputGroup {
                path,
                records: vec![record],
            }),
        }
    }
    groups
}

/// Normalize every archive of a group and write its table
fn convert_group(group: OutputGroup, delete_archives: bool) -> GroupResult {
    let mut result = GroupResult::default();
    let mut writer = ParquetKlinesWriter::new(&group.path);
    let mut converted: Vec<&Path> = Vec::new();

    for record in &group.records {
        let normalized = match normalize_archive(&record.path) {
            Ok(normalized) => normalized,
            Err(e) => {
                warn!("Failed to convert {}: {}", record.path.display(), e);
                result.failures.push(FailedReference::new(
                    record,
                    FailureStage::Conversion,
                    e.to_string(),
                ));
                continue;
            }
        };

        result.rows_skipped += normalized.skipped.len() as u64;
        if let Err(e) = writer.write_klines(&normalized.klines) {
            error!("Failed to write {}: {}", group.path.display(), e);
            result.output_failure = Some(OutputFailure {
                path: group.path.clone(),
                reason: e.to_string(),
            });
            return result;
        }

        info!(
            "Converted {} ({} rows, {} skipped)",
            record.reference.file_name(),
            normalized.klines.len(),
            normalized.skipped.len()
        );
        result.converted += 1;
        converted.push(record.path.as_path());
    }

    match writer.close() {
        Ok(0) => remove_stale_table(&group.path, &mut result),
        Ok(rows) => {
            result.rows_written = rows;
            result.written = Some(group.path.clone());
        }
        Err(e) => {
            error!("Failed to write {}: {}", group.path.display(), e);
            result.output_failure = Some(OutputFailure {
                path: group.path.clone(),
                reason: e.to_string(),
            });
            return result;
        }
    }

    if delete_archives {
        for path in converted {
            match std::fs::remove_file(path) {
                Ok(()) => result.archives_deleted += 1,
                Err(e) => warn!("Could not delete {}: {}", path.display(), e),
            }
        }
    }

    result
}
