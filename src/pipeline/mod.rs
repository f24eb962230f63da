//! Pipeline orchestrator: cursor → portal → download → extract → normalize → load.
//!
//! ## Run modes
//!
//! `run_next()`: incremental mode (default / cron use).
//!   Asks the cursor for the month after the latest loaded one and processes it.
//!
//! `run_backfill()`: walks an inclusive month range one period at a time.
//!   Period-level failures are logged and skipped unless `stop_on_error` is set
//!   or the failure makes later periods pointless too (see `EtlError::aborts_run`).
//!
//! Loads are append-only unless `replace_existing_period` is set, so re-running
//! a period in append mode duplicates its rows.

use crate::config::AppConfig;
use crate::cursor::IncrementalCursor;
use crate::download::{count_xlsx_files, latest_xlsx_file, wait_for_new_file};
use crate::error::EtlError;
use crate::extract::extract_from_file;
use crate::loader::Loader;
use crate::models::{Period, StagingRow};
use crate::portal::{PortalNavigator, WebDriverBrowser};
use crate::storage::Repository;
use crate::transform::normalize_now;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

pub struct Pipeline {
    config: AppConfig,
    repo: Repository,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let repo = Repository::open(&config.storage.db_path).context("Failed to open DuckDB")?;
        if config.storage.run_migrations {
            repo.run_migrations()?;
        }
        Ok(Self { config, repo })
    }

    #[cfg(test)]
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Process the period after the latest one loaded.
    pub async fn run_next(&self) -> Result<(Period, usize), EtlError> {
        let period = IncrementalCursor::new(&self.repo, &self.config.storage.initial_period_variable)
            .next_period()?;
        let rows = self.process_period(&period).await?;
        Ok((period, rows))
    }

    pub async fn run_backfill(&self, from: Period, to: Period) -> Result<PipelineStats, EtlError> {
        if from > to {
            return Err(EtlError::Config(format!("empty backfill range {} → {}", from, to)));
        }
        let periods = Period::range_inclusive(from, to);
        info!("=== Backfill {} → {} ({} periods) ===", from, to, periods.len());

        let mut stats = PipelineStats::default();
        for (i, period) in periods.iter().enumerate() {
            if i > 0 && self.config.pipeline.period_pause_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.pipeline.period_pause_ms)).await;
            }

            match self.process_period(period).await {
                Ok(n) => {
                    stats.periods_processed += 1;
                    stats.rows_loaded += n;
                }
                Err(e) if e.aborts_run() || self.config.pipeline.stop_on_error => {
                    error!("{}: {}; stopping backfill", period, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("{}: {}; continuing with next period", period, e);
                    stats.failed.push(*period);
                }
            }
        }

        info!(
            "=== Backfill done: {} periods | {} rows | {} failed ===",
            stats.periods_processed,
            stats.rows_loaded,
            stats.failed.len()
        );
        Ok(stats)
    }

    /// Download, extract, normalize and load one period.
    pub async fn process_period(&self, period: &Period) -> Result<usize, EtlError> {
        info!("=== {}: start ===", period);
        let run_id = self.repo.begin_run(period)?;

        let result = async {
            let path = self.fetch_report(period).await?;
            self.load_workbook(&path, period)
        }
        .await;

        self.finish_run(run_id, &result);
        result
    }

    /// Extract, normalize and load a workbook that is already on disk.
    pub fn ingest_file(&self, path: &Path, period: &Period) -> Result<usize, EtlError> {
        let run_id = self.repo.begin_run(period)?;
        let result = self.load_workbook(path, period);
        self.finish_run(run_id, &result);
        result
    }

    /// Extract and normalize without loading.
    pub fn stage_workbook(&self, path: &Path, period: &Period) -> Result<Vec<StagingRow>, EtlError> {
        let table = extract_from_file(path, &self.config.pipeline.sheet_name)?;
        Ok(normalize_now(&table, period))
    }

    fn load_workbook(&self, path: &Path, period: &Period) -> Result<usize, EtlError> {
        let rows = self.stage_workbook(path, period)?;
        Loader::new(&self.repo, self.config.pipeline.replace_existing_period).load(period, &rows)
    }

    /// Drive the browser to the report and return the downloaded file.
    async fn fetch_report(&self, period: &Period) -> Result<PathBuf, EtlError> {
        let dir = self.download_dir()?;
        let baseline = count_xlsx_files(&dir)?;

        let browser = WebDriverBrowser::connect(&self.config.portal, &dir)
            .await
            .map_err(|e| EtlError::BrowserSession(e.to_string()))?;

        let navigated = PortalNavigator::new(&browser, &self.config.portal)
            .download_report(period)
            .await;

        let downloaded = match navigated {
            Ok(outcome) => {
                info!(
                    "{}: clicked {:?} in {:?}/{:?} ({} backtrack(s){})",
                    period,
                    outcome.file_name,
                    outcome.month_label,
                    outcome.folder,
                    outcome.backtracks,
                    if outcome.used_monthly { ", monthly fallback" } else { "" }
                );
                wait_for_new_file(
                    &dir,
                    baseline,
                    Duration::from_secs(self.config.pipeline.download_timeout_secs),
                    Duration::from_millis(self.config.pipeline.download_poll_ms),
                )
                .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = browser.close().await {
            warn!("Closing browser session: {}", e);
        }
        downloaded?;

        let path = latest_xlsx_file(&dir)?;
        info!("{}: downloaded {:?}", period, path);
        Ok(path)
    }

    /// The download directory, created if missing and made absolute for the browser.
    fn download_dir(&self) -> Result<PathBuf, EtlError> {
        let dir = &self.config.pipeline.download_dir;
        std::fs::create_dir_all(dir)
            .and_then(|_| dir.canonicalize())
            .map_err(|e| EtlError::Config(format!("download dir {:?}: {}", dir, e)))
    }

    fn finish_run(&self, run_id: i64, result: &Result<usize, EtlError>) {
        let (rows, err) = match result {
            Ok(n) => (*n, None),
            Err(e) => (0, Some(e.to_string())),
        };
        if let Err(e) = self.repo.finish_run(run_id, rows, err.as_deref()) {
            warn!("Could not record run {}: {:#}", run_id, e);
        }
    }
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub periods_processed: usize,
    pub rows_loaded: usize,
    pub failed: Vec<Period>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline_in(dir: &Path) -> Pipeline {
        let mut config = AppConfig::default();
        config.storage.db_path = dir.join("vtea.duckdb");
        config.pipeline.download_dir = dir.join("downloads");
        Pipeline::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_run_next_without_start_period_aborts_before_download() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_in(dir.path());

        let err = pipeline.run_next().await.unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
        assert!(!dir.path().join("downloads").exists());
        assert_eq!(pipeline.repository().last_run().unwrap(), None);
    }

    #[test]
    fn test_ingest_missing_workbook_is_logged_as_failed_run() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_in(dir.path());
        let period: Period = "2019-07".parse().unwrap();

        let err = pipeline
            .ingest_file(&dir.path().join("missing.xlsx"), &period)
            .unwrap_err();
        assert!(matches!(err, EtlError::ExtractionFailed { .. }));
        assert!(!err.aborts_run());
        assert_eq!(
            pipeline.repository().last_run().unwrap(),
            Some(("2019-07".to_string(), "error".to_string()))
        );
    }

    #[tokio::test]
    async fn test_backfill_rejects_inverted_range() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_in(dir.path());
        let err = pipeline
            .run_backfill("2020-02".parse().unwrap(), "2020-01".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }
}
