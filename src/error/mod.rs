use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the ETL stages.
///
/// Backfill loops use [`EtlError::aborts_run`] to decide between moving on to
/// the next period and stopping altogether.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid period {0:?} (expected YYYY-MM with month 01-12)")]
    InvalidPeriod(String),

    #[error("unknown month code {0:?}")]
    UnknownMonth(String),

    #[error("navigation failed at {step}: {locator} not clickable after {attempts} attempts")]
    NavigationFailed {
        step: String,
        locator: String,
        attempts: u32,
    },

    #[error("browser session failed: {0}")]
    BrowserSession(String),

    #[error("unexpected portal page: {0}")]
    UnexpectedPage(String),

    #[error("no report file found for {period} (revisions exhausted, no monthly folder)")]
    NoReportFile { period: String },

    #[error("download did not complete in {dir:?} within {secs}s")]
    DownloadTimeout { dir: PathBuf, secs: u64 },

    #[error("no .xlsx file found in {0:?}")]
    NoDownloadedFile(PathBuf),

    #[error("extraction failed for {path:?}: {reason}")]
    ExtractionFailed { path: PathBuf, reason: String },

    #[error("load failed for {period}: {source:#}")]
    LoadFailed {
        period: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl EtlError {
    /// Whether this error makes every later period pointless too.
    pub fn aborts_run(&self) -> bool {
        matches!(
            self,
            EtlError::Config(_)
                | EtlError::InvalidPeriod(_)
                | EtlError::BrowserSession(_)
                | EtlError::Storage(_)
        )
    }
}
