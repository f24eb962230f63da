//! Writes normalized rows to the staging table, or to CSV for inspection.

use crate::error::EtlError;
use crate::models::{Period, StagingRow};
use crate::storage::Repository;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

pub struct Loader<'a> {
    repo: &'a Repository,
    replace_existing: bool,
}

impl<'a> Loader<'a> {
    pub fn new(repo: &'a Repository, replace_existing: bool) -> Self {
        Self {
            repo,
            replace_existing,
        }
    }

    pub fn load(&self, period: &Period, rows: &[StagingRow]) -> Result<usize, EtlError> {
        let result = if self.replace_existing {
            if let Ok(existing) = self.repo.period_row_count(period) {
                if existing > 0 {
                    warn!("{}: replacing {} existing rows", period, existing);
                }
            }
            self.repo.replace_period_rows(period, rows)
        } else {
            self.repo.append_staging_rows(rows)
        };
        let n = result.map_err(|source| EtlError::LoadFailed {
            period: period.to_string(),
            source,
        })?;
        info!("{}: {} rows loaded", period, n);
        Ok(n)
    }
}

/// Write rows to `path` with the staging table's column names as header.
pub fn export_csv(rows: &[StagingRow], path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Could not create {:?}", path))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(rows.len())
}
