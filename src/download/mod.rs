//! Download-completion polling and newest-file lookup for the download directory.
//!
//! Completion is signalled by the count of `*.xlsx` files going up, so any
//! unrelated workbook dropped into the directory during a run is mistaken
//! for the download.

use crate::error::EtlError;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::time::sleep;
use tracing::{debug, info};

const EXTENSION: &str = "xlsx";

fn is_xlsx(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|e| e.eq_ignore_ascii_case(EXTENSION))
            .unwrap_or(false)
}

/// Workbooks directly inside `dir`; a missing directory holds none.
pub fn discover_xlsx_files(dir: &Path) -> Result<Vec<PathBuf>, EtlError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let unreadable = |e: std::io::Error| EtlError::Config(format!("download dir {:?}: {}", dir, e));

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        if is_xlsx(&path) {
            files.push(path);
        }
    }
    Ok(files)
}

pub fn count_xlsx_files(dir: &Path) -> Result<usize, EtlError> {
    Ok(discover_xlsx_files(dir)?.len())
}

/// Poll `dir` until it holds more than `baseline` workbooks.
pub async fn wait_for_new_file(
    dir: &Path,
    baseline: usize,
    timeout: Duration,
    poll: Duration,
) -> Result<(), EtlError> {
    let deadline = Instant::now() + timeout;
    loop {
        let count = count_xlsx_files(dir)?;
        if count > baseline {
            info!("Download complete: {} → {} workbooks in {:?}", baseline, count, dir);
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(EtlError::DownloadTimeout {
                dir: dir.to_path_buf(),
                secs: timeout.as_secs(),
            });
        }
        debug!("Waiting for download ({} workbooks so far)", count);
        sleep(poll).await;
    }
}

/// Creation time, or modification time where the filesystem has none.
fn created_at(path: &Path) -> SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.created().or_else(|_| m.modified()))
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// The most recently created workbook in `dir`.
pub fn latest_xlsx_file(dir: &Path) -> Result<PathBuf, EtlError> {
    discover_xlsx_files(dir)?
        .into_iter()
        .map(|p| (created_at(&p), p))
        .max()
        .map(|(_, p)| p)
        .ok_or_else(|| EtlError::NoDownloadedFile(dir.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_count_ignores_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.xlsx"), b"x").unwrap();
        fs::write(dir.path().join("b.XLSX"), b"x").unwrap();
        fs::write(dir.path().join("c.crdownload"), b"x").unwrap();
        fs::create_dir(dir.path().join("d.xlsx")).unwrap();
        assert_eq!(count_xlsx_files(dir.path()).unwrap(), 2);
        assert_eq!(count_xlsx_files(&dir.path().join("missing")).unwrap(), 0);
    }

    #[test]
    fn test_unreadable_download_dir_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("downloads");
        fs::write(&not_a_dir, b"x").unwrap();
        let err = count_xlsx_files(&not_a_dir).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
        assert!(err.to_string().contains("download dir"));
    }

    #[test]
    fn test_latest_on_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = latest_xlsx_file(dir.path()).unwrap_err();
        assert!(matches!(err, EtlError::NoDownloadedFile(_)));
    }

    #[tokio::test]
    async fn test_times_out_without_new_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.xlsx"), b"x").unwrap();
        let err = wait_for_new_file(dir.path(), 1, Duration::from_millis(150), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::DownloadTimeout { .. }));
    }

    #[tokio::test]
    async fn test_detects_new_download_and_picks_it() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("previous_period.xlsx"), b"old").unwrap();
        let baseline = count_xlsx_files(dir.path()).unwrap();
        assert_eq!(baseline, 1);

        let target = dir.path().join("ResumenCuadros_2019_07.xlsx");
        let writer_target = target.clone();
        let writer = tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            fs::write(writer_target, b"new").unwrap();
        });

        wait_for_new_file(dir.path(), baseline, Duration::from_secs(5), Duration::from_millis(20))
            .await
            .unwrap();
        writer.await.unwrap();

        assert_eq!(count_xlsx_files(dir.path()).unwrap(), baseline + 1);
        assert_eq!(latest_xlsx_file(dir.path()).unwrap(), target);
    }
}
