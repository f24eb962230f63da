use crate::error::EtlError;
use crate::models::Period;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Portal navigation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortalConfig {
    #[serde(default = "default_portal_url")]
    pub url: String,

    /// Endpoint of a running chromedriver.
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,

    #[serde(default)]
    pub headless: bool,

    #[serde(default = "default_root_path")]
    pub root_path: String,

    #[serde(default = "default_category_folder")]
    pub category_folder: String,

    #[serde(default = "default_settlement_folder")]
    pub settlement_folder: String,

    #[serde(default = "default_click_timeout_secs")]
    pub click_timeout_secs: u64,

    #[serde(default = "default_click_attempts")]
    pub click_attempts: u32,

    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    #[serde(default = "default_delay_min_ms")]
    pub delay_min_ms: u64,

    #[serde(default = "default_delay_max_ms")]
    pub delay_max_ms: u64,

    #[serde(default = "default_revision_overrides")]
    pub revision_overrides: Vec<RevisionOverride>,
}

/// Forces the revision folder label for one (year, month label) pair.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RevisionOverride {
    pub year: String,
    pub month_label: String,
    pub revision_label: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,

    /// Id in the generals table holding the first period to load.
    #[serde(default = "default_initial_period_variable")]
    pub initial_period_variable: String,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    #[serde(default = "default_download_poll_ms")]
    pub download_poll_ms: u64,

    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,

    #[serde(default)]
    pub backfill_from: Option<Period>,

    #[serde(default)]
    pub backfill_to: Option<Period>,

    #[serde(default = "default_period_pause_ms")]
    pub period_pause_ms: u64,

    /// Delete a period's existing rows before appending it again.
    #[serde(default)]
    pub replace_existing_period: bool,

    #[serde(default)]
    pub stop_on_error: bool,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_portal_url() -> String {
    "https://www.coes.org.pe/Portal/mercadomayorista/liquidaciones".to_string()
}
fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}
fn default_root_path() -> String {
    "Mercado Mayorista/Liquidaciones del MME".to_string()
}
fn default_category_folder() -> String {
    "01 Mercado de Corto Plazo".to_string()
}
fn default_settlement_folder() -> String {
    "Liquidaciones VTEA".to_string()
}
fn default_click_timeout_secs() -> u64 {
    10
}
fn default_click_attempts() -> u32 {
    5
}
fn default_retry_interval_ms() -> u64 {
    500
}
fn default_delay_min_ms() -> u64 {
    2000
}
fn default_delay_max_ms() -> u64 {
    5000
}
fn default_revision_overrides() -> Vec<RevisionOverride> {
    // Portal inconsistency: 2018-08 must be read from "Revisión 01".
    vec![RevisionOverride {
        year: "2018".to_string(),
        month_label: "08_Agosto 2018".to_string(),
        revision_label: "Revisión 01".to_string(),
    }]
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/vtea.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_initial_period_variable() -> String {
    "VAR01".to_string()
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("data/downloads")
}
fn default_download_timeout_secs() -> u64 {
    60
}
fn default_download_poll_ms() -> u64 {
    500
}
fn default_sheet_name() -> String {
    "CUADRO 4".to_string()
}
fn default_period_pause_ms() -> u64 {
    3000
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            url: default_portal_url(),
            webdriver_url: default_webdriver_url(),
            headless: false,
            root_path: default_root_path(),
            category_folder: default_category_folder(),
            settlement_folder: default_settlement_folder(),
            click_timeout_secs: default_click_timeout_secs(),
            click_attempts: default_click_attempts(),
            retry_interval_ms: default_retry_interval_ms(),
            delay_min_ms: default_delay_min_ms(),
            delay_max_ms: default_delay_max_ms(),
            revision_overrides: default_revision_overrides(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
            initial_period_variable: default_initial_period_variable(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            download_timeout_secs: default_download_timeout_secs(),
            download_poll_ms: default_download_poll_ms(),
            sheet_name: default_sheet_name(),
            backfill_from: None,
            backfill_to: None,
            period_pause_ms: default_period_pause_ms(),
            replace_existing_period: false,
            stop_on_error: false,
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides, then validate it.
    pub fn load() -> Result<Self, EtlError> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("VTEA").separator("__"))
            .build()
            .map_err(|e| EtlError::Config(e.to_string()))?;

        let app_cfg: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| EtlError::Config(e.to_string()))?;
        app_cfg.validate()?;
        Ok(app_cfg)
    }

    pub fn validate(&self) -> Result<(), EtlError> {
        let p = &self.portal;
        if p.click_attempts == 0 {
            return Err(EtlError::Config("portal.click_attempts must be >= 1".into()));
        }
        if p.delay_min_ms > p.delay_max_ms {
            return Err(EtlError::Config(format!(
                "portal.delay_min_ms ({}) exceeds portal.delay_max_ms ({})",
                p.delay_min_ms, p.delay_max_ms
            )));
        }
        url::Url::parse(&p.url)
            .map_err(|e| EtlError::Config(format!("portal.url: {}", e)))?;
        url::Url::parse(&p.webdriver_url)
            .map_err(|e| EtlError::Config(format!("portal.webdriver_url: {}", e)))?;

        if self.pipeline.download_dir.as_os_str().is_empty() {
            return Err(EtlError::Config("pipeline.download_dir is empty".into()));
        }
        if self.pipeline.download_poll_ms == 0 {
            return Err(EtlError::Config("pipeline.download_poll_ms must be > 0".into()));
        }
        if let (Some(from), Some(to)) = (self.pipeline.backfill_from, self.pipeline.backfill_to) {
            if from > to {
                return Err(EtlError::Config(format!(
                    "backfill range is empty: {} > {}",
                    from, to
                )));
            }
        }
        if self.storage.initial_period_variable.trim().is_empty() {
            return Err(EtlError::Config(
                "storage.initial_period_variable is empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.portal.click_attempts, 5);
        assert_eq!(cfg.portal.click_timeout_secs, 10);
        assert_eq!(cfg.pipeline.download_timeout_secs, 60);
        assert_eq!(cfg.portal.revision_overrides.len(), 1);
    }

    #[test]
    fn test_rejects_inverted_delay_range() {
        let mut cfg = AppConfig::default();
        cfg.portal.delay_min_ms = 6000;
        assert!(matches!(cfg.validate(), Err(EtlError::Config(_))));
    }

    #[test]
    fn test_rejects_inverted_backfill_range() {
        let mut cfg = AppConfig::default();
        cfg.pipeline.backfill_from = Some(Period::new(2024, 12).unwrap());
        cfg.pipeline.backfill_to = Some(Period::new(2018, 1).unwrap());
        assert!(matches!(cfg.validate(), Err(EtlError::Config(_))));
    }

    #[test]
    fn test_deserializes_partial_toml() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [pipeline]
                download_dir = "/tmp/dl"
                backfill_from = "2018-01"
                backfill_to = "2024-12"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.pipeline.download_dir, PathBuf::from("/tmp/dl"));
        assert_eq!(cfg.pipeline.backfill_from, Some(Period::new(2018, 1).unwrap()));
        assert_eq!(cfg.portal.click_attempts, 5);
        assert!(cfg.validate().is_ok());
    }
}
