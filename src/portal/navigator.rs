//! Walks the portal's folder tree down to the monthly report and clicks it.
//!
//! Market → settlement category → year → month → revision-or-monthly → file.
//! Revisions are tried newest first; a revision without the report file is
//! dropped and the navigator backs up to the month folder before trying the
//! next one. The monthly folder is the last resort.

use super::parsers::{parse_document_names, parse_folder_labels};
use super::selection::{RevisionOverrides, RevisionWorklist, identify_report_file, select_month};
use super::{Browser, BrowserError};
use crate::config::PortalConfig;
use crate::error::EtlError;
use crate::models::Period;
use std::time::Duration;
use tokio_retry::Retry;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, info, warn};

/// Where the report was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationOutcome {
    pub month_label: String,
    pub folder: String,
    pub file_name: String,
    pub backtracks: usize,
    pub used_monthly: bool,
}

#[derive(Debug)]
enum NavState {
    SelectCategory,
    SelectYear,
    SelectMonth,
    SelectRevisionOrMonthly,
    SelectFile { folder: String, is_revision: bool },
    Downloaded(NavigationOutcome),
}

// ── Locators ──────────────────────────────────────────────────────────────────

/// Element ids on the portal are the slash-joined folder path.
#[derive(Debug, Clone)]
pub struct PortalPaths {
    settlement: String,
    category: String,
}

impl PortalPaths {
    pub fn new(config: &PortalConfig) -> Self {
        let category = format!("{}/{}/", config.root_path.trim_end_matches('/'), config.category_folder);
        let settlement = format!("{}{}/", category, config.settlement_folder);
        Self {
            settlement,
            category,
        }
    }

    pub fn category(&self) -> String {
        any_with_id(&self.category)
    }

    pub fn settlement(&self) -> String {
        any_with_id(&self.settlement)
    }

    pub fn year(&self, year: &str) -> String {
        link_with_id(&format!("{}{}/", self.settlement, year))
    }

    pub fn month(&self, year: &str, month_label: &str) -> String {
        link_with_id(&format!("{}{}/{}/", self.settlement, year, month_label))
    }

    pub fn folder(&self, year: &str, month_label: &str, folder: &str) -> String {
        link_with_id(&format!("{}{}/{}/{}/", self.settlement, year, month_label, folder))
    }

    pub fn file(&self, year: &str, month_label: &str, folder: &str, file: &str) -> String {
        any_with_id(&format!(
            "{}{}/{}/{}/{}",
            self.settlement, year, month_label, folder, file
        ))
    }

    /// Breadcrumb link back to the month folder.
    pub fn back_to_month(&self, month_label: &str) -> String {
        format!("//a[text()={}]", xpath_literal(month_label))
    }
}

fn link_with_id(id: &str) -> String {
    format!("//a[@id={}]", xpath_literal(id))
}

fn any_with_id(id: &str) -> String {
    format!("//*[@id={}]", xpath_literal(id))
}

/// Quote `s` as an XPath string literal, whatever quotes it contains.
fn xpath_literal(s: &str) -> String {
    if !s.contains('"') {
        format!("\"{}\"", s)
    } else if !s.contains('\'') {
        format!("'{}'", s)
    } else {
        let parts: Vec<String> = s.split('"').map(|p| format!("\"{}\"", p)).collect();
        format!("concat({})", parts.join(", '\"', "))
    }
}

// ── Navigator ─────────────────────────────────────────────────────────────────

pub struct PortalNavigator<'a, B: Browser> {
    browser: &'a B,
    config: &'a PortalConfig,
    paths: PortalPaths,
    overrides: RevisionOverrides,
}

impl<'a, B: Browser> PortalNavigator<'a, B> {
    pub fn new(browser: &'a B, config: &'a PortalConfig) -> Self {
        Self {
            browser,
            config,
            paths: PortalPaths::new(config),
            overrides: RevisionOverrides::new(&config.revision_overrides),
        }
    }

    /// Navigate to the report for `period` and click its download link.
    pub async fn download_report(&self, period: &Period) -> Result<NavigationOutcome, EtlError> {
        let year = period.year_str();
        let month_code = period.month_code();

        self.browser
            .goto(&self.config.url)
            .await
            .map_err(|e| EtlError::UnexpectedPage(format!("open {}: {}", self.config.url, e)))?;

        let mut month_label = String::new();
        let mut worklist: Option<RevisionWorklist> = None;
        let mut backtracks = 0usize;
        let mut state = NavState::SelectCategory;

        loop {
            debug!("{}: {:?}", period, state);
            state = match state {
                NavState::SelectCategory => {
                    self.click("category", &self.paths.category()).await?;
                    self.click("settlement", &self.paths.settlement()).await?;
                    NavState::SelectYear
                }

                NavState::SelectYear => {
                    self.click("year", &self.paths.year(&year)).await?;
                    NavState::SelectMonth
                }

                NavState::SelectMonth => {
                    let labels = parse_folder_labels(&self.scrape().await?)?;
                    let chosen = select_month(&month_code, &labels)?;
                    info!("{}: month folder {:?} (score {:.3})", period, chosen.label, chosen.score);
                    self.click("month", &self.paths.month(&year, &chosen.label)).await?;

                    let folders = parse_folder_labels(&self.scrape().await?)?;
                    let wl = RevisionWorklist::from_labels(&folders);
                    info!(
                        "{}: {} revision folder(s), monthly folder: {:?}",
                        period,
                        wl.remaining(),
                        wl.monthly()
                    );
                    month_label = chosen.label;
                    worklist = Some(wl);
                    NavState::SelectRevisionOrMonthly
                }

                NavState::SelectRevisionOrMonthly => {
                    let wl = worklist
                        .as_mut()
                        .ok_or_else(|| EtlError::UnexpectedPage("month folder not opened".into()))?;

                    if let Some(revision) = wl.next_revision() {
                        let folder = self
                            .overrides
                            .resolve(&year, &month_label, &revision.label)
                            .to_string();
                        if folder != revision.label {
                            info!("{}: override {:?} → {:?}", period, revision.label, folder);
                        }
                        self.click("revision", &self.paths.folder(&year, &month_label, &folder))
                            .await?;
                        NavState::SelectFile {
                            folder,
                            is_revision: true,
                        }
                    } else if let Some(monthly) = wl.monthly().map(str::to_string) {
                        info!("{}: no revision has the report, falling back to {:?}", period, monthly);
                        self.click("monthly", &self.paths.folder(&year, &month_label, &monthly))
                            .await?;
                        NavState::SelectFile {
                            folder: monthly,
                            is_revision: false,
                        }
                    } else {
                        return Err(EtlError::NoReportFile {
                            period: period.to_string(),
                        });
                    }
                }

                NavState::SelectFile {
                    folder,
                    is_revision,
                } => {
                    let html = self.scrape().await?;
                    let names = match parse_document_names(&html) {
                        Ok(names) => names,
                        Err(e) if is_revision => {
                            warn!("{}: {:?} unreadable, treating as empty: {}", period, folder, e);
                            Vec::new()
                        }
                        Err(e) => return Err(e),
                    };

                    match identify_report_file(&names) {
                        Some(file_name) => {
                            info!("{}: downloading {:?} from {:?}", period, file_name, folder);
                            self.click(
                                "download",
                                &self.paths.file(&year, &month_label, &folder, &file_name),
                            )
                            .await?;
                            NavState::Downloaded(NavigationOutcome {
                                month_label: month_label.clone(),
                                folder,
                                file_name,
                                backtracks,
                                used_monthly: !is_revision,
                            })
                        }
                        None if is_revision => {
                            warn!("{}: no report in {:?}, backtracking", period, folder);
                            backtracks += 1;
                            self.click("backtrack", &self.paths.back_to_month(&month_label))
                                .await?;
                            NavState::SelectRevisionOrMonthly
                        }
                        None => {
                            return Err(EtlError::NoReportFile {
                                period: period.to_string(),
                            });
                        }
                    }
                }

                NavState::Downloaded(outcome) => return Ok(outcome),
            };
        }
    }

    /// Wait, scroll, click; retried up to `click_attempts` times in total.
    async fn click(&self, step: &str, locator: &str) -> Result<(), EtlError> {
        let attempts = self.config.click_attempts.max(1);
        let strategy = FixedInterval::from_millis(self.config.retry_interval_ms)
            .take(attempts as usize - 1);

        let mut attempt = 0u32;
        Retry::start(strategy, || {
            attempt += 1;
            self.try_click(step, locator, attempt, attempts)
        })
        .await
        .map_err(|_| EtlError::NavigationFailed {
            step: step.to_string(),
            locator: locator.to_string(),
            attempts,
        })
    }

    async fn try_click(
        &self,
        step: &str,
        locator: &str,
        attempt: u32,
        attempts: u32,
    ) -> Result<(), BrowserError> {
        let timeout = Duration::from_secs(self.config.click_timeout_secs);
        let result = async {
            let element = self.browser.wait_clickable(locator, timeout).await?;
            self.browser.scroll_into_view(&element).await?;
            self.browser.click(&element).await
        }
        .await;

        match &result {
            Ok(()) => debug!("Clicked {}: {}", step, locator),
            Err(e) => warn!("{} click attempt {}/{} failed: {}", step, attempt, attempts, e),
        }
        result
    }

    /// Politeness delay, then the rendered body.
    async fn scrape(&self) -> Result<String, EtlError> {
        self.polite_delay().await;
        self.browser
            .body_html()
            .await
            .map_err(|e| EtlError::UnexpectedPage(format!("read page body: {}", e)))
    }

    async fn polite_delay(&self) {
        let (min, max) = (self.config.delay_min_ms, self.config.delay_max_ms);
        if max == 0 {
            return;
        }
        let span = max.saturating_sub(min) as f64;
        let ms = min as f64 + span * rand::random::<f64>();
        tokio::time::sleep(Duration::from_millis(ms.round() as u64)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::ElementHandle;
    use crate::portal::parsers::fixtures::portal_page;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    /// Serves a scripted body for each clicked locator.
    #[derive(Default)]
    struct FakePortal {
        pages: HashMap<String, String>,
        dead: HashSet<String>,
        body: Mutex<String>,
        clicks: Mutex<Vec<String>>,
        waits: Mutex<Vec<String>>,
    }

    impl FakePortal {
        fn on_click(mut self, locator: String, body: String) -> Self {
            self.pages.insert(locator, body);
            self
        }

        fn clicks(&self) -> Vec<String> {
            self.clicks.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Browser for FakePortal {
        async fn goto(&self, _url: &str) -> Result<(), BrowserError> {
            *self.body.lock().unwrap() = String::new();
            Ok(())
        }

        async fn wait_clickable(
            &self,
            xpath: &str,
            timeout: Duration,
        ) -> Result<ElementHandle, BrowserError> {
            self.waits.lock().unwrap().push(xpath.to_string());
            if self.dead.contains(xpath) {
                return Err(BrowserError::Timeout {
                    locator: xpath.to_string(),
                    secs: timeout.as_secs(),
                });
            }
            Ok(ElementHandle(xpath.to_string()))
        }

        async fn scroll_into_view(&self, _element: &ElementHandle) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn click(&self, element: &ElementHandle) -> Result<(), BrowserError> {
            self.clicks.lock().unwrap().push(element.0.clone());
            if let Some(body) = self.pages.get(&element.0) {
                *self.body.lock().unwrap() = body.clone();
            }
            Ok(())
        }

        async fn body_html(&self) -> Result<String, BrowserError> {
            Ok(self.body.lock().unwrap().clone())
        }
    }

    fn test_config() -> PortalConfig {
        PortalConfig {
            delay_min_ms: 0,
            delay_max_ms: 0,
            retry_interval_ms: 0,
            ..PortalConfig::default()
        }
    }

    /// Portal with year `year`, month folder `month_label`, and the given
    /// child folders mapped to their file listings.
    fn portal(
        paths: &PortalPaths,
        year: &str,
        month_label: &str,
        folders: &[(&str, &[&str])],
    ) -> FakePortal {
        let month_page = portal_page(
            &folders.iter().map(|(f, _)| *f).collect::<Vec<_>>(),
            &[],
        );
        let mut fake = FakePortal::default()
            .on_click(
                paths.year(year),
                portal_page(&["06_Junio", month_label, "08_Agosto"], &[]),
            )
            .on_click(paths.month(year, month_label), month_page.clone())
            .on_click(paths.back_to_month(month_label), month_page);
        for (folder, files) in folders {
            fake = fake.on_click(
                paths.folder(year, month_label, folder),
                portal_page(&[], files),
            );
        }
        fake
    }

    #[tokio::test]
    async fn test_backtracks_to_next_revision() {
        let config = test_config();
        let paths = PortalPaths::new(&config);
        let fake = portal(
            &paths,
            "2019",
            "07_Julio",
            &[
                ("Revisión 01", &["Resumen_Cuadros_VTEA.xlsx"]),
                ("Revisión 02", &["Anexo_01.pdf"]),
                ("Mensual", &["Resumen_Cuadros_VTEA.xlsx"]),
            ],
        );
        let nav = PortalNavigator::new(&fake, &config);

        let outcome = assert_ok!(nav.download_report(&Period::new(2019, 7).unwrap()).await);
        assert_eq!(outcome.folder, "Revisión 01");
        assert_eq!(outcome.backtracks, 1);
        assert!(!outcome.used_monthly);

        let clicks = fake.clicks();
        assert!(clicks.iter().all(|c| !c.contains("Mensual")));
        let rev2 = clicks
            .iter()
            .position(|c| *c == paths.folder("2019", "07_Julio", "Revisión 02"))
            .unwrap();
        let rev1 = clicks
            .iter()
            .position(|c| *c == paths.folder("2019", "07_Julio", "Revisión 01"))
            .unwrap();
        assert!(rev2 < rev1);
        assert_eq!(
            clicks.last().unwrap(),
            &paths.file("2019", "07_Julio", "Revisión 01", "Resumen_Cuadros_VTEA.xlsx")
        );
    }

    #[tokio::test]
    async fn test_falls_back_to_monthly() {
        let config = test_config();
        let paths = PortalPaths::new(&config);
        let fake = portal(
            &paths,
            "2020",
            "03_Marzo",
            &[
                ("Revisión 01", &[]),
                ("Mensual", &["Resumen_Cuadros_03.xlsx"]),
            ],
        );
        let nav = PortalNavigator::new(&fake, &config);

        let outcome = assert_ok!(nav.download_report(&Period::new(2020, 3).unwrap()).await);
        assert!(outcome.used_monthly);
        assert_eq!(outcome.folder, "Mensual");
        assert_eq!(outcome.file_name, "Resumen_Cuadros_03.xlsx");
    }

    #[tokio::test]
    async fn test_no_report_anywhere() {
        let config = test_config();
        let paths = PortalPaths::new(&config);
        let fake = portal(&paths, "2020", "03_Marzo", &[("Revisión 01", &["Otro.xlsx"])]);
        let nav = PortalNavigator::new(&fake, &config);

        let err = assert_err!(nav.download_report(&Period::new(2020, 3).unwrap()).await);
        assert!(matches!(err, EtlError::NoReportFile { .. }));
    }

    #[tokio::test]
    async fn test_override_forces_revision_label() {
        let config = test_config();
        let paths = PortalPaths::new(&config);
        let fake = portal(
            &paths,
            "2018",
            "08_Agosto 2018",
            &[
                ("Revisión 01", &["Resumen_Cuadros_08.xlsx"]),
                ("Revisión 02", &["Resumen_Cuadros_08.xlsx"]),
            ],
        );
        let nav = PortalNavigator::new(&fake, &config);

        let outcome = assert_ok!(nav.download_report(&Period::new(2018, 8).unwrap()).await);
        assert_eq!(outcome.month_label, "08_Agosto 2018");
        assert_eq!(outcome.folder, "Revisión 01");
        assert_eq!(outcome.backtracks, 0);
        assert!(
            !fake
                .clicks()
                .contains(&paths.folder("2018", "08_Agosto 2018", "Revisión 02"))
        );
    }

    #[tokio::test]
    async fn test_click_gives_up_after_configured_attempts() {
        let config = test_config();
        let paths = PortalPaths::new(&config);
        let mut fake = FakePortal::default();
        fake.dead.insert(paths.category());
        let nav = PortalNavigator::new(&fake, &config);

        let err = assert_err!(nav.download_report(&Period::new(2019, 1).unwrap()).await);
        match err {
            EtlError::NavigationFailed { step, attempts, .. } => {
                assert_eq!(step, "category");
                assert_eq!(attempts, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fake.waits.lock().unwrap().len(), 5);
        assert!(fake.clicks().is_empty());
    }

    #[test]
    fn test_xpath_literal_quoting() {
        assert_eq!(xpath_literal("Revisión 01"), "\"Revisión 01\"");
        assert_eq!(xpath_literal("say \"hi\""), "'say \"hi\"'");
        assert_eq!(
            xpath_literal("a\"b'c"),
            "concat(\"a\", '\"', \"b'c\")"
        );
    }

    #[test]
    fn test_paths_follow_folder_hierarchy() {
        let paths = PortalPaths::new(&PortalConfig::default());
        assert_eq!(
            paths.category(),
            "//*[@id=\"Mercado Mayorista/Liquidaciones del MME/01 Mercado de Corto Plazo/\"]"
        );
        assert_eq!(
            paths.folder("2019", "07_Julio", "Mensual"),
            "//a[@id=\"Mercado Mayorista/Liquidaciones del MME/01 Mercado de Corto Plazo/Liquidaciones VTEA/2019/07_Julio/Mensual/\"]"
        );
        assert_eq!(paths.back_to_month("07_Julio"), "//a[text()=\"07_Julio\"]");
    }
}
