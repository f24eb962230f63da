//! Pure selection rules over scraped labels. Nothing here touches the browser.

use super::matcher::{label_similarity, similarity};
use crate::config::RevisionOverride;
use crate::error::EtlError;
use crate::models::{CandidateMatch, FolderEntry, FolderKind};
use std::collections::{HashMap, VecDeque};

pub const REVISION_TOKEN: &str = "REVISION";
pub const MONTHLY_TOKEN: &str = "MENSUAL";
pub const REPORT_FILE_TOKEN: &str = "RESUMENCUADROS";

/// Scores must exceed this to count as a folder-kind or file-name match.
pub const MATCH_THRESHOLD: f64 = 0.90;

const MONTH_NAMES: [(&str, &str); 12] = [
    ("01", "ENERO"),
    ("02", "FEBRERO"),
    ("03", "MARZO"),
    ("04", "ABRIL"),
    ("05", "MAYO"),
    ("06", "JUNIO"),
    ("07", "JULIO"),
    ("08", "AGOSTO"),
    ("09", "SEPTIEMBRE"),
    ("10", "OCTUBRE"),
    ("11", "NOVIEMBRE"),
    ("12", "DICIEMBRE"),
];

/// Canonical month name for a two-digit month code.
pub fn month_name(code: &str) -> Result<&'static str, EtlError> {
    MONTH_NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
        .ok_or_else(|| EtlError::UnknownMonth(code.to_string()))
}

/// Best matching month folder label; the first label wins ties.
pub fn select_month(code: &str, labels: &[String]) -> Result<CandidateMatch, EtlError> {
    let reference = month_name(code)?;
    let mut best: Option<CandidateMatch> = None;
    for label in labels {
        let score = label_similarity(reference, label);
        if best.as_ref().is_none_or(|b| score > b.score) {
            best = Some(CandidateMatch {
                label: label.clone(),
                score,
            });
        }
    }
    best.ok_or_else(|| EtlError::UnexpectedPage(format!("no month folders listed for {}", reference)))
}

pub fn classify_folder(label: &str) -> FolderEntry {
    let kind = if label_similarity(REVISION_TOKEN, label) > MATCH_THRESHOLD {
        FolderKind::Revision
    } else if label_similarity(MONTHLY_TOKEN, label) > MATCH_THRESHOLD {
        FolderKind::Monthly
    } else {
        FolderKind::Unknown
    };
    let revision = match kind {
        FolderKind::Revision => revision_number(label),
        _ => None,
    };
    FolderEntry {
        label: label.to_string(),
        kind,
        revision,
    }
}

/// Digits of the label read as one number, leading zeros dropped.
fn revision_number(label: &str) -> Option<u32> {
    let digits: String = label.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// The file whose first two name tokens spell "ResumenCuadros".
pub fn identify_report_file(names: &[String]) -> Option<String> {
    names
        .iter()
        .find(|name| {
            let spaced = name.replace(['_', '-'], " ");
            let mut words = spaced.split_whitespace();
            match (words.next(), words.next()) {
                (Some(first), Some(second)) => {
                    let combined = format!("{}{}", first, second).to_uppercase();
                    similarity(REPORT_FILE_TOKEN, &combined) > MATCH_THRESHOLD
                }
                _ => false,
            }
        })
        .cloned()
}

// ── Revision worklist ─────────────────────────────────────────────────────────

/// Remaining folders to try inside a month, highest revision first.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionWorklist {
    revisions: VecDeque<FolderEntry>,
    monthly: Option<String>,
}

impl RevisionWorklist {
    pub fn from_labels(labels: &[String]) -> Self {
        let mut revisions = Vec::new();
        let mut monthly = None;
        for entry in labels.iter().map(|l| classify_folder(l)) {
            match entry.kind {
                FolderKind::Revision => revisions.push(entry),
                FolderKind::Monthly if monthly.is_none() => monthly = Some(entry.label),
                _ => {}
            }
        }
        // Stable: equal versions keep their page order.
        revisions.sort_by(|a, b| b.revision.cmp(&a.revision));
        Self {
            revisions: revisions.into(),
            monthly,
        }
    }

    /// Highest remaining revision, removed from the worklist.
    pub fn next_revision(&mut self) -> Option<FolderEntry> {
        self.revisions.pop_front()
    }

    pub fn remaining(&self) -> usize {
        self.revisions.len()
    }

    pub fn monthly(&self) -> Option<&str> {
        self.monthly.as_deref()
    }
}

// ── Overrides ─────────────────────────────────────────────────────────────────

/// Revision labels forced for specific (year, month label) pairs.
#[derive(Debug, Clone, Default)]
pub struct RevisionOverrides {
    table: HashMap<(String, String), String>,
}

impl RevisionOverrides {
    pub fn new(entries: &[RevisionOverride]) -> Self {
        let table = entries
            .iter()
            .map(|o| {
                (
                    (o.year.clone(), o.month_label.clone()),
                    o.revision_label.clone(),
                )
            })
            .collect();
        Self { table }
    }

    pub fn lookup(&self, year: &str, month_label: &str) -> Option<&str> {
        self.table
            .get(&(year.to_string(), month_label.to_string()))
            .map(String::as_str)
    }

    /// The label to click: the override if one exists, otherwise `selected`.
    pub fn resolve<'a>(&'a self, year: &str, month_label: &str, selected: &'a str) -> &'a str {
        self.lookup(year, month_label).unwrap_or(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_month_table_is_total_and_injective() {
        let mut seen = std::collections::HashSet::new();
        for m in 1..=12 {
            let name = month_name(&format!("{:02}", m)).unwrap();
            assert!(seen.insert(name));
        }
        assert!(matches!(month_name("13"), Err(EtlError::UnknownMonth(_))));
        assert!(matches!(month_name("7"), Err(EtlError::UnknownMonth(_))));
    }

    #[test]
    fn test_select_month_fuzzy() {
        let shown = labels(&["07_Julio 2019", "08_Agosto 2019", "09_Setiembre 2019"]);
        assert_eq!(select_month("08", &shown).unwrap().label, "08_Agosto 2019");
        assert_eq!(select_month("09", &shown).unwrap().label, "09_Setiembre 2019");
        assert!(matches!(
            select_month("08", &[]),
            Err(EtlError::UnexpectedPage(_))
        ));
    }

    #[test]
    fn test_classify_folders() {
        let rev = classify_folder("Revisión 02");
        assert_eq!(rev.kind, FolderKind::Revision);
        assert_eq!(rev.revision, Some(2));
        assert_eq!(classify_folder("Mensual").kind, FolderKind::Monthly);
        assert_eq!(classify_folder("Anexos").kind, FolderKind::Unknown);
        assert_eq!(classify_folder("Revision 10").revision, Some(10));
    }

    #[test]
    fn test_worklist_orders_revisions_descending() {
        let mut wl =
            RevisionWorklist::from_labels(&labels(&["Revisión 01", "Mensual", "Revisión 03", "Revisión 02"]));
        assert_eq!(wl.monthly(), Some("Mensual"));
        let order: Vec<u32> = std::iter::from_fn(|| wl.next_revision())
            .filter_map(|e| e.revision)
            .collect();
        assert_eq!(order, vec![3, 2, 1]);
        assert_eq!(wl.remaining(), 0);
    }

    #[test]
    fn test_identify_report_file() {
        let names = labels(&[
            "Cuadros_Anexos_2019.xlsx",
            "Resumen-Cuadros_VTEA_07_2019.xlsx",
            "ResumenCuadros_final.xlsx",
        ]);
        assert_eq!(
            identify_report_file(&names).as_deref(),
            Some("Resumen-Cuadros_VTEA_07_2019.xlsx")
        );
        assert_eq!(identify_report_file(&labels(&["Resumen.xlsx", "Otro archivo"])), None);
    }

    #[test]
    fn test_override_table() {
        let overrides = RevisionOverrides::new(&[RevisionOverride {
            year: "2018".into(),
            month_label: "08_Agosto 2018".into(),
            revision_label: "Revisión 01".into(),
        }]);
        assert_eq!(
            overrides.resolve("2018", "08_Agosto 2018", "Revisión 03"),
            "Revisión 01"
        );
        assert_eq!(
            overrides.resolve("2019", "08_Agosto 2019", "Revisión 03"),
            "Revisión 03"
        );
    }
}
