use crate::error::EtlError;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Period ────────────────────────────────────────────────────────────────────

/// One unit of ETL work: a calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self, EtlError> {
        if !(1..=12).contains(&month) {
            return Err(EtlError::InvalidPeriod(format!("{}-{}", year, month)));
        }
        Ok(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    #[cfg(test)]
    pub fn year(&self) -> i32 {
        self.year
    }

    /// Year as the portal shows it, e.g. "2019".
    pub fn year_str(&self) -> String {
        self.year.to_string()
    }

    /// Two-digit month code, e.g. "07".
    pub fn month_code(&self) -> String {
        format!("{:02}", self.month)
    }

    /// The following calendar month.
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    /// Every period from `start` to `end`, both inclusive.
    pub fn range_inclusive(start: Period, end: Period) -> Vec<Period> {
        let mut out = Vec::new();
        let mut current = start;
        while current <= end {
            out.push(current);
            current = current.next();
        }
        out
    }
}

/// `"{year}-{month code}"`, the tag persisted in the `Periodo` column.
impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EtlError::InvalidPeriod(s.to_string());
        let (y, m) = s.trim().split_once('-').ok_or_else(invalid)?;
        if m.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = y.parse().map_err(|_| invalid())?;
        let month: u32 = m.parse().map_err(|_| invalid())?;
        Period::new(year, month).map_err(|_| invalid())
    }
}

impl TryFrom<String> for Period {
    type Error = EtlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(p: Period) -> Self {
        p.to_string()
    }
}

// ── Portal folders ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderKind {
    Revision,
    Monthly,
    Unknown,
}

/// A child folder as displayed on the current portal page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    pub label: String,
    pub kind: FolderKind,
    pub revision: Option<u32>,
}

/// A displayed label and how closely it matched the reference.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateMatch {
    pub label: String,
    pub score: f64,
}

// ── Extracted table ───────────────────────────────────────────────────────────

/// Raw worksheet contents, every cell read as text. `None` is an empty cell.
pub type RawSheet = Vec<Vec<Option<String>>>;

/// Number of business columns sliced out of the worksheet.
pub const BUSINESS_COLUMN_COUNT: usize = 10;

/// Column names of the staging table, in worksheet order.
pub const BUSINESS_COLUMNS: [&str; BUSINESS_COLUMN_COUNT] = [
    "Empresa",
    "BarraTransferencia",
    "TipoUsuario",
    "TipoContrato",
    "EntregaRetiro",
    "ClienteCentralGeneracion",
    "EnergiaMWh",
    "ValorizacionSoles",
    "RentaCongestionLicitacion",
    "RentaCongestionBilateral",
];

/// How the header row of the embedded table was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderRow {
    /// First row dense enough to be a header.
    Detected(usize),
    /// No row qualified; row 0 was assumed.
    Fallback,
}

impl HeaderRow {
    pub fn index(&self) -> usize {
        match self {
            HeaderRow::Detected(i) => *i,
            HeaderRow::Fallback => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedTable {
    pub header: HeaderRow,
    pub rows: Vec<[Option<String>; BUSINESS_COLUMN_COUNT]>,
}

// ── Staging row ───────────────────────────────────────────────────────────────

/// One persisted row of the staging table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct StagingRow {
    pub empresa: Option<String>,
    pub barra_transferencia: Option<String>,
    pub tipo_usuario: Option<String>,
    pub tipo_contrato: Option<String>,
    pub entrega_retiro: Option<String>,
    pub cliente_central_generacion: Option<String>,
    #[serde(rename = "EnergiaMWh")]
    pub energia_mwh: Option<String>,
    pub valorizacion_soles: Option<String>,
    pub renta_congestion_licitacion: Option<String>,
    pub renta_congestion_bilateral: Option<String>,
    pub periodo: String,
    pub fecha_creacion: String,
}
