//! Pulls the embedded business table out of the report worksheet.

use crate::error::EtlError;
use crate::models::{BUSINESS_COLUMN_COUNT, ExtractedTable, HeaderRow, RawSheet};
use calamine::{Data, Reader, open_workbook_auto};
use std::path::Path;
use tracing::{debug, info, warn};

/// A header row has more non-empty cells than this.
const HEADER_MIN_CELLS: usize = 9;
/// First business column (0-based); the table starts in column B.
const FIRST_COLUMN: usize = 1;
/// Rows with fewer non-empty business values are dropped.
const MIN_ROW_VALUES: usize = 5;

/// Read `sheet` from the workbook at `path`, every cell as text.
///
/// Cell positions are absolute: leading empty rows and columns are kept so
/// that column B is always index 1.
pub fn read_sheet(path: &Path, sheet: &str) -> Result<RawSheet, EtlError> {
    let fail = |reason: String| EtlError::ExtractionFailed {
        path: path.to_path_buf(),
        reason,
    };

    let mut workbook = open_workbook_auto(path).map_err(|e| fail(e.to_string()))?;
    let range = workbook
        .worksheet_range(sheet)
        .map_err(|e| fail(format!("sheet {:?}: {}", sheet, e)))?;

    let (row_offset, col_offset) = range
        .start()
        .map(|(r, c)| (r as usize, c as usize))
        .unwrap_or((0, 0));

    let mut grid: RawSheet = vec![Vec::new(); row_offset];
    for row in range.rows() {
        let mut cells = vec![None; col_offset];
        cells.extend(row.iter().map(cell_text));
        grid.push(cells);
    }
    debug!("{:?}/{}: {} rows read", path, sheet, grid.len());
    Ok(grid)
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) if s.is_empty() => None,
        Data::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn non_empty(cells: &[Option<String>]) -> usize {
    cells.iter().filter(|c| c.is_some()).count()
}

/// First row with more than nine non-empty cells.
pub fn find_header_row(sheet: &RawSheet) -> HeaderRow {
    sheet
        .iter()
        .position(|row| non_empty(row) > HEADER_MIN_CELLS)
        .map(HeaderRow::Detected)
        .unwrap_or(HeaderRow::Fallback)
}

/// Slice the ten business columns below the header and drop sparse rows.
pub fn extract_table(sheet: &RawSheet) -> ExtractedTable {
    let header = find_header_row(sheet);
    if header == HeaderRow::Fallback {
        warn!("No header row found; assuming row 0, output may include headings or be empty");
    }

    let rows: Vec<[Option<String>; BUSINESS_COLUMN_COUNT]> = sheet
        .iter()
        .skip(header.index() + 1)
        .map(|row| {
            std::array::from_fn(|i| row.get(FIRST_COLUMN + i).cloned().flatten())
        })
        .filter(|cells: &[Option<String>; BUSINESS_COLUMN_COUNT]| non_empty(cells) >= MIN_ROW_VALUES)
        .collect();

    ExtractedTable { header, rows }
}

/// Read and extract the business table from a downloaded report.
pub fn extract_from_file(path: &Path, sheet: &str) -> Result<ExtractedTable, EtlError> {
    let raw = read_sheet(path, sheet)?;
    let table = extract_table(&raw);
    info!(
        "{:?}: header at row {:?}, {} data rows",
        path.file_name().unwrap_or_default(),
        table.header,
        table.rows.len()
    );
    Ok(table)
}
