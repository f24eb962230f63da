use crate::models::{ExtractedTable, Period, StagingRow};
use chrono::{Local, NaiveDateTime};

/// `YYYY-MM-DDTHH:MM:SS`, the format of the `FechaCreacion` column.
pub const CREATION_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

fn trim_cell(cell: &Option<String>) -> Option<String> {
    cell.as_deref().map(|s| s.trim().to_string())
}

/// Trim every cell, name the columns and stamp period and capture time.
pub fn normalize(table: &ExtractedTable, period: &Period, created_at: NaiveDateTime) -> Vec<StagingRow> {
    let periodo = format!("{}-{}", period.year_str(), period.month_code());
    let fecha_creacion = created_at.format(CREATION_TIMESTAMP_FORMAT).to_string();

    table
        .rows
        .iter()
        .map(|r| {
            let [
                empresa,
                barra_transferencia,
                tipo_usuario,
                tipo_contrato,
                entrega_retiro,
                cliente_central_generacion,
                energia_mwh,
                valorizacion_soles,
                renta_congestion_licitacion,
                renta_congestion_bilateral,
            ] = r.each_ref().map(trim_cell);

            StagingRow {
                empresa,
                barra_transferencia,
                tipo_usuario,
                tipo_contrato,
                entrega_retiro,
                cliente_central_generacion,
                energia_mwh,
                valorizacion_soles,
                renta_congestion_licitacion,
                renta_congestion_bilateral,
                periodo: periodo.clone(),
                fecha_creacion: fecha_creacion.clone(),
            }
        })
        .collect()
}

/// [`normalize`] stamped with the current local time.
pub fn normalize_now(table: &ExtractedTable, period: &Period) -> Vec<StagingRow> {
    normalize(table, period, Local::now().naive_local())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HeaderRow;

    fn table(values: [&str; 10]) -> ExtractedTable {
        ExtractedTable {
            header: HeaderRow::Detected(7),
            rows: vec![values.map(|v| Some(v.to_string()))],
        }
    }

    #[test]
    fn test_normalize_trims_and_stamps() {
        let t = table(["  ACME ", "B1", "T1", "C1", "E1", "G1", "100", "200", "10", "5"]);
        let period = Period::new(2021, 3).unwrap();
        let rows = normalize_now(&t, &period);

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.empresa.as_deref(), Some("ACME"));
        assert_eq!(row.barra_transferencia.as_deref(), Some("B1"));
        assert_eq!(row.energia_mwh.as_deref(), Some("100"));
        assert_eq!(row.renta_congestion_bilateral.as_deref(), Some("5"));
        assert_eq!(row.periodo, "2021-03");
        assert!(
            NaiveDateTime::parse_from_str(&row.fecha_creacion, CREATION_TIMESTAMP_FORMAT).is_ok(),
            "bad timestamp {}",
            row.fecha_creacion
        );
        assert_eq!(row.fecha_creacion.len(), 19);
    }

    #[test]
    fn test_normalize_keeps_empty_cells_empty() {
        let mut t = table(["X", "B", "T", "C", "E", "G", "1", "2", "3", "4"]);
        t.rows[0][5] = None;
        t.rows[0][6] = Some("   ".into());
        let created = NaiveDateTime::parse_from_str("2024-01-31T23:59:58", CREATION_TIMESTAMP_FORMAT).unwrap();
        let rows = normalize(&t, &Period::new(2023, 12).unwrap(), created);
        assert_eq!(rows[0].cliente_central_generacion, None);
        assert_eq!(rows[0].energia_mwh.as_deref(), Some(""));
        assert_eq!(rows[0].fecha_creacion, "2024-01-31T23:59:58");
        assert_eq!(rows[0].periodo, "2023-12");
    }
}
