use crate::models::{Period, StagingRow};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use duckdb::{Connection, params};
use std::path::Path;
use tracing::{debug, info};

// ── Table contracts ───────────────────────────────────────────────────────────

pub const STAGING_TABLE: &str = "bronce.ValorizacionEnergia";
pub const PERIOD_DIM_TABLE: &str = "oro.Periodo";
pub const GENERALS_TABLE: &str = "plata.Generales";

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SCHEMA IF NOT EXISTS bronce;
CREATE SCHEMA IF NOT EXISTS plata;
CREATE SCHEMA IF NOT EXISTS oro;

CREATE TABLE IF NOT EXISTS bronce.ValorizacionEnergia (
    Empresa                     VARCHAR,
    BarraTransferencia          VARCHAR,
    TipoUsuario                 VARCHAR,
    TipoContrato                VARCHAR,
    EntregaRetiro               VARCHAR,
    ClienteCentralGeneracion    VARCHAR,
    EnergiaMWh                  VARCHAR,
    ValorizacionSoles           VARCHAR,
    RentaCongestionLicitacion   VARCHAR,
    RentaCongestionBilateral    VARCHAR,
    Periodo                     VARCHAR NOT NULL,
    FechaCreacion               VARCHAR NOT NULL
);

CREATE TABLE IF NOT EXISTS oro.Periodo (
    Periodo     VARCHAR PRIMARY KEY,
    Fecha       DATE NOT NULL
);

CREATE TABLE IF NOT EXISTS plata.Generales (
    IdVariablesGlobales VARCHAR PRIMARY KEY,
    Valor               VARCHAR
);

CREATE SEQUENCE IF NOT EXISTS etl_run_seq START 1;

CREATE TABLE IF NOT EXISTS etl_runs (
    id          INTEGER PRIMARY KEY DEFAULT nextval('etl_run_seq'),
    periodo     VARCHAR NOT NULL,
    started_at  TIMESTAMP NOT NULL,
    finished_at TIMESTAMP,
    status      VARCHAR NOT NULL DEFAULT 'running',
    rows_loaded INTEGER DEFAULT 0,
    error_msg   VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_staging_periodo ON bronce.ValorizacionEnergia (Periodo);
"#;

const INSERT_STAGING: &str = r#"
    INSERT INTO bronce.ValorizacionEnergia
        (Empresa, BarraTransferencia, TipoUsuario, TipoContrato, EntregaRetiro,
         ClienteCentralGeneracion, EnergiaMWh, ValorizacionSoles,
         RentaCongestionLicitacion, RentaCongestionBilateral, Periodo, FechaCreacion)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Cursor queries ────────────────────────────────────────────────────────

    /// Calendar date of the latest period present in the staging table.
    pub fn latest_loaded_date(&self) -> Result<Option<NaiveDate>> {
        let sql = format!(
            r#"SELECT MAX(tm.Fecha)
               FROM (SELECT DISTINCT Periodo FROM {staging}) AS pc
               INNER JOIN {dim} AS tm ON pc.Periodo = tm.Periodo"#,
            staging = STAGING_TABLE,
            dim = PERIOD_DIM_TABLE,
        );
        let date: Option<NaiveDate> = self
            .conn
            .query_row(&sql, [], |r| r.get(0))
            .context("latest loaded period query failed")?;
        Ok(date)
    }

    /// Calendar date of the period named by the `variable` row of the generals table.
    pub fn initial_period_date(&self, variable: &str) -> Result<Option<NaiveDate>> {
        let sql = format!(
            r#"SELECT tm.Fecha
               FROM {dim} AS tm
               INNER JOIN {generals} AS g ON tm.Periodo = g.Valor
               WHERE g.IdVariablesGlobales = ?"#,
            dim = PERIOD_DIM_TABLE,
            generals = GENERALS_TABLE,
        );
        match self.conn.query_row(&sql, params![variable], |r| r.get(0)) {
            Ok(date) => Ok(Some(date)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("initial period query failed"),
        }
    }

    // ── Staging rows ──────────────────────────────────────────────────────────

    /// Append rows as they are; re-running a period duplicates it.
    pub fn append_staging_rows(&self, rows: &[StagingRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.unchecked_transaction()?;
        insert_rows(&tx, rows)?;
        tx.commit()?;
        Ok(rows.len())
    }

    /// Delete `period`'s rows and append `rows` in one transaction.
    pub fn replace_period_rows(&self, period: &Period, rows: &[StagingRow]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let deleted = tx.execute(
            &format!("DELETE FROM {} WHERE Periodo = ?", STAGING_TABLE),
            params![period.to_string()],
        )?;
        if deleted > 0 {
            debug!("{}: removed {} previously loaded rows", period, deleted);
        }
        insert_rows(&tx, rows)?;
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn staging_count(&self) -> Result<i64> {
        let mut s = self
            .conn
            .prepare(&format!("SELECT COUNT(*) FROM {}", STAGING_TABLE))?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn period_row_count(&self, period: &Period) -> Result<i64> {
        let mut s = self.conn.prepare(&format!(
            "SELECT COUNT(*) FROM {} WHERE Periodo = ?",
            STAGING_TABLE
        ))?;
        Ok(s.query_row(params![period.to_string()], |r| r.get(0))?)
    }

    pub fn period_range(&self) -> Result<(Option<String>, Option<String>)> {
        let mut s = self.conn.prepare(&format!(
            "SELECT MIN(Periodo), MAX(Periodo) FROM {}",
            STAGING_TABLE
        ))?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    // ── Reference data ────────────────────────────────────────────────────────

    /// Ensure the period dimension holds every month from `from` to `to`.
    pub fn seed_period_dimension(&self, from: Period, to: Period) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;
        for period in Period::range_inclusive(from, to) {
            let date = period
                .first_day()
                .with_context(|| format!("no first day for {}", period))?;
            inserted += tx.execute(
                &format!(
                    "INSERT INTO {} (Periodo, Fecha) VALUES (?, ?) ON CONFLICT (Periodo) DO NOTHING",
                    PERIOD_DIM_TABLE
                ),
                params![period.to_string(), date],
            )?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn set_general(&self, id: &str, value: &str) -> Result<()> {
        self.conn.execute(
            &format!(
                r#"INSERT INTO {} (IdVariablesGlobales, Valor) VALUES (?, ?)
                   ON CONFLICT (IdVariablesGlobales) DO UPDATE SET Valor = excluded.Valor"#,
                GENERALS_TABLE
            ),
            params![id, value],
        )?;
        Ok(())
    }

    // ── Run log ───────────────────────────────────────────────────────────────

    pub fn begin_run(&self, period: &Period) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            "INSERT INTO etl_runs (periodo, started_at, status) VALUES (?, ?, 'running') RETURNING id",
            params![period.to_string(), Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_run(&self, run_id: i64, rows: usize, error: Option<&str>) -> Result<()> {
        self.conn.execute(
            r#"UPDATE etl_runs SET
               finished_at = ?, status = ?, rows_loaded = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                rows as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    /// Period and status of the most recent run.
    pub fn last_run(&self) -> Result<Option<(String, String)>> {
        match self.conn.query_row(
            "SELECT periodo, status FROM etl_runs ORDER BY id DESC LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        ) {
            Ok(run) => Ok(Some(run)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn insert_rows(tx: &duckdb::Transaction<'_>, rows: &[StagingRow]) -> Result<()> {
    for row in rows {
        tx.execute(
            INSERT_STAGING,
            params![
                row.empresa,
                row.barra_transferencia,
                row.tipo_usuario,
                row.tipo_contrato,
                row.entrega_retiro,
                row.cliente_central_generacion,
                row.energia_mwh,
                row.valorizacion_soles,
                row.renta_congestion_licitacion,
                row.renta_congestion_bilateral,
                row.periodo,
                row.fecha_creacion,
            ],
        )
        .with_context(|| format!("insert {} row {:?}", row.periodo, row.empresa))?;
    }
    Ok(())
}
