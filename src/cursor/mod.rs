//! Decides which period the next incremental run should fetch.

use crate::error::EtlError;
use crate::models::Period;
use crate::storage::Repository;
use chrono::NaiveDate;
use tracing::info;

/// Where the cursor reads already-loaded and configured periods from.
pub trait PeriodSource {
    fn latest_loaded_date(&self) -> anyhow::Result<Option<NaiveDate>>;
    fn initial_period_date(&self, variable: &str) -> anyhow::Result<Option<NaiveDate>>;
}

impl PeriodSource for Repository {
    fn latest_loaded_date(&self) -> anyhow::Result<Option<NaiveDate>> {
        Repository::latest_loaded_date(self)
    }

    fn initial_period_date(&self, variable: &str) -> anyhow::Result<Option<NaiveDate>> {
        Repository::initial_period_date(self, variable)
    }
}

pub struct IncrementalCursor<'a, S: PeriodSource> {
    source: &'a S,
    initial_variable: &'a str,
}

impl<'a, S: PeriodSource> IncrementalCursor<'a, S> {
    pub fn new(source: &'a S, initial_variable: &'a str) -> Self {
        Self {
            source,
            initial_variable,
        }
    }

    /// The month after the latest loaded one, or the configured start period.
    pub fn next_period(&self) -> Result<Period, EtlError> {
        if let Some(date) = self.source.latest_loaded_date()? {
            let next = Period::from_date(date).next();
            info!("Latest loaded period {}, next is {}", Period::from_date(date), next);
            return Ok(next);
        }

        match self.source.initial_period_date(self.initial_variable)? {
            Some(date) => {
                let start = Period::from_date(date);
                info!("Nothing loaded yet, starting at configured period {}", start);
                Ok(start)
            }
            None => Err(EtlError::Config(format!(
                "no loaded periods and no initial period under {:?}",
                self.initial_variable
            ))),
        }
    }
}
