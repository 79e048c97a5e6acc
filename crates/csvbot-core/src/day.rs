use chrono::{Local, NaiveDate};

use crate::{config::Config, errors::Error, Result};

/// Sequential day numbering anchored at a fixed calendar date.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DayCalendar {
    base_date: NaiveDate,
    base_number: i64,
}

impl DayCalendar {
    pub fn new(base_date: NaiveDate, base_number: i64) -> Self {
        Self {
            base_date,
            base_number,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.day_base_date, cfg.day_base_number)
    }

    /// `base_number + (date - base_date).days`. Dates before the base go negative.
    pub fn number_for(&self, date: NaiveDate) -> i64 {
        self.base_number + date.signed_duration_since(self.base_date).num_days()
    }

    /// Day number for the server's local calendar date.
    pub fn today(&self) -> i64 {
        self.number_for(Local::now().date_naive())
    }
}

/// Parse the integer argument of `/day` or `/unit`.
pub fn parse_day_arg(raw: &str) -> Result<i64> {
    let raw = raw.trim();
    raw.parse::<i64>()
        .map_err(|_| Error::InvalidArgument(format!("'{raw}' is not an integer")))
}
