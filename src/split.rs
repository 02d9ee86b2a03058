//! Weekday/weekend partition of a trip table.
//!
//! Rows keep their original shape and the header is copied to both outputs.
//! Rows missing either station id are dropped before classification.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use chrono::{Datelike, NaiveDate, Weekday};
use csv::{ReaderBuilder, WriterBuilder};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::flow::{DEFAULT_DESTINATION_COLUMN, DEFAULT_ORIGIN_COLUMN};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SplitCounts {
    pub weekday: u64,
    pub weekend: u64,
    pub dropped: u64,
}

/// Column layout used to classify trips by checkout day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaySplit {
    pub date_column: usize,
    pub origin_column: usize,
    pub destination_column: usize,
}

impl Default for DaySplit {
    fn default() -> Self {
        DaySplit {
            date_column: 0,
            origin_column: DEFAULT_ORIGIN_COLUMN,
            destination_column: DEFAULT_DESTINATION_COLUMN,
        }
    }
}

impl DaySplit {
    #[tracing::instrument(skip_all, fields(input = %input.as_ref().display()))]
    pub fn split_paths(
        &self,
        input: impl AsRef<Path>,
        weekday: impl AsRef<Path>,
        weekend: impl AsRef<Path>,
    ) -> Result<SplitCounts> {
        let counts = self.split_reader(
            File::open(input.as_ref())?,
            File::create(weekday.as_ref())?,
            File::create(weekend.as_ref())?,
        )?;
        info!(
            weekday = counts.weekday,
            weekend = counts.weekend,
            dropped = counts.dropped,
            "Trips split by checkout day"
        );
        Ok(counts)
    }

    pub fn split_reader<R: Read, D: Write, E: Write>(
        &self,
        input: R,
        weekday: D,
        weekend: E,
    ) -> Result<SplitCounts> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(input);
        let mut weekday_out = WriterBuilder::new().flexible(true).from_writer(weekday);
        let mut weekend_out = WriterBuilder::new().flexible(true).from_writer(weekend);

        let header = rdr.headers()?.clone();
        weekday_out.write_record(&header)?;
        weekend_out.write_record(&header)?;

        let mut counts = SplitCounts::default();
        for result in rdr.records() {
            let record = result?;
            let line = record.position().map_or(0, |p| p.line());

            let has_station =
                |column: usize| record.get(column).is_some_and(|f| !f.trim().is_empty());
            if !has_station(self.origin_column) || !has_station(self.destination_column) {
                debug!(line, "Dropping trip without both station ids");
                counts.dropped += 1;
                continue;
            }

            let date = parse_date(line, record.get(self.date_column).unwrap_or(""))?;
            if is_weekend(date) {
                weekend_out.write_record(&record)?;
                counts.weekend += 1;
            } else {
                weekday_out.write_record(&record)?;
                counts.weekday += 1;
            }
        }

        weekday_out.flush()?;
        weekend_out.flush()?;
        Ok(counts)
    }
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Parses the date part of a checkout timestamp. Anything after the first
/// whitespace (a time of day) is ignored.
pub fn parse_date(line: u64, value: &str) -> Result<NaiveDate> {
    let day = value.split_whitespace().next().unwrap_or("");
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(day, fmt).ok())
        .ok_or_else(|| Error::Date {
            line,
            value: value.to_string(),
        })
}
