//! Station-to-station flow aggregation.
//!
//! Trip records are reduced to (origin, destination) station pairs and
//! counted into undirected buckets: a trip from A to B and a trip from B to A
//! land in the same bucket, keyed by whichever direction was seen first.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::ops::ControlFlow;
use std::path::Path;

use csv::ReaderBuilder;
use tracing::{debug, info, trace};

use crate::error::{Error, Result};

/// Station identifier as it appears in the trip table.
pub type StationId = u64;

/// Column of the checkout kiosk id in the merged trip table.
pub const DEFAULT_ORIGIN_COLUMN: usize = 3;
/// Column of the return kiosk id in the merged trip table.
pub const DEFAULT_DESTINATION_COLUMN: usize = 6;

/// An unordered station pair, stored in the direction it was first observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairKey {
    pub first: StationId,
    pub second: StationId,
}

impl PairKey {
    pub fn new(first: StationId, second: StationId) -> Self {
        PairKey { first, second }
    }

    pub fn reversed(self) -> Self {
        PairKey {
            first: self.second,
            second: self.first,
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.first, self.second)
    }
}

/// Distinct stations in first-seen order. A station's position is its vertex index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexSet {
    stations: Vec<StationId>,
    positions: HashMap<StationId, usize>,
}

impl VertexSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `station` if unseen and returns its index either way.
    pub(crate) fn insert(&mut self, station: StationId) -> usize {
        if let Some(&index) = self.positions.get(&station) {
            return index;
        }
        let index = self.stations.len();
        self.stations.push(station);
        self.positions.insert(station, index);
        index
    }

    pub fn index_of(&self, station: StationId) -> Option<usize> {
        self.positions.get(&station).copied()
    }

    pub fn station(&self, index: usize) -> Option<StationId> {
        self.stations.get(index).copied()
    }

    pub fn contains(&self, station: StationId) -> bool {
        self.positions.contains_key(&station)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn as_slice(&self) -> &[StationId] {
        &self.stations
    }

    pub fn iter(&self) -> impl Iterator<Item = StationId> + '_ {
        self.stations.iter().copied()
    }
}

impl FromIterator<StationId> for VertexSet {
    fn from_iter<I: IntoIterator<Item = StationId>>(iter: I) -> Self {
        let mut set = VertexSet::new();
        for station in iter {
            set.insert(station);
        }
        set
    }
}

/// Trip counts per undirected station pair, in discovery order.
///
/// Never holds both `(a, b)` and `(b, a)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowWeightTable {
    entries: Vec<(PairKey, u64)>,
    positions: HashMap<PairKey, usize>,
}

impl FlowWeightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one trip. The forward key wins, then the reverse key, and only
    /// then is a new bucket opened in the observed direction.
    pub(crate) fn record(&mut self, origin: StationId, destination: StationId) {
        let key = PairKey::new(origin, destination);
        let slot = self
            .positions
            .get(&key)
            .or_else(|| self.positions.get(&key.reversed()))
            .copied();

        match slot {
            Some(i) => self.entries[i].1 += 1,
            None => {
                self.positions.insert(key, self.entries.len());
                self.entries.push((key, 1));
            }
        }
    }

    /// Weight of the bucket keyed exactly by `key`.
    pub fn get(&self, key: PairKey) -> Option<u64> {
        self.positions.get(&key).map(|&i| self.entries[i].1)
    }

    /// Weight between two stations regardless of direction.
    pub fn weight_between(&self, a: StationId, b: StationId) -> Option<u64> {
        let key = PairKey::new(a, b);
        self.get(key).or_else(|| self.get(key.reversed()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (PairKey, u64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_weight(&self) -> u64 {
        self.entries.iter().map(|&(_, w)| w).sum()
    }
}

/// Output of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowSummary {
    pub vertices: VertexSet,
    pub flows: FlowWeightTable,
    /// Data rows consumed, self-loops included, the truncating row excluded.
    pub records_read: u64,
    pub self_loops: u64,
    /// Line of the blank-origin row that ended the scan, if any.
    pub truncated_at: Option<u64>,
}

/// Reads origin/destination station columns out of a trip table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowAggregator {
    pub origin_column: usize,
    pub destination_column: usize,
}

impl Default for FlowAggregator {
    fn default() -> Self {
        FlowAggregator {
            origin_column: DEFAULT_ORIGIN_COLUMN,
            destination_column: DEFAULT_DESTINATION_COLUMN,
        }
    }
}

impl FlowAggregator {
    pub fn new(origin_column: usize, destination_column: usize) -> Self {
        FlowAggregator {
            origin_column,
            destination_column,
        }
    }

    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn aggregate_path(&self, path: impl AsRef<Path>) -> Result<FlowSummary> {
        let file = std::fs::File::open(path.as_ref())?;
        self.aggregate_reader(file)
    }

    /// Aggregates a CSV trip table. The first row is treated as a header.
    pub fn aggregate_reader<R: Read>(&self, reader: R) -> Result<FlowSummary> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let mut acc = Accumulator::new(*self);
        for result in rdr.records() {
            let record = result?;
            let line = record.position().map_or(0, |p| p.line());
            let origin = record.get(self.origin_column);
            let destination = record.get(self.destination_column);
            if acc.observe(line, origin, destination)?.is_break() {
                break;
            }
        }
        Ok(acc.finish())
    }

    /// Aggregates pre-split (origin, destination) fields. Line numbers in
    /// errors count the first item as line 2, as if a header preceded it.
    pub fn aggregate_fields<'a, I>(&self, rows: I) -> Result<FlowSummary>
    where
        I: IntoIterator<Item = (Option<&'a str>, Option<&'a str>)>,
    {
        let mut acc = Accumulator::new(*self);
        for (line, (origin, destination)) in (2u64..).zip(rows) {
            if acc.observe(line, origin, destination)?.is_break() {
                break;
            }
        }
        Ok(acc.finish())
    }
}

struct Accumulator {
    columns: FlowAggregator,
    summary: FlowSummary,
}

impl Accumulator {
    fn new(columns: FlowAggregator) -> Self {
        Accumulator {
            columns,
            summary: FlowSummary::default(),
        }
    }

    fn observe(
        &mut self,
        line: u64,
        origin: Option<&str>,
        destination: Option<&str>,
    ) -> Result<ControlFlow<()>> {
        // An empty origin marks the end of useful data. Whitespace-only
        // fields are not empty and fall through to a parse error.
        let origin = match origin {
            Some(field) if !field.is_empty() => field,
            _ => {
                info!(line, "Blank origin station, ignoring the rest of the input");
                self.summary.truncated_at = Some(line);
                return Ok(ControlFlow::Break(()));
            }
        };

        let origin = parse_station(line, self.columns.origin_column, origin)?;
        let destination = parse_station(
            line,
            self.columns.destination_column,
            destination.unwrap_or(""),
        )?;
        self.summary.records_read += 1;
        trace!(line, origin, destination, "Trip");

        if origin == destination {
            self.summary.self_loops += 1;
            return Ok(ControlFlow::Continue(()));
        }

        self.summary.vertices.insert(origin);
        self.summary.vertices.insert(destination);
        self.summary.flows.record(origin, destination);
        Ok(ControlFlow::Continue(()))
    }

    fn finish(self) -> FlowSummary {
        let s = self.summary;
        debug!(
            records = s.records_read,
            self_loops = s.self_loops,
            stations = s.vertices.len(),
            pairs = s.flows.len(),
            trips = s.flows.total_weight(),
            "Flow aggregation finished"
        );
        s
    }
}

fn parse_station(line: u64, column: usize, field: &str) -> Result<StationId> {
    field.trim().parse().map_err(|_| Error::Parse {
        line,
        column,
        value: field.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(rows: &[(&'static str, &'static str)]) -> Vec<(Option<&'static str>, Option<&'static str>)> {
        rows.iter().map(|&(o, d)| (Some(o), Some(d))).collect()
    }

    #[test]
    fn test_reverse_pair_merges_and_self_loop_dropped() {
        let agg = FlowAggregator::default();
        let summary = agg
            .aggregate_fields(pairs(&[("1", "2"), ("2", "1"), ("1", "1"), ("3", "4")]))
            .unwrap();

        assert_eq!(summary.vertices.as_slice(), &[1, 2, 3, 4]);
        let flows: Vec<_> = summary.flows.iter().collect();
        assert_eq!(
            flows,
            vec![(PairKey::new(1, 2), 2), (PairKey::new(3, 4), 1)]
        );
        assert_eq!(summary.records_read, 4);
        assert_eq!(summary.self_loops, 1);
        assert_eq!(summary.truncated_at, None);
    }

    #[test]
    fn test_key_direction_follows_first_observation() {
        let agg = FlowAggregator::default();
        let summary = agg
            .aggregate_fields(pairs(&[("9", "5"), ("5", "9"), ("5", "9")]))
            .unwrap();

        assert_eq!(summary.flows.get(PairKey::new(9, 5)), Some(3));
        assert_eq!(summary.flows.get(PairKey::new(5, 9)), None);
        assert_eq!(summary.flows.weight_between(5, 9), Some(3));
        assert_eq!(summary.vertices.as_slice(), &[9, 5]);
    }

    #[test]
    fn test_blank_origin_truncates() {
        let mut rows = pairs(&[("1", "2"), ("2", "3"), ("3", "4"), ("4", "5")]);
        rows.push((Some(""), Some("7")));
        rows.extend(pairs(&[("10", "11"); 10]));

        let summary = FlowAggregator::default().aggregate_fields(rows).unwrap();

        assert_eq!(summary.flows.total_weight(), 4);
        assert_eq!(summary.vertices.as_slice(), &[1, 2, 3, 4, 5]);
        assert!(!summary.vertices.contains(10));
        assert_eq!(summary.truncated_at, Some(6));
    }

    #[test]
    fn test_missing_origin_column_truncates() {
        let rows = vec![(Some("1"), Some("2")), (None, None), (Some("3"), Some("4"))];
        let summary = FlowAggregator::default().aggregate_fields(rows).unwrap();
        assert_eq!(summary.flows.len(), 1);
        assert_eq!(summary.truncated_at, Some(3));
    }

    #[test]
    fn test_non_integer_field_is_parse_error() {
        let rows = pairs(&[("1", "2"), ("1", "two")]);
        let err = FlowAggregator::new(0, 1).aggregate_fields(rows).unwrap_err();
        match err {
            Error::Parse {
                line,
                column,
                value,
            } => {
                assert_eq!(line, 3);
                assert_eq!(column, 1);
                assert_eq!(value, "two");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_whitespace_origin_is_parse_error() {
        let rows = pairs(&[("1", "2"), ("   ", "3"), ("4", "5")]);
        let err = FlowAggregator::new(0, 1).aggregate_fields(rows).unwrap_err();
        match err {
            Error::Parse {
                line,
                column,
                value,
            } => {
                assert_eq!(line, 3);
                assert_eq!(column, 0);
                assert_eq!(value, "   ");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_blank_destination_is_parse_error() {
        let rows = vec![(Some("1"), Some(""))];
        let err = FlowAggregator::default().aggregate_fields(rows).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 2, .. }));
    }

    #[test]
    fn test_reader_uses_configured_columns_and_skips_header() {
        let data = "\
Checkout Date,Checkout Time,Checkout Kiosk,CO ID,CO Docks,Return Kiosk,RT ID,RT Docks
2024-04-01,08:00:00,A,7,10,B,8,12
2024-04-01,08:05:00,B,8,12,A,7,10
2024-04-01,08:10:00,C, 9 ,6,A,7,10
";
        let summary = FlowAggregator::default()
            .aggregate_reader(data.as_bytes())
            .unwrap();

        assert_eq!(summary.vertices.as_slice(), &[7, 8, 9]);
        assert_eq!(summary.flows.get(PairKey::new(7, 8)), Some(2));
        assert_eq!(summary.flows.get(PairKey::new(9, 7)), Some(1));
    }

    #[test]
    fn test_reader_reports_csv_line() {
        let data = "o,d\n1,2\nx,3\n";
        let err = FlowAggregator::new(0, 1)
            .aggregate_reader(data.as_bytes())
            .unwrap_err();
        assert!(matches!(err, Error::Parse { line: 3, column: 0, .. }));
    }

    #[test]
    fn test_header_only_is_empty() {
        let summary = FlowAggregator::new(0, 1)
            .aggregate_reader("o,d\n".as_bytes())
            .unwrap();
        assert!(summary.vertices.is_empty());
        assert!(summary.flows.is_empty());
        assert_eq!(summary.records_read, 0);
    }

    #[test]
    fn test_pair_key_display() {
        assert_eq!(PairKey::new(12, 3).to_string(), "(12, 3)");
    }
}
