//! Synthetic trip tables for demos and smoke tests.
//!
//! Stations are spread over a few districts and most trips stay inside their
//! district, so the resulting flow graph has recoverable community
//! structure. Output uses the merged trip-table layout read by
//! [`FlowAggregator::default`](crate::flow::FlowAggregator) and
//! [`DaySplit::default`](crate::split::DaySplit).

use std::fs::File;
use std::io::Write;
use std::path::Path;

use csv::Writer;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::info;

use crate::error::Result;
use crate::flow::StationId;
use crate::reconcile::MERGED_HEADER;

const FIRST_STATION_ID: StationId = 1000;

/// Builds kiosk names out of street intersections.
pub struct StationNameGenerator {
    streets: Vec<&'static str>,
    crossings: Vec<&'static str>,
}

impl Default for StationNameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl StationNameGenerator {
    pub fn new() -> Self {
        StationNameGenerator {
            streets: vec![
                "2nd", "3rd", "5th", "6th", "8th", "11th", "12th", "21st", "26th", "28th",
            ],
            crossings: vec![
                "Lavaca", "Nueces", "Trinity", "Congress", "Guadalupe", "Red River", "San Jacinto",
                "Rio Grande", "Speedway", "Pearl",
            ],
        }
    }

    /// Name of the `index`-th station. Distinct for every index.
    pub fn name(&self, index: usize) -> String {
        let s = self.streets.len();
        let c = self.crossings.len();
        let street = self.streets[index % s];
        let crossing = self.crossings[(index / s) % c];
        match index / (s * c) {
            0 => format!("{street}/{crossing}"),
            n => format!("{street}/{crossing} #{}", n + 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticStation {
    pub id: StationId,
    pub name: String,
    pub docks: u32,
    pub district: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticTrip {
    /// Day of the month, 1-based.
    pub day: u32,
    pub second_of_day: u32,
    pub origin: usize,
    pub destination: usize,
}

/// Seeded generator; the same settings always produce the same table.
#[derive(Debug, Clone, Copy)]
pub struct TripGenerator {
    stations: usize,
    trips: usize,
    districts: usize,
    /// Probability that a trip ends in the district it started in.
    local_share: f64,
    seed: u64,
}

impl TripGenerator {
    pub fn new(stations: usize, trips: usize) -> Self {
        TripGenerator {
            stations,
            trips,
            districts: 4,
            local_share: 0.85,
            seed: 0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_districts(mut self, districts: usize) -> Self {
        self.districts = districts.max(1);
        self
    }

    /// Clamped to `[0, 1]`; NaN leaves the current share in place.
    pub fn with_local_share(mut self, local_share: f64) -> Self {
        if !local_share.is_nan() {
            self.local_share = local_share.clamp(0.0, 1.0);
        }
        self
    }

    pub fn station_list(&self) -> Vec<SyntheticStation> {
        let names = StationNameGenerator::new();
        (0..self.stations)
            .map(|k| SyntheticStation {
                id: FIRST_STATION_ID + k as StationId,
                name: names.name(k),
                docks: 8 + (k as u32 * 7) % 12,
                district: k % self.districts,
            })
            .collect()
    }

    /// Draws all trips in parallel. Each trip has its own RNG derived from
    /// the seed and its position, so thread scheduling cannot change output.
    pub fn generate(&self) -> Vec<SyntheticTrip> {
        if self.stations == 0 {
            return Vec::new();
        }
        (0..self.trips)
            .into_par_iter()
            .map(|i| self.trip(i))
            .collect()
    }

    fn trip(&self, i: usize) -> SyntheticTrip {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(i as u64));
        let origin = rng.gen_range(0..self.stations);

        let destination = if rng.gen_bool(self.local_share) {
            let district = origin % self.districts;
            let members = (self.stations - district).div_ceil(self.districts);
            district + self.districts * rng.gen_range(0..members)
        } else {
            rng.gen_range(0..self.stations)
        };

        SyntheticTrip {
            day: rng.gen_range(1..=30),
            second_of_day: rng.gen_range(6 * 3600..23 * 3600),
            origin,
            destination,
        }
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let stations = self.station_list();
        let trips = self.generate();

        let mut wtr = Writer::from_writer(writer);
        wtr.write_record(MERGED_HEADER)?;
        for trip in &trips {
            let from = &stations[trip.origin];
            let to = &stations[trip.destination];
            let s = trip.second_of_day;
            wtr.write_record([
                format!("2024-04-{:02}", trip.day),
                format!("{:02}:{:02}:{:02}", s / 3600, s / 60 % 60, s % 60),
                from.name.clone(),
                from.id.to_string(),
                from.docks.to_string(),
                to.name.clone(),
                to.id.to_string(),
                to.docks.to_string(),
            ])?;
        }
        wtr.flush()?;
        Ok(trips.len())
    }

    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn write_csv_to_path(&self, path: impl AsRef<Path>) -> Result<usize> {
        let written = self.write_csv(File::create(path.as_ref())?)?;
        info!(
            stations = self.stations,
            trips = written,
            seed = self.seed,
            "Synthetic trips written"
        );
        Ok(written)
    }
}
