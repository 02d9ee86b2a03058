//! Kiosk name reconciliation and the trip/kiosk merge.
//!
//! Raw trip exports name stations by kiosk name only. The kiosk catalog
//! spells the same stations differently, so catalog names are normalised
//! (`" & "` becomes `"/"`, then a rename map is applied) before trips are
//! joined to it. The merge writes the layout [`MERGED_HEADER`] that the
//! aggregation and split stages read by column position.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Writer};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::flow::StationId;

/// Column layout of a merged trip table. Station ids sit at columns 3 and 6.
pub const MERGED_HEADER: [&str; 8] = [
    "Checkout Date",
    "Checkout Time",
    "Checkout Kiosk",
    "CO ID",
    "CO Docks",
    "Return Kiosk",
    "RT ID",
    "RT Docks",
];

/// Catalog spellings mapped to the names used in the Austin trip export.
/// Keys are given after `" & "` has already been replaced.
pub const AUSTIN_RENAMES: &[(&str, &str)] = &[
    ("Capitol Station / Congress/11th", "11th/Congress @ The Texas Capitol"),
    (
        "State Capitol Visitors Garage @ San Jacinto/12th",
        "12th/San Jacinto @ State Capitol Visitors Garage",
    ),
    ("13th/Trinity", "13th/Trinity @ Waterloo Greenway"),
    ("Guadalupe/21st", "21st/Guadalupe"),
    ("21st/Speedway @PCL", "21st/Speedway @ PCL"),
    ("22nd 1/2/Rio Grande", "22.5/Rio Grande"),
    ("Nueces/26th", "26th/Nueces"),
    ("Rio Grande/28th", "28th/Rio Grande"),
    ("City Hall / Lavaca/2nd", "2nd/Lavaca @ City Hall"),
    ("Nueces @ 3rd", "3rd/Nueces"),
    ("Nueces/3rd", "3rd/Nueces"),
    ("Convention Center / 3rd/Trinity", "3rd/Trinity @ The Convention Center"),
    ("Lavaca/6th", "6th/Lavaca"),
    ("Trinity/6th Street", "6th/Trinity"),
    ("West/6th St.", "6th/West"),
    ("Red River/8th Street", "8th/Red River"),
    ("San Jacinto/8th Street", "8th/San Jacinto"),
    ("Henderson/9th", "9th/Henderson"),
    ("Palmer Auditorium", "Barton Springs/Bouldin @ Palmer Auditorium"),
    ("Barton Springs @ Kinney Ave", "Barton Springs/Kinney"),
    ("Congress/Cesar Chavez", "Cesar Chavez/Congress"),
    ("East 11th St./San Marcos", "East 11th/San Marcos"),
    ("East 11th St. at Victory Grill", "East 11th/Victory Grill"),
    (
        "Capital Metro HQ - East 5th at Broadway",
        "East 5th/Broadway @ Capital Metro HQ",
    ),
    ("Medina/East 6th", "East 6th/Medina"),
    ("East 6th/Pedernales St.", "East 6th/Pedernales"),
    ("East 6th at Robert Martinez", "East 6th/Robert T. Martinez"),
    (
        "Pfluger Bridge @ W 2nd Street",
        "Electric Drive/Sandra Muraida Way @ Pfluger Ped Bridge",
    ),
    ("UT West Mall @ Guadalupe", "Guadalupe/West Mall @ University Co-op"),
    ("Lake Austin Blvd @ Deep Eddy", "Lake Austin Blvd/Deep Eddy"),
    ("Lakeshore @ Austin Hostel", "Lakeshore/Austin Hostel"),
    ("Nash Hernandez @ RBJ South", "Nash Hernandez/East @ RBJ South"),
    ("Rainey St @ Cummings", "Rainey/Cummings"),
    ("ACC - Rio Grande/12th", "Rio Grande/12th"),
    ("Riverside @ S. Lamar", "Riverside/South Lamar"),
    ("Long Center @ South 1st/Riverside", "South 1st/Riverside @ Long Center"),
    (
        "South Congress/Barton Springs at the Austin American-Statesman",
        "South Congress/Barton Springs @ The Austin American-Statesman",
    ),
    ("Sterzing at Barton Springs", "Sterzing/Barton Springs"),
    (
        "MoPac Pedestrian Bridge @ Veterans Drive",
        "Veterans/Atlanta @ MoPac Ped Bridge",
    ),
];

/// Turns catalog kiosk names into trip-export spelling.
#[derive(Debug, Clone, Default)]
pub struct NameReconciler {
    renames: HashMap<String, String>,
}

impl NameReconciler {
    /// No renames; only trimming and the `" & "` replacement apply.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn austin() -> Self {
        AUSTIN_RENAMES
            .iter()
            .fold(Self::new(), |r, &(from, to)| r.with_rename(from, to))
    }

    /// A later rename for the same spelling replaces the earlier one.
    pub fn with_rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.insert(from.into(), to.into());
        self
    }

    /// Adds renames from a two-column CSV (`from,to`) with a header row.
    pub fn extend_from_reader<R: Read>(&mut self, reader: R) -> Result<usize> {
        let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
        let mut added = 0;
        for result in rdr.records() {
            let record = result?;
            let (Some(from), Some(to)) = (record.get(0), record.get(1)) else {
                continue;
            };
            let from = from.trim();
            if from.is_empty() {
                continue;
            }
            self.renames.insert(from.to_string(), to.trim().to_string());
            added += 1;
        }
        Ok(added)
    }

    pub fn extend_from_path(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        self.extend_from_reader(File::open(path.as_ref())?)
    }

    pub fn len(&self) -> usize {
        self.renames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renames.is_empty()
    }

    pub fn canonical(&self, raw: &str) -> String {
        let name = raw.trim().replace(" & ", "/");
        match self.renames.get(&name) {
            Some(renamed) => renamed.clone(),
            None => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kiosk {
    pub id: StationId,
    pub name: String,
    pub docks: u32,
}

#[derive(Debug, Deserialize)]
struct KioskRow {
    #[serde(rename = "Kiosk ID")]
    id: String,
    #[serde(rename = "Kiosk Name")]
    name: String,
    #[serde(rename = "Number of Docks")]
    docks: String,
}

#[derive(Debug, Deserialize)]
struct TripRow {
    #[serde(rename = "Checkout Date")]
    date: String,
    #[serde(rename = "Checkout Time")]
    time: String,
    #[serde(rename = "Checkout Kiosk")]
    checkout: String,
    #[serde(rename = "Return Kiosk")]
    ret: String,
}

/// Kiosks keyed by reconciled name.
#[derive(Debug, Clone, Default)]
pub struct KioskCatalog {
    kiosks: Vec<Kiosk>,
    by_name: HashMap<String, usize>,
    skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeCounts {
    pub written: u64,
    /// Trips dropped because their checkout kiosk is not in the catalog.
    pub unknown_checkout: u64,
    /// Trips written with empty return id and docks.
    pub unknown_return: u64,
    pub unmatched_names: BTreeSet<String>,
}

impl KioskCatalog {
    /// Reads a kiosk table with `Kiosk ID`, `Kiosk Name` and `Number of Docks`
    /// columns. Rows lacking an id or a dock count are skipped; of several rows
    /// that reconcile to the same name, the first wins.
    pub fn from_reader<R: Read>(reader: R, names: &NameReconciler) -> Result<Self> {
        let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers = rdr.headers()?.clone();
        let column = |name: &str| headers.iter().position(|h| h == name).unwrap_or(0);

        let mut catalog = KioskCatalog::default();
        let mut record = StringRecord::new();
        while rdr.read_record(&mut record)? {
            let line = record.position().map_or(0, |p| p.line());
            let row: KioskRow = record.deserialize(Some(&headers))?;

            let (id, docks) = (row.id.trim(), row.docks.trim());
            if id.is_empty() || docks.is_empty() {
                debug!(line, name = %row.name, "Skipping kiosk without id or docks");
                catalog.skipped += 1;
                continue;
            }
            let id = id.parse::<StationId>().map_err(|_| Error::Parse {
                line,
                column: column("Kiosk ID"),
                value: row.id.clone(),
            })?;
            let docks = docks.parse::<u32>().map_err(|_| Error::Parse {
                line,
                column: column("Number of Docks"),
                value: row.docks.clone(),
            })?;

            let name = names.canonical(&row.name);
            if catalog.by_name.contains_key(&name) {
                debug!(line, %name, "Duplicate kiosk name, keeping the first");
                catalog.skipped += 1;
                continue;
            }
            catalog.by_name.insert(name.clone(), catalog.kiosks.len());
            catalog.kiosks.push(Kiosk { id, name, docks });
        }
        Ok(catalog)
    }

    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_path(path: impl AsRef<Path>, names: &NameReconciler) -> Result<Self> {
        let catalog = Self::from_reader(File::open(path.as_ref())?, names)?;
        info!(
            kiosks = catalog.len(),
            skipped = catalog.skipped,
            "Kiosk catalog loaded"
        );
        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> Option<&Kiosk> {
        self.by_name.get(name).map(|&i| &self.kiosks[i])
    }

    pub fn len(&self) -> usize {
        self.kiosks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kiosks.is_empty()
    }

    /// Rows left out while loading: missing fields or duplicate names.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn iter(&self) -> impl Iterator<Item = &Kiosk> {
        self.kiosks.iter()
    }

    /// Joins a raw trip export to the catalog by kiosk name.
    ///
    /// A trip whose checkout kiosk is unknown is dropped. A trip whose return
    /// kiosk is unknown is kept with empty `RT ID` and `RT Docks`.
    pub fn merge_trips<R: Read, W: Write>(&self, trips: R, out: W) -> Result<MergeCounts> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(trips);
        let mut wtr = Writer::from_writer(out);
        wtr.write_record(MERGED_HEADER)?;

        let mut counts = MergeCounts::default();
        for result in rdr.deserialize() {
            let row: TripRow = result?;
            let checkout = row.checkout.trim();
            let ret = row.ret.trim();

            let Some(from) = self.get(checkout) else {
                counts.unknown_checkout += 1;
                counts.unmatched_names.insert(checkout.to_string());
                continue;
            };
            let (rt_id, rt_docks) = match self.get(ret) {
                Some(to) => (to.id.to_string(), to.docks.to_string()),
                None => {
                    counts.unknown_return += 1;
                    counts.unmatched_names.insert(ret.to_string());
                    (String::new(), String::new())
                }
            };

            let (co_id, co_docks) = (from.id.to_string(), from.docks.to_string());
            wtr.write_record([
                row.date.as_str(),
                row.time.as_str(),
                checkout,
                co_id.as_str(),
                co_docks.as_str(),
                ret,
                rt_id.as_str(),
                rt_docks.as_str(),
            ])?;
            counts.written += 1;
        }
        wtr.flush()?;
        Ok(counts)
    }

    #[tracing::instrument(skip_all, fields(trips = %trips.as_ref().display()))]
    pub fn merge_paths(
        &self,
        trips: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<MergeCounts> {
        let counts = self.merge_trips(File::open(trips.as_ref())?, File::create(output.as_ref())?)?;
        info!(
            written = counts.written,
            unknown_checkout = counts.unknown_checkout,
            unknown_return = counts.unknown_return,
            "Trips merged with kiosk catalog"
        );
        if !counts.unmatched_names.is_empty() {
            warn!(names = ?counts.unmatched_names, "Kiosk names missing from the catalog");
        }
        Ok(counts)
    }
}
