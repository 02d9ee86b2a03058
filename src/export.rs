//! Tab-separated result files.
//!
//! Both files are headerless. Pair lines read `(first, second)\t<weight>`,
//! membership lines read `<station>\t<label>`.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use csv::{QuoteStyle, Writer, WriterBuilder};
use tracing::debug;

use crate::community::Membership;
use crate::error::{Error, Result};
use crate::flow::{FlowWeightTable, VertexSet};

fn tsv_writer<W: Write>(writer: W) -> Writer<W> {
    WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quote_style(QuoteStyle::Never)
        .from_writer(writer)
}

/// Writes one line per flow bucket, in table order.
pub fn write_pair_weights<W: Write>(writer: W, flows: &FlowWeightTable) -> Result<()> {
    let mut wtr = tsv_writer(writer);
    for (key, weight) in flows.iter() {
        wtr.write_record([key.to_string(), weight.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_pair_weights_to_path(path: impl AsRef<Path>, flows: &FlowWeightTable) -> Result<()> {
    let path = path.as_ref();
    debug!(path = %path.display(), pairs = flows.len(), "Writing pair weights");
    write_pair_weights(File::create(path)?, flows)
}

/// Writes one line per station, in vertex order.
///
/// # Errors
///
/// Returns [`Error::Mismatch`] if `membership` does not hold exactly one
/// label per station.
pub fn write_membership<W: Write>(
    writer: W,
    vertices: &VertexSet,
    membership: &Membership,
) -> Result<()> {
    if vertices.len() != membership.len() {
        return Err(Error::Mismatch {
            vertices: vertices.len(),
            labels: membership.len(),
        });
    }

    let mut wtr = tsv_writer(writer);
    for (station, label) in vertices.iter().zip(membership.labels()) {
        wtr.write_record([station.to_string(), label.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_membership_to_path(
    path: impl AsRef<Path>,
    vertices: &VertexSet,
    membership: &Membership,
) -> Result<()> {
    let path = path.as_ref();
    debug!(path = %path.display(), stations = vertices.len(), "Writing community membership");
    write_membership(File::create(path)?, vertices, membership)
}
