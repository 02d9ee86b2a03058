//! End-to-end run over one trip file: aggregate, build, detect, export.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::community::{CommunityDetector, Louvain, Membership};
use crate::error::Result;
use crate::export::{write_membership_to_path, write_pair_weights_to_path};
use crate::flow::{FlowAggregator, FlowSummary};
use crate::graph::FlowGraph;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub aggregator: FlowAggregator,
    pub resolution: f64,
    /// Where to write `(first, second)\tweight` lines, if anywhere.
    pub pairs_output: Option<PathBuf>,
    /// Where to write `station\tlabel` lines, if anywhere.
    pub membership_output: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            aggregator: FlowAggregator::default(),
            resolution: 1.0,
            pairs_output: None,
            membership_output: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub summary: FlowSummary,
    pub graph: FlowGraph,
    pub membership: Membership,
    pub modularity: f64,
}

impl PipelineConfig {
    #[tracing::instrument(skip_all, fields(input = %input.as_ref().display()))]
    pub fn run(&self, input: impl AsRef<Path>) -> Result<PipelineReport> {
        let summary = self.aggregator.aggregate_path(input)?;
        self.run_summary(summary)
    }

    /// Runs the stages after aggregation on an existing summary.
    pub fn run_summary(&self, summary: FlowSummary) -> Result<PipelineReport> {
        if let Some(line) = summary.truncated_at {
            warn!(line, "Input truncated at a blank origin station");
        }
        info!(
            stations = summary.vertices.len(),
            pairs = summary.flows.len(),
            trips = summary.flows.total_weight(),
            self_loops = summary.self_loops,
            "Flows aggregated"
        );

        if let Some(path) = &self.pairs_output {
            write_pair_weights_to_path(path, &summary.flows)?;
        }

        let graph = FlowGraph::build(&summary.vertices, &summary.flows)?;
        let louvain = Louvain::new().with_resolution(self.resolution);
        let membership = louvain.detect(&graph);
        let modularity = louvain.modularity(&graph, &membership)?;

        info!(
            communities = membership.community_count(),
            resolution = louvain.resolution(),
            modularity,
            "Communities detected"
        );

        if let Some(path) = &self.membership_output {
            write_membership_to_path(path, &summary.vertices, &membership)?;
        }

        Ok(PipelineReport {
            summary,
            graph,
            membership,
            modularity,
        })
    }
}
