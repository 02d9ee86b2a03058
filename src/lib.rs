pub mod community;
pub mod error;
pub mod export;
pub mod flow;
pub mod graph;
pub mod pipeline;
pub mod reconcile;
pub mod split;
pub mod synth;

pub use community::{CommunityDetector, Louvain, Membership};
pub use error::{Error, Result};
pub use flow::{FlowAggregator, FlowSummary, FlowWeightTable, PairKey, StationId, VertexSet};
pub use graph::FlowGraph;
pub use pipeline::{PipelineConfig, PipelineReport};
pub use reconcile::{KioskCatalog, NameReconciler};
