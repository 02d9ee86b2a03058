//! Weighted undirected station graph.

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

use crate::error::{Error, Result};
use crate::flow::{FlowWeightTable, StationId, VertexSet};

/// Stations as vertices, one edge per flow bucket weighted by trip count.
///
/// Vertex `i` of the graph is station `i` of the [`VertexSet`] it was built from.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    graph: UnGraph<StationId, u64>,
}

impl FlowGraph {
    pub fn build(vertices: &VertexSet, flows: &FlowWeightTable) -> Result<Self> {
        let mut graph = UnGraph::with_capacity(vertices.len(), flows.len());
        for station in vertices.iter() {
            graph.add_node(station);
        }

        for (key, weight) in flows.iter() {
            let (Some(a), Some(b)) = (vertices.index_of(key.first), vertices.index_of(key.second))
            else {
                return Err(Error::Lookup {
                    first: key.first,
                    second: key.second,
                });
            };
            graph.add_edge(NodeIndex::new(a), NodeIndex::new(b), weight);
        }

        Ok(FlowGraph { graph })
    }

    pub fn vertex_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn station(&self, index: usize) -> Option<StationId> {
        self.graph.node_weight(NodeIndex::new(index)).copied()
    }

    pub fn total_weight(&self) -> u64 {
        self.graph.edge_weights().sum()
    }

    /// Edges as `(a, b, weight)` vertex-index triples in insertion order.
    pub fn weighted_edges(&self) -> impl Iterator<Item = (usize, usize, u64)> + '_ {
        self.graph
            .edge_references()
            .map(|e| (e.source().index(), e.target().index(), *e.weight()))
    }

    pub fn inner(&self) -> &UnGraph<StationId, u64> {
        &self.graph
    }
}
