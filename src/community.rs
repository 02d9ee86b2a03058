//! Modularity-based community detection.
//!
//! [`Louvain`] is the multilevel heuristic of Blondel et al. (2008): vertices
//! greedily join the neighbouring community that raises modularity most,
//! communities are then collapsed into single vertices and the process
//! repeats on the coarser graph until nothing merges.
//!
//! The run is deterministic. Vertices are visited in ascending index order
//! and candidate communities are compared in ascending index order with a
//! strict improvement test, so among equal-gain moves the lowest
//! (vertex, community) index pair wins. A vertex whose best alternative only
//! ties with its current community stays put.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::error::{Error, Result};
use crate::flow::{StationId, VertexSet};
use crate::graph::FlowGraph;

/// Gains closer than this are treated as ties.
const GAIN_EPSILON: f64 = 1e-12;

/// One community label per graph vertex.
///
/// Labels are renumbered from 0 in order of first appearance along the
/// vertices, so vertex 0 is always in community 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    labels: Vec<usize>,
}

impl Membership {
    pub fn from_labels(labels: Vec<usize>) -> Self {
        let mut renumbered: HashMap<usize, usize> = HashMap::new();
        let labels = labels
            .into_iter()
            .map(|label| {
                let next = renumbered.len();
                *renumbered.entry(label).or_insert(next)
            })
            .collect();
        Membership { labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, vertex: usize) -> Option<usize> {
        self.labels.get(vertex).copied()
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn community_count(&self) -> usize {
        self.labels.iter().max().map_or(0, |&max| max + 1)
    }

    /// Stations grouped by label. Pairs `vertices` with labels positionally.
    pub fn communities(&self, vertices: &VertexSet) -> BTreeMap<usize, Vec<StationId>> {
        let mut communities: BTreeMap<usize, Vec<StationId>> = BTreeMap::new();
        for (station, &label) in vertices.iter().zip(&self.labels) {
            communities.entry(label).or_default().push(station);
        }
        communities
    }
}

/// Partitions a flow graph into communities.
pub trait CommunityDetector {
    fn detect(&self, graph: &FlowGraph) -> Membership;
}

/// Louvain community detection on trip-weighted edges.
#[derive(Debug, Clone)]
pub struct Louvain {
    resolution: f64,
    max_passes: usize,
    max_levels: usize,
    min_gain: f64,
}

impl Default for Louvain {
    fn default() -> Self {
        Self::new()
    }
}

impl Louvain {
    pub fn new() -> Self {
        Louvain {
            resolution: 1.0,
            max_passes: 100,
            max_levels: 10,
            min_gain: 1e-7,
        }
    }

    /// Higher values favour smaller communities.
    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }

    /// Cap on local-moving sweeps per level.
    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    pub fn with_max_levels(mut self, max_levels: usize) -> Self {
        self.max_levels = max_levels;
        self
    }

    /// Smallest modularity improvement that justifies another level.
    pub fn with_min_gain(mut self, min_gain: f64) -> Self {
        self.min_gain = min_gain;
        self
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Weighted modularity of `membership` on `graph` at this resolution.
    pub fn modularity(&self, graph: &FlowGraph, membership: &Membership) -> Result<f64> {
        if membership.len() != graph.vertex_count() {
            return Err(Error::Mismatch {
                vertices: graph.vertex_count(),
                labels: membership.len(),
            });
        }
        Ok(Level::from_graph(graph).modularity(membership.labels(), self.resolution))
    }
}

impl CommunityDetector for Louvain {
    #[tracing::instrument(skip_all, fields(vertices = graph.vertex_count(), edges = graph.edge_count()))]
    fn detect(&self, graph: &FlowGraph) -> Membership {
        let n = graph.vertex_count();
        let mut assignment: Vec<usize> = (0..n).collect();

        let mut level = Level::from_graph(graph);
        if level.total_weight == 0.0 {
            return Membership::from_labels(assignment);
        }

        let mut quality = level.modularity(&assignment, self.resolution);
        for depth in 0..self.max_levels {
            let (community, count) = level.local_moving(self.resolution, self.max_passes);
            if count == level.len() {
                break;
            }

            for a in assignment.iter_mut() {
                *a = community[*a];
            }
            let coarse = level.aggregate(&community, count);
            let identity: Vec<usize> = (0..count).collect();
            let q = coarse.modularity(&identity, self.resolution);
            debug!(depth, communities = count, modularity = q, "Louvain level");

            let gain = q - quality;
            quality = q;
            if gain < self.min_gain {
                break;
            }
            level = coarse;
        }

        Membership::from_labels(assignment)
    }
}

/// Working graph for one Louvain level. Vertices may carry self-loops that
/// stand for the weight already inside a collapsed community.
struct Level {
    adjacency: Vec<Vec<(usize, f64)>>,
    self_loops: Vec<f64>,
    degrees: Vec<f64>,
    total_weight: f64,
}

impl Level {
    fn from_graph(graph: &FlowGraph) -> Self {
        let n = graph.vertex_count();
        let mut adjacency = vec![Vec::new(); n];
        let mut self_loops = vec![0.0; n];
        for (a, b, w) in graph.weighted_edges() {
            let w = w as f64;
            if a == b {
                self_loops[a] += w;
            } else {
                adjacency[a].push((b, w));
                adjacency[b].push((a, w));
            }
        }
        Self::new(adjacency, self_loops)
    }

    fn new(adjacency: Vec<Vec<(usize, f64)>>, self_loops: Vec<f64>) -> Self {
        let degrees: Vec<f64> = adjacency
            .iter()
            .zip(&self_loops)
            .map(|(edges, &sl)| edges.iter().map(|&(_, w)| w).sum::<f64>() + 2.0 * sl)
            .collect();
        let total_weight = degrees.iter().sum::<f64>() / 2.0;
        Level {
            adjacency,
            self_loops,
            degrees,
            total_weight,
        }
    }

    fn len(&self) -> usize {
        self.adjacency.len()
    }

    fn modularity(&self, community: &[usize], resolution: f64) -> f64 {
        let m = self.total_weight;
        if m == 0.0 {
            return 0.0;
        }

        // Labels are dense, so every community index is below the vertex count.
        let n = self.len();
        let mut internal = vec![0.0; n];
        let mut totals = vec![0.0; n];
        for (i, edges) in self.adjacency.iter().enumerate() {
            let c = community[i];
            totals[c] += self.degrees[i];
            internal[c] += self.self_loops[i];
            for &(j, w) in edges {
                // Each undirected edge is listed from both ends.
                if community[j] == c {
                    internal[c] += w / 2.0;
                }
            }
        }

        internal
            .iter()
            .zip(&totals)
            .map(|(&inside, &tot)| inside / m - resolution * (tot / (2.0 * m)).powi(2))
            .sum()
    }

    /// Greedy vertex moves until a sweep changes nothing. Returns the
    /// community of each vertex, renumbered densely by first appearance,
    /// and the number of communities.
    fn local_moving(&self, resolution: f64, max_passes: usize) -> (Vec<usize>, usize) {
        let n = self.len();
        let two_m = 2.0 * self.total_weight;
        let mut community: Vec<usize> = (0..n).collect();
        let mut totals = self.degrees.clone();

        for pass in 0..max_passes {
            let mut moved = 0usize;

            for i in 0..n {
                let ki = self.degrees[i];
                let current = community[i];

                let mut links: BTreeMap<usize, f64> = BTreeMap::new();
                for &(j, w) in &self.adjacency[i] {
                    *links.entry(community[j]).or_default() += w;
                }

                totals[current] -= ki;

                let mut best = current;
                let mut best_gain = links.get(&current).copied().unwrap_or(0.0)
                    - resolution * totals[current] * ki / two_m;
                for (&c, &k_in) in &links {
                    if c == current {
                        continue;
                    }
                    let gain = k_in - resolution * totals[c] * ki / two_m;
                    if gain > best_gain + GAIN_EPSILON {
                        best = c;
                        best_gain = gain;
                    }
                }

                totals[best] += ki;
                if best != current {
                    community[i] = best;
                    moved += 1;
                }
            }

            debug!(pass, moved, "Local moving sweep");
            if moved == 0 {
                break;
            }
        }

        let mut dense: HashMap<usize, usize> = HashMap::new();
        let community: Vec<usize> = community
            .into_iter()
            .map(|c| {
                let next = dense.len();
                *dense.entry(c).or_insert(next)
            })
            .collect();
        let count = dense.len();
        (community, count)
    }

    /// Collapses each community into one vertex.
    fn aggregate(&self, community: &[usize], count: usize) -> Level {
        let mut links: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); count];
        let mut self_loops = vec![0.0; count];

        for (i, edges) in self.adjacency.iter().enumerate() {
            let ci = community[i];
            self_loops[ci] += self.self_loops[i];
            for &(j, w) in edges {
                let cj = community[j];
                if ci == cj {
                    self_loops[ci] += w / 2.0;
                } else {
                    *links[ci].entry(cj).or_default() += w;
                }
            }
        }

        let adjacency = links
            .into_iter()
            .map(|neighbours| neighbours.into_iter().collect())
            .collect();
        Level::new(adjacency, self_loops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowAggregator;

    fn graph_of(rows: &[(u64, u64)]) -> (VertexSet, FlowGraph) {
        let owned: Vec<(String, String)> = rows
            .iter()
            .map(|(o, d)| (o.to_string(), d.to_string()))
            .collect();
        let summary = FlowAggregator::default()
            .aggregate_fields(
                owned
                    .iter()
                    .map(|(o, d)| (Some(o.as_str()), Some(d.as_str()))),
            )
            .unwrap();
        let graph = FlowGraph::build(&summary.vertices, &summary.flows).unwrap();
        (summary.vertices, graph)
    }

    #[test]
    fn test_triangle_is_one_community() {
        let (_, g) = graph_of(&[(1, 2), (2, 3), (3, 1)]);
        let membership = Louvain::new().detect(&g);

        assert_eq!(membership.labels(), &[0, 0, 0]);
        assert_eq!(membership.community_count(), 1);
    }

    #[test]
    fn test_disjoint_clusters_get_distinct_labels() {
        let (vertices, g) = graph_of(&[
            (1, 2),
            (2, 3),
            (3, 1),
            (1, 2),
            (10, 11),
            (11, 12),
            (12, 10),
            (12, 13),
            (13, 10),
        ]);
        let membership = Louvain::new().detect(&g);

        assert_eq!(membership.len(), vertices.len());
        let label = |s| membership.label(vertices.index_of(s).unwrap()).unwrap();
        assert_eq!(label(1), label(2));
        assert_eq!(label(2), label(3));
        assert_eq!(label(10), label(11));
        assert_eq!(label(11), label(12));
        assert_eq!(label(12), label(13));
        assert_ne!(label(1), label(10));
    }

    #[test]
    fn test_heavy_bridge_loses_to_dense_cliques() {
        // Two 4-cliques joined by one light edge.
        let mut rows = Vec::new();
        for clique in [[1, 2, 3, 4], [5, 6, 7, 8]] {
            for a in 0..4 {
                for b in (a + 1)..4 {
                    for _ in 0..5 {
                        rows.push((clique[a], clique[b]));
                    }
                }
            }
        }
        rows.push((4, 5));
        let (vertices, g) = graph_of(&rows);
        let membership = Louvain::new().detect(&g);

        let communities = membership.communities(&vertices);
        assert_eq!(communities.len(), 2);
        assert_eq!(communities[&0], vec![1, 2, 3, 4]);
        assert_eq!(communities[&1], vec![5, 6, 7, 8]);

        let q = Louvain::new().modularity(&g, &membership).unwrap();
        assert!(q > 0.45, "modularity {q}");
    }

    #[test]
    fn test_detect_is_deterministic() {
        let rows: Vec<(u64, u64)> = (0..60u64).map(|i| (i % 13, (i * 7 + 3) % 17)).collect();
        let (_, g) = graph_of(&rows);
        let first = Louvain::new().detect(&g);
        let second = Louvain::new().detect(&g);
        assert_eq!(first, second);
    }

    #[test]
    fn test_tie_goes_to_lowest_community() {
        // Path 1-2-3: station 1 joins station 2's community, then station 2
        // ties between staying and joining station 3 and stays.
        let (_, g) = graph_of(&[(1, 2), (2, 3)]);
        let membership = Louvain::new().detect(&g);
        assert_eq!(membership.label(0), Some(0));
        assert_eq!(membership.label(1), Some(0));
    }

    #[test]
    fn test_empty_graph_has_empty_membership() {
        let g = FlowGraph::build(&VertexSet::new(), &Default::default()).unwrap();
        let membership = Louvain::new().detect(&g);
        assert!(membership.is_empty());
        assert_eq!(membership.community_count(), 0);
    }

    #[test]
    fn test_modularity_of_single_community_is_zero() {
        let (_, g) = graph_of(&[(1, 2), (2, 3), (3, 1)]);
        let all_in_one = Membership::from_labels(vec![0, 0, 0]);
        let q = Louvain::new().modularity(&g, &all_in_one).unwrap();
        assert!(q.abs() < 1e-12);
    }

    #[test]
    fn test_modularity_rejects_short_membership() {
        let (_, g) = graph_of(&[(1, 2)]);
        let err = Louvain::new()
            .modularity(&g, &Membership::from_labels(vec![0]))
            .unwrap_err();
        assert!(matches!(err, Error::Mismatch { vertices: 2, labels: 1 }));
    }

    fn two_cliques() -> (VertexSet, FlowGraph) {
        let mut rows = Vec::new();
        for clique in [[1, 2, 3, 4], [5, 6, 7, 8]] {
            for a in 0..4 {
                for b in (a + 1)..4 {
                    rows.push((clique[a], clique[b]));
                }
            }
        }
        rows.push((4, 5));
        graph_of(&rows)
    }

    fn mixed_rows() -> Vec<(u64, u64)> {
        (0..120u64).map(|i| (i % 11, (i * 5 + i / 7) % 19)).collect()
    }

    #[test]
    fn test_zero_levels_keeps_singletons() {
        let (_, g) = graph_of(&[(1, 2), (2, 3), (3, 1)]);
        let membership = Louvain::new().with_max_levels(0).detect(&g);
        assert_eq!(membership.labels(), &[0, 1, 2]);
    }

    #[test]
    fn test_zero_passes_keeps_singletons() {
        let (_, g) = graph_of(&[(1, 2), (2, 3), (3, 1)]);
        let membership = Louvain::new().with_max_passes(0).detect(&g);
        assert_eq!(membership.labels(), &[0, 1, 2]);
    }

    #[test]
    fn test_single_level_is_vertex_local_optimum() {
        let (_, g) = graph_of(&mixed_rows());
        let louvain = Louvain::new().with_max_levels(1);
        let membership = louvain.detect(&g);
        let q = louvain.modularity(&g, &membership).unwrap();

        let labels = membership.labels().to_vec();
        for v in 0..labels.len() {
            for target in 0..membership.community_count() {
                if target == labels[v] {
                    continue;
                }
                let mut moved = labels.clone();
                moved[v] = target;
                let q_moved = louvain
                    .modularity(&g, &Membership::from_labels(moved))
                    .unwrap();
                assert!(q_moved <= q + 1e-9, "moving vertex {v} to {target}: {q_moved} > {q}");
            }
        }
    }

    #[test]
    fn test_unreachable_min_gain_stops_after_first_level() {
        let (_, g) = graph_of(&mixed_rows());
        let one_level = Louvain::new().with_max_levels(1).detect(&g);
        let strict = Louvain::new().with_min_gain(f64::INFINITY).detect(&g);
        assert_eq!(strict, one_level);

        let full = Louvain::new().detect(&g);
        let q_one = Louvain::new().modularity(&g, &one_level).unwrap();
        let q_full = Louvain::new().modularity(&g, &full).unwrap();
        assert!(q_full >= q_one - 1e-12);
    }

    #[test]
    fn test_zero_resolution_merges_each_component() {
        let (_, g) = two_cliques();
        let louvain = Louvain::new().with_resolution(0.0);
        assert_eq!(louvain.resolution(), 0.0);

        let membership = louvain.detect(&g);
        assert_eq!(membership.community_count(), 1);
        assert_eq!(Louvain::new().detect(&g).community_count(), 2);
    }

    #[test]
    fn test_modularity_is_bitwise_reproducible() {
        let (_, g) = graph_of(&mixed_rows());
        let membership = Louvain::new().detect(&g);
        let first = Louvain::new().modularity(&g, &membership).unwrap();
        let second = Louvain::new().modularity(&g, &membership).unwrap();
        assert_eq!(first.to_bits(), second.to_bits());
    }

    #[test]
    fn test_labels_renumbered_by_first_appearance() {
        let membership = Membership::from_labels(vec![7, 3, 7, 9, 3]);
        assert_eq!(membership.labels(), &[0, 1, 0, 2, 1]);
        assert_eq!(membership.community_count(), 3);
    }
}
