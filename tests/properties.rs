use std::collections::HashSet;

use flowcomm::{CommunityDetector, FlowAggregator, FlowGraph, FlowSummary, Louvain, PairKey};
use proptest::prelude::*;

fn aggregate(trips: &[(u64, u64)]) -> FlowSummary {
    let fields: Vec<(String, String)> = trips
        .iter()
        .map(|(o, d)| (o.to_string(), d.to_string()))
        .collect();
    FlowAggregator::default()
        .aggregate_fields(fields.iter().map(|(o, d)| (Some(o.as_str()), Some(d.as_str()))))
        .unwrap()
}

fn trips() -> impl Strategy<Value = Vec<(u64, u64)>> {
    prop::collection::vec((0u64..12, 0u64..12), 0..200)
}

proptest! {
    #[test]
    fn prop_no_pair_is_stored_in_both_directions(trips in trips()) {
        let summary = aggregate(&trips);
        let keys: HashSet<PairKey> = summary.flows.iter().map(|(k, _)| k).collect();
        for key in &keys {
            prop_assert!(!keys.contains(&key.reversed()));
            prop_assert_ne!(key.first, key.second);
        }
    }

    #[test]
    fn prop_weights_sum_to_non_self_loop_trips(trips in trips()) {
        let summary = aggregate(&trips);
        let expected = trips.iter().filter(|(o, d)| o != d).count() as u64;
        prop_assert_eq!(summary.flows.total_weight(), expected);
        prop_assert!(summary.flows.iter().all(|(_, w)| w > 0));
    }

    #[test]
    fn prop_blank_origin_counts_only_earlier_rows(
        (sample, cut) in trips().prop_flat_map(|t| {
            let len = t.len();
            (Just(t), 0..=len)
        })
    ) {
        let fields: Vec<(String, String)> = sample
            .iter()
            .map(|(o, d)| (o.to_string(), d.to_string()))
            .collect();
        let mut rows: Vec<(Option<&str>, Option<&str>)> = fields
            .iter()
            .map(|(o, d)| (Some(o.as_str()), Some(d.as_str())))
            .collect();
        rows.insert(cut, (Some(""), Some("1")));

        let summary = FlowAggregator::default().aggregate_fields(rows).unwrap();

        let expected = sample[..cut].iter().filter(|(o, d)| o != d).count() as u64;
        prop_assert_eq!(summary.flows.total_weight(), expected);
        prop_assert_eq!(summary.records_read, cut as u64);
        prop_assert_eq!(summary.truncated_at, Some(cut as u64 + 2));
    }

    #[test]
    fn prop_vertices_are_distinct_and_first_seen(trips in trips()) {
        let summary = aggregate(&trips);

        let mut expected = Vec::new();
        for &(o, d) in trips.iter().filter(|(o, d)| o != d) {
            for s in [o, d] {
                if !expected.contains(&s) {
                    expected.push(s);
                }
            }
        }
        prop_assert_eq!(summary.vertices.as_slice(), expected.as_slice());
    }

    #[test]
    fn prop_aggregation_is_idempotent(trips in trips()) {
        prop_assert_eq!(aggregate(&trips), aggregate(&trips));
    }

    #[test]
    fn prop_every_vertex_gets_one_label(trips in trips()) {
        let summary = aggregate(&trips);
        let graph = FlowGraph::build(&summary.vertices, &summary.flows).unwrap();
        let membership = Louvain::new().detect(&graph);

        prop_assert_eq!(membership.len(), summary.vertices.len());
        let communities = membership.communities(&summary.vertices);
        prop_assert_eq!(communities.len(), membership.community_count());
        prop_assert!(communities.values().all(|members| !members.is_empty()));
    }
}
