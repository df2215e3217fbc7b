use std::collections::HashSet;
use std::path::PathBuf;

use lesion_trainer::dataset::{stratified_split, MetadataTable, LESION_TYPES};
use lesion_trainer::training::RunningMetric;
use proptest::prelude::*;

fn table_with_counts(counts: &[usize]) -> MetadataTable {
    let entries = counts
        .iter()
        .zip(LESION_TYPES.iter())
        .flat_map(|(&n, &(code, _))| {
            (0..n).map(move |i| {
                let id = format!("{}_{:05}", code, i);
                let path = PathBuf::from(format!("/data/{}.jpg", id));
                (id, code.to_string(), path)
            })
        })
        .collect::<Vec<_>>();
    MetadataTable::from_entries(entries).unwrap()
}

fn arb_counts() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..40, 1..=7)
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 48, .. ProptestConfig::default() })]

    #[test]
    fn prop_split_is_disjoint_and_covering(
        counts in arb_counts(),
        fraction in 0.05f64..0.95,
        seed in any::<u64>(),
    ) {
        let table = table_with_counts(&counts);
        let (train, val) = stratified_split(&table, fraction, seed).unwrap();

        let train_ids: HashSet<_> = train.records.iter().map(|r| r.image_id.clone()).collect();
        let val_ids: HashSet<_> = val.records.iter().map(|r| r.image_id.clone()).collect();
        let all_ids: HashSet<_> = table.records.iter().map(|r| r.image_id.clone()).collect();

        prop_assert!(train_ids.is_disjoint(&val_ids));
        prop_assert_eq!(train_ids.len() + val_ids.len(), table.len());
        let union: HashSet<_> = train_ids.union(&val_ids).cloned().collect();
        prop_assert_eq!(union, all_ids);

        let expected_val = (fraction * table.len() as f64).ceil() as usize;
        prop_assert_eq!(val.len(), expected_val.min(table.len()));
    }

    #[test]
    fn prop_split_is_seed_deterministic(
        counts in arb_counts(),
        fraction in 0.05f64..0.95,
        seed in any::<u64>(),
    ) {
        let table = table_with_counts(&counts);
        let first = stratified_split(&table, fraction, seed).unwrap();
        let second = stratified_split(&table, fraction, seed).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_running_metric_matches_weighted_mean(
        samples in prop::collection::vec((-100.0f64..100.0, 0.5f64..64.0), 1..50),
    ) {
        let mut metric = RunningMetric::new("loss");
        for &(value, weight) in &samples {
            metric.update(value, weight);
        }

        let total_weight: f64 = samples.iter().map(|&(_, w)| w).sum();
        let naive = samples.iter().map(|&(v, w)| v * w).sum::<f64>() / total_weight;
        let average = metric.average().unwrap();
        prop_assert!((average - naive).abs() <= 1e-9 * naive.abs().max(1.0));
        prop_assert_eq!(metric.current(), samples[samples.len() - 1].0);
    }
}

#[test]
fn empty_metric_is_an_error() {
    let metric = RunningMetric::new("val_acc");
    assert!(metric.average().is_err());
}
