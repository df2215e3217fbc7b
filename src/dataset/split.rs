//! Stratified splitting and class-balancing oversampling

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::metadata::MetadataTable;
use crate::utils::error::{LesionError, Result};

/// Split `table` into `(train, val)` preserving class proportions.
///
/// The validation size is `ceil(val_fraction * N)`. Per-class quotas are
/// allocated proportionally by largest remainder (ties go to the lower class
/// index). Within a class, members are shuffled with a `ChaCha8Rng` seeded
/// from `seed` and the first `quota` go to validation. Both partitions keep
/// the original table order.
pub fn stratified_split(
    table: &MetadataTable,
    val_fraction: f64,
    seed: u64,
) -> Result<(MetadataTable, MetadataTable)> {
    if !(val_fraction > 0.0 && val_fraction < 1.0) {
        return Err(LesionError::Config(format!(
            "val_fraction must lie in (0, 1), got {}",
            val_fraction
        )));
    }
    if table.is_empty() {
        return Err(LesionError::Config("Cannot split an empty table".into()));
    }

    let n = table.len();
    let n_val = ((val_fraction * n as f64).ceil() as usize).min(n);
    let quotas = allocate_quotas(&table.class_counts(), n_val);

    let mut members: Vec<Vec<usize>> = vec![Vec::new(); table.num_classes()];
    for (i, record) in table.records.iter().enumerate() {
        members[record.class_index].push(i);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut in_val = vec![false; n];
    for (class_members, &quota) in members.iter_mut().zip(&quotas) {
        class_members.shuffle(&mut rng);
        for &i in class_members.iter().take(quota) {
            in_val[i] = true;
        }
    }

    let mut train = Vec::with_capacity(n - n_val);
    let mut val = Vec::with_capacity(n_val);
    for (record, &is_val) in table.records.iter().zip(&in_val) {
        if is_val {
            val.push(record.clone());
        } else {
            train.push(record.clone());
        }
    }

    Ok((table.with_records(train), table.with_records(val)))
}

/// Largest-remainder allocation of `total` slots over `counts`
fn allocate_quotas(counts: &[usize], total: usize) -> Vec<usize> {
    let n: usize = counts.iter().sum();
    if n == 0 {
        return vec![0; counts.len()];
    }

    let mut quotas: Vec<usize> = counts.iter().map(|&c| c * total / n).collect();
    let assigned: usize = quotas.iter().sum();

    let mut order: Vec<usize> = (0..counts.len()).collect();
    // Stable sort keeps lower class indices first on equal remainders
    order.sort_by(|&a, &b| (counts[b] * total % n).cmp(&(counts[a] * total % n)));
    for &c in order.iter().take(total - assigned) {
        quotas[c] += 1;
    }
    quotas
}

/// Oversampling plan: class index to repeat factor.
///
/// A factor of 0, 1 or no entry leaves the class unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassBalancePlan {
    factors: BTreeMap<usize, usize>,
}

impl ClassBalancePlan {
    pub fn new(factors: BTreeMap<usize, usize>) -> Self {
        Self { factors }
    }

    /// Resolve per-diagnosis-code factors against the table's label set
    pub fn from_codes(codes: &BTreeMap<String, usize>, table: &MetadataTable) -> Result<Self> {
        let mut factors = BTreeMap::new();
        for (code, &factor) in codes {
            let class = table.class_index_of_code(code).ok_or_else(|| {
                LesionError::Config(format!(
                    "Balance factor names class '{}' which is not in the label set",
                    code
                ))
            })?;
            factors.insert(class, factor);
        }
        Ok(Self { factors })
    }

    /// Effective multiplier of a class
    pub fn multiplier(&self, class: usize) -> usize {
        match self.factors.get(&class) {
            Some(&k) if k >= 1 => k,
            _ => 1,
        }
    }

    /// Append `multiplier - 1` copies of each class's original rows.
    ///
    /// Copies are appended class by class in index order and are not
    /// shuffled.
    pub fn apply(&self, train: &MetadataTable) -> Result<MetadataTable> {
        if let Some(&class) = self.factors.keys().find(|&&c| c >= train.num_classes()) {
            return Err(LesionError::Config(format!(
                "Balance plan names class {} but only {} classes exist",
                class,
                train.num_classes()
            )));
        }

        let mut records = train.records.clone();
        for class in 0..train.num_classes() {
            let k = self.multiplier(class);
            if k <= 1 {
                continue;
            }
            let rows: Vec<_> = train
                .records
                .iter()
                .filter(|r| r.class_index == class)
                .cloned()
                .collect();
            for _ in 1..k {
                records.extend(rows.iter().cloned());
            }
        }
        Ok(train.with_records(records))
    }
}

/// Per-class counts through the split and balancing stages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitSummary {
    pub class_names: Vec<String>,
    pub train_before: Vec<usize>,
    pub train_after: Vec<usize>,
    pub val: Vec<usize>,
}

impl SplitSummary {
    pub fn new(train: &MetadataTable, balanced: &MetadataTable, val: &MetadataTable) -> Self {
        Self {
            class_names: train.class_names.clone(),
            train_before: train.class_counts(),
            train_after: balanced.class_counts(),
            val: val.class_counts(),
        }
    }

    pub fn log(&self) {
        info!("{:<32} {:>8} {:>10} {:>8}", "class", "train", "balanced", "val");
        for (i, name) in self.class_names.iter().enumerate() {
            info!(
                "{:<32} {:>8} {:>10} {:>8}",
                name, self.train_before[i], self.train_after[i], self.val[i]
            );
        }
        info!(
            "{:<32} {:>8} {:>10} {:>8}",
            "total",
            self.train_before.iter().sum::<usize>(),
            self.train_after.iter().sum::<usize>(),
            self.val.iter().sum::<usize>()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::LESION_TYPES;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn table_with_counts(counts: &[(&str, usize)]) -> MetadataTable {
        let entries = counts.iter().flat_map(|&(code, n)| {
            (0..n).map(move |i| {
                let id = format!("{}_{}", code, i);
                let path = PathBuf::from(format!("/data/{}.jpg", id));
                (id, code.to_string(), path)
            })
        });
        MetadataTable::from_entries(entries.collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn test_allocate_quotas_largest_remainder() {
        assert_eq!(allocate_quotas(&[5, 3, 2], 3), vec![1, 1, 1]);
        assert_eq!(allocate_quotas(&[6, 3, 1], 5), vec![3, 2, 0]);
        assert_eq!(allocate_quotas(&[1, 1, 1], 2), vec![1, 1, 0]);
        assert_eq!(allocate_quotas(&[10, 0], 2), vec![2, 0]);
    }

    #[test]
    fn test_split_is_stratified_and_disjoint() {
        let table = table_with_counts(&[("nv", 60), ("mel", 30), ("df", 10)]);
        let (train, val) = stratified_split(&table, 0.2, 101).unwrap();

        assert_eq!(val.len(), 20);
        assert_eq!(train.len(), 80);

        let val_ids: HashSet<_> = val.records.iter().map(|r| &r.image_id).collect();
        assert!(train.records.iter().all(|r| !val_ids.contains(&r.image_id)));

        let nv = table.class_index_of_code("nv").unwrap();
        let df = table.class_index_of_code("df").unwrap();
        assert_eq!(val.class_counts()[nv], 12);
        assert_eq!(val.class_counts()[df], 2);
    }

    #[test]
    fn test_split_is_deterministic_per_seed() {
        let table = table_with_counts(&[("nv", 40), ("bkl", 15)]);
        let (_, a) = stratified_split(&table, 0.3, 7).unwrap();
        let (_, b) = stratified_split(&table, 0.3, 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_split_rejects_bad_fraction() {
        let table = table_with_counts(&[("nv", 4)]);
        assert!(stratified_split(&table, 0.0, 1).is_err());
        assert!(stratified_split(&table, 1.0, 1).is_err());
    }

    #[test]
    fn test_reference_balance_scenario() {
        // One class per code, 100 rows each; factors listed in class-index order
        let codes: Vec<&str> = {
            let mut by_label: Vec<_> = LESION_TYPES.iter().collect();
            by_label.sort_by_key(|(_, label)| *label);
            by_label.iter().map(|(code, _)| *code).collect()
        };
        let counts: Vec<(&str, usize)> = codes.iter().map(|&c| (c, 100)).collect();
        let table = table_with_counts(&counts);

        let factors = [15, 10, 5, 50, 0, 40, 5];
        let plan = ClassBalancePlan::new(factors.iter().copied().enumerate().collect());
        let balanced = plan.apply(&table).unwrap();

        assert_eq!(
            balanced.class_counts(),
            vec![1500, 1000, 500, 5000, 100, 4000, 500]
        );
        assert_eq!(balanced.records[..700], table.records[..]);
    }

    #[test]
    fn test_zero_and_missing_factors_are_noops() {
        let table = table_with_counts(&[("nv", 3), ("mel", 2)]);
        let mel = table.class_index_of_code("mel").unwrap();
        let plan = ClassBalancePlan::new([(mel, 0)].into_iter().collect());
        assert_eq!(plan.apply(&table).unwrap(), table);
        assert_eq!(plan.multiplier(mel), 1);
    }

    #[test]
    fn test_from_codes_rejects_absent_class() {
        let table = table_with_counts(&[("nv", 3), ("mel", 2)]);
        let codes: BTreeMap<String, usize> = [("df".to_string(), 50)].into_iter().collect();
        assert!(matches!(
            ClassBalancePlan::from_codes(&codes, &table),
            Err(LesionError::Config(_))
        ));

        let codes: BTreeMap<String, usize> = [("mel".to_string(), 3)].into_iter().collect();
        let plan = ClassBalancePlan::from_codes(&codes, &table).unwrap();
        let mel = table.class_index_of_code("mel").unwrap();
        assert_eq!(plan.apply(&table).unwrap().class_counts()[mel], 6);
    }

    #[test]
    fn test_apply_rejects_out_of_range_class() {
        let table = table_with_counts(&[("nv", 3)]);
        let plan = ClassBalancePlan::new([(4, 2)].into_iter().collect());
        assert!(plan.apply(&table).is_err());
    }
}
