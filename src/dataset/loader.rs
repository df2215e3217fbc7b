//! Parallel prefetching batch loader
//!
//! Items of a batch are decoded on a rayon pool of `num_workers` threads;
//! a single producer thread hands finished batches to the training thread
//! through a bounded channel of depth `prefetch_batches`. With
//! `num_workers = 0` batches are loaded inline on the caller's thread.
//!
//! Every item gets its own RNG derived from `(seed, epoch, position)`, so the
//! produced batches do not depend on the number of workers.
//!
//! An epoch either delivers every batch or ends with an error; a producer
//! that dies early is reported rather than silently shortening the epoch.

use std::any::Any;
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use super::sample_source::{LesionItem, SampleSource};
use crate::utils::error::{LesionError, Result};

/// Loader settings
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub batch_size: usize,
    pub num_workers: usize,
    pub prefetch_batches: usize,
    /// Reshuffle the order every epoch
    pub shuffle: bool,
    pub seed: u64,
}

impl LoaderConfig {
    /// Shuffled loader for training
    pub fn train(batch_size: usize, num_workers: usize, prefetch_batches: usize, seed: u64) -> Self {
        Self {
            batch_size,
            num_workers,
            prefetch_batches,
            shuffle: true,
            seed,
        }
    }

    /// Sequential loader for evaluation
    pub fn eval(batch_size: usize, num_workers: usize, prefetch_batches: usize) -> Self {
        Self {
            batch_size,
            num_workers,
            prefetch_batches,
            shuffle: false,
            seed: 0,
        }
    }
}

/// Batch loader over a `SampleSource`
pub struct BatchLoader {
    source: Arc<SampleSource>,
    config: LoaderConfig,
    pool: Option<Arc<ThreadPool>>,
}

impl BatchLoader {
    pub fn new(source: SampleSource, config: LoaderConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(LesionError::Config("batch_size must be positive".into()));
        }

        let pool = if config.num_workers > 0 {
            let pool = ThreadPoolBuilder::new()
                .num_threads(config.num_workers)
                .thread_name(|i| format!("loader-{}", i))
                .build()
                .map_err(|e| LesionError::Dataset(format!("Failed to build loader pool: {}", e)))?;
            Some(Arc::new(pool))
        } else {
            None
        };

        Ok(Self {
            source: Arc::new(source),
            config,
            pool,
        })
    }

    /// Number of batches per epoch (the last one may be short)
    pub fn num_batches(&self) -> usize {
        self.source.len().div_ceil(self.config.batch_size)
    }

    pub fn num_items(&self) -> usize {
        self.source.len()
    }

    pub fn image_size(&self) -> usize {
        self.source.image_size()
    }

    /// Index order for an epoch
    pub fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.source.len()).collect();
        if self.config.shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
            rng.set_stream(epoch as u64);
            order.shuffle(&mut rng);
        }
        order
    }

    /// Iterate the batches of one epoch.
    ///
    /// The first failing item ends the iteration with its error.
    pub fn iter(&self, epoch: usize) -> BatchIter {
        let order = self.epoch_order(epoch);
        let batch_size = self.config.batch_size;
        let seed = self.config.seed;
        let total = self.num_batches();

        match &self.pool {
            None => BatchIter::Inline {
                source: Arc::clone(&self.source),
                order,
                batch_size,
                seed,
                epoch,
                next: 0,
                failed: false,
            },
            Some(pool) => {
                let (tx, rx) = sync_channel(self.config.prefetch_batches.max(1));
                let source = Arc::clone(&self.source);
                let pool = Arc::clone(pool);

                let handle = std::thread::spawn(move || {
                    for (b, chunk) in order.chunks(batch_size).enumerate() {
                        let start = b * batch_size;
                        let batch: Result<Vec<LesionItem>> = pool.install(|| {
                            chunk
                                .par_iter()
                                .enumerate()
                                .map(|(j, &index)| {
                                    let mut rng = item_rng(seed, epoch, start + j);
                                    source.get(index, &mut rng)
                                })
                                .collect()
                        });
                        let failed = batch.is_err();
                        if tx.send(batch).is_err() || failed {
                            break;
                        }
                    }
                    debug!("Loader producer for epoch {} finished", epoch);
                });

                BatchIter::Prefetch {
                    rx: Some(rx),
                    worker: Some(handle),
                    remaining: total,
                    total,
                }
            }
        }
    }
}

/// RNG for the item at `position` of an epoch's order
pub fn item_rng(seed: u64, epoch: usize, position: usize) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(splitmix64(seed ^ splitmix64(epoch as u64)));
    rng.set_stream(position as u64);
    rng
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Batches of one epoch
pub enum BatchIter {
    Inline {
        source: Arc<SampleSource>,
        order: Vec<usize>,
        batch_size: usize,
        seed: u64,
        epoch: usize,
        next: usize,
        failed: bool,
    },
    Prefetch {
        rx: Option<Receiver<Result<Vec<LesionItem>>>>,
        worker: Option<JoinHandle<()>>,
        remaining: usize,
        total: usize,
    },
}

impl Iterator for BatchIter {
    type Item = Result<Vec<LesionItem>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            BatchIter::Inline {
                source,
                order,
                batch_size,
                seed,
                epoch,
                next,
                failed,
            } => {
                if *failed || *next >= order.len() {
                    return None;
                }
                let start = *next;
                let end = (start + *batch_size).min(order.len());
                *next = end;

                let batch: Result<Vec<LesionItem>> = order[start..end]
                    .iter()
                    .enumerate()
                    .map(|(j, &index)| {
                        let mut rng = item_rng(*seed, *epoch, start + j);
                        source.get(index, &mut rng)
                    })
                    .collect();
                *failed = batch.is_err();
                Some(batch)
            }
            BatchIter::Prefetch {
                rx,
                worker,
                remaining,
                total,
            } => {
                if *remaining == 0 {
                    return None;
                }
                let received = rx.as_ref()?.recv();
                match received {
                    Ok(batch) => {
                        *remaining = if batch.is_err() { 0 } else { *remaining - 1 };
                        Some(batch)
                    }
                    Err(_) => {
                        // Producer hung up before the epoch was complete
                        let done = *total - *remaining;
                        *remaining = 0;
                        rx.take();
                        let cause = match worker.take().map(JoinHandle::join) {
                            Some(Err(payload)) => panic_message(payload.as_ref()),
                            _ => "channel closed".to_string(),
                        };
                        Some(Err(LesionError::Dataset(format!(
                            "Loader worker terminated after {}/{} batches: {}",
                            done, total, cause
                        ))))
                    }
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "worker panicked".to_string()
    }
}

impl Drop for BatchIter {
    fn drop(&mut self) {
        if let BatchIter::Prefetch { rx, worker, .. } = self {
            // Disconnect first so a producer blocked on a full channel exits
            rx.take();
            if let Some(h) = worker.take() {
                let _ = h.join();
            }
        }
    }
}

/// A batch of lesion images ready for training
#[derive(Clone, Debug)]
pub struct LesionBatch<B: Backend> {
    /// Images tensor [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Class indices [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Turns loaded items into device tensors
#[derive(Clone, Debug)]
pub struct LesionBatcher {
    image_size: usize,
}

impl LesionBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, LesionItem, LesionBatch<B>> for LesionBatcher {
    fn batch(&self, items: Vec<LesionItem>, device: &B::Device) -> LesionBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let images_data: Vec<f32> = items
            .iter()
            .flat_map(|item| item.image.iter().copied())
            .collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        LesionBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::augmentation::{AugmentationConfig, Augmenter};
    use crate::dataset::metadata::MetadataTable;
    use crate::dataset::sample_source::TransformMode;
    use crate::dataset::stats::ChannelStats;
    use image::{Rgb, RgbImage};
    use rand::Rng;

    fn source(dir: &std::path::Path, n: u8, mode: TransformMode) -> SampleSource {
        let entries: Vec<_> = (0..n)
            .map(|i| {
                let path = dir.join(format!("img_{}.png", i));
                RgbImage::from_pixel(12, 12, Rgb([i * 10, 100, 200 - i]))
                    .save(&path)
                    .unwrap();
                let code = if i % 2 == 0 { "nv" } else { "mel" };
                (format!("img_{}", i), code.to_string(), path)
            })
            .collect();
        let table = MetadataTable::from_entries(entries).unwrap();
        SampleSource::new(
            &table,
            Augmenter::new(AugmentationConfig::default(), 8),
            Arc::new(ChannelStats {
                mean: [0.5; 3],
                std: [0.5; 3],
            }),
            mode,
        )
    }

    fn collect(loader: &BatchLoader, epoch: usize) -> Vec<Vec<LesionItem>> {
        loader.iter(epoch).map(|b| b.unwrap()).collect()
    }

    #[test]
    fn test_batch_count_and_short_last_batch() {
        let dir = tempfile::tempdir().unwrap();
        let loader = BatchLoader::new(
            source(dir.path(), 7, TransformMode::Eval),
            LoaderConfig::eval(3, 0, 2),
        )
        .unwrap();
        assert_eq!(loader.num_batches(), 3);
        let sizes: Vec<_> = collect(&loader, 0).iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn test_shuffle_is_a_permutation_and_varies_by_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let loader = BatchLoader::new(
            source(dir.path(), 20, TransformMode::Train),
            LoaderConfig::train(4, 0, 2, 10),
        )
        .unwrap();
        let mut a = loader.epoch_order(0);
        let b = loader.epoch_order(1);
        assert_ne!(a, b);
        assert_eq!(a, loader.epoch_order(0));
        a.sort_unstable();
        assert_eq!(a, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_worker_count_does_not_change_batches() {
        let dir = tempfile::tempdir().unwrap();
        let inline = BatchLoader::new(
            source(dir.path(), 9, TransformMode::Train),
            LoaderConfig::train(4, 0, 1, 3),
        )
        .unwrap();
        let parallel = BatchLoader::new(
            source(dir.path(), 9, TransformMode::Train),
            LoaderConfig::train(4, 3, 2, 3),
        )
        .unwrap();

        let a = collect(&inline, 2);
        let b = collect(&parallel, 2);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            for (i, j) in x.iter().zip(y) {
                assert_eq!(i.image, j.image);
                assert_eq!(i.label, j.label);
            }
        }
    }

    #[test]
    fn test_error_ends_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let loader = BatchLoader::new(
            source(dir.path(), 6, TransformMode::Eval),
            LoaderConfig::eval(2, 2, 1),
        )
        .unwrap();
        std::fs::remove_file(dir.path().join("img_3.png")).unwrap();

        let results: Vec<_> = loader.iter(0).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(LesionError::ImageLoad(_, _))));
    }

    #[test]
    fn test_dropping_iterator_early_joins_producer() {
        let dir = tempfile::tempdir().unwrap();
        let loader = BatchLoader::new(
            source(dir.path(), 12, TransformMode::Eval),
            LoaderConfig::eval(1, 2, 1),
        )
        .unwrap();
        let mut iter = loader.iter(0);
        assert!(iter.next().unwrap().is_ok());
        drop(iter);
    }

    #[test]
    fn test_dead_producer_is_an_error_not_a_short_epoch() {
        let (tx, rx) = sync_channel::<Result<Vec<LesionItem>>>(1);
        let handle = std::thread::spawn(move || {
            tx.send(Ok(Vec::new())).unwrap();
            panic!("decoder exploded");
        });
        let mut iter = BatchIter::Prefetch {
            rx: Some(rx),
            worker: Some(handle),
            remaining: 3,
            total: 3,
        };

        assert!(iter.next().unwrap().is_ok());
        match iter.next() {
            Some(Err(LesionError::Dataset(msg))) => {
                assert!(msg.contains("1/3"), "{}", msg);
                assert!(msg.contains("decoder exploded"), "{}", msg);
            }
            other => panic!("expected a dataset error, got {:?}", other.map(|b| b.map(|v| v.len()))),
        }
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_item_rng_depends_on_all_inputs() {
        let draw = |s, e, p| item_rng(s, e, p).gen::<u64>();
        assert_eq!(draw(1, 2, 3), draw(1, 2, 3));
        assert_ne!(draw(1, 2, 3), draw(1, 2, 4));
        assert_ne!(draw(1, 2, 3), draw(1, 3, 3));
        assert_ne!(draw(1, 2, 3), draw(2, 2, 3));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = BatchLoader::new(
            source(dir.path(), 2, TransformMode::Eval),
            LoaderConfig::eval(0, 0, 1),
        );
        assert!(matches!(result, Err(LesionError::Config(_))));
    }
}
