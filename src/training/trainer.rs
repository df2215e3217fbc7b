//! One training epoch
//!
//! Every batch runs forward, loss, backward and an optimizer step. Gradients
//! are computed fresh from each loss, so nothing accumulates across steps.

use burn::data::dataloader::batcher::Batcher;
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{backend::Backend, ElementConversion, Int, Tensor};
use tracing::{debug, info};

use super::criterion::{Criterion, CrossEntropy};
use super::history::MetricHistory;
use super::meter::RunningMetric;
use crate::dataset::loader::{BatchLoader, LesionBatch, LesionBatcher};
use crate::dataset::sample_source::LesionItem;
use crate::model::ImageClassifier;
use crate::utils::error::Result;

/// Batches between progress lines and history samples
pub const LOG_INTERVAL: usize = 100;

/// Averages over one epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub loss: f64,
    pub accuracy: f64,
}

/// Runs training epochs with an injected loss function
#[derive(Debug, Clone)]
pub struct Trainer<C: Criterion = CrossEntropy> {
    criterion: C,
    log_interval: usize,
}

impl Default for Trainer<CrossEntropy> {
    fn default() -> Self {
        Self::new(CrossEntropy)
    }
}

impl<C: Criterion> Trainer<C> {
    pub fn new(criterion: C) -> Self {
        Self {
            criterion,
            log_interval: LOG_INTERVAL,
        }
    }

    pub fn with_log_interval(mut self, log_interval: usize) -> Self {
        self.log_interval = log_interval.max(1);
        self
    }

    /// Train `model` for one pass over `loader`.
    ///
    /// Every `log_interval` batches the running averages are logged and
    /// appended to `history`. An epoch without batches yields an
    /// `EmptyMetric` error.
    #[allow(clippy::too_many_arguments)]
    pub fn train_epoch<B, M, O>(
        &self,
        loader: &BatchLoader,
        mut model: M,
        optimizer: &mut O,
        epoch: usize,
        learning_rate: f64,
        history: &mut MetricHistory,
        device: &B::Device,
    ) -> Result<(M, EpochMetrics)>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + ImageClassifier<B>,
        O: Optimizer<M, B>,
    {
        let batcher = LesionBatcher::new(loader.image_size());
        let total = loader.num_batches();
        let mut loss_meter = RunningMetric::new("train_loss");
        let mut acc_meter = RunningMetric::new("train_acc");

        for (i, items) in loader.iter(epoch).enumerate() {
            let batch: LesionBatch<B> =
                <LesionBatcher as Batcher<B, LesionItem, LesionBatch<B>>>::batch(
                    &batcher,
                    items?,
                    device,
                );
            let n = batch.targets.dims()[0];

            let logits = model.forward(batch.images);
            let loss = self.criterion.loss(logits.clone(), batch.targets.clone());
            let loss_value: f64 = loss.clone().into_scalar().elem();

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(learning_rate, model, grads);

            let correct = count_correct(logits, batch.targets);
            loss_meter.update_one(loss_value);
            acc_meter.update_one(correct as f64 / n as f64);

            if (i + 1) % self.log_interval == 0 {
                let (avg_loss, avg_acc) = (loss_meter.average()?, acc_meter.average()?);
                info!(
                    "[epoch {}], [iter {} / {}], [train loss {:.5}], [train acc {:.5}]",
                    epoch,
                    i + 1,
                    total,
                    avg_loss,
                    avg_acc
                );
                history.record(avg_loss, avg_acc);
            } else {
                debug!("epoch {} batch {}: loss {:.5}", epoch, i + 1, loss_value);
            }
        }

        let metrics = EpochMetrics {
            loss: loss_meter.average()?,
            accuracy: acc_meter.average()?,
        };
        Ok((model, metrics))
    }
}

/// Number of rows whose argmax matches the target
pub fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [n, _] = logits.dims();
    let predictions = logits.argmax(1).reshape([n]);
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

#[cfg(all(test, feature = "ndarray"))]
mod tests {
    use super::*;
    use std::sync::Arc;

    use burn::backend::Autodiff;
    use burn::optim::AdamConfig;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};

    use crate::dataset::{
        AugmentationConfig, Augmenter, ChannelStats, LoaderConfig, MetadataTable, SampleSource,
        TransformMode,
    };
    use crate::model::{LesionClassifier, LesionCnnConfig};
    use crate::training::validator::Validator;

    type TestBackend = NdArray;
    type TrainBackend = Autodiff<NdArray>;

    /// One image per batch, so the loader yields `n` batches
    fn single_item_loader(dir: &std::path::Path, n: u8) -> BatchLoader {
        let entries: Vec<_> = (0..n)
            .map(|i| {
                let path = dir.join(format!("lesion_{}.png", i));
                RgbImage::from_pixel(8, 8, Rgb([i * 9, 120, 250 - i * 4]))
                    .save(&path)
                    .unwrap();
                let code = if i % 3 == 0 { "mel" } else { "nv" };
                (format!("lesion_{}", i), code.to_string(), path)
            })
            .collect();
        let table = MetadataTable::from_entries(entries).unwrap();
        let source = SampleSource::new(
            &table,
            Augmenter::new(AugmentationConfig::none(), 32),
            Arc::new(ChannelStats {
                mean: [0.5; 3],
                std: [0.25; 3],
            }),
            TransformMode::Train,
        );
        BatchLoader::new(source, LoaderConfig::train(1, 0, 1, 7)).unwrap()
    }

    #[test]
    fn test_history_sampled_every_log_interval() {
        let dir = tempfile::tempdir().unwrap();
        let loader = single_item_loader(dir.path(), 25);
        assert_eq!(loader.num_batches(), 25);

        let device = Default::default();
        let model: LesionClassifier<TrainBackend> = LesionClassifier::Cnn(
            LesionCnnConfig::new(2)
                .with_base_filters(2)
                .with_hidden_size(4)
                .init(&device),
        );
        let mut optimizer = AdamConfig::new().init::<TrainBackend, LesionClassifier<TrainBackend>>();
        let mut history = MetricHistory::new();

        let trainer = Trainer::default().with_log_interval(10);
        let (model, metrics) = trainer
            .train_epoch::<TrainBackend, _, _>(
                &loader,
                model,
                &mut optimizer,
                1,
                1e-3,
                &mut history,
                &device,
            )
            .unwrap();
        assert!(metrics.loss.is_finite());
        // batches 10 and 20 only
        assert_eq!(history.len(), 2);

        let snapshot = history.clone();
        Validator::default()
            .validate::<TrainBackend, _>(&loader, &model, 1)
            .unwrap();
        assert_eq!(history, snapshot);
    }

    #[test]
    fn test_zero_log_interval_is_clamped() {
        let trainer = Trainer::default().with_log_interval(0);
        assert_eq!(trainer.log_interval, 1);
    }

    #[test]
    fn test_count_correct() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_floats(
            TensorData::new(vec![0.9f32, 0.1, 0.2, 0.8, 0.7, 0.3], [3, 2]),
            &device,
        );
        let targets =
            Tensor::<TestBackend, 1, Int>::from_data(TensorData::new(vec![0i64, 1, 1], [3]), &device);
        assert_eq!(count_correct(logits, targets), 2);
    }
}
