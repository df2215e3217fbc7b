//! One validation epoch
//!
//! The autodiff model is converted with `valid()` to its inner backend for
//! the whole pass. The converted model lives only inside `validate`, so no
//! gradient graph is ever built here and leaving the function (normally or
//! through an error) leaves the no-grad region.

use burn::data::dataloader::batcher::Batcher;
use burn::module::{AutodiffModule, Module};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::ElementConversion;
use tracing::info;

use super::criterion::{Criterion, CrossEntropy};
use super::meter::RunningMetric;
use super::trainer::{count_correct, EpochMetrics};
use crate::dataset::loader::{BatchLoader, LesionBatch, LesionBatcher};
use crate::dataset::sample_source::LesionItem;
use crate::model::ImageClassifier;
use crate::utils::error::Result;

const RULE: &str = "------------------------------------------------------------";

/// Evaluates a model with an injected loss function
#[derive(Debug, Clone)]
pub struct Validator<C: Criterion = CrossEntropy> {
    criterion: C,
}

impl Default for Validator<CrossEntropy> {
    fn default() -> Self {
        Self::new(CrossEntropy)
    }
}

impl<C: Criterion> Validator<C> {
    pub fn new(criterion: C) -> Self {
        Self { criterion }
    }

    /// Average loss and accuracy of `model` over `loader`
    pub fn validate<B, M>(&self, loader: &BatchLoader, model: &M, epoch: usize) -> Result<EpochMetrics>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        M::InnerModule: ImageClassifier<B::InnerBackend>,
    {
        let model = model.valid();
        let device = model.devices().into_iter().next().unwrap_or_default();
        let metrics = self.evaluate::<B::InnerBackend, _>(loader, &model, epoch, &device)?;

        info!("{}", RULE);
        info!(
            "[epoch {}], [val loss {:.5}], [val acc {:.5}]",
            epoch, metrics.loss, metrics.accuracy
        );
        info!("{}", RULE);
        Ok(metrics)
    }

    /// Evaluation on a plain (non-autodiff) backend
    pub fn evaluate<B, M>(
        &self,
        loader: &BatchLoader,
        model: &M,
        epoch: usize,
        device: &B::Device,
    ) -> Result<EpochMetrics>
    where
        B: Backend,
        M: ImageClassifier<B>,
    {
        let batcher = LesionBatcher::new(loader.image_size());
        let mut loss_meter = RunningMetric::new("val_loss");
        let mut acc_meter = RunningMetric::new("val_acc");

        for items in loader.iter(epoch) {
            let batch: LesionBatch<B> =
                <LesionBatcher as Batcher<B, LesionItem, LesionBatch<B>>>::batch(
                    &batcher,
                    items?,
                    device,
                );
            let n = batch.targets.dims()[0];

            let logits = model.forward(batch.images);
            let loss: f64 = self
                .criterion
                .loss(logits.clone(), batch.targets.clone())
                .into_scalar()
                .elem();
            let correct = count_correct(logits, batch.targets);

            loss_meter.update_one(loss);
            acc_meter.update_one(correct as f64 / n as f64);
        }

        Ok(EpochMetrics {
            loss: loss_meter.average()?,
            accuracy: acc_meter.average()?,
        })
    }
}
