//! Training loop and end-to-end pipeline
//!
//! `TrainingLoop` alternates one training and one validation epoch and keeps
//! the best checkpoint by validation accuracy. `run_training` assembles the
//! whole run from a `TrainingConfig`: metadata, channel statistics, split,
//! balancing, loaders, model, optimizer, loop, and the final artifacts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::checkpoint::{BestTracker, CheckpointMetadata, CheckpointStore};
use super::criterion::Criterion;
use super::history::MetricHistory;
use super::trainer::{EpochMetrics, Trainer};
use super::validator::Validator;
use crate::config::TrainingConfig;
use crate::dataset::augmentation::{AugmentationConfig, Augmenter};
use crate::dataset::loader::{BatchLoader, LoaderConfig};
use crate::dataset::metadata::MetadataTable;
use crate::dataset::sample_source::{SampleSource, TransformMode};
use crate::dataset::split::{stratified_split, ClassBalancePlan, SplitSummary};
use crate::dataset::stats::{compute_channel_stats, ChannelStats};
use crate::model::{ArchitectureConfig, ImageClassifier, LesionClassifier, ModelRegistry};
use crate::utils::error::{LesionError, Result};
use crate::utils::format_duration;
use crate::IMAGE_SIZE;

pub const STATS_FILE: &str = "channel_stats.json";
pub const HISTORY_JSON_FILE: &str = "history.json";
pub const HISTORY_CHART_FILE: &str = "history.svg";

/// Metrics of one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    /// A checkpoint was written after this epoch
    pub improved: bool,
}

/// Outcome of a full run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs: Vec<EpochReport>,
    pub best_accuracy: Option<f64>,
    pub best_epoch: Option<usize>,
    pub checkpoint_path: Option<PathBuf>,
}

/// Static facts recorded with every checkpoint
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub architecture: String,
    pub input_size: usize,
    pub class_names: Vec<String>,
    pub channel_stats: ChannelStats,
}

/// Sequential epochs of train, validate, maybe checkpoint
pub struct TrainingLoop<C: Criterion> {
    pub trainer: Trainer<C>,
    pub validator: Validator<C>,
    pub store: CheckpointStore,
    pub info: RunInfo,
    pub num_epochs: usize,
    pub learning_rate: f64,
}

impl<C: Criterion> TrainingLoop<C> {
    /// Run all epochs; returns the final model and the report.
    ///
    /// The checkpoint is written only when validation accuracy strictly
    /// exceeds the best seen so far.
    #[allow(clippy::too_many_arguments)]
    pub fn run<B, M, O>(
        &self,
        mut model: M,
        optimizer: &mut O,
        train_loader: &BatchLoader,
        val_loader: &BatchLoader,
        history: &mut MetricHistory,
        device: &B::Device,
    ) -> Result<(M, TrainingReport)>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + ImageClassifier<B>,
        M::InnerModule: ImageClassifier<B::InnerBackend>,
        O: Optimizer<M, B>,
    {
        let mut best = BestTracker::new();
        let mut report = TrainingReport::default();

        for epoch in 1..=self.num_epochs {
            let started = Instant::now();

            let (trained, train) = self.trainer.train_epoch(
                train_loader,
                model,
                optimizer,
                epoch,
                self.learning_rate,
                history,
                device,
            )?;
            model = trained;

            let val = self.validator.validate(val_loader, &model, epoch)?;

            info!(
                "Epoch {}/{} done in {}: train loss {:.5}, train acc {:.5}, val loss {:.5}, val acc {:.5}",
                epoch,
                self.num_epochs,
                format_duration(started.elapsed().as_secs_f64()),
                train.loss,
                train.accuracy,
                val.loss,
                val.accuracy
            );

            let improved = best.observe(val.accuracy);
            if improved {
                let metadata = self.metadata(epoch, &val);
                let path = self.store.save(&model, &metadata)?;
                info!(
                    "*****************************************************\n\
                     best record: [epoch {}], [val loss {:.5}], [val acc {:.5}]\n\
                     *****************************************************",
                    epoch, val.loss, val.accuracy
                );
                report.best_epoch = Some(epoch);
                report.checkpoint_path = Some(path);
            }
            report.best_accuracy = best.best();

            report.epochs.push(EpochReport {
                epoch,
                train_loss: train.loss,
                train_accuracy: train.accuracy,
                val_loss: val.loss,
                val_accuracy: val.accuracy,
                improved,
            });
        }

        Ok((model, report))
    }

    fn metadata(&self, epoch: usize, val: &EpochMetrics) -> CheckpointMetadata {
        CheckpointMetadata::new(
            epoch,
            val.accuracy,
            val.loss,
            &self.info.architecture,
            self.info.input_size,
            self.info.class_names.clone(),
            self.info.channel_stats,
        )
    }
}

/// Everything derived from the metadata before any model exists
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub table: MetadataTable,
    pub train: MetadataTable,
    pub balanced_train: MetadataTable,
    pub val: MetadataTable,
    pub summary: SplitSummary,
}

/// Load metadata, split, and balance the training partition
pub fn prepare_data(config: &TrainingConfig) -> Result<PreparedData> {
    let table = MetadataTable::load(&config.data.data_dir, &config.data.metadata_path())?;
    let (train, val) = stratified_split(&table, config.data.val_fraction, config.data.split_seed)?;
    let plan = ClassBalancePlan::from_codes(&config.data.balance_factors, &table)?;
    let balanced_train = plan.apply(&train)?;

    let summary = SplitSummary::new(&train, &balanced_train, &val);
    summary.log();

    Ok(PreparedData {
        table,
        train,
        balanced_train,
        val,
        summary,
    })
}

/// Compute channel statistics over every image in `table` and store them
pub fn compute_and_save_stats(table: &MetadataTable, output_dir: &Path) -> Result<ChannelStats> {
    let stats = compute_channel_stats(&table.image_paths(), IMAGE_SIZE as u32)?;
    std::fs::create_dir_all(output_dir)?;
    stats.save(&output_dir.join(STATS_FILE))?;
    Ok(stats)
}

/// Run the full pipeline on backend `B`
pub fn run_training<B: AutodiffBackend>(config: &TrainingConfig) -> Result<TrainingReport> {
    config.validate()?;
    let device = B::Device::default();
    let output_dir = &config.data.output_dir;
    std::fs::create_dir_all(output_dir)?;
    config.save(&output_dir.join("config.toml"))?;

    let data = prepare_data(config)?;
    if data.balanced_train.is_empty() || data.val.is_empty() {
        return Err(LesionError::Config(
            "Split produced an empty training or validation partition".into(),
        ));
    }

    let stats = Arc::new(compute_and_save_stats(&data.table, output_dir)?);

    B::seed(config.training.shuffle_seed);
    let registry = ModelRegistry::<B>::with_builtins();
    let arch = ArchitectureConfig::from_model_config(&config.model, data.table.num_classes());
    let built = registry.build(&config.model.architecture, &arch, &device)?;
    let input_size = built.input_size;

    let params = &config.training;
    let train_source = SampleSource::new(
        &data.balanced_train,
        Augmenter::new(config.augmentation.clone(), input_size as u32),
        Arc::clone(&stats),
        TransformMode::Train,
    );
    let val_source = SampleSource::new(
        &data.val,
        Augmenter::new(AugmentationConfig::none(), input_size as u32),
        Arc::clone(&stats),
        TransformMode::Eval,
    );
    let train_loader = BatchLoader::new(
        train_source,
        LoaderConfig::train(
            params.batch_size,
            params.num_workers,
            params.prefetch_batches,
            params.shuffle_seed,
        ),
    )?;
    let val_loader = BatchLoader::new(
        val_source,
        LoaderConfig::eval(params.batch_size, params.num_workers, params.prefetch_batches),
    )?;

    let weight_decay =
        (params.weight_decay > 0.0).then(|| WeightDecayConfig::new(params.weight_decay));
    let mut optimizer = AdamConfig::new()
        .with_weight_decay(weight_decay)
        .init::<B, LesionClassifier<B>>();

    info!(
        "Training '{}' for {} epochs: {} train / {} val samples, batch size {}, lr {}",
        config.model.architecture,
        params.num_epochs,
        train_loader.num_items(),
        val_loader.num_items(),
        params.batch_size,
        params.learning_rate
    );

    let training_loop = TrainingLoop {
        trainer: Trainer::default(),
        validator: Validator::default(),
        store: CheckpointStore::new(output_dir)?,
        info: RunInfo {
            architecture: config.model.architecture.clone(),
            input_size,
            class_names: data.table.class_names.clone(),
            channel_stats: *stats,
        },
        num_epochs: params.num_epochs,
        learning_rate: params.learning_rate,
    };

    let mut history = MetricHistory::new();
    let started = Instant::now();
    let (_, report) = training_loop.run(
        built.model,
        &mut optimizer,
        &train_loader,
        &val_loader,
        &mut history,
        &device,
    )?;

    history.save_json(&output_dir.join(HISTORY_JSON_FILE))?;
    history.save_chart(&output_dir.join(HISTORY_CHART_FILE))?;

    info!(
        "Training finished in {}; best val acc {:?} at epoch {:?}",
        format_duration(started.elapsed().as_secs_f64()),
        report.best_accuracy,
        report.best_epoch
    );
    Ok(report)
}
