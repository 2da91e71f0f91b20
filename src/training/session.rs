//! Training session
//!
//! One run over a registry entry: bind the split's label set to a fresh head,
//! then alternate train and validation phases for a fixed number of epochs,
//! keeping the best-validation checkpoint. The run works on a staged copy of
//! the adapter; the entry only changes when every epoch completed.

use std::panic::{catch_unwind, AssertUnwindSafe};

use burn::data::dataloader::batcher::Batcher;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, AdamWConfig, Optimizer, RmsPropConfig, SgdConfig};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::checkpoint::Checkpoint;
use super::metrics::{MetricLog, MetricRecord, Phase, PhaseStats};
use super::scheduler::StepLr;
use super::tracker::{ExperimentTracker, TrackerRecord, TrackingInfo};
use super::{OptimizerKind, TrainingConfig};
use crate::dataset::{DatasetSplit, ImageBatch, ImageBatcher};
use crate::model::{BackboneAdapter, Classifier, Mode};
use crate::registry::{ModelEntry, ModelState};
use crate::utils::error::{panic_message, HubError, Result};
use crate::utils::logging::TrainingLogger;

/// What a successful run reports back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model: String,
    pub label_set: Vec<String>,
    pub epochs: usize,
    /// Best validation accuracy
    pub last_record: f64,
    /// Epoch of the stored checkpoint, if any epoch improved on 0
    pub best_epoch: Option<usize>,
    pub trainable_parameter_count: usize,
    pub metrics: MetricLog,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking: Option<TrackingInfo>,
}

/// Results of the epoch loop before they are committed
struct RunOutcome<B: AutodiffBackend> {
    metrics: MetricLog,
    last_record: f64,
    checkpoint: Option<Checkpoint<B::InnerBackend>>,
}

/// A single training run
pub struct TrainingSession<'a> {
    config: TrainingConfig,
    tracker: Option<&'a mut dyn ExperimentTracker>,
}

impl<'a> TrainingSession<'a> {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            tracker: None,
        }
    }

    /// Report every phase to `tracker`
    pub fn with_tracker(mut self, tracker: &'a mut dyn ExperimentTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Train `entry` on `split`
    ///
    /// On success the entry holds the trained adapter, state `Trained`, the
    /// metric log, `last_record` and the best checkpoint. On failure it is
    /// left exactly as it was.
    pub fn run<B: AutodiffBackend>(
        mut self,
        entry: &mut ModelEntry<B>,
        split: &DatasetSplit,
    ) -> Result<TrainingReport> {
        self.config.validate()?;
        if split.train.samples().is_empty() {
            return Err(HubError::TrainingFailed(
                "training split contains no images".to_string(),
            ));
        }

        let mut staged = entry.adapter.staged_copy();
        staged.initialize_head(split.label_set.clone(), self.config.freeze_backbone)?;

        info!(
            model = %entry.name,
            "Training {} on {} classes: {} train / {} valid images, {} epochs, {} lr {}",
            staged.kind(),
            split.label_set.len(),
            split.train.samples().len(),
            split.valid.samples().len(),
            self.config.epochs,
            self.config.optimizer,
            self.config.learning_rate
        );

        let name = entry.name.clone();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.run_with_optimizer(&name, &mut staged, split)
        }))
        .unwrap_or_else(|payload| Err(HubError::TrainingFailed(panic_message(payload))));

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(model = %name, "Training failed: {}", err);
                return Err(match err {
                    HubError::TrainingFailed(_) => err,
                    other => HubError::TrainingFailed(other.to_string()),
                });
            }
        };

        staged.set_mode(Mode::Eval);
        let report = TrainingReport {
            model: name,
            label_set: split.label_set.clone(),
            epochs: self.config.epochs,
            last_record: outcome.last_record,
            best_epoch: outcome.checkpoint.as_ref().map(|c| c.epoch),
            trainable_parameter_count: staged.trainable_parameter_count(),
            metrics: outcome.metrics.clone(),
            tracking: self.tracker.as_ref().map(|t| t.info()),
        };

        entry.adapter = staged;
        entry.state = ModelState::Trained;
        entry.last_record = outcome.last_record;
        entry.metrics = outcome.metrics;
        entry.checkpoint = outcome.checkpoint;
        entry.test_accuracy = None;
        entry.tracking = report.tracking.clone();

        Ok(report)
    }

    fn run_with_optimizer<B: AutodiffBackend>(
        &mut self,
        name: &str,
        adapter: &mut BackboneAdapter<B>,
        split: &DatasetSplit,
    ) -> Result<RunOutcome<B>> {
        match self.config.optimizer {
            OptimizerKind::Adam => {
                let optimizer = AdamConfig::new().init::<B, Classifier<B>>();
                self.run_epochs(name, adapter, split, optimizer)
            }
            OptimizerKind::AdamW => {
                let optimizer = AdamWConfig::new().init::<B, Classifier<B>>();
                self.run_epochs(name, adapter, split, optimizer)
            }
            OptimizerKind::Sgd => {
                let optimizer = SgdConfig::new().init::<B, Classifier<B>>();
                self.run_epochs(name, adapter, split, optimizer)
            }
            OptimizerKind::RmsProp => {
                let optimizer = RmsPropConfig::new().init::<B, Classifier<B>>();
                self.run_epochs(name, adapter, split, optimizer)
            }
        }
    }

    fn run_epochs<B, O>(
        &mut self,
        name: &str,
        adapter: &mut BackboneAdapter<B>,
        split: &DatasetSplit,
        mut optimizer: O,
    ) -> Result<RunOutcome<B>>
    where
        B: AutodiffBackend,
        O: Optimizer<Classifier<B>, B>,
    {
        let device = adapter.device().clone();
        let batcher = ImageBatcher::new(split.train.image_size());
        let train_loss = CrossEntropyLossConfig::new().init::<B>(&device);
        let valid_loss = CrossEntropyLossConfig::new().init::<B::InnerBackend>(&device);
        let mut scheduler = StepLr::with_defaults(self.config.learning_rate);
        let run_id = self
            .tracker
            .as_ref()
            .map(|t| t.info().run_id)
            .unwrap_or_else(Uuid::new_v4);

        let mut logger = TrainingLogger::new(name, self.config.epochs);
        let mut metrics = MetricLog::new();
        let mut last_record = 0.0;
        let mut checkpoint = None;

        for epoch in 0..self.config.epochs {
            logger.start_epoch(epoch);

            // Train phase
            adapter.set_mode(Mode::Train);
            let mut stats = PhaseStats::new();
            for items in split.train.batches(self.config.batch_size) {
                let batch: ImageBatch<B> = batcher.batch(items?, &device);
                let batch_len = batch.targets.dims()[0];

                let logits = adapter.forward(batch.images);
                let loss = train_loss.forward(logits.clone(), batch.targets.clone());
                let loss_value: f64 = loss.clone().into_scalar().elem();
                if !loss_value.is_finite() {
                    return Err(HubError::TrainingFailed(format!(
                        "loss became {} in epoch {}",
                        loss_value, epoch
                    )));
                }
                let correct = count_correct(logits, batch.targets);

                adapter.apply_step(&mut optimizer, scheduler.current_lr(), loss);
                scheduler.step();
                stats.add_batch(loss_value, correct, batch_len);
            }
            let record = stats.finish(Phase::Train, epoch);
            self.finish_phase(name, run_id, &logger, &mut metrics, record, &scheduler);

            // Validation phase
            adapter.set_mode(Mode::Eval);
            let mut stats = PhaseStats::new();
            for items in split.valid.batches(self.config.batch_size) {
                let batch: ImageBatch<B::InnerBackend> = batcher.batch(items?, &device);
                let batch_len = batch.targets.dims()[0];

                let logits = adapter.infer(batch.images);
                let loss = valid_loss.forward(logits.clone(), batch.targets.clone());
                let loss_value: f64 = loss.into_scalar().elem();
                stats.add_batch(loss_value, count_correct(logits, batch.targets), batch_len);
            }
            let record = stats.finish(Phase::Valid, epoch);
            self.finish_phase(name, run_id, &logger, &mut metrics, record, &scheduler);

            if record.accuracy > last_record {
                last_record = record.accuracy;
                checkpoint = Some(Checkpoint::new(
                    epoch,
                    record.accuracy,
                    adapter.snapshot(),
                    split.label_set.clone(),
                    adapter.kind(),
                ));
                logger.log_new_best(last_record);
            }
        }

        logger.log_complete(last_record);
        Ok(RunOutcome {
            metrics,
            last_record,
            checkpoint,
        })
    }

    /// Log, record and report one finished phase
    fn finish_phase(
        &mut self,
        name: &str,
        run_id: Uuid,
        logger: &TrainingLogger,
        metrics: &mut MetricLog,
        record: MetricRecord,
        scheduler: &StepLr,
    ) {
        logger.end_phase(record.epoch, &record.phase.to_string(), record.loss, record.accuracy);
        metrics.push(record);

        if let Some(tracker) = self.tracker.as_mut() {
            let tracked = TrackerRecord {
                run_id,
                model: name.to_string(),
                epoch: record.epoch,
                phase: record.phase,
                accuracy: record.accuracy,
                loss: record.loss,
                learning_rate: scheduler.current_lr(),
                timestamp: Utc::now(),
            };
            if let Err(err) = tracker.log(&tracked) {
                warn!(model = %name, "Experiment tracker unavailable, continuing: {}", err);
            }
        }
    }
}

/// Number of rows whose arg-max matches the target
pub(crate) fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let batch_size = targets.dims()[0];
    let predictions = logits.argmax(1).reshape([batch_size]);
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::loader::tests::write_folder;
    use crate::dataset::SplitConfig;
    use crate::model::{BackboneKind, DeviceKind};
    use crate::training::tracker::{read_records, JsonLinesTracker};
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    const IMAGE_SIZE: usize = 32;

    fn entry() -> ModelEntry<TestBackend> {
        let adapter = BackboneAdapter::create(BackboneKind::Resnet18, DeviceKind::Cpu).unwrap();
        ModelEntry::new("pets".to_string(), adapter)
    }

    fn pets_split(dir: &std::path::Path, per_class: usize) -> DatasetSplit {
        write_folder(dir, &[("cat", [250, 40, 40]), ("dog", [40, 40, 250])], per_class);
        DatasetSplit::from_folder(dir, &SplitConfig::new(0.1, 42), IMAGE_SIZE).unwrap()
    }

    fn config(epochs: usize) -> TrainingConfig {
        TrainingConfig {
            epochs,
            batch_size: 32,
            validation_fraction: 0.1,
            ..Default::default()
        }
    }

    #[test]
    fn test_three_epoch_run_commits_results() {
        let dir = tempfile::tempdir().unwrap();
        let split = pets_split(dir.path(), 10);
        let mut entry = entry();

        let report = TrainingSession::new(config(3)).run(&mut entry, &split).unwrap();

        assert_eq!(entry.state, ModelState::Trained);
        assert_eq!(entry.label_set().unwrap(), &["cat".to_string(), "dog".to_string()][..]);

        let train: Vec<usize> = entry.metrics.phase(Phase::Train).map(|r| r.epoch).collect();
        let valid: Vec<usize> = entry.metrics.phase(Phase::Valid).map(|r| r.epoch).collect();
        assert_eq!(train, vec![0, 1, 2]);
        assert_eq!(valid, vec![0, 1, 2]);

        let best = entry
            .metrics
            .phase(Phase::Valid)
            .map(|r| r.accuracy)
            .fold(0.0, f64::max);
        assert_eq!(entry.last_record, best);
        assert_eq!(report.last_record, best);

        match &entry.checkpoint {
            Some(checkpoint) => {
                assert!(entry.last_record > 0.0);
                assert_eq!(checkpoint.accuracy, entry.last_record);
                assert_eq!(checkpoint.label_set, vec!["cat", "dog"]);
            }
            None => assert_eq!(entry.last_record, 0.0),
        }
        for record in entry.metrics.records() {
            assert!((0.0..=1.0).contains(&record.accuracy));
        }
    }

    #[test]
    fn test_empty_training_split_fails_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("cat")).unwrap();
        let split = DatasetSplit::from_folder(dir.path(), &SplitConfig::default(), IMAGE_SIZE).unwrap();
        let mut entry = entry();

        let err = TrainingSession::new(config(1)).run(&mut entry, &split).unwrap_err();
        assert!(matches!(err, HubError::TrainingFailed(_)));
        assert_eq!(entry.state, ModelState::Uninitialized);
        assert!(entry.label_set().is_none());
    }

    #[test]
    fn test_unreadable_image_fails_and_keeps_prior_state() {
        let dir = tempfile::tempdir().unwrap();
        let split = pets_split(dir.path(), 3);
        std::fs::write(dir.path().join("dog").join("zzz.png"), b"broken").unwrap();
        let broken = DatasetSplit::from_folder(dir.path(), &SplitConfig::new(0.0, 1), IMAGE_SIZE).unwrap();

        // Three good batches train before the broken file is reached
        let small_batches = TrainingConfig {
            batch_size: 2,
            ..config(1)
        };

        let mut entry = entry();
        TrainingSession::new(small_batches.clone()).run(&mut entry, &split).unwrap();
        let metrics_before = entry.metrics.clone();
        let record_before = entry.last_record;

        let device = entry.adapter.device().clone();
        let outputs = |e: &ModelEntry<TestBackend>| {
            let input = Tensor::<NdArray, 4>::ones([1, 3, IMAGE_SIZE, IMAGE_SIZE], &device) * 0.5;
            e.adapter.infer(input).into_data().to_vec::<f32>().unwrap()
        };
        let outputs_before = outputs(&entry);

        let err = TrainingSession::new(small_batches).run(&mut entry, &broken).unwrap_err();
        assert!(matches!(err, HubError::TrainingFailed(_)));
        assert_eq!(entry.state, ModelState::Trained);
        assert_eq!(entry.metrics, metrics_before);
        assert_eq!(entry.last_record, record_before);
        assert_eq!(outputs(&entry), outputs_before);
    }

    #[test]
    fn test_frozen_run_keeps_backbone_weights() {
        let dir = tempfile::tempdir().unwrap();
        let split = pets_split(dir.path(), 4);
        let mut entry = entry();

        let conv = |e: &ModelEntry<TestBackend>| {
            e.adapter.model().backbone.conv1.weight.val().into_data().to_vec::<f32>().unwrap()
        };
        let before = conv(&entry);

        let config = TrainingConfig {
            freeze_backbone: true,
            optimizer: OptimizerKind::Sgd,
            ..config(1)
        };
        let report = TrainingSession::new(config).run(&mut entry, &split).unwrap();

        assert_eq!(conv(&entry), before);
        assert_eq!(report.trainable_parameter_count, 512 * 2 + 2);
    }

    struct FailingTracker;

    impl ExperimentTracker for FailingTracker {
        fn log(&mut self, _record: &TrackerRecord) -> Result<()> {
            Err(HubError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "tracker offline",
            )))
        }

        fn info(&self) -> TrackingInfo {
            TrackingInfo {
                run_id: Uuid::nil(),
                project: "p".to_string(),
                experiment: "e".to_string(),
                location: "nowhere".to_string(),
            }
        }
    }

    #[test]
    fn test_tracker_failure_does_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        let split = pets_split(dir.path(), 3);
        let mut entry = entry();
        let mut tracker = FailingTracker;

        let report = TrainingSession::new(config(2))
            .with_tracker(&mut tracker)
            .run(&mut entry, &split)
            .unwrap();
        assert_eq!(report.metrics.len(), 4);
        assert_eq!(entry.tracking.as_ref().unwrap().project, "p");
    }

    #[test]
    fn test_tracker_receives_one_record_per_phase() {
        let data = tempfile::tempdir().unwrap();
        let runs = tempfile::tempdir().unwrap();
        let split = pets_split(data.path(), 3);
        let mut entry = entry();
        let mut tracker = JsonLinesTracker::create(runs.path(), "pets", Some("rmsprop")).unwrap();

        let config = TrainingConfig {
            optimizer: OptimizerKind::RmsProp,
            learning_rate: 0.001,
            ..config(2)
        };
        TrainingSession::new(config)
            .with_tracker(&mut tracker)
            .run(&mut entry, &split)
            .unwrap();

        let records = read_records(tracker.path()).unwrap();
        let phases: Vec<(usize, Phase)> = records.iter().map(|r| (r.epoch, r.phase)).collect();
        assert_eq!(
            phases,
            vec![
                (0, Phase::Train),
                (0, Phase::Valid),
                (1, Phase::Train),
                (1, Phase::Valid)
            ]
        );
        assert!(records.iter().all(|r| r.learning_rate == 0.001));
    }

    #[test]
    fn test_count_correct() {
        let device = Default::default();
        let logits = Tensor::<NdArray, 2>::from_floats([[0.1, 0.9], [0.8, 0.2], [0.3, 0.7]], &device);
        let targets = Tensor::<NdArray, 1, Int>::from_ints([1, 1, 1], &device);
        assert_eq!(count_correct(logits, targets), 2);
    }
}
