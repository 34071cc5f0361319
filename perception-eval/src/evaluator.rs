//! The validation pass.
//!
//! A pass walks through the phases `Running`, `Aggregating`, `Reporting`,
//! `CheckpointDecision` and `EarlyStopCheck`, and hands the updated best state
//! and the stop decision back to the caller.

use crate::{
    checkpoint::{best_checkpoint_name, step_checkpoint_name, Checkpoint, CheckpointStore},
    common::*,
    config::EvalConfig,
    data::Batch,
    logging::{self, MetricsSink},
    metrics::{
        fitness, ApCalculator, ConfusionMatrix, DetectionSummary, EvalMetrics, ImageStats,
        SegmentationAccumulator, StatsAccumulator,
    },
    model::{LossTerms, MultiTaskModel},
    postprocess::PostProcessor,
    report::EvalReport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Aggregating,
    Reporting,
    CheckpointDecision,
    EarlyStopCheck,
    Done,
}

/// How the pass is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Called by a training loop. The model reports losses, checkpoints are
    /// saved on improvement and early stopping is checked.
    Training { epoch: usize, step: usize },
    /// Report only.
    Standalone,
}

impl EvalMode {
    pub fn is_training(&self) -> bool {
        matches!(self, Self::Training { .. })
    }

    fn step(&self) -> usize {
        match *self {
            Self::Training { step, .. } => step,
            Self::Standalone => 0,
        }
    }
}

/// Best results seen across passes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BestState {
    pub fitness: Option<f64>,
    pub loss: Option<f64>,
    pub epoch: usize,
}

#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub best: BestState,
    /// Set when the early stopping patience ran out. The caller decides
    /// whether to terminate.
    pub stop: bool,
    pub fitness: Option<f64>,
    pub losses: Option<LossTerms>,
    pub report: EvalReport,
    /// Names of checkpoints saved during this pass.
    pub saved: Vec<String>,
}

/// Accumulators filled while iterating batches.
#[derive(Debug)]
struct PassState {
    seen: usize,
    stats: StatsAccumulator,
    confusion: ConfusionMatrix,
    segmentation: SegmentationAccumulator,
    losses: Vec<LossTerms>,
}

#[derive(Debug)]
pub struct Evaluator {
    config: EvalConfig,
    class_names: Vec<String>,
    seg_names: Vec<String>,
    post_processor: PostProcessor,
    ap_calculator: ApCalculator,
    optimizer_state: Option<serde_json::Value>,
    phase: Phase,
}

impl Evaluator {
    /// `seg_names` lists every segmentation output channel, background included.
    pub fn new(config: EvalConfig, class_names: Vec<String>, seg_names: Vec<String>) -> Result<Self> {
        ensure!(!class_names.is_empty(), "at least one detection class is required");
        let post_processor = config.post_process.build()?;
        // fail early on bad thresholds
        ConfusionMatrix::new(class_names.len())
            .with_thresholds(config.confusion_conf_threshold, config.confusion_iou_threshold)?;

        Ok(Self {
            config,
            class_names,
            seg_names,
            post_processor,
            ap_calculator: ApCalculator::new_coco(),
            optimizer_state: None,
            phase: Phase::Idle,
        })
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Optimizer state stored along with saved checkpoints.
    pub fn set_optimizer_state(&mut self, state: Option<serde_json::Value>) {
        self.optimizer_state = state;
    }

    fn enter(&mut self, phase: Phase) {
        debug!("{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Run one validation pass.
    pub fn run<M, I, S, C>(
        &mut self,
        model: &mut M,
        batches: I,
        mode: EvalMode,
        best: BestState,
        sink: &mut S,
        store: &mut C,
    ) -> Result<EvalOutcome>
    where
        M: MultiTaskModel + ?Sized,
        I: IntoIterator<Item = Result<Batch>>,
        S: MetricsSink + ?Sized,
        C: CheckpointStore + ?Sized,
    {
        self.enter(Phase::Running);
        let state = self.run_batches(model, batches, mode)?;

        self.enter(Phase::Aggregating);
        let (losses, report) = self.aggregate(state)?;

        self.enter(Phase::Reporting);
        self.emit(&report, losses.as_ref(), mode, sink)?;

        self.enter(Phase::CheckpointDecision);
        let loss = losses.map(|terms| terms.total());
        let fitness = self
            .config
            .cal_map
            .then(|| fitness(&report.metrics, loss.unwrap_or(0.0), &self.config.fitness_weights));
        let (best, saved) = match mode {
            EvalMode::Training { epoch, step } => {
                self.decide_checkpoint(&*model, epoch, step, fitness, loss, best, store)?
            }
            EvalMode::Standalone => (best, vec![]),
        };

        self.enter(Phase::EarlyStopCheck);
        let stop = match mode {
            EvalMode::Training { epoch, .. } => self.should_stop(epoch, &best),
            EvalMode::Standalone => false,
        };

        self.enter(Phase::Done);
        Ok(EvalOutcome {
            best,
            stop,
            fitness,
            losses,
            report,
            saved,
        })
    }

    fn run_batches<M, I>(&self, model: &mut M, batches: I, mode: EvalMode) -> Result<PassState>
    where
        M: MultiTaskModel + ?Sized,
        I: IntoIterator<Item = Result<Batch>>,
    {
        let EvalConfig {
            cal_map,
            ref iou_thresholds,
            confusion_conf_threshold,
            confusion_iou_threshold,
            seg_threshold,
            ..
        } = self.config;

        let mut state = PassState {
            seen: 0,
            stats: StatsAccumulator::new(iou_thresholds.len()),
            confusion: ConfusionMatrix::new(self.class_names.len())
                .with_thresholds(confusion_conf_threshold, confusion_iou_threshold)?,
            segmentation: SegmentationAccumulator::new(self.seg_names.clone())
                .with_threshold(seg_threshold),
            losses: vec![],
        };

        for (batch_index, batch) in batches.into_iter().enumerate() {
            let batch = batch?;
            let output = model
                .forward(&batch, mode.is_training())
                .with_context(|| format!("forward pass failed on batch {}", batch_index))?;
            output.validate(batch.len())?;
            ensure!(
                output.num_classes() == self.class_names.len(),
                "the model predicts {} classes, but {} class names are configured",
                output.num_classes(),
                self.class_names.len()
            );

            if cal_map {
                let detections = self.post_processor.forward(&output, &batch.input_hw)?;

                for (index, detections) in detections.iter().enumerate() {
                    state.seen += 1;

                    // back to original image pixels
                    let inverse = batch.shapes[index]
                        .to_input_transform(&batch.input_hw)?
                        .inverse();
                    let detections: Vec<BoxDetection> =
                        detections.iter().map(|det| &inverse * det).collect();
                    let labels: Vec<BoxLabel> = batch
                        .labels(index)
                        .iter()
                        .map(|label| &inverse * label)
                        .collect();

                    state
                        .stats
                        .push(ImageStats::new(&detections, &labels, iou_thresholds))?;
                    state.confusion.process_batch(&detections, &labels)?;
                    state.segmentation.update(
                        output.segmentation.index_axis(Axis(0), index),
                        batch.segmentation.index_axis(Axis(0), index),
                    )?;
                }
            }

            if let Some(terms) = output.losses {
                let total = terms.total();
                if total == 0.0 || !total.is_finite() {
                    debug!("skip the loss {} of batch {}", total, batch_index);
                } else {
                    state.losses.push(terms);
                }
            }
        }

        Ok(state)
    }

    fn aggregate(&self, state: PassState) -> Result<(Option<LossTerms>, EvalReport)> {
        let PassState {
            seen,
            stats,
            confusion,
            segmentation,
            losses,
        } = state;

        let losses = LossTerms::mean(losses);
        let num_classes = self.class_names.len();

        let (class_metrics, detection) = if self.config.cal_map {
            let class_metrics = stats.compute(&self.ap_calculator)?;
            let detection = class_metrics
                .as_ref()
                .map(|metrics| metrics.summary())
                .unwrap_or_default();
            (class_metrics, detection)
        } else {
            (None, DetectionSummary::default())
        };
        let segmentation = segmentation.summary();

        let report = EvalReport {
            class_names: self.class_names.clone(),
            seen,
            num_targets: stats.targets_per_class(num_classes),
            metrics: EvalMetrics::new(&detection, &segmentation),
            class_metrics,
            segmentation,
            confusion: (self.config.cal_map && self.config.plot_confusion).then(|| confusion),
            losses,
        };

        Ok((losses, report))
    }

    fn emit<S>(
        &self,
        report: &EvalReport,
        losses: Option<&LossTerms>,
        mode: EvalMode,
        sink: &mut S,
    ) -> Result<()>
    where
        S: MetricsSink + ?Sized,
    {
        let step = mode.step();

        if let Some(losses) = losses {
            match mode {
                EvalMode::Training { epoch, .. } => info!(
                    "Val. Epoch: {}/{}. Classification loss: {:1.5}. Regression loss: {:1.5}. Segmentation loss: {:1.5}. Total loss: {:1.5}",
                    epoch,
                    self.config.num_epochs,
                    losses.classification,
                    losses.regression,
                    losses.segmentation,
                    losses.total()
                ),
                EvalMode::Standalone => info!("total loss: {:1.5}", losses.total()),
            }

            sink.add_scalar(logging::LOSS_TAG, step, losses.total())?;
            sink.add_scalar(logging::REGRESSION_LOSS_TAG, step, losses.regression)?;
            sink.add_scalar(logging::CLASSIFICATION_LOSS_TAG, step, losses.classification)?;
            sink.add_scalar(logging::SEGMENTATION_LOSS_TAG, step, losses.segmentation)?;
        }

        if self.config.cal_map {
            let metrics = &report.metrics;
            info!(
                "images {}, P {:.3}, R {:.3}, mAP@.5 {:.3}, mAP@.5:.95 {:.3}, mIoU {:.3}, mF1 {:.3}",
                report.seen,
                metrics.precision,
                metrics.recall,
                metrics.map50,
                metrics.map,
                metrics.mean_iou,
                metrics.mean_f1
            );

            if report.class_metrics.is_none() {
                warn!("no prediction matched any label, detection metrics are zero");
            }

            sink.add_scalar(logging::PRECISION_TAG, step, metrics.precision)?;
            sink.add_scalar(logging::RECALL_TAG, step, metrics.recall)?;
            sink.add_scalar(logging::MAP50_TAG, step, metrics.map50)?;
            sink.add_scalar(logging::MAP_TAG, step, metrics.map)?;
            sink.add_scalar(logging::MEAN_IOU_TAG, step, metrics.mean_iou)?;
            sink.add_scalar(logging::MEAN_F1_TAG, step, metrics.mean_f1)?;
        }

        sink.flush()?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn decide_checkpoint<M, C>(
        &self,
        model: &M,
        epoch: usize,
        step: usize,
        fitness: Option<f64>,
        loss: Option<f64>,
        mut best: BestState,
        store: &mut C,
    ) -> Result<(BestState, Vec<String>)>
    where
        M: MultiTaskModel + ?Sized,
        C: CheckpointStore + ?Sized,
    {
        let compound_coef = self.config.compound_coef;
        let mut saved = vec![];

        if let Some(fitness) = fitness {
            // with metrics, keep the checkpoint of the best fitness
            let improved = best.fitness.map_or(true, |best_fitness| fitness > best_fitness);
            if improved {
                best.fitness = Some(fitness);
                best.epoch = epoch;

                let name = best_checkpoint_name(compound_coef);
                info!("saving checkpoint with best fitness {:.5}", fitness);
                store.save(&name, &self.checkpoint(model, epoch, step, Some(fitness))?)?;
                saved.push(name);
            }
        } else {
            // otherwise keep a checkpoint per new lowest loss
            match loss {
                Some(loss) => {
                    let improved = best
                        .loss
                        .map_or(true, |best_loss| loss + self.config.es_min_delta < best_loss);
                    if improved {
                        best.loss = Some(loss);
                        best.epoch = epoch;

                        let name = step_checkpoint_name(compound_coef, epoch, step);
                        store.save(&name, &self.checkpoint(model, epoch, step, best.fitness)?)?;
                        saved.push(name);
                    }
                }
                None => warn!("no valid loss in this pass, skip the checkpoint decision"),
            }
        }

        Ok((best, saved))
    }

    fn checkpoint<M>(
        &self,
        model: &M,
        epoch: usize,
        step: usize,
        best_fitness: Option<f64>,
    ) -> Result<Checkpoint>
    where
        M: MultiTaskModel + ?Sized,
    {
        Ok(Checkpoint {
            epoch,
            step,
            best_fitness,
            model: model.state_dict()?,
            optimizer: self.optimizer_state.clone(),
            saved_at: Local::now(),
        })
    }

    fn should_stop(&self, epoch: usize, best: &BestState) -> bool {
        let patience = self.config.es_patience;
        let stop = patience > 0 && epoch.saturating_sub(best.epoch) > patience;
        if stop {
            info!(
                "stop training at epoch {}. The best epoch is {} with loss {:?}",
                epoch, best.epoch, best.loss
            );
        }
        stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        checkpoint::MemoryCheckpointStore,
        data::{Sample, ShapeInfo},
        logging::{MemorySink, NullSink},
        model::{RecordedModel, RecordedOutput},
    };
    use bbox::HW_;
    use ndarray::arr2;

    const LOSSES: LossTerms = LossTerms {
        classification: 0.5,
        regression: 0.25,
        segmentation: 0.25,
    };

    fn seg_map() -> Array3<f32> {
        let mut map = Array3::zeros((2, 4, 4));
        map.slice_mut(s![1, 0..2, ..]).fill(1.0);
        map.slice_mut(s![0, 2..4, ..]).fill(1.0);
        map
    }

    fn model() -> RecordedModel {
        let record = RecordedOutput {
            regression: Array2::zeros((2, 4)),
            classification: arr2(&[[0.9], [0.0005]]),
            segmentation: seg_map(),
            losses: Some(LOSSES),
        };
        RecordedModel {
            anchors: arr2(&[[2.0, 2.0, 10.0, 10.0], [0.0, 0.0, 4.0, 4.0]]),
            records: vec![("a.jpg".to_string(), record)].into_iter().collect(),
        }
    }

    fn sample(filename: &str) -> Sample {
        Sample {
            filename: filename.into(),
            shape: ShapeInfo {
                original_hw: HW_ { h: 16, w: 16 },
                ratio: Some((1.0, 1.0)),
                pad: Some((0.0, 0.0)),
            },
            annotations: vec![[2.0, 2.0, 10.0, 10.0, 0.0]],
            segmentation: seg_map(),
        }
    }

    fn batches() -> Vec<Result<Batch>> {
        vec![Batch::collate(&[sample("a.jpg")], HW_ { h: 16, w: 16 })]
    }

    fn evaluator(config: EvalConfig) -> Result<Evaluator> {
        Evaluator::new(
            config,
            vec!["car".into()],
            vec!["background".into(), "road".into()],
        )
    }

    #[test]
    fn perfect_predictions() -> Result<()> {
        let mut evaluator = evaluator(EvalConfig::default())?;
        let outcome = evaluator.run(
            &mut model(),
            batches(),
            EvalMode::Standalone,
            BestState::default(),
            &mut NullSink,
            &mut MemoryCheckpointStore::default(),
        )?;

        let metrics = outcome.report.metrics;
        assert!(abs_diff_eq!(metrics.precision, 1.0, epsilon = 1e-9));
        assert!(abs_diff_eq!(metrics.recall, 1.0, epsilon = 1e-9));
        assert!(abs_diff_eq!(metrics.map50, 1.0, epsilon = 1e-9));
        assert!(abs_diff_eq!(metrics.map, 1.0, epsilon = 1e-9));
        assert!(abs_diff_eq!(metrics.mean_iou, 1.0, epsilon = 1e-9));
        assert!(abs_diff_eq!(metrics.mean_f1, 1.0, epsilon = 1e-9));
        assert_eq!(outcome.report.seen, 1);
        assert_eq!(outcome.report.num_targets, vec![1]);
        assert!(outcome.losses.is_none());
        assert!(outcome.saved.is_empty());
        assert!(!outcome.stop);
        assert_eq!(evaluator.phase(), Phase::Done);
        Ok(())
    }

    #[test]
    fn best_checkpoint_and_early_stop() -> Result<()> {
        let config = EvalConfig {
            es_patience: 1,
            ..Default::default()
        };
        let mut evaluator = evaluator(config)?;
        let mut model = model();
        let mut store = MemoryCheckpointStore::default();
        let mut sink = MemorySink::default();

        let first = evaluator.run(
            &mut model,
            batches(),
            EvalMode::Training { epoch: 0, step: 10 },
            BestState::default(),
            &mut sink,
            &mut store,
        )?;
        assert_eq!(first.saved, vec!["efficientdet-d0_best.json".to_string()]);
        assert_eq!(first.best.epoch, 0);
        assert_eq!(first.best.fitness, first.fitness);
        assert!(!first.stop);
        assert_eq!(sink.last(logging::LOSS_TAG), Some(1.0));
        let map = sink.last(logging::MAP_TAG).unwrap_or(0.0);
        assert!(abs_diff_eq!(map, 1.0, epsilon = 1e-9));

        // same results do not count as an improvement
        let second = evaluator.run(
            &mut model,
            batches(),
            EvalMode::Training { epoch: 1, step: 20 },
            first.best,
            &mut sink,
            &mut store,
        )?;
        assert!(second.saved.is_empty());
        assert!(!second.stop);

        let third = evaluator.run(
            &mut model,
            batches(),
            EvalMode::Training { epoch: 2, step: 30 },
            second.best,
            &mut sink,
            &mut store,
        )?;
        assert!(third.stop);
        assert_eq!(store.saved.len(), 1);
        Ok(())
    }

    #[test]
    fn loss_only_pass() -> Result<()> {
        let config = EvalConfig {
            cal_map: false,
            ..Default::default()
        };
        let mut evaluator = evaluator(config)?;
        let mut model = model();
        let mut store = MemoryCheckpointStore::default();

        let outcome = evaluator.run(
            &mut model,
            batches(),
            EvalMode::Training { epoch: 3, step: 40 },
            BestState::default(),
            &mut NullSink,
            &mut store,
        )?;
        assert_eq!(outcome.saved, vec!["efficientdet-d0_3_40.json".to_string()]);
        assert_eq!(outcome.best.loss, Some(1.0));
        assert_eq!(outcome.best.epoch, 3);
        assert_eq!(outcome.fitness, None);
        assert_eq!(outcome.report.seen, 0);

        // zero losses are skipped and leave nothing to compare
        for record in model.records.values_mut() {
            record.losses = Some(LossTerms::default());
        }
        let outcome = evaluator.run(
            &mut model,
            batches(),
            EvalMode::Training { epoch: 4, step: 50 },
            outcome.best,
            &mut NullSink,
            &mut store,
        )?;
        assert!(outcome.losses.is_none());
        assert!(outcome.saved.is_empty());
        assert_eq!(outcome.best.epoch, 3);
        Ok(())
    }

    #[test]
    fn non_finite_losses_are_skipped() -> Result<()> {
        let config = EvalConfig {
            cal_map: false,
            ..Default::default()
        };
        let mut evaluator = evaluator(config)?;
        let mut store = MemoryCheckpointStore::default();
        let best = BestState {
            loss: Some(2.0),
            epoch: 1,
            ..Default::default()
        };

        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut model = model();
            for record in model.records.values_mut() {
                record.losses = Some(LossTerms {
                    classification: bad,
                    ..LOSSES
                });
            }
            let outcome = evaluator.run(
                &mut model,
                batches(),
                EvalMode::Training { epoch: 2, step: 20 },
                best,
                &mut NullSink,
                &mut store,
            )?;
            assert!(outcome.losses.is_none());
            assert!(outcome.saved.is_empty());
            assert_eq!(outcome.best.loss, Some(2.0));
            assert_eq!(outcome.best.epoch, 1);
        }
        assert!(store.saved.is_empty());

        // a finite batch next to a diverged one keeps only the finite loss
        let mut model = model();
        let diverged = RecordedOutput {
            losses: Some(LossTerms {
                regression: f64::INFINITY,
                ..LOSSES
            }),
            ..model.records["a.jpg"].clone()
        };
        model.records.insert("b.jpg".to_string(), diverged);
        let batches = vec![
            Batch::collate(&[sample("a.jpg")], HW_ { h: 16, w: 16 }),
            Batch::collate(&[sample("b.jpg")], HW_ { h: 16, w: 16 }),
        ];
        let mut sink = MemorySink::default();
        let outcome = evaluator.run(
            &mut model,
            batches,
            EvalMode::Training { epoch: 2, step: 20 },
            best,
            &mut sink,
            &mut store,
        )?;
        assert_eq!(outcome.losses, Some(LOSSES));
        assert_eq!(sink.last(logging::LOSS_TAG), Some(1.0));
        assert_eq!(outcome.best.loss, Some(1.0));
        assert_eq!(outcome.best.epoch, 2);
        assert_eq!(outcome.saved, vec!["efficientdet-d0_2_20.json".to_string()]);
        Ok(())
    }

    #[test]
    fn class_count_mismatch_is_an_error() -> Result<()> {
        let mut model = model();
        for record in model.records.values_mut() {
            record.classification = arr2(&[[0.9, 0.1], [0.0005, 0.0]]);
        }
        let mut evaluator = evaluator(EvalConfig::default())?;
        let result = evaluator.run(
            &mut model,
            batches(),
            EvalMode::Standalone,
            BestState::default(),
            &mut NullSink,
            &mut MemoryCheckpointStore::default(),
        );
        assert!(result.is_err());
        Ok(())
    }
}
