//! Per-image detection statistics accumulated over a validation pass.

use super::{
    average_precision::{ap_per_class, ApCalculator, ClassMetrics},
    matcher::{process_batch, CorrectnessMatrix, IouThresholds},
};
use crate::common::*;

/// Matching outcome of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageStats {
    pub correct: CorrectnessMatrix,
    pub confidences: Vec<f64>,
    pub pred_classes: Vec<usize>,
    pub target_classes: Vec<usize>,
}

impl ImageStats {
    /// Match the detections of one image against its labels.
    pub fn new(
        detections: &[BoxDetection],
        labels: &[BoxLabel],
        thresholds: &IouThresholds,
    ) -> Self {
        Self {
            correct: process_batch(detections, labels, thresholds),
            confidences: detections.iter().map(|det| det.confidence).collect(),
            pred_classes: detections.iter().map(|det| det.class).collect(),
            target_classes: labels.iter().map(|label| label.class).collect(),
        }
    }
}

/// All statistics stacked along the prediction axis.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatStats {
    pub correct: CorrectnessMatrix,
    pub confidences: Vec<f64>,
    pub pred_classes: Vec<usize>,
    pub target_classes: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct StatsAccumulator {
    num_thresholds: usize,
    images: Vec<ImageStats>,
}

impl StatsAccumulator {
    pub fn new(num_thresholds: usize) -> Self {
        Self {
            num_thresholds,
            images: vec![],
        }
    }

    /// Record one image. Images without predictions or labels still count as seen.
    pub fn push(&mut self, stats: ImageStats) -> Result<()> {
        let ImageStats {
            correct,
            confidences,
            pred_classes,
            ..
        } = &stats;

        ensure!(
            correct.ncols() == self.num_thresholds,
            "expect {} iou thresholds, but get {}",
            self.num_thresholds,
            correct.ncols()
        );
        ensure!(
            correct.nrows() == confidences.len() && correct.nrows() == pred_classes.len(),
            "inconsistent number of predictions"
        );

        self.images.push(stats);
        Ok(())
    }

    /// Number of images recorded.
    pub fn seen(&self) -> usize {
        self.images.len()
    }

    pub fn num_targets(&self) -> usize {
        self.images
            .iter()
            .map(|image| image.target_classes.len())
            .sum()
    }

    /// Ground truth count of each class in `0..num_classes`.
    pub fn targets_per_class(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0; num_classes];
        self.images
            .iter()
            .flat_map(|image| &image.target_classes)
            .filter(|&&class| class < num_classes)
            .for_each(|&class| counts[class] += 1);
        counts
    }

    pub fn concat(&self) -> Result<ConcatStats> {
        let correct = if self.images.is_empty() {
            Array2::from_elem((0, self.num_thresholds), false)
        } else {
            let views: Vec<_> = self.images.iter().map(|image| image.correct.view()).collect();
            ndarray::concatenate(Axis(0), &views)?
        };

        Ok(ConcatStats {
            correct,
            confidences: self
                .images
                .iter()
                .flat_map(|image| image.confidences.iter().cloned())
                .collect(),
            pred_classes: self
                .images
                .iter()
                .flat_map(|image| image.pred_classes.iter().cloned())
                .collect(),
            target_classes: self
                .images
                .iter()
                .flat_map(|image| image.target_classes.iter().cloned())
                .collect(),
        })
    }

    /// Per-class metrics, or `None` when no prediction is correct at any threshold.
    pub fn compute(&self, calculator: &ApCalculator) -> Result<Option<ClassMetrics>> {
        let stats = self.concat()?;
        if !stats.correct.iter().any(|&flag| flag) {
            return Ok(None);
        }

        let metrics = ap_per_class(
            stats.correct.view(),
            &stats.confidences,
            &stats.pred_classes,
            &stats.target_classes,
            calculator,
        )?;
        Ok(Some(metrics))
    }
}
