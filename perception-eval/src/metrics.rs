//! Detection and segmentation metrics.

use crate::common::*;

mod average_precision;
mod confusion;
mod matcher;
mod segmentation;
mod stats;

pub use average_precision::*;
pub use confusion::*;
pub use eval_metrics::*;
pub use fitness::*;
pub use matcher::*;
pub use segmentation::*;
pub use stats::*;

mod eval_metrics {
    use super::*;

    /// Aggregate numbers of one validation pass.
    #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
    pub struct EvalMetrics {
        pub precision: f64,
        pub recall: f64,
        pub map50: f64,
        pub map: f64,
        pub mean_iou: f64,
        pub mean_f1: f64,
    }

    impl EvalMetrics {
        pub fn new(detection: &DetectionSummary, segmentation: &SegmentationSummary) -> Self {
            Self {
                precision: detection.mp,
                recall: detection.mr,
                map50: detection.map50,
                map: detection.map,
                mean_iou: segmentation.mean_iou,
                mean_f1: segmentation.mean_f1,
            }
        }
    }
}

mod fitness {
    use super::*;

    /// Weights of `[P, R, mAP@0.5, mAP@0.5:0.95, mIoU, mF1, -loss]`.
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    #[serde(try_from = "[f64; 7]", into = "[f64; 7]")]
    pub struct FitnessWeights([f64; 7]);

    impl FitnessWeights {
        pub fn new(weights: [f64; 7]) -> Result<Self> {
            ensure!(
                weights.iter().all(|&weight| weight.is_finite() && weight >= 0.0),
                "fitness weights must be finite and non-negative"
            );
            Ok(Self(weights))
        }

        pub fn as_array(&self) -> &[f64; 7] {
            &self.0
        }
    }

    impl Default for FitnessWeights {
        fn default() -> Self {
            Self([0.01, 0.01, 0.1, 0.78, 0.04, 0.04, 0.02])
        }
    }

    impl TryFrom<[f64; 7]> for FitnessWeights {
        type Error = Error;

        fn try_from(weights: [f64; 7]) -> Result<Self, Self::Error> {
            Self::new(weights)
        }
    }

    impl From<FitnessWeights> for [f64; 7] {
        fn from(from: FitnessWeights) -> Self {
            from.0
        }
    }

    /// Weighted sum of the metrics, with the loss entering negated.
    pub fn fitness(metrics: &EvalMetrics, loss: f64, weights: &FitnessWeights) -> f64 {
        let EvalMetrics {
            precision,
            recall,
            map50,
            map,
            mean_iou,
            mean_f1,
        } = *metrics;
        let values = [precision, recall, map50, map, mean_iou, mean_f1, -loss];

        izip!(weights.as_array(), &values)
            .map(|(weight, value)| weight * value)
            .sum()
    }

}
