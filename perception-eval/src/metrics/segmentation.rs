//! Pixel level IoU and F1 for binary segmentation channels.

use crate::common::*;

/// Binary pixel counts of one channel of one image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentationCounts {
    pub tp: u64,
    pub fp: u64,
    pub fn_: u64,
    pub tn: u64,
}

impl SegmentationCounts {
    /// Count pixels after binarizing `pred >= threshold` and rounding the target.
    pub fn from_maps(
        pred: ArrayView2<f32>,
        target: ArrayView2<f32>,
        threshold: f32,
    ) -> Result<Self> {
        ensure!(
            pred.dim() == target.dim(),
            "prediction shape {:?} does not match target shape {:?}",
            pred.dim(),
            target.dim()
        );

        let counts = izip!(pred.iter(), target.iter()).fold(
            Self::default(),
            |mut counts, (&pred, &target)| {
                let pred = pred >= threshold;
                let target = target.round() >= 1.0;
                match (pred, target) {
                    (true, true) => counts.tp += 1,
                    (true, false) => counts.fp += 1,
                    (false, true) => counts.fn_ += 1,
                    (false, false) => counts.tn += 1,
                }
                counts
            },
        );

        Ok(counts)
    }

    /// `tp / (tp + fp + fn)`, or 1.0 when the channel is empty in both maps.
    pub fn iou(&self) -> f64 {
        let denom = self.tp + self.fp + self.fn_;
        if denom == 0 {
            1.0
        } else {
            self.tp as f64 / denom as f64
        }
    }

    /// `2 tp / (2 tp + fp + fn)`, or 1.0 when the channel is empty in both maps.
    pub fn f1(&self) -> f64 {
        let denom = 2 * self.tp + self.fp + self.fn_;
        if denom == 0 {
            1.0
        } else {
            (2 * self.tp) as f64 / denom as f64
        }
    }
}

/// Mean IoU and F1 of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelScore {
    pub name: String,
    pub iou: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationSummary {
    pub channels: Vec<ChannelScore>,
    /// Unweighted mean over all channels and images.
    pub mean_iou: f64,
    /// Unweighted mean over all channels and images.
    pub mean_f1: f64,
}

/// Running per-channel IoU and F1 lists.
#[derive(Debug, Clone)]
pub struct SegmentationAccumulator {
    names: Vec<String>,
    threshold: f32,
    iou: Vec<Vec<f64>>,
    f1: Vec<Vec<f64>>,
}

impl SegmentationAccumulator {
    pub fn new(names: Vec<String>) -> Self {
        let num_channels = names.len();
        Self {
            names,
            threshold: 0.5,
            iou: vec![vec![]; num_channels],
            f1: vec![vec![]; num_channels],
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn num_channels(&self) -> usize {
        self.names.len()
    }

    /// Record one image given `C x H x W` probability and target maps.
    pub fn update(&mut self, pred: ArrayView3<f32>, target: ArrayView3<f32>) -> Result<()> {
        let num_channels = self.num_channels();
        ensure!(
            pred.len_of(Axis(0)) == num_channels && target.len_of(Axis(0)) == num_channels,
            "expect {} segmentation channels, but get {} predicted and {} target channels",
            num_channels,
            pred.len_of(Axis(0)),
            target.len_of(Axis(0))
        );

        let counts: Vec<_> = izip!(pred.outer_iter(), target.outer_iter())
            .map(|(pred, target)| SegmentationCounts::from_maps(pred, target, self.threshold))
            .collect::<Result<_>>()?;

        for (channel, counts) in counts.into_iter().enumerate() {
            self.iou[channel].push(counts.iou());
            self.f1[channel].push(counts.f1());
        }

        Ok(())
    }

    pub fn summary(&self) -> SegmentationSummary {
        let mean = |values: &[f64]| {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        };

        let channels = izip!(&self.names, &self.iou, &self.f1)
            .map(|(name, iou, f1)| ChannelScore {
                name: name.clone(),
                iou: mean(iou.as_slice()),
                f1: mean(f1.as_slice()),
            })
            .collect();

        let all_iou: Vec<f64> = self.iou.iter().flatten().cloned().collect();
        let all_f1: Vec<f64> = self.f1.iter().flatten().cloned().collect();

        SegmentationSummary {
            channels,
            mean_iou: mean(&all_iou),
            mean_f1: mean(&all_f1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, stack};

    #[test]
    fn perfect_channel_scores_one() -> Result<()> {
        let target = arr2(&[[0.0, 1.0], [1.0, 0.0]]);
        let pred = arr2(&[[0.1, 0.9], [0.6, 0.2]]);
        let counts = SegmentationCounts::from_maps(pred.view(), target.view(), 0.5)?;
        assert_eq!(
            counts,
            SegmentationCounts {
                tp: 2,
                fp: 0,
                fn_: 0,
                tn: 2
            }
        );
        assert_eq!(counts.iou(), 1.0);
        assert_eq!(counts.f1(), 1.0);
        Ok(())
    }

    #[test]
    fn threshold_is_inclusive_and_target_is_rounded() -> Result<()> {
        let target = arr2(&[[0.6, 0.4]]);
        let pred = arr2(&[[0.5, 0.5]]);
        let counts = SegmentationCounts::from_maps(pred.view(), target.view(), 0.5)?;
        assert_eq!(counts.tp, 1);
        assert_eq!(counts.fp, 1);
        assert_abs_diff_eq!(counts.iou(), 0.5);
        assert_abs_diff_eq!(counts.f1(), 2.0 / 3.0);
        Ok(())
    }

    #[test]
    fn empty_channel_is_perfect() -> Result<()> {
        let zeros = Array2::<f32>::zeros((3, 3));
        let counts = SegmentationCounts::from_maps(zeros.view(), zeros.view(), 0.5)?;
        assert_eq!(counts.iou(), 1.0);
        assert_eq!(counts.f1(), 1.0);
        Ok(())
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let lhs = Array2::<f32>::zeros((3, 3));
        let rhs = Array2::<f32>::zeros((3, 2));
        assert!(SegmentationCounts::from_maps(lhs.view(), rhs.view(), 0.5).is_err());
    }

    #[test]
    fn accumulate_channel_means() -> Result<()> {
        let mut acc = SegmentationAccumulator::new(vec!["road".into(), "lane".into()]);

        let road_target = arr2(&[[1.0, 1.0], [0.0, 0.0]]);
        let lane_target = arr2(&[[0.0, 0.0], [1.0, 1.0]]);
        let target = stack(Axis(0), &[road_target.view(), lane_target.view()])?;

        // first image: both channels exact
        acc.update(target.view(), target.view())?;

        // second image: lane channel predicts one of two pixels
        let lane_pred = arr2(&[[0.0, 0.0], [1.0, 0.0]]);
        let pred = stack(Axis(0), &[road_target.view(), lane_pred.view()])?;
        acc.update(pred.view(), target.view())?;

        let summary = acc.summary();
        assert_eq!(summary.channels[0].iou, 1.0);
        assert_abs_diff_eq!(summary.channels[1].iou, 0.75);
        assert_abs_diff_eq!(summary.channels[1].f1, (1.0 + 2.0 / 3.0) / 2.0);
        assert_abs_diff_eq!(summary.mean_iou, (1.0 + 1.0 + 1.0 + 0.5) / 4.0);
        Ok(())
    }

    #[test]
    fn wrong_channel_count_is_an_error() {
        let mut acc = SegmentationAccumulator::new(vec!["road".into()]);
        let maps = Array3::<f32>::zeros((2, 2, 2));
        assert!(acc.update(maps.view(), maps.view()).is_err());
    }
}
