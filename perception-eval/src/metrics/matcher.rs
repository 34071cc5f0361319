//! Prediction to ground truth matching over a sweep of IoU thresholds.

use crate::{common::*, utils};
use std::cmp::Reverse;

/// Ascending IoU thresholds used to judge a prediction as correct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct IouThresholds(Vec<f64>);

impl IouThresholds {
    /// The COCO sweep `[0.50, 0.55, ..., 0.95]`.
    pub fn coco() -> Self {
        Self(utils::linspace(0.5, 0.95, 10))
    }

    pub fn new(thresholds: Vec<f64>) -> Result<Self> {
        ensure!(!thresholds.is_empty(), "iou_thresholds must be non-empty");
        ensure!(
            thresholds.iter().all(|&thresh| thresh > 0.0 && thresh <= 1.0),
            "iou thresholds must lie in (0, 1]"
        );
        ensure!(
            thresholds.iter().tuple_windows().all(|(lhs, rhs)| lhs < rhs),
            "iou thresholds must be strictly ascending"
        );
        Ok(Self(thresholds))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

impl Default for IouThresholds {
    fn default() -> Self {
        Self::coco()
    }
}

impl TryFrom<Vec<f64>> for IouThresholds {
    type Error = Error;

    fn try_from(thresholds: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(thresholds)
    }
}

impl From<IouThresholds> for Vec<f64> {
    fn from(from: IouThresholds) -> Self {
        from.0
    }
}

/// Boolean `N x T` matrix. Entry `[p, t]` is set iff prediction `p` is a
/// correct match at threshold `t`.
pub type CorrectnessMatrix = Array2<bool>;

/// A candidate (prediction, label) pair and its IoU.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub det_index: usize,
    pub label_index: usize,
    pub iou: R64,
}

/// Collect pairs passing `filter` with IoU at least `min_iou`, ordered by
/// decreasing IoU. Ties are broken by label index, then prediction index.
pub(crate) fn ranked_candidates<F>(
    detections: &[BoxDetection],
    labels: &[BoxLabel],
    min_iou: f64,
    mut filter: F,
) -> Vec<Candidate>
where
    F: FnMut(&BoxDetection, &BoxLabel) -> bool,
{
    let det_rects: Vec<_> = detections.iter().map(|det| det.rect.clone()).collect();
    let label_rects: Vec<_> = labels.iter().map(|label| label.rect.clone()).collect();
    let ious = iou_matrix(&det_rects, &label_rects);

    let mut candidates: Vec<_> = izip!(detections, ious)
        .enumerate()
        .flat_map(|(det_index, (det, row))| {
            izip!(labels, row)
                .enumerate()
                .filter(|(_, (label, iou))| *iou > 0.0 && *iou >= min_iou && filter(det, *label))
                .filter_map(move |(label_index, (_, iou))| {
                    Some(Candidate {
                        det_index,
                        label_index,
                        iou: R64::try_new(iou)?,
                    })
                })
                .collect_vec()
        })
        .collect();

    candidates.sort_by_key(|cand| (Reverse(cand.iou), cand.label_index, cand.det_index));
    candidates
}

/// Greedy one-to-one assignment over ranked candidates whose IoU reaches
/// `thresh`. Returns the accepted candidates.
pub(crate) fn greedy_assign(
    candidates: &[Candidate],
    num_detections: usize,
    num_labels: usize,
    thresh: f64,
) -> Vec<Candidate> {
    let mut det_used = vec![false; num_detections];
    let mut label_used = vec![false; num_labels];

    candidates
        .iter()
        .take_while(|cand| cand.iou.raw() >= thresh)
        .filter(|cand| {
            if det_used[cand.det_index] || label_used[cand.label_index] {
                return false;
            }
            det_used[cand.det_index] = true;
            label_used[cand.label_index] = true;
            true
        })
        .cloned()
        .collect()
}

/// Mark each prediction as correct or not at every IoU threshold.
///
/// Predictions and labels are only paired when their classes agree, and at
/// each threshold every label is consumed by at most one prediction.
pub fn process_batch(
    detections: &[BoxDetection],
    labels: &[BoxLabel],
    thresholds: &IouThresholds,
) -> CorrectnessMatrix {
    let mut correct = Array2::from_elem((detections.len(), thresholds.len()), false);
    if detections.is_empty() || labels.is_empty() {
        return correct;
    }

    let min_thresh = thresholds.as_slice()[0];
    let candidates = ranked_candidates(detections, labels, min_thresh, |det, label| {
        det.class == label.class
    });

    for (thresh_index, &thresh) in thresholds.as_slice().iter().enumerate() {
        greedy_assign(&candidates, detections.len(), labels.len(), thresh)
            .into_iter()
            .for_each(|cand| correct[[cand.det_index, thresh_index]] = true);
    }

    correct
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(xyxy: [f64; 4], confidence: f64, class: usize) -> BoxDetection {
        Detection {
            rect: TLBR::from_xyxy(xyxy),
            class,
            confidence,
        }
    }

    fn label(xyxy: [f64; 4], class: usize) -> BoxLabel {
        Label {
            rect: TLBR::from_xyxy(xyxy),
            class,
        }
    }

    #[test]
    fn threshold_validation() {
        assert_eq!(IouThresholds::coco().len(), 10);
        assert!(IouThresholds::new(vec![]).is_err());
        assert!(IouThresholds::new(vec![0.7, 0.5]).is_err());
        assert!(IouThresholds::new(vec![0.0, 0.5]).is_err());
        assert!(IouThresholds::new(vec![0.5]).is_ok());
    }

    #[test]
    fn perfect_prediction_is_correct_everywhere() {
        let dets = [det([0.0, 0.0, 10.0, 10.0], 0.9, 0)];
        let labels = [label([0.0, 0.0, 10.0, 10.0], 0)];
        let correct = process_batch(&dets, &labels, &IouThresholds::coco());
        assert_eq!(correct.dim(), (1, 10));
        assert!(correct.iter().all(|&flag| flag));
    }

    #[test]
    fn no_labels_yields_all_false_rows() {
        let dets = [
            det([0.0, 0.0, 10.0, 10.0], 0.9, 0),
            det([5.0, 5.0, 10.0, 10.0], 0.4, 1),
        ];
        let correct = process_batch(&dets, &[], &IouThresholds::coco());
        assert_eq!(correct.dim(), (2, 10));
        assert!(correct.iter().all(|&flag| !flag));
    }

    #[test]
    fn no_predictions_yields_zero_rows() {
        let labels = [
            label([0.0, 0.0, 10.0, 10.0], 0),
            label([20.0, 20.0, 30.0, 30.0], 0),
        ];
        let correct = process_batch(&[], &labels, &IouThresholds::coco());
        assert_eq!(correct.dim(), (0, 10));
    }

    #[test]
    fn class_mismatch_is_never_correct() {
        let dets = [det([0.0, 0.0, 10.0, 10.0], 0.9, 1)];
        let labels = [label([0.0, 0.0, 10.0, 10.0], 0)];
        let correct = process_batch(&dets, &labels, &IouThresholds::coco());
        assert!(correct.iter().all(|&flag| !flag));
    }

    #[test]
    fn label_is_consumed_once_per_threshold() {
        // both predictions overlap the single label; only the better one may match
        let dets = [
            det([0.0, 0.0, 10.0, 9.0], 0.8, 0),
            det([0.0, 0.0, 10.0, 10.0], 0.6, 0),
        ];
        let labels = [label([0.0, 0.0, 10.0, 10.0], 0)];
        let correct = process_batch(&dets, &labels, &IouThresholds::coco());

        for thresh_index in 0..correct.ncols() {
            let column = correct.column(thresh_index);
            assert!(column.iter().filter(|&&flag| flag).count() <= 1);
        }
        assert!(correct.row(1).iter().all(|&flag| flag));
        assert!(correct.row(0).iter().all(|&flag| !flag));
    }

    #[test]
    fn thresholds_are_judged_independently() {
        // IoU = 0.62: correct up to threshold 0.6, wrong above
        let dets = [det([0.0, 0.0, 6.2, 10.0], 0.9, 0)];
        let labels = [label([0.0, 0.0, 10.0, 10.0], 0)];
        let correct = process_batch(&dets, &labels, &IouThresholds::coco());
        let row: Vec<bool> = correct.row(0).to_vec();
        assert_eq!(
            row,
            vec![true, true, true, false, false, false, false, false, false, false]
        );
    }

    #[test]
    fn greedy_prefers_highest_iou_pairs() -> Result<()> {
        // det 0 overlaps both labels, det 1 only label 0
        let dets = [
            det([0.0, 0.0, 10.0, 10.0], 0.9, 0),
            det([0.0, 0.0, 9.0, 10.0], 0.8, 0),
        ];
        let labels = [
            label([0.0, 0.0, 10.0, 10.0], 0),
            label([1.0, 0.0, 11.0, 10.0], 0),
        ];
        let thresholds = IouThresholds::new(vec![0.5])?;
        let correct = process_batch(&dets, &labels, &thresholds);
        // det 0 takes label 0 (IoU 1.0); det 1 can still reach label 1 (IoU 0.73)
        assert!(correct[[0, 0]]);
        assert!(correct[[1, 0]]);
        Ok(())
    }
}
