//! Box decoding and non-maximum suppression of raw network outputs.

use crate::{common::*, model::ModelOutput};
use bbox::HW_;

/// Decodes anchor relative regression deltas into boxes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoxDecoder;

impl BoxDecoder {
    /// Decode `A x 4` deltas `(dy, dx, dh, dw)` against `A x 4` anchors `(y1, x1, y2, x2)`.
    pub fn decode(
        &self,
        anchors: ArrayView2<f32>,
        regression: ArrayView2<f32>,
    ) -> Result<Vec<TLBR<f64>>> {
        ensure!(
            anchors.dim() == regression.dim() && anchors.ncols() == 4,
            "anchors {:?} and regression {:?} must both be N x 4",
            anchors.dim(),
            regression.dim()
        );

        let boxes = izip!(anchors.outer_iter(), regression.outer_iter())
            .map(|(anchor, delta)| {
                let [y1, x1, y2, x2] =
                    [anchor[0], anchor[1], anchor[2], anchor[3]].map(f64::from);
                let deltas = [delta[0], delta[1], delta[2], delta[3]].map(f64::from);

                let anchor = TLBR::from_xyxy([x1, y1, x2, y2]).to_cycxhw();
                TLBR::from(anchor.apply_deltas(deltas))
            })
            .collect();

        Ok(boxes)
    }
}

/// Greedy NMS. Returns kept indices ordered by decreasing score.
///
/// A box is suppressed when its IoU with an already kept box exceeds `iou_threshold`.
pub fn nms(boxes: &[TLBR<f64>], scores: &[f64], iou_threshold: f64) -> Vec<usize> {
    let order: Vec<usize> = (0..boxes.len())
        .sorted_by(|&lhs, &rhs| {
            scores[rhs]
                .partial_cmp(&scores[lhs])
                .unwrap_or(Ordering::Equal)
        })
        .collect();

    let mut suppressed = vec![false; boxes.len()];
    let mut keep = vec![];

    for (pos, &li) in order.iter().enumerate() {
        if suppressed[li] {
            continue;
        }
        keep.push(li);

        for &ri in &order[(pos + 1)..] {
            if !suppressed[ri] && boxes[li].iou_with(&boxes[ri]) > iou_threshold {
                suppressed[ri] = true;
            }
        }
    }

    keep
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PostProcessorInit {
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f64,
}

fn default_score_threshold() -> f64 {
    0.001
}

fn default_iou_threshold() -> f64 {
    0.6
}

impl Default for PostProcessorInit {
    fn default() -> Self {
        Self {
            score_threshold: default_score_threshold(),
            iou_threshold: default_iou_threshold(),
        }
    }
}

impl PostProcessorInit {
    pub fn build(self) -> Result<PostProcessor> {
        let Self {
            score_threshold,
            iou_threshold,
        } = self;

        ensure!(
            score_threshold >= 0.0,
            "score_threshold must be non-negative"
        );
        ensure!(
            (0.0..=1.0).contains(&iou_threshold),
            "iou_threshold must lie in [0, 1]"
        );

        Ok(PostProcessor {
            decoder: BoxDecoder,
            score_threshold,
            iou_threshold,
        })
    }
}

/// Turns raw outputs into per-image detections in network input pixels.
#[derive(Debug, Clone)]
pub struct PostProcessor {
    decoder: BoxDecoder,
    score_threshold: f64,
    iou_threshold: f64,
}

impl PostProcessor {
    pub fn forward(
        &self,
        output: &ModelOutput,
        input_hw: &HW_<usize>,
    ) -> Result<Vec<Vec<BoxDetection>>> {
        output.validate(output.batch_size())?;
        let height = input_hw.h as f64;
        let width = input_hw.w as f64;

        (0..output.batch_size())
            .map(|index| -> Result<_> {
                let boxes: Vec<_> = self
                    .decoder
                    .decode(
                        output.anchors.view(),
                        output.regression.index_axis(Axis(0), index),
                    )?
                    .into_iter()
                    .map(|rect| rect.clip(height, width))
                    .collect();

                // best class of each anchor above the score threshold
                let candidates: Vec<(usize, usize, f64)> = output
                    .classification
                    .index_axis(Axis(0), index)
                    .outer_iter()
                    .enumerate()
                    .filter_map(|(anchor_index, scores)| {
                        let (class, score) = scores
                            .iter()
                            .map(|&score| score as f64)
                            .enumerate()
                            .fold(None, |best: Option<(usize, f64)>, (class, score)| {
                                match best {
                                    Some((_, best_score)) if best_score >= score => best,
                                    _ => Some((class, score)),
                                }
                            })?;
                        (score > self.score_threshold).then(|| (anchor_index, class, score))
                    })
                    .collect();

                let mut detections: Vec<BoxDetection> = candidates
                    .into_iter()
                    .map(|(anchor_index, class, score)| (class, (anchor_index, score)))
                    .into_group_map()
                    .into_iter()
                    .flat_map(|(class, members)| {
                        let rects: Vec<_> = members
                            .iter()
                            .map(|&(anchor_index, _)| boxes[anchor_index].clone())
                            .collect();
                        let scores: Vec<_> = members.iter().map(|&(_, score)| score).collect();

                        nms(&rects, &scores, self.iou_threshold)
                            .into_iter()
                            .map(|keep| Detection {
                                rect: rects[keep].clone(),
                                class,
                                confidence: scores[keep],
                            })
                            .collect_vec()
                    })
                    .collect();

                detections.sort_by(|lhs, rhs| {
                    rhs.confidence
                        .partial_cmp(&lhs.confidence)
                        .unwrap_or(Ordering::Equal)
                        .then(lhs.class.cmp(&rhs.class))
                });

                Ok(detections)
            })
            .collect()
    }
}
