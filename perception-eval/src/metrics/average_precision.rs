use crate::{
    common::*,
    utils::{self, AsXY},
};
use std::cmp::Reverse;

/// Number of confidence levels sampled to pick the operating point.
const CONFIDENCE_GRID_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecRec<T>
where
    T: Copy,
{
    pub precision: T,
    pub recall: T,
}

impl<T> AsXY<T, T> for PrecRec<T>
where
    T: Copy,
{
    fn x(&self) -> T {
        self.recall
    }

    fn y(&self) -> T {
        self.precision
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegralMethod {
    /// Area under the enveloped step curve.
    Continuous,
    /// Mean enveloped precision over `n` evenly spaced recall levels.
    Interpolation(usize),
}

#[derive(Debug, Clone)]
pub struct ApCalculator {
    integral_method: IntegralMethod,
}

impl ApCalculator {
    pub fn new_coco() -> Self {
        Self {
            integral_method: IntegralMethod::Interpolation(101),
        }
    }

    pub fn new(integral_method: IntegralMethod) -> Result<Self> {
        if let IntegralMethod::Interpolation(n_points) = integral_method {
            ensure!(
                n_points >= 2,
                "invalid number of interpolated points {}",
                n_points
            );
        }

        Ok(Self { integral_method })
    }

    pub fn integral_method(&self) -> IntegralMethod {
        self.integral_method
    }

    /// Make precision monotonically non-increasing in recall.
    ///
    /// Each precision is replaced by the maximum precision at the same or any
    /// later position of the curve.
    pub fn envelope(sorted_prec_rec: &[PrecRec<R64>]) -> Vec<PrecRec<R64>> {
        let mut enveloped: Vec<_> = sorted_prec_rec
            .iter()
            .rev()
            .scan(None, |max_prec: &mut Option<R64>, prec_rec| {
                let precision = match *max_prec {
                    Some(prev) => prev.max(prec_rec.precision),
                    None => prec_rec.precision,
                };
                *max_prec = Some(precision);
                Some(PrecRec {
                    precision,
                    recall: prec_rec.recall,
                })
            })
            .collect();
        enveloped.reverse();
        enveloped
    }

    /// Compute average precision from a precision/recall curve.
    ///
    /// The input precision/recall list must be ordered by non-decreasing recall.
    /// An empty curve has zero average precision.
    pub fn compute_by_prec_rec(&self, sorted_prec_rec: &[PrecRec<R64>]) -> R64 {
        if sorted_prec_rec.is_empty() {
            return r64(0.0);
        }

        let enveloped = Self::envelope(sorted_prec_rec);

        match self.integral_method {
            IntegralMethod::Interpolation(n_points) => {
                let sum: R64 = (0..n_points)
                    .map(|index| r64(index as f64 / (n_points - 1) as f64))
                    .map(|recall| {
                        // precision at the first point reaching the recall level
                        let index = enveloped.partition_point(|point| point.recall < recall);
                        enveloped
                            .get(index)
                            .map(|point| point.precision)
                            .unwrap_or_else(|| r64(0.0))
                    })
                    .sum();
                sum / n_points as f64
            }
            IntegralMethod::Continuous => iter::once(r64(0.0))
                .chain(enveloped.iter().map(|point| point.recall))
                .zip(enveloped.iter())
                .map(|(prev_recall, point)| (point.recall - prev_recall) * point.precision)
                .sum(),
        }
    }
}

/// Per-class detection metrics over the whole validation set.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetrics {
    /// Classes having at least one ground truth instance, ascending.
    pub classes: Vec<usize>,
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    pub f1: Vec<f64>,
    /// `C x T` average precision, one column per IoU threshold.
    pub ap: Array2<f64>,
    pub num_targets: Vec<usize>,
}

/// Scalar detection metrics averaged over classes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub mp: f64,
    pub mr: f64,
    pub map50: f64,
    pub map: f64,
}

impl ClassMetrics {
    pub fn empty(num_thresholds: usize) -> Self {
        Self {
            classes: vec![],
            precision: vec![],
            recall: vec![],
            f1: vec![],
            ap: Array2::zeros((0, num_thresholds)),
            num_targets: vec![],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// AP at the first IoU threshold of each class.
    pub fn ap50(&self) -> Vec<f64> {
        if self.ap.ncols() == 0 {
            return vec![0.0; self.num_classes()];
        }
        self.ap.column(0).to_vec()
    }

    /// AP averaged over IoU thresholds of each class.
    pub fn ap_mean(&self) -> Vec<f64> {
        self.ap
            .rows()
            .into_iter()
            .map(|row| row.mean().unwrap_or(0.0))
            .collect()
    }

    pub fn summary(&self) -> DetectionSummary {
        let mean = |values: &[f64]| {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        };

        DetectionSummary {
            mp: mean(&self.precision),
            mr: mean(&self.recall),
            map50: mean(&self.ap50()),
            map: self.ap.mean().unwrap_or(0.0),
        }
    }
}

/// Compute per-class precision, recall, F1 and AP from concatenated statistics.
///
/// `correct` is the stacked `N x T` correctness matrix whose rows pair with
/// `confidences` and `pred_classes`. `target_classes` lists the class of every
/// ground truth instance.
pub fn ap_per_class(
    correct: ArrayView2<bool>,
    confidences: &[f64],
    pred_classes: &[usize],
    target_classes: &[usize],
    calculator: &ApCalculator,
) -> Result<ClassMetrics> {
    let num_preds = correct.nrows();
    let num_thresholds = correct.ncols();
    ensure!(
        confidences.len() == num_preds && pred_classes.len() == num_preds,
        "expect {} confidences and predicted classes, but get {} and {}",
        num_preds,
        confidences.len(),
        pred_classes.len()
    );

    let confidences: Vec<R64> = confidences
        .iter()
        .map(|&conf| {
            R64::try_new(conf).ok_or_else(|| format_err!("non-finite confidence {}", conf))
        })
        .collect::<Result<_>>()?;

    // prediction indices by decreasing confidence
    let order: Vec<usize> = (0..num_preds)
        .sorted_by_key(|&index| Reverse(confidences[index]))
        .collect();

    let classes: Vec<usize> = target_classes.iter().cloned().sorted().dedup().collect();
    let num_classes = classes.len();
    if num_classes == 0 {
        return Ok(ClassMetrics::empty(num_thresholds));
    }

    let conf_grid = utils::linspace(0.0, 1.0, CONFIDENCE_GRID_SIZE);
    let mut ap = Array2::<f64>::zeros((num_classes, num_thresholds));
    let mut prec_curves = Array2::<f64>::zeros((num_classes, CONFIDENCE_GRID_SIZE));
    let mut rec_curves = Array2::<f64>::zeros((num_classes, CONFIDENCE_GRID_SIZE));

    let num_targets: Vec<usize> = classes
        .iter()
        .map(|&class| target_classes.iter().filter(|&&target| target == class).count())
        .collect();

    for (class_index, (&class, &num_labels)) in izip!(&classes, &num_targets).enumerate() {
        let preds: Vec<usize> = order
            .iter()
            .cloned()
            .filter(|&index| pred_classes[index] == class)
            .collect();
        if preds.is_empty() {
            continue;
        }

        // prec_rec[t][k]: curve point at rank k for threshold t
        let prec_rec: Vec<Vec<PrecRec<R64>>> = (0..num_thresholds)
            .map(|thresh_index| {
                preds
                    .iter()
                    .scan(0usize, |acc_tp, &index| {
                        if correct[[index, thresh_index]] {
                            *acc_tp += 1;
                        }
                        Some(*acc_tp)
                    })
                    .enumerate()
                    .map(|(rank, acc_tp)| {
                        let acc_tp = r64(acc_tp as f64);
                        PrecRec {
                            precision: acc_tp / (rank + 1) as f64,
                            recall: acc_tp / num_labels as f64,
                        }
                    })
                    .collect()
            })
            .collect();

        for (thresh_index, curve) in prec_rec.iter().enumerate() {
            ap[[class_index, thresh_index]] = calculator.compute_by_prec_rec(curve).raw();
        }

        // curves over confidence at the first threshold, in increasing -confidence
        if let Some(curve) = prec_rec.first() {
            let rec_points: Vec<(f64, f64)> = izip!(&preds, curve)
                .map(|(&index, point)| (-confidences[index].raw(), point.recall.raw()))
                .collect();
            let prec_points: Vec<(f64, f64)> = izip!(&preds, curve)
                .map(|(&index, point)| (-confidences[index].raw(), point.precision.raw()))
                .collect();
            let last = curve.last().map(|point| (point.recall.raw(), point.precision.raw()));
            let (last_rec, last_prec) = last.unwrap_or((0.0, 1.0));

            for (grid_index, &conf) in conf_grid.iter().enumerate() {
                rec_curves[[class_index, grid_index]] =
                    utils::interp(-conf, &rec_points, 0.0, last_rec);
                prec_curves[[class_index, grid_index]] =
                    utils::interp(-conf, &prec_points, 1.0, last_prec);
            }
        }
    }

    let f1_curves = {
        let mut f1 = Array2::<f64>::zeros((num_classes, CONFIDENCE_GRID_SIZE));
        izip!(f1.iter_mut(), prec_curves.iter(), rec_curves.iter()).for_each(
            |(f1, &prec, &rec)| {
                *f1 = 2.0 * prec * rec / (prec + rec + 1e-16);
            },
        );
        f1
    };

    // operating point maximizing the class-averaged F1, first one on ties
    let (best_index, _) = f1_curves
        .columns()
        .into_iter()
        .map(|column| column.sum() / num_classes as f64)
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (index, mean_f1)| {
            if mean_f1 > best.1 {
                (index, mean_f1)
            } else {
                best
            }
        });
    debug!("operating point at confidence {:.3}", conf_grid[best_index]);

    Ok(ClassMetrics {
        classes,
        precision: prec_curves.column(best_index).to_vec(),
        recall: rec_curves.column(best_index).to_vec(),
        f1: f1_curves.column(best_index).to_vec(),
        ap,
        num_targets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;

    fn curve(pairs: &[(f64, f64)]) -> Vec<PrecRec<R64>> {
        pairs
            .iter()
            .map(|&(precision, recall)| PrecRec {
                precision: r64(precision),
                recall: r64(recall),
            })
            .collect()
    }

    #[test]
    fn compute_by_prec_rec() -> Result<()> {
        let ap_cal_11 = ApCalculator::new(IntegralMethod::Interpolation(11))?;
        let ap_cal = ApCalculator::new_coco();

        let res = ap_cal.compute_by_prec_rec(&curve(&[(1.0, 1.0)]));
        assert_eq!(res, r64(1.0));

        let mut vec = curve(&[
            (0.5, 0.625),
            (0.556, 0.625),
            (0.625, 0.625),
            (0.714, 0.625),
            (0.833, 0.625),
            (0.800, 0.500),
            (0.750, 0.375),
            (1.0, 0.375),
            (1.0, 0.250),
            (1.0, 0.125),
        ]);
        vec.reverse();
        let res = ap_cal_11.compute_by_prec_rec(&vec);
        assert!(abs_diff_eq!(res.raw(), 0.5908181818181819));
        Ok(())
    }

    #[test]
    fn envelope_is_non_increasing() {
        let points = curve(&[(1.0, 0.1), (0.5, 0.2), (0.8, 0.3), (0.4, 0.4), (0.6, 0.5)]);
        let enveloped = ApCalculator::envelope(&points);
        assert_eq!(enveloped.len(), points.len());
        assert!(enveloped
            .iter()
            .tuple_windows()
            .all(|(lhs, rhs)| lhs.precision >= rhs.precision));
        assert_eq!(enveloped[1].precision, r64(0.8));
        assert_eq!(enveloped[3].precision, r64(0.6));
    }

    #[test]
    fn continuous_integral() -> Result<()> {
        let ap_cal = ApCalculator::new(IntegralMethod::Continuous)?;
        let res = ap_cal.compute_by_prec_rec(&curve(&[(1.0, 0.5), (0.5, 1.0)]));
        assert_abs_diff_eq!(res.raw(), 0.75, epsilon = 1e-12);
        assert_eq!(ap_cal.compute_by_prec_rec(&[]), r64(0.0));
        Ok(())
    }

    #[test]
    fn invalid_number_of_points() {
        assert!(ApCalculator::new(IntegralMethod::Interpolation(1)).is_err());
    }

    #[test]
    fn single_perfect_prediction() -> Result<()> {
        let correct = Array2::from_elem((1, 10), true);
        let calculator = ApCalculator::new_coco();
        let metrics = ap_per_class(correct.view(), &[0.9], &[0], &[0], &calculator)?;
        assert_eq!(metrics.classes, vec![0]);
        assert_abs_diff_eq!(metrics.precision[0], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(metrics.recall[0], 1.0, epsilon = 1e-9);
        assert!(metrics.ap.iter().all(|&ap| ap == 1.0));

        let summary = metrics.summary();
        assert_eq!(summary.map50, 1.0);
        assert_eq!(summary.map, 1.0);
        Ok(())
    }

    #[test]
    fn class_without_predictions_has_zero_recall() -> Result<()> {
        let correct = Array2::from_elem((1, 10), true);
        let metrics = ap_per_class(
            correct.view(),
            &[0.9],
            &[0],
            &[0, 1],
            &ApCalculator::new_coco(),
        )?;
        assert_eq!(metrics.classes, vec![0, 1]);
        assert_eq!(metrics.num_targets, vec![1, 1]);
        assert_eq!(metrics.recall[1], 0.0);
        assert_eq!(metrics.precision[1], 0.0);
        assert!(metrics.ap.row(1).iter().all(|&ap| ap == 0.0));
        Ok(())
    }

    #[test]
    fn map50_is_mean_of_first_column() -> Result<()> {
        let correct = arr2(&[
            [true, true, false],
            [false, false, false],
            [true, false, false],
            [true, true, true],
        ]);
        let metrics = ap_per_class(
            correct.view(),
            &[0.9, 0.8, 0.7, 0.6],
            &[0, 0, 1, 1],
            &[0, 0, 1, 1, 1],
            &ApCalculator::new_coco(),
        )?;
        let summary = metrics.summary();

        let ap50 = metrics.ap.column(0).to_vec();
        assert_abs_diff_eq!(summary.map50, (ap50[0] + ap50[1]) / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            summary.map,
            metrics.ap.iter().sum::<f64>() / 6.0,
            epsilon = 1e-12
        );
        assert!(summary.map <= summary.map50);
        Ok(())
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let correct = Array2::from_elem((2, 10), false);
        let calculator = ApCalculator::new_coco();
        let result = ap_per_class(correct.view(), &[0.9], &[0, 0], &[0], &calculator);
        assert!(result.is_err());
    }

    #[test]
    fn no_targets_yields_empty_metrics() -> Result<()> {
        let correct = Array2::from_elem((1, 10), false);
        let calculator = ApCalculator::new_coco();
        let metrics = ap_per_class(correct.view(), &[0.4], &[2], &[], &calculator)?;
        assert_eq!(metrics.num_classes(), 0);
        assert_eq!(metrics.summary(), DetectionSummary::default());
        Ok(())
    }
}
