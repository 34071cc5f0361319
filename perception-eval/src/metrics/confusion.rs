//! Detection confusion matrix with a background bucket.

use super::matcher::{greedy_assign, ranked_candidates};
use crate::common::*;
use prettytable::{Cell, Row, Table};

/// A `(nc + 1) x (nc + 1)` count matrix.
///
/// Rows index the true class and columns the predicted class. Index `nc` is
/// the background: a prediction without a label is counted in the background
/// row, and a missed label is counted in the background column.
#[derive(Debug, Clone)]
pub struct ConfusionMatrix {
    num_classes: usize,
    conf_threshold: f64,
    iou_threshold: f64,
    matrix: Array2<u64>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            conf_threshold: 0.25,
            iou_threshold: 0.5,
            matrix: Array2::zeros((num_classes + 1, num_classes + 1)),
        }
    }

    pub fn with_thresholds(mut self, conf_threshold: f64, iou_threshold: f64) -> Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&conf_threshold),
            "confidence threshold must lie in [0, 1]"
        );
        ensure!(
            iou_threshold > 0.0 && iou_threshold <= 1.0,
            "iou threshold must lie in (0, 1]"
        );
        self.conf_threshold = conf_threshold;
        self.iou_threshold = iou_threshold;
        Ok(self)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn matrix(&self) -> &Array2<u64> {
        &self.matrix
    }

    fn background(&self) -> usize {
        self.num_classes
    }

    fn check_class(&self, class: usize) -> Result<()> {
        ensure!(
            class < self.num_classes,
            "class id {} is out of range for {} classes",
            class,
            self.num_classes
        );
        Ok(())
    }

    /// Accumulate the outcome of one image.
    ///
    /// Fails without touching the counts when a class id is not below the
    /// number of classes.
    pub fn process_batch(
        &mut self,
        detections: &[BoxDetection],
        labels: &[BoxLabel],
    ) -> Result<()> {
        let detections: Vec<_> = detections
            .iter()
            .filter(|det| det.confidence > self.conf_threshold)
            .cloned()
            .collect();

        for det in &detections {
            self.check_class(det.class)?;
        }
        for label in labels {
            self.check_class(label.class)?;
        }

        let candidates = ranked_candidates(&detections, labels, self.iou_threshold, |_, _| true);
        let matches = greedy_assign(
            &candidates,
            detections.len(),
            labels.len(),
            self.iou_threshold,
        );

        let mut det_matched = vec![false; detections.len()];
        let mut label_matched = vec![false; labels.len()];

        for cand in matches {
            let pred = detections[cand.det_index].class;
            let truth = labels[cand.label_index].class;
            self.matrix[[truth, pred]] += 1;
            det_matched[cand.det_index] = true;
            label_matched[cand.label_index] = true;
        }

        let background = self.background();

        for (label, _) in izip!(labels, label_matched).filter(|(_, matched)| !matched) {
            self.matrix[[label.class, background]] += 1;
        }

        for (det, _) in izip!(&detections, det_matched).filter(|(_, matched)| !matched) {
            self.matrix[[background, det.class]] += 1;
        }

        Ok(())
    }

    /// Per-class true positive and false positive counts, background excluded.
    pub fn tp_fp(&self) -> (Vec<u64>, Vec<u64>) {
        (0..self.num_classes)
            .map(|class| {
                let tp = self.matrix[[class, class]];
                let predicted: u64 = self.matrix.column(class).sum();
                (tp, predicted - tp)
            })
            .unzip()
    }

    /// Render the matrix with class names as headers.
    pub fn to_table(&self, names: &[String]) -> Table {
        let headers: Vec<String> = (0..=self.num_classes)
            .map(|index| {
                if index == self.num_classes {
                    "background".to_string()
                } else {
                    names
                        .get(index)
                        .cloned()
                        .unwrap_or_else(|| index.to_string())
                }
            })
            .collect();

        let mut table = Table::new();
        table.add_row(Row::new(
            iter::once(Cell::new("true \\ pred"))
                .chain(headers.iter().map(|name| Cell::new(name)))
                .collect(),
        ));

        for (name, row) in izip!(&headers, self.matrix.rows()) {
            table.add_row(Row::new(
                iter::once(Cell::new(name))
                    .chain(row.iter().map(|count| Cell::new(&count.to_string())))
                    .collect(),
            ));
        }

        table
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_table(&[]))
    }
}
