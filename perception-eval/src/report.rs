//! Printable summary of a validation pass.

use crate::{
    common::*,
    metrics::{ChannelScore, ClassMetrics, ConfusionMatrix, EvalMetrics, SegmentationSummary},
    model::LossTerms,
};
use prettytable::{format, Cell, Row, Table};

#[derive(Debug, Clone)]
pub struct EvalReport {
    pub class_names: Vec<String>,
    /// Number of images evaluated.
    pub seen: usize,
    /// Ground truth count of each class.
    pub num_targets: Vec<usize>,
    pub metrics: EvalMetrics,
    pub class_metrics: Option<ClassMetrics>,
    pub segmentation: SegmentationSummary,
    pub confusion: Option<ConfusionMatrix>,
    pub losses: Option<LossTerms>,
}

fn float_cell(value: f64) -> Cell {
    Cell::new(&format!("{:.3}", value))
}

impl EvalReport {
    /// Segmentation channels shown in their own columns, background excluded.
    fn seg_columns(&self) -> impl Iterator<Item = &ChannelScore> {
        self.segmentation
            .channels
            .iter()
            .filter(|channel| channel.name != "background")
    }

    pub fn results_table(&self) -> Table {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);

        let seg_headers = self
            .seg_columns()
            .flat_map(|channel| [format!("{} IoU", channel.name), format!("{} F1", channel.name)]);
        table.set_titles(Row::new(
            [
                "Class",
                "Images",
                "Labels",
                "P",
                "R",
                "mAP@.5",
                "mAP@.5:.95",
                "mIoU",
                "mF1",
            ]
            .iter()
            .map(|title| title.to_string())
            .chain(seg_headers)
            .map(|title| Cell::new(&title))
            .collect(),
        ));

        let EvalMetrics {
            precision,
            recall,
            map50,
            map,
            mean_iou,
            mean_f1,
        } = self.metrics;
        let num_labels: usize = self.num_targets.iter().sum();

        let all_row: Vec<Cell> = [
            Cell::new("all"),
            Cell::new(&self.seen.to_string()),
            Cell::new(&num_labels.to_string()),
        ]
        .into_iter()
        .chain(
            [precision, recall, map50, map, mean_iou, mean_f1]
                .into_iter()
                .map(float_cell),
        )
        .chain(
            self.seg_columns()
                .flat_map(|channel| [float_cell(channel.iou), float_cell(channel.f1)]),
        )
        .collect();
        table.add_row(Row::new(all_row));

        // per class rows
        if self.class_names.len() > 1 {
            if let Some(class_metrics) = &self.class_metrics {
                let ap50 = class_metrics.ap50();
                let ap = class_metrics.ap_mean();

                for (index, &class) in class_metrics.classes.iter().enumerate() {
                    let name = self
                        .class_names
                        .get(class)
                        .cloned()
                        .unwrap_or_else(|| class.to_string());
                    let num_targets = class_metrics.num_targets[index];

                    table.add_row(Row::new(vec![
                        Cell::new(&name),
                        Cell::new(&self.seen.to_string()),
                        Cell::new(&num_targets.to_string()),
                        float_cell(class_metrics.precision[index]),
                        float_cell(class_metrics.recall[index]),
                        float_cell(ap50[index]),
                        float_cell(ap[index]),
                    ]));
                }
            }
        }

        table
    }
}

impl fmt::Display for EvalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(losses) = &self.losses {
            writeln!(
                f,
                "Classification loss: {:1.5}. Regression loss: {:1.5}. Segmentation loss: {:1.5}. Total loss: {:1.5}",
                losses.classification,
                losses.regression,
                losses.segmentation,
                losses.total()
            )?;
        }

        write!(f, "{}", self.results_table())?;

        if let Some(confusion) = &self.confusion {
            write!(f, "{}", confusion.to_table(&self.class_names))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> EvalReport {
        EvalReport {
            class_names: vec!["car".into(), "bus".into()],
            seen: 4,
            num_targets: vec![3, 1],
            metrics: EvalMetrics {
                precision: 0.5,
                recall: 0.25,
                map50: 0.4,
                map: 0.2,
                mean_iou: 0.7,
                mean_f1: 0.8,
            },
            class_metrics: Some(ClassMetrics {
                classes: vec![0, 1],
                precision: vec![0.5, 0.5],
                recall: vec![0.25, 0.25],
                f1: vec![0.33, 0.33],
                ap: Array2::from_elem((2, 10), 0.2),
                num_targets: vec![3, 1],
            }),
            segmentation: SegmentationSummary {
                channels: vec![
                    ChannelScore {
                        name: "background".into(),
                        iou: 0.9,
                        f1: 0.95,
                    },
                    ChannelScore {
                        name: "road".into(),
                        iou: 0.5,
                        f1: 0.65,
                    },
                ],
                mean_iou: 0.7,
                mean_f1: 0.8,
            },
            confusion: None,
            losses: None,
        }
    }

    #[test]
    fn results_table_layout() {
        let table = report().results_table();
        // the "all" row and one row per class
        assert_eq!(table.len(), 3);

        let text = table.to_string();
        assert!(text.contains("mAP@.5:.95"));
        assert!(text.contains("road IoU"));
        assert!(!text.contains("background IoU"));
        assert!(text.contains("bus"));
    }

    #[test]
    fn single_class_has_no_per_class_rows() {
        let mut report = report();
        report.class_names.truncate(1);
        assert_eq!(report.results_table().len(), 1);
    }
}
