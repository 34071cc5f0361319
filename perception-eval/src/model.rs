//! The boundary to the evaluated network.

use crate::{common::*, data::Batch};

/// Batch averaged loss terms.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LossTerms {
    pub classification: f64,
    pub regression: f64,
    pub segmentation: f64,
}

impl LossTerms {
    pub fn total(&self) -> f64 {
        self.classification + self.regression + self.segmentation
    }

    pub fn mean<I>(iter: I) -> Option<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        let (count, sum) = iter
            .into_iter()
            .fold((0usize, Self::default()), |(count, sum), terms| {
                let sum = Self {
                    classification: sum.classification + terms.classification,
                    regression: sum.regression + terms.regression,
                    segmentation: sum.segmentation + terms.segmentation,
                };
                (count + 1, sum)
            });

        (count > 0).then(|| Self {
            classification: sum.classification / count as f64,
            regression: sum.regression / count as f64,
            segmentation: sum.segmentation / count as f64,
        })
    }
}

/// Raw network outputs of one batch.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// `B x A x 4` box deltas `(dy, dx, dh, dw)`.
    pub regression: Array3<f32>,
    /// `B x A x K` class scores.
    pub classification: Array3<f32>,
    /// `A x 4` anchors `(y1, x1, y2, x2)` in network input pixels.
    pub anchors: Array2<f32>,
    /// `B x S x H x W` segmentation probabilities.
    pub segmentation: Array4<f32>,
    pub losses: Option<LossTerms>,
}

impl ModelOutput {
    pub fn batch_size(&self) -> usize {
        self.regression.len_of(Axis(0))
    }

    pub fn num_classes(&self) -> usize {
        self.classification.len_of(Axis(2))
    }

    /// Check that the arrays agree on batch size and anchor count.
    pub fn validate(&self, batch_size: usize) -> Result<()> {
        let (reg_b, reg_a, reg_c) = self.regression.dim();
        let (cls_b, cls_a, _) = self.classification.dim();
        let (num_anchors, anchor_c) = self.anchors.dim();
        let (seg_b, _, _, _) = self.segmentation.dim();

        ensure!(
            reg_c == 4 && anchor_c == 4,
            "regression and anchors must have 4 components"
        );
        ensure!(
            reg_b == batch_size && cls_b == batch_size && seg_b == batch_size,
            "expect batch size {}, but get regression {}, classification {} and segmentation {}",
            batch_size,
            reg_b,
            cls_b,
            seg_b
        );
        ensure!(
            reg_a == num_anchors && cls_a == num_anchors,
            "expect {} anchors, but get regression {} and classification {}",
            num_anchors,
            reg_a,
            cls_a
        );
        Ok(())
    }
}

/// A multi-task network evaluated on validation batches.
pub trait MultiTaskModel {
    /// Run the network. Loss terms are returned when `with_loss` is set.
    fn forward(&mut self, batch: &Batch, with_loss: bool) -> Result<ModelOutput>;

    /// Serializable parameters to be stored in checkpoints.
    fn state_dict(&self) -> Result<serde_json::Value>;
}

/// Load model parameters from a JSON file.
///
/// The file may hold the parameters directly or a checkpoint bundle storing
/// them under the `model` field.
pub fn load_weights<S, P>(path: P) -> Result<S>
where
    S: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read weights file '{}'", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("'{}' is not a valid JSON file", path.display()))?;

    match S::deserialize(&value) {
        Ok(state) => Ok(state),
        Err(plain_err) => {
            debug!("plain state load failed: {}", plain_err);
            let wrapped = value.get("model").ok_or_else(|| {
                format_err!(
                    "'{}' is neither a model state nor a checkpoint: {}",
                    path.display(),
                    plain_err
                )
            })?;
            let state = S::deserialize(wrapped).with_context(|| {
                format!("invalid model state in checkpoint '{}'", path.display())
            })?;
            Ok(state)
        }
    }
}

/// Outputs recorded for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedOutput {
    /// `A x 4`
    pub regression: Array2<f32>,
    /// `A x K`
    pub classification: Array2<f32>,
    /// `S x H x W`
    pub segmentation: Array3<f32>,
    #[serde(default)]
    pub losses: Option<LossTerms>,
}

/// Replays network outputs recorded per image file name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedModel {
    pub anchors: Array2<f32>,
    pub records: IndexMap<String, RecordedOutput>,
}

impl MultiTaskModel for RecordedModel {
    fn forward(&mut self, batch: &Batch, with_loss: bool) -> Result<ModelOutput> {
        let records: Vec<&RecordedOutput> = batch
            .filenames
            .iter()
            .map(|filename| {
                self.records
                    .get(filename)
                    .ok_or_else(|| format_err!("no recorded output for '{}'", filename))
            })
            .collect::<Result<_>>()?;

        let regression = {
            let views: Vec<_> = records.iter().map(|record| record.regression.view()).collect();
            ndarray::stack(Axis(0), &views)?
        };
        let classification = {
            let views: Vec<_> = records
                .iter()
                .map(|record| record.classification.view())
                .collect();
            ndarray::stack(Axis(0), &views)?
        };
        let segmentation = {
            let views: Vec<_> = records
                .iter()
                .map(|record| record.segmentation.view())
                .collect();
            ndarray::stack(Axis(0), &views)?
        };

        let losses = if with_loss {
            let terms: Vec<LossTerms> = izip!(&batch.filenames, &records)
                .map(|(filename, record)| {
                    record
                        .losses
                        .ok_or_else(|| format_err!("no recorded losses for '{}'", filename))
                })
                .collect::<Result<_>>()?;
            LossTerms::mean(terms)
        } else {
            None
        };

        let output = ModelOutput {
            regression,
            classification,
            anchors: self.anchors.clone(),
            segmentation,
            losses,
        };
        output.validate(batch.len())?;
        Ok(output)
    }

    fn state_dict(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
