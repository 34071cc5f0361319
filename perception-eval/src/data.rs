//! Validation samples, batch collation and the prefetching loader.

use crate::common::*;
use bbox::HW_;

/// Class id marking padded annotation rows.
pub const SENTINEL_CLASS: f32 = -1.0;

/// Geometry recorded when an image was resized and padded for the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeInfo {
    pub original_hw: HW_<usize>,
    /// `(ry, rx)` resize ratios.
    #[serde(default)]
    pub ratio: Option<(f64, f64)>,
    /// `(px, py)` padding added after resizing.
    #[serde(default)]
    pub pad: Option<(f64, f64)>,
}

impl ShapeInfo {
    /// The transform from original image pixels to network input pixels.
    ///
    /// Falls back to a centered letterbox into `input_hw` when the ratio or
    /// padding was not recorded.
    pub fn to_input_transform(&self, input_hw: &HW_<usize>) -> Result<Transform<f64>> {
        let transform = match (self.ratio, self.pad) {
            (Some(ratio), Some(pad)) => Transform::from_ratio_pad(ratio, pad),
            _ => {
                let src = self.original_hw.to_float_hw()?;
                let tgt = input_hw.to_float_hw()?;
                Transform::from_sizes_letterbox(&src, &tgt)?
            }
        };
        Ok(transform)
    }
}

/// One validation image with its annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub filename: String,
    pub shape: ShapeInfo,
    /// Rows of `[x1, y1, x2, y2, class]` in network input pixels.
    #[serde(default)]
    pub annotations: Vec<[f32; 5]>,
    /// `S x H x W` segmentation target.
    pub segmentation: Array3<f32>,
}

/// Collated samples.
#[derive(Debug, Clone)]
pub struct Batch {
    pub filenames: Vec<String>,
    pub shapes: Vec<ShapeInfo>,
    /// `B x M x 5`, padded with rows of [SENTINEL_CLASS].
    pub annotations: Array3<f32>,
    /// `B x S x H x W`.
    pub segmentation: Array4<f32>,
    pub input_hw: HW_<usize>,
}

impl Batch {
    pub fn collate(samples: &[Sample], input_hw: HW_<usize>) -> Result<Self> {
        ensure!(!samples.is_empty(), "cannot collate an empty batch");

        let batch_size = samples.len();
        let max_annotations = samples
            .iter()
            .map(|sample| sample.annotations.len())
            .max()
            .unwrap_or(0)
            .max(1);

        let mut annotations =
            Array3::from_elem((batch_size, max_annotations, 5), SENTINEL_CLASS);
        for (index, sample) in samples.iter().enumerate() {
            for (row, annotation) in sample.annotations.iter().enumerate() {
                annotations
                    .slice_mut(s![index, row, ..])
                    .assign(&ArrayView1::from(&annotation[..]));
            }
        }

        let seg_views: Vec<_> = samples
            .iter()
            .map(|sample| sample.segmentation.view())
            .collect();
        let segmentation = ndarray::stack(Axis(0), &seg_views)
            .with_context(|| "segmentation targets in a batch must have the same shape")?;

        Ok(Self {
            filenames: samples.iter().map(|sample| sample.filename.clone()).collect(),
            shapes: samples.iter().map(|sample| sample.shape.clone()).collect(),
            annotations,
            segmentation,
            input_hw,
        })
    }

    pub fn len(&self) -> usize {
        self.filenames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filenames.is_empty()
    }

    /// Ground truth of image `index` with sentinel rows removed.
    pub fn labels(&self, index: usize) -> Vec<BoxLabel> {
        self.annotations
            .index_axis(Axis(0), index)
            .outer_iter()
            // sentinel and other negative class ids mark padding
            .filter(|row| row[4] >= 0.0)
            .map(|row| {
                let xyxy = [row[0], row[1], row[2], row[3]].map(|value| value as f64);
                Label {
                    rect: TLBR::from_xyxy(xyxy),
                    class: row[4] as usize,
                }
            })
            .collect()
    }
}

/// Samples loaded from a JSON lines file, one [Sample] per line.
#[derive(Debug, Clone)]
pub struct JsonLinesDataset {
    samples: Vec<Sample>,
}

impl JsonLinesDataset {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let reader = BufReader::new(
            fs::File::open(path)
                .with_context(|| format!("failed to open dataset file '{}'", path.display()))?,
        );

        let samples: Vec<Sample> = reader
            .lines()
            .enumerate()
            .filter_map(|(line_index, line)| match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(serde_json::from_str(&line).with_context(|| {
                    format!("invalid sample at {}:{}", path.display(), line_index + 1)
                })),
                Err(err) => Some(Err(err.into())),
            })
            .collect::<Result<_>>()?;

        info!("loaded {} samples from '{}'", samples.len(), path.display());
        Ok(Self { samples })
    }

    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}

/// Collates batches on a background thread and hands them over a bounded channel.
///
/// Batches are yielded in dataset order.
#[derive(Debug)]
pub struct PrefetchLoader {
    rx: flume::Receiver<Result<Batch>>,
    worker: Option<thread::JoinHandle<()>>,
    num_batches: usize,
}

impl PrefetchLoader {
    pub fn spawn(
        samples: Vec<Sample>,
        batch_size: NonZeroUsize,
        input_hw: HW_<usize>,
        prefetch: usize,
    ) -> Self {
        let batch_size = batch_size.get();
        let num_batches = (samples.len() + batch_size - 1) / batch_size;
        let (tx, rx) = flume::bounded(prefetch.max(1));

        let worker = thread::spawn(move || {
            for chunk in samples.chunks(batch_size) {
                let batch = Batch::collate(chunk, input_hw);
                if tx.send(batch).is_err() {
                    debug!("batch receiver dropped, stop prefetching");
                    break;
                }
            }
        });

        Self {
            rx,
            worker: Some(worker),
            num_batches,
        }
    }

    pub fn num_batches(&self) -> usize {
        self.num_batches
    }
}

impl Iterator for PrefetchLoader {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rx.recv() {
            Ok(batch) => Some(batch),
            Err(_) => {
                if let Some(worker) = self.worker.take() {
                    if worker.join().is_err() {
                        return Some(Err(format_err!("the prefetch worker panicked")));
                    }
                }
                None
            }
        }
    }
}
