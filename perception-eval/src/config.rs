//! Project and evaluation configuration.

use crate::{
    common::*,
    metrics::{FitnessWeights, IouThresholds},
    postprocess::PostProcessorInit,
};
use bbox::HW_;

/// A project file, usually `projects/<name>.json5`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Detection class names.
    pub obj_list: Vec<String>,
    /// Segmentation class names, excluding the background channel.
    #[serde(default)]
    pub seg_list: Vec<String>,
    /// Network input size.
    pub input_size: HW_<usize>,
    /// JSON lines file of validation samples.
    pub val_set: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: NonZeroUsize,
    /// Number of batches prepared ahead.
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,
    #[serde(default)]
    pub eval: EvalConfig,
}

fn default_batch_size() -> NonZeroUsize {
    NonZeroUsize::new(2).unwrap_or(NonZeroUsize::MIN)
}

fn default_prefetch() -> usize {
    2
}

impl ProjectConfig {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = fs::read_to_string(path)?;
        let config: Self = json5::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `projects/<name>.json5` relative to `root`.
    pub fn open_project<P>(root: P, name: &str) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = root
            .as_ref()
            .join("projects")
            .join(format!("{}.json5", name));
        Self::open(&path)
            .with_context(|| format!("failed to load project file '{}'", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.obj_list.is_empty(), "obj_list must not be empty");
        ensure!(
            self.input_size.h > 0 && self.input_size.w > 0,
            "input_size must be positive"
        );
        Ok(())
    }

    /// Names of the segmentation output channels, background first.
    pub fn seg_channels(&self) -> Vec<String> {
        iter::once("background".to_string())
            .chain(self.seg_list.iter().cloned())
            .collect()
    }
}

/// Options shared by the training-time and standalone evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Compute detection and segmentation metrics. Without it the pass only
    /// tracks the loss.
    #[serde(default = "default_true")]
    pub cal_map: bool,
    #[serde(default = "default_num_epochs")]
    pub num_epochs: usize,
    /// Minimum loss decrease counted as an improvement.
    #[serde(default)]
    pub es_min_delta: f64,
    /// Epochs without improvement before stopping. Zero disables early stopping.
    #[serde(default)]
    pub es_patience: usize,
    /// Model size variant, used in checkpoint names.
    #[serde(default)]
    pub compound_coef: usize,
    #[serde(default)]
    pub post_process: PostProcessorInit,
    #[serde(default)]
    pub iou_thresholds: IouThresholds,
    #[serde(default = "default_confusion_conf_threshold")]
    pub confusion_conf_threshold: f64,
    #[serde(default = "default_confusion_iou_threshold")]
    pub confusion_iou_threshold: f64,
    #[serde(default = "default_seg_threshold")]
    pub seg_threshold: f32,
    #[serde(default)]
    pub fitness_weights: FitnessWeights,
    /// Print the confusion matrix after the pass.
    #[serde(default = "default_true")]
    pub plot_confusion: bool,
}

fn default_true() -> bool {
    true
}

fn default_num_epochs() -> usize {
    500
}

fn default_confusion_conf_threshold() -> f64 {
    0.25
}

fn default_confusion_iou_threshold() -> f64 {
    0.5
}

fn default_seg_threshold() -> f32 {
    0.5
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            cal_map: true,
            num_epochs: default_num_epochs(),
            es_min_delta: 0.0,
            es_patience: 0,
            compound_coef: 0,
            post_process: PostProcessorInit::default(),
            iou_thresholds: IouThresholds::default(),
            confusion_conf_threshold: default_confusion_conf_threshold(),
            confusion_iou_threshold: default_confusion_iou_threshold(),
            seg_threshold: default_seg_threshold(),
            fitness_weights: FitnessWeights::default(),
            plot_confusion: true,
        }
    }
}
