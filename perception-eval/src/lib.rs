//! Validation of multi-task perception networks.
//!
//! The crate scores object detection boxes and semantic segmentation maps
//! produced by one network. Detection is scored by COCO style average
//! precision over IoU thresholds 0.5 to 0.95 and a confusion matrix.
//! Segmentation is scored by per channel IoU and F1. The [evaluator] module
//! drives a full validation pass including checkpointing and early stopping.

mod common;

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod evaluator;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod postprocess;
pub mod report;
pub mod utils;

pub use common::{BoxDetection, BoxLabel};
