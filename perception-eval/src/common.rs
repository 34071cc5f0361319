//! Common imports from external crates.

pub use anyhow::{ensure, format_err, Context, Error, Result};
pub use approx::abs_diff_eq;
pub use bbox::{iou_matrix, Rect, RectFloat, RectNum, Transform, TLBR};
pub use chrono::{DateTime, Local};
pub use derivative::Derivative;
pub use indexmap::IndexMap;
pub use itertools::{izip, Itertools};
pub use label::{Detection, Label};
pub use log::{debug, info, warn};
pub use ndarray::{s, Array2, Array3, Array4, ArrayView1, ArrayView2, ArrayView3, Axis};
pub use noisy_float::prelude::*;
pub use serde::{de::DeserializeOwned, Deserialize, Serialize};
pub use std::{
    cmp::Ordering,
    fmt,
    fs,
    io::{BufRead, BufReader, BufWriter, Write},
    iter,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    thread,
};

/// A ground truth box in pixel coordinates.
pub type BoxLabel = Label<TLBR<f64>, usize>;

/// A scored prediction in pixel coordinates.
pub type BoxDetection = Detection<TLBR<f64>, usize>;
