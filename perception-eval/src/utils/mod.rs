//! Misc utilities.

mod algorithm;

pub use algorithm::*;
