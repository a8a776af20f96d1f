//! Quality filtering of arrays and genes before normalization and testing

mod expression;
mod quality;

pub use expression::filter_by_expression;
pub use quality::{array_quality, discard_outlier_arrays, ArrayQuality};
