//! Design matrix and contrast construction

mod contrast;
mod matrix;

pub use contrast::{Contrast, ContrastSet};
pub use matrix::{check_full_rank, DesignMatrix};
