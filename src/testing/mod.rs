//! Statistical testing for differential expression

mod de;
mod fdr;
mod pvalue;

pub use de::differential_expression;
pub use fdr::benjamini_hochberg;
pub use pvalue::calculate_pvalue_t;
