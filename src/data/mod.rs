//! Data structures for per-study expression analysis

mod collapse;
mod count_matrix;
mod expression_matrix;
mod metadata;
mod probes;
mod study;

pub use collapse::collapse_to_symbols;
pub use count_matrix::CountMatrix;
pub use expression_matrix::ExpressionMatrix;
pub(crate) use metadata::is_level_char;
pub use metadata::{Factor, FactorMap, FactorMapEntry, Sample, SampleMetadata, SampleRecord, TimePoint};
pub use probes::ProbeIntensities;
pub use study::{check_alignment, Study};
