//! Input/output: delimited tables and the differential-expression result types

mod csv;
mod results;

pub use self::csv::{
    read_annotation, read_clusters, read_count_matrix, read_de_table, read_expression_matrix,
    read_factor_map, read_metadata, read_probe_intensities, write_clusters, write_de_table,
    write_effect_table, write_enrichment, write_expression_matrix, write_metadata, write_rows,
};
pub use results::{ContrastSummary, DeRecord, DeTable, Regulation};
