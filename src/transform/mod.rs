//! Transformations of normalized expression relative to controls

mod zscore;

pub use zscore::{
    assign_controls, drop_zero_control_variance, zscore, zscore_time_matched, ControlAssignment,
};
