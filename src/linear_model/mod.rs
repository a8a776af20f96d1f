//! Linear model fitting and empirical Bayes variance moderation for log expression

mod ebayes;
mod fit;

pub use ebayes::{empirical_bayes, fit_f_dist, ModeratedVariances, VariancePrior};
pub use fit::{fit_linear_model, LinearModelFit};
