//! P-value calculation from test statistics

use statrs::distribution::{ContinuousCDF, StudentsT};

/// Calculate two-sided p-value from t-statistic with given degrees of freedom
/// R equivalent: 2 * pt(abs(stat), df=df, lower.tail=FALSE)
pub fn calculate_pvalue_t(stat: f64, df: f64) -> f64 {
    if !stat.is_finite() || !(df > 0.0) {
        return f64::NAN;
    }

    match StudentsT::new(0.0, 1.0, df) {
        Ok(t_dist) => 2.0 * t_dist.cdf(-stat.abs()),
        Err(_) => f64::NAN,
    }
}
