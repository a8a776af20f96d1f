//! Empirical Bayes moderation of residual variances
//!
//! R equivalent: limma::squeezeVar() with limma:::fitFDist() (no covariate,
//! not robust). The scaled F prior is estimated by moments of log variances.

use statrs::function::gamma::digamma;

use super::LinearModelFit;
use crate::stats::{mean, trigamma, trigamma_inverse};

/// Scaled inverse chi-square prior on gene variances
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariancePrior {
    /// Prior degrees of freedom d0; infinite when the data show no extra spread
    pub df_prior: f64,
    /// Prior variance s0^2
    pub var_prior: f64,
}

/// Posterior variances after moderation
#[derive(Debug, Clone)]
pub struct ModeratedVariances {
    /// None when the prior could not be estimated
    pub prior: Option<VariancePrior>,
    /// Posterior variance per gene
    pub var_post: Vec<f64>,
    /// Residual df + prior df, capped at the pooled residual df
    pub df_total: Vec<f64>,
}

/// Estimate the variance prior from genes with positive, finite variance
///
/// Returns None with fewer than two such genes or non-positive residual df.
pub fn fit_f_dist(variances: &[f64], df: f64) -> Option<VariancePrior> {
    if !(df > 0.0) || !df.is_finite() {
        return None;
    }
    let usable: Vec<f64> = variances
        .iter()
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0)
        .collect();
    if usable.len() < 2 {
        return None;
    }

    let half_df = df / 2.0;
    let e: Vec<f64> = usable
        .iter()
        .map(|v| v.ln() - digamma(half_df) + half_df.ln())
        .collect();
    let e_mean = mean(&e);
    let e_var = e.iter().map(|x| (x - e_mean).powi(2)).sum::<f64>() / (e.len() - 1) as f64
        - trigamma(half_df);

    if e_var > 0.0 {
        let df_prior = 2.0 * trigamma_inverse(e_var);
        let var_prior = (e_mean + digamma(df_prior / 2.0) - (df_prior / 2.0).ln()).exp();
        Some(VariancePrior { df_prior, var_prior })
    } else {
        // pooled variance is the MLE of the scale here
        Some(VariancePrior {
            df_prior: f64::INFINITY,
            var_prior: mean(&usable),
        })
    }
}

/// Squeeze gene variances toward the common prior
pub fn empirical_bayes(fit: &LinearModelFit) -> ModeratedVariances {
    let df = fit.df_residual as f64;
    let prior = fit_f_dist(&fit.sigma2, df);
    let df_pooled = df * fit.n_genes() as f64;

    let (var_post, df_total) = match prior {
        Some(VariancePrior { df_prior, var_prior }) => {
            log::info!("Variance prior: d0 = {:.3}, s0^2 = {:.4}", df_prior, var_prior);
            let total = (df + df_prior).min(df_pooled);
            let var_post = fit
                .sigma2
                .iter()
                .map(|&s2| {
                    if df_prior.is_infinite() {
                        var_prior
                    } else if s2.is_finite() {
                        (df * s2 + df_prior * var_prior) / (df + df_prior)
                    } else {
                        f64::NAN
                    }
                })
                .collect();
            (var_post, vec![total; fit.n_genes()])
        }
        None => {
            log::warn!("Variance prior could not be estimated; using unmoderated variances");
            (fit.sigma2.clone(), vec![df; fit.n_genes()])
        }
    };

    ModeratedVariances {
        prior,
        var_post,
        df_total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_prior_with_single_gene() {
        assert!(fit_f_dist(&[0.5], 4.0).is_none());
        assert!(fit_f_dist(&[0.5, 0.7], 0.0).is_none());
    }

    #[test]
    fn test_zero_variances_do_not_shape_the_prior() {
        let mut v = vec![0.3; 50];
        let without = fit_f_dist(&v, 4.0).unwrap();
        v.extend([0.0, 0.0]);
        assert_eq!(fit_f_dist(&v, 4.0).unwrap(), without);
    }

    #[test]
    fn test_identical_variances_give_infinite_prior_df() {
        let prior = fit_f_dist(&[0.3; 50], 4.0).unwrap();
        assert!(prior.df_prior.is_infinite());
        assert!((prior.var_prior - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_spread_variances_give_finite_prior() {
        let v: Vec<f64> = (0..200)
            .map(|i| 0.05 * (1.0 + (i % 17) as f64 * 2.0) * (1.0 + (i % 7) as f64 * 3.0))
            .collect();
        let prior = fit_f_dist(&v, 3.0).unwrap();
        assert!(prior.df_prior.is_finite() && prior.df_prior > 0.0);
        assert!(prior.var_prior > 0.0);
    }
}
