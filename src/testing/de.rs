//! Moderated t-tests for every contrast
//! R equivalent: contrasts.fit() + eBayes() + topTable(adjust.method = "BH")

use super::{benjamini_hochberg, calculate_pvalue_t};
use crate::config::DeConfig;
use crate::data::ExpressionMatrix;
use crate::design::{ContrastSet, DesignMatrix};
use crate::error::Result;
use crate::io::{DeRecord, DeTable, Regulation};
use crate::linear_model::{empirical_bayes, fit_linear_model, ModeratedVariances};

/// Fit, moderate and test every contrast
///
/// A contrast touching a level with fewer than two samples, or a design
/// without residual df, yields effect sizes only: logFC and AveExpr are
/// reported, t/p/adj.p are absent and every call is `ns`.
pub fn differential_expression(
    matrix: &ExpressionMatrix,
    design: &DesignMatrix,
    contrasts: &ContrastSet,
    config: &DeConfig,
) -> Result<DeTable> {
    let fit = fit_linear_model(matrix, design)?;
    let moderated = if config.moderate_variance {
        empirical_bayes(&fit)
    } else {
        ModeratedVariances {
            prior: None,
            var_post: fit.sigma2.clone(),
            df_total: vec![fit.df_residual as f64; fit.n_genes()],
        }
    };

    let mut records = Vec::with_capacity(fit.n_genes() * contrasts.len());
    for contrast in contrasts {
        let weights = contrast.weights();
        let estimable = fit.df_residual > 0 && design.replicated(contrast);
        if !estimable {
            log::warn!(
                "Contrast '{}' involves an unreplicated group; reporting effect sizes only",
                contrast.name()
            );
        }
        let unscaled = fit.unscaled_variance(weights);

        let mut rows: Vec<(f64, Option<f64>, Option<f64>, Option<f64>)> =
            Vec::with_capacity(fit.n_genes());
        for g in 0..fit.n_genes() {
            let log_fc: f64 = weights
                .iter()
                .enumerate()
                .map(|(j, w)| w * fit.coefficients[[g, j]])
                .sum();
            if !estimable {
                rows.push((log_fc, None, None, None));
                continue;
            }
            // zero residual variance stays untested unless the prior supplies one
            let var = moderated.var_post[g];
            let df = moderated.df_total[g];
            if !(var > 0.0) || !var.is_finite() {
                log::debug!("Gene {} has no usable variance; not tested", fit.gene_ids[g]);
                rows.push((log_fc, None, None, None));
                continue;
            }
            let t = log_fc / (var * unscaled).sqrt();
            let p = calculate_pvalue_t(t, df);
            if p.is_finite() {
                rows.push((log_fc, Some(t), Some(p), Some(df)));
            } else {
                rows.push((log_fc, None, None, None));
            }
        }

        let pvalues: Vec<f64> = rows.iter().map(|r| r.2.unwrap_or(f64::NAN)).collect();
        let padj = benjamini_hochberg(&pvalues);

        for (g, ((log_fc, t, p, df), adj)) in rows.into_iter().zip(padj).enumerate() {
            let adj_p_value = if adj.is_finite() { Some(adj) } else { None };
            records.push(DeRecord {
                gene_id: fit.gene_ids[g].clone(),
                contrast: contrast.name().to_string(),
                log_fc,
                ave_expr: fit.ave_expr[g],
                t,
                p_value: p,
                adj_p_value,
                df,
                estimable,
                regulation: Regulation::call(log_fc, adj_p_value, &config.thresholds),
            });
        }
    }

    let table = DeTable::new(records);
    for s in table.summary() {
        log::info!(
            "{}: {} up, {} down of {} genes",
            s.contrast,
            s.upregulated,
            s.downregulated,
            s.total_genes
        );
    }
    Ok(table)
}
