//! Per-gene ordinary least squares against a shared design
//! R equivalent: limma::lmFit(y, design)

use ndarray::{Array2, ArrayView1, Axis};
use rayon::prelude::*;

use crate::data::ExpressionMatrix;
use crate::design::DesignMatrix;
use crate::error::{PipelineError, Result};

/// Coefficients and residual variances of every gene
#[derive(Debug, Clone)]
pub struct LinearModelFit {
    pub gene_ids: Vec<String>,
    /// Coefficient names (design levels)
    pub levels: Vec<String>,
    /// Genes x coefficients
    pub coefficients: Array2<f64>,
    /// Residual variance per gene; NaN when there are no residual df and
    /// exactly zero when every group's replicates are identical
    pub sigma2: Vec<f64>,
    pub df_residual: usize,
    /// (X'X)^-1, shared by every gene
    pub cov_unscaled: Array2<f64>,
    /// Mean log expression per gene
    pub ave_expr: Vec<f64>,
}

impl LinearModelFit {
    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    /// Unscaled variance of a linear combination of coefficients: w' (X'X)^-1 w
    pub fn unscaled_variance(&self, weights: &[f64]) -> f64 {
        let p = weights.len();
        let mut v = 0.0;
        for a in 0..p {
            for b in 0..p {
                v += weights[a] * self.cov_unscaled[[a, b]] * weights[b];
            }
        }
        v
    }
}

/// Fit every gene by OLS
///
/// Genes are fit in parallel; results keep matrix order. Missing values are
/// not supported and must be removed before fitting.
pub fn fit_linear_model(matrix: &ExpressionMatrix, design: &DesignMatrix) -> Result<LinearModelFit> {
    if matrix.n_samples() != design.n_samples() {
        return Err(PipelineError::DimensionMismatch {
            expected: format!("{} samples in the design", design.n_samples()),
            got: format!("{} matrix columns", matrix.n_samples()),
        });
    }
    if let Some(i) = matrix
        .values()
        .axis_iter(Axis(0))
        .position(|row| row.iter().any(|v| !v.is_finite()))
    {
        return Err(PipelineError::InvalidMatrix {
            reason: format!("gene '{}' has missing values", matrix.gene_ids()[i]),
        });
    }

    let x = design.matrix().to_owned();
    let n = x.nrows();
    let p = x.ncols();

    let mut xtx = vec![0.0; p * p];
    for i in 0..n {
        for j in 0..p {
            for k in 0..p {
                xtx[j * p + k] += x[[i, j]] * x[[i, k]];
            }
        }
    }
    let xtx_inv = invert_symmetric_matrix(&xtx, p)?;
    let df_residual = n.saturating_sub(p);

    let values = matrix.values();
    let per_gene: Vec<(Vec<f64>, f64)> = (0..matrix.n_genes())
        .into_par_iter()
        .map(|g| fit_single_gene(values.row(g), &x, &xtx_inv, df_residual))
        .collect();

    let mut coefficients = Array2::zeros((matrix.n_genes(), p));
    let mut sigma2 = Vec::with_capacity(matrix.n_genes());
    for (g, (beta, s2)) in per_gene.into_iter().enumerate() {
        for j in 0..p {
            coefficients[[g, j]] = beta[j];
        }
        sigma2.push(s2);
    }

    let cov_unscaled = Array2::from_shape_vec((p, p), xtx_inv).map_err(|e| {
        PipelineError::NumericalInstability {
            operation: "lmFit".to_string(),
            details: e.to_string(),
        }
    })?;

    log::info!(
        "Fitted linear model: {} genes, {} coefficients, {} residual df",
        matrix.n_genes(),
        p,
        df_residual
    );

    Ok(LinearModelFit {
        gene_ids: matrix.gene_ids().to_vec(),
        levels: design.levels().to_vec(),
        coefficients,
        sigma2,
        df_residual,
        cov_unscaled,
        ave_expr: matrix.gene_means(),
    })
}

/// Relative residual sum of squares below which a gene has no residual variance
const ZERO_RSS_TOLERANCE: f64 = 1e-12;

/// beta = (X'X)^-1 X'y and residual variance RSS / df
///
/// Rounding in (X'X)^-1 leaves an RSS of ~1e-31 for a gene whose replicates
/// are identical; such an RSS is reported as exactly zero variance.
fn fit_single_gene(
    y: ArrayView1<f64>,
    x: &Array2<f64>,
    xtx_inv: &[f64],
    df_residual: usize,
) -> (Vec<f64>, f64) {
    let (n, p) = x.dim();
    let mut xty = vec![0.0; p];
    for i in 0..n {
        for j in 0..p {
            xty[j] += x[[i, j]] * y[i];
        }
    }
    let beta: Vec<f64> = (0..p)
        .map(|j| (0..p).map(|k| xtx_inv[j * p + k] * xty[k]).sum())
        .collect();

    if df_residual == 0 {
        return (beta, f64::NAN);
    }
    let rss: f64 = (0..n)
        .map(|i| {
            let fitted: f64 = (0..p).map(|j| x[[i, j]] * beta[j]).sum();
            (y[i] - fitted).powi(2)
        })
        .sum();
    let scale = 1.0 + y.iter().map(|v| v * v).sum::<f64>();
    if rss <= ZERO_RSS_TOLERANCE * scale {
        return (beta, 0.0);
    }
    (beta, rss / df_residual as f64)
}

/// Lower Cholesky factor of a symmetric positive definite matrix (row-major)
fn cholesky(a: &[f64], n: usize) -> Result<Vec<f64>> {
    let mut l = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                if sum <= 0.0 {
                    return Err(PipelineError::NumericalInstability {
                        operation: "Cholesky decomposition".to_string(),
                        details: format!("X'X is not positive definite at pivot {}", i),
                    });
                }
                l[i * n + j] = sum.sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }
    Ok(l)
}

fn solve_cholesky(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * y[j];
        }
        y[i] = sum / l[i * n + i];
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }
        x[i] = sum / l[i * n + i];
    }
    x
}

pub(crate) fn invert_symmetric_matrix(a: &[f64], n: usize) -> Result<Vec<f64>> {
    let l = cholesky(a, n)?;
    let mut result = vec![0.0; n * n];
    for i in 0..n {
        let mut e = vec![0.0; n];
        e[i] = 1.0;
        let col = solve_cholesky(&l, &e, n);
        for j in 0..n {
            result[j * n + i] = col[j];
        }
    }
    Ok(result)
}
