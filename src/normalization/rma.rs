//! Robust multi-array average (RMA) for probe-level microarray data
//!
//! Three steps, each applied to all arrays jointly:
//! 1. Convolution background correction (normal background + exponential
//!    signal) per array
//! 2. Quantile normalization across arrays
//! 3. log2 and Tukey median polish per probeset
//!
//! R equivalent: affy::rma() / oligo::rma()

use ndarray::{Array2, Axis};
use rayon::prelude::*;
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

use crate::config::RmaParams;
use crate::data::{ExpressionMatrix, ProbeIntensities};
use crate::error::{PipelineError, Result};
use crate::stats::{median, quantile, sample_variance};

/// Summarize probe intensities into one log2 value per probeset per sample
pub fn rma(probes: &ProbeIntensities, params: &RmaParams) -> Result<ExpressionMatrix> {
    if probes.n_probes() == 0 || probes.n_samples() == 0 {
        return Err(PipelineError::EmptyData {
            reason: "probe intensity matrix is empty".to_string(),
        });
    }

    let mut data = probes.intensities().to_owned();

    if params.background_correct {
        log::info!("RMA: background correcting {} arrays", probes.n_samples());
        let corrected: Vec<Vec<f64>> = (0..data.ncols())
            .into_par_iter()
            .map(|j| background_correct(&data.column(j).to_vec(), params.density_grid))
            .collect();
        for (j, col) in corrected.into_iter().enumerate() {
            for (i, v) in col.into_iter().enumerate() {
                data[[i, j]] = v;
            }
        }
    }

    if params.quantile_normalize {
        log::info!("RMA: quantile normalizing");
        quantile_normalize(&mut data);
    }

    data.mapv_inplace(f64::log2);

    let groups = probes.probeset_groups();
    log::info!("RMA: median polish over {} probesets", groups.len());
    let summarized: Vec<Vec<f64>> = groups
        .par_iter()
        .map(|(_, rows)| {
            let block = data.select(Axis(0), rows);
            median_polish(&block, params.polish_max_iter, params.polish_eps)
        })
        .collect();

    let n_samples = probes.n_samples();
    let mut values = Array2::zeros((groups.len(), n_samples));
    for (i, row) in summarized.iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            values[[i, j]] = v;
        }
    }

    let probeset_ids = groups.into_iter().map(|(id, _)| id).collect();
    ExpressionMatrix::new(values, probeset_ids, probes.sample_ids().to_vec())
}

/// Parameters of the normal + exponential convolution model
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct BackgroundModel {
    pub alpha: f64,
    pub mu: f64,
    pub sigma: f64,
}

/// Estimate background/signal parameters for one array
/// R equivalent: affy:::bg.parameters()
pub(crate) fn background_parameters(pm: &[f64], grid: usize) -> Option<BackgroundModel> {
    let pmbg = density_mode(pm, grid)?;
    let below: Vec<f64> = pm.iter().copied().filter(|&x| x < pmbg).collect();
    let pmbg = density_mode(&below, grid)?;

    let bg: Vec<f64> = pm.iter().filter(|&&x| x < pmbg).map(|&x| x - pmbg).collect();
    if bg.len() < 2 {
        return None;
    }
    let bgsd = (bg.iter().map(|x| x * x).sum::<f64>() / (bg.len() - 1) as f64).sqrt()
        * std::f64::consts::SQRT_2;

    let signal: Vec<f64> = pm.iter().filter(|&&x| x > pmbg).map(|&x| x - pmbg).collect();
    let expmean = density_mode(&signal, grid)?;

    if !(bgsd > 0.0) || !(expmean > 0.0) {
        return None;
    }
    Some(BackgroundModel {
        alpha: 1.0 / expmean,
        mu: pmbg,
        sigma: bgsd,
    })
}

/// Background-correct one array; falls back to the raw values if the model cannot be fit
fn background_correct(pm: &[f64], grid: usize) -> Vec<f64> {
    let model = match background_parameters(pm, grid) {
        Some(m) => m,
        None => {
            log::warn!("RMA background model could not be estimated; array left uncorrected");
            return pm.to_vec();
        }
    };
    let std_normal = match Normal::new(0.0, 1.0) {
        Ok(n) => n,
        Err(_) => return pm.to_vec(),
    };
    let floor = f64::EPSILON;
    pm.iter()
        .map(|&x| {
            let a = x - model.mu - model.alpha * model.sigma * model.sigma;
            let b = model.sigma;
            let z = a / b;
            let cdf = std_normal.cdf(z);
            let v = if cdf > 0.0 {
                a + b * std_normal.pdf(z) / cdf
            } else {
                // Mills ratio limit for very negative z
                b / z.abs()
            };
            if v.is_finite() && v > floor {
                v
            } else {
                floor
            }
        })
        .collect()
}

/// Location of the maximum of a Gaussian kernel density estimate
/// R equivalent: affy:::max.density() with density(x, kernel = "gaussian")
///
/// Values are linearly binned onto `grid` points spanning the data +/- 3
/// bandwidths, then smoothed with the kernel truncated at 4 bandwidths.
pub(crate) fn density_mode(x: &[f64], grid: usize) -> Option<f64> {
    let v: Vec<f64> = x.iter().copied().filter(|v| v.is_finite()).collect();
    if v.len() < 2 {
        return None;
    }
    let bw = bandwidth_nrd0(&v);
    if !(bw > 0.0) {
        return v.first().copied();
    }

    let lo = v.iter().copied().fold(f64::INFINITY, f64::min) - 3.0 * bw;
    let hi = v.iter().copied().fold(f64::NEG_INFINITY, f64::max) + 3.0 * bw;
    let step = (hi - lo) / (grid - 1) as f64;

    let mut bins = vec![0.0; grid];
    for &xi in &v {
        let pos = (xi - lo) / step;
        let k = (pos.floor() as usize).min(grid - 2);
        let frac = pos - k as f64;
        bins[k] += 1.0 - frac;
        bins[k + 1] += frac;
    }

    let reach = ((4.0 * bw / step).ceil() as usize).max(1);
    let kernel: Vec<f64> = (0..=reach)
        .map(|d| {
            let u = d as f64 * step / bw;
            (-0.5 * u * u).exp()
        })
        .collect();

    let mut best = (0usize, f64::NEG_INFINITY);
    for g in 0..grid {
        let start = g.saturating_sub(reach);
        let end = (g + reach).min(grid - 1);
        let dens: f64 = (start..=end).map(|k| bins[k] * kernel[g.abs_diff(k)]).sum();
        if dens > best.1 {
            best = (g, dens);
        }
    }
    Some(lo + best.0 as f64 * step)
}

/// Silverman's rule of thumb
/// R equivalent: bw.nrd0()
pub(crate) fn bandwidth_nrd0(x: &[f64]) -> f64 {
    let hi = sample_variance(x).sqrt();
    let iqr = quantile(x, 0.75) - quantile(x, 0.25);
    let mut lo = hi.min(iqr / 1.34);
    if !(lo > 0.0) {
        lo = if hi > 0.0 {
            hi
        } else if x[0].abs() > 0.0 {
            x[0].abs()
        } else {
            1.0
        };
    }
    0.9 * lo * (x.len() as f64).powf(-0.2)
}

/// Force every column to share the same empirical distribution
/// R equivalent: preprocessCore::normalize.quantiles()
///
/// Tied values within a column receive the average of the target values
/// over their ranks.
pub fn quantile_normalize(data: &mut Array2<f64>) {
    let (n_rows, n_cols) = data.dim();
    if n_rows == 0 || n_cols == 0 {
        return;
    }

    let orders: Vec<Vec<usize>> = (0..n_cols)
        .map(|j| {
            let col = data.column(j);
            let mut idx: Vec<usize> = (0..n_rows).collect();
            idx.sort_by(|&a, &b| col[a].partial_cmp(&col[b]).unwrap_or(std::cmp::Ordering::Equal));
            idx
        })
        .collect();

    let mut target = vec![0.0; n_rows];
    for (j, order) in orders.iter().enumerate() {
        for (rank, &i) in order.iter().enumerate() {
            target[rank] += data[[i, j]];
        }
    }
    for t in target.iter_mut() {
        *t /= n_cols as f64;
    }

    for (j, order) in orders.iter().enumerate() {
        let mut r = 0;
        while r < n_rows {
            let mut end = r;
            while end + 1 < n_rows && data[[order[end + 1], j]] == data[[order[r], j]] {
                end += 1;
            }
            let avg = target[r..=end].iter().sum::<f64>() / (end - r + 1) as f64;
            for &i in &order[r..=end] {
                data[[i, j]] = avg;
            }
            r = end + 1;
        }
    }
}

/// Tukey median polish of a probes x samples block, returning overall + column effects
/// R equivalent: stats::medpolish() as used by affy's summarization
pub fn median_polish(block: &Array2<f64>, max_iter: usize, eps: f64) -> Vec<f64> {
    let (n_rows, n_cols) = block.dim();
    let mut z = block.clone();
    let mut row_eff = vec![0.0; n_rows];
    let mut col_eff = vec![0.0; n_cols];
    let mut overall = 0.0;
    let mut old_sum = 0.0;

    for _ in 0..max_iter.max(1) {
        for i in 0..n_rows {
            let delta = median(&z.row(i).to_vec());
            z.row_mut(i).mapv_inplace(|v| v - delta);
            row_eff[i] += delta;
        }
        let delta = median(&col_eff);
        col_eff.iter_mut().for_each(|c| *c -= delta);
        overall += delta;

        for j in 0..n_cols {
            let delta = median(&z.column(j).to_vec());
            z.column_mut(j).mapv_inplace(|v| v - delta);
            col_eff[j] += delta;
        }
        let delta = median(&row_eff);
        row_eff.iter_mut().for_each(|r| *r -= delta);
        overall += delta;

        let new_sum: f64 = z.iter().map(|v| v.abs()).sum();
        let converged = new_sum == 0.0 || (new_sum - old_sum).abs() < eps * new_sum;
        if converged {
            break;
        }
        old_sum = new_sum;
    }

    col_eff.iter().map(|c| overall + c).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_quantile_normalize_equalizes_distributions() {
        let mut m = array![[5.0, 4.0, 3.0], [2.0, 1.0, 4.0], [3.0, 4.0, 6.0], [4.0, 2.0, 8.0]];
        quantile_normalize(&mut m);

        let mut sorted: Vec<Vec<f64>> = (0..3)
            .map(|j| {
                let mut c = m.column(j).to_vec();
                c.sort_by(|a, b| a.partial_cmp(b).unwrap());
                c
            })
            .collect();
        // column 1 has a tie (4.0 twice) so its two top values are averaged
        let tie_col = sorted.remove(1);
        assert_eq!(sorted[0], sorted[1]);
        assert!((tie_col[2] - tie_col[3]).abs() < 1e-12);
    }

    #[test]
    fn test_median_polish_additive_block() {
        // y_ij = 10 + row_i + col_j exactly -> overall + col effect recovers 10 + col_j + median(row)
        let block = array![[11.0, 12.0, 13.0], [12.0, 13.0, 14.0], [13.0, 14.0, 15.0]];
        let expr = median_polish(&block, 10, 0.01);
        assert!((expr[0] - 12.0).abs() < 1e-9);
        assert!((expr[1] - 13.0).abs() < 1e-9);
        assert!((expr[2] - 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_density_mode_finds_peak() {
        let mut x: Vec<f64> = (0..200).map(|i| 100.0 + (i % 10) as f64 * 0.1).collect();
        x.extend((0..20).map(|i| 500.0 + i as f64));
        let mode = density_mode(&x, 512).unwrap();
        assert!((mode - 100.45).abs() < 5.0, "mode = {}", mode);
    }

    #[test]
    fn test_rma_output_shape_and_scale() {
        let mut values = Vec::new();
        for p in 0..60 {
            for s in 0..3 {
                values.push(50.0 + (p * 37 % 23) as f64 * 20.0 + s as f64 * 3.0 + (p % 5) as f64);
            }
        }
        let intensities = Array2::from_shape_vec((60, 3), values).unwrap();
        let probe_ids = (0..60).map(|i| format!("p{}", i)).collect();
        let probeset_ids = (0..60).map(|i| format!("ps{}", i / 4)).collect();
        let sample_ids = vec!["a1".to_string(), "a2".to_string(), "a3".to_string()];
        let probes = ProbeIntensities::new(intensities, probe_ids, probeset_ids, sample_ids).unwrap();

        let m = rma(&probes, &RmaParams::default()).unwrap();
        assert_eq!(m.n_genes(), 15);
        assert_eq!(m.n_samples(), 3);
        assert!(m.values().iter().all(|v| v.is_finite()));
        assert_eq!(m.gene_ids()[0], "ps0");
    }
}
