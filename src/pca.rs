use log::info;
use nalgebra::DMatrix;

use crate::sample_index::MAX_CN;

/// Quantization factor from normalized depth to u8
const DEPTH_QUANT: f32 = 255.0 / MAX_CN;

/// Quantize one normalized depth for the PCA matrix
pub fn quantize_depth(depth: f32) -> u8 {
    (DEPTH_QUANT * depth + 0.5) as u8
}

pub struct PcaResult {
    /// Projection of each sample onto the top components, samples x components
    pub scores: Vec<Vec<f64>>,
    /// Fraction of total variance captured by each component
    pub variance_fraction: Vec<f64>,
}

/// Project the sample x autosome-tile matrix onto its top principal components
///
/// Rows are the per-sample quantized depth vectors, zero padded per chromosome so all
/// rows share one length. Columns are mean centered; the projection is taken from the
/// thin SVD of the centered matrix. At most 5 components are kept; fewer than 3 usable
/// components aborts the projection (there is nothing meaningful to plot or report).
///
pub fn project(rows: &[Vec<u8>]) -> Option<PcaResult> {
    if rows.is_empty() {
        return None;
    }
    let n_samples = rows.len();
    let n_tiles = rows.iter().map(|r| r.len()).max().unwrap();
    if n_tiles == 0 {
        return None;
    }

    let mut mat = DMatrix::<f64>::zeros(n_samples, n_tiles);
    for (i, row) in rows.iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            mat[(i, j)] = v as f64;
        }
    }

    // center columns
    for j in 0..n_tiles {
        let mean = mat.column(j).sum() / n_samples as f64;
        for i in 0..n_samples {
            mat[(i, j)] -= mean;
        }
    }

    let svd = mat.svd(true, false);
    let u = svd.u.as_ref()?;
    let singular = &svd.singular_values;

    let total_var: f64 = singular.iter().map(|s| s * s).sum();
    if total_var <= 0.0 {
        return None;
    }

    let rank = singular.iter().filter(|&&s| s > 1e-9).count();
    let k = rank.min(5);
    if k < 3 {
        info!("{k} principal components, skipping projection");
        return None;
    }

    let variance_fraction = (0..k)
        .map(|i| singular[i] * singular[i] / total_var)
        .collect::<Vec<_>>();

    // scores are U * Sigma restricted to the kept components
    let scores = (0..n_samples)
        .map(|i| (0..k).map(|j| u[(i, j)] * singular[j]).collect())
        .collect();

    Some(PcaResult {
        scores,
        variance_fraction,
    })
}
