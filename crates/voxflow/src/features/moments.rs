//! Image moments on 2-D projections.
//!
//! Moments follow the usual convention: `x` is the column index, `y` the row
//! index, `M_pq = Σ I(y, x) · x^p · y^q`.

use ndarray::Array2;

/// Number of Hu invariants kept per projection (φ1..φ6; φ7 is skew-sensitive).
pub const N_HU: usize = 6;

/// Number of global statistics per projection (mean, variance).
pub const N_STATS: usize = 2;

/// Normalized central moments `η_pq` for `p, q ≤ 3`, indexed `[p][q]`.
///
/// Returns `None` when the image has zero total mass.
pub fn normalized_central_moments(img: &Array2<f64>) -> Option<[[f64; 4]; 4]> {
    let mut m00 = 0.0;
    let mut m10 = 0.0;
    let mut m01 = 0.0;
    for ((y, x), &v) in img.indexed_iter() {
        m00 += v;
        m10 += v * x as f64;
        m01 += v * y as f64;
    }
    if m00 == 0.0 || !m00.is_finite() {
        return None;
    }
    let x_bar = m10 / m00;
    let y_bar = m01 / m00;

    let mut mu = [[0.0f64; 4]; 4];
    for ((y, x), &v) in img.indexed_iter() {
        if v == 0.0 {
            continue;
        }
        let dx = x as f64 - x_bar;
        let dy = y as f64 - y_bar;
        let px = [1.0, dx, dx * dx, dx * dx * dx];
        let py = [1.0, dy, dy * dy, dy * dy * dy];
        for p in 0..4 {
            for q in 0..(4 - p) {
                mu[p][q] += v * px[p] * py[q];
            }
        }
    }

    let mut eta = [[0.0f64; 4]; 4];
    for p in 0..4 {
        for q in 0..(4 - p) {
            let order = (p + q) as f64;
            eta[p][q] = mu[p][q] / m00.powf((order + 2.0) / 2.0);
        }
    }
    Some(eta)
}

/// First six Hu invariants from normalized central moments.
pub fn hu_invariants(eta: &[[f64; 4]; 4]) -> [f64; N_HU] {
    let n20 = eta[2][0];
    let n02 = eta[0][2];
    let n11 = eta[1][1];
    let n30 = eta[3][0];
    let n03 = eta[0][3];
    let n21 = eta[2][1];
    let n12 = eta[1][2];

    let a = n30 + n12;
    let b = n21 + n03;
    let c = n30 - 3.0 * n12;
    let d = 3.0 * n21 - n03;

    [
        n20 + n02,
        (n20 - n02).powi(2) + 4.0 * n11 * n11,
        c * c + d * d,
        a * a + b * b,
        c * a * (a * a - 3.0 * b * b) + d * b * (3.0 * a * a - b * b),
        (n20 - n02) * (a * a - b * b) + 4.0 * n11 * a * b,
    ]
}

/// Sign-preserving log compression `-sign(h) · log10(|h|)`.
///
/// Zero and non-finite inputs map to NaN ("undefined").
#[inline]
pub fn log_compress(h: f64) -> f64 {
    if h == 0.0 || !h.is_finite() {
        return f64::NAN;
    }
    -h.signum() * h.abs().log10()
}

/// Log-compressed Hu invariants of one projection; all NaN for an empty image.
pub fn log_hu(img: &Array2<f64>) -> [f64; N_HU] {
    match normalized_central_moments(img) {
        Some(eta) => hu_invariants(&eta).map(log_compress),
        None => [f64::NAN; N_HU],
    }
}

/// Mean and population variance over non-zero pixels (NaN when none).
pub fn nonzero_mean_variance(img: &Array2<f64>) -> [f64; N_STATS] {
    let mut n = 0usize;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for &v in img.iter().filter(|v| **v != 0.0) {
        n += 1;
        sum += v;
        sum_sq += v * v;
    }
    if n == 0 {
        return [f64::NAN; N_STATS];
    }
    let count = n as f64;
    let mean = sum / count;
    let variance = ((sum_sq - sum * sum / count) / count).max(0.0);
    [mean, variance]
}
