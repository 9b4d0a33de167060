//! Automatic thresholding
//!
//! Otsu's method on bimodal intensity histograms.

/// Otsu's method for automatic threshold selection
///
/// Finds the bin edge that maximizes inter-class variance. Non-finite
/// values are ignored. Returns the lower bin edge of the split, so voxels
/// strictly above the returned value form the upper class.
pub fn otsu_threshold(data: &[f64], num_bins: usize) -> f64 {
    let finite: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() || num_bins == 0 {
        return 0.0;
    }

    let min_val = finite.iter().fold(f64::MAX, |a, &b| a.min(b));
    let max_val = finite.iter().fold(f64::MIN, |a, &b| a.max(b));
    if (max_val - min_val).abs() < 1e-10 {
        return min_val;
    }

    let bin_width = (max_val - min_val) / num_bins as f64;
    let mut histogram = vec![0usize; num_bins];
    for &v in &finite {
        let bin = (((v - min_val) / bin_width).floor() as usize).min(num_bins - 1);
        histogram[bin] += 1;
    }

    let total = finite.len() as f64;
    let sum_total: f64 = histogram.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();

    let mut sum_low = 0.0;
    let mut weight_low = 0.0;
    let mut best_variance = 0.0;
    let mut best_bin = 0;

    for (t, &count) in histogram.iter().enumerate() {
        weight_low += count as f64;
        if weight_low == 0.0 {
            continue;
        }
        let weight_high = total - weight_low;
        if weight_high == 0.0 {
            break;
        }
        sum_low += t as f64 * count as f64;

        let mean_low = sum_low / weight_low;
        let mean_high = (sum_total - sum_low) / weight_high;
        let variance = weight_low * weight_high * (mean_low - mean_high).powi(2);

        if variance > best_variance {
            best_variance = variance;
            best_bin = t;
        }
    }

    // Upper edge of the last bin in the low class
    min_val + (best_bin + 1) as f64 * bin_width
}
