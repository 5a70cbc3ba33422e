//! A-contrario inlier threshold selection.
//!
//! Instead of classifying inliers against a caller-supplied pixel
//! threshold, the adaptive estimator looks at the sorted residuals of a
//! candidate pose and picks the split that is least expected under a
//! uniform background model. The score is a Number of False Alarms (NFA):
//! the log-probability that `k` random points land within the `k`-th
//! residual of the model, corrected for the number of ways such a
//! configuration can be picked. A split is meaningful when its NFA is
//! negative; the most negative split wins.

/// Result of threshold selection over a sorted residual vector.
#[derive(Debug, Clone, Copy)]
pub struct NfaSelection {
    /// Number of residuals classified as inliers.
    pub inlier_count: usize,
    /// Residual value separating inliers from outliers.
    pub threshold: f64,
    /// log10 of the number of false alarms at this split.
    pub nfa: f64,
}

/// Log10 of binomial coefficients up to `n`, computed once per call site.
pub(crate) struct LogCombinations {
    log_factorial: Vec<f64>,
}

impl LogCombinations {
    pub(crate) fn new(n: usize) -> Self {
        let mut log_factorial = Vec::with_capacity(n + 1);
        log_factorial.push(0.0);
        for i in 1..=n {
            let prev = log_factorial[i - 1];
            log_factorial.push(prev + (i as f64).log10());
        }
        Self { log_factorial }
    }

    fn log_c(&self, n: usize, k: usize) -> f64 {
        self.log_factorial[n] - self.log_factorial[k] - self.log_factorial[n - k]
    }
}

/// Select the most meaningful inlier/outlier split of a candidate model.
///
/// # Arguments
/// * `sorted_errors` - Residuals in pixels, ascending; infinite entries
///   (e.g. points behind the camera) terminate the scan.
/// * `sample_size` - Size of the minimal sample the model was fit on; the
///   NFA scan only scores splits with more than `sample_size` inliers.
/// * `image_area` - Pixel area of the image, defining the background model.
/// * `cap` - Upper bound on the selected threshold; pass infinity to leave
///   the selection uncapped.
///
/// When the NFA scan finds nothing, a second stage looks for an exact-fit
/// gap: a consensus no larger than the sample whose residuals are
/// essentially zero, separated from the rest by several orders of
/// magnitude. This keeps noise-free problems with a bare minimal consensus
/// solvable, where the NFA correction term has no extra points to count.
///
/// Returns `None` when neither stage finds a separating split.
pub fn select_inlier_threshold(
    sorted_errors: &[f64],
    sample_size: usize,
    image_area: f64,
    cap: f64,
) -> Option<NfaSelection> {
    let n = sorted_errors.len();
    if n <= sample_size || image_area <= 0.0 {
        return None;
    }

    let combinations = LogCombinations::new(n);
    // probability that a uniform point lands within 1px of its prediction
    let log_alpha0 = (std::f64::consts::PI / image_area).log10();
    // candidate models per sample, the a-contrario correction term
    let log_models = ((n - sample_size) as f64).log10();

    let mut best: Option<NfaSelection> = None;
    for k in (sample_size + 1)..=n {
        let e_k = sorted_errors[k - 1];
        if !e_k.is_finite() || e_k > cap {
            break;
        }
        // residuals of exact fits are indistinguishable from zero; floor
        // them to keep the logarithm finite
        let log_alpha = log_alpha0 + 2.0 * e_k.max(1e-12).log10();
        let nfa = log_models
            + combinations.log_c(n, k)
            + combinations.log_c(k, sample_size)
            + (k - sample_size) as f64 * log_alpha;
        if nfa < 0.0 && best.map_or(true, |b| nfa < b.nfa) {
            best = Some(NfaSelection {
                inlier_count: k,
                threshold: e_k,
                nfa,
            });
        }
    }

    best.or_else(|| select_exact_fit_gap(sorted_errors, sample_size, cap))
}

// Residual bound under which a fit counts as exact, and the minimum jump to
// the first rejected residual.
const EXACT_FIT_MAX: f64 = 1.0;
const GAP_FACTOR: f64 = 1e4;

fn select_exact_fit_gap(sorted_errors: &[f64], sample_size: usize, cap: f64) -> Option<NfaSelection> {
    let n = sorted_errors.len();
    let mut best: Option<(f64, usize)> = None;
    for k in sample_size..n {
        let e_k = sorted_errors[k - 1];
        if !e_k.is_finite() || e_k > cap || e_k > EXACT_FIT_MAX {
            break;
        }
        let ratio = sorted_errors[k] / e_k.max(1e-12);
        if ratio > GAP_FACTOR && best.map_or(true, |(r, _)| ratio > r) {
            best = Some((ratio, k));
        }
    }
    best.map(|(_, k)| NfaSelection {
        inlier_count: k,
        threshold: sorted_errors[k - 1].max(1e-12),
        nfa: 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const AREA: f64 = 800.0 * 600.0;

    #[test]
    fn test_clean_split_is_found() {
        // 8 near-zero residuals, 4 gross ones
        let mut errors = vec![1e-9; 8];
        errors.extend([250.0, 300.0, 400.0, 500.0]);
        let sel = select_inlier_threshold(&errors, 4, AREA, f64::INFINITY).unwrap();
        assert_eq!(sel.inlier_count, 8);
        assert!(sel.threshold < 1.0);
        assert!(sel.nfa < 0.0);
    }

    #[test]
    fn test_uniform_residuals_rejected() {
        // residuals spread like background noise carry no meaningful split
        let errors: Vec<f64> = (1..=12).map(|i| i as f64 * 60.0).collect();
        assert!(select_inlier_threshold(&errors, 4, AREA, f64::INFINITY).is_none());
    }

    #[test]
    fn test_cap_limits_threshold() {
        let mut errors = vec![1e-9; 6];
        errors.extend([8.0, 9.0]);
        let sel = select_inlier_threshold(&errors, 4, AREA, 2.0).unwrap();
        // the capped scan must not adopt the 8px split
        assert_eq!(sel.inlier_count, 6);
        assert!(sel.threshold <= 2.0);
    }

    #[test]
    fn test_infinite_residuals_terminate_scan() {
        let errors = vec![1e-9, 1e-9, 1e-9, 1e-9, 1e-9, f64::INFINITY];
        let sel = select_inlier_threshold(&errors, 4, AREA, f64::INFINITY).unwrap();
        assert_eq!(sel.inlier_count, 5);
    }

    #[test]
    fn test_exact_fit_gap_fallback() {
        // four exact residuals and two gross ones: no split larger than
        // the sample for the NFA scan to score, caught by the gap stage
        let errors = vec![1e-9, 1e-9, 1e-9, 1e-9, 400.0, 500.0];
        let sel = select_inlier_threshold(&errors, 4, AREA, f64::INFINITY).unwrap();
        assert_eq!(sel.inlier_count, 4);
        assert!(sel.threshold < 1.0);
    }

    #[test]
    fn test_gap_requires_exact_fit() {
        // the same shape with clearly non-zero residuals is ambiguous and
        // must not be promoted to a consensus
        let errors = vec![3.0, 3.5, 4.0, 4.5, 400.0, 500.0];
        assert!(select_inlier_threshold(&errors, 4, AREA, f64::INFINITY).is_none());
    }

    #[test]
    fn test_too_few_points() {
        let errors = vec![0.0; 4];
        assert!(select_inlier_threshold(&errors, 4, AREA, f64::INFINITY).is_none());
    }
}
