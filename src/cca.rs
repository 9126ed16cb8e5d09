// Canonical correlation analysis (CCA) with PCA pre-whitening

use log::{debug, info};
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use ndarray_linalg::SVD;

use crate::error::{CcaError, Result};

/// Retained singular values below this fraction of the largest one are
/// treated as numerically zero when checking rank.
const RANK_TOLERANCE: f64 = 1e-9;

/// Result of a canonical correlation analysis.
///
/// Holds the canonical coefficient matrices for both variable sets and the
/// canonical correlations, columns ordered by descending correlation
/// strength (column 0 is the strongest pair of canonical variates).
#[derive(Debug, Clone)]
pub struct CanonicalCorrelation {
    /// Coefficients for the first variable set. Shape: (p_a, min(qa, qb)).
    coeff_a: Array2<f64>,
    /// Coefficients for the second variable set. Shape: (p_b, min(qa, qb)).
    coeff_b: Array2<f64>,
    /// Canonical correlations, non-increasing. Shape: (min(qa, qb)).
    correlations: Array1<f64>,
}

impl CanonicalCorrelation {
    /// Computes a canonical correlation analysis with PCA pre-whitening.
    ///
    /// `a` and `b` hold data for two sets of variables measured on the same
    /// cases: variables are rows and cases are columns, and column `k` of
    /// `a` and column `k` of `b` must refer to the same unit. `qa` and `qb`
    /// are the numbers of principal components retained for each set before
    /// the canonical decomposition.
    ///
    /// The algorithm centers each row, whitens both matrices through their
    /// leading `qa`/`qb` left singular vectors (rescaled so the projected
    /// coordinates have identity covariance), takes the SVD of the
    /// cross-covariance of the whitened projections, and maps the resulting
    /// bases back to the original variable spaces.
    ///
    /// The computation is a pure function of its inputs: no randomness, no
    /// side effects, identical inputs give identical outputs.
    ///
    /// # Errors
    ///
    /// * [`CcaError::ShapeMismatch`] if `a` and `b` disagree on the case
    ///   count, or either matrix has no variables.
    /// * [`CcaError::TooFewCases`] if there are fewer than 2 cases.
    /// * [`CcaError::RankDeficiency`] if `qa` or `qb` exceeds the numerical
    ///   rank of the corresponding centered matrix.
    /// * [`CcaError::Numerical`] if an SVD fails or the output is not
    ///   finite.
    ///
    /// # Examples
    ///
    /// ```
    /// use ndarray::array;
    /// use cca_biplot::CanonicalCorrelation;
    ///
    /// // Two variable sets observed on the same 4 cases.
    /// let a = array![[1.0, 2.0, 3.0, 4.0], [0.5, 1.0, 2.5, 3.0]];
    /// let b = array![[2.0, 4.0, 6.0, 8.5], [1.0, 0.0, 1.0, 0.5]];
    ///
    /// let cc = CanonicalCorrelation::fit(a.view(), b.view(), 1, 1).unwrap();
    /// assert_eq!(cc.correlations().len(), 1);
    /// ```
    pub fn fit(
        a: ArrayView2<f64>,
        b: ArrayView2<f64>,
        qa: usize,
        qb: usize,
    ) -> Result<Self> {
        if a.ncols() != b.ncols() {
            return Err(CcaError::ShapeMismatch {
                context: "A and B must hold the same cases (columns)",
                expected: a.ncols(),
                actual: b.ncols(),
            });
        }
        let n = a.ncols();
        if n < 2 {
            return Err(CcaError::TooFewCases { n });
        }
        if a.nrows() == 0 || b.nrows() == 0 {
            return Err(CcaError::ShapeMismatch {
                context: "each variable set needs at least one variable (row)",
                expected: 1,
                actual: 0,
            });
        }

        info!(
            "fitting CCA: A is {}x{}, B is {}x{}, retaining qa={} qb={}",
            a.nrows(),
            n,
            b.nrows(),
            n,
            qa,
            qb
        );

        let ac = center_rows(a);
        let bc = center_rows(b);

        // Whitening bases: projecting the centered data through these gives
        // coordinates with identity case-covariance.
        let ua = whitening_basis(&ac, qa, n, "A")?;
        let ub = whitening_basis(&bc, qb, n, "B")?;

        let ax = ua.t().dot(&ac);
        let bx = ub.t().dot(&bc);

        // Cross-covariance of the whitened projections; its singular values
        // are the canonical correlations.
        let cross = ax.dot(&bx.t()) / n as f64;
        let (u, sv, vt) = cross
            .svd(true, true)
            .map_err(|e| CcaError::Numerical(format!("SVD of cross-covariance failed: {}", e)))?;
        let u = u.ok_or_else(|| {
            CcaError::Numerical("SVD did not return left singular vectors".into())
        })?;
        let vt = vt.ok_or_else(|| {
            CcaError::Numerical("SVD did not return right singular vectors".into())
        })?;

        let k = qa.min(qb);
        let coeff_a = ua.dot(&u.slice(s![.., ..k]));
        let coeff_b = ub.dot(&vt.slice(s![..k, ..]).t());
        let correlations = sv.slice(s![..k]).to_owned();

        if coeff_a.iter().any(|v| !v.is_finite())
            || coeff_b.iter().any(|v| !v.is_finite())
            || correlations.iter().any(|v| !v.is_finite())
        {
            return Err(CcaError::Numerical(
                "canonical coefficients are not finite; inputs are ill-conditioned".into(),
            ));
        }

        debug!(
            "canonical correlations (first {}): {:?}",
            correlations.len().min(5),
            correlations.iter().take(5).collect::<Vec<_>>()
        );

        Ok(Self {
            coeff_a,
            coeff_b,
            correlations,
        })
    }

    /// Canonical coefficients for the first variable set.
    ///
    /// Shape: (p_a, min(qa, qb)); column `j` corresponds to
    /// `correlations()[j]`.
    pub fn coefficients_a(&self) -> &Array2<f64> {
        &self.coeff_a
    }

    /// Canonical coefficients for the second variable set.
    ///
    /// Shape: (p_b, min(qa, qb)); column `j` corresponds to
    /// `correlations()[j]`.
    pub fn coefficients_b(&self) -> &Array2<f64> {
        &self.coeff_b
    }

    /// The canonical correlations, in non-increasing order.
    ///
    /// All values lie in `[0, 1]` for well-conditioned input; values near 1
    /// indicate a strong linear relationship between the two variable sets
    /// in that canonical dimension.
    pub fn correlations(&self) -> &Array1<f64> {
        &self.correlations
    }
}

/// Canonical correlation analysis as a plain function.
///
/// Convenience wrapper around [`CanonicalCorrelation::fit`] that returns the
/// raw `(wa, wb, s)` triple.
///
/// # Examples
///
/// ```
/// use ndarray::array;
/// use cca_biplot::cca;
///
/// let a = array![[1.0, 2.0, 3.0, 4.0], [0.5, 1.0, 2.5, 3.0]];
/// let b = array![[2.0, 4.0, 6.0, 8.5], [1.0, 0.0, 1.0, 0.5]];
/// let (wa, wb, s) = cca(a.view(), b.view(), 1, 1).unwrap();
/// assert_eq!(wa.ncols(), s.len());
/// assert_eq!(wb.ncols(), s.len());
/// ```
pub fn cca(
    a: ArrayView2<f64>,
    b: ArrayView2<f64>,
    qa: usize,
    qb: usize,
) -> Result<(Array2<f64>, Array2<f64>, Array1<f64>)> {
    let fitted = CanonicalCorrelation::fit(a, b, qa, qb)?;
    Ok((fitted.coeff_a, fitted.coeff_b, fitted.correlations))
}

/// Subtracts each row's mean across cases.
pub(crate) fn center_rows(x: ArrayView2<f64>) -> Array2<f64> {
    let mean = x.sum_axis(Axis(1)) / x.ncols() as f64;
    &x - &mean.insert_axis(Axis(1))
}

/// Leading `q` left singular vectors of a centered matrix, each rescaled by
/// `sqrt(n-1)/sigma_i` so that the projected coordinates have identity
/// covariance. Fails with `RankDeficiency` rather than dividing by a
/// vanishing singular value.
fn whitening_basis(
    centered: &Array2<f64>,
    q: usize,
    n: usize,
    set: &'static str,
) -> Result<Array2<f64>> {
    let (u, sv, _) = centered
        .svd(true, false)
        .map_err(|e| CcaError::Numerical(format!("SVD of variable set {} failed: {}", set, e)))?;
    let u = u.ok_or_else(|| {
        CcaError::Numerical(format!(
            "SVD of variable set {} did not return left singular vectors",
            set
        ))
    })?;

    let largest = sv.get(0).copied().unwrap_or(0.0);
    let effective_rank = if largest > 0.0 {
        sv.iter().take_while(|&&v| v > largest * RANK_TOLERANCE).count()
    } else {
        0
    };
    if q == 0 || q > effective_rank {
        return Err(CcaError::RankDeficiency {
            set,
            requested: q,
            effective_rank,
        });
    }

    let mut basis = u.slice(s![.., ..q]).to_owned();
    let scale = ((n - 1) as f64).sqrt();
    for (i, mut column) in basis.columns_mut().into_iter().enumerate() {
        column.mapv_inplace(|v| v * scale / sv[i]);
    }
    Ok(basis)
}
