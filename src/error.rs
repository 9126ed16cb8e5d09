//! Error types for canonical correlation analysis and biplot rendering.

use thiserror::Error;

/// All failure modes of the crate.
///
/// Every error is detected at the start of the operation that raises it;
/// nothing executes partially and nothing is retried. The caller must supply
/// corrected inputs and re-invoke.
#[derive(Error, Debug)]
pub enum CcaError {
    /// Two inputs that must share a dimension do not.
    #[error("shape mismatch: {context} (expected {expected}, got {actual})")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Centering and SVD need at least two cases.
    #[error("need at least 2 cases to center and decompose, got {n}")]
    TooFewCases { n: usize },

    /// A retained component count exceeds the numerical rank of the
    /// centered matrix. Rescaling by `sqrt(n-1)/sigma` would divide by a
    /// vanishing singular value and blow up.
    #[error(
        "variable set {set}: requested {requested} components but the \
         effective rank is {effective_rank}"
    )]
    RankDeficiency {
        set: &'static str,
        requested: usize,
        effective_rank: usize,
    },

    /// Arrows were requested but no arrow labels were supplied.
    #[error("arrow labels are required when arrows are drawn")]
    MissingLabels,

    /// `n_arrows` must lie in `[1, p]` where `p` is the variable count.
    #[error("n_arrows must lie in [1, {n_variables}], got {n_arrows}")]
    InvalidSelectionSize {
        n_arrows: usize,
        n_variables: usize,
    },

    /// A linear-algebra routine failed or produced non-finite output.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// The drawing backend failed while rendering.
    #[error("render error: {0}")]
    Render(String),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, CcaError>;
