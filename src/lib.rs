// Canonical correlation analysis (CCA) with biplot rendering

#![doc = include_str!("../README.md")]

pub mod biplot;
pub mod cca;
pub mod error;

pub use biplot::Biplot;
pub use cca::{cca, CanonicalCorrelation};
pub use error::{CcaError, Result};
