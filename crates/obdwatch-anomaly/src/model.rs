//! Reconstruction model capability
//!
//! The learned model lives outside this crate. Anything that can take a
//! normalized `(W, F)` window and return a same-shaped reconstruction plugs in
//! here, so model families can be swapped without touching the scorer.

use crate::error::Result;
use ndarray::{Array2, Axis};

/// Given a normalized window, return a same-shaped reconstruction.
/// Implementations hold no per-call mutable state and may be called
/// from several threads at once.
pub trait ReconstructionModel: Send + Sync {
    fn reconstruct(&self, window: &Array2<f64>) -> Result<Array2<f64>>;

    /// Name shown in logs
    fn name(&self) -> &str;
}

/// Training-free baseline: every timestep is reconstructed as the mean of its
/// column over the window, so the error is the per-feature variance.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowMeanModel;

impl ReconstructionModel for WindowMeanModel {
    fn reconstruct(&self, window: &Array2<f64>) -> Result<Array2<f64>> {
        let mut out = window.clone();
        if let Some(means) = window.mean_axis(Axis(0)) {
            for mut row in out.rows_mut() {
                row.assign(&means);
            }
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "window-mean"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_window_mean_reconstruction() {
        let window = array![[0.0, 1.0], [1.0, 1.0], [2.0, 1.0]];
        let recon = WindowMeanModel.reconstruct(&window).unwrap();
        assert_eq!(recon.dim(), (3, 2));
        assert_eq!(recon, array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]]);
    }
}
