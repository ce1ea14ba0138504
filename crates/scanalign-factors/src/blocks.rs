use nalgebra::{Matrix6, Vector6};

/// Accumulated Hessian and bias blocks of one factor evaluation.
///
/// All five blocks are produced together: the derivative outputs of
/// [`evaluate`](crate::gicp::GicpFactor::evaluate) are all-or-nothing, so a
/// caller either passes a `LinearizedBlocks` to fill or none at all.
///
/// The tangent-space ordering is rotation first, translation second.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearizedBlocks {
    /// Hessian block of the target pose.
    pub h_target: Matrix6<f64>,
    /// Hessian block of the source pose.
    pub h_source: Matrix6<f64>,
    /// Cross Hessian block between target and source poses.
    pub h_target_source: Matrix6<f64>,
    /// Bias vector of the target pose.
    pub b_target: Vector6<f64>,
    /// Bias vector of the source pose.
    pub b_source: Vector6<f64>,
}

impl LinearizedBlocks {
    /// All blocks zero.
    pub fn zeros() -> Self {
        Self {
            h_target: Matrix6::zeros(),
            h_source: Matrix6::zeros(),
            h_target_source: Matrix6::zeros(),
            b_target: Vector6::zeros(),
            b_source: Vector6::zeros(),
        }
    }

    pub(crate) fn add_assign(&mut self, other: &Self) {
        self.h_target += other.h_target;
        self.h_source += other.h_source;
        self.h_target_source += other.h_target_source;
        self.b_target += other.b_target;
        self.b_source += other.b_source;
    }
}

impl Default for LinearizedBlocks {
    fn default() -> Self {
        Self::zeros()
    }
}
