/// Construction-time settings shared by the matching cost factors.
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// Worker count for the parallel per-point pass.
    pub num_threads: usize,
    /// Squared distance bound for accepting a correspondence.
    pub max_correspondence_distance_sq: f64,
    /// Rotation angle (radians) below which a correspondence refresh is
    /// skipped. Zero disables the tolerance.
    pub correspondence_update_tolerance_rot: f64,
    /// Translation norm below which a correspondence refresh is skipped.
    /// Zero disables the tolerance.
    pub correspondence_update_tolerance_trans: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            num_threads: 1,
            max_correspondence_distance_sq: 1.0,
            correspondence_update_tolerance_rot: 0.0,
            correspondence_update_tolerance_trans: 0.0,
        }
    }
}

impl MatchingConfig {
    /// Whether skipping a refresh is possible at all.
    ///
    /// Both tolerances at zero means exact correspondence tracking: every
    /// refresh call recomputes.
    pub(crate) fn tolerance_enabled(&self) -> bool {
        self.correspondence_update_tolerance_rot > 0.0
            || self.correspondence_update_tolerance_trans > 0.0
    }
}

/// Settings for the photometric factor.
#[derive(Debug, Clone)]
pub struct PhotometricConfig {
    /// Shared matching settings.
    pub matching: MatchingConfig,
    /// Scalar weight applied to every photometric residual.
    pub photometric_term_weight: f64,
}

impl Default for PhotometricConfig {
    fn default() -> Self {
        Self {
            matching: MatchingConfig::default(),
            photometric_term_weight: 1.0,
        }
    }
}

impl PhotometricConfig {
    /// Settings with the given photometric weight and default matching
    /// parameters.
    pub fn with_weight(photometric_term_weight: f64) -> Self {
        Self {
            matching: MatchingConfig::default(),
            photometric_term_weight,
        }
    }
}
